//! Dynamic operations on tagged values
//!
//! These are the semantics of every `.any` operation. Generated code reaches
//! them through the `extern "C"` stubs; the compiler's constant folder calls
//! them directly on a scratch heap so folded and unfolded results agree.

use crate::heap::{Heap, HeapObject, PropertyMap};
use crate::value::{Value, ValueKind};

/// Numeric binary operators with coercion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Sub,
    Mul,
    Div,
    Mod,
}

/// Relational operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

/// Truthiness: `false`, `0`, `-0`, `NaN`, `null`, `undefined` and `""` are falsy
pub fn to_boolean(heap: &Heap, v: Value) -> bool {
    match v.kind() {
        ValueKind::Number => v.as_number().is_some_and(|n| n != 0.0 && !n.is_nan()),
        ValueKind::Boolean => v.as_bool().unwrap_or(false),
        ValueKind::Null | ValueKind::Undefined => false,
        ValueKind::Function => true,
        ValueKind::Heap => heap.string(v).map_or(true, |s| !s.is_empty()),
    }
}

pub fn to_number(heap: &Heap, v: Value) -> f64 {
    match v.kind() {
        ValueKind::Number => v.as_number().unwrap_or(f64::NAN),
        ValueKind::Boolean => {
            if v.as_bool().unwrap_or(false) {
                1.0
            } else {
                0.0
            }
        }
        ValueKind::Null => 0.0,
        ValueKind::Undefined | ValueKind::Function => f64::NAN,
        ValueKind::Heap => heap.string(v).map_or(f64::NAN, parse_number),
    }
}

/// Parse a numeric string; blank strings are zero, garbage is NaN
pub fn parse_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        _ => trimmed.parse::<f64>().unwrap_or(f64::NAN),
    }
}

/// Shortest decimal form, integral values without a fraction
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i128)
    } else {
        format!("{}", n)
    }
}

/// Text used by `print` and string concatenation
pub fn to_display(heap: &Heap, v: Value) -> String {
    match v.kind() {
        ValueKind::Number => format_number(v.as_number().unwrap_or(f64::NAN)),
        ValueKind::Boolean => v.as_bool().unwrap_or(false).to_string(),
        ValueKind::Null => "null".to_string(),
        ValueKind::Undefined => "undefined".to_string(),
        ValueKind::Function => "[Function]".to_string(),
        ValueKind::Heap => match heap.resolve(v) {
            Some(HeapObject::String(s)) => s.clone(),
            Some(HeapObject::Array(items)) => {
                let parts: Vec<String> = items.iter().map(|&item| to_display(heap, item)).collect();
                parts.join(",")
            }
            Some(HeapObject::Object(_)) => "[object Object]".to_string(),
            Some(HeapObject::Closure { .. }) => "[Function]".to_string(),
            None => "undefined".to_string(),
        },
    }
}

fn is_string(heap: &Heap, v: Value) -> bool {
    heap.string(v).is_some()
}

/// `+`: numeric addition, or concatenation when either side is a string
pub fn add(heap: &mut Heap, a: Value, b: Value) -> Value {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return Value::number(x + y);
    }
    if is_string(heap, a) || is_string(heap, b) {
        let joined = to_display(heap, a) + &to_display(heap, b);
        return heap.alloc_string(joined);
    }
    Value::number(to_number(heap, a) + to_number(heap, b))
}

pub fn arith(heap: &Heap, op: ArithOp, a: Value, b: Value) -> Value {
    let x = to_number(heap, a);
    let y = to_number(heap, b);
    Value::number(match op {
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
    })
}

pub fn negate(heap: &Heap, v: Value) -> Value {
    Value::number(-to_number(heap, v))
}

/// `===`: numbers by value, strings by contents, everything else by identity
pub fn strict_equals(heap: &Heap, a: Value, b: Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (heap.string(a), heap.string(b)) {
        return x == y;
    }
    a == b
}

pub fn compare(heap: &Heap, op: CompareOp, a: Value, b: Value) -> bool {
    if let (Some(x), Some(y)) = (heap.string(a), heap.string(b)) {
        return match op {
            CompareOp::Lt => x < y,
            CompareOp::Le => x <= y,
            CompareOp::Gt => x > y,
            CompareOp::Ge => x >= y,
        };
    }
    let x = to_number(heap, a);
    let y = to_number(heap, b);
    match op {
        CompareOp::Lt => x < y,
        CompareOp::Le => x <= y,
        CompareOp::Gt => x > y,
        CompareOp::Ge => x >= y,
    }
}

pub fn get_property(heap: &Heap, object: Value, name: &str) -> Value {
    match heap.resolve(object) {
        Some(HeapObject::Object(props)) => props.get(name).unwrap_or_default(),
        Some(HeapObject::Array(items)) if name == "length" => Value::number(items.len() as f64),
        Some(HeapObject::String(s)) if name == "length" => Value::number(s.chars().count() as f64),
        _ => Value::undefined(),
    }
}

/// Writes to anything but a plain object are ignored
pub fn set_property(heap: &mut Heap, object: Value, name: &str, value: Value) {
    if let Some(HeapObject::Object(props)) = heap.resolve_mut(object) {
        props.set(name, value);
    }
}

fn array_index(key: Value) -> Option<usize> {
    let n = key.as_number()?;
    (n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64).then_some(n as usize)
}

pub fn get_element(heap: &mut Heap, object: Value, key: Value) -> Value {
    enum Found {
        Value(Value),
        Char(String),
        Prop(String),
    }
    let found = match heap.resolve(object) {
        Some(HeapObject::Array(items)) => {
            Found::Value(array_index(key).and_then(|i| items.get(i).copied()).unwrap_or_default())
        }
        Some(HeapObject::String(s)) => match array_index(key).and_then(|i| s.chars().nth(i)) {
            Some(c) => Found::Char(c.to_string()),
            None => Found::Value(Value::undefined()),
        },
        Some(HeapObject::Object(_)) => Found::Prop(to_display(heap, key)),
        _ => Found::Value(Value::undefined()),
    };
    match found {
        Found::Value(v) => v,
        Found::Char(c) => heap.alloc_string(c),
        Found::Prop(name) => get_property(heap, object, &name),
    }
}

pub fn set_element(heap: &mut Heap, object: Value, key: Value, value: Value) {
    let name = match heap.resolve(object) {
        Some(HeapObject::Object(_)) => Some(to_display(heap, key)),
        _ => None,
    };
    match heap.resolve_mut(object) {
        Some(HeapObject::Array(items)) => {
            if let Some(i) = array_index(key) {
                if i >= items.len() {
                    items.resize(i + 1, Value::undefined());
                }
                items[i] = value;
            }
        }
        Some(HeapObject::Object(props)) => {
            if let Some(name) = name {
                props.set(&name, value);
            }
        }
        _ => {}
    }
}

pub fn new_object(heap: &mut Heap) -> Value {
    heap.alloc(HeapObject::Object(PropertyMap::new()))
}

pub fn new_array(heap: &mut Heap) -> Value {
    heap.alloc(HeapObject::Array(Vec::new()))
}

/// Shallow copy of heap objects; primitives are returned as-is
pub fn clone_value(heap: &mut Heap, v: Value) -> Value {
    match heap.resolve(v).cloned() {
        Some(object) => heap.alloc(object),
        None => v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        let mut heap = Heap::new();
        let empty = heap.alloc_string("");
        let text = heap.alloc_string("x");
        for falsy in [
            Value::boolean(false),
            Value::number(0.0),
            Value::number(-0.0),
            Value::number(f64::NAN),
            Value::null(),
            Value::undefined(),
            empty,
        ] {
            assert!(!to_boolean(&heap, falsy), "{:?} should be falsy", falsy);
        }
        for truthy in [Value::boolean(true), Value::number(-1.0), text, new_object(&mut heap)] {
            assert!(to_boolean(&heap, truthy), "{:?} should be truthy", truthy);
        }
    }

    #[test]
    fn test_add_concatenates_strings() {
        let mut heap = Heap::new();
        let a = heap.alloc_string("n=");
        let r = add(&mut heap, a, Value::number(4.0));
        assert_eq!(heap.string(r), Some("n=4"));
        let r = add(&mut heap, Value::boolean(true), Value::number(2.0));
        assert_eq!(r.as_number(), Some(3.0));
    }

    #[test]
    fn test_arith_coerces_and_never_traps() {
        let heap = Heap::new();
        assert!(arith(&heap, ArithOp::Div, Value::number(0.0), Value::number(0.0))
            .as_number()
            .is_some_and(f64::is_nan));
        assert_eq!(
            arith(&heap, ArithOp::Div, Value::number(1.0), Value::number(0.0)).as_number(),
            Some(f64::INFINITY)
        );
        assert!(arith(&heap, ArithOp::Mod, Value::number(5.0), Value::number(0.0))
            .as_number()
            .is_some_and(f64::is_nan));
        assert_eq!(arith(&heap, ArithOp::Sub, Value::null(), Value::number(2.0)).as_number(), Some(-2.0));
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(7.0), "7");
        assert_eq!(format_number(-0.0), "0");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(format_number(f64::NAN), "NaN");
    }

    #[test]
    fn test_strict_equality() {
        let mut heap = Heap::new();
        let a = heap.alloc_string("ab");
        let b = heap.alloc_string("ab");
        assert!(strict_equals(&heap, a, b));
        assert!(!strict_equals(&heap, Value::number(f64::NAN), Value::number(f64::NAN)));
        assert!(strict_equals(&heap, Value::number(0.0), Value::number(-0.0)));
        assert!(!strict_equals(&heap, Value::null(), Value::undefined()));
        let o = new_object(&mut heap);
        let p = new_object(&mut heap);
        assert!(strict_equals(&heap, o, o));
        assert!(!strict_equals(&heap, o, p));
    }

    #[test]
    fn test_elements_and_properties() {
        let mut heap = Heap::new();
        let arr = new_array(&mut heap);
        set_element(&mut heap, arr, Value::number(2.0), Value::number(9.0));
        assert_eq!(get_property(&heap, arr, "length").as_number(), Some(3.0));
        assert!(get_element(&mut heap, arr, Value::number(0.0)).is_undefined());
        assert_eq!(get_element(&mut heap, arr, Value::number(2.0)).as_number(), Some(9.0));

        let obj = new_object(&mut heap);
        set_property(&mut heap, obj, "x", Value::number(1.0));
        set_element(&mut heap, obj, Value::number(3.0), Value::boolean(true));
        assert_eq!(get_property(&heap, obj, "x").as_number(), Some(1.0));
        assert_eq!(get_property(&heap, obj, "3").as_bool(), Some(true));
        assert_eq!(to_display(&heap, arr), ",,9");
    }
}
