//! Out-of-line runtime entry points called from generated code
//!
//! Every stub takes and returns raw `u64` value bits. Names are stable: the
//! JIT registers them as symbols and AOT objects import them, so renaming one
//! is an ABI break.

use std::cell::RefCell;

use rustc_hash::FxHashMap;

use crate::heap::{with_heap, HeapObject};
use crate::ops::{self, ArithOp, CompareOp};
use crate::output;
use crate::value::Value;

/// Uniform native signature shared by every compiled function
pub type NativeFn = unsafe extern "C" fn(env: u64, args: *const u64, argc: u64) -> u64;

thread_local! {
    static GLOBALS: RefCell<FxHashMap<String, Value>> = RefCell::new(FxHashMap::default());
}

/// Clear the heap and the global table of the current thread
pub fn reset() {
    crate::heap::reset_heap();
    GLOBALS.with(|globals| globals.borrow_mut().clear());
}

/// # Safety
/// `ptr` must point at `len` readable bytes.
unsafe fn name_from_raw<'a>(ptr: *const u8, len: u64) -> std::borrow::Cow<'a, str> {
    if ptr.is_null() || len == 0 {
        return std::borrow::Cow::Borrowed("");
    }
    let bytes = std::slice::from_raw_parts(ptr, len as usize);
    String::from_utf8_lossy(bytes)
}

#[inline]
fn v(bits: u64) -> Value {
    Value::from_bits(bits)
}

// ============================================================================
// Dynamic arithmetic and comparison
// ============================================================================

#[no_mangle]
pub extern "C" fn strata_add_any(a: u64, b: u64) -> u64 {
    with_heap(|heap| ops::add(heap, v(a), v(b))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_sub_any(a: u64, b: u64) -> u64 {
    with_heap(|heap| ops::arith(heap, ArithOp::Sub, v(a), v(b))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_mul_any(a: u64, b: u64) -> u64 {
    with_heap(|heap| ops::arith(heap, ArithOp::Mul, v(a), v(b))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_div_any(a: u64, b: u64) -> u64 {
    with_heap(|heap| ops::arith(heap, ArithOp::Div, v(a), v(b))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_mod_any(a: u64, b: u64) -> u64 {
    with_heap(|heap| ops::arith(heap, ArithOp::Mod, v(a), v(b))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_neg_any(a: u64) -> u64 {
    with_heap(|heap| ops::negate(heap, v(a))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_not_any(a: u64) -> u64 {
    Value::boolean(!with_heap(|heap| ops::to_boolean(heap, v(a)))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_eq_strict(a: u64, b: u64) -> u64 {
    Value::boolean(with_heap(|heap| ops::strict_equals(heap, v(a), v(b)))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_ne_strict(a: u64, b: u64) -> u64 {
    Value::boolean(!with_heap(|heap| ops::strict_equals(heap, v(a), v(b)))).to_bits()
}

fn compare_bits(op: CompareOp, a: u64, b: u64) -> u64 {
    Value::boolean(with_heap(|heap| ops::compare(heap, op, v(a), v(b)))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_lt_any(a: u64, b: u64) -> u64 {
    compare_bits(CompareOp::Lt, a, b)
}

#[no_mangle]
pub extern "C" fn strata_le_any(a: u64, b: u64) -> u64 {
    compare_bits(CompareOp::Le, a, b)
}

#[no_mangle]
pub extern "C" fn strata_gt_any(a: u64, b: u64) -> u64 {
    compare_bits(CompareOp::Gt, a, b)
}

#[no_mangle]
pub extern "C" fn strata_ge_any(a: u64, b: u64) -> u64 {
    compare_bits(CompareOp::Ge, a, b)
}

#[no_mangle]
pub extern "C" fn strata_to_boolean(a: u64) -> u8 {
    with_heap(|heap| ops::to_boolean(heap, v(a))) as u8
}

// ============================================================================
// Allocation and property access
// ============================================================================

/// # Safety
/// `ptr` must point at `len` bytes of UTF-8.
#[no_mangle]
pub unsafe extern "C" fn strata_alloc_string(ptr: *const u8, len: u64) -> u64 {
    let text = name_from_raw(ptr, len).into_owned();
    with_heap(|heap| heap.alloc_string(text)).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_alloc_object() -> u64 {
    with_heap(ops::new_object).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_alloc_array() -> u64 {
    with_heap(ops::new_array).to_bits()
}

/// # Safety
/// `name` must point at `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn strata_get_prop(object: u64, name: *const u8, len: u64) -> u64 {
    let name = name_from_raw(name, len);
    with_heap(|heap| ops::get_property(heap, v(object), &name)).to_bits()
}

/// # Safety
/// `name` must point at `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn strata_set_prop(object: u64, name: *const u8, len: u64, value: u64) {
    let name = name_from_raw(name, len);
    with_heap(|heap| ops::set_property(heap, v(object), &name, v(value)));
}

#[no_mangle]
pub extern "C" fn strata_get_elem(object: u64, key: u64) -> u64 {
    with_heap(|heap| ops::get_element(heap, v(object), v(key))).to_bits()
}

#[no_mangle]
pub extern "C" fn strata_set_elem(object: u64, key: u64, value: u64) {
    with_heap(|heap| ops::set_element(heap, v(object), v(key), v(value)));
}

#[no_mangle]
pub extern "C" fn strata_clone(value: u64) -> u64 {
    with_heap(|heap| ops::clone_value(heap, v(value))).to_bits()
}

// ============================================================================
// Globals
// ============================================================================

/// # Safety
/// `name` must point at `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn strata_load_global(name: *const u8, len: u64) -> u64 {
    let name = name_from_raw(name, len);
    GLOBALS
        .with(|globals| globals.borrow().get(name.as_ref()).copied())
        .unwrap_or_default()
        .to_bits()
}

/// # Safety
/// `name` must point at `len` bytes.
#[no_mangle]
pub unsafe extern "C" fn strata_store_global(name: *const u8, len: u64, value: u64) {
    let name = name_from_raw(name, len).into_owned();
    GLOBALS.with(|globals| {
        globals.borrow_mut().insert(name, v(value));
    });
}

// ============================================================================
// Calls and closures
// ============================================================================

#[no_mangle]
pub extern "C" fn strata_make_closure(code: u64, env: u64) -> u64 {
    let code = Value::from_bits(code).as_function().unwrap_or(0);
    with_heap(|heap| heap.alloc(HeapObject::Closure { code, env: v(env) })).to_bits()
}

/// Call a function or closure value. Calling anything else yields undefined.
///
/// # Safety
/// `args` must point at `argc` values, and function values must carry
/// addresses of code compiled with the uniform native signature.
#[no_mangle]
pub unsafe extern "C" fn strata_call(callee: u64, args: *const u64, argc: u64) -> u64 {
    let callee = v(callee);
    let target = match callee.as_function() {
        Some(code) => Some((code, Value::undefined())),
        None => with_heap(|heap| match heap.resolve(callee) {
            Some(HeapObject::Closure { code, env }) => Some((*code, *env)),
            _ => None,
        }),
    };
    match target {
        Some((code, env)) if code != 0 => {
            let entry: NativeFn = std::mem::transmute(code as usize);
            entry(env.to_bits(), args, argc)
        }
        _ => Value::undefined().to_bits(),
    }
}

// ============================================================================
// Output and lifecycle
// ============================================================================

#[no_mangle]
pub extern "C" fn strata_print(value: u64) {
    let line = with_heap(|heap| ops::to_display(heap, v(value)));
    output::print_line(&line);
}

#[no_mangle]
pub extern "C" fn strata_rt_shutdown() {
    output::flush();
}

#[no_mangle]
pub extern "C" fn strata_abi_version() -> u32 {
    crate::ABI_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_stub_roundtrip() {
        reset();
        let text = "hello";
        let s = unsafe { strata_alloc_string(text.as_ptr(), text.len() as u64) };
        let joined = strata_add_any(s, Value::number(1.0).to_bits());
        let shown = with_heap(|heap| heap.string(v(joined)).map(str::to_string));
        assert_eq!(shown.as_deref(), Some("hello1"));
    }

    #[test]
    fn test_globals_default_to_undefined() {
        reset();
        let name = "counter";
        let loaded = unsafe { strata_load_global(name.as_ptr(), name.len() as u64) };
        assert!(v(loaded).is_undefined());
        unsafe { strata_store_global(name.as_ptr(), name.len() as u64, Value::number(3.0).to_bits()) };
        let loaded = unsafe { strata_load_global(name.as_ptr(), name.len() as u64) };
        assert_eq!(v(loaded).as_number(), Some(3.0));
    }

    unsafe extern "C" fn add_first_two(env: u64, args: *const u64, argc: u64) -> u64 {
        let args = std::slice::from_raw_parts(args, argc as usize);
        let base = Value::from_bits(env).as_number().unwrap_or(0.0);
        let sum: f64 = args.iter().filter_map(|&a| Value::from_bits(a).as_number()).sum();
        Value::number(base + sum).to_bits()
    }

    #[test]
    fn test_call_dispatches_functions_and_closures() {
        reset();
        let code = add_first_two as usize as u64;
        let args = [Value::number(1.0).to_bits(), Value::number(2.0).to_bits()];
        let plain = Value::function(code).to_bits();
        let r = unsafe { strata_call(plain, args.as_ptr(), 2) };
        assert_eq!(v(r).as_number(), Some(3.0));

        let closure = strata_make_closure(plain, Value::number(10.0).to_bits());
        let r = unsafe { strata_call(closure, args.as_ptr(), 2) };
        assert_eq!(v(r).as_number(), Some(13.0));

        let r = unsafe { strata_call(Value::null().to_bits(), args.as_ptr(), 2) };
        assert!(v(r).is_undefined());
    }

    #[test]
    fn test_print_is_capturable() {
        reset();
        let ((), out) = output::capture(|| {
            strata_print(Value::number(7.0).to_bits());
            strata_print(Value::boolean(false).to_bits());
        });
        assert_eq!(out, "7\nfalse\n");
    }
}
