//! Heap arena
//!
//! Heap values are slots in a per-thread arena addressed by index. Objects may
//! reference each other freely (cycles included); nothing is reclaimed until
//! the whole arena is reset.

use std::cell::RefCell;

use rustc_hash::FxHashMap;

use crate::value::Value;

/// Index of a heap slot, stored in the payload of a heap-tagged value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapRef(pub u32);

/// Property map that remembers insertion order
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    keys: Vec<String>,
    values: Vec<Value>,
    index: FxHashMap<String, usize>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.index.get(key).map(|&i| self.values[i])
    }

    pub fn set(&mut self, key: &str, value: Value) {
        match self.index.get(key) {
            Some(&i) => self.values[i] = value,
            None => {
                self.index.insert(key.to_string(), self.keys.len());
                self.keys.push(key.to_string());
                self.values.push(value);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.keys.iter().map(String::as_str).zip(self.values.iter().copied())
    }
}

/// Contents of a heap slot
#[derive(Debug, Clone)]
pub enum HeapObject {
    String(String),
    Object(PropertyMap),
    Array(Vec<Value>),
    /// Native code address plus the captured environment value
    Closure { code: u64, env: Value },
}

/// Bump-allocated slot arena
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<HeapObject>,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, object: HeapObject) -> Value {
        let slot = HeapRef(self.slots.len() as u32);
        self.slots.push(object);
        Value::heap(slot)
    }

    pub fn get(&self, slot: HeapRef) -> Option<&HeapObject> {
        self.slots.get(slot.0 as usize)
    }

    pub fn get_mut(&mut self, slot: HeapRef) -> Option<&mut HeapObject> {
        self.slots.get_mut(slot.0 as usize)
    }

    /// Resolve a value to its heap object, if it is a live heap pointer
    pub fn resolve(&self, value: Value) -> Option<&HeapObject> {
        value.as_heap().and_then(|slot| self.get(slot))
    }

    pub fn resolve_mut(&mut self, value: Value) -> Option<&mut HeapObject> {
        value.as_heap().and_then(move |slot| self.get_mut(slot))
    }

    pub fn string(&self, value: Value) -> Option<&str> {
        match self.resolve(value)? {
            HeapObject::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn alloc_string(&mut self, s: impl Into<String>) -> Value {
        self.alloc(HeapObject::String(s.into()))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every slot. Values pointing into the arena become dangling.
    pub fn reset(&mut self) {
        self.slots.clear();
    }
}

thread_local! {
    static HEAP: RefCell<Heap> = RefCell::new(Heap::new());
}

/// Run `f` with the current thread's heap
///
/// Calls must not nest; stubs take the heap for the duration of one
/// operation only.
pub fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
    HEAP.with(|heap| f(&mut heap.borrow_mut()))
}

/// Reset the current thread's heap
pub fn reset_heap() {
    with_heap(Heap::reset);
}
