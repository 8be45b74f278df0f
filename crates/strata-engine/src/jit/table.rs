//! Function address table
//!
//! Maps function names to entry points. Each entry is one atomic word that
//! compiled code loads before every call into its module, so a swap during
//! recompilation never blocks calls to other functions, and a caller sees
//! either the old or the new address. Slot order is the order of the IR
//! module's functions.
//!
//! Compiled function prologues report to [`strata_jit_enter`], which forwards
//! the call to the table's [`CallObserver`] when one is attached.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use strata_runtime::NativeFn;

use crate::codegen::CallLinkage;

/// A finalized entry point with the uniform native signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryPoint(usize);

impl EntryPoint {
    /// # Safety
    /// `ptr` must be finalized code with the [`NativeFn`] signature that
    /// stays mapped for as long as the entry can be read.
    pub unsafe fn from_raw(ptr: *const u8) -> Self {
        EntryPoint(ptr as usize)
    }

    pub fn address(self) -> usize {
        self.0
    }

    pub fn as_native(self) -> NativeFn {
        // SAFETY: only constructed from finalized code with this signature.
        unsafe { std::mem::transmute::<usize, NativeFn>(self.0) }
    }
}

/// Told about every call that enters compiled code
pub trait CallObserver: Send + Sync {
    fn on_call(&self, name: &str);
}

pub struct AddressTable {
    index: FxHashMap<String, usize>,
    names: Box<[String]>,
    /// Entry addresses; 0 until published
    slots: Box<[AtomicUsize]>,
    observer: RwLock<Option<Arc<dyn CallObserver>>>,
}

impl std::fmt::Debug for AddressTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressTable")
            .field("names", &self.names)
            .field("observed", &self.observer.read().is_some())
            .finish()
    }
}

impl AddressTable {
    /// A table with one empty slot per name
    pub fn reserve(names: impl IntoIterator<Item = String>) -> Self {
        let names: Box<[String]> = names.into_iter().collect();
        let index = names.iter().enumerate().map(|(i, name)| (name.clone(), i)).collect();
        let slots = names.iter().map(|_| AtomicUsize::new(0)).collect();
        AddressTable { index, names, slots, observer: RwLock::new(None) }
    }

    pub fn new(entries: impl IntoIterator<Item = (String, EntryPoint)>) -> Self {
        let (names, entries): (Vec<String>, Vec<EntryPoint>) = entries.into_iter().unzip();
        let table = AddressTable::reserve(names);
        for (slot, entry) in table.slots.iter().zip(entries) {
            slot.store(entry.0, Ordering::Release);
        }
        table
    }

    pub fn get(&self, name: &str) -> Option<EntryPoint> {
        let slot = &self.slots[*self.index.get(name)?];
        match slot.load(Ordering::Acquire) {
            0 => None,
            addr => Some(EntryPoint(addr)),
        }
    }

    /// Replace an entry point, returning the previous one
    pub fn swap(&self, name: &str, entry: EntryPoint) -> Option<EntryPoint> {
        let slot = &self.slots[*self.index.get(name)?];
        match slot.swap(entry.0, Ordering::AcqRel) {
            0 => None,
            addr => Some(EntryPoint(addr)),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Function names in sorted order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.names.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Addresses embedded into generated code. The table must outlive every
    /// call into that code, which holds while it sits in an `Arc` owned by
    /// the `JitModule` and every pending compile request.
    pub fn linkage(self: &Arc<Self>) -> CallLinkage {
        CallLinkage::Dispatch { context: Arc::as_ptr(self) as u64, slots: self.slots.as_ptr() as u64 }
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn CallObserver>>) {
        *self.observer.write() = observer;
    }

    fn enter(&self, index: usize) {
        let observer = self.observer.read().clone();
        if let (Some(observer), Some(name)) = (observer, self.names.get(index)) {
            observer.on_call(name);
        }
    }
}

/// Prologue hook of JIT-compiled functions
///
/// # Safety
/// `table` must point to a live [`AddressTable`], as embedded by codegen from
/// [`AddressTable::linkage`].
pub unsafe extern "C" fn strata_jit_enter(table: *const AddressTable, index: u64) {
    // SAFETY: guaranteed by the caller.
    if let Some(table) = unsafe { table.as_ref() } {
        table.enter(index as usize);
    }
}
