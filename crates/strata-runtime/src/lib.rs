//! Strata tagged-value runtime
//!
//! The contract shared by both code generators: the NaN-boxed [`Value`]
//! encoding, the heap arena, and the `extern "C"` stubs that generated code
//! calls for every operation it does not inline. The crate also builds as a
//! static library that AOT executables link against.

#![warn(rust_2018_idioms)]

pub mod heap;
pub mod ops;
pub mod output;
pub mod stubs;
pub mod value;

pub use heap::{with_heap, Heap, HeapObject, HeapRef, PropertyMap};
pub use stubs::{reset, NativeFn};
pub use value::{Value, ValueKind};

/// Version of the value layout and stub signatures
pub const ABI_VERSION: u32 = 1;

/// Every stub with its address, for registering with an in-process linker
pub fn stub_symbols() -> Vec<(&'static str, *const u8)> {
    use stubs::*;
    vec![
        ("strata_add_any", strata_add_any as *const u8),
        ("strata_sub_any", strata_sub_any as *const u8),
        ("strata_mul_any", strata_mul_any as *const u8),
        ("strata_div_any", strata_div_any as *const u8),
        ("strata_mod_any", strata_mod_any as *const u8),
        ("strata_neg_any", strata_neg_any as *const u8),
        ("strata_not_any", strata_not_any as *const u8),
        ("strata_eq_strict", strata_eq_strict as *const u8),
        ("strata_ne_strict", strata_ne_strict as *const u8),
        ("strata_lt_any", strata_lt_any as *const u8),
        ("strata_le_any", strata_le_any as *const u8),
        ("strata_gt_any", strata_gt_any as *const u8),
        ("strata_ge_any", strata_ge_any as *const u8),
        ("strata_to_boolean", strata_to_boolean as *const u8),
        ("strata_alloc_string", strata_alloc_string as *const u8),
        ("strata_alloc_object", strata_alloc_object as *const u8),
        ("strata_alloc_array", strata_alloc_array as *const u8),
        ("strata_get_prop", strata_get_prop as *const u8),
        ("strata_set_prop", strata_set_prop as *const u8),
        ("strata_get_elem", strata_get_elem as *const u8),
        ("strata_set_elem", strata_set_elem as *const u8),
        ("strata_clone", strata_clone as *const u8),
        ("strata_load_global", strata_load_global as *const u8),
        ("strata_store_global", strata_store_global as *const u8),
        ("strata_make_closure", strata_make_closure as *const u8),
        ("strata_call", strata_call as *const u8),
        ("strata_print", strata_print as *const u8),
        ("strata_rt_shutdown", strata_rt_shutdown as *const u8),
        ("strata_abi_version", strata_abi_version as *const u8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_symbols_are_unique_and_non_null() {
        let symbols = stub_symbols();
        let mut names: Vec<_> = symbols.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), symbols.len());
        assert!(symbols.iter().all(|(_, addr)| !addr.is_null()));
    }
}
