//! Runtime stubs called from generated code

use cranelift_codegen::ir::{types, AbiParam, Signature};
use cranelift_codegen::isa::CallConv;
use cranelift_module::{FuncId as ClifFuncId, Linkage, Module};
use rustc_hash::FxHashMap;

use super::abi::WORD;
use super::CodegenError;
use crate::ir::{BinaryOp, UnaryOp};

/// A runtime entry point; every one is an import resolved against
/// `strata-runtime` (JIT symbols or the linked staticlib)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stub {
    AddAny,
    SubAny,
    MulAny,
    DivAny,
    ModAny,
    NegAny,
    NotAny,
    EqStrict,
    NeStrict,
    LtAny,
    LeAny,
    GtAny,
    GeAny,
    ToBoolean,
    AllocString,
    AllocObject,
    AllocArray,
    GetProp,
    SetProp,
    GetElem,
    SetElem,
    Clone,
    LoadGlobal,
    StoreGlobal,
    MakeClosure,
    Call,
    Print,
    Shutdown,
}

impl Stub {
    pub const ALL: [Stub; 28] = [
        Stub::AddAny,
        Stub::SubAny,
        Stub::MulAny,
        Stub::DivAny,
        Stub::ModAny,
        Stub::NegAny,
        Stub::NotAny,
        Stub::EqStrict,
        Stub::NeStrict,
        Stub::LtAny,
        Stub::LeAny,
        Stub::GtAny,
        Stub::GeAny,
        Stub::ToBoolean,
        Stub::AllocString,
        Stub::AllocObject,
        Stub::AllocArray,
        Stub::GetProp,
        Stub::SetProp,
        Stub::GetElem,
        Stub::SetElem,
        Stub::Clone,
        Stub::LoadGlobal,
        Stub::StoreGlobal,
        Stub::MakeClosure,
        Stub::Call,
        Stub::Print,
        Stub::Shutdown,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Stub::AddAny => "strata_add_any",
            Stub::SubAny => "strata_sub_any",
            Stub::MulAny => "strata_mul_any",
            Stub::DivAny => "strata_div_any",
            Stub::ModAny => "strata_mod_any",
            Stub::NegAny => "strata_neg_any",
            Stub::NotAny => "strata_not_any",
            Stub::EqStrict => "strata_eq_strict",
            Stub::NeStrict => "strata_ne_strict",
            Stub::LtAny => "strata_lt_any",
            Stub::LeAny => "strata_le_any",
            Stub::GtAny => "strata_gt_any",
            Stub::GeAny => "strata_ge_any",
            Stub::ToBoolean => "strata_to_boolean",
            Stub::AllocString => "strata_alloc_string",
            Stub::AllocObject => "strata_alloc_object",
            Stub::AllocArray => "strata_alloc_array",
            Stub::GetProp => "strata_get_prop",
            Stub::SetProp => "strata_set_prop",
            Stub::GetElem => "strata_get_elem",
            Stub::SetElem => "strata_set_elem",
            Stub::Clone => "strata_clone",
            Stub::LoadGlobal => "strata_load_global",
            Stub::StoreGlobal => "strata_store_global",
            Stub::MakeClosure => "strata_make_closure",
            Stub::Call => "strata_call",
            Stub::Print => "strata_print",
            Stub::Shutdown => "strata_rt_shutdown",
        }
    }

    /// Parameter count (all words or pointers) and whether a word comes back
    fn shape(self) -> (usize, Option<types::Type>) {
        match self {
            Stub::AddAny
            | Stub::SubAny
            | Stub::MulAny
            | Stub::DivAny
            | Stub::ModAny
            | Stub::EqStrict
            | Stub::NeStrict
            | Stub::LtAny
            | Stub::LeAny
            | Stub::GtAny
            | Stub::GeAny
            | Stub::AllocString
            | Stub::GetElem
            | Stub::MakeClosure => (2, Some(WORD)),
            Stub::NegAny | Stub::NotAny | Stub::Clone => (1, Some(WORD)),
            Stub::ToBoolean => (1, Some(types::I8)),
            Stub::AllocObject | Stub::AllocArray => (0, Some(WORD)),
            Stub::GetProp | Stub::Call => (3, Some(WORD)),
            Stub::SetProp => (4, None),
            Stub::SetElem => (3, None),
            Stub::LoadGlobal => (2, Some(WORD)),
            Stub::StoreGlobal => (3, None),
            Stub::Print => (1, None),
            Stub::Shutdown => (0, None),
        }
    }

    pub fn signature(self, call_conv: CallConv) -> Signature {
        let (params, ret) = self.shape();
        let mut sig = Signature::new(call_conv);
        sig.params.extend((0..params).map(|_| AbiParam::new(WORD)));
        sig.returns.extend(ret.map(AbiParam::new));
        sig
    }

    /// Dynamic fallback for a binary operation
    pub fn for_binary(op: BinaryOp) -> Stub {
        match op {
            BinaryOp::Add => Stub::AddAny,
            BinaryOp::Sub => Stub::SubAny,
            BinaryOp::Mul => Stub::MulAny,
            BinaryOp::Div => Stub::DivAny,
            BinaryOp::Mod => Stub::ModAny,
            BinaryOp::Eq => Stub::EqStrict,
            BinaryOp::Ne => Stub::NeStrict,
            BinaryOp::Lt => Stub::LtAny,
            BinaryOp::Le => Stub::LeAny,
            BinaryOp::Gt => Stub::GtAny,
            BinaryOp::Ge => Stub::GeAny,
        }
    }

    pub fn for_unary(op: UnaryOp) -> Stub {
        match op {
            UnaryOp::Neg => Stub::NegAny,
            UnaryOp::Not => Stub::NotAny,
        }
    }
}

/// Stub declarations within one Cranelift module
pub struct StubTable {
    ids: FxHashMap<Stub, ClifFuncId>,
}

impl StubTable {
    pub fn declare<M: Module>(module: &mut M) -> Result<Self, CodegenError> {
        let call_conv = module.isa().default_call_conv();
        let mut ids = FxHashMap::default();
        for stub in Stub::ALL {
            let id = module.declare_function(stub.symbol(), Linkage::Import, &stub.signature(call_conv))?;
            ids.insert(stub, id);
        }
        Ok(StubTable { ids })
    }

    pub fn id(&self, stub: Stub) -> ClifFuncId {
        self.ids[&stub]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_stub_exists_in_runtime() {
        let exported: Vec<&str> = strata_runtime::stub_symbols().into_iter().map(|(name, _)| name).collect();
        for stub in Stub::ALL {
            assert!(exported.contains(&stub.symbol()), "{} missing from runtime", stub.symbol());
        }
    }

    #[test]
    fn test_to_boolean_returns_byte() {
        let sig = Stub::ToBoolean.signature(CallConv::SystemV);
        assert_eq!(sig.returns, vec![AbiParam::new(types::I8)]);
        assert!(Stub::Print.signature(CallConv::SystemV).returns.is_empty());
    }
}
