//! Shared Cranelift lowering for the JIT and AOT backends
//!
//! Both backends drive the same [`define_module`] over a
//! `cranelift_module::Module` implementation: `JITModule` for in-process
//! code, `ObjectModule` for relocatable objects.

pub mod abi;
pub mod isa;
pub mod lower;
pub mod stubs;

pub use isa::{host_triple, isa_for, OptLevel};
pub use lower::{define_module, define_module_with, symbol_name, CallLinkage, DefinedModule, ENTER_HOOK_SYMBOL};
pub use stubs::{Stub, StubTable};

use cranelift_module::ModuleError;

use crate::ir::FuncId;

/// Code generation failures
#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("cranelift module error: {0}")]
    Module(#[from] ModuleError),

    #[error("invalid ISA configuration: {0}")]
    Isa(String),

    #[error("unsupported target triple {0}")]
    UnsupportedTarget(String),

    #[error("cannot lower `{op}` in {function}")]
    Unsupported { function: String, op: String },

    #[error("{function} references unresolved function {callee}")]
    UnresolvedFunction { function: String, callee: FuncId },

    #[error("no function named {0} in the compiled module")]
    MissingFunction(String),

    #[error("object emission failed: {0}")]
    Emit(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
