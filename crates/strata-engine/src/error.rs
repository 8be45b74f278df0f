//! Umbrella error for the pipeline and its embedders

use crate::aot::AotError;
use crate::codegen::CodegenError;
use crate::config::ConfigError;
use crate::jit::JitError;
use crate::lower::LoweringError;
use crate::verify::VerificationError;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("lowering failed: {0}")]
    Lowering(#[from] LoweringError),

    #[error("verification failed: {0}")]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Jit(#[from] JitError),

    #[error(transparent)]
    Aot(#[from] AotError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CompileResult<T> = Result<T, CompileError>;
