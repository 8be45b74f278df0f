//! Bytecode to IR lowering
//!
//! Splits the instruction stream into functions (`functions`), then lifts
//! each one from stack form into SSA (`lifter`).

mod functions;
mod lifter;

pub use functions::{FunctionLayout, ProgramLayout};

use crate::bytecode::Program;
use crate::ir::IrModule;

/// Malformed bytecode
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoweringError {
    #[error("function at {addr} is not preceded by a guard jump over its body")]
    MissingGuard { addr: usize },
    #[error("function body at {addr} overlaps the body at {other}")]
    OverlappingFunction { addr: usize, other: usize },
    #[error("jump at {addr} targets {target}, outside the enclosing function")]
    JumpOutOfFunction { addr: usize, target: usize },
    #[error("jump at {addr} targets {target}, inside a nested function body")]
    JumpIntoNestedFunction { addr: usize, target: usize },
    #[error("stack depth mismatch entering {addr}: {expected} vs {found}")]
    StackDepthMismatch { addr: usize, expected: i64, found: i64 },
    #[error("stack underflow at {addr}")]
    StackUnderflow { addr: usize },
}

/// Lower a whole program; `main` becomes function 0
pub fn lower_program(program: &Program) -> Result<IrModule, LoweringError> {
    let layout = ProgramLayout::discover(&program.code)?;
    let mut module = IrModule::new(program.name.clone());
    for function in &layout.functions {
        let lifted = lifter::lift_function(&program.code, function, &layout, &mut module)?;
        tracing::debug!(
            function = %lifted.name,
            blocks = lifted.blocks.len(),
            params = lifted.params.len(),
            "lifted function"
        );
        module.add_function(lifted);
    }
    Ok(module)
}
