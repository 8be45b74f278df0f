//! Strata compiler core
//!
//! Turns stack bytecode into native code:
//! - **Lowering**: bytecode to SSA IR (`lower`, `ir`)
//! - **Specialization**: type inference and constant propagation (`specialize`)
//! - **Optimizer**: fixed-point pass pipeline (`opt`)
//! - **Verifier**: SSA and ownership checks producing [`VerifiedModule`] (`verify`)
//! - **Backends**: Cranelift JIT and AOT sharing one lowering (`codegen`, `jit`, `aot`)
//! - **Tiering**: call counting and recompilation requests (`tier`)
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_engine::bytecode::{Constant, Op, Program};
//! use strata_engine::Pipeline;
//!
//! let program = Program::new("demo", vec![
//!     Op::Push(Constant::Number(3.0)),
//!     Op::Push(Constant::Number(4.0)),
//!     Op::Add,
//!     Op::Print,
//! ]);
//! let pipeline = Pipeline::default();
//! let jit = pipeline.jit(&program)?;
//! jit.run_main()?;
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::new_without_default)]

pub mod analysis;
pub mod aot;
pub mod bytecode;
pub mod codegen;
pub mod config;
pub mod error;
pub mod ir;
pub mod jit;
pub mod logging;
pub mod lower;
pub mod opt;
pub mod pipeline;
pub mod specialize;
pub mod tier;
pub mod verify;

pub use aot::{AotArtifact, AotCompiler, AotError, AotOptions, LinkError, LtoMode, OutputKind};
pub use codegen::{CodegenError, OptLevel};
pub use config::{ConfigError, EngineConfig};
pub use error::{CompileError, CompileResult};
pub use jit::{BackgroundCompiler, JitCompiler, JitError, JitModule};
pub use lower::{lower_program, LoweringError};
pub use pipeline::{IrDumps, Pipeline};
pub use tier::{Tier, TierManager, TierRequest, TierThresholds};
pub use verify::{verify_module, VerificationError, VerifiedModule};
