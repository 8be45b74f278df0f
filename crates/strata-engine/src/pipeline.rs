//! Compilation pipeline: bytecode to verified IR
//!
//! lower → specialize → (optimize ⇄ re-specialize until stable) → verify.
//! Optimization can expose new facts (a folded branch removes a phi input,
//! so a value's type narrows), hence the bounded alternation.

use std::io;
use std::path::Path;

use crate::aot::AotCompiler;
use crate::bytecode::Program;
use crate::config::EngineConfig;
use crate::error::CompileResult;
use crate::ir::{serialize_module, IrModule};
use crate::jit::{JitCompiler, JitModule};
use crate::lower::lower_program;
use crate::opt::Optimizer;
use crate::specialize::specialize_module;
use crate::verify::{verify_module, VerifiedModule};

/// Canonical IR text after each stage
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IrDumps {
    pub lowered: String,
    pub specialized: String,
    pub optimized: String,
}

impl IrDumps {
    pub fn stages(&self) -> [(&'static str, &str); 3] {
        [("lowered", &self.lowered), ("specialized", &self.specialized), ("optimized", &self.optimized)]
    }

    /// Write `<module>.<stage>.ir` files into `dir`
    pub fn write_to(&self, dir: &Path, module: &str) -> io::Result<()> {
        std::fs::create_dir_all(dir)?;
        for (stage, text) in self.stages() {
            std::fs::write(dir.join(format!("{module}.{stage}.ir")), text)?;
        }
        Ok(())
    }
}

pub struct Pipeline {
    config: EngineConfig,
    optimizer: Optimizer,
}

impl Pipeline {
    pub fn new(config: EngineConfig) -> Self {
        let optimizer = Optimizer::new(config.opt_iterations);
        Pipeline { config, optimizer }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn compile(&self, program: &Program) -> CompileResult<VerifiedModule> {
        self.compile_with_dumps(program).map(|(module, _)| module)
    }

    pub fn compile_with_dumps(&self, program: &Program) -> CompileResult<(VerifiedModule, IrDumps)> {
        let module = lower_program(program)?;
        self.process(module)
    }

    /// Run every stage after lowering on an existing module
    pub fn process(&self, mut module: IrModule) -> CompileResult<(VerifiedModule, IrDumps)> {
        let mut dumps = IrDumps { lowered: serialize_module(&module), ..IrDumps::default() };

        if self.config.specialize {
            let stats = specialize_module(&mut module);
            tracing::debug!(module = %module.name, narrowed = stats.narrowed, direct_calls = stats.direct_calls, "specialized");
        }
        dumps.specialized = serialize_module(&module);

        if self.config.optimize {
            let mut rounds = 0;
            while rounds < self.config.pipeline_rounds {
                rounds += 1;
                let mut changed = self.optimizer.optimize_module(&mut module);
                if self.config.specialize {
                    changed |= specialize_module(&mut module).changed;
                }
                if !changed {
                    break;
                }
            }
            tracing::debug!(module = %module.name, rounds, "optimized");
        }
        dumps.optimized = serialize_module(&module);

        if let Some(dir) = &self.config.dump_dir {
            if let Err(e) = dumps.write_to(dir, &module.name) {
                tracing::warn!(dir = %dir.display(), error = %e, "failed to write IR dumps");
            }
        }

        let verified = verify_module(module)?;
        tracing::info!(module = verified.name(), functions = verified.module().functions.len(), "module verified");
        Ok((verified, dumps))
    }

    pub fn jit_compiler(&self) -> JitCompiler {
        JitCompiler::new(self.config.jit_opt_level)
    }

    pub fn aot_compiler(&self) -> AotCompiler {
        AotCompiler::new(self.config.aot.clone())
    }

    /// Compile `program` and load it into the JIT
    pub fn jit(&self, program: &Program) -> CompileResult<JitModule> {
        let module = self.compile(program)?;
        Ok(self.jit_compiler().compile(&module)?)
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::{Constant, Op};
    use crate::error::CompileError;

    fn add_program() -> Program {
        Program::new(
            "sum",
            vec![Op::Push(Constant::Number(3.0)), Op::Push(Constant::Number(4.0)), Op::Add, Op::Print, Op::Halt],
        )
    }

    #[test]
    fn test_dumps_track_each_stage() {
        let (_, dumps) = Pipeline::default().compile_with_dumps(&add_program()).unwrap();
        assert!(dumps.lowered.contains("add.any"), "{}", dumps.lowered);
        assert!(dumps.specialized.contains("add.num"), "{}", dumps.specialized);
        assert!(dumps.optimized.contains("const 7"), "{}", dumps.optimized);
    }

    #[test]
    fn test_disabled_stages_leave_ir_alone() {
        let config = EngineConfig { specialize: false, optimize: false, ..EngineConfig::default() };
        let (_, dumps) = Pipeline::new(config).compile_with_dumps(&add_program()).unwrap();
        assert_eq!(dumps.lowered, dumps.specialized);
        assert_eq!(dumps.lowered, dumps.optimized);
    }

    #[test]
    fn test_dump_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig { dump_dir: Some(dir.path().to_path_buf()), ..EngineConfig::default() };
        Pipeline::new(config).compile(&add_program()).unwrap();
        for stage in ["lowered", "specialized", "optimized"] {
            assert!(dir.path().join(format!("sum.{stage}.ir")).is_file());
        }
    }

    #[test]
    fn test_lowering_error_surfaces() {
        let program = Program::new("bad", vec![Op::Pop]);
        assert!(matches!(Pipeline::default().compile(&program), Err(CompileError::Lowering(_))));
    }
}
