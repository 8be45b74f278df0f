//! Ahead-of-time compilation to native objects, libraries and executables
//!
//! `AotCompiler::build` runs link-time optimization on the verified IR,
//! emits one object per resulting module in parallel (consulting the
//! object cache first), adds an entry object when the output is an
//! executable, and hands everything to the system linker.

pub mod cache;
pub mod linker;
pub mod lto;
pub mod object;

pub use cache::{CacheKey, ObjectCache};
pub use linker::{locate_runtime_lib, tool_available, LinkError, OutputKind, RUNTIME_LIB_NAME};
pub use lto::LtoMode;

use std::path::{Path, PathBuf};

use cranelift_codegen::isa::OwnedTargetIsa;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::codegen::{host_triple, isa_for, symbol_name, CodegenError, OptLevel};
use crate::opt::{Optimizer, DEFAULT_MAX_ITERATIONS};
use crate::verify::{verify_module, VerificationError, VerifiedModule};

/// Name of the merged module under full LTO
pub const PROGRAM_MODULE: &str = "program";

#[derive(Debug, thiserror::Error)]
pub enum AotError {
    #[error("no modules to compile")]
    NoModules,

    #[error(transparent)]
    Codegen(#[from] CodegenError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error("IR failed verification after link-time optimization: {0}")]
    Verification(#[from] VerificationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AotOptions {
    pub opt_level: OptLevel,
    pub lto: LtoMode,
    /// Target triple; the host when unset
    pub target: Option<String>,
    pub output: OutputKind,
    pub cache_dir: Option<PathBuf>,
    pub runtime_lib: Option<PathBuf>,
    /// C compiler driver used as the linker
    pub cc: String,
    /// Optimizer round bound when LTO re-optimizes
    pub opt_iterations: usize,
}

impl Default for AotOptions {
    fn default() -> Self {
        AotOptions {
            opt_level: OptLevel::Speed,
            lto: LtoMode::None,
            target: None,
            output: OutputKind::Executable,
            cache_dir: None,
            runtime_lib: None,
            cc: "cc".to_string(),
            opt_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// One object image ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedObject {
    pub module: String,
    pub bytes: Vec<u8>,
    /// Symbols the entry object calls, in order
    pub entries: Vec<String>,
    pub cached: bool,
}

/// Result of a full build
#[derive(Debug, Clone)]
pub struct AotArtifact {
    pub path: PathBuf,
    pub kind: OutputKind,
    /// Intermediate object files passed to the linker
    pub objects: Vec<PathBuf>,
    pub cache_hits: usize,
}

struct LinkUnit {
    module: VerifiedModule,
    entries: Vec<String>,
}

pub struct AotCompiler {
    options: AotOptions,
    cache: Option<ObjectCache>,
}

impl AotCompiler {
    pub fn new(options: AotOptions) -> Self {
        let cache = options.cache_dir.as_ref().and_then(|dir| match ObjectCache::open(dir) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "object cache disabled");
                None
            }
        });
        AotCompiler { options, cache }
    }

    pub fn options(&self) -> &AotOptions {
        &self.options
    }

    pub fn triple(&self) -> String {
        self.options.target.clone().unwrap_or_else(|| host_triple().to_string())
    }

    fn isa(&self) -> Result<OwnedTargetIsa, CodegenError> {
        isa_for(self.options.target.as_deref(), self.options.opt_level, true)
    }

    fn check_symbols(modules: &[VerifiedModule]) -> Result<(), LinkError> {
        let mut seen = FxHashSet::default();
        for module in modules {
            for func in &module.module().functions {
                let symbol = symbol_name(module.name(), &func.name);
                if !seen.insert(symbol.clone()) {
                    return Err(LinkError::DuplicateSymbol(symbol));
                }
            }
        }
        Ok(())
    }

    fn link_time_optimize(&self, modules: &[VerifiedModule]) -> Result<Vec<LinkUnit>, AotError> {
        let optimizer = Optimizer::new(self.options.opt_iterations);
        let lowered: Vec<lto::LtoModule> = match self.options.lto {
            LtoMode::None => modules
                .iter()
                .map(|m| lto::LtoModule { module: m.module().clone(), entries: vec![crate::ir::FuncId(0)] })
                .collect(),
            LtoMode::Thin => lto::run_thin(modules.iter().map(|m| m.module().clone()).collect(), &optimizer),
            LtoMode::Full => {
                let irs: Vec<_> = modules.iter().map(|m| m.module().clone()).collect();
                vec![lto::run_full(PROGRAM_MODULE, &irs, &optimizer)]
            }
        };
        lowered
            .into_iter()
            .map(|unit| {
                let entries = unit
                    .entries
                    .iter()
                    .filter_map(|id| unit.module.function(*id))
                    .map(|f| symbol_name(&unit.module.name, &f.name))
                    .collect();
                let module = verify_module(unit.module).map_err(|e| {
                    tracing::error!(error = %e, "link-time optimization produced invalid IR");
                    e
                })?;
                Ok(LinkUnit { module, entries })
            })
            .collect()
    }

    fn emit_unit(&self, unit: &LinkUnit) -> Result<EmittedObject, AotError> {
        let ir = unit.module.module();
        let key = self
            .cache
            .as_ref()
            .map(|_| CacheKey::compute(ir, self.options.opt_level, self.options.lto, &self.triple()));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            match cache.get(key) {
                Ok(Some(bytes)) => {
                    tracing::debug!(module = %ir.name, key = key.as_str(), "object cache hit");
                    return Ok(EmittedObject {
                        module: ir.name.clone(),
                        bytes,
                        entries: unit.entries.clone(),
                        cached: true,
                    });
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(module = %ir.name, error = %e, "object cache read failed"),
            }
        }

        let function_sections = self.options.lto == LtoMode::Full;
        let bytes = object::emit_module(ir, self.isa()?, function_sections)?;
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Err(e) = cache.put(key, &bytes) {
                tracing::warn!(module = %ir.name, error = %e, "object cache write failed");
            }
        }
        Ok(EmittedObject { module: ir.name.clone(), bytes, entries: unit.entries.clone(), cached: false })
    }

    /// Run LTO and emit one object per resulting module, in parallel
    pub fn emit_objects(&self, modules: &[VerifiedModule]) -> Result<Vec<EmittedObject>, AotError> {
        if modules.is_empty() {
            return Err(AotError::NoModules);
        }
        Self::check_symbols(modules)?;
        let units = self.link_time_optimize(modules)?;
        std::thread::scope(|scope| {
            let handles: Vec<_> = units.iter().map(|unit| scope.spawn(move || self.emit_unit(unit))).collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        })
    }

    /// Entry object calling `entries` in order
    pub fn emit_entry(&self, entries: &[String]) -> Result<Vec<u8>, AotError> {
        Ok(object::emit_entry(entries, self.isa()?)?)
    }

    /// Compile `modules` and link them into `output`
    pub fn build(&self, modules: &[VerifiedModule], output: &Path) -> Result<AotArtifact, AotError> {
        let kind = self.options.output;
        let objects = self.emit_objects(modules)?;
        let work_dir = PathBuf::from(format!("{}.objs", output.display()));
        std::fs::create_dir_all(&work_dir)?;

        let mut paths = Vec::with_capacity(objects.len() + 1);
        let mut entries = Vec::new();
        for object in &objects {
            let path = work_dir.join(format!("{}.o", object.module));
            std::fs::write(&path, &object.bytes)?;
            paths.push(path);
            entries.extend(object.entries.iter().cloned());
        }
        if kind.needs_entry() {
            let path = work_dir.join("strata_entry.o");
            std::fs::write(&path, self.emit_entry(&entries)?)?;
            paths.push(path);
        }

        linker::link(&linker::LinkJob {
            objects: &paths,
            output,
            kind,
            runtime_lib: self.options.runtime_lib.as_deref(),
            cc: &self.options.cc,
            gc_sections: self.options.lto == LtoMode::Full,
        })?;
        let cache_hits = objects.iter().filter(|o| o.cached).count();
        tracing::info!(output = %output.display(), ?kind, objects = paths.len(), cache_hits, "linked");
        Ok(AotArtifact { path: output.to_path_buf(), kind, objects: paths, cache_hits })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, IrFunction, IrModule};

    fn module(name: &str) -> VerifiedModule {
        let mut module = IrModule::new(name);
        let mut main = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut main);
        let v = b.number(1.0);
        b.print(v);
        b.ret(None);
        module.add_function(main);
        verify_module(module).unwrap()
    }

    #[test]
    fn test_one_object_per_module() {
        let aot = AotCompiler::new(AotOptions::default());
        let objects = aot.emit_objects(&[module("a"), module("b")]).unwrap();
        let names: Vec<&str> = objects.iter().map(|o| o.module.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(objects[1].entries, vec!["strata_b_main".to_string()]);
    }

    #[test]
    fn test_full_lto_emits_single_object() {
        let aot = AotCompiler::new(AotOptions { lto: LtoMode::Full, ..AotOptions::default() });
        let objects = aot.emit_objects(&[module("a"), module("b")]).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].module, PROGRAM_MODULE);
        assert_eq!(
            objects[0].entries,
            vec!["strata_program_a_main".to_string(), "strata_program_b_main".to_string()]
        );
    }

    #[test]
    fn test_duplicate_modules_are_rejected() {
        let aot = AotCompiler::new(AotOptions::default());
        let err = aot.emit_objects(&[module("a"), module("a")]).unwrap_err();
        assert!(matches!(err, AotError::Link(LinkError::DuplicateSymbol(ref s)) if s == "strata_a_main"));
        assert!(matches!(aot.emit_objects(&[]), Err(AotError::NoModules)));
    }

    #[test]
    fn test_cache_hit_on_second_build() {
        let dir = tempfile::tempdir().unwrap();
        let options = AotOptions { cache_dir: Some(dir.path().to_path_buf()), ..AotOptions::default() };
        let first = AotCompiler::new(options.clone()).emit_objects(&[module("a")]).unwrap();
        let second = AotCompiler::new(options).emit_objects(&[module("a")]).unwrap();
        assert!(!first[0].cached);
        assert!(second[0].cached);
        assert_eq!(first[0].bytes, second[0].bytes);
    }

    #[test]
    fn test_options_from_json() {
        let options: AotOptions = serde_json::from_str(r#"{"lto": "thin", "output": "static_lib"}"#).unwrap();
        assert_eq!(options.lto, LtoMode::Thin);
        assert_eq!(options.output, OutputKind::StaticLib);
        assert_eq!(options.cc, "cc");
    }
}
