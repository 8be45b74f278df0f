//! Ahead-of-time builds: reproducible objects, linking, LTO

mod common;

use std::path::PathBuf;
use std::process::Command;

use strata_engine::aot::{locate_runtime_lib, tool_available};
use strata_engine::{AotCompiler, AotOptions, LtoMode, OptLevel, OutputKind, Pipeline, VerifiedModule};

fn verified(programs: &[strata_engine::bytecode::Program]) -> Vec<VerifiedModule> {
    let pipeline = Pipeline::default();
    programs.iter().map(|p| pipeline.compile(p).unwrap()).collect()
}

/// Runtime staticlib, if it has been built for this workspace
fn runtime_lib() -> Option<PathBuf> {
    if !tool_available("cc") {
        eprintln!("skipping: no C compiler driver");
        return None;
    }
    match locate_runtime_lib(std::env::var_os("STRATA_RUNTIME_LIB").map(PathBuf::from).as_deref()) {
        Ok(path) => Some(path),
        Err(e) => {
            eprintln!("skipping: {}", e);
            None
        }
    }
}

#[test]
fn test_objects_are_reproducible() {
    let modules = verified(&common::all());
    for lto in [LtoMode::None, LtoMode::Thin, LtoMode::Full] {
        let options = AotOptions { lto, ..AotOptions::default() };
        let first = AotCompiler::new(options.clone()).emit_objects(&modules).unwrap();
        let second = AotCompiler::new(options).emit_objects(&modules).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.bytes, b.bytes, "{} ({})", a.module, lto);
        }
    }
}

#[test]
fn test_opt_level_changes_cache_key_not_behavior() {
    let modules = verified(&[common::loop_sum()]);
    let dir = tempfile::tempdir().unwrap();
    for opt_level in [OptLevel::None, OptLevel::Speed] {
        let options = AotOptions { opt_level, cache_dir: Some(dir.path().to_path_buf()), ..AotOptions::default() };
        let objects = AotCompiler::new(options).emit_objects(&modules).unwrap();
        assert!(!objects[0].cached, "{}", opt_level);
    }
    let entries = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(entries, 2);
}

#[test]
fn test_thin_lto_keeps_one_object_per_module() {
    let modules = verified(&[common::factorial(), common::closure()]);
    let options = AotOptions { lto: LtoMode::Thin, ..AotOptions::default() };
    let objects = AotCompiler::new(options).emit_objects(&modules).unwrap();
    let names: Vec<&str> = objects.iter().map(|o| o.module.as_str()).collect();
    assert_eq!(names, vec!["factorial", "closure"]);
}

#[test]
fn test_executable_matches_jit_output() {
    let Some(runtime) = runtime_lib() else { return };
    let dir = tempfile::tempdir().unwrap();
    for lto in [LtoMode::None, LtoMode::Full] {
        let programs = vec![common::sum(), common::factorial(), common::strings(), common::heap()];
        let expected: String = programs.iter().map(|p| common::expected_output(&p.name)).collect();
        let output = dir.path().join(format!("app_{}", lto));
        let options = AotOptions { lto, runtime_lib: Some(runtime.clone()), ..AotOptions::default() };
        let artifact = AotCompiler::new(options).build(&verified(&programs), &output).unwrap();
        assert_eq!(artifact.kind, OutputKind::Executable);

        let run = Command::new(&artifact.path).output().unwrap();
        assert!(run.status.success(), "{}", String::from_utf8_lossy(&run.stderr));
        assert_eq!(String::from_utf8_lossy(&run.stdout), expected, "{}", lto);
    }
}

#[test]
fn test_static_library() {
    if !tool_available("ar") {
        eprintln!("skipping: no ar");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("libprogram.a");
    let options = AotOptions { output: OutputKind::StaticLib, ..AotOptions::default() };
    let artifact = AotCompiler::new(options).build(&verified(&[common::sum()]), &output).unwrap();
    assert!(artifact.path.is_file());
    // No entry object for libraries.
    assert_eq!(artifact.objects.len(), 1);
}
