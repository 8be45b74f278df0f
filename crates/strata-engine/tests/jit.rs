//! JIT execution: specialization soundness and tiered recompilation

mod common;

use std::sync::Arc;
use std::time::Duration;

use strata_engine::bytecode::Program;
use strata_engine::tier::Tier;
use strata_engine::{BackgroundCompiler, EngineConfig, JitError, OptLevel, Pipeline, TierManager, TierThresholds};
use strata_runtime::{output, Value};

/// Compile and run `program`, returning main's result bits and its output
fn run(pipeline: &Pipeline, program: &Program) -> (u64, String) {
    let jit = pipeline.jit(program).unwrap_or_else(|e| panic!("{}: {}", program.name, e));
    strata_runtime::reset();
    let (result, printed) = output::capture(|| jit.run_main());
    let value = result.unwrap_or_else(|e| panic!("{}: {}", program.name, e));
    (value.to_bits(), printed)
}

#[test]
fn test_programs_print_expected_output() {
    let pipeline = Pipeline::default();
    for program in common::all() {
        let (_, printed) = run(&pipeline, &program);
        assert_eq!(printed, common::expected_output(&program.name), "{}", program.name);
    }
}

#[test]
fn test_specialization_preserves_behavior() {
    let specialized = Pipeline::default();
    let dynamic = Pipeline::new(EngineConfig { specialize: false, optimize: false, ..EngineConfig::default() });
    for program in common::all() {
        let fast = run(&specialized, &program);
        let slow = run(&dynamic, &program);
        assert_eq!(fast, slow, "{}", program.name);
    }
}

#[test]
fn test_optimization_levels_agree() {
    for level in [OptLevel::None, OptLevel::Speed, OptLevel::SpeedAndSize] {
        let pipeline = Pipeline::new(EngineConfig { jit_opt_level: level, ..EngineConfig::default() });
        let (_, printed) = run(&pipeline, &common::factorial());
        assert_eq!(printed, "120\n", "{}", level);
    }
}

#[test]
fn test_call_function_by_name() {
    let jit = Pipeline::default().jit(&common::factorial()).unwrap();
    strata_runtime::reset();
    let result = jit.call("func_1", &[Value::number(6.0)]).unwrap();
    assert_eq!(result.as_number(), Some(720.0));
    assert!(matches!(jit.call("nope", &[]), Err(JitError::UnknownFunction(_))));
}

#[test]
fn test_background_tier_up_swaps_entry() {
    let pipeline = Pipeline::default();
    let mut jit = pipeline.jit(&common::factorial()).unwrap();
    let compiler = BackgroundCompiler::spawn().unwrap();
    let tiers = Arc::new(TierManager::new(TierThresholds { baseline: 1, optimizing: 3 }));
    jit.attach_tiering(Arc::clone(&tiers), &compiler, OptLevel::Speed).unwrap();

    let before = jit.entry("func_1").unwrap();
    strata_runtime::reset();
    for _ in 0..3 {
        let result = jit.call("func_1", &[Value::number(4.0)]).unwrap();
        assert_eq!(result.as_number(), Some(24.0));
    }

    let outcome = compiler.outcomes().recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(outcome.function, "func_1");
    assert_eq!(outcome.opt_level, OptLevel::Speed);
    assert!(outcome.result.is_ok());
    assert_eq!(tiers.tier_of("func_1"), Some(Tier::Optimized));
    assert_ne!(jit.entry("func_1").unwrap(), before);

    // Further calls run the optimized code and request nothing more.
    let result = jit.call("func_1", &[Value::number(5.0)]).unwrap();
    assert_eq!(result.as_number(), Some(120.0));
    assert!(compiler.outcomes().try_recv().is_err());
    compiler.shutdown();
}

#[test]
fn test_calls_from_compiled_code_drive_tier_up() {
    let mut jit = Pipeline::default().jit(&common::hot_loop()).unwrap();
    let compiler = BackgroundCompiler::spawn().unwrap();
    let tiers = Arc::new(TierManager::new(TierThresholds { baseline: 1, optimizing: 10 }));
    jit.attach_tiering(Arc::clone(&tiers), &compiler, OptLevel::Speed).unwrap();
    let before = jit.entry("func_1").unwrap();

    // One host call; every call to func_1 comes from main's loop.
    strata_runtime::reset();
    let (result, printed) = output::capture(|| jit.run_main());
    result.unwrap();
    assert_eq!(printed, "20\n");
    assert_eq!(tiers.call_count("main"), 1);
    assert_eq!(tiers.call_count("func_1"), 20);

    let outcome = compiler.outcomes().recv_timeout(Duration::from_secs(30)).unwrap();
    assert_eq!(outcome.function, "func_1");
    assert!(outcome.result.is_ok());
    assert_eq!(tiers.tier_of("func_1"), Some(Tier::Optimized));
    assert_eq!(tiers.tier_of("main"), Some(Tier::Baseline));
    assert_ne!(jit.entry("func_1").unwrap(), before);

    // main reaches the optimized func_1 through the table.
    let (result, printed) = output::capture(|| jit.run_main());
    result.unwrap();
    assert_eq!(printed, "20\n");
    assert_eq!(tiers.call_count("func_1"), 40);
    assert!(compiler.outcomes().try_recv().is_err());
    compiler.shutdown();
}
