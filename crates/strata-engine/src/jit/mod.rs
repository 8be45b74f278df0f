//! In-process native code via `cranelift-jit`
//!
//! `JitCompiler::compile` lowers a verified module into a `JITModule` and
//! publishes every function in an [`AddressTable`]. Generated code calls its
//! siblings through that table and reports each entry to it, so call counts
//! include calls made by compiled code. Recompilation builds a fresh
//! `JITModule` at another optimization level and swaps one entry; the old
//! code is retained, so calls already running on it finish normally.

pub mod background;
pub mod table;

pub use background::{BackgroundCompiler, CompileOutcome, CompileRequest};
pub use table::{AddressTable, CallObserver, EntryPoint};

use std::sync::{Arc, Weak};

use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::default_libcall_names;
use parking_lot::Mutex;
use strata_runtime::value::UNDEFINED_BITS;
use strata_runtime::Value;

use crate::codegen::{define_module_with, isa_for, CodegenError, OptLevel, ENTER_HOOK_SYMBOL};
use crate::ir::IrModule;
use crate::tier::{Tier, TierManager, TierRequest};
use crate::verify::VerifiedModule;

#[derive(Debug, thiserror::Error)]
pub enum JitError {
    #[error("no compiled function named `{0}`")]
    UnknownFunction(String),

    #[error("background compiler has shut down")]
    CompilerStopped,

    #[error(transparent)]
    Codegen(#[from] CodegenError),
}

/// Compile `ir` into a fresh `JITModule` linked against `table`, whose slots
/// must follow `ir.functions`; returns the module with each function's
/// finalized entry point
pub(crate) fn build(
    ir: &IrModule,
    opt_level: OptLevel,
    table: &Arc<AddressTable>,
) -> Result<(JITModule, Vec<(String, EntryPoint)>), CodegenError> {
    let isa = isa_for(None, opt_level, false)?;
    let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
    for (name, ptr) in strata_runtime::stub_symbols() {
        builder.symbol(name, ptr);
    }
    builder.symbol(ENTER_HOOK_SYMBOL, table::strata_jit_enter as *const u8);
    let mut module = JITModule::new(builder);
    let defined = define_module_with(&mut module, ir, table.linkage())?;
    module.finalize_definitions()?;

    let entries = ir
        .functions
        .iter()
        .zip(&defined.functions)
        .map(|(func, id)| {
            // SAFETY: finalized with the uniform signature; the caller keeps
            // `module` alive for as long as the entry is reachable.
            let entry = unsafe { EntryPoint::from_raw(module.get_finalized_function(*id)) };
            (func.name.clone(), entry)
        })
        .collect();
    Ok((module, entries))
}

#[derive(Debug, Clone, Copy)]
pub struct JitCompiler {
    opt_level: OptLevel,
}

impl Default for JitCompiler {
    fn default() -> Self {
        JitCompiler { opt_level: OptLevel::None }
    }
}

impl JitCompiler {
    pub fn new(opt_level: OptLevel) -> Self {
        JitCompiler { opt_level }
    }

    pub fn compile(&self, module: &VerifiedModule) -> Result<JitModule, CodegenError> {
        let ir = Arc::new(module.module().clone());
        let table = Arc::new(AddressTable::reserve(ir.functions.iter().map(|f| f.name.clone())));
        let (code, entries) = build(&ir, self.opt_level, &table)?;
        for (name, entry) in entries {
            table.swap(&name, entry);
        }
        tracing::debug!(module = %ir.name, functions = table.len(), opt = %self.opt_level, "jit compiled module");
        Ok(JitModule { table, ir, opt_level: self.opt_level, retained: Mutex::new(vec![code]) })
    }
}

/// Tier-up wiring installed on a module's [`AddressTable`]
struct Tiering {
    tiers: Arc<TierManager>,
    compiler: crossbeam::channel::Sender<CompileRequest>,
    optimized: OptLevel,
    ir: Arc<IrModule>,
    /// Weak: the table owns this observer
    table: Weak<AddressTable>,
}

impl CallObserver for Tiering {
    fn on_call(&self, name: &str) {
        // Every function is compiled up front, so only optimizing requests occur.
        let Some(TierRequest::Optimize(function)) = self.tiers.record_call(name) else {
            return;
        };
        let Some(table) = self.table.upgrade() else {
            self.tiers.release(&function);
            return;
        };
        let request = CompileRequest {
            module: Arc::clone(&self.ir),
            function,
            opt_level: self.optimized,
            table,
            tiers: Some(Arc::clone(&self.tiers)),
        };
        if let Err(error) = self.compiler.send(request) {
            tracing::warn!(function = %error.0.function, "background compiler has shut down");
            self.tiers.release(&error.0.function);
        }
    }
}

/// Compiled code plus the table callers dispatch through
pub struct JitModule {
    table: Arc<AddressTable>,
    ir: Arc<IrModule>,
    opt_level: OptLevel,
    /// Every `JITModule` whose code may still be referenced
    retained: Mutex<Vec<JITModule>>,
}

impl JitModule {
    pub fn name(&self) -> &str {
        &self.ir.name
    }

    pub fn opt_level(&self) -> OptLevel {
        self.opt_level
    }

    pub fn table(&self) -> &Arc<AddressTable> {
        &self.table
    }

    pub fn entry(&self, name: &str) -> Option<EntryPoint> {
        self.table.get(name)
    }

    /// Count every call into this module's code with `tiers`; optimizing
    /// recompiles go to `compiler`
    pub fn attach_tiering(
        &mut self,
        tiers: Arc<TierManager>,
        compiler: &BackgroundCompiler,
        optimized: OptLevel,
    ) -> Result<(), JitError> {
        let sender = compiler.sender().ok_or(JitError::CompilerStopped)?;
        for name in self.table.names() {
            tiers.register(name, Tier::Baseline);
        }
        let tiering = Tiering {
            tiers,
            compiler: sender,
            optimized,
            ir: Arc::clone(&self.ir),
            table: Arc::downgrade(&self.table),
        };
        self.table.set_observer(Some(Arc::new(tiering)));
        Ok(())
    }

    /// Call a compiled function on the current thread
    pub fn call(&self, name: &str, args: &[Value]) -> Result<Value, JitError> {
        let entry = self.table.get(name).ok_or_else(|| JitError::UnknownFunction(name.to_string()))?;
        let words: Vec<u64> = args.iter().map(|arg| arg.to_bits()).collect();
        let native = entry.as_native();
        // SAFETY: the entry was produced by `build` and its module is retained.
        let result = unsafe { native(UNDEFINED_BITS, words.as_ptr(), words.len() as u64) };
        Ok(Value::from_bits(result))
    }

    pub fn run_main(&self) -> Result<Value, JitError> {
        self.call("main", &[])
    }

    /// Recompile the module at `opt_level` and swap in `name`'s new entry
    pub fn recompile(&self, name: &str, opt_level: OptLevel) -> Result<(), JitError> {
        if !self.table.contains(name) {
            return Err(JitError::UnknownFunction(name.to_string()));
        }
        let (code, entries) = build(&self.ir, opt_level, &self.table)?;
        self.retained.lock().push(code);
        let (_, entry) = entries
            .into_iter()
            .find(|(function, _)| function == name)
            .ok_or_else(|| JitError::UnknownFunction(name.to_string()))?;
        self.table.swap(name, entry);
        tracing::debug!(module = %self.ir.name, function = name, opt = %opt_level, "recompiled function");
        Ok(())
    }
}

impl Drop for JitModule {
    fn drop(&mut self) {
        // The observer holds a sender into the background compiler.
        self.table.set_observer(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, FuncId, IrBuilder, IrFunction};
    use crate::verify::verify_module;

    fn adder() -> VerifiedModule {
        let mut module = IrModule::new("jit_unit");
        let mut main = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut main);
        let x = b.number(40.0);
        let y = b.number(2.0);
        let sum = b.binary(BinaryOp::Add, x, y);
        b.ret(Some(sum));
        module.add_function(main);

        let mut add = IrFunction::new("add");
        let mut b = IrBuilder::new(&mut add);
        let p = b.param("a0");
        let q = b.param("a1");
        let sum = b.binary(BinaryOp::Add, p, q);
        b.ret(Some(sum));
        module.add_function(add);
        verify_module(module).unwrap()
    }

    #[test]
    fn test_compile_and_call() {
        let jit = JitCompiler::default().compile(&adder()).unwrap();
        assert_eq!(jit.run_main().unwrap().as_number(), Some(42.0));
        let r = jit.call("add", &[Value::number(1.5), Value::number(2.0)]).unwrap();
        assert_eq!(r.as_number(), Some(3.5));
        // Missing arguments read as undefined, and undefined + 1 is NaN.
        let r = jit.call("add", &[Value::number(1.0)]).unwrap();
        assert!(r.as_number().is_some_and(f64::is_nan));
    }

    #[test]
    fn test_unknown_function() {
        let jit = JitCompiler::default().compile(&adder()).unwrap();
        assert!(matches!(jit.call("nope", &[]), Err(JitError::UnknownFunction(_))));
        assert!(matches!(jit.recompile("nope", OptLevel::Speed), Err(JitError::UnknownFunction(_))));
    }

    #[test]
    fn test_recompile_swaps_entry() {
        let jit = JitCompiler::default().compile(&adder()).unwrap();
        let before = jit.entry("add").unwrap();
        jit.recompile("add", OptLevel::SpeedAndSize).unwrap();
        let after = jit.entry("add").unwrap();
        assert_ne!(before, after);
        let r = jit.call("add", &[Value::number(2.0), Value::number(3.0)]).unwrap();
        assert_eq!(r.as_number(), Some(5.0));
        // The old code is still mapped.
        let old = before.as_native();
        let args = [Value::number(1.0).to_bits(), Value::number(1.0).to_bits()];
        let r = unsafe { old(UNDEFINED_BITS, args.as_ptr(), 2) };
        assert_eq!(Value::from_bits(r).as_number(), Some(2.0));
    }

    /// main() = one() + 1, with one() = 1 and two() = 2
    fn caller() -> VerifiedModule {
        let mut module = IrModule::new("jit_calls");
        let mut main = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut main);
        let r = b.call_direct(FuncId(1), vec![]);
        let inc = b.number(1.0);
        let sum = b.binary(BinaryOp::Add, r, inc);
        b.ret(Some(sum));
        module.add_function(main);
        for (name, value) in [("one", 1.0), ("two", 2.0)] {
            let mut func = IrFunction::new(name);
            let mut b = IrBuilder::new(&mut func);
            let v = b.number(value);
            b.ret(Some(v));
            module.add_function(func);
        }
        verify_module(module).unwrap()
    }

    #[test]
    fn test_compiled_callers_follow_swapped_entries() {
        let jit = JitCompiler::default().compile(&caller()).unwrap();
        assert_eq!(jit.run_main().unwrap().as_number(), Some(2.0));
        let two = jit.entry("two").unwrap();
        jit.table().swap("one", two);
        assert_eq!(jit.run_main().unwrap().as_number(), Some(3.0));
    }

    #[derive(Default)]
    struct Counter(parking_lot::Mutex<Vec<String>>);

    impl CallObserver for Counter {
        fn on_call(&self, name: &str) {
            self.0.lock().push(name.to_string());
        }
    }

    #[test]
    fn test_compiled_calls_are_reported() {
        let jit = JitCompiler::default().compile(&caller()).unwrap();
        let counter = Arc::new(Counter::default());
        jit.table().set_observer(Some(Arc::clone(&counter) as Arc<dyn CallObserver>));
        jit.run_main().unwrap();
        jit.run_main().unwrap();
        assert_eq!(*counter.0.lock(), vec!["main", "one", "main", "one"]);
    }
}
