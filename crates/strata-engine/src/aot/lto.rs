//! Link-time optimization on the IR
//!
//! Thin: summarize each module (call graph and inline candidates), then
//! per module inline small leaf functions, re-optimize and drop functions
//! nothing references, one module per thread.
//!
//! Full: merge every module into one program first, then run the same
//! inline/optimize/prune steps over the whole thing. Each input module's
//! `main` stays a root.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::ir::{FuncId, IrFunction, IrModule, IrOp, Literal, Terminator, ValueId};
use crate::opt::Optimizer;

/// Callees with at most this many ops are inlined
pub const INLINE_OP_LIMIT: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LtoMode {
    #[default]
    None,
    Thin,
    Full,
}

impl std::fmt::Display for LtoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LtoMode::None => "none",
            LtoMode::Thin => "thin",
            LtoMode::Full => "full",
        })
    }
}

/// Per-module facts computed before any module is transformed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleSummary {
    pub name: String,
    /// Functions each function references directly (calls, closures, literals)
    pub call_graph: FxHashMap<FuncId, Vec<FuncId>>,
    pub inline_candidates: FxHashSet<FuncId>,
}

/// A module after LTO with the functions the entry object must call
#[derive(Debug, Clone)]
pub struct LtoModule {
    pub module: IrModule,
    pub entries: Vec<FuncId>,
}

fn for_each_function_ref(func: &IrFunction, mut f: impl FnMut(FuncId)) {
    for op in func.blocks.iter().flat_map(|b| &b.ops) {
        match op {
            IrOp::CallDirect { func, .. } | IrOp::MakeClosure { func, .. } => f(*func),
            IrOp::Const { value: Literal::Function(id), .. } => f(*id),
            _ => {}
        }
    }
}

fn remap_function_refs(func: &mut IrFunction, map: impl Fn(FuncId) -> FuncId) {
    for op in func.blocks.iter_mut().flat_map(|b| b.ops.iter_mut()) {
        match op {
            IrOp::CallDirect { func, .. } | IrOp::MakeClosure { func, .. } => *func = map(*func),
            IrOp::Const { value: Literal::Function(id), .. } => *id = map(*id),
            _ => {}
        }
    }
}

/// Blocks of `func` as a straight chain of jumps from the entry to a
/// single return, or `None` if control flow branches or loops
fn linear_chain(func: &IrFunction) -> Option<Vec<usize>> {
    let mut chain = Vec::new();
    let mut seen = FxHashSet::default();
    let mut current = func.entry();
    loop {
        if !seen.insert(current) || !func.has_block(current) {
            return None;
        }
        chain.push(current.index());
        match &func.block(current).terminator {
            Terminator::Jump(next) => current = *next,
            Terminator::Return(_) => return Some(chain),
            Terminator::Branch { .. } | Terminator::Unreachable => return None,
        }
    }
}

/// Small straight-line functions that call nothing and carry no
/// ownership markers, locals or environment reads
pub fn is_inline_candidate(func: &IrFunction) -> bool {
    if !func.locals.is_empty() || func.op_count() > INLINE_OP_LIMIT {
        return false;
    }
    let Some(chain) = linear_chain(func) else {
        return false;
    };
    chain.iter().flat_map(|&b| &func.blocks[b].ops).all(|op| match op {
        IrOp::Call { .. }
        | IrOp::CallDirect { .. }
        | IrOp::MakeClosure { .. }
        | IrOp::LoadEnv { .. }
        | IrOp::Move { .. }
        | IrOp::Borrow { .. }
        | IrOp::BorrowMut { .. }
        | IrOp::EndBorrow { .. } => false,
        IrOp::Phi { incoming, .. } => incoming.len() == 1,
        _ => true,
    })
}

pub fn summarize(module: &IrModule) -> ModuleSummary {
    let mut summary = ModuleSummary { name: module.name.clone(), ..ModuleSummary::default() };
    for (index, func) in module.functions.iter().enumerate() {
        let id = FuncId(index as u32);
        let mut callees = Vec::new();
        for_each_function_ref(func, |callee| {
            if !callees.contains(&callee) {
                callees.push(callee);
            }
        });
        summary.call_graph.insert(id, callees);
        // `main` is an entry point, never a callee worth inlining.
        if index > 0 && is_inline_candidate(func) {
            summary.inline_candidates.insert(id);
        }
    }
    summary
}

/// Callee body rewritten into the caller's value space
fn instantiate(caller: &mut IrFunction, callee: &IrFunction, dest: ValueId, args: &[ValueId]) -> Vec<IrOp> {
    let mut ops = Vec::new();
    let mut map: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    let Some(chain) = linear_chain(callee) else {
        return ops;
    };
    for &block in &chain {
        for op in &callee.blocks[block].ops {
            match op {
                IrOp::Param { dest: param, index } => match args.get(*index as usize) {
                    Some(arg) => {
                        map.insert(*param, *arg);
                    }
                    None => {
                        let fresh = caller.alloc_value(callee.value_type(*param));
                        ops.push(IrOp::Const { dest: fresh, value: Literal::Undefined });
                        map.insert(*param, fresh);
                    }
                },
                IrOp::Phi { dest: phi, incoming } => {
                    if let Some((_, src)) = incoming.first() {
                        let fresh = caller.alloc_value(callee.value_type(*phi));
                        let src = map.get(src).copied().unwrap_or(*src);
                        ops.push(IrOp::Copy { dest: fresh, src });
                        map.insert(*phi, fresh);
                    }
                }
                other => {
                    let mut op = other.clone();
                    op.map_uses(|v| map.get(&v).copied().unwrap_or(v));
                    if let Some(old) = op.dest() {
                        let fresh = caller.alloc_value(callee.value_type(old));
                        op.set_dest(fresh);
                        map.insert(old, fresh);
                    }
                    ops.push(op);
                }
            }
        }
    }
    let last = chain[chain.len() - 1];
    match &callee.blocks[last].terminator {
        Terminator::Return(Some(value)) => {
            let src = map.get(value).copied().unwrap_or(*value);
            ops.push(IrOp::Copy { dest, src });
        }
        _ => ops.push(IrOp::Const { dest, value: Literal::Undefined }),
    }
    ops
}

/// Inline direct calls to candidates; returns the number of call sites replaced
pub fn inline_calls(module: &mut IrModule, candidates: &FxHashSet<FuncId>) -> usize {
    let bodies: FxHashMap<FuncId, IrFunction> = candidates
        .iter()
        .filter_map(|id| module.function(*id).map(|f| (*id, f.clone())))
        .collect();
    let mut inlined = 0;
    for caller in &mut module.functions {
        for block_index in 0..caller.blocks.len() {
            let mut index = 0;
            while index < caller.blocks[block_index].ops.len() {
                let site = match &caller.blocks[block_index].ops[index] {
                    IrOp::CallDirect { dest, func, args } => bodies.get(func).map(|body| (*dest, body, args.clone())),
                    _ => None,
                };
                let Some((dest, body, args)) = site else {
                    index += 1;
                    continue;
                };
                let ops = instantiate(caller, body, dest, &args);
                let count = ops.len();
                caller.blocks[block_index].ops.splice(index..=index, ops);
                index += count;
                inlined += 1;
            }
        }
    }
    inlined
}

/// Drop functions unreachable from `roots` through direct references and
/// renumber the rest in order; returns how many were removed
pub fn prune_dead_functions(module: &mut IrModule, roots: &[FuncId]) -> usize {
    let mut live = vec![false; module.functions.len()];
    let mut stack: Vec<FuncId> = roots.to_vec();
    while let Some(id) = stack.pop() {
        let Some(slot) = live.get_mut(id.index()) else { continue };
        if *slot {
            continue;
        }
        *slot = true;
        for_each_function_ref(&module.functions[id.index()], |callee| stack.push(callee));
    }

    let mut remap = Vec::with_capacity(live.len());
    let mut next = 0u32;
    for &is_live in &live {
        remap.push(FuncId(next));
        if is_live {
            next += 1;
        }
    }
    let before = module.functions.len();
    let functions = std::mem::take(&mut module.functions);
    for (index, mut func) in functions.into_iter().enumerate() {
        if live[index] {
            remap_function_refs(&mut func, |id| remap.get(id.index()).copied().unwrap_or(id));
            module.functions.push(func);
        }
    }
    before - module.functions.len()
}

/// Merge modules into one program; function names are prefixed with their
/// module name. Returns the merged module and each input's `main`.
pub fn merge_modules(name: &str, modules: &[&IrModule]) -> (IrModule, Vec<FuncId>) {
    let mut merged = IrModule::new(name);
    let mut entries = Vec::with_capacity(modules.len());
    for module in modules {
        let offset = merged.functions.len() as u32;
        entries.push(FuncId(offset));
        for func in &module.functions {
            let mut func = func.clone();
            func.name = format!("{}_{}", module.name, func.name);
            remap_function_refs(&mut func, |id| FuncId(id.0 + offset));
            merged.functions.push(func);
        }
        for global in &module.globals {
            merged.note_global(global);
        }
    }
    (merged, entries)
}

fn optimize_and_prune(module: &mut IrModule, candidates: &FxHashSet<FuncId>, roots: &[FuncId], optimizer: &Optimizer) {
    let inlined = inline_calls(module, candidates);
    if inlined > 0 {
        optimizer.optimize_module(module);
    }
    let removed = prune_dead_functions(module, roots);
    tracing::debug!(module = %module.name, inlined, removed, "lto pass");
}

/// Thin LTO over independent modules
pub fn run_thin(modules: Vec<IrModule>, optimizer: &Optimizer) -> Vec<LtoModule> {
    let summaries: Vec<ModuleSummary> = modules.iter().map(summarize).collect();
    std::thread::scope(|scope| {
        let handles: Vec<_> = modules
            .into_iter()
            .zip(summaries)
            .map(|(mut module, summary)| {
                scope.spawn(move || {
                    optimize_and_prune(&mut module, &summary.inline_candidates, &[FuncId(0)], optimizer);
                    LtoModule { module, entries: vec![FuncId(0)] }
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}

/// Full LTO: one whole-program module
pub fn run_full(name: &str, modules: &[IrModule], optimizer: &Optimizer) -> LtoModule {
    let refs: Vec<&IrModule> = modules.iter().collect();
    let (mut merged, entries) = merge_modules(name, &refs);
    let mut summary = summarize(&merged);
    for entry in &entries {
        summary.inline_candidates.remove(entry);
    }
    optimize_and_prune(&mut merged, &summary.inline_candidates, &entries, optimizer);
    // Pruning keeps relative order and every entry is a root, so entries
    // map to the positions of the surviving `*_main` functions.
    let entries = merged
        .functions
        .iter()
        .enumerate()
        .filter(|(_, f)| refs.iter().any(|m| f.name == format!("{}_main", m.name)))
        .map(|(i, _)| FuncId(i as u32))
        .collect();
    LtoModule { module: merged, entries }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, IrBuilder, IrType};
    use crate::verify::verify_module;

    /// main calls `twice(21)` directly; `unused` is never referenced
    fn program(name: &str) -> IrModule {
        let mut module = IrModule::new(name);
        let mut main = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut main);
        let arg = b.number(21.0);
        let r = b.call_direct(FuncId(1), vec![arg]);
        b.print(r);
        b.ret(None);
        module.add_function(main);

        let mut twice = IrFunction::new("twice");
        let mut b = IrBuilder::new(&mut twice);
        let body = b.create_block();
        let p = b.param("a0");
        b.jump(body);
        b.switch_to_block(body);
        let sum = b.binary(BinaryOp::Add, p, p);
        b.ret(Some(sum));
        module.add_function(twice);

        let mut unused = IrFunction::new("unused");
        let mut b = IrBuilder::new(&mut unused);
        let n = b.number(0.0);
        b.ret(Some(n));
        module.add_function(unused);
        module
    }

    #[test]
    fn test_summary_finds_leaf_candidates() {
        let summary = summarize(&program("m"));
        assert!(summary.inline_candidates.contains(&FuncId(1)));
        assert!(!summary.inline_candidates.contains(&FuncId(0)));
        assert_eq!(summary.call_graph[&FuncId(0)], vec![FuncId(1)]);
    }

    #[test]
    fn test_thin_inlines_and_prunes() {
        let out = run_thin(vec![program("m")], &Optimizer::default());
        assert_eq!(out.len(), 1);
        let module = &out[0].module;
        assert_eq!(module.functions.len(), 1);
        assert_eq!(module.functions[0].name, "main");
        let has_call = module.functions[0].blocks.iter().flat_map(|b| &b.ops).any(|op| matches!(op, IrOp::CallDirect { .. }));
        assert!(!has_call);
        assert!(verify_module(module.clone()).is_ok());
    }

    #[test]
    fn test_missing_argument_becomes_undefined() {
        let mut module = program("m");
        if let IrOp::CallDirect { args, .. } = &mut module.functions[0].blocks[0].ops[1] {
            args.clear();
        }
        let inlined = inline_calls(&mut module, &[FuncId(1)].into_iter().collect());
        assert_eq!(inlined, 1);
        let main = &module.functions[0];
        assert!(main.blocks[0]
            .ops
            .iter()
            .any(|op| matches!(op, IrOp::Const { value: Literal::Undefined, .. })));
    }

    #[test]
    fn test_recursive_functions_are_not_candidates() {
        let mut f = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut f);
        let r = b.call_direct(FuncId(0), vec![]);
        b.ret(Some(r));
        assert!(!is_inline_candidate(&f));
        let mut g = IrFunction::new("g");
        let mut b = IrBuilder::new(&mut g);
        let obj = b.new_object();
        b.store_local(0, obj);
        b.ret(None);
        assert!(!is_inline_candidate(&g));
        assert_eq!(g.value_type(obj), IrType::Object);
    }

    #[test]
    fn test_full_merges_and_keeps_every_main() {
        let modules = vec![program("a"), program("b")];
        let out = run_full("app", &modules, &Optimizer::default());
        let names: Vec<&str> = out.module.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a_main", "b_main"]);
        assert_eq!(out.entries, vec![FuncId(0), FuncId(1)]);
        assert!(verify_module(out.module).is_ok());
    }

    #[test]
    fn test_prune_renumbers_references() {
        let mut module = IrModule::new("m");
        let mut main = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut main);
        let f = b.constant(Literal::Function(FuncId(2)));
        b.ret(Some(f));
        module.add_function(main);
        for name in ["dead", "live"] {
            let mut func = IrFunction::new(name);
            IrBuilder::new(&mut func).ret(None);
            module.add_function(func);
        }
        assert_eq!(prune_dead_functions(&mut module, &[FuncId(0)]), 1);
        assert_eq!(module.functions[1].name, "live");
        assert!(matches!(
            module.functions[0].blocks[0].ops[0],
            IrOp::Const { value: Literal::Function(FuncId(1)), .. }
        ));
    }
}
