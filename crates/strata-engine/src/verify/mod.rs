//! IR verifier
//!
//! Structural checks (targets, phis, slots, call targets), SSA checks
//! (single definition, dominance of every use) and the ownership model.
//! Backends only accept a [`VerifiedModule`], which only [`verify_module`]
//! can produce.

mod ownership;

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::{Cfg, DomTree};
use crate::ir::{BlockId, FuncId, IrFunction, IrModule, IrOp, ValueId};

/// What went wrong
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationErrorKind {
    #[error("function has no blocks")]
    EmptyFunction,
    #[error("{0} is defined more than once")]
    DuplicateDefinition(ValueId),
    #[error("{0} is used but never defined")]
    UndefinedValue(ValueId),
    #[error("use of {0} is not dominated by its definition")]
    UseNotDominated(ValueId),
    #[error("branch to nonexistent block {0}")]
    InvalidBlockTarget(BlockId),
    #[error("phi input from {0} does not match the block's predecessors")]
    InvalidPhi(BlockId),
    #[error("phi follows a non-phi operation")]
    MisplacedPhi,
    #[error("entry block has predecessors")]
    EntryHasPredecessors,
    #[error("local slot ${0} does not exist")]
    InvalidLocalSlot(u32),
    #[error("{0} does not exist in this module")]
    InvalidDirectCall(FuncId),
    #[error("use of moved value {0}")]
    UseAfterMove(ValueId),
    #[error("load of local ${0} whose value was moved")]
    LoadOfMovedLocal(u32),
    #[error("{0} is borrowed while a conflicting borrow is live")]
    BorrowConflict(ValueId),
    #[error("move of {0} while it is borrowed")]
    MoveWhileBorrowed(ValueId),
    #[error("move of {0}, which is captured by a closure")]
    MoveOfCaptured(ValueId),
    #[error("{0} is not a live borrow")]
    NotABorrow(ValueId),
}

impl VerificationErrorKind {
    /// Ownership-model violations, as opposed to malformed IR
    pub fn is_ownership(&self) -> bool {
        matches!(
            self,
            VerificationErrorKind::UseAfterMove(_)
                | VerificationErrorKind::LoadOfMovedLocal(_)
                | VerificationErrorKind::BorrowConflict(_)
                | VerificationErrorKind::MoveWhileBorrowed(_)
                | VerificationErrorKind::MoveOfCaptured(_)
                | VerificationErrorKind::NotABorrow(_)
        )
    }
}

/// A verification failure with its location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationError {
    pub function: String,
    pub block: Option<BlockId>,
    /// Index into the block's ops; the terminator is `ops.len()`
    pub op_index: Option<usize>,
    pub kind: VerificationErrorKind,
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in {}", self.function)?;
        if let Some(block) = self.block {
            write!(f, " at {}", block)?;
        }
        if let Some(index) = self.op_index {
            write!(f, "#{}", index)?;
        }
        write!(f, ": {}", self.kind)
    }
}

impl std::error::Error for VerificationError {}

/// A module that passed verification
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedModule(IrModule);

impl VerifiedModule {
    pub fn module(&self) -> &IrModule {
        &self.0
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn into_inner(self) -> IrModule {
        self.0
    }
}

/// Collects errors with location for one function
pub(crate) struct Reporter<'f> {
    function: &'f str,
    errors: Vec<VerificationError>,
}

impl Reporter<'_> {
    pub(crate) fn at(&mut self, block: BlockId, op_index: usize, kind: VerificationErrorKind) {
        self.errors.push(VerificationError {
            function: self.function.to_string(),
            block: Some(block),
            op_index: Some(op_index),
            kind,
        });
    }

    fn function_level(&mut self, kind: VerificationErrorKind) {
        self.errors.push(VerificationError {
            function: self.function.to_string(),
            block: None,
            op_index: None,
            kind,
        });
    }
}

/// Checks functions against the module they belong to
pub struct Verifier<'m> {
    module: &'m IrModule,
}

impl<'m> Verifier<'m> {
    pub fn new(module: &'m IrModule) -> Self {
        Verifier { module }
    }

    /// Every error in `func`, in block order
    pub fn check_function(&self, func: &IrFunction) -> Vec<VerificationError> {
        let mut reporter = Reporter { function: &func.name, errors: Vec::new() };
        if func.blocks.is_empty() {
            reporter.function_level(VerificationErrorKind::EmptyFunction);
            return reporter.errors;
        }
        let cfg = Cfg::compute(func);
        let structure_ok = self.check_structure(func, &cfg, &mut reporter);
        let dom = DomTree::compute(&cfg);
        let ssa_ok = check_ssa(func, &cfg, &dom, &mut reporter);
        // Ownership dataflow assumes well-formed SSA.
        if structure_ok && ssa_ok {
            ownership::check(func, &cfg, &mut reporter);
        }
        reporter.errors
    }

    fn check_structure(&self, func: &IrFunction, cfg: &Cfg, reporter: &mut Reporter<'_>) -> bool {
        let before = reporter.errors.len();
        if !cfg.preds(func.entry()).is_empty() {
            reporter.at(func.entry(), 0, VerificationErrorKind::EntryHasPredecessors);
        }
        for block in &func.blocks {
            let terminator_index = block.ops.len();
            for target in block.terminator.successors() {
                if !func.has_block(target) {
                    reporter.at(block.id, terminator_index, VerificationErrorKind::InvalidBlockTarget(target));
                }
            }

            let preds: FxHashSet<BlockId> = cfg.preds(block.id).iter().copied().collect();
            let mut seen_non_phi = false;
            for (index, op) in block.ops.iter().enumerate() {
                match op {
                    IrOp::Phi { incoming, .. } => {
                        if seen_non_phi {
                            reporter.at(block.id, index, VerificationErrorKind::MisplacedPhi);
                        }
                        let mut covered = FxHashSet::default();
                        for (pred, _) in incoming {
                            if !preds.contains(pred) || !covered.insert(*pred) {
                                reporter.at(block.id, index, VerificationErrorKind::InvalidPhi(*pred));
                            }
                        }
                        if cfg.is_reachable(block.id) {
                            for pred in &preds {
                                if cfg.is_reachable(*pred) && !covered.contains(pred) {
                                    reporter.at(block.id, index, VerificationErrorKind::InvalidPhi(*pred));
                                }
                            }
                        }
                    }
                    _ => seen_non_phi = true,
                }
                match op {
                    IrOp::LoadLocal { slot, .. } | IrOp::StoreLocal { slot, .. }
                        if *slot as usize >= func.locals.len() =>
                    {
                        reporter.at(block.id, index, VerificationErrorKind::InvalidLocalSlot(*slot));
                    }
                    IrOp::CallDirect { func: target, .. } | IrOp::MakeClosure { func: target, .. }
                        if self.module.function(*target).is_none() =>
                    {
                        reporter.at(block.id, index, VerificationErrorKind::InvalidDirectCall(*target));
                    }
                    _ => {}
                }
            }
        }
        reporter.errors.len() == before
    }
}

/// Single definition and dominance of every use
fn check_ssa(func: &IrFunction, cfg: &Cfg, dom: &DomTree, reporter: &mut Reporter<'_>) -> bool {
    let before = reporter.errors.len();
    let mut defs: FxHashMap<ValueId, (BlockId, usize)> = FxHashMap::default();
    for block in &func.blocks {
        for (index, op) in block.ops.iter().enumerate() {
            if let Some(dest) = op.dest() {
                if defs.insert(dest, (block.id, index)).is_some() {
                    reporter.at(block.id, index, VerificationErrorKind::DuplicateDefinition(dest));
                }
            }
        }
    }

    // `at` is the using block and op index; phi inputs are checked at the
    // end of the incoming predecessor instead.
    let check_use = |value: ValueId, block: BlockId, index: usize, at: (BlockId, usize), reporter: &mut Reporter<'_>| {
        let Some(&(def_block, def_index)) = defs.get(&value) else {
            reporter.at(block, index, VerificationErrorKind::UndefinedValue(value));
            return;
        };
        let (use_block, use_index) = at;
        if !cfg.is_reachable(use_block) {
            return;
        }
        let dominated = if def_block == use_block {
            def_index < use_index
        } else {
            dom.dominates(def_block, use_block)
        };
        if !dominated {
            reporter.at(block, index, VerificationErrorKind::UseNotDominated(value));
        }
    };

    for block in &func.blocks {
        for (index, op) in block.ops.iter().enumerate() {
            match op {
                IrOp::Phi { incoming, .. } => {
                    for (pred, value) in incoming {
                        let end = func.blocks.get(pred.index()).map_or(0, |b| b.ops.len());
                        check_use(*value, block.id, index, (*pred, end), reporter);
                    }
                }
                other => other.for_each_use(|value| check_use(value, block.id, index, (block.id, index), reporter)),
            }
        }
        let end = block.ops.len();
        block.terminator.for_each_use(|value| check_use(value, block.id, end, (block.id, end), reporter));
    }
    reporter.errors.len() == before
}

/// Verify a whole module; the first error is returned and all are logged
pub fn verify_module(module: IrModule) -> Result<VerifiedModule, VerificationError> {
    let verifier = Verifier::new(&module);
    let mut first = None;
    for func in &module.functions {
        for error in verifier.check_function(func) {
            tracing::debug!(%error, "verification error");
            first.get_or_insert(error);
        }
    }
    if let Some(error) = first {
        return Err(error);
    }
    tracing::debug!(module = %module.name, functions = module.functions.len(), "module verified");
    Ok(VerifiedModule(module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, IrBuilder, Literal, Terminator};

    fn single(func: IrFunction) -> IrModule {
        let mut module = IrModule::new("m");
        module.add_function(func);
        module
    }

    fn kinds(module: &IrModule) -> Vec<VerificationErrorKind> {
        let verifier = Verifier::new(module);
        module.functions.iter().flat_map(|f| verifier.check_function(f)).map(|e| e.kind).collect()
    }

    #[test]
    fn test_valid_function_passes() {
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let x = b.number(1.0);
        let y = b.number(2.0);
        let s = b.binary(BinaryOp::Add, x, y);
        b.ret(Some(s));
        assert!(verify_module(single(func)).is_ok());
    }

    #[test]
    fn test_use_not_dominated() {
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_block();
        let p = b.param("a0");
        b.branch(p, left, right);
        b.switch_to_block(left);
        let only_left = b.number(1.0);
        b.jump(join);
        b.switch_to_block(right);
        b.jump(join);
        b.switch_to_block(join);
        b.ret(Some(only_left));

        assert_eq!(kinds(&single(func)), vec![VerificationErrorKind::UseNotDominated(only_left)]);
    }

    #[test]
    fn test_duplicate_and_undefined() {
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let x = b.number(1.0);
        b.emit(IrOp::Const { dest: x, value: Literal::Null });
        b.ret(Some(ValueId(99)));
        let found = kinds(&single(func));
        assert!(found.contains(&VerificationErrorKind::DuplicateDefinition(x)));
        assert!(found.contains(&VerificationErrorKind::UndefinedValue(ValueId(99))));
    }

    #[test]
    fn test_structural_errors() {
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let x = b.number(1.0);
        b.emit(IrOp::CallDirect { dest: ValueId(50), func: FuncId(7), args: vec![x] });
        b.jump(BlockId(0));
        func.locals.clear();
        func.block_mut(BlockId(0)).ops.push(IrOp::StoreLocal { slot: 4, value: x });
        func.block_mut(BlockId(0)).terminator = Terminator::Jump(BlockId(9));
        let found = kinds(&single(func));
        assert!(found.contains(&VerificationErrorKind::InvalidDirectCall(FuncId(7))));
        assert!(found.contains(&VerificationErrorKind::InvalidLocalSlot(4)));
        assert!(found.contains(&VerificationErrorKind::InvalidBlockTarget(BlockId(9))));
    }

    #[test]
    fn test_entry_with_predecessor() {
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let next = b.create_block();
        b.jump(next);
        b.switch_to_block(next);
        b.jump(BlockId(0));
        assert_eq!(kinds(&single(func)), vec![VerificationErrorKind::EntryHasPredecessors]);
    }

    #[test]
    fn test_phi_from_non_predecessor() {
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let next = b.create_block();
        let x = b.number(1.0);
        b.jump(next);
        b.switch_to_block(next);
        let phi = b.phi_in(next, vec![(BlockId(0), x), (BlockId(5), x)]);
        b.ret(Some(phi));
        assert_eq!(kinds(&single(func)), vec![VerificationErrorKind::InvalidPhi(BlockId(5))]);
    }

    #[test]
    fn test_error_display_has_location() {
        let error = VerificationError {
            function: "main".into(),
            block: Some(BlockId(2)),
            op_index: Some(3),
            kind: VerificationErrorKind::UseAfterMove(ValueId(4)),
        };
        assert_eq!(error.to_string(), "in main at bb2#3: use of moved value v4");
    }
}
