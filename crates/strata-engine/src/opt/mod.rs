//! Fixed-point optimizer over SSA IR
//!
//! Each pass implements [`OptPass`] and reports whether it changed the
//! function. The pipeline runs the passes in a fixed order and repeats
//! until a full round changes nothing or the iteration bound is hit.

mod cfg_passes;
mod cse;
mod dce;
mod fold;

pub use cfg_passes::{BranchSimplification, UnreachableBlockElimination};
pub use cse::CommonSubexpressionElimination;
pub use dce::{CopyPropagation, DeadCodeElimination};
pub use fold::{fold_binary, fold_unary, literal_truthiness, ConstantFolding};

use crate::ir::{IrFunction, IrModule};

/// Default bound on optimizer rounds
pub const DEFAULT_MAX_ITERATIONS: usize = 8;

/// An optimization pass on IR
pub trait OptPass: Send + Sync {
    /// Name of this pass (for diagnostics)
    fn name(&self) -> &str;
    /// Run the pass, mutating the function in place; true if anything changed
    fn run(&self, func: &mut IrFunction) -> bool;
}

/// Summary of one optimizer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptStats {
    pub iterations: usize,
    pub changes: usize,
}

/// Optimizer that runs a sequence of passes to a fixed point
pub struct Optimizer {
    passes: Vec<Box<dyn OptPass>>,
    max_iterations: usize,
}

impl Optimizer {
    /// Create an optimizer with the default pass pipeline
    pub fn new(max_iterations: usize) -> Self {
        Optimizer {
            passes: vec![
                Box::new(CopyPropagation),
                Box::new(ConstantFolding),
                Box::new(CommonSubexpressionElimination),
                Box::new(BranchSimplification),
                Box::new(UnreachableBlockElimination),
                Box::new(DeadCodeElimination),
            ],
            max_iterations: max_iterations.max(1),
        }
    }

    /// Create an empty optimizer (no passes)
    pub fn empty() -> Self {
        Optimizer { passes: vec![], max_iterations: 1 }
    }

    /// Add a pass to the pipeline
    pub fn add_pass(&mut self, pass: Box<dyn OptPass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes until nothing changes
    pub fn optimize_function(&self, func: &mut IrFunction) -> OptStats {
        let mut stats = OptStats::default();
        while stats.iterations < self.max_iterations {
            stats.iterations += 1;
            let mut changed = false;
            for pass in &self.passes {
                if pass.run(func) {
                    tracing::debug!(function = %func.name, pass = pass.name(), "pass changed function");
                    stats.changes += 1;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        stats
    }

    /// Optimize every function; true if any function changed
    pub fn optimize_module(&self, module: &mut IrModule) -> bool {
        let mut changed = false;
        for func in &mut module.functions {
            let stats = self.optimize_function(func);
            tracing::debug!(
                function = %func.name,
                iterations = stats.iterations,
                changes = stats.changes,
                "optimized function"
            );
            changed |= stats.changes > 0;
        }
        changed
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ITERATIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{serialize_module, BinaryOp, IrBuilder, IrModule, Literal, OperandKind, IrOp};

    #[test]
    fn test_pass_order() {
        let optimizer = Optimizer::default();
        let names = optimizer.pass_names();
        assert_eq!(
            names,
            vec![
                "copy-propagation",
                "constant-folding",
                "cse",
                "branch-simplification",
                "unreachable-block-elimination",
                "dce"
            ]
        );
    }

    #[test]
    fn test_add_num_folds_to_seven() {
        let mut module = IrModule::new("m");
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let x = b.number(3.0);
        let y = b.number(4.0);
        let dest = b.alloc_value(crate::ir::IrType::Number);
        b.emit(IrOp::Binary { dest, op: BinaryOp::Add, kind: OperandKind::Num, lhs: x, rhs: y });
        b.ret(Some(dest));
        module.add_function(func);

        assert!(Optimizer::default().optimize_module(&mut module));
        let main = &module.functions[0];
        assert_eq!(main.blocks[0].ops, vec![IrOp::Const { dest, value: Literal::Number(7.0) }]);

        let once = serialize_module(&module);
        assert!(!Optimizer::default().optimize_module(&mut module));
        assert_eq!(once, serialize_module(&module));
    }
}
