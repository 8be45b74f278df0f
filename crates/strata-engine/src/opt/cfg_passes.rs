//! Control-flow cleanup: constant branches and unreachable blocks

use super::fold::{constants, literal_truthiness};
use super::OptPass;
use crate::analysis::Cfg;
use crate::ir::{BlockId, IrFunction, IrOp, Terminator};

/// Drop the phi inputs that `pred` feeds into `block`
fn prune_phi_inputs(func: &mut IrFunction, block: BlockId, pred: BlockId) {
    if !func.has_block(block) {
        return;
    }
    for op in &mut func.block_mut(block).ops {
        if let IrOp::Phi { incoming, .. } = op {
            incoming.retain(|(from, _)| *from != pred);
        }
    }
}

/// Turns branches on constants, and branches whose targets agree, into jumps
pub struct BranchSimplification;

impl OptPass for BranchSimplification {
    fn name(&self) -> &str {
        "branch-simplification"
    }

    fn run(&self, func: &mut IrFunction) -> bool {
        let known = constants(func);
        let mut changed = false;

        for index in 0..func.blocks.len() {
            let block_id = BlockId(index as u32);
            let Terminator::Branch { cond, then_block, else_block } = func.blocks[index].terminator else {
                continue;
            };
            let (target, dropped) = if then_block == else_block {
                (then_block, None)
            } else if let Some(literal) = known.get(&cond) {
                if literal_truthiness(literal) {
                    (then_block, Some(else_block))
                } else {
                    (else_block, Some(then_block))
                }
            } else {
                continue;
            };
            func.blocks[index].terminator = Terminator::Jump(target);
            if let Some(dropped) = dropped {
                prune_phi_inputs(func, dropped, block_id);
            }
            changed = true;
        }
        changed
    }
}

/// Removes blocks unreachable from the entry and renumbers the rest
pub struct UnreachableBlockElimination;

impl OptPass for UnreachableBlockElimination {
    fn name(&self) -> &str {
        "unreachable-block-elimination"
    }

    fn run(&self, func: &mut IrFunction) -> bool {
        if func.blocks.is_empty() {
            return false;
        }
        let cfg = Cfg::compute(func);
        if cfg.reachable.iter().all(|&r| r) {
            return false;
        }
        func.retain_blocks(&cfg.reachable);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, Literal};

    #[test]
    fn test_constant_branch_prunes_phi_and_block() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let cond = b.constant(Literal::Boolean(false));
        b.branch(cond, then_b, else_b);
        b.switch_to_block(then_b);
        let one = b.number(1.0);
        b.jump(join);
        b.switch_to_block(else_b);
        let two = b.number(2.0);
        b.jump(join);
        b.switch_to_block(join);
        let phi = b.phi_in(join, vec![(then_b, one), (else_b, two)]);
        b.ret(Some(phi));

        assert!(BranchSimplification.run(&mut func));
        assert_eq!(func.blocks[0].terminator, Terminator::Jump(else_b));
        assert!(UnreachableBlockElimination.run(&mut func));
        assert_eq!(func.blocks.len(), 3);
        // else_b is now bb1, join is bb2
        assert_eq!(
            func.blocks[2].ops[0],
            IrOp::Phi { dest: phi, incoming: vec![(BlockId(1), two)] }
        );
        assert!(!BranchSimplification.run(&mut func));
        assert!(!UnreachableBlockElimination.run(&mut func));
    }

    #[test]
    fn test_identical_targets() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let next = b.create_block();
        let p = b.param("a0");
        b.branch(p, next, next);
        b.switch_to_block(next);
        b.ret(None);
        assert!(BranchSimplification.run(&mut func));
        assert_eq!(func.blocks[0].terminator, Terminator::Jump(next));
    }
}
