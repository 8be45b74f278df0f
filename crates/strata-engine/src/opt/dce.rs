//! Copy propagation and dead code elimination

use rustc_hash::{FxHashMap, FxHashSet};

use super::OptPass;
use crate::ir::{IrFunction, IrOp, ValueId};

/// Rewrites uses of `copy` results to the original value and turns phis
/// with a single distinct input into copies
pub struct CopyPropagation;

impl OptPass for CopyPropagation {
    fn name(&self) -> &str {
        "copy-propagation"
    }

    fn run(&self, func: &mut IrFunction) -> bool {
        let mut changed = false;

        for block in &mut func.blocks {
            let mut converted = Vec::new();
            block.ops.retain(|op| {
                if let IrOp::Phi { dest, incoming } = op {
                    let mut inputs = incoming.iter().map(|(_, v)| *v).filter(|v| v != dest);
                    if let Some(first) = inputs.next() {
                        if inputs.all(|v| v == first) {
                            converted.push(IrOp::Copy { dest: *dest, src: first });
                            return false;
                        }
                    }
                }
                true
            });
            if !converted.is_empty() {
                let at = block.phi_count();
                block.ops.splice(at..at, converted);
                changed = true;
            }
        }

        let mut copies: FxHashMap<ValueId, ValueId> = FxHashMap::default();
        for op in func.blocks.iter().flat_map(|b| &b.ops) {
            if let IrOp::Copy { dest, src } = op {
                copies.insert(*dest, *src);
            }
        }
        if copies.is_empty() {
            return changed;
        }
        let root = |mut v: ValueId| {
            // Chains are acyclic in SSA; the bound guards malformed input.
            for _ in 0..copies.len() {
                match copies.get(&v) {
                    Some(&src) if src != v => v = src,
                    _ => break,
                }
            }
            v
        };

        func.replace_uses(|v| {
            let r = root(v);
            if r != v {
                changed = true;
            }
            r
        });
        changed
    }
}

/// Removes side-effect-free operations whose results are never used.
/// Liveness is propagated from side effects and terminators, so dead phi
/// cycles disappear too.
pub struct DeadCodeElimination;

impl OptPass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dce"
    }

    fn run(&self, func: &mut IrFunction) -> bool {
        let mut defs: FxHashMap<ValueId, &IrOp> = FxHashMap::default();
        let mut worklist: Vec<ValueId> = Vec::new();
        for block in &func.blocks {
            for op in &block.ops {
                if let Some(dest) = op.dest() {
                    defs.insert(dest, op);
                }
                if op.has_side_effects() {
                    op.for_each_use(|v| worklist.push(v));
                }
            }
            block.terminator.for_each_use(|v| worklist.push(v));
        }

        let mut live: FxHashSet<ValueId> = FxHashSet::default();
        while let Some(value) = worklist.pop() {
            if live.insert(value) {
                if let Some(op) = defs.get(&value) {
                    op.for_each_use(|v| worklist.push(v));
                }
            }
        }

        let mut changed = false;
        for block in &mut func.blocks {
            let before = block.ops.len();
            block.ops.retain(|op| match op.dest() {
                Some(dest) => op.has_side_effects() || live.contains(&dest),
                None => true,
            });
            changed |= block.ops.len() != before;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, BlockId, IrBuilder, Terminator};

    #[test]
    fn test_copy_chain_resolves_to_root() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let x = b.number(1.0);
        let c1 = b.copy(x);
        let c2 = b.copy(c1);
        b.print(c2);
        b.ret(Some(c1));

        assert!(CopyPropagation.run(&mut func));
        assert_eq!(func.blocks[0].ops[3], IrOp::Print { value: x });
        assert_eq!(func.blocks[0].terminator, Terminator::Return(Some(x)));
        assert!(!CopyPropagation.run(&mut func));
        assert!(DeadCodeElimination.run(&mut func));
        assert_eq!(func.blocks[0].ops.len(), 2);
    }

    #[test]
    fn test_single_input_phi_becomes_copy() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let header = b.create_block();
        let x = b.number(1.0);
        b.jump(header);
        b.switch_to_block(header);
        let phi = b.alloc_value(crate::ir::IrType::Any);
        b.emit(IrOp::Phi { dest: phi, incoming: vec![(BlockId(0), x), (header, phi)] });
        b.print(phi);
        b.jump(header);

        assert!(CopyPropagation.run(&mut func));
        assert_eq!(func.blocks[1].ops[0], IrOp::Copy { dest: phi, src: x });
        assert_eq!(func.blocks[1].ops[1], IrOp::Print { value: x });
    }

    #[test]
    fn test_dead_phi_cycle_removed() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let header = b.create_block();
        let exit = b.create_block();
        let zero = b.number(0.0);
        let one = b.number(1.0);
        b.jump(header);
        b.switch_to_block(header);
        let phi = b.alloc_value(crate::ir::IrType::Any);
        let next = b.binary(BinaryOp::Add, phi, one);
        b.func_mut().block_mut(header).ops.insert(0, IrOp::Phi { dest: phi, incoming: vec![(BlockId(0), zero), (header, next)] });
        let cond = b.number(1.0);
        b.branch(cond, header, exit);
        b.switch_to_block(exit);
        b.ret(None);

        assert!(DeadCodeElimination.run(&mut func));
        assert!(func.blocks[1].ops.iter().all(|op| !op.is_phi()));
        assert!(func.blocks[0].ops.is_empty());
    }
}
