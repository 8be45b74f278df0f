//! Common subexpression elimination over the dominator tree
//!
//! A scoped table maps each pure computation to the value that first
//! computed it; a duplicate in a dominated block is rewritten into a copy
//! of that value. Values the ownership checker tracks are never merged.

use rustc_hash::FxHashMap;

use super::OptPass;
use crate::analysis::{Cfg, DomTree};
use crate::ir::{BinaryOp, BlockId, IrFunction, IrOp, Literal, OperandKind, UnaryOp, ValueId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ExprKey {
    Const(Literal),
    Binary(BinaryOp, OperandKind, ValueId, ValueId),
    Unary(UnaryOp, OperandKind, ValueId),
    LoadEnv,
}

fn key_of(op: &IrOp) -> Option<ExprKey> {
    if !op.is_cse_candidate() {
        return None;
    }
    Some(match op {
        IrOp::Const { value, .. } => ExprKey::Const(value.clone()),
        IrOp::Binary { op, kind, lhs, rhs, .. } => {
            let (a, b) = if op.is_commutative(*kind) && rhs < lhs { (*rhs, *lhs) } else { (*lhs, *rhs) };
            ExprKey::Binary(*op, *kind, a, b)
        }
        IrOp::Unary { op, kind, operand, .. } => ExprKey::Unary(*op, *kind, *operand),
        IrOp::LoadEnv { .. } => ExprKey::LoadEnv,
        _ => return None,
    })
}

pub struct CommonSubexpressionElimination;

enum Visit {
    Enter(BlockId),
    Exit(Vec<ExprKey>),
}

impl OptPass for CommonSubexpressionElimination {
    fn name(&self) -> &str {
        "cse"
    }

    fn run(&self, func: &mut IrFunction) -> bool {
        if func.blocks.is_empty() {
            return false;
        }
        let cfg = Cfg::compute(func);
        let dom = DomTree::compute(&cfg);
        let tracked = func.ownership_sources();

        let mut table: FxHashMap<ExprKey, ValueId> = FxHashMap::default();
        let mut stack = vec![Visit::Enter(func.entry())];
        let mut changed = false;

        while let Some(visit) = stack.pop() {
            let block_id = match visit {
                Visit::Enter(block) => block,
                Visit::Exit(keys) => {
                    for key in keys {
                        table.remove(&key);
                    }
                    continue;
                }
            };

            let mut inserted = Vec::new();
            for op in &mut func.block_mut(block_id).ops {
                let Some(dest) = op.dest() else { continue };
                if tracked.contains(&dest) {
                    continue;
                }
                let Some(key) = key_of(op) else { continue };
                match table.get(&key) {
                    Some(&existing) => {
                        *op = IrOp::Copy { dest, src: existing };
                        changed = true;
                    }
                    None => {
                        table.insert(key.clone(), dest);
                        inserted.push(key);
                    }
                }
            }

            stack.push(Visit::Exit(inserted));
            for &child in dom.children(block_id).iter().rev() {
                stack.push(Visit::Enter(child));
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrBuilder;

    #[test]
    fn test_dominated_duplicate_becomes_copy() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let next = b.create_block();
        let x = b.param("a0");
        let y = b.param("a1");
        let first = b.binary(BinaryOp::Add, x, y);
        b.jump(next);
        b.switch_to_block(next);
        let second = b.binary(BinaryOp::Add, x, y);
        b.print(first);
        b.ret(Some(second));

        assert!(CommonSubexpressionElimination.run(&mut func));
        assert_eq!(func.blocks[1].ops[0], IrOp::Copy { dest: second, src: first });
        assert!(!CommonSubexpressionElimination.run(&mut func));
    }

    #[test]
    fn test_sibling_branches_do_not_share() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let left = b.create_block();
        let right = b.create_block();
        let p = b.param("a0");
        b.branch(p, left, right);
        b.switch_to_block(left);
        let l = b.unary(UnaryOp::Neg, p);
        b.ret(Some(l));
        b.switch_to_block(right);
        let r = b.unary(UnaryOp::Neg, p);
        b.ret(Some(r));

        assert!(!CommonSubexpressionElimination.run(&mut func));
    }

    #[test]
    fn test_any_add_is_not_commuted() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let x = b.param("a0");
        let y = b.param("a1");
        let xy = b.binary(BinaryOp::Add, x, y);
        let yx = b.binary(BinaryOp::Add, y, x);
        b.print(xy);
        b.ret(Some(yx));
        // String concatenation is not commutative.
        assert!(!CommonSubexpressionElimination.run(&mut func));
    }
}
