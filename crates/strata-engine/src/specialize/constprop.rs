//! Constant propagation through copies and local slots
//!
//! Forward dataflow over a three-level lattice. Slots start out holding
//! `undefined`; block entries meet their predecessors' exit states. Heap
//! and global storage are never followed. Slots and values that feed an
//! ownership operation are left alone so the verifier still sees every
//! load of a possibly moved binding.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::analysis::Cfg;
use crate::ir::{IrFunction, IrOp, Literal, ValueId};

#[derive(Debug, Clone, PartialEq)]
enum Lattice {
    /// No information yet
    Unknown,
    Const(Literal),
    /// More than one possible value
    Varying,
}

impl Lattice {
    fn meet(&self, other: &Lattice) -> Lattice {
        match (self, other) {
            (Lattice::Unknown, x) | (x, Lattice::Unknown) => x.clone(),
            (Lattice::Const(a), Lattice::Const(b)) if a == b => Lattice::Const(a.clone()),
            _ => Lattice::Varying,
        }
    }
}

type SlotState = Vec<Lattice>;

fn meet_states(a: &SlotState, b: &SlotState) -> SlotState {
    a.iter().zip(b).map(|(x, y)| x.meet(y)).collect()
}

/// Slots loaded into a value the ownership checker tracks
fn ownership_slots(func: &IrFunction, values: &FxHashSet<ValueId>) -> FxHashSet<u32> {
    func.blocks
        .iter()
        .flat_map(|b| &b.ops)
        .filter_map(|op| match op {
            IrOp::LoadLocal { dest, slot } if values.contains(dest) => Some(*slot),
            _ => None,
        })
        .collect()
}

/// Rewrite loads and copies of known constants into constants, and calls
/// through a known function literal into direct calls. Returns whether
/// anything changed.
pub fn propagate_constants(func: &mut IrFunction) -> bool {
    if func.blocks.is_empty() {
        return false;
    }
    let cfg = Cfg::compute(func);
    let slot_count = func.locals.len();
    let tainted_values = func.ownership_sources();
    let tainted_slots = ownership_slots(func, &tainted_values);

    let mut values: FxHashMap<ValueId, Lattice> = FxHashMap::default();
    let mut exit_states: Vec<Option<SlotState>> = vec![None; func.blocks.len()];
    let initial: SlotState = vec![Lattice::Const(Literal::Undefined); slot_count];

    let mut changed = true;
    while changed {
        changed = false;
        for &block_id in &cfg.rpo {
            let mut state = if block_id == func.entry() {
                initial.clone()
            } else {
                let mut merged: Option<SlotState> = None;
                for pred in cfg.preds(block_id) {
                    if let Some(exit) = &exit_states[pred.index()] {
                        merged = Some(match merged {
                            None => exit.clone(),
                            Some(m) => meet_states(&m, exit),
                        });
                    }
                }
                merged.unwrap_or_else(|| vec![Lattice::Unknown; slot_count])
            };

            for op in &func.block(block_id).ops {
                let result = match op {
                    IrOp::Const { value, .. } => Some(Lattice::Const(value.clone())),
                    IrOp::Copy { src, .. } => Some(values.get(src).cloned().unwrap_or(Lattice::Unknown)),
                    IrOp::LoadLocal { slot, .. } => {
                        Some(state.get(*slot as usize).cloned().unwrap_or(Lattice::Varying))
                    }
                    IrOp::Phi { incoming, .. } => Some(incoming.iter().fold(Lattice::Unknown, |acc, (_, v)| {
                        acc.meet(&values.get(v).cloned().unwrap_or(Lattice::Unknown))
                    })),
                    IrOp::StoreLocal { slot, value } => {
                        if let Some(entry) = state.get_mut(*slot as usize) {
                            *entry = values.get(value).cloned().unwrap_or(Lattice::Unknown);
                        }
                        None
                    }
                    other => other.dest().map(|_| Lattice::Varying),
                };
                if let (Some(dest), Some(result)) = (op.dest(), result) {
                    let previous = values.get(&dest);
                    if previous != Some(&result) {
                        values.insert(dest, result);
                        changed = true;
                    }
                }
            }

            if exit_states[block_id.index()].as_ref() != Some(&state) {
                exit_states[block_id.index()] = Some(state);
                changed = true;
            }
        }
    }

    let constant = |v: &ValueId| match values.get(v) {
        Some(Lattice::Const(lit)) => Some(lit.clone()),
        _ => None,
    };

    let mut rewritten = false;
    for block in &mut func.blocks {
        for op in &mut block.ops {
            let replacement = match op {
                IrOp::LoadLocal { dest, slot } if !tainted_slots.contains(slot) => {
                    constant(dest).map(|value| IrOp::Const { dest: *dest, value })
                }
                IrOp::Copy { dest, src } if !tainted_values.contains(src) => {
                    constant(dest).map(|value| IrOp::Const { dest: *dest, value })
                }
                IrOp::Call { dest, callee, args } => match constant(callee) {
                    Some(Literal::Function(target)) => {
                        Some(IrOp::CallDirect { dest: *dest, func: target, args: std::mem::take(args) })
                    }
                    _ => None,
                },
                _ => None,
            };
            if let Some(new_op) = replacement {
                *op = new_op;
                rewritten = true;
            }
        }
    }
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FuncId, IrBuilder};

    #[test]
    fn test_slot_store_load_chain() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let f = b.constant(Literal::Function(FuncId(1)));
        b.store_local(0, f);
        let loaded = b.load_local(0);
        let n = b.number(2.0);
        let result = b.call(loaded, vec![n]);
        b.ret(Some(result));

        assert!(propagate_constants(&mut func));
        let ops = &func.blocks[0].ops;
        assert_eq!(ops[2], IrOp::Const { dest: loaded, value: Literal::Function(FuncId(1)) });
        assert_eq!(ops[4], IrOp::CallDirect { dest: result, func: FuncId(1), args: vec![n] });
        assert!(!propagate_constants(&mut func));
    }

    #[test]
    fn test_unwritten_slot_is_undefined() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let loaded = b.load_local(3);
        b.ret(Some(loaded));
        propagate_constants(&mut func);
        assert_eq!(func.blocks[0].ops[0], IrOp::Const { dest: loaded, value: Literal::Undefined });
    }

    #[test]
    fn test_disagreeing_paths_stay_dynamic() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_block();
        let p = b.param("a0");
        b.branch(p, left, right);
        b.switch_to_block(left);
        let one = b.number(1.0);
        b.store_local(0, one);
        b.jump(join);
        b.switch_to_block(right);
        let two = b.number(2.0);
        b.store_local(0, two);
        b.jump(join);
        b.switch_to_block(join);
        let loaded = b.load_local(0);
        b.ret(Some(loaded));

        assert!(!propagate_constants(&mut func));
        assert!(matches!(func.blocks[3].ops[0], IrOp::LoadLocal { .. }));
    }

    #[test]
    fn test_moved_slot_is_not_rewritten() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let s = b.constant(Literal::String("s".into()));
        b.store_local(0, s);
        let first = b.load_local(0);
        b.ownership(|dest| IrOp::Move { dest, src: first }, first);
        let second = b.load_local(0);
        b.print(second);
        b.ret(None);

        propagate_constants(&mut func);
        assert!(func.blocks[0]
            .ops
            .iter()
            .all(|op| !matches!(op, IrOp::Const { dest, .. } if *dest == second)));
    }
}
