//! Ownership and borrow checking
//!
//! A forward dataflow over reachable blocks. Each binding (an SSA value, or
//! a local slot whose content was loaded) carries an [`Ownership`] state;
//! live borrows are tracked by the value that holds them. States only grow
//! at merges (moved on any path means moved), so the fixpoint terminates.
//! Values of copy types never tombstone.

use rustc_hash::FxHashMap;

use super::{Reporter, VerificationErrorKind};
use crate::analysis::Cfg;
use crate::ir::{BlockId, IrFunction, IrOp, Ownership, StorageClass, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Binding {
    Value(ValueId),
    Slot(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiveBorrow {
    target: Binding,
    mutable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct State {
    status: FxHashMap<Binding, Ownership>,
    borrows: FxHashMap<ValueId, LiveBorrow>,
}

impl State {
    fn get(&self, binding: Binding) -> Ownership {
        self.status.get(&binding).copied().unwrap_or(Ownership::Owned)
    }

    fn join(&mut self, other: &State) -> bool {
        let mut changed = false;
        for (binding, theirs) in &other.status {
            let ours = self.get(*binding);
            let merged = match (ours, *theirs) {
                (Ownership::Moved, _) | (_, Ownership::Moved) => Ownership::Moved,
                (Ownership::Captured, _) | (_, Ownership::Captured) => Ownership::Captured,
                (ours, _) => ours,
            };
            if merged != ours {
                self.status.insert(*binding, merged);
                changed = true;
            }
        }
        for (borrow, live) in &other.borrows {
            if !self.borrows.contains_key(borrow) {
                self.borrows.insert(*borrow, *live);
                changed = true;
            }
        }
        changed
    }

    fn borrowed(&self, target: Binding) -> impl Iterator<Item = &LiveBorrow> {
        self.borrows.values().filter(move |b| b.target == target)
    }
}

/// Static facts the transfer function needs
struct Facts<'f> {
    func: &'f IrFunction,
    /// Copy destinations mapped to the value they copy
    copies: FxHashMap<ValueId, ValueId>,
    /// Loaded values mapped to their slot
    loads: FxHashMap<ValueId, u32>,
}

impl<'f> Facts<'f> {
    fn new(func: &'f IrFunction) -> Self {
        let mut copies = FxHashMap::default();
        let mut loads = FxHashMap::default();
        for op in func.blocks.iter().flat_map(|b| &b.ops) {
            match op {
                IrOp::Copy { dest, src } => {
                    copies.insert(*dest, *src);
                }
                IrOp::LoadLocal { dest, slot } => {
                    loads.insert(*dest, *slot);
                }
                _ => {}
            }
        }
        Facts { func, copies, loads }
    }

    fn root(&self, mut value: ValueId) -> ValueId {
        // Copy chains are acyclic in verified SSA; the bound guards malformed input.
        for _ in 0..=self.copies.len() {
            match self.copies.get(&value) {
                Some(src) => value = *src,
                None => break,
            }
        }
        value
    }

    /// Binding a borrow or move of `value` acts on
    fn target(&self, value: ValueId) -> Binding {
        let root = self.root(value);
        match self.loads.get(&root) {
            Some(slot) => Binding::Slot(*slot),
            None => Binding::Value(root),
        }
    }

    fn moves_out(&self, value: ValueId) -> bool {
        StorageClass::derive(self.func.value_type(value), Ownership::Owned).has_move_semantics()
    }
}

/// Apply one op to `state`, reporting violations through `report`
fn transfer(
    facts: &Facts<'_>,
    state: &mut State,
    op: &IrOp,
    report: &mut dyn FnMut(VerificationErrorKind),
) {
    if !op.is_phi() {
        op.for_each_use(|value| {
            if state.get(Binding::Value(facts.root(value))) == Ownership::Moved {
                report(VerificationErrorKind::UseAfterMove(value));
            }
        });
    }

    match op {
        IrOp::LoadLocal { slot, .. } => {
            if state.get(Binding::Slot(*slot)) == Ownership::Moved {
                report(VerificationErrorKind::LoadOfMovedLocal(*slot));
            }
        }
        IrOp::StoreLocal { slot, .. } => {
            state.status.remove(&Binding::Slot(*slot));
        }
        IrOp::Move { src, .. } => {
            let root = facts.root(*src);
            let target = facts.target(*src);
            if state.borrowed(target).next().is_some() {
                report(VerificationErrorKind::MoveWhileBorrowed(*src));
            }
            if state.get(Binding::Value(root)) == Ownership::Captured || state.get(target) == Ownership::Captured {
                report(VerificationErrorKind::MoveOfCaptured(*src));
            }
            if facts.moves_out(*src) {
                state.status.insert(Binding::Value(root), Ownership::Moved);
                if let Binding::Slot(_) = target {
                    state.status.insert(target, Ownership::Moved);
                }
            }
        }
        IrOp::Borrow { dest, src } | IrOp::BorrowMut { dest, src } => {
            let mutable = matches!(op, IrOp::BorrowMut { .. });
            let target = facts.target(*src);
            if state.borrowed(target).any(|live| live.mutable || mutable) {
                report(VerificationErrorKind::BorrowConflict(*src));
            }
            state.borrows.insert(*dest, LiveBorrow { target, mutable });
        }
        IrOp::EndBorrow { borrow } => {
            if state.borrows.remove(&facts.root(*borrow)).is_none() {
                report(VerificationErrorKind::NotABorrow(*borrow));
            }
        }
        IrOp::MakeClosure { env, .. } => {
            let root = facts.root(*env);
            if state.get(Binding::Value(root)) != Ownership::Moved {
                state.status.insert(Binding::Value(root), Ownership::Captured);
            }
        }
        _ => {}
    }
}

/// Incoming value `phi` takes on the edge from `pred`
fn incoming_from(op: &IrOp, pred: BlockId) -> Option<ValueId> {
    match op {
        IrOp::Phi { incoming, .. } => incoming.iter().find(|(from, _)| *from == pred).map(|(_, v)| *v),
        _ => None,
    }
}

/// State on the edge `pred -> succ`: each phi destination takes the status of
/// the value flowing in from `pred`
fn edge_state(facts: &Facts<'_>, state: &State, pred: BlockId, succ: BlockId) -> State {
    let mut edge = state.clone();
    for op in facts.func.block(succ).ops.iter().take_while(|op| op.is_phi()) {
        let (Some(dest), Some(value)) = (op.dest(), incoming_from(op, pred)) else {
            continue;
        };
        match state.get(Binding::Value(facts.root(value))) {
            Ownership::Owned => edge.status.remove(&Binding::Value(dest)),
            status => edge.status.insert(Binding::Value(dest), status),
        };
    }
    edge
}

/// Run the ownership dataflow and report violations at reachable ops
pub(super) fn check(func: &IrFunction, cfg: &Cfg, reporter: &mut Reporter<'_>) {
    let facts = Facts::new(func);
    let mut entry_states: Vec<Option<State>> = vec![None; func.blocks.len()];
    entry_states[func.entry().index()] = Some(State::default());

    let mut changed = true;
    while changed {
        changed = false;
        for &block_id in &cfg.rpo {
            let Some(mut state) = entry_states[block_id.index()].clone() else {
                continue;
            };
            let block = func.block(block_id);
            for op in &block.ops {
                transfer(&facts, &mut state, op, &mut |_| {});
            }
            for &succ in cfg.succs(block_id) {
                let edge = edge_state(&facts, &state, block_id, succ);
                let entry = &mut entry_states[succ.index()];
                match entry {
                    Some(existing) => changed |= existing.join(&edge),
                    None => {
                        *entry = Some(edge);
                        changed = true;
                    }
                }
            }
        }
    }

    for &block_id in &cfg.rpo {
        let Some(mut state) = entry_states[block_id.index()].clone() else {
            continue;
        };
        let block = func.block(block_id);
        for (index, op) in block.ops.iter().enumerate() {
            transfer(&facts, &mut state, op, &mut |kind| reporter.at(block_id, index, kind));
        }
        let end = block.ops.len();
        block.terminator.for_each_use(|value| {
            if state.get(Binding::Value(facts.root(value))) == Ownership::Moved {
                reporter.at(block_id, end, VerificationErrorKind::UseAfterMove(value));
            }
        });
        for &succ in cfg.succs(block_id) {
            for op in func.block(succ).ops.iter().take_while(|op| op.is_phi()) {
                if let Some(value) = incoming_from(op, block_id) {
                    if state.get(Binding::Value(facts.root(value))) == Ownership::Moved {
                        reporter.at(block_id, end, VerificationErrorKind::UseAfterMove(value));
                    }
                }
            }
        }
    }
}
