//! Flow-sensitive type inference
//!
//! Forward dataflow from `Never` upward. Local slot types are tracked per
//! program point and joined at block entries; slots hold `undefined`
//! (typed `Any`) on entry. Return types are solved module-wide so a
//! `call.direct` result carries its callee's return type.

use rustc_hash::FxHashMap;

use crate::analysis::Cfg;
use crate::ir::{literal_type, BinaryOp, IrFunction, IrModule, IrOp, IrType, Terminator, UnaryOp, ValueId};

/// Inference result for one function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTypes {
    pub values: FxHashMap<ValueId, IrType>,
    /// Join of every type stored into each slot (`Any` if never written)
    pub slots: Vec<IrType>,
    pub return_ty: IrType,
}

impl FunctionTypes {
    pub fn of(&self, value: ValueId) -> IrType {
        self.values.get(&value).copied().unwrap_or(IrType::Never)
    }
}

fn binary_result(op: BinaryOp, lhs: IrType, rhs: IrType) -> IrType {
    match op {
        BinaryOp::Add => match (lhs, rhs) {
            (IrType::Never, _) | (_, IrType::Never) => IrType::Never,
            (IrType::Number, IrType::Number) => IrType::Number,
            (IrType::String, _) | (_, IrType::String) => IrType::String,
            _ => IrType::Any,
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => IrType::Number,
        _ => IrType::Boolean,
    }
}

fn unary_result(op: UnaryOp) -> IrType {
    match op {
        UnaryOp::Neg => IrType::Number,
        UnaryOp::Not => IrType::Boolean,
    }
}

/// Infer value and slot types of `func` given the current callee return types
pub fn infer_function(func: &IrFunction, returns: &[IrType]) -> FunctionTypes {
    let cfg = Cfg::compute(func);
    let slot_count = func.locals.len();
    let mut values: FxHashMap<ValueId, IrType> = FxHashMap::default();
    let mut exit_states: Vec<Option<Vec<IrType>>> = vec![None; func.blocks.len()];
    let mut stored = vec![IrType::Never; slot_count];

    let mut changed = true;
    while changed {
        changed = false;
        for &block_id in &cfg.rpo {
            let mut state = if block_id == func.entry() {
                vec![IrType::Any; slot_count]
            } else {
                let mut merged = vec![IrType::Never; slot_count];
                for pred in cfg.preds(block_id) {
                    if let Some(exit) = &exit_states[pred.index()] {
                        for (slot, ty) in merged.iter_mut().zip(exit) {
                            *slot = slot.join(*ty);
                        }
                    }
                }
                merged
            };

            for op in &func.block(block_id).ops {
                let ty_of = |v: &ValueId| values.get(v).copied().unwrap_or(IrType::Never);
                let result = match op {
                    IrOp::Const { value, .. } => literal_type(value),
                    IrOp::Param { .. } | IrOp::LoadGlobal { .. } | IrOp::LoadEnv { .. } => IrType::Any,
                    IrOp::GetProp { .. } | IrOp::GetElem { .. } | IrOp::Call { .. } => IrType::Any,
                    IrOp::Binary { op, lhs, rhs, .. } => binary_result(*op, ty_of(lhs), ty_of(rhs)),
                    IrOp::Unary { op, .. } => unary_result(*op),
                    IrOp::Copy { src, .. }
                    | IrOp::Move { src, .. }
                    | IrOp::Clone { src, .. }
                    | IrOp::Borrow { src, .. }
                    | IrOp::BorrowMut { src, .. } => ty_of(src),
                    IrOp::Phi { incoming, .. } => {
                        incoming.iter().fold(IrType::Never, |acc, (_, v)| acc.join(ty_of(v)))
                    }
                    IrOp::LoadLocal { slot, .. } => state.get(*slot as usize).copied().unwrap_or(IrType::Any),
                    IrOp::NewObject { .. } => IrType::Object,
                    IrOp::NewArray { .. } => IrType::Array,
                    IrOp::MakeClosure { .. } => IrType::Function,
                    IrOp::CallDirect { func, .. } => returns.get(func.index()).copied().unwrap_or(IrType::Any),
                    IrOp::StoreLocal { slot, value } => {
                        let ty = ty_of(value);
                        if let Some(entry) = state.get_mut(*slot as usize) {
                            *entry = ty;
                        }
                        if let Some(entry) = stored.get_mut(*slot as usize) {
                            *entry = entry.join(ty);
                        }
                        continue;
                    }
                    _ => continue,
                };
                if let Some(dest) = op.dest() {
                    if values.get(&dest) != Some(&result) {
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

    let mut return_ty = IrType::Never;
    for &block_id in &cfg.rpo {
        if let Terminator::Return(value) = &func.block(block_id).terminator {
            let ty = match value {
                Some(v) => values.get(v).copied().unwrap_or(IrType::Never),
                None => IrType::Void,
            };
            return_ty = return_ty.join(ty);
        }
    }

    let slots = stored.into_iter().map(|ty| if ty == IrType::Never { IrType::Any } else { ty }).collect();
    FunctionTypes { values, slots, return_ty }
}

/// Infer every function, iterating return types to a fixed point
pub fn infer_module(module: &IrModule) -> Vec<FunctionTypes> {
    let mut returns = vec![IrType::Never; module.functions.len()];
    // Each return type only moves up a lattice of height 3.
    let max_rounds = 3 * module.functions.len() + 2;
    let mut results = Vec::new();
    for _ in 0..max_rounds {
        results = module.functions.iter().map(|f| infer_function(f, &returns)).collect::<Vec<_>>();
        let next: Vec<IrType> = results.iter().map(|r| r.return_ty).collect();
        if next == returns {
            break;
        }
        returns = next;
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, Literal};

    #[test]
    fn test_slot_types_flow_through_stores() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let x = b.number(1.0);
        b.store_local(0, x);
        let loaded = b.load_local(0);
        let y = b.number(2.0);
        let sum = b.binary(BinaryOp::Add, loaded, y);
        b.ret(Some(sum));

        let types = infer_function(&func, &[]);
        assert_eq!(types.of(loaded), IrType::Number);
        assert_eq!(types.of(sum), IrType::Number);
        assert_eq!(types.slots, vec![IrType::Number]);
        assert_eq!(types.return_ty, IrType::Number);
    }

    #[test]
    fn test_join_at_merge_widens_to_any() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_block();
        let p = b.param("a0");
        b.branch(p, left, right);
        b.switch_to_block(left);
        let n = b.number(1.0);
        b.store_local(0, n);
        b.jump(join);
        b.switch_to_block(right);
        let s = b.constant(Literal::String("x".into()));
        b.store_local(0, s);
        b.jump(join);
        b.switch_to_block(join);
        let loaded = b.load_local(0);
        b.ret(Some(loaded));

        let types = infer_function(&func, &[]);
        assert_eq!(types.of(loaded), IrType::Any);
    }

    #[test]
    fn test_string_concat_and_void_return() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let s = b.constant(Literal::String("n=".into()));
        let p = b.param("a0");
        let joined = b.binary(BinaryOp::Add, s, p);
        b.print(joined);
        b.ret(None);
        let types = infer_function(&func, &[]);
        assert_eq!(types.of(joined), IrType::String);
        assert_eq!(types.return_ty, IrType::Void);
    }
}
