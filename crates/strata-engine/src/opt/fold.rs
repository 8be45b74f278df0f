//! Constant folding
//!
//! Evaluates operations on literal operands with the runtime's own
//! semantics (on a scratch heap), so a folded result is bit-for-bit what
//! the unfolded code would compute. IEEE-754 throughout: `0/0` is NaN and
//! `x/0` is an infinity, never a trap.

use rustc_hash::FxHashMap;
use strata_runtime::ops::{self, ArithOp, CompareOp};
use strata_runtime::{Heap, Value, ValueKind};

use super::OptPass;
use crate::ir::{literal_type, BinaryOp, IrFunction, IrOp, Literal, UnaryOp, ValueId};

/// Box a literal; function literals have no address yet
fn to_value(heap: &mut Heap, literal: &Literal) -> Option<Value> {
    Some(match literal {
        Literal::Number(n) => Value::number(*n),
        Literal::String(s) => heap.alloc_string(s.as_str()),
        Literal::Boolean(b) => Value::boolean(*b),
        Literal::Null => Value::null(),
        Literal::Undefined => Value::undefined(),
        Literal::Function(_) => return None,
    })
}

fn to_literal(heap: &Heap, value: Value) -> Option<Literal> {
    Some(match value.kind() {
        ValueKind::Number => Literal::Number(value.as_number()?),
        ValueKind::Boolean => Literal::Boolean(value.as_bool()?),
        ValueKind::Null => Literal::Null,
        ValueKind::Undefined => Literal::Undefined,
        ValueKind::Heap => Literal::String(heap.string(value)?.to_string()),
        ValueKind::Function => return None,
    })
}

/// Evaluate a binary operation on two literals
pub fn fold_binary(op: BinaryOp, lhs: &Literal, rhs: &Literal) -> Option<Literal> {
    let mut heap = Heap::new();
    let a = to_value(&mut heap, lhs)?;
    let b = to_value(&mut heap, rhs)?;
    let result = match op {
        BinaryOp::Add => ops::add(&mut heap, a, b),
        BinaryOp::Sub => ops::arith(&heap, ArithOp::Sub, a, b),
        BinaryOp::Mul => ops::arith(&heap, ArithOp::Mul, a, b),
        BinaryOp::Div => ops::arith(&heap, ArithOp::Div, a, b),
        BinaryOp::Mod => ops::arith(&heap, ArithOp::Mod, a, b),
        BinaryOp::Eq => Value::boolean(ops::strict_equals(&heap, a, b)),
        BinaryOp::Ne => Value::boolean(!ops::strict_equals(&heap, a, b)),
        BinaryOp::Lt => Value::boolean(ops::compare(&heap, CompareOp::Lt, a, b)),
        BinaryOp::Le => Value::boolean(ops::compare(&heap, CompareOp::Le, a, b)),
        BinaryOp::Gt => Value::boolean(ops::compare(&heap, CompareOp::Gt, a, b)),
        BinaryOp::Ge => Value::boolean(ops::compare(&heap, CompareOp::Ge, a, b)),
    };
    to_literal(&heap, result)
}

/// Evaluate a unary operation on a literal
pub fn fold_unary(op: UnaryOp, operand: &Literal) -> Option<Literal> {
    let mut heap = Heap::new();
    let v = to_value(&mut heap, operand)?;
    let result = match op {
        UnaryOp::Neg => ops::negate(&heap, v),
        UnaryOp::Not => Value::boolean(!ops::to_boolean(&heap, v)),
    };
    to_literal(&heap, result)
}

/// Runtime truthiness of a literal
pub fn literal_truthiness(literal: &Literal) -> bool {
    match literal {
        Literal::Function(_) => true,
        other => {
            let mut heap = Heap::new();
            to_value(&mut heap, other).is_some_and(|v| ops::to_boolean(&heap, v))
        }
    }
}

/// Literal defined by each `const` op
pub(super) fn constants(func: &IrFunction) -> FxHashMap<ValueId, Literal> {
    func.blocks
        .iter()
        .flat_map(|b| &b.ops)
        .filter_map(|op| match op {
            IrOp::Const { dest, value } => Some((*dest, value.clone())),
            _ => None,
        })
        .collect()
}

/// Folds operations whose operands are all literals, and phis whose
/// inputs are all the same literal
pub struct ConstantFolding;

impl OptPass for ConstantFolding {
    fn name(&self) -> &str {
        "constant-folding"
    }

    fn run(&self, func: &mut IrFunction) -> bool {
        let mut known = constants(func);
        let mut changed = false;
        let mut folded_types = Vec::new();

        for block in &mut func.blocks {
            for op in &mut block.ops {
                let folded = match op {
                    IrOp::Binary { dest, op, lhs, rhs, .. } => match (known.get(lhs), known.get(rhs)) {
                        (Some(a), Some(b)) => fold_binary(*op, a, b).map(|lit| (*dest, lit)),
                        _ => None,
                    },
                    IrOp::Unary { dest, op, operand, .. } => {
                        known.get(operand).and_then(|a| fold_unary(*op, a)).map(|lit| (*dest, lit))
                    }
                    IrOp::Phi { dest, incoming } => {
                        let mut values = incoming.iter().map(|(_, v)| known.get(v));
                        match values.next() {
                            Some(Some(first)) if values.all(|v| v == Some(first)) => {
                                Some((*dest, first.clone()))
                            }
                            _ => None,
                        }
                    }
                    _ => None,
                };
                if let Some((dest, value)) = folded {
                    folded_types.push((dest, literal_type(&value)));
                    known.insert(dest, value.clone());
                    *op = IrOp::Const { dest, value };
                    changed = true;
                }
            }
        }

        for (dest, ty) in folded_types {
            func.set_value_type(dest, ty);
        }
        if changed {
            restore_phi_order(func);
        }
        changed
    }
}

/// Folded phis become constants; move them below the remaining phis
fn restore_phi_order(func: &mut IrFunction) {
    for block in &mut func.blocks {
        let ops = std::mem::take(&mut block.ops);
        let (phis, rest): (Vec<IrOp>, Vec<IrOp>) = ops.into_iter().partition(IrOp::is_phi);
        block.ops = phis;
        block.ops.extend(rest);
    }
}
