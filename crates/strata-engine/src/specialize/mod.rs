//! Type inference and specialization
//!
//! Runs constant propagation (which turns calls through known function
//! literals into direct calls), infers types module-wide, then narrows
//! dynamic operations whose operand types are proven on every path.
//! Anything not proven stays `.any` and lowers to a runtime stub.

pub mod constprop;
pub mod infer;

pub use constprop::propagate_constants;
pub use infer::{infer_function, infer_module, FunctionTypes};

use crate::ir::{BinaryOp, IrModule, IrOp, IrType, OperandKind, UnaryOp};

/// Counts reported after specialization
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpecializeStats {
    pub narrowed: usize,
    pub direct_calls: usize,
    /// Whether the module differs from its input
    pub changed: bool,
}

fn binary_kind(op: BinaryOp, lhs: IrType, rhs: IrType) -> OperandKind {
    match (lhs, rhs) {
        (IrType::Number, IrType::Number) => OperandKind::Num,
        (IrType::String, IrType::String) if matches!(op, BinaryOp::Add | BinaryOp::Eq | BinaryOp::Ne) => {
            OperandKind::Str
        }
        (IrType::Boolean, IrType::Boolean) if matches!(op, BinaryOp::Eq | BinaryOp::Ne) => OperandKind::Bool,
        _ => OperandKind::Any,
    }
}

fn unary_kind(op: UnaryOp, operand: IrType) -> OperandKind {
    match (op, operand) {
        (UnaryOp::Neg, IrType::Number) => OperandKind::Num,
        (UnaryOp::Not, IrType::Boolean) => OperandKind::Bool,
        _ => OperandKind::Any,
    }
}

/// Specialize every function of `module` in place
pub fn specialize_module(module: &mut IrModule) -> SpecializeStats {
    let mut stats = SpecializeStats::default();
    let before = module.clone();
    for func in &mut module.functions {
        propagate_constants(func);
    }

    let types = infer_module(module);
    for (func, types) in module.functions.iter_mut().zip(types) {
        for op in func.blocks.iter_mut().flat_map(|b| b.ops.iter_mut()) {
            match op {
                IrOp::Binary { op, kind, lhs, rhs, .. } => {
                    let narrowed = binary_kind(*op, types.of(*lhs), types.of(*rhs));
                    if narrowed != *kind && narrowed != OperandKind::Any {
                        *kind = narrowed;
                        stats.narrowed += 1;
                    }
                }
                IrOp::Unary { op, kind, operand, .. } => {
                    let narrowed = unary_kind(*op, types.of(*operand));
                    if narrowed != *kind && narrowed != OperandKind::Any {
                        *kind = narrowed;
                        stats.narrowed += 1;
                    }
                }
                IrOp::CallDirect { .. } => stats.direct_calls += 1,
                _ => {}
            }
        }

        for (value, ty) in &types.values {
            let ty = if *ty == IrType::Never { IrType::Any } else { *ty };
            func.set_value_type(*value, ty);
        }
        for (local, ty) in func.locals.iter_mut().zip(&types.slots) {
            local.ty = *ty;
        }
        func.return_ty = types.return_ty;
        tracing::debug!(function = %func.name, return_ty = %func.return_ty, "specialized function");
    }
    stats.changed = *module != before;
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{serialize_module, IrBuilder, IrFunction, Literal};

    #[test]
    fn test_number_add_narrows() {
        let mut module = IrModule::new("m");
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let x = b.number(3.0);
        let y = b.number(4.0);
        let sum = b.binary(BinaryOp::Add, x, y);
        b.ret(Some(sum));
        module.add_function(func);

        let stats = specialize_module(&mut module);
        assert_eq!(stats.narrowed, 1);
        assert!(stats.changed);
        assert!(!specialize_module(&mut module).changed);
        let text = serialize_module(&module);
        assert!(text.contains("v2: num = add.num v0, v1"), "{}", text);
        assert!(text.contains("fn main() -> num"), "{}", text);
    }

    #[test]
    fn test_mixed_operands_stay_dynamic() {
        let mut module = IrModule::new("m");
        let mut func = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut func);
        let p = b.param("a0");
        let one = b.number(1.0);
        let lt = b.binary(BinaryOp::Lt, p, one);
        let not = b.unary(UnaryOp::Not, lt);
        b.ret(Some(not));
        module.add_function(func);

        specialize_module(&mut module);
        let text = serialize_module(&module);
        assert!(text.contains("lt.any"), "{}", text);
        // The comparison result is always a boolean, so `not` narrows.
        assert!(text.contains("not.bool"), "{}", text);
    }

    #[test]
    fn test_direct_call_gets_callee_return_type() {
        let mut module = IrModule::new("m");
        let mut main = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut main);
        let f = b.constant(Literal::Function(crate::ir::FuncId(1)));
        b.store_local(0, f);
        let callee = b.load_local(0);
        let r = b.call(callee, vec![]);
        let two = b.number(2.0);
        let product = b.binary(BinaryOp::Mul, r, two);
        let sum = b.binary(BinaryOp::Add, r, two);
        b.print(product);
        b.ret(Some(sum));
        module.add_function(main);

        let mut callee_fn = IrFunction::new("func_9");
        let mut b = IrBuilder::new(&mut callee_fn);
        let s = b.number(5.0);
        b.ret(Some(s));
        module.add_function(callee_fn);

        let stats = specialize_module(&mut module);
        assert_eq!(stats.direct_calls, 1);
        let text = serialize_module(&module);
        assert!(text.contains("call.direct @func_9()"), "{}", text);
        assert!(text.contains("add.num"), "{}", text);
    }
}
