//! SSA builder helpers
//!
//! Used by the lifter and by tests that construct IR by hand.

use super::function::{IrFunction, IrParam};
use super::instr::{BinaryOp, BlockId, FuncId, IrOp, Literal, Terminator, UnaryOp, ValueId};
use super::types::{IrType, OperandKind};

/// Builder that appends to one block of a function at a time
pub struct IrBuilder<'a> {
    func: &'a mut IrFunction,
    current_block: BlockId,
}

impl<'a> IrBuilder<'a> {
    /// Create a builder targeting an existing function; an entry block is
    /// created if the function has none
    pub fn new(func: &'a mut IrFunction) -> Self {
        if func.blocks.is_empty() {
            func.add_block();
        }
        let entry = func.entry();
        IrBuilder { func, current_block: entry }
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    pub fn create_block(&mut self) -> BlockId {
        self.func.add_block()
    }

    pub fn alloc_value(&mut self, ty: IrType) -> ValueId {
        self.func.alloc_value(ty)
    }

    pub fn emit(&mut self, op: IrOp) {
        if let IrOp::LoadLocal { slot, .. } | IrOp::StoreLocal { slot, .. } = &op {
            self.func.ensure_local(*slot);
        }
        self.func.block_mut(self.current_block).ops.push(op);
    }

    pub fn terminate(&mut self, term: Terminator) {
        self.func.block_mut(self.current_block).terminator = term;
    }

    /// Declare the next formal parameter and load it in the current block
    pub fn param(&mut self, name: impl Into<String>) -> ValueId {
        let index = self.func.params.len() as u32;
        self.func.params.push(IrParam { name: name.into(), ty: IrType::Any });
        let dest = self.alloc_value(IrType::Any);
        self.emit(IrOp::Param { dest, index });
        dest
    }

    pub fn constant(&mut self, value: Literal) -> ValueId {
        let ty = literal_type(&value);
        let dest = self.alloc_value(ty);
        self.emit(IrOp::Const { dest, value });
        dest
    }

    pub fn number(&mut self, n: f64) -> ValueId {
        self.constant(Literal::Number(n))
    }

    pub fn binary(&mut self, op: BinaryOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let dest = self.alloc_value(IrType::Any);
        self.emit(IrOp::Binary { dest, op, kind: OperandKind::Any, lhs, rhs });
        dest
    }

    pub fn unary(&mut self, op: UnaryOp, operand: ValueId) -> ValueId {
        let dest = self.alloc_value(IrType::Any);
        self.emit(IrOp::Unary { dest, op, kind: OperandKind::Any, operand });
        dest
    }

    pub fn copy(&mut self, src: ValueId) -> ValueId {
        let ty = self.func.value_type(src);
        let dest = self.alloc_value(ty);
        self.emit(IrOp::Copy { dest, src });
        dest
    }

    /// Insert a phi at the head of `block`, after any existing phis
    pub fn phi_in(&mut self, block: BlockId, incoming: Vec<(BlockId, ValueId)>) -> ValueId {
        let dest = self.alloc_value(IrType::Any);
        let target = self.func.block_mut(block);
        let at = target.phi_count();
        target.ops.insert(at, IrOp::Phi { dest, incoming });
        dest
    }

    pub fn load_local(&mut self, slot: u32) -> ValueId {
        let dest = self.alloc_value(IrType::Any);
        self.emit(IrOp::LoadLocal { dest, slot });
        dest
    }

    pub fn store_local(&mut self, slot: u32, value: ValueId) {
        self.emit(IrOp::StoreLocal { slot, value });
    }

    pub fn new_object(&mut self) -> ValueId {
        let dest = self.alloc_value(IrType::Object);
        self.emit(IrOp::NewObject { dest });
        dest
    }

    pub fn call(&mut self, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        let dest = self.alloc_value(IrType::Any);
        self.emit(IrOp::Call { dest, callee, args });
        dest
    }

    pub fn call_direct(&mut self, func: FuncId, args: Vec<ValueId>) -> ValueId {
        let dest = self.alloc_value(IrType::Any);
        self.emit(IrOp::CallDirect { dest, func, args });
        dest
    }

    /// Emit an ownership op (`Move`, `Clone`, `Borrow`, `BorrowMut`) built from a fresh dest
    pub fn ownership(&mut self, make: impl FnOnce(ValueId) -> IrOp, src: ValueId) -> ValueId {
        let ty = self.func.value_type(src);
        let dest = self.alloc_value(ty);
        self.emit(make(dest));
        dest
    }

    pub fn print(&mut self, value: ValueId) {
        self.emit(IrOp::Print { value });
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
    }

    pub fn branch(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch { cond, then_block, else_block });
    }

    pub fn ret(&mut self, value: Option<ValueId>) {
        self.terminate(Terminator::Return(value));
    }

    pub fn func(&self) -> &IrFunction {
        self.func
    }

    pub fn func_mut(&mut self) -> &mut IrFunction {
        self.func
    }
}

/// Static type of a literal
pub fn literal_type(value: &Literal) -> IrType {
    match value {
        Literal::Number(_) => IrType::Number,
        Literal::String(_) => IrType::String,
        Literal::Boolean(_) => IrType::Boolean,
        Literal::Function(_) => IrType::Function,
        Literal::Null | Literal::Undefined => IrType::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_creates_entry_and_types_constants() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let x = b.number(3.0);
        let s = b.constant(Literal::String("hi".into()));
        b.store_local(2, x);
        b.ret(Some(s));
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(func.value_type(x), IrType::Number);
        assert_eq!(func.value_type(s), IrType::String);
        assert_eq!(func.locals.len(), 3);
    }

    #[test]
    fn test_phi_inserted_before_other_ops() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let join = b.create_block();
        let v = b.number(1.0);
        b.jump(join);
        b.switch_to_block(join);
        b.print(v);
        let p = b.phi_in(join, vec![(BlockId(0), v)]);
        b.ret(Some(p));
        assert!(func.blocks[1].ops[0].is_phi());
        assert_eq!(func.blocks[1].phi_count(), 1);
    }
}
