//! Stack-to-SSA lifter
//!
//! Converts one function's slice of stack bytecode into IR by abstractly
//! simulating the operand stack. Each stack slot holds a value id; values
//! live across a block boundary become phis at the head of the successor.
//! Parameters are modelled as values already on the stack at entry.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;

use super::functions::{FunctionLayout, ProgramLayout};
use super::LoweringError;
use crate::bytecode::{Constant, Op};
use crate::ir::{
    literal_type, BinaryOp, BlockId, FuncId, IrFunction, IrModule, IrOp, IrParam, IrType, Literal, OperandKind,
    Terminator, UnaryOp, ValueId,
};

/// Where control goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Addr(usize),
    /// Past the last instruction: implicit `return undefined`
    Exit,
}

/// A maximal straight-line run of owned instructions
struct CodeBlock {
    addrs: Vec<usize>,
    succs: Vec<Target>,
}

/// Abstract operand stack
struct StackState {
    stack: Vec<ValueId>,
}

impl StackState {
    fn pop(&mut self, addr: usize) -> Result<ValueId, LoweringError> {
        self.stack.pop().ok_or(LoweringError::StackUnderflow { addr })
    }

    fn push(&mut self, value: ValueId) {
        self.stack.push(value);
    }

    /// Pop `n` values, returned in push order
    fn pop_n(&mut self, n: usize, addr: usize) -> Result<Vec<ValueId>, LoweringError> {
        if self.stack.len() < n {
            return Err(LoweringError::StackUnderflow { addr });
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }
}

/// Values consumed and produced by `op`. `Return` is handled separately.
fn stack_effect(op: &Op) -> (usize, usize) {
    match op {
        Op::Push(_) | Op::LoadLocal(_) | Op::LoadGlobal(_) | Op::NewObject | Op::NewArray | Op::LoadEnv => (0, 1),
        Op::Pop | Op::StoreLocal(_) | Op::StoreGlobal(_) | Op::JumpIfFalse(_) | Op::Print | Op::EndBorrow => (1, 0),
        Op::Dup => (1, 2),
        Op::Swap => (2, 2),
        Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => (2, 1),
        Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge | Op::GetElem => (2, 1),
        Op::Neg | Op::Not | Op::GetProp(_) | Op::MakeClosure(_) => (1, 1),
        Op::Move | Op::Clone | Op::Borrow | Op::BorrowMut => (1, 1),
        Op::SetProp(_) => (2, 0),
        Op::SetElem => (3, 0),
        Op::Call(argc) => (*argc as usize + 1, 1),
        Op::Jump(_) | Op::Return | Op::Halt => (0, 0),
    }
}

struct Lifter<'a> {
    code: &'a [Op],
    layout: &'a FunctionLayout,
}

impl<'a> Lifter<'a> {
    /// Resolve a jump target, rejecting anything outside this function
    fn target(&self, from: usize, to: usize) -> Result<Target, LoweringError> {
        if to == self.layout.end {
            Ok(Target::Exit)
        } else if self.layout.owns(to) {
            Ok(Target::Addr(to))
        } else if self.layout.in_nested(to) {
            Err(LoweringError::JumpIntoNestedFunction { addr: from, target: to })
        } else {
            Err(LoweringError::JumpOutOfFunction { addr: from, target: to })
        }
    }

    fn fallthrough(&self, from: usize) -> Result<Target, LoweringError> {
        self.target(from, from + 1)
    }

    /// Split owned instructions into blocks keyed by leader address
    fn partition(&self) -> Result<(Option<usize>, FxHashMap<usize, CodeBlock>), LoweringError> {
        let addrs: Vec<usize> = (self.layout.start..self.layout.end).filter(|&a| self.layout.owns(a)).collect();
        let Some(&first) = addrs.first() else {
            return Ok((None, FxHashMap::default()));
        };

        let mut leaders = BTreeSet::new();
        leaders.insert(first);
        for (i, &addr) in addrs.iter().enumerate() {
            let op = &self.code[addr];
            if let Some(to) = op.jump_target() {
                if let Target::Addr(t) = self.target(addr, to)? {
                    leaders.insert(t);
                }
            }
            if op.ends_block() || op.jump_target().is_some() {
                if let Some(&next) = addrs.get(i + 1) {
                    leaders.insert(next);
                }
            }
        }

        let mut blocks = FxHashMap::default();
        let mut current: Option<(usize, Vec<usize>)> = None;
        for &addr in &addrs {
            if leaders.contains(&addr) {
                if let Some((leader, body)) = current.take() {
                    let succs = self.successors(&body)?;
                    blocks.insert(leader, CodeBlock { addrs: body, succs });
                }
                current = Some((addr, Vec::new()));
            }
            if let Some((_, body)) = current.as_mut() {
                body.push(addr);
            }
        }
        if let Some((leader, body)) = current.take() {
            let succs = self.successors(&body)?;
            blocks.insert(leader, CodeBlock { addrs: body, succs });
        }
        Ok((Some(first), blocks))
    }

    fn successors(&self, body: &[usize]) -> Result<Vec<Target>, LoweringError> {
        let Some(&last) = body.last() else {
            return Ok(Vec::new());
        };
        Ok(match &self.code[last] {
            Op::Jump(t) => vec![self.target(last, *t)?],
            // then = fall through, else = jump target
            Op::JumpIfFalse(t) => vec![self.fallthrough(last)?, self.target(last, *t)?],
            Op::Return | Op::Halt => Vec::new(),
            _ => vec![self.fallthrough(last)?],
        })
    }

    /// Entry depth (relative to the caller's arguments) of every reachable
    /// block, plus the function's arity
    fn depths(
        &self,
        first: usize,
        blocks: &FxHashMap<usize, CodeBlock>,
    ) -> Result<(FxHashMap<usize, i64>, usize), LoweringError> {
        let is_main = self.layout.start == 0;
        let mut entry_depth: FxHashMap<usize, i64> = FxHashMap::default();
        entry_depth.insert(first, 0);
        let mut worklist = vec![first];
        let mut lowest = 0i64;

        while let Some(leader) = worklist.pop() {
            let Some(block) = blocks.get(&leader) else { continue };
            let mut depth = entry_depth[&leader];
            for &addr in &block.addrs {
                let op = &self.code[addr];
                if matches!(op, Op::Return) {
                    continue;
                }
                let (pops, pushes) = stack_effect(op);
                depth -= pops as i64;
                if depth < lowest {
                    if is_main {
                        return Err(LoweringError::StackUnderflow { addr });
                    }
                    lowest = depth;
                }
                depth += pushes as i64;
            }
            for succ in &block.succs {
                let Target::Addr(to) = *succ else { continue };
                match entry_depth.get(&to) {
                    Some(&known) if known != depth => {
                        return Err(LoweringError::StackDepthMismatch {
                            addr: to,
                            expected: known,
                            found: depth,
                        });
                    }
                    Some(_) => {}
                    None => {
                        entry_depth.insert(to, depth);
                        worklist.push(to);
                    }
                }
            }
        }
        Ok((entry_depth, (-lowest) as usize))
    }
}

/// Lift one function of the program
pub(super) fn lift_function(
    code: &[Op],
    layout: &FunctionLayout,
    program: &ProgramLayout,
    module: &mut IrModule,
) -> Result<IrFunction, LoweringError> {
    let lifter = Lifter { code, layout };
    let (first, blocks) = lifter.partition()?;

    let mut func = IrFunction::new(layout.name.clone());
    let entry = func.add_block();

    let Some(first) = first else {
        func.block_mut(entry).terminator = Terminator::Return(None);
        return Ok(func);
    };
    let (entry_depth, arity) = lifter.depths(first, &blocks)?;

    // Parameters occupy the stack at entry, first argument deepest.
    let mut params = Vec::with_capacity(arity);
    for index in 0..arity {
        func.params.push(IrParam { name: format!("a{}", index), ty: IrType::Any });
        let dest = func.alloc_value(IrType::Any);
        func.block_mut(entry).ops.push(IrOp::Param { dest, index: index as u32 });
        params.push(dest);
    }

    // Reachable blocks in address order, then the exit block if anything reaches it.
    let mut leaders: Vec<usize> = entry_depth.keys().copied().collect();
    leaders.sort_unstable();
    let mut block_of: FxHashMap<usize, BlockId> = FxHashMap::default();
    for &leader in &leaders {
        block_of.insert(leader, func.add_block());
    }
    let reaches_exit = leaders.iter().any(|l| blocks[l].succs.contains(&Target::Exit));
    let exit = if reaches_exit {
        let exit = func.add_block();
        func.block_mut(exit).terminator = Terminator::Return(None);
        Some(exit)
    } else {
        None
    };
    let resolve = |target: Target| -> BlockId {
        match target {
            Target::Addr(a) => block_of[&a],
            Target::Exit => exit.unwrap_or(BlockId(0)),
        }
    };

    // One phi per live stack slot at every block entered with a non-empty stack.
    let mut entry_stacks: FxHashMap<BlockId, Vec<ValueId>> = FxHashMap::default();
    for &leader in &leaders {
        let depth = (arity as i64 + entry_depth[&leader]) as usize;
        let block = block_of[&leader];
        let mut stack = Vec::with_capacity(depth);
        for _ in 0..depth {
            let dest = func.alloc_value(IrType::Any);
            func.block_mut(block).ops.push(IrOp::Phi { dest, incoming: Vec::new() });
            stack.push(dest);
        }
        entry_stacks.insert(block, stack);
    }

    let first_block = block_of[&first];
    func.block_mut(entry).terminator = Terminator::Jump(first_block);
    add_phi_inputs(&mut func, entry, first_block, &params);

    for &leader in &leaders {
        let block = block_of[&leader];
        let code_block = &blocks[&leader];
        let mut stack = StackState { stack: entry_stacks[&block].clone() };
        let mut ctx = BlockCtx { func: &mut func, block, module: &mut *module, program };

        let mut terminator = None;
        for &addr in &code_block.addrs {
            terminator = ctx.lift_op(addr, &code[addr], &mut stack, code_block, &resolve)?;
        }
        let terminator = match terminator {
            Some(t) => t,
            None => match code_block.succs.first() {
                Some(&succ) => Terminator::Jump(resolve(succ)),
                None => Terminator::Return(None),
            },
        };
        for succ in terminator.successors() {
            if Some(succ) != exit {
                add_phi_inputs(&mut func, block, succ, &stack.stack);
            }
        }
        func.block_mut(block).terminator = terminator;
    }

    Ok(func)
}

fn add_phi_inputs(func: &mut IrFunction, pred: BlockId, succ: BlockId, stack: &[ValueId]) {
    let mut values = stack.iter();
    for op in func.block_mut(succ).ops.iter_mut() {
        let IrOp::Phi { incoming, .. } = op else { break };
        if let Some(&value) = values.next() {
            incoming.push((pred, value));
        }
    }
}

struct BlockCtx<'f> {
    func: &'f mut IrFunction,
    block: BlockId,
    module: &'f mut IrModule,
    program: &'f ProgramLayout,
}

impl BlockCtx<'_> {
    fn emit(&mut self, op: IrOp) {
        if let IrOp::LoadLocal { slot, .. } | IrOp::StoreLocal { slot, .. } = &op {
            self.func.ensure_local(*slot);
        }
        self.func.block_mut(self.block).ops.push(op);
    }

    fn value(&mut self, ty: IrType, make: impl FnOnce(ValueId) -> IrOp) -> ValueId {
        let dest = self.func.alloc_value(ty);
        self.emit(make(dest));
        dest
    }

    fn function_id(&self, addr: usize) -> Result<FuncId, LoweringError> {
        self.program.function_at(addr).ok_or(LoweringError::MissingGuard { addr })
    }

    fn binary(&mut self, op: BinaryOp, stack: &mut StackState, addr: usize) -> Result<(), LoweringError> {
        let rhs = stack.pop(addr)?;
        let lhs = stack.pop(addr)?;
        let dest = self.value(IrType::Any, |dest| IrOp::Binary { dest, op, kind: OperandKind::Any, lhs, rhs });
        stack.push(dest);
        Ok(())
    }

    fn unary(&mut self, op: UnaryOp, stack: &mut StackState, addr: usize) -> Result<(), LoweringError> {
        let operand = stack.pop(addr)?;
        let dest = self.value(IrType::Any, |dest| IrOp::Unary { dest, op, kind: OperandKind::Any, operand });
        stack.push(dest);
        Ok(())
    }

    /// Lift one instruction; returns a terminator when the instruction ends the block
    fn lift_op(
        &mut self,
        addr: usize,
        op: &Op,
        stack: &mut StackState,
        code_block: &CodeBlock,
        resolve: &impl Fn(Target) -> BlockId,
    ) -> Result<Option<Terminator>, LoweringError> {
        match op {
            // ===== Stack =====
            Op::Push(constant) => {
                let value = match constant {
                    Constant::Number(n) => Literal::Number(*n),
                    Constant::String(s) => Literal::String(s.clone()),
                    Constant::Boolean(b) => Literal::Boolean(*b),
                    Constant::Null => Literal::Null,
                    Constant::Undefined => Literal::Undefined,
                    Constant::Function(target) => Literal::Function(self.function_id(*target)?),
                };
                let ty = literal_type(&value);
                let dest = self.value(ty, |dest| IrOp::Const { dest, value });
                stack.push(dest);
            }
            Op::Pop => {
                stack.pop(addr)?;
            }
            Op::Dup => {
                let top = stack.pop(addr)?;
                let ty = self.func.value_type(top);
                let dup = self.value(ty, |dest| IrOp::Copy { dest, src: top });
                stack.push(top);
                stack.push(dup);
            }
            Op::Swap => {
                let a = stack.pop(addr)?;
                let b = stack.pop(addr)?;
                stack.push(a);
                stack.push(b);
            }

            // ===== Storage =====
            Op::LoadLocal(slot) => {
                let slot = *slot;
                let dest = self.value(IrType::Any, |dest| IrOp::LoadLocal { dest, slot });
                stack.push(dest);
            }
            Op::StoreLocal(slot) => {
                let value = stack.pop(addr)?;
                self.emit(IrOp::StoreLocal { slot: *slot, value });
            }
            Op::LoadGlobal(name) => {
                self.module.note_global(name);
                let name = name.clone();
                let dest = self.value(IrType::Any, |dest| IrOp::LoadGlobal { dest, name });
                stack.push(dest);
            }
            Op::StoreGlobal(name) => {
                self.module.note_global(name);
                let value = stack.pop(addr)?;
                self.emit(IrOp::StoreGlobal { name: name.clone(), value });
            }

            // ===== Arithmetic, logic, comparison =====
            Op::Add => self.binary(BinaryOp::Add, stack, addr)?,
            Op::Sub => self.binary(BinaryOp::Sub, stack, addr)?,
            Op::Mul => self.binary(BinaryOp::Mul, stack, addr)?,
            Op::Div => self.binary(BinaryOp::Div, stack, addr)?,
            Op::Mod => self.binary(BinaryOp::Mod, stack, addr)?,
            Op::Eq => self.binary(BinaryOp::Eq, stack, addr)?,
            Op::Ne => self.binary(BinaryOp::Ne, stack, addr)?,
            Op::Lt => self.binary(BinaryOp::Lt, stack, addr)?,
            Op::Le => self.binary(BinaryOp::Le, stack, addr)?,
            Op::Gt => self.binary(BinaryOp::Gt, stack, addr)?,
            Op::Ge => self.binary(BinaryOp::Ge, stack, addr)?,
            Op::Neg => self.unary(UnaryOp::Neg, stack, addr)?,
            Op::Not => self.unary(UnaryOp::Not, stack, addr)?,

            // ===== Control flow =====
            Op::Jump(_) => {
                let target = code_block.succs.first().copied().unwrap_or(Target::Exit);
                return Ok(Some(Terminator::Jump(resolve(target))));
            }
            Op::JumpIfFalse(_) => {
                let cond = stack.pop(addr)?;
                let (then_t, else_t) = match code_block.succs.as_slice() {
                    [then_t, else_t] => (*then_t, *else_t),
                    _ => return Err(LoweringError::StackUnderflow { addr }),
                };
                return Ok(Some(Terminator::Branch {
                    cond,
                    then_block: resolve(then_t),
                    else_block: resolve(else_t),
                }));
            }
            Op::Call(argc) => {
                let callee = stack.pop(addr)?;
                let args = stack.pop_n(*argc as usize, addr)?;
                let dest = self.value(IrType::Any, |dest| IrOp::Call { dest, callee, args });
                stack.push(dest);
            }
            Op::Return => {
                let value = stack.stack.pop();
                return Ok(Some(Terminator::Return(value)));
            }
            Op::Halt => return Ok(Some(Terminator::Return(None))),

            // ===== Heap =====
            Op::NewObject => {
                let dest = self.value(IrType::Object, |dest| IrOp::NewObject { dest });
                stack.push(dest);
            }
            Op::NewArray => {
                let dest = self.value(IrType::Array, |dest| IrOp::NewArray { dest });
                stack.push(dest);
            }
            Op::GetProp(name) => {
                let object = stack.pop(addr)?;
                let name = name.clone();
                let dest = self.value(IrType::Any, |dest| IrOp::GetProp { dest, object, name });
                stack.push(dest);
            }
            Op::SetProp(name) => {
                let value = stack.pop(addr)?;
                let object = stack.pop(addr)?;
                self.emit(IrOp::SetProp { object, name: name.clone(), value });
            }
            Op::GetElem => {
                let key = stack.pop(addr)?;
                let object = stack.pop(addr)?;
                let dest = self.value(IrType::Any, |dest| IrOp::GetElem { dest, object, key });
                stack.push(dest);
            }
            Op::SetElem => {
                let value = stack.pop(addr)?;
                let key = stack.pop(addr)?;
                let object = stack.pop(addr)?;
                self.emit(IrOp::SetElem { object, key, value });
            }

            // ===== Closures =====
            Op::MakeClosure(target) => {
                let func = self.function_id(*target)?;
                let env = stack.pop(addr)?;
                let dest = self.value(IrType::Function, |dest| IrOp::MakeClosure { dest, func, env });
                stack.push(dest);
            }
            Op::LoadEnv => {
                let dest = self.value(IrType::Any, |dest| IrOp::LoadEnv { dest });
                stack.push(dest);
            }

            Op::Print => {
                let value = stack.pop(addr)?;
                self.emit(IrOp::Print { value });
            }

            // ===== Ownership markers =====
            Op::Move => self.ownership(stack, addr, |dest, src| IrOp::Move { dest, src })?,
            Op::Clone => self.ownership(stack, addr, |dest, src| IrOp::Clone { dest, src })?,
            Op::Borrow => self.ownership(stack, addr, |dest, src| IrOp::Borrow { dest, src })?,
            Op::BorrowMut => self.ownership(stack, addr, |dest, src| IrOp::BorrowMut { dest, src })?,
            Op::EndBorrow => {
                let borrow = stack.pop(addr)?;
                self.emit(IrOp::EndBorrow { borrow });
            }
        }
        Ok(None)
    }

    fn ownership(
        &mut self,
        stack: &mut StackState,
        addr: usize,
        make: impl FnOnce(ValueId, ValueId) -> IrOp,
    ) -> Result<(), LoweringError> {
        let src = stack.pop(addr)?;
        let ty = self.func.value_type(src);
        let dest = self.value(ty, |dest| make(dest, src));
        stack.push(dest);
        Ok(())
    }
}
