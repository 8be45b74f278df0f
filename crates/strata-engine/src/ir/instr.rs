//! IR operations and terminators
//!
//! Register-based SSA form: every `IrOp` with a `dest` defines a fresh
//! `ValueId`; blocks end in exactly one `Terminator`.

use std::fmt;
use std::hash::{Hash, Hasher};

use super::types::{CompileStrategy, OperandKind};

/// SSA value identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Basic block index within a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl BlockId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Function index within a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

impl FuncId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FuncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func#{}", self.0)
    }
}

/// Compile-time constant
#[derive(Debug, Clone)]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Undefined,
    Function(FuncId),
}

impl PartialEq for Literal {
    /// Numbers compare by bit pattern so `-0` and `0` stay distinct
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Number(a), Literal::Number(b)) => a.to_bits() == b.to_bits(),
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::Boolean(a), Literal::Boolean(b)) => a == b,
            (Literal::Null, Literal::Null) | (Literal::Undefined, Literal::Undefined) => true,
            (Literal::Function(a), Literal::Function(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Literal::Number(n) => n.to_bits().hash(state),
            Literal::String(s) => s.hash(state),
            Literal::Boolean(b) => b.hash(state),
            Literal::Function(f) => f.hash(state),
            Literal::Null | Literal::Undefined => {}
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) if n.is_nan() => f.write_str("nan"),
            Literal::Number(n) if n.is_infinite() => f.write_str(if *n > 0.0 { "inf" } else { "-inf" }),
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => f.write_str("null"),
            Literal::Undefined => f.write_str("undefined"),
            Literal::Function(id) => write!(f, "{}", id),
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::Lt => "lt",
            BinaryOp::Le => "le",
            BinaryOp::Gt => "gt",
            BinaryOp::Ge => "ge",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    /// Operand order does not matter for this operator and kind
    pub fn is_commutative(self, kind: OperandKind) -> bool {
        match self {
            BinaryOp::Add | BinaryOp::Mul => kind == OperandKind::Num,
            BinaryOp::Eq | BinaryOp::Ne => true,
            _ => false,
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Not => "not",
        }
    }
}

/// A non-terminating IR operation
#[derive(Debug, Clone, PartialEq)]
pub enum IrOp {
    Const { dest: ValueId, value: Literal },
    /// Argument `index`, or undefined when the caller passed fewer
    Param { dest: ValueId, index: u32 },
    Binary { dest: ValueId, op: BinaryOp, kind: OperandKind, lhs: ValueId, rhs: ValueId },
    Unary { dest: ValueId, op: UnaryOp, kind: OperandKind, operand: ValueId },
    Copy { dest: ValueId, src: ValueId },
    Phi { dest: ValueId, incoming: Vec<(BlockId, ValueId)> },

    LoadLocal { dest: ValueId, slot: u32 },
    StoreLocal { slot: u32, value: ValueId },
    LoadGlobal { dest: ValueId, name: String },
    StoreGlobal { name: String, value: ValueId },

    NewObject { dest: ValueId },
    NewArray { dest: ValueId },
    GetProp { dest: ValueId, object: ValueId, name: String },
    SetProp { object: ValueId, name: String, value: ValueId },
    GetElem { dest: ValueId, object: ValueId, key: ValueId },
    SetElem { object: ValueId, key: ValueId, value: ValueId },

    /// Call through a runtime value
    Call { dest: ValueId, callee: ValueId, args: Vec<ValueId> },
    /// Call to a function of the same module, resolved at compile time
    CallDirect { dest: ValueId, func: FuncId, args: Vec<ValueId> },
    MakeClosure { dest: ValueId, func: FuncId, env: ValueId },
    LoadEnv { dest: ValueId },
    Print { value: ValueId },

    Move { dest: ValueId, src: ValueId },
    Clone { dest: ValueId, src: ValueId },
    Borrow { dest: ValueId, src: ValueId },
    BorrowMut { dest: ValueId, src: ValueId },
    EndBorrow { borrow: ValueId },
}

impl IrOp {
    /// Value defined by this op
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            IrOp::Const { dest, .. }
            | IrOp::Param { dest, .. }
            | IrOp::Binary { dest, .. }
            | IrOp::Unary { dest, .. }
            | IrOp::Copy { dest, .. }
            | IrOp::Phi { dest, .. }
            | IrOp::LoadLocal { dest, .. }
            | IrOp::LoadGlobal { dest, .. }
            | IrOp::NewObject { dest }
            | IrOp::NewArray { dest }
            | IrOp::GetProp { dest, .. }
            | IrOp::GetElem { dest, .. }
            | IrOp::Call { dest, .. }
            | IrOp::CallDirect { dest, .. }
            | IrOp::MakeClosure { dest, .. }
            | IrOp::LoadEnv { dest }
            | IrOp::Move { dest, .. }
            | IrOp::Clone { dest, .. }
            | IrOp::Borrow { dest, .. }
            | IrOp::BorrowMut { dest, .. } => Some(*dest),
            IrOp::StoreLocal { .. }
            | IrOp::StoreGlobal { .. }
            | IrOp::SetProp { .. }
            | IrOp::SetElem { .. }
            | IrOp::Print { .. }
            | IrOp::EndBorrow { .. } => None,
        }
    }

    /// Visit every value this op reads, in operand order
    pub fn for_each_use(&self, mut f: impl FnMut(ValueId)) {
        match self {
            IrOp::Const { .. }
            | IrOp::Param { .. }
            | IrOp::LoadLocal { .. }
            | IrOp::LoadGlobal { .. }
            | IrOp::NewObject { .. }
            | IrOp::NewArray { .. }
            | IrOp::LoadEnv { .. } => {}
            IrOp::Binary { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            IrOp::Unary { operand, .. } => f(*operand),
            IrOp::Copy { src, .. }
            | IrOp::Move { src, .. }
            | IrOp::Clone { src, .. }
            | IrOp::Borrow { src, .. }
            | IrOp::BorrowMut { src, .. } => f(*src),
            IrOp::Phi { incoming, .. } => incoming.iter().for_each(|(_, v)| f(*v)),
            IrOp::StoreLocal { value, .. } | IrOp::StoreGlobal { value, .. } | IrOp::Print { value } => {
                f(*value)
            }
            IrOp::GetProp { object, .. } => f(*object),
            IrOp::SetProp { object, value, .. } => {
                f(*object);
                f(*value);
            }
            IrOp::GetElem { object, key, .. } => {
                f(*object);
                f(*key);
            }
            IrOp::SetElem { object, key, value } => {
                f(*object);
                f(*key);
                f(*value);
            }
            IrOp::Call { callee, args, .. } => {
                f(*callee);
                args.iter().for_each(|a| f(*a));
            }
            IrOp::CallDirect { args, .. } => args.iter().for_each(|a| f(*a)),
            IrOp::MakeClosure { env, .. } => f(*env),
            IrOp::EndBorrow { borrow } => f(*borrow),
        }
    }

    pub fn uses(&self) -> Vec<ValueId> {
        let mut out = Vec::new();
        self.for_each_use(|v| out.push(v));
        out
    }

    /// Rewrite every value this op reads
    pub fn map_uses(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            IrOp::Const { .. }
            | IrOp::Param { .. }
            | IrOp::LoadLocal { .. }
            | IrOp::LoadGlobal { .. }
            | IrOp::NewObject { .. }
            | IrOp::NewArray { .. }
            | IrOp::LoadEnv { .. } => {}
            IrOp::Binary { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            IrOp::Unary { operand, .. } => *operand = f(*operand),
            IrOp::Copy { src, .. }
            | IrOp::Move { src, .. }
            | IrOp::Clone { src, .. }
            | IrOp::Borrow { src, .. }
            | IrOp::BorrowMut { src, .. } => *src = f(*src),
            IrOp::Phi { incoming, .. } => incoming.iter_mut().for_each(|(_, v)| *v = f(*v)),
            IrOp::StoreLocal { value, .. } | IrOp::StoreGlobal { value, .. } | IrOp::Print { value } => {
                *value = f(*value)
            }
            IrOp::GetProp { object, .. } => *object = f(*object),
            IrOp::SetProp { object, value, .. } => {
                *object = f(*object);
                *value = f(*value);
            }
            IrOp::GetElem { object, key, .. } => {
                *object = f(*object);
                *key = f(*key);
            }
            IrOp::SetElem { object, key, value } => {
                *object = f(*object);
                *key = f(*key);
                *value = f(*value);
            }
            IrOp::Call { callee, args, .. } => {
                *callee = f(*callee);
                args.iter_mut().for_each(|a| *a = f(*a));
            }
            IrOp::CallDirect { args, .. } => args.iter_mut().for_each(|a| *a = f(*a)),
            IrOp::MakeClosure { env, .. } => *env = f(*env),
            IrOp::EndBorrow { borrow } => *borrow = f(*borrow),
        }
    }

    /// Rename the defined value
    pub fn set_dest(&mut self, new: ValueId) {
        match self {
            IrOp::Const { dest, .. }
            | IrOp::Param { dest, .. }
            | IrOp::Binary { dest, .. }
            | IrOp::Unary { dest, .. }
            | IrOp::Copy { dest, .. }
            | IrOp::Phi { dest, .. }
            | IrOp::LoadLocal { dest, .. }
            | IrOp::LoadGlobal { dest, .. }
            | IrOp::NewObject { dest }
            | IrOp::NewArray { dest }
            | IrOp::GetProp { dest, .. }
            | IrOp::GetElem { dest, .. }
            | IrOp::Call { dest, .. }
            | IrOp::CallDirect { dest, .. }
            | IrOp::MakeClosure { dest, .. }
            | IrOp::LoadEnv { dest }
            | IrOp::Move { dest, .. }
            | IrOp::Clone { dest, .. }
            | IrOp::Borrow { dest, .. }
            | IrOp::BorrowMut { dest, .. } => *dest = new,
            _ => {}
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, IrOp::Phi { .. })
    }

    /// Observable effects beyond producing `dest`. Ownership markers count:
    /// removing them would hide a move or borrow from the verifier.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            IrOp::StoreLocal { .. }
                | IrOp::StoreGlobal { .. }
                | IrOp::SetProp { .. }
                | IrOp::SetElem { .. }
                | IrOp::Call { .. }
                | IrOp::CallDirect { .. }
                | IrOp::Print { .. }
                | IrOp::Move { .. }
                | IrOp::Borrow { .. }
                | IrOp::BorrowMut { .. }
                | IrOp::EndBorrow { .. }
        )
    }

    /// Pure and deterministic given its operands, so duplicates can merge
    pub fn is_cse_candidate(&self) -> bool {
        matches!(
            self,
            IrOp::Const { .. } | IrOp::Binary { .. } | IrOp::Unary { .. } | IrOp::LoadEnv { .. }
        )
    }

    pub fn strategy(&self) -> CompileStrategy {
        match self {
            IrOp::Const { value: Literal::String(_), .. } => CompileStrategy::StubCall,
            IrOp::Const { .. } | IrOp::Param { .. } | IrOp::LoadEnv { .. } => CompileStrategy::Inline,
            IrOp::Binary { op, kind, .. } => match (kind, op) {
                (OperandKind::Num, BinaryOp::Mod) => CompileStrategy::StubCall,
                (OperandKind::Num, _) | (OperandKind::Bool, _) => CompileStrategy::Inline,
                (OperandKind::Str, _) | (OperandKind::Any, _) => CompileStrategy::StubCall,
            },
            IrOp::Unary { kind, .. } => match kind {
                OperandKind::Num | OperandKind::Bool => CompileStrategy::Inline,
                _ => CompileStrategy::StubCall,
            },
            IrOp::Copy { .. }
            | IrOp::Phi { .. }
            | IrOp::Move { .. }
            | IrOp::Borrow { .. }
            | IrOp::BorrowMut { .. }
            | IrOp::EndBorrow { .. } => CompileStrategy::NoOp,
            IrOp::LoadLocal { .. } | IrOp::StoreLocal { .. } | IrOp::CallDirect { .. } => {
                CompileStrategy::Inline
            }
            IrOp::LoadGlobal { .. }
            | IrOp::StoreGlobal { .. }
            | IrOp::NewObject { .. }
            | IrOp::NewArray { .. }
            | IrOp::GetProp { .. }
            | IrOp::SetProp { .. }
            | IrOp::GetElem { .. }
            | IrOp::SetElem { .. }
            | IrOp::Call { .. }
            | IrOp::MakeClosure { .. }
            | IrOp::Print { .. }
            | IrOp::Clone { .. } => CompileStrategy::StubCall,
        }
    }
}

/// Block terminator
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump(BlockId),
    /// Jumps to `then_block` when `cond` is truthy
    Branch { cond: ValueId, then_block: BlockId, else_block: BlockId },
    Return(Option<ValueId>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(t) => vec![*t],
            Terminator::Branch { then_block, else_block, .. } => {
                if then_block == else_block {
                    vec![*then_block]
                } else {
                    vec![*then_block, *else_block]
                }
            }
            Terminator::Return(_) | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn for_each_use(&self, mut f: impl FnMut(ValueId)) {
        match self {
            Terminator::Branch { cond, .. } => f(*cond),
            Terminator::Return(Some(v)) => f(*v),
            _ => {}
        }
    }

    pub fn map_uses(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        match self {
            Terminator::Branch { cond, .. } => *cond = f(*cond),
            Terminator::Return(Some(v)) => *v = f(*v),
            _ => {}
        }
    }

    pub fn map_targets(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Terminator::Jump(t) => *t = f(*t),
            Terminator::Branch { then_block, else_block, .. } => {
                *then_block = f(*then_block);
                *else_block = f(*else_block);
            }
            _ => {}
        }
    }
}
