//! Stack bytecode consumed from the front end
//!
//! A program is one flat instruction stream with absolute jump addresses.
//! Nested function bodies are inlined into the stream behind a guard jump:
//!
//! ```text
//!   10: Jump(20)          ; skip the body
//!   11: ...               ; body of the function at address 11
//!   19: Return
//!   20: Push(Function(11))
//! ```

use std::fmt;

/// Literal operand of `Push`
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Number(f64),
    String(String),
    Boolean(bool),
    Null,
    Undefined,
    /// Start address of a function body
    Function(usize),
}

/// One stack-machine instruction
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    // Stack
    Push(Constant),
    Pop,
    Dup,
    Swap,

    // Storage
    LoadLocal(u32),
    StoreLocal(u32),
    LoadGlobal(String),
    StoreGlobal(String),

    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    // Logic / comparison
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Control flow
    Jump(usize),
    JumpIfFalse(usize),
    /// Pops the callee, then `argc` arguments
    Call(u32),
    Return,
    Halt,

    // Heap
    NewObject,
    NewArray,
    GetProp(String),
    SetProp(String),
    GetElem,
    SetElem,

    // Closures
    MakeClosure(usize),
    LoadEnv,

    Print,

    // Ownership markers emitted by the front end's borrow checker
    Move,
    Clone,
    Borrow,
    BorrowMut,
    EndBorrow,
}

impl Op {
    /// Jump target, if this instruction has one
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Op::Jump(t) | Op::JumpIfFalse(t) => Some(*t),
            _ => None,
        }
    }

    /// Function body address referenced by this instruction
    pub fn function_ref(&self) -> Option<usize> {
        match self {
            Op::Push(Constant::Function(addr)) | Op::MakeClosure(addr) => Some(*addr),
            _ => None,
        }
    }

    /// Whether control never falls through to the next instruction
    pub fn ends_block(&self) -> bool {
        matches!(self, Op::Jump(_) | Op::Return | Op::Halt)
    }
}

/// A compilation unit handed over by the front end
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub name: String,
    pub code: Vec<Op>,
}

impl Program {
    pub fn new(name: impl Into<String>, code: Vec<Op>) -> Self {
        Program { name: name.into(), code }
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; program {}", self.name)?;
        for (addr, op) in self.code.iter().enumerate() {
            writeln!(f, "{:>5}: {:?}", addr, op)?;
        }
        Ok(())
    }
}
