//! IR type system, ownership tags and compile strategies

use std::fmt;

/// Static type of an IR value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IrType {
    Number,
    String,
    Boolean,
    Object,
    Array,
    Function,
    /// Dynamically typed; the default until inference narrows it
    #[default]
    Any,
    /// No value can flow here (bottom of the lattice)
    Never,
    Void,
}

impl IrType {
    /// Lattice join: `Never` is the identity, disagreement widens to `Any`
    pub fn join(self, other: IrType) -> IrType {
        match (self, other) {
            (IrType::Never, t) | (t, IrType::Never) => t,
            (a, b) if a == b => a,
            _ => IrType::Any,
        }
    }

    /// Primitive types are copied rather than moved
    pub fn is_copy(self) -> bool {
        matches!(self, IrType::Number | IrType::Boolean)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IrType::Number => "num",
            IrType::String => "str",
            IrType::Boolean => "bool",
            IrType::Object => "object",
            IrType::Array => "array",
            IrType::Function => "fn",
            IrType::Any => "any",
            IrType::Never => "never",
            IrType::Void => "void",
        };
        f.write_str(s)
    }
}

/// Operand specialization of an arithmetic or comparison op
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    /// Unspecialized; lowered to a runtime stub
    Any,
    /// Both operands proven Number
    Num,
    /// Both operands proven String
    Str,
    /// Both operands proven Boolean
    Bool,
}

impl fmt::Display for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OperandKind::Any => "any",
            OperandKind::Num => "num",
            OperandKind::Str => "str",
            OperandKind::Bool => "bool",
        })
    }
}

/// Ownership state of a binding at a program point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    Owned,
    /// Tombstoned; any later use is an error
    Moved,
    BorrowedImmutable,
    BorrowedMutable,
    /// Held by a closure environment
    Captured,
}

impl fmt::Display for Ownership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ownership::Owned => "owned",
            Ownership::Moved => "moved",
            Ownership::BorrowedImmutable => "borrowed",
            Ownership::BorrowedMutable => "borrowed mutably",
            Ownership::Captured => "captured",
        })
    }
}

/// Where a binding lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Stack,
    Heap,
    Register,
}

impl StorageClass {
    /// Borrowed bindings are references on the stack; primitives sit in
    /// registers with copy semantics; everything else is heap-allocated and moved.
    pub fn derive(ty: IrType, ownership: Ownership) -> StorageClass {
        match ownership {
            Ownership::BorrowedImmutable | Ownership::BorrowedMutable => StorageClass::Stack,
            _ if ty.is_copy() => StorageClass::Register,
            _ => StorageClass::Heap,
        }
    }

    /// Whether a `move` out of this storage tombstones the source
    pub fn has_move_semantics(self) -> bool {
        !matches!(self, StorageClass::Register)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StorageClass::Stack => "stack",
            StorageClass::Heap => "heap",
            StorageClass::Register => "register",
        })
    }
}

/// How a backend realizes an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompileStrategy {
    /// Direct native instructions
    Inline,
    /// Call into the tagged-value runtime
    StubCall,
    /// No code; the result aliases an existing value
    NoOp,
}
