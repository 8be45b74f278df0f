//! SSA intermediate representation shared by every stage after lowering

pub mod builder;
pub mod format;
pub mod function;
pub mod instr;
pub mod types;

pub use builder::{literal_type, IrBuilder};
pub use format::{serialize_module, IR_FORMAT_VERSION};
pub use function::{BasicBlock, IrFunction, IrModule, IrParam, Local};
pub use instr::{BinaryOp, BlockId, FuncId, IrOp, Literal, Terminator, UnaryOp, ValueId};
pub use types::{CompileStrategy, IrType, OperandKind, Ownership, StorageClass};
