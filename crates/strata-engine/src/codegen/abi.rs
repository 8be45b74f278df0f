//! NaN-boxing helpers emitted as Cranelift IR
//!
//! Mirrors the encoding in `strata_runtime::value`; the constants are
//! taken from there so both sides cannot drift apart.

use cranelift_codegen::ir::{self, condcodes::IntCC, types, AbiParam, InstBuilder, MemFlags};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::FunctionBuilder;
use strata_runtime::value::{BOOL_TAG_BASE, CANONICAL_NAN, NAN_BOX_BASE, TRUE_BITS};

/// Every value crosses function boundaries as one 64-bit word
pub const WORD: ir::Type = types::I64;

/// `extern "C" fn(env: u64, args: *const u64, argc: u64) -> u64`
pub fn entry_signature(call_conv: CallConv) -> ir::Signature {
    let mut sig = ir::Signature::new(call_conv);
    sig.params.push(AbiParam::new(WORD));
    sig.params.push(AbiParam::new(WORD));
    sig.params.push(AbiParam::new(WORD));
    sig.returns.push(AbiParam::new(WORD));
    sig
}

/// `extern "C" fn(context: u64, index: u64)`, the JIT prologue hook
pub fn enter_hook_signature(call_conv: CallConv) -> ir::Signature {
    let mut sig = ir::Signature::new(call_conv);
    sig.params.push(AbiParam::new(WORD));
    sig.params.push(AbiParam::new(WORD));
    sig
}

/// `int main(void)` for the AOT entry object
pub fn c_main_signature(call_conv: CallConv) -> ir::Signature {
    let mut sig = ir::Signature::new(call_conv);
    sig.returns.push(AbiParam::new(types::I32));
    sig
}

pub fn emit_word(builder: &mut FunctionBuilder<'_>, bits: u64) -> ir::Value {
    builder.ins().iconst(WORD, bits as i64)
}

/// Box an f64, canonicalizing NaNs that would alias the tagged space
pub fn emit_box_f64(builder: &mut FunctionBuilder<'_>, val: ir::Value) -> ir::Value {
    let bits = builder.ins().bitcast(WORD, MemFlags::new(), val);
    let base = builder.ins().iconst(WORD, NAN_BOX_BASE as i64);
    let masked = builder.ins().band(bits, base);
    let collides = builder.ins().icmp(IntCC::Equal, masked, base);
    let canonical = builder.ins().iconst(WORD, CANONICAL_NAN as i64);
    builder.ins().select(collides, canonical, bits)
}

/// Number words are raw IEEE bits
pub fn emit_unbox_f64(builder: &mut FunctionBuilder<'_>, val: ir::Value) -> ir::Value {
    builder.ins().bitcast(types::F64, MemFlags::new(), val)
}

/// Box an `i8` condition (0 or 1)
pub fn emit_box_bool(builder: &mut FunctionBuilder<'_>, cond: ir::Value) -> ir::Value {
    let extended = builder.ins().uextend(WORD, cond);
    let base = builder.ins().iconst(WORD, BOOL_TAG_BASE as i64);
    builder.ins().bor(base, extended)
}

/// `i8` truth of a word already known to be a boolean
pub fn emit_bool_is_true(builder: &mut FunctionBuilder<'_>, val: ir::Value) -> ir::Value {
    builder.ins().icmp_imm(IntCC::Equal, val, TRUE_BITS as i64)
}

/// Logical not of a boxed boolean: flips the payload bit
pub fn emit_bool_not(builder: &mut FunctionBuilder<'_>, val: ir::Value) -> ir::Value {
    builder.ins().bxor_imm(val, 1)
}
