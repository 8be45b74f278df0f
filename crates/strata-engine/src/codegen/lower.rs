//! IR → Cranelift IR lowering
//!
//! Every IR value is one 64-bit tagged word. Blocks are lowered in reverse
//! post-order so each definition is emitted before its uses; phis become
//! Cranelift block parameters fed by the predecessor's jump. Local slots
//! are Cranelift variables initialized to `undefined`.
//!
//! Under [`CallLinkage::Dispatch`] direct calls go through the JIT address
//! table instead of a static relocation, and every prologue reports the call
//! to [`ENTER_HOOK_SYMBOL`].

use cranelift_codegen::ir::{
    self, condcodes::FloatCC, condcodes::IntCC, BlockArg, InstBuilder, MemFlags, StackSlotData, StackSlotKind,
    TrapCode, UserFuncName,
};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_module::{DataDescription, DataId, FuncId as ClifFuncId, Linkage, Module};
use rustc_hash::FxHashMap;
use strata_runtime::value::{FUNCTION_TAG_BASE, NULL_BITS, UNDEFINED_BITS};
use strata_runtime::Value;

use super::abi::{self, emit_word, WORD};
use super::stubs::{Stub, StubTable};
use super::CodegenError;
use crate::analysis::Cfg;
use crate::ir::{
    BinaryOp, BlockId, CompileStrategy, FuncId, IrFunction, IrModule, IrOp, IrType, Literal, OperandKind,
    Terminator, UnaryOp, ValueId,
};

/// Symbol of an IR function inside generated code
pub fn symbol_name(module: &str, function: &str) -> String {
    fn clean(s: &str) -> String {
        s.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect()
    }
    format!("strata_{}_{}", clean(module), clean(function))
}

/// Imported by dispatch-linked code; see [`CallLinkage::Dispatch`]
pub const ENTER_HOOK_SYMBOL: &str = "strata_jit_enter";

/// How generated functions reach the other functions of their module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallLinkage {
    /// Static calls, resolved when the module is finalized or linked
    #[default]
    Direct,
    /// Function `i` is called through the entry word at `slots + 8 * i`, and
    /// its prologue calls the enter hook with `(context, i)`. Both addresses
    /// must stay valid for as long as the code can run.
    Dispatch { context: u64, slots: u64 },
}

/// Declarations produced for one IR module, indexed like `IrModule::functions`
#[derive(Debug, Clone)]
pub struct DefinedModule {
    pub functions: Vec<ClifFuncId>,
    pub symbols: Vec<String>,
}

/// Declare and define every function of `ir` in `module` with direct calls
pub fn define_module<M: Module>(module: &mut M, ir: &IrModule) -> Result<DefinedModule, CodegenError> {
    define_module_with(module, ir, CallLinkage::Direct)
}

pub fn define_module_with<M: Module>(
    module: &mut M,
    ir: &IrModule,
    linkage: CallLinkage,
) -> Result<DefinedModule, CodegenError> {
    let stubs = StubTable::declare(module)?;
    let sig = abi::entry_signature(module.isa().default_call_conv());
    let hook = match linkage {
        CallLinkage::Direct => None,
        CallLinkage::Dispatch { .. } => {
            let hook_sig = abi::enter_hook_signature(module.isa().default_call_conv());
            Some(module.declare_function(ENTER_HOOK_SYMBOL, Linkage::Import, &hook_sig)?)
        }
    };

    let mut functions = Vec::with_capacity(ir.functions.len());
    let mut symbols = Vec::with_capacity(ir.functions.len());
    for func in &ir.functions {
        let symbol = symbol_name(&ir.name, &func.name);
        functions.push(module.declare_function(&symbol, Linkage::Export, &sig)?);
        symbols.push(symbol);
    }

    let mut strings = StringPool::new(symbol_name(&ir.name, "str"));
    let mut ctx = module.make_context();
    let mut builder_ctx = FunctionBuilderContext::new();
    for (index, func) in ir.functions.iter().enumerate() {
        ctx.func.signature = sig.clone();
        ctx.func.name = UserFuncName::user(0, index as u32);
        let builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
        let calls = Calls { functions: &functions, linkage, hook, index };
        lower_function(module, &stubs, calls, &mut strings, func, builder)?;
        module.define_function(functions[index], &mut ctx)?;
        module.clear_context(&mut ctx);
        tracing::debug!(module = %ir.name, function = %func.name, symbol = %symbols[index], "defined function");
    }
    strings.define(module)?;

    Ok(DefinedModule { functions, symbols })
}

/// Read-only byte strings referenced by generated code (string literals,
/// property and global names), one data object each, NUL-terminated
struct StringPool {
    prefix: String,
    ids: FxHashMap<String, DataId>,
    pending: Vec<(DataId, Vec<u8>)>,
}

impl StringPool {
    fn new(prefix: String) -> Self {
        StringPool { prefix, ids: FxHashMap::default(), pending: Vec::new() }
    }

    fn intern<M: Module>(&mut self, module: &mut M, text: &str) -> Result<DataId, CodegenError> {
        if let Some(id) = self.ids.get(text) {
            return Ok(*id);
        }
        let name = format!("{}{}", self.prefix, self.pending.len());
        let id = module.declare_data(&name, Linkage::Local, false, false)?;
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.pending.push((id, bytes));
        self.ids.insert(text.to_string(), id);
        Ok(id)
    }

    fn define<M: Module>(self, module: &mut M) -> Result<(), CodegenError> {
        for (id, bytes) in self.pending {
            let mut desc = DataDescription::new();
            desc.define(bytes.into_boxed_slice());
            module.define_data(id, &desc)?;
        }
        Ok(())
    }
}

/// How the function being lowered calls its siblings
#[derive(Clone, Copy)]
struct Calls<'a> {
    functions: &'a [ClifFuncId],
    linkage: CallLinkage,
    hook: Option<ClifFuncId>,
    /// Position of the function being lowered
    index: usize,
}

struct FunctionLowering<'a, M: Module> {
    module: &'a mut M,
    stubs: &'a StubTable,
    functions: &'a [ClifFuncId],
    linkage: CallLinkage,
    entry_sig: Option<ir::SigRef>,
    strings: &'a mut StringPool,
    func: &'a IrFunction,
    values: FxHashMap<ValueId, ir::Value>,
    blocks: FxHashMap<BlockId, ir::Block>,
    locals: Vec<Variable>,
    func_refs: FxHashMap<ClifFuncId, ir::FuncRef>,
    data_refs: FxHashMap<DataId, ir::GlobalValue>,
    env: ir::Value,
    args: ir::Value,
    argc: ir::Value,
}

fn lower_function<M: Module>(
    module: &mut M,
    stubs: &StubTable,
    calls: Calls<'_>,
    strings: &mut StringPool,
    func: &IrFunction,
    mut builder: FunctionBuilder<'_>,
) -> Result<(), CodegenError> {
    let cfg = Cfg::compute(func);
    let Some(&entry_id) = cfg.rpo.first() else {
        return Err(CodegenError::Unsupported { function: func.name.clone(), op: "empty function".into() });
    };

    let mut blocks = FxHashMap::default();
    for &id in &cfg.rpo {
        blocks.insert(id, builder.create_block());
    }
    let entry = blocks[&entry_id];
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    let (env, args, argc) = {
        let params = builder.block_params(entry);
        (params[0], params[1], params[2])
    };

    if let (CallLinkage::Dispatch { context, .. }, Some(hook)) = (calls.linkage, calls.hook) {
        let hook = module.declare_func_in_func(hook, builder.func);
        let context = emit_word(&mut builder, context);
        let index = builder.ins().iconst(WORD, calls.index as i64);
        builder.ins().call(hook, &[context, index]);
    }

    let undefined = emit_word(&mut builder, UNDEFINED_BITS);
    let mut locals = Vec::with_capacity(func.locals.len());
    for _ in &func.locals {
        let var = builder.declare_var(WORD);
        builder.def_var(var, undefined);
        locals.push(var);
    }

    let mut lowering = FunctionLowering {
        module,
        stubs,
        functions: calls.functions,
        linkage: calls.linkage,
        entry_sig: None,
        strings,
        func,
        values: FxHashMap::default(),
        blocks,
        locals,
        func_refs: FxHashMap::default(),
        data_refs: FxHashMap::default(),
        env,
        args,
        argc,
    };

    for &id in &cfg.rpo {
        let target = lowering.blocks[&id];
        for op in &func.block(id).ops {
            if let IrOp::Phi { dest, .. } = op {
                let param = builder.append_block_param(target, WORD);
                lowering.values.insert(*dest, param);
            }
        }
    }

    for (position, &id) in cfg.rpo.iter().enumerate() {
        if position > 0 {
            builder.switch_to_block(lowering.blocks[&id]);
        }
        lowering.lower_block(&mut builder, id)?;
    }

    builder.seal_all_blocks();
    builder.finalize();
    Ok(())
}

impl<M: Module> FunctionLowering<'_, M> {
    fn unsupported(&self, what: impl Into<String>) -> CodegenError {
        CodegenError::Unsupported { function: self.func.name.clone(), op: what.into() }
    }

    fn value(&self, id: ValueId) -> Result<ir::Value, CodegenError> {
        self.values.get(&id).copied().ok_or_else(|| self.unsupported(format!("use of undefined {}", id)))
    }

    fn func_ref(&mut self, builder: &mut FunctionBuilder<'_>, id: ClifFuncId) -> ir::FuncRef {
        if let Some(existing) = self.func_refs.get(&id) {
            return *existing;
        }
        let func_ref = self.module.declare_func_in_func(id, builder.func);
        self.func_refs.insert(id, func_ref);
        func_ref
    }

    fn entry_sig(&mut self, builder: &mut FunctionBuilder<'_>) -> ir::SigRef {
        if let Some(sig) = self.entry_sig {
            return sig;
        }
        let sig = builder.import_signature(abi::entry_signature(self.module.isa().default_call_conv()));
        self.entry_sig = Some(sig);
        sig
    }

    fn call_stub(&mut self, builder: &mut FunctionBuilder<'_>, stub: Stub, args: &[ir::Value]) -> Option<ir::Value> {
        let func_ref = self.func_ref(builder, self.stubs.id(stub));
        let inst = builder.ins().call(func_ref, args);
        builder.inst_results(inst).first().copied()
    }

    fn call_stub_value(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        stub: Stub,
        args: &[ir::Value],
    ) -> Result<ir::Value, CodegenError> {
        self.call_stub(builder, stub, args)
            .ok_or_else(|| self.unsupported(format!("{} returns nothing", stub.symbol())))
    }

    /// Pointer and length of an interned byte string
    fn bytes(&mut self, builder: &mut FunctionBuilder<'_>, text: &str) -> Result<(ir::Value, ir::Value), CodegenError> {
        let data = self.strings.intern(&mut *self.module, text)?;
        let global = match self.data_refs.get(&data) {
            Some(global) => *global,
            None => {
                let global = self.module.declare_data_in_func(data, builder.func);
                self.data_refs.insert(data, global);
                global
            }
        };
        let ptr = builder.ins().global_value(WORD, global);
        let len = builder.ins().iconst(WORD, text.len() as i64);
        Ok((ptr, len))
    }

    /// Tagged function value for a function of this module
    fn function_value(&mut self, builder: &mut FunctionBuilder<'_>, target: FuncId) -> Result<ir::Value, CodegenError> {
        let id = self.functions.get(target.index()).copied().ok_or_else(|| CodegenError::UnresolvedFunction {
            function: self.func.name.clone(),
            callee: target,
        })?;
        let func_ref = self.func_ref(builder, id);
        let addr = builder.ins().func_addr(WORD, func_ref);
        Ok(builder.ins().bor_imm(addr, FUNCTION_TAG_BASE as i64))
    }

    /// Spill call arguments to a stack array; returns (pointer, count)
    fn spill_args(&mut self, builder: &mut FunctionBuilder<'_>, args: &[ValueId]) -> Result<(ir::Value, ir::Value), CodegenError> {
        let argc = builder.ins().iconst(WORD, args.len() as i64);
        if args.is_empty() {
            let null = builder.ins().iconst(WORD, 0);
            return Ok((null, argc));
        }
        let slot = builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            (args.len() * 8) as u32,
            3,
        ));
        for (index, arg) in args.iter().enumerate() {
            let value = self.value(*arg)?;
            builder.ins().stack_store(value, slot, (index * 8) as i32);
        }
        let ptr = builder.ins().stack_addr(WORD, slot, 0);
        Ok((ptr, argc))
    }

    /// `args[index]` when the caller passed it, `undefined` otherwise
    fn param(&mut self, builder: &mut FunctionBuilder<'_>, index: u32) -> ir::Value {
        let present = builder.create_block();
        let done = builder.create_block();
        let result = builder.append_block_param(done, WORD);
        let passed = builder.ins().icmp_imm(IntCC::UnsignedGreaterThan, self.argc, index as i64);
        let undefined = emit_word(builder, UNDEFINED_BITS);
        builder.ins().brif(passed, present, &[], done, &[BlockArg::Value(undefined)]);
        builder.switch_to_block(present);
        let loaded = builder.ins().load(WORD, MemFlags::trusted(), self.args, (index as i32) * 8);
        builder.ins().jump(done, &[BlockArg::Value(loaded)]);
        builder.switch_to_block(done);
        result
    }

    fn local(&self, slot: u32) -> Result<Variable, CodegenError> {
        self.locals.get(slot as usize).copied().ok_or_else(|| self.unsupported(format!("local ${}", slot)))
    }

    fn lower_block(&mut self, builder: &mut FunctionBuilder<'_>, id: BlockId) -> Result<(), CodegenError> {
        let func = self.func;
        let block = func.block(id);
        for op in &block.ops {
            let result = match op.strategy() {
                CompileStrategy::NoOp => self.alias(op)?,
                CompileStrategy::Inline => self.inline(builder, op)?,
                CompileStrategy::StubCall => self.stub(builder, op)?,
            };
            if let (Some(dest), Some(value)) = (op.dest(), result) {
                self.values.insert(dest, value);
            }
        }
        self.lower_terminator(builder, id, &block.terminator)
    }

    fn alias(&self, op: &IrOp) -> Result<Option<ir::Value>, CodegenError> {
        match op {
            IrOp::Copy { src, .. } | IrOp::Move { src, .. } | IrOp::Borrow { src, .. } | IrOp::BorrowMut { src, .. } => {
                self.value(*src).map(Some)
            }
            // Phi parameters are bound before lowering starts.
            IrOp::Phi { .. } | IrOp::EndBorrow { .. } => Ok(None),
            other => Err(self.unsupported(format!("{:?} as a no-op", other))),
        }
    }

    fn inline(&mut self, builder: &mut FunctionBuilder<'_>, op: &IrOp) -> Result<Option<ir::Value>, CodegenError> {
        let value = match op {
            IrOp::Const { value, .. } => match value {
                Literal::Number(n) => emit_word(builder, Value::number(*n).to_bits()),
                Literal::Boolean(b) => emit_word(builder, Value::boolean(*b).to_bits()),
                Literal::Null => emit_word(builder, NULL_BITS),
                Literal::Undefined => emit_word(builder, UNDEFINED_BITS),
                Literal::Function(target) => self.function_value(builder, *target)?,
                Literal::String(_) => return Err(self.unsupported("inline string constant")),
            },
            IrOp::Param { index, .. } => self.param(builder, *index),
            IrOp::LoadEnv { .. } => self.env,
            IrOp::LoadLocal { slot, .. } => {
                let var = self.local(*slot)?;
                builder.use_var(var)
            }
            IrOp::StoreLocal { slot, value } => {
                let var = self.local(*slot)?;
                let value = self.value(*value)?;
                builder.def_var(var, value);
                return Ok(None);
            }
            IrOp::CallDirect { func: target, args, .. } => {
                let id = self.functions.get(target.index()).copied().ok_or_else(|| {
                    CodegenError::UnresolvedFunction { function: self.func.name.clone(), callee: *target }
                })?;
                let (ptr, argc) = self.spill_args(builder, args)?;
                let env = emit_word(builder, UNDEFINED_BITS);
                let inst = match self.linkage {
                    CallLinkage::Direct => {
                        let func_ref = self.func_ref(builder, id);
                        builder.ins().call(func_ref, &[env, ptr, argc])
                    }
                    CallLinkage::Dispatch { slots, .. } => {
                        let slot = emit_word(builder, slots + 8 * target.index() as u64);
                        let callee = builder.ins().atomic_load(WORD, MemFlags::trusted(), slot);
                        let sig = self.entry_sig(builder);
                        builder.ins().call_indirect(sig, callee, &[env, ptr, argc])
                    }
                };
                builder.inst_results(inst)[0]
            }
            IrOp::Binary { op: bin, kind, lhs, rhs, .. } => {
                let lhs = self.value(*lhs)?;
                let rhs = self.value(*rhs)?;
                self.inline_binary(builder, *bin, *kind, lhs, rhs)?
            }
            IrOp::Unary { op: un, kind, operand, .. } => {
                let operand = self.value(*operand)?;
                match (un, kind) {
                    (UnaryOp::Neg, OperandKind::Num) => {
                        let f = abi::emit_unbox_f64(builder, operand);
                        let negated = builder.ins().fneg(f);
                        abi::emit_box_f64(builder, negated)
                    }
                    (UnaryOp::Not, OperandKind::Bool) => abi::emit_bool_not(builder, operand),
                    _ => return Err(self.unsupported(format!("{}.{} inline", un.mnemonic(), kind))),
                }
            }
            other => return Err(self.unsupported(format!("{:?} inline", other))),
        };
        Ok(Some(value))
    }

    fn inline_binary(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        op: BinaryOp,
        kind: OperandKind,
        lhs: ir::Value,
        rhs: ir::Value,
    ) -> Result<ir::Value, CodegenError> {
        match kind {
            OperandKind::Num => {
                let l = abi::emit_unbox_f64(builder, lhs);
                let r = abi::emit_unbox_f64(builder, rhs);
                let arith = match op {
                    BinaryOp::Add => Some(builder.ins().fadd(l, r)),
                    BinaryOp::Sub => Some(builder.ins().fsub(l, r)),
                    BinaryOp::Mul => Some(builder.ins().fmul(l, r)),
                    BinaryOp::Div => Some(builder.ins().fdiv(l, r)),
                    _ => None,
                };
                if let Some(result) = arith {
                    return Ok(abi::emit_box_f64(builder, result));
                }
                let cc = match op {
                    BinaryOp::Eq => FloatCC::Equal,
                    BinaryOp::Ne => FloatCC::NotEqual,
                    BinaryOp::Lt => FloatCC::LessThan,
                    BinaryOp::Le => FloatCC::LessThanOrEqual,
                    BinaryOp::Gt => FloatCC::GreaterThan,
                    BinaryOp::Ge => FloatCC::GreaterThanOrEqual,
                    _ => return Err(self.unsupported(format!("{}.num inline", op.mnemonic()))),
                };
                let cmp = builder.ins().fcmp(cc, l, r);
                Ok(abi::emit_box_bool(builder, cmp))
            }
            OperandKind::Bool => {
                let cc = match op {
                    BinaryOp::Eq => IntCC::Equal,
                    BinaryOp::Ne => IntCC::NotEqual,
                    _ => return Err(self.unsupported(format!("{}.bool inline", op.mnemonic()))),
                };
                let cmp = builder.ins().icmp(cc, lhs, rhs);
                Ok(abi::emit_box_bool(builder, cmp))
            }
            OperandKind::Str | OperandKind::Any => Err(self.unsupported(format!("{}.{} inline", op.mnemonic(), kind))),
        }
    }

    fn stub(&mut self, builder: &mut FunctionBuilder<'_>, op: &IrOp) -> Result<Option<ir::Value>, CodegenError> {
        let value = match op {
            IrOp::Const { value: Literal::String(text), .. } => {
                let (ptr, len) = self.bytes(builder, text)?;
                self.call_stub_value(builder, Stub::AllocString, &[ptr, len])?
            }
            IrOp::Binary { op: bin, lhs, rhs, .. } => {
                let args = [self.value(*lhs)?, self.value(*rhs)?];
                self.call_stub_value(builder, Stub::for_binary(*bin), &args)?
            }
            IrOp::Unary { op: un, operand, .. } => {
                let args = [self.value(*operand)?];
                self.call_stub_value(builder, Stub::for_unary(*un), &args)?
            }
            IrOp::LoadGlobal { name, .. } => {
                let (ptr, len) = self.bytes(builder, name)?;
                self.call_stub_value(builder, Stub::LoadGlobal, &[ptr, len])?
            }
            IrOp::StoreGlobal { name, value } => {
                let value = self.value(*value)?;
                let (ptr, len) = self.bytes(builder, name)?;
                self.call_stub(builder, Stub::StoreGlobal, &[ptr, len, value]);
                return Ok(None);
            }
            IrOp::NewObject { .. } => self.call_stub_value(builder, Stub::AllocObject, &[])?,
            IrOp::NewArray { .. } => self.call_stub_value(builder, Stub::AllocArray, &[])?,
            IrOp::GetProp { object, name, .. } => {
                let object = self.value(*object)?;
                let (ptr, len) = self.bytes(builder, name)?;
                self.call_stub_value(builder, Stub::GetProp, &[object, ptr, len])?
            }
            IrOp::SetProp { object, name, value } => {
                let object = self.value(*object)?;
                let value = self.value(*value)?;
                let (ptr, len) = self.bytes(builder, name)?;
                self.call_stub(builder, Stub::SetProp, &[object, ptr, len, value]);
                return Ok(None);
            }
            IrOp::GetElem { object, key, .. } => {
                let args = [self.value(*object)?, self.value(*key)?];
                self.call_stub_value(builder, Stub::GetElem, &args)?
            }
            IrOp::SetElem { object, key, value } => {
                let args = [self.value(*object)?, self.value(*key)?, self.value(*value)?];
                self.call_stub(builder, Stub::SetElem, &args);
                return Ok(None);
            }
            IrOp::Call { callee, args, .. } => {
                let callee = self.value(*callee)?;
                let (ptr, argc) = self.spill_args(builder, args)?;
                self.call_stub_value(builder, Stub::Call, &[callee, ptr, argc])?
            }
            IrOp::MakeClosure { func: target, env, .. } => {
                let env = self.value(*env)?;
                let code = self.function_value(builder, *target)?;
                self.call_stub_value(builder, Stub::MakeClosure, &[code, env])?
            }
            IrOp::Print { value } => {
                let value = self.value(*value)?;
                self.call_stub(builder, Stub::Print, &[value]);
                return Ok(None);
            }
            IrOp::Clone { src, .. } => {
                let src = self.value(*src)?;
                self.call_stub_value(builder, Stub::Clone, &[src])?
            }
            other => return Err(self.unsupported(format!("{:?} as a stub call", other))),
        };
        Ok(Some(value))
    }

    /// Phi arguments for the edge `from → to`, in phi order
    fn edge_args(&self, from: BlockId, to: BlockId) -> Result<Vec<BlockArg>, CodegenError> {
        let mut args = Vec::new();
        for op in &self.func.block(to).ops {
            let IrOp::Phi { incoming, .. } = op else { break };
            let (_, value) = incoming
                .iter()
                .find(|(pred, _)| *pred == from)
                .ok_or_else(|| self.unsupported(format!("phi in {} without input from {}", to, from)))?;
            args.push(BlockArg::Value(self.value(*value)?));
        }
        Ok(args)
    }

    fn target(&self, id: BlockId) -> Result<ir::Block, CodegenError> {
        self.blocks.get(&id).copied().ok_or_else(|| self.unsupported(format!("branch to {}", id)))
    }

    fn lower_terminator(
        &mut self,
        builder: &mut FunctionBuilder<'_>,
        from: BlockId,
        terminator: &Terminator,
    ) -> Result<(), CodegenError> {
        match terminator {
            Terminator::Jump(to) => {
                let args = self.edge_args(from, *to)?;
                let target = self.target(*to)?;
                builder.ins().jump(target, &args);
            }
            Terminator::Branch { cond, then_block, else_block } => {
                let value = self.value(*cond)?;
                let truth = if self.func.value_type(*cond) == IrType::Boolean {
                    abi::emit_bool_is_true(builder, value)
                } else {
                    self.call_stub_value(builder, Stub::ToBoolean, &[value])?
                };
                let then_args = self.edge_args(from, *then_block)?;
                let else_args = self.edge_args(from, *else_block)?;
                let then_target = self.target(*then_block)?;
                let else_target = self.target(*else_block)?;
                builder.ins().brif(truth, then_target, &then_args, else_target, &else_args);
            }
            Terminator::Return(value) => {
                let result = match value {
                    Some(value) => self.value(*value)?,
                    None => emit_word(builder, UNDEFINED_BITS),
                };
                builder.ins().return_(&[result]);
            }
            Terminator::Unreachable => {
                let code = TrapCode::user(1).ok_or_else(|| self.unsupported("trap code"))?;
                builder.ins().trap(code);
            }
        }
        Ok(())
    }
}
