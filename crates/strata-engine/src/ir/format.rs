//! Canonical text form of the IR
//!
//! Deterministic: functions are sorted by name, blocks and ops keep their
//! order, and nothing depends on hash-map iteration. The text is what IR
//! dumps contain and what the object cache hashes.

use std::fmt::{self, Write};

use super::function::{BasicBlock, IrFunction, IrModule};
use super::instr::{FuncId, IrOp, Literal, Terminator};

/// Bumped whenever the text form or op semantics change
pub const IR_FORMAT_VERSION: u32 = 1;

/// Render a module in canonical form
pub fn serialize_module(module: &IrModule) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_module(&mut out, module);
    out
}

/// Render one function; direct-call targets resolve through `module` when given
pub fn serialize_function(func: &IrFunction, module: Option<&IrModule>) -> String {
    let mut out = String::new();
    let _ = write_function(&mut out, func, module);
    out
}

fn write_module(out: &mut String, module: &IrModule) -> fmt::Result {
    writeln!(
        out,
        "; strata ir v{} abi v{}",
        IR_FORMAT_VERSION,
        strata_runtime::ABI_VERSION
    )?;
    writeln!(out, "module {}", module.name)?;
    for global in &module.globals {
        writeln!(out, "global {:?}", global)?;
    }
    let mut functions: Vec<&IrFunction> = module.functions.iter().collect();
    functions.sort_by(|a, b| a.name.cmp(&b.name));
    for func in functions {
        writeln!(out)?;
        write_function(out, func, Some(module))?;
    }
    Ok(())
}

struct Names<'a>(Option<&'a IrModule>);

impl Names<'_> {
    fn func(&self, id: FuncId) -> String {
        match self.0.and_then(|m| m.function(id)) {
            Some(f) => format!("@{}", f.name),
            None => id.to_string(),
        }
    }
}

fn write_function(out: &mut String, func: &IrFunction, module: Option<&IrModule>) -> fmt::Result {
    let names = Names(module);
    write!(out, "fn {}(", func.name)?;
    for (i, param) in func.params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{}: {}", param.name, param.ty)?;
    }
    writeln!(out, ") -> {} {{", func.return_ty)?;
    if !func.locals.is_empty() {
        out.push_str("  locals");
        for (slot, local) in func.locals.iter().enumerate() {
            write!(out, " ${}: {}", slot, local.ty)?;
        }
        out.push('\n');
    }
    for block in &func.blocks {
        write_block(out, func, block, &names)?;
    }
    writeln!(out, "}}")
}

fn write_block(out: &mut String, func: &IrFunction, block: &BasicBlock, names: &Names<'_>) -> fmt::Result {
    writeln!(out, "{}:", block.id)?;
    for op in &block.ops {
        out.push_str("  ");
        if let Some(dest) = op.dest() {
            write!(out, "{}: {} = ", dest, func.value_type(dest))?;
        }
        write_op(out, op, names)?;
        out.push('\n');
    }
    out.push_str("  ");
    write_terminator(out, &block.terminator)?;
    out.push('\n');
    Ok(())
}

fn write_literal(out: &mut String, value: &Literal, names: &Names<'_>) -> fmt::Result {
    match value {
        Literal::Function(id) => write!(out, "fn {}", names.func(*id)),
        other => write!(out, "{}", other),
    }
}

fn write_args(out: &mut String, args: &[crate::ir::ValueId]) -> fmt::Result {
    out.push('(');
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write!(out, "{}", arg)?;
    }
    out.push(')');
    Ok(())
}

fn write_op(out: &mut String, op: &IrOp, names: &Names<'_>) -> fmt::Result {
    match op {
        IrOp::Const { value, .. } => {
            out.push_str("const ");
            write_literal(out, value, names)
        }
        IrOp::Param { index, .. } => write!(out, "param {}", index),
        IrOp::Binary { op, kind, lhs, rhs, .. } => {
            write!(out, "{}.{} {}, {}", op.mnemonic(), kind, lhs, rhs)
        }
        IrOp::Unary { op, kind, operand, .. } => write!(out, "{}.{} {}", op.mnemonic(), kind, operand),
        IrOp::Copy { src, .. } => write!(out, "copy {}", src),
        IrOp::Phi { incoming, .. } => {
            out.push_str("phi [");
            for (i, (pred, value)) in incoming.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write!(out, "{}: {}", pred, value)?;
            }
            out.push(']');
            Ok(())
        }
        IrOp::LoadLocal { slot, .. } => write!(out, "load.local ${}", slot),
        IrOp::StoreLocal { slot, value } => write!(out, "store.local ${}, {}", slot, value),
        IrOp::LoadGlobal { name, .. } => write!(out, "load.global {:?}", name),
        IrOp::StoreGlobal { name, value } => write!(out, "store.global {:?}, {}", name, value),
        IrOp::NewObject { .. } => out.write_str("new.object"),
        IrOp::NewArray { .. } => out.write_str("new.array"),
        IrOp::GetProp { object, name, .. } => write!(out, "get.prop {}, .{}", object, name),
        IrOp::SetProp { object, name, value } => write!(out, "set.prop {}, .{}, {}", object, name, value),
        IrOp::GetElem { object, key, .. } => write!(out, "get.elem {}, {}", object, key),
        IrOp::SetElem { object, key, value } => write!(out, "set.elem {}, {}, {}", object, key, value),
        IrOp::Call { callee, args, .. } => {
            write!(out, "call {}", callee)?;
            write_args(out, args)
        }
        IrOp::CallDirect { func, args, .. } => {
            write!(out, "call.direct {}", names.func(*func))?;
            write_args(out, args)
        }
        IrOp::MakeClosure { func, env, .. } => write!(out, "make.closure {}, {}", names.func(*func), env),
        IrOp::LoadEnv { .. } => out.write_str("load.env"),
        IrOp::Print { value } => write!(out, "print {}", value),
        IrOp::Move { src, .. } => write!(out, "move {}", src),
        IrOp::Clone { src, .. } => write!(out, "clone {}", src),
        IrOp::Borrow { src, .. } => write!(out, "borrow {}", src),
        IrOp::BorrowMut { src, .. } => write!(out, "borrow.mut {}", src),
        IrOp::EndBorrow { borrow } => write!(out, "end.borrow {}", borrow),
    }
}

fn write_terminator(out: &mut String, term: &Terminator) -> fmt::Result {
    match term {
        Terminator::Jump(target) => write!(out, "jump {}", target),
        Terminator::Branch { cond, then_block, else_block } => {
            write!(out, "branch {}, {}, {}", cond, then_block, else_block)
        }
        Terminator::Return(Some(value)) => write!(out, "return {}", value),
        Terminator::Return(None) => out.write_str("return"),
        Terminator::Unreachable => out.write_str("unreachable"),
    }
}

impl fmt::Display for IrFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize_function(self, None))
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&serialize_module(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, IrBuilder};

    fn sample(name: &str) -> IrFunction {
        let mut func = IrFunction::new(name);
        let mut b = IrBuilder::new(&mut func);
        let x = b.param("a0");
        let three = b.number(3.0);
        let sum = b.binary(BinaryOp::Add, x, three);
        b.store_local(0, sum);
        b.ret(Some(sum));
        func
    }

    #[test]
    fn test_function_text() {
        let text = serialize_function(&sample("f"), None);
        let expected = "\
fn f(a0: any) -> any {
  locals $0: any
bb0:
  v0: any = param 0
  v1: num = const 3
  v2: any = add.any v0, v1
  store.local $0, v2
  return v2
}
";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_module_sorted_by_name_with_header() {
        let mut module = IrModule::new("demo");
        module.add_function(sample("zeta"));
        module.add_function(sample("alpha"));
        let text = serialize_module(&module);
        assert!(text.starts_with(&format!("; strata ir v{} abi v{}\nmodule demo\n", IR_FORMAT_VERSION, strata_runtime::ABI_VERSION)));
        let alpha = text.find("fn alpha").unwrap();
        let zeta = text.find("fn zeta").unwrap();
        assert!(alpha < zeta);
        assert_eq!(text, serialize_module(&module.clone()));
    }
}
