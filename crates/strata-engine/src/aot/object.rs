//! Relocatable object emission with `cranelift-object`

use cranelift_codegen::ir::{types, InstBuilder};
use cranelift_codegen::isa::OwnedTargetIsa;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{default_libcall_names, Linkage, Module};
use cranelift_object::{ObjectBuilder, ObjectModule};
use strata_runtime::value::UNDEFINED_BITS;

use crate::codegen::abi::{self, emit_word, WORD};
use crate::codegen::{define_module, CodegenError, Stub};
use crate::ir::IrModule;

/// Symbol of the C entry point in executables
pub const ENTRY_SYMBOL: &str = "main";

fn object_module(isa: OwnedTargetIsa, name: &str, function_sections: bool) -> Result<ObjectModule, CodegenError> {
    let mut builder = ObjectBuilder::new(isa, name, default_libcall_names())?;
    builder.per_function_section(function_sections);
    Ok(ObjectModule::new(builder))
}

fn finish(module: ObjectModule) -> Result<Vec<u8>, CodegenError> {
    module.finish().emit().map_err(|e| CodegenError::Emit(e.to_string()))
}

/// Emit one IR module as an object file image
pub fn emit_module(ir: &IrModule, isa: OwnedTargetIsa, function_sections: bool) -> Result<Vec<u8>, CodegenError> {
    let mut module = object_module(isa, &ir.name, function_sections)?;
    let defined = define_module(&mut module, ir)?;
    tracing::debug!(module = %ir.name, functions = defined.functions.len(), "emitted object");
    finish(module)
}

/// Emit the object holding C `main`: call each module entry in order with
/// no environment and no arguments, shut the runtime down, return 0
pub fn emit_entry(module_mains: &[String], isa: OwnedTargetIsa) -> Result<Vec<u8>, CodegenError> {
    let mut module = object_module(isa, "strata_entry", false)?;
    let call_conv = module.isa().default_call_conv();
    let entry_sig = abi::entry_signature(call_conv);

    let mains = module_mains
        .iter()
        .map(|symbol| module.declare_function(symbol, Linkage::Import, &entry_sig))
        .collect::<Result<Vec<_>, _>>()?;
    let shutdown = module.declare_function(Stub::Shutdown.symbol(), Linkage::Import, &Stub::Shutdown.signature(call_conv))?;
    let c_main_sig = abi::c_main_signature(call_conv);
    let c_main = module.declare_function(ENTRY_SYMBOL, Linkage::Export, &c_main_sig)?;

    let mut ctx = module.make_context();
    ctx.func.signature = c_main_sig;
    let mut builder_ctx = FunctionBuilderContext::new();
    {
        let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
        let block = builder.create_block();
        builder.switch_to_block(block);
        builder.seal_block(block);

        let env = emit_word(&mut builder, UNDEFINED_BITS);
        let zero = builder.ins().iconst(WORD, 0);
        for id in mains {
            let callee = module.declare_func_in_func(id, builder.func);
            builder.ins().call(callee, &[env, zero, zero]);
        }
        let callee = module.declare_func_in_func(shutdown, builder.func);
        builder.ins().call(callee, &[]);
        let status = builder.ins().iconst(types::I32, 0);
        builder.ins().return_(&[status]);
        builder.finalize();
    }
    module.define_function(c_main, &mut ctx)?;
    module.clear_context(&mut ctx);
    finish(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{isa_for, symbol_name, OptLevel};
    use crate::ir::{IrBuilder, IrFunction};

    fn hello() -> IrModule {
        let mut module = IrModule::new("hello");
        let mut main = IrFunction::new("main");
        let mut b = IrBuilder::new(&mut main);
        let v = b.number(42.0);
        b.print(v);
        b.ret(None);
        module.add_function(main);
        module
    }

    fn contains(haystack: &[u8], needle: &str) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle.as_bytes())
    }

    #[test]
    fn test_module_object_exports_symbols() {
        let isa = isa_for(None, OptLevel::Speed, true).unwrap();
        let bytes = emit_module(&hello(), isa, false).unwrap();
        assert!(!bytes.is_empty());
        assert!(contains(&bytes, &symbol_name("hello", "main")));
        assert!(contains(&bytes, "strata_print"));
    }

    #[test]
    fn test_entry_object_calls_each_main() {
        let isa = isa_for(None, OptLevel::Speed, true).unwrap();
        let mains = vec![symbol_name("a", "main"), symbol_name("b", "main")];
        let bytes = emit_entry(&mains, isa).unwrap();
        assert!(contains(&bytes, "strata_a_main"));
        assert!(contains(&bytes, "strata_b_main"));
        assert!(contains(&bytes, "strata_rt_shutdown"));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let first = emit_module(&hello(), isa_for(None, OptLevel::Speed, true).unwrap(), true).unwrap();
        let second = emit_module(&hello(), isa_for(None, OptLevel::Speed, true).unwrap(), true).unwrap();
        assert_eq!(first, second);
    }
}
