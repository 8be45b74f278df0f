//! Blocks, functions and modules

use rustc_hash::{FxHashMap, FxHashSet};

use super::instr::{BlockId, FuncId, IrOp, Terminator, ValueId};
use super::types::IrType;

/// A basic block: leading phis, straight-line ops, one terminator
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub ops: Vec<IrOp>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        BasicBlock { id, ops: Vec::new(), terminator: Terminator::Unreachable }
    }

    /// Number of leading phi operations
    pub fn phi_count(&self) -> usize {
        self.ops.iter().take_while(|op| op.is_phi()).count()
    }
}

/// A formal parameter
#[derive(Debug, Clone, PartialEq)]
pub struct IrParam {
    pub name: String,
    pub ty: IrType,
}

/// A local variable slot
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Local {
    pub ty: IrType,
}

/// A function in SSA form. Block 0 is the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IrFunction {
    pub name: String,
    pub params: Vec<IrParam>,
    pub return_ty: IrType,
    pub locals: Vec<Local>,
    pub blocks: Vec<BasicBlock>,
    /// Type of each value (filled by lowering, narrowed by inference)
    pub value_types: FxHashMap<ValueId, IrType>,
    pub next_value: u32,
}

impl IrFunction {
    pub fn new(name: impl Into<String>) -> Self {
        IrFunction {
            name: name.into(),
            params: Vec::new(),
            return_ty: IrType::Any,
            locals: Vec::new(),
            blocks: Vec::new(),
            value_types: FxHashMap::default(),
            next_value: 0,
        }
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn alloc_value(&mut self, ty: IrType) -> ValueId {
        let value = ValueId(self.next_value);
        self.next_value += 1;
        self.value_types.insert(value, ty);
        value
    }

    pub fn value_type(&self, value: ValueId) -> IrType {
        self.value_types.get(&value).copied().unwrap_or_default()
    }

    pub fn set_value_type(&mut self, value: ValueId, ty: IrType) {
        self.value_types.insert(value, ty);
    }

    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::new(id));
        id
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        &mut self.blocks[id.index()]
    }

    pub fn has_block(&self, id: BlockId) -> bool {
        id.index() < self.blocks.len()
    }

    /// Ensure `slot` exists in the local table
    pub fn ensure_local(&mut self, slot: u32) {
        let needed = slot as usize + 1;
        if self.locals.len() < needed {
            self.locals.resize(needed, Local::default());
        }
    }

    pub fn op_count(&self) -> usize {
        self.blocks.iter().map(|b| b.ops.len()).sum()
    }

    /// Block and position of each value definition
    pub fn definitions(&self) -> FxHashMap<ValueId, (BlockId, usize)> {
        let mut defs = FxHashMap::default();
        for block in &self.blocks {
            for (index, op) in block.ops.iter().enumerate() {
                if let Some(dest) = op.dest() {
                    defs.entry(dest).or_insert((block.id, index));
                }
            }
        }
        defs
    }

    /// Rewrite every use of a value in ops and terminators
    pub fn replace_uses(&mut self, mut f: impl FnMut(ValueId) -> ValueId) {
        for block in &mut self.blocks {
            for op in &mut block.ops {
                op.map_uses(&mut f);
            }
            block.terminator.map_uses(&mut f);
        }
    }

    /// Values whose identity the ownership checker tracks: sources of
    /// moves and borrows, followed back through copies
    pub fn ownership_sources(&self) -> FxHashSet<ValueId> {
        let mut values = FxHashSet::default();
        for op in self.blocks.iter().flat_map(|b| &b.ops) {
            if let IrOp::Move { src, .. } | IrOp::Borrow { src, .. } | IrOp::BorrowMut { src, .. } = op {
                values.insert(*src);
            }
        }
        let mut changed = !values.is_empty();
        while changed {
            changed = false;
            for op in self.blocks.iter().flat_map(|b| &b.ops) {
                if let IrOp::Copy { dest, src } = op {
                    if values.contains(dest) {
                        changed |= values.insert(*src);
                    }
                }
            }
        }
        values
    }

    /// Drop blocks whose `keep` flag is false and renumber the rest densely.
    /// Phi inputs from dropped blocks are removed.
    pub fn retain_blocks(&mut self, keep: &[bool]) {
        let mut remap: FxHashMap<BlockId, BlockId> = FxHashMap::default();
        let mut next = 0u32;
        for (index, &kept) in keep.iter().enumerate().take(self.blocks.len()) {
            if kept {
                remap.insert(BlockId(index as u32), BlockId(next));
                next += 1;
            }
        }
        let blocks = std::mem::take(&mut self.blocks);
        for (index, mut block) in blocks.into_iter().enumerate() {
            if !keep.get(index).copied().unwrap_or(false) {
                continue;
            }
            block.id = remap[&block.id];
            for op in &mut block.ops {
                if let IrOp::Phi { incoming, .. } = op {
                    incoming.retain(|(pred, _)| remap.contains_key(pred));
                    for (pred, _) in incoming.iter_mut() {
                        *pred = remap[&*pred];
                    }
                }
            }
            block.terminator.map_targets(|t| remap.get(&t).copied().unwrap_or(t));
            self.blocks.push(block);
        }
    }
}

/// A compilation unit: functions (`main` first) plus referenced globals
#[derive(Debug, Clone, PartialEq)]
pub struct IrModule {
    pub name: String,
    pub functions: Vec<IrFunction>,
    /// Global names in first-use order
    pub globals: Vec<String>,
}

impl IrModule {
    pub fn new(name: impl Into<String>) -> Self {
        IrModule { name: name.into(), functions: Vec::new(), globals: Vec::new() }
    }

    pub fn add_function(&mut self, function: IrFunction) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(function);
        id
    }

    pub fn function(&self, id: FuncId) -> Option<&IrFunction> {
        self.functions.get(id.index())
    }

    pub fn find(&self, name: &str) -> Option<FuncId> {
        self.functions.iter().position(|f| f.name == name).map(|i| FuncId(i as u32))
    }

    pub fn note_global(&mut self, name: &str) {
        if !self.globals.iter().any(|g| g == name) {
            self.globals.push(name.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retain_blocks_renumbers_and_prunes_phis() {
        let mut func = IrFunction::new("f");
        let b0 = func.add_block();
        let b1 = func.add_block();
        let b2 = func.add_block();
        let v0 = func.alloc_value(IrType::Number);
        let v1 = func.alloc_value(IrType::Number);
        let v2 = func.alloc_value(IrType::Number);
        func.block_mut(b0).terminator = Terminator::Jump(b2);
        func.block_mut(b1).terminator = Terminator::Jump(b2);
        func.block_mut(b2).ops.push(IrOp::Phi { dest: v2, incoming: vec![(b0, v0), (b1, v1)] });
        func.block_mut(b2).terminator = Terminator::Return(Some(v2));

        func.retain_blocks(&[true, false, true]);

        assert_eq!(func.blocks.len(), 2);
        assert_eq!(func.blocks[0].terminator, Terminator::Jump(BlockId(1)));
        assert_eq!(func.blocks[1].id, BlockId(1));
        assert_eq!(func.blocks[1].ops[0], IrOp::Phi { dest: v2, incoming: vec![(BlockId(0), v0)] });
    }

    #[test]
    fn test_module_lookup_and_globals() {
        let mut module = IrModule::new("m");
        module.add_function(IrFunction::new("main"));
        let f = module.add_function(IrFunction::new("func_3"));
        assert_eq!(module.find("func_3"), Some(f));
        assert_eq!(module.find("nope"), None);
        module.note_global("x");
        module.note_global("y");
        module.note_global("x");
        assert_eq!(module.globals, vec!["x".to_string(), "y".to_string()]);
    }
}
