//! Control-flow graph of an IR function
//!
//! Edges to nonexistent blocks are dropped here; the verifier reports them.

use crate::ir::{BlockId, IrFunction};

/// Successor and predecessor lists plus a reverse post-order of reachable blocks
#[derive(Debug, Clone)]
pub struct Cfg {
    pub succs: Vec<Vec<BlockId>>,
    pub preds: Vec<Vec<BlockId>>,
    /// Reachable blocks in reverse post-order, entry first
    pub rpo: Vec<BlockId>,
    pub reachable: Vec<bool>,
}

impl Cfg {
    pub fn compute(func: &IrFunction) -> Self {
        let n = func.blocks.len();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for block in &func.blocks {
            for target in block.terminator.successors() {
                if target.index() < n {
                    succs[block.id.index()].push(target);
                    preds[target.index()].push(block.id);
                }
            }
        }

        let mut reachable = vec![false; n];
        let mut post = Vec::with_capacity(n);
        if n > 0 {
            // Iterative DFS: (block, next successor index)
            let mut stack = vec![(0usize, 0usize)];
            reachable[0] = true;
            while let Some((block, next)) = stack.last_mut() {
                let b = *block;
                if let Some(&succ) = succs[b].get(*next) {
                    *next += 1;
                    if !reachable[succ.index()] {
                        reachable[succ.index()] = true;
                        stack.push((succ.index(), 0));
                    }
                } else {
                    post.push(BlockId(b as u32));
                    stack.pop();
                }
            }
        }
        post.reverse();

        Cfg { succs, preds, rpo: post, reachable }
    }

    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        self.preds.get(block.index()).map_or(&[], |p| p.as_slice())
    }

    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        self.succs.get(block.index()).map_or(&[], |s| s.as_slice())
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.reachable.get(block.index()).copied().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrBuilder, IrFunction};

    #[test]
    fn test_diamond_with_dead_block() {
        let mut func = IrFunction::new("f");
        let mut b = IrBuilder::new(&mut func);
        let then_b = b.create_block();
        let else_b = b.create_block();
        let join = b.create_block();
        let dead = b.create_block();
        let c = b.number(1.0);
        b.branch(c, then_b, else_b);
        b.switch_to_block(then_b);
        b.jump(join);
        b.switch_to_block(else_b);
        b.jump(join);
        b.switch_to_block(join);
        b.ret(None);
        b.switch_to_block(dead);
        b.jump(join);

        let cfg = Cfg::compute(&func);
        assert_eq!(cfg.rpo.first(), Some(&BlockId(0)));
        assert_eq!(cfg.rpo.last(), Some(&join));
        assert_eq!(cfg.rpo.len(), 4);
        assert!(!cfg.is_reachable(dead));
        assert_eq!(cfg.preds(join), &[then_b, else_b, dead]);
    }
}
