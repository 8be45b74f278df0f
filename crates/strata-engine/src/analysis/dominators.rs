//! Dominator tree (Cooper, Harvey and Kennedy's iterative algorithm)

use super::cfg::Cfg;
use crate::ir::BlockId;

#[derive(Debug, Clone)]
pub struct DomTree {
    /// Immediate dominator; `None` for the entry and unreachable blocks
    idom: Vec<Option<BlockId>>,
    children: Vec<Vec<BlockId>>,
    rpo_index: Vec<Option<usize>>,
}

impl DomTree {
    pub fn compute(cfg: &Cfg) -> Self {
        let n = cfg.succs.len();
        let mut rpo_index = vec![None; n];
        for (i, block) in cfg.rpo.iter().enumerate() {
            rpo_index[block.index()] = Some(i);
        }

        let mut idom: Vec<Option<BlockId>> = vec![None; n];
        if n == 0 {
            return DomTree { idom, children: Vec::new(), rpo_index };
        }
        idom[0] = Some(BlockId(0));

        let mut changed = true;
        while changed {
            changed = false;
            for &block in cfg.rpo.iter().skip(1) {
                let mut new_idom: Option<BlockId> = None;
                for &pred in cfg.preds(block) {
                    if idom[pred.index()].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => intersect(&idom, &rpo_index, pred, current),
                    });
                }
                if new_idom.is_some() && idom[block.index()] != new_idom {
                    idom[block.index()] = new_idom;
                    changed = true;
                }
            }
        }

        // The entry is its own idom only during the fixpoint.
        idom[0] = None;
        let mut children = vec![Vec::new(); n];
        for &block in &cfg.rpo {
            if let Some(parent) = idom[block.index()] {
                children[parent.index()].push(block);
            }
        }
        DomTree { idom, children, rpo_index }
    }

    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(block.index()).copied().flatten()
    }

    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(block.index()).map_or(&[], |c| c.as_slice())
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index.get(block.index()).copied().flatten().is_some()
    }

    /// Whether `a` dominates `b` (reflexive). Unreachable blocks dominate nothing.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cursor = Some(b);
        while let Some(block) = cursor {
            if block == a {
                return true;
            }
            cursor = self.idom(block);
        }
        false
    }
}

fn intersect(
    idom: &[Option<BlockId>],
    rpo_index: &[Option<usize>],
    mut a: BlockId,
    mut b: BlockId,
) -> BlockId {
    let order = |x: BlockId| rpo_index[x.index()].unwrap_or(usize::MAX);
    while a != b {
        while order(a) > order(b) {
            match idom[a.index()] {
                Some(next) => a = next,
                None => return b,
            }
        }
        while order(b) > order(a) {
            match idom[b.index()] {
                Some(next) => b = next,
                None => return a,
            }
        }
    }
    a
}
