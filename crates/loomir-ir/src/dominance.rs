//! Dominator tree (Cooper, Harvey & Kennedy's iterative algorithm).

use std::collections::HashMap;

use crate::arena::Handle;
use crate::cfg::ControlFlowGraph;
use crate::func::{Block, Function};
use crate::inst::Inst;

#[derive(Clone, Debug, Default)]
pub struct DominatorTree {
    idom: HashMap<Handle<Block>, Handle<Block>>,
    rpo_index: HashMap<Handle<Block>, usize>,
}

impl DominatorTree {
    pub fn compute(cfg: &ControlFlowGraph) -> Self {
        let rpo = cfg.reverse_post_order();
        let rpo_index: HashMap<_, _> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let mut idom = HashMap::new();
        let Some(&entry) = rpo.first() else {
            return Self { idom, rpo_index };
        };
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in &rpo[1..] {
                let mut new_idom = None;
                for &pred in cfg.predecessors(block) {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(cur) => intersect(&idom, &rpo_index, pred, cur),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }
        Self { idom, rpo_index }
    }

    /// Convenience: CFG and dominator tree in one call.
    pub fn for_function(func: &Function) -> Self {
        Self::compute(&ControlFlowGraph::compute(func))
    }

    pub fn is_reachable(&self, block: Handle<Block>) -> bool {
        self.idom.contains_key(&block)
    }

    /// Immediate dominator; `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: Handle<Block>) -> Option<Handle<Block>> {
        self.idom.get(&block).copied().filter(|&d| d != block)
    }

    /// Returns `true` if every path from the entry to `b` passes through `a`.
    /// Every block dominates itself. Unreachable blocks are dominated by
    /// every block and dominate none but themselves.
    pub fn dominates(&self, a: Handle<Block>, b: Handle<Block>) -> bool {
        if a == b || !self.is_reachable(b) {
            return true;
        }
        let Some(&target) = self.rpo_index.get(&a) else {
            return false;
        };
        // Dominators precede their blocks in reverse post-order.
        let mut cur = b;
        while self.rpo_index.get(&cur).is_some_and(|&i| i > target) {
            match self.idom(cur) {
                Some(up) => cur = up,
                None => return false,
            }
        }
        cur == a
    }

    /// Instruction-level dominance: `a` executes before `b` on every path.
    /// Within one block this is program order (strict).
    pub fn inst_dominates(&self, func: &Function, a: Handle<Inst>, b: Handle<Inst>) -> bool {
        let (Some(ba), Some(bb)) = (func.insts[a].block, func.insts[b].block) else {
            return false;
        };
        if ba != bb {
            return self.dominates(ba, bb);
        }
        let insts = &func.blocks[ba].insts;
        let pa = insts.iter().position(|&i| i == a);
        let pb = insts.iter().position(|&i| i == b);
        matches!((pa, pb), (Some(pa), Some(pb)) if pa < pb)
    }
}

fn intersect(
    idom: &HashMap<Handle<Block>, Handle<Block>>,
    rpo_index: &HashMap<Handle<Block>, usize>,
    mut a: Handle<Block>,
    mut b: Handle<Block>,
) -> Handle<Block> {
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}
