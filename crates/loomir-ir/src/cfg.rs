//! Control-flow graph snapshot of a function.

use std::collections::{HashMap, HashSet};

use crate::arena::Handle;
use crate::func::{Block, Function};

/// Predecessor and successor lists plus a reverse post-order of the blocks
/// reachable from the entry. Recompute after any CFG mutation.
#[derive(Clone, Debug, Default)]
pub struct ControlFlowGraph {
    preds: HashMap<Handle<Block>, Vec<Handle<Block>>>,
    succs: HashMap<Handle<Block>, Vec<Handle<Block>>>,
    rpo: Vec<Handle<Block>>,
}

impl ControlFlowGraph {
    pub fn compute(func: &Function) -> Self {
        let mut preds: HashMap<_, Vec<_>> = HashMap::new();
        let mut succs = HashMap::new();
        for &block in &func.layout {
            preds.entry(block).or_default();
        }
        for &block in &func.layout {
            let out = func.successors(block);
            for &s in &out {
                let list = preds.entry(s).or_default();
                if !list.contains(&block) {
                    list.push(block);
                }
            }
            succs.insert(block, out);
        }

        let mut rpo = Vec::new();
        if let Some(entry) = func.entry() {
            // Iterative DFS recording post-order.
            let mut visited = HashSet::new();
            let mut stack = vec![(entry, 0usize)];
            visited.insert(entry);
            while let Some((block, next)) = stack.pop() {
                let out: &Vec<Handle<Block>> = &succs[&block];
                if next < out.len() {
                    stack.push((block, next + 1));
                    let s = out[next];
                    if succs.contains_key(&s) && visited.insert(s) {
                        stack.push((s, 0));
                    }
                } else {
                    rpo.push(block);
                }
            }
            rpo.reverse();
        }

        Self { preds, succs, rpo }
    }

    pub fn predecessors(&self, block: Handle<Block>) -> &[Handle<Block>] {
        self.preds.get(&block).map_or(&[], Vec::as_slice)
    }

    pub fn successors(&self, block: Handle<Block>) -> &[Handle<Block>] {
        self.succs.get(&block).map_or(&[], Vec::as_slice)
    }

    /// Reachable blocks in reverse post-order, entry first.
    pub fn reverse_post_order(&self) -> &[Handle<Block>] {
        &self.rpo
    }

    pub fn is_reachable(&self, block: Handle<Block>) -> bool {
        self.rpo.contains(&block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::UniqueArena;
    use crate::inst::InstKind;

    #[test]
    fn rpo_of_loop() {
        let mut types = UniqueArena::new();
        let void = types.void();
        let mut func = Function::new("f", vec![], void);
        let entry = func.append_block("entry");
        let header = func.append_block("header");
        let body = func.append_block("body");
        let exit = func.append_block("exit");
        let dead = func.append_block("dead");
        let t = types.scalar(crate::types::Scalar::BOOL);
        let cond = func.add_constant(t, crate::inst::Literal::Bool(true));
        func.append_inst(entry, InstKind::Br { target: header }, void, None);
        func.append_inst(
            header,
            InstKind::CondBr {
                cond,
                then_dest: body,
                else_dest: exit,
            },
            void,
            None,
        );
        func.append_inst(body, InstKind::Br { target: header }, void, None);
        func.append_inst(exit, InstKind::Ret { value: None }, void, None);
        func.append_inst(dead, InstKind::Br { target: exit }, void, None);

        let cfg = ControlFlowGraph::compute(&func);
        assert_eq!(cfg.reverse_post_order()[0], entry);
        assert_eq!(cfg.reverse_post_order()[1], header);
        assert!(!cfg.is_reachable(dead));
        assert_eq!(cfg.predecessors(header), &[entry, body]);
        assert_eq!(cfg.predecessors(exit), &[header, dead]);
    }
}
