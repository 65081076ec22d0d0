//! Natural-loop forest.
//!
//! A back edge is an edge `latch -> header` whose target dominates its
//! source. All back edges into one header form a single loop whose blocks
//! are those that reach a latch without passing through the header.

use std::collections::HashSet;

use loomir_ir::{Arena, Block, ControlFlowGraph, DominatorTree, Function, Handle};

/// One natural loop.
#[derive(Clone, Debug)]
pub struct Loop {
    pub header: Handle<Block>,
    /// Sources of the back edges, in layout order.
    pub latches: Vec<Handle<Block>>,
    /// Every block of the loop (header included, nested loops included), in
    /// layout order.
    pub blocks: Vec<Handle<Block>>,
    pub parent: Option<Handle<Loop>>,
    pub children: Vec<Handle<Loop>>,
}

impl Loop {
    pub fn contains(&self, block: Handle<Block>) -> bool {
        self.blocks.contains(&block)
    }

    pub fn is_innermost(&self) -> bool {
        self.children.is_empty()
    }

    /// Blocks outside the loop that a loop block branches to.
    pub fn exits(&self, func: &Function) -> Vec<Handle<Block>> {
        let mut exits = Vec::new();
        for &b in &self.blocks {
            for s in func.successors(b) {
                if !self.contains(s) && !exits.contains(&s) {
                    exits.push(s);
                }
            }
        }
        exits
    }

    /// Loop blocks with at least one successor outside the loop.
    pub fn exiting_blocks(&self, func: &Function) -> Vec<Handle<Block>> {
        self.blocks
            .iter()
            .copied()
            .filter(|&b| func.successors(b).iter().any(|&s| !self.contains(s)))
            .collect()
    }
}

/// All natural loops of a function with their nesting.
#[derive(Clone, Debug, Default)]
pub struct LoopInfo {
    loops: Arena<Loop>,
    top_level: Vec<Handle<Loop>>,
}

impl LoopInfo {
    pub fn compute(func: &Function, cfg: &ControlFlowGraph, dom: &DominatorTree) -> Self {
        let mut loops = Arena::new();
        for &header in cfg.reverse_post_order() {
            let latches: Vec<_> = cfg
                .predecessors(header)
                .iter()
                .copied()
                .filter(|&p| cfg.is_reachable(p) && dom.dominates(header, p))
                .collect();
            if latches.is_empty() {
                continue;
            }

            let mut members = HashSet::from([header]);
            let mut work = latches.clone();
            while let Some(b) = work.pop() {
                if members.insert(b) {
                    work.extend(cfg.predecessors(b).iter().copied().filter(|&p| cfg.is_reachable(p)));
                }
            }
            let in_layout = |set: &HashSet<Handle<Block>>| {
                func.layout
                    .iter()
                    .copied()
                    .filter(|b| set.contains(b))
                    .collect::<Vec<_>>()
            };
            let latch_set: HashSet<_> = latches.into_iter().collect();
            loops.append(Loop {
                header,
                latches: in_layout(&latch_set),
                blocks: in_layout(&members),
                parent: None,
                children: Vec::new(),
            });
        }

        // Natural loops with distinct headers are disjoint or nested, so the
        // parent is the smallest other loop containing the header.
        let handles: Vec<_> = loops.iter().map(|(h, _)| h).collect();
        let mut top_level = Vec::new();
        for &h in &handles {
            let header = loops[h].header;
            let size = loops[h].blocks.len();
            let parent = handles
                .iter()
                .copied()
                .filter(|&o| o != h)
                .filter(|&o| loops[o].blocks.len() > size && loops[o].contains(header))
                .min_by_key(|&o| loops[o].blocks.len());
            loops[h].parent = parent;
            match parent {
                Some(p) => loops[p].children.push(h),
                None => top_level.push(h),
            }
        }

        Self { loops, top_level }
    }

    /// Convenience: CFG, dominators and loops in one call.
    pub fn for_function(func: &Function) -> Self {
        let cfg = ControlFlowGraph::compute(func);
        let dom = DominatorTree::compute(&cfg);
        Self::compute(func, &cfg, &dom)
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<Loop>, &Loop)> {
        self.loops.iter()
    }

    pub fn top_level(&self) -> &[Handle<Loop>] {
        &self.top_level
    }

    /// Loops without children, outermost nests first.
    pub fn innermost(&self) -> Vec<Handle<Loop>> {
        self.loops
            .iter()
            .filter(|(_, l)| l.is_innermost())
            .map(|(h, _)| h)
            .collect()
    }

    /// The innermost loop containing `block`.
    pub fn loop_for(&self, block: Handle<Block>) -> Option<Handle<Loop>> {
        self.loops
            .iter()
            .filter(|(_, l)| l.contains(block))
            .min_by_key(|(_, l)| l.blocks.len())
            .map(|(h, _)| h)
    }

    /// Nesting depth, `1` for top-level loops.
    pub fn depth(&self, lp: Handle<Loop>) -> usize {
        let mut depth = 1;
        let mut cur = self.loops[lp].parent;
        while let Some(p) = cur {
            depth += 1;
            cur = self.loops[p].parent;
        }
        depth
    }
}

impl std::ops::Index<Handle<Loop>> for LoopInfo {
    type Output = Loop;

    fn index(&self, handle: Handle<Loop>) -> &Loop {
        &self.loops[handle]
    }
}
