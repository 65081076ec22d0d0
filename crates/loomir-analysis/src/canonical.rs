//! Canonical counted loops.
//!
//! A canonical loop has a dedicated preheader, a header holding exactly one
//! induction phi `[start, preheader], [next, latch]` followed by
//! `cond = icmp ult iv, bound` and `br cond, body, exit`, a single latch
//! computing `next = add iv, step` before branching back, and a dedicated
//! exit. This is the shape `loomir_kernels::build_loop` emits.

use loomir_ir::{
    BinaryOp, Block, ControlFlowGraph, DominatorTree, Function, Handle, Inst, InstKind,
    IntPredicate, Type, UniqueArena, Value,
};

use crate::affine::is_loop_invariant;
use crate::loops::Loop;

/// Why a loop is not canonical.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("loop has no dedicated preheader")]
    NoPreheader,
    #[error("loop has {0} latches")]
    MultipleLatches(usize),
    #[error("loop has {0} exiting blocks")]
    MultipleExitingBlocks(usize),
    #[error("loop exit `{0}` has predecessors outside the loop")]
    NonDedicatedExit(String),
    #[error("header does not end in a conditional branch out of the loop")]
    HeaderNotExiting,
    #[error("header has no induction phi")]
    MissingInduction,
    #[error("header has {0} phis, expected a single induction phi")]
    DuplicateInduction(usize),
    #[error("loop condition is not `icmp ult iv, bound` with an invariant bound")]
    UnsupportedCompare,
    #[error("latch does not advance the induction by a positive constant")]
    UnsupportedStep,
}

/// A recognized canonical loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalLoop {
    pub preheader: Handle<Block>,
    pub header: Handle<Block>,
    pub latch: Handle<Block>,
    pub exit: Handle<Block>,
    /// Loop blocks other than the header and the latch, in layout order.
    pub body: Vec<Handle<Block>>,
    /// First block entered from the header.
    pub body_entry: Handle<Block>,
    pub induction: Handle<Inst>,
    pub start: Value,
    pub bound: Value,
    pub step: i64,
    pub cond: Handle<Inst>,
    pub next: Handle<Inst>,
}

/// How many times a canonical loop runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TripCount {
    Constant(u64),
    /// Unknown statically but fixed before the loop is entered.
    Invariant,
}

/// The unique predecessor of the header outside the loop, provided that it
/// branches nowhere else.
pub fn preheader(func: &Function, cfg: &ControlFlowGraph, lp: &Loop) -> Option<Handle<Block>> {
    let outside: Vec<_> = cfg
        .predecessors(lp.header)
        .iter()
        .copied()
        .filter(|&p| !lp.contains(p))
        .collect();
    match outside.as_slice() {
        &[p] if func.successors(p) == [lp.header] => Some(p),
        _ => None,
    }
}

/// Returns `true` if every exit of the loop is entered only from inside it.
pub fn has_dedicated_exits(func: &Function, cfg: &ControlFlowGraph, lp: &Loop) -> bool {
    lp.exits(func)
        .into_iter()
        .all(|e| cfg.predecessors(e).iter().all(|&p| lp.contains(p)))
}

/// Dedicated preheader, single latch, single exiting block, dedicated exits.
pub fn is_simplify_form(func: &Function, cfg: &ControlFlowGraph, lp: &Loop) -> bool {
    preheader(func, cfg, lp).is_some()
        && lp.latches.len() == 1
        && lp.exiting_blocks(func).len() == 1
        && has_dedicated_exits(func, cfg, lp)
}

impl CanonicalLoop {
    pub fn recognize(
        func: &Function,
        cfg: &ControlFlowGraph,
        dom: &DominatorTree,
        lp: &Loop,
    ) -> Result<Self, ShapeError> {
        let preheader = preheader(func, cfg, lp).ok_or(ShapeError::NoPreheader)?;
        let &[latch] = lp.latches.as_slice() else {
            return Err(ShapeError::MultipleLatches(lp.latches.len()));
        };
        let exiting = lp.exiting_blocks(func);
        if exiting.len() != 1 {
            return Err(ShapeError::MultipleExitingBlocks(exiting.len()));
        }
        if let Some(e) = lp
            .exits(func)
            .into_iter()
            .find(|&e| cfg.predecessors(e).iter().any(|&p| !lp.contains(p)))
        {
            return Err(ShapeError::NonDedicatedExit(func.blocks[e].name.clone()));
        }

        let header = lp.header;
        let term = func.terminator(header).ok_or(ShapeError::HeaderNotExiting)?;
        let InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        } = func.insts[term].kind
        else {
            return Err(ShapeError::HeaderNotExiting);
        };
        if exiting[0] != header || !lp.contains(then_dest) || lp.contains(else_dest) {
            return Err(ShapeError::HeaderNotExiting);
        }

        let phis = func.phis(header);
        let induction = match phis.as_slice() {
            [] => return Err(ShapeError::MissingInduction),
            &[phi] => phi,
            more => return Err(ShapeError::DuplicateInduction(more.len())),
        };
        let start = func
            .phi_incoming(induction, preheader)
            .ok_or(ShapeError::MissingInduction)?;
        let next_value = func
            .phi_incoming(induction, latch)
            .ok_or(ShapeError::MissingInduction)?;
        let iv = Value::Inst(induction);

        let cond = cond.as_inst().ok_or(ShapeError::UnsupportedCompare)?;
        let bound = match func.insts[cond].kind {
            InstKind::ICmp {
                pred: IntPredicate::Ult,
                lhs,
                rhs,
            } if lhs == iv && is_loop_invariant(func, dom, lp, rhs) => rhs,
            _ => return Err(ShapeError::UnsupportedCompare),
        };
        if func.insts[cond].block != Some(header) {
            return Err(ShapeError::UnsupportedCompare);
        }

        let next = next_value.as_inst().ok_or(ShapeError::UnsupportedStep)?;
        let step = match func.insts[next].kind {
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            } if lhs == iv => func.const_int(rhs),
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs,
                rhs,
            } if rhs == iv => func.const_int(lhs),
            _ => None,
        };
        let step = step.filter(|&s| s > 0).ok_or(ShapeError::UnsupportedStep)?;
        if func.insts[next].block != Some(latch) || !is_loop_invariant(func, dom, lp, start) {
            return Err(ShapeError::UnsupportedStep);
        }

        let body = lp
            .blocks
            .iter()
            .copied()
            .filter(|&b| b != header && b != latch)
            .collect();
        Ok(Self {
            preheader,
            header,
            latch,
            exit: else_dest,
            body,
            body_entry: then_dest,
            induction,
            start,
            bound,
            step,
            cond,
            next,
        })
    }

    pub fn induction_value(&self) -> Value {
        Value::Inst(self.induction)
    }

    /// Trip count under unsigned `iv < bound` semantics.
    pub fn trip_count(
        &self,
        func: &Function,
        types: &UniqueArena<Type>,
        dom: &DominatorTree,
        lp: &Loop,
    ) -> Option<TripCount> {
        if let (Some(start), Some(bound)) = (func.const_int(self.start), func.const_int(self.bound))
        {
            let bits = types
                .element_scalar(func.value_type(self.start))
                .map_or(64, |s| s.bits());
            let (start, bound) = (as_unsigned(start, bits), as_unsigned(bound, bits));
            let span = bound.saturating_sub(start);
            return Some(TripCount::Constant(span.div_ceil(self.step as u64)));
        }
        (is_loop_invariant(func, dom, lp, self.start) && is_loop_invariant(func, dom, lp, self.bound))
            .then_some(TripCount::Invariant)
    }
}

fn as_unsigned(v: i64, bits: u32) -> u64 {
    if bits >= 64 {
        v as u64
    } else {
        (v as u64) & ((1u64 << bits) - 1)
    }
}
