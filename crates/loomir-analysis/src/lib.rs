//! Loop analyses for loomir.
//!
//! Natural-loop discovery ([`LoopInfo`]), recognition of the canonical
//! counted-loop shape ([`CanonicalLoop`]), invariance and affine strides of
//! index expressions, and a conservative memory-dependency test. Analyses
//! are snapshots: recompute them after mutating a function.

mod affine;
mod canonical;
mod loops;
mod memory;

pub use affine::{is_loop_invariant, stride_of};
pub use canonical::{
    CanonicalLoop, ShapeError, TripCount, has_dedicated_exits, is_simplify_form, preheader,
};
pub use loops::{Loop, LoopInfo};
pub use memory::{
    AccessKind, MemoryAccess, MemoryRoot, Offset, collect_accesses, may_conflict, trace_pointer,
};
