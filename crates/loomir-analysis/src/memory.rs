//! Syntactic memory-dependency analysis.
//!
//! Every pointer is traced back to a root: a pointer parameter, an `alloca`,
//! or something unknown. Two distinct parameters are disjoint only when both
//! are marked `noalias`, and an `alloca` never aliases anything but itself.
//! No other independence is ever inferred.

use loomir_ir::{Block, Function, Handle, Inst, InstKind, Value};

/// Where a pointer points into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MemoryRoot {
    Param { index: u32, noalias: bool },
    Alloca(Handle<Inst>),
    Unknown,
}

impl MemoryRoot {
    /// Returns `false` only when the two roots are known to be disjoint.
    pub fn may_alias(self, other: MemoryRoot) -> bool {
        match (self, other) {
            (MemoryRoot::Unknown, _) | (_, MemoryRoot::Unknown) => true,
            (
                MemoryRoot::Param { index: a, noalias: na },
                MemoryRoot::Param { index: b, noalias: nb },
            ) => a == b || !(na && nb),
            (a, b) => a == b,
        }
    }
}

/// Element offset of a pointer relative to its root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offset {
    /// The root itself.
    Zero,
    /// A single `gep root, index`.
    Index(Value),
    Unknown,
}

/// Traces `ptr` to its root through `bitcast` and `gep`.
pub fn trace_pointer(func: &Function, ptr: Value) -> (MemoryRoot, Offset) {
    match ptr {
        Value::Param(i) => match func.params.get(i as usize) {
            Some(param) => (
                MemoryRoot::Param {
                    index: i,
                    noalias: param.noalias,
                },
                Offset::Zero,
            ),
            None => (MemoryRoot::Unknown, Offset::Unknown),
        },
        Value::Const(_) => (MemoryRoot::Unknown, Offset::Unknown),
        Value::Inst(h) => match func.insts[h].kind {
            InstKind::Alloca { .. } => (MemoryRoot::Alloca(h), Offset::Zero),
            InstKind::Bitcast { value } => match trace_pointer(func, value) {
                (root, Offset::Zero) => (root, Offset::Zero),
                (root, _) => (root, Offset::Unknown),
            },
            InstKind::Gep { base, index } => match trace_pointer(func, base) {
                (root, Offset::Zero) => (root, Offset::Index(index)),
                (root, _) => (root, Offset::Unknown),
            },
            _ => (MemoryRoot::Unknown, Offset::Unknown),
        },
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    /// A call: may do anything.
    ReadWrite,
}

impl AccessKind {
    pub fn reads(self) -> bool {
        matches!(self, AccessKind::Read | AccessKind::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, AccessKind::Write | AccessKind::ReadWrite)
    }
}

/// One memory-touching instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryAccess {
    pub inst: Handle<Inst>,
    pub kind: AccessKind,
    pub root: MemoryRoot,
    pub offset: Offset,
}

impl MemoryAccess {
    pub fn of(func: &Function, inst: Handle<Inst>) -> Option<Self> {
        let (kind, ptr) = match func.insts[inst].kind {
            InstKind::Load { ptr } => (AccessKind::Read, Some(ptr)),
            InstKind::Store { ptr, .. } => (AccessKind::Write, Some(ptr)),
            InstKind::Call { .. } => (AccessKind::ReadWrite, None),
            _ => return None,
        };
        let (root, offset) = match ptr {
            Some(ptr) => trace_pointer(func, ptr),
            None => (MemoryRoot::Unknown, Offset::Unknown),
        };
        Some(Self {
            inst,
            kind,
            root,
            offset,
        })
    }
}

/// Memory accesses of the given blocks, in block then program order.
pub fn collect_accesses(
    func: &Function,
    blocks: impl IntoIterator<Item = Handle<Block>>,
) -> Vec<MemoryAccess> {
    blocks
        .into_iter()
        .flat_map(|b| func.blocks[b].insts.iter().copied())
        .filter_map(|i| MemoryAccess::of(func, i))
        .collect()
}

/// Returns `true` unless the two accesses provably cannot form a dependence
/// across iterations: both only read, their roots are disjoint, or they use
/// the very same index value on the very same root.
///
/// The same-index rule assumes the index takes a distinct value in every
/// iteration (a non-zero stride), which the caller must establish.
pub fn may_conflict(a: &MemoryAccess, b: &MemoryAccess) -> bool {
    if !a.kind.writes() && !b.kind.writes() {
        return false;
    }
    if !a.root.may_alias(b.root) {
        return false;
    }
    match (a.offset, b.offset) {
        (Offset::Index(x), Offset::Index(y)) => {
            x != y
                || a.root != b.root
                || a.root == MemoryRoot::Unknown
                || a.kind == AccessKind::ReadWrite
        }
        _ => true,
    }
}
