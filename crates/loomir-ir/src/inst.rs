//! Instructions, values and constants.

use crate::arena::Handle;
use crate::func::Block;
use crate::types::Type;

/// A literal constant value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    F32(f32),
}

/// A typed constant owned by a function.
#[derive(Clone, Debug, PartialEq)]
pub struct Constant {
    pub ty: Handle<Type>,
    pub literal: Literal,
}

/// An SSA value: an instruction result, a function parameter or a constant.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Value {
    Inst(Handle<Inst>),
    Param(u32),
    Const(Handle<Constant>),
}

impl Value {
    /// The defining instruction, if this value is an instruction result.
    pub fn as_inst(self) -> Option<Handle<Inst>> {
        match self {
            Self::Inst(h) => Some(h),
            _ => None,
        }
    }
}

/// A two-operand arithmetic or bitwise operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    URem,
    And,
    Or,
    FAdd,
    FSub,
    FMul,
    FDiv,
}

impl BinaryOp {
    /// Returns `true` for the floating-point operators.
    pub fn is_float(self) -> bool {
        matches!(self, Self::FAdd | Self::FSub | Self::FMul | Self::FDiv)
    }
}

/// Integer comparison predicate.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sge,
}

/// Floating-point comparison predicate. `O*` predicates are false when
/// either operand is NaN; `Une` is true.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum FloatPredicate {
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    Une,
}

/// The operation an instruction performs.
#[derive(Clone, Debug, PartialEq)]
pub enum InstKind {
    /// Reserve a stack slot; the result points to it.
    Alloca { allocated: Handle<Type>, align: u32 },
    /// Read through a pointer. A vector-typed load reads consecutive elements.
    Load { ptr: Value },
    /// Write through a pointer. A vector value writes consecutive elements.
    Store { value: Value, ptr: Value },
    /// `base + index * sizeof(*base)`.
    Gep { base: Value, index: Value },
    Binary {
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },
    ICmp {
        pred: IntPredicate,
        lhs: Value,
        rhs: Value,
    },
    FCmp {
        pred: FloatPredicate,
        lhs: Value,
        rhs: Value,
    },
    Select {
        cond: Value,
        on_true: Value,
        on_false: Value,
    },
    Phi { incoming: Vec<(Value, Handle<Block>)> },
    /// Reinterpret a pointer as a pointer to another type.
    Bitcast { value: Value },
    /// Broadcast a scalar to every lane of a vector.
    Splat { value: Value },
    /// Call a function by name. Treated as having unknown side effects.
    Call { callee: String, args: Vec<Value> },
    Br { target: Handle<Block> },
    CondBr {
        cond: Value,
        then_dest: Handle<Block>,
        else_dest: Handle<Block>,
    },
    Ret { value: Option<Value> },
}

impl InstKind {
    /// All value operands, in order.
    pub fn operands(&self) -> Vec<Value> {
        match self {
            Self::Alloca { .. } | Self::Br { .. } => vec![],
            Self::Load { ptr } => vec![*ptr],
            Self::Store { value, ptr } => vec![*value, *ptr],
            Self::Gep { base, index } => vec![*base, *index],
            Self::Binary { lhs, rhs, .. }
            | Self::ICmp { lhs, rhs, .. }
            | Self::FCmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Self::Select {
                cond,
                on_true,
                on_false,
            } => vec![*cond, *on_true, *on_false],
            Self::Phi { incoming } => incoming.iter().map(|(v, _)| *v).collect(),
            Self::Bitcast { value } | Self::Splat { value } => vec![*value],
            Self::Call { args, .. } => args.clone(),
            Self::CondBr { cond, .. } => vec![*cond],
            Self::Ret { value } => value.iter().copied().collect(),
        }
    }

    /// Applies `f` to every value operand in place.
    pub fn map_operands(&mut self, mut f: impl FnMut(Value) -> Value) {
        match self {
            Self::Alloca { .. } | Self::Br { .. } => {}
            Self::Load { ptr } => *ptr = f(*ptr),
            Self::Store { value, ptr } => {
                *value = f(*value);
                *ptr = f(*ptr);
            }
            Self::Gep { base, index } => {
                *base = f(*base);
                *index = f(*index);
            }
            Self::Binary { lhs, rhs, .. }
            | Self::ICmp { lhs, rhs, .. }
            | Self::FCmp { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            Self::Select {
                cond,
                on_true,
                on_false,
            } => {
                *cond = f(*cond);
                *on_true = f(*on_true);
                *on_false = f(*on_false);
            }
            Self::Phi { incoming } => {
                for (v, _) in incoming {
                    *v = f(*v);
                }
            }
            Self::Bitcast { value } | Self::Splat { value } => *value = f(*value),
            Self::Call { args, .. } => {
                for a in args {
                    *a = f(*a);
                }
            }
            Self::CondBr { cond, .. } => *cond = f(*cond),
            Self::Ret { value } => {
                if let Some(v) = value {
                    *v = f(*v);
                }
            }
        }
    }

    /// Branch targets of a terminator (empty for non-terminators and `ret`).
    pub fn successors(&self) -> Vec<Handle<Block>> {
        match self {
            Self::Br { target } => vec![*target],
            Self::CondBr {
                then_dest,
                else_dest,
                ..
            } => vec![*then_dest, *else_dest],
            _ => vec![],
        }
    }

    /// Rewrites every branch edge to `from` so that it targets `to`.
    /// Returns `true` if an edge was changed.
    pub fn retarget(&mut self, from: Handle<Block>, to: Handle<Block>) -> bool {
        let mut changed = false;
        let mut swap = |dest: &mut Handle<Block>| {
            if *dest == from {
                *dest = to;
                changed = true;
            }
        };
        match self {
            Self::Br { target } => swap(target),
            Self::CondBr {
                then_dest,
                else_dest,
                ..
            } => {
                swap(then_dest);
                swap(else_dest);
            }
            _ => {}
        }
        changed
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Self::Br { .. } | Self::CondBr { .. } | Self::Ret { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi { .. })
    }

    /// Loads, stores and calls touch memory.
    pub fn may_read_or_write_memory(&self) -> bool {
        matches!(self, Self::Load { .. } | Self::Store { .. } | Self::Call { .. })
    }

    pub fn may_write_memory(&self) -> bool {
        matches!(self, Self::Store { .. } | Self::Call { .. })
    }

    /// Mnemonic used by the text dump.
    pub fn opcode(&self) -> &'static str {
        match self {
            Self::Alloca { .. } => "alloca",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::Gep { .. } => "gep",
            Self::Binary { op, .. } => match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::UDiv => "udiv",
                BinaryOp::URem => "urem",
                BinaryOp::And => "and",
                BinaryOp::Or => "or",
                BinaryOp::FAdd => "fadd",
                BinaryOp::FSub => "fsub",
                BinaryOp::FMul => "fmul",
                BinaryOp::FDiv => "fdiv",
            },
            Self::ICmp { .. } => "icmp",
            Self::FCmp { .. } => "fcmp",
            Self::Select { .. } => "select",
            Self::Phi { .. } => "phi",
            Self::Bitcast { .. } => "bitcast",
            Self::Splat { .. } => "splat",
            Self::Call { .. } => "call",
            Self::Br { .. } | Self::CondBr { .. } => "br",
            Self::Ret { .. } => "ret",
        }
    }
}

/// An instruction: operation, result type, optional name and owning block.
#[derive(Clone, Debug)]
pub struct Inst {
    pub kind: InstKind,
    /// Result type (`void` when the instruction produces no value).
    pub ty: Handle<Type>,
    pub name: Option<String>,
    /// The block currently holding this instruction; `None` once erased.
    pub block: Option<Handle<Block>>,
}
