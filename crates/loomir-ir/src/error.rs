//! Error types for the loomir IR.

/// Errors raised while constructing IR.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A handle index is out of bounds for its arena.
    #[error("handle index {index} out of bounds (arena size: {size})")]
    BadHandle { index: usize, size: usize },

    /// A parameter index past the end of the parameter list.
    #[error("parameter {index} out of range (function has {count})")]
    BadParam { index: u32, count: usize },

    /// A type mismatch was detected.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// An instruction was appended after the block's terminator.
    #[error("block `{block}` already has a terminator")]
    BlockTerminated { block: String },

    /// An instruction refers to a value that is no longer in the function.
    #[error("use of erased value")]
    ErasedValue,
}

/// A structural or typing violation found by the verifier.
#[derive(Debug, thiserror::Error)]
#[error("in function `{function}`: {kind}")]
pub struct VerifyError {
    pub function: String,
    pub kind: VerifyErrorKind,
}

/// What the verifier found wrong.
#[derive(Debug, thiserror::Error)]
pub enum VerifyErrorKind {
    #[error("block `{block}` does not end in a terminator")]
    MissingTerminator { block: String },

    #[error("block `{block}` has a terminator before its last instruction")]
    MisplacedTerminator { block: String },

    #[error("block `{block}` has a phi after a non-phi instruction")]
    MisplacedPhi { block: String },

    #[error("instruction in block `{block}` records a different owning block")]
    BlockMismatch { block: String },

    #[error("block `{block}` branches to a block that is not in the function")]
    UnknownTarget { block: String },

    #[error("entry block `{block}` has predecessors")]
    EntryHasPredecessors { block: String },

    #[error("phi in block `{block}` does not match the block's predecessors")]
    PhiPredecessorMismatch { block: String },

    #[error("instruction in block `{block}` uses an erased or foreign value")]
    InvalidOperand { block: String },

    #[error("instruction in block `{block}` uses a value that does not dominate it")]
    UseNotDominated { block: String },

    #[error("instruction in block `{block}`: {source}")]
    Type {
        block: String,
        #[source]
        source: IrError,
    },
}

impl VerifyError {
    pub(crate) fn new(function: &str, kind: VerifyErrorKind) -> Self {
        Self {
            function: function.to_string(),
            kind,
        }
    }
}
