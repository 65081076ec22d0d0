//! Error types for kernel generation.

use loomir_ir::IrError;

/// Errors raised while generating a kernel. All operand and parameter
/// checks run before any block is created.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// An operand type is not a pointer.
    #[error("operand `{operand}` must be a pointer, found {found}")]
    NotAPointer { operand: &'static str, found: String },

    /// An operand points to something other than `f32` elements.
    #[error("operand `{operand}` must point to f32 or [N x f32], found {found}")]
    ElementMismatch { operand: &'static str, found: String },

    /// The element count could not be determined.
    #[error("element count unknown: pass an explicit length or an array-typed input")]
    MissingLength,

    /// A shape or hyper-parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// IR construction failed.
    #[error(transparent)]
    Ir(#[from] IrError),
}
