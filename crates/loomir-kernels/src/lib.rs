//! Kernel generators for loomir.
//!
//! Each generator appends one function implementing a neural-network
//! primitive as explicit loop nests over flat `f32` buffers. Parameters are
//! validated before any IR is created, so a failed build leaves the module
//! untouched.

mod activation;
mod conv;
mod error;
mod loop_builder;
mod pooling;
mod tensor;

pub use activation::{ReluParams, build_relu};
pub use conv::{Conv2dParams, build_conv2d};
pub use error::KernelError;
pub use loop_builder::{BuiltLoop, build_loop};
pub use pooling::{Pool2dParams, build_maxpool2d};
