//! Tensor operands: pointer-typed parameters viewed as flat `f32` buffers.

use loomir_ir::{
    Block, FunctionBuilder, Handle, Scalar, Type, TypeInner, UniqueArena, Value, format_type,
};

use crate::KernelError;

/// A validated tensor operand type.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TensorOperand {
    pub ty: Handle<Type>,
    /// Element count when the operand is `ptr<[N x f32]>`.
    pub array_len: Option<u32>,
}

impl TensorOperand {
    /// Accepts `ptr<f32>` and `ptr<[N x f32]>`.
    pub fn classify(
        types: &UniqueArena<Type>,
        operand: &'static str,
        ty: Handle<Type>,
    ) -> Result<Self, KernelError> {
        let Some(pointee) = types.pointee(ty) else {
            return Err(KernelError::NotAPointer {
                operand,
                found: format_type(types, ty),
            });
        };
        let array_len = match types[pointee].inner {
            TypeInner::Scalar(Scalar::F32) => None,
            TypeInner::Array { base, len }
                if types[base].inner == TypeInner::Scalar(Scalar::F32) =>
            {
                Some(len)
            }
            _ => {
                return Err(KernelError::ElementMismatch {
                    operand,
                    found: format_type(types, ty),
                });
            }
        };
        Ok(Self { ty, array_len })
    }

    /// Rejects array operands that are too short for `needed` elements.
    pub fn require(&self, operand: &str, needed: u64) -> Result<(), KernelError> {
        match self.array_len {
            Some(len) if u64::from(len) < needed => Err(KernelError::InvalidParameter(format!(
                "operand `{operand}` holds {len} elements but {needed} are accessed"
            ))),
            _ => Ok(()),
        }
    }

    /// A `ptr<f32>` view of parameter `index`, bit-casting array pointers in
    /// the entry block.
    pub fn element_pointer(
        &self,
        b: &mut FunctionBuilder<'_>,
        entry: Handle<Block>,
        index: u32,
        name: &str,
    ) -> Result<Value, KernelError> {
        let param = b.param(index)?;
        if self.array_len.is_none() {
            return Ok(param);
        }
        let elem_ptr = b.types.scalar_pointer(Scalar::F32);
        Ok(b.bitcast(entry, param, elem_ptr, &format!("{name}.elems"))?)
    }
}

/// Converts a dimension to the `i32` used for loop bounds and indices.
pub(crate) fn dim_i32(what: &str, value: u64) -> Result<i32, KernelError> {
    i32::try_from(value)
        .map_err(|_| KernelError::InvalidParameter(format!("{what} = {value} exceeds i32 range")))
}
