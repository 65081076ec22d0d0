//! Type system for the loomir IR.

use crate::arena::{Handle, UniqueArena};

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean (`i1`).
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// IEEE-754 floating point.
    Float,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I8: Self = Self {
        kind: ScalarKind::Sint,
        width: 1,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const I64: Self = Self {
        kind: ScalarKind::Sint,
        width: 8,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };

    /// Number of value bits (`1` for booleans).
    pub fn bits(self) -> u32 {
        match self.kind {
            ScalarKind::Bool => 1,
            _ => u32::from(self.width) * 8,
        }
    }

    /// Returns `true` for signed or unsigned integers.
    pub fn is_integer(self) -> bool {
        matches!(self.kind, ScalarKind::Sint | ScalarKind::Uint)
    }

    /// Returns `true` for floating-point scalars.
    pub fn is_float(self) -> bool {
        self.kind == ScalarKind::Float
    }
}

/// A (possibly named) type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Type {
    pub name: Option<String>,
    pub inner: TypeInner,
}

impl Type {
    /// An unnamed type.
    pub fn anonymous(inner: TypeInner) -> Self {
        Self { name: None, inner }
    }
}

/// The concrete shape of a type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum TypeInner {
    /// No value (function results, stores, branches).
    Void,
    /// A single scalar value.
    Scalar(Scalar),
    /// A fixed-width group of scalars operated on lane-wise.
    Vector { lanes: u32, scalar: Scalar },
    /// A typed pointer.
    Pointer { base: Handle<Type> },
    /// A fixed-size array.
    Array { base: Handle<Type>, len: u32 },
    /// A struct laid out with natural member alignment.
    Struct { members: Vec<Handle<Type>> },
}

/// Size in bytes of a pointer.
pub const POINTER_BYTES: u64 = 8;

/// Rounds `value` up to a multiple of `align`.
pub fn align_to(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// Type construction and layout queries over the module's type arena.
impl UniqueArena<Type> {
    pub fn void(&mut self) -> Handle<Type> {
        self.insert(Type::anonymous(TypeInner::Void))
    }

    pub fn scalar(&mut self, scalar: Scalar) -> Handle<Type> {
        self.insert(Type::anonymous(TypeInner::Scalar(scalar)))
    }

    pub fn vector(&mut self, lanes: u32, scalar: Scalar) -> Handle<Type> {
        self.insert(Type::anonymous(TypeInner::Vector { lanes, scalar }))
    }

    pub fn pointer(&mut self, base: Handle<Type>) -> Handle<Type> {
        self.insert(Type::anonymous(TypeInner::Pointer { base }))
    }

    pub fn array(&mut self, base: Handle<Type>, len: u32) -> Handle<Type> {
        self.insert(Type::anonymous(TypeInner::Array { base, len }))
    }

    pub fn named_struct(&mut self, name: &str, members: Vec<Handle<Type>>) -> Handle<Type> {
        self.insert(Type {
            name: Some(name.to_string()),
            inner: TypeInner::Struct { members },
        })
    }

    /// Pointer to a scalar, the common tensor operand type.
    pub fn scalar_pointer(&mut self, scalar: Scalar) -> Handle<Type> {
        let base = self.scalar(scalar);
        self.pointer(base)
    }

    /// The pointee of a pointer type.
    pub fn pointee(&self, ty: Handle<Type>) -> Option<Handle<Type>> {
        match self[ty].inner {
            TypeInner::Pointer { base } => Some(base),
            _ => None,
        }
    }

    /// The scalar of a scalar type, or the lane scalar of a vector type.
    pub fn element_scalar(&self, ty: Handle<Type>) -> Option<Scalar> {
        match self[ty].inner {
            TypeInner::Scalar(s) | TypeInner::Vector { scalar: s, .. } => Some(s),
            _ => None,
        }
    }

    /// Number of lanes of a vector type.
    pub fn lanes(&self, ty: Handle<Type>) -> Option<u32> {
        match self[ty].inner {
            TypeInner::Vector { lanes, .. } => Some(lanes),
            _ => None,
        }
    }

    pub fn is_void(&self, ty: Handle<Type>) -> bool {
        matches!(self[ty].inner, TypeInner::Void)
    }

    /// ABI alignment in bytes.
    pub fn align_of(&self, ty: Handle<Type>) -> u64 {
        match &self[ty].inner {
            TypeInner::Void => 1,
            TypeInner::Scalar(s) => u64::from(s.width),
            TypeInner::Vector { lanes, scalar } => {
                (u64::from(*lanes) * u64::from(scalar.width)).next_power_of_two()
            }
            TypeInner::Pointer { .. } => POINTER_BYTES,
            TypeInner::Array { base, .. } => self.align_of(*base),
            TypeInner::Struct { members } => members
                .iter()
                .map(|&m| self.align_of(m))
                .max()
                .unwrap_or(1),
        }
    }

    /// Byte offsets of each struct member.
    pub fn member_offsets(&self, ty: Handle<Type>) -> Vec<u64> {
        let TypeInner::Struct { members } = &self[ty].inner else {
            return Vec::new();
        };
        let mut offset = 0;
        let mut offsets = Vec::with_capacity(members.len());
        for &member in members {
            offset = align_to(offset, self.align_of(member));
            offsets.push(offset);
            offset += self.alloc_size(member);
        }
        offsets
    }

    /// Bytes occupied by a value, excluding tail padding.
    pub fn store_size(&self, ty: Handle<Type>) -> u64 {
        match &self[ty].inner {
            TypeInner::Void => 0,
            TypeInner::Scalar(s) => u64::from(s.width),
            TypeInner::Vector { lanes, scalar } => u64::from(*lanes) * u64::from(scalar.width),
            TypeInner::Pointer { .. } => POINTER_BYTES,
            TypeInner::Array { base, len } => u64::from(*len) * self.alloc_size(*base),
            TypeInner::Struct { members } => match members.last() {
                Some(&last) => {
                    let offsets = self.member_offsets(ty);
                    offsets[offsets.len() - 1] + self.store_size(last)
                }
                None => 0,
            },
        }
    }

    /// Size in bits as seen by layout decisions (store size × 8).
    pub fn size_in_bits(&self, ty: Handle<Type>) -> u64 {
        self.store_size(ty) * 8
    }

    /// Bytes between consecutive array elements of this type.
    pub fn alloc_size(&self, ty: Handle<Type>) -> u64 {
        align_to(self.store_size(ty), self.align_of(ty))
    }
}
