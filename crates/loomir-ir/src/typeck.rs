//! Operand typing rules shared by the builder and the verifier.

use crate::arena::{Handle, UniqueArena};
use crate::display::format_type;
use crate::error::IrError;
use crate::func::Function;
use crate::inst::{InstKind, Value};
use crate::types::{Scalar, ScalarKind, Type, TypeInner};

struct Checker<'a> {
    types: &'a UniqueArena<Type>,
    func: &'a Function,
}

impl Checker<'_> {
    fn ty(&self, value: Value) -> Result<Handle<Type>, IrError> {
        self.func.try_value_type(value)
    }

    fn mismatch(&self, expected: &str, found: Handle<Type>) -> IrError {
        IrError::TypeMismatch {
            expected: expected.to_string(),
            found: format_type(self.types, found),
        }
    }

    fn same(&self, a: Handle<Type>, b: Handle<Type>) -> Result<(), IrError> {
        if a == b {
            Ok(())
        } else {
            Err(self.mismatch(&format_type(self.types, a), b))
        }
    }

    fn pointee(&self, ptr: Handle<Type>) -> Result<Handle<Type>, IrError> {
        self.types
            .pointee(ptr)
            .ok_or_else(|| self.mismatch("pointer", ptr))
    }

    /// The element scalar of a scalar or vector type, with its lane count.
    fn scalar_or_vector(&self, ty: Handle<Type>) -> Result<(Scalar, Option<u32>), IrError> {
        match self.types[ty].inner {
            TypeInner::Scalar(s) => Ok((s, None)),
            TypeInner::Vector { lanes, scalar } => Ok((scalar, Some(lanes))),
            _ => Err(self.mismatch("scalar or vector", ty)),
        }
    }

    /// `value` may be stored to or loaded from a `ptr<pointee>`.
    fn memory_compatible(&self, value_ty: Handle<Type>, pointee: Handle<Type>) -> bool {
        if value_ty == pointee {
            return true;
        }
        match (&self.types[value_ty].inner, &self.types[pointee].inner) {
            (TypeInner::Vector { scalar, .. }, TypeInner::Scalar(s)) => scalar == s,
            _ => false,
        }
    }

    fn bool_like(lanes: Option<u32>) -> Type {
        match lanes {
            Some(lanes) => Type::anonymous(TypeInner::Vector {
                lanes,
                scalar: Scalar::BOOL,
            }),
            None => Type::anonymous(TypeInner::Scalar(Scalar::BOOL)),
        }
    }

    fn void() -> Type {
        Type::anonymous(TypeInner::Void)
    }

    fn declared(&self, declared: Option<Handle<Type>>, what: &str) -> Result<Handle<Type>, IrError> {
        declared.ok_or_else(|| IrError::TypeMismatch {
            expected: format!("explicit {what} result type"),
            found: "none".to_string(),
        })
    }

    fn check(&self, kind: &InstKind, declared: Option<Handle<Type>>) -> Result<Type, IrError> {
        match kind {
            InstKind::Alloca { allocated, .. } => {
                Ok(Type::anonymous(TypeInner::Pointer { base: *allocated }))
            }
            InstKind::Load { ptr } => {
                let pointee = self.pointee(self.ty(*ptr)?)?;
                let result = declared.unwrap_or(pointee);
                if !self.memory_compatible(result, pointee) {
                    return Err(self.mismatch(&format_type(self.types, pointee), result));
                }
                Ok(self.types[result].clone())
            }
            InstKind::Store { value, ptr } => {
                let pointee = self.pointee(self.ty(*ptr)?)?;
                let value_ty = self.ty(*value)?;
                if !self.memory_compatible(value_ty, pointee) {
                    return Err(self.mismatch(&format_type(self.types, pointee), value_ty));
                }
                Ok(Self::void())
            }
            InstKind::Gep { base, index } => {
                let base_ty = self.ty(*base)?;
                self.pointee(base_ty)?;
                let index_ty = self.ty(*index)?;
                match self.types[index_ty].inner {
                    TypeInner::Scalar(s) if s.is_integer() => Ok(self.types[base_ty].clone()),
                    _ => Err(self.mismatch("integer index", index_ty)),
                }
            }
            InstKind::Binary { op, lhs, rhs } => {
                let lhs_ty = self.ty(*lhs)?;
                self.same(lhs_ty, self.ty(*rhs)?)?;
                let (scalar, _) = self.scalar_or_vector(lhs_ty)?;
                let ok = if op.is_float() {
                    scalar.is_float()
                } else {
                    scalar.is_integer() || scalar.kind == ScalarKind::Bool
                };
                if !ok {
                    let expected = if op.is_float() { "float" } else { "integer" };
                    return Err(self.mismatch(expected, lhs_ty));
                }
                Ok(self.types[lhs_ty].clone())
            }
            InstKind::ICmp { lhs, rhs, .. } | InstKind::FCmp { lhs, rhs, .. } => {
                let lhs_ty = self.ty(*lhs)?;
                self.same(lhs_ty, self.ty(*rhs)?)?;
                let (scalar, lanes) = self.scalar_or_vector(lhs_ty)?;
                let float = matches!(kind, InstKind::FCmp { .. });
                if float != scalar.is_float() || (!float && !scalar.is_integer()) {
                    let expected = if float { "float" } else { "integer" };
                    return Err(self.mismatch(expected, lhs_ty));
                }
                Ok(Self::bool_like(lanes))
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let value_ty = self.ty(*on_true)?;
                self.same(value_ty, self.ty(*on_false)?)?;
                let cond_ty = self.ty(*cond)?;
                let (cond_scalar, cond_lanes) = self.scalar_or_vector(cond_ty)?;
                let value_lanes = self.types.lanes(value_ty);
                if cond_scalar != Scalar::BOOL || (cond_lanes.is_some() && cond_lanes != value_lanes)
                {
                    return Err(self.mismatch("bool condition", cond_ty));
                }
                Ok(self.types[value_ty].clone())
            }
            InstKind::Phi { incoming } => {
                let ty = self.declared(declared, "phi")?;
                for (value, _) in incoming {
                    self.same(ty, self.ty(*value)?)?;
                }
                Ok(self.types[ty].clone())
            }
            InstKind::Bitcast { value } => {
                let to = self.declared(declared, "bitcast")?;
                self.pointee(self.ty(*value)?)?;
                self.pointee(to)?;
                Ok(self.types[to].clone())
            }
            InstKind::Splat { value } => {
                let to = self.declared(declared, "splat")?;
                let value_ty = self.ty(*value)?;
                match (&self.types[value_ty].inner, &self.types[to].inner) {
                    (TypeInner::Scalar(s), TypeInner::Vector { scalar, .. }) if s == scalar => {
                        Ok(self.types[to].clone())
                    }
                    _ => Err(self.mismatch("vector of the splatted scalar", to)),
                }
            }
            InstKind::Call { args, .. } => {
                let ret = self.declared(declared, "call")?;
                for arg in args {
                    self.ty(*arg)?;
                }
                Ok(self.types[ret].clone())
            }
            InstKind::Br { .. } => Ok(Self::void()),
            InstKind::CondBr { cond, .. } => {
                let cond_ty = self.ty(*cond)?;
                match self.types[cond_ty].inner {
                    TypeInner::Scalar(Scalar::BOOL) => Ok(Self::void()),
                    _ => Err(self.mismatch("bool", cond_ty)),
                }
            }
            InstKind::Ret { value } => {
                match value {
                    Some(v) => self.same(self.func.ret, self.ty(*v)?)?,
                    None if self.types.is_void(self.func.ret) => {}
                    None => return Err(self.mismatch("void", self.func.ret)),
                }
                Ok(Self::void())
            }
        }
    }
}

/// Checks the operand types of `kind` and returns its result type.
///
/// `declared` supplies the result type for instructions that cannot infer
/// one (phi, bitcast, splat, call) and selects a vector result for loads.
pub(crate) fn result_type(
    types: &UniqueArena<Type>,
    func: &Function,
    kind: &InstKind,
    declared: Option<Handle<Type>>,
) -> Result<Type, IrError> {
    Checker { types, func }.check(kind, declared)
}
