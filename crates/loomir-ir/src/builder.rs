//! Checked instruction construction.
//!
//! [`FunctionBuilder`] borrows a module's type arena and a function under
//! construction. There is no hidden insertion point: every emitting method
//! takes the block to append to (`at`) explicitly.

use crate::arena::{Handle, UniqueArena};
use crate::display::format_type;
use crate::error::IrError;
use crate::func::{Block, Function};
use crate::inst::{BinaryOp, FloatPredicate, Inst, InstKind, IntPredicate, Literal, Value};
use crate::typeck::result_type;
use crate::types::{Scalar, Type};

/// Builds instructions into a [`Function`], type-checking every operand.
pub struct FunctionBuilder<'a> {
    pub types: &'a mut UniqueArena<Type>,
    pub func: &'a mut Function,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(types: &'a mut UniqueArena<Type>, func: &'a mut Function) -> Self {
        Self { types, func }
    }

    /// The value of parameter `index`.
    pub fn param(&self, index: u32) -> Result<Value, IrError> {
        let value = Value::Param(index);
        self.func.try_value_type(value)?;
        Ok(value)
    }

    pub fn value_type(&self, value: Value) -> Result<Handle<Type>, IrError> {
        self.func.try_value_type(value)
    }

    pub fn append_block(&mut self, name: impl Into<String>) -> Handle<Block> {
        self.func.append_block(name)
    }

    // ----- constants -----

    pub fn const_int(&mut self, scalar: Scalar, value: i64) -> Value {
        let ty = self.types.scalar(scalar);
        self.func.add_constant(ty, Literal::Int(value))
    }

    pub fn const_i32(&mut self, value: i32) -> Value {
        self.const_int(Scalar::I32, i64::from(value))
    }

    pub fn const_i64(&mut self, value: i64) -> Value {
        self.const_int(Scalar::I64, value)
    }

    pub fn const_f32(&mut self, value: f32) -> Value {
        let ty = self.types.scalar(Scalar::F32);
        self.func.add_constant(ty, Literal::F32(value))
    }

    pub fn const_bool(&mut self, value: bool) -> Value {
        let ty = self.types.scalar(Scalar::BOOL);
        self.func.add_constant(ty, Literal::Bool(value))
    }

    // ----- emission -----

    fn emit(
        &mut self,
        at: Handle<Block>,
        kind: InstKind,
        declared: Option<Handle<Type>>,
        name: Option<&str>,
    ) -> Result<Handle<Inst>, IrError> {
        let block = self.func.blocks.try_get(at).ok_or(IrError::BadHandle {
            index: at.index(),
            size: self.func.blocks.len(),
        })?;
        if self.func.terminator(at).is_some() {
            return Err(IrError::BlockTerminated {
                block: block.name.clone(),
            });
        }
        let ty = result_type(self.types, self.func, &kind, declared)?;
        let ty = self.types.insert(ty);
        Ok(self
            .func
            .append_inst(at, kind, ty, name.map(str::to_string)))
    }

    fn emit_value(
        &mut self,
        at: Handle<Block>,
        kind: InstKind,
        declared: Option<Handle<Type>>,
        name: &str,
    ) -> Result<Value, IrError> {
        self.emit(at, kind, declared, Some(name)).map(Value::Inst)
    }

    pub fn alloca(
        &mut self,
        at: Handle<Block>,
        allocated: Handle<Type>,
        align: u32,
        name: &str,
    ) -> Result<Value, IrError> {
        self.emit_value(at, InstKind::Alloca { allocated, align }, None, name)
    }

    pub fn load(&mut self, at: Handle<Block>, ptr: Value, name: &str) -> Result<Value, IrError> {
        self.emit_value(at, InstKind::Load { ptr }, None, name)
    }

    /// Loads `lanes` consecutive elements as one vector.
    pub fn load_vector(
        &mut self,
        at: Handle<Block>,
        ptr: Value,
        lanes: u32,
        name: &str,
    ) -> Result<Value, IrError> {
        let ptr_ty = self.func.try_value_type(ptr)?;
        let scalar = self
            .types
            .pointee(ptr_ty)
            .and_then(|p| self.types.element_scalar(p));
        let Some(scalar) = scalar else {
            return Err(IrError::TypeMismatch {
                expected: "pointer to scalar".into(),
                found: format_type(self.types, ptr_ty),
            });
        };
        let vector = self.types.vector(lanes, scalar);
        self.emit_value(at, InstKind::Load { ptr }, Some(vector), name)
    }

    pub fn store(&mut self, at: Handle<Block>, value: Value, ptr: Value) -> Result<(), IrError> {
        self.emit(at, InstKind::Store { value, ptr }, None, None)
            .map(drop)
    }

    /// `&base[index]`.
    pub fn gep(
        &mut self,
        at: Handle<Block>,
        base: Value,
        index: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.emit_value(at, InstKind::Gep { base, index }, None, name)
    }

    pub fn binary(
        &mut self,
        at: Handle<Block>,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.emit_value(at, InstKind::Binary { op, lhs, rhs }, None, name)
    }

    pub fn add(&mut self, at: Handle<Block>, lhs: Value, rhs: Value, name: &str) -> Result<Value, IrError> {
        self.binary(at, BinaryOp::Add, lhs, rhs, name)
    }

    pub fn mul(&mut self, at: Handle<Block>, lhs: Value, rhs: Value, name: &str) -> Result<Value, IrError> {
        self.binary(at, BinaryOp::Mul, lhs, rhs, name)
    }

    pub fn icmp(
        &mut self,
        at: Handle<Block>,
        pred: IntPredicate,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.emit_value(at, InstKind::ICmp { pred, lhs, rhs }, None, name)
    }

    pub fn fcmp(
        &mut self,
        at: Handle<Block>,
        pred: FloatPredicate,
        lhs: Value,
        rhs: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        self.emit_value(at, InstKind::FCmp { pred, lhs, rhs }, None, name)
    }

    pub fn select(
        &mut self,
        at: Handle<Block>,
        cond: Value,
        on_true: Value,
        on_false: Value,
        name: &str,
    ) -> Result<Value, IrError> {
        let kind = InstKind::Select {
            cond,
            on_true,
            on_false,
        };
        self.emit_value(at, kind, None, name)
    }

    /// Creates a phi after the existing phis of `at`. Incoming edges may be
    /// added later with [`add_incoming`](Self::add_incoming).
    pub fn phi(
        &mut self,
        at: Handle<Block>,
        ty: Handle<Type>,
        incoming: Vec<(Value, Handle<Block>)>,
        name: &str,
    ) -> Result<Value, IrError> {
        let phi = InstKind::Phi {
            incoming: incoming.clone(),
        };
        let checked = result_type(self.types, self.func, &phi, Some(ty))?;
        let ty = self.types.insert(checked);
        Ok(Value::Inst(self.func.insert_phi(
            at,
            incoming,
            ty,
            Some(name.to_string()),
        )))
    }

    pub fn add_incoming(
        &mut self,
        phi: Value,
        value: Value,
        pred: Handle<Block>,
    ) -> Result<(), IrError> {
        let phi = phi.as_inst().ok_or(IrError::ErasedValue)?;
        let phi_ty = self.func.insts[phi].ty;
        let value_ty = self.func.try_value_type(value)?;
        if phi_ty != value_ty {
            return Err(IrError::TypeMismatch {
                expected: format_type(self.types, phi_ty),
                found: format_type(self.types, value_ty),
            });
        }
        match &mut self.func.insts[phi].kind {
            InstKind::Phi { incoming } => {
                incoming.push((value, pred));
                Ok(())
            }
            _ => Err(IrError::TypeMismatch {
                expected: "phi".into(),
                found: self.func.insts[phi].kind.opcode().into(),
            }),
        }
    }

    /// Reinterprets a pointer as `to` (another pointer type).
    pub fn bitcast(
        &mut self,
        at: Handle<Block>,
        value: Value,
        to: Handle<Type>,
        name: &str,
    ) -> Result<Value, IrError> {
        self.emit_value(at, InstKind::Bitcast { value }, Some(to), name)
    }

    pub fn splat(
        &mut self,
        at: Handle<Block>,
        value: Value,
        lanes: u32,
        name: &str,
    ) -> Result<Value, IrError> {
        let value_ty = self.func.try_value_type(value)?;
        let Some(scalar) = self.types.element_scalar(value_ty) else {
            return Err(IrError::TypeMismatch {
                expected: "scalar".into(),
                found: format_type(self.types, value_ty),
            });
        };
        let vector = self.types.vector(lanes, scalar);
        self.emit_value(at, InstKind::Splat { value }, Some(vector), name)
    }

    pub fn call(
        &mut self,
        at: Handle<Block>,
        callee: &str,
        args: Vec<Value>,
        ret: Handle<Type>,
        name: Option<&str>,
    ) -> Result<Value, IrError> {
        let kind = InstKind::Call {
            callee: callee.to_string(),
            args,
        };
        self.emit(at, kind, Some(ret), name).map(Value::Inst)
    }

    pub fn br(&mut self, at: Handle<Block>, target: Handle<Block>) -> Result<(), IrError> {
        self.emit(at, InstKind::Br { target }, None, None).map(drop)
    }

    pub fn cond_br(
        &mut self,
        at: Handle<Block>,
        cond: Value,
        then_dest: Handle<Block>,
        else_dest: Handle<Block>,
    ) -> Result<(), IrError> {
        let kind = InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        };
        self.emit(at, kind, None, None).map(drop)
    }

    pub fn ret(&mut self, at: Handle<Block>, value: Option<Value>) -> Result<(), IrError> {
        self.emit(at, InstKind::Ret { value }, None, None).map(drop)
    }
}
