//! Reference interpreter.
//!
//! Executes a function over a byte-addressed [`Memory`] made of disjoint
//! regions. Used as the black-box oracle for generated kernels and for
//! checking that passes preserve results.

use std::collections::HashMap;

use crate::Module;
use crate::arena::{Handle, UniqueArena};
use crate::display::format_type;
use crate::func::{Block, Function};
use crate::inst::{BinaryOp, FloatPredicate, Inst, InstKind, IntPredicate, Literal, Value};
use crate::types::{Scalar, ScalarKind, Type, TypeInner};

/// Default bound on executed instructions per top-level call.
pub const DEFAULT_STEP_LIMIT: u64 = 50_000_000;

/// Errors raised while interpreting.
#[derive(Debug, thiserror::Error)]
pub enum InterpError {
    #[error("out-of-bounds access of {size} bytes at offset {offset} in region {region} ({len} bytes)")]
    OutOfBounds {
        region: usize,
        offset: i64,
        size: u64,
        len: usize,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),

    #[error("call to unknown function `{0}`")]
    UnknownCallee(String),

    #[error("function `{name}` expects {expected} arguments, got {found}")]
    ArgumentCount {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("malformed IR: {0}")]
    Malformed(String),
}

/// An address: a region plus a byte offset into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pointer {
    pub region: usize,
    pub offset: i64,
}

/// A runtime value.
#[derive(Clone, Debug, PartialEq)]
pub enum RtValue {
    Bool(bool),
    Int(i64),
    F32(f32),
    Ptr(Pointer),
    Vector(Vec<RtValue>),
    Void,
}

impl RtValue {
    fn malformed(&self, expected: &str) -> InterpError {
        InterpError::Malformed(format!("expected {expected}, found {self:?}"))
    }

    fn as_bool(&self) -> Result<bool, InterpError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.malformed("bool")),
        }
    }

    fn as_int(&self) -> Result<i64, InterpError> {
        match self {
            Self::Int(v) => Ok(*v),
            other => Err(other.malformed("integer")),
        }
    }

    fn as_f32(&self) -> Result<f32, InterpError> {
        match self {
            Self::F32(v) => Ok(*v),
            other => Err(other.malformed("f32")),
        }
    }

    fn as_ptr(&self) -> Result<Pointer, InterpError> {
        match self {
            Self::Ptr(p) => Ok(*p),
            other => Err(other.malformed("pointer")),
        }
    }
}

/// Byte-addressed memory. Each allocation is its own region; accesses past
/// a region's bounds are errors.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    regions: Vec<Vec<u8>>,
    loads: u64,
    stores: u64,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a zero-filled region.
    pub fn alloc(&mut self, bytes: usize) -> Pointer {
        self.regions.push(vec![0; bytes]);
        Pointer {
            region: self.regions.len() - 1,
            offset: 0,
        }
    }

    /// Allocates a region holding `data`.
    pub fn alloc_f32(&mut self, data: &[f32]) -> Pointer {
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.regions.push(bytes);
        Pointer {
            region: self.regions.len() - 1,
            offset: 0,
        }
    }

    /// Reads `count` consecutive `f32`s without counting as a program access.
    pub fn read_f32(&self, ptr: Pointer, count: usize) -> Result<Vec<f32>, InterpError> {
        let bytes = self.bytes(ptr, count as u64 * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    /// Number of loads executed by interpreted code.
    pub fn loads(&self) -> u64 {
        self.loads
    }

    /// Number of stores executed by interpreted code.
    pub fn stores(&self) -> u64 {
        self.stores
    }

    pub fn accesses(&self) -> u64 {
        self.loads + self.stores
    }

    fn range(&self, ptr: Pointer, size: u64) -> Result<std::ops::Range<usize>, InterpError> {
        let len = self.regions.get(ptr.region).map_or(0, Vec::len);
        let start = usize::try_from(ptr.offset).ok();
        let end = start.and_then(|s| s.checked_add(usize::try_from(size).ok()?));
        match (start, end) {
            (Some(start), Some(end)) if end <= len && ptr.region < self.regions.len() => {
                Ok(start..end)
            }
            _ => Err(InterpError::OutOfBounds {
                region: ptr.region,
                offset: ptr.offset,
                size,
                len,
            }),
        }
    }

    fn bytes(&self, ptr: Pointer, size: u64) -> Result<&[u8], InterpError> {
        let range = self.range(ptr, size)?;
        Ok(&self.regions[ptr.region][range])
    }

    fn bytes_mut(&mut self, ptr: Pointer, size: u64) -> Result<&mut [u8], InterpError> {
        let range = self.range(ptr, size)?;
        Ok(&mut self.regions[ptr.region][range])
    }
}

/// Sign- or zero-extends the low `bits` of `v` according to `scalar`.
fn normalize(v: i64, scalar: Scalar) -> i64 {
    let bits = scalar.bits();
    if bits >= 64 || scalar.kind == ScalarKind::Bool {
        return v;
    }
    let shift = 64 - bits;
    match scalar.kind {
        ScalarKind::Sint => (v << shift) >> shift,
        _ => ((v as u64) & ((1u64 << bits) - 1)) as i64,
    }
}

fn unsigned(v: i64, scalar: Scalar) -> u64 {
    let bits = scalar.bits();
    if bits >= 64 {
        v as u64
    } else {
        (v as u64) & ((1u64 << bits) - 1)
    }
}

fn load_scalar(memory: &Memory, ptr: Pointer, s: Scalar) -> Result<RtValue, InterpError> {
    let bytes = memory.bytes(ptr, u64::from(s.width))?;
    Ok(match s.kind {
        ScalarKind::Bool => RtValue::Bool(bytes[0] != 0),
        ScalarKind::Float => RtValue::F32(f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        ScalarKind::Sint | ScalarKind::Uint => {
            let mut buf = [0u8; 8];
            buf[..bytes.len()].copy_from_slice(bytes);
            RtValue::Int(normalize(i64::from_le_bytes(buf), s))
        }
    })
}

/// Applies `f` lane-wise when `a`/`b` are vectors.
fn lanewise2(
    a: &RtValue,
    b: &RtValue,
    f: &mut dyn FnMut(&RtValue, &RtValue) -> Result<RtValue, InterpError>,
) -> Result<RtValue, InterpError> {
    match (a, b) {
        (RtValue::Vector(xs), RtValue::Vector(ys)) => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| f(x, y))
            .collect::<Result<_, _>>()
            .map(RtValue::Vector),
        _ => f(a, b),
    }
}

fn binary(op: BinaryOp, scalar: Scalar, a: &RtValue, b: &RtValue) -> Result<RtValue, InterpError> {
    if op.is_float() {
        let (x, y) = (a.as_f32()?, b.as_f32()?);
        return Ok(RtValue::F32(match op {
            BinaryOp::FAdd => x + y,
            BinaryOp::FSub => x - y,
            BinaryOp::FMul => x * y,
            _ => x / y,
        }));
    }
    if let (RtValue::Bool(x), RtValue::Bool(y)) = (a, b) {
        return match op {
            BinaryOp::And => Ok(RtValue::Bool(*x && *y)),
            BinaryOp::Or => Ok(RtValue::Bool(*x || *y)),
            _ => Err(InterpError::Unsupported(format!("{op:?} on booleans"))),
        };
    }
    let (x, y) = (a.as_int()?, b.as_int()?);
    let r = match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::UDiv | BinaryOp::URem => {
            let (ux, uy) = (unsigned(x, scalar), unsigned(y, scalar));
            if uy == 0 {
                return Err(InterpError::DivisionByZero);
            }
            if op == BinaryOp::UDiv {
                (ux / uy) as i64
            } else {
                (ux % uy) as i64
            }
        }
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv => {
            return Err(InterpError::Unsupported(format!("{op:?} on integers")));
        }
    };
    Ok(RtValue::Int(normalize(r, scalar)))
}

fn icmp(pred: IntPredicate, scalar: Scalar, a: &RtValue, b: &RtValue) -> Result<RtValue, InterpError> {
    let (x, y) = (a.as_int()?, b.as_int()?);
    let (ux, uy) = (unsigned(x, scalar), unsigned(y, scalar));
    let (sx, sy) = (normalize(x, scalar), normalize(y, scalar));
    Ok(RtValue::Bool(match pred {
        IntPredicate::Eq => ux == uy,
        IntPredicate::Ne => ux != uy,
        IntPredicate::Ult => ux < uy,
        IntPredicate::Ule => ux <= uy,
        IntPredicate::Ugt => ux > uy,
        IntPredicate::Uge => ux >= uy,
        IntPredicate::Slt => sx < sy,
        IntPredicate::Sge => sx >= sy,
    }))
}

fn fcmp(pred: FloatPredicate, a: &RtValue, b: &RtValue) -> Result<RtValue, InterpError> {
    let (x, y) = (a.as_f32()?, b.as_f32()?);
    Ok(RtValue::Bool(match pred {
        FloatPredicate::Oeq => x == y,
        FloatPredicate::Ogt => x > y,
        FloatPredicate::Oge => x >= y,
        FloatPredicate::Olt => x < y,
        FloatPredicate::Ole => x <= y,
        FloatPredicate::Une => x != y,
    }))
}

/// Executes functions of one module.
pub struct Interpreter<'m> {
    module: &'m Module,
    step_limit: u64,
    steps: u64,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            step_limit: DEFAULT_STEP_LIMIT,
            steps: 0,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Calls `func` with `args`, returning its result (`Void` for `ret void`).
    pub fn call(
        &mut self,
        func: Handle<Function>,
        args: &[RtValue],
        memory: &mut Memory,
    ) -> Result<RtValue, InterpError> {
        let module = self.module;
        let function = &module.functions[func];
        if function.is_declaration() {
            return Err(InterpError::UnknownCallee(function.name.clone()));
        }
        if function.params.len() != args.len() {
            return Err(InterpError::ArgumentCount {
                name: function.name.clone(),
                expected: function.params.len(),
                found: args.len(),
            });
        }
        Frame {
            module,
            func: function,
            args,
            values: HashMap::new(),
        }
        .run(self, memory)
    }

    fn tick(&mut self) -> Result<(), InterpError> {
        self.steps += 1;
        if self.steps > self.step_limit {
            return Err(InterpError::StepLimit(self.step_limit));
        }
        Ok(())
    }
}

struct Frame<'a> {
    module: &'a Module,
    func: &'a Function,
    args: &'a [RtValue],
    values: HashMap<Handle<Inst>, RtValue>,
}

enum Flow {
    Next,
    Jump(Handle<Block>),
    Return(RtValue),
}

impl Frame<'_> {
    fn run(mut self, interp: &mut Interpreter<'_>, memory: &mut Memory) -> Result<RtValue, InterpError> {
        let func = self.func;
        let mut block = func
            .entry()
            .ok_or_else(|| InterpError::UnknownCallee(func.name.clone()))?;
        let mut prev: Option<Handle<Block>> = None;
        loop {
            let insts = &func.blocks[block].insts;
            let phi_count = func.phis(block).len();

            // Phis read their incoming values simultaneously.
            let mut phi_values = Vec::with_capacity(phi_count);
            for &phi in &insts[..phi_count] {
                interp.tick()?;
                let InstKind::Phi { incoming } = &func.insts[phi].kind else {
                    continue;
                };
                let value = incoming
                    .iter()
                    .find(|&&(_, pred)| Some(pred) == prev)
                    .map(|&(v, _)| v)
                    .ok_or_else(|| {
                        InterpError::Malformed(format!(
                            "phi in `{}` has no entry for the incoming edge",
                            func.blocks[block].name
                        ))
                    })?;
                phi_values.push((phi, self.eval(value)?));
            }
            self.values.extend(phi_values);

            let mut next = None;
            for &inst in &insts[phi_count..] {
                interp.tick()?;
                match self.exec(interp, memory, inst)? {
                    Flow::Next => {}
                    Flow::Jump(target) => {
                        next = Some(target);
                        break;
                    }
                    Flow::Return(v) => return Ok(v),
                }
            }
            let Some(target) = next else {
                return Err(InterpError::Malformed(format!(
                    "block `{}` fell through",
                    func.blocks[block].name
                )));
            };
            prev = Some(block);
            block = target;
        }
    }

    fn types(&self) -> &UniqueArena<Type> {
        &self.module.types
    }

    fn scalar_of(&self, ty: Handle<Type>) -> Result<Scalar, InterpError> {
        self.types()
            .element_scalar(ty)
            .ok_or_else(|| InterpError::Malformed("expected scalar or vector type".into()))
    }

    fn eval(&self, value: Value) -> Result<RtValue, InterpError> {
        match value {
            Value::Inst(h) => self
                .values
                .get(&h)
                .cloned()
                .ok_or_else(|| InterpError::Malformed(format!("use of undefined value {h:?}"))),
            Value::Param(i) => self
                .args
                .get(i as usize)
                .cloned()
                .ok_or_else(|| InterpError::Malformed(format!("parameter {i} out of range"))),
            Value::Const(h) => {
                let constant = &self.func.constants[h];
                Ok(match constant.literal {
                    Literal::Bool(b) => RtValue::Bool(b),
                    Literal::F32(v) => RtValue::F32(v),
                    Literal::Int(v) => {
                        RtValue::Int(normalize(v, self.scalar_of(constant.ty)?))
                    }
                })
            }
        }
    }

    fn load(&self, memory: &Memory, ptr: Pointer, ty: Handle<Type>) -> Result<RtValue, InterpError> {
        match self.types()[ty].inner {
            TypeInner::Scalar(s) => load_scalar(memory, ptr, s),
            TypeInner::Vector { lanes, scalar } => (0..i64::from(lanes))
                .map(|lane| {
                    let p = Pointer {
                        region: ptr.region,
                        offset: ptr.offset + lane * i64::from(scalar.width),
                    };
                    load_scalar(memory, p, scalar)
                })
                .collect::<Result<_, _>>()
                .map(RtValue::Vector),
            _ => Err(InterpError::Unsupported(format!(
                "load of {}",
                format_type(self.types(), ty)
            ))),
        }
    }

    fn store(&self, memory: &mut Memory, ptr: Pointer, value: &RtValue) -> Result<(), InterpError> {
        match value {
            RtValue::F32(v) => memory.bytes_mut(ptr, 4)?.copy_from_slice(&v.to_le_bytes()),
            RtValue::Bool(b) => memory.bytes_mut(ptr, 1)?[0] = u8::from(*b),
            RtValue::Vector(lanes) => {
                let mut offset = ptr.offset;
                for lane in lanes {
                    let width = match lane {
                        RtValue::F32(_) => 4,
                        RtValue::Bool(_) => 1,
                        _ => return Err(InterpError::Unsupported("vector of non-f32".into())),
                    };
                    self.store(
                        memory,
                        Pointer {
                            region: ptr.region,
                            offset,
                        },
                        lane,
                    )?;
                    offset += width;
                }
            }
            other => return Err(InterpError::Unsupported(format!("untyped store of {other:?}"))),
        }
        Ok(())
    }

    fn store_int(&self, memory: &mut Memory, ptr: Pointer, v: i64, scalar: Scalar) -> Result<(), InterpError> {
        let width = usize::from(scalar.width);
        let bytes = v.to_le_bytes();
        memory
            .bytes_mut(ptr, width as u64)?
            .copy_from_slice(&bytes[..width]);
        Ok(())
    }

    fn exec(
        &mut self,
        interp: &mut Interpreter<'_>,
        memory: &mut Memory,
        h: Handle<Inst>,
    ) -> Result<Flow, InterpError> {
        let func = self.func;
        let inst = &func.insts[h];
        let result = match &inst.kind {
            InstKind::Alloca { allocated, .. } => {
                let size = self.types().alloc_size(*allocated);
                RtValue::Ptr(memory.alloc(size as usize))
            }
            InstKind::Load { ptr } => {
                let p = self.eval(*ptr)?.as_ptr()?;
                memory.loads += 1;
                self.load(memory, p, inst.ty)?
            }
            InstKind::Store { value, ptr } => {
                let p = self.eval(*ptr)?.as_ptr()?;
                let v = self.eval(*value)?;
                memory.stores += 1;
                match v {
                    RtValue::Int(i) => {
                        let scalar = self.scalar_of(func.value_type(*value))?;
                        self.store_int(memory, p, i, scalar)?;
                    }
                    other => self.store(memory, p, &other)?,
                }
                RtValue::Void
            }
            InstKind::Gep { base, index } => {
                let p = self.eval(*base)?.as_ptr()?;
                let i = self.eval(*index)?.as_int()?;
                let pointee = self
                    .types()
                    .pointee(inst.ty)
                    .ok_or_else(|| InterpError::Malformed("gep on non-pointer".into()))?;
                let stride = self.types().alloc_size(pointee) as i64;
                RtValue::Ptr(Pointer {
                    region: p.region,
                    offset: p.offset.wrapping_add(i.wrapping_mul(stride)),
                })
            }
            InstKind::Binary { op, lhs, rhs } => {
                let scalar = self.scalar_of(inst.ty)?;
                let (a, b) = (self.eval(*lhs)?, self.eval(*rhs)?);
                lanewise2(&a, &b, &mut |x, y| binary(*op, scalar, x, y))?
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                let scalar = self.scalar_of(func.value_type(*lhs))?;
                let (a, b) = (self.eval(*lhs)?, self.eval(*rhs)?);
                lanewise2(&a, &b, &mut |x, y| icmp(*pred, scalar, x, y))?
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                let (a, b) = (self.eval(*lhs)?, self.eval(*rhs)?);
                lanewise2(&a, &b, &mut |x, y| fcmp(*pred, x, y))?
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => {
                let c = self.eval(*cond)?;
                let (t, f) = (self.eval(*on_true)?, self.eval(*on_false)?);
                match (c, t, f) {
                    (RtValue::Vector(cs), RtValue::Vector(ts), RtValue::Vector(fs)) => {
                        let lanes = cs
                            .iter()
                            .zip(ts.into_iter().zip(fs))
                            .map(|(c, (t, f))| Ok(if c.as_bool()? { t } else { f }))
                            .collect::<Result<_, InterpError>>()?;
                        RtValue::Vector(lanes)
                    }
                    (c, t, f) => {
                        if c.as_bool()? {
                            t
                        } else {
                            f
                        }
                    }
                }
            }
            InstKind::Phi { .. } => {
                return Err(InterpError::Malformed("phi after non-phi instruction".into()));
            }
            InstKind::Bitcast { value } => self.eval(*value)?,
            InstKind::Splat { value } => {
                let v = self.eval(*value)?;
                let lanes = self.types().lanes(inst.ty).unwrap_or(1);
                RtValue::Vector(vec![v; lanes as usize])
            }
            InstKind::Call { callee, args } => {
                let target = self
                    .module
                    .function_by_name(callee)
                    .filter(|&f| !self.module.functions[f].is_declaration())
                    .ok_or_else(|| InterpError::UnknownCallee(callee.clone()))?;
                let values = args
                    .iter()
                    .map(|&a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                interp.call(target, &values, memory)?
            }
            InstKind::Br { target } => return Ok(Flow::Jump(*target)),
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            } => {
                let taken = if self.eval(*cond)?.as_bool()? {
                    *then_dest
                } else {
                    *else_dest
                };
                return Ok(Flow::Jump(taken));
            }
            InstKind::Ret { value } => {
                let v = match value {
                    Some(v) => self.eval(*v)?,
                    None => RtValue::Void,
                };
                return Ok(Flow::Return(v));
            }
        };
        self.values.insert(h, result);
        Ok(Flow::Next)
    }
}
