//! Auto-vectorization of innermost counted loops.
//!
//! A legal loop `for iv in start..bound` is split into a vector loop that
//! advances by `width` lanes up to
//! `vend = start + (trip - trip mod width)` and the original scalar loop,
//! which becomes the epilogue and runs from `vend` to `bound`:
//!
//! ```text
//! preheader:     [vend computation]; br vec.header
//! vec.header:    viv = phi [start, preheader], [vnext, vec.latch]
//!                br (viv < vend), vec.body, vec.middle
//! vec.body:      widened body; br vec.latch
//! vec.latch:     vnext = add viv, width; br vec.header
//! vec.middle:    br header            ; header's phi now starts at vend
//! header..exit:  original scalar loop
//! ```
//!
//! When the trip count is a constant multiple of the width the scalar loop is
//! deleted and the vector header exits directly. Both headers are tagged as
//! vectorized, and tagged loops are never considered again.

use std::collections::{HashMap, HashSet};

use loomir_analysis::{
    CanonicalLoop, Loop, LoopInfo, MemoryAccess, ShapeError, TripCount, collect_accesses,
    may_conflict, stride_of,
};
use loomir_ir::{
    BinaryOp, Block, ControlFlowGraph, DominatorTree, Function, Handle, Inst, InstKind,
    IntPredicate, Literal, Module, Scalar, Type, UniqueArena, Value,
};

use crate::{Pass, PassError, defined_function, inst_label};

/// Widens innermost loops to `width` lanes of a `register_bits` register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AutoVectorization {
    pub width: u32,
    pub register_bits: u32,
}

impl AutoVectorization {
    pub fn new(width: u32, register_bits: u32) -> Self {
        Self {
            width,
            register_bits,
        }
    }
}

impl Default for AutoVectorization {
    fn default() -> Self {
        Self::new(4, 128)
    }
}

/// Why a loop was not vectorized.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("loop is already vectorized")]
    AlreadyVectorized,
    #[error("induction step is {0}, expected 1")]
    NonUnitStep(i64),
    #[error("body spans {0} blocks")]
    MultiBlockBody(usize),
    #[error("header or latch does more than loop control")]
    ExtraControlWork,
    #[error("trip count is not computable before the loop")]
    UnknownTripCount,
    #[error("constant trip count {0} is smaller than the vector width")]
    ShortTripCount(u64),
    #[error("`{0}` is used after the loop")]
    LiveOut(String),
    #[error("exit block has phis")]
    ExitPhi,
    #[error("`{0}` cannot be widened")]
    Unsupported(String),
    #[error("{0}-bit lanes do not fit the vector register")]
    LaneTooWide(u32),
    #[error("`{0}` varies per lane outside address computation")]
    VaryingIndex(String),
    #[error("`{0}` does not access consecutive elements")]
    NonUnitStride(String),
    #[error("store `{0}` accumulates into one location across iterations")]
    Reduction(String),
    #[error("memory accesses `{0}` and `{1}` may conflict across iterations")]
    MemoryConflict(String, String),
}

/// How a body value behaves across the lanes of one vector iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Shape {
    /// The same in every lane.
    Uniform,
    /// An integer `lane0 + stride * lane`, kept as its lane-0 scalar.
    Index(i64),
    /// A pointer `lane0 + stride * lane` elements, kept as its lane-0 scalar.
    Address(i64),
    /// A full vector.
    Varying,
}

enum Lowering {
    /// Cloned as is, with remapped operands.
    Scalar,
    /// Cloned with result type `ty`; the listed uniform operands are splatted.
    Widen {
        ty: Handle<Type>,
        splats: Vec<(Value, Handle<Type>)>,
    },
}

enum VectorEnd {
    Constant(i64),
    /// Computed in the preheader from `start` and `bound`.
    Computed,
}

struct VectorPlan {
    canon: CanonicalLoop,
    steps: Vec<(Handle<Inst>, Lowering)>,
    end: VectorEnd,
    epilogue: bool,
    iv_ty: Handle<Type>,
    bool_ty: Handle<Type>,
    void_ty: Handle<Type>,
    base: String,
}

/// Block-name prefix for the new loop, `i` for a header named `i.header`.
fn loop_base_name(func: &Function, header: Handle<Block>) -> String {
    let name = &func.blocks[header].name;
    name.strip_suffix(".header").unwrap_or(name).to_string()
}

struct Legality<'a> {
    func: &'a Function,
    dom: &'a DominatorTree,
    lp: &'a Loop,
    canon: &'a CanonicalLoop,
    config: &'a AutoVectorization,
}

impl Legality<'_> {
    fn check_structure(&self) -> Result<(), Rejection> {
        let func = self.func;
        let canon = self.canon;
        if canon.step != 1 {
            return Err(Rejection::NonUnitStep(canon.step));
        }
        if canon.body.len() != 1 {
            return Err(Rejection::MultiBlockBody(canon.body.len()));
        }
        let header_insts = &func.blocks[canon.header].insts;
        let latch_insts = &func.blocks[canon.latch].insts;
        if header_insts.len() != 3
            || header_insts[..2] != [canon.induction, canon.cond]
            || latch_insts.len() != 2
            || latch_insts[0] != canon.next
        {
            return Err(Rejection::ExtraControlWork);
        }
        if !func.phis(canon.exit).is_empty() {
            return Err(Rejection::ExitPhi);
        }
        for &b in &self.lp.blocks {
            for &i in &func.blocks[b].insts {
                let used_outside = func
                    .users(Value::Inst(i))
                    .into_iter()
                    .any(|u| func.insts[u].block.is_some_and(|ub| !self.lp.contains(ub)));
                if used_outside {
                    return Err(Rejection::LiveOut(inst_label(func, i)));
                }
            }
        }
        Ok(())
    }

    fn shape_of(&self, shapes: &HashMap<Value, Shape>, value: Value) -> Result<Shape, Rejection> {
        if let Some(&s) = shapes.get(&value) {
            return Ok(s);
        }
        match value.as_inst() {
            // Header values other than the induction are loop control.
            Some(h) if self.func.insts[h].block == Some(self.canon.header) => {
                Err(Rejection::VaryingIndex(inst_label(self.func, h)))
            }
            _ => Ok(Shape::Uniform),
        }
    }

    fn vector_type(
        &self,
        types: &mut UniqueArena<Type>,
        ty: Handle<Type>,
        what: Handle<Inst>,
    ) -> Result<Handle<Type>, Rejection> {
        let scalar = types
            .element_scalar(ty)
            .filter(|s| s.is_float() || *s == Scalar::BOOL)
            .ok_or_else(|| Rejection::Unsupported(inst_label(self.func, what)))?;
        if u64::from(scalar.bits()) * u64::from(self.config.width)
            > u64::from(self.config.register_bits)
        {
            return Err(Rejection::LaneTooWide(scalar.bits()));
        }
        Ok(types.vector(self.config.width, scalar))
    }

    /// Classifies every body instruction and decides how to emit it.
    fn plan_body(
        &self,
        types: &mut UniqueArena<Type>,
    ) -> Result<Vec<(Handle<Inst>, Lowering)>, Rejection> {
        let func = self.func;
        let iv = self.canon.induction_value();
        let mut shapes = HashMap::from([(iv, Shape::Index(1))]);
        let mut steps = Vec::new();

        let body = &func.blocks[self.canon.body_entry].insts;
        let Some((_, insts)) = body.split_last() else {
            return Ok(steps);
        };
        for &h in insts {
            let inst = &func.insts[h];
            let operands = inst.kind.operands();
            let op_shapes = operands
                .iter()
                .map(|&v| self.shape_of(&shapes, v))
                .collect::<Result<Vec<_>, _>>()?;
            let any_varying = op_shapes.contains(&Shape::Varying);
            let reject_index = || Rejection::VaryingIndex(inst_label(func, h));

            let (shape, lowering) = match inst.kind {
                InstKind::Gep { .. } => match (op_shapes[0], op_shapes[1]) {
                    (Shape::Uniform, Shape::Uniform) => (Shape::Uniform, Lowering::Scalar),
                    (Shape::Uniform, Shape::Index(s)) => (Shape::Address(s), Lowering::Scalar),
                    _ => return Err(reject_index()),
                },
                InstKind::Bitcast { .. } => match op_shapes[0] {
                    Shape::Uniform => (Shape::Uniform, Lowering::Scalar),
                    _ => return Err(Rejection::Unsupported(inst_label(func, h))),
                },
                InstKind::Load { .. } => match op_shapes[0] {
                    Shape::Uniform => (Shape::Uniform, Lowering::Scalar),
                    Shape::Address(1) => {
                        let ty = self.vector_type(types, inst.ty, h)?;
                        let splats = Vec::new();
                        (Shape::Varying, Lowering::Widen { ty, splats })
                    }
                    _ => return Err(Rejection::NonUnitStride(inst_label(func, h))),
                },
                InstKind::Store { value, .. } => {
                    match op_shapes[1] {
                        Shape::Address(1) => {}
                        Shape::Uniform => return Err(Rejection::Reduction(inst_label(func, h))),
                        _ => return Err(Rejection::NonUnitStride(inst_label(func, h))),
                    }
                    let value_ty = func.value_type(value);
                    let vector = self.vector_type(types, value_ty, h)?;
                    let splats = match op_shapes[0] {
                        Shape::Varying => Vec::new(),
                        Shape::Uniform => vec![(value, vector)],
                        _ => return Err(reject_index()),
                    };
                    (Shape::Uniform, Lowering::Widen { ty: inst.ty, splats })
                }
                InstKind::Binary { op, .. }
                    if !op.is_float() && types.element_scalar(inst.ty) != Some(Scalar::BOOL) =>
                {
                    if any_varying {
                        return Err(reject_index());
                    }
                    match stride_of(func, self.dom, self.lp, Value::Inst(h), iv) {
                        Some(0) => (Shape::Uniform, Lowering::Scalar),
                        Some(s) => (Shape::Index(s), Lowering::Scalar),
                        None => return Err(reject_index()),
                    }
                }
                InstKind::ICmp { .. } => {
                    if op_shapes.iter().any(|&s| s != Shape::Uniform) {
                        return Err(reject_index());
                    }
                    (Shape::Uniform, Lowering::Scalar)
                }
                InstKind::Binary { .. } | InstKind::FCmp { .. } | InstKind::Select { .. } => {
                    if op_shapes
                        .iter()
                        .any(|s| matches!(s, Shape::Index(_) | Shape::Address(_)))
                    {
                        return Err(reject_index());
                    }
                    if !any_varying {
                        (Shape::Uniform, Lowering::Scalar)
                    } else {
                        let ty = self.vector_type(types, inst.ty, h)?;
                        let mut splats = Vec::new();
                        for (&v, &s) in operands.iter().zip(&op_shapes) {
                            if s == Shape::Uniform && !splats.iter().any(|&(u, _)| u == v) {
                                let vty = self.vector_type(types, func.value_type(v), h)?;
                                splats.push((v, vty));
                            }
                        }
                        (Shape::Varying, Lowering::Widen { ty, splats })
                    }
                }
                InstKind::Alloca { .. }
                | InstKind::Phi { .. }
                | InstKind::Call { .. }
                | InstKind::Splat { .. }
                | InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Ret { .. } => return Err(Rejection::Unsupported(inst_label(func, h))),
            };
            shapes.insert(Value::Inst(h), shape);
            steps.push((h, lowering));
        }
        Ok(steps)
    }

    fn check_memory(&self) -> Result<(), Rejection> {
        let accesses: Vec<MemoryAccess> =
            collect_accesses(self.func, self.canon.body.iter().copied());
        for (i, a) in accesses.iter().enumerate() {
            for b in &accesses[i + 1..] {
                if may_conflict(a, b) {
                    return Err(Rejection::MemoryConflict(
                        inst_label(self.func, a.inst),
                        inst_label(self.func, b.inst),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl AutoVectorization {
    fn plan(
        &self,
        types: &mut UniqueArena<Type>,
        func: &Function,
        cfg: &ControlFlowGraph,
        dom: &DominatorTree,
        lp: &Loop,
    ) -> Result<VectorPlan, Rejection> {
        if func.blocks[lp.header].hints.vectorized {
            return Err(Rejection::AlreadyVectorized);
        }
        let canon = CanonicalLoop::recognize(func, cfg, dom, lp)?;
        let legality = Legality {
            func,
            dom,
            lp,
            canon: &canon,
            config: self,
        };
        legality.check_structure()?;

        let width = u64::from(self.width);
        let (end, epilogue) = match canon.trip_count(func, types, dom, lp) {
            Some(TripCount::Constant(n)) if n < width => return Err(Rejection::ShortTripCount(n)),
            Some(TripCount::Constant(n)) => {
                let start = func.const_int(canon.start).unwrap_or(0);
                let main = (n - n % width) as i64;
                (VectorEnd::Constant(start.wrapping_add(main)), n % width != 0)
            }
            Some(TripCount::Invariant) => (VectorEnd::Computed, true),
            None => return Err(Rejection::UnknownTripCount),
        };

        legality.check_memory()?;
        let steps = legality.plan_body(types)?;

        Ok(VectorPlan {
            iv_ty: func.value_type(canon.induction_value()),
            bool_ty: types.scalar(Scalar::BOOL),
            void_ty: types.void(),
            base: loop_base_name(func, canon.header),
            canon,
            steps,
            end,
            epilogue,
        })
    }

    /// Rewrites the function according to a validated plan. Infallible.
    fn apply(&self, func: &mut Function, plan: VectorPlan) {
        let VectorPlan {
            canon,
            steps,
            end,
            epilogue,
            iv_ty,
            bool_ty,
            void_ty,
            base,
        } = plan;
        let width = i64::from(self.width);

        let vend = match end {
            VectorEnd::Constant(v) => func.add_constant(iv_ty, Literal::Int(v)),
            VectorEnd::Computed => emit_vector_end(func, &canon, iv_ty, bool_ty, width, &base),
        };

        let vh = func.insert_block_before(format!("{base}.vec.header"), canon.header);
        let vb = func.insert_block_before(format!("{base}.vec.body"), canon.header);
        let vl = func.insert_block_before(format!("{base}.vec.latch"), canon.header);
        let middle =
            epilogue.then(|| func.insert_block_before(format!("{base}.vec.middle"), canon.header));
        func.retarget(canon.preheader, canon.header, vh);

        // vec.header
        let viv = func.append_inst(
            vh,
            InstKind::Phi {
                incoming: vec![(canon.start, canon.preheader), (canon.start, vl)],
            },
            iv_ty,
            Some(format!("{base}.vec.iv")),
        );
        let viv_value = Value::Inst(viv);
        let vcond = func.append_inst(
            vh,
            InstKind::ICmp {
                pred: IntPredicate::Ult,
                lhs: viv_value,
                rhs: vend,
            },
            bool_ty,
            Some(format!("{base}.vec.cond")),
        );
        func.append_inst(
            vh,
            InstKind::CondBr {
                cond: Value::Inst(vcond),
                then_dest: vb,
                else_dest: middle.unwrap_or(canon.exit),
            },
            void_ty,
            None,
        );

        // vec.body
        let mut map = HashMap::from([(canon.induction_value(), viv_value)]);
        let mut splatted: HashMap<Value, Value> = HashMap::new();
        for (h, lowering) in steps {
            let original = func.insts[h].clone();
            let mut kind = original.kind;
            let name = original.name.map(|n| format!("{n}.vec"));
            let ty = match lowering {
                Lowering::Scalar => {
                    kind.map_operands(|v| map.get(&v).copied().unwrap_or(v));
                    original.ty
                }
                Lowering::Widen { ty, splats } => {
                    let mut replace = HashMap::new();
                    for (v, vty) in splats {
                        let splat = match splatted.get(&v) {
                            Some(&s) => s,
                            None => {
                                let scalar = map.get(&v).copied().unwrap_or(v);
                                let s = Value::Inst(func.append_inst(
                                    vb,
                                    InstKind::Splat { value: scalar },
                                    vty,
                                    Some(format!("{base}.splat")),
                                ));
                                splatted.insert(v, s);
                                s
                            }
                        };
                        replace.insert(v, splat);
                    }
                    kind.map_operands(|v| {
                        replace
                            .get(&v)
                            .or_else(|| map.get(&v))
                            .copied()
                            .unwrap_or(v)
                    });
                    ty
                }
            };
            let new = func.append_inst(vb, kind, ty, name);
            map.insert(Value::Inst(h), Value::Inst(new));
        }
        func.append_inst(vb, InstKind::Br { target: vl }, void_ty, None);

        // vec.latch
        let step = func.add_constant(iv_ty, Literal::Int(width));
        let vnext = func.append_inst(
            vl,
            InstKind::Binary {
                op: BinaryOp::Add,
                lhs: viv_value,
                rhs: step,
            },
            iv_ty,
            Some(format!("{base}.vec.next")),
        );
        func.append_inst(vl, InstKind::Br { target: vh }, void_ty, None);
        func.set_phi_incoming(viv, vl, Value::Inst(vnext));
        func.blocks[vh].hints.vectorized = true;

        match middle {
            Some(middle) => {
                func.append_inst(
                    middle,
                    InstKind::Br {
                        target: canon.header,
                    },
                    void_ty,
                    None,
                );
                func.replace_phi_predecessor(canon.header, canon.preheader, middle);
                func.set_phi_incoming(canon.induction, middle, vend);
                func.blocks[canon.header].hints.vectorized = true;
            }
            None => {
                for b in [canon.header, canon.latch].into_iter().chain(canon.body.iter().copied()) {
                    func.erase_block(b);
                }
            }
        }
    }
}

/// Emits `vend = start + (trip - trip mod width)` before the preheader's
/// branch, with `trip = start < bound ? bound - start : 0`.
fn emit_vector_end(
    func: &mut Function,
    canon: &CanonicalLoop,
    iv_ty: Handle<Type>,
    bool_ty: Handle<Type>,
    width: i64,
    base: &str,
) -> Value {
    let ph = canon.preheader;
    let zero = func.add_constant(iv_ty, Literal::Int(0));
    let w = func.add_constant(iv_ty, Literal::Int(width));
    let emit = |func: &mut Function, kind: InstKind, ty: Handle<Type>, name: &str| {
        Value::Inst(func.insert_before_terminator(ph, kind, ty, Some(format!("{base}.{name}"))))
    };
    let entered = emit(
        func,
        InstKind::ICmp {
            pred: IntPredicate::Ult,
            lhs: canon.start,
            rhs: canon.bound,
        },
        bool_ty,
        "vec.entered",
    );
    let span = emit(
        func,
        InstKind::Binary {
            op: BinaryOp::Sub,
            lhs: canon.bound,
            rhs: canon.start,
        },
        iv_ty,
        "vec.span",
    );
    let trip = emit(
        func,
        InstKind::Select {
            cond: entered,
            on_true: span,
            on_false: zero,
        },
        iv_ty,
        "vec.trip",
    );
    let rem = emit(
        func,
        InstKind::Binary {
            op: BinaryOp::URem,
            lhs: trip,
            rhs: w,
        },
        iv_ty,
        "vec.rem",
    );
    let main = emit(
        func,
        InstKind::Binary {
            op: BinaryOp::Sub,
            lhs: trip,
            rhs: rem,
        },
        iv_ty,
        "vec.main",
    );
    emit(
        func,
        InstKind::Binary {
            op: BinaryOp::Add,
            lhs: canon.start,
            rhs: main,
        },
        iv_ty,
        "vec.end",
    )
}

impl Pass for AutoVectorization {
    fn name(&self) -> &str {
        "auto-vectorization"
    }

    fn run(&self, module: &mut Module, function: Handle<Function>) -> Result<bool, PassError> {
        defined_function(module, function, self.name())?;
        if self.width < 2 {
            return Ok(false);
        }

        let mut changed = false;
        let mut rejected = HashSet::new();
        loop {
            let Module { types, functions } = &mut *module;
            let func = &functions[function];
            let cfg = ControlFlowGraph::compute(func);
            let dom = DominatorTree::compute(&cfg);
            let loops = LoopInfo::compute(func, &cfg, &dom);

            let mut planned = None;
            for h in loops.innermost() {
                let lp = &loops[h];
                if rejected.contains(&lp.header) {
                    continue;
                }
                match self.plan(types, func, &cfg, &dom, lp) {
                    Ok(plan) => {
                        planned = Some(plan);
                        break;
                    }
                    Err(Rejection::AlreadyVectorized) => {
                        rejected.insert(lp.header);
                    }
                    Err(reason) => {
                        log::debug!(
                            "auto-vectorization: skipping loop `{}` in `{}`: {reason}",
                            func.blocks[lp.header].name,
                            func.name
                        );
                        rejected.insert(lp.header);
                    }
                }
            }

            let Some(plan) = planned else {
                break;
            };
            log::info!(
                "auto-vectorization: widening loop `{}` in `{}` to {} lanes{}",
                func.blocks[plan.canon.header].name,
                func.name,
                self.width,
                if plan.epilogue { " with a scalar epilogue" } else { "" }
            );
            rejected.insert(plan.canon.header);
            self.apply(&mut functions[function], plan);
            changed = true;
        }
        Ok(changed)
    }
}
