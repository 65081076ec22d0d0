//! Loop fusion of a perfectly independent inner loop into its parent.
//!
//! When an inner loop computes the same thing in every iteration of its
//! parent, it is enough to run it once. The rewrite relocates the inner loop
//! onto the parent's exit edge:
//!
//! ```text
//! before                          after
//! outer.header -> body | exit     outer.header -> body | inner.header
//! inner.pre    -> inner.header    inner.pre    -> inner.exit
//! inner.header -> ... | inner.exit
//!                                 inner.header -> ... | outer.exit
//! ```
//!
//! No instruction is created or deleted. Bodies are not interleaved, so two
//! sibling loops are never merged.

use std::collections::HashSet;

use loomir_analysis::{
    CanonicalLoop, Loop, LoopInfo, MemoryAccess, ShapeError, TripCount, collect_accesses,
    has_dedicated_exits, is_loop_invariant,
};
use loomir_ir::{
    Block, ControlFlowGraph, DominatorTree, Function, Handle, InstKind, Module, Type, UniqueArena,
    Value,
};

use crate::{Pass, PassError, defined_function, inst_label};

/// Hoists single inner loops that do not depend on their parent out of it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopFusion;

/// Why a nest was not fused.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FusionRejection {
    #[error("outer loop: {0}")]
    OuterShape(ShapeError),
    #[error("inner loop: {0}")]
    InnerShape(ShapeError),
    #[error("exit block `{0}` is shared with other predecessors")]
    SharedExit(String),
    #[error("outer trip count is not a constant of at least 1")]
    OuterTripCount,
    #[error("`{0}` depends on a value computed in the outer loop")]
    OuterDependence(String),
    #[error("`{0}` is used outside the inner loop")]
    LiveOut(String),
    #[error("call `{0}` may have side effects")]
    Call(String),
    #[error("inner loop reads memory it writes")]
    ReadsOwnWrites,
    #[error("`{0}` and `{1}` access the same memory")]
    MemoryConflict(String, String),
    #[error("exit block `{0}` has phis")]
    ExitPhi(String),
}

struct FusionPlan {
    outer: CanonicalLoop,
    inner_canon: CanonicalLoop,
    inner_blocks: Vec<Handle<Block>>,
}

fn check_dedicated(
    func: &Function,
    cfg: &ControlFlowGraph,
    lp: &Loop,
) -> Result<(), FusionRejection> {
    if has_dedicated_exits(func, cfg, lp) {
        return Ok(());
    }
    let exit = lp.exits(func).first().map(|&e| func.blocks[e].name.clone());
    Err(FusionRejection::SharedExit(exit.unwrap_or_default()))
}

fn plan(
    types: &UniqueArena<Type>,
    func: &Function,
    cfg: &ControlFlowGraph,
    dom: &DominatorTree,
    info: &LoopInfo,
    outer_handle: Handle<Loop>,
    inner: Handle<Loop>,
) -> Result<FusionPlan, FusionRejection> {
    let outer_loop = &info[outer_handle];
    let inner_loop = &info[inner];

    let outer = CanonicalLoop::recognize(func, cfg, dom, outer_loop)
        .map_err(FusionRejection::OuterShape)?;
    let inner_canon = CanonicalLoop::recognize(func, cfg, dom, inner_loop)
        .map_err(FusionRejection::InnerShape)?;
    check_dedicated(func, cfg, outer_loop)?;
    check_dedicated(func, cfg, inner_loop)?;

    match outer.trip_count(func, types, dom, outer_loop) {
        Some(TripCount::Constant(n)) if n >= 1 => {}
        _ => return Err(FusionRejection::OuterTripCount),
    }
    for exit in [outer.exit, inner_canon.exit] {
        if !func.phis(exit).is_empty() {
            return Err(FusionRejection::ExitPhi(func.blocks[exit].name.clone()));
        }
    }

    for &b in &inner_loop.blocks {
        for &i in &func.blocks[b].insts {
            let kind = &func.insts[i].kind;
            if let InstKind::Call { callee, .. } = kind {
                return Err(FusionRejection::Call(callee.clone()));
            }
            let defined_inside = |v: Value| {
                func.defining_block(v)
                    .is_some_and(|db| inner_loop.contains(db))
            };
            if kind
                .operands()
                .into_iter()
                .any(|v| !defined_inside(v) && !is_loop_invariant(func, dom, outer_loop, v))
            {
                return Err(FusionRejection::OuterDependence(inst_label(func, i)));
            }
            let escapes = func.users(Value::Inst(i)).into_iter().any(|u| {
                func.insts[u]
                    .block
                    .is_some_and(|ub| !inner_loop.contains(ub))
            });
            if escapes {
                return Err(FusionRejection::LiveOut(inst_label(func, i)));
            }
        }
    }

    let rest: Vec<_> = outer_loop
        .blocks
        .iter()
        .copied()
        .filter(|&b| !inner_loop.contains(b))
        .collect();
    let inner_accesses = collect_accesses(func, inner_loop.blocks.iter().copied());
    let rest_accesses = collect_accesses(func, rest);
    if let Some(call) = rest_accesses
        .iter()
        .find(|a| matches!(func.insts[a.inst].kind, InstKind::Call { .. }))
    {
        return Err(FusionRejection::Call(inst_label(func, call.inst)));
    }

    let writes = |a: &&MemoryAccess| a.kind.writes();
    let reads_own_write = inner_accesses.iter().filter(writes).any(|w| {
        inner_accesses
            .iter()
            .any(|r| r.kind.reads() && r.root.may_alias(w.root))
    });
    if reads_own_write {
        return Err(FusionRejection::ReadsOwnWrites);
    }
    for a in &inner_accesses {
        for b in &rest_accesses {
            if (a.kind.writes() || b.kind.writes()) && a.root.may_alias(b.root) {
                return Err(FusionRejection::MemoryConflict(
                    inst_label(func, a.inst),
                    inst_label(func, b.inst),
                ));
            }
        }
    }

    let inner_blocks = func
        .layout
        .iter()
        .copied()
        .filter(|&b| inner_loop.contains(b))
        .collect();
    Ok(FusionPlan {
        outer,
        inner_canon,
        inner_blocks,
    })
}

fn apply(func: &mut Function, plan: &FusionPlan) {
    let FusionPlan {
        outer,
        inner_canon: inner,
        inner_blocks,
        ..
    } = plan;
    func.retarget(inner.preheader, inner.header, inner.exit);
    func.retarget(outer.header, outer.exit, inner.header);
    func.retarget(inner.header, inner.exit, outer.exit);
    func.replace_phi_predecessor(inner.header, inner.preheader, outer.header);
    for &b in inner_blocks {
        func.move_block_before(b, outer.exit);
    }
}

impl Pass for LoopFusion {
    fn name(&self) -> &str {
        "loop-fusion"
    }

    fn run(&self, module: &mut Module, function: Handle<Function>) -> Result<bool, PassError> {
        defined_function(module, function, self.name())?;
        let Module { types, functions } = &mut *module;
        let func = &mut functions[function];

        // Headers of loops already tried; block handles survive rewrites.
        let mut tried = HashSet::new();
        let mut changed = false;
        loop {
            let cfg = ControlFlowGraph::compute(func);
            let dom = DominatorTree::compute(&cfg);
            let info = LoopInfo::compute(func, &cfg, &dom);
            let candidate = info.iter().find_map(|(h, l)| match l.children.as_slice() {
                &[child] if !tried.contains(&l.header) => Some((h, child)),
                _ => None,
            });
            let Some((outer, inner)) = candidate else {
                break;
            };
            tried.insert(info[outer].header);

            let header_name = func.blocks[info[outer].header].name.clone();
            match plan(types, func, &cfg, &dom, &info, outer, inner) {
                Ok(plan) => {
                    log::info!(
                        "loop-fusion: moving loop `{}` out of `{header_name}` in `{}`",
                        func.blocks[plan.inner_canon.header].name,
                        func.name
                    );
                    apply(func, &plan);
                    changed = true;
                }
                Err(reason) => {
                    log::debug!(
                        "loop-fusion: skipping `{header_name}` in `{}`: {reason}",
                        func.name
                    );
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomir_ir::{
        BinaryOp, FunctionBuilder, Interpreter, Memory, Param, RtValue, Scalar, verify_function,
    };
    use loomir_kernels::{Conv2dParams, build_conv2d, build_loop};

    /// `for i in 0..outer { for j in 0..8 { out[j] = src[j] * 2 } }`, where
    /// `src` is `in` or, with `in_place`, `out` itself.
    fn nest(module: &mut Module, outer: i32, in_place: bool) -> Handle<Function> {
        let void = module.types.void();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let params = ["in", "out"]
            .map(|name| Param {
                name: name.into(),
                ty: ptr,
                noalias: true,
            })
            .to_vec();
        let mut func = Function::new("nest", params, void);
        let mut b = FunctionBuilder::new(&mut module.types, &mut func);
        let entry = b.append_block("entry");
        let zero = b.const_i32(0);
        let trips = b.const_i32(outer);
        let zero64 = b.const_i64(0);
        let eight = b.const_i64(8);
        let two = b.const_f32(2.0);
        let src = Value::Param(u32::from(in_place));
        let out = Value::Param(1);
        let lp = build_loop(&mut b, entry, zero, trips, "i", |b, body, _| {
            let inner = build_loop(b, body, zero64, eight, "j", |b, body, j| {
                let pa = b.gep(body, src, j, "a.addr")?;
                let a = b.load(body, pa, "a")?;
                let y = b.binary(body, BinaryOp::FMul, a, two, "y")?;
                let py = b.gep(body, out, j, "y.addr")?;
                b.store(body, y, py)?;
                Ok(body)
            })?;
            Ok(inner.exit)
        })
        .unwrap();
        b.ret(lp.exit, None).unwrap();
        module.add_function(func)
    }

    fn run_nest(module: &Module, h: Handle<Function>) -> Vec<f32> {
        let mut mem = Memory::new();
        let input: Vec<f32> = (0..8).map(|v| v as f32 - 3.0).collect();
        let x = mem.alloc_f32(&input);
        let y = mem.alloc_f32(&[1.0; 8]);
        Interpreter::new(module)
            .call(h, &[RtValue::Ptr(x), RtValue::Ptr(y)], &mut mem)
            .unwrap();
        mem.read_f32(y, 8).unwrap()
    }

    #[test]
    fn independent_inner_loop_is_unnested() {
        let mut module = Module::new();
        let h = nest(&mut module, 4, false);
        let before = run_nest(&module, h);
        let count = module.functions[h].inst_count();

        assert!(LoopFusion.run(&mut module, h).unwrap());
        verify_function(&module, h).unwrap();

        let func = &module.functions[h];
        assert_eq!(func.inst_count(), count);
        let info = LoopInfo::for_function(func);
        assert_eq!(info.len(), 2);
        assert_eq!(info.top_level().len(), 2);

        // The inner loop now sits between the outer loop and its exit.
        let names: Vec<_> = func.layout.iter().map(|&b| func.blocks[b].name.as_str()).collect();
        let pos = |n: &str| names.iter().position(|&x| x == n).unwrap();
        assert!(pos("i.latch") < pos("j.header"));
        assert_eq!(pos("j.latch") + 1, pos("i.exit"));

        assert_eq!(run_nest(&module, h), before);
        assert!(!LoopFusion.run(&mut module, h).unwrap());
    }

    #[test]
    fn in_place_update_is_not_fused() {
        let mut module = Module::new();
        let h = nest(&mut module, 4, true);
        assert!(!LoopFusion.run(&mut module, h).unwrap());
        assert_eq!(LoopInfo::for_function(&module.functions[h]).top_level().len(), 1);
    }

    /// Emits `for o in 0..3 { for n in 0..8 { out[n] = in[n] * 2 } }` after
    /// `at`, returning the block after the nest.
    fn emit_nest(b: &mut FunctionBuilder<'_>, at: Handle<Block>, [o, n]: [&str; 2]) -> Handle<Block> {
        let zero = b.const_i32(0);
        let three = b.const_i32(3);
        let zero64 = b.const_i64(0);
        let eight = b.const_i64(8);
        let two = b.const_f32(2.0);
        let (src, out) = (Value::Param(0), Value::Param(1));
        build_loop(b, at, zero, three, o, |b, body, _| {
            let inner = build_loop(b, body, zero64, eight, n, |b, body, j| {
                let pa = b.gep(body, src, j, "a.addr")?;
                let a = b.load(body, pa, "a")?;
                let y = b.binary(body, BinaryOp::FMul, a, two, "y")?;
                let py = b.gep(body, out, j, "y.addr")?;
                b.store(body, y, py)?;
                Ok(body)
            })?;
            Ok(inner.exit)
        })
        .unwrap()
        .exit
    }

    #[test]
    fn consecutive_nests_are_unnested_in_one_run() {
        let mut module = Module::new();
        let void = module.types.void();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let params = ["in", "out"]
            .map(|name| Param {
                name: name.into(),
                ty: ptr,
                noalias: true,
            })
            .to_vec();
        let mut func = Function::new("twice", params, void);
        let mut b = FunctionBuilder::new(&mut module.types, &mut func);
        let entry = b.append_block("entry");
        let mid = emit_nest(&mut b, entry, ["i", "j"]);
        let end = emit_nest(&mut b, mid, ["p", "q"]);
        b.ret(end, None).unwrap();
        let h = module.add_function(func);

        let before = run_nest(&module, h);
        let count = module.functions[h].inst_count();
        assert!(LoopFusion.run(&mut module, h).unwrap());
        verify_function(&module, h).unwrap();

        let func = &module.functions[h];
        assert_eq!(func.inst_count(), count);
        let info = LoopInfo::for_function(func);
        assert_eq!(info.len(), 4);
        assert_eq!(info.top_level().len(), 4);
        assert_eq!(run_nest(&module, h), before);
        assert!(!LoopFusion.run(&mut module, h).unwrap());
    }

    #[test]
    fn possibly_overlapping_buffers_are_not_fused() {
        let mut module = Module::new();
        let h = nest(&mut module, 4, false);
        for param in &mut module.functions[h].params {
            param.noalias = false;
        }
        let count = module.functions[h].inst_count();
        assert!(!LoopFusion.run(&mut module, h).unwrap());
        assert_eq!(module.functions[h].inst_count(), count);
        assert_eq!(LoopInfo::for_function(&module.functions[h]).top_level().len(), 1);
    }

    #[test]
    fn zero_trip_outer_loop_is_not_fused() {
        let mut module = Module::new();
        let h = nest(&mut module, 0, false);
        assert!(!LoopFusion.run(&mut module, h).unwrap());
    }

    #[test]
    fn conv_nest_depends_on_outer_indices() {
        let mut module = Module::new();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let h = build_conv2d(&mut module, ptr, ptr, ptr, &Conv2dParams::default()).unwrap();
        let count = module.functions[h].inst_count();
        assert!(!LoopFusion.run(&mut module, h).unwrap());
        assert_eq!(module.functions[h].inst_count(), count);
        assert_eq!(LoopInfo::for_function(&module.functions[h]).top_level().len(), 1);
    }
}
