//! Loop invariance and affine strides of integer index expressions.

use loomir_ir::{BinaryOp, DominatorTree, Function, InstKind, Value};

use crate::loops::Loop;

/// Returns `true` if `value` has the same value in every iteration of `lp`:
/// parameters, constants, and instructions defined outside the loop in a
/// block that dominates the loop's header (and therefore its preheader).
pub fn is_loop_invariant(func: &Function, dom: &DominatorTree, lp: &Loop, value: Value) -> bool {
    match value {
        Value::Param(_) | Value::Const(_) => true,
        Value::Inst(h) => match func.insts[h].block {
            Some(b) => !lp.contains(b) && dom.dominates(b, lp.header),
            None => false,
        },
    }
}

/// The coefficient `c` such that `value = c * iv + (loop-invariant term)`,
/// following `add`, `sub` and multiplication by a constant. `None` when the
/// expression is not affine in `iv`.
pub fn stride_of(
    func: &Function,
    dom: &DominatorTree,
    lp: &Loop,
    value: Value,
    iv: Value,
) -> Option<i64> {
    if value == iv {
        return Some(1);
    }
    if is_loop_invariant(func, dom, lp, value) {
        return Some(0);
    }
    let h = value.as_inst()?;
    let InstKind::Binary { op, lhs, rhs } = func.insts[h].kind else {
        return None;
    };
    if !matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) {
        return None;
    }
    let ls = stride_of(func, dom, lp, lhs, iv)?;
    let rs = stride_of(func, dom, lp, rhs, iv)?;
    match op {
        BinaryOp::Add => ls.checked_add(rs),
        BinaryOp::Sub => ls.checked_sub(rs),
        _ => match (ls, rs) {
            (0, 0) => Some(0),
            (s, 0) => func.const_int(rhs)?.checked_mul(s),
            (0, s) => func.const_int(lhs)?.checked_mul(s),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LoopInfo;
    use loomir_ir::{ControlFlowGraph, FunctionBuilder, Module, Param, Scalar};
    use loomir_kernels::build_loop;

    #[test]
    fn strides_of_index_expressions() {
        let mut module = Module::new();
        let void = module.types.void();
        let i64_ty = module.types.scalar(Scalar::I64);
        let mut func = Function::new(
            "f",
            vec![Param {
                name: "k".into(),
                ty: i64_ty,
                noalias: false,
            }],
            void,
        );
        let mut b = FunctionBuilder::new(&mut module.types, &mut func);
        let entry = b.append_block("entry");
        let k = b.param(0).unwrap();
        let zero = b.const_i64(0);
        let n = b.const_i64(16);
        let three = b.const_i64(3);
        let hoisted = b.mul(entry, k, three, "hoisted").unwrap();
        let mut exprs = None;
        let lp = build_loop(&mut b, entry, zero, n, "i", |b, body, i| {
            let scaled = b.mul(body, i, three, "scaled").unwrap();
            let shifted = b.add(body, scaled, k, "shifted").unwrap();
            let back = b.binary(body, BinaryOp::Sub, shifted, i, "back").unwrap();
            let square = b.mul(body, i, i, "square").unwrap();
            let by_param = b.mul(body, i, k, "by_param").unwrap();
            exprs = Some([scaled, shifted, back, square, by_param]);
            Ok(body)
        })
        .unwrap();
        b.ret(lp.exit, None).unwrap();

        let cfg = ControlFlowGraph::compute(&func);
        let dom = DominatorTree::compute(&cfg);
        let info = LoopInfo::compute(&func, &cfg, &dom);
        let l = &info[info.top_level()[0]];
        let iv = lp.induction;
        let [scaled, shifted, back, square, by_param] = exprs.unwrap();

        assert!(is_loop_invariant(&func, &dom, l, k));
        assert!(is_loop_invariant(&func, &dom, l, hoisted));
        assert!(!is_loop_invariant(&func, &dom, l, iv));
        assert!(!is_loop_invariant(&func, &dom, l, scaled));

        assert_eq!(stride_of(&func, &dom, l, iv, iv), Some(1));
        assert_eq!(stride_of(&func, &dom, l, hoisted, iv), Some(0));
        assert_eq!(stride_of(&func, &dom, l, scaled, iv), Some(3));
        assert_eq!(stride_of(&func, &dom, l, shifted, iv), Some(3));
        assert_eq!(stride_of(&func, &dom, l, back, iv), Some(2));
        assert_eq!(stride_of(&func, &dom, l, square, iv), None);
        assert_eq!(stride_of(&func, &dom, l, by_param, iv), None);
    }
}
