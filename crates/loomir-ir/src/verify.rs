//! Structural and type verification.

use std::collections::HashSet;

use crate::Module;
use crate::arena::Handle;
use crate::cfg::ControlFlowGraph;
use crate::dominance::DominatorTree;
use crate::display::{format_type, format_type_inner};
use crate::error::{IrError, VerifyError, VerifyErrorKind};
use crate::func::Function;
use crate::inst::{InstKind, Value};
use crate::typeck::result_type;

/// Verifies every function in the module.
pub fn verify_module(module: &Module) -> Result<(), VerifyError> {
    for (handle, _) in module.functions.iter() {
        verify_function(module, handle)?;
    }
    Ok(())
}

/// Checks block structure, branch targets, phi/predecessor agreement,
/// operand liveness, def-dominates-use and instruction typing.
/// Declarations trivially verify.
pub fn verify_function(module: &Module, handle: Handle<Function>) -> Result<(), VerifyError> {
    let func = &module.functions[handle];
    if func.is_declaration() {
        return Ok(());
    }
    let fail = |kind| Err(VerifyError::new(&func.name, kind));
    let live: HashSet<_> = func.layout.iter().copied().collect();

    for &block in &func.layout {
        let data = &func.blocks[block];
        let name = || data.name.clone();
        let Some(&last) = data.insts.last() else {
            return fail(VerifyErrorKind::MissingTerminator { block: name() });
        };
        if !func.insts[last].kind.is_terminator() {
            return fail(VerifyErrorKind::MissingTerminator { block: name() });
        }
        let mut seen_non_phi = false;
        for &inst in &data.insts {
            let kind = &func.insts[inst].kind;
            if func.insts[inst].block != Some(block) {
                return fail(VerifyErrorKind::BlockMismatch { block: name() });
            }
            if kind.is_terminator() && inst != last {
                return fail(VerifyErrorKind::MisplacedTerminator { block: name() });
            }
            if kind.is_phi() {
                if seen_non_phi {
                    return fail(VerifyErrorKind::MisplacedPhi { block: name() });
                }
            } else {
                seen_non_phi = true;
            }
        }
        if func.successors(block).iter().any(|s| !live.contains(s)) {
            return fail(VerifyErrorKind::UnknownTarget { block: name() });
        }
    }

    let cfg = ControlFlowGraph::compute(func);
    let dom = DominatorTree::compute(&cfg);

    if let Some(entry) = func.entry() {
        if !cfg.predecessors(entry).is_empty() {
            return fail(VerifyErrorKind::EntryHasPredecessors {
                block: func.blocks[entry].name.clone(),
            });
        }
    }

    for &block in &func.layout {
        let name = || func.blocks[block].name.clone();
        let preds: HashSet<_> = cfg.predecessors(block).iter().copied().collect();
        for &inst in &func.blocks[block].insts {
            let data = &func.insts[inst];

            // Operands must be live values of this function.
            for operand in data.kind.operands() {
                let ok = match operand {
                    Value::Inst(h) => func.insts.try_get(h).is_some() && func.is_live_inst(h),
                    Value::Param(i) => (i as usize) < func.params.len(),
                    Value::Const(h) => func.constants.try_get(h).is_some(),
                };
                if !ok {
                    return fail(VerifyErrorKind::InvalidOperand { block: name() });
                }
            }

            if let InstKind::Phi { incoming } = &data.kind {
                let blocks: Vec<_> = incoming.iter().map(|&(_, b)| b).collect();
                let unique: HashSet<_> = blocks.iter().copied().collect();
                if unique.len() != blocks.len() || unique != preds {
                    return fail(VerifyErrorKind::PhiPredecessorMismatch { block: name() });
                }
                for &(value, pred) in incoming {
                    if let Some(def) = func.defining_block(value) {
                        if !dom.dominates(def, pred) {
                            return fail(VerifyErrorKind::UseNotDominated { block: name() });
                        }
                    }
                }
            } else if dom.is_reachable(block) {
                for operand in data.kind.operands() {
                    if let Value::Inst(def) = operand {
                        if !dom.inst_dominates(func, def, inst) {
                            return fail(VerifyErrorKind::UseNotDominated { block: name() });
                        }
                    }
                }
            }

            let expected = result_type(&module.types, func, &data.kind, Some(data.ty))
                .map_err(|source| {
                    VerifyError::new(
                        &func.name,
                        VerifyErrorKind::Type {
                            block: name(),
                            source,
                        },
                    )
                })?;
            if module.types.lookup(&expected) != Some(data.ty) {
                return fail(VerifyErrorKind::Type {
                    block: name(),
                    source: IrError::TypeMismatch {
                        expected: format_type_inner(&module.types, &expected.inner),
                        found: format_type(&module.types, data.ty),
                    },
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FunctionBuilder;
    use crate::func::Param;
    use crate::inst::IntPredicate;
    use crate::types::Scalar;

    /// `for i in 0..n { }` with the induction phi in the header.
    fn counted_loop(module: &mut Module) -> Handle<Function> {
        let void = module.types.void();
        let i64_ty = module.types.scalar(Scalar::I64);
        let mut func = Function::new(
            "count",
            vec![Param {
                name: "n".into(),
                ty: i64_ty,
                noalias: false,
            }],
            void,
        );
        let mut b = FunctionBuilder::new(&mut module.types, &mut func);
        let entry = b.append_block("entry");
        let header = b.append_block("header");
        let latch = b.append_block("latch");
        let exit = b.append_block("exit");
        let n = b.param(0).unwrap();
        let zero = b.const_i64(0);
        let one = b.const_i64(1);
        b.br(entry, header).unwrap();
        let iv = b.phi(header, i64_ty, vec![(zero, entry)], "i").unwrap();
        let c = b.icmp(header, IntPredicate::Ult, iv, n, "c").unwrap();
        b.cond_br(header, c, latch, exit).unwrap();
        let next = b.add(latch, iv, one, "next").unwrap();
        b.add_incoming(iv, next, latch).unwrap();
        b.br(latch, header).unwrap();
        b.ret(exit, None).unwrap();
        module.add_function(func)
    }

    #[test]
    fn well_formed_loop_verifies() {
        let mut module = Module::default();
        let h = counted_loop(&mut module);
        verify_function(&module, h).unwrap();
        verify_module(&module).unwrap();
    }

    #[test]
    fn missing_terminator() {
        let mut module = Module::default();
        let h = counted_loop(&mut module);
        let func = &mut module.functions[h];
        let exit = func.block_by_name("exit").unwrap();
        let ret = func.terminator(exit).unwrap();
        func.erase_inst(ret);
        let err = verify_function(&module, h).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::MissingTerminator { .. }));
        assert!(err.to_string().contains("count"));
    }

    #[test]
    fn phi_must_match_predecessors() {
        let mut module = Module::default();
        let h = counted_loop(&mut module);
        let func = &mut module.functions[h];
        let header = func.block_by_name("header").unwrap();
        let latch = func.block_by_name("latch").unwrap();
        let exit = func.block_by_name("exit").unwrap();
        // Latch no longer loops back: the phi now names a non-predecessor.
        func.retarget(latch, header, exit);
        let err = verify_function(&module, h).unwrap_err();
        assert!(matches!(
            err.kind,
            VerifyErrorKind::PhiPredecessorMismatch { .. }
        ));
    }

    #[test]
    fn use_of_erased_value() {
        let mut module = Module::default();
        let h = counted_loop(&mut module);
        let func = &mut module.functions[h];
        let latch = func.block_by_name("latch").unwrap();
        let next = func.blocks[latch].insts[0];
        func.erase_inst(next);
        let err = verify_function(&module, h).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::InvalidOperand { .. }));
    }

    #[test]
    fn use_must_be_dominated() {
        let mut module = Module::default();
        let h = counted_loop(&mut module);
        let func = &mut module.functions[h];
        let exit = func.block_by_name("exit").unwrap();
        let latch = func.block_by_name("latch").unwrap();
        let next = Value::Inst(func.blocks[latch].insts[0]);
        let ret = func.terminator(exit).unwrap();
        func.insts[ret].kind = InstKind::Ret { value: Some(next) };
        let err = verify_function(&module, h).unwrap_err();
        assert!(matches!(err.kind, VerifyErrorKind::UseNotDominated { .. }));
    }
}
