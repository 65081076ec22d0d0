//! Structural properties of the pass pipeline on generated kernels.

mod common;

use loomir_analysis::{CanonicalLoop, LoopInfo};
use loomir_ir::{ControlFlowGraph, DominatorTree, Function, Handle, Module};
use loomir_kernels::{Conv2dParams, ReluParams, build_conv2d, build_relu};
use loomir_opt::{AutoVectorization, OptLevel, Pass, PassManager};
use ndarray::Array1;

use common::{data, module, optimize, relu_ref, run};

/// Induction steps of every loop, sorted.
fn steps(module: &Module, h: Handle<Function>) -> Vec<i64> {
    let func = &module.functions[h];
    let cfg = ControlFlowGraph::compute(func);
    let dom = DominatorTree::compute(&cfg);
    let info = LoopInfo::compute(func, &cfg, &dom);
    let mut steps: Vec<_> = info
        .iter()
        .map(|(_, lp)| {
            CanonicalLoop::recognize(func, &cfg, &dom, lp)
                .expect("optimized loops stay canonical")
                .step
        })
        .collect();
    steps.sort();
    steps
}

#[test]
fn relu_epilogue_only_for_remainders() {
    for (len, expected) in [(3, vec![1]), (4, vec![4]), (6, vec![1, 4]), (32, vec![4])] {
        let (mut m, ptr) = module();
        let h = build_relu(&mut m, ptr, ptr, &ReluParams { len: Some(len) }).unwrap();
        optimize(&mut m, OptLevel::O2);
        assert_eq!(steps(&m, h), expected, "len {len}");
    }
}

#[test]
fn wider_registers_take_more_lanes() {
    let (mut m, ptr) = module();
    let h = build_relu(&mut m, ptr, ptr, &ReluParams { len: Some(37) }).unwrap();
    let x = data(37, 37);
    let expected = relu_ref(&Array1::from_vec(x.clone())).to_vec();

    let mut pm = PassManager::new();
    pm.add_pass(Box::new(AutoVectorization::new(8, 256)));
    assert!(pm.run(&mut m, h).unwrap());
    loomir_ir::verify_module(&m).unwrap();
    assert_eq!(steps(&m, h), vec![1, 8]);
    assert_eq!(run(&m, h, &[&x], 37), expected);
}

#[test]
fn vectorized_relu_touches_memory_less() {
    let len = 64;
    let x = data(3, len);
    let accesses = |level| {
        let (mut m, ptr) = module();
        let h = build_relu(&mut m, ptr, ptr, &ReluParams { len: Some(len as u32) }).unwrap();
        optimize(&mut m, level);
        let mut mem = loomir_ir::Memory::new();
        let px = mem.alloc_f32(&x);
        let py = mem.alloc_f32(&vec![0.0; len]);
        loomir_ir::Interpreter::new(&m)
            .call(
                h,
                &[loomir_ir::RtValue::Ptr(px), loomir_ir::RtValue::Ptr(py)],
                &mut mem,
            )
            .unwrap();
        mem.accesses()
    };
    assert_eq!(accesses(OptLevel::O0), 2 * len as u64);
    assert_eq!(accesses(OptLevel::O2), 2 * len as u64 / 4);
}

#[test]
fn conv_structure_survives_o2() {
    let (mut m, ptr) = module();
    let params = Conv2dParams {
        input: [6, 6],
        kernel: [3, 3],
        stride: [1, 1],
        padding: [1, 1],
    };
    let h = build_conv2d(&mut m, ptr, ptr, ptr, &params).unwrap();
    let before = loomir_ir::dump_function(&m, h);
    assert!(!optimize(&mut m, OptLevel::O2));
    assert_eq!(loomir_ir::dump_function(&m, h), before);
    assert_eq!(steps(&m, h), vec![1, 1, 1, 1]);
}

#[test]
fn passes_report_no_change_once_converged() {
    let (mut m, ptr) = module();
    let h = build_relu(&mut m, ptr, ptr, &ReluParams { len: Some(10) }).unwrap();
    assert!(optimize(&mut m, OptLevel::O2));
    for pass in [
        loomir_opt::create_auto_vectorization_pass(),
        loomir_opt::create_data_layout_transform_pass(),
        loomir_opt::create_loop_fusion_pass(),
        loomir_opt::create_ir_validation_pass(),
    ] {
        assert!(!pass.run(&mut m, h).unwrap(), "{}", pass.name());
    }
}
