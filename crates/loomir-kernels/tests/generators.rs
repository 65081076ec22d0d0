//! Integration tests: every generator produces verifiable IR whose loops
//! have the canonical header/latch shape.

use loomir_ir::*;
use loomir_kernels::*;

fn f32_ptr(module: &mut Module) -> Handle<Type> {
    module.types.scalar_pointer(Scalar::F32)
}

#[test]
fn all_generators_verify_in_one_module() {
    let mut module = Module::new();
    let ptr = f32_ptr(&mut module);
    build_relu(&mut module, ptr, ptr, &ReluParams { len: Some(16) }).unwrap();
    build_conv2d(
        &mut module,
        ptr,
        ptr,
        ptr,
        &Conv2dParams {
            input: [5, 5],
            kernel: [3, 3],
            stride: [1, 1],
            padding: [1, 1],
        },
    )
    .unwrap();
    build_maxpool2d(
        &mut module,
        ptr,
        ptr,
        &Pool2dParams {
            input: [4, 4],
            kernel: [2, 2],
            stride: [2, 2],
        },
    )
    .unwrap();
    verify_module(&module).unwrap();

    let names: Vec<_> = module.functions.iter().map(|(_, f)| f.name.as_str()).collect();
    assert_eq!(names, vec!["relu", "conv2d", "maxpool2d"]);
}

#[test]
fn empty_relu_touches_no_memory() {
    let mut module = Module::new();
    let ptr = f32_ptr(&mut module);
    let h = build_relu(&mut module, ptr, ptr, &ReluParams { len: Some(0) }).unwrap();
    verify_function(&module, h).unwrap();

    let mut mem = Memory::new();
    let x = mem.alloc_f32(&[]);
    let y = mem.alloc_f32(&[]);
    Interpreter::new(&module)
        .call(h, &[RtValue::Ptr(x), RtValue::Ptr(y)], &mut mem)
        .unwrap();
    assert_eq!(mem.accesses(), 0);
}

#[test]
fn every_loop_header_dominates_its_latch() {
    let mut module = Module::new();
    let ptr = f32_ptr(&mut module);
    let h = build_maxpool2d(
        &mut module,
        ptr,
        ptr,
        &Pool2dParams {
            input: [6, 6],
            kernel: [3, 3],
            stride: [3, 3],
        },
    )
    .unwrap();
    let func = &module.functions[h];
    let dom = DominatorTree::for_function(func);

    for name in ["oy", "ox", "ky", "kx"] {
        let header = func.block_by_name(&format!("{name}.header")).unwrap();
        let latch = func.block_by_name(&format!("{name}.latch")).unwrap();
        let exit = func.block_by_name(&format!("{name}.exit")).unwrap();
        assert!(dom.dominates(header, latch), "{name}");
        assert!(dom.dominates(header, exit), "{name}");
        assert_eq!(func.successors(latch), vec![header]);
        assert!(func.predecessors(header).contains(&latch));
    }
}

#[test]
fn dump_names_loop_values() {
    let mut module = Module::new();
    let ptr = f32_ptr(&mut module);
    build_relu(&mut module, ptr, ptr, &ReluParams { len: Some(4) }).unwrap();
    let text = dump_module(&module);
    assert!(text.contains("i.header:"), "{text}");
    assert!(text.contains("%i.iv = phi i64"), "{text}");
    assert!(text.contains("fcmp ogt"), "{text}");
}
