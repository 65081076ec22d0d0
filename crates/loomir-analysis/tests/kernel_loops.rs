//! Integration test: analyses over the loop nests the kernel generators emit.

use loomir_analysis::*;
use loomir_ir::*;
use loomir_kernels::*;

fn conv_module() -> (Module, Handle<Function>) {
    let mut module = Module::new();
    let ptr = module.types.scalar_pointer(Scalar::F32);
    let params = Conv2dParams {
        input: [6, 5],
        kernel: [3, 2],
        stride: [1, 1],
        padding: [0, 0],
    };
    let h = build_conv2d(&mut module, ptr, ptr, ptr, &params).unwrap();
    (module, h)
}

#[test]
fn conv_nest_is_four_canonical_loops() {
    let (module, h) = conv_module();
    let func = &module.functions[h];
    let cfg = ControlFlowGraph::compute(func);
    let dom = DominatorTree::compute(&cfg);
    let info = LoopInfo::compute(func, &cfg, &dom);
    assert_eq!(info.len(), 4);
    assert_eq!(info.top_level().len(), 1);

    let mut trips = Vec::new();
    let mut lp = Some(info.top_level()[0]);
    while let Some(l) = lp {
        let c = CanonicalLoop::recognize(func, &cfg, &dom, &info[l]).unwrap();
        trips.push(c.trip_count(func, &module.types, &dom, &info[l]));
        lp = info[l].children.first().copied();
    }
    // oy, ox, ky, kx
    assert_eq!(
        trips,
        [4, 4, 3, 2].map(|n| Some(TripCount::Constant(n))).to_vec()
    );
}

#[test]
fn accumulator_address_is_invariant_in_the_kernel_loop() {
    let (module, h) = conv_module();
    let func = &module.functions[h];
    let cfg = ControlFlowGraph::compute(func);
    let dom = DominatorTree::compute(&cfg);
    let info = LoopInfo::compute(func, &cfg, &dom);
    let kx = info.innermost()[0];
    let c = CanonicalLoop::recognize(func, &cfg, &dom, &info[kx]).unwrap();
    let iv = c.induction_value();

    let accesses = collect_accesses(func, c.body.iter().copied());
    let stores: Vec<_> = accesses.iter().filter(|a| a.kind.writes()).collect();
    assert_eq!(stores.len(), 1);
    let Offset::Index(index) = stores[0].offset else {
        panic!("accumulator store should be a single gep");
    };
    assert_eq!(stride_of(func, &dom, &info[kx], index, iv), Some(0));
    let output = MemoryRoot::Param {
        index: 2,
        noalias: true,
    };
    assert_eq!(stores[0].root, output);

    // The accumulator load and store touch the same cell every iteration.
    let load = accesses
        .iter()
        .find(|a| a.root == output && !a.kind.writes())
        .unwrap();
    assert_eq!(load.offset, stores[0].offset);
}
