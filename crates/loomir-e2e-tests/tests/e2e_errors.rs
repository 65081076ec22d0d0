//! Error paths across the stack.

mod common;

use loomir_ir::{InterpError, Scalar};
use loomir_kernels::{
    Conv2dParams, KernelError, Pool2dParams, ReluParams, build_conv2d, build_maxpool2d, build_relu,
};
use loomir_opt::{PassError, PassManager, PassRegistry, RegistryError};

use common::{module, try_run};

#[test]
fn short_array_operand_rejected_before_building() {
    let (mut m, ptr) = module();
    let f32_ty = m.types.scalar(Scalar::F32);
    let arr = m.types.array(f32_ty, 4);
    let arr_ptr = m.types.pointer(arr);
    let err = build_relu(&mut m, ptr, arr_ptr, &ReluParams { len: Some(5) }).unwrap_err();
    assert!(matches!(err, KernelError::InvalidParameter(_)), "{err}");
    assert!(m.functions.is_empty());
}

#[test]
fn conv_kernel_larger_than_input() {
    let (mut m, ptr) = module();
    let params = Conv2dParams {
        input: [2, 2],
        kernel: [3, 3],
        stride: [1, 1],
        padding: [0, 0],
    };
    assert!(build_conv2d(&mut m, ptr, ptr, ptr, &params).is_err());
    // Padding makes the same window fit.
    let padded = Conv2dParams {
        padding: [1, 1],
        ..params
    };
    assert_eq!(padded.output_shape().unwrap(), [2, 2]);
    assert!(build_conv2d(&mut m, ptr, ptr, ptr, &padded).is_ok());
}

#[test]
fn zero_pool_stride_rejected() {
    let (mut m, ptr) = module();
    let params = Pool2dParams {
        input: [4, 4],
        kernel: [2, 2],
        stride: [0, 1],
    };
    let err = build_maxpool2d(&mut m, ptr, ptr, &params).unwrap_err();
    assert!(matches!(err, KernelError::InvalidParameter(_)));
}

#[test]
fn undersized_buffer_is_out_of_bounds() {
    let (mut m, ptr) = module();
    let h = build_relu(&mut m, ptr, ptr, &ReluParams { len: Some(8) }).unwrap();
    let err = try_run(&m, h, &[&[1.0; 4]], 8).unwrap_err();
    assert!(matches!(err, InterpError::OutOfBounds { .. }), "{err}");
}

#[test]
fn step_limit_stops_long_runs() {
    let (mut m, ptr) = module();
    let h = build_relu(&mut m, ptr, ptr, &ReluParams { len: Some(64) }).unwrap();
    let mut mem = loomir_ir::Memory::new();
    let x = mem.alloc_f32(&[1.0; 64]);
    let y = mem.alloc_f32(&[0.0; 64]);
    let err = loomir_ir::Interpreter::new(&m)
        .with_step_limit(100)
        .call(
            h,
            &[loomir_ir::RtValue::Ptr(x), loomir_ir::RtValue::Ptr(y)],
            &mut mem,
        )
        .unwrap_err();
    assert!(matches!(err, InterpError::StepLimit(100)));
}

#[test]
fn unknown_pass_in_pipeline() {
    let err = PassRegistry::with_builtins()
        .parse_pipeline("loop-fusion,licm")
        .unwrap_err();
    assert_eq!(err, RegistryError::UnknownPass("licm".into()));
}

#[test]
fn declaration_is_not_applicable() {
    let (mut m, ptr) = module();
    let void = m.types.void();
    let decl = m.add_function(loomir_ir::Function::new(
        "extern_kernel",
        vec![loomir_ir::Param {
            name: "x".into(),
            ty: ptr,
            noalias: false,
        }],
        void,
    ));
    let pm = PassRegistry::with_builtins()
        .parse_pipeline("auto-vectorization")
        .unwrap();
    let err = pm.run(&mut m, decl).unwrap_err();
    assert!(matches!(err, PassError::NotApplicable { .. }));
    assert!(!PassManager::new().run(&mut m, decl).unwrap());
}
