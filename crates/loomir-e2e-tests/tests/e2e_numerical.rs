//! Generated kernels, interpreted before and after every preset pipeline,
//! against ndarray reference implementations.

mod common;

use loomir_kernels::{
    Conv2dParams, Pool2dParams, ReluParams, build_conv2d, build_maxpool2d, build_relu,
};
use ndarray::{Array1, Array2};

use common::{LEVELS, conv2d_ref, data, flat, maxpool2d_ref, module, optimize, relu_ref, run};

#[test]
fn relu_matches_reference() {
    for len in [0usize, 1, 3, 4, 5, 8, 17, 64] {
        let x = data(len as u32, len);
        let expected = relu_ref(&Array1::from_vec(x.clone())).to_vec();
        for level in LEVELS {
            let (mut m, ptr) = module();
            let params = ReluParams {
                len: Some(len as u32),
            };
            let h = build_relu(&mut m, ptr, ptr, &params).unwrap();
            optimize(&mut m, level);
            assert_eq!(run(&m, h, &[&x], len), expected, "len {len} at {level:?}");
        }
    }
}

#[test]
fn relu_spec_example() {
    let (mut m, ptr) = module();
    let h = build_relu(&mut m, ptr, ptr, &ReluParams { len: Some(6) }).unwrap();
    optimize(&mut m, loomir_opt::OptLevel::O2);
    let out = run(&m, h, &[&[-1.0, 2.0, -3.0, 4.0, -5.0, 6.0]], 6);
    assert_eq!(out, vec![0.0, 2.0, 0.0, 4.0, 0.0, 6.0]);
}

#[test]
fn relu_on_array_operands() {
    let (mut m, _) = module();
    let f32_ty = m.types.scalar(loomir_ir::Scalar::F32);
    let arr = m.types.array(f32_ty, 12);
    let arr_ptr = m.types.pointer(arr);
    let h = build_relu(&mut m, arr_ptr, arr_ptr, &ReluParams::default()).unwrap();
    let x = data(7, 12);
    let expected = relu_ref(&Array1::from_vec(x.clone())).to_vec();
    assert!(optimize(&mut m, loomir_opt::OptLevel::O2));
    assert_eq!(run(&m, h, &[&x], 12), expected);
}

#[test]
fn conv2d_matches_reference() {
    let cases = [
        ([2, 2], [2, 2], [1, 1], [0, 0]),
        ([5, 5], [3, 3], [1, 1], [0, 0]),
        ([6, 7], [3, 2], [2, 1], [0, 0]),
        ([4, 4], [3, 3], [1, 1], [1, 1]),
        ([5, 6], [2, 3], [2, 2], [1, 2]),
        ([1, 1], [1, 1], [1, 1], [0, 0]),
    ];
    for (i, (input, kernel, stride, padding)) in cases.into_iter().enumerate() {
        let params = Conv2dParams {
            input,
            kernel,
            stride,
            padding,
        };
        let [ih, iw] = input.map(|v| v as usize);
        let [kh, kw] = kernel.map(|v| v as usize);
        let x = Array2::from_shape_vec((ih, iw), data(i as u32, ih * iw)).unwrap();
        let w = Array2::from_shape_vec((kh, kw), data(100 + i as u32, kh * kw)).unwrap();
        let expected = conv2d_ref(
            &x,
            &w,
            stride.map(|v| v as usize),
            padding.map(|v| v as usize),
        );
        let [oh, ow] = params.output_shape().unwrap();
        assert_eq!(expected.dim(), (oh as usize, ow as usize));

        for level in LEVELS {
            let (mut m, ptr) = module();
            let h = build_conv2d(&mut m, ptr, ptr, ptr, &params).unwrap();
            optimize(&mut m, level);
            let out = run(&m, h, &[&flat(&x), &flat(&w)], expected.len());
            assert_eq!(out, flat(&expected), "case {i} at {level:?}");
        }
    }
}

#[test]
fn conv2d_spec_example() {
    let (mut m, ptr) = module();
    let params = Conv2dParams {
        input: [2, 2],
        kernel: [2, 2],
        stride: [1, 1],
        padding: [0, 0],
    };
    let h = build_conv2d(&mut m, ptr, ptr, ptr, &params).unwrap();
    let out = run(&m, h, &[&[1.0, 2.0, 3.0, 4.0], &[0.5; 4]], 1);
    assert_eq!(out, vec![5.0]);
}

#[test]
fn maxpool2d_matches_reference() {
    let cases = [
        ([4, 4], [2, 2], [2, 2]),
        ([5, 7], [2, 3], [1, 2]),
        ([6, 6], [3, 3], [3, 3]),
        ([3, 8], [3, 1], [1, 1]),
    ];
    for (i, (input, kernel, stride)) in cases.into_iter().enumerate() {
        let params = Pool2dParams {
            input,
            kernel,
            stride,
        };
        let [ih, iw] = input.map(|v| v as usize);
        let x = Array2::from_shape_vec((ih, iw), data(200 + i as u32, ih * iw)).unwrap();
        let expected = maxpool2d_ref(&x, kernel.map(|v| v as usize), stride.map(|v| v as usize));

        for level in LEVELS {
            let (mut m, ptr) = module();
            let h = build_maxpool2d(&mut m, ptr, ptr, &params).unwrap();
            optimize(&mut m, level);
            let out = run(&m, h, &[&flat(&x)], expected.len());
            assert_eq!(out, flat(&expected), "case {i} at {level:?}");
        }
    }
}

#[test]
fn maxpool2d_spec_example() {
    let (mut m, ptr) = module();
    let params = Pool2dParams {
        input: [4, 4],
        kernel: [2, 2],
        stride: [2, 2],
    };
    let h = build_maxpool2d(&mut m, ptr, ptr, &params).unwrap();
    optimize(&mut m, loomir_opt::OptLevel::O2);
    let x: Vec<f32> = (1..=16).map(|v| v as f32).collect();
    assert_eq!(run(&m, h, &[&x], 4), vec![6.0, 8.0, 14.0, 16.0]);
}
