use loomir_ir::{
    Function, Handle, InterpError, Interpreter, Memory, Module, RtValue, Scalar, Type,
};
use loomir_opt::{OptLevel, PassManager};
use ndarray::{Array1, Array2};

/// All optimization levels, lowest first.
#[allow(dead_code)]
pub const LEVELS: [OptLevel; 3] = [OptLevel::O0, OptLevel::O1, OptLevel::O2];

/// Deterministic pseudo-random values in `[-4, 4)`, with a few exact zeros.
#[allow(dead_code)]
pub fn data(seed: u32, len: usize) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let v = (state >> 8) % 64;
            if v == 0 { 0.0 } else { v as f32 / 8.0 - 4.0 }
        })
        .collect()
}

/// An empty module and its `ptr<f32>` type.
#[allow(dead_code)]
pub fn module() -> (Module, Handle<Type>) {
    let mut module = Module::new();
    let ptr = module.types.scalar_pointer(Scalar::F32);
    (module, ptr)
}

/// Runs the preset pipeline and checks the result still verifies.
#[allow(dead_code)]
pub fn optimize(module: &mut Module, level: OptLevel) -> bool {
    let changed = PassManager::for_level(level)
        .run_module(module)
        .expect("pass pipeline failed");
    loomir_ir::verify_module(module).expect("optimized module is malformed");
    changed
}

/// Calls `func(inputs..., output)` and returns the output buffer.
#[allow(dead_code)]
pub fn try_run(
    module: &Module,
    func: Handle<Function>,
    inputs: &[&[f32]],
    out_len: usize,
) -> Result<Vec<f32>, InterpError> {
    let mut mem = Memory::new();
    let mut args: Vec<_> = inputs
        .iter()
        .map(|data| RtValue::Ptr(mem.alloc_f32(data)))
        .collect();
    let out = mem.alloc_f32(&vec![f32::NAN; out_len]);
    args.push(RtValue::Ptr(out));
    Interpreter::new(module).call(func, &args, &mut mem)?;
    mem.read_f32(out, out_len)
}

#[allow(dead_code)]
pub fn run(module: &Module, func: Handle<Function>, inputs: &[&[f32]], out_len: usize) -> Vec<f32> {
    try_run(module, func, inputs, out_len).expect("interpretation failed")
}

/// `max(x, 0)`, with NaN mapped to zero.
#[allow(dead_code)]
pub fn relu_ref(x: &Array1<f32>) -> Array1<f32> {
    x.mapv(|v| if v > 0.0 { v } else { 0.0 })
}

/// Single-channel cross-correlation with zero padding, accumulated in
/// `ky`, `kx` order.
#[allow(dead_code)]
pub fn conv2d_ref(
    input: &Array2<f32>,
    weight: &Array2<f32>,
    stride: [usize; 2],
    padding: [usize; 2],
) -> Array2<f32> {
    let (ih, iw) = input.dim();
    let (kh, kw) = weight.dim();
    let oh = (ih + 2 * padding[0] - kh) / stride[0] + 1;
    let ow = (iw + 2 * padding[1] - kw) / stride[1] + 1;
    Array2::from_shape_fn((oh, ow), |(oy, ox)| {
        let mut acc = 0.0f32;
        for ky in 0..kh {
            for kx in 0..kw {
                let y = (oy * stride[0] + ky).checked_sub(padding[0]);
                let x = (ox * stride[1] + kx).checked_sub(padding[1]);
                let v = match (y, x) {
                    (Some(y), Some(x)) if y < ih && x < iw => input[[y, x]],
                    _ => 0.0,
                };
                acc += v * weight[[ky, kx]];
            }
        }
        acc
    })
}

/// Max pooling without padding. A window of NaNs yields `-inf`.
#[allow(dead_code)]
pub fn maxpool2d_ref(input: &Array2<f32>, kernel: [usize; 2], stride: [usize; 2]) -> Array2<f32> {
    let (ih, iw) = input.dim();
    let oh = (ih - kernel[0]) / stride[0] + 1;
    let ow = (iw - kernel[1]) / stride[1] + 1;
    Array2::from_shape_fn((oh, ow), |(oy, ox)| {
        let mut max = f32::NEG_INFINITY;
        for ky in 0..kernel[0] {
            for kx in 0..kernel[1] {
                let v = input[[oy * stride[0] + ky, ox * stride[1] + kx]];
                if v > max {
                    max = v;
                }
            }
        }
        max
    })
}

/// Row-major elements of a 2-D array.
#[allow(dead_code)]
pub fn flat(a: &Array2<f32>) -> Vec<f32> {
    a.iter().copied().collect()
}
