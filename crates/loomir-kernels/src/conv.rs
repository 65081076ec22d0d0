//! 2-D convolution.

use loomir_ir::{
    BinaryOp, Block, Function, FunctionBuilder, Handle, IntPredicate, Module, Param, Type, Value,
};

use crate::KernelError;
use crate::loop_builder::build_loop;
use crate::tensor::{TensorOperand, dim_i32};

/// Conv2D configuration. All pairs are `[height, width]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conv2dParams {
    pub input: [u32; 2],
    pub kernel: [u32; 2],
    pub stride: [u32; 2],
    pub padding: [u32; 2],
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            input: [1, 1],
            kernel: [1, 1],
            stride: [1, 1],
            padding: [0, 0],
        }
    }
}

impl Conv2dParams {
    /// Output extent: `(in + 2 * pad - kernel) / stride + 1` per dimension.
    pub fn output_shape(&self) -> Result<[u32; 2], KernelError> {
        let mut out = [0; 2];
        for d in 0..2 {
            if self.kernel[d] == 0 || self.stride[d] == 0 {
                return Err(KernelError::InvalidParameter(format!(
                    "kernel {:?} and stride {:?} must be at least 1",
                    self.kernel, self.stride
                )));
            }
            let padded = u64::from(self.input[d]) + 2 * u64::from(self.padding[d]);
            if padded < u64::from(self.kernel[d]) {
                return Err(KernelError::InvalidParameter(format!(
                    "padded input {:?} smaller than kernel {:?}",
                    self.input, self.kernel
                )));
            }
            let extent = (padded - u64::from(self.kernel[d])) / u64::from(self.stride[d]) + 1;
            out[d] = u32::try_from(extent)
                .map_err(|_| KernelError::InvalidParameter("output too large".into()))?;
        }
        Ok(out)
    }
}

/// Generates `conv2d(input, weight, output)`, a single-channel convolution
/// over row-major buffers.
///
/// The loop nest is `oy`, `ox`, `ky`, `kx` (all `i32`). Each output cell is
/// zeroed, then accumulated in memory. Padded taps read as `0.0`: the padded
/// coordinate is range-checked and the load is redirected to element 0 when
/// it falls outside the input.
pub fn build_conv2d(
    module: &mut Module,
    input: Handle<Type>,
    weight: Handle<Type>,
    output: Handle<Type>,
    params: &Conv2dParams,
) -> Result<Handle<Function>, KernelError> {
    let input_op = TensorOperand::classify(&module.types, "input", input)?;
    let weight_op = TensorOperand::classify(&module.types, "weight", weight)?;
    let output_op = TensorOperand::classify(&module.types, "output", output)?;
    let [oh, ow] = params.output_shape()?;
    let [ih, iw] = params.input;
    let [kh, kw] = params.kernel;
    let [sh, sw] = params.stride;
    let [ph, pw] = params.padding;
    input_op.require("input", u64::from(ih) * u64::from(iw))?;
    weight_op.require("weight", u64::from(kh) * u64::from(kw))?;
    output_op.require("output", u64::from(oh) * u64::from(ow))?;

    // Every index expression stays within i32.
    let dims = [
        ("input height", u64::from(ih) + 2 * u64::from(ph)),
        ("input width", u64::from(iw) + 2 * u64::from(pw)),
        ("input size", u64::from(ih) * u64::from(iw)),
        ("output size", u64::from(oh) * u64::from(ow)),
        ("row span", (u64::from(oh) * u64::from(sh) + u64::from(kh)) * u64::from(iw.max(1))),
    ];
    for (what, value) in dims {
        dim_i32(what, value)?;
    }
    let [ih, iw, kh, kw, sh, sw, ph, pw, oh, ow] =
        [ih, iw, kh, kw, sh, sw, ph, pw, oh, ow].map(|v| v as i32);
    let padded = ph != 0 || pw != 0;

    let void = module.types.void();
    let mut func = Function::new(
        "conv2d",
        vec![
            Param {
                name: "input".into(),
                ty: input_op.ty,
                noalias: true,
            },
            Param {
                name: "weight".into(),
                ty: weight_op.ty,
                noalias: true,
            },
            Param {
                name: "output".into(),
                ty: output_op.ty,
                noalias: true,
            },
        ],
        void,
    );

    let mut b = FunctionBuilder::new(&mut module.types, &mut func);
    let entry = b.append_block("entry");
    let src = input_op.element_pointer(&mut b, entry, 0, "input")?;
    let wts = weight_op.element_pointer(&mut b, entry, 1, "weight")?;
    let dst = output_op.element_pointer(&mut b, entry, 2, "output")?;

    let zero = b.const_i32(0);
    let [c_ih, c_iw, c_kh, c_kw, c_sh, c_sw, c_ph, c_pw, c_oh, c_ow] =
        [ih, iw, kh, kw, sh, sw, ph, pw, oh, ow].map(|v| b.const_i32(v));
    let zero_f = b.const_f32(0.0);

    let oy_loop = build_loop(&mut b, entry, zero, c_oh, "oy", |b, body, oy| {
        let ox_loop = build_loop(b, body, zero, c_ow, "ox", |b, body, ox| {
            let row = b.mul(body, oy, c_ow, "out.row")?;
            let cell = b.add(body, row, ox, "out.idx")?;
            let out_ptr = b.gep(body, dst, cell, "out.addr")?;
            b.store(body, zero_f, out_ptr)?;

            let ky_loop = build_loop(b, body, zero, c_kh, "ky", |b, body, ky| {
                let kx_loop = build_loop(b, body, zero, c_kw, "kx", |b, body, kx| {
                    let oy_s = b.mul(body, oy, c_sh, "iy.base")?;
                    let iy = b.add(body, oy_s, ky, "iy")?;
                    let ox_s = b.mul(body, ox, c_sw, "ix.base")?;
                    let ix = b.add(body, ox_s, kx, "ix")?;

                    let x = if padded {
                        load_padded(b, body, src, [iy, ix], [c_ph, c_pw], [c_ih, c_iw], zero, zero_f)?
                    } else {
                        let in_row = b.mul(body, iy, c_iw, "in.row")?;
                        let in_idx = b.add(body, in_row, ix, "in.idx")?;
                        let in_ptr = b.gep(body, src, in_idx, "in.addr")?;
                        b.load(body, in_ptr, "x")?
                    };

                    let w_row = b.mul(body, ky, c_kw, "w.row")?;
                    let w_idx = b.add(body, w_row, kx, "w.idx")?;
                    let w_ptr = b.gep(body, wts, w_idx, "w.addr")?;
                    let w = b.load(body, w_ptr, "w")?;

                    let prod = b.binary(body, BinaryOp::FMul, x, w, "prod")?;
                    let acc_ptr = b.gep(body, dst, cell, "acc.addr")?;
                    let acc = b.load(body, acc_ptr, "acc")?;
                    let sum = b.binary(body, BinaryOp::FAdd, acc, prod, "sum")?;
                    b.store(body, sum, acc_ptr)?;
                    Ok(body)
                })?;
                Ok(kx_loop.exit)
            })?;
            Ok(ky_loop.exit)
        })?;
        Ok(ox_loop.exit)
    })?;
    b.ret(oy_loop.exit, None)?;

    log::debug!(
        "built conv2d {ih}x{iw} * {kh}x{kw} -> {oh}x{ow}: {} instructions",
        func.inst_count()
    );
    Ok(module.add_function(func))
}

/// Loads `input[iy - ph][ix - pw]`, or `0.0` when that lies in the padding.
#[allow(clippy::too_many_arguments)]
fn load_padded(
    b: &mut FunctionBuilder<'_>,
    at: Handle<Block>,
    src: Value,
    [iy, ix]: [Value; 2],
    [ph, pw]: [Value; 2],
    [ih, iw]: [Value; 2],
    zero: Value,
    zero_f: Value,
) -> Result<Value, KernelError> {
    let y = b.binary(at, BinaryOp::Sub, iy, ph, "py")?;
    let x = b.binary(at, BinaryOp::Sub, ix, pw, "px")?;
    // Negative coordinates wrap to large unsigned values and fail `ult`.
    let y_in = b.icmp(at, IntPredicate::Ult, y, ih, "py.in")?;
    let x_in = b.icmp(at, IntPredicate::Ult, x, iw, "px.in")?;
    let inside = b.binary(at, BinaryOp::And, y_in, x_in, "inside")?;
    let row = b.mul(at, y, iw, "in.row")?;
    let idx = b.add(at, row, x, "in.idx")?;
    let safe = b.select(at, inside, idx, zero, "in.safe")?;
    let ptr = b.gep(at, src, safe, "in.addr")?;
    let raw = b.load(at, ptr, "x.raw")?;
    Ok(b.select(at, inside, raw, zero_f, "x")?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomir_ir::{Interpreter, Memory, RtValue, Scalar, verify_function};

    fn run_conv(params: &Conv2dParams, input: &[f32], weight: &[f32]) -> Vec<f32> {
        let mut module = Module::new();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let h = build_conv2d(&mut module, ptr, ptr, ptr, params).unwrap();
        verify_function(&module, h).unwrap();
        let [oh, ow] = params.output_shape().unwrap();
        let n = (oh * ow) as usize;

        let mut mem = Memory::new();
        let x = mem.alloc_f32(input);
        let w = mem.alloc_f32(weight);
        let y = mem.alloc_f32(&vec![f32::NAN; n]);
        Interpreter::new(&module)
            .call(h, &[RtValue::Ptr(x), RtValue::Ptr(w), RtValue::Ptr(y)], &mut mem)
            .unwrap();
        mem.read_f32(y, n).unwrap()
    }

    #[test]
    fn two_by_two_single_output() {
        let params = Conv2dParams {
            input: [2, 2],
            kernel: [2, 2],
            ..Default::default()
        };
        assert_eq!(params.output_shape().unwrap(), [1, 1]);
        let out = run_conv(&params, &[1.0, 2.0, 3.0, 4.0], &[0.5; 4]);
        assert_eq!(out, vec![5.0]);
    }

    #[test]
    fn strided_output_shape() {
        let params = Conv2dParams {
            input: [7, 5],
            kernel: [3, 2],
            stride: [2, 3],
            padding: [0, 0],
        };
        // (7 - 3) / 2 + 1 = 3, (5 - 2) / 3 + 1 = 2
        assert_eq!(params.output_shape().unwrap(), [3, 2]);
        let input: Vec<f32> = (0..35).map(|v| v as f32).collect();
        let out = run_conv(&params, &input, &[1.0; 6]);
        // Window at (0, 0): rows 0..3, cols 0..2.
        let expected0: f32 = [0.0, 1.0, 5.0, 6.0, 10.0, 11.0].iter().sum();
        assert_eq!(out[0], expected0);
        assert_eq!(out.len(), 6);
    }

    #[test]
    fn zero_padding_reads_zero() {
        let params = Conv2dParams {
            input: [2, 2],
            kernel: [3, 3],
            stride: [1, 1],
            padding: [1, 1],
        };
        assert_eq!(params.output_shape().unwrap(), [2, 2]);
        // All-ones kernel: each output is the sum of the in-bounds inputs.
        let out = run_conv(&params, &[1.0, 2.0, 3.0, 4.0], &[1.0; 9]);
        assert_eq!(out, vec![10.0; 4]);
    }

    #[test]
    fn invalid_parameters_rejected() {
        let mut module = Module::new();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let zero_stride = Conv2dParams {
            input: [4, 4],
            kernel: [2, 2],
            stride: [0, 1],
            padding: [0, 0],
        };
        let err = build_conv2d(&mut module, ptr, ptr, ptr, &zero_stride).unwrap_err();
        assert!(matches!(err, KernelError::InvalidParameter(_)));

        let too_big = Conv2dParams {
            input: [2, 2],
            kernel: [3, 3],
            ..Default::default()
        };
        assert!(build_conv2d(&mut module, ptr, ptr, ptr, &too_big).is_err());
        assert!(module.functions.is_empty());
    }

    #[test]
    fn short_array_operand_rejected() {
        let mut module = Module::new();
        let f32_ty = module.types.scalar(Scalar::F32);
        let ptr = module.types.pointer(f32_ty);
        let arr = module.types.array(f32_ty, 3);
        let short = module.types.pointer(arr);
        let params = Conv2dParams {
            input: [2, 2],
            kernel: [1, 1],
            ..Default::default()
        };
        let err = build_conv2d(&mut module, short, ptr, ptr, &params).unwrap_err();
        assert!(matches!(err, KernelError::InvalidParameter(_)));
    }
}
