//! 2-D max pooling.

use loomir_ir::{
    BinaryOp, FloatPredicate, Function, FunctionBuilder, Handle, Module, Param, Scalar, Type,
};

use crate::KernelError;
use crate::loop_builder::build_loop;
use crate::tensor::{TensorOperand, dim_i32};

/// MaxPool2D configuration. All pairs are `[height, width]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pool2dParams {
    pub input: [u32; 2],
    pub kernel: [u32; 2],
    pub stride: [u32; 2],
}

impl Pool2dParams {
    /// Output extent: `(in - kernel) / stride + 1` per dimension.
    pub fn output_shape(&self) -> Result<[u32; 2], KernelError> {
        let mut out = [0; 2];
        for d in 0..2 {
            if self.kernel[d] == 0 || self.stride[d] == 0 {
                return Err(KernelError::InvalidParameter(format!(
                    "pooling window {:?} and stride {:?} must be at least 1",
                    self.kernel, self.stride
                )));
            }
            if self.input[d] < self.kernel[d] {
                return Err(KernelError::InvalidParameter(format!(
                    "input {:?} smaller than pooling window {:?}",
                    self.input, self.kernel
                )));
            }
            out[d] = (self.input[d] - self.kernel[d]) / self.stride[d] + 1;
        }
        Ok(out)
    }
}

/// Generates `maxpool2d(input, output)`.
///
/// Uses the same `oy`, `ox`, `ky`, `kx` nest as convolution. The running
/// maximum lives in a stack slot allocated in the entry block, reset to
/// `-inf` for every output cell and written to the output once the window
/// has been scanned.
pub fn build_maxpool2d(
    module: &mut Module,
    input: Handle<Type>,
    output: Handle<Type>,
    params: &Pool2dParams,
) -> Result<Handle<Function>, KernelError> {
    let input_op = TensorOperand::classify(&module.types, "input", input)?;
    let output_op = TensorOperand::classify(&module.types, "output", output)?;
    let [oh, ow] = params.output_shape()?;
    let [ih, iw] = params.input;
    let [kh, kw] = params.kernel;
    let [sh, sw] = params.stride;
    input_op.require("input", u64::from(ih) * u64::from(iw))?;
    output_op.require("output", u64::from(oh) * u64::from(ow))?;
    dim_i32("input size", u64::from(ih) * u64::from(iw))?;
    dim_i32("stride", u64::from(sh.max(sw)) * u64::from(ih.max(iw)))?;
    let [iw, kh, kw, sh, sw, oh, ow] = [iw, kh, kw, sh, sw, oh, ow].map(|v| v as i32);

    let void = module.types.void();
    let f32_ty = module.types.scalar(Scalar::F32);
    let mut func = Function::new(
        "maxpool2d",
        vec![
            Param {
                name: "input".into(),
                ty: input_op.ty,
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
    let dst = output_op.element_pointer(&mut b, entry, 1, "output")?;
    let slot = b.alloca(entry, f32_ty, 4, "max.slot")?;

    let zero = b.const_i32(0);
    let [c_iw, c_kh, c_kw, c_sh, c_sw, c_oh, c_ow] =
        [iw, kh, kw, sh, sw, oh, ow].map(|v| b.const_i32(v));
    let neg_inf = b.const_f32(f32::NEG_INFINITY);

    let oy_loop = build_loop(&mut b, entry, zero, c_oh, "oy", |b, body, oy| {
        let ox_loop = build_loop(b, body, zero, c_ow, "ox", |b, body, ox| {
            b.store(body, neg_inf, slot)?;

            let ky_loop = build_loop(b, body, zero, c_kh, "ky", |b, body, ky| {
                let kx_loop = build_loop(b, body, zero, c_kw, "kx", |b, body, kx| {
                    let oy_s = b.mul(body, oy, c_sh, "iy.base")?;
                    let iy = b.add(body, oy_s, ky, "iy")?;
                    let ox_s = b.mul(body, ox, c_sw, "ix.base")?;
                    let ix = b.add(body, ox_s, kx, "ix")?;
                    let in_row = b.mul(body, iy, c_iw, "in.row")?;
                    let in_idx = b.add(body, in_row, ix, "in.idx")?;
                    let in_ptr = b.gep(body, src, in_idx, "in.addr")?;
                    let x = b.load(body, in_ptr, "x")?;

                    let cur = b.load(body, slot, "max")?;
                    let greater = b.fcmp(body, FloatPredicate::Ogt, x, cur, "greater")?;
                    let max = b.select(body, greater, x, cur, "max.next")?;
                    b.store(body, max, slot)?;
                    Ok(body)
                })?;
                Ok(kx_loop.exit)
            })?;

            let done = ky_loop.exit;
            let result = b.load(done, slot, "max.final")?;
            let row = b.binary(done, BinaryOp::Mul, oy, c_ow, "out.row")?;
            let cell = b.add(done, row, ox, "out.idx")?;
            let out_ptr = b.gep(done, dst, cell, "out.addr")?;
            b.store(done, result, out_ptr)?;
            Ok(done)
        })?;
        Ok(ox_loop.exit)
    })?;
    b.ret(oy_loop.exit, None)?;

    log::debug!(
        "built maxpool2d window {kh}x{kw} stride {sh}x{sw} -> {oh}x{ow}: {} instructions",
        func.inst_count()
    );
    Ok(module.add_function(func))
}
