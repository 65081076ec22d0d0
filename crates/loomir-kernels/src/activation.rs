//! Elementwise activation kernels.

use loomir_ir::{FloatPredicate, Function, FunctionBuilder, Handle, Module, Param, Type};

use crate::KernelError;
use crate::loop_builder::build_loop;
use crate::tensor::TensorOperand;

/// ReLU configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReluParams {
    /// Element count. Taken from an array-typed input when `None`.
    pub len: Option<u32>,
}

/// Generates `relu(input, output)`: `output[i] = input[i] > 0 ? input[i] : 0`
/// for `i` in `0..len`, one `i64` loop.
///
/// The comparison is an ordered `fcmp ogt`, so NaN inputs produce `0.0`.
pub fn build_relu(
    module: &mut Module,
    input: Handle<Type>,
    output: Handle<Type>,
    params: &ReluParams,
) -> Result<Handle<Function>, KernelError> {
    let input_op = TensorOperand::classify(&module.types, "input", input)?;
    let output_op = TensorOperand::classify(&module.types, "output", output)?;
    let len = params
        .len
        .or(input_op.array_len)
        .ok_or(KernelError::MissingLength)?;
    input_op.require("input", u64::from(len))?;
    output_op.require("output", u64::from(len))?;

    let void = module.types.void();
    let mut func = Function::new(
        "relu",
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
    let zero_i = b.const_i64(0);
    let n = b.const_i64(i64::from(len));
    let zero_f = b.const_f32(0.0);

    let lp = build_loop(&mut b, entry, zero_i, n, "i", |b, body, i| {
        let px = b.gep(body, src, i, "x.addr")?;
        let x = b.load(body, px, "x")?;
        let positive = b.fcmp(body, FloatPredicate::Ogt, x, zero_f, "positive")?;
        let y = b.select(body, positive, x, zero_f, "y")?;
        let py = b.gep(body, dst, i, "y.addr")?;
        b.store(body, y, py)?;
        Ok(body)
    })?;
    b.ret(lp.exit, None)?;

    log::debug!(
        "built relu over {len} elements: {} blocks, {} instructions",
        func.layout.len(),
        func.inst_count()
    );
    Ok(module.add_function(func))
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomir_ir::{Memory, RtValue, Scalar, verify_function};

    fn run_relu(data: &[f32]) -> Vec<f32> {
        let mut module = Module::new();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let params = ReluParams {
            len: Some(data.len() as u32),
        };
        let h = build_relu(&mut module, ptr, ptr, &params).unwrap();
        verify_function(&module, h).unwrap();

        let mut mem = Memory::new();
        let x = mem.alloc_f32(data);
        let y = mem.alloc_f32(&vec![-1.0; data.len()]);
        loomir_ir::Interpreter::new(&module)
            .call(h, &[RtValue::Ptr(x), RtValue::Ptr(y)], &mut mem)
            .unwrap();
        mem.read_f32(y, data.len()).unwrap()
    }

    #[test]
    fn relu_values() {
        assert_eq!(
            run_relu(&[-1.0, 2.0, -3.0, 4.0, -5.0, 6.0]),
            vec![0.0, 2.0, 0.0, 4.0, 0.0, 6.0]
        );
    }

    #[test]
    fn relu_nan_maps_to_zero() {
        assert_eq!(run_relu(&[f32::NAN, -0.0, 1.5]), vec![0.0, 0.0, 1.5]);
    }

    #[test]
    fn length_from_array_input() {
        let mut module = Module::new();
        let f32_ty = module.types.scalar(Scalar::F32);
        let arr = module.types.array(f32_ty, 8);
        let arr_ptr = module.types.pointer(arr);
        let h = build_relu(&mut module, arr_ptr, arr_ptr, &ReluParams::default()).unwrap();
        verify_function(&module, h).unwrap();
        assert_eq!(module.functions[h].name, "relu");
    }

    #[test]
    fn missing_length_leaves_module_untouched() {
        let mut module = Module::new();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let err = build_relu(&mut module, ptr, ptr, &ReluParams::default()).unwrap_err();
        assert!(matches!(err, KernelError::MissingLength));
        assert!(module.functions.is_empty());
    }

    #[test]
    fn non_pointer_operand_rejected() {
        let mut module = Module::new();
        let f32_ty = module.types.scalar(Scalar::F32);
        let ptr = module.types.pointer(f32_ty);
        let err = build_relu(&mut module, f32_ty, ptr, &ReluParams { len: Some(4) }).unwrap_err();
        assert!(matches!(err, KernelError::NotAPointer { operand: "input", .. }));
    }

    #[test]
    fn repeated_builds_get_unique_names() {
        let mut module = Module::new();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let params = ReluParams { len: Some(4) };
        let a = build_relu(&mut module, ptr, ptr, &params).unwrap();
        let b = build_relu(&mut module, ptr, ptr, &params).unwrap();
        assert_eq!(module.functions[a].name, "relu");
        assert_eq!(module.functions[b].name, "relu.1");
    }
}
