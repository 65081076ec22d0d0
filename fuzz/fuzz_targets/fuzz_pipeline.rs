#![no_main]

use libfuzzer_sys::fuzz_target;
use loomir_ir::{Function, Handle, Interpreter, Memory, Module, RtValue, Scalar, verify_module};
use loomir_kernels::{
    Conv2dParams, Pool2dParams, ReluParams, build_conv2d, build_maxpool2d, build_relu,
};
use loomir_opt::{AutoVectorization, OptLevel, PassManager};

/// Small extents keep interpretation fast.
fn dim(byte: u8) -> u32 {
    u32::from(byte % 9)
}

fn execute(module: &Module, func: Handle<Function>, inputs: &[Vec<f32>], out_len: usize) -> Option<Vec<u32>> {
    let mut mem = Memory::new();
    let mut args: Vec<_> = inputs.iter().map(|d| RtValue::Ptr(mem.alloc_f32(d))).collect();
    let out = mem.alloc_f32(&vec![0.0; out_len]);
    args.push(RtValue::Ptr(out));
    Interpreter::new(module)
        .with_step_limit(1_000_000)
        .call(func, &args, &mut mem)
        .ok()?;
    let values = mem.read_f32(out, out_len).ok()?;
    Some(values.into_iter().map(f32::to_bits).collect())
}

fuzz_target!(|data: &[u8]| {
    let [kind, a, b, c, d, e, f, g, width, rest @ ..] = data else {
        return;
    };
    let mut module = Module::new();
    let ptr = module.types.scalar_pointer(Scalar::F32);
    let built = match kind % 3 {
        0 => {
            let len = u32::from(*a) * 2 + u32::from(*b % 2);
            build_relu(&mut module, ptr, ptr, &ReluParams { len: Some(len) })
                .map(|h| (h, vec![len as usize], len as usize))
        }
        1 => {
            let params = Conv2dParams {
                input: [dim(*a), dim(*b)],
                kernel: [dim(*c), dim(*d)],
                stride: [dim(*e), dim(*f)],
                padding: [u32::from(*g % 3), u32::from(*g / 3 % 3)],
            };
            let sizes = params.output_shape().map(|[oh, ow]| (oh * ow) as usize);
            build_conv2d(&mut module, ptr, ptr, ptr, &params).and_then(|h| {
                let [ih, iw] = params.input;
                let [kh, kw] = params.kernel;
                Ok((h, vec![(ih * iw) as usize, (kh * kw) as usize], sizes?))
            })
        }
        _ => {
            let params = Pool2dParams {
                input: [dim(*a), dim(*b)],
                kernel: [dim(*c), dim(*d)],
                stride: [dim(*e), dim(*f)],
            };
            let sizes = params.output_shape().map(|[oh, ow]| (oh * ow) as usize);
            build_maxpool2d(&mut module, ptr, ptr, &params).and_then(|h| {
                let [ih, iw] = params.input;
                Ok((h, vec![(ih * iw) as usize], sizes?))
            })
        }
    };
    // Invalid parameters are rejected without touching the module.
    let Ok((func, input_lens, out_len)) = built else {
        assert!(module.functions.is_empty());
        return;
    };
    verify_module(&module).expect("generated IR must verify");

    let mut bytes = rest.iter().cycle();
    let inputs: Vec<Vec<f32>> = input_lens
        .iter()
        .map(|&len| {
            (0..len)
                .map(|_| bytes.next().map_or(0.0, |&v| f32::from(v as i8) / 4.0))
                .collect()
        })
        .collect();
    let before = execute(&module, func, &inputs, out_len);

    let mut pm = PassManager::for_level(OptLevel::O1);
    pm.add_pass(Box::new(AutoVectorization::new(1 << (width % 4), 256)));
    pm.run_module(&mut module).expect("passes must apply to defined functions");
    verify_module(&module).expect("optimized IR must verify");
    // Idempotence.
    assert!(!pm.run_module(&mut module).unwrap());

    if let Some(before) = before {
        assert_eq!(execute(&module, func, &inputs, out_len), Some(before));
    }
});
