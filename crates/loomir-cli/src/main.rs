use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use miette::Context;
use tracing_subscriber::EnvFilter;

use loomir_ir::{Function, Handle, Interpreter, Memory, Module, RtValue, Scalar};
use loomir_kernels::{
    Conv2dParams, Pool2dParams, ReluParams, build_conv2d, build_maxpool2d, build_relu,
};
use loomir_opt::{OptLevel, PassManager, PassRegistry};

/// loomir: loop-nest kernel generator and optimizer
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    kernel: Option<Kernel>,

    /// Optimization level: 0, 1, or 2
    #[arg(short = 'O', long, default_value = "1", value_parser = parse_opt_level, global = true)]
    opt_level: OptLevel,

    /// Comma-separated pass pipeline, overriding the optimization level
    #[arg(long, global = true)]
    passes: Option<String>,

    /// Dump IR to stderr after optimization
    #[arg(long, global = true)]
    emit_ir: bool,

    /// Execute the kernel in the reference interpreter and print its output
    #[arg(long, global = true)]
    run: bool,

    /// Input values for --run, repeated to fill every input tensor
    /// (default: 0, 1, 2, ...)
    #[arg(long, value_delimiter = ',', global = true)]
    values: Vec<f32>,

    /// List the registered passes and exit
    #[arg(long)]
    list_passes: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Kernel {
    /// Elementwise ReLU over `len` elements
    Relu {
        #[arg(long)]
        len: u32,
    },
    /// Single-channel 2-D convolution
    Conv2d {
        /// Input extent, HxW
        #[arg(long, value_parser = parse_dims)]
        input: [u32; 2],
        /// Kernel extent, HxW
        #[arg(long, value_parser = parse_dims)]
        kernel: [u32; 2],
        #[arg(long, value_parser = parse_dims, default_value = "1")]
        stride: [u32; 2],
        #[arg(long, value_parser = parse_dims, default_value = "0")]
        padding: [u32; 2],
    },
    /// 2-D max pooling
    Maxpool2d {
        /// Input extent, HxW
        #[arg(long, value_parser = parse_dims)]
        input: [u32; 2],
        /// Window extent, HxW
        #[arg(long, value_parser = parse_dims)]
        kernel: [u32; 2],
        /// Defaults to the window extent
        #[arg(long, value_parser = parse_dims)]
        stride: Option<[u32; 2]>,
    },
}

fn parse_opt_level(s: &str) -> Result<OptLevel, String> {
    s.parse()
}

/// Parses `HxW`, or a single `N` for both dimensions.
fn parse_dims(s: &str) -> Result<[u32; 2], String> {
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid extent '{v}': {e}"))
    };
    match s.split_once(['x', 'X']) {
        Some((h, w)) => Ok([parse(h)?, parse(w)?]),
        None => parse(s).map(|n| [n, n]),
    }
}

/// A generated kernel with the buffer sizes needed to run it.
struct Built {
    func: Handle<Function>,
    inputs: Vec<usize>,
    /// Output extent as rows x columns.
    output: [usize; 2],
}

fn build(module: &mut Module, kernel: &Kernel) -> miette::Result<Built> {
    let ptr = module.types.scalar_pointer(Scalar::F32);
    let built = match *kernel {
        Kernel::Relu { len } => {
            let func = build_relu(module, ptr, ptr, &ReluParams { len: Some(len) });
            func.map(|func| Built {
                func,
                inputs: vec![len as usize],
                output: [1, len as usize],
            })
        }
        Kernel::Conv2d {
            input,
            kernel,
            stride,
            padding,
        } => {
            let params = Conv2dParams {
                input,
                kernel,
                stride,
                padding,
            };
            params.output_shape().and_then(|[oh, ow]| {
                let func = build_conv2d(module, ptr, ptr, ptr, &params)?;
                Ok(Built {
                    func,
                    inputs: vec![area(input), area(kernel)],
                    output: [oh as usize, ow as usize],
                })
            })
        }
        Kernel::Maxpool2d {
            input,
            kernel,
            stride,
        } => {
            let params = Pool2dParams {
                input,
                kernel,
                stride: stride.unwrap_or(kernel),
            };
            params.output_shape().and_then(|[oh, ow]| {
                let func = build_maxpool2d(module, ptr, ptr, &params)?;
                Ok(Built {
                    func,
                    inputs: vec![area(input)],
                    output: [oh as usize, ow as usize],
                })
            })
        }
    };
    built
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("kernel generation failed")
}

fn area([h, w]: [u32; 2]) -> usize {
    h as usize * w as usize
}

/// Fills `len` elements from `values`, cycling, or with `offset, offset+1, ...`.
fn fill(values: &[f32], offset: usize, len: usize) -> Vec<f32> {
    if values.is_empty() {
        (offset..offset + len).map(|v| v as f32).collect()
    } else {
        values.iter().copied().cycle().skip(offset).take(len).collect()
    }
}

fn execute(module: &Module, built: &Built, values: &[f32]) -> miette::Result<Vec<f32>> {
    let mut memory = Memory::new();
    let mut args = Vec::new();
    let mut offset = 0;
    for &len in &built.inputs {
        let data = fill(values, offset, len);
        offset += len;
        log::debug!("input {}: {data:?}", args.len());
        args.push(RtValue::Ptr(memory.alloc_f32(&data)));
    }
    let out_len = built.output[0] * built.output[1];
    let out = memory.alloc_f32(&vec![0.0; out_len]);
    args.push(RtValue::Ptr(out));

    Interpreter::new(module)
        .call(built.func, &args, &mut memory)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("execution failed")?;
    log::info!(
        "executed with {} loads and {} stores",
        memory.loads(),
        memory.stores()
    );
    memory
        .read_f32(out, out_len)
        .map_err(|e| miette::miette!("{e}"))
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let registry = PassRegistry::with_builtins();
    if cli.list_passes {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(());
    }
    let Some(kernel) = &cli.kernel else {
        return Err(miette::miette!(
            "no kernel given (expected one of: relu, conv2d, maxpool2d)"
        ));
    };

    // 1. Generate.
    let mut module = Module::new();
    let built = build(&mut module, kernel)?;
    loomir_ir::verify_module(&module)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("generated IR is malformed")?;

    // 2. Optimize.
    let pipeline = match &cli.passes {
        Some(passes) => registry
            .parse_pipeline(passes)
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err_with(|| {
                format!("invalid pipeline (available: {})", registry.names().join(", "))
            })?,
        None => PassManager::for_level(cli.opt_level),
    };
    pipeline
        .run_module(&mut module)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("optimization failed")?;
    loomir_ir::verify_module(&module)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("optimized IR is malformed")?;

    // 3. Optionally dump IR to stderr.
    if cli.emit_ir {
        eprintln!("{}", loomir_ir::dump_module(&module));
    }

    // 4. Print either the output tensor or the IR.
    if cli.run {
        let output = execute(&module, &built, &cli.values)?;
        for row in output.chunks(built.output[1].max(1)) {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            println!("{}", cells.join(" "));
        }
    } else {
        print!("{}", loomir_ir::dump_module(&module));
    }

    Ok(())
}
