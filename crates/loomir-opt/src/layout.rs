//! Data-layout transform.
//!
//! Pads stack allocations whose size is not a whole number of 64-bit words:
//! each such `alloca T` is replaced by an 8-byte aligned byte array of
//! `align_to(alloc_size(T), 8)` bytes, bit-cast back to `ptr<T>` so that
//! every user keeps its original pointer type.

use loomir_ir::{
    Block, Function, Handle, Inst, InstKind, Module, Scalar, Type, Value, align_to, format_type,
};

use crate::{Pass, PassError, defined_function};

/// Alignment and granule, in bytes, of padded allocations.
const PADDED_ALIGN: u32 = 8;

/// Pads stack allocations to 64-bit multiples.
#[derive(Clone, Copy, Debug, Default)]
pub struct DataLayoutTransform;

struct Padding {
    alloca: Handle<Inst>,
    block: Handle<Block>,
    padded: Handle<Type>,
    padded_ptr: Handle<Type>,
    original_ptr: Handle<Type>,
    name: String,
}

impl Pass for DataLayoutTransform {
    fn name(&self) -> &str {
        "data-layout-transform"
    }

    fn run(&self, module: &mut Module, function: Handle<Function>) -> Result<bool, PassError> {
        let func = defined_function(module, function, self.name())?;

        let candidates: Vec<_> = func
            .live_insts()
            .filter_map(|h| match func.insts[h].kind {
                InstKind::Alloca { allocated, .. } => Some((h, allocated)),
                _ => None,
            })
            .filter(|&(_, allocated)| module.types.size_in_bits(allocated) % 64 != 0)
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }

        // Plan: intern every type the rewrite needs before touching the function.
        let mut plan = Vec::with_capacity(candidates.len());
        for (h, allocated) in candidates {
            let inst = &module.functions[function].insts[h];
            let (Some(block), original_ptr) = (inst.block, inst.ty) else {
                continue;
            };
            let name = inst.name.clone().unwrap_or_else(|| "alloca".to_string());
            let bytes = align_to(module.types.alloc_size(allocated), u64::from(PADDED_ALIGN));
            let Ok(len) = u32::try_from(bytes) else {
                log::debug!("data-layout-transform: `{name}` is too large to pad ({bytes} bytes)");
                continue;
            };
            log::info!(
                "data-layout-transform: padding `{name}` ({}) to {len} bytes",
                format_type(&module.types, allocated)
            );
            let byte = module.types.scalar(Scalar::I8);
            let padded = module.types.array(byte, len);
            let padded_ptr = module.types.pointer(padded);
            plan.push(Padding {
                alloca: h,
                block,
                padded,
                padded_ptr,
                original_ptr,
                name,
            });
        }

        let func = &mut module.functions[function];
        let changed = !plan.is_empty();
        for p in plan {
            let pos = func.blocks[p.block]
                .insts
                .iter()
                .position(|&i| i == p.alloca)
                .unwrap_or(0);
            let padded = func.insert_inst_at(
                p.block,
                pos,
                InstKind::Alloca {
                    allocated: p.padded,
                    align: PADDED_ALIGN,
                },
                p.padded_ptr,
                Some(format!("{}.padded", p.name)),
            );
            let cast = func.insert_inst_at(
                p.block,
                pos + 1,
                InstKind::Bitcast {
                    value: Value::Inst(padded),
                },
                p.original_ptr,
                Some(p.name),
            );
            func.replace_all_uses(Value::Inst(p.alloca), Value::Inst(cast));
            func.erase_inst(p.alloca);
        }
        Ok(changed)
    }
}
