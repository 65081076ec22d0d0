//! Counted-loop construction.
//!
//! [`build_loop`] emits the canonical shape every pass in the workspace
//! expects:
//!
//! ```text
//! at:            ...; br header
//! header:        iv = phi [start, at], [next, latch]
//!                cond = icmp ult iv, end
//!                br cond, body, exit
//! body..:        <emitted by the caller>; br latch
//! latch:         next = add iv, 1; br header
//! exit:          <emission continues here>
//! ```
//!
//! The header is the only guard, so a loop whose `start >= end` never enters
//! its body.

use loomir_ir::{Block, FunctionBuilder, Handle, IntPredicate, IrError, Value, format_type};

use crate::KernelError;

/// Blocks and induction value of a loop produced by [`build_loop`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltLoop {
    pub header: Handle<Block>,
    /// First block of the body.
    pub body: Handle<Block>,
    pub latch: Handle<Block>,
    /// Where emission continues after the loop.
    pub exit: Handle<Block>,
    pub induction: Value,
}

/// Builds `for iv in start..end { body }` after the block `at`.
///
/// `at` becomes the loop's preheader. The body emitter receives the first
/// body block and the induction value, and returns the block its emission
/// ended in; that block is closed with a branch to the latch. Blocks are laid
/// out header, body, (nested blocks), latch, exit.
pub fn build_loop<'a, F>(
    b: &mut FunctionBuilder<'a>,
    at: Handle<Block>,
    start: Value,
    end: Value,
    name: &str,
    body: F,
) -> Result<BuiltLoop, KernelError>
where
    F: FnOnce(&mut FunctionBuilder<'a>, Handle<Block>, Value) -> Result<Handle<Block>, KernelError>,
{
    let ty = b.value_type(start)?;
    let end_ty = b.value_type(end)?;
    let scalar = b.types.element_scalar(ty).filter(|s| s.is_integer());
    let Some(scalar) = scalar.filter(|_| ty == end_ty) else {
        return Err(IrError::TypeMismatch {
            expected: format!("matching integer bounds, start is {}", format_type(b.types, ty)),
            found: format_type(b.types, end_ty),
        }
        .into());
    };

    let header = b.append_block(format!("{name}.header"));
    let body_block = b.append_block(format!("{name}.body"));
    b.br(at, header)?;
    let induction = b.phi(header, ty, vec![(start, at)], &format!("{name}.iv"))?;
    let cond = b.icmp(header, IntPredicate::Ult, induction, end, &format!("{name}.cond"))?;

    let body_end = body(b, body_block, induction)?;

    let latch = b.append_block(format!("{name}.latch"));
    let exit = b.append_block(format!("{name}.exit"));
    b.br(body_end, latch)?;
    b.cond_br(header, cond, body_block, exit)?;
    let one = b.const_int(scalar, 1);
    let next = b.add(latch, induction, one, &format!("{name}.next"))?;
    b.add_incoming(induction, next, latch)?;
    b.br(latch, header)?;

    Ok(BuiltLoop {
        header,
        body: body_block,
        latch,
        exit,
        induction,
    })
}
