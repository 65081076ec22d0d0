//! IR validation pass.
//!
//! Runs the verifier over one function and logs what it finds. This pass
//! never modifies the module.

use loomir_ir::{Function, Handle, Module, verify_function};

use crate::{Pass, PassError, defined_function};

/// Verifies a function. Returns `Ok(false)` (never modifies the module).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IrValidation;

impl Pass for IrValidation {
    fn name(&self) -> &str {
        "ir-validation"
    }

    fn run(&self, module: &mut Module, function: Handle<Function>) -> Result<bool, PassError> {
        let func = defined_function(module, function, self.name())?;
        match verify_function(module, function) {
            Ok(()) => log::debug!("ir-validation: `{}` is well formed", func.name),
            Err(e) => log::warn!("ir-validation: `{}`: {e}", func.name),
        }
        Ok(false)
    }
}
