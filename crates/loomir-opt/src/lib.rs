//! IR-to-IR passes for loomir.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] with fixed-point iteration,
//! a name-keyed [`PassRegistry`], and the built-in loop passes
//! (auto-vectorization, data-layout padding, loop fusion) plus a
//! non-modifying validation pass.

mod fusion;
mod layout;
mod registry;
mod validation;
mod vectorize;

pub use fusion::{FusionRejection, LoopFusion};
pub use layout::DataLayoutTransform;
pub use registry::{
    PassFactory, PassRegistry, RegistryError, create_auto_vectorization_pass,
    create_data_layout_transform_pass, create_ir_validation_pass, create_loop_fusion_pass,
};
pub use validation::IrValidation;
pub use vectorize::{AutoVectorization, Rejection};

use std::fmt::Debug;
use std::str::FromStr;

use loomir_ir::{Function, Handle, Inst, Module};

/// Errors a pass reports instead of a change flag.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// The function has no body.
    #[error("pass `{pass}` does not apply to declaration `{function}`")]
    NotApplicable { pass: String, function: String },

    /// The handle does not name a function of the module.
    #[error("function handle {0} is not part of the module")]
    UnknownFunction(usize),
}

/// A transformation over one function of a module.
pub trait Pass: Debug {
    /// Registry name of the pass.
    fn name(&self) -> &str;

    /// Runs the pass. Returns `Ok(true)` if the function was modified.
    fn run(&self, module: &mut Module, function: Handle<Function>) -> Result<bool, PassError>;
}

/// Looks up a function a pass may transform.
pub(crate) fn defined_function<'m>(
    module: &'m Module,
    function: Handle<Function>,
    pass: &str,
) -> Result<&'m Function, PassError> {
    let func = module
        .functions
        .try_get(function)
        .ok_or(PassError::UnknownFunction(function.index()))?;
    if func.is_declaration() {
        return Err(PassError::NotApplicable {
            pass: pass.to_string(),
            function: func.name.clone(),
        });
    }
    Ok(func)
}

/// The instruction's name, or its opcode when unnamed, for log messages.
pub(crate) fn inst_label(func: &Function, inst: Handle<Inst>) -> String {
    let inst = &func.insts[inst];
    inst.name
        .clone()
        .unwrap_or_else(|| inst.kind.opcode().to_string())
}

/// Optimization level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptLevel {
    /// No passes.
    #[default]
    O0,
    /// Data-layout padding and loop fusion.
    O1,
    /// O1 plus auto-vectorization.
    O2,
}

impl FromStr for OptLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "O0" => Ok(OptLevel::O0),
            "1" | "O1" => Ok(OptLevel::O1),
            "2" | "O2" => Ok(OptLevel::O2),
            other => Err(format!("unknown optimization level `{other}` (expected 0, 1 or 2)")),
        }
    }
}

/// Maximum number of fixed-point iterations before giving up.
pub const MAX_ITERATIONS: usize = 10;

/// Runs passes in sequence with fixed-point iteration.
#[derive(Debug, Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Creates a pass manager with the preset pipeline for `level`.
    pub fn for_level(level: OptLevel) -> Self {
        let mut pm = Self::new();
        if level != OptLevel::O0 {
            pm.add_pass(Box::new(DataLayoutTransform));
            pm.add_pass(Box::new(LoopFusion));
        }
        if level == OptLevel::O2 {
            pm.add_pass(Box::new(AutoVectorization::default()));
        }
        pm
    }

    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Names of the scheduled passes, in order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs the pipeline on one function until nothing changes or
    /// [`MAX_ITERATIONS`] rounds have run. Returns `Ok(true)` if any pass
    /// modified the function.
    pub fn run(&self, module: &mut Module, function: Handle<Function>) -> Result<bool, PassError> {
        let mut any = false;
        for round in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                let pass_changed = pass.run(module, function)?;
                if pass_changed {
                    log::debug!("round {round}: `{}` changed the function", pass.name());
                }
                changed |= pass_changed;
            }
            if !changed {
                break;
            }
            any = true;
        }
        Ok(any)
    }

    /// Runs the pipeline on every defined function of the module.
    pub fn run_module(&self, module: &mut Module) -> Result<bool, PassError> {
        let defined: Vec<_> = module
            .functions
            .iter()
            .filter(|(_, f)| !f.is_declaration())
            .map(|(h, _)| h)
            .collect();
        let mut any = false;
        for h in defined {
            any |= self.run(module, h)?;
        }
        Ok(any)
    }
}

/// Convenience function: runs the O2 pipeline on every function.
pub fn optimize(module: &mut Module) -> Result<bool, PassError> {
    PassManager::for_level(OptLevel::O2).run_module(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use loomir_ir::Scalar;

    #[test]
    fn optimize_empty_module() {
        let mut module = Module::default();
        assert!(!optimize(&mut module).unwrap());
        assert!(module.functions.is_empty());
    }

    #[test]
    fn presets() {
        assert!(PassManager::for_level(OptLevel::O0).is_empty());
        assert_eq!(
            PassManager::for_level(OptLevel::O1).pass_names(),
            vec!["data-layout-transform", "loop-fusion"]
        );
        assert_eq!(
            PassManager::for_level(OptLevel::O2).pass_names(),
            vec!["data-layout-transform", "loop-fusion", "auto-vectorization"]
        );
    }

    #[test]
    fn parse_levels() {
        assert_eq!("2".parse::<OptLevel>(), Ok(OptLevel::O2));
        assert_eq!("O1".parse::<OptLevel>(), Ok(OptLevel::O1));
        assert!("3".parse::<OptLevel>().is_err());
    }

    #[test]
    fn declarations_are_not_applicable() {
        let mut module = Module::new();
        let void = module.types.void();
        let ptr = module.types.scalar_pointer(Scalar::F32);
        let decl = module.add_function(Function::new(
            "external",
            vec![loomir_ir::Param {
                name: "p".into(),
                ty: ptr,
                noalias: false,
            }],
            void,
        ));
        for pass in [
            Box::new(AutoVectorization::default()) as Box<dyn Pass>,
            Box::new(DataLayoutTransform),
            Box::new(LoopFusion),
            Box::new(IrValidation),
        ] {
            let err = pass.run(&mut module, decl).unwrap_err();
            assert!(matches!(err, PassError::NotApplicable { .. }), "{}", pass.name());
        }
        // The manager skips declarations instead of failing.
        assert!(!PassManager::for_level(OptLevel::O2).run_module(&mut module).unwrap());
    }
}
