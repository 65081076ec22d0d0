//! Name-keyed pass registry, used for CLI `--passes` dispatch.

use crate::{AutoVectorization, DataLayoutTransform, IrValidation, LoopFusion, Pass, PassManager};

/// Creates a fresh pass instance.
pub type PassFactory = fn() -> Box<dyn Pass>;

/// Errors from registering or looking up passes.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown pass `{0}`")]
    UnknownPass(String),
    #[error("pass `{0}` is already registered")]
    Duplicate(String),
}

pub fn create_auto_vectorization_pass() -> Box<dyn Pass> {
    Box::new(AutoVectorization::default())
}

pub fn create_data_layout_transform_pass() -> Box<dyn Pass> {
    Box::new(DataLayoutTransform)
}

pub fn create_loop_fusion_pass() -> Box<dyn Pass> {
    Box::new(LoopFusion)
}

pub fn create_ir_validation_pass() -> Box<dyn Pass> {
    Box::new(IrValidation)
}

/// Registry of available passes, in registration order.
#[derive(Debug, Default)]
pub struct PassRegistry {
    entries: Vec<(String, PassFactory)>,
}

impl PassRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Creates a registry holding every built-in pass.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        let builtins: [(&str, PassFactory); 4] = [
            ("auto-vectorization", create_auto_vectorization_pass),
            ("data-layout-transform", create_data_layout_transform_pass),
            ("loop-fusion", create_loop_fusion_pass),
            ("ir-validation", create_ir_validation_pass),
        ];
        for (name, factory) in builtins {
            reg.entries.push((name.to_string(), factory));
        }
        reg
    }

    /// Registers a pass under `name`.
    pub fn register(&mut self, name: &str, factory: PassFactory) -> Result<(), RegistryError> {
        if self.entries.iter().any(|(n, _)| n == name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.entries.push((name.to_string(), factory));
        Ok(())
    }

    /// Instantiates the pass registered under `name`.
    pub fn create(&self, name: &str) -> Option<Box<dyn Pass>> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, factory)| factory())
    }

    /// Lists registered pass names.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Builds a pass manager from a comma-separated list such as
    /// `"loop-fusion,auto-vectorization"`. Blank entries are ignored.
    pub fn parse_pipeline(&self, pipeline: &str) -> Result<PassManager, RegistryError> {
        let mut pm = PassManager::new();
        for name in pipeline.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let pass = self
                .create(name)
                .ok_or_else(|| RegistryError::UnknownPass(name.to_string()))?;
            pm.add_pass(pass);
        }
        Ok(pm)
    }
}
