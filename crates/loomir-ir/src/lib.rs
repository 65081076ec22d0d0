//! loomir intermediate representation.
//!
//! A typed SSA IR of functions made of basic blocks, with arena-allocated
//! nodes referenced by [`Handle`]s. Provides a checked builder, CFG and
//! dominance queries, a verifier, a text dump and a reference interpreter.

pub mod arena;
mod builder;
mod cfg;
mod display;
mod dominance;
mod error;
mod func;
mod inst;
mod interp;
mod typeck;
mod types;
mod verify;

pub use arena::{Arena, Handle, UniqueArena};
pub use builder::FunctionBuilder;
pub use cfg::ControlFlowGraph;
pub use display::{dump_function, dump_module, format_type, format_type_inner};
pub use dominance::DominatorTree;
pub use error::{IrError, VerifyError, VerifyErrorKind};
pub use func::{Block, Function, LoopHints, Param};
pub use inst::{BinaryOp, Constant, FloatPredicate, Inst, InstKind, IntPredicate, Literal, Value};
pub use interp::{DEFAULT_STEP_LIMIT, InterpError, Interpreter, Memory, Pointer, RtValue};
pub use types::{Bytes, POINTER_BYTES, Scalar, ScalarKind, Type, TypeInner, align_to};
pub use verify::{verify_function, verify_module};

/// A loomir IR module.
#[derive(Clone, Debug, Default)]
pub struct Module {
    /// Deduplicated type arena.
    pub types: UniqueArena<Type>,
    /// Defined and declared functions. Names are unique.
    pub functions: Arena<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function_by_name(&self, name: &str) -> Option<Handle<Function>> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(h, _)| h)
    }

    /// `base` if no function has that name yet, otherwise `base.N` for the
    /// smallest free `N`.
    pub fn unique_function_name(&self, base: &str) -> String {
        if self.function_by_name(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}.{n}"))
            .find(|name| self.function_by_name(name).is_none())
            .unwrap_or_else(|| base.to_string())
    }

    /// Adds a function, renaming it if its name is already taken.
    pub fn add_function(&mut self, mut func: Function) -> Handle<Function> {
        func.name = self.unique_function_name(&func.name);
        self.functions.append(func)
    }
}
