//! Display implementations and text dump for debugging.

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};

use crate::Module;
use crate::arena::{Handle, UniqueArena};
use crate::func::{Block, Function};
use crate::inst::{FloatPredicate, Inst, InstKind, IntPredicate, Literal, Value};
use crate::types::{Scalar, ScalarKind, Type, TypeInner};

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Bool => write!(f, "i1"),
            ScalarKind::Sint => write!(f, "i{}", self.width * 8),
            ScalarKind::Uint => write!(f, "u{}", self.width * 8),
            ScalarKind::Float => write!(f, "f{}", self.width * 8),
        }
    }
}

impl fmt::Display for IntPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Ult => "ult",
            Self::Ule => "ule",
            Self::Ugt => "ugt",
            Self::Uge => "uge",
            Self::Slt => "slt",
            Self::Sge => "sge",
        };
        f.write_str(s)
    }
}

impl fmt::Display for FloatPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Oeq => "oeq",
            Self::Ogt => "ogt",
            Self::Oge => "oge",
            Self::Olt => "olt",
            Self::Ole => "ole",
            Self::Une => "une",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::F32(v) if v.is_nan() => write!(f, "nan"),
            Self::F32(v) if v.is_infinite() => {
                write!(f, "{}inf", if *v < 0.0 { "-" } else { "" })
            }
            Self::F32(v) => write!(f, "{v:?}"),
        }
    }
}

/// Format a type handle as a human-readable string.
pub fn format_type(types: &UniqueArena<Type>, handle: Handle<Type>) -> String {
    let Some(ty) = types.try_get(handle) else {
        return format!("<invalid type {handle:?}>");
    };
    if let (Some(name), TypeInner::Struct { .. }) = (&ty.name, &ty.inner) {
        return format!("%{name}");
    }
    format_type_inner(types, &ty.inner)
}

/// Format a `TypeInner` as a human-readable string.
pub fn format_type_inner(types: &UniqueArena<Type>, inner: &TypeInner) -> String {
    match inner {
        TypeInner::Void => "void".into(),
        TypeInner::Scalar(s) => s.to_string(),
        TypeInner::Vector { lanes, scalar } => format!("<{lanes} x {scalar}>"),
        TypeInner::Pointer { base } => format!("ptr<{}>", format_type(types, *base)),
        TypeInner::Array { base, len } => format!("[{len} x {}]", format_type(types, *base)),
        TypeInner::Struct { members } => {
            let parts: Vec<_> = members.iter().map(|&m| format_type(types, m)).collect();
            format!("{{ {} }}", parts.join(", "))
        }
    }
}

/// Printable names for every block and named value, uniquified per function.
struct Names {
    blocks: HashMap<Handle<Block>, String>,
    insts: HashMap<Handle<Inst>, String>,
}

impl Names {
    fn new(func: &Function) -> Self {
        let mut taken = HashSet::new();
        let mut unique = |base: &str| {
            let mut candidate = base.to_string();
            let mut n = 1;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{base}.{n}");
                n += 1;
            }
            candidate
        };

        let mut blocks = HashMap::new();
        for &b in &func.layout {
            blocks.insert(b, unique(&func.blocks[b].name));
        }

        let mut insts = HashMap::new();
        let mut counter = 0;
        for inst in func.live_insts() {
            let i = &func.insts[inst];
            let name = match &i.name {
                Some(name) => unique(name),
                None => {
                    let name = unique(&counter.to_string());
                    counter += 1;
                    name
                }
            };
            insts.insert(inst, name);
        }
        Self { blocks, insts }
    }

    fn block(&self, b: Handle<Block>) -> String {
        self.blocks
            .get(&b)
            .map_or_else(|| format!("%<dead {b:?}>"), |n| format!("%{n}"))
    }
}

struct Printer<'a> {
    types: &'a UniqueArena<Type>,
    func: &'a Function,
    names: Names,
}

impl Printer<'_> {
    fn value(&self, v: Value) -> String {
        match v {
            Value::Inst(h) => self
                .names
                .insts
                .get(&h)
                .map_or_else(|| format!("%<erased {h:?}>"), |n| format!("%{n}")),
            Value::Param(i) => match self.func.params.get(i as usize) {
                Some(p) => format!("%{}", p.name),
                None => format!("%<param {i}>"),
            },
            Value::Const(h) => self.func.constants[h].literal.to_string(),
        }
    }

    fn typed(&self, v: Value) -> String {
        let ty = self
            .func
            .try_value_type(v)
            .map_or_else(|_| "?".to_string(), |t| format_type(self.types, t));
        format!("{ty} {}", self.value(v))
    }

    fn inst(&self, out: &mut String, h: Handle<Inst>) -> fmt::Result {
        let inst = &self.func.insts[h];
        let ty = format_type(self.types, inst.ty);
        out.push_str("  ");
        if !self.types.is_void(inst.ty) {
            write!(out, "{} = ", self.value(Value::Inst(h)))?;
        }
        let op = inst.kind.opcode();
        match &inst.kind {
            InstKind::Alloca { allocated, align } => write!(
                out,
                "{op} {}, align {align}",
                format_type(self.types, *allocated)
            )?,
            InstKind::Load { ptr } => write!(out, "{op} {ty}, {}", self.typed(*ptr))?,
            InstKind::Store { value, ptr } => {
                write!(out, "{op} {}, {}", self.typed(*value), self.typed(*ptr))?
            }
            InstKind::Gep { base, index } => {
                write!(out, "{op} {}, {}", self.typed(*base), self.typed(*index))?
            }
            InstKind::Binary { lhs, rhs, .. } => {
                write!(out, "{op} {}, {}", self.typed(*lhs), self.value(*rhs))?
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                write!(out, "{op} {pred} {}, {}", self.typed(*lhs), self.value(*rhs))?
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                write!(out, "{op} {pred} {}, {}", self.typed(*lhs), self.value(*rhs))?
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
            } => write!(
                out,
                "{op} {}, {}, {}",
                self.typed(*cond),
                self.typed(*on_true),
                self.typed(*on_false)
            )?,
            InstKind::Phi { incoming } => {
                let parts: Vec<_> = incoming
                    .iter()
                    .map(|&(v, b)| format!("[ {}, {} ]", self.value(v), self.names.block(b)))
                    .collect();
                write!(out, "{op} {ty} {}", parts.join(", "))?
            }
            InstKind::Bitcast { value } => {
                write!(out, "{op} {} to {ty}", self.typed(*value))?
            }
            InstKind::Splat { value } => write!(out, "{op} {} to {ty}", self.typed(*value))?,
            InstKind::Call { callee, args } => {
                let parts: Vec<_> = args.iter().map(|&a| self.typed(a)).collect();
                write!(out, "{op} {ty} @{callee}({})", parts.join(", "))?
            }
            InstKind::Br { target } => write!(out, "{op} label {}", self.names.block(*target))?,
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            } => write!(
                out,
                "{op} {}, label {}, label {}",
                self.typed(*cond),
                self.names.block(*then_dest),
                self.names.block(*else_dest)
            )?,
            InstKind::Ret { value: Some(v) } => write!(out, "{op} {}", self.typed(*v))?,
            InstKind::Ret { value: None } => write!(out, "{op} void")?,
        }
        out.push('\n');
        Ok(())
    }

    fn function(&self, out: &mut String) -> fmt::Result {
        let params: Vec<_> = self
            .func
            .params
            .iter()
            .map(|p| {
                let attr = if p.noalias { " noalias" } else { "" };
                format!("{}{attr} %{}", format_type(self.types, p.ty), p.name)
            })
            .collect();
        let keyword = if self.func.is_declaration() {
            "declare"
        } else {
            "define"
        };
        write!(
            out,
            "{keyword} {} @{}({})",
            format_type(self.types, self.func.ret),
            self.func.name,
            params.join(", ")
        )?;
        if self.func.is_declaration() {
            out.push('\n');
            return Ok(());
        }
        out.push_str(" {\n");
        for &b in &self.func.layout {
            let block = &self.func.blocks[b];
            write!(out, "{}:", &self.names.block(b)[1..])?;
            if block.hints.vectorized {
                out.push_str("  ; vectorized");
            }
            out.push('\n');
            for &inst in &block.insts {
                self.inst(out, inst)?;
            }
        }
        out.push_str("}\n");
        Ok(())
    }
}

/// Dump a single function as human-readable text.
pub fn dump_function(module: &Module, handle: Handle<Function>) -> String {
    let func = &module.functions[handle];
    let printer = Printer {
        types: &module.types,
        func,
        names: Names::new(func),
    };
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = printer.function(&mut out);
    out
}

/// Dump the entire module as human-readable text.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "; loomir module");
    for (_, ty) in module.types.iter() {
        if let (Some(name), TypeInner::Struct { .. }) = (&ty.name, &ty.inner) {
            let _ = writeln!(
                out,
                "%{name} = type {}",
                format_type_inner(&module.types, &ty.inner)
            );
        }
    }
    for (handle, _) in module.functions.iter() {
        out.push('\n');
        out.push_str(&dump_function(module, handle));
    }
    out
}
