//! Functions, blocks and the in-place mutation API used by passes.

use crate::arena::{Arena, Handle};
use crate::error::IrError;
use crate::inst::{Constant, Inst, InstKind, Literal, Value};
use crate::types::Type;

/// Per-loop annotations stored on a loop header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopHints {
    /// The loop was produced or already handled by the vectorizer.
    pub vectorized: bool,
}

/// A basic block.
#[derive(Clone, Debug)]
pub struct Block {
    pub name: String,
    pub insts: Vec<Handle<Inst>>,
    pub hints: LoopHints,
}

impl Block {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            insts: Vec::new(),
            hints: LoopHints::default(),
        }
    }
}

/// A function parameter.
#[derive(Clone, Debug)]
pub struct Param {
    pub name: String,
    pub ty: Handle<Type>,
    /// The caller guarantees that memory reached through this pointer is not
    /// reached through any other `noalias` parameter.
    pub noalias: bool,
}

/// A function: signature plus per-function arenas and a block layout.
///
/// The `layout` lists the live blocks in order; its first entry is the entry
/// block. A function with an empty layout is a declaration. Erased blocks and
/// instructions keep their arena slots but are unreachable from the layout.
#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Handle<Type>,
    pub blocks: Arena<Block>,
    pub insts: Arena<Inst>,
    pub constants: Arena<Constant>,
    pub layout: Vec<Handle<Block>>,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Handle<Type>) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            blocks: Arena::new(),
            insts: Arena::new(),
            constants: Arena::new(),
            layout: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.layout.is_empty()
    }

    pub fn entry(&self) -> Option<Handle<Block>> {
        self.layout.first().copied()
    }

    /// Position of a live block in the layout.
    pub fn position(&self, block: Handle<Block>) -> Option<usize> {
        self.layout.iter().position(|&b| b == block)
    }

    pub fn is_live_block(&self, block: Handle<Block>) -> bool {
        self.position(block).is_some()
    }

    /// Returns `true` if the instruction is still attached to a live block.
    pub fn is_live_inst(&self, inst: Handle<Inst>) -> bool {
        self.insts
            .try_get(inst)
            .and_then(|i| i.block)
            .is_some_and(|b| self.is_live_block(b))
    }

    /// First live block with the given name.
    pub fn block_by_name(&self, name: &str) -> Option<Handle<Block>> {
        self.layout
            .iter()
            .copied()
            .find(|&b| self.blocks[b].name == name)
    }

    // ----- construction -----

    /// Creates a block at the end of the layout.
    pub fn append_block(&mut self, name: impl Into<String>) -> Handle<Block> {
        let block = self.blocks.append(Block::new(name));
        self.layout.push(block);
        block
    }

    /// Creates a block placed immediately before `before` (or at the end if
    /// `before` is not in the layout).
    pub fn insert_block_before(
        &mut self,
        name: impl Into<String>,
        before: Handle<Block>,
    ) -> Handle<Block> {
        let block = self.blocks.append(Block::new(name));
        match self.position(before) {
            Some(pos) => self.layout.insert(pos, block),
            None => self.layout.push(block),
        }
        block
    }

    /// Creates a block placed immediately after `after`.
    pub fn insert_block_after(
        &mut self,
        name: impl Into<String>,
        after: Handle<Block>,
    ) -> Handle<Block> {
        let block = self.blocks.append(Block::new(name));
        match self.position(after) {
            Some(pos) => self.layout.insert(pos + 1, block),
            None => self.layout.push(block),
        }
        block
    }

    pub fn add_constant(&mut self, ty: Handle<Type>, literal: Literal) -> Value {
        Value::Const(self.constants.append(Constant { ty, literal }))
    }

    fn new_inst(
        &mut self,
        block: Handle<Block>,
        kind: InstKind,
        ty: Handle<Type>,
        name: Option<String>,
    ) -> Handle<Inst> {
        self.insts.append(Inst {
            kind,
            ty,
            name,
            block: Some(block),
        })
    }

    /// Appends an instruction at the end of `block` without any checks.
    pub fn append_inst(
        &mut self,
        block: Handle<Block>,
        kind: InstKind,
        ty: Handle<Type>,
        name: Option<String>,
    ) -> Handle<Inst> {
        let inst = self.new_inst(block, kind, ty, name);
        self.blocks[block].insts.push(inst);
        inst
    }

    /// Inserts an instruction immediately before `anchor`, in the anchor's block.
    pub fn insert_inst_before(
        &mut self,
        anchor: Handle<Inst>,
        kind: InstKind,
        ty: Handle<Type>,
        name: Option<String>,
    ) -> Result<Handle<Inst>, IrError> {
        let block = self.insts[anchor].block.ok_or(IrError::ErasedValue)?;
        let pos = self.blocks[block]
            .insts
            .iter()
            .position(|&i| i == anchor)
            .ok_or(IrError::ErasedValue)?;
        Ok(self.insert_inst_at(block, pos, kind, ty, name))
    }

    /// Inserts an instruction at position `pos` of `block` (clamped to the end).
    pub fn insert_inst_at(
        &mut self,
        block: Handle<Block>,
        pos: usize,
        kind: InstKind,
        ty: Handle<Type>,
        name: Option<String>,
    ) -> Handle<Inst> {
        let inst = self.new_inst(block, kind, ty, name);
        let insts = &mut self.blocks[block].insts;
        insts.insert(pos.min(insts.len()), inst);
        inst
    }

    /// Inserts an instruction just before the terminator of `block`, or at
    /// its end when the block is not terminated yet.
    pub fn insert_before_terminator(
        &mut self,
        block: Handle<Block>,
        kind: InstKind,
        ty: Handle<Type>,
        name: Option<String>,
    ) -> Handle<Inst> {
        let len = self.blocks[block].insts.len();
        let pos = if self.terminator(block).is_some() { len - 1 } else { len };
        self.insert_inst_at(block, pos, kind, ty, name)
    }

    /// Inserts a phi after the existing phis of `block`.
    pub fn insert_phi(
        &mut self,
        block: Handle<Block>,
        incoming: Vec<(Value, Handle<Block>)>,
        ty: Handle<Type>,
        name: Option<String>,
    ) -> Handle<Inst> {
        let pos = self.phis(block).len();
        let inst = self.new_inst(block, InstKind::Phi { incoming }, ty, name);
        self.blocks[block].insts.insert(pos, inst);
        inst
    }

    // ----- queries -----

    /// The block's terminator, if its last instruction is one.
    pub fn terminator(&self, block: Handle<Block>) -> Option<Handle<Inst>> {
        let last = *self.blocks[block].insts.last()?;
        self.insts[last].kind.is_terminator().then_some(last)
    }

    pub fn successors(&self, block: Handle<Block>) -> Vec<Handle<Block>> {
        match self.terminator(block) {
            Some(t) => {
                let mut succs = self.insts[t].kind.successors();
                succs.dedup();
                succs
            }
            None => Vec::new(),
        }
    }

    /// Live blocks branching to `block`, in layout order, each listed once.
    pub fn predecessors(&self, block: Handle<Block>) -> Vec<Handle<Block>> {
        self.layout
            .iter()
            .copied()
            .filter(|&b| self.successors(b).contains(&block))
            .collect()
    }

    /// The leading phi instructions of a block.
    pub fn phis(&self, block: Handle<Block>) -> Vec<Handle<Inst>> {
        self.blocks[block]
            .insts
            .iter()
            .copied()
            .take_while(|&i| self.insts[i].kind.is_phi())
            .collect()
    }

    pub fn try_value_type(&self, value: Value) -> Result<Handle<Type>, IrError> {
        match value {
            Value::Inst(h) => self.insts.try_get(h).map(|i| i.ty).ok_or(IrError::BadHandle {
                index: h.index(),
                size: self.insts.len(),
            }),
            Value::Param(i) => {
                self.params
                    .get(i as usize)
                    .map(|p| p.ty)
                    .ok_or(IrError::BadParam {
                        index: i,
                        count: self.params.len(),
                    })
            }
            Value::Const(h) => self
                .constants
                .try_get(h)
                .map(|c| c.ty)
                .ok_or(IrError::BadHandle {
                    index: h.index(),
                    size: self.constants.len(),
                }),
        }
    }

    /// The type of a value. Panics on a dangling value, like arena indexing.
    pub fn value_type(&self, value: Value) -> Handle<Type> {
        match value {
            Value::Inst(h) => self.insts[h].ty,
            Value::Param(i) => self.params[i as usize].ty,
            Value::Const(h) => self.constants[h].ty,
        }
    }

    /// The block defining `value`; `None` for parameters and constants.
    pub fn defining_block(&self, value: Value) -> Option<Handle<Block>> {
        value.as_inst().and_then(|h| self.insts[h].block)
    }

    /// The literal behind a constant value.
    pub fn literal(&self, value: Value) -> Option<Literal> {
        match value {
            Value::Const(h) => Some(self.constants[h].literal),
            _ => None,
        }
    }

    /// Integer value of an integer constant.
    pub fn const_int(&self, value: Value) -> Option<i64> {
        match self.literal(value)? {
            Literal::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Live instructions in layout order.
    pub fn live_insts(&self) -> impl Iterator<Item = Handle<Inst>> + '_ {
        self.layout
            .iter()
            .flat_map(|&b| self.blocks[b].insts.iter().copied())
    }

    /// Number of live instructions.
    pub fn inst_count(&self) -> usize {
        self.layout
            .iter()
            .map(|&b| self.blocks[b].insts.len())
            .sum()
    }

    /// Live instructions that use `value` as an operand.
    pub fn users(&self, value: Value) -> Vec<Handle<Inst>> {
        self.live_insts()
            .filter(|&i| self.insts[i].kind.operands().contains(&value))
            .collect()
    }

    // ----- mutation -----

    /// Rewrites every use of `old` in live instructions to `new`.
    pub fn replace_all_uses(&mut self, old: Value, new: Value) {
        let live: Vec<_> = self.live_insts().collect();
        for inst in live {
            self.insts[inst]
                .kind
                .map_operands(|v| if v == old { new } else { v });
        }
    }

    /// Detaches an instruction from its block.
    pub fn erase_inst(&mut self, inst: Handle<Inst>) {
        if let Some(block) = self.insts[inst].block.take() {
            self.blocks[block].insts.retain(|&i| i != inst);
        }
    }

    /// Removes a block from the layout, erases its instructions and drops
    /// phi entries that named it as a predecessor.
    pub fn erase_block(&mut self, block: Handle<Block>) {
        self.layout.retain(|&b| b != block);
        for inst in std::mem::take(&mut self.blocks[block].insts) {
            self.insts[inst].block = None;
        }
        let live: Vec<_> = self.live_insts().collect();
        for inst in live {
            if let InstKind::Phi { incoming } = &mut self.insts[inst].kind {
                incoming.retain(|&(_, pred)| pred != block);
            }
        }
    }

    /// Moves `block` so that it sits immediately before `before` in the layout.
    pub fn move_block_before(&mut self, block: Handle<Block>, before: Handle<Block>) {
        if block == before || !self.is_live_block(before) {
            return;
        }
        self.layout.retain(|&b| b != block);
        if let Some(pos) = self.position(before) {
            self.layout.insert(pos, block);
        }
    }

    /// Redirects `block`'s terminator edges from `from` to `to`.
    pub fn retarget(&mut self, block: Handle<Block>, from: Handle<Block>, to: Handle<Block>) -> bool {
        match self.terminator(block) {
            Some(t) => self.insts[t].kind.retarget(from, to),
            None => false,
        }
    }

    /// In every phi of `block`, renames the predecessor `old` to `new`.
    pub fn replace_phi_predecessor(
        &mut self,
        block: Handle<Block>,
        old: Handle<Block>,
        new: Handle<Block>,
    ) {
        for phi in self.phis(block) {
            if let InstKind::Phi { incoming } = &mut self.insts[phi].kind {
                for (_, pred) in incoming.iter_mut() {
                    if *pred == old {
                        *pred = new;
                    }
                }
            }
        }
    }

    /// Sets the incoming value a phi receives from `pred`.
    pub fn set_phi_incoming(&mut self, phi: Handle<Inst>, pred: Handle<Block>, value: Value) {
        if let InstKind::Phi { incoming } = &mut self.insts[phi].kind {
            for (v, p) in incoming.iter_mut() {
                if *p == pred {
                    *v = value;
                }
            }
        }
    }

    /// The value a phi receives from `pred`.
    pub fn phi_incoming(&self, phi: Handle<Inst>, pred: Handle<Block>) -> Option<Value> {
        match &self.insts[phi].kind {
            InstKind::Phi { incoming } => incoming
                .iter()
                .find(|&&(_, p)| p == pred)
                .map(|&(v, _)| v),
            _ => None,
        }
    }
}
