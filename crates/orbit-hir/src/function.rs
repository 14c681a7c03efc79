//! The translation unit: arenas, block/label graph, and every operation that
//! rewrites it.
//!
//! All def/use bookkeeping funnels through [`Function`]: an operand slot and
//! the referenced value's use-list are always updated together, so at any
//! point between two public calls the graph is consistent (checkable with
//! [`Function::check_consistency`]). Invariant violations are reported as
//! [`HirError`] values and abort only the compilation that tripped them.

use thiserror::Error;

use crate::instr::{Instr, InstrFlags, Operand};
use crate::opcodes::{MovTunnel, Opcode, OperandKind};
use crate::value::{ConstantValue, Use, Value, ValueType};
use crate::{BlockId, InstrId, LabelId, ValueId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HirError {
    #[error("value {value} is defined twice")]
    DoubleDefine { value: ValueId },
    #[error("instruction ordinal {ordinal} ({opcode:?}) already has a dest")]
    DestAlreadySet { opcode: Opcode, ordinal: u32 },
    #[error("{opcode:?} does not define a dest value")]
    DestUnsupported { opcode: Opcode },
    #[error("operand slot {slot} of {opcode:?} (ordinal {ordinal}) expects {expected:?}")]
    OperandKindMismatch {
        opcode: Opcode,
        ordinal: u32,
        slot: usize,
        expected: OperandKind,
    },
    #[error("type mismatch: expected {expected:?}, got {got:?}")]
    TypeMismatch { expected: ValueType, got: ValueType },
    #[error("use-record for {value} at ordinal {ordinal} slot {slot} is missing")]
    UseMissing {
        value: ValueId,
        ordinal: u32,
        slot: usize,
    },
    #[error("stray use-record for {value} at ordinal {ordinal} slot {slot}")]
    StrayUse {
        value: ValueId,
        ordinal: u32,
        slot: usize,
    },
    #[error("ordinal comparison across blocks")]
    BlocksDiffer,
    #[error("label {label} has no block yet")]
    LabelUnplaced { label: LabelId },
    #[error("label {label} already begins a block")]
    LabelAlreadyPlaced { label: LabelId },
    #[error("operation on a removed instruction")]
    RemovedInstr,
}

/// A named join point bounding a [`Block`], with the control-flow edges used
/// for graph traversal.
#[derive(Debug)]
pub struct Label {
    pub number: u32,
    pub block: Option<BlockId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
}

impl Label {
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Blocks this label's block may transfer control to.
    #[must_use]
    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }
}

/// A straight-line run of instructions with a [`Label`] at entry.
#[derive(Debug)]
pub struct Block {
    pub label: LabelId,
    pub(crate) first: Option<InstrId>,
    pub(crate) last: Option<InstrId>,
    pub(crate) ordinals_dirty: bool,
}

impl Block {
    #[must_use]
    pub fn first(&self) -> Option<InstrId> {
        self.first
    }

    #[must_use]
    pub fn last(&self) -> Option<InstrId> {
        self.last
    }
}

/// One translation unit: the blocks covering a contiguous guest code region.
#[derive(Debug)]
pub struct Function {
    pub guest_start: u64,
    pub guest_len: u32,
    /// FNV-1a 64 over the guest bytes; the cache uses it to detect
    /// self-modifying code.
    pub content_hash: u64,
    pub entry: Option<LabelId>,
    values: Vec<Value>,
    instrs: Vec<Instr>,
    blocks: Vec<Block>,
    labels: Vec<Label>,
    block_order: Vec<BlockId>,
}

impl Function {
    #[must_use]
    pub fn new(guest_start: u64, guest_len: u32, content_hash: u64) -> Function {
        Function {
            guest_start,
            guest_len,
            content_hash,
            entry: None,
            values: Vec::new(),
            instrs: Vec::new(),
            blocks: Vec::new(),
            labels: Vec::new(),
            block_order: Vec::new(),
        }
    }

    // ---- Arena accessors ------------------------------------------------

    #[must_use]
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    #[must_use]
    pub fn instr(&self, id: InstrId) -> &Instr {
        &self.instrs[id.index()]
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    #[must_use]
    pub fn label(&self, id: LabelId) -> &Label {
        &self.labels[id.index()]
    }

    /// Blocks in guest program order.
    #[must_use]
    pub fn block_order(&self) -> &[BlockId] {
        &self.block_order
    }

    /// Live (non-tombstoned) instruction count, O(instrs).
    #[must_use]
    pub fn live_instr_count(&self) -> usize {
        self.instrs.iter().filter(|i| !i.removed).count()
    }

    // ---- Creation -------------------------------------------------------

    pub fn new_value(&mut self, ty: ValueType) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value::new(ty));
        id
    }

    /// Materialize a constant: a value with a payload and no defining
    /// instruction.
    pub fn new_constant(&mut self, constant: ConstantValue) -> ValueId {
        let id = self.new_value(constant.ty());
        self.values[id.index()].constant = Some(constant);
        id
    }

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.labels.len() as u32);
        self.labels.push(Label {
            number: id.0,
            block: None,
            predecessors: Vec::new(),
            successors: Vec::new(),
        });
        id
    }

    /// Open a new block at `label`, appended to the program order.
    pub fn new_block(&mut self, label: LabelId) -> Result<BlockId, HirError> {
        if self.labels[label.index()].block.is_some() {
            return Err(HirError::LabelAlreadyPlaced { label });
        }
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            label,
            first: None,
            last: None,
            ordinals_dirty: false,
        });
        self.labels[label.index()].block = Some(id);
        self.block_order.push(id);
        Ok(id)
    }

    /// Append a fresh instruction to `block`. Operands start empty; populate
    /// them with [`set_dest`](Self::set_dest) / [`set_src`](Self::set_src).
    pub fn append_instr(&mut self, block: BlockId, opcode: Opcode, flags: InstrFlags) -> InstrId {
        let id = InstrId(self.instrs.len() as u32);
        let last = self.blocks[block.index()].last;
        let mut instr = Instr::new(block, opcode, flags);
        instr.prev = last;
        instr.ordinal = match last {
            Some(l) => self.instrs[l.index()].ordinal + 1,
            None => 0,
        };
        self.instrs.push(instr);
        match last {
            Some(l) => self.instrs[l.index()].next = Some(id),
            None => self.blocks[block.index()].first = Some(id),
        }
        self.blocks[block.index()].last = Some(id);
        id
    }

    /// Insert a fresh instruction immediately before `other`, in the same
    /// block. Used by passes that materialize new code mid-block.
    pub fn insert_instr_before(
        &mut self,
        other: InstrId,
        opcode: Opcode,
        flags: InstrFlags,
    ) -> Result<InstrId, HirError> {
        if self.instrs[other.index()].removed {
            return Err(HirError::RemovedInstr);
        }
        let block = self.instrs[other.index()].block;
        let id = InstrId(self.instrs.len() as u32);
        self.instrs.push(Instr::new(block, opcode, flags));
        self.link_before(id, other);
        Ok(id)
    }

    // ---- Operand and dest rewriting -------------------------------------

    /// Define `value` as the result of `instr`, asserting single assignment.
    pub fn set_dest(&mut self, instr: InstrId, value: ValueId) -> Result<(), HirError> {
        let (opcode, ordinal) = {
            let i = &self.instrs[instr.index()];
            (i.opcode, i.ordinal)
        };
        if opcode.signature().dest() != OperandKind::Value {
            return Err(HirError::DestUnsupported { opcode });
        }
        if self.instrs[instr.index()].dest.is_some() {
            return Err(HirError::DestAlreadySet { opcode, ordinal });
        }
        if self.values[value.index()].def.is_some() {
            return Err(HirError::DoubleDefine { value });
        }
        self.values[value.index()].def = Some(instr);
        self.instrs[instr.index()].dest = Some(value);
        Ok(())
    }

    /// Rewrite operand slot `slot` of `instr`, detaching any previous
    /// use-edge on that slot before attaching the new one.
    pub fn set_src(&mut self, instr: InstrId, slot: usize, operand: Operand) -> Result<(), HirError> {
        let (opcode, ordinal) = {
            let i = &self.instrs[instr.index()];
            if i.removed {
                return Err(HirError::RemovedInstr);
            }
            (i.opcode, i.ordinal)
        };
        let expected = opcode.signature().src(slot);
        let kind_ok = match operand {
            Operand::None => true,
            Operand::Value(_) => expected == OperandKind::Value,
            Operand::Label(_) => expected == OperandKind::Label,
            Operand::Offset(_) => expected == OperandKind::Offset,
        };
        if !kind_ok {
            return Err(HirError::OperandKindMismatch {
                opcode,
                ordinal,
                slot,
                expected,
            });
        }

        let old = self.instrs[instr.index()].srcs[slot];
        if let Operand::Value(v) = old {
            self.detach_use(v, instr, slot)?;
        }
        self.instrs[instr.index()].srcs[slot] = operand;
        if let Operand::Value(v) = operand {
            self.values[v.index()].uses.push(Use { instr, slot });
        }
        Ok(())
    }

    pub fn set_src_value(
        &mut self,
        instr: InstrId,
        slot: usize,
        value: ValueId,
    ) -> Result<(), HirError> {
        self.set_src(instr, slot, Operand::Value(value))
    }

    /// Swap the opcode descriptor in place, keeping the instruction node and
    /// any operands whose kind still agrees with the new signature. Slots the
    /// new signature declares unused are detached automatically.
    pub fn replace_opcode(
        &mut self,
        instr: InstrId,
        opcode: Opcode,
        flags: InstrFlags,
    ) -> Result<(), HirError> {
        let ordinal = {
            let i = &self.instrs[instr.index()];
            if i.removed {
                return Err(HirError::RemovedInstr);
            }
            i.ordinal
        };
        let sig = opcode.signature();

        if self.instrs[instr.index()].dest.is_some() && sig.dest() != OperandKind::Value {
            return Err(HirError::DestUnsupported { opcode });
        }

        for slot in 0..3 {
            let operand = self.instrs[instr.index()].srcs[slot];
            let expected = sig.src(slot);
            let ok = match operand {
                Operand::None => true,
                Operand::Value(_) => expected == OperandKind::Value,
                Operand::Label(_) => expected == OperandKind::Label,
                Operand::Offset(_) => expected == OperandKind::Offset,
            };
            if ok {
                continue;
            }
            if expected == OperandKind::None {
                // Slot no longer exists under the new signature; detach it.
                if let Operand::Value(v) = operand {
                    self.detach_use(v, instr, slot)?;
                }
                self.instrs[instr.index()].srcs[slot] = Operand::None;
            } else {
                return Err(HirError::OperandKindMismatch {
                    opcode,
                    ordinal,
                    slot,
                    expected,
                });
            }
        }

        let i = &mut self.instrs[instr.index()];
        i.opcode = opcode;
        i.flags = flags;
        Ok(())
    }

    /// Rewrite every use of `old` to reference `new`, leaving `old` with zero
    /// uses (and thus eligible for reclamation).
    pub fn replace_uses_with(&mut self, old: ValueId, new: ValueId) -> Result<(), HirError> {
        if old == new {
            return Ok(());
        }
        let old_ty = self.values[old.index()].ty;
        let new_ty = self.values[new.index()].ty;
        if old_ty != new_ty {
            return Err(HirError::TypeMismatch {
                expected: old_ty,
                got: new_ty,
            });
        }
        let uses = std::mem::take(&mut self.values[old.index()].uses);
        for u in &uses {
            self.instrs[u.instr.index()].srcs[u.slot] = Operand::Value(new);
        }
        self.values[new.index()].uses.extend(uses);
        Ok(())
    }

    /// Detach `instr` from its block and release every use-edge its operands
    /// hold. Does not recursively free now-dead producers; that is the
    /// dead-instruction-elimination pass's job.
    pub fn remove_instr(&mut self, instr: InstrId) -> Result<(), HirError> {
        if self.instrs[instr.index()].removed {
            return Err(HirError::RemovedInstr);
        }
        for slot in 0..3 {
            if let Operand::Value(v) = self.instrs[instr.index()].srcs[slot] {
                self.detach_use(v, instr, slot)?;
                self.instrs[instr.index()].srcs[slot] = Operand::None;
            }
        }
        if let Some(dest) = self.instrs[instr.index()].dest.take() {
            self.values[dest.index()].def = None;
        }
        self.unlink(instr);
        self.instrs[instr.index()].removed = true;
        Ok(())
    }

    // ---- List surgery ---------------------------------------------------

    /// Relink `instr` immediately before `other`, possibly across blocks.
    /// O(1); ordinals are renumbered lazily on the next comparison.
    pub fn move_before(&mut self, instr: InstrId, other: InstrId) -> Result<(), HirError> {
        if self.instrs[instr.index()].removed || self.instrs[other.index()].removed {
            return Err(HirError::RemovedInstr);
        }
        self.unlink(instr);
        self.link_before(instr, other);
        Ok(())
    }

    /// Relink `instr` immediately after `other`, possibly across blocks.
    pub fn move_after(&mut self, instr: InstrId, other: InstrId) -> Result<(), HirError> {
        if self.instrs[instr.index()].removed || self.instrs[other.index()].removed {
            return Err(HirError::RemovedInstr);
        }
        self.unlink(instr);
        let block = self.instrs[other.index()].block;
        let next = self.instrs[other.index()].next;
        self.instrs[instr.index()].block = block;
        self.instrs[instr.index()].prev = Some(other);
        self.instrs[instr.index()].next = next;
        self.instrs[other.index()].next = Some(instr);
        match next {
            Some(n) => self.instrs[n.index()].prev = Some(instr),
            None => self.blocks[block.index()].last = Some(instr),
        }
        self.blocks[block.index()].ordinals_dirty = true;
        Ok(())
    }

    /// True when `a` executes before `b` within their common block.
    /// Renumbers the block's ordinals first if list surgery dirtied them.
    pub fn is_before(&mut self, a: InstrId, b: InstrId) -> Result<bool, HirError> {
        let block = self.instrs[a.index()].block;
        if self.instrs[b.index()].block != block {
            return Err(HirError::BlocksDiffer);
        }
        if self.blocks[block.index()].ordinals_dirty {
            self.renumber_ordinals(block);
        }
        Ok(self.instrs[a.index()].ordinal < self.instrs[b.index()].ordinal)
    }

    fn renumber_ordinals(&mut self, block: BlockId) {
        let mut ordinal = 0u32;
        let mut cursor = self.blocks[block.index()].first;
        while let Some(id) = cursor {
            self.instrs[id.index()].ordinal = ordinal;
            ordinal += 1;
            cursor = self.instrs[id.index()].next;
        }
        self.blocks[block.index()].ordinals_dirty = false;
    }

    fn unlink(&mut self, instr: InstrId) {
        let block = self.instrs[instr.index()].block;
        let prev = self.instrs[instr.index()].prev.take();
        let next = self.instrs[instr.index()].next.take();
        match prev {
            Some(p) => self.instrs[p.index()].next = next,
            None => self.blocks[block.index()].first = next,
        }
        match next {
            Some(n) => self.instrs[n.index()].prev = prev,
            None => self.blocks[block.index()].last = prev,
        }
    }

    fn link_before(&mut self, instr: InstrId, other: InstrId) {
        let block = self.instrs[other.index()].block;
        let prev = self.instrs[other.index()].prev;
        self.instrs[instr.index()].block = block;
        self.instrs[instr.index()].prev = prev;
        self.instrs[instr.index()].next = Some(other);
        self.instrs[other.index()].prev = Some(instr);
        match prev {
            Some(p) => self.instrs[p.index()].next = Some(instr),
            None => self.blocks[block.index()].first = Some(instr),
        }
        self.blocks[block.index()].ordinals_dirty = true;
    }

    fn detach_use(&mut self, value: ValueId, instr: InstrId, slot: usize) -> Result<(), HirError> {
        let uses = &mut self.values[value.index()].uses;
        let pos = uses.iter().position(|u| u.instr == instr && u.slot == slot);
        match pos {
            Some(pos) => {
                uses.swap_remove(pos);
                Ok(())
            }
            None => Err(HirError::UseMissing {
                value,
                ordinal: self.instrs[instr.index()].ordinal,
                slot,
            }),
        }
    }

    // ---- Control-flow edges ---------------------------------------------

    /// Record that `from` may transfer control to the block at `to`.
    pub fn add_cfg_edge(&mut self, from: BlockId, to: LabelId) -> Result<(), HirError> {
        let to_block = self.labels[to.index()]
            .block
            .ok_or(HirError::LabelUnplaced { label: to })?;
        let from_label = self.blocks[from.index()].label;
        let succs = &mut self.labels[from_label.index()].successors;
        if !succs.contains(&to_block) {
            succs.push(to_block);
        }
        let preds = &mut self.labels[to.index()].predecessors;
        if !preds.contains(&from) {
            preds.push(from);
        }
        Ok(())
    }

    /// Drop the edge recorded by [`add_cfg_edge`](Self::add_cfg_edge), e.g.
    /// after folding a conditional branch whose condition is constant.
    pub fn remove_cfg_edge(&mut self, from: BlockId, to: LabelId) -> Result<(), HirError> {
        let to_block = self.labels[to.index()]
            .block
            .ok_or(HirError::LabelUnplaced { label: to })?;
        let from_label = self.blocks[from.index()].label;
        self.labels[from_label.index()]
            .successors
            .retain(|&b| b != to_block);
        self.labels[to.index()].predecessors.retain(|&b| b != from);
        Ok(())
    }

    // ---- Queries --------------------------------------------------------

    /// Follow `value`'s producer chain through pure assigns, returning the
    /// ultimate value.
    #[must_use]
    pub fn skip_assigns(&self, value: ValueId) -> ValueId {
        self.tunnel_movs(value, MovTunnel::ASSIGNS).0
    }

    /// Like [`skip_assigns`](Self::skip_assigns), but returns the first
    /// non-assign producer instruction (`None` when the chain ends at a
    /// value with no definer, e.g. a constant or parameter).
    #[must_use]
    pub fn skip_assigns_to_definer(&self, value: ValueId) -> Option<InstrId> {
        let v = self.skip_assigns(value);
        self.values[v.index()].def
    }

    /// Follow `value`'s producer chain through the caller-allowed tunnel
    /// kinds, returning the ultimate value plus the set of kinds actually
    /// traversed.
    ///
    /// The traversed set is the caller's evidence for bit-exactness: an
    /// empty or `ASSIGNS`-only set means the result holds the identical bit
    /// pattern; any widening/narrowing kind means it does not.
    #[must_use]
    pub fn tunnel_movs(&self, value: ValueId, allowed: MovTunnel) -> (ValueId, MovTunnel) {
        let mut current = value;
        let mut traversed = MovTunnel::empty();
        loop {
            let Some(def) = self.values[current.index()].def else {
                return (current, traversed);
            };
            let instr = &self.instrs[def.index()];
            let step = match instr.opcode.tunnel_kind() {
                Some(kind) => kind,
                None if instr.opcode == Opcode::And => {
                    // `and x, 0xFFFF_FFFF` on a 64-bit value acts as a
                    // tunnelable 32-bit mask.
                    match self.and32ff_source(def) {
                        Some(_) => MovTunnel::AND32_FF,
                        None => return (current, traversed),
                    }
                }
                None => return (current, traversed),
            };
            if !allowed.contains(step) {
                return (current, traversed);
            }
            let src = if step == MovTunnel::AND32_FF {
                match self.and32ff_source(def) {
                    Some(src) => src,
                    None => return (current, traversed),
                }
            } else {
                match instr.srcs[0].as_value() {
                    Some(src) => src,
                    None => return (current, traversed),
                }
            };
            traversed |= step;
            current = src;
        }
    }

    /// Like [`tunnel_movs`](Self::tunnel_movs), but returns the first
    /// producer outside the allowed set.
    #[must_use]
    pub fn tunnel_movs_to_definer(
        &self,
        value: ValueId,
        allowed: MovTunnel,
    ) -> (Option<InstrId>, MovTunnel) {
        let (v, traversed) = self.tunnel_movs(value, allowed);
        (self.values[v.index()].def, traversed)
    }

    /// The non-constant operand of an `and x, 0xFFFF_FFFF` over i64, if this
    /// instruction is one.
    fn and32ff_source(&self, instr: InstrId) -> Option<ValueId> {
        let i = &self.instrs[instr.index()];
        if i.opcode != Opcode::And {
            return None;
        }
        let (c, var) = self.arrange_as_const_and_var(instr)?;
        let cv = self.values[c.index()].constant?;
        if cv == ConstantValue::I64(0xffff_ffff) && self.values[var.index()].ty == ValueType::I64 {
            Some(var)
        } else {
            None
        }
    }

    /// Classify a binary-value instruction's operand pair by `pred`:
    /// `Some((matching, other))` iff exactly one operand satisfies it.
    ///
    /// Zero or two matches return `None` by design; symmetric cases are the
    /// caller's problem, not this helper's.
    #[must_use]
    pub fn arrange_by_predicate_exclusive(
        &self,
        instr: InstrId,
        mut pred: impl FnMut(ValueId) -> bool,
    ) -> Option<(ValueId, ValueId)> {
        let i = &self.instrs[instr.index()];
        if !i.opcode.signature().is_binary_value() {
            return None;
        }
        let a = i.srcs[0].as_value()?;
        let b = i.srcs[1].as_value()?;
        match (pred(a), pred(b)) {
            (true, false) => Some((a, b)),
            (false, true) => Some((b, a)),
            _ => None,
        }
    }

    /// `Some((constant, variable))` iff exactly one operand is constant,
    /// regardless of which source slot held it.
    #[must_use]
    pub fn arrange_as_const_and_var(&self, instr: InstrId) -> Option<(ValueId, ValueId)> {
        self.arrange_by_predicate_exclusive(instr, |v| self.values[v.index()].is_constant())
    }

    /// `Some((defined_by_op, other))` iff exactly one operand's producer has
    /// opcode `op`. Detects algebraic patterns like `(x + c1) + c2`.
    #[must_use]
    pub fn arrange_by_defining_opcode(
        &self,
        instr: InstrId,
        op: Opcode,
    ) -> Option<(ValueId, ValueId)> {
        self.arrange_by_predicate_exclusive(instr, |v| {
            self.values[v.index()]
                .def
                .is_some_and(|d| self.instrs[d.index()].opcode == op)
        })
    }

    /// `Some((defined_by_op, constant))` iff one operand's producer has
    /// opcode `op` and the other is constant.
    #[must_use]
    pub fn arrange_by_def_op_and_constant(
        &self,
        instr: InstrId,
        op: Opcode,
    ) -> Option<(ValueId, ValueId)> {
        let (by_op, other) = self.arrange_by_defining_opcode(instr, op)?;
        if self.values[other.index()].is_constant() {
            Some((by_op, other))
        } else {
            None
        }
    }

    /// Invoke `f` with `(value, slot)` for each populated value-typed operand
    /// slot, decoding the opcode signature once.
    pub fn visit_value_operands(&self, instr: InstrId, mut f: impl FnMut(ValueId, usize)) {
        let i = &self.instrs[instr.index()];
        let sig = i.opcode.signature();
        for slot in 0..3 {
            if sig.src(slot) != OperandKind::Value {
                continue;
            }
            if let Operand::Value(v) = i.srcs[slot] {
                f(v, slot);
            }
        }
    }

    /// Iterate the live instructions of `block` in program order.
    pub fn block_instrs(&self, block: BlockId) -> impl Iterator<Item = InstrId> + '_ {
        let mut cursor = self.blocks[block.index()].first;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.instrs[id.index()].next;
            Some(id)
        })
    }

    /// Iterate the live instructions of `block` in reverse program order.
    pub fn block_instrs_rev(&self, block: BlockId) -> impl Iterator<Item = InstrId> + '_ {
        let mut cursor = self.blocks[block.index()].last;
        std::iter::from_fn(move || {
            let id = cursor?;
            cursor = self.instrs[id.index()].prev;
            Some(id)
        })
    }

    // ---- Validation -----------------------------------------------------

    /// Cross-check every operand slot against every use-list.
    ///
    /// For all values v and instructions i with an operand referencing v,
    /// v's use-set must contain exactly one record for (i, slot) and no
    /// record for a slot that no longer references v.
    pub fn check_consistency(&self) -> Result<(), HirError> {
        for (idx, instr) in self.instrs.iter().enumerate() {
            if instr.removed {
                continue;
            }
            let id = InstrId(idx as u32);
            for slot in 0..3 {
                let Operand::Value(v) = instr.srcs[slot] else {
                    continue;
                };
                let records = self.values[v.index()]
                    .uses
                    .iter()
                    .filter(|u| u.instr == id && u.slot == slot)
                    .count();
                if records != 1 {
                    return Err(HirError::UseMissing {
                        value: v,
                        ordinal: instr.ordinal,
                        slot,
                    });
                }
            }
            if let Some(dest) = instr.dest {
                if self.values[dest.index()].def != Some(id) {
                    return Err(HirError::DoubleDefine { value: dest });
                }
            }
        }
        for (idx, value) in self.values.iter().enumerate() {
            let vid = ValueId(idx as u32);
            for u in &value.uses {
                let instr = &self.instrs[u.instr.index()];
                if instr.removed || instr.srcs[u.slot] != Operand::Value(vid) {
                    return Err(HirError::StrayUse {
                        value: vid,
                        ordinal: instr.ordinal,
                        slot: u.slot,
                    });
                }
            }
            if let Some(def) = value.def {
                if self.instrs[def.index()].dest != Some(vid) {
                    return Err(HirError::DoubleDefine { value: vid });
                }
            }
        }
        Ok(())
    }

    /// Turn `value` into a constant in place. Used by folding passes after
    /// they prove the producer computes `constant`.
    pub fn make_constant(&mut self, value: ValueId, constant: ConstantValue) -> Result<(), HirError> {
        let ty = self.values[value.index()].ty;
        if constant.ty() != ty {
            return Err(HirError::TypeMismatch {
                expected: ty,
                got: constant.ty(),
            });
        }
        self.values[value.index()].constant = Some(constant);
        Ok(())
    }
}
