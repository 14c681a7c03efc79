//! Instruction records.
//!
//! An [`Instr`] is a slot in its function's instruction arena: an opcode
//! descriptor index, up to three operand slots, and intrusive prev/next links
//! ordering it within its owning block. All mutation goes through
//! [`Function`](crate::Function) so the def/use bookkeeping stays consistent;
//! this module only defines the storage.

use bitflags::bitflags;

use crate::opcodes::Opcode;
use crate::{BlockId, InstrId, LabelId, ValueId};

bitflags! {
    /// Per-instruction option bits for opcode-specific behavior.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct InstrFlags: u16 {
        /// Treat operands as unsigned where signedness matters.
        const UNSIGNED = 1 << 0;
        /// Keep this instruction even if its dest is unused.
        const VOLATILE = 1 << 1;
    }
}

/// One operand slot. The opcode signature dictates which variant a populated
/// slot may hold; [`Function::set_src`](crate::Function::set_src) enforces the
/// agreement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Operand {
    #[default]
    None,
    Value(ValueId),
    Label(LabelId),
    Offset(u64),
}

impl Operand {
    #[must_use]
    pub fn as_value(self) -> Option<ValueId> {
        match self {
            Operand::Value(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_label(self) -> Option<LabelId> {
        match self {
            Operand::Label(l) => Some(l),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_offset(self) -> Option<u64> {
        match self {
            Operand::Offset(o) => Some(o),
            _ => None,
        }
    }
}

/// An instruction node.
///
/// `ordinal` orders instructions within their block for cheap before/after
/// queries; it is renumbered lazily after list surgery, not on every move.
#[derive(Clone, Debug)]
pub struct Instr {
    pub block: BlockId,
    pub(crate) prev: Option<InstrId>,
    pub(crate) next: Option<InstrId>,
    pub opcode: Opcode,
    pub flags: InstrFlags,
    pub(crate) ordinal: u32,
    pub dest: Option<ValueId>,
    pub srcs: [Operand; 3],
    /// Tombstone: the arena slot of a removed instruction stays allocated but
    /// is unreachable through block links.
    pub(crate) removed: bool,
}

impl Instr {
    pub(crate) fn new(block: BlockId, opcode: Opcode, flags: InstrFlags) -> Instr {
        Instr {
            block,
            prev: None,
            next: None,
            opcode,
            flags,
            ordinal: 0,
            dest: None,
            srcs: [Operand::None; 3],
            removed: false,
        }
    }

    #[must_use]
    pub fn next(&self) -> Option<InstrId> {
        self.next
    }

    #[must_use]
    pub fn prev(&self) -> Option<InstrId> {
        self.prev
    }

    #[must_use]
    pub fn src(&self, slot: usize) -> Operand {
        self.srcs[slot]
    }

    #[must_use]
    pub fn src_value(&self, slot: usize) -> Option<ValueId> {
        self.srcs[slot].as_value()
    }
}
