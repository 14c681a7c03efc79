//! The opcode descriptor table.
//!
//! Every [`Instr`](crate::Instr) points at one entry of a process-lifetime,
//! read-only table of [`OpcodeInfo`] records. The descriptor encodes the
//! operand-type signature (which of dest/src1/src2/src3 hold values, labels,
//! or raw offsets) so that passes can walk operands generically instead of
//! matching on every opcode, plus attribute flags the optimizer consults
//! (side effects, control transfer, tunnelability).
//!
//! The table is never mutated after startup and is safe to share across
//! translation threads without synchronization.

use bitflags::bitflags;

/// Runtime kind of one operand slot, as declared by the opcode signature.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
    /// Slot is unused.
    None,
    /// Slot holds a [`ValueId`](crate::ValueId) and participates in def/use
    /// tracking.
    Value,
    /// Slot holds a [`LabelId`](crate::LabelId) (control-transfer target).
    Label,
    /// Slot holds a raw 64-bit immediate (context offsets, raw guest words).
    /// Offsets do not participate in def/use tracking.
    Offset,
}

impl OperandKind {
    const fn bits(self) -> u16 {
        match self {
            OperandKind::None => 0,
            OperandKind::Value => 1,
            OperandKind::Label => 2,
            OperandKind::Offset => 3,
        }
    }

    fn from_bits(bits: u16) -> OperandKind {
        match bits & 0x7 {
            0 => OperandKind::None,
            1 => OperandKind::Value,
            2 => OperandKind::Label,
            3 => OperandKind::Offset,
            _ => OperandKind::None,
        }
    }
}

/// Packed operand-type signature: four 3-bit [`OperandKind`] fields in the
/// order dest, src1, src2, src3.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature(u16);

impl Signature {
    pub const fn new(
        dest: OperandKind,
        src1: OperandKind,
        src2: OperandKind,
        src3: OperandKind,
    ) -> Self {
        Signature(dest.bits() | (src1.bits() << 3) | (src2.bits() << 6) | (src3.bits() << 9))
    }

    #[must_use]
    pub fn dest(self) -> OperandKind {
        OperandKind::from_bits(self.0)
    }

    /// Declared kind of source slot `slot` (0..3).
    #[must_use]
    pub fn src(self, slot: usize) -> OperandKind {
        debug_assert!(slot < 3);
        OperandKind::from_bits(self.0 >> (3 + 3 * slot as u16))
    }

    /// Unpack all four fields at once.
    #[must_use]
    pub fn unpack(self) -> (OperandKind, OperandKind, OperandKind, OperandKind) {
        (self.dest(), self.src(0), self.src(1), self.src(2))
    }

    /// True when both source slots hold values and the third is unused,
    /// regardless of the dest kind. This is the precondition for the binary
    /// operand-arrangement queries.
    #[must_use]
    pub fn is_binary_value(self) -> bool {
        self.src(0) == OperandKind::Value
            && self.src(1) == OperandKind::Value
            && self.src(2) == OperandKind::None
    }
}

bitflags! {
    /// Opcode attributes consulted by the optimizer.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpcodeFlags: u16 {
        /// Reads guest-visible memory.
        const MEMORY_LOAD = 1 << 0;
        /// Writes guest-visible memory; never dead-code eliminated.
        const MEMORY_STORE = 1 << 1;
        /// Reads the guest context (register file).
        const CONTEXT_LOAD = 1 << 2;
        /// Writes the guest context; never dead-code eliminated.
        const CONTEXT_STORE = 1 << 3;
        /// Transfers control within the function.
        const BRANCH = 1 << 4;
        /// Ends the function (return to dispatcher, trap).
        const TERMINATOR = 1 << 5;
        /// Has an effect the graph cannot see; never dead-code eliminated.
        const VOLATILE = 1 << 6;
    }
}

bitflags! {
    /// Trivial-copy opcode kinds a producer-chain walk may pass through.
    ///
    /// The caller states which kinds it can tolerate; the walk reports which
    /// kinds it actually traversed so the caller can judge whether the result
    /// is still bit-exact (a zero-extend tunnel changes high-bit content, an
    /// assign never does).
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MovTunnel: u8 {
        const ASSIGNS = 1 << 0;
        const ZERO_EXTEND = 1 << 1;
        const SIGN_EXTEND = 1 << 2;
        const TRUNCATE = 1 << 3;
        /// `and x, 0xFFFF_FFFF` acting as a 64→32 mask.
        const AND32_FF = 1 << 4;
    }
}

/// Descriptor shared by every instruction carrying this opcode.
#[derive(Debug)]
pub struct OpcodeInfo {
    pub name: &'static str,
    pub signature: Signature,
    pub flags: OpcodeFlags,
}

/// The HIR opcode set.
///
/// `Assign`/`ZeroExtend`/`SignExtend`/`Truncate` are the mov-tunnelable
/// copies; `Unimplemented` is the builder's marker for guest instructions the
/// decoder recognized but the translator cannot express (it traps only if
/// control actually reaches it at run time).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Nop = 0,
    Assign,
    ZeroExtend,
    SignExtend,
    Truncate,
    Not,
    Neg,
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
    CompareEq,
    CompareNe,
    LoadContext,
    StoreContext,
    Load,
    Store,
    Branch,
    BranchTrue,
    BranchFalse,
    Return,
    Unimplemented,
}

use OperandKind::{Label as L, None as X, Offset as O, Value as V};

const fn info(name: &'static str, signature: Signature, flags: OpcodeFlags) -> OpcodeInfo {
    OpcodeInfo {
        name,
        signature,
        flags,
    }
}

static OPCODE_TABLE: [OpcodeInfo; 27] = [
    info("nop", Signature::new(X, X, X, X), OpcodeFlags::empty()),
    info("assign", Signature::new(V, V, X, X), OpcodeFlags::empty()),
    info("zero_extend", Signature::new(V, V, X, X), OpcodeFlags::empty()),
    info("sign_extend", Signature::new(V, V, X, X), OpcodeFlags::empty()),
    info("truncate", Signature::new(V, V, X, X), OpcodeFlags::empty()),
    info("not", Signature::new(V, V, X, X), OpcodeFlags::empty()),
    info("neg", Signature::new(V, V, X, X), OpcodeFlags::empty()),
    info("add", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("sub", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("mul", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("and", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("or", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("xor", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("shl", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("shr", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("sar", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("compare_eq", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info("compare_ne", Signature::new(V, V, V, X), OpcodeFlags::empty()),
    info(
        "load_context",
        Signature::new(V, O, X, X),
        OpcodeFlags::CONTEXT_LOAD,
    ),
    info(
        "store_context",
        Signature::new(X, O, V, X),
        OpcodeFlags::CONTEXT_STORE,
    ),
    info("load", Signature::new(V, V, X, X), OpcodeFlags::MEMORY_LOAD),
    info(
        "store",
        Signature::new(X, V, V, X),
        OpcodeFlags::MEMORY_STORE,
    ),
    info(
        "branch",
        Signature::new(X, L, X, X),
        OpcodeFlags::BRANCH.union(OpcodeFlags::TERMINATOR),
    ),
    info("branch_true", Signature::new(X, V, L, X), OpcodeFlags::BRANCH),
    info(
        "branch_false",
        Signature::new(X, V, L, X),
        OpcodeFlags::BRANCH,
    ),
    info(
        "return",
        Signature::new(X, X, X, X),
        OpcodeFlags::TERMINATOR,
    ),
    // Not a terminator: translation continues past the marker so the rest of
    // the block still compiles; the trap fires only if execution reaches it.
    info("unimplemented", Signature::new(X, O, X, X), OpcodeFlags::VOLATILE),
];

impl Opcode {
    #[must_use]
    pub fn info(self) -> &'static OpcodeInfo {
        &OPCODE_TABLE[self as usize]
    }

    #[must_use]
    pub fn signature(self) -> Signature {
        self.info().signature
    }

    #[must_use]
    pub fn flags(self) -> OpcodeFlags {
        self.info().flags
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// True when the instruction has an observable effect beyond defining its
    /// dest value, i.e. it must survive dead-instruction elimination even when
    /// nothing reads the dest.
    #[must_use]
    pub fn has_side_effect(self) -> bool {
        self.flags().intersects(
            OpcodeFlags::MEMORY_STORE
                | OpcodeFlags::CONTEXT_STORE
                | OpcodeFlags::BRANCH
                | OpcodeFlags::TERMINATOR
                | OpcodeFlags::VOLATILE,
        )
    }

    /// The tunnel kind this opcode represents, if it is a trivial copy.
    ///
    /// `And` only counts as [`MovTunnel::AND32_FF`] when its second operand is
    /// the 32-bit all-ones constant; that check needs graph access and lives
    /// in [`Function::tunnel_movs`](crate::Function::tunnel_movs).
    #[must_use]
    pub fn tunnel_kind(self) -> Option<MovTunnel> {
        match self {
            Opcode::Assign => Some(MovTunnel::ASSIGNS),
            Opcode::ZeroExtend => Some(MovTunnel::ZERO_EXTEND),
            Opcode::SignExtend => Some(MovTunnel::SIGN_EXTEND),
            Opcode::Truncate => Some(MovTunnel::TRUNCATE),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures_round_trip() {
        let sig = Signature::new(V, O, V, L);
        assert_eq!(sig.dest(), OperandKind::Value);
        assert_eq!(sig.src(0), OperandKind::Offset);
        assert_eq!(sig.src(1), OperandKind::Value);
        assert_eq!(sig.src(2), OperandKind::Label);
    }

    #[test]
    fn table_is_indexed_by_discriminant() {
        assert_eq!(Opcode::Nop.name(), "nop");
        assert_eq!(Opcode::Unimplemented.name(), "unimplemented");
        assert_eq!(Opcode::StoreContext.signature().src(1), OperandKind::Value);
        assert!(Opcode::Store.has_side_effect());
        assert!(!Opcode::Add.has_side_effect());
    }

    #[test]
    fn binary_value_signature_ignores_dest_kind() {
        assert!(Opcode::Add.signature().is_binary_value());
        // Store also counts: both sources are values even though there is no
        // dest. Whether arranging a store's operands makes sense is the
        // caller's problem, not the signature's.
        assert!(Opcode::Store.signature().is_binary_value());
        assert!(!Opcode::BranchTrue.signature().is_binary_value());
        assert!(!Opcode::Assign.signature().is_binary_value());
    }
}
