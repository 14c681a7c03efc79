//! Orbit's high-level IR ("HIR") for translated guest code.
//!
//! Guest machine code is decoded externally and lowered into a [`Function`]: a
//! control-flow graph of [`Block`]s filled with [`Instr`]s operating on typed,
//! possibly-constant [`Value`]s. The graph carries explicit def/use edges so
//! the optimizer can answer "who produces this value" and "is this value dead"
//! in time proportional to the number of uses, not the size of the graph.
//!
//! Storage is arena-based: every node lives in a `Vec` inside its [`Function`]
//! and is addressed by a copyable index newtype ([`ValueId`], [`InstrId`],
//! [`BlockId`], [`LabelId`]). Links between nodes are index fields; removing a
//! node tombstones its slot and the whole graph is freed in bulk when the
//! function is dropped.
//!
//! Nothing in this crate is thread-safe by itself: a `Function` is confined to
//! the one thread building, optimizing, and lowering it. The opcode descriptor
//! table is the only shared state and is read-only for the process lifetime.

pub mod builder;
pub mod function;
pub mod instr;
pub mod opcodes;
pub mod opt;
pub mod value;

pub use builder::{build_function, BuildConfig, BuildError, DecodedInst, GuestOp};
pub use function::{Block, Function, HirError, Label};
pub use instr::{Instr, InstrFlags, Operand};
pub use opcodes::{MovTunnel, Opcode, OpcodeFlags, OpcodeInfo, OperandKind, Signature};
pub use value::{ConstantValue, Use, Value, ValueType};

/// Index of a [`Value`] within its owning [`Function`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Index of an [`Instr`] within its owning [`Function`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstrId(pub u32);

/// Index of a [`Block`] within its owning [`Function`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Index of a [`Label`] within its owning [`Function`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

impl ValueId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl InstrId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl LabelId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl std::fmt::Display for InstrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl std::fmt::Display for LabelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}
