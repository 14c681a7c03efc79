//! The code-generation contract.
//!
//! The dispatcher is backend-agnostic: anything that can turn an optimized
//! [`Function`] into an executable artifact plugs in here. Production
//! backends emit host machine code; tests install doubles that record what
//! they were asked to compile.

use orbit_hir::{Function, InstrId, Opcode};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend cannot express this opcode. Carried per-instruction so the
    /// failure log pinpoints the offender.
    #[error("backend cannot lower {opcode:?} at {instr}")]
    UnsupportedOpcode { instr: InstrId, opcode: Opcode },
    #[error("emitted code is {len} bytes, backend limit is {max}")]
    CodeTooLarge { len: usize, max: usize },
}

/// One compiled translation unit, ready for the execution engine.
#[derive(Debug)]
pub struct CompiledBlock {
    /// Backend-defined executable artifact.
    pub code: Vec<u8>,
    /// Offset of the entry point within `code`.
    pub entry_offset: usize,
    pub guest_start: u64,
    pub guest_len: u32,
    /// Live HIR instructions at compile time, for profiling.
    pub instr_count: u32,
}

pub trait Backend: Sync {
    /// Lower one optimized function. Must not retain references into the
    /// function; the graph is dropped once the block is published.
    fn compile(&self, func: &Function) -> Result<CompiledBlock, BackendError>;
}
