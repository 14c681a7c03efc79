//! Test doubles shared by the dispatcher integration tests.
//!
//! The guest ISA is a toy 4-byte-word encoding, little endian:
//!   word == 0            return (ends the region)
//!   word & 0xff == 0xff  an encoding the translator cannot express
//!   otherwise            load-immediate: rd = word & 7, imm = word >> 8
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use orbit_hir::builder::{DecodedInst, GuestOp};
use orbit_hir::{Function, Opcode};
use orbit_jit::{
    Backend, BackendError, CompiledBlock, DecodeError, DecodedRegion, GuestMemory, MemoryError,
    RegionDecoder,
};

pub struct FlatMemory(RwLock<Vec<u8>>);

impl FlatMemory {
    pub fn new(len: usize) -> FlatMemory {
        FlatMemory(RwLock::new(vec![0; len]))
    }

    pub fn write(&self, addr: u64, bytes: &[u8]) {
        let mut mem = self.0.write().unwrap();
        mem[addr as usize..addr as usize + bytes.len()].copy_from_slice(bytes);
    }

    pub fn len_bytes(&self) -> u64 {
        self.0.read().unwrap().len() as u64
    }

    pub fn write_words(&self, addr: u64, words: &[u32]) {
        for (i, word) in words.iter().enumerate() {
            self.write(addr + 4 * i as u64, &word.to_le_bytes());
        }
    }
}

impl GuestMemory for FlatMemory {
    fn len(&self) -> u64 {
        self.0.read().unwrap().len() as u64
    }

    fn read_code(&self, addr: u64, buf: &mut [u8]) -> Result<(), MemoryError> {
        let mem = self.0.read().unwrap();
        let start = addr as usize;
        let end = start.checked_add(buf.len()).filter(|&e| e <= mem.len());
        match end {
            Some(end) => {
                buf.copy_from_slice(&mem[start..end]);
                Ok(())
            }
            None => Err(MemoryError::OutOfBounds {
                addr,
                len: buf.len(),
            }),
        }
    }
}

pub struct WordDecoder;

impl WordDecoder {
    const MAX_WORDS: usize = 64;
}

impl RegionDecoder for WordDecoder {
    fn decode(&self, mem: &dyn GuestMemory, addr: u64) -> Result<DecodedRegion, DecodeError> {
        let mut insts = Vec::new();
        for i in 0..Self::MAX_WORDS {
            let word_addr = addr + 4 * i as u64;
            let mut raw = [0u8; 4];
            mem.read_code(word_addr, &mut raw)?;
            let word = u32::from_le_bytes(raw);

            let op = if word == 0 {
                GuestOp::Return
            } else if word & 0xff == 0xff {
                GuestOp::Unsupported {
                    raw: u64::from(word),
                }
            } else {
                GuestOp::LoadImm {
                    rd: (word & 0x7) as u8,
                    imm: u64::from(word >> 8),
                }
            };
            insts.push(DecodedInst {
                addr: word_addr,
                len: 4,
                op,
                is_branch: false,
                branch_target: None,
            });
            if word == 0 {
                break;
            }
        }
        if insts.is_empty() {
            return Err(DecodeError::EmptyRegion { addr });
        }
        Ok(DecodedRegion { insts })
    }
}

/// Counts compilations; optionally rejects functions still carrying an
/// `Unimplemented` marker, the way a real backend rejects opcodes it cannot
/// lower. The emitted "code" is the function's content hash, so tests can
/// tell recompilations of changed bytes apart.
#[derive(Default)]
pub struct CountingBackend {
    pub compiles: AtomicUsize,
    pub reject_unimplemented: bool,
}

impl CountingBackend {
    pub fn rejecting() -> CountingBackend {
        CountingBackend {
            compiles: AtomicUsize::new(0),
            reject_unimplemented: true,
        }
    }

    pub fn compile_count(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }
}

impl Backend for CountingBackend {
    fn compile(&self, func: &Function) -> Result<CompiledBlock, BackendError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if self.reject_unimplemented {
            for &block in func.block_order() {
                for instr in func.block_instrs(block) {
                    if func.instr(instr).opcode == Opcode::Unimplemented {
                        return Err(BackendError::UnsupportedOpcode {
                            instr,
                            opcode: Opcode::Unimplemented,
                        });
                    }
                }
            }
        }
        Ok(CompiledBlock {
            code: func.content_hash.to_le_bytes().to_vec(),
            entry_offset: 0,
            guest_start: func.guest_start,
            guest_len: func.guest_len,
            instr_count: 0,
        })
    }
}
