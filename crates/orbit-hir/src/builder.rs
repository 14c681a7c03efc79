//! Lowers a decoded guest instruction stream into a [`Function`].
//!
//! The decoder is an external collaborator: it hands us one contiguous guest
//! region as a sequence of [`DecodedInst`] records (opcode, operand fields,
//! branch info) which we consume strictly in order. The builder produces the
//! control-flow graph: exactly one [`Label`](crate::Label) per branch target,
//! blocks in guest program order, and guest-visible side effects (context and
//! memory writes) each lowered to their own instruction. No folding happens
//! here; that is the optimizer's job.
//!
//! Guest registers are modeled as context slots accessed through
//! `LoadContext`/`StoreContext` with a byte offset. Within one block the
//! builder forwards the value last stored to a slot instead of reloading it;
//! that is SSA construction, not optimization, and keeps the graph honest
//! across block boundaries.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::function::{Function, HirError};
use crate::instr::{InstrFlags, Operand};
use crate::opcodes::Opcode;
use crate::value::{ConstantValue, ValueType};
use crate::{BlockId, LabelId, ValueId};

/// Integer ALU operations the decoder can express.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Sar,
}

impl AluOp {
    fn opcode(self) -> Opcode {
        match self {
            AluOp::Add => Opcode::Add,
            AluOp::Sub => Opcode::Sub,
            AluOp::Mul => Opcode::Mul,
            AluOp::And => Opcode::And,
            AluOp::Or => Opcode::Or,
            AluOp::Xor => Opcode::Xor,
            AluOp::Shl => Opcode::Shl,
            AluOp::Shr => Opcode::Shr,
            AluOp::Sar => Opcode::Sar,
        }
    }
}

/// Decoded operation of one guest instruction.
#[derive(Clone, Copy, Debug)]
pub enum GuestOp {
    /// `rd <- imm`
    LoadImm { rd: u8, imm: u64 },
    /// `rd <- ra op rb`
    AluRegReg { op: AluOp, rd: u8, ra: u8, rb: u8 },
    /// `rd <- ra op imm`
    AluRegImm { op: AluOp, rd: u8, ra: u8, imm: u64 },
    /// `rd <- mem[ra + disp]`
    Load { rd: u8, ra: u8, disp: u64 },
    /// `mem[ra + disp] <- rs`
    Store { rs: u8, ra: u8, disp: u64 },
    /// Unconditional branch; target carried by the record.
    Jump,
    /// Branch when `cond != 0`; target carried by the record.
    BranchNonZero { cond: u8 },
    /// Leave the translated region.
    Return,
    /// Decoder recognized the encoding but the translator cannot express it.
    Unsupported { raw: u64 },
}

/// One record of the decoder → builder stream.
#[derive(Clone, Copy, Debug)]
pub struct DecodedInst {
    pub addr: u64,
    /// Encoded length in guest bytes.
    pub len: u32,
    pub op: GuestOp,
    pub is_branch: bool,
    pub branch_target: Option<u64>,
}

#[derive(Clone, Copy, Debug)]
pub struct BuildConfig {
    /// Number of 8-byte guest context slots (the register file size).
    pub context_slots: u32,
    /// Maximum decoded instructions per translation unit.
    pub max_insts: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            context_slots: 32,
            max_insts: 4096,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("decoded region is empty")]
    EmptyRegion,
    #[error("region has {count} instructions, limit is {max}")]
    TooManyInstructions { count: usize, max: usize },
    #[error("branch at {addr:#x} targets {target:#x}, outside the region")]
    BranchTargetOutOfRegion { addr: u64, target: u64 },
    #[error("branch at {addr:#x} has no target")]
    MissingBranchTarget { addr: u64 },
    #[error("guest register r{reg} exceeds the {max}-slot context")]
    ContextSlotOutOfRange { reg: u8, max: u32 },
    #[error(transparent)]
    Hir(#[from] HirError),
}

/// Build a [`Function`] from one decoded guest region.
///
/// `content_hash` is stored on the function for the translation cache; the
/// builder itself never sees raw guest bytes.
pub fn build_function(
    insts: &[DecodedInst],
    config: &BuildConfig,
    content_hash: u64,
) -> Result<Function, BuildError> {
    if insts.is_empty() {
        return Err(BuildError::EmptyRegion);
    }
    if insts.len() > config.max_insts {
        return Err(BuildError::TooManyInstructions {
            count: insts.len(),
            max: config.max_insts,
        });
    }

    let start = insts[0].addr;
    let last = insts[insts.len() - 1];
    let guest_len = (last.addr + u64::from(last.len) - start) as u32;
    let end = start + u64::from(guest_len);

    // Pass 1: block leaders. The region start, every in-region branch target,
    // and the instruction after any branch or region exit begin a block.
    let mut leaders: BTreeSet<u64> = BTreeSet::new();
    leaders.insert(start);
    for inst in insts {
        if inst.is_branch {
            let target = inst
                .branch_target
                .ok_or(BuildError::MissingBranchTarget { addr: inst.addr })?;
            if target < start || target >= end {
                return Err(BuildError::BranchTargetOutOfRegion {
                    addr: inst.addr,
                    target,
                });
            }
            leaders.insert(target);
            leaders.insert(inst.addr + u64::from(inst.len));
        } else if matches!(inst.op, GuestOp::Return) {
            leaders.insert(inst.addr + u64::from(inst.len));
        }
    }
    leaders.retain(|&addr| addr < end);

    let mut func = Function::new(start, guest_len, content_hash);
    let mut blocks_by_addr: HashMap<u64, (BlockId, LabelId)> = HashMap::new();
    for &addr in &leaders {
        let label = func.new_label();
        let block = func.new_block(label)?;
        blocks_by_addr.insert(addr, (block, label));
    }
    let entry_label = blocks_by_addr[&start].1;
    func.entry = Some(entry_label);

    let mut lower = Lowerer {
        func,
        config,
        blocks_by_addr: &blocks_by_addr,
        block: blocks_by_addr[&start].0,
        reg_cache: HashMap::new(),
        block_closed: false,
    };

    for inst in insts {
        lower.start_block_if_leader(inst.addr)?;
        lower.lower_inst(inst)?;
    }
    lower.finish()?;

    Ok(lower.func)
}

struct Lowerer<'a> {
    func: Function,
    config: &'a BuildConfig,
    blocks_by_addr: &'a HashMap<u64, (BlockId, LabelId)>,
    block: BlockId,
    /// Last value stored to each context slot within the current block.
    reg_cache: HashMap<u8, ValueId>,
    /// The current block already ended with an unconditional transfer.
    block_closed: bool,
}

impl Lowerer<'_> {
    fn start_block_if_leader(&mut self, addr: u64) -> Result<(), BuildError> {
        let Some(&(block, label)) = self.blocks_by_addr.get(&addr) else {
            return Ok(());
        };
        if block == self.block {
            return Ok(());
        }
        // Falling off the previous block into a leader needs an explicit
        // transfer; blocks never fall through implicitly.
        if !self.block_closed {
            let branch = self.func.append_instr(self.block, Opcode::Branch, InstrFlags::empty());
            self.func.set_src(branch, 0, Operand::Label(label))?;
            self.func.add_cfg_edge(self.block, label)?;
        }
        self.block = block;
        self.block_closed = false;
        self.reg_cache.clear();
        Ok(())
    }

    fn lower_inst(&mut self, inst: &DecodedInst) -> Result<(), BuildError> {
        match inst.op {
            GuestOp::LoadImm { rd, imm } => {
                let c = self.func.new_constant(ConstantValue::I64(imm));
                self.write_reg(rd, c)?;
            }
            GuestOp::AluRegReg { op, rd, ra, rb } => {
                let a = self.read_reg(ra)?;
                let b = self.read_reg(rb)?;
                let dest = self.emit_binary(op.opcode(), a, b)?;
                self.write_reg(rd, dest)?;
            }
            GuestOp::AluRegImm { op, rd, ra, imm } => {
                let a = self.read_reg(ra)?;
                let c = self.func.new_constant(ConstantValue::I64(imm));
                let dest = self.emit_binary(op.opcode(), a, c)?;
                self.write_reg(rd, dest)?;
            }
            GuestOp::Load { rd, ra, disp } => {
                let addr = self.effective_addr(ra, disp)?;
                let dest = self.func.new_value(ValueType::I64);
                let load = self.func.append_instr(self.block, Opcode::Load, InstrFlags::empty());
                self.func.set_dest(load, dest)?;
                self.func.set_src_value(load, 0, addr)?;
                self.write_reg(rd, dest)?;
            }
            GuestOp::Store { rs, ra, disp } => {
                let addr = self.effective_addr(ra, disp)?;
                let value = self.read_reg(rs)?;
                let store = self.func.append_instr(self.block, Opcode::Store, InstrFlags::empty());
                self.func.set_src_value(store, 0, addr)?;
                self.func.set_src_value(store, 1, value)?;
            }
            GuestOp::Jump => {
                let label = self.target_label(inst)?;
                let branch = self.func.append_instr(self.block, Opcode::Branch, InstrFlags::empty());
                self.func.set_src(branch, 0, Operand::Label(label))?;
                self.func.add_cfg_edge(self.block, label)?;
                self.block_closed = true;
            }
            GuestOp::BranchNonZero { cond } => {
                let label = self.target_label(inst)?;
                let cond = self.read_reg(cond)?;
                let branch =
                    self.func
                        .append_instr(self.block, Opcode::BranchTrue, InstrFlags::empty());
                self.func.set_src_value(branch, 0, cond)?;
                self.func.set_src(branch, 1, Operand::Label(label))?;
                self.func.add_cfg_edge(self.block, label)?;
                // Not closed: the fallthrough successor starts at the next
                // leader and gets an explicit Branch there.
            }
            GuestOp::Return => {
                self.func.append_instr(self.block, Opcode::Return, InstrFlags::empty());
                self.block_closed = true;
            }
            GuestOp::Unsupported { raw } => {
                let marker =
                    self.func
                        .append_instr(self.block, Opcode::Unimplemented, InstrFlags::empty());
                self.func.set_src(marker, 0, Operand::Offset(raw))?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<(), BuildError> {
        // A region that just runs off its end exits back to the dispatcher.
        if !self.block_closed {
            self.func.append_instr(self.block, Opcode::Return, InstrFlags::empty());
        }
        Ok(())
    }

    fn target_label(&self, inst: &DecodedInst) -> Result<LabelId, BuildError> {
        let target = inst
            .branch_target
            .ok_or(BuildError::MissingBranchTarget { addr: inst.addr })?;
        // Validated during leader collection.
        Ok(self.blocks_by_addr[&target].1)
    }

    fn check_reg(&self, reg: u8) -> Result<(), BuildError> {
        if u32::from(reg) >= self.config.context_slots {
            return Err(BuildError::ContextSlotOutOfRange {
                reg,
                max: self.config.context_slots,
            });
        }
        Ok(())
    }

    fn read_reg(&mut self, reg: u8) -> Result<ValueId, BuildError> {
        self.check_reg(reg)?;
        if let Some(&v) = self.reg_cache.get(&reg) {
            return Ok(v);
        }
        let dest = self.func.new_value(ValueType::I64);
        let load = self
            .func
            .append_instr(self.block, Opcode::LoadContext, InstrFlags::empty());
        self.func.set_dest(load, dest)?;
        self.func
            .set_src(load, 0, Operand::Offset(u64::from(reg) * 8))?;
        self.reg_cache.insert(reg, dest);
        Ok(dest)
    }

    fn write_reg(&mut self, reg: u8, value: ValueId) -> Result<(), BuildError> {
        self.check_reg(reg)?;
        let store = self
            .func
            .append_instr(self.block, Opcode::StoreContext, InstrFlags::empty());
        self.func
            .set_src(store, 0, Operand::Offset(u64::from(reg) * 8))?;
        self.func.set_src_value(store, 1, value)?;
        self.reg_cache.insert(reg, value);
        Ok(())
    }

    fn emit_binary(&mut self, opcode: Opcode, a: ValueId, b: ValueId) -> Result<ValueId, BuildError> {
        let dest = self.func.new_value(ValueType::I64);
        let instr = self.func.append_instr(self.block, opcode, InstrFlags::empty());
        self.func.set_dest(instr, dest)?;
        self.func.set_src_value(instr, 0, a)?;
        self.func.set_src_value(instr, 1, b)?;
        Ok(dest)
    }

    fn effective_addr(&mut self, ra: u8, disp: u64) -> Result<ValueId, BuildError> {
        let base = self.read_reg(ra)?;
        if disp == 0 {
            return Ok(base);
        }
        let c = self.func.new_constant(ConstantValue::I64(disp));
        self.emit_binary(Opcode::Add, base, c)
    }
}
