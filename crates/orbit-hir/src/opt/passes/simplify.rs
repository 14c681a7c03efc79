//! Opcode-specific algebraic rewrites.
//!
//! Identity operands collapse to assigns (`x | 0`, `x + 0`, `x & all-ones`,
//! `x * 1`), annihilators fold to constants (`x & 0`, `x | all-ones`),
//! multiplies by powers of two become shifts, truncates of zero-extends
//! collapse to the cheapest equivalent copy, and conditional branches with a
//! constant condition fold to unconditional transfers (or disappear). All
//! binary patterns go through the operand-arrangement helpers so a constant
//! in either source slot is handled once.

use crate::function::{Function, HirError};
use crate::instr::InstrFlags;
use crate::opcodes::{MovTunnel, Opcode};
use crate::value::ConstantValue;
use crate::{BlockId, InstrId};

pub fn run(func: &mut Function) -> Result<bool, HirError> {
    let mut changed = false;
    for block in func.block_order().to_vec() {
        for instr in func.block_instrs(block).collect::<Vec<_>>() {
            if func.instr(instr).removed {
                continue;
            }
            changed |= simplify_instr(func, block, instr)?;
        }
    }
    Ok(changed)
}

fn simplify_instr(func: &mut Function, block: BlockId, instr: InstrId) -> Result<bool, HirError> {
    match func.instr(instr).opcode {
        Opcode::Add | Opcode::Or | Opcode::Xor => {
            let Some((c, x)) = func.arrange_as_const_and_var(instr) else {
                return Ok(false);
            };
            let constant = func.value(c).constant.expect("arranged constant");
            if constant.is_zero() {
                return rewrite_to_assign(func, instr, x).map(|()| true);
            }
            if func.instr(instr).opcode == Opcode::Or && constant.is_all_ones() {
                // x | all-ones == all-ones.
                return fold_dest_to(func, instr, constant).map(|()| true);
            }
            Ok(false)
        }
        Opcode::Sub | Opcode::Shl | Opcode::Shr | Opcode::Sar => {
            // Right-identity only; these are not commutative.
            let Some(rhs) = func.instr(instr).src_value(1) else {
                return Ok(false);
            };
            if func.value(rhs).constant.is_some_and(ConstantValue::is_zero) {
                let lhs = func.instr(instr).src_value(0).expect("binary lhs");
                return rewrite_to_assign(func, instr, lhs).map(|()| true);
            }
            Ok(false)
        }
        Opcode::And => {
            let Some((c, x)) = func.arrange_as_const_and_var(instr) else {
                return Ok(false);
            };
            let constant = func.value(c).constant.expect("arranged constant");
            if constant.is_zero() {
                return fold_dest_to(func, instr, constant).map(|()| true);
            }
            if constant.is_all_ones() {
                return rewrite_to_assign(func, instr, x).map(|()| true);
            }
            Ok(false)
        }
        Opcode::Mul => {
            let Some((c, x)) = func.arrange_as_const_and_var(instr) else {
                return Ok(false);
            };
            let constant = func.value(c).constant.expect("arranged constant");
            if constant.is_one() {
                return rewrite_to_assign(func, instr, x).map(|()| true);
            }
            if constant.is_zero() {
                return fold_dest_to(func, instr, constant).map(|()| true);
            }
            // Strength-reduce x * 2^k to x << k.
            let Some(raw) = constant.as_u64() else {
                return Ok(false);
            };
            if raw.is_power_of_two() {
                let ty = func.value(x).ty;
                let Some(shift) = ConstantValue::int_of(ty, u64::from(raw.trailing_zeros()))
                else {
                    return Ok(false);
                };
                let shift = func.new_constant(shift);
                func.set_src_value(instr, 0, x)?;
                func.set_src_value(instr, 1, shift)?;
                func.replace_opcode(instr, Opcode::Shl, InstrFlags::empty())?;
                return Ok(true);
            }
            Ok(false)
        }
        Opcode::Truncate => simplify_truncate(func, instr),
        Opcode::BranchTrue | Opcode::BranchFalse => fold_constant_branch(func, block, instr),
        _ => Ok(false),
    }
}

/// `truncate(zero_extend(x))` and friends: tunnel through zero-extending
/// producers and emit the cheapest copy that preserves the result bits.
fn simplify_truncate(func: &mut Function, instr: InstrId) -> Result<bool, HirError> {
    let Some(src) = func.instr(instr).src_value(0) else {
        return Ok(false);
    };
    let Some(dest) = func.instr(instr).dest else {
        return Ok(false);
    };
    let (ultimate, traversed) = func.tunnel_movs(
        src,
        MovTunnel::ASSIGNS | MovTunnel::ZERO_EXTEND | MovTunnel::AND32_FF,
    );
    if !traversed.intersects(MovTunnel::ZERO_EXTEND | MovTunnel::AND32_FF) {
        return Ok(false);
    }
    let dest_bits = func.value(dest).ty.int_bits();
    let ult_bits = func.value(ultimate).ty.int_bits();
    let (Some(dest_bits), Some(ult_bits)) = (dest_bits, ult_bits) else {
        return Ok(false);
    };
    // Bits above `zero_bits` of the truncate's input are known zero. An
    // `and x, 0xffffffff` on the path caps that boundary at 32 even though
    // `ultimate` itself is wider.
    let zero_bits = if traversed.contains(MovTunnel::AND32_FF) {
        ult_bits.min(32)
    } else {
        ult_bits
    };
    if dest_bits <= zero_bits {
        // The destination keeps only known-good low bits of `ultimate`.
        if dest_bits == ult_bits {
            rewrite_to_assign(func, instr, ultimate)?;
        } else {
            func.set_src_value(instr, 0, ultimate)?;
        }
    } else if zero_bits == ult_bits {
        func.set_src_value(instr, 0, ultimate)?;
        func.replace_opcode(instr, Opcode::ZeroExtend, InstrFlags::empty())?;
    } else {
        // The mask clears bits the destination would keep; no plain copy of
        // `ultimate` is equivalent.
        return Ok(false);
    }
    Ok(true)
}

/// A conditional branch whose condition is a known constant either becomes an
/// unconditional branch or disappears (dropping its control-flow edge).
fn fold_constant_branch(
    func: &mut Function,
    block: BlockId,
    instr: InstrId,
) -> Result<bool, HirError> {
    let opcode = func.instr(instr).opcode;
    let Some(cond) = func.instr(instr).src_value(0) else {
        return Ok(false);
    };
    let Some(constant) = func.value(cond).constant else {
        return Ok(false);
    };
    let Some(label) = func.instr(instr).src(1).as_label() else {
        return Ok(false);
    };
    let taken = match opcode {
        Opcode::BranchTrue => !constant.is_zero(),
        Opcode::BranchFalse => constant.is_zero(),
        _ => return Ok(false),
    };

    if !taken {
        func.remove_cfg_edge(block, label)?;
        func.remove_instr(instr)?;
        return Ok(true);
    }

    // Always taken: rewrite into an unconditional branch, then strip any
    // later control transfers in the block (now unreachable) along with
    // their edges.
    func.set_src(instr, 0, crate::instr::Operand::None)?;
    func.set_src(instr, 1, crate::instr::Operand::None)?;
    func.replace_opcode(instr, Opcode::Branch, InstrFlags::empty())?;
    func.set_src(instr, 0, crate::instr::Operand::Label(label))?;

    let mut cursor = func.instr(instr).next();
    while let Some(id) = cursor {
        cursor = func.instr(id).next();
        let i = func.instr(id);
        if !i.opcode.flags().contains(crate::opcodes::OpcodeFlags::BRANCH) {
            continue;
        }
        let dead_label = i
            .src(0)
            .as_label()
            .or_else(|| i.src(1).as_label());
        if let Some(dead_label) = dead_label {
            func.remove_cfg_edge(block, dead_label)?;
        }
        func.remove_instr(id)?;
    }
    Ok(true)
}

/// Turn `instr` into `dest = assign(src)`, detaching its other operands.
fn rewrite_to_assign(func: &mut Function, instr: InstrId, src: crate::ValueId) -> Result<(), HirError> {
    func.set_src(instr, 0, crate::instr::Operand::None)?;
    func.set_src(instr, 1, crate::instr::Operand::None)?;
    func.set_src(instr, 2, crate::instr::Operand::None)?;
    func.replace_opcode(instr, Opcode::Assign, InstrFlags::empty())?;
    func.set_src_value(instr, 0, src)
}

/// The instruction's result is the constant; materialize it and drop the
/// instruction (same sealing step constant folding uses).
fn fold_dest_to(func: &mut Function, instr: InstrId, constant: ConstantValue) -> Result<(), HirError> {
    let Some(dest) = func.instr(instr).dest else {
        return Ok(());
    };
    func.make_constant(dest, constant)?;
    func.remove_instr(instr)
}
