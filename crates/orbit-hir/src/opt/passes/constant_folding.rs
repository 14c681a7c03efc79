//! Constant folding.
//!
//! Two-constant binary instructions (and unary copies/conversions of
//! constants) are evaluated at translation time: the instruction's result
//! value becomes a materialized constant and the instruction is removed. The
//! chained form `(x op c1) op c2` is rewritten to `x op (c1 op c2)` for the
//! associative opcodes, which also canonicalizes the constant into the second
//! source slot so later passes only need to handle one ordering.

use crate::function::{Function, HirError};
use crate::opcodes::Opcode;
use crate::value::ConstantValue;
use crate::{InstrId, ValueId};

pub fn run(func: &mut Function) -> Result<bool, HirError> {
    let mut changed = false;
    for block in func.block_order().to_vec() {
        for instr in func.block_instrs(block).collect::<Vec<_>>() {
            if func.instr(instr).removed {
                continue;
            }
            changed |= fold_instr(func, instr)?;
        }
    }
    Ok(changed)
}

/// Resolve `value` to a constant, walking its producer chain through assigns
/// and width conversions and re-materializing the payload through each step.
///
/// Re-materializing (rather than aliasing the ultimate producer) is what
/// makes widening tunnels safe here: the conversion semantics are applied to
/// the payload in traversal order.
fn resolve_constant(func: &Function, value: ValueId) -> Option<ConstantValue> {
    let v = func.value(value);
    if let Some(c) = v.constant {
        return Some(c);
    }
    let def = v.def?;
    let instr = func.instr(def);
    let src = instr.src_value(0)?;
    let inner = resolve_constant(func, src)?;
    match instr.opcode {
        Opcode::Assign => Some(inner),
        Opcode::ZeroExtend => inner.zero_extend(v.ty),
        Opcode::SignExtend => inner.sign_extend(v.ty),
        Opcode::Truncate => inner.truncate(v.ty),
        _ => None,
    }
}

fn fold_instr(func: &mut Function, instr: InstrId) -> Result<bool, HirError> {
    let opcode = func.instr(instr).opcode;
    match opcode {
        Opcode::Assign | Opcode::Not | Opcode::Neg => {
            let Some(src) = func.instr(instr).src_value(0) else {
                return Ok(false);
            };
            let Some(c) = resolve_constant(func, src) else {
                return Ok(false);
            };
            match ConstantValue::eval_unary(opcode, c) {
                Some(folded) => fold_to(func, instr, folded).map(|()| true),
                None => Ok(false),
            }
        }
        Opcode::ZeroExtend | Opcode::SignExtend | Opcode::Truncate => {
            let Some(dest) = func.instr(instr).dest else {
                return Ok(false);
            };
            let dest_ty = func.value(dest).ty;
            let Some(src) = func.instr(instr).src_value(0) else {
                return Ok(false);
            };
            let Some(c) = resolve_constant(func, src) else {
                return Ok(false);
            };
            let folded = match opcode {
                Opcode::ZeroExtend => c.zero_extend(dest_ty),
                Opcode::SignExtend => c.sign_extend(dest_ty),
                Opcode::Truncate => c.truncate(dest_ty),
                _ => unreachable!(),
            };
            match folded {
                Some(folded) => fold_to(func, instr, folded).map(|()| true),
                None => Ok(false),
            }
        }
        Opcode::Add
        | Opcode::Sub
        | Opcode::Mul
        | Opcode::And
        | Opcode::Or
        | Opcode::Xor
        | Opcode::Shl
        | Opcode::Shr
        | Opcode::Sar
        | Opcode::CompareEq
        | Opcode::CompareNe => fold_binary(func, instr, opcode),
        _ => Ok(false),
    }
}

fn fold_binary(func: &mut Function, instr: InstrId, opcode: Opcode) -> Result<bool, HirError> {
    let (Some(a), Some(b)) = (func.instr(instr).src_value(0), func.instr(instr).src_value(1))
    else {
        return Ok(false);
    };

    // Both operands constant (possibly through copy/conversion chains):
    // evaluate outright.
    if let (Some(ca), Some(cb)) = (resolve_constant(func, a), resolve_constant(func, b)) {
        if let Some(folded) = ConstantValue::eval_binary(opcode, ca, cb) {
            fold_to(func, instr, folded)?;
            return Ok(true);
        }
        return Ok(false);
    }

    // Chained associative pattern: (x op c1) op c2 -> x op (c1 op c2).
    if !matches!(
        opcode,
        Opcode::Add | Opcode::Mul | Opcode::And | Opcode::Or | Opcode::Xor
    ) {
        return Ok(false);
    }
    let Some((by_op, c2v)) = func.arrange_by_def_op_and_constant(instr, opcode) else {
        return Ok(false);
    };
    let producer = func.value(by_op).def.expect("arranged value has a definer");
    let Some((c1v, x)) = func.arrange_as_const_and_var(producer) else {
        return Ok(false);
    };
    let (Some(c1), Some(c2)) = (func.value(c1v).constant, func.value(c2v).constant) else {
        return Ok(false);
    };
    let Some(combined) = ConstantValue::eval_binary(opcode, c1, c2) else {
        return Ok(false);
    };
    let combined = func.new_constant(combined);
    func.set_src_value(instr, 0, x)?;
    func.set_src_value(instr, 1, combined)?;
    Ok(true)
}

/// Seal the fold: the dest value becomes the constant and the producer is
/// removed. Its remaining uses now reference a plain constant value.
fn fold_to(func: &mut Function, instr: InstrId, constant: ConstantValue) -> Result<(), HirError> {
    let Some(dest) = func.instr(instr).dest else {
        return Ok(());
    };
    func.make_constant(dest, constant)?;
    func.remove_instr(instr)?;
    Ok(())
}
