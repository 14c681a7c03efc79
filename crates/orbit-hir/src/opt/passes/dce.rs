//! Dead-instruction elimination.
//!
//! An instruction whose dest has an empty use-set and whose opcode has no
//! side effect is removed. Blocks are swept in reverse program order so a
//! consumer is dropped before its producers in the same sweep; the sweep
//! repeats to a fixpoint because removing one instruction can make producers
//! further up (or in earlier blocks) dead.

use crate::function::{Function, HirError};
use crate::instr::InstrFlags;
use crate::opcodes::Opcode;

pub fn run(func: &mut Function) -> Result<bool, HirError> {
    let mut changed_any = false;
    loop {
        let mut changed = false;
        for block in func.block_order().to_vec() {
            for instr in func.block_instrs_rev(block).collect::<Vec<_>>() {
                let i = func.instr(instr);
                if i.removed
                    || i.opcode.has_side_effect()
                    || i.flags.contains(InstrFlags::VOLATILE)
                {
                    continue;
                }
                let dead = match i.dest {
                    Some(dest) => func.value(dest).is_unused(),
                    // A side-effect-free instruction with no result computes
                    // nothing observable.
                    None => i.opcode == Opcode::Nop,
                };
                if dead {
                    func.remove_instr(instr)?;
                    changed = true;
                }
            }
        }
        changed_any |= changed;
        if !changed {
            return Ok(changed_any);
        }
    }
}
