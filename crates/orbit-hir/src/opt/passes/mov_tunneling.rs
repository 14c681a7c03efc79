//! Copy propagation through trivial assigns ("move tunneling").
//!
//! Every value operand is rewritten to reference its ultimate producer
//! directly, so consumers stop depending on intermediate `Assign` copies and
//! those copies become dead. This pass tunnels through `ASSIGNS` only: an
//! assign is bit-exact for every consumer, whereas widening/narrowing tunnels
//! change bit content and are only sound for specific consumer shapes; those
//! rewrites live in the simplify pass, and constant folding re-materializes
//! payloads instead of aliasing producers.

use crate::function::{Function, HirError};
use crate::ValueId;

pub fn run(func: &mut Function) -> Result<bool, HirError> {
    let mut changed = false;
    for block in func.block_order().to_vec() {
        for instr in func.block_instrs(block).collect::<Vec<_>>() {
            if func.instr(instr).removed {
                continue;
            }
            let mut rewrites: Vec<(usize, ValueId)> = Vec::new();
            func.visit_value_operands(instr, |value, slot| {
                let ultimate = func.skip_assigns(value);
                if ultimate != value {
                    rewrites.push((slot, ultimate));
                }
            });
            for (slot, value) in rewrites {
                func.set_src_value(instr, slot, value)?;
                changed = true;
            }
        }
    }
    Ok(changed)
}
