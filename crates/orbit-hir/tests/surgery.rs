//! Linked-list surgery on the instruction stream: relinking, insertion, and
//! the lazy ordinal renumbering behind ordering queries.

use orbit_hir::{
    BlockId, ConstantValue, Function, HirError, InstrFlags, InstrId, Opcode, Operand, ValueType,
};

fn scaffold() -> (Function, BlockId) {
    let mut func = Function::new(0, 0, 0);
    let label = func.new_label();
    let block = func.new_block(label).unwrap();
    func.entry = Some(label);
    (func, block)
}

fn nops(func: &mut Function, block: BlockId, n: usize) -> Vec<InstrId> {
    (0..n)
        .map(|_| func.append_instr(block, Opcode::Nop, InstrFlags::empty()))
        .collect()
}

fn order(func: &Function, block: BlockId) -> Vec<InstrId> {
    func.block_instrs(block).collect()
}

#[test]
fn move_before_relinks_within_a_block() {
    let (mut func, block) = scaffold();
    let ids = nops(&mut func, block, 3);
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    func.move_before(c, a).unwrap();
    assert_eq!(order(&func, block), vec![c, a, b]);
    // The reverse walk sees the same relinked list.
    assert_eq!(func.block_instrs_rev(block).collect::<Vec<_>>(), vec![b, a, c]);

    assert!(func.is_before(c, a).unwrap());
    assert!(func.is_before(c, b).unwrap());
    assert!(!func.is_before(a, c).unwrap());
    func.check_consistency().unwrap();
}

#[test]
fn move_after_can_target_the_block_tail() {
    let (mut func, block) = scaffold();
    let ids = nops(&mut func, block, 3);
    let (a, b, c) = (ids[0], ids[1], ids[2]);

    func.move_after(a, c).unwrap();
    assert_eq!(order(&func, block), vec![b, c, a]);

    // The tail pointer moved with `a`; appending lands after it.
    let d = func.append_instr(block, Opcode::Nop, InstrFlags::empty());
    assert_eq!(order(&func, block), vec![b, c, a, d]);
    assert!(func.is_before(a, d).unwrap());
    func.check_consistency().unwrap();
}

#[test]
fn moves_across_blocks_carry_the_instruction() {
    let (mut func, b0) = scaffold();
    let l1 = func.new_label();
    let b1 = func.new_block(l1).unwrap();
    let front = nops(&mut func, b0, 2);
    let (a, b) = (front[0], front[1]);
    let back = nops(&mut func, b1, 2);
    let (x, y) = (back[0], back[1]);

    func.move_before(b, y).unwrap();
    assert_eq!(order(&func, b0), vec![a]);
    assert_eq!(order(&func, b1), vec![x, b, y]);
    assert!(func.is_before(x, b).unwrap());
    assert!(func.is_before(b, y).unwrap());
    // Ordering across blocks is meaningless and refused.
    assert_eq!(func.is_before(a, b), Err(HirError::BlocksDiffer));
    func.check_consistency().unwrap();
}

#[test]
fn ordinals_catch_up_after_repeated_surgery() {
    let (mut func, block) = scaffold();
    let ids = nops(&mut func, block, 5);

    func.move_before(ids[4], ids[0]).unwrap();
    func.move_after(ids[1], ids[3]).unwrap();
    func.move_before(ids[2], ids[4]).unwrap();

    // Every ordering query agrees with a fresh walk of the list, however
    // stale the ordinals were when the query arrived.
    let walked = order(&func, block);
    for (i, &earlier) in walked.iter().enumerate() {
        for &later in &walked[i + 1..] {
            assert!(func.is_before(earlier, later).unwrap());
            assert!(!func.is_before(later, earlier).unwrap());
        }
    }
    func.check_consistency().unwrap();
}

#[test]
fn inserting_before_the_block_head_updates_the_entry() {
    let (mut func, block) = scaffold();
    let ids = nops(&mut func, block, 2);
    let (a, b) = (ids[0], ids[1]);

    let head = func
        .insert_instr_before(a, Opcode::Nop, InstrFlags::empty())
        .unwrap();
    let mid = func
        .insert_instr_before(b, Opcode::Nop, InstrFlags::empty())
        .unwrap();
    assert_eq!(order(&func, block), vec![head, a, mid, b]);
    assert!(func.is_before(head, a).unwrap());
    assert!(func.is_before(mid, b).unwrap());
    func.check_consistency().unwrap();
}

#[test]
fn surgery_on_removed_instructions_is_rejected() {
    let (mut func, block) = scaffold();
    let ids = nops(&mut func, block, 2);
    let (a, b) = (ids[0], ids[1]);
    func.remove_instr(a).unwrap();

    assert_eq!(func.move_before(b, a), Err(HirError::RemovedInstr));
    assert_eq!(func.move_after(b, a), Err(HirError::RemovedInstr));
    assert_eq!(
        func.insert_instr_before(a, Opcode::Nop, InstrFlags::empty()),
        Err(HirError::RemovedInstr)
    );
    assert_eq!(order(&func, block), vec![b]);
    func.check_consistency().unwrap();
}

#[test]
fn assign_chains_resolve_to_their_defining_instruction() {
    let (mut func, block) = scaffold();
    let x = func.new_value(ValueType::I64);
    let load = func.append_instr(block, Opcode::LoadContext, InstrFlags::empty());
    func.set_dest(load, x).unwrap();
    func.set_src(load, 0, Operand::Offset(0)).unwrap();

    let v1 = func.new_value(ValueType::I64);
    let a1 = func.append_instr(block, Opcode::Assign, InstrFlags::empty());
    func.set_dest(a1, v1).unwrap();
    func.set_src_value(a1, 0, x).unwrap();

    let v2 = func.new_value(ValueType::I64);
    let a2 = func.append_instr(block, Opcode::Assign, InstrFlags::empty());
    func.set_dest(a2, v2).unwrap();
    func.set_src_value(a2, 0, v1).unwrap();

    assert_eq!(func.skip_assigns_to_definer(v2), Some(load));

    // A chain ending at a constant has no defining instruction.
    let c = func.new_constant(ConstantValue::I64(7));
    let v3 = func.new_value(ValueType::I64);
    let a3 = func.append_instr(block, Opcode::Assign, InstrFlags::empty());
    func.set_dest(a3, v3).unwrap();
    func.set_src_value(a3, 0, c).unwrap();
    assert_eq!(func.skip_assigns_to_definer(v3), None);
}
