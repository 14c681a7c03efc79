//! Producer-chain walks through trivial copies.

use orbit_hir::opt::passes::{constant_folding, dce, mov_tunneling, simplify};
use orbit_hir::{
    BlockId, ConstantValue, Function, InstrFlags, MovTunnel, Opcode, Operand, ValueId, ValueType,
};

fn scaffold() -> (Function, BlockId) {
    let mut func = Function::new(0, 0, 0);
    let label = func.new_label();
    let block = func.new_block(label).unwrap();
    func.entry = Some(label);
    (func, block)
}

fn emit_assign(func: &mut Function, block: BlockId, src: ValueId) -> ValueId {
    let dest = func.new_value(func.value(src).ty);
    let assign = func.append_instr(block, Opcode::Assign, InstrFlags::empty());
    func.set_dest(assign, dest).unwrap();
    func.set_src_value(assign, 0, src).unwrap();
    dest
}

#[test]
fn assign_chain_tunnels_to_the_original_constant() {
    let (mut func, block) = scaffold();
    let c = func.new_constant(ConstantValue::I64(21));
    let v1 = emit_assign(&mut func, block, c);
    let v2 = emit_assign(&mut func, block, v1);

    assert_eq!(func.skip_assigns(v2), c);
    // The chain ends at a value with no definer, and only assigns were
    // traversed.
    let (def, traversed) = func.tunnel_movs_to_definer(v2, MovTunnel::ASSIGNS);
    assert_eq!(def, None);
    assert_eq!(traversed, MovTunnel::ASSIGNS);

    // A walk that is not allowed to tunnel stops immediately.
    let (v, traversed) = func.tunnel_movs(v2, MovTunnel::empty());
    assert_eq!(v, v2);
    assert!(traversed.is_empty());
}

#[test]
fn tunneled_add_folds_to_a_single_constant() {
    // v1 = assign(c); v2 = assign(v1); v3 = add(v2, v2) -- after tunneling
    // and folding, v3 is the constant c + c and no instructions survive but
    // the context store keeping v3 alive.
    let (mut func, block) = scaffold();
    let c = func.new_constant(ConstantValue::I64(21));
    let v1 = emit_assign(&mut func, block, c);
    let v2 = emit_assign(&mut func, block, v1);

    let v3 = func.new_value(ValueType::I64);
    let add = func.append_instr(block, Opcode::Add, InstrFlags::empty());
    func.set_dest(add, v3).unwrap();
    func.set_src_value(add, 0, v2).unwrap();
    func.set_src_value(add, 1, v2).unwrap();

    let store = func.append_instr(block, Opcode::StoreContext, InstrFlags::empty());
    func.set_src(store, 0, Operand::Offset(0)).unwrap();
    func.set_src_value(store, 1, v3).unwrap();

    mov_tunneling::run(&mut func).unwrap();
    // Both add operands now reference c directly.
    assert_eq!(func.instr(add).src_value(0), Some(c));
    assert_eq!(func.instr(add).src_value(1), Some(c));

    constant_folding::run(&mut func).unwrap();
    assert_eq!(func.value(v3).constant, Some(ConstantValue::I64(42)));

    dce::run(&mut func).unwrap();
    // Only the store remains.
    let live: Vec<_> = func.block_instrs(block).collect();
    assert_eq!(live, vec![store]);
    func.check_consistency().unwrap();
}

#[test]
fn widening_tunnels_are_reported_to_the_caller() {
    let (mut func, block) = scaffold();
    let narrow = func.new_value(ValueType::I32);
    let load = func.append_instr(block, Opcode::LoadContext, InstrFlags::empty());
    func.set_dest(load, narrow).unwrap();
    func.set_src(load, 0, Operand::Offset(0)).unwrap();

    let wide = func.new_value(ValueType::I64);
    let zext = func.append_instr(block, Opcode::ZeroExtend, InstrFlags::empty());
    func.set_dest(zext, wide).unwrap();
    func.set_src_value(zext, 0, narrow).unwrap();

    let copy = emit_assign(&mut func, block, wide);

    // Assign-only callers stop at the zero-extend.
    let (v, traversed) = func.tunnel_movs(copy, MovTunnel::ASSIGNS);
    assert_eq!(v, wide);
    assert_eq!(traversed, MovTunnel::ASSIGNS);

    // Callers that tolerate widening reach the narrow value, and the
    // traversed set tells them high-bit content changed along the way.
    let (v, traversed) = func.tunnel_movs(copy, MovTunnel::ASSIGNS | MovTunnel::ZERO_EXTEND);
    assert_eq!(v, narrow);
    assert!(traversed.contains(MovTunnel::ZERO_EXTEND));
}

#[test]
fn and_with_low32_mask_tunnels_as_and32ff() {
    let (mut func, block) = scaffold();
    let x = func.new_value(ValueType::I64);
    let load = func.append_instr(block, Opcode::LoadContext, InstrFlags::empty());
    func.set_dest(load, x).unwrap();
    func.set_src(load, 0, Operand::Offset(0)).unwrap();

    let mask = func.new_constant(ConstantValue::I64(0xffff_ffff));
    let masked = func.new_value(ValueType::I64);
    let and = func.append_instr(block, Opcode::And, InstrFlags::empty());
    func.set_dest(and, masked).unwrap();
    func.set_src_value(and, 0, x).unwrap();
    func.set_src_value(and, 1, mask).unwrap();

    let (v, traversed) = func.tunnel_movs(masked, MovTunnel::AND32_FF);
    assert_eq!(v, x);
    assert_eq!(traversed, MovTunnel::AND32_FF);

    // An `and` with any other mask is not a tunnel.
    let other_mask = func.new_constant(ConstantValue::I64(0xff));
    func.set_src_value(and, 1, other_mask).unwrap();
    let (v, traversed) = func.tunnel_movs(masked, MovTunnel::AND32_FF);
    assert_eq!(v, masked);
    assert!(traversed.is_empty());
}

fn emit_masked_load(func: &mut Function, block: BlockId) -> (ValueId, ValueId) {
    let x = func.new_value(ValueType::I64);
    let load = func.append_instr(block, Opcode::LoadContext, InstrFlags::empty());
    func.set_dest(load, x).unwrap();
    func.set_src(load, 0, Operand::Offset(0)).unwrap();

    let mask = func.new_constant(ConstantValue::I64(0xffff_ffff));
    let masked = func.new_value(ValueType::I64);
    let and = func.append_instr(block, Opcode::And, InstrFlags::empty());
    func.set_dest(and, masked).unwrap();
    func.set_src_value(and, 0, x).unwrap();
    func.set_src_value(and, 1, mask).unwrap();
    (x, masked)
}

#[test]
fn same_width_truncate_of_a_masked_value_keeps_the_mask() {
    // t = trunc_i64(and(x, 0xffffffff)) still has its top 32 bits cleared;
    // a plain copy of x would not.
    let (mut func, block) = scaffold();
    let (_x, masked) = emit_masked_load(&mut func, block);

    let t = func.new_value(ValueType::I64);
    let trunc = func.append_instr(block, Opcode::Truncate, InstrFlags::empty());
    func.set_dest(trunc, t).unwrap();
    func.set_src_value(trunc, 0, masked).unwrap();

    let store = func.append_instr(block, Opcode::StoreContext, InstrFlags::empty());
    func.set_src(store, 0, Operand::Offset(8)).unwrap();
    func.set_src_value(store, 1, t).unwrap();

    assert!(!simplify::run(&mut func).unwrap());
    assert_eq!(func.instr(trunc).opcode, Opcode::Truncate);
    assert_eq!(func.instr(trunc).src_value(0), Some(masked));
    func.check_consistency().unwrap();
}

#[test]
fn narrowing_truncate_tunnels_past_the_mask() {
    // A 32-bit destination keeps only bits the mask preserves, so the
    // truncate can read straight from the unmasked producer.
    let (mut func, block) = scaffold();
    let (x, masked) = emit_masked_load(&mut func, block);

    let t = func.new_value(ValueType::I32);
    let trunc = func.append_instr(block, Opcode::Truncate, InstrFlags::empty());
    func.set_dest(trunc, t).unwrap();
    func.set_src_value(trunc, 0, masked).unwrap();

    let store = func.append_instr(block, Opcode::StoreContext, InstrFlags::empty());
    func.set_src(store, 0, Operand::Offset(8)).unwrap();
    func.set_src_value(store, 1, t).unwrap();

    assert!(simplify::run(&mut func).unwrap());
    assert_eq!(func.instr(trunc).opcode, Opcode::Truncate);
    assert_eq!(func.instr(trunc).src_value(0), Some(x));
    func.check_consistency().unwrap();
}
