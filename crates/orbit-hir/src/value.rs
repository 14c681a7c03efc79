//! Values and compile-time constants.

use crate::opcodes::Opcode;
use crate::{InstrId, ValueId};

/// Primitive type tag of a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    V128,
}

impl ValueType {
    /// Bit width of the integer types; `None` for float/vector.
    #[must_use]
    pub fn int_bits(self) -> Option<u32> {
        match self {
            ValueType::I8 => Some(8),
            ValueType::I16 => Some(16),
            ValueType::I32 => Some(32),
            ValueType::I64 => Some(64),
            _ => None,
        }
    }

    /// All-ones mask for the integer types, widened to u64.
    #[must_use]
    pub fn int_mask(self) -> Option<u64> {
        self.int_bits().map(|bits| {
            if bits == 64 {
                u64::MAX
            } else {
                (1u64 << bits) - 1
            }
        })
    }
}

/// A constant payload known at translation time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstantValue {
    I8(u8),
    I16(u16),
    I32(u32),
    I64(u64),
    F32(f32),
    F64(f64),
    V128([u64; 2]),
}

impl ConstantValue {
    #[must_use]
    pub fn ty(self) -> ValueType {
        match self {
            ConstantValue::I8(_) => ValueType::I8,
            ConstantValue::I16(_) => ValueType::I16,
            ConstantValue::I32(_) => ValueType::I32,
            ConstantValue::I64(_) => ValueType::I64,
            ConstantValue::F32(_) => ValueType::F32,
            ConstantValue::F64(_) => ValueType::F64,
            ConstantValue::V128(_) => ValueType::V128,
        }
    }

    /// Integer payload zero-extended to u64; `None` for float/vector.
    #[must_use]
    pub fn as_u64(self) -> Option<u64> {
        match self {
            ConstantValue::I8(v) => Some(u64::from(v)),
            ConstantValue::I16(v) => Some(u64::from(v)),
            ConstantValue::I32(v) => Some(u64::from(v)),
            ConstantValue::I64(v) => Some(v),
            _ => None,
        }
    }

    /// Build an integer constant of type `ty` from the low bits of `raw`.
    #[must_use]
    pub fn int_of(ty: ValueType, raw: u64) -> Option<ConstantValue> {
        match ty {
            ValueType::I8 => Some(ConstantValue::I8(raw as u8)),
            ValueType::I16 => Some(ConstantValue::I16(raw as u16)),
            ValueType::I32 => Some(ConstantValue::I32(raw as u32)),
            ValueType::I64 => Some(ConstantValue::I64(raw)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_zero(self) -> bool {
        self.as_u64() == Some(0)
    }

    #[must_use]
    pub fn is_one(self) -> bool {
        self.as_u64() == Some(1)
    }

    /// True when every bit of the payload's own width is set.
    #[must_use]
    pub fn is_all_ones(self) -> bool {
        match (self.as_u64(), self.ty().int_mask()) {
            (Some(v), Some(mask)) => v == mask,
            _ => false,
        }
    }

    #[must_use]
    pub fn zero_extend(self, to: ValueType) -> Option<ConstantValue> {
        ConstantValue::int_of(to, self.as_u64()?)
    }

    #[must_use]
    pub fn sign_extend(self, to: ValueType) -> Option<ConstantValue> {
        let raw = self.as_u64()?;
        let from_bits = self.ty().int_bits()?;
        let shift = 64 - from_bits;
        let extended = (((raw << shift) as i64) >> shift) as u64;
        ConstantValue::int_of(to, extended)
    }

    /// Truncation keeps the low bits; `int_of` masks for us.
    #[must_use]
    pub fn truncate(self, to: ValueType) -> Option<ConstantValue> {
        ConstantValue::int_of(to, self.as_u64()?)
    }

    /// Fold a binary integer opcode over two constants of the same type.
    ///
    /// Arithmetic wraps at the operand width; shift counts are masked to the
    /// width (matching the translated guest semantics). Returns `None` for
    /// non-integer payloads, mismatched types, or opcodes that are not
    /// foldable binary ops.
    #[must_use]
    pub fn eval_binary(op: Opcode, lhs: ConstantValue, rhs: ConstantValue) -> Option<ConstantValue> {
        let ty = lhs.ty();
        if rhs.ty() != ty {
            return None;
        }
        let bits = ty.int_bits()?;
        let mask = ty.int_mask()?;
        let a = lhs.as_u64()?;
        let b = rhs.as_u64()?;

        let raw = match op {
            Opcode::Add => a.wrapping_add(b),
            Opcode::Sub => a.wrapping_sub(b),
            Opcode::Mul => a.wrapping_mul(b),
            Opcode::And => a & b,
            Opcode::Or => a | b,
            Opcode::Xor => a ^ b,
            Opcode::Shl => a.wrapping_shl(b as u32 % bits),
            Opcode::Shr => (a & mask).wrapping_shr(b as u32 % bits),
            Opcode::Sar => {
                let shift = 64 - bits;
                let signed = ((a << shift) as i64) >> shift;
                (signed >> (b as u32 % bits)) as u64
            }
            Opcode::CompareEq => u64::from(a == b),
            Opcode::CompareNe => u64::from(a != b),
            _ => return None,
        };

        match op {
            // Compares always produce a boolean i8.
            Opcode::CompareEq | Opcode::CompareNe => Some(ConstantValue::I8(raw as u8)),
            _ => ConstantValue::int_of(ty, raw),
        }
    }

    /// Fold a unary integer opcode over a constant.
    #[must_use]
    pub fn eval_unary(op: Opcode, src: ConstantValue) -> Option<ConstantValue> {
        let ty = src.ty();
        let raw = src.as_u64()?;
        match op {
            Opcode::Not => ConstantValue::int_of(ty, !raw),
            Opcode::Neg => ConstantValue::int_of(ty, raw.wrapping_neg()),
            Opcode::Assign => Some(src),
            _ => None,
        }
    }
}

/// One back-reference from a value to an instruction operand slot that
/// currently holds it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Use {
    pub instr: InstrId,
    pub slot: usize,
}

/// A single-assignment operand.
///
/// `def` is the producing instruction (none for constants and parameters);
/// `uses` lists every (instruction, slot) pair that currently references this
/// value. Both sides are kept in sync by [`Function`](crate::Function)'s
/// operand-rewriting operations; nothing else may touch them.
#[derive(Clone, Debug)]
pub struct Value {
    pub ty: ValueType,
    pub constant: Option<ConstantValue>,
    pub def: Option<InstrId>,
    pub(crate) uses: Vec<Use>,
}

impl Value {
    pub(crate) fn new(ty: ValueType) -> Value {
        Value {
            ty,
            constant: None,
            def: None,
            uses: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.constant.is_some()
    }

    #[must_use]
    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    /// True when no operand slot references this value.
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.uses.is_empty()
    }
}
