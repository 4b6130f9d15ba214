//! Pure reference semantics for every logical operator the placement
//! builder can emit, and the mapping from logical operators onto physical
//! subcircuits.

pub mod field;
pub mod jubjub;
pub mod poseidon;

use revm::primitives::U256;

use crate::error::{Result, SynthesisError};
use jubjub::Point;

// ============================================================
// Operators
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
  Add,
  Mul,
  Sub,
  Div,
  SDiv,
  Mod,
  SMod,
  AddMod,
  MulMod,
  Exp,
  Lt,
  Gt,
  SLt,
  SGt,
  Eq,
  IsZero,
  And,
  Or,
  Xor,
  Not,
  Byte,
  Shl,
  Shr,
  Sar,
  SignExtend,
  DecToBit,
  SubExp,
  Accumulator,
  Poseidon,
  PrepareEdDsaScalars,
  JubjubExp36,
  EdDsaVerify,
}

/// Bits per chunk processed by one `JubjubExp36` placement.
pub const JUBJUB_CHUNK_BITS: usize = 36;

impl ArithOp {
  pub fn name(self) -> &'static str {
    use ArithOp::*;
    match self {
      Add => "ADD",
      Mul => "MUL",
      Sub => "SUB",
      Div => "DIV",
      SDiv => "SDIV",
      Mod => "MOD",
      SMod => "SMOD",
      AddMod => "ADDMOD",
      MulMod => "MULMOD",
      Exp => "EXP",
      Lt => "LT",
      Gt => "GT",
      SLt => "SLT",
      SGt => "SGT",
      Eq => "EQ",
      IsZero => "ISZERO",
      And => "AND",
      Or => "OR",
      Xor => "XOR",
      Not => "NOT",
      Byte => "BYTE",
      Shl => "SHL",
      Shr => "SHR",
      Sar => "SAR",
      SignExtend => "SIGNEXTEND",
      DecToBit => "DecToBit",
      SubExp => "SubEXP",
      Accumulator => "Accumulator",
      Poseidon => "Poseidon",
      PrepareEdDsaScalars => "PrepareEdDsaScalars",
      JubjubExp36 => "JubjubExp36",
      EdDsaVerify => "EdDsaVerify",
    }
  }

  /// Logical operator executed by an EVM arithmetic opcode.
  pub fn from_opcode(op: u8) -> Option<Self> {
    use ArithOp::*;
    Some(match op {
      0x01 => Add,
      0x02 => Mul,
      0x03 => Sub,
      0x04 => Div,
      0x05 => SDiv,
      0x06 => Mod,
      0x07 => SMod,
      0x08 => AddMod,
      0x09 => MulMod,
      0x0a => Exp,
      0x0b => SignExtend,
      0x10 => Lt,
      0x11 => Gt,
      0x12 => SLt,
      0x13 => SGt,
      0x14 => Eq,
      0x15 => IsZero,
      0x16 => And,
      0x17 => Or,
      0x18 => Xor,
      0x19 => Not,
      0x1a => Byte,
      0x1b => Shl,
      0x1c => Shr,
      0x1d => Sar,
      _ => return None,
    })
  }

  /// Physical subcircuit implementing this operator.
  pub fn subcircuit(self) -> &'static str {
    use ArithOp::*;
    match self {
      Add | Mul | Sub | Exp | Eq | IsZero | Not => "ALU1",
      Div | SDiv | Mod | SMod | AddMod | MulMod => "ALU2",
      Shl | Shr | Sar => "ALU3",
      Lt | Gt | SLt | SGt => "ALU4",
      SignExtend | Byte => "ALU5",
      And => "AND",
      Or => "OR",
      Xor => "XOR",
      DecToBit => "DecToBit",
      SubExp => "SubEXP",
      Accumulator => "Accumulator",
      Poseidon => "Poseidon",
      PrepareEdDsaScalars => "PrepareEdDsaScalars",
      JubjubExp36 => "JubjubExp36",
      EdDsaVerify => "EdDsaVerify",
    }
  }

  /// Selector prepended to the inputs of a shared ALU, `1 << k`.
  pub fn selector(self) -> Option<U256> {
    use ArithOp::*;
    let k = match self {
      Add => 1,
      Mul => 2,
      Sub => 3,
      Div => 4,
      SDiv => 5,
      Mod => 6,
      SMod => 7,
      AddMod => 8,
      MulMod => 9,
      Exp => 10,
      SignExtend => 11,
      Lt => 16,
      Gt => 17,
      SLt => 18,
      SGt => 19,
      Eq => 20,
      IsZero => 21,
      Not => 25,
      Byte => 26,
      Shl => 27,
      Shr => 28,
      Sar => 29,
      _ => return None,
    };
    Some(U256::from(1u64) << k)
  }

  /// ALUs whose first operand is a bit or byte position.
  pub fn has_position_operand(self) -> bool {
    matches!(self.subcircuit(), "ALU3" | "ALU5")
  }

  pub fn output_bit_size(self) -> u16 {
    use ArithOp::*;
    match self {
      DecToBit | PrepareEdDsaScalars => 1,
      Poseidon | JubjubExp36 | EdDsaVerify => 255,
      _ => 256,
    }
  }

  /// Exact number of operands, or `None` for variadic operators.
  pub fn arity(self) -> Option<usize> {
    use ArithOp::*;
    match self {
      IsZero | Not | DecToBit => Some(1),
      AddMod | MulMod | SubExp => Some(3),
      Poseidon => Some(poseidon::RATE),
      PrepareEdDsaScalars => Some(2),
      JubjubExp36 => Some(4 + JUBJUB_CHUNK_BITS),
      EdDsaVerify => Some(6),
      Accumulator => None,
      _ => Some(2),
    }
  }

  /// Every operator, in a stable order.
  pub const ALL: [ArithOp; 32] = {
    use ArithOp::*;
    [
      Add, Mul, Sub, Div, SDiv, Mod, SMod, AddMod, MulMod, Exp, Lt, Gt, SLt, SGt, Eq, IsZero, And,
      Or, Xor, Not, Byte, Shl, Shr, Sar, SignExtend, DecToBit, SubExp, Accumulator, Poseidon,
      PrepareEdDsaScalars, JubjubExp36, EdDsaVerify,
    ]
  };

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.iter().copied().find(|op| op.name() == name)
  }
}

// ============================================================
// Two's-complement helpers
// ============================================================

const SIGN_BIT: usize = 255;

fn is_negative(a: U256) -> bool {
  a.bit(SIGN_BIT)
}

fn twos_neg(a: U256) -> U256 {
  a.wrapping_neg()
}

fn abs(a: U256) -> U256 {
  if is_negative(a) { twos_neg(a) } else { a }
}

fn bool_word(b: bool) -> U256 {
  if b { U256::from(1u64) } else { U256::ZERO }
}

fn signed_lt(a: U256, b: U256) -> bool {
  match (is_negative(a), is_negative(b)) {
    (true, false) => true,
    (false, true) => false,
    _ => a < b,
  }
}

fn sdiv(a: U256, b: U256) -> U256 {
  if b.is_zero() {
    return U256::ZERO;
  }
  let q = abs(a) / abs(b);
  if is_negative(a) != is_negative(b) { twos_neg(q) } else { q }
}

fn smod(a: U256, b: U256) -> U256 {
  if b.is_zero() {
    return U256::ZERO;
  }
  let r = abs(a) % abs(b);
  if is_negative(a) { twos_neg(r) } else { r }
}

fn signextend(b: U256, x: U256) -> U256 {
  if b >= U256::from(31u64) {
    return x;
  }
  let bit = b.to::<usize>() * 8 + 7;
  let mask = (U256::from(1u64) << (bit + 1)) - U256::from(1u64);
  if x.bit(bit) { x | !mask } else { x & mask }
}

fn byte(i: U256, x: U256) -> U256 {
  if i >= U256::from(32u64) {
    return U256::ZERO;
  }
  let i = i.to::<usize>();
  U256::from(x.byte(31 - i))
}

fn shift_amount(shift: U256) -> Option<usize> {
  if shift >= U256::from(256u64) {
    None
  } else {
    Some(shift.to::<usize>())
  }
}

fn sar(shift: U256, value: U256) -> U256 {
  let negative = is_negative(value);
  match shift_amount(shift) {
    None => {
      if negative {
        U256::MAX
      } else {
        U256::ZERO
      }
    }
    Some(s) => {
      if negative {
        !((!value) >> s)
      } else {
        value >> s
      }
    }
  }
}

/// `n` bits of `value`, most significant first.
pub fn bits_msb_first(value: U256, n: usize) -> Vec<U256> {
  (0..n).rev().map(|i| bool_word(value.bit(i))).collect()
}

fn expect_bit(v: U256) -> Result<bool> {
  if v > U256::from(1u64) {
    return Err(SynthesisError::InvalidOperand(format!(
      "expected a bit, got {v:#x}"
    )));
  }
  Ok(v == U256::from(1u64))
}

fn expect_field(v: U256) -> Result<U256> {
  if !field::is_element(v) {
    return Err(SynthesisError::InvalidOperand(format!(
      "{v:#x} is not a scalar-field element"
    )));
  }
  Ok(v)
}

// ============================================================
// Evaluation
// ============================================================

/// Computes the outputs of `op` on `inputs` (operands only, no selector).
pub fn evaluate(op: ArithOp, inputs: &[U256]) -> Result<Vec<U256>> {
  use ArithOp::*;
  if let Some(n) = op.arity() {
    if inputs.len() != n {
      return Err(SynthesisError::InvalidOperand(format!(
        "{} expects {n} operands, got {}",
        op.name(),
        inputs.len()
      )));
    }
  } else if inputs.is_empty() {
    return Err(SynthesisError::InvalidOperand(format!(
      "{} expects at least one operand",
      op.name()
    )));
  }

  let a = inputs[0];
  let b = inputs.get(1).copied().unwrap_or_default();
  let single = |v: U256| -> Result<Vec<U256>> { Ok(vec![v]) };
  match op {
    Add => single(a.wrapping_add(b)),
    Mul => single(a.wrapping_mul(b)),
    Sub => single(a.wrapping_sub(b)),
    Div => single(a.checked_div(b).unwrap_or_default()),
    SDiv => single(sdiv(a, b)),
    Mod => single(a.checked_rem(b).unwrap_or_default()),
    SMod => single(smod(a, b)),
    AddMod => {
      let n = inputs[2];
      single(if n.is_zero() { U256::ZERO } else { a.add_mod(b, n) })
    }
    MulMod => {
      let n = inputs[2];
      single(if n.is_zero() { U256::ZERO } else { a.mul_mod(b, n) })
    }
    Exp => single(a.wrapping_pow(b)),
    Lt => single(bool_word(a < b)),
    Gt => single(bool_word(a > b)),
    SLt => single(bool_word(signed_lt(a, b))),
    SGt => single(bool_word(signed_lt(b, a))),
    Eq => single(bool_word(a == b)),
    IsZero => single(bool_word(a.is_zero())),
    And => single(a & b),
    Or => single(a | b),
    Xor => single(a ^ b),
    Not => single(!a),
    Byte => single(byte(a, b)),
    Shl => single(shift_amount(a).map(|s| b << s).unwrap_or_default()),
    Shr => single(shift_amount(a).map(|s| b >> s).unwrap_or_default()),
    Sar => single(sar(a, b)),
    SignExtend => single(signextend(a, b)),
    DecToBit => Ok(bits_msb_first(a, 256)),
    SubExp => {
      let bit = expect_bit(inputs[2])?;
      let c = if bit { a.wrapping_mul(b) } else { a };
      Ok(vec![c, b.wrapping_mul(b)])
    }
    Accumulator => single(inputs.iter().fold(U256::ZERO, |acc, v| acc.wrapping_add(*v))),
    Poseidon => {
      let mut words = [U256::ZERO; poseidon::RATE];
      for (w, v) in words.iter_mut().zip(inputs) {
        *w = expect_field(*v)?;
      }
      single(poseidon::hash4(&words))
    }
    PrepareEdDsaScalars => {
      let s = a.reduce_mod(jubjub::SUBGROUP_ORDER);
      let e = b.reduce_mod(jubjub::SUBGROUP_ORDER);
      let mut out = bits_msb_first(s, jubjub::SCALAR_BITS);
      out.extend(bits_msb_first(e, jubjub::SCALAR_BITS));
      Ok(out)
    }
    JubjubExp36 => {
      let mut p = Point::new(inputs[0], inputs[1])?;
      let mut g = Point::new(inputs[2], inputs[3])?;
      for bit in inputs[4..].iter().rev() {
        if expect_bit(*bit)? {
          p = p.add(&g);
        }
        g = g.double();
      }
      Ok(vec![p.x, p.y, g.x, g.y])
    }
    EdDsaVerify => {
      let sg = Point::new(inputs[0], inputs[1])?;
      let r = Point::new(inputs[2], inputs[3])?;
      let ea = Point::new(inputs[4], inputs[5])?;
      if sg != r.add(&ea) {
        return Err(SynthesisError::InvalidOperand(
          "EdDSA signature does not verify".into(),
        ));
      }
      Ok(Vec::new())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn u(v: u64) -> U256 {
    U256::from(v)
  }

  fn neg(v: u64) -> U256 {
    twos_neg(U256::from(v))
  }

  fn eval1(op: ArithOp, inputs: &[U256]) -> U256 {
    evaluate(op, inputs).expect("evaluation should succeed")[0]
  }

  #[test]
  fn unsigned_arithmetic_wraps() {
    assert_eq!(eval1(ArithOp::Add, &[u(5), u(7)]), u(12));
    assert_eq!(eval1(ArithOp::Add, &[U256::MAX, u(1)]), U256::ZERO);
    assert_eq!(eval1(ArithOp::Sub, &[u(3), u(5)]), neg(2));
    assert_eq!(eval1(ArithOp::Div, &[u(7), u(0)]), U256::ZERO);
    assert_eq!(eval1(ArithOp::Mod, &[u(7), u(0)]), U256::ZERO);
    assert_eq!(eval1(ArithOp::AddMod, &[U256::MAX, u(2), u(10)]), u(7));
    assert_eq!(eval1(ArithOp::MulMod, &[u(6), u(7), u(0)]), U256::ZERO);
    assert_eq!(eval1(ArithOp::Exp, &[u(2), u(10)]), u(1024));
  }

  #[test]
  fn signed_division_follows_twos_complement() {
    assert_eq!(eval1(ArithOp::SDiv, &[neg(8), u(3)]), neg(2));
    assert_eq!(eval1(ArithOp::SDiv, &[neg(8), neg(2)]), u(4));
    let int_min = U256::from(1u64) << 255;
    assert_eq!(eval1(ArithOp::SDiv, &[int_min, U256::MAX]), int_min);
    assert_eq!(eval1(ArithOp::SMod, &[neg(8), u(3)]), neg(2));
    assert_eq!(eval1(ArithOp::SMod, &[u(8), neg(3)]), u(2));
  }

  #[test]
  fn comparisons_and_bit_ops() {
    assert_eq!(eval1(ArithOp::SLt, &[neg(1), u(0)]), u(1));
    assert_eq!(eval1(ArithOp::SGt, &[neg(1), u(0)]), u(0));
    assert_eq!(eval1(ArithOp::Lt, &[neg(1), u(0)]), u(0));
    assert_eq!(eval1(ArithOp::IsZero, &[u(0)]), u(1));
    assert_eq!(eval1(ArithOp::Byte, &[u(31), u(0xabcd)]), u(0xcd));
    assert_eq!(eval1(ArithOp::Byte, &[u(32), u(0xabcd)]), U256::ZERO);
    assert_eq!(eval1(ArithOp::Shl, &[u(4), u(1)]), u(16));
    assert_eq!(eval1(ArithOp::Shr, &[u(256), U256::MAX]), U256::ZERO);
    assert_eq!(eval1(ArithOp::Sar, &[u(4), neg(32)]), neg(2));
    assert_eq!(eval1(ArithOp::Sar, &[u(300), neg(32)]), U256::MAX);
    assert_eq!(eval1(ArithOp::SignExtend, &[u(0), u(0xff)]), U256::MAX);
    assert_eq!(eval1(ArithOp::SignExtend, &[u(0), u(0x7f)]), u(0x7f));
  }

  #[test]
  fn dec_to_bit_is_msb_first() {
    let bits = evaluate(ArithOp::DecToBit, &[u(5)]).expect("decompose");
    assert_eq!(bits.len(), 256);
    assert_eq!(&bits[253..], &[u(1), u(0), u(1)]);
    assert!(bits[..253].iter().all(|b| b.is_zero()));
  }

  #[test]
  fn sub_exp_rejects_non_binary_selector_bit() {
    let err = evaluate(ArithOp::SubExp, &[u(1), u(3), u(2)]);
    assert!(matches!(err, Err(SynthesisError::InvalidOperand(_))));
    let out = evaluate(ArithOp::SubExp, &[u(2), u(3), u(1)]).expect("step");
    assert_eq!(out, vec![u(6), u(9)]);
  }

  #[test]
  fn jubjub_chunk_matches_scalar_multiplication() {
    let scalar = 0x9_8765_4321u64 & ((1 << JUBJUB_CHUNK_BITS) - 1);
    let g = Point::BASE;
    let mut inputs = vec![Point::IDENTITY.x, Point::IDENTITY.y, g.x, g.y];
    inputs.extend(bits_msb_first(u(scalar), JUBJUB_CHUNK_BITS));
    let out = evaluate(ArithOp::JubjubExp36, &inputs).expect("chunk");
    let expected = g.mul(u(scalar));
    assert_eq!((out[0], out[1]), (expected.x, expected.y));
    let doubled = g.mul(U256::from(1u64) << JUBJUB_CHUNK_BITS);
    assert_eq!((out[2], out[3]), (doubled.x, doubled.y));
  }

  #[test]
  fn eddsa_verify_accepts_only_matching_points() {
    let r = Point::BASE.mul(u(11));
    let ea = Point::BASE.mul(u(31));
    let sg = r.add(&ea);
    let good = [sg.x, sg.y, r.x, r.y, ea.x, ea.y];
    assert!(evaluate(ArithOp::EdDsaVerify, &good).expect("verifies").is_empty());
    let bad = [r.x, r.y, r.x, r.y, ea.x, ea.y];
    assert!(evaluate(ArithOp::EdDsaVerify, &bad).is_err());
  }

  #[test]
  fn sampled_add_and_mul_agree_with_u256() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for _ in 0..64 {
      let a = U256::from_limbs(rng.random::<[u64; 4]>());
      let b = U256::from_limbs(rng.random::<[u64; 4]>());
      assert_eq!(eval1(ArithOp::Add, &[a, b]), a.wrapping_add(b));
      assert_eq!(eval1(ArithOp::Mul, &[a, b]), a.wrapping_mul(b));
      assert_eq!(eval1(ArithOp::Xor, &[a, b]), a ^ b);
    }
  }

  #[test]
  fn names_round_trip() {
    for op in ArithOp::ALL {
      assert_eq!(ArithOp::from_name(op.name()), Some(op));
    }
    assert_eq!(ArithOp::Add.selector(), Some(u(2)));
    assert_eq!(ArithOp::And.selector(), None);
  }
}
