//! Placement of arithmetic, hashing and curve gadgets.
//!
//! Each method evaluates its operator on the concrete values carried by
//! the input pointers, emits one (or a chain of) placements and returns the
//! resulting output pointers.

use revm::primitives::U256;
use tracing::debug;

use crate::buffers::ReservedVariable;
use crate::context::SynthesisContext;
use crate::data_pt::DataPt;
use crate::error::{Result, SynthesisError};
use crate::operations::{self, ArithOp, JUBJUB_CHUNK_BITS, jubjub, poseidon};

/// Largest meaningful bit or byte position operand.
const MAX_POSITION_OPERAND: u64 = 255;

/// Calldata words covered by the EdDSA signature. Together with the
/// randomizer, key, nonce, contract and selector they fill four Poseidon
/// groups exactly.
pub const SIGNED_INPUT_WORDS: usize = 9;

/// A Jubjub point as a pair of coordinate wires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointPt {
  pub x: DataPt,
  pub y: DataPt,
}

impl SynthesisContext {
  /// Places one operator on its physical subcircuit.
  pub fn place_arith(&mut self, op: ArithOp, in_pts: Vec<DataPt>) -> Result<Vec<DataPt>> {
    let values: Vec<U256> = in_pts.iter().map(|pt| pt.value).collect();
    if op.has_position_operand() && values.first().is_some_and(|v| *v > U256::from(MAX_POSITION_OPERAND)) {
      return Err(SynthesisError::InvalidOperand(format!(
        "{} position operand {:#x} exceeds {MAX_POSITION_OPERAND}",
        op.name(),
        values[0]
      )));
    }
    if op == ArithOp::Accumulator {
      let limit = self.limits().accumulator_input_limit;
      if in_pts.len() > limit {
        return Err(SynthesisError::FanInOverflow {
          got: in_pts.len(),
          limit,
        });
      }
    }
    let outputs = operations::evaluate(op, &values)?;

    let inputs = match op.selector() {
      Some(selector) => {
        let description = format!("ALU selector for {} of {}", op.name(), op.subcircuit());
        let selector_pt = self.load_static(selector, Some(128), Some(&description))?;
        let mut inputs = Vec::with_capacity(in_pts.len() + 1);
        inputs.push(selector_pt);
        inputs.extend(in_pts);
        inputs
      }
      None => in_pts,
    };
    self.place(op.subcircuit(), inputs, &outputs, op.output_bit_size(), op.name())
  }

  /// Single-output convenience over [`Self::place_arith`].
  pub fn place_arith_one(&mut self, op: ArithOp, in_pts: Vec<DataPt>) -> Result<DataPt> {
    self
      .place_arith(op, in_pts)?
      .into_iter()
      .next()
      .ok_or_else(|| SynthesisError::WireBookkeeping(format!("{} produced no output", op.name())))
  }

  /// `a ** b` as a square-and-multiply chain of `SubEXP` placements over the
  /// bits of `b`.
  pub fn place_exp(&mut self, a: DataPt, b: DataPt) -> Result<DataPt> {
    if b.value.is_zero() {
      return self.load_static(U256::from(1u64), Some(1), None);
    }
    if b.value == U256::from(1u64) {
      return Ok(a);
    }
    let steps = b.value.bit_len();
    let mut bits = self.place_arith(ArithOp::DecToBit, vec![b])?;
    bits.reverse();

    let mut acc = self.load_static(U256::from(1u64), Some(1), None)?;
    let mut base = a;
    for bit in bits.into_iter().take(steps) {
      let mut outs = self.place_arith(ArithOp::SubExp, vec![acc, base, bit])?.into_iter();
      match (outs.next(), outs.next()) {
        (Some(c), Some(squared)) => {
          acc = c;
          base = squared;
        }
        _ => {
          return Err(SynthesisError::WireBookkeeping(
            "SubEXP must produce two outputs".into(),
          ));
        }
      }
    }
    Ok(acc)
  }

  /// Poseidon digest of any number of field-element wires.
  pub fn place_poseidon(&mut self, in_pts: &[DataPt]) -> Result<DataPt> {
    let mut layer: Vec<DataPt> = in_pts.to_vec();
    loop {
      let mut next = Vec::with_capacity(layer.len().div_ceil(poseidon::RATE));
      for chunk in layer.chunks(poseidon::RATE) {
        let mut words = chunk.to_vec();
        while words.len() < poseidon::RATE {
          words.push(self.load_static(U256::ZERO, Some(1), None)?);
        }
        next.push(self.place_arith_one(ArithOp::Poseidon, words)?);
      }
      match next.len() {
        0 => {
          let zero = self.load_static(U256::ZERO, Some(1), None)?;
          return self.place_arith_one(ArithOp::Poseidon, vec![zero; poseidon::RATE]);
        }
        1 => return next.pop().ok_or_else(|| SynthesisError::WireBookkeeping("empty digest".into())),
        _ => layer = next,
      }
    }
  }

  /// `poi + scalar * base`, scalar given as its 252 bits most significant
  /// first. Chunks are processed least significant first.
  pub fn place_jubjub_exp(&mut self, base: PointPt, scalar_bits: &[DataPt], poi: PointPt) -> Result<PointPt> {
    if scalar_bits.len() != jubjub::SCALAR_BITS {
      return Err(SynthesisError::InvalidOperand(format!(
        "expected {} scalar bits, got {}",
        jubjub::SCALAR_BITS,
        scalar_bits.len()
      )));
    }
    let chunks: Vec<&[DataPt]> = scalar_bits.chunks(JUBJUB_CHUNK_BITS).collect();
    let mut p = poi;
    let mut g = base;
    for chunk in chunks.iter().rev() {
      let mut inputs = vec![p.x, p.y, g.x, g.y];
      inputs.extend_from_slice(chunk);
      let outs = self.place_arith(ArithOp::JubjubExp36, inputs)?;
      let [px, py, gx, gy]: [DataPt; 4] = outs.try_into().map_err(|_| {
        SynthesisError::WireBookkeeping("JubjubExp36 must produce four outputs".into())
      })?;
      p = PointPt { x: px, y: py };
      g = PointPt { x: gx, y: gy };
    }
    Ok(p)
  }

  /// The transaction origin.
  ///
  /// With an EdDSA key configured the origin is derived in-circuit: the
  /// signature over the transaction is verified and the address is the
  /// masked Poseidon digest of the public key. Otherwise it is a private
  /// input.
  pub fn origin_pt(&mut self) -> Result<DataPt> {
    if let Some(origin) = &self.cached_origin {
      return Ok(origin.clone());
    }
    let origin = if self.has_reserved(ReservedVariable::EddsaPublicKeyX) {
      self.derive_origin()?
    } else {
      self.reserved(ReservedVariable::Origin)?
    };
    self.cached_origin = Some(origin.clone());
    Ok(origin)
  }

  fn derive_origin(&mut self) -> Result<DataPt> {
    use ReservedVariable::*;
    let r = PointPt {
      x: self.reserved(EddsaRandomizerX)?,
      y: self.reserved(EddsaRandomizerY)?,
    };
    let a = PointPt {
      x: self.reserved(EddsaPublicKeyX)?,
      y: self.reserved(EddsaPublicKeyY)?,
    };
    let mut message = vec![
      r.x.clone(),
      r.y.clone(),
      a.x.clone(),
      a.y.clone(),
      self.reserved(TransactionNonce)?,
      self.reserved(ContractAddress)?,
      self.reserved(FunctionSelector)?,
    ];
    if self.has_reserved(TransactionInput(SIGNED_INPUT_WORDS)) {
      return Err(SynthesisError::CapacityExceeded(format!(
        "signed transactions carry at most {SIGNED_INPUT_WORDS} input words"
      )));
    }
    for i in 0..SIGNED_INPUT_WORDS {
      let word = if self.has_reserved(TransactionInput(i)) {
        self.reserved(TransactionInput(i))?
      } else {
        self.load_static(U256::ZERO, Some(1), None)?
      };
      message.push(word);
    }
    let challenge = self.place_poseidon(&message)?;

    let signature = self.reserved(EddsaSignature)?;
    let bits = self.place_arith(ArithOp::PrepareEdDsaScalars, vec![signature, challenge])?;
    let (s_bits, e_bits) = bits.split_at(jubjub::SCALAR_BITS);

    let generator = PointPt {
      x: self.reserved(JubjubBaseX)?,
      y: self.reserved(JubjubBaseY)?,
    };
    let poi = PointPt {
      x: self.reserved(JubjubPoiX)?,
      y: self.reserved(JubjubPoiY)?,
    };
    let s_g = self.place_jubjub_exp(generator, s_bits, poi.clone())?;
    let e_a = self.place_jubjub_exp(a.clone(), e_bits, poi)?;
    self.place_arith(
      ArithOp::EdDsaVerify,
      vec![s_g.x, s_g.y, r.x, r.y, e_a.x, e_a.y],
    )?;

    let key_hash = self.place_poseidon(&[a.x, a.y])?;
    let mask = self.reserved(AddressMask)?;
    let origin = self.place_arith_one(ArithOp::And, vec![key_hash, mask])?;
    debug!(origin = %format!("{:#x}", origin.value), "derived origin from EdDSA signature");
    Ok(origin)
  }
}
