//! Provenance-tagged values.
//!
//! A [`DataPt`] is a 256-bit word together with the circuit wire it lives on.
//! Handlers never hand raw numbers to the placement builder: every operand
//! is a `DataPt`, and every value pushed back to the shadow stack goes
//! through [`Shadowed`], which refuses to exist unless the symbolic value
//! agrees with the one the interpreter computed.

use revm::primitives::U256;

use crate::buffers::BufferKind;
use crate::error::{Result, SynthesisError};
use crate::operations::field::FR_MODULUS;

// ============================================================
// Origin
// ============================================================

/// Where a value comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
  /// A value supplied by the environment (block header, transaction,
  /// storage, protocol constant). Only legal as the external side of a
  /// buffer placement.
  External {
    tag: String,
    offset: Option<usize>,
    length: Option<usize>,
  },
  /// A wire exposed by one of the buffer placements.
  Buffer { buffer: BufferKind, wire_index: usize },
  /// An output wire of a previously emitted placement.
  Wire { placement: usize, wire_index: usize },
}

impl Origin {
  pub fn external(tag: impl Into<String>) -> Self {
    Origin::External {
      tag: tag.into(),
      offset: None,
      length: None,
    }
  }

  /// `(placement index, wire index)` of the producing wire, if any.
  pub fn producer(&self) -> Option<(usize, usize)> {
    match self {
      Origin::External { .. } => None,
      Origin::Buffer { buffer, wire_index } => Some((buffer.placement_index(), *wire_index)),
      Origin::Wire {
        placement,
        wire_index,
      } => Some((*placement, *wire_index)),
    }
  }

  pub fn is_external(&self) -> bool {
    matches!(self, Origin::External { .. })
  }
}

// ============================================================
// DataPt
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPt {
  pub value: U256,
  /// Number of significant bits the producing wire is allowed to carry.
  pub source_bit_size: u16,
  pub origin: Origin,
}

impl DataPt {
  /// Builds a pointer after checking that `value` fits `source_bit_size`.
  ///
  /// A 255-bit wire carries a scalar-field element and must be below the
  /// field modulus.
  pub fn new(value: U256, source_bit_size: u16, origin: Origin) -> Result<Self> {
    if source_bit_size == 0 || source_bit_size > 256 {
      return Err(SynthesisError::InvalidOperand(format!(
        "bit size {source_bit_size} out of range"
      )));
    }
    if value.bit_len() > source_bit_size as usize {
      return Err(SynthesisError::InvalidOperand(format!(
        "value {value:#x} does not fit in {source_bit_size} bits"
      )));
    }
    if source_bit_size == 255 && value >= FR_MODULUS {
      return Err(SynthesisError::InvalidOperand(format!(
        "value {value:#x} is not a scalar-field element"
      )));
    }
    Ok(DataPt {
      value,
      source_bit_size,
      origin,
    })
  }

  pub fn wire(placement: usize, wire_index: usize, value: U256, source_bit_size: u16) -> Result<Self> {
    DataPt::new(
      value,
      source_bit_size,
      Origin::Wire {
        placement,
        wire_index,
      },
    )
  }

  pub fn producer(&self) -> Option<(usize, usize)> {
    self.origin.producer()
  }

  /// Same wire, viewed with a narrower (or wider) bit budget.
  pub fn with_bit_size(&self, source_bit_size: u16) -> Self {
    DataPt {
      source_bit_size,
      ..self.clone()
    }
  }
}

/// Number of bits needed to hold `value`, at least one.
pub fn bit_size_of(value: U256) -> u16 {
  value.bit_len().max(1) as u16
}

// ============================================================
// Shadowed
// ============================================================

/// A symbolic value paired with the concrete word the interpreter holds.
///
/// The only constructor compares the two, so holding a `Shadowed` is proof
/// that the check happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shadowed {
  concrete: U256,
  pt: DataPt,
}

impl Shadowed {
  pub fn new(context: &str, concrete: U256, pt: DataPt) -> Result<Self> {
    if concrete != pt.value {
      return Err(SynthesisError::shadow(context, concrete, pt.value));
    }
    Ok(Shadowed { concrete, pt })
  }

  pub fn concrete(&self) -> U256 {
    self.concrete
  }

  pub fn pt(&self) -> &DataPt {
    &self.pt
  }

  pub fn into_pt(self) -> DataPt {
    self.pt
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_values_wider_than_their_wire() {
    let err = DataPt::new(U256::from(256u64), 8, Origin::external("test"));
    assert!(matches!(err, Err(SynthesisError::InvalidOperand(_))));
    assert!(DataPt::new(U256::from(255u64), 8, Origin::external("test")).is_ok());
  }

  #[test]
  fn rejects_non_field_elements_on_255_bit_wires() {
    let err = DataPt::new(FR_MODULUS, 255, Origin::external("test"));
    assert!(matches!(err, Err(SynthesisError::InvalidOperand(_))));
  }

  #[test]
  fn buffer_origin_resolves_to_buffer_placement() {
    let origin = Origin::Buffer {
      buffer: BufferKind::EvmIn,
      wire_index: 7,
    };
    assert_eq!(origin.producer(), Some((BufferKind::EvmIn.placement_index(), 7)));
    assert_eq!(Origin::external("x").producer(), None);
  }

  #[test]
  fn shadowed_refuses_mismatching_values() {
    let pt = DataPt::wire(9, 0, U256::from(12u64), 256).expect("valid pointer");
    assert!(Shadowed::new("ADD", U256::from(12u64), pt.clone()).is_ok());
    let err = Shadowed::new("ADD", U256::from(13u64), pt).unwrap_err();
    assert!(matches!(err, SynthesisError::ShadowMismatch { .. }));
  }
}
