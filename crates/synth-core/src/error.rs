//! Error taxonomy for circuit synthesis.
//!
//! Every failure is fatal for the transaction being synthesized; callers
//! discard any partial output.

use revm::primitives::U256;
use thiserror::Error;

/// Everything that can go wrong while turning an execution trace into a circuit.
#[derive(Debug, Error)]
pub enum SynthesisError {
  /// A symbolic value disagrees with the value the EVM actually computed.
  #[error("shadow mismatch at {context}: concrete {concrete:#x}, symbolic {symbolic:#x}")]
  ShadowMismatch {
    context: String,
    concrete: U256,
    symbolic: U256,
  },

  /// A wire was consumed before it was produced, or a consumed wire has no
  /// admissible producer.
  #[error("provenance violation: {0}")]
  ProvenanceViolation(String),

  /// Buffer or placement wire indices are not dense or not aligned with the
  /// subcircuit interface.
  #[error("wire bookkeeping: {0}")]
  WireBookkeeping(String),

  #[error("fan-in overflow: {got} inputs exceed the accumulator limit of {limit}")]
  FanInOverflow { got: usize, limit: usize },

  #[error("unknown subcircuit `{0}`")]
  UnknownSubcircuit(String),

  /// Copy constraints do not hold: linked wires carry different values or
  /// point at wires outside the interface range.
  #[error("permutation inconsistent: {0}")]
  PermutationInconsistent(String),

  #[error("unsupported opcode {opcode:#04x} ({reason})")]
  UnsupportedOpcode { opcode: u8, reason: String },

  /// An operand lies outside the domain of the gadget that consumes it.
  #[error("invalid operand: {0}")]
  InvalidOperand(String),

  #[error("capacity exceeded: {0}")]
  CapacityExceeded(String),

  /// The EVM collaborator failed before or while executing the transaction.
  #[error("execution failed: {0}")]
  Execution(String),

  #[error(transparent)]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = SynthesisError> = std::result::Result<T, E>;

impl SynthesisError {
  pub(crate) fn shadow(context: impl Into<String>, concrete: U256, symbolic: U256) -> Self {
    SynthesisError::ShadowMismatch {
      context: context.into(),
      concrete,
      symbolic,
    }
  }

  pub(crate) fn unsupported(opcode: u8, reason: impl Into<String>) -> Self {
    SynthesisError::UnsupportedOpcode {
      opcode,
      reason: reason.into(),
    }
  }
}
