//! Buffer placements and the reserved variables they expose.
//!
//! The first [`BufferKind::COUNT`] placements are zero-logic buffers. Input
//! buffers turn external values into wires; the output buffer exposes
//! wires as public outputs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BufferKind {
  /// Public outputs: keccak pre-images, logs, returned data, storage writes.
  PublicOut,
  /// Public inputs: keccak digests, signer key, storage reads.
  PublicIn,
  /// Block header fields.
  BlockIn,
  /// Constants and environment values loaded by the interpreter.
  EvmIn,
  /// Transaction fields and signature witnesses.
  PrivateIn,
}

impl BufferKind {
  pub const COUNT: usize = 5;
  pub const ALL: [BufferKind; Self::COUNT] = [
    BufferKind::PublicOut,
    BufferKind::PublicIn,
    BufferKind::BlockIn,
    BufferKind::EvmIn,
    BufferKind::PrivateIn,
  ];

  pub fn placement_index(self) -> usize {
    self as usize
  }

  pub fn from_placement(index: usize) -> Option<Self> {
    Self::ALL.get(index).copied()
  }

  pub fn subcircuit_name(self) -> &'static str {
    match self {
      BufferKind::PublicOut => "bufferPubOut",
      BufferKind::PublicIn => "bufferPubIn",
      BufferKind::BlockIn => "bufferBlockIn",
      BufferKind::EvmIn => "bufferEVMIn",
      BufferKind::PrivateIn => "bufferPrvIn",
    }
  }

  /// Input buffers turn external values into wires.
  pub fn is_input(self) -> bool {
    !matches!(self, BufferKind::PublicOut)
  }

  /// Whether the buffer's external side lives in the public wire range.
  pub fn has_public_side(self) -> bool {
    !matches!(self, BufferKind::PrivateIn)
  }
}

// ============================================================
// Reserved variables
// ============================================================

/// Named slots allocated once, when the context is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReservedVariable {
  // BLOCK_IN
  Coinbase,
  Timestamp,
  Number,
  Prevrandao,
  GasLimit,
  ChainId,
  BaseFee,
  /// Hash of the block `n` blocks before the current one (`n >= 1`).
  BlockHash(usize),
  // EVM_IN
  AddressMask,
  JubjubBaseX,
  JubjubBaseY,
  JubjubPoiX,
  JubjubPoiY,
  // PUBLIC_IN
  EddsaPublicKeyX,
  EddsaPublicKeyY,
  // PRIVATE_IN
  ContractAddress,
  FunctionSelector,
  TransactionNonce,
  TransactionInput(usize),
  EddsaSignature,
  EddsaRandomizerX,
  EddsaRandomizerY,
  /// Transaction origin, when no signature is available to derive it.
  Origin,
}

impl ReservedVariable {
  pub fn buffer(self) -> BufferKind {
    use ReservedVariable::*;
    match self {
      Coinbase | Timestamp | Number | Prevrandao | GasLimit | ChainId | BaseFee
      | BlockHash(_) => BufferKind::BlockIn,
      AddressMask | JubjubBaseX | JubjubBaseY | JubjubPoiX | JubjubPoiY => BufferKind::EvmIn,
      EddsaPublicKeyX | EddsaPublicKeyY => BufferKind::PublicIn,
      ContractAddress | FunctionSelector | TransactionNonce | TransactionInput(_)
      | EddsaSignature | EddsaRandomizerX | EddsaRandomizerY | Origin => BufferKind::PrivateIn,
    }
  }

  pub fn bit_size(self) -> u16 {
    use ReservedVariable::*;
    match self {
      Coinbase | AddressMask | ContractAddress | Origin => 160,
      FunctionSelector => 32,
      TransactionNonce => 64,
      JubjubBaseX | JubjubBaseY | JubjubPoiX | JubjubPoiY | EddsaPublicKeyX | EddsaPublicKeyY
      | EddsaSignature | EddsaRandomizerX | EddsaRandomizerY => 255,
      Timestamp | Number | Prevrandao | GasLimit | ChainId | BaseFee
      | BlockHash(_) | TransactionInput(_) => 256,
    }
  }

  pub fn description(self) -> String {
    use ReservedVariable::*;
    match self {
      Coinbase => "COINBASE".into(),
      Timestamp => "TIMESTAMP".into(),
      Number => "NUMBER".into(),
      Prevrandao => "PREVRANDAO".into(),
      GasLimit => "GASLIMIT".into(),
      ChainId => "CHAINID".into(),
      BaseFee => "BASEFEE".into(),
      BlockHash(n) => format!("BLOCKHASH_{n}"),
      AddressMask => "ADDRESS_MASK".into(),
      JubjubBaseX => "JUBJUB_BASE_X".into(),
      JubjubBaseY => "JUBJUB_BASE_Y".into(),
      JubjubPoiX => "JUBJUB_POI_X".into(),
      JubjubPoiY => "JUBJUB_POI_Y".into(),
      EddsaPublicKeyX => "EDDSA_PUBLIC_KEY_X".into(),
      EddsaPublicKeyY => "EDDSA_PUBLIC_KEY_Y".into(),
      ContractAddress => "CONTRACT_ADDRESS".into(),
      FunctionSelector => "FUNCTION_SELECTOR".into(),
      TransactionNonce => "TRANSACTION_NONCE".into(),
      TransactionInput(i) => format!("TRANSACTION_INPUT{i}"),
      EddsaSignature => "EDDSA_SIGNATURE".into(),
      EddsaRandomizerX => "EDDSA_RANDOMIZER_X".into(),
      EddsaRandomizerY => "EDDSA_RANDOMIZER_Y".into(),
      Origin => "TRANSACTION_ORIGIN".into(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn buffer_indices_follow_declaration_order() {
    for (i, kind) in BufferKind::ALL.iter().enumerate() {
      assert_eq!(kind.placement_index(), i);
      assert_eq!(BufferKind::from_placement(i), Some(*kind));
    }
    assert_eq!(BufferKind::from_placement(BufferKind::COUNT), None);
  }

  #[test]
  fn reserved_variables_land_in_expected_buffers() {
    assert_eq!(ReservedVariable::BlockHash(3).buffer(), BufferKind::BlockIn);
    assert_eq!(ReservedVariable::AddressMask.buffer(), BufferKind::EvmIn);
    assert_eq!(ReservedVariable::EddsaPublicKeyY.buffer(), BufferKind::PublicIn);
    assert_eq!(ReservedVariable::TransactionInput(2).buffer(), BufferKind::PrivateIn);
    assert_eq!(ReservedVariable::TransactionInput(2).description(), "TRANSACTION_INPUT2");
  }
}
