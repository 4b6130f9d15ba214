//! Values supplied to the synthesizer before the first interpreter step.

use std::path::Path;

use revm::primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SynthesisError};
use crate::operations::jubjub::Point;

/// Number of previous block hashes exposed through `BLOCKHASH`.
pub const NUMBER_OF_PREV_BLOCK_HASHES: usize = 256;

/// Fan-in of the compiled `Accumulator` subcircuit.
pub const ACCUMULATOR_INPUT_LIMIT: usize = 32;

pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 30_000_000;

pub const DEFAULT_CHAIN_ID: u64 = 1;

/// The block a transaction executes in. The interpreter runs on exactly
/// these values, and the circuit exposes them as block inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockInfo {
  pub coinbase: Address,
  pub timestamp: U256,
  pub number: U256,
  pub prevrandao: U256,
  pub gas_limit: U256,
  pub chain_id: U256,
  pub base_fee: U256,
  /// Most recent first: `block_hashes[0]` is the parent block's hash.
  pub block_hashes: Vec<B256>,
}

impl Default for BlockInfo {
  fn default() -> Self {
    BlockInfo {
      coinbase: Address::ZERO,
      timestamp: U256::ZERO,
      number: U256::ZERO,
      prevrandao: U256::ZERO,
      gas_limit: U256::from(DEFAULT_BLOCK_GAS_LIMIT),
      chain_id: U256::from(DEFAULT_CHAIN_ID),
      base_fee: U256::ZERO,
      block_hashes: Vec::new(),
    }
  }
}

fn as_u64(value: U256, what: &str) -> Result<u64> {
  u64::try_from(value).map_err(|_| SynthesisError::InvalidOperand(format!("{what} {value:#x} does not fit 64 bits")))
}

impl BlockInfo {
  pub fn gas_limit_u64(&self) -> Result<u64> {
    as_u64(self.gas_limit, "block gas limit")
  }

  pub fn chain_id_u64(&self) -> Result<u64> {
    as_u64(self.chain_id, "chain id")
  }

  pub fn base_fee_u64(&self) -> Result<u64> {
    as_u64(self.base_fee, "base fee")
  }

  /// Block numbers paired with their hashes, skipping hashes that would
  /// precede the genesis block.
  pub fn numbered_hashes(&self) -> impl Iterator<Item = (U256, B256)> + '_ {
    self
      .block_hashes
      .iter()
      .enumerate()
      .filter_map(|(i, hash)| self.number.checked_sub(U256::from(i + 1)).map(|n| (n, *hash)))
  }
}

/// A Jubjub point in affine coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffinePoint {
  pub x: U256,
  pub y: U256,
}

impl From<Point> for AffinePoint {
  fn from(p: Point) -> Self {
    AffinePoint { x: p.x, y: p.y }
  }
}

/// EdDSA material authenticating the transaction sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EddsaAuth {
  pub public_key: AffinePoint,
  pub randomizer: AffinePoint,
  pub signature: U256,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionInfo {
  pub origin: Address,
  pub contract: Address,
  pub calldata: Bytes,
  pub value: U256,
  pub nonce: u64,
  pub auth: Option<EddsaAuth>,
}

impl TransactionInfo {
  /// First four calldata bytes, zero-padded.
  pub fn function_selector(&self) -> U256 {
    let mut selector = [0u8; 4];
    let n = self.calldata.len().min(4);
    selector[..n].copy_from_slice(&self.calldata[..n]);
    U256::from(u32::from_be_bytes(selector))
  }

  /// Calldata after the selector, as zero-padded 32-byte words.
  pub fn input_words(&self) -> Vec<U256> {
    if self.calldata.len() <= 4 {
      return Vec::new();
    }
    self.calldata[4..]
      .chunks(32)
      .map(|chunk| {
        let mut word = [0u8; 32];
        word[..chunk.len()].copy_from_slice(chunk);
        U256::from_be_bytes(word)
      })
      .collect()
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
  pub accumulator_input_limit: usize,
  pub number_of_block_hashes: usize,
}

impl Default for Limits {
  fn default() -> Self {
    Limits {
      accumulator_input_limit: ACCUMULATOR_INPUT_LIMIT,
      number_of_block_hashes: NUMBER_OF_PREV_BLOCK_HASHES,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesizerConfig {
  pub block: BlockInfo,
  pub transaction: TransactionInfo,
  pub limits: Limits,
}

impl SynthesizerConfig {
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
    let raw = std::fs::read_to_string(path)?;
    let config: SynthesizerConfig = serde_json::from_str(&raw)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    if self.limits.accumulator_input_limit < 2 {
      return Err(SynthesisError::InvalidOperand(
        "accumulator fan-in must be at least 2".into(),
      ));
    }
    if self.block.block_hashes.len() > self.limits.number_of_block_hashes {
      return Err(SynthesisError::CapacityExceeded(format!(
        "{} block hashes supplied, at most {} are exposed",
        self.block.block_hashes.len(),
        self.limits.number_of_block_hashes
      )));
    }
    self.block.gas_limit_u64()?;
    self.block.chain_id_u64()?;
    self.block.base_fee_u64()?;
    if let Some(auth) = &self.transaction.auth {
      Point::new(auth.public_key.x, auth.public_key.y)?;
      Point::new(auth.randomizer.x, auth.randomizer.y)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn selector_and_words_split_calldata() {
    let mut calldata = vec![0xa9, 0x05, 0x9c, 0xbb];
    calldata.extend_from_slice(&[0u8; 31]);
    calldata.push(0x01);
    calldata.extend_from_slice(&[0xff, 0xee]);
    let tx = TransactionInfo {
      calldata: Bytes::from(calldata),
      ..Default::default()
    };
    assert_eq!(tx.function_selector(), U256::from(0xa905_9cbbu64));
    let words = tx.input_words();
    assert_eq!(words.len(), 2);
    assert_eq!(words[0], U256::from(1u64));
    assert_eq!(words[1], U256::from(0xffeeu64) << 240);
  }

  #[test]
  fn config_parses_from_json_with_defaults() {
    let raw = r#"{
      "block": { "number": "0x10", "chain_id": "0x1" },
      "transaction": { "nonce": 3 }
    }"#;
    let config: SynthesizerConfig = serde_json::from_str(raw).expect("parse");
    assert_eq!(config.block.number, U256::from(16u64));
    assert_eq!(config.transaction.nonce, 3);
    assert_eq!(config.limits, Limits::default());
    config.validate().expect("valid");
  }

  #[test]
  fn block_defaults_admit_a_transaction() {
    let block = BlockInfo::default();
    assert_eq!(block.gas_limit_u64().expect("gas limit"), DEFAULT_BLOCK_GAS_LIMIT);
    assert_eq!(block.chain_id_u64().expect("chain id"), DEFAULT_CHAIN_ID);
  }

  #[test]
  fn rejects_block_fields_the_interpreter_cannot_hold() {
    let mut config = SynthesizerConfig::default();
    config.block.base_fee = U256::from(1u64) << 64;
    assert!(matches!(config.validate(), Err(SynthesisError::InvalidOperand(_))));
  }

  #[test]
  fn block_hashes_are_numbered_back_from_the_current_block() {
    let block = BlockInfo {
      number: U256::from(2u64),
      block_hashes: vec![B256::repeat_byte(1), B256::repeat_byte(2), B256::repeat_byte(3)],
      ..Default::default()
    };
    let numbered: Vec<_> = block.numbered_hashes().collect();
    assert_eq!(
      numbered,
      vec![(U256::from(1u64), B256::repeat_byte(1)), (U256::ZERO, B256::repeat_byte(2))]
    );
  }

  #[test]
  fn rejects_off_curve_keys() {
    let mut config = SynthesizerConfig::default();
    config.transaction.auth = Some(EddsaAuth {
      public_key: AffinePoint {
        x: U256::from(1u64),
        y: U256::from(1u64),
      },
      randomizer: Point::BASE.into(),
      signature: U256::ZERO,
    });
    assert!(config.validate().is_err());
  }
}
