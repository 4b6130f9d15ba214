//! Poseidon permutation over the BLS12-381 scalar field, width 5 (rate 4),
//! with `x^5` S-boxes, 8 full and 60 partial rounds.
//!
//! Round constants are `keccak256(DOMAIN || be32(i)) mod r`; the MDS matrix
//! is the Cauchy matrix `1 / (i + (WIDTH + j))`.

use std::sync::OnceLock;

use revm::primitives::{U256, keccak256};

use super::field;

pub const WIDTH: usize = 5;
pub const RATE: usize = WIDTH - 1;
pub const FULL_ROUNDS: usize = 8;
pub const PARTIAL_ROUNDS: usize = 60;

const DOMAIN: &[u8] = b"synth.poseidon.bls12-381.t5";

struct Params {
  round_constants: Vec<[U256; WIDTH]>,
  mds: [[U256; WIDTH]; WIDTH],
}

fn params() -> &'static Params {
  static PARAMS: OnceLock<Params> = OnceLock::new();
  PARAMS.get_or_init(|| {
    let rounds = FULL_ROUNDS + PARTIAL_ROUNDS;
    let mut counter = 0u32;
    let mut round_constants = Vec::with_capacity(rounds);
    for _ in 0..rounds {
      let mut row = [U256::ZERO; WIDTH];
      for c in row.iter_mut() {
        let mut preimage = DOMAIN.to_vec();
        preimage.extend_from_slice(&counter.to_be_bytes());
        *c = field::reduce(U256::from_be_bytes(keccak256(&preimage).0));
        counter += 1;
      }
      round_constants.push(row);
    }

    let mut mds = [[U256::ZERO; WIDTH]; WIDTH];
    for (i, row) in mds.iter_mut().enumerate() {
      for (j, entry) in row.iter_mut().enumerate() {
        let denom = U256::from((i + WIDTH + j) as u64);
        *entry = field::inv(denom).unwrap_or_default();
      }
    }
    Params {
      round_constants,
      mds,
    }
  })
}

fn sbox(x: U256) -> U256 {
  let x2 = field::square(x);
  field::mul(field::square(x2), x)
}

fn mix(state: &[U256; WIDTH], mds: &[[U256; WIDTH]; WIDTH]) -> [U256; WIDTH] {
  let mut out = [U256::ZERO; WIDTH];
  for (i, row) in mds.iter().enumerate() {
    out[i] = row
      .iter()
      .zip(state.iter())
      .fold(U256::ZERO, |acc, (m, s)| field::add(acc, field::mul(*m, *s)));
  }
  out
}

pub fn permute(mut state: [U256; WIDTH]) -> [U256; WIDTH] {
  let params = params();
  let half_full = FULL_ROUNDS / 2;
  for (round, constants) in params.round_constants.iter().enumerate() {
    for (s, c) in state.iter_mut().zip(constants.iter()) {
      *s = field::add(*s, *c);
    }
    let full = round < half_full || round >= half_full + PARTIAL_ROUNDS;
    if full {
      for s in state.iter_mut() {
        *s = sbox(*s);
      }
    } else {
      state[0] = sbox(state[0]);
    }
    state = mix(&state, &params.mds);
  }
  state
}

/// 4-to-1 compression. Inputs must already be field elements.
pub fn hash4(inputs: &[U256; RATE]) -> U256 {
  let mut state = [U256::ZERO; WIDTH];
  state[1..].copy_from_slice(inputs);
  permute(state)[0]
}

/// Hashes any number of field elements by compressing zero-padded groups of
/// four, then the group digests, until one digest remains.
pub fn hash_many(inputs: &[U256]) -> U256 {
  let mut layer: Vec<U256> = inputs.to_vec();
  loop {
    let next: Vec<U256> = layer
      .chunks(RATE)
      .map(|chunk| {
        let mut words = [U256::ZERO; RATE];
        words[..chunk.len()].copy_from_slice(chunk);
        hash4(&words)
      })
      .collect();
    if next.len() <= 1 {
      return next.first().copied().unwrap_or_else(|| hash4(&[U256::ZERO; RATE]));
    }
    layer = next;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hash_is_deterministic_and_input_sensitive() {
    let a = [U256::from(1u64), U256::from(2u64), U256::from(3u64), U256::from(4u64)];
    let mut b = a;
    b[3] = U256::from(5u64);
    assert_eq!(hash4(&a), hash4(&a));
    assert_ne!(hash4(&a), hash4(&b));
    assert!(field::is_element(hash4(&a)));
  }

  #[test]
  fn short_inputs_are_zero_padded() {
    let words = [U256::from(7u64), U256::from(8u64)];
    let padded = [words[0], words[1], U256::ZERO, U256::ZERO];
    assert_eq!(hash_many(&words), hash4(&padded));
  }

  #[test]
  fn long_inputs_fold_their_group_digests() {
    let words: Vec<U256> = (1..=7u64).map(U256::from).collect();
    let first = hash4(&[words[0], words[1], words[2], words[3]]);
    let second = hash4(&[words[4], words[5], words[6], U256::ZERO]);
    assert_eq!(hash_many(&words), hash4(&[first, second, U256::ZERO, U256::ZERO]));
  }

  #[test]
  fn parameters_have_expected_shape() {
    for row in params().mds.iter() {
      for entry in row {
        assert!(!entry.is_zero());
      }
    }
    assert_eq!(params().round_constants.len(), FULL_ROUNDS + PARTIAL_ROUNDS);
  }
}
