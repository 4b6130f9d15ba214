//! Arithmetic over the BLS12-381 scalar field, on plain `U256` words.

use revm::primitives::U256;

/// `r = 0x73eda753...00000001`, the BLS12-381 scalar field modulus.
pub const FR_MODULUS: U256 = U256::from_limbs([
  0xffff_ffff_0000_0001,
  0x53bd_a402_fffe_5bfe,
  0x3339_d808_09a1_d805,
  0x73ed_a753_299d_7d48,
]);

pub fn is_element(a: U256) -> bool {
  a < FR_MODULUS
}

pub fn reduce(a: U256) -> U256 {
  a.reduce_mod(FR_MODULUS)
}

pub fn add(a: U256, b: U256) -> U256 {
  a.add_mod(b, FR_MODULUS)
}

pub fn neg(a: U256) -> U256 {
  let a = reduce(a);
  if a.is_zero() { a } else { FR_MODULUS - a }
}

pub fn sub(a: U256, b: U256) -> U256 {
  add(a, neg(b))
}

pub fn mul(a: U256, b: U256) -> U256 {
  a.mul_mod(b, FR_MODULUS)
}

pub fn square(a: U256) -> U256 {
  mul(a, a)
}

pub fn pow(a: U256, e: U256) -> U256 {
  a.pow_mod(e, FR_MODULUS)
}

/// Multiplicative inverse; `None` for zero.
pub fn inv(a: U256) -> Option<U256> {
  reduce(a).inv_mod(FR_MODULUS)
}

fn legendre_is_residue(a: U256) -> bool {
  let exp = (FR_MODULUS - U256::from(1u64)) >> 1;
  pow(a, exp) == U256::from(1u64)
}

/// Square root by Tonelli-Shanks. `None` when `a` is a non-residue.
pub fn sqrt(a: U256) -> Option<U256> {
  let a = reduce(a);
  if a.is_zero() {
    return Some(a);
  }
  if !legendre_is_residue(a) {
    return None;
  }
  let one = U256::from(1u64);
  let p_minus_one = FR_MODULUS - one;
  let two_adicity = p_minus_one.trailing_zeros();
  let q = p_minus_one >> two_adicity;

  let mut z = U256::from(2u64);
  while legendre_is_residue(z) {
    z += one;
  }

  let mut m = two_adicity;
  let mut c = pow(z, q);
  let mut t = pow(a, q);
  let mut r = pow(a, (q + one) >> 1);
  while t != one {
    let mut i = 0usize;
    let mut t2i = t;
    while t2i != one {
      t2i = square(t2i);
      i += 1;
      if i == m {
        return None;
      }
    }
    let mut b = c;
    for _ in 0..(m - i - 1) {
      b = square(b);
    }
    m = i;
    c = square(b);
    t = mul(t, c);
    r = mul(r, b);
  }
  Some(r)
}

#[cfg(test)]
mod tests {
  use super::*;
  use rand::rngs::StdRng;
  use rand::{Rng, SeedableRng};

  fn random_element(rng: &mut StdRng) -> U256 {
    let limbs: [u64; 4] = rng.random();
    reduce(U256::from_limbs(limbs))
  }

  #[test]
  fn inverse_round_trips() {
    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..16 {
      let a = random_element(&mut rng);
      if a.is_zero() {
        continue;
      }
      let a_inv = inv(a).expect("nonzero element is invertible");
      assert_eq!(mul(a, a_inv), U256::from(1u64));
    }
    assert_eq!(inv(U256::ZERO), None);
  }

  #[test]
  fn sqrt_of_square_is_a_root() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..8 {
      let a = random_element(&mut rng);
      let root = sqrt(square(a)).expect("squares are residues");
      assert!(root == a || root == neg(a));
    }
  }

  #[test]
  fn subtraction_wraps_around_the_modulus() {
    let one = U256::from(1u64);
    assert_eq!(sub(U256::ZERO, one), FR_MODULUS - one);
    assert_eq!(add(FR_MODULUS - one, one), U256::ZERO);
  }
}
