//! Twisted Edwards arithmetic on Jubjub (`-x^2 + y^2 = 1 + d x^2 y^2` over
//! the BLS12-381 scalar field), in affine coordinates.

use revm::primitives::U256;

use super::field;
use crate::error::{Result, SynthesisError};

pub const EDWARDS_D: U256 = U256::from_limbs([
  0x0106_5fd6_d634_3eb1,
  0x292d_7f6d_3757_9d26,
  0xf5fd_9207_e6bd_7fd4,
  0x2a93_18e7_4bfa_2b48,
]);

/// Order of the prime-order subgroup generated by [`Point::BASE`].
pub const SUBGROUP_ORDER: U256 = U256::from_limbs([
  0xd097_0e5e_d6f7_2cb7,
  0xa668_2093_ccc8_1082,
  0x0667_3b01_0134_3b00,
  0x0e7d_b4ea_6533_afa9,
]);

/// Bits in a reduced scalar.
pub const SCALAR_BITS: usize = 252;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
  pub x: U256,
  pub y: U256,
}

impl Point {
  /// The neutral element `(0, 1)`.
  pub const IDENTITY: Point = Point {
    x: U256::ZERO,
    y: U256::from_limbs([1, 0, 0, 0]),
  };

  pub const BASE: Point = Point {
    x: U256::from_limbs([
      0x3e6b_0714_92d1_122b,
      0xe72f_6afd_7d1f_7262,
      0x86a3_65b9_9fbf_3d3b,
      0x11da_fe5d_23e1_2180,
    ]),
    y: U256::from_limbs([
      0xcc3f_870e_59d2_92aa,
      0x3e26_ba5c_c220_fed7,
      0x9313_2e78_c866_c0c3,
      0x1d52_3cf1_ddab_1a17,
    ]),
  };

  pub fn new(x: U256, y: U256) -> Result<Point> {
    let point = Point { x, y };
    if !point.is_on_curve() {
      return Err(SynthesisError::InvalidOperand(format!(
        "({x:#x}, {y:#x}) is not a Jubjub point"
      )));
    }
    Ok(point)
  }

  pub fn is_on_curve(&self) -> bool {
    if !field::is_element(self.x) || !field::is_element(self.y) {
      return false;
    }
    let xx = field::square(self.x);
    let yy = field::square(self.y);
    let lhs = field::sub(yy, xx);
    let rhs = field::add(U256::from(1u64), field::mul(EDWARDS_D, field::mul(xx, yy)));
    lhs == rhs
  }

  /// Complete twisted Edwards addition with `a = -1`.
  pub fn add(&self, other: &Point) -> Point {
    let one = U256::from(1u64);
    let t = field::mul(EDWARDS_D, field::mul(field::mul(self.x, other.x), field::mul(self.y, other.y)));
    let x_num = field::add(field::mul(self.x, other.y), field::mul(self.y, other.x));
    let y_num = field::add(field::mul(self.y, other.y), field::mul(self.x, other.x));
    // Nonzero for curve points.
    let x_den = field::inv(field::add(one, t)).unwrap_or_default();
    let y_den = field::inv(field::sub(one, t)).unwrap_or_default();
    Point {
      x: field::mul(x_num, x_den),
      y: field::mul(y_num, y_den),
    }
  }

  pub fn double(&self) -> Point {
    self.add(self)
  }

  /// Double-and-add over the bits of `scalar`, least significant first.
  pub fn mul(&self, scalar: U256) -> Point {
    let mut acc = Point::IDENTITY;
    let mut base = *self;
    for i in 0..scalar.bit_len() {
      if scalar.bit(i) {
        acc = acc.add(&base);
      }
      base = base.double();
    }
    acc
  }

  /// Recovers a point from its `y` coordinate, choosing the root with the
  /// requested parity of `x`.
  pub fn from_y(y: U256, odd_x: bool) -> Option<Point> {
    let one = U256::from(1u64);
    let yy = field::square(y);
    let num = field::sub(yy, one);
    let den = field::inv(field::add(one, field::mul(EDWARDS_D, yy)))?;
    let x = field::sqrt(field::mul(num, den))?;
    let x = if x.bit(0) == odd_x { x } else { field::neg(x) };
    Some(Point { x, y })
  }
}
