//! Shadow of the EVM stack carrying provenance instead of raw words.

use revm::primitives::U256;

use crate::data_pt::{DataPt, Shadowed};
use crate::error::{Result, SynthesisError};

#[derive(Debug, Clone, Default)]
pub struct StackPt {
  /// Bottom first, like `interp.stack.data()`.
  items: Vec<DataPt>,
}

impl StackPt {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn push(&mut self, value: Shadowed) {
    self.items.push(value.into_pt());
  }

  /// Pops `n` pointers, most recent first.
  pub fn pop_n(&mut self, n: usize) -> Result<Vec<DataPt>> {
    if n > self.items.len() {
      return Err(SynthesisError::ProvenanceViolation(format!(
        "shadow stack holds {} items, {n} requested",
        self.items.len()
      )));
    }
    let split = self.items.len() - n;
    let mut popped = self.items.split_off(split);
    popped.reverse();
    Ok(popped)
  }

  /// Pops one pointer per concrete operand and checks each against it.
  pub fn pop_checked(&mut self, context: &str, concrete: &[U256]) -> Result<Vec<DataPt>> {
    let popped = self.pop_n(concrete.len())?;
    popped
      .into_iter()
      .zip(concrete)
      .map(|(pt, value)| Shadowed::new(context, *value, pt).map(Shadowed::into_pt))
      .collect()
  }

  /// `DUPn`: copies the `n`-th item from the top (1-based).
  pub fn dup(&mut self, n: usize) -> Result<()> {
    let len = self.items.len();
    if n == 0 || n > len {
      return Err(SynthesisError::ProvenanceViolation(format!(
        "DUP{n} on a shadow stack of {len}"
      )));
    }
    let item = self.items[len - n].clone();
    self.items.push(item);
    Ok(())
  }

  /// `SWAPn`: exchanges the top with the item `n` below it.
  pub fn swap(&mut self, n: usize) -> Result<()> {
    let len = self.items.len();
    if n == 0 || n >= len {
      return Err(SynthesisError::ProvenanceViolation(format!(
        "SWAP{n} on a shadow stack of {len}"
      )));
    }
    self.items.swap(len - 1, len - 1 - n);
    Ok(())
  }

  /// Item `depth` positions below the top.
  pub fn peek(&self, depth: usize) -> Option<&DataPt> {
    self.items.iter().rev().nth(depth)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data_pt::Origin;

  fn shadowed(v: u64) -> Shadowed {
    let pt = DataPt::new(U256::from(v), 256, Origin::external("test")).expect("pointer");
    Shadowed::new("test", U256::from(v), pt).expect("matching")
  }

  #[test]
  fn pops_most_recent_first() {
    let mut stack = StackPt::new();
    for v in [1, 2, 3] {
      stack.push(shadowed(v));
    }
    let popped = stack.pop_n(2).expect("pop");
    assert_eq!(popped[0].value, U256::from(3u64));
    assert_eq!(popped[1].value, U256::from(2u64));
    assert_eq!(stack.len(), 1);
  }

  #[test]
  fn dup_and_swap_mirror_the_evm() {
    let mut stack = StackPt::new();
    for v in [1, 2, 3] {
      stack.push(shadowed(v));
    }
    stack.dup(3).expect("dup3");
    assert_eq!(stack.peek(0).map(|pt| pt.value), Some(U256::from(1u64)));
    stack.swap(2).expect("swap2");
    assert_eq!(stack.peek(0).map(|pt| pt.value), Some(U256::from(2u64)));
    assert_eq!(stack.peek(2).map(|pt| pt.value), Some(U256::from(1u64)));
    assert!(stack.swap(4).is_err());
  }

  #[test]
  fn checked_pop_detects_divergence() {
    let mut stack = StackPt::new();
    stack.push(shadowed(5));
    let err = stack.pop_checked("POP", &[U256::from(6u64)]).unwrap_err();
    assert!(matches!(err, SynthesisError::ShadowMismatch { .. }));
  }
}
