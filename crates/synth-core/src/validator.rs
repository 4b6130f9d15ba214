//! Replay of finalized placements.
//!
//! A debugging aid: every placement is re-evaluated from its input wires,
//! the result compared against its declared outputs, and every copy
//! constraint checked against the replayed values.

use std::collections::HashMap;

use revm::primitives::U256;
use tracing::{debug, info, instrument, warn};

use crate::buffers::BufferKind;
use crate::error::{Result, SynthesisError};
use crate::operations::{self, ArithOp};
use crate::output::SynthesisOutput;
use crate::refactor::{FinalPlacement, Limb, MAX_FIELD_BITS, join_limbs};
use crate::subcircuit::SubcircuitInfo;

/// Evaluates one placement of a subcircuit.
pub trait SubcircuitEvaluator {
  /// Local variable vector `[1, outputs.., inputs.., internals..]`.
  /// Internals may be omitted; unused input and output slots are zero.
  fn evaluate(&self, info: &SubcircuitInfo, placement: &FinalPlacement) -> Result<Vec<U256>>;
}

/// Evaluator backed by the operator table instead of compiled circuits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceEvaluator;

impl SubcircuitEvaluator for ReferenceEvaluator {
  fn evaluate(&self, info: &SubcircuitInfo, placement: &FinalPlacement) -> Result<Vec<U256>> {
    let ins: Vec<U256> = placement.in_pts.iter().map(|w| w.value).collect();
    let outs = if BufferKind::ALL.iter().any(|k| k.subcircuit_name() == info.name) {
      ins.clone()
    } else {
      let op = ArithOp::from_name(&placement.usage)
        .filter(|op| op.subcircuit() == info.name)
        .ok_or_else(|| SynthesisError::UnknownSubcircuit(format!("{} on {}", placement.usage, info.name)))?;
      let mut words = join_words(placement)?;
      if let Some(selector) = op.selector() {
        if words.first() != Some(&selector) {
          return Err(SynthesisError::InvalidOperand(format!(
            "{} placement lacks its selector {selector:#x}",
            op.name()
          )));
        }
        words.remove(0);
      }
      let results = operations::evaluate(op, &words)?;
      split_like(&results, placement)?
    };
    let mut vars = Vec::with_capacity(1 + info.num_outputs() + info.num_inputs());
    vars.push(U256::from(1u64));
    vars.extend(padded(outs, info.num_outputs()));
    vars.extend(padded(ins, info.num_inputs()));
    Ok(vars)
  }
}

fn padded(mut values: Vec<U256>, len: usize) -> Vec<U256> {
  values.resize(len.max(values.len()), U256::ZERO);
  values
}

/// Reassembles the input words from their limbs.
fn join_words(placement: &FinalPlacement) -> Result<Vec<U256>> {
  let mut words = Vec::new();
  let mut wires = placement.in_pts.iter().peekable();
  while let Some(wire) = wires.next() {
    match wire.limb {
      Limb::Whole => words.push(wire.value),
      Limb::Low => {
        let high = wires.next_if(|w| w.limb == Limb::High).ok_or_else(|| {
          SynthesisError::WireBookkeeping(format!("{}: low limb without its high limb", placement.usage))
        })?;
        words.push(join_limbs([(&wire.limb, wire.value), (&high.limb, high.value)]));
      }
      Limb::High => {
        return Err(SynthesisError::WireBookkeeping(format!(
          "{}: high limb without its low limb",
          placement.usage
        )));
      }
    }
  }
  Ok(words)
}

/// Splits evaluated words the way the placement's outputs are split.
fn split_like(results: &[U256], placement: &FinalPlacement) -> Result<Vec<U256>> {
  let low_mask = (U256::from(1u64) << 128) - U256::from(1u64);
  let mut words = results.iter();
  let mut current = U256::ZERO;
  placement
    .out_pts
    .iter()
    .map(|wire| {
      if wire.limb != Limb::High {
        current = *words.next().ok_or_else(|| {
          SynthesisError::WireBookkeeping(format!("{} declares more outputs than it computes", placement.usage))
        })?;
      }
      Ok(match wire.limb {
        Limb::Whole => current,
        Limb::Low => current & low_mask,
        Limb::High => current >> 128,
      })
    })
    .collect()
}

/// Replays every placement and compares the declared outputs.
///
/// Returns the variable vector of every placement, in placement order.
#[instrument(skip_all)]
pub fn validate_instances(output: &SynthesisOutput, evaluator: &impl SubcircuitEvaluator) -> Result<Vec<Vec<U256>>> {
  let mut variables = Vec::with_capacity(output.placements.len());
  for (index, placement) in output.placements.iter().enumerate() {
    let info = output.library.get(&placement.name)?;
    let vars = evaluator.evaluate(info, placement)?;
    for (w, wire) in placement.out_pts.iter().enumerate() {
      let replayed = vars.get(1 + w).copied().unwrap_or_default();
      if replayed != wire.value {
        return Err(SynthesisError::shadow(
          format!("replay of placement {index} ({}) output {w}", placement.usage),
          wire.value,
          replayed,
        ));
      }
      if wire.source_bit_size > MAX_FIELD_BITS {
        return Err(SynthesisError::WireBookkeeping(format!(
          "placement {index} output {w} is {} bits wide",
          wire.source_bit_size
        )));
      }
    }
    variables.push(vars);
  }
  debug!(placements = variables.len(), "replayed placements");
  Ok(variables)
}

/// Checks that every copy constraint links equal values.
#[instrument(skip_all)]
pub fn validate_permutation(output: &SynthesisOutput, variables: &[Vec<U256>]) -> Result<()> {
  let params = output.library.params();
  let mut locals: HashMap<&str, HashMap<usize, usize>> = HashMap::new();
  for info in output.library.infos() {
    let reverse = info
      .flatten_map
      .iter()
      .enumerate()
      .map(|(local, global)| (*global, local))
      .collect();
    locals.insert(info.name.as_str(), reverse);
  }

  let value_at = |row: usize, col: usize| -> Result<U256> {
    let placement = output.placements.get(col).ok_or_else(|| {
      SynthesisError::PermutationInconsistent(format!("column {col} has no placement"))
    })?;
    let global = row + params.l;
    let local = locals
      .get(placement.name.as_str())
      .and_then(|m| m.get(&global))
      .ok_or_else(|| {
        SynthesisError::PermutationInconsistent(format!(
          "{} has no wire with global id {global}",
          placement.name
        ))
      })?;
    Ok(
      variables
        .get(col)
        .and_then(|vars| vars.get(*local))
        .copied()
        .unwrap_or_default(),
    )
  };

  let links = output.permutation.links();
  if links.is_empty() {
    warn!("permutation has no copy constraints");
  }
  for link in links {
    let from = value_at(link.row, link.col)?;
    let to = value_at(link.z, link.y)?;
    if from != to {
      return Err(SynthesisError::PermutationInconsistent(format!(
        "({}, {}) = {from:#x} is linked to ({}, {}) = {to:#x}",
        link.row, link.col, link.z, link.y
      )));
    }
  }
  info!(links = links.len(), "permutation holds");
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::config::SynthesizerConfig;
  use crate::context::SynthesisContext;
  use crate::permutation::build_permutation;
  use crate::refactor::refactor_placements;
  use crate::subcircuit::{LibraryCapacity, SubcircuitLibrary};

  fn finalize(ctx: &SynthesisContext) -> SynthesisOutput {
    let placements = refactor_placements(ctx).expect("refactor");
    let library = ctx.shared_library();
    let permutation = build_permutation(&placements, &library).expect("permutation");
    SynthesisOutput {
      library,
      placements,
      permutation,
    }
  }

  fn context() -> SynthesisContext {
    let library = Arc::new(SubcircuitLibrary::standard(&LibraryCapacity::default()));
    SynthesisContext::new(library, &SynthesizerConfig::default()).expect("context")
  }

  #[test]
  fn replay_accepts_an_honest_chain() {
    let mut ctx = context();
    let a = ctx.load_static(U256::MAX - U256::from(1u64), None, None).expect("constant");
    let b = ctx.load_static(U256::from(3u64), Some(8), None).expect("constant");
    let sum = ctx.place_arith_one(ArithOp::Add, vec![a.clone(), b.clone()]).expect("add");
    let product = ctx.place_arith_one(ArithOp::Mul, vec![sum, b]).expect("mul");
    let e = ctx.load_static(U256::from(5u64), Some(8), None).expect("constant");
    let power = ctx.place_exp(product, e).expect("exp");
    ctx.add_wire_to_out_buffer(power, "RETURN_DATA[0]").expect("export");

    let output = finalize(&ctx);
    let variables = validate_instances(&output, &ReferenceEvaluator).expect("instances");
    assert_eq!(variables.len(), output.placements.len());
    validate_permutation(&output, &variables).expect("permutation");
  }

  #[test]
  fn replay_catches_a_tampered_output() {
    let mut ctx = context();
    let a = ctx.load_static(U256::from(6u64), Some(8), None).expect("constant");
    let b = ctx.load_static(U256::from(7u64), Some(8), None).expect("constant");
    ctx.place_arith_one(ArithOp::Mul, vec![a, b]).expect("mul");

    let mut output = finalize(&ctx);
    let last = output.placements.last_mut().expect("placement");
    last.out_pts[0].value = U256::from(43u64);
    let err = validate_instances(&output, &ReferenceEvaluator).unwrap_err();
    assert!(matches!(err, SynthesisError::ShadowMismatch { .. }));
  }

  #[test]
  fn permutation_check_catches_diverging_replays() {
    let mut ctx = context();
    let a = ctx.load_static(U256::from(6u64), Some(8), None).expect("constant");
    let sum = ctx.place_arith_one(ArithOp::Add, vec![a.clone(), a]).expect("add");
    ctx.place_arith_one(ArithOp::IsZero, vec![sum]).expect("iszero");

    let output = finalize(&ctx);
    let mut variables = validate_instances(&output, &ReferenceEvaluator).expect("instances");
    let add = output.placements.len() - 2;
    variables[add][1] = U256::from(99u64);
    let err = validate_permutation(&output, &variables).unwrap_err();
    assert!(matches!(err, SynthesisError::PermutationInconsistent(_)));
  }
}
