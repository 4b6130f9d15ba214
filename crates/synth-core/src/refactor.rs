//! Finalization of the placement list into field-sized wires.
//!
//! The synthesizer works with 256-bit words, the proving system with
//! elements of a 255-bit scalar field. Before the permutation is built,
//! every wider wire is split into two 128-bit limbs, unused constant loads
//! are dropped and buffer sizes are checked against the compiled library.

use std::collections::HashSet;

use revm::primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffers::BufferKind;
use crate::context::{PlacementEntry, SynthesisContext};
use crate::data_pt::{DataPt, Origin};
use crate::error::{Result, SynthesisError};
use crate::subcircuit::SubcircuitLibrary;

/// Widest wire that still fits a scalar-field element.
pub const MAX_FIELD_BITS: u16 = 255;
const LIMB_BITS: u16 = 128;

/// Which part of the original word a finalized wire carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Limb {
  Whole,
  Low,
  High,
}

/// A field-sized wire of a finalized placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WirePt {
  /// Placement owning the producing wire. External values are owned by the
  /// buffer placement that exposes them.
  pub source: usize,
  pub wire_index: usize,
  pub value: U256,
  pub source_bit_size: u16,
  pub limb: Limb,
  /// Tag of the external value, if this is the external side of a buffer.
  pub tag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalPlacement {
  pub subcircuit_id: usize,
  pub name: String,
  /// Operation the placement realizes (opcode or gadget name).
  pub usage: String,
  pub in_pts: Vec<WirePt>,
  pub out_pts: Vec<WirePt>,
}

// ============================================================
// Limbs
// ============================================================

struct Split {
  value: U256,
  bits: u16,
  limb: Limb,
}

fn split_word(value: U256, bits: u16) -> Vec<Split> {
  if bits <= MAX_FIELD_BITS {
    return vec![Split {
      value,
      bits,
      limb: Limb::Whole,
    }];
  }
  let low_mask = (U256::from(1u64) << LIMB_BITS) - U256::from(1u64);
  vec![
    Split {
      value: value & low_mask,
      bits: LIMB_BITS,
      limb: Limb::Low,
    },
    Split {
      value: value >> LIMB_BITS,
      bits: bits - LIMB_BITS,
      limb: Limb::High,
    },
  ]
}

/// Reassembles a word from its limbs, in the order they were produced.
pub fn join_limbs<'a>(limbs: impl IntoIterator<Item = (&'a Limb, U256)>) -> U256 {
  let mut word = U256::ZERO;
  for (limb, value) in limbs {
    match limb {
      Limb::Whole | Limb::Low => word |= value,
      Limb::High => word |= value << LIMB_BITS,
    }
  }
  word
}

fn external_tag(pt: &DataPt) -> Option<String> {
  match &pt.origin {
    Origin::External { tag, .. } => Some(tag.clone()),
    _ => None,
  }
}

// ============================================================
// Pruning
// ============================================================

/// Maps old `EVM_IN` wire indices to their index after pruning, dropping
/// pairs no other placement consumes.
fn prune_evm_in(placements: &[PlacementEntry]) -> Vec<Option<usize>> {
  let evm_in = BufferKind::EvmIn.placement_index();
  let used: HashSet<usize> = placements
    .iter()
    .enumerate()
    .filter(|(index, _)| *index != evm_in)
    .flat_map(|(_, placement)| placement.in_pts.iter())
    .filter_map(|pt| match pt.producer() {
      Some((p, w)) if p == evm_in => Some(w),
      _ => None,
    })
    .collect();

  let mut next = 0;
  (0..placements[evm_in].out_pts.len())
    .map(|w| {
      used.contains(&w).then(|| {
        next += 1;
        next - 1
      })
    })
    .collect()
}

// ============================================================
// Refactoring
// ============================================================

/// Produces the finalized placement list.
///
/// Producers are processed before their consumers. The public output buffer
/// consumes wires of later placements, so it is processed last, and its
/// external side is split like the wires it exposes.
pub fn refactor_placements(ctx: &SynthesisContext) -> Result<Vec<FinalPlacement>> {
  let placements = ctx.placements();
  let library = ctx.library();
  let evm_in = BufferKind::EvmIn.placement_index();
  let public_out = BufferKind::PublicOut.placement_index();
  let evm_in_map = prune_evm_in(placements);

  // tracker[p][w]: new indices of output `w` of placement `p` (after pruning)
  let mut tracker: Vec<Vec<Vec<usize>>> = vec![Vec::new(); placements.len()];
  let mut finals: Vec<Option<FinalPlacement>> = vec![None; placements.len()];

  let order = (0..placements.len())
    .filter(|index| *index != public_out)
    .chain(std::iter::once(public_out));
  for index in order {
    let entry = &placements[index];
    let (in_kept, out_kept): (Vec<&DataPt>, Vec<&DataPt>) = if index == evm_in {
      entry
        .in_pts
        .iter()
        .zip(&entry.out_pts)
        .enumerate()
        .filter(|(w, _)| evm_in_map[*w].is_some())
        .map(|(_, pair)| pair)
        .unzip()
    } else {
      (entry.in_pts.iter().collect(), entry.out_pts.iter().collect())
    };

    let mut in_pts = Vec::new();
    let mut in_splits = Vec::with_capacity(in_kept.len());
    for pt in &in_kept {
      let before = in_pts.len();
      match pt.producer() {
        Some((producer, old_wire)) if producer != index => {
          let bits = placements
            .get(producer)
            .and_then(|p| p.out_pts.get(old_wire))
            .map(|out| out.source_bit_size)
            .ok_or_else(|| {
              SynthesisError::ProvenanceViolation(format!(
                "placement {index} consumes missing wire {old_wire} of placement {producer}"
              ))
            })?;
          let wire = if producer == evm_in {
            evm_in_map.get(old_wire).copied().flatten().ok_or_else(|| {
              SynthesisError::WireBookkeeping(format!(
                "placement {index} consumes pruned constant wire {old_wire}"
              ))
            })?
          } else {
            old_wire
          };
          let targets = tracker
            .get(producer)
            .and_then(|outs| outs.get(wire))
            .ok_or_else(|| {
              SynthesisError::ProvenanceViolation(format!(
                "placement {index} consumes wire {wire} of placement {producer}, which was never finalized"
              ))
            })?;
          let parts = split_word(pt.value, bits);
          if parts.len() != targets.len() {
            return Err(SynthesisError::WireBookkeeping(format!(
              "placement {index}: limb count of wire {wire} of placement {producer} changed"
            )));
          }
          for (part, target) in parts.into_iter().zip(targets) {
            in_pts.push(WirePt {
              source: producer,
              wire_index: *target,
              value: part.value,
              source_bit_size: part.bits,
              limb: part.limb,
              tag: None,
            });
          }
        }
        _ => {
          for part in split_word(pt.value, pt.source_bit_size) {
            let wire_index = in_pts.len();
            in_pts.push(WirePt {
              source: index,
              wire_index,
              value: part.value,
              source_bit_size: part.bits,
              limb: part.limb,
              tag: external_tag(pt),
            });
          }
        }
      }
      in_splits.push(in_pts.len() - before);
    }

    let mut out_pts = Vec::new();
    let mut outs_tracker = Vec::with_capacity(out_kept.len());
    for (w, pt) in out_kept.iter().enumerate() {
      let parts = if index == public_out {
        in_pts
          .iter()
          .skip(in_splits[..w].iter().sum())
          .take(in_splits[w])
          .map(|wire| Split {
            value: wire.value,
            bits: wire.source_bit_size,
            limb: wire.limb,
          })
          .collect()
      } else {
        split_word(pt.value, pt.source_bit_size)
      };
      let mut indices = Vec::with_capacity(parts.len());
      for part in parts {
        indices.push(out_pts.len());
        out_pts.push(WirePt {
          source: index,
          wire_index: out_pts.len(),
          value: part.value,
          source_bit_size: part.bits,
          limb: part.limb,
          tag: external_tag(pt),
        });
      }
      outs_tracker.push(indices);
    }
    tracker[index] = outs_tracker;

    finals[index] = Some(FinalPlacement {
      subcircuit_id: entry.subcircuit_id,
      name: entry.subcircuit_name.clone(),
      usage: entry.operation_tag.clone(),
      in_pts,
      out_pts,
    });
  }

  let finals: Vec<FinalPlacement> = finals.into_iter().flatten().collect();
  check_capacity(&finals, library)?;
  debug!(
    placements = finals.len(),
    pruned = evm_in_map.iter().filter(|w| w.is_none()).count(),
    "refactored placements"
  );
  Ok(finals)
}

/// Every placement must fit its subcircuit, and the placement count must fit
/// the setup.
fn check_capacity(placements: &[FinalPlacement], library: &SubcircuitLibrary) -> Result<()> {
  let s_max = library.params().s_max;
  if placements.len() > s_max {
    return Err(SynthesisError::CapacityExceeded(format!(
      "{} placements exceed s_max = {s_max}",
      placements.len()
    )));
  }
  for (index, placement) in placements.iter().enumerate() {
    let info = library.get(&placement.name)?;
    if placement.in_pts.len() > info.num_inputs() {
      return Err(SynthesisError::CapacityExceeded(format!(
        "placement {index} ({}) has {} input wires, {} allows {}",
        placement.usage,
        placement.in_pts.len(),
        placement.name,
        info.num_inputs()
      )));
    }
    if placement.out_pts.len() > info.num_outputs() {
      return Err(SynthesisError::CapacityExceeded(format!(
        "placement {index} ({}) has {} output wires, {} allows {}",
        placement.usage,
        placement.out_pts.len(),
        placement.name,
        info.num_outputs()
      )));
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::config::SynthesizerConfig;
  use crate::operations::ArithOp;
  use crate::subcircuit::LibraryCapacity;

  fn context_with(capacity: &LibraryCapacity) -> SynthesisContext {
    let library = Arc::new(SubcircuitLibrary::standard(capacity));
    SynthesisContext::new(library, &SynthesizerConfig::default()).expect("context")
  }

  fn context() -> SynthesisContext {
    context_with(&LibraryCapacity::default())
  }

  #[test]
  fn wide_wires_are_split_into_limbs() {
    let mut ctx = context();
    let big = U256::MAX - U256::from(4u64);
    let a = ctx.load_static(big, None, None).expect("constant");
    let b = ctx.load_static(U256::from(7u64), Some(8), None).expect("constant");
    ctx.place_arith_one(ArithOp::Add, vec![a, b]).expect("add");

    let finals = refactor_placements(&ctx).expect("refactor");
    let add = finals.last().expect("placement");
    assert_eq!(add.usage, "ADD");
    // selector (128 bits), two limbs of `a`, `b` whole
    let limbs: Vec<Limb> = add.in_pts.iter().map(|w| w.limb).collect();
    assert_eq!(limbs, vec![Limb::Whole, Limb::Low, Limb::High, Limb::Whole]);
    assert_eq!(add.out_pts.len(), 2);
    let sum = join_limbs(add.out_pts.iter().map(|w| (&w.limb, w.value)));
    assert_eq!(sum, big.wrapping_add(U256::from(7u64)));

    let evm_in = &finals[BufferKind::EvmIn.placement_index()];
    assert_eq!(evm_in.in_pts.len(), evm_in.out_pts.len());
    for wire in &add.in_pts {
      assert_eq!(wire.source, BufferKind::EvmIn.placement_index());
      assert_eq!(evm_in.out_pts[wire.wire_index].value, wire.value);
    }
  }

  #[test]
  fn unused_constants_are_pruned() {
    let mut ctx = context();
    let used = ctx.load_static(U256::from(3u64), Some(8), None).expect("constant");
    ctx.load_static(U256::from(99u64), Some(8), None).expect("constant");
    ctx.place_arith_one(ArithOp::IsZero, vec![used]).expect("iszero");

    let finals = refactor_placements(&ctx).expect("refactor");
    let evm_in = &finals[BufferKind::EvmIn.placement_index()];
    let values: Vec<U256> = evm_in.out_pts.iter().map(|w| w.value).collect();
    assert!(values.contains(&U256::from(3u64)));
    assert!(!values.contains(&U256::from(99u64)));
    // reserved protocol constants nobody consumed are gone too
    assert!(!values.contains(&((U256::from(1u64) << 160) - U256::from(1u64))));
  }

  #[test]
  fn public_outputs_mirror_the_limbs_they_expose() {
    let mut ctx = context();
    let a = ctx.load_static(U256::MAX, None, None).expect("constant");
    let not = ctx.place_arith_one(ArithOp::Not, vec![a]).expect("not");
    let b = ctx.load_static(U256::from(1u64), Some(1), None).expect("constant");
    let sum = ctx.place_arith_one(ArithOp::Add, vec![not, b]).expect("add");
    ctx.add_wire_to_out_buffer(sum, "RETURN_DATA[0]").expect("export");

    let finals = refactor_placements(&ctx).expect("refactor");
    let out = &finals[BufferKind::PublicOut.placement_index()];
    assert_eq!(out.in_pts.len(), 2);
    assert_eq!(out.out_pts.len(), 2);
    for (inp, ext) in out.in_pts.iter().zip(&out.out_pts) {
      assert_eq!(inp.value, ext.value);
      assert_eq!(inp.limb, ext.limb);
      assert_eq!(ext.tag.as_deref(), Some("RETURN_DATA[0]"));
    }
  }

  #[test]
  fn oversized_buffers_are_rejected() {
    let mut ctx = context_with(&LibraryCapacity {
      evm_in: 2,
      ..LibraryCapacity::default()
    });
    let pts: Vec<DataPt> = (0..3)
      .map(|v| ctx.load_static(U256::from(v as u64 + 10), Some(8), None).expect("constant"))
      .collect();
    ctx.place_arith(ArithOp::Accumulator, pts).expect("accumulate");
    let err = refactor_placements(&ctx).unwrap_err();
    assert!(matches!(err, SynthesisError::CapacityExceeded(_)));
  }
}
