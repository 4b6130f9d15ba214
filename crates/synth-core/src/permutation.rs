//! Copy constraints between placements.
//!
//! Every interface wire (global id in `[l, l_D)`) of every placement lands
//! in exactly one group of wires that must carry equal values. A group is
//! seeded by an output wire and grows with every input that consumes it.
//! Local wire 0 of every subcircuit carries the constant 1; those wires form
//! one more group spanning all placements. Groups are then turned into
//! cycles: each member points at the next one, the last at the first.
//!
//! Rows are `globalWireId - l`, columns are placement indices.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::buffers::BufferKind;
use crate::error::{Result, SynthesisError};
use crate::refactor::FinalPlacement;
use crate::subcircuit::{SetupParams, SubcircuitInfo, SubcircuitLibrary};

/// One non-trivial edge of the permutation: wire `(row, col)` maps to
/// `(Z, Y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermutationLink {
  pub row: usize,
  pub col: usize,
  /// Placement of the next member.
  #[serde(rename = "Y")]
  pub y: usize,
  /// Row of the next member.
  #[serde(rename = "Z")]
  pub z: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
  rows: usize,
  cols: usize,
  links: Vec<PermutationLink>,
  /// `y_table[row * cols + col]`: placement of the next member.
  y_table: Vec<usize>,
  /// `z_table[row * cols + col]`: row of the next member.
  z_table: Vec<usize>,
  groups: usize,
}

impl Permutation {
  /// Identity permutation over `rows × cols` wires.
  fn identity(rows: usize, cols: usize) -> Self {
    Permutation {
      rows,
      cols,
      links: Vec::new(),
      y_table: (0..rows).flat_map(|_| 0..cols).collect(),
      z_table: (0..rows).flat_map(|row| std::iter::repeat_n(row, cols)).collect(),
      groups: 0,
    }
  }

  /// Number of serialized links.
  pub fn len(&self) -> usize {
    self.links.len()
  }

  pub fn is_empty(&self) -> bool {
    self.links.is_empty()
  }

  pub fn links(&self) -> &[PermutationLink] {
    &self.links
  }

  /// Number of groups with more than one member.
  pub fn group_count(&self) -> usize {
    self.groups
  }

  pub fn rows(&self) -> usize {
    self.rows
  }

  pub fn cols(&self) -> usize {
    self.cols
  }

  /// `(row, col)` of the member following `(row, col)` in its cycle.
  pub fn next(&self, row: usize, col: usize) -> Option<(usize, usize)> {
    if row >= self.rows || col >= self.cols {
      return None;
    }
    let at = row * self.cols + col;
    Some((self.z_table[at], self.y_table[at]))
  }

  fn link(&mut self, from: Member, to: Member) -> Result<()> {
    for (what, m) in [("source", from), ("target", to)] {
      if m.row >= self.rows || m.col >= self.cols {
        return Err(SynthesisError::PermutationInconsistent(format!(
          "{what} ({}, {}) is outside the {}×{} table",
          m.row, m.col, self.rows, self.cols
        )));
      }
    }
    let at = from.row * self.cols + from.col;
    self.y_table[at] = to.col;
    self.z_table[at] = to.row;
    self.links.push(PermutationLink {
      row: from.row,
      col: from.col,
      y: to.col,
      z: to.row,
    });
    Ok(())
  }
}

// ============================================================
// Groups
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Member {
  row: usize,
  col: usize,
}

/// Builds the copy-constraint permutation of a finalized placement list.
///
/// Placements are visited in increasing order, outputs before inputs, so the
/// member order inside each group (and with it the serialized cycles) is
/// reproducible.
#[instrument(skip_all, fields(placements = placements.len()))]
pub fn build_permutation(placements: &[FinalPlacement], library: &SubcircuitLibrary) -> Result<Permutation> {
  let params = *library.params();
  let infos = placements
    .iter()
    .map(|p| library.get(&p.name))
    .collect::<Result<Vec<&SubcircuitInfo>>>()?;

  let mut groups: Vec<Vec<Member>> = Vec::new();
  // out_group[p][w]: group seeded by output `w` of placement `p`
  let mut out_group: Vec<Vec<Option<usize>>> = Vec::with_capacity(placements.len());

  // Pass 1: every interface output seeds a group.
  for (col, (placement, info)) in placements.iter().zip(&infos).enumerate() {
    let mut seeded = vec![None; placement.out_pts.len()];
    for (w, slot) in seeded.iter_mut().enumerate() {
      let global = declared(info, w, info.global_output(w), "output", col)?;
      if let Some(row) = interface_row(&params, global) {
        *slot = Some(groups.len());
        groups.push(vec![Member { row, col }]);
      }
    }
    out_group.push(seeded);
  }

  // Pass 2: inputs join the group of the wire they consume.
  for (col, (placement, info)) in placements.iter().zip(&infos).enumerate() {
    for i in 0..info.num_inputs() {
      let Some(global) = info.global_input(i) else {
        continue;
      };
      let Some(row) = interface_row(&params, global) else {
        continue;
      };
      let member = Member { row, col };
      match placement.in_pts.get(i) {
        Some(wire) if wire.source != col => {
          let producer = placements.get(wire.source).ok_or_else(|| {
            SynthesisError::ProvenanceViolation(format!(
              "input {i} of placement {col} refers to missing placement {}",
              wire.source
            ))
          })?;
          let out = producer.out_pts.get(wire.wire_index).ok_or_else(|| {
            SynthesisError::ProvenanceViolation(format!(
              "input {i} of placement {col} refers to missing wire {} of placement {}",
              wire.wire_index, wire.source
            ))
          })?;
          if out.value != wire.value {
            return Err(SynthesisError::PermutationInconsistent(format!(
              "input {i} of placement {col} carries {:#x}, its producer {:#x}",
              wire.value, out.value
            )));
          }
          let group = out_group[wire.source][wire.wire_index].ok_or_else(|| {
            SynthesisError::PermutationInconsistent(format!(
              "input {i} of placement {col} consumes non-interface wire {} of placement {}",
              wire.wire_index, wire.source
            ))
          })?;
          groups[group].push(member);
        }
        Some(_) if is_input_buffer(col) => groups.push(vec![member]),
        None => groups.push(vec![member]),
        Some(wire) => {
          return Err(SynthesisError::ProvenanceViolation(format!(
            "input {i} of placement {col} ({}) carries {:#x} without a producer",
            placement.usage, wire.value
          )));
        }
      }
    }
  }

  // Pass 3: the constant wires of all placements share one group.
  let constants: Vec<Member> = infos
    .iter()
    .enumerate()
    .filter_map(|(col, info)| {
      let global = info.global_constant()?;
      interface_row(&params, global).map(|row| Member { row, col })
    })
    .collect();
  if !constants.is_empty() {
    groups.push(constants);
  }

  let cols = placements.len();
  let mut permutation = Permutation::identity(params.interface_width(), cols);
  for group in groups.iter().filter(|g| g.len() > 1) {
    for (k, member) in group.iter().enumerate() {
      permutation.link(*member, group[(k + 1) % group.len()])?;
    }
    permutation.groups += 1;
  }
  debug!(total_groups = groups.len(), "built copy-constraint groups");
  info!(
    groups = permutation.groups,
    links = permutation.links.len(),
    "built permutation"
  );
  Ok(permutation)
}

fn declared(info: &SubcircuitInfo, w: usize, global: Option<usize>, side: &str, col: usize) -> Result<usize> {
  global.ok_or_else(|| {
    SynthesisError::WireBookkeeping(format!(
      "placement {col} uses {side} wire {w}, {} declares fewer",
      info.name
    ))
  })
}

fn interface_row(params: &SetupParams, global: usize) -> Option<usize> {
  params.is_interface(global).then(|| global - params.l)
}

fn is_input_buffer(col: usize) -> bool {
  BufferKind::from_placement(col).is_some_and(BufferKind::is_input)
}

#[cfg(test)]
mod tests {
  use revm::primitives::U256;

  use super::*;
  use crate::refactor::{Limb, WirePt};
  use crate::subcircuit::LibraryCapacity;

  fn library() -> SubcircuitLibrary {
    SubcircuitLibrary::standard(&LibraryCapacity {
      public_out: 4,
      public_in: 4,
      block_in: 4,
      evm_in: 8,
      private_in: 4,
      accumulator_inputs: 4,
      s_max: 64,
    })
  }

  fn wire(source: usize, wire_index: usize, value: u64) -> WirePt {
    WirePt {
      source,
      wire_index,
      value: U256::from(value),
      source_bit_size: 64,
      limb: Limb::Whole,
      tag: None,
    }
  }

  fn placement(library: &SubcircuitLibrary, name: &str, in_pts: Vec<WirePt>, out_pts: Vec<WirePt>) -> FinalPlacement {
    FinalPlacement {
      subcircuit_id: library.get(name).expect("subcircuit").id,
      name: name.into(),
      usage: name.into(),
      in_pts,
      out_pts,
    }
  }

  /// Buffers, then `x = 3 AND 5` and `x AND x`.
  fn chain(library: &SubcircuitLibrary) -> Vec<FinalPlacement> {
    let evm_in = BufferKind::EvmIn.placement_index();
    let mut placements: Vec<FinalPlacement> = BufferKind::ALL
      .iter()
      .map(|kind| placement(library, kind.subcircuit_name(), vec![], vec![]))
      .collect();
    placements[evm_in].in_pts = vec![wire(evm_in, 0, 3), wire(evm_in, 1, 5)];
    placements[evm_in].out_pts = vec![wire(evm_in, 0, 3), wire(evm_in, 1, 5)];
    placements.push(placement(
      library,
      "AND",
      vec![wire(evm_in, 0, 3), wire(evm_in, 1, 5)],
      vec![wire(5, 0, 1)],
    ));
    placements.push(placement(library, "AND", vec![wire(5, 0, 1), wire(5, 0, 1)], vec![wire(6, 0, 1)]));
    placements
  }

  #[test]
  fn every_interface_wire_lands_in_exactly_one_group() {
    let library = library();
    let placements = chain(&library);
    let permutation = build_permutation(&placements, &library).expect("permutation");
    let params = library.params();

    let mut seen = std::collections::HashSet::new();
    for (col, p) in placements.iter().enumerate() {
      let info = library.get(&p.name).expect("info");
      let constant = info.global_constant().expect("declared");
      assert!(params.is_interface(constant));
      assert!(seen.insert((constant - params.l, col)));
      for w in 0..p.out_pts.len() {
        let global = info.global_output(w).expect("declared");
        if params.is_interface(global) {
          assert!(seen.insert((global - params.l, col)));
        }
      }
      for i in 0..info.num_inputs() {
        let global = info.global_input(i).expect("declared");
        if params.is_interface(global) {
          assert!(seen.insert((global - params.l, col)));
        }
      }
    }
    // every wire is either linked or left on the identity
    for (row, col) in &seen {
      let next = permutation.next(*row, *col).expect("in range");
      assert!(next == (*row, *col) || seen.contains(&next));
    }
    // three groups from the chain, plus the constant wires
    assert_eq!(permutation.group_count(), 4);
  }

  #[test]
  fn constant_wires_of_all_placements_form_one_cycle() {
    let library = library();
    let placements = chain(&library);
    let permutation = build_permutation(&placements, &library).expect("permutation");
    let l = library.params().l;
    let constant_row = |col: usize| {
      let info = library.get(&placements[col].name).expect("info");
      info.global_constant().expect("declared") - l
    };

    let start = (constant_row(0), 0);
    let mut visited = vec![start.1];
    let mut at = permutation.next(start.0, start.1).expect("in range");
    while at != start {
      assert_eq!(at.0, constant_row(at.1), "constant wire linked to a non-constant wire");
      visited.push(at.1);
      assert!(visited.len() <= placements.len(), "constant cycle never closes");
      at = permutation.next(at.0, at.1).expect("in range");
    }
    assert_eq!(visited, (0..placements.len()).collect::<Vec<_>>());
  }

  #[test]
  fn cycles_close_after_group_size_steps() {
    let library = library();
    let placements = chain(&library);
    let permutation = build_permutation(&placements, &library).expect("permutation");
    // output of the first AND feeds both inputs of the second: a 3-cycle
    let and = library.get("AND").expect("info");
    let start = (and.global_output(0).expect("wire") - library.params().l, 5);
    let mut at = start;
    for _ in 0..3 {
      at = permutation.next(at.0, at.1).expect("in range");
    }
    assert_eq!(at, start);
    for link in permutation.links() {
      assert!(permutation.next(link.row, link.col) == Some((link.z, link.y)));
    }
  }

  #[test]
  fn unequal_linked_values_are_rejected() {
    let library = library();
    let mut placements = chain(&library);
    placements[6].in_pts[1].value = U256::from(2u64);
    let err = build_permutation(&placements, &library).unwrap_err();
    assert!(matches!(err, SynthesisError::PermutationInconsistent(_)));
  }

  #[test]
  fn self_sourced_inputs_outside_buffers_are_rejected() {
    let library = library();
    let mut placements = chain(&library);
    placements[6].in_pts[0] = wire(6, 0, 1);
    let err = build_permutation(&placements, &library).unwrap_err();
    assert!(matches!(err, SynthesisError::ProvenanceViolation(_)));
  }

  #[test]
  fn links_serialize_with_single_letter_targets() {
    let link = PermutationLink { row: 1, col: 2, y: 3, z: 4 };
    let json = serde_json::to_string(&link).expect("serialize");
    assert_eq!(json, r#"{"row":1,"col":2,"Y":3,"Z":4}"#);
  }
}
