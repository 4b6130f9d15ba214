//! Static metadata about the compiled subcircuit library.
//!
//! Every subcircuit has the local wire layout `[1, outputs.., inputs..,
//! internals..]`. The `flatten_map` sends each local wire to its position in
//! the global wire space, which is split into public wires `[0, l)`,
//! interface wires `[l, l_D)` and internal wires `[l_D, m_D)`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::buffers::BufferKind;
use crate::error::{Result, SynthesisError};
use crate::operations::{ArithOp, JUBJUB_CHUNK_BITS, jubjub, poseidon};

// ============================================================
// Types
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubcircuitInfo {
  pub id: usize,
  pub name: String,
  #[serde(rename = "Nwires")]
  pub total_wire_count: usize,
  /// `(first local wire, count)` of the outputs.
  #[serde(rename = "Out_idx")]
  pub output_range: (usize, usize),
  /// `(first local wire, count)` of the inputs.
  #[serde(rename = "In_idx")]
  pub input_range: (usize, usize),
  #[serde(rename = "flattenMap", default)]
  pub flatten_map: Vec<usize>,
}

impl SubcircuitInfo {
  pub fn num_outputs(&self) -> usize {
    self.output_range.1
  }

  pub fn num_inputs(&self) -> usize {
    self.input_range.1
  }

  /// Global id of local wire 0, which always carries 1.
  pub fn global_constant(&self) -> Option<usize> {
    self.flatten_map.first().copied()
  }

  /// Global id of the `i`-th output wire.
  pub fn global_output(&self, i: usize) -> Option<usize> {
    if i >= self.num_outputs() {
      return None;
    }
    self.flatten_map.get(self.output_range.0 + i).copied()
  }

  /// Global id of the `i`-th input wire.
  pub fn global_input(&self, i: usize) -> Option<usize> {
    if i >= self.num_inputs() {
      return None;
    }
    self.flatten_map.get(self.input_range.0 + i).copied()
  }
}

/// Global sizes fixed by the setup ceremony.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupParams {
  /// Number of public wires.
  pub l: usize,
  /// End of the interface wire range.
  #[serde(rename = "l_D")]
  pub l_d: usize,
  /// Total number of global wires.
  #[serde(rename = "m_D")]
  pub m_d: usize,
  /// Maximum number of placements.
  pub s_max: usize,
}

impl SetupParams {
  pub fn is_interface(&self, global: usize) -> bool {
    global >= self.l && global < self.l_d
  }

  pub fn interface_width(&self) -> usize {
    self.l_d - self.l
  }
}

// ============================================================
// Library
// ============================================================

#[derive(Debug, Clone)]
pub struct SubcircuitLibrary {
  params: SetupParams,
  infos: Vec<SubcircuitInfo>,
  by_name: HashMap<String, usize>,
}

impl SubcircuitLibrary {
  pub fn new(params: SetupParams, infos: Vec<SubcircuitInfo>) -> Result<Self> {
    let mut by_name = HashMap::with_capacity(infos.len());
    for (pos, info) in infos.iter().enumerate() {
      if info.flatten_map.len() != info.total_wire_count {
        return Err(SynthesisError::WireBookkeeping(format!(
          "{}: flatten map covers {} of {} wires",
          info.name,
          info.flatten_map.len(),
          info.total_wire_count
        )));
      }
      if info.output_range.0 + info.output_range.1 > info.input_range.0
        || info.input_range.0 + info.input_range.1 > info.total_wire_count
      {
        return Err(SynthesisError::WireBookkeeping(format!(
          "{}: inconsistent output/input ranges",
          info.name
        )));
      }
      if let Some(bad) = info.flatten_map.iter().find(|g| **g >= params.m_d) {
        return Err(SynthesisError::WireBookkeeping(format!(
          "{}: global wire {bad} is beyond m_D = {}",
          info.name, params.m_d
        )));
      }
      if by_name.insert(info.name.clone(), pos).is_some() {
        return Err(SynthesisError::WireBookkeeping(format!(
          "duplicate subcircuit `{}`",
          info.name
        )));
      }
    }
    for kind in BufferKind::ALL {
      if !by_name.contains_key(kind.subcircuit_name()) {
        return Err(SynthesisError::UnknownSubcircuit(kind.subcircuit_name().into()));
      }
    }
    Ok(SubcircuitLibrary {
      params,
      infos,
      by_name,
    })
  }

  /// Loads `subcircuitInfo.json` and `setupParams.json` as emitted by the
  /// library compiler.
  pub fn from_json_files(info_path: impl AsRef<Path>, params_path: impl AsRef<Path>) -> Result<Self> {
    let infos = std::fs::read_to_string(info_path)?;
    let params = std::fs::read_to_string(params_path)?;
    Self::from_json_str(&infos, &params)
  }

  pub fn from_json_str(infos: &str, params: &str) -> Result<Self> {
    let infos: Vec<SubcircuitInfo> = serde_json::from_str(infos)?;
    let params: SetupParams = serde_json::from_str(params)?;
    Self::new(params, infos)
  }

  pub fn params(&self) -> &SetupParams {
    &self.params
  }

  pub fn infos(&self) -> &[SubcircuitInfo] {
    &self.infos
  }

  pub fn get(&self, name: &str) -> Result<&SubcircuitInfo> {
    self
      .by_name
      .get(name)
      .map(|pos| &self.infos[*pos])
      .ok_or_else(|| SynthesisError::UnknownSubcircuit(name.into()))
  }

  pub fn by_id(&self, id: usize) -> Option<&SubcircuitInfo> {
    self.infos.iter().find(|info| info.id == id)
  }

  pub fn buffer(&self, kind: BufferKind) -> Result<&SubcircuitInfo> {
    self.get(kind.subcircuit_name())
  }

  /// Builds a self-consistent library with the interface every operator of
  /// the synthesizer expects. Wire counts are in field-element limbs.
  pub fn standard(capacity: &LibraryCapacity) -> Self {
    let mut specs: Vec<WireSpec> = BufferKind::ALL
      .iter()
      .map(|kind| {
        let n = capacity.buffer(*kind);
        WireSpec {
          name: kind.subcircuit_name().to_string(),
          outputs: n,
          inputs: n,
          internals: 0,
          public: match kind {
            BufferKind::PublicOut => PublicSide::Outputs,
            BufferKind::PrivateIn => PublicSide::None,
            _ => PublicSide::Inputs,
          },
        }
      })
      .collect();

    let gadget = |name: &str, outputs: usize, inputs: usize, internals: usize| WireSpec {
      name: name.to_string(),
      outputs,
      inputs,
      internals,
      public: PublicSide::None,
    };
    specs.extend([
      gadget("ALU1", 2, 5, 803),
      gadget("ALU2", 2, 7, 1596),
      gadget("ALU3", 2, 5, 548),
      gadget("ALU4", 2, 5, 629),
      gadget("ALU5", 2, 5, 560),
      gadget("AND", 2, 4, 512),
      gadget("OR", 2, 4, 512),
      gadget("XOR", 2, 4, 512),
      gadget("DecToBit", 256, 2, 2),
      gadget("SubEXP", 4, 5, 1040),
      gadget("Accumulator", 2, 2 * capacity.accumulator_inputs, 2 * capacity.accumulator_inputs),
      // 256-bit words arrive as two limbs
      gadget("Poseidon", 1, 2 * poseidon::RATE, 240),
      gadget("PrepareEdDsaScalars", 2 * jubjub::SCALAR_BITS, 2, 520),
      gadget("JubjubExp36", 4, 4 + JUBJUB_CHUNK_BITS, 36 * 12),
      gadget("EdDsaVerify", 0, 6, 16),
    ]);
    debug_assert!(
      ArithOp::ALL
        .iter()
        .all(|op| specs.iter().any(|s| s.name == op.subcircuit()))
    );

    let library = layout(specs, capacity.s_max);
    debug!(
      l = library.params.l,
      l_d = library.params.l_d,
      m_d = library.params.m_d,
      "built standard subcircuit library"
    );
    library
  }
}

/// Sizes of the parts of [`SubcircuitLibrary::standard`] that depend on the
/// workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryCapacity {
  pub public_out: usize,
  pub public_in: usize,
  pub block_in: usize,
  pub evm_in: usize,
  pub private_in: usize,
  pub accumulator_inputs: usize,
  pub s_max: usize,
}

impl Default for LibraryCapacity {
  fn default() -> Self {
    LibraryCapacity {
      public_out: 128,
      public_in: 64,
      block_in: 32,
      evm_in: 256,
      private_in: 64,
      accumulator_inputs: 32,
      s_max: 4096,
    }
  }
}

impl LibraryCapacity {
  pub fn buffer(&self, kind: BufferKind) -> usize {
    match kind {
      BufferKind::PublicOut => self.public_out,
      BufferKind::PublicIn => self.public_in,
      BufferKind::BlockIn => self.block_in,
      BufferKind::EvmIn => self.evm_in,
      BufferKind::PrivateIn => self.private_in,
    }
  }
}

// ============================================================
// Global wire layout
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PublicSide {
  None,
  Inputs,
  Outputs,
}

struct WireSpec {
  name: String,
  outputs: usize,
  inputs: usize,
  internals: usize,
  public: PublicSide,
}

fn next_power_of_two(n: usize) -> usize {
  n.max(1).next_power_of_two()
}

fn assign(info: &mut SubcircuitInfo, start: usize, count: usize, next: &mut usize) {
  for local in start..start + count {
    info.flatten_map[local] = *next;
    *next += 1;
  }
}

fn layout(specs: Vec<WireSpec>, s_max: usize) -> SubcircuitLibrary {
  let mut infos: Vec<SubcircuitInfo> = specs
    .iter()
    .enumerate()
    .map(|(id, spec)| {
      let total = 1 + spec.outputs + spec.inputs + spec.internals;
      SubcircuitInfo {
        id,
        name: spec.name.clone(),
        total_wire_count: total,
        output_range: (1, spec.outputs),
        input_range: (1 + spec.outputs, spec.inputs),
        flatten_map: vec![usize::MAX; total],
      }
    })
    .collect();

  let mut next = 0usize;

  // Public wires: outputs of the public output buffer, then inputs of the
  // public input buffers.
  for (info, spec) in infos.iter_mut().zip(&specs) {
    if spec.public == PublicSide::Outputs {
      let (start, count) = info.output_range;
      assign(info, start, count, &mut next);
    }
  }
  for (info, spec) in infos.iter_mut().zip(&specs) {
    if spec.public == PublicSide::Inputs {
      let (start, count) = info.input_range;
      assign(info, start, count, &mut next);
    }
  }
  let l = next_power_of_two(next);
  next = l;

  // Interface wires: the constant wire and every non-public side.
  for (info, spec) in infos.iter_mut().zip(&specs) {
    assign(info, 0, 1, &mut next);
    let (out_start, out_count) = info.output_range;
    let (in_start, in_count) = info.input_range;
    match spec.public {
      PublicSide::Outputs => assign(info, in_start, in_count, &mut next),
      PublicSide::Inputs => assign(info, out_start, out_count, &mut next),
      PublicSide::None => {
        assign(info, out_start, out_count, &mut next);
        assign(info, in_start, in_count, &mut next);
      }
    }
  }
  let l_d = l + next_power_of_two(next - l);
  next = l_d;

  for info in infos.iter_mut() {
    let start = info.input_range.0 + info.input_range.1;
    let count = info.total_wire_count - start;
    assign(info, start, count, &mut next);
  }
  let m_d = next;

  let params = SetupParams { l, l_d, m_d, s_max };
  let by_name = infos
    .iter()
    .enumerate()
    .map(|(pos, info)| (info.name.clone(), pos))
    .collect();
  SubcircuitLibrary {
    params,
    infos,
    by_name,
  }
}
