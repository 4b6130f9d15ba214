//! Circuit artifacts handed to the prover.
//!
//! - `placementInstance.json`: every placement with its wire values.
//! - `permutation.json`: the non-trivial copy-constraint links.
//! - `instance.json`: the public wire vector `a`, indexed by global wire id.

use std::path::Path;
use std::sync::Arc;

use revm::primitives::U256;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::buffers::BufferKind;
use crate::error::{Result, SynthesisError};
use crate::permutation::{Permutation, PermutationLink};
use crate::refactor::FinalPlacement;
use crate::subcircuit::SubcircuitLibrary;

pub const PLACEMENT_INSTANCE_FILE: &str = "placementInstance.json";
pub const PERMUTATION_FILE: &str = "permutation.json";
pub const PUBLIC_INSTANCE_FILE: &str = "instance.json";

const ZERO_HEX: &str = "0x00";

/// Hex form used in every artifact.
pub fn to_hex(value: U256) -> String {
  if value.is_zero() {
    ZERO_HEX.to_string()
  } else {
    format!("{value:#x}")
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacementInstance {
  pub placement_index: usize,
  pub subcircuit_id: usize,
  pub instruction_name: String,
  pub in_values: Vec<String>,
  pub out_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInstance {
  pub a: Vec<String>,
}

/// Everything a synthesis run produces.
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
  pub library: Arc<SubcircuitLibrary>,
  pub placements: Vec<FinalPlacement>,
  pub permutation: Permutation,
}

impl SynthesisOutput {
  /// Buffer placements are padded with zeros up to their declared wire
  /// counts.
  pub fn placement_instances(&self) -> Result<Vec<PlacementInstance>> {
    self
      .placements
      .iter()
      .enumerate()
      .map(|(index, placement)| {
        let mut in_values: Vec<String> = placement.in_pts.iter().map(|w| to_hex(w.value)).collect();
        let mut out_values: Vec<String> = placement.out_pts.iter().map(|w| to_hex(w.value)).collect();
        if BufferKind::from_placement(index).is_some() {
          let info = self.library.get(&placement.name)?;
          in_values.resize(info.num_inputs().max(in_values.len()), ZERO_HEX.to_string());
          out_values.resize(info.num_outputs().max(out_values.len()), ZERO_HEX.to_string());
        }
        Ok(PlacementInstance {
          placement_index: index,
          subcircuit_id: placement.subcircuit_id,
          instruction_name: placement.usage.clone(),
          in_values,
          out_values,
        })
      })
      .collect()
  }

  /// Values of the public wires `[0, l)`. Unused public wires are zero.
  pub fn public_instance(&self) -> Result<Vec<U256>> {
    let l = self.library.params().l;
    let mut a = vec![U256::ZERO; l];
    for placement in &self.placements {
      let info = self.library.get(&placement.name)?;
      let outs = placement
        .out_pts
        .iter()
        .enumerate()
        .map(|(w, wire)| (info.global_output(w), wire.value));
      let ins = placement
        .in_pts
        .iter()
        .enumerate()
        .map(|(i, wire)| (info.global_input(i), wire.value));
      for (global, value) in outs.chain(ins) {
        let Some(global) = global else {
          return Err(SynthesisError::WireBookkeeping(format!(
            "{} has more wires than {} declares",
            placement.usage, placement.name
          )));
        };
        if global < l {
          a[global] = value;
        }
      }
    }
    Ok(a)
  }

  pub fn permutation_links(&self) -> &[PermutationLink] {
    self.permutation.links()
  }

  pub fn placement_instance_json(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(&self.placement_instances()?)?)
  }

  pub fn permutation_json(&self) -> Result<String> {
    Ok(serde_json::to_string_pretty(self.permutation.links())?)
  }

  pub fn public_instance_json(&self) -> Result<String> {
    let instance = PublicInstance {
      a: self.public_instance()?.into_iter().map(to_hex).collect(),
    };
    Ok(serde_json::to_string_pretty(&instance)?)
  }

  /// Writes every artifact into `dir`, creating it if needed.
  pub fn write_to(&self, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    std::fs::write(dir.join(PLACEMENT_INSTANCE_FILE), self.placement_instance_json()?)?;
    std::fs::write(dir.join(PERMUTATION_FILE), self.permutation_json()?)?;
    std::fs::write(dir.join(PUBLIC_INSTANCE_FILE), self.public_instance_json()?)?;
    info!(
      dir = %dir.display(),
      placements = self.placements.len(),
      links = self.permutation.len(),
      "wrote circuit artifacts"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zero_is_written_with_two_digits() {
    assert_eq!(to_hex(U256::ZERO), "0x00");
    assert_eq!(to_hex(U256::from(0xabu64)), "0xab");
  }

  #[test]
  fn instances_use_camel_case_keys() {
    let instance = PlacementInstance {
      placement_index: 5,
      subcircuit_id: 7,
      instruction_name: "ADD".into(),
      in_values: vec!["0x02".into()],
      out_values: vec![],
    };
    let json = serde_json::to_string(&instance).expect("serialize");
    assert!(json.contains("\"placementIndex\":5"));
    assert!(json.contains("\"subcircuitId\":7"));
    assert!(json.contains("\"instructionName\":\"ADD\""));
    assert!(json.contains("\"inValues\""));
  }
}
