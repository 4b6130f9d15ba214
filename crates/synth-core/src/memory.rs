//! Circuit-level memory reconciliation.
//!
//! [`MemoryPt`] only says which fragments a window is made of. The methods
//! here turn those fragments into wires: shifting each fragment into place,
//! masking off the bytes it does not own and summing the pieces.

use revm::primitives::U256;

use crate::context::SynthesisContext;
use crate::data_pt::DataPt;
use crate::error::{Result, SynthesisError};
use crate::memory_pt::{DataAliasInfo, MemoryPt, MemoryPtEntry};
use crate::operations::{self, ArithOp};

const MASKER_DESCRIPTION: &str = "Masker for memory manipulation";
const SHIFTER_DESCRIPTION: &str = "Shifter for memory manipulation";

/// `0xFF` repeated over `ceil(bits / 8)` bytes.
fn byte_mask(bits: u16) -> U256 {
  let bytes = (bits as usize).div_ceil(8).min(32);
  if bytes == 32 {
    U256::MAX
  } else {
    (U256::from(1u64) << (bytes * 8)) - U256::from(1u64)
  }
}

/// Moves a window-aligned masker back onto the fragment's own alignment,
/// keeping the low 32 bytes.
fn unshifted_mask(info: &DataAliasInfo) -> U256 {
  let bytes = (info.shift.unsigned_abs() / 8) as usize;
  let mut masker = info.masker.clone();
  if info.shift > 0 {
    masker.truncate(masker.len().saturating_sub(bytes));
  } else {
    masker.extend(std::iter::repeat_n(0u8, bytes));
  }
  let tail = &masker[masker.len().saturating_sub(32)..];
  U256::from_be_slice(tail)
}

impl SynthesisContext {
  /// Narrows a value to `trunc_bits` for storage, placing an `AND` only if
  /// the narrowing actually drops bits.
  pub fn place_mstore(&mut self, pt: DataPt, trunc_bits: u16) -> Result<DataPt> {
    if trunc_bits < pt.source_bit_size {
      let mask = byte_mask(trunc_bits);
      let masked = pt.value & mask;
      if masked != pt.value {
        let masker = self.load_static(mask, None, Some(MASKER_DESCRIPTION))?;
        let outputs = operations::evaluate(ArithOp::And, &[mask, pt.value])?;
        let mut outs = self.place(ArithOp::And.subcircuit(), vec![masker, pt], &outputs, trunc_bits, "AND")?;
        return outs
          .pop()
          .ok_or_else(|| SynthesisError::WireBookkeeping("AND produced no output".into()));
      }
    }
    Ok(pt.with_bit_size(trunc_bits))
  }

  /// Reassembles a 32-byte stack word from its memory fragments.
  pub fn place_memory_to_stack(&mut self, infos: &[DataAliasInfo]) -> Result<DataPt> {
    if infos.is_empty() {
      return Err(SynthesisError::ProvenanceViolation(
        "memory load resolved to no fragment".into(),
      ));
    }
    self.combine_memory_slices(infos)
  }

  /// Masks each fragment down to the bytes it contributes, without moving it.
  pub fn place_memory_to_memory(&mut self, infos: &[DataAliasInfo]) -> Result<Vec<DataPt>> {
    if infos.is_empty() {
      return Err(SynthesisError::ProvenanceViolation(
        "memory copy resolved to no fragment".into(),
      ));
    }
    infos
      .iter()
      .map(|info| {
        let mask = unshifted_mask(info);
        self.apply_mask(info.data_pt.clone(), mask)
      })
      .collect()
  }

  pub fn combine_memory_slices(&mut self, infos: &[DataAliasInfo]) -> Result<DataPt> {
    let mut slices = Vec::with_capacity(infos.len());
    for info in infos {
      let shifted = self.apply_shift(info)?;
      slices.push(self.apply_mask(shifted, info.mask_word())?);
    }
    if slices.len() == 1 {
      return slices
        .pop()
        .ok_or_else(|| SynthesisError::WireBookkeeping("empty slice list".into()));
    }
    let limit = self.limits().accumulator_input_limit;
    if slices.len() > limit {
      return Err(SynthesisError::FanInOverflow {
        got: slices.len(),
        limit,
      });
    }
    self.place_arith_one(ArithOp::Accumulator, slices)
  }

  fn apply_shift(&mut self, info: &DataAliasInfo) -> Result<DataPt> {
    if info.shift == 0 {
      return Ok(info.data_pt.clone());
    }
    let op = if info.shift > 0 { ArithOp::Shl } else { ArithOp::Shr };
    let amount = U256::from(info.shift.unsigned_abs());
    let shifter = self.load_static(amount, None, Some(SHIFTER_DESCRIPTION))?;
    self.place_arith_one(op, vec![shifter, info.data_pt.clone()])
  }

  fn apply_mask(&mut self, pt: DataPt, mask: U256) -> Result<DataPt> {
    if pt.value & mask == pt.value {
      return Ok(pt);
    }
    let masker = self.load_static(mask, None, Some(MASKER_DESCRIPTION))?;
    self.place_arith_one(ArithOp::And, vec![masker, pt])
  }

  /// Re-bases copied entries from `[src, src + len)` onto `dst`, trimming the
  /// bytes that stick out past the end of the source window.
  pub fn adjust_memory_pts(
    &mut self,
    data_pts: Vec<DataPt>,
    entries: &mut [MemoryPtEntry],
    src: usize,
    dst: usize,
    len: usize,
  ) -> Result<()> {
    if data_pts.len() != entries.len() {
      return Err(SynthesisError::WireBookkeeping(format!(
        "{} resolved fragments for {} memory entries",
        data_pts.len(),
        entries.len()
      )));
    }
    for (entry, pt) in entries.iter_mut().zip(data_pts) {
      let container_end = entry.end();
      let actual_offset = src.max(entry.byte_offset);
      let actual_end = (src + len).min(container_end);
      let ending_gap = container_end - actual_end;

      entry.byte_offset = actual_offset - src + dst;
      entry.byte_size = actual_end - actual_offset;
      entry.data_pt = if ending_gap > 0 {
        let amount = U256::from(ending_gap * 8);
        let shifter = self.load_static(amount, None, Some(SHIFTER_DESCRIPTION))?;
        self.place_arith_one(ArithOp::Shr, vec![shifter, pt])?
      } else {
        pt
      };
    }
    Ok(())
  }

  /// Entries describing `[src, src + len)` of `target`, re-based at `dst`.
  ///
  /// A window nothing was ever written to becomes a single zero entry.
  pub fn copy_memory_pts(
    &mut self,
    target: &[MemoryPtEntry],
    src: usize,
    len: usize,
    dst: usize,
  ) -> Result<Vec<MemoryPtEntry>> {
    if len == 0 {
      return Ok(Vec::new());
    }
    let mut copied = MemoryPt::simulate(target).read(src, len);
    if !copied.is_empty() {
      let infos = MemoryPt::simulate(&copied).get_data_alias(src, len)?;
      if !infos.is_empty() {
        let resolved = self.place_memory_to_memory(&infos)?;
        self.adjust_memory_pts(resolved, &mut copied, src, dst, len)?;
        return Ok(copied);
      }
    }
    let zero = self.load_static(U256::ZERO, Some(1), None)?;
    Ok(vec![MemoryPtEntry::new(dst, len, zero)])
  }
}
