//! Byte-addressed shadow memory.
//!
//! Writes are kept as timestamped entries rather than bytes. A read resolves
//! the entries overlapping the window into fragments, newest write winning
//! byte by byte, and describes how to realign each fragment (`shift`) and
//! which of its bytes survive (`masker`).

use std::collections::BTreeMap;
use std::ops::Range;

use revm::primitives::U256;

use crate::data_pt::DataPt;
use crate::error::{Result, SynthesisError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPtEntry {
  pub byte_offset: usize,
  pub byte_size: usize,
  pub data_pt: DataPt,
  pub timestamp: u64,
}

impl MemoryPtEntry {
  pub fn new(byte_offset: usize, byte_size: usize, data_pt: DataPt) -> Self {
    MemoryPtEntry {
      byte_offset,
      byte_size,
      data_pt,
      timestamp: 0,
    }
  }

  pub fn end(&self) -> usize {
    self.byte_offset + self.byte_size
  }

  /// The value left-padded (or truncated from the left) to `byte_size` bytes.
  pub fn container_bytes(&self) -> Vec<u8> {
    let word = self.data_pt.value.to_be_bytes::<32>();
    if self.byte_size >= 32 {
      let mut out = vec![0u8; self.byte_size - 32];
      out.extend_from_slice(&word);
      out
    } else {
      word[32 - self.byte_size..].to_vec()
    }
  }
}

/// How one fragment contributes to a read window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAliasInfo {
  pub data_pt: DataPt,
  /// Bits to shift the fragment's value by to align it with the window end.
  /// Positive means shift left, negative shift right.
  pub shift: i64,
  /// One byte per window byte: `0xFF` where this fragment is authoritative.
  pub masker: Vec<u8>,
}

impl DataAliasInfo {
  /// The masker as a word, keeping its low 32 bytes.
  pub fn mask_word(&self) -> U256 {
    let tail = &self.masker[self.masker.len().saturating_sub(32)..];
    U256::from_be_slice(tail)
  }

  pub fn masker_hex(&self) -> String {
    let mut s = String::with_capacity(2 + self.masker.len() * 2);
    s.push_str("0x");
    for b in &self.masker {
      s.push_str(&format!("{b:02X}"));
    }
    s
  }
}

// ============================================================
// Byte ranges
// ============================================================

/// Sorted, disjoint half-open ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct ByteRanges(Vec<Range<usize>>);

impl ByteRanges {
  fn single(range: Range<usize>) -> Self {
    if range.is_empty() {
      ByteRanges(Vec::new())
    } else {
      ByteRanges(vec![range])
    }
  }

  fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  fn contains(&self, byte: usize) -> bool {
    self.0.iter().any(|r| r.contains(&byte))
  }

  fn subtract(&mut self, cut: &Range<usize>) {
    let mut out = Vec::with_capacity(self.0.len() + 1);
    for r in self.0.drain(..) {
      if cut.end <= r.start || cut.start >= r.end {
        out.push(r);
        continue;
      }
      if r.start < cut.start {
        out.push(r.start..cut.start);
      }
      if cut.end < r.end {
        out.push(cut.end..r.end);
      }
    }
    self.0 = out;
  }

  fn within(&self, window: &Range<usize>) -> bool {
    self.0.iter().all(|r| r.start >= window.start && r.end <= window.end)
  }
}

// ============================================================
// MemoryPt
// ============================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryPt {
  store: BTreeMap<u64, MemoryPtEntry>,
  timestamp: u64,
}

impl MemoryPt {
  pub fn new() -> Self {
    Self::default()
  }

  /// Replays `entries` (oldest first) into a fresh memory.
  pub fn simulate(entries: &[MemoryPtEntry]) -> Self {
    let mut memory = MemoryPt::new();
    memory.write_batch(entries);
    memory
  }

  pub fn len(&self) -> usize {
    self.store.len()
  }

  pub fn is_empty(&self) -> bool {
    self.store.is_empty()
  }

  pub fn entries(&self) -> impl Iterator<Item = &MemoryPtEntry> {
    self.store.values()
  }

  /// Records `data_pt` as occupying `[offset, offset + size)` and returns the
  /// resulting view of that window.
  pub fn write(&mut self, offset: usize, size: usize, data_pt: DataPt) -> Vec<u8> {
    if size == 0 {
      return Vec::new();
    }
    let end = offset + size;
    self
      .store
      .retain(|_, e| !(e.byte_offset >= offset && e.end() <= end));
    let timestamp = self.timestamp;
    self.timestamp += 1;
    self.store.insert(
      timestamp,
      MemoryPtEntry {
        byte_offset: offset,
        byte_size: size,
        data_pt,
        timestamp,
      },
    );
    self.view_memory(offset, size)
  }

  pub fn write_batch(&mut self, entries: &[MemoryPtEntry]) {
    for entry in entries {
      self.write(entry.byte_offset, entry.byte_size, entry.data_pt.clone());
    }
  }

  /// Surviving fragments of `[offset, offset + size)`, oldest first.
  fn view_conflict(&self, offset: usize, size: usize) -> Vec<(u64, ByteRanges)> {
    let mut fragments: Vec<(u64, ByteRanges)> = Vec::new();
    if size == 0 {
      return fragments;
    }
    let end = offset + size;
    for (timestamp, entry) in &self.store {
      if entry.end() <= offset || entry.byte_offset >= end {
        continue;
      }
      let overlap = entry.byte_offset.max(offset)..entry.end().min(end);
      for (_, valid) in fragments.iter_mut() {
        valid.subtract(&overlap);
      }
      fragments.retain(|(_, valid)| !valid.is_empty());
      fragments.push((*timestamp, ByteRanges::single(overlap)));
    }
    fragments
  }

  /// Entries contributing to `[offset, offset + length)`, oldest first.
  pub fn read(&self, offset: usize, length: usize) -> Vec<MemoryPtEntry> {
    self
      .view_conflict(offset, length)
      .into_iter()
      .filter_map(|(ts, _)| self.store.get(&ts).cloned())
      .collect()
  }

  /// Realignment recipe for every fragment of `[offset, offset + size)`.
  pub fn get_data_alias(&self, offset: usize, size: usize) -> Result<Vec<DataAliasInfo>> {
    let window = offset..offset + size;
    let mut infos = Vec::new();
    for (timestamp, valid) in self.view_conflict(offset, size) {
      let Some(entry) = self.store.get(&timestamp) else {
        continue;
      };
      if !valid.within(&window) {
        return Err(SynthesisError::WireBookkeeping(format!(
          "fragment at {} is not inside the view [{}, {})",
          entry.byte_offset, window.start, window.end
        )));
      }
      let shift = (window.end as i64 - entry.end() as i64) * 8;
      let masker = window
        .clone()
        .map(|byte| if valid.contains(byte) { 0xFF } else { 0x00 })
        .collect();
      infos.push(DataAliasInfo {
        data_pt: entry.data_pt.clone(),
        shift,
        masker,
      });
    }
    Ok(infos)
  }

  /// Concrete bytes the shadow claims for `[offset, offset + length)`.
  /// Only used to cross-check against the interpreter's memory.
  pub fn view_memory(&self, offset: usize, length: usize) -> Vec<u8> {
    let mut out = vec![0u8; length];
    let window_end = offset + length;
    for entry in self.read(offset, length) {
      let bytes = entry.container_bytes();
      for (i, b) in bytes.iter().enumerate() {
        let addr = entry.byte_offset + i;
        if addr >= offset && addr < window_end {
          out[addr - offset] = *b;
        }
      }
    }
    out
  }
}
