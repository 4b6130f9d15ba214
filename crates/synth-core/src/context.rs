//! The synthesis context: the ordered placement list, the buffer
//! placements anchoring external values, and the memoization caches.
//!
//! One context synthesizes one transaction. Nothing here is shared, so
//! independent transactions can be synthesized on independent contexts.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use revm::primitives::{Address, U256};
use tracing::{debug, trace};

use crate::buffers::{BufferKind, ReservedVariable};
use crate::config::{Limits, SynthesizerConfig};
use crate::data_pt::{DataPt, Origin, bit_size_of};
use crate::error::{Result, SynthesisError};
use crate::operations::jubjub::Point;
use crate::subcircuit::SubcircuitLibrary;

/// Bit size of descriptionless constants.
pub const DEFAULT_SOURCE_BIT_SIZE: u16 = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementEntry {
  pub subcircuit_name: String,
  /// Logical operation or opcode this placement realizes.
  pub operation_tag: String,
  pub subcircuit_id: usize,
  pub in_pts: Vec<DataPt>,
  pub out_pts: Vec<DataPt>,
}

#[derive(Debug, Clone)]
pub(crate) struct StorageSlot {
  pub value_pt: DataPt,
  pub written: bool,
}

/// The storage cache as it stood when a call frame began.
#[derive(Debug, Clone, Default)]
pub(crate) struct StorageCheckpoint(BTreeMap<(Address, U256), StorageSlot>);

pub struct SynthesisContext {
  library: Arc<SubcircuitLibrary>,
  limits: Limits,
  placements: Vec<PlacementEntry>,
  reserved: HashMap<ReservedVariable, DataPt>,
  cached_evm_in: HashMap<(U256, u16), DataPt>,
  cached_static_in: HashMap<(String, U256), DataPt>,
  cached_storage: BTreeMap<(Address, U256), StorageSlot>,
  pub(crate) cached_origin: Option<DataPt>,
}

impl SynthesisContext {
  /// Creates the buffer placements and fills in every reserved variable.
  pub fn new(library: Arc<SubcircuitLibrary>, config: &SynthesizerConfig) -> Result<Self> {
    config.validate()?;
    let mut placements = Vec::with_capacity(BufferKind::COUNT);
    for kind in BufferKind::ALL {
      let info = library.buffer(kind)?;
      placements.push(PlacementEntry {
        subcircuit_name: info.name.clone(),
        operation_tag: info.name.clone(),
        subcircuit_id: info.id,
        in_pts: Vec::new(),
        out_pts: Vec::new(),
      });
    }
    let mut ctx = SynthesisContext {
      library,
      limits: config.limits.clone(),
      placements,
      reserved: HashMap::new(),
      cached_evm_in: HashMap::new(),
      cached_static_in: HashMap::new(),
      cached_storage: BTreeMap::new(),
      cached_origin: None,
    };
    ctx.init_reserved(config)?;
    ctx.check_buffers()?;
    debug!(
      reserved = ctx.reserved.len(),
      "initialized buffer placements"
    );
    Ok(ctx)
  }

  fn init_reserved(&mut self, config: &SynthesizerConfig) -> Result<()> {
    use ReservedVariable::*;
    let block = &config.block;
    let tx = &config.transaction;

    self.add_reserved(Coinbase, U256::from_be_slice(block.coinbase.as_slice()))?;
    self.add_reserved(Timestamp, block.timestamp)?;
    self.add_reserved(Number, block.number)?;
    self.add_reserved(Prevrandao, block.prevrandao)?;
    self.add_reserved(GasLimit, block.gas_limit)?;
    self.add_reserved(ChainId, block.chain_id)?;
    self.add_reserved(BaseFee, block.base_fee)?;
    for (i, hash) in block.block_hashes.iter().enumerate() {
      self.add_reserved(BlockHash(i + 1), U256::from_be_bytes(hash.0))?;
    }

    self.add_reserved(AddressMask, (U256::from(1u64) << 160) - U256::from(1u64))?;
    self.add_reserved(JubjubBaseX, Point::BASE.x)?;
    self.add_reserved(JubjubBaseY, Point::BASE.y)?;
    self.add_reserved(JubjubPoiX, Point::IDENTITY.x)?;
    self.add_reserved(JubjubPoiY, Point::IDENTITY.y)?;

    if let Some(auth) = &tx.auth {
      self.add_reserved(EddsaPublicKeyX, auth.public_key.x)?;
      self.add_reserved(EddsaPublicKeyY, auth.public_key.y)?;
    }

    self.add_reserved(ContractAddress, U256::from_be_slice(tx.contract.as_slice()))?;
    self.add_reserved(FunctionSelector, tx.function_selector())?;
    self.add_reserved(TransactionNonce, U256::from(tx.nonce))?;
    for (i, word) in tx.input_words().into_iter().enumerate() {
      self.add_reserved(TransactionInput(i), word)?;
    }
    match &tx.auth {
      Some(auth) => {
        self.add_reserved(EddsaSignature, auth.signature)?;
        self.add_reserved(EddsaRandomizerX, auth.randomizer.x)?;
        self.add_reserved(EddsaRandomizerY, auth.randomizer.y)?;
      }
      None => {
        self.add_reserved(Origin, U256::from_be_slice(tx.origin.as_slice()))?;
      }
    }
    Ok(())
  }

  fn add_reserved(&mut self, var: ReservedVariable, value: U256) -> Result<()> {
    let ext = DataPt::new(value, var.bit_size(), Origin::external(var.description()))?;
    let pt = self.add_wire_to_in_buffer(var.buffer(), ext)?;
    self.reserved.insert(var, pt);
    Ok(())
  }

  /// Every buffer must hold aligned, densely indexed wire pairs.
  pub fn check_buffers(&self) -> Result<()> {
    for kind in BufferKind::ALL {
      let placement = &self.placements[kind.placement_index()];
      if placement.in_pts.len() != placement.out_pts.len() {
        return Err(SynthesisError::WireBookkeeping(format!(
          "{}: {} inputs against {} outputs",
          placement.subcircuit_name,
          placement.in_pts.len(),
          placement.out_pts.len()
        )));
      }
      for (i, (inp, out)) in placement.in_pts.iter().zip(&placement.out_pts).enumerate() {
        if inp.value != out.value {
          return Err(SynthesisError::WireBookkeeping(format!(
            "{}: wire pair {i} carries different values",
            placement.subcircuit_name
          )));
        }
        let twin = if kind.is_input() { out } else { inp };
        if kind.is_input() && twin.producer() != Some((kind.placement_index(), i)) {
          return Err(SynthesisError::WireBookkeeping(format!(
            "{}: output wire {i} is misindexed",
            placement.subcircuit_name
          )));
        }
      }
    }
    Ok(())
  }

  // ============================================================
  // Accessors
  // ============================================================

  pub fn library(&self) -> &SubcircuitLibrary {
    &self.library
  }

  pub fn shared_library(&self) -> Arc<SubcircuitLibrary> {
    Arc::clone(&self.library)
  }

  pub fn limits(&self) -> &Limits {
    &self.limits
  }

  pub fn placements(&self) -> &[PlacementEntry] {
    &self.placements
  }

  /// Index the next placement will receive.
  pub fn next_placement_index(&self) -> usize {
    self.placements.len()
  }

  pub fn buffer(&self, kind: BufferKind) -> &PlacementEntry {
    &self.placements[kind.placement_index()]
  }

  pub fn reserved(&self, var: ReservedVariable) -> Result<DataPt> {
    self
      .reserved
      .get(&var)
      .cloned()
      .ok_or_else(|| SynthesisError::ProvenanceViolation(format!("{} was never loaded", var.description())))
  }

  pub fn has_reserved(&self, var: ReservedVariable) -> bool {
    self.reserved.contains_key(&var)
  }

  // ============================================================
  // Placement
  // ============================================================

  /// Checks that `pt` points at an existing output wire carrying its value.
  pub fn check_provenance(&self, pt: &DataPt) -> Result<()> {
    let Some((placement, wire_index)) = pt.producer() else {
      return Err(SynthesisError::ProvenanceViolation(format!(
        "input {:#x} has no wire: {:?}",
        pt.value, pt.origin
      )));
    };
    let producer = self.placements.get(placement).ok_or_else(|| {
      SynthesisError::ProvenanceViolation(format!(
        "input refers to placement {placement}, which does not exist yet"
      ))
    })?;
    let out = producer.out_pts.get(wire_index).ok_or_else(|| {
      SynthesisError::ProvenanceViolation(format!(
        "input refers to wire {wire_index} of placement {placement}, which has {} outputs",
        producer.out_pts.len()
      ))
    })?;
    if out.value != pt.value {
      return Err(SynthesisError::shadow(
        format!("wire {wire_index} of placement {placement}"),
        out.value,
        pt.value,
      ));
    }
    Ok(())
  }

  /// Appends a placement of `subcircuit_name` and returns its output wires.
  pub fn place(
    &mut self,
    subcircuit_name: &str,
    in_pts: Vec<DataPt>,
    outputs: &[U256],
    out_bit_size: u16,
    tag: &str,
  ) -> Result<Vec<DataPt>> {
    for pt in &in_pts {
      self.check_provenance(pt)?;
    }
    let subcircuit_id = self.library.get(subcircuit_name)?.id;
    let index = self.next_placement_index();
    let out_pts = outputs
      .iter()
      .enumerate()
      .map(|(i, v)| DataPt::wire(index, i, *v, out_bit_size))
      .collect::<Result<Vec<_>>>()?;
    trace!(index, subcircuit_name, tag, inputs = in_pts.len(), "place");
    self.placements.push(PlacementEntry {
      subcircuit_name: subcircuit_name.to_string(),
      operation_tag: tag.to_string(),
      subcircuit_id,
      in_pts,
      out_pts: out_pts.clone(),
    });
    Ok(out_pts)
  }

  // ============================================================
  // Buffers
  // ============================================================

  /// Registers an external value with an input buffer and returns the wire
  /// that carries it into the circuit.
  pub fn add_wire_to_in_buffer(&mut self, kind: BufferKind, external: DataPt) -> Result<DataPt> {
    if !kind.is_input() {
      return Err(SynthesisError::WireBookkeeping(format!(
        "{} is not an input buffer",
        kind.subcircuit_name()
      )));
    }
    if !external.origin.is_external() {
      return Err(SynthesisError::WireBookkeeping(
        "input buffers only accept external values".into(),
      ));
    }
    let placement = &mut self.placements[kind.placement_index()];
    if placement.in_pts.len() != placement.out_pts.len() {
      return Err(SynthesisError::WireBookkeeping(format!(
        "mismatched wires in {}",
        placement.subcircuit_name
      )));
    }
    let wire_index = placement.out_pts.len();
    let out = DataPt::new(
      external.value,
      external.source_bit_size,
      Origin::Buffer {
        buffer: kind,
        wire_index,
      },
    )?;
    placement.in_pts.push(external);
    placement.out_pts.push(out.clone());
    Ok(out)
  }

  /// Exposes `symbol` as a public output tagged `tag`.
  pub fn add_wire_to_out_buffer(&mut self, symbol: DataPt, tag: impl Into<String>) -> Result<()> {
    self.check_provenance(&symbol)?;
    let kind = BufferKind::PublicOut;
    let placement = &mut self.placements[kind.placement_index()];
    if placement.in_pts.len() != placement.out_pts.len() {
      return Err(SynthesisError::WireBookkeeping(format!(
        "mismatched wires in {}",
        placement.subcircuit_name
      )));
    }
    let wire_index = placement.out_pts.len();
    let external = DataPt::new(
      symbol.value,
      symbol.source_bit_size,
      Origin::External {
        tag: tag.into(),
        offset: Some(wire_index),
        length: None,
      },
    )?;
    placement.in_pts.push(symbol);
    placement.out_pts.push(external);
    Ok(())
  }

  /// Loads a value the circuit treats as given.
  ///
  /// Descriptionless loads are protocol constants and are memoized by value;
  /// described loads are environment inputs and are memoized by description
  /// and value.
  pub fn load_static(&mut self, value: U256, bit_size: Option<u16>, description: Option<&str>) -> Result<DataPt> {
    let bits = bit_size.unwrap_or(DEFAULT_SOURCE_BIT_SIZE).max(bit_size_of(value));
    match description {
      None => {
        if let Some(pt) = self.cached_evm_in.get(&(value, bits)) {
          return Ok(pt.clone());
        }
        let ext = DataPt::new(value, bits, Origin::external("Arbitrary constant"))?;
        let pt = self.add_wire_to_in_buffer(BufferKind::EvmIn, ext)?;
        self.cached_evm_in.insert((value, bits), pt.clone());
        Ok(pt)
      }
      Some(desc) => {
        let key = (desc.to_string(), value);
        if let Some(pt) = self.cached_static_in.get(&key) {
          return Ok(pt.clone());
        }
        let ext = DataPt::new(value, bits, Origin::external(desc))?;
        let pt = self.add_wire_to_in_buffer(BufferKind::EvmIn, ext)?;
        self.cached_static_in.insert(key, pt.clone());
        Ok(pt)
      }
    }
  }

  /// Loads a public input that is not a reserved variable (keccak digests,
  /// storage reads).
  pub fn load_public(&mut self, value: U256, bit_size: u16, tag: impl Into<String>) -> Result<DataPt> {
    let ext = DataPt::new(value, bit_size, Origin::external(tag))?;
    self.add_wire_to_in_buffer(BufferKind::PublicIn, ext)
  }

  // ============================================================
  // Storage
  // ============================================================

  /// Pointer holding `slot` of `address`, loading it as a public input on
  /// first access.
  pub fn load_storage(&mut self, address: Address, slot: U256, value: U256) -> Result<DataPt> {
    if let Some(cached) = self.cached_storage.get(&(address, slot)) {
      return Ok(cached.value_pt.clone());
    }
    let pt = self.load_public(value, 256, format!("STORAGE_IN({address}, {slot:#x})"))?;
    self.cached_storage.insert(
      (address, slot),
      StorageSlot {
        value_pt: pt.clone(),
        written: false,
      },
    );
    Ok(pt)
  }

  pub fn store_storage(&mut self, address: Address, slot: U256, value_pt: DataPt) -> Result<()> {
    self.check_provenance(&value_pt)?;
    self.cached_storage.insert(
      (address, slot),
      StorageSlot {
        value_pt,
        written: true,
      },
    );
    Ok(())
  }

  pub(crate) fn storage_checkpoint(&self) -> StorageCheckpoint {
    StorageCheckpoint(self.cached_storage.clone())
  }

  /// Forgets every storage access made since `checkpoint` was taken. Slots
  /// read again afterwards are reloaded as fresh public inputs.
  pub(crate) fn revert_storage(&mut self, checkpoint: StorageCheckpoint) {
    trace!(slots = checkpoint.0.len(), "storage reverted to checkpoint");
    self.cached_storage = checkpoint.0;
  }

  /// Publishes the final value of every written slot.
  pub fn export_storage(&mut self) -> Result<()> {
    let written: Vec<_> = self
      .cached_storage
      .iter()
      .filter(|(_, slot)| slot.written)
      .map(|((address, key), slot)| (*address, *key, slot.value_pt.clone()))
      .collect();
    for (address, key, pt) in written {
      self.add_wire_to_out_buffer(pt, format!("STORAGE_OUT({address}, {key:#x})"))?;
    }
    Ok(())
  }
}
