use std::sync::Arc;

use revm::{
  bytecode::opcode,
  primitives::{Address, U256, address, keccak256},
};
use synth_core::buffers::BufferKind;
use synth_core::config::{AffinePoint, EddsaAuth, SynthesizerConfig};
use synth_core::context::SynthesisContext;
use synth_core::data_pt::DataPt;
use synth_core::operations::{self, ArithOp, jubjub, poseidon};
use synth_core::opcodes::{opcode_input_count, opcode_output_count};
use synth_core::output::SynthesisOutput;
use synth_core::refactor::{FinalPlacement, Limb, join_limbs};
use synth_core::subcircuit::{LibraryCapacity, SubcircuitLibrary};
use synth_core::synthesizer::{FrameInfo, StepInput, StepOutput, Synthesizer};
use synth_core::validator::{ReferenceEvaluator, validate_instances, validate_permutation};
use synth_core::{Result, SynthesisError};

const CONTRACT: Address = address!("0x00000000000000000000000000000000000c0de0");
const SENDER: Address = address!("0x00000000000000000000000000000000000a11ce");

// ============================================================
// Helpers
// ============================================================

fn library() -> Arc<SubcircuitLibrary> {
  Arc::new(SubcircuitLibrary::standard(&LibraryCapacity::default()))
}

fn config() -> SynthesizerConfig {
  let mut config = SynthesizerConfig::default();
  config.transaction.origin = SENDER;
  config.transaction.contract = CONTRACT;
  config
}

/// Tiny interpreter that feeds the synthesizer the same observations the
/// EVM inspector would.
struct Driver {
  synth: Synthesizer,
  stack: Vec<U256>,
  memory: Vec<u8>,
  pc: usize,
  origin: U256,
}

impl Driver {
  fn new(config: &SynthesizerConfig) -> Self {
    let mut synth = Synthesizer::new(library(), config).expect("synthesizer");
    synth
      .begin_call(FrameInfo {
        address: config.transaction.contract,
        code_address: config.transaction.contract,
        caller: config.transaction.origin,
        value: config.transaction.value,
        input: config.transaction.calldata.clone(),
      })
      .expect("outermost frame");
    Driver {
      synth,
      stack: Vec::new(),
      memory: Vec::new(),
      pc: 0,
      origin: U256::from_be_slice(config.transaction.origin.as_slice()),
    }
  }

  fn expand(&mut self, offset: usize, len: usize) {
    if len == 0 {
      return;
    }
    let end = (offset + len).div_ceil(32) * 32;
    if end > self.memory.len() {
      self.memory.resize(end, 0);
    }
  }

  fn push(&mut self, value: U256) -> Result<()> {
    let width = value.byte_len().max(1);
    let op = opcode::PUSH0 + width as u8;
    self.stack.push(value);
    let result = self.synth.apply_step(
      &StepInput {
        opcode: op,
        pc: self.pc,
        inputs: Vec::new(),
        memory: Vec::new(),
      },
      &StepOutput {
        outputs: vec![value],
        stack_len: self.stack.len(),
        memory: Vec::new(),
      },
    );
    self.pc += 1 + width;
    result
  }

  fn exec(&mut self, op: u8) -> Result<()> {
    let n_in = opcode_input_count(op);
    let split = self.stack.len() - n_in;
    let inputs: Vec<U256> = self.stack.split_off(split).into_iter().rev().collect();
    let offset = |i: usize| inputs[i].to::<usize>();

    let outputs = match op {
      opcode::STOP | opcode::POP => Vec::new(),
      opcode::MSTORE => {
        self.expand(offset(0), 32);
        self.memory[offset(0)..offset(0) + 32].copy_from_slice(&inputs[1].to_be_bytes::<32>());
        Vec::new()
      }
      opcode::MLOAD => {
        self.expand(offset(0), 32);
        vec![U256::from_be_slice(&self.memory[offset(0)..offset(0) + 32])]
      }
      opcode::KECCAK256 => {
        self.expand(offset(0), offset(1));
        let data = &self.memory[offset(0)..offset(0) + offset(1)];
        vec![U256::from_be_bytes(keccak256(data).0)]
      }
      opcode::RETURN => {
        self.expand(offset(0), offset(1));
        Vec::new()
      }
      opcode::ORIGIN => vec![self.origin],
      _ => {
        let arith = ArithOp::from_opcode(op).expect("arithmetic opcode");
        operations::evaluate(arith, &inputs)?
      }
    };
    assert_eq!(outputs.len(), opcode_output_count(op));
    self.stack.extend(outputs.iter().rev());

    let result = self.synth.apply_step(
      &StepInput {
        opcode: op,
        pc: self.pc,
        inputs: inputs.clone(),
        memory: Vec::new(),
      },
      &StepOutput {
        outputs,
        stack_len: self.stack.len(),
        memory: self.memory.clone(),
      },
    );
    self.pc += 1;
    result?;

    if op == opcode::RETURN {
      let returned = self.memory[offset(0)..offset(0) + offset(1)].to_vec();
      self.synth.end_call(true, &returned)?;
    } else if op == opcode::STOP {
      self.synth.end_call(true, &[])?;
    }
    Ok(())
  }

  fn top(&self) -> U256 {
    *self.stack.last().expect("non-empty stack")
  }

  fn finish(self) -> Result<SynthesisOutput> {
    self.synth.finalize()
  }
}

fn placements_named<'a>(output: &'a SynthesisOutput, usage: &str) -> Vec<&'a FinalPlacement> {
  output.placements.iter().filter(|p| p.usage == usage).collect()
}

fn out_word(placement: &FinalPlacement) -> U256 {
  join_limbs(placement.out_pts.iter().map(|w| (&w.limb, w.value)))
}

fn validate(output: &SynthesisOutput) {
  let variables = validate_instances(output, &ReferenceEvaluator).expect("instances replay");
  validate_permutation(output, &variables).expect("permutation holds");
}

#[cfg(test)]
mod tests {
  use super::*;

  // ============================================================
  // Arithmetic
  // ============================================================

  #[test]
  fn test_add_is_placed_on_alu1_with_its_selector() {
    let mut driver = Driver::new(&config());
    driver.push(U256::from(7u64)).expect("push");
    driver.push(U256::from(5u64)).expect("push");
    driver.exec(opcode::ADD).expect("add");
    assert_eq!(driver.top(), U256::from(12u64));
    driver.exec(opcode::STOP).expect("stop");

    let output = driver.finish().expect("finalize");
    let adds = placements_named(&output, "ADD");
    assert_eq!(adds.len(), 1);
    let add = adds[0];
    assert_eq!(add.name, "ALU1");
    assert_eq!(add.in_pts[0].value, U256::from(2u64));
    assert_eq!(add.in_pts[1].value, U256::from(5u64));
    assert_eq!(add.in_pts[2].value, U256::from(7u64));
    assert_eq!(out_word(add), U256::from(12u64));
    assert_eq!(add.out_pts[0].limb, Limb::Low);
    assert_eq!(add.out_pts[1].limb, Limb::High);
    validate(&output);
  }

  #[test]
  fn test_exp_chain_replays() {
    let mut driver = Driver::new(&config());
    driver.push(U256::from(13u64)).expect("push");
    driver.push(U256::from(3u64)).expect("push");
    driver.exec(opcode::EXP).expect("exp");
    assert_eq!(driver.top(), U256::from(1_594_323u64));
    driver.push(U256::from(9u64)).expect("push");
    driver.exec(opcode::MUL).expect("mul");
    driver.exec(opcode::STOP).expect("stop");

    let output = driver.finish().expect("finalize");
    assert_eq!(placements_named(&output, "MUL").len(), 1);
    validate(&output);
  }

  #[test]
  fn test_concrete_mismatch_is_reported() {
    let mut driver = Driver::new(&config());
    driver.push(U256::from(2u64)).expect("push");
    driver.push(U256::from(3u64)).expect("push");
    driver.stack.pop();
    driver.stack.push(U256::from(4u64));
    let err = driver.exec(opcode::ADD).unwrap_err();
    assert!(matches!(err, SynthesisError::ShadowMismatch { .. }), "{err}");
  }

  #[test]
  fn test_unsupported_opcode_is_rejected() {
    let mut driver = Driver::new(&config());
    let err = driver
      .synth
      .apply_step(
        &StepInput {
          opcode: opcode::TLOAD,
          pc: 0,
          inputs: vec![U256::ZERO],
          memory: Vec::new(),
        },
        &StepOutput {
          outputs: vec![U256::ZERO],
          stack_len: 1,
          memory: Vec::new(),
        },
      )
      .unwrap_err();
    assert!(matches!(err, SynthesisError::UnsupportedOpcode { opcode: opcode::TLOAD, .. }));
  }

  // ============================================================
  // Memory
  // ============================================================

  #[test]
  fn test_overlapping_stores_resolve_byte_by_byte() {
    let x = U256::from_be_bytes([0xaa; 32]);
    let y = U256::from_be_bytes([0xbb; 32]);
    let mut driver = Driver::new(&config());
    driver.push(x).expect("push");
    driver.push(U256::ZERO).expect("push");
    driver.exec(opcode::MSTORE).expect("mstore");
    driver.push(y).expect("push");
    driver.push(U256::from(16u64)).expect("push");
    driver.exec(opcode::MSTORE).expect("mstore");
    driver.push(U256::from(8u64)).expect("push");
    driver.exec(opcode::MLOAD).expect("mload");

    let mut expected = [0xaa; 32];
    expected[8..].fill(0xbb);
    assert_eq!(driver.top(), U256::from_be_bytes(expected));
    driver.exec(opcode::STOP).expect("stop");

    let output = driver.finish().expect("finalize");
    validate(&output);
  }

  #[test]
  fn test_fully_overwritten_store_is_forgotten() {
    let mut driver = Driver::new(&config());
    driver.push(U256::from(0x1111u64)).expect("push");
    driver.push(U256::ZERO).expect("push");
    driver.exec(opcode::MSTORE).expect("mstore");
    driver.push(U256::from(0x2222u64)).expect("push");
    driver.push(U256::ZERO).expect("push");
    driver.exec(opcode::MSTORE).expect("mstore");
    driver.push(U256::ZERO).expect("push");
    driver.exec(opcode::MLOAD).expect("mload");
    assert_eq!(driver.top(), U256::from(0x2222u64));
    driver.exec(opcode::STOP).expect("stop");

    let output = driver.finish().expect("finalize");
    // a whole-word read of a single entry needs no recombination
    assert!(placements_named(&output, "Accumulator").is_empty());
    validate(&output);
  }

  #[test]
  fn test_keccak_of_two_fragments_exports_its_input() {
    let a = U256::from(0x0102_0304_0506_0708_090a_0b0c_0d0e_0f10u128);
    let b = U256::from(0x1112_1314_1516_1718_191a_1b1c_1d1e_1f20u128);
    let mut driver = Driver::new(&config());
    driver.push(a << 128).expect("push");
    driver.push(U256::ZERO).expect("push");
    driver.exec(opcode::MSTORE).expect("mstore");
    driver.push(b << 128).expect("push");
    driver.push(U256::from(16u64)).expect("push");
    driver.exec(opcode::MSTORE).expect("mstore");
    driver.push(U256::from(32u64)).expect("push");
    driver.push(U256::ZERO).expect("push");
    driver.exec(opcode::KECCAK256).expect("keccak");

    let mut preimage = a.to_be_bytes::<32>()[16..].to_vec();
    preimage.extend_from_slice(&b.to_be_bytes::<32>()[16..]);
    let digest = U256::from_be_bytes(keccak256(&preimage).0);
    assert_eq!(driver.top(), digest);
    driver.exec(opcode::STOP).expect("stop");

    let output = driver.finish().expect("finalize");
    assert!(!placements_named(&output, "Accumulator").is_empty());

    let public_out = &output.placements[BufferKind::PublicOut.placement_index()];
    let exported: Vec<_> = public_out
      .out_pts
      .iter()
      .filter(|w| w.tag.as_deref() == Some("KECCAK_IN[0]"))
      .collect();
    assert!(!exported.is_empty());
    let word = join_limbs(exported.iter().map(|w| (&w.limb, w.value)));
    assert_eq!(word, U256::from_be_slice(&preimage));

    let public_in = &output.placements[BufferKind::PublicIn.placement_index()];
    let loaded: Vec<_> = public_in
      .in_pts
      .iter()
      .filter(|w| w.tag.as_deref().is_some_and(|t| t.starts_with("KECCAK_OUT")))
      .collect();
    assert_eq!(join_limbs(loaded.iter().map(|w| (&w.limb, w.value))), digest);
    validate(&output);
  }

  #[test]
  fn test_return_data_is_exported() {
    let mut driver = Driver::new(&config());
    driver.push(U256::from(40u64)).expect("push");
    driver.push(U256::from(2u64)).expect("push");
    driver.exec(opcode::ADD).expect("add");
    driver.push(U256::ZERO).expect("push");
    driver.exec(opcode::MSTORE).expect("mstore");
    driver.push(U256::from(32u64)).expect("push");
    driver.push(U256::ZERO).expect("push");
    driver.exec(opcode::RETURN).expect("return");

    let output = driver.finish().expect("finalize");
    let public_out = &output.placements[BufferKind::PublicOut.placement_index()];
    let returned: Vec<_> = public_out
      .out_pts
      .iter()
      .filter(|w| w.tag.as_deref().is_some_and(|t| t.starts_with("RETURN_DATA")))
      .collect();
    assert_eq!(join_limbs(returned.iter().map(|w| (&w.limb, w.value))), U256::from(42u64));
    validate(&output);
  }

  // ============================================================
  // Provenance and permutation
  // ============================================================

  #[test]
  fn test_inputs_must_come_from_earlier_placements() {
    let mut ctx = SynthesisContext::new(library(), &config()).expect("context");
    let future = ctx.next_placement_index() + 3;
    let forged = DataPt::wire(future, 0, U256::from(1u64), 8).expect("data point");
    let one = ctx.load_static(U256::from(1u64), Some(8), None).expect("constant");
    let err = ctx.place_arith_one(ArithOp::Add, vec![one, forged]).unwrap_err();
    assert!(matches!(err, SynthesisError::ProvenanceViolation(_)));
  }

  #[test]
  fn test_permutation_groups_close_into_cycles() {
    let mut driver = Driver::new(&config());
    driver.push(U256::from(3u64)).expect("push");
    driver.push(U256::from(3u64)).expect("push");
    driver.exec(opcode::MUL).expect("mul");
    driver.push(U256::from(3u64)).expect("push");
    driver.exec(opcode::ADD).expect("add");
    driver.exec(opcode::STOP).expect("stop");

    let output = driver.finish().expect("finalize");
    let permutation = &output.permutation;
    assert!(!permutation.is_empty());
    assert!(permutation.group_count() > 0);

    for link in permutation.links() {
      assert!(link.col < permutation.cols());
      assert!(link.row < permutation.rows());
      let start = (link.row, link.col);
      let mut at = (link.z, link.y);
      let mut steps = 1;
      while at != start {
        at = permutation.next(at.0, at.1).expect("position inside the table");
        steps += 1;
        assert!(steps <= permutation.len(), "cycle from {start:?} never closes");
      }
    }

    // pushed constants reach their consumers through EVM_IN
    let evm_in = BufferKind::EvmIn.placement_index();
    assert!(permutation.links().iter().any(|l| l.col == evm_in));
    validate(&output);
  }

  #[test]
  fn test_synthesis_is_deterministic() {
    let run = || {
      let mut driver = Driver::new(&config());
      driver.push(U256::from(0xdead_beefu64) << 200).expect("push");
      driver.push(U256::from(0x20u64)).expect("push");
      driver.exec(opcode::MSTORE).expect("mstore");
      driver.push(U256::from(0x2cu64)).expect("push");
      driver.exec(opcode::MLOAD).expect("mload");
      driver.push(U256::from(17u64)).expect("push");
      driver.exec(opcode::MUL).expect("mul");
      driver.exec(opcode::STOP).expect("stop");
      driver.finish().expect("finalize")
    };
    let first = run();
    let second = run();
    assert_eq!(
      first.placement_instance_json().expect("json"),
      second.placement_instance_json().expect("json")
    );
    assert_eq!(first.permutation_json().expect("json"), second.permutation_json().expect("json"));
    assert_eq!(first.public_instance().expect("instance"), second.public_instance().expect("instance"));
  }

  #[test]
  fn test_artifacts_are_written() {
    let mut driver = Driver::new(&config());
    driver.push(U256::from(1u64)).expect("push");
    driver.push(U256::from(2u64)).expect("push");
    driver.exec(opcode::SUB).expect("sub");
    driver.exec(opcode::STOP).expect("stop");
    let output = driver.finish().expect("finalize");

    let dir = std::env::temp_dir().join(format!("synth-artifacts-{}", std::process::id()));
    output.write_to(&dir).expect("write artifacts");
    let placements: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(dir.join("placementInstance.json")).expect("read"))
        .expect("parse");
    let entries = placements.as_array().expect("array");
    assert_eq!(entries.len(), output.placements.len());
    assert_eq!(entries[0]["placementIndex"], 0);

    let instance: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(dir.join("instance.json")).expect("read")).expect("parse");
    assert_eq!(instance["a"].as_array().expect("array").len(), output.library.params().l);
    std::fs::remove_dir_all(&dir).ok();
  }

  // ============================================================
  // Signed transactions
  // ============================================================

  #[test]
  fn test_origin_is_derived_from_the_signature() {
    let order = jubjub::SUBGROUP_ORDER;
    let secret = U256::from(0x1234_5678_9abc_def0_u64) << 64;
    let nonce_scalar = U256::from(0x0fed_cba9_8765_4321_u64) << 100;
    let public_key = jubjub::Point::BASE.mul(secret);
    let randomizer = jubjub::Point::BASE.mul(nonce_scalar);

    let mut config = config();
    config.transaction.nonce = 7;
    let contract = U256::from_be_slice(CONTRACT.as_slice());
    let selector = config.transaction.function_selector();
    let mut message = vec![
      randomizer.x,
      randomizer.y,
      public_key.x,
      public_key.y,
      U256::from(7u64),
      contract,
      selector,
    ];
    message.extend([U256::ZERO; 9]);
    let challenge = poseidon::hash_many(&message).reduce_mod(order);
    let signature = nonce_scalar.add_mod(challenge.mul_mod(secret, order), order);
    config.transaction.auth = Some(EddsaAuth {
      public_key: AffinePoint {
        x: public_key.x,
        y: public_key.y,
      },
      randomizer: AffinePoint {
        x: randomizer.x,
        y: randomizer.y,
      },
      signature,
    });

    let mask = (U256::from(1u64) << 160) - U256::from(1u64);
    let origin = poseidon::hash_many(&[public_key.x, public_key.y]) & mask;

    let mut driver = Driver::new(&config);
    driver.origin = origin;
    driver.exec(opcode::ORIGIN).expect("origin");
    driver.exec(opcode::STOP).expect("stop");

    let output = driver.finish().expect("finalize");
    assert_eq!(placements_named(&output, "EdDsaVerify").len(), 1);
    assert_eq!(placements_named(&output, "JubjubExp36").len(), 2 * jubjub::SCALAR_BITS.div_ceil(36));
    validate(&output);
  }

  #[test]
  fn test_forged_signature_is_rejected() {
    let public_key = jubjub::Point::BASE.mul(U256::from(11u64));
    let randomizer = jubjub::Point::BASE.mul(U256::from(13u64));
    let mut config = config();
    config.transaction.auth = Some(EddsaAuth {
      public_key: AffinePoint {
        x: public_key.x,
        y: public_key.y,
      },
      randomizer: AffinePoint {
        x: randomizer.x,
        y: randomizer.y,
      },
      signature: U256::from(17u64),
    });

    let mut driver = Driver::new(&config);
    driver.origin = U256::ZERO;
    let err = driver.exec(opcode::ORIGIN).unwrap_err();
    assert!(matches!(err, SynthesisError::InvalidOperand(_)), "{err}");
  }
}
