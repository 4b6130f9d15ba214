use std::sync::Arc;

use revm::{
  Context, InspectEvm, Inspector, MainBuilder, MainContext,
  context::{BlockEnv, CfgEnv, TxEnv},
  database::InMemoryDB,
  database_interface::{BENCH_CALLER, BENCH_CALLER_BALANCE, BENCH_TARGET, BENCH_TARGET_BALANCE},
  interpreter::interpreter_types::MemoryTr,
  interpreter::{CallInputs, CallOutcome, Interpreter, InterpreterTypes, Stack, interpreter_types::Jumps},
  primitives::{B256, Bytes, TxKind, U256},
  state::{AccountInfo, Bytecode},
};
use tracing::{debug, info, warn};

use crate::config::{BlockInfo, SynthesizerConfig};
use crate::error::{Result, SynthesisError};
use crate::opcodes::{is_call, opcode, opcode_input_count, opcode_name, opcode_output_count, reads_memory};
use crate::output::SynthesisOutput;
use crate::subcircuit::SubcircuitLibrary;
use crate::synthesizer::{FrameInfo, StepInput, StepOutput, Synthesizer, memory_window, to_offset};

/// Gas available to a synthesized transaction.
pub const SYNTHESIS_GAS_LIMIT: u64 = 1_000_000;

// ============================================================
// Helpers
// ============================================================

fn snapshot<M: MemoryTr>(memory: &M) -> Vec<u8> {
  memory.slice(0..memory.size()).to_vec()
}

/// Top `n` stack values, top first.
fn top_of_stack(stack: &[U256], n: usize) -> Vec<U256> {
  stack.iter().rev().take(n).copied().collect()
}

/// Bytes a call instruction passes to its callee.
fn call_arguments(step: &StepInput) -> Result<Bytes> {
  let (offset, length) = match step.opcode {
    opcode::CALL | opcode::CALLCODE => (step.inputs[3], step.inputs[4]),
    _ => (step.inputs[2], step.inputs[3]),
  };
  let length = to_offset(length, "calldata length")?;
  if length == 0 {
    return Ok(Bytes::new());
  }
  let offset = to_offset(offset, "calldata offset")?;
  Ok(Bytes::from(memory_window(&step.memory, offset, length)))
}

// ============================================================
// Synthesizing inspector
// ============================================================

/// An instruction seen by `step` and waiting for `step_end`.
struct PendingStep {
  input: StepInput,
  stack_len: usize,
}

/// An EVM inspector that drives a [`Synthesizer`] in lockstep with the
/// interpreter.
///
/// Inspector hooks cannot fail, so the first synthesis error is latched
/// and every later event is ignored.
pub struct SynthesizingInspector {
  synth: Option<Synthesizer>,
  /// Calldata of the outermost call.
  tx_input: Bytes,
  pending: Option<PendingStep>,
  /// Most recent call instruction, until its callee frame opens.
  last_call: Option<StepInput>,
  error: Option<SynthesisError>,
}

impl SynthesizingInspector {
  pub fn new(synth: Synthesizer, tx_input: Bytes) -> Self {
    SynthesizingInspector {
      synth: Some(synth),
      tx_input,
      pending: None,
      last_call: None,
      error: None,
    }
  }

  /// An inspector with no synthesizer attached; observes nothing.
  fn detached() -> Self {
    SynthesizingInspector {
      synth: None,
      tx_input: Bytes::new(),
      pending: None,
      last_call: None,
      error: None,
    }
  }

  fn record(&mut self, result: Result<()>) {
    if let Err(err) = result {
      warn!(%err, "synthesis failed");
      self.error.get_or_insert(err);
      self.synth = None;
    }
  }

  /// The synthesizer after execution, or the first error it hit.
  pub fn into_synthesizer(self) -> Result<Synthesizer> {
    if let Some(err) = self.error {
      return Err(err);
    }
    self
      .synth
      .ok_or_else(|| SynthesisError::Execution("synthesizer was lost during execution".into()))
  }
}

impl<CTX, INTR: InterpreterTypes<Stack = Stack>> Inspector<CTX, INTR> for SynthesizingInspector {
  fn step(&mut self, interp: &mut Interpreter<INTR>, _context: &mut CTX) {
    let Some(synth) = self.synth.as_mut() else {
      return;
    };
    let stack = interp.stack.data();

    // the previous instruction was a call whose callee has returned
    if synth.has_pending_call() {
      let success = stack.last().copied().unwrap_or_default();
      let result = synth.complete_call(success, stack.len(), &snapshot(&interp.memory));
      self.record(result);
      if self.error.is_some() {
        return;
      }
    }

    let op = interp.bytecode.opcode();
    let n_inputs = opcode_input_count(op);
    let memory = if is_call(op) {
      snapshot(&interp.memory)
    } else {
      Vec::new()
    };
    self.pending = Some(PendingStep {
      input: StepInput {
        opcode: op,
        pc: interp.bytecode.pc(),
        inputs: top_of_stack(stack, n_inputs),
        memory,
      },
      stack_len: stack.len(),
    });
  }

  fn step_end(&mut self, interp: &mut Interpreter<INTR>, _context: &mut CTX) {
    let Some(PendingStep { input, stack_len }) = self.pending.take() else {
      return;
    };
    let Some(synth) = self.synth.as_mut() else {
      return;
    };
    let op = input.opcode;
    let stack = interp.stack.data();

    // a call pushes its result only once the callee returns
    let n_outputs = if is_call(op) { 0 } else { opcode_output_count(op) };
    let n_inputs = opcode_input_count(op);
    if stack_len < n_inputs || stack.len() != stack_len - n_inputs + n_outputs {
      warn!(
        pc = input.pc,
        op = %opcode_name(op),
        "instruction halted without executing, skipped"
      );
      return;
    }

    let output = StepOutput {
      outputs: top_of_stack(stack, n_outputs),
      stack_len: stack.len(),
      memory: if reads_memory(op) {
        snapshot(&interp.memory)
      } else {
        Vec::new()
      },
    };
    let result = synth.apply_step(&input, &output);
    if result.is_ok() && is_call(op) {
      self.last_call = Some(input);
    }
    self.record(result);
  }

  fn call(&mut self, _context: &mut CTX, inputs: &mut CallInputs) -> Option<CallOutcome> {
    let depth = self.synth.as_ref()?.depth();
    let input = if depth == 0 {
      Ok(self.tx_input.clone())
    } else {
      self
        .last_call
        .take()
        .ok_or_else(|| SynthesisError::WireBookkeeping("callee frame without a call instruction".into()))
        .and_then(|step| call_arguments(&step))
    };
    let result = input.and_then(|input| {
      let info = FrameInfo {
        address: inputs.target_address,
        code_address: inputs.bytecode_address,
        caller: inputs.caller,
        value: inputs.call_value(),
        input,
      };
      match self.synth.as_mut() {
        Some(synth) => synth.begin_call(info),
        None => Ok(()),
      }
    });
    self.record(result);
    None
  }

  fn call_end(&mut self, _context: &mut CTX, _inputs: &CallInputs, outcome: &mut CallOutcome) {
    let Some(synth) = self.synth.as_mut() else {
      return;
    };
    let result = synth.end_call(outcome.result.result.is_ok(), &outcome.result.output);
    self.record(result);
  }
}

// ============================================================
// Public API
// ============================================================

fn finish(inspector: SynthesizingInspector) -> Result<SynthesisOutput> {
  let synth = inspector.into_synthesizer()?;
  debug!(steps = synth.steps(), "execution finished");
  synth.finalize()
}

/// Seeds `state` with the configured block hashes, so `BLOCKHASH` reads the
/// same values the circuit exposes.
fn seed_block_hashes(state: &mut InMemoryDB, block: &BlockInfo) {
  for (number, hash) in block.numbered_hashes() {
    state.cache.block_hashes.insert(number, hash);
  }
}

/// Runs `bytecode` as the benchmark contract and synthesizes its circuit.
///
/// The transaction is sent from the benchmark caller to the benchmark
/// contract, so the configured origin and contract are replaced by those
/// accounts. Calldata, value, nonce and the block are taken from the
/// configuration.
pub fn synthesize_bytecode(
  bytecode: Bytes,
  config: &SynthesizerConfig,
  library: Arc<SubcircuitLibrary>,
) -> Result<SynthesisOutput> {
  let mut config = config.clone();
  config.transaction.origin = BENCH_CALLER;
  config.transaction.contract = BENCH_TARGET;

  let mut state = InMemoryDB::default();
  state.insert_account_info(
    BENCH_CALLER,
    AccountInfo::from_balance(BENCH_CALLER_BALANCE).with_nonce(config.transaction.nonce),
  );
  state.insert_account_info(
    BENCH_TARGET,
    AccountInfo::from_bytecode(Bytecode::new_legacy(bytecode)).with_balance(BENCH_TARGET_BALANCE),
  );
  synthesize_transaction(state, &config, library)
}

/// Executes the configured transaction over `state` in the configured block
/// and synthesizes its circuit.
pub fn synthesize_transaction(
  mut state: InMemoryDB,
  config: &SynthesizerConfig,
  library: Arc<SubcircuitLibrary>,
) -> Result<SynthesisOutput> {
  let block = &config.block;
  let gas_limit = block.gas_limit_u64()?;
  let chain_id = block.chain_id_u64()?;
  let base_fee = block.base_fee_u64()?;
  seed_block_hashes(&mut state, block);

  let tx_info = &config.transaction;
  let synth = Synthesizer::new(library, config)?;
  let inspector = SynthesizingInspector::new(synth, tx_info.calldata.clone());
  let ctx = Context::mainnet()
    .with_db(state)
    .modify_block_chained(|env: &mut BlockEnv| {
      env.number = block.number;
      env.beneficiary = block.coinbase;
      env.timestamp = block.timestamp;
      env.gas_limit = gas_limit;
      env.basefee = base_fee;
      env.prevrandao = Some(B256::from(block.prevrandao.to_be_bytes::<32>()));
    })
    .modify_cfg_chained(|cfg: &mut CfgEnv| cfg.chain_id = chain_id);
  let mut evm = ctx.build_mainnet_with_inspector(inspector);

  let tx = TxEnv::builder()
    .caller(tx_info.origin)
    .kind(TxKind::Call(tx_info.contract))
    .data(tx_info.calldata.clone())
    .value(tx_info.value)
    .nonce(tx_info.nonce)
    .gas_limit(SYNTHESIS_GAS_LIMIT.min(gas_limit))
    .gas_price(u128::from(base_fee))
    .chain_id(Some(chain_id))
    .build()
    .map_err(|err| SynthesisError::Execution(format!("failed to build tx env: {err:?}")))?;

  let execution_result = evm
    .inspect_one_tx(tx)
    .map_err(|err| SynthesisError::Execution(format!("failed to execute tx: {err}")))?;
  info!(success = execution_result.is_success(), gas = execution_result.gas_used(), "executed transaction");

  let inspector = std::mem::replace(&mut evm.inspector, SynthesizingInspector::detached());
  finish(inspector)
}
