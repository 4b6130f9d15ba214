//! Step-driven synthesis engine.
//!
//! The interpreter reports every executed instruction through
//! [`Synthesizer::apply_step`] and every message call through
//! [`Synthesizer::begin_call`] / [`Synthesizer::end_call`]. The synthesizer
//! mirrors the EVM's stack and memory with provenance-carrying pointers,
//! emits placements as values are computed, and after the last step
//! [`Synthesizer::finalize`] turns the placements into circuit artifacts.

use std::sync::Arc;

use revm::primitives::{Address, Bytes, U256};
use tracing::{debug, info, instrument, trace, warn};

use crate::buffers::ReservedVariable;
use crate::config::SynthesizerConfig;
use crate::context::{StorageCheckpoint, SynthesisContext};
use crate::data_pt::Shadowed;
use crate::error::{Result, SynthesisError};
use crate::memory_pt::{MemoryPt, MemoryPtEntry};
use crate::opcodes::{opcode_input_count, opcode_name};
use crate::output::SynthesisOutput;
use crate::permutation::build_permutation;
use crate::refactor::refactor_placements;
use crate::stack_pt::StackPt;
use crate::subcircuit::SubcircuitLibrary;

// ============================================================
// Interpreter-facing types
// ============================================================

/// The message call a frame executes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInfo {
  /// Account whose storage and balance the frame acts on.
  pub address: Address,
  /// Account whose code runs.
  pub code_address: Address,
  pub caller: Address,
  pub value: U256,
  pub input: Bytes,
}

/// The interpreter state an instruction starts from.
#[derive(Debug, Clone, Default)]
pub struct StepInput {
  pub opcode: u8,
  pub pc: usize,
  /// Popped operands, top of stack first.
  pub inputs: Vec<U256>,
  /// Memory before the instruction. Only needed by call-family opcodes.
  pub memory: Vec<u8>,
}

/// The interpreter state an instruction leaves behind.
#[derive(Debug, Clone, Default)]
pub struct StepOutput {
  /// Top of the stack after the instruction, top first, covering every
  /// slot the instruction wrote.
  pub outputs: Vec<U256>,
  pub stack_len: usize,
  /// Memory after the instruction. Only needed by opcodes that read or
  /// write memory.
  pub memory: Vec<u8>,
}

// ============================================================
// Call frames
// ============================================================

#[derive(Debug, Clone)]
pub(crate) struct ChildResult {
  pub entries: Vec<MemoryPtEntry>,
  pub length: usize,
}

/// A call instruction waiting for its callee to return.
#[derive(Debug, Clone)]
pub(crate) struct PendingCall {
  pub opcode: u8,
  pub pc: usize,
  pub out_offset: usize,
  pub out_length: usize,
  /// Calldata handed to the callee; taken when the callee frame opens.
  pub calldata: Option<Vec<MemoryPtEntry>>,
  pub child: Option<ChildResult>,
}

#[derive(Debug, Clone)]
pub(crate) struct CallFrame {
  pub info: FrameInfo,
  pub depth: usize,
  pub stack: StackPt,
  pub memory: MemoryPt,
  pub calldata: Vec<MemoryPtEntry>,
  /// Output of the most recent callee, for `RETURNDATACOPY`.
  pub return_data: Vec<MemoryPtEntry>,
  /// What this frame returns, set by `RETURN` or `REVERT`.
  pub result: Vec<MemoryPtEntry>,
  pub pending: Option<PendingCall>,
  /// Storage to return to if the frame does not succeed.
  storage_checkpoint: StorageCheckpoint,
}

impl CallFrame {
  fn new(info: FrameInfo, depth: usize, calldata: Vec<MemoryPtEntry>, storage_checkpoint: StorageCheckpoint) -> Self {
    CallFrame {
      info,
      depth,
      stack: StackPt::new(),
      memory: MemoryPt::new(),
      calldata,
      return_data: Vec::new(),
      result: Vec::new(),
      pending: None,
      storage_checkpoint,
    }
  }
}

// ============================================================
// Helpers
// ============================================================

/// `memory[offset..offset + len]`, zero-extended past the end.
pub(crate) fn memory_window(memory: &[u8], offset: usize, len: usize) -> Vec<u8> {
  let mut out = vec![0u8; len];
  if offset < memory.len() {
    let end = memory.len().min(offset + len);
    out[..end - offset].copy_from_slice(&memory[offset..end]);
  }
  out
}

/// Compares a concrete memory window with its shadow, reporting the first
/// differing word.
pub(crate) fn check_memory(context: &str, concrete: &[u8], symbolic: &[u8]) -> Result<()> {
  if concrete == symbolic {
    return Ok(());
  }
  let word = |bytes: &[u8], i: usize| {
    let end = bytes.len().min(i + 32);
    U256::from_be_slice(&bytes[i.min(end)..end])
  };
  let start = concrete
    .iter()
    .zip(symbolic)
    .position(|(a, b)| a != b)
    .unwrap_or(concrete.len().min(symbolic.len()));
  let start = start - start % 32;
  Err(SynthesisError::shadow(
    format!("{context} (memory word at +{start}, {} vs {} bytes)", concrete.len(), symbolic.len()),
    word(concrete, start),
    word(symbolic, start),
  ))
}

/// A memory offset or length operand.
pub(crate) fn to_offset(value: U256, what: &str) -> Result<usize> {
  usize::try_from(value)
    .ok()
    .filter(|v| *v <= u32::MAX as usize)
    .ok_or_else(|| SynthesisError::InvalidOperand(format!("{what} {value:#x} is out of range")))
}

// ============================================================
// Synthesizer
// ============================================================

pub struct Synthesizer {
  pub(crate) ctx: SynthesisContext,
  pub(crate) frames: Vec<CallFrame>,
  pub(crate) origin: Address,
  /// Bytes returned by the outermost frame, once it has ended.
  top_level_result: Option<Vec<MemoryPtEntry>>,
  top_level_success: Option<bool>,
  steps: usize,
}

impl Synthesizer {
  pub fn new(library: Arc<SubcircuitLibrary>, config: &SynthesizerConfig) -> Result<Self> {
    let ctx = SynthesisContext::new(library, config)?;
    Ok(Synthesizer {
      ctx,
      frames: Vec::new(),
      origin: config.transaction.origin,
      top_level_result: None,
      top_level_success: None,
      steps: 0,
    })
  }

  pub fn context(&self) -> &SynthesisContext {
    &self.ctx
  }

  pub fn depth(&self) -> usize {
    self.frames.len()
  }

  pub fn steps(&self) -> usize {
    self.steps
  }

  /// Shadow of the outermost frame's return data.
  pub fn top_level_result(&self) -> Option<&[MemoryPtEntry]> {
    self.top_level_result.as_deref()
  }

  /// Opens a call frame.
  ///
  /// The outermost frame reads its calldata from the transaction's private
  /// inputs; nested frames receive what the pending call instruction of
  /// their parent prepared.
  pub fn begin_call(&mut self, info: FrameInfo) -> Result<()> {
    let depth = self.frames.len();
    let calldata = match self.frames.last_mut() {
      None => self.transaction_calldata()?,
      Some(parent) => parent
        .pending
        .as_mut()
        .and_then(|pending| pending.calldata.take())
        .ok_or_else(|| {
          SynthesisError::WireBookkeeping(format!(
            "call into {} at depth {depth} without a pending call instruction",
            info.address
          ))
        })?,
    };
    let shadow = MemoryPt::simulate(&calldata).view_memory(0, info.input.len());
    check_memory("calldata", &info.input, &shadow)?;
    debug!(depth, address = %info.address, calldata = info.input.len(), "begin call");
    let checkpoint = self.ctx.storage_checkpoint();
    self.frames.push(CallFrame::new(info, depth, calldata, checkpoint));
    Ok(())
  }

  fn transaction_calldata(&mut self) -> Result<Vec<MemoryPtEntry>> {
    let mut entries = Vec::new();
    let selector = self.ctx.reserved(ReservedVariable::FunctionSelector)?;
    entries.push(MemoryPtEntry::new(0, 4, selector));
    let mut i = 0;
    while self.ctx.has_reserved(ReservedVariable::TransactionInput(i)) {
      let word = self.ctx.reserved(ReservedVariable::TransactionInput(i))?;
      entries.push(MemoryPtEntry::new(4 + 32 * i, 32, word));
      i += 1;
    }
    Ok(entries)
  }

  /// Closes the innermost frame, handing its result to the caller. A frame
  /// that did not succeed takes its storage writes with it.
  pub fn end_call(&mut self, success: bool, output: &[u8]) -> Result<()> {
    let frame = self
      .frames
      .pop()
      .ok_or_else(|| SynthesisError::WireBookkeeping("end of a call that never began".into()))?;
    if frame.pending.is_some() {
      warn!(depth = frame.depth, "frame ended before its last call result was used");
    }
    let entries = frame.result;
    let shadow = MemoryPt::simulate(&entries).view_memory(0, output.len());
    check_memory("return data", output, &shadow)?;
    debug!(depth = frame.depth, success, output = output.len(), "end call");
    if !success {
      self.ctx.revert_storage(frame.storage_checkpoint);
    }

    match self.frames.last_mut() {
      None => {
        self.top_level_result = Some(entries);
        self.top_level_success = Some(success);
      }
      Some(parent) => {
        let pending = parent.pending.as_mut().ok_or_else(|| {
          SynthesisError::WireBookkeeping("callee returned to a frame with no pending call".into())
        })?;
        pending.child = Some(ChildResult {
          entries,
          length: output.len(),
        });
      }
    }
    Ok(())
  }

  /// Whether the innermost frame is waiting for [`Self::complete_call`].
  pub fn has_pending_call(&self) -> bool {
    self
      .frames
      .last()
      .is_some_and(|frame| frame.pending.as_ref().is_some_and(|p| p.child.is_some()))
  }

  /// Finishes a call instruction once its callee has returned: copies the
  /// return data into memory and pushes the success flag.
  pub fn complete_call(&mut self, success: U256, stack_len: usize, memory: &[u8]) -> Result<()> {
    let Synthesizer {
      ctx,
      frames,
      ..
    } = self;
    let frame = frames
      .last_mut()
      .ok_or_else(|| SynthesisError::WireBookkeeping("no active frame".into()))?;
    let pending = frame
      .pending
      .take()
      .ok_or_else(|| SynthesisError::WireBookkeeping("no pending call".into()))?;
    let child = pending.child.unwrap_or(ChildResult {
      entries: Vec::new(),
      length: 0,
    });
    let name = opcode_name(pending.opcode);

    let copied = pending.out_length.min(child.length);
    if copied > 0 {
      let entries = ctx.copy_memory_pts(&child.entries, 0, copied, pending.out_offset)?;
      frame.memory.write_batch(&entries);
      let shadow = frame.memory.view_memory(pending.out_offset, copied);
      check_memory(&name, &memory_window(memory, pending.out_offset, copied), &shadow)?;
    }
    frame.return_data = child.entries;

    let description = format!(
      "Call result of {name} instruction at PC {} of code address {} called by {}",
      pending.pc, frame.info.code_address, frame.info.caller
    );
    let flag = ctx.load_static(success, Some(1), Some(&description))?;
    frame.stack.push(Shadowed::new(&name, success, flag)?);
    if frame.stack.len() != stack_len {
      return Err(SynthesisError::WireBookkeeping(format!(
        "{name} at pc {}: shadow stack holds {}, interpreter {stack_len}",
        pending.pc,
        frame.stack.len()
      )));
    }
    Ok(())
  }

  /// Synthesizes one executed instruction of the innermost frame.
  pub fn apply_step(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let expected_inputs = opcode_input_count(pre.opcode);
    if pre.inputs.len() != expected_inputs {
      return Err(SynthesisError::InvalidOperand(format!(
        "{} takes {expected_inputs} operands, {} supplied",
        opcode_name(pre.opcode),
        pre.inputs.len()
      )));
    }
    let frame = self
      .frames
      .last()
      .ok_or_else(|| SynthesisError::WireBookkeeping("instruction outside of any call".into()))?;
    if frame.pending.is_some() {
      return Err(SynthesisError::WireBookkeeping(format!(
        "{} executed while a call result is outstanding",
        opcode_name(pre.opcode)
      )));
    }
    trace!(
      depth = frame.depth,
      pc = pre.pc,
      op = %opcode_name(pre.opcode),
      "step"
    );

    self.dispatch(pre, post)?;
    self.steps += 1;

    let frame = self
      .frames
      .last()
      .ok_or_else(|| SynthesisError::WireBookkeeping("frame vanished during a step".into()))?;
    if frame.stack.len() != post.stack_len {
      return Err(SynthesisError::WireBookkeeping(format!(
        "{} at pc {}: shadow stack holds {}, interpreter {}",
        opcode_name(pre.opcode),
        pre.pc,
        frame.stack.len(),
        post.stack_len
      )));
    }
    Ok(())
  }

  /// Whether the outermost frame succeeded, once it has ended.
  pub fn top_level_success(&self) -> Option<bool> {
    self.top_level_success
  }

  /// Exports storage writes, finalizes the placements and builds the
  /// permutation. A reverted transaction exports no storage.
  #[instrument(skip_all)]
  pub fn finalize(mut self) -> Result<SynthesisOutput> {
    if !self.frames.is_empty() {
      return Err(SynthesisError::WireBookkeeping(format!(
        "{} call frames still open",
        self.frames.len()
      )));
    }
    if self.top_level_success == Some(false) {
      debug!("transaction reverted, storage writes are not exported");
    } else {
      self.ctx.export_storage()?;
    }
    self.ctx.check_buffers()?;
    let library = self.ctx.shared_library();
    let placements = refactor_placements(&self.ctx)?;
    let permutation = build_permutation(&placements, &library)?;
    info!(
      steps = self.steps,
      placements = placements.len(),
      links = permutation.len(),
      "synthesis finished"
    );
    Ok(SynthesisOutput {
      library,
      placements,
      permutation,
    })
  }
}
