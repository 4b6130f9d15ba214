//! Per-opcode synthesis.
//!
//! Every handler pops its operands from the shadow stack (checking each
//! against the concrete value the interpreter consumed), emits whatever
//! placements the instruction needs and pushes the result, which must equal
//! the concrete result.

use revm::primitives::{U256, keccak256};

use crate::buffers::ReservedVariable;
use crate::context::SynthesisContext;
use crate::data_pt::{DataPt, Shadowed};
use crate::error::{Result, SynthesisError};
use crate::memory_pt::{MemoryPt, MemoryPtEntry};
use crate::opcodes::{opcode, opcode_name};
use crate::operations::ArithOp;
use crate::synthesizer::{
  CallFrame, FrameInfo, PendingCall, StepInput, StepOutput, Synthesizer, check_memory,
  memory_window, to_offset,
};

/// Word size of every memory chunk exported to a public buffer.
const CHUNK_BYTES: usize = 32;

/// Highest address of a precompiled contract.
const LAST_PRECOMPILE: u64 = 10;

fn static_description(op: u8, pc: usize, info: &FrameInfo, target: Option<U256>) -> String {
  let mut desc = format!(
    "Static input for {} instruction at PC {pc} of code address {} called by {}",
    opcode_name(op),
    info.code_address,
    info.caller
  );
  if let Some(target) = target {
    desc.push_str(&format!("(target: {target:#x})"));
  }
  desc
}

fn concrete_output(context: &str, post: &StepOutput) -> Result<U256> {
  post
    .outputs
    .first()
    .copied()
    .ok_or_else(|| SynthesisError::WireBookkeeping(format!("{context}: no concrete output")))
}

fn push_result(frame: &mut CallFrame, context: &str, post: &StepOutput, pt: DataPt) -> Result<()> {
  let concrete = concrete_output(context, post)?;
  frame.stack.push(Shadowed::new(context, concrete, pt)?);
  Ok(())
}

fn zero(ctx: &mut SynthesisContext) -> Result<DataPt> {
  ctx.load_static(U256::ZERO, Some(1), None)
}

/// Exposes `[offset, offset + len)` of `memory` as public outputs, one word
/// per wire.
fn export_memory(ctx: &mut SynthesisContext, memory: &MemoryPt, offset: usize, len: usize, tag: &str) -> Result<()> {
  for (i, start) in (0..len).step_by(CHUNK_BYTES).enumerate() {
    let size = CHUNK_BYTES.min(len - start);
    let infos = memory.get_data_alias(offset + start, size)?;
    let pt = if infos.is_empty() {
      zero(ctx)?
    } else {
      ctx.place_memory_to_stack(&infos)?
    };
    ctx.add_wire_to_out_buffer(pt, format!("{tag}[{i}]"))?;
  }
  Ok(())
}

/// Checks the shadow stack top against `values` (top first).
fn check_stack_top(frame: &CallFrame, context: &str, values: &[U256]) -> Result<()> {
  for (depth, value) in values.iter().enumerate() {
    let pt = frame.stack.peek(depth).ok_or_else(|| {
      SynthesisError::ProvenanceViolation(format!("{context}: shadow stack too short"))
    })?;
    if pt.value != *value {
      return Err(SynthesisError::shadow(format!("{context}, stack slot {depth}"), *value, pt.value));
    }
  }
  Ok(())
}

impl Synthesizer {
  fn parts(&mut self) -> Result<(&mut SynthesisContext, &mut CallFrame)> {
    let frame = self
      .frames
      .last_mut()
      .ok_or_else(|| SynthesisError::WireBookkeeping("no active frame".into()))?;
    Ok((&mut self.ctx, frame))
  }

  pub(crate) fn dispatch(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    use opcode::*;
    let op = pre.opcode;
    if let Some(arith) = ArithOp::from_opcode(op) {
      return self.handle_arith(arith, pre, post);
    }
    match op {
      STOP | JUMPDEST | INVALID => Ok(()),
      KECCAK256 => self.handle_keccak(pre, post),
      ADDRESS..=EXTCODEHASH => self.handle_env(pre, post),
      BLOCKHASH..=BASEFEE => self.handle_block(pre, post),
      POP | JUMP | JUMPI => {
        let context = format!("{} at pc {}", opcode_name(op), pre.pc);
        let (_, frame) = self.parts()?;
        frame.stack.pop_checked(&context, &pre.inputs)?;
        Ok(())
      }
      MLOAD | MSTORE | MSTORE8 | MCOPY | MSIZE => self.handle_memory(pre, post),
      SLOAD | SSTORE => self.handle_storage(pre, post),
      PC | GAS => self.handle_static(pre, post),
      PUSH0..=PUSH32 => self.handle_push(pre, post),
      DUP1..=DUP16 | SWAP1..=SWAP16 => self.handle_shuffle(pre, post),
      LOG0..=LOG4 => self.handle_log(pre, post),
      CALL | CALLCODE | DELEGATECALL | STATICCALL => self.handle_call(pre),
      RETURN | REVERT => self.handle_return(pre, post),
      BLOBHASH | BLOBBASEFEE | TLOAD | TSTORE | CREATE | CREATE2 | SELFDESTRUCT => Err(
        SynthesisError::unsupported(op, format!("{} is not supported", opcode_name(op))),
      ),
      _ => Err(SynthesisError::unsupported(op, "unknown opcode")),
    }
  }

  // ============================================================
  // Arithmetic
  // ============================================================

  fn handle_arith(&mut self, arith: ArithOp, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let context = format!("{} at pc {}", arith.name(), pre.pc);
    let (ctx, frame) = self.parts()?;
    let in_pts = frame.stack.pop_checked(&context, &pre.inputs)?;
    let out = if arith == ArithOp::Exp {
      let mut operands = in_pts.into_iter();
      match (operands.next(), operands.next()) {
        (Some(base), Some(exponent)) => ctx.place_exp(base, exponent)?,
        _ => return Err(SynthesisError::InvalidOperand("EXP takes two operands".into())),
      }
    } else {
      ctx.place_arith_one(arith, in_pts)?
    };
    push_result(frame, &context, post, out)
  }

  fn handle_keccak(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let context = format!("KECCAK256 at pc {}", pre.pc);
    let (ctx, frame) = self.parts()?;
    frame.stack.pop_checked(&context, &pre.inputs)?;
    let length = to_offset(pre.inputs[1], "KECCAK256 length")?;
    let offset = if length == 0 { 0 } else { to_offset(pre.inputs[0], "KECCAK256 offset")? };

    let data = memory_window(&post.memory, offset, length);
    let digest = U256::from_be_bytes(keccak256(&data).0);
    let concrete = concrete_output(&context, post)?;
    if digest != concrete {
      return Err(SynthesisError::shadow(&context, concrete, digest));
    }
    check_memory(&context, &data, &frame.memory.view_memory(offset, length))?;

    export_memory(ctx, &frame.memory, offset, length, "KECCAK_IN")?;
    let pt = ctx.load_public(digest, 256, "KECCAK_OUT")?;
    push_result(frame, &context, post, pt)
  }

  // ============================================================
  // Environment
  // ============================================================

  fn handle_env(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    use opcode::*;
    let op = pre.opcode;
    let context = format!("{} at pc {}", opcode_name(op), pre.pc);
    let origin = self.origin;
    let (ctx, frame) = self.parts()?;
    frame.stack.pop_checked(&context, &pre.inputs)?;

    let out = match op {
      ADDRESS if frame.info.address == origin => ctx.origin_pt()?,
      CALLER if frame.info.caller == origin => ctx.origin_pt()?,
      ORIGIN => ctx.origin_pt()?,
      ADDRESS | CALLER | CALLVALUE | CALLDATASIZE | CODESIZE | GASPRICE | RETURNDATASIZE => {
        let value = concrete_output(&context, post)?;
        let desc = static_description(op, pre.pc, &frame.info, None);
        ctx.load_static(value, None, Some(&desc))?
      }
      BALANCE | EXTCODESIZE | EXTCODEHASH => {
        let value = concrete_output(&context, post)?;
        let desc = static_description(op, pre.pc, &frame.info, Some(pre.inputs[0]));
        ctx.load_static(value, None, Some(&desc))?
      }
      CALLDATALOAD => {
        let offset = usize::try_from(pre.inputs[0])
          .ok()
          .filter(|o| *o <= u32::MAX as usize);
        match offset {
          Some(offset) if !frame.calldata.is_empty() => {
            let infos = MemoryPt::simulate(&frame.calldata).get_data_alias(offset, CHUNK_BYTES)?;
            if infos.is_empty() {
              zero(ctx)?
            } else {
              ctx.place_memory_to_stack(&infos)?
            }
          }
          _ => zero(ctx)?,
        }
      }
      CALLDATACOPY | RETURNDATACOPY => {
        let length = to_offset(pre.inputs[2], "copy length")?;
        if length > 0 {
          let dst = to_offset(pre.inputs[0], "memory offset")?;
          let source = if op == CALLDATACOPY {
            &frame.calldata
          } else {
            &frame.return_data
          };
          let copied = match usize::try_from(pre.inputs[1]).ok().filter(|o| *o <= u32::MAX as usize) {
            Some(src) => ctx.copy_memory_pts(source, src, length, dst)?,
            None => vec![MemoryPtEntry::new(dst, length, zero(ctx)?)],
          };
          frame.memory.write_batch(&copied);
          let shadow = frame.memory.view_memory(dst, length);
          check_memory(&context, &memory_window(&post.memory, dst, length), &shadow)?;
        }
        return Ok(());
      }
      CODECOPY | EXTCODECOPY => {
        let (target, args) = if op == CODECOPY {
          (None, &pre.inputs[..])
        } else {
          (Some(pre.inputs[0]), &pre.inputs[1..])
        };
        let length = to_offset(args[2], "copy length")?;
        if length > 0 {
          let dst = to_offset(args[0], "memory offset")?;
          let code = memory_window(&post.memory, dst, length);
          let chunks = length.div_ceil(CHUNK_BYTES);
          let owner = target.map_or_else(|| frame.info.code_address.to_string(), |t| format!("{t:#x}"));
          let mut entries = Vec::with_capacity(chunks);
          for (i, chunk) in code.chunks(CHUNK_BYTES).enumerate() {
            let desc = format!(
              "Code of address: {owner}, offset: {:#x}, length: {length} bytes, chunk: {} out of {chunks}.",
              args[1],
              i + 1
            );
            let pt = ctx.load_static(U256::from_be_slice(chunk), None, Some(&desc))?;
            entries.push(MemoryPtEntry::new(dst + i * CHUNK_BYTES, chunk.len(), pt));
          }
          frame.memory.write_batch(&entries);
          check_memory(&context, &code, &frame.memory.view_memory(dst, length))?;
        }
        return Ok(());
      }
      _ => return Err(SynthesisError::unsupported(op, "not an environment opcode")),
    };
    push_result(frame, &context, post, out)
  }

  // ============================================================
  // Block information
  // ============================================================

  fn handle_block(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    use opcode::*;
    let op = pre.opcode;
    let context = format!("{} at pc {}", opcode_name(op), pre.pc);
    let (ctx, frame) = self.parts()?;
    frame.stack.pop_checked(&context, &pre.inputs)?;

    // the balance belongs to the executing account, not the block
    if op == SELFBALANCE {
      let value = concrete_output(&context, post)?;
      let account = U256::from_be_slice(frame.info.address.as_slice());
      let desc = static_description(op, pre.pc, &frame.info, Some(account));
      let pt = ctx.load_static(value, None, Some(&desc))?;
      return push_result(frame, &context, post, pt);
    }

    let var = match op {
      COINBASE => Some(ReservedVariable::Coinbase),
      TIMESTAMP => Some(ReservedVariable::Timestamp),
      NUMBER => Some(ReservedVariable::Number),
      PREVRANDAO => Some(ReservedVariable::Prevrandao),
      GASLIMIT => Some(ReservedVariable::GasLimit),
      CHAINID => Some(ReservedVariable::ChainId),
      BASEFEE => Some(ReservedVariable::BaseFee),
      BLOCKHASH => {
        let number = ctx.reserved(ReservedVariable::Number)?.value;
        let requested = pre.inputs[0];
        (requested < number)
          .then(|| usize::try_from(number - requested).ok())
          .flatten()
          .map(ReservedVariable::BlockHash)
          .filter(|var| ctx.has_reserved(*var))
      }
      _ => return Err(SynthesisError::unsupported(op, "not a block opcode")),
    };
    let pt = match var {
      Some(var) => ctx.reserved(var)?,
      None => {
        let value = concrete_output(&context, post)?;
        ctx.load_static(value, None, Some("BLOCKHASH"))?
      }
    };
    push_result(frame, &context, post, pt)
  }

  // ============================================================
  // Stack
  // ============================================================

  fn handle_static(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let context = format!("{} at pc {}", opcode_name(pre.opcode), pre.pc);
    let (ctx, frame) = self.parts()?;
    let value = concrete_output(&context, post)?;
    let desc = static_description(pre.opcode, pre.pc, &frame.info, None);
    let pt = ctx.load_static(value, None, Some(&desc))?;
    push_result(frame, &context, post, pt)
  }

  fn handle_push(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let width = (pre.opcode - opcode::PUSH0) as u16;
    let context = format!("{} at pc {}", opcode_name(pre.opcode), pre.pc);
    let (ctx, frame) = self.parts()?;
    let value = concrete_output(&context, post)?;
    let desc = static_description(pre.opcode, pre.pc, &frame.info, None);
    let pt = ctx.load_static(value, Some((width * 8).max(1)), Some(&desc))?;
    push_result(frame, &context, post, pt)
  }

  fn handle_shuffle(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let op = pre.opcode;
    let context = format!("{} at pc {}", opcode_name(op), pre.pc);
    let (_, frame) = self.parts()?;
    check_stack_top(frame, &context, &pre.inputs)?;
    if op <= opcode::DUP16 {
      frame.stack.dup((op - opcode::DUP1 + 1) as usize)?;
    } else {
      frame.stack.swap((op - opcode::SWAP1 + 1) as usize)?;
    }
    check_stack_top(frame, &context, &post.outputs)
  }

  // ============================================================
  // Memory and storage
  // ============================================================

  fn handle_memory(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    use opcode::*;
    let op = pre.opcode;
    let context = format!("{} at pc {}", opcode_name(op), pre.pc);
    let (ctx, frame) = self.parts()?;
    let in_pts = frame.stack.pop_checked(&context, &pre.inputs)?;
    match op {
      MLOAD => {
        let offset = to_offset(pre.inputs[0], "MLOAD offset")?;
        let infos = frame.memory.get_data_alias(offset, CHUNK_BYTES)?;
        let pt = if infos.is_empty() {
          zero(ctx)?
        } else {
          ctx.place_memory_to_stack(&infos)?
        };
        push_result(frame, &context, post, pt)
      }
      MSTORE | MSTORE8 => {
        let offset = to_offset(pre.inputs[0], "store offset")?;
        let (size, bits) = if op == MSTORE { (CHUNK_BYTES, 256) } else { (1, 8) };
        let value = in_pts
          .into_iter()
          .nth(1)
          .ok_or_else(|| SynthesisError::InvalidOperand("store without a value".into()))?;
        let stored = ctx.place_mstore(value, bits)?;
        let view = frame.memory.write(offset, size, stored);
        check_memory(&context, &memory_window(&post.memory, offset, size), &view)
      }
      MCOPY => {
        let length = to_offset(pre.inputs[2], "MCOPY length")?;
        if length > 0 {
          let dst = to_offset(pre.inputs[0], "MCOPY destination")?;
          let src = to_offset(pre.inputs[1], "MCOPY source")?;
          let source = frame.memory.read(src, length);
          let copied = ctx.copy_memory_pts(&source, src, length, dst)?;
          frame.memory.write_batch(&copied);
          let shadow = frame.memory.view_memory(dst, length);
          check_memory(&context, &memory_window(&post.memory, dst, length), &shadow)?;
        }
        Ok(())
      }
      MSIZE => {
        let value = concrete_output(&context, post)?;
        let desc = static_description(op, pre.pc, &frame.info, None);
        let pt = ctx.load_static(value, None, Some(&desc))?;
        push_result(frame, &context, post, pt)
      }
      _ => Err(SynthesisError::unsupported(op, "not a memory opcode")),
    }
  }

  fn handle_storage(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let op = pre.opcode;
    let context = format!("{} at pc {}", opcode_name(op), pre.pc);
    let (ctx, frame) = self.parts()?;
    let in_pts = frame.stack.pop_checked(&context, &pre.inputs)?;
    let address = frame.info.address;
    let slot = pre.inputs[0];
    if op == opcode::SLOAD {
      let value = concrete_output(&context, post)?;
      let pt = ctx.load_storage(address, slot, value)?;
      push_result(frame, &context, post, pt)
    } else {
      let value = in_pts
        .into_iter()
        .nth(1)
        .ok_or_else(|| SynthesisError::InvalidOperand("SSTORE without a value".into()))?;
      ctx.store_storage(address, slot, value)
    }
  }

  // ============================================================
  // Logs, calls and returns
  // ============================================================

  fn handle_log(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let context = format!("{} at pc {}", opcode_name(pre.opcode), pre.pc);
    let (ctx, frame) = self.parts()?;
    let in_pts = frame.stack.pop_checked(&context, &pre.inputs)?;
    let length = to_offset(pre.inputs[1], "LOG length")?;
    let offset = if length == 0 { 0 } else { to_offset(pre.inputs[0], "LOG offset")? };
    check_memory(
      &context,
      &memory_window(&post.memory, offset, length),
      &frame.memory.view_memory(offset, length),
    )?;
    for (i, topic) in in_pts.into_iter().skip(2).enumerate() {
      ctx.add_wire_to_out_buffer(topic, format!("LOG_TOPIC[{i}]"))?;
    }
    export_memory(ctx, &frame.memory, offset, length, "LOG_DATA")
  }

  fn handle_call(&mut self, pre: &StepInput) -> Result<()> {
    let op = pre.opcode;
    let context = format!("{} at pc {}", opcode_name(op), pre.pc);
    let (ctx, frame) = self.parts()?;
    frame.stack.pop_checked(&context, &pre.inputs)?;
    let args = &pre.inputs;
    let (to, in_offset, in_length, out_offset, out_length) = match op {
      opcode::CALL | opcode::CALLCODE => (args[1], args[3], args[4], args[5], args[6]),
      _ => (args[1], args[2], args[3], args[4], args[5]),
    };
    if to >= U256::from(1u64) && to <= U256::from(LAST_PRECOMPILE) {
      return Err(SynthesisError::unsupported(op, "precompiled contracts are not supported"));
    }

    let in_length = to_offset(in_length, "calldata length")?;
    let calldata = if in_length > 0 {
      let in_offset = to_offset(in_offset, "calldata offset")?;
      let source = frame.memory.read(in_offset, in_length);
      let calldata = ctx.copy_memory_pts(&source, in_offset, in_length, 0)?;
      check_memory(
        &context,
        &memory_window(&pre.memory, in_offset, in_length),
        &MemoryPt::simulate(&calldata).view_memory(0, in_length),
      )?;
      calldata
    } else {
      Vec::new()
    };
    let out_length = to_offset(out_length, "return data length")?;
    let out_offset = if out_length == 0 { 0 } else { to_offset(out_offset, "return data offset")? };

    frame.pending = Some(PendingCall {
      opcode: op,
      pc: pre.pc,
      out_offset,
      out_length,
      calldata: Some(calldata),
      child: None,
    });
    Ok(())
  }

  fn handle_return(&mut self, pre: &StepInput, post: &StepOutput) -> Result<()> {
    let op = pre.opcode;
    let context = format!("{} at pc {}", opcode_name(op), pre.pc);
    let (ctx, frame) = self.parts()?;
    frame.stack.pop_checked(&context, &pre.inputs)?;
    let length = to_offset(pre.inputs[1], "return length")?;
    let result = if length > 0 {
      let offset = to_offset(pre.inputs[0], "return offset")?;
      let source = frame.memory.read(offset, length);
      ctx.copy_memory_pts(&source, offset, length, 0)?
    } else {
      Vec::new()
    };
    let shadow = MemoryPt::simulate(&result);
    if length > 0 {
      let offset = to_offset(pre.inputs[0], "return offset")?;
      check_memory(
        &context,
        &memory_window(&post.memory, offset, length),
        &shadow.view_memory(0, length),
      )?;
    }
    if frame.depth == 0 && op == opcode::RETURN {
      export_memory(ctx, &shadow, 0, length, "RETURN_DATA")?;
    }
    frame.result = result;
    Ok(())
  }
}
