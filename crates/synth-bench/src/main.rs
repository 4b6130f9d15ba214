use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use revm::{bytecode::opcode, primitives::Bytes};
use synth_core::validator::{ReferenceEvaluator, validate_instances, validate_permutation};
use synth_core::{LibraryCapacity, SubcircuitLibrary, SynthesizerConfig, synthesize_bytecode};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};

const BINARY_OPS: [u8; 9] = [
  opcode::ADD,
  opcode::MUL,
  opcode::SUB,
  opcode::DIV,
  opcode::MOD,
  opcode::LT,
  opcode::EQ,
  opcode::AND,
  opcode::XOR,
];

fn parse_arg_usize(args: &[String], key: &str, default: usize) -> usize {
  let mut i = 0;
  while i < args.len() {
    if args[i] == key
      && let Some(v) = args.get(i + 1).and_then(|x| x.parse::<usize>().ok())
    {
      return v;
    }
    i += 1;
  }
  default
}

fn parse_arg_opt_u64(args: &[String], key: &str) -> Option<u64> {
  let mut i = 0;
  while i < args.len() {
    if args[i] == key {
      return args.get(i + 1).and_then(|x| x.parse::<u64>().ok());
    }
    i += 1;
  }
  None
}

fn has_flag(args: &[String], key: &str) -> bool {
  args.iter().any(|arg| arg == key)
}

fn push_random(code: &mut Vec<u8>, rng: &mut StdRng) {
  let width = rng.random_range(1..=32usize);
  code.push(opcode::PUSH0 + width as u8);
  code.extend((0..width).map(|_| rng.random::<u8>()));
}

/// A straight-line program of `ops` random binary operations, with the
/// accumulator spilled to and reloaded from memory every few steps.
fn random_program(ops: usize, rng: &mut StdRng) -> Bytes {
  let mut code = Vec::with_capacity(ops * 40);
  push_random(&mut code, rng);
  for i in 0..ops {
    push_random(&mut code, rng);
    code.push(BINARY_OPS[rng.random_range(0..BINARY_OPS.len())]);
    if i % 8 == 7 {
      let offset = rng.random_range(0..64u8);
      code.extend_from_slice(&[opcode::PUSH1, offset, opcode::MSTORE, opcode::PUSH1, offset, opcode::MLOAD]);
    }
  }
  code.extend_from_slice(&[
    opcode::PUSH1,
    0x00,
    opcode::MSTORE,
    opcode::PUSH1,
    0x20,
    opcode::PUSH1,
    0x00,
    opcode::RETURN,
  ]);
  Bytes::from(code)
}

fn main() {
  let args: Vec<String> = std::env::args().collect();
  fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
    .init();

  let samples = parse_arg_usize(&args, "--samples", 3);
  let max_ops = parse_arg_usize(&args, "--max-ops", 256);
  let validate = !has_flag(&args, "--no-validate");
  let seed_opt = parse_arg_opt_u64(&args, "--seed");
  let seed = seed_opt.unwrap_or_else(rand::random::<u64>);

  println!("synthesis benchmark");
  match seed_opt {
    Some(s) => println!("  seed          : {s} (fixed)"),
    None => println!("  seed          : {seed} (random)"),
  }
  println!("  samples       : {samples}");
  println!("  max ops       : {max_ops}");
  println!("  replay        : {}", if validate { "enabled" } else { "disabled" });

  // every pushed operand occupies its own EVM_IN wire
  let capacity = LibraryCapacity {
    evm_in: 4 * max_ops.max(64),
    s_max: 32 * max_ops.max(128),
    ..LibraryCapacity::default()
  };
  let library = Arc::new(SubcircuitLibrary::standard(&capacity));
  let config = SynthesizerConfig::default();
  let mut rng = StdRng::seed_from_u64(seed);

  println!();
  println!(
    "{:>6}  {:>8}  {:>12}  {:>8}  {:>14}  {:>14}",
    "ops", "sample", "placements", "links", "synthesize µs", "replay µs"
  );
  println!("{}", "─".repeat(72));

  let mut ops = 16;
  while ops <= max_ops {
    for sample in 0..samples {
      let bytecode = random_program(ops, &mut rng);

      let start = Instant::now();
      let output = match synthesize_bytecode(bytecode, &config, library.clone()) {
        Ok(output) => output,
        Err(err) => {
          warn!(ops, sample, %err, "synthesis failed");
          println!("{ops:>6}  {sample:>8}  synthesis failed: {err}");
          continue;
        }
      };
      let synth_us = start.elapsed().as_secs_f64() * 1e6;

      let replay_us = if validate {
        let start = Instant::now();
        let replayed = validate_instances(&output, &ReferenceEvaluator)
          .and_then(|variables| validate_permutation(&output, &variables));
        if let Err(err) = replayed {
          println!("{ops:>6}  {sample:>8}  replay failed: {err}");
          continue;
        }
        start.elapsed().as_secs_f64() * 1e6
      } else {
        0.0
      };

      info!(ops, sample, placements = output.placements.len(), "sample finished");
      println!(
        "{:>6}  {:>8}  {:>12}  {:>8}  {:>14.2}  {:>14.2}",
        ops,
        sample,
        output.placements.len(),
        output.permutation.len(),
        synth_us,
        replay_us
      );
    }
    ops *= 2;
  }
}
