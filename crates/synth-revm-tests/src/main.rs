use std::sync::Arc;

use revm::{bytecode::opcode, primitives::Bytes};
use synth_core::subcircuit::{LibraryCapacity, SubcircuitLibrary};
use synth_core::validator::{ReferenceEvaluator, validate_instances, validate_permutation};
use synth_core::{SynthesizerConfig, synthesize_bytecode};
use tracing_subscriber::{EnvFilter, fmt};

/// Usage: `synth-revm-tests [OUT_DIR] [CONFIG_JSON]`
fn main() -> Result<(), String> {
  fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "synth_core=info".into()))
    .init();

  let mut args = std::env::args().skip(1);
  let out_dir = args.next().unwrap_or_else(|| "synth-out".to_string());
  let config = match args.next() {
    Some(path) => SynthesizerConfig::from_json_file(path).map_err(|e| e.to_string())?,
    None => SynthesizerConfig::default(),
  };

  // returns 2 * 3 + 4 as one word
  let bytecode = Bytes::from(vec![
    opcode::PUSH1,
    0x02,
    opcode::PUSH1,
    0x03,
    opcode::MUL,
    opcode::PUSH1,
    0x04,
    opcode::ADD,
    opcode::PUSH1,
    0x00,
    opcode::MSTORE,
    opcode::PUSH1,
    0x20,
    opcode::PUSH1,
    0x00,
    opcode::RETURN,
  ]);

  let library = Arc::new(SubcircuitLibrary::standard(&LibraryCapacity::default()));
  let output = synthesize_bytecode(bytecode, &config, library).map_err(|e| e.to_string())?;
  let variables = validate_instances(&output, &ReferenceEvaluator).map_err(|e| e.to_string())?;
  validate_permutation(&output, &variables).map_err(|e| e.to_string())?;
  output.write_to(&out_dir).map_err(|e| e.to_string())?;

  println!(
    "synthesized {} placements with {} copy constraints into {out_dir}",
    output.placements.len(),
    output.permutation.len()
  );
  Ok(())
}
