//! Circuit synthesis from EVM execution traces.
//!
//! The interpreter drives a [`synthesizer::Synthesizer`] one instruction at
//! a time. Every value on the shadow stack and in shadow memory carries the
//! circuit wire it lives on, every computed value becomes a placement of a
//! precompiled subcircuit, and finalization links the placements together
//! with a copy-constraint permutation.

pub mod arithmetic;
pub mod buffers;
pub mod config;
pub mod context;
pub mod data_pt;
pub mod error;
pub mod execute;
mod handlers;
pub mod memory;
pub mod memory_pt;
pub mod opcodes;
pub mod operations;
pub mod output;
pub mod permutation;
pub mod refactor;
pub mod stack_pt;
pub mod subcircuit;
pub mod synthesizer;
pub mod validator;

pub use config::SynthesizerConfig;
pub use error::{Result, SynthesisError};
pub use execute::{synthesize_bytecode, synthesize_transaction};
pub use output::SynthesisOutput;
pub use subcircuit::{LibraryCapacity, SubcircuitLibrary};
pub use synthesizer::Synthesizer;
