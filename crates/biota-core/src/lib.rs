//! biota-core: deterministic tick-driven artificial-life engine.
//!
//! Embodied agents ("organisms") execute spatial assembly programs inside a
//! shared n-dimensional toroidal grid. Each cell is both memory and physical
//! substrate: an organism's body is the set of cells it owns, and its
//! instructions manipulate neighboring cells under physics-like rules
//! (energy, entropy, ownership, conflict arbitration).
//!
//! The crate covers three tightly coupled subsystems:
//! - the execution engine: a four-phase tick pipeline
//!   (plan / resolve / arbitrate / commit) with deterministic conflict
//!   resolution over shared cells;
//! - the spatial environment: flat-packed toroidal storage with ownership,
//!   change tracking, and a mutation-tolerant fuzzy label index;
//! - the delta-compressed state pipeline: snapshot/accumulated/incremental
//!   chunk encoding and a stateful decoder with shortcut replay.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

/// Delta-compressed state pipeline (chunks, encoder, decoder).
pub mod codec;
mod config;
mod engine;
mod environment;
mod geometry;
mod instruction;
mod isa;
mod label_index;
mod molecule;
mod opcode;
mod organism;
mod plugin;
mod program;
mod rng;
mod telemetry;

// Re-exports for stable public API
/// Configuration surface and validation errors.
pub use config::{ConfigError, EncoderConfig, EngineConfig, LabelMatchingConfig, SimulationConfig};
/// Simulation driver and engine invariant errors.
pub use engine::{EngineError, Simulation, SimulationBuilder};
/// Toroidal grid, ownership layer, and change bitmap.
pub use environment::{ChangeBitmap, Environment};
/// Grid geometry: shapes, flat indexing, wrapped coordinate math.
pub use geometry::{GeometryError, Shape};
/// Instruction instances, operand values, and the per-tick state machine.
pub use instruction::{
    ExecCtx, ExecOutcome, ExecuteFn, FailureKind, InstructionInstance, InstructionState,
    OperandValue, SpawnRequest, TargetCtx, TargetFn,
};
/// Fuzzy Hamming-tolerant jump target index.
pub use label_index::LabelIndex;
/// Packed cell words.
pub use molecule::{Molecule, MoleculeType, VALUE_BITS, VALUE_MASK};
/// Structured opcodes and the process-wide instruction table.
pub use opcode::{
    Family, InstructionSpec, InstructionTable, InstructionTableBuilder, OpcodeId, OperandSource,
    TableError, Variant, F_MULT, O_MULT,
};
/// Organism state and register-file constants.
pub use organism::{
    Organism, DATA_POINTER_COUNT, FPR_BASE, LOCATION_REGISTER_COUNT, PR_BASE, REGISTER_FILE_SIZE,
};
/// Narrow plugin contracts for external collaborators.
pub use plugin::{
    EnergyStrategy, IdentityMutation, IndexedLabelStrategy, LabelStrategy, MutationStrategy,
};
/// Program artifacts and label-name hashing.
pub use program::{label_value, Placement, ProgramArtifact};
/// Deterministic hierarchical randomness.
pub use rng::{DeterministicRng, RandomProvider, RngStateError};
/// Tick telemetry counters and the sink seam.
pub use telemetry::{
    FailureCounters, NullTelemetrySink, SharedTelemetry, TelemetrySink, TickSummary,
};
