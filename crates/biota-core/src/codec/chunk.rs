//! Chunk wire format: snapshots, deltas, organism state.
//!
//! Field names are the stable contract; the concrete serialization is
//! deterministic CBOR (see [`Chunk::to_cbor`]). JSON is deliberately not
//! offered — map-ordering nondeterminism would break chunk identity.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::organism::Organism;

/// Parallel arrays describing a set of cells: flat index, packed molecule
/// word, owner id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellColumns {
    /// Flat indices, ascending.
    pub flat_indices: Vec<u64>,
    /// Packed molecule words, parallel to `flat_indices`.
    pub molecule_words: Vec<u32>,
    /// Owner ids, parallel to `flat_indices`.
    pub owner_ids: Vec<u32>,
}

impl CellColumns {
    /// Appends one cell.
    pub fn push(&mut self, flat: u64, word: u32, owner: u32) {
        self.flat_indices.push(flat);
        self.molecule_words.push(word);
        self.owner_ids.push(owner);
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flat_indices.len()
    }

    /// `true` when no cells are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flat_indices.is_empty()
    }

    /// `true` when the three columns have equal lengths.
    #[must_use]
    pub fn is_coherent(&self) -> bool {
        self.flat_indices.len() == self.molecule_words.len()
            && self.flat_indices.len() == self.owner_ids.len()
    }
}

/// Serialized state of one plugin at snapshot time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginState {
    /// Stable plugin identifier.
    pub plugin_id: String,
    /// Opaque serialized state.
    pub state: Bytes,
}

/// Snapshot of one organism for telemetry and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganismState {
    /// Organism id.
    pub id: u32,
    /// Ownership id (equal to the organism id).
    pub owner_id: u32,
    /// Instruction pointer.
    pub ip: Vec<i32>,
    /// Direction vector.
    pub dv: Vec<i32>,
    /// All data pointers, in order.
    pub data_pointers: Vec<Vec<i32>>,
    /// Index of the active data pointer.
    pub active_data_pointer: u32,
    /// Data registers.
    pub dr: Vec<i64>,
    /// Procedure registers.
    pub pr: Vec<i64>,
    /// Formal-parameter registers.
    pub fpr: Vec<i64>,
    /// Location registers.
    pub lr: Vec<Vec<i32>>,
    /// Data stack, bottom to top.
    pub data_stack: Vec<i64>,
    /// Call stack, bottom to top.
    pub call_stack: Vec<Vec<i32>>,
    /// Location stack, bottom to top.
    pub location_stack: Vec<Vec<i32>>,
    /// Energy register.
    pub energy: i64,
    /// Entropy counter.
    pub entropy: u64,
    /// Whether the organism is dead.
    pub is_dead: bool,
    /// BLAKE3 hash of the organism's owned cells at capture time.
    pub genome_hash: [u8; 32],
}

impl OrganismState {
    /// Captures an organism's externally visible state.
    #[must_use]
    pub fn capture(organism: &Organism, genome_hash: [u8; 32]) -> Self {
        let read_file = |base: u16, len: usize| -> Vec<i64> {
            (0..len)
                .map(|i| organism.read_register(base + i as u16).unwrap_or(0))
                .collect()
        };
        Self {
            id: organism.id(),
            owner_id: organism.id(),
            ip: organism.ip().to_vec(),
            dv: organism.dv().to_vec(),
            data_pointers: organism.data_pointers().to_vec(),
            active_data_pointer: organism.active_data_pointer_index() as u32,
            dr: read_file(0, crate::organism::REGISTER_FILE_SIZE),
            pr: read_file(crate::organism::PR_BASE, crate::organism::REGISTER_FILE_SIZE),
            fpr: read_file(crate::organism::FPR_BASE, crate::organism::REGISTER_FILE_SIZE),
            lr: (0..crate::organism::LOCATION_REGISTER_COUNT)
                .filter_map(|i| organism.location_register(i as u16).map(<[i32]>::to_vec))
                .collect(),
            data_stack: organism.data_stack().to_vec(),
            call_stack: organism.call_stack().to_vec(),
            location_stack: organism.location_stack().to_vec(),
            energy: organism.energy(),
            entropy: organism.entropy(),
            is_dead: organism.is_dead(),
            genome_hash,
        }
    }
}

/// Full state of one tick: every occupied cell plus all metadata needed to
/// resume the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickData {
    /// Simulation run this tick belongs to.
    pub simulation_run_id: String,
    /// Tick number.
    pub tick_number: u64,
    /// Wall-clock capture time in milliseconds; metadata only, never part of
    /// determinism comparisons.
    pub capture_time_ms: u64,
    /// Every occupied cell.
    pub cell_columns: CellColumns,
    /// All organisms, ascending id.
    pub organisms: Vec<OrganismState>,
    /// Total organisms ever created (monotonic id source).
    pub total_organisms_created: u64,
    /// Opaque root RNG state.
    pub rng_state: Bytes,
    /// Serialized plugin states.
    pub plugin_states: Vec<PluginState>,
}

/// Whether a delta is relative to the previous sample or to the chunk's
/// snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaType {
    /// Changes since the previous sample.
    Incremental,
    /// Changes since the chunk's snapshot.
    Accumulated,
}

/// Changed-cells-only state of one tick.
///
/// `rng_state` and `plugin_states` are empty on deltas: resume always starts
/// at a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickDelta {
    /// Simulation run this tick belongs to.
    pub simulation_run_id: String,
    /// Tick number.
    pub tick_number: u64,
    /// Wall-clock capture time in milliseconds; metadata only.
    pub capture_time_ms: u64,
    /// Relative-to-what tag.
    pub delta_type: DeltaType,
    /// Only the changed cells.
    pub cell_columns: CellColumns,
    /// All organisms, ascending id.
    pub organisms: Vec<OrganismState>,
    /// Total organisms ever created.
    pub total_organisms_created: u64,
    /// Always empty on deltas.
    pub rng_state: Bytes,
    /// Always empty on deltas.
    pub plugin_states: Vec<PluginState>,
}

/// Recoverable structural error found while validating or replaying a chunk.
///
/// Callers must log and skip the offending chunk, never abort the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkCorrupted {
    /// `tick_count` disagrees with the delta list.
    #[error("tick count {actual} but chunk holds {expected} samples")]
    TickCountMismatch {
        /// `1 + deltas.len()`.
        expected: u32,
        /// The chunk's recorded `tick_count`.
        actual: u32,
    },
    /// The snapshot's tick is not the chunk's first tick.
    #[error("snapshot tick {snapshot_tick} differs from first tick {first_tick}")]
    SnapshotTickMismatch {
        /// The chunk's recorded first tick.
        first_tick: u64,
        /// The snapshot's tick number.
        snapshot_tick: u64,
    },
    /// Deltas are not strictly ordered by tick number.
    #[error("delta at tick {tick} out of order")]
    UnorderedDeltas {
        /// Tick of the out-of-order delta.
        tick: u64,
    },
    /// `last_tick` disagrees with the final sample.
    #[error("last tick {actual} but final sample is at {expected}")]
    LastTickMismatch {
        /// Tick of the final sample.
        expected: u64,
        /// The chunk's recorded `last_tick`.
        actual: u64,
    },
    /// The requested tick lies outside the chunk's range.
    #[error("tick {tick} outside chunk range [{first}, {last}]")]
    TickOutOfRange {
        /// Requested tick.
        tick: u64,
        /// Chunk's first tick.
        first: u64,
        /// Chunk's last tick.
        last: u64,
    },
    /// A tick inside the chunk's range has no sample.
    #[error("no sample recorded for tick {tick}")]
    MissingTick {
        /// The absent tick.
        tick: u64,
    },
    /// A cell-column triple has mismatched lengths.
    #[error("cell columns have mismatched lengths at tick {tick}")]
    IncoherentColumns {
        /// Tick of the offending sample.
        tick: u64,
    },
}

/// Errors raised while (de)serializing chunks.
#[derive(Debug, Error)]
pub enum ChunkCodecError {
    /// CBOR encoding failed.
    #[error("chunk encode failed: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// CBOR decoding failed.
    #[error("chunk decode failed: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// An immutable unit of persisted simulation state: one snapshot plus an
/// ordered run of deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Simulation run this chunk belongs to.
    pub simulation_run_id: String,
    /// First tick covered (the snapshot's tick).
    pub first_tick: u64,
    /// Last tick covered.
    pub last_tick: u64,
    /// Number of samples: `1 + deltas.len()`.
    pub tick_count: u32,
    /// The chunk's one full snapshot.
    pub snapshot: TickData,
    /// Deltas, strictly ordered by tick number.
    pub deltas: Vec<TickDelta>,
}

impl Chunk {
    /// Checks the chunk's structural invariants.
    pub fn validate(&self) -> Result<(), ChunkCorrupted> {
        let expected = self.deltas.len() as u32 + 1;
        if self.tick_count != expected {
            return Err(ChunkCorrupted::TickCountMismatch {
                expected,
                actual: self.tick_count,
            });
        }
        if self.snapshot.tick_number != self.first_tick {
            return Err(ChunkCorrupted::SnapshotTickMismatch {
                first_tick: self.first_tick,
                snapshot_tick: self.snapshot.tick_number,
            });
        }
        if !self.snapshot.cell_columns.is_coherent() {
            return Err(ChunkCorrupted::IncoherentColumns {
                tick: self.snapshot.tick_number,
            });
        }
        let mut prev = self.first_tick;
        for delta in &self.deltas {
            if delta.tick_number <= prev {
                return Err(ChunkCorrupted::UnorderedDeltas {
                    tick: delta.tick_number,
                });
            }
            if !delta.cell_columns.is_coherent() {
                return Err(ChunkCorrupted::IncoherentColumns {
                    tick: delta.tick_number,
                });
            }
            prev = delta.tick_number;
        }
        if prev != self.last_tick {
            return Err(ChunkCorrupted::LastTickMismatch {
                expected: prev,
                actual: self.last_tick,
            });
        }
        Ok(())
    }

    /// Serializes the chunk as deterministic CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>, ChunkCodecError> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out)?;
        Ok(out)
    }

    /// Deserializes a chunk from CBOR bytes.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, ChunkCodecError> {
        Ok(ciborium::de::from_reader(bytes)?)
    }
}
