//! Interval-driven chunk encoder.
//!
//! Every tick is captured as one of three sample kinds: a full SNAPSHOT at
//! the start of each chunk, an ACCUMULATED delta (changes since the
//! snapshot) every `accumulated_delta_interval` samples, and an INCREMENTAL
//! delta (changes since the previous sample) otherwise. A chunk seals after
//! `accumulated_delta_interval * snapshot_interval * chunk_interval`
//! samples, or earlier on [`DeltaEncoder::flush`] at shutdown.
//!
//! The encoder owns resetting the environment's change tracking, and reuses
//! its accumulation bitmap and buffers across ticks.

use bytes::Bytes;

use crate::codec::chunk::{
    CellColumns, Chunk, DeltaType, OrganismState, PluginState, TickData, TickDelta,
};
use crate::config::EncoderConfig;
use crate::environment::{ChangeBitmap, Environment};

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Stateful per-simulation chunk encoder.
#[derive(Debug)]
pub struct DeltaEncoder {
    run_id: String,
    cfg: EncoderConfig,
    accumulated: ChangeBitmap,
    samples_in_chunk: u64,
    snapshot: Option<TickData>,
    deltas: Vec<TickDelta>,
}

impl DeltaEncoder {
    /// Creates an encoder for a grid of `volume` cells.
    #[must_use]
    pub fn new(run_id: impl Into<String>, cfg: EncoderConfig, volume: usize) -> Self {
        Self {
            run_id: run_id.into(),
            cfg,
            accumulated: ChangeBitmap::new(volume),
            samples_in_chunk: 0,
            snapshot: None,
            deltas: Vec::new(),
        }
    }

    /// The run id stamped into every sample.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Captures the post-commit state of `tick` and returns a chunk when one
    /// seals. Resets the environment's change tracking.
    pub fn capture_tick(
        &mut self,
        tick: u64,
        env: &mut Environment,
        organisms: Vec<OrganismState>,
        total_organisms_created: u64,
        rng_state: Bytes,
        plugin_states: Vec<PluginState>,
    ) -> Option<Chunk> {
        self.accumulated.union_with(env.changed_indices());

        if self.samples_in_chunk == 0 {
            let mut columns = CellColumns::default();
            env.for_each_occupied_index(|flat, word, owner| {
                columns.push(flat as u64, word, owner);
            });
            self.snapshot = Some(TickData {
                simulation_run_id: self.run_id.clone(),
                tick_number: tick,
                capture_time_ms: now_ms(),
                cell_columns: columns,
                organisms,
                total_organisms_created,
                rng_state,
                plugin_states,
            });
            self.accumulated.clear();
        } else {
            let (delta_type, columns) =
                if self.samples_in_chunk % self.cfg.accumulated_delta_interval == 0 {
                    (
                        DeltaType::Accumulated,
                        self.extract_columns(env, Source::Accumulated),
                    )
                } else {
                    (
                        DeltaType::Incremental,
                        self.extract_columns(env, Source::Changed),
                    )
                };
            self.deltas.push(TickDelta {
                simulation_run_id: self.run_id.clone(),
                tick_number: tick,
                capture_time_ms: now_ms(),
                delta_type,
                cell_columns: columns,
                organisms,
                total_organisms_created,
                rng_state: Bytes::new(),
                plugin_states: Vec::new(),
            });
        }

        env.reset_change_tracking();
        self.samples_in_chunk += 1;
        if self.samples_in_chunk == self.cfg.samples_per_chunk() {
            self.seal()
        } else {
            None
        }
    }

    /// Seals and returns a buffered partial chunk, if any. Called by the
    /// driver on shutdown; partial chunks are valid (their snapshot is
    /// present).
    pub fn flush(&mut self) -> Option<Chunk> {
        self.seal()
    }

    fn seal(&mut self) -> Option<Chunk> {
        let snapshot = self.snapshot.take()?;
        let first_tick = snapshot.tick_number;
        let deltas = std::mem::take(&mut self.deltas);
        let last_tick = deltas.last().map_or(first_tick, |d| d.tick_number);
        self.samples_in_chunk = 0;
        self.accumulated.clear();
        Some(Chunk {
            simulation_run_id: self.run_id.clone(),
            first_tick,
            last_tick,
            tick_count: deltas.len() as u32 + 1,
            snapshot,
            deltas,
        })
    }

    fn extract_columns(&self, env: &Environment, source: Source) -> CellColumns {
        let bitmap = match source {
            Source::Accumulated => &self.accumulated,
            Source::Changed => env.changed_indices(),
        };
        let mut columns = CellColumns::default();
        for flat in bitmap.iter_ones() {
            columns.push(flat as u64, env.molecule_word(flat), env.owner_id_at(flat));
        }
        columns
    }
}

enum Source {
    Accumulated,
    Changed,
}
