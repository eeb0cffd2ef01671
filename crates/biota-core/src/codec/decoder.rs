//! Stateful chunk decoder with shortcut replay.
//!
//! The decoder keeps a dense cell buffer and a cursor `(chunk, tick)`. A
//! request inside the same chunk at or ahead of the cursor advances
//! incrementally; anything else rebuilds from the snapshot. In both cases
//! the closest ACCUMULATED delta at or before the target is used as a
//! shortcut base, skipping the incremental deltas it covers.
//!
//! The decoder is single-threaded; concurrent readers use distinct
//! decoders. Buffers are reused across calls, so a long-lived decoder does
//! not reallocate per tick.

use crate::codec::chunk::{CellColumns, Chunk, ChunkCorrupted, DeltaType, TickData};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Cursor {
    run_id: String,
    first_tick: u64,
    tick: u64,
}

/// Stateful decoder reconstructing any tick of a chunk.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    words: Vec<u32>,
    owners: Vec<u32>,
    cursor: Option<Cursor>,
    warned_corruption: bool,
}

impl DeltaDecoder {
    /// Creates a decoder with empty buffers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconstructs the full state of `target_tick` from `chunk`.
    ///
    /// Cell contents come from the decoder's reconstructed buffer; organism
    /// and metadata fields come from the sample recorded at the target tick.
    /// Calling this twice with the same arguments returns identical data;
    /// the internal cursor advance is invisible.
    ///
    /// On any structural mismatch the chunk is reported corrupted; the
    /// caller must log and skip it, never abort. The first corruption seen
    /// by this decoder is additionally logged at warning level.
    pub fn decompress_tick(
        &mut self,
        chunk: &Chunk,
        target_tick: u64,
    ) -> Result<TickData, ChunkCorrupted> {
        if let Err(e) = chunk.validate() {
            self.note_corruption(chunk);
            self.cursor = None;
            return Err(e);
        }

        if target_tick == chunk.snapshot.tick_number {
            self.reset();
            self.apply_columns(&chunk.snapshot.cell_columns);
            self.cursor = Some(self.cursor_at(chunk, target_tick));
            return Ok(chunk.snapshot.clone());
        }

        if target_tick < chunk.first_tick || target_tick > chunk.last_tick {
            self.note_corruption(chunk);
            return Err(ChunkCorrupted::TickOutOfRange {
                tick: target_tick,
                first: chunk.first_tick,
                last: chunk.last_tick,
            });
        }

        let forward = self.cursor.as_ref().is_some_and(|c| {
            c.run_id == chunk.simulation_run_id
                && c.first_tick == chunk.first_tick
                && c.tick <= target_tick
        });
        let from = if forward {
            self.cursor.as_ref().map_or(chunk.first_tick, |c| c.tick)
        } else {
            self.reset();
            self.apply_columns(&chunk.snapshot.cell_columns);
            chunk.first_tick
        };

        // Shortcut: the closest accumulated delta in (from, target] subsumes
        // every earlier delta since the snapshot.
        let base_tick = chunk
            .deltas
            .iter()
            .filter(|d| {
                d.delta_type == DeltaType::Accumulated
                    && d.tick_number > from
                    && d.tick_number <= target_tick
            })
            .next_back()
            .map(|base| {
                self.apply_columns(&base.cell_columns);
                base.tick_number
            })
            .unwrap_or(from);

        for delta in &chunk.deltas {
            if delta.tick_number <= base_tick {
                continue;
            }
            if delta.tick_number > target_tick {
                break;
            }
            self.apply_columns(&delta.cell_columns);
        }

        let Some(record) = chunk
            .deltas
            .iter()
            .find(|d| d.tick_number == target_tick)
        else {
            self.note_corruption(chunk);
            self.cursor = None;
            return Err(ChunkCorrupted::MissingTick { tick: target_tick });
        };
        self.cursor = Some(self.cursor_at(chunk, target_tick));

        Ok(TickData {
            simulation_run_id: chunk.simulation_run_id.clone(),
            tick_number: target_tick,
            capture_time_ms: record.capture_time_ms,
            cell_columns: self.occupied_columns(),
            organisms: record.organisms.clone(),
            total_organisms_created: record.total_organisms_created,
            rng_state: record.rng_state.clone(),
            plugin_states: record.plugin_states.clone(),
        })
    }

    fn cursor_at(&self, chunk: &Chunk, tick: u64) -> Cursor {
        Cursor {
            run_id: chunk.simulation_run_id.clone(),
            first_tick: chunk.first_tick,
            tick,
        }
    }

    fn reset(&mut self) {
        self.words.fill(0);
        self.owners.fill(0);
    }

    fn apply_columns(&mut self, columns: &CellColumns) {
        let cells = columns
            .flat_indices
            .iter()
            .zip(&columns.molecule_words)
            .zip(&columns.owner_ids);
        for ((&flat, &word), &owner) in cells {
            let flat = flat as usize;
            if flat >= self.words.len() {
                self.words.resize(flat + 1, 0);
                self.owners.resize(flat + 1, 0);
            }
            self.words[flat] = word;
            self.owners[flat] = owner;
        }
    }

    fn occupied_columns(&self) -> CellColumns {
        let mut columns = CellColumns::default();
        for (flat, (&word, &owner)) in self.words.iter().zip(&self.owners).enumerate() {
            if word != 0 || owner != 0 {
                columns.push(flat as u64, word, owner);
            }
        }
        columns
    }

    fn note_corruption(&mut self, chunk: &Chunk) {
        if !self.warned_corruption {
            self.warned_corruption = true;
            tracing::warn!(
                run_id = %chunk.simulation_run_id,
                first_tick = chunk.first_tick,
                "skipping corrupted chunk"
            );
        }
    }
}
