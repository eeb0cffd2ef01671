#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Delta-codec round trips: encoder cadence, decoder reconstruction,
//! shortcut replay, corruption handling, and the CBOR wire format.

mod common;

use biota_core::codec::{Chunk, ChunkCorrupted, DeltaDecoder, DeltaType};
use biota_core::{
    EncoderConfig, EnergyStrategy, Environment, Molecule, MoleculeType, Organism, Simulation,
    SimulationBuilder, SimulationConfig,
};
use bytes::Bytes;
use common::occupied_cells;

fn config_with_encoder(encoder: EncoderConfig) -> SimulationConfig {
    SimulationConfig {
        shape: vec![8, 8],
        encoder,
        ..SimulationConfig::default()
    }
}

/// Runs `ticks` ticks of a cell-churning workload, returning all sealed
/// chunks and the occupied-cell listing after every tick.
fn run_workload(sim: &mut Simulation, ticks: u64) -> (Vec<Chunk>, Vec<Vec<(u64, u32, u32)>>) {
    let mut chunks = Vec::new();
    let mut expected = Vec::new();
    for t in 0..ticks {
        let coord = [(t % 8) as i32, ((t / 8) % 8) as i32];
        let value = (t % 19 + 1) as u32;
        sim.env_mut()
            .set_molecule(Molecule::of(MoleculeType::Data, value), 0, &coord);
        if let Some(chunk) = sim.tick().unwrap() {
            chunks.push(chunk);
        }
        expected.push(occupied_cells(sim));
    }
    if let Some(chunk) = sim.shutdown() {
        chunks.push(chunk);
    }
    (chunks, expected)
}

fn decoded_cells(decoder: &mut DeltaDecoder, chunk: &Chunk, tick: u64) -> Vec<(u64, u32, u32)> {
    let data = decoder.decompress_tick(chunk, tick).unwrap();
    let cols = &data.cell_columns;
    (0..cols.len())
        .map(|i| (cols.flat_indices[i], cols.molecule_words[i], cols.owner_ids[i]))
        .collect()
}

/// A=5, N=4, C=2 over 100 churning ticks: every tick of every emitted
/// chunk decodes to the engine's cell state at that tick.
#[test]
fn every_chunk_tick_reconstructs_the_engine_state() {
    let mut sim = Simulation::new(config_with_encoder(EncoderConfig {
        accumulated_delta_interval: 5,
        snapshot_interval: 4,
        chunk_interval: 2,
    }))
    .unwrap();
    let (chunks, expected) = run_workload(&mut sim, 100);

    assert!(chunks.len() >= 2, "expected at least one full chunk");
    let mut decoder = DeltaDecoder::new();
    for chunk in &chunks {
        chunk.validate().unwrap();
        for tick in chunk.first_tick..=chunk.last_tick {
            assert_eq!(
                decoded_cells(&mut decoder, chunk, tick),
                expected[tick as usize],
                "tick {tick} of chunk starting at {}",
                chunk.first_tick
            );
        }
    }
}

/// The encoder tags samples by the configured cadence: a snapshot per
/// chunk, accumulated deltas every A samples, incrementals elsewhere.
#[test]
fn sample_kinds_follow_the_configured_cadence() {
    let mut sim = Simulation::new(config_with_encoder(EncoderConfig {
        accumulated_delta_interval: 5,
        snapshot_interval: 4,
        chunk_interval: 2,
    }))
    .unwrap();
    let (chunks, _) = run_workload(&mut sim, 40);
    let chunk = &chunks[0];

    assert_eq!(chunk.first_tick, 0);
    assert_eq!(chunk.last_tick, 39);
    assert_eq!(chunk.tick_count, 40);
    for delta in &chunk.deltas {
        let expected = if delta.tick_number % 5 == 0 {
            DeltaType::Accumulated
        } else {
            DeltaType::Incremental
        };
        assert_eq!(delta.delta_type, expected, "tick {}", delta.tick_number);
        // RNG and plugin state live only on snapshots.
        assert!(delta.rng_state.is_empty());
        assert!(delta.plugin_states.is_empty());
    }
    assert!(!chunk.snapshot.rng_state.is_empty());
}

/// Backward seek inside a chunk rebuilds via the closest accumulated delta
/// and still matches a fresh replay.
#[test]
fn backward_seek_rebuilds_through_the_accumulated_shortcut() {
    let mut sim = Simulation::new(config_with_encoder(EncoderConfig {
        accumulated_delta_interval: 5,
        snapshot_interval: 4,
        chunk_interval: 2,
    }))
    .unwrap();
    let (chunks, expected) = run_workload(&mut sim, 40);
    let chunk = &chunks[0];

    let mut decoder = DeltaDecoder::new();
    let last = chunk.last_tick;
    assert_eq!(decoded_cells(&mut decoder, chunk, last), expected[last as usize]);
    // Backward jump: forced rebuild from snapshot + accumulated base.
    assert_eq!(
        decoded_cells(&mut decoder, chunk, last - 1),
        expected[(last - 1) as usize]
    );
}

/// Decoding the same tick twice returns identical data; the cursor advance
/// is invisible.
#[test]
fn decompress_tick_is_idempotent() {
    let mut sim = Simulation::new(config_with_encoder(EncoderConfig::default())).unwrap();
    let (chunks, _) = run_workload(&mut sim, 40);
    let chunk = &chunks[0];

    let mut decoder = DeltaDecoder::new();
    let mid = chunk.first_tick + (chunk.last_tick - chunk.first_tick) / 2;
    let first = decoder.decompress_tick(chunk, mid).unwrap();
    let second = decoder.decompress_tick(chunk, mid).unwrap();
    assert_eq!(first, second);
}

/// With A=N=C=1 every chunk is exactly one snapshot with zero deltas, and
/// the concatenated snapshots reproduce the simulation.
#[test]
fn unit_intervals_degenerate_to_snapshot_streams() {
    let mut sim = Simulation::new(config_with_encoder(EncoderConfig {
        accumulated_delta_interval: 1,
        snapshot_interval: 1,
        chunk_interval: 1,
    }))
    .unwrap();
    let (chunks, expected) = run_workload(&mut sim, 10);

    assert_eq!(chunks.len(), 10);
    for (tick, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.tick_count, 1);
        assert!(chunk.deltas.is_empty());
        assert_eq!(chunk.first_tick, tick as u64);
        let cols = &chunk.snapshot.cell_columns;
        let cells: Vec<(u64, u32, u32)> = (0..cols.len())
            .map(|i| (cols.flat_indices[i], cols.molecule_words[i], cols.owner_ids[i]))
            .collect();
        assert_eq!(cells, expected[tick]);
    }
}

/// Chunks survive the CBOR wire format bit-exactly.
#[test]
fn chunks_round_trip_through_cbor() {
    let mut sim = Simulation::new(config_with_encoder(EncoderConfig::default())).unwrap();
    let (chunks, _) = run_workload(&mut sim, 40);
    let chunk = &chunks[0];

    let bytes = chunk.to_cbor().unwrap();
    let decoded = Chunk::from_cbor(&bytes).unwrap();
    assert_eq!(&decoded, chunk);
}

/// Structural mismatches surface as `ChunkCorrupted`; the decoder stays
/// usable for the next (valid) chunk.
#[test]
fn corrupted_chunks_are_reported_and_skippable() {
    let mut sim = Simulation::new(config_with_encoder(EncoderConfig::default())).unwrap();
    let (chunks, expected) = run_workload(&mut sim, 40);
    let chunk = &chunks[0];
    let mut decoder = DeltaDecoder::new();

    let mut bad_count = chunk.clone();
    bad_count.tick_count += 1;
    assert!(matches!(
        decoder.decompress_tick(&bad_count, bad_count.first_tick),
        Err(ChunkCorrupted::TickCountMismatch { .. })
    ));

    let mut bad_order = chunk.clone();
    bad_order.deltas.swap(0, 1);
    assert!(matches!(
        decoder.decompress_tick(&bad_order, bad_order.first_tick),
        Err(ChunkCorrupted::UnorderedDeltas { .. })
    ));

    assert!(matches!(
        decoder.decompress_tick(chunk, chunk.last_tick + 1),
        Err(ChunkCorrupted::TickOutOfRange { .. })
    ));

    // The decoder recovers: a valid request still reconstructs.
    let tick = chunk.last_tick;
    assert_eq!(decoded_cells(&mut decoder, chunk, tick), expected[tick as usize]);
}

/// Energy-strategy state rides along on snapshots under its plugin id.
#[test]
fn plugin_state_is_captured_on_snapshots() {
    #[derive(Debug)]
    struct Decay;

    impl EnergyStrategy for Decay {
        fn plugin_id(&self) -> &'static str {
            "decay-v1"
        }

        fn after_commit(
            &mut self,
            _env: &mut Environment,
            organisms: &mut [&mut Organism],
            _rng: &mut biota_core::DeterministicRng,
        ) {
            for org in organisms.iter_mut() {
                org.debit_energy(1);
            }
        }

        fn state_bytes(&self) -> Bytes {
            Bytes::from_static(b"decay")
        }
    }

    let mut sim = SimulationBuilder::new(config_with_encoder(EncoderConfig {
        accumulated_delta_interval: 1,
        snapshot_interval: 1,
        chunk_interval: 1,
    }))
    .energy_strategy(Box::new(Decay))
    .build()
    .unwrap();
    let org = sim.spawn_organism(&[0, 0], 100);

    let chunk = sim.tick().unwrap().expect("unit intervals seal every tick");
    assert_eq!(chunk.snapshot.plugin_states.len(), 1);
    assert_eq!(chunk.snapshot.plugin_states[0].plugin_id, "decay-v1");
    assert_eq!(chunk.snapshot.plugin_states[0].state.as_ref(), b"decay");
    // NOP cost plus the strategy's decay.
    assert_eq!(sim.organism(org).unwrap().energy(), 98);
}
