#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Bit-exact reproducibility: identical seeds and seeds-of-work produce
//! identical worlds, organism state, and chunk contents.

mod common;

use biota_core::{Simulation, SimulationConfig};
use common::{code, data, label, occupied_cells};

fn seeded_sim(seed: u64) -> Simulation {
    let config = SimulationConfig {
        shape: vec![16, 16],
        engine: biota_core::EngineConfig {
            seed,
            ..biota_core::EngineConfig::default()
        },
        ..SimulationConfig::default()
    };
    let mut sim = Simulation::new(config).unwrap();
    let org = sim.spawn_organism(&[0, 0], 10_000);

    // SETI DR0, 7
    sim.env_mut().set_molecule(code("SETI"), org, &[0, 0]);
    sim.env_mut().set_molecule(data(0), org, &[1, 0]);
    sim.env_mut().set_molecule(data(7), org, &[2, 0]);
    // POKE DR0 -> dp (0,0) + (2,2)
    sim.env_mut().set_molecule(code("POKE"), org, &[3, 0]);
    sim.env_mut().set_molecule(data(0), org, &[4, 0]);
    sim.env_mut().set_molecule(data(2), org, &[5, 0]);
    sim.env_mut().set_molecule(data(2), org, &[6, 0]);
    // JMPI to the label at (9,9)
    sim.env_mut().set_molecule(code("JMPI"), org, &[7, 0]);
    sim.env_mut().set_molecule(data(0x12345), org, &[8, 0]);
    sim.env_mut().set_molecule(label(0x12345), org, &[9, 9]);
    sim
}

fn organism_fingerprint(sim: &Simulation) -> Vec<(u32, Vec<i32>, i64, u64, Vec<i64>)> {
    sim.organisms()
        .map(|o| {
            (
                o.id(),
                o.ip().to_vec(),
                o.energy(),
                o.entropy(),
                o.data_stack().to_vec(),
            )
        })
        .collect()
}

#[test]
fn identical_seeds_replay_bit_exactly() {
    let mut a = seeded_sim(42);
    let mut b = seeded_sim(42);

    for tick in 0..30 {
        let chunk_a = a.tick().unwrap();
        let chunk_b = b.tick().unwrap();
        assert_eq!(occupied_cells(&a), occupied_cells(&b), "tick {tick}");
        assert_eq!(organism_fingerprint(&a), organism_fingerprint(&b), "tick {tick}");
        assert_eq!(chunk_a.is_some(), chunk_b.is_some(), "tick {tick}");
    }

    // Partial chunks agree on everything except wall-clock capture times.
    let flush_a = a.shutdown().unwrap();
    let flush_b = b.shutdown().unwrap();
    assert_eq!(flush_a.first_tick, flush_b.first_tick);
    assert_eq!(flush_a.tick_count, flush_b.tick_count);
    assert_eq!(flush_a.snapshot.cell_columns, flush_b.snapshot.cell_columns);
    assert_eq!(flush_a.snapshot.organisms, flush_b.snapshot.organisms);
    assert_eq!(flush_a.snapshot.rng_state, flush_b.snapshot.rng_state);
    for (da, db) in flush_a.deltas.iter().zip(&flush_b.deltas) {
        assert_eq!(da.tick_number, db.tick_number);
        assert_eq!(da.delta_type, db.delta_type);
        assert_eq!(da.cell_columns, db.cell_columns);
        assert_eq!(da.organisms, db.organisms);
    }
}

#[test]
fn different_seeds_differ_only_in_rng_state() {
    let mut a = seeded_sim(1);
    let mut b = seeded_sim(2);
    for _ in 0..5 {
        a.tick().unwrap();
        b.tick().unwrap();
    }
    // This workload is rng-free, so the worlds agree; the serialized rng
    // state must not.
    assert_eq!(occupied_cells(&a), occupied_cells(&b));
    let flush_a = a.shutdown().unwrap();
    let flush_b = b.shutdown().unwrap();
    assert_ne!(flush_a.snapshot.rng_state, flush_b.snapshot.rng_state);
}

#[test]
fn halted_simulations_stay_halted() {
    let mut sim = Simulation::new(SimulationConfig {
        shape: vec![8, 8],
        ..SimulationConfig::default()
    })
    .unwrap();
    let org = sim.spawn_organism(&[0, 0], 1_000);
    // A CODE cell with an unregistered opcode id is an engine invariant
    // violation, not an instruction failure.
    sim.env_mut().set_molecule(
        biota_core::Molecule::of(biota_core::MoleculeType::Code, 0x3FFFF),
        org,
        &[0, 0],
    );

    let first = sim.tick();
    assert!(matches!(
        first,
        Err(biota_core::EngineError::UnregisteredOpcode { .. })
    ));
    let second = sim.tick();
    assert!(matches!(second, Err(biota_core::EngineError::Halted { .. })));
}
