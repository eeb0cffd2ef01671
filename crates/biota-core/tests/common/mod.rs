#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]
//! Shared helpers for the integration suites.

use biota_core::{
    InstructionTable, Molecule, MoleculeType, Simulation, SimulationConfig,
};

/// An 8x8 configuration with default label matching.
pub fn config_8x8() -> SimulationConfig {
    SimulationConfig {
        shape: vec![8, 8],
        ..SimulationConfig::default()
    }
}

/// A fresh 8x8 simulation.
pub fn sim_8x8() -> Simulation {
    Simulation::new(config_8x8()).expect("valid config")
}

/// The structured opcode value behind a builtin mnemonic.
pub fn opcode_value(name: &str) -> u32 {
    InstructionTable::global()
        .spec_by_name(name)
        .unwrap_or_else(|| panic!("unknown builtin instruction {name}"))
        .opcode
        .value()
}

/// A CODE molecule carrying the opcode of a builtin mnemonic.
pub fn code(name: &str) -> Molecule {
    Molecule::of(MoleculeType::Code, opcode_value(name))
}

/// A DATA molecule carrying a (sign-wrapped) scalar.
pub fn data(value: i64) -> Molecule {
    Molecule::of(MoleculeType::Data, value as u32)
}

/// A LABEL molecule carrying a 20-bit label value.
pub fn label(value: u32) -> Molecule {
    Molecule::of(MoleculeType::Label, value)
}

/// Every occupied cell of the simulation's grid as `(flat, word, owner)`,
/// ascending by flat index.
pub fn occupied_cells(sim: &Simulation) -> Vec<(u64, u32, u32)> {
    let mut cells = Vec::new();
    sim.env()
        .for_each_occupied_index(|flat, word, owner| cells.push((flat as u64, word, owner)));
    cells
}
