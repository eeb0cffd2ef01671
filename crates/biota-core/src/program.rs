//! Program artifacts: the compiler → engine seeding interface.
//!
//! The compiler emits a layout of molecules at relative coordinates plus a
//! two-way mapping between label names and their 20-bit value hashes. The
//! engine consumes the artifact once at seed time; afterwards the simulation
//! is artifact-free and organisms may overwrite their own code.

use std::collections::BTreeMap;

use blake3::Hasher;

use crate::molecule::{Molecule, MoleculeType, VALUE_MASK};

/// Hashes a label name to its 20-bit label value.
#[must_use]
pub fn label_value(name: &str) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(b"label:");
    hasher.update(name.as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & VALUE_MASK
}

/// One molecule placed at an offset relative to the program origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    /// Offset from the seed origin, one component per axis.
    pub offset: Vec<i32>,
    /// The molecule to place.
    pub molecule: Molecule,
}

/// A compiled program ready for seeding.
#[derive(Debug, Clone, Default)]
pub struct ProgramArtifact {
    placements: Vec<Placement>,
    labels: BTreeMap<String, u32>,
    label_names: BTreeMap<u32, String>,
}

impl ProgramArtifact {
    /// Creates an empty artifact.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places a molecule at `offset`.
    pub fn place(&mut self, offset: Vec<i32>, molecule: Molecule) -> &mut Self {
        self.placements.push(Placement { offset, molecule });
        self
    }

    /// Places a LABEL cell for `name` at `offset`, registering both mapping
    /// directions. Returns the label's 20-bit value.
    pub fn place_label(&mut self, offset: Vec<i32>, name: &str) -> u32 {
        let value = label_value(name);
        self.labels.insert(name.to_owned(), value);
        self.label_names.insert(value, name.to_owned());
        self.place(offset, Molecule::of(MoleculeType::Label, value));
        value
    }

    /// All placements, in insertion order.
    #[must_use]
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }

    /// The label value for `name`, if registered.
    #[must_use]
    pub fn label_value_of(&self, name: &str) -> Option<u32> {
        self.labels.get(name).copied()
    }

    /// The label name behind `value`, if registered (visualization aid).
    #[must_use]
    pub fn label_name_of(&self, value: u32) -> Option<&str> {
        self.label_names.get(&(value & VALUE_MASK)).map(String::as_str)
    }
}
