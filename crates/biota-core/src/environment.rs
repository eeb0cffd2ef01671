//! The shared toroidal grid: cells, ownership, change tracking, label hooks.
//!
//! Storage is a single contiguous run of packed molecule words plus a
//! parallel run of owner ids (0 = unowned). A change bitmap records every
//! flat index mutated since the last [`Environment::reset_change_tracking`];
//! the delta codec owns resetting it.
//!
//! Every mutation funnels through one internal method that updates the grid,
//! the ownership layer, the bitmap, and the label index in that fixed order,
//! so the index is consistent with the grid before any other read can
//! observe the cell.

use crate::config::LabelMatchingConfig;
use crate::geometry::Shape;
use crate::label_index::LabelIndex;
use crate::molecule::{Molecule, MoleculeType};
use crate::rng::DeterministicRng;

/// Fixed-size bitmap over flat cell indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBitmap {
    words: Vec<u64>,
    len: usize,
}

impl ChangeBitmap {
    /// Creates an all-zero bitmap covering `len` indices.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of covered indices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Sets the bit for `idx`.
    pub fn set(&mut self, idx: usize) {
        debug_assert!(idx < self.len, "bitmap index {idx} out of range");
        self.words[idx / 64] |= 1 << (idx % 64);
    }

    /// Reads the bit for `idx`.
    #[must_use]
    pub fn test(&self, idx: usize) -> bool {
        debug_assert!(idx < self.len, "bitmap index {idx} out of range");
        self.words[idx / 64] & (1 << (idx % 64)) != 0
    }

    /// Clears every bit.
    pub fn clear(&mut self) {
        self.words.fill(0);
    }

    /// ORs `other` into `self`.
    pub fn union_with(&mut self, other: &Self) {
        debug_assert_eq!(self.len, other.len);
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= o;
        }
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterates set indices in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(wi, &word)| {
            let len = self.len;
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(wi * 64 + bit)
            })
            .filter(move |&idx| idx < len)
        })
    }
}

/// The n-dimensional toroidal environment.
#[derive(Debug)]
pub struct Environment {
    shape: Shape,
    cells: Vec<u32>,
    owners: Vec<u32>,
    changed: ChangeBitmap,
    labels: LabelIndex,
}

impl Environment {
    /// Creates an empty environment over `shape`.
    #[must_use]
    pub fn new(shape: Shape, label_cfg: LabelMatchingConfig) -> Self {
        let volume = shape.volume();
        Self {
            shape,
            cells: vec![0; volume],
            owners: vec![0; volume],
            changed: ChangeBitmap::new(volume),
            labels: LabelIndex::new(label_cfg),
        }
    }

    /// The grid's shape.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Decoded molecule at a coordinate (wrapped onto the torus).
    #[must_use]
    pub fn get_molecule(&self, coord: &[i32]) -> Molecule {
        self.get_molecule_at(self.shape.flat_index(coord))
    }

    /// Decoded molecule at a flat index.
    #[must_use]
    pub fn get_molecule_at(&self, flat: usize) -> Molecule {
        let word = self.cells[flat];
        let decoded = Molecule::decode(word);
        debug_assert!(decoded.is_some(), "corrupt cell word {word:#x} at {flat}");
        decoded.unwrap_or_default()
    }

    /// Raw packed word at a flat index.
    #[must_use]
    pub fn molecule_word(&self, flat: usize) -> u32 {
        self.cells[flat]
    }

    /// Owner id at a coordinate; 0 means unowned.
    #[must_use]
    pub fn owner_id(&self, coord: &[i32]) -> u32 {
        self.owners[self.shape.flat_index(coord)]
    }

    /// Owner id at a flat index; 0 means unowned.
    #[must_use]
    pub fn owner_id_at(&self, flat: usize) -> u32 {
        self.owners[flat]
    }

    /// Replaces the cell at `coord`, updating ownership, the change bitmap,
    /// and the label index atomically with respect to any later read.
    pub fn set_molecule(&mut self, molecule: Molecule, owner: u32, coord: &[i32]) {
        self.set_molecule_at(molecule, owner, self.shape.flat_index(coord));
    }

    /// Flat-index form of [`Environment::set_molecule`].
    pub fn set_molecule_at(&mut self, molecule: Molecule, owner: u32, flat: usize) {
        self.write_cell(flat, molecule, owner);
    }

    /// Atomically hands the cell at `coord` to `new_owner`, clearing the
    /// transfer marker.
    pub fn transfer_ownership(&mut self, coord: &[i32], new_owner: u32) {
        let flat = self.shape.flat_index(coord);
        let molecule = self.get_molecule_at(flat).with_marker(0);
        self.write_cell(flat, molecule, new_owner);
    }

    /// Releases every cell owned by `organism_id`. Cell contents are kept.
    pub fn clear_ownership_for(&mut self, organism_id: u32) {
        if organism_id == 0 {
            return;
        }
        let mine: Vec<usize> = self
            .owners
            .iter()
            .enumerate()
            .filter(|(_, &owner)| owner == organism_id)
            .map(|(flat, _)| flat)
            .collect();
        for flat in mine {
            self.owners[flat] = 0;
            self.changed.set(flat);
            let molecule = self.get_molecule_at(flat);
            if molecule.ty() == MoleculeType::Label {
                self.labels.update_owner(flat, molecule.value(), 0);
            }
        }
    }

    /// Calls `f(flat, word, owner)` for every occupied cell in ascending
    /// flat order. A cell is occupied when its word is non-empty or it has
    /// an owner.
    pub fn for_each_occupied_index(&self, mut f: impl FnMut(usize, u32, u32)) {
        for (flat, (&word, &owner)) in self.cells.iter().zip(&self.owners).enumerate() {
            if word != 0 || owner != 0 {
                f(flat, word, owner);
            }
        }
    }

    /// Cells mutated since the last reset.
    #[must_use]
    pub fn changed_indices(&self) -> &ChangeBitmap {
        &self.changed
    }

    /// Clears change tracking. Owned by the delta codec.
    pub fn reset_change_tracking(&mut self) {
        self.changed.clear();
    }

    /// Resolves a label value through the index (see [`LabelIndex`]).
    #[must_use]
    pub fn find_label_target(
        &self,
        search_value: u32,
        code_owner: u32,
        caller: &[i32],
        rng: Option<&mut DeterministicRng>,
    ) -> Option<usize> {
        self.labels
            .find_target(&self.shape, search_value, code_owner, caller, rng)
    }

    /// Number of indexed labels. Test hook.
    #[must_use]
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// `true` when `flat` is indexed as a label under `value`. Test hook.
    #[must_use]
    pub fn label_indexed(&self, flat: usize, value: u32) -> bool {
        self.labels.contains(flat, value)
    }

    /// The single mutation funnel: grid word, then ownership, then bitmap,
    /// then label index, in that order.
    fn write_cell(&mut self, flat: usize, molecule: Molecule, owner: u32) {
        let old = self.get_molecule_at(flat);
        self.cells[flat] = molecule.encode();
        self.owners[flat] = owner;
        self.changed.set(flat);

        let was_label = old.ty() == MoleculeType::Label;
        let is_label = molecule.ty() == MoleculeType::Label;
        match (was_label, is_label) {
            (false, false) => {}
            (true, false) => self.labels.remove_label(flat, old.value()),
            (false, true) => self.labels.add_label(
                flat,
                molecule.value(),
                owner,
                molecule.marker(),
                self.shape.coord_of(flat),
            ),
            (true, true) => {
                if old.value() == molecule.value() {
                    self.labels.update_owner(flat, molecule.value(), owner);
                    self.labels.update_marker(flat, molecule.value(), molecule.marker());
                } else {
                    self.labels.remove_label(flat, old.value());
                    self.labels.add_label(
                        flat,
                        molecule.value(),
                        owner,
                        molecule.marker(),
                        self.shape.coord_of(flat),
                    );
                }
            }
        }
    }
}
