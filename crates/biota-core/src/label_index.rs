//! Fuzzy jump-target resolution over LABEL cells.
//!
//! Jump and call instructions carry a 20-bit label value. The index resolves
//! such a value to a grid cell holding an approximately matching LABEL,
//! tolerant to mutation up to a configured Hamming distance.
//!
//! The index stores entries only under their exact value and expands the
//! query instead: candidate values are probed in stages of increasing
//! Hamming distance (1, then 20, then 190 masks at tolerance 2), and a stage
//! `k` is skipped entirely once the best score so far cannot be beaten by any
//! stage-`k` candidate (`best <= k * hamming_weight`).
//!
//! Consistency contract: the grid owns this index and funnels every cell
//! mutation through it, so at any observation point exactly one entry exists
//! per LABEL cell and none for any other cell.

use rustc_hash::FxHashMap;

use crate::config::LabelMatchingConfig;
use crate::geometry::Shape;
use crate::molecule::{VALUE_BITS, VALUE_MASK};
use crate::rng::DeterministicRng;

/// Weight numerator for spread-based stochastic selection.
const SPREAD_SCALE: u64 = 10_000;

#[derive(Debug, Clone)]
struct LabelEntry {
    flat: usize,
    owner: u32,
    marker: u8,
    coord: Vec<i32>,
}

/// Incrementally maintained index of every LABEL cell in the grid.
#[derive(Debug)]
pub struct LabelIndex {
    cfg: LabelMatchingConfig,
    buckets: FxHashMap<u32, Vec<LabelEntry>>,
    len: usize,
}

impl LabelIndex {
    /// Creates an empty index with the given matching configuration.
    #[must_use]
    pub fn new(cfg: LabelMatchingConfig) -> Self {
        Self {
            cfg,
            buckets: FxHashMap::default(),
            len: 0,
        }
    }

    /// Number of indexed labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// `true` when no labels are indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `true` when `flat` is indexed under `value`. Test hook.
    #[must_use]
    pub fn contains(&self, flat: usize, value: u32) -> bool {
        self.buckets
            .get(&(value & VALUE_MASK))
            .is_some_and(|b| b.iter().any(|e| e.flat == flat))
    }

    pub(crate) fn add_label(
        &mut self,
        flat: usize,
        value: u32,
        owner: u32,
        marker: u8,
        coord: Vec<i32>,
    ) {
        let bucket = self.buckets.entry(value & VALUE_MASK).or_default();
        debug_assert!(
            bucket.iter().all(|e| e.flat != flat),
            "duplicate label entry at flat index {flat}"
        );
        bucket.push(LabelEntry {
            flat,
            owner,
            marker,
            coord,
        });
        self.len += 1;
    }

    pub(crate) fn remove_label(&mut self, flat: usize, value: u32) {
        let key = value & VALUE_MASK;
        let Some(bucket) = self.buckets.get_mut(&key) else {
            debug_assert!(false, "removing unindexed label at flat index {flat}");
            return;
        };
        let before = bucket.len();
        bucket.retain(|e| e.flat != flat);
        debug_assert_eq!(before, bucket.len() + 1, "label entry missing at {flat}");
        self.len -= before - bucket.len();
        if bucket.is_empty() {
            self.buckets.remove(&key);
        }
    }

    pub(crate) fn update_owner(&mut self, flat: usize, value: u32, owner: u32) {
        if let Some(e) = self.entry_mut(flat, value) {
            e.owner = owner;
        }
    }

    pub(crate) fn update_marker(&mut self, flat: usize, value: u32, marker: u8) {
        if let Some(e) = self.entry_mut(flat, value) {
            e.marker = marker;
        }
    }

    fn entry_mut(&mut self, flat: usize, value: u32) -> Option<&mut LabelEntry> {
        let found = self
            .buckets
            .get_mut(&(value & VALUE_MASK))
            .and_then(|b| b.iter_mut().find(|e| e.flat == flat));
        debug_assert!(found.is_some(), "label index desync at flat index {flat}");
        found
    }

    /// Resolves `search_value` to the flat index of the best-matching label.
    ///
    /// Own exact matches (same owner, zero marker) win outright; among them
    /// the closest by toroidal Manhattan distance is chosen, ties broken by
    /// smaller owner id and then smaller flat index. With a non-zero
    /// `selection_spread` and a provided `rng`, selection among own exact
    /// matches is a weighted reservoir sample with weight
    /// `max(1, K*S/(d+S))`, `K = 10000`.
    ///
    /// Otherwise all labels within the configured Hamming tolerance are
    /// scored as `h*hamming_weight + distance + (foreign ? penalty : 0)` and
    /// the minimum wins; `None` when no candidate exists.
    #[must_use]
    pub fn find_target(
        &self,
        shape: &Shape,
        search_value: u32,
        code_owner: u32,
        caller: &[i32],
        rng: Option<&mut DeterministicRng>,
    ) -> Option<usize> {
        let search = search_value & VALUE_MASK;

        if let Some(flat) = self.find_exact_own(shape, search, code_owner, caller, rng) {
            return Some(flat);
        }

        let h_weight = self.cfg.hamming_weight;
        let penalty = self.cfg.foreign_penalty;
        // (score, owner, flat) — lexicographic minimum is the winner.
        let mut best: Option<(u64, u32, usize)> = None;
        for h in 0..=self.cfg.tolerance {
            if let Some((score, _, _)) = best {
                if score <= u64::from(h) * h_weight {
                    break;
                }
            }
            for_each_value_at_distance(search, h, |candidate| {
                let Some(bucket) = self.buckets.get(&candidate) else {
                    return;
                };
                for e in bucket {
                    let foreign = e.owner != code_owner || e.marker != 0;
                    let d = shape.torus_distance(&e.coord, caller);
                    let score =
                        u64::from(h) * h_weight + d + if foreign { penalty } else { 0 };
                    let key = (score, e.owner, e.flat);
                    if best.is_none_or(|b| key < b) {
                        best = Some(key);
                    }
                }
            });
        }
        best.map(|(_, _, flat)| flat)
    }

    fn find_exact_own(
        &self,
        shape: &Shape,
        search: u32,
        code_owner: u32,
        caller: &[i32],
        rng: Option<&mut DeterministicRng>,
    ) -> Option<usize> {
        let bucket = self.buckets.get(&search)?;
        let mut own: Vec<&LabelEntry> = bucket
            .iter()
            .filter(|e| e.owner == code_owner && e.marker == 0)
            .collect();
        if own.is_empty() {
            return None;
        }

        let spread = self.cfg.selection_spread;
        if spread == 0 {
            return own
                .iter()
                .min_by_key(|e| (shape.torus_distance(&e.coord, caller), e.owner, e.flat))
                .map(|e| e.flat);
        }
        let Some(rng) = rng else {
            // No random source injected: fall back to deterministic choice.
            return own
                .iter()
                .min_by_key(|e| (shape.torus_distance(&e.coord, caller), e.owner, e.flat))
                .map(|e| e.flat);
        };

        // Weighted reservoir over a deterministic candidate order.
        own.sort_by_key(|e| e.flat);
        let mut chosen = None;
        let mut total = 0u64;
        for e in &own {
            let d = shape.torus_distance(&e.coord, caller);
            let w = (SPREAD_SCALE * spread / (d + spread)).max(1);
            total += w;
            if rng.next_bounded(total) < w {
                chosen = Some(e.flat);
            }
        }
        chosen
    }
}

/// Invokes `f` with every 20-bit value at exactly Hamming distance `h` from
/// `value`, for `h <= 3`.
fn for_each_value_at_distance(value: u32, h: u8, mut f: impl FnMut(u32)) {
    match h {
        0 => f(value),
        1 => {
            for a in 0..VALUE_BITS {
                f(value ^ (1 << a));
            }
        }
        2 => {
            for a in 0..VALUE_BITS {
                for b in (a + 1)..VALUE_BITS {
                    f(value ^ (1 << a) ^ (1 << b));
                }
            }
        }
        3 => {
            for a in 0..VALUE_BITS {
                for b in (a + 1)..VALUE_BITS {
                    for c in (b + 1)..VALUE_BITS {
                        f(value ^ (1 << a) ^ (1 << b) ^ (1 << c));
                    }
                }
            }
        }
        _ => debug_assert!(false, "unsupported Hamming stage {h}"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn shape_8x8() -> Shape {
        Shape::new(&[8, 8]).unwrap()
    }

    fn index_with(entries: &[(usize, u32, u32, u8)], shape: &Shape) -> LabelIndex {
        let mut idx = LabelIndex::new(LabelMatchingConfig::default());
        for &(flat, value, owner, marker) in entries {
            idx.add_label(flat, value, owner, marker, shape.coord_of(flat));
        }
        idx
    }

    #[test]
    fn self_match_is_always_found() {
        let shape = shape_8x8();
        let idx = index_with(&[(9, 0xABCDE, 1, 0)], &shape);
        let coord = shape.coord_of(9);
        assert_eq!(idx.find_target(&shape, 0xABCDE, 1, &coord, None), Some(9));
    }

    #[test]
    fn own_exact_match_beats_closer_foreign_label() {
        let shape = shape_8x8();
        // Foreign exact label at (2,2); own exact label at (7,7).
        let idx = index_with(
            &[
                (shape.flat_index(&[2, 2]), 0xABCDE, 2, 0),
                (shape.flat_index(&[7, 7]), 0xABCDE, 1, 0),
            ],
            &shape,
        );
        assert_eq!(
            idx.find_target(&shape, 0xABCDE, 1, &[0, 0], None),
            Some(shape.flat_index(&[7, 7]))
        );
    }

    #[test]
    fn fuzzy_match_within_tolerance_is_found() {
        let shape = shape_8x8();
        let flat = shape.flat_index(&[4, 4]);
        let idx = index_with(&[(flat, 0xABCDC, 1, 0)], &shape);
        // 0xABCDE vs 0xABCDC differ in one bit; within tolerance 2.
        assert_eq!(idx.find_target(&shape, 0xABCDE, 1, &[0, 0], None), Some(flat));
    }

    #[test]
    fn labels_at_tolerance_plus_one_are_not_found() {
        let shape = shape_8x8();
        // 0xABCDE ^ 0xABCD9 = 0x7: three bits, one past tolerance 2.
        let idx = index_with(&[(3, 0xABCD9, 1, 0)], &shape);
        assert_eq!(idx.find_target(&shape, 0xABCDE, 1, &[0, 0], None), None);
    }

    #[test]
    fn marker_makes_an_own_label_foreign() {
        let shape = shape_8x8();
        let near = shape.flat_index(&[1, 0]);
        let far = shape.flat_index(&[4, 4]);
        // Own label mid-transfer near the caller; clean own label far away.
        let idx = index_with(&[(near, 0xABCDE, 1, 3), (far, 0xABCDE, 1, 0)], &shape);
        assert_eq!(
            idx.find_target(&shape, 0xABCDE, 1, &[0, 0], None),
            Some(far)
        );
    }

    #[test]
    fn foreign_penalty_can_lose_to_fuzzier_own_label() {
        let shape = shape_8x8();
        let foreign = shape.flat_index(&[1, 0]);
        let own = shape.flat_index(&[2, 0]);
        // Foreign exact (score 100 + 1) vs own one-bit-off (score 50 + 2).
        let idx = index_with(&[(foreign, 0xABCDE, 2, 0), (own, 0xABCDC, 1, 0)], &shape);
        assert_eq!(
            idx.find_target(&shape, 0xABCDE, 1, &[0, 0], None),
            Some(own)
        );
    }

    #[test]
    fn removal_keeps_the_index_in_lockstep() {
        let shape = shape_8x8();
        let mut idx = index_with(&[(9, 0xABCDE, 1, 0)], &shape);
        idx.remove_label(9, 0xABCDE);
        assert!(idx.is_empty());
        assert_eq!(idx.find_target(&shape, 0xABCDE, 1, &[0, 0], None), None);
    }

    #[test]
    fn spread_selection_is_reproducible() {
        let shape = shape_8x8();
        let cfg = LabelMatchingConfig {
            selection_spread: 4,
            ..LabelMatchingConfig::default()
        };
        let mut idx = LabelIndex::new(cfg);
        idx.add_label(1, 0xABCDE, 1, 0, shape.coord_of(1));
        idx.add_label(30, 0xABCDE, 1, 0, shape.coord_of(30));
        idx.add_label(55, 0xABCDE, 1, 0, shape.coord_of(55));

        let mut rng_a = DeterministicRng::from_seed_u64(11);
        let mut rng_b = DeterministicRng::from_seed_u64(11);
        let a = idx.find_target(&shape, 0xABCDE, 1, &[0, 0], Some(&mut rng_a));
        let b = idx.find_target(&shape, 0xABCDE, 1, &[0, 0], Some(&mut rng_b));
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn mask_stage_counts_match_the_binomials() {
        let mut count = 0;
        for_each_value_at_distance(0, 2, |_| count += 1);
        assert_eq!(count, 190);
        count = 0;
        for_each_value_at_distance(0, 3, |_| count += 1);
        assert_eq!(count, 1140);
    }
}
