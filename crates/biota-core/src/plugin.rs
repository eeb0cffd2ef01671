//! Narrow contracts for external collaborators.
//!
//! Implementations live outside the core; the engine only sees these seams.
//! Every strategy must be deterministic given its own serialized state and
//! the random sub-stream it is handed — a strategy that reaches for any
//! other source of randomness breaks replay.

use bytes::Bytes;

use crate::environment::Environment;
use crate::organism::Organism;
use crate::rng::DeterministicRng;

/// Thermodynamic/energy strategy, invoked after each commit phase.
///
/// May inject or absorb energy, emit entropy cells into the environment, and
/// mark organisms dead. Its state is serialized into every snapshot via
/// [`crate::codec::PluginState`].
pub trait EnergyStrategy: Send {
    /// Stable identifier used to pair serialized state with the strategy.
    fn plugin_id(&self) -> &'static str;

    /// Applies tick-wide effects. `organisms` holds every live organism in
    /// ascending id order.
    fn after_commit(
        &mut self,
        env: &mut Environment,
        organisms: &mut [&mut Organism],
        rng: &mut DeterministicRng,
    );

    /// Serializes the strategy's state for snapshot capture.
    fn state_bytes(&self) -> Bytes {
        Bytes::new()
    }
}

/// Mutation strategy, invoked on organism reproduction.
///
/// Transforms a source code region into a (possibly modified) destination
/// region. The destination buffer arrives empty.
pub trait MutationStrategy: Send {
    /// Copies `source` into `destination`, possibly mutating words.
    fn mutate(&mut self, source: &[u32], destination: &mut Vec<u32>, rng: &mut DeterministicRng);
}

/// A mutation strategy that copies the region unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityMutation;

impl MutationStrategy for IdentityMutation {
    fn mutate(&mut self, source: &[u32], destination: &mut Vec<u32>, _rng: &mut DeterministicRng) {
        destination.extend_from_slice(source);
    }
}

/// Label-matching strategy: resolves a 20-bit label value to a grid cell.
///
/// Alternative implementations may be substituted provided the scoring
/// contract of [`crate::label_index::LabelIndex::find_target`] is preserved.
pub trait LabelStrategy: Send + Sync {
    /// Resolves `search_value` for code owned by `code_owner`, or `None`.
    fn find_target(
        &self,
        env: &Environment,
        search_value: u32,
        code_owner: u32,
        caller: &[i32],
        rng: &mut DeterministicRng,
    ) -> Option<usize>;
}

/// The default strategy: delegate to the environment's incremental index.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexedLabelStrategy;

impl LabelStrategy for IndexedLabelStrategy {
    fn find_target(
        &self,
        env: &Environment,
        search_value: u32,
        code_owner: u32,
        caller: &[i32],
        rng: &mut DeterministicRng,
    ) -> Option<usize> {
        env.find_label_target(search_value, code_owner, caller, Some(rng))
    }
}
