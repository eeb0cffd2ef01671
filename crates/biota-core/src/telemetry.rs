//! Tick telemetry: per-tick counters and the sink seam.

use std::sync::Arc;

use crate::instruction::FailureKind;

/// Per-tick counters of each instruction-failure kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailureCounters {
    /// Division or modulo by zero.
    pub division_by_zero: u64,
    /// Label resolution misses.
    pub label_not_found: u64,
    /// Stack underflows (resolve or commit).
    pub stack_underflow: u64,
    /// Out-of-file register or invalid grid access.
    pub invalid_memory_access: u64,
    /// Vector operands outside their domain.
    pub out_of_domain_vector: u64,
    /// Writes into cells owned by another live organism.
    pub target_occupied: u64,
    /// Under-funded forks.
    pub insufficient_energy: u64,
}

impl FailureCounters {
    /// Bumps the counter for `kind`.
    pub fn record(&mut self, kind: FailureKind) {
        match kind {
            FailureKind::DivisionByZero => self.division_by_zero += 1,
            FailureKind::LabelNotFound => self.label_not_found += 1,
            FailureKind::StackUnderflow => self.stack_underflow += 1,
            FailureKind::InvalidMemoryAccess => self.invalid_memory_access += 1,
            FailureKind::OutOfDomainVector => self.out_of_domain_vector += 1,
            FailureKind::TargetOccupied => self.target_occupied += 1,
            FailureKind::InsufficientEnergy => self.insufficient_energy += 1,
        }
    }

    /// Sum over all kinds.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.division_by_zero
            + self.label_not_found
            + self.stack_underflow
            + self.invalid_memory_access
            + self.out_of_domain_vector
            + self.target_occupied
            + self.insufficient_energy
    }
}

/// Summary of one committed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Tick number.
    pub tick: u64,
    /// Live organisms after commit.
    pub organisms_alive: u64,
    /// Organisms that died during this tick.
    pub organisms_died: u64,
    /// Instructions committed.
    pub committed: u64,
    /// Instructions that lost same-cell arbitration and will retry.
    pub conflicts_lost: u64,
    /// Instruction failures by kind.
    pub failures: FailureCounters,
    /// Total energy held by live organisms.
    pub energy_total: i64,
    /// Whether this tick sealed a chunk.
    pub chunk_sealed: bool,
}

/// Observer seam for engine telemetry. Implementations must be cheap and
/// must never panic; the engine calls them on the tick path.
pub trait TelemetrySink: Send + Sync {
    /// Called after every committed tick.
    fn on_tick(&self, summary: &TickSummary) {
        let _ = summary;
    }

    /// Called once when the engine halts on an invariant violation.
    fn on_halt(&self, tick: u64, diagnostic: &str) {
        let _ = (tick, diagnostic);
    }
}

/// A sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {}

/// Shared handle to a telemetry sink.
pub type SharedTelemetry = Arc<dyn TelemetrySink>;
