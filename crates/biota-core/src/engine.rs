//! The simulation driver: four-phase tick pipeline with deterministic
//! arbitration.
//!
//! A tick runs plan → resolve → arbitrate → commit over all live organisms
//! in ascending id order, applies the energy strategy, then hands the
//! post-commit state to the delta encoder. Given identical world state,
//! seed, plugin configuration, and organism ordering, a tick is bit-exact
//! reproducible.
//!
//! Failure taxonomy (strictly separated):
//! - instruction failures are expected runtime conditions handled locally
//!   (failure energy cost, `instruction_failed` flag, ip unchanged);
//! - losing arbitration is a retry, not a failure;
//! - [`EngineError`]s are programmer errors: the simulation halts with a
//!   diagnostic naming the last committed tick.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{error, trace};

use crate::codec::{Chunk, DeltaEncoder, OrganismState, PluginState};
use crate::config::{ConfigError, SimulationConfig};
use crate::environment::Environment;
use crate::geometry::Shape;
use crate::instruction::{
    ExecCtx, ExecOutcome, FailureKind, InstructionInstance, InstructionState, SpawnRequest,
};
use crate::molecule::{Molecule, MoleculeType};
use crate::opcode::{InstructionTable, OpcodeId};
use crate::organism::Organism;
use crate::plugin::{EnergyStrategy, IndexedLabelStrategy, LabelStrategy, MutationStrategy};
use crate::program::ProgramArtifact;
use crate::rng::RandomProvider;
use crate::telemetry::{NullTelemetrySink, SharedTelemetry, TickSummary};

/// Unrecoverable engine invariant violations.
///
/// These halt the simulation; subsequent [`Simulation::tick`] calls keep
/// returning [`EngineError::Halted`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// An organism's ip points at an opcode id missing from the table.
    #[error("opcode {opcode:#x} not registered (organism {organism}, tick {tick})")]
    UnregisteredOpcode {
        /// The unknown structured opcode id.
        opcode: u32,
        /// Organism whose ip selected it.
        organism: u32,
        /// Tick at which planning failed.
        tick: u64,
    },
    /// The simulation already halted at the given tick.
    #[error("simulation halted at tick {tick}")]
    Halted {
        /// Tick of the original halt.
        tick: u64,
    },
    /// Internal state corruption (engine bug).
    #[error("internal invariant violated: {0}")]
    InternalCorruption(&'static str),
}

/// Fluent builder for [`Simulation`] instances.
pub struct SimulationBuilder {
    config: SimulationConfig,
    run_id: Option<String>,
    telemetry: Option<SharedTelemetry>,
    energy_strategy: Option<Box<dyn EnergyStrategy>>,
    mutation_strategy: Option<Box<dyn MutationStrategy>>,
    label_strategy: Option<Box<dyn LabelStrategy>>,
}

impl SimulationBuilder {
    /// Starts a builder from a configuration.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            run_id: None,
            telemetry: None,
            energy_strategy: None,
            mutation_strategy: None,
            label_strategy: None,
        }
    }

    /// Overrides the run id. Defaults to a seed-derived id so that a fresh
    /// run needs no clock.
    #[must_use]
    pub fn run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    /// Injects a telemetry sink.
    #[must_use]
    pub fn telemetry(mut self, sink: SharedTelemetry) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Installs an energy/thermodynamics strategy.
    #[must_use]
    pub fn energy_strategy(mut self, strategy: Box<dyn EnergyStrategy>) -> Self {
        self.energy_strategy = Some(strategy);
        self
    }

    /// Installs a mutation strategy, applied when programs are seeded for a
    /// new organism.
    #[must_use]
    pub fn mutation_strategy(mut self, strategy: Box<dyn MutationStrategy>) -> Self {
        self.mutation_strategy = Some(strategy);
        self
    }

    /// Replaces the label-matching strategy.
    #[must_use]
    pub fn label_strategy(mut self, strategy: Box<dyn LabelStrategy>) -> Self {
        self.label_strategy = Some(strategy);
        self
    }

    /// Validates the configuration and builds the simulation.
    pub fn build(self) -> Result<Simulation, ConfigError> {
        self.config.validate()?;
        let shape = Shape::new(&self.config.shape)?;
        let volume = shape.volume();
        let env = Environment::new(shape, self.config.label_matching.clone());
        let run_id = self
            .run_id
            .unwrap_or_else(|| format!("run-{:016x}", self.config.engine.seed));
        let encoder = DeltaEncoder::new(run_id.clone(), self.config.encoder.clone(), volume);
        let rng = RandomProvider::new(self.config.engine.seed);
        Ok(Simulation {
            config: self.config,
            env,
            organisms: BTreeMap::new(),
            total_created: 0,
            tick: 0,
            rng,
            table: InstructionTable::global(),
            energy_strategy: self.energy_strategy,
            mutation_strategy: self.mutation_strategy,
            label_strategy: self
                .label_strategy
                .unwrap_or_else(|| Box::new(IndexedLabelStrategy)),
            telemetry: self
                .telemetry
                .unwrap_or_else(|| Arc::new(NullTelemetrySink)),
            encoder,
            run_id,
            last_summary: TickSummary::default(),
            halted: false,
        })
    }
}

/// One simulation: environment, organisms, pipeline state, codec.
///
/// A simulation is single-threaded; run several simulations on separate
/// threads for parallelism, each with its own engine, environment, label
/// index, codec, and RNG.
pub struct Simulation {
    config: SimulationConfig,
    env: Environment,
    organisms: BTreeMap<u32, Organism>,
    total_created: u64,
    tick: u64,
    rng: RandomProvider,
    table: &'static InstructionTable,
    energy_strategy: Option<Box<dyn EnergyStrategy>>,
    mutation_strategy: Option<Box<dyn MutationStrategy>>,
    label_strategy: Box<dyn LabelStrategy>,
    telemetry: SharedTelemetry,
    encoder: DeltaEncoder,
    run_id: String,
    last_summary: TickSummary,
    halted: bool,
}

impl Simulation {
    /// Builds a simulation with default collaborators.
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        SimulationBuilder::new(config).build()
    }

    /// The run id stamped into chunks.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The next tick to execute.
    #[must_use]
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// The shared environment.
    #[must_use]
    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Mutable environment access, for seeding and tooling.
    pub fn env_mut(&mut self) -> &mut Environment {
        &mut self.env
    }

    /// Looks up an organism by id.
    #[must_use]
    pub fn organism(&self, id: u32) -> Option<&Organism> {
        self.organisms.get(&id)
    }

    /// Mutable organism access, for seeding and tooling.
    pub fn organism_mut(&mut self, id: u32) -> Option<&mut Organism> {
        self.organisms.get_mut(&id)
    }

    /// All organisms in ascending id order.
    pub fn organisms(&self) -> impl Iterator<Item = &Organism> {
        self.organisms.values()
    }

    /// Total organisms ever created.
    #[must_use]
    pub fn total_organisms_created(&self) -> u64 {
        self.total_created
    }

    /// Summary of the most recently committed tick.
    #[must_use]
    pub fn last_summary(&self) -> &TickSummary {
        &self.last_summary
    }

    /// Spawns a bare organism at `origin` with the given energy.
    pub fn spawn_organism(&mut self, origin: &[i32], energy: i64) -> u32 {
        self.total_created += 1;
        let id = self.total_created as u32;
        let origin = self.env.shape().wrap(origin);
        let rng = self.rng.derive_for("organism", u64::from(id));
        self.organisms.insert(id, Organism::new(id, origin, energy, rng));
        id
    }

    /// Seeds a program artifact at `origin` and spawns its owning organism.
    ///
    /// When a mutation strategy is installed, the placed molecule words run
    /// through it with a sub-stream derived for the new organism, modelling
    /// mutation-on-reproduction. The artifact itself is never retained: the
    /// simulation runs artifact-free afterwards.
    pub fn spawn_program(
        &mut self,
        artifact: &ProgramArtifact,
        origin: &[i32],
        energy: i64,
    ) -> u32 {
        let id = self.spawn_organism(origin, energy);
        let origin = self.env.shape().wrap(origin);

        let source: Vec<u32> = artifact
            .placements()
            .iter()
            .map(|p| p.molecule.encode())
            .collect();
        let words = match self.mutation_strategy.as_mut() {
            Some(strategy) => {
                let mut rng = self.rng.derive_for("mutation", u64::from(id));
                let mut out = Vec::with_capacity(source.len());
                strategy.mutate(&source, &mut out, &mut rng);
                out
            }
            None => source,
        };

        for (placement, word) in artifact.placements().iter().zip(words) {
            let coord = self.env.shape().target_coord(&origin, &placement.offset);
            let molecule = Molecule::decode(word).unwrap_or(placement.molecule);
            self.env.set_molecule(molecule, id, &coord);
        }
        id
    }

    /// Executes one tick. Returns a sealed chunk when the encoder completes
    /// one.
    pub fn tick(&mut self) -> Result<Option<Chunk>, EngineError> {
        if self.halted {
            return Err(EngineError::Halted { tick: self.tick });
        }
        match self.run_tick() {
            Ok(chunk) => Ok(chunk),
            Err(e) => {
                self.halted = true;
                let last_committed = self.tick.checked_sub(1);
                error!(
                    tick = self.tick,
                    last_committed,
                    error = %e,
                    "simulation halted on invariant violation"
                );
                self.telemetry.on_halt(self.tick, &e.to_string());
                Err(e)
            }
        }
    }

    /// Flushes the encoder's partial chunk. Called by the driver between
    /// ticks at shutdown; never mid-tick.
    pub fn shutdown(&mut self) -> Option<Chunk> {
        self.encoder.flush()
    }

    fn run_tick(&mut self) -> Result<Option<Chunk>, EngineError> {
        let order: Vec<u32> = self
            .organisms
            .iter()
            .filter(|(_, o)| !o.is_dead())
            .map(|(id, _)| *id)
            .collect();
        let mut summary = TickSummary {
            tick: self.tick,
            ..TickSummary::default()
        };

        // Phase 1: PLAN. No grid or organism mutation beyond the ip snapshot.
        let mut instances: Vec<InstructionInstance> = Vec::with_capacity(order.len());
        for &id in &order {
            let Some(org) = self.organisms.get_mut(&id) else {
                return Err(EngineError::InternalCorruption("organism table desync"));
            };
            org.snapshot_ip();
            org.set_instruction_failed(false);
            // Only CODE cells carry opcodes; an ip resting on data, labels,
            // or structure executes as NOP (jumps land on the label cell
            // itself, and organisms overwrite their own code freely).
            let molecule = self.env.get_molecule(org.ip());
            let opcode = if molecule.ty() == MoleculeType::Code {
                OpcodeId::from_cell_value(molecule.value())
            } else {
                OpcodeId::from_cell_value(0)
            };
            let Some(spec) = self.table.spec(opcode) else {
                return Err(EngineError::UnregisteredOpcode {
                    opcode: opcode.value(),
                    organism: id,
                    tick: self.tick,
                });
            };
            instances.push(InstructionInstance::plan(
                id,
                spec,
                self.env.shape().dim_count(),
            ));
        }

        // Phase 2: RESOLVE. Idempotent; stack operands are peeked, not popped.
        for inst in &mut instances {
            let Some(org) = self.organisms.get(&inst.organism_id) else {
                return Err(EngineError::InternalCorruption("organism table desync"));
            };
            inst.resolve_operands(org, &self.env);
            inst.compute_write_target(org, &self.env);
        }

        // Phase 3: ARBITRATE.
        self.arbitrate(&mut instances);

        // Phase 4: COMMIT, in ascending organism id order.
        let mut spawns: Vec<SpawnRequest> = Vec::new();
        let instruction_cost = self.config.engine.instruction_energy_cost;
        let failure_cost = self.config.engine.failure_energy_cost;
        for inst in &mut instances {
            match inst.state {
                InstructionState::LostLowerIdWon => {
                    // A lost conflict is a retry, not a failure: no cost, no
                    // flag, ip unchanged, stack untouched.
                    summary.conflicts_lost += 1;
                    trace!(organism = inst.organism_id, "write conflict lost, retrying");
                    continue;
                }
                InstructionState::LostTargetOccupied => {
                    Self::fail_commit(
                        &mut self.organisms,
                        &mut self.env,
                        inst,
                        FailureKind::TargetOccupied,
                        failure_cost,
                        &mut summary,
                    )?;
                    continue;
                }
                InstructionState::Won => {}
                _ => {
                    return Err(EngineError::InternalCorruption(
                        "instruction reached commit without arbitration",
                    ))
                }
            }

            if let Some(kind) = inst.pending_failure() {
                Self::fail_commit(
                    &mut self.organisms,
                    &mut self.env,
                    inst,
                    kind,
                    failure_cost,
                    &mut summary,
                )?;
                continue;
            }

            let Some(org) = self.organisms.get_mut(&inst.organism_id) else {
                return Err(EngineError::InternalCorruption("organism table desync"));
            };
            inst.commit_stack_reads(org);
            let outcome = {
                let mut ctx = ExecCtx {
                    organism: &mut *org,
                    env: &mut self.env,
                    operands: inst.operands(),
                    labels: self.label_strategy.as_ref(),
                    encoded_length: inst.encoded_length(),
                    spawns: &mut spawns,
                };
                (inst.spec.execute)(&mut ctx)
            };
            match outcome {
                Ok(ExecOutcome::Advance) => {
                    let next = self.env.shape().advance(
                        org.ip_before_fetch(),
                        org.dv(),
                        inst.encoded_length() as i32,
                    );
                    org.set_ip(next);
                    org.debit_energy(instruction_cost);
                    org.add_entropy(1);
                    inst.state = InstructionState::Committed;
                    summary.committed += 1;
                }
                Ok(ExecOutcome::Jumped) => {
                    org.debit_energy(instruction_cost);
                    org.add_entropy(1);
                    inst.state = InstructionState::Committed;
                    summary.committed += 1;
                }
                Err(kind) => {
                    org.restore_ip();
                    org.set_instruction_failed(true);
                    org.debit_energy(failure_cost);
                    summary.failures.record(kind);
                    inst.state = InstructionState::Failed;
                }
            }
            if org.energy() <= 0 && !org.is_dead() {
                org.kill();
            }
            if org.is_dead() {
                let id = org.id();
                self.env.clear_ownership_for(id);
                summary.organisms_died += 1;
            }
        }

        // Forks spawned during commit join the population for the next tick.
        for spawn in spawns {
            self.apply_spawn(&spawn);
        }

        // Thermodynamics after commit, on its own derived sub-stream.
        if self.energy_strategy.is_some() {
            let alive_before: Vec<u32> = self
                .organisms
                .iter()
                .filter(|(_, o)| !o.is_dead())
                .map(|(id, _)| *id)
                .collect();
            if let Some(strategy) = self.energy_strategy.as_mut() {
                let mut rng = self.rng.derive_for("energy", self.tick);
                let mut live: Vec<&mut Organism> = self
                    .organisms
                    .values_mut()
                    .filter(|o| !o.is_dead())
                    .collect();
                strategy.after_commit(&mut self.env, &mut live, &mut rng);
            }
            for id in alive_before {
                if self.organisms.get(&id).is_some_and(Organism::is_dead) {
                    self.env.clear_ownership_for(id);
                    summary.organisms_died += 1;
                }
            }
        }

        summary.organisms_alive =
            self.organisms.values().filter(|o| !o.is_dead()).count() as u64;
        summary.energy_total = self
            .organisms
            .values()
            .filter(|o| !o.is_dead())
            .map(Organism::energy)
            .sum();

        // Capture goes last; the codec owns resetting change tracking.
        let states = self.capture_organism_states();
        let plugin_states: Vec<PluginState> = self
            .energy_strategy
            .as_ref()
            .map(|s| {
                vec![PluginState {
                    plugin_id: s.plugin_id().to_owned(),
                    state: s.state_bytes(),
                }]
            })
            .unwrap_or_default();
        let chunk = self.encoder.capture_tick(
            self.tick,
            &mut self.env,
            states,
            self.total_created,
            self.rng.state_bytes(),
            plugin_states,
        );
        summary.chunk_sealed = chunk.is_some();
        self.telemetry.on_tick(&summary);
        self.last_summary = summary;
        self.tick += 1;
        Ok(chunk)
    }

    /// Conflict resolution over same-cell writes.
    ///
    /// Writes into cells owned by a different live organism are forbidden
    /// outright; among the remaining writers of each target, the lowest
    /// organism id wins and the rest retry next tick.
    fn arbitrate(&self, instances: &mut [InstructionInstance]) {
        for inst in instances.iter_mut() {
            if inst.pending_failure().is_some() {
                continue;
            }
            if let Some(target) = inst.write_target {
                let cell_owner = self.env.owner_id_at(target);
                let owner_live = cell_owner != 0
                    && self
                        .organisms
                        .get(&cell_owner)
                        .is_some_and(|o| !o.is_dead());
                if owner_live && cell_owner != inst.organism_id {
                    inst.state = InstructionState::LostTargetOccupied;
                }
            }
        }

        let mut winners: FxHashMap<usize, u32> = FxHashMap::default();
        for inst in instances.iter() {
            if inst.state == InstructionState::LostTargetOccupied
                || inst.pending_failure().is_some()
            {
                continue;
            }
            if let Some(target) = inst.write_target {
                let entry = winners.entry(target).or_insert(inst.organism_id);
                if inst.organism_id < *entry {
                    *entry = inst.organism_id;
                }
            }
        }

        for inst in instances.iter_mut() {
            if inst.state == InstructionState::LostTargetOccupied {
                continue;
            }
            match inst.write_target {
                None => inst.state = InstructionState::Won,
                Some(target) => {
                    if inst.pending_failure().is_some()
                        || winners.get(&target) == Some(&inst.organism_id)
                    {
                        inst.state = InstructionState::Won;
                    } else {
                        inst.state = InstructionState::LostLowerIdWon;
                    }
                }
            }
        }
    }

    fn fail_commit(
        organisms: &mut BTreeMap<u32, Organism>,
        env: &mut Environment,
        inst: &mut InstructionInstance,
        kind: FailureKind,
        failure_cost: i64,
        summary: &mut TickSummary,
    ) -> Result<(), EngineError> {
        let Some(org) = organisms.get_mut(&inst.organism_id) else {
            return Err(EngineError::InternalCorruption("organism table desync"));
        };
        org.restore_ip();
        org.set_instruction_failed(true);
        org.debit_energy(failure_cost);
        summary.failures.record(kind);
        inst.state = InstructionState::Failed;
        if org.energy() <= 0 && !org.is_dead() {
            org.kill();
        }
        if org.is_dead() {
            let id = org.id();
            env.clear_ownership_for(id);
            summary.organisms_died += 1;
        }
        Ok(())
    }

    fn apply_spawn(&mut self, spawn: &SpawnRequest) {
        self.total_created += 1;
        let id = self.total_created as u32;
        let rng = self.rng.derive_for("organism", u64::from(id));
        let mut child = Organism::new(id, spawn.origin.clone(), spawn.energy, rng);
        if let Some(parent) = self.organisms.get(&spawn.parent) {
            child.set_dv(parent.dv().to_vec());
        }
        self.organisms.insert(id, child);
    }

    fn capture_organism_states(&self) -> Vec<OrganismState> {
        let mut hashers: FxHashMap<u32, blake3::Hasher> = FxHashMap::default();
        self.env.for_each_occupied_index(|flat, word, owner| {
            if owner != 0 {
                let hasher = hashers.entry(owner).or_insert_with(|| {
                    let mut h = blake3::Hasher::new();
                    h.update(b"genome:");
                    h
                });
                hasher.update(&(flat as u64).to_le_bytes());
                hasher.update(&word.to_le_bytes());
            }
        });
        self.organisms
            .values()
            .map(|org| {
                let genome_hash = hashers
                    .get(&org.id())
                    .map_or([0u8; 32], |h| h.finalize().into());
                OrganismState::capture(org, genome_hash)
            })
            .collect()
    }
}
