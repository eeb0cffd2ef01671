//! Planned instructions: operand resolution, state machine, execution context.
//!
//! An [`InstructionInstance`] is produced in the plan phase, resolved in the
//! resolve phase, and either committed, failed, or retried. Operand
//! resolution is idempotent: the first call fetches operand cells and peeks
//! the stack; later calls in the same tick return the cached list without
//! side effects. Stack operands are only *peeked* during resolution; the
//! actual pops happen in [`InstructionInstance::commit_stack_reads`] once
//! arbitration has confirmed the instruction as a winner.

use crate::environment::Environment;
use crate::opcode::{InstructionSpec, OpcodeId, OperandSource};
use crate::organism::Organism;
use crate::plugin::LabelStrategy;

/// Lifecycle of one planned instruction within a tick.
///
/// Terminal states are `Committed` and `Failed`. `LostLowerIdWon` losers are
/// discarded and replanned next tick (a retry, not a failure);
/// `LostTargetOccupied` is converted into an instruction failure at commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstructionState {
    /// Planned from the opcode cell; operands not yet resolved.
    Planned,
    /// Operands resolved (possibly into a pending failure).
    Resolved,
    /// Won arbitration (or required none) and will commit.
    Won,
    /// Lost a same-cell write conflict to a lower organism id.
    LostLowerIdWon,
    /// Write target is owned by another live organism; policy forbids it.
    LostTargetOccupied,
    /// Committed successfully.
    Committed,
    /// Failed at commit; failure cost applied, ip unchanged.
    Failed,
}

/// Expected runtime failure conditions of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Arithmetic division or modulo by zero.
    DivisionByZero,
    /// No label within the configured Hamming tolerance.
    LabelNotFound,
    /// A stack operand or commit-time pop underflowed.
    StackUnderflow,
    /// Register or location-register id outside its file.
    InvalidMemoryAccess,
    /// A vector operand outside its domain (e.g. a zero direction vector).
    OutOfDomainVector,
    /// Write target owned by another live organism.
    TargetOccupied,
    /// Not enough energy to fund the operation (fork).
    InsufficientEnergy,
}

impl FailureKind {
    /// Stable telemetry name for this failure kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DivisionByZero => "division_by_zero",
            Self::LabelNotFound => "label_not_found",
            Self::StackUnderflow => "stack_underflow",
            Self::InvalidMemoryAccess => "invalid_memory_access",
            Self::OutOfDomainVector => "out_of_domain_vector",
            Self::TargetOccupied => "target_occupied",
            Self::InsufficientEnergy => "insufficient_energy",
        }
    }
}

/// One resolved operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandValue {
    /// A register operand: the encoded id and the value read at resolve time.
    Register {
        /// Register id as encoded in the operand cell.
        id: u16,
        /// Register contents snapshotted during resolution.
        value: i64,
    },
    /// An immediate or peeked-stack scalar.
    Scalar(i64),
    /// A vector or label operand: one signed component per grid axis.
    Vector(Vec<i32>),
    /// A location-register operand; only the id is carried, the coordinate
    /// is read inside the instruction's execute step.
    LocationRegister(u16),
}

/// How the instruction wants the commit phase to move the instruction pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Advance `ip` by the instruction's encoded length along `dv`.
    Advance,
    /// The instruction set `ip` itself (jump, call, return).
    Jumped,
}

/// A fork produced during commit, applied by the engine after the phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    /// Id of the forking parent.
    pub parent: u32,
    /// Seed coordinate of the child.
    pub origin: Vec<i32>,
    /// Energy transferred to the child (already debited from the parent).
    pub energy: i64,
}

/// Mutable view handed to an instruction's execute function.
pub struct ExecCtx<'a> {
    /// The committing organism.
    pub organism: &'a mut Organism,
    /// The shared environment.
    pub env: &'a mut Environment,
    /// Resolved operands, in source order.
    pub operands: &'a [OperandValue],
    /// Label-matching strategy for jump resolution.
    pub labels: &'a dyn LabelStrategy,
    /// Encoded length of the executing instruction, in cells.
    pub encoded_length: usize,
    /// Forks requested during this commit phase.
    pub spawns: &'a mut Vec<SpawnRequest>,
}

impl ExecCtx<'_> {
    /// The operand at `idx` as a register `(id, value)` pair.
    pub fn register(&self, idx: usize) -> Result<(u16, i64), FailureKind> {
        match self.operands.get(idx) {
            Some(OperandValue::Register { id, value }) => Ok((*id, *value)),
            _ => Err(FailureKind::InvalidMemoryAccess),
        }
    }

    /// The operand at `idx` as a scalar (register value, immediate, or peek).
    pub fn scalar(&self, idx: usize) -> Result<i64, FailureKind> {
        match self.operands.get(idx) {
            Some(OperandValue::Register { value, .. }) => Ok(*value),
            Some(OperandValue::Scalar(v)) => Ok(*v),
            _ => Err(FailureKind::InvalidMemoryAccess),
        }
    }

    /// The operand at `idx` as a vector.
    pub fn vector(&self, idx: usize) -> Result<&[i32], FailureKind> {
        match self.operands.get(idx) {
            Some(OperandValue::Vector(v)) => Ok(v),
            _ => Err(FailureKind::InvalidMemoryAccess),
        }
    }

    /// The operand at `idx` as a location-register id, validated against the
    /// register file.
    pub fn location_register(&self, idx: usize) -> Result<u16, FailureKind> {
        match self.operands.get(idx) {
            Some(OperandValue::LocationRegister(id))
                if usize::from(*id) < crate::organism::LOCATION_REGISTER_COUNT =>
            {
                Ok(*id)
            }
            _ => Err(FailureKind::InvalidMemoryAccess),
        }
    }

    /// Writes back to the register operand at `idx`.
    pub fn write_register(&mut self, idx: usize, value: i64) -> Result<(), FailureKind> {
        let (id, _) = self.register(idx)?;
        if self.organism.write_register(id, value) {
            Ok(())
        } else {
            Err(FailureKind::InvalidMemoryAccess)
        }
    }

    /// Resolves a 20-bit label value to a grid coordinate via the configured
    /// label strategy.
    pub fn resolve_label(&mut self, search_value: u32) -> Result<Vec<i32>, FailureKind> {
        let caller = self.organism.ip_before_fetch().to_vec();
        let owner = self.organism.id();
        let flat = self
            .labels
            .find_target(self.env, search_value, owner, &caller, self.organism.rng_mut())
            .ok_or(FailureKind::LabelNotFound)?;
        Ok(self.env.shape().coord_of(flat))
    }
}

/// Read-only view used to compute an instruction's write target for
/// arbitration.
pub struct TargetCtx<'a> {
    /// The planning organism.
    pub organism: &'a Organism,
    /// The shared environment.
    pub env: &'a Environment,
    /// Resolved operands, in source order.
    pub operands: &'a [OperandValue],
}

/// Execute function: the instruction's semantic effect at commit.
pub type ExecuteFn = fn(&mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind>;

/// Write-target function: the flat index this instruction writes, if any.
pub type TargetFn = fn(&TargetCtx<'_>) -> Option<usize>;

/// One instruction planned for an organism in the current tick.
#[derive(Debug)]
pub struct InstructionInstance {
    /// Id of the planning organism.
    pub organism_id: u32,
    /// The structured opcode being executed.
    pub opcode: OpcodeId,
    /// Lifecycle state.
    pub state: InstructionState,
    pub(crate) spec: &'static InstructionSpec,
    encoded_length: usize,
    resolved: Option<Vec<OperandValue>>,
    stack_peeks: u32,
    pending_failure: Option<FailureKind>,
    pub(crate) write_target: Option<usize>,
}

impl InstructionInstance {
    /// Plans an instruction for `organism_id` from its table spec.
    #[must_use]
    pub fn plan(organism_id: u32, spec: &'static InstructionSpec, dims: usize) -> Self {
        Self {
            organism_id,
            opcode: spec.opcode,
            state: InstructionState::Planned,
            spec,
            encoded_length: spec.encoded_length(dims),
            resolved: None,
            stack_peeks: 0,
            pending_failure: None,
            write_target: None,
        }
    }

    /// Encoded length in cells: the opcode cell plus its operand cells.
    #[must_use]
    pub fn encoded_length(&self) -> usize {
        self.encoded_length
    }

    /// Number of stack elements peeked during resolution.
    #[must_use]
    pub fn stack_peek_count(&self) -> u32 {
        self.stack_peeks
    }

    /// Failure determined during resolution, to be charged at commit.
    #[must_use]
    pub fn pending_failure(&self) -> Option<FailureKind> {
        self.pending_failure
    }

    /// Resolves operands idempotently. The first call reads operand cells
    /// along the organism's direction vector and peeks stack operands; later
    /// calls return the cached list with no further side effects.
    ///
    /// On a stack underflow or an out-of-file register id the operand list
    /// resolves empty and the instruction is marked to fail at commit.
    pub fn resolve_operands(&mut self, organism: &Organism, env: &Environment) -> &[OperandValue] {
        if self.resolved.is_none() {
            self.do_resolve(organism, env);
            if self.state == InstructionState::Planned {
                self.state = InstructionState::Resolved;
            }
        }
        self.resolved.as_deref().unwrap_or(&[])
    }

    fn do_resolve(&mut self, organism: &Organism, env: &Environment) {
        let shape = env.shape();
        let dims = shape.dim_count();
        let mut cursor = organism.ip_before_fetch().to_vec();
        let dv = organism.dv();
        let mut values = Vec::with_capacity(self.spec.sources.len());
        let mut peek = organism.peek_data();
        let mut peeked = 0u32;

        for source in self.spec.sources {
            match source {
                OperandSource::Register => {
                    cursor = shape.target_coord(&cursor, dv);
                    let id = env.get_molecule(&cursor).value() as u16;
                    match organism.read_register(id) {
                        Some(value) => values.push(OperandValue::Register { id, value }),
                        None => {
                            self.fail_resolution(FailureKind::InvalidMemoryAccess);
                            return;
                        }
                    }
                }
                OperandSource::Immediate => {
                    cursor = shape.target_coord(&cursor, dv);
                    values.push(OperandValue::Scalar(i64::from(
                        env.get_molecule(&cursor).value_signed(),
                    )));
                }
                OperandSource::Stack => match peek.next() {
                    Some(v) => {
                        peeked += 1;
                        values.push(OperandValue::Scalar(v));
                    }
                    None => {
                        self.fail_resolution(FailureKind::StackUnderflow);
                        return;
                    }
                },
                OperandSource::Vector | OperandSource::Label => {
                    let mut components = Vec::with_capacity(dims);
                    for _ in 0..dims {
                        cursor = shape.target_coord(&cursor, dv);
                        components.push(env.get_molecule(&cursor).value_signed());
                    }
                    values.push(OperandValue::Vector(components));
                }
                OperandSource::LocationRegister => {
                    cursor = shape.target_coord(&cursor, dv);
                    values.push(OperandValue::LocationRegister(
                        env.get_molecule(&cursor).value() as u16,
                    ));
                }
            }
        }
        self.stack_peeks = peeked;
        self.resolved = Some(values);
    }

    fn fail_resolution(&mut self, kind: FailureKind) {
        self.resolved = Some(Vec::new());
        self.stack_peeks = 0;
        self.pending_failure = Some(kind);
    }

    /// Computes the write target for arbitration from the spec's target
    /// function. Instructions without one never conflict.
    pub(crate) fn compute_write_target(&mut self, organism: &Organism, env: &Environment) {
        if self.pending_failure.is_some() {
            return;
        }
        if let Some(target_fn) = self.spec.write_target {
            let ctx = TargetCtx {
                organism,
                env,
                operands: self.resolved.as_deref().unwrap_or(&[]),
            };
            self.write_target = target_fn(&ctx);
        }
    }

    /// Pops the values peeked during resolution. Called exactly once, at
    /// commit, for winning instructions without a pending failure.
    pub(crate) fn commit_stack_reads(&mut self, organism: &mut Organism) {
        debug_assert!(self.pending_failure.is_none());
        for _ in 0..self.stack_peeks {
            let popped = organism.pop_data();
            debug_assert!(popped.is_some(), "stack shrank between resolve and commit");
        }
        self.stack_peeks = 0;
    }

    /// Resolved operands; empty before resolution or after a resolution
    /// failure.
    #[must_use]
    pub fn operands(&self) -> &[OperandValue] {
        self.resolved.as_deref().unwrap_or(&[])
    }
}
