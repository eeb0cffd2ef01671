//! Structured opcode ids and the process-wide instruction table.
//!
//! Opcodes are structured integers `family * F_MULT + operation * O_MULT +
//! variant` with six bits per field. The structure is a design contract for
//! mutation locality: flipping the low bits of an opcode changes only its
//! variant, the middle bits its operation, the high bits its family.
//!
//! The table mapping opcode ids to behaviors is a closed enumeration known
//! at engine init. It is process-wide static, initialized exactly once, and
//! dispatched through plain function pointers so the tick loop never touches
//! a trait object.

use std::sync::OnceLock;

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::instruction::{ExecuteFn, TargetFn};

/// Bits allocated to the variant field.
pub const VARIANT_BITS: u32 = 6;
/// Bits allocated to the operation field.
pub const OPERATION_BITS: u32 = 6;
/// Bits allocated to the family field.
pub const FAMILY_BITS: u32 = 6;

/// Multiplier separating operations: `opcode / O_MULT % 64` is the operation.
pub const O_MULT: u32 = 1 << VARIANT_BITS;
/// Multiplier separating families: `opcode / F_MULT` is the family.
pub const F_MULT: u32 = 1 << (VARIANT_BITS + OPERATION_BITS);

const OPCODE_MASK: u32 = (1 << (VARIANT_BITS + OPERATION_BITS + FAMILY_BITS)) - 1;

/// Semantic grouping of instructions. Discriminants are the wire encoding.
///
/// `Special` is family 0 so that the empty cell (`CODE:0`) decodes to the
/// all-zero opcode, which the builtin table binds to `NOP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    /// No-ops and other odds and ends.
    Special = 0,
    /// Integer arithmetic.
    Arithmetic = 1,
    /// Bitwise logic and shifts.
    Bitwise = 2,
    /// Register/stack data movement.
    DataMovement = 3,
    /// Comparisons feeding the data stack.
    Conditional = 4,
    /// Jumps, calls, returns.
    ControlFlow = 5,
    /// Grid reads and writes.
    Environment = 6,
    /// Energy, forking, death.
    State = 7,
    /// Data-pointer and location-register traffic.
    Location = 8,
    /// Direction-vector and pointer vector math.
    Vector = 9,
}

impl Family {
    /// Decodes a family from its field value.
    #[must_use]
    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Self::Special),
            1 => Some(Self::Arithmetic),
            2 => Some(Self::Bitwise),
            3 => Some(Self::DataMovement),
            4 => Some(Self::Conditional),
            5 => Some(Self::ControlFlow),
            6 => Some(Self::Environment),
            7 => Some(Self::State),
            8 => Some(Self::Location),
            9 => Some(Self::Vector),
            _ => None,
        }
    }
}

/// Where an operand comes from and how it is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandSource {
    /// One cell carrying a register id; value snapshotted at resolve.
    Register,
    /// One cell carrying a signed 20-bit scalar.
    Immediate,
    /// Peeked from the data stack; not encoded in the code stream.
    Stack,
    /// `dims` cells read as signed components.
    Vector,
    /// `dims` cells read as signed components, addressing a label.
    Label,
    /// One cell carrying a location-register id; resolved at execute.
    LocationRegister,
}

impl OperandSource {
    /// Cells this operand occupies in the code stream.
    #[must_use]
    pub fn cells(&self, dims: usize) -> usize {
        match self {
            Self::Register | Self::Immediate | Self::LocationRegister => 1,
            Self::Vector | Self::Label => dims,
            Self::Stack => 0,
        }
    }
}

/// Operand-source arity groups. Discriminants are the variant field encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Variant {
    None = 0,
    R = 1,
    I = 2,
    S = 3,
    V = 4,
    L = 5,
    Rr = 6,
    Ri = 7,
    Rs = 8,
    Rv = 9,
    Rl = 10,
    Ss = 11,
    Sv = 12,
    Ll = 13,
    Rrr = 14,
    Rri = 15,
    Rii = 16,
    Sss = 17,
    Viv = 18,
}

impl Variant {
    /// Decodes a variant from its field value.
    #[must_use]
    pub fn from_index(index: u32) -> Option<Self> {
        const ALL: [Variant; 19] = [
            Variant::None,
            Variant::R,
            Variant::I,
            Variant::S,
            Variant::V,
            Variant::L,
            Variant::Rr,
            Variant::Ri,
            Variant::Rs,
            Variant::Rv,
            Variant::Rl,
            Variant::Ss,
            Variant::Sv,
            Variant::Ll,
            Variant::Rrr,
            Variant::Rri,
            Variant::Rii,
            Variant::Sss,
            Variant::Viv,
        ];
        ALL.get(index as usize).copied()
    }

    /// The canonical operand-source list for this variant.
    ///
    /// Individual instructions may register a different list (location
    /// instructions encode location-register ids in `R`-shaped slots); the
    /// table's per-instruction source list is authoritative.
    #[must_use]
    pub fn sources(&self) -> &'static [OperandSource] {
        use OperandSource::{Immediate, Label, Register, Stack, Vector};
        match self {
            Self::None => &[],
            Self::R => &[Register],
            Self::I => &[Immediate],
            Self::S => &[Stack],
            Self::V => &[Vector],
            Self::L => &[Label],
            Self::Rr => &[Register, Register],
            Self::Ri => &[Register, Immediate],
            Self::Rs => &[Register, Stack],
            Self::Rv => &[Register, Vector],
            Self::Rl => &[Register, Label],
            Self::Ss => &[Stack, Stack],
            Self::Sv => &[Stack, Vector],
            Self::Ll => &[Label, Label],
            Self::Rrr => &[Register, Register, Register],
            Self::Rri => &[Register, Register, Immediate],
            Self::Rii => &[Register, Immediate, Immediate],
            Self::Sss => &[Stack, Stack, Stack],
            Self::Viv => &[Vector, Immediate, Vector],
        }
    }
}

/// A structured opcode id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpcodeId(u32);

impl OpcodeId {
    /// Builds an opcode id from its three fields.
    #[must_use]
    pub fn new(family: Family, operation: u32, variant: Variant) -> Self {
        debug_assert!(operation < (1 << OPERATION_BITS));
        Self(family as u32 * F_MULT + operation * O_MULT + variant as u32)
    }

    /// Reinterprets a 20-bit cell value as an opcode id.
    #[must_use]
    pub fn from_cell_value(value: u32) -> Self {
        Self(value & OPCODE_MASK)
    }

    /// The raw structured integer.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// The family field, decoded.
    #[must_use]
    pub fn family(&self) -> Option<Family> {
        Family::from_index(self.0 / F_MULT)
    }

    /// The operation field.
    #[must_use]
    pub fn operation(&self) -> u32 {
        (self.0 / O_MULT) % (1 << OPERATION_BITS)
    }

    /// The variant field, decoded.
    #[must_use]
    pub fn variant(&self) -> Option<Variant> {
        Variant::from_index(self.0 % O_MULT)
    }
}

/// Everything the engine knows about one opcode.
#[derive(Debug)]
pub struct InstructionSpec {
    /// The structured opcode id.
    pub opcode: OpcodeId,
    /// Mnemonic, unique across the table.
    pub name: &'static str,
    /// Operand sources in encoding order. Authoritative over the variant's
    /// canonical list.
    pub sources: &'static [OperandSource],
    /// Semantic effect, run at commit.
    pub execute: ExecuteFn,
    /// Write target for conflict arbitration, when the instruction writes
    /// the grid.
    pub write_target: Option<TargetFn>,
}

impl InstructionSpec {
    /// Encoded length in cells: the opcode plus its encoded operands.
    #[must_use]
    pub fn encoded_length(&self, dims: usize) -> usize {
        1 + self.sources.iter().map(|s| s.cells(dims)).sum::<usize>()
    }
}

/// Errors raised while building or installing an instruction table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// Two registrations share an opcode id.
    #[error("duplicate opcode id {0:#x}")]
    DuplicateOpcode(u32),
    /// Two registrations share a mnemonic.
    #[error("duplicate instruction name: {0}")]
    DuplicateName(&'static str),
    /// The process-wide table was already installed.
    #[error("instruction table already installed")]
    AlreadyInstalled,
}

/// Incremental [`InstructionTable`] construction with duplicate rejection.
#[derive(Debug, Default)]
pub struct InstructionTableBuilder {
    by_opcode: FxHashMap<u32, InstructionSpec>,
    by_name: FxHashMap<&'static str, u32>,
}

impl InstructionTableBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one instruction. Re-registration of an opcode or name is
    /// rejected.
    pub fn register(&mut self, spec: InstructionSpec) -> Result<&mut Self, TableError> {
        let id = spec.opcode.value();
        if self.by_opcode.contains_key(&id) {
            return Err(TableError::DuplicateOpcode(id));
        }
        if self.by_name.contains_key(spec.name) {
            return Err(TableError::DuplicateName(spec.name));
        }
        self.by_name.insert(spec.name, id);
        self.by_opcode.insert(id, spec);
        Ok(self)
    }

    /// Finalizes the table.
    #[must_use]
    pub fn build(self) -> InstructionTable {
        InstructionTable {
            by_opcode: self.by_opcode,
            by_name: self.by_name,
        }
    }
}

/// Registry mapping structured opcode ids to behaviors.
#[derive(Debug)]
pub struct InstructionTable {
    by_opcode: FxHashMap<u32, InstructionSpec>,
    by_name: FxHashMap<&'static str, u32>,
}

static GLOBAL_TABLE: OnceLock<InstructionTable> = OnceLock::new();

impl InstructionTable {
    /// The process-wide table, lazily initialized with the builtin set.
    #[must_use]
    pub fn global() -> &'static InstructionTable {
        GLOBAL_TABLE.get_or_init(crate::isa::builtin_table)
    }

    /// Installs a custom table as the process-wide registry. Fails once any
    /// table (including the builtin one) has been installed.
    pub fn install(table: InstructionTable) -> Result<(), TableError> {
        GLOBAL_TABLE
            .set(table)
            .map_err(|_| TableError::AlreadyInstalled)
    }

    /// Looks up a spec by opcode id.
    #[must_use]
    pub fn spec(&self, opcode: OpcodeId) -> Option<&InstructionSpec> {
        self.by_opcode.get(&opcode.value())
    }

    /// Looks up a spec by mnemonic.
    #[must_use]
    pub fn spec_by_name(&self, name: &str) -> Option<&InstructionSpec> {
        self.by_name
            .get(name)
            .and_then(|id| self.by_opcode.get(id))
    }

    /// Number of registered instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_opcode.len()
    }

    /// `true` when no instruction is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_opcode.is_empty()
    }

    /// Iterates all specs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &InstructionSpec> {
        self.by_opcode.values()
    }
}
