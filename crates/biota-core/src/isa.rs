//! Builtin instruction set.
//!
//! A closed enumeration of behaviors dispatched through plain function
//! pointers. The set is representative rather than exhaustive: it covers
//! every operand-source shape the framework executes (none, register,
//! immediate, stack, vector, label, location-register, and the mixed
//! arities) so that any table laid out the same way runs identically.
//!
//! Conventions:
//! - Register operands come first; the first register operand is the
//!   destination where one exists.
//! - Grid writes go through the active data pointer plus a vector offset.
//! - Jump operands carry a 20-bit label value, except `JMPL` whose label
//!   operand is a per-axis displacement to the label cell.
//! - Location instructions encode location-register ids in single cells;
//!   the id is validated at execute time.

use crate::instruction::{ExecCtx, ExecOutcome, FailureKind, OperandValue, SpawnRequest, TargetCtx};
use crate::molecule::{Molecule, MoleculeType, VALUE_MASK};
use crate::opcode::{
    Family, InstructionSpec, InstructionTable, InstructionTableBuilder, OpcodeId, OperandSource,
    Variant,
};

const LOCATION_REGISTER: &[OperandSource] = &[OperandSource::LocationRegister];
const REGISTER_LOCATION_REGISTER: &[OperandSource] =
    &[OperandSource::Register, OperandSource::LocationRegister];

/// Builds the builtin table. Used to initialize the process-wide registry.
pub(crate) fn builtin_table() -> InstructionTable {
    let mut b = InstructionTableBuilder::new();

    add(&mut b, Family::Special, 0, Variant::None, "NOP", None, op_nop);

    // Arithmetic: operation selects the operator, variant the source shape.
    add(&mut b, Family::Arithmetic, 0, Variant::Rr, "ADDR", None, op_add);
    add(&mut b, Family::Arithmetic, 0, Variant::Ri, "ADDI", None, op_add);
    add(&mut b, Family::Arithmetic, 1, Variant::Rr, "SUBR", None, op_sub);
    add(&mut b, Family::Arithmetic, 1, Variant::Ri, "SUBI", None, op_sub);
    add(&mut b, Family::Arithmetic, 2, Variant::Rr, "MULR", None, op_mul);
    add(&mut b, Family::Arithmetic, 2, Variant::Ri, "MULI", None, op_mul);
    add(&mut b, Family::Arithmetic, 3, Variant::Rr, "DIVR", None, op_div);
    add(&mut b, Family::Arithmetic, 3, Variant::Ri, "DIVI", None, op_div);
    add(&mut b, Family::Arithmetic, 4, Variant::Rr, "MODR", None, op_mod);
    add(&mut b, Family::Arithmetic, 4, Variant::Ri, "MODI", None, op_mod);

    add(&mut b, Family::Bitwise, 0, Variant::Rr, "ANDR", None, op_and);
    add(&mut b, Family::Bitwise, 1, Variant::Rr, "ORR", None, op_or);
    add(&mut b, Family::Bitwise, 2, Variant::Rr, "XORR", None, op_xor);
    add(&mut b, Family::Bitwise, 3, Variant::R, "NOTR", None, op_not);
    add(&mut b, Family::Bitwise, 4, Variant::Ri, "SHLI", None, op_shl);
    add(&mut b, Family::Bitwise, 5, Variant::Ri, "SHRI", None, op_shr);

    add(&mut b, Family::DataMovement, 0, Variant::Ri, "SETI", None, op_set);
    add(&mut b, Family::DataMovement, 0, Variant::Rr, "SETR", None, op_set);
    add(&mut b, Family::DataMovement, 1, Variant::R, "PUSH", None, op_push);
    add(&mut b, Family::DataMovement, 2, Variant::Rs, "POP", None, op_pop);
    add(&mut b, Family::DataMovement, 3, Variant::S, "DUP", None, op_dup);
    add(&mut b, Family::DataMovement, 4, Variant::S, "DROP", None, op_drop);
    add(&mut b, Family::DataMovement, 5, Variant::Ss, "SWAP", None, op_swap);

    add(&mut b, Family::Conditional, 0, Variant::Rr, "EQRR", None, op_eq);
    add(&mut b, Family::Conditional, 1, Variant::Rr, "LTRR", None, op_lt);
    add(&mut b, Family::Conditional, 2, Variant::Rr, "GTRR", None, op_gt);

    add(&mut b, Family::ControlFlow, 0, Variant::I, "JMPI", None, op_jump);
    add(&mut b, Family::ControlFlow, 0, Variant::R, "JMPR", None, op_jump);
    add(&mut b, Family::ControlFlow, 0, Variant::S, "JMPS", None, op_jump);
    add(&mut b, Family::ControlFlow, 0, Variant::L, "JMPL", None, op_jump_label);
    add(&mut b, Family::ControlFlow, 1, Variant::I, "CALL", None, op_call);
    add(&mut b, Family::ControlFlow, 2, Variant::None, "RET", None, op_ret);

    add(&mut b, Family::Environment, 0, Variant::Rv, "PEEK", None, op_peek);
    add(
        &mut b,
        Family::Environment,
        1,
        Variant::Rv,
        "POKE",
        Some(pointer_write_target as crate::instruction::TargetFn),
        op_poke,
    );
    add(
        &mut b,
        Family::Environment,
        1,
        Variant::Sv,
        "POKS",
        Some(pointer_write_target as crate::instruction::TargetFn),
        op_poks,
    );

    add(&mut b, Family::State, 0, Variant::R, "NRG", None, op_energy);
    add(&mut b, Family::State, 1, Variant::Rv, "FORK", None, op_fork);
    add(&mut b, Family::State, 2, Variant::None, "DIE", None, op_die);

    add_with_sources(
        &mut b,
        Family::Location,
        0,
        Variant::L,
        "DPSL",
        LOCATION_REGISTER,
        None,
        op_dp_save,
    );
    add_with_sources(
        &mut b,
        Family::Location,
        1,
        Variant::L,
        "DPLL",
        LOCATION_REGISTER,
        None,
        op_dp_load,
    );
    add_with_sources(
        &mut b,
        Family::Location,
        2,
        Variant::L,
        "LPSH",
        LOCATION_REGISTER,
        None,
        op_loc_push,
    );
    add_with_sources(
        &mut b,
        Family::Location,
        3,
        Variant::L,
        "LPOP",
        LOCATION_REGISTER,
        None,
        op_loc_pop,
    );
    add_with_sources(
        &mut b,
        Family::Location,
        4,
        Variant::Rl,
        "DSTL",
        REGISTER_LOCATION_REGISTER,
        None,
        op_distance,
    );
    add(&mut b, Family::Location, 5, Variant::I, "ADPI", None, op_dp_select);
    add(&mut b, Family::Location, 6, Variant::V, "DPMV", None, op_dp_move);

    add(&mut b, Family::Vector, 0, Variant::V, "DVSV", None, op_dv_set);
    add(&mut b, Family::Vector, 1, Variant::V, "DPSV", None, op_dp_set);

    b.build()
}

fn add(
    b: &mut InstructionTableBuilder,
    family: Family,
    operation: u32,
    variant: Variant,
    name: &'static str,
    write_target: Option<crate::instruction::TargetFn>,
    execute: crate::instruction::ExecuteFn,
) {
    add_with_sources(
        b,
        family,
        operation,
        variant,
        name,
        variant.sources(),
        write_target,
        execute,
    );
}

#[allow(clippy::too_many_arguments)]
fn add_with_sources(
    b: &mut InstructionTableBuilder,
    family: Family,
    operation: u32,
    variant: Variant,
    name: &'static str,
    sources: &'static [OperandSource],
    write_target: Option<crate::instruction::TargetFn>,
    execute: crate::instruction::ExecuteFn,
) {
    let spec = InstructionSpec {
        opcode: OpcodeId::new(family, operation, variant),
        name,
        sources,
        execute,
        write_target,
    };
    if let Err(e) = b.register(spec) {
        debug_assert!(false, "builtin table registration failed: {e}");
    }
}

// ---------------------------------------------------------------------------
// Special
// ---------------------------------------------------------------------------

fn op_nop(_ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    Ok(ExecOutcome::Advance)
}

// ---------------------------------------------------------------------------
// Arithmetic and bitwise
// ---------------------------------------------------------------------------

fn binary_into_first(
    ctx: &mut ExecCtx<'_>,
    f: impl Fn(i64, i64) -> Result<i64, FailureKind>,
) -> Result<ExecOutcome, FailureKind> {
    let (_, a) = ctx.register(0)?;
    let b = ctx.scalar(1)?;
    let result = f(a, b)?;
    ctx.write_register(0, result)?;
    Ok(ExecOutcome::Advance)
}

fn op_add(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| Ok(a.wrapping_add(b)))
}

fn op_sub(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| Ok(a.wrapping_sub(b)))
}

fn op_mul(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| Ok(a.wrapping_mul(b)))
}

fn op_div(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| {
        if b == 0 {
            Err(FailureKind::DivisionByZero)
        } else {
            Ok(a.wrapping_div(b))
        }
    })
}

fn op_mod(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| {
        if b == 0 {
            Err(FailureKind::DivisionByZero)
        } else {
            Ok(a.wrapping_rem(b))
        }
    })
}

fn op_and(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| Ok(a & b))
}

fn op_or(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| Ok(a | b))
}

fn op_xor(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| Ok(a ^ b))
}

fn op_not(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let (_, a) = ctx.register(0)?;
    ctx.write_register(0, !a)?;
    Ok(ExecOutcome::Advance)
}

fn op_shl(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| Ok(a.wrapping_shl(b as u32 & 63)))
}

fn op_shr(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    binary_into_first(ctx, |a, b| Ok(a.wrapping_shr(b as u32 & 63)))
}

// ---------------------------------------------------------------------------
// Data movement
// ---------------------------------------------------------------------------

fn op_set(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let value = ctx.scalar(1)?;
    ctx.write_register(0, value)?;
    Ok(ExecOutcome::Advance)
}

fn op_push(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let value = ctx.scalar(0)?;
    ctx.organism.push_data(value);
    Ok(ExecOutcome::Advance)
}

fn op_pop(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    // The popped value was peeked as operand 1; the pop itself happened in
    // commit_stack_reads.
    let value = ctx.scalar(1)?;
    ctx.write_register(0, value)?;
    Ok(ExecOutcome::Advance)
}

fn op_dup(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let value = ctx.scalar(0)?;
    ctx.organism.push_data(value);
    ctx.organism.push_data(value);
    Ok(ExecOutcome::Advance)
}

fn op_drop(_ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    Ok(ExecOutcome::Advance)
}

fn op_swap(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let top = ctx.scalar(0)?;
    let under = ctx.scalar(1)?;
    ctx.organism.push_data(top);
    ctx.organism.push_data(under);
    Ok(ExecOutcome::Advance)
}

// ---------------------------------------------------------------------------
// Conditionals
// ---------------------------------------------------------------------------

fn compare_push(
    ctx: &mut ExecCtx<'_>,
    f: impl Fn(i64, i64) -> bool,
) -> Result<ExecOutcome, FailureKind> {
    let (_, a) = ctx.register(0)?;
    let (_, b) = ctx.register(1)?;
    ctx.organism.push_data(i64::from(f(a, b)));
    Ok(ExecOutcome::Advance)
}

fn op_eq(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    compare_push(ctx, |a, b| a == b)
}

fn op_lt(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    compare_push(ctx, |a, b| a < b)
}

fn op_gt(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    compare_push(ctx, |a, b| a > b)
}

// ---------------------------------------------------------------------------
// Control flow
// ---------------------------------------------------------------------------

fn label_value_from_scalar(raw: i64) -> u32 {
    raw as u32 & VALUE_MASK
}

fn op_jump(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let search = label_value_from_scalar(ctx.scalar(0)?);
    let coord = ctx.resolve_label(search)?;
    ctx.organism.set_ip(coord);
    Ok(ExecOutcome::Jumped)
}

fn op_jump_label(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let displacement = ctx.vector(0)?.to_vec();
    let target = ctx
        .env
        .shape()
        .target_coord(ctx.organism.ip_before_fetch(), &displacement);
    if ctx.env.get_molecule(&target).ty() == MoleculeType::Label {
        ctx.organism.set_ip(target);
        Ok(ExecOutcome::Jumped)
    } else {
        Err(FailureKind::LabelNotFound)
    }
}

fn op_call(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let search = label_value_from_scalar(ctx.scalar(0)?);
    let return_coord = ctx.env.shape().advance(
        ctx.organism.ip_before_fetch(),
        ctx.organism.dv(),
        ctx.encoded_length as i32,
    );
    let coord = ctx.resolve_label(search)?;
    ctx.organism.push_call(return_coord);
    ctx.organism.set_ip(coord);
    Ok(ExecOutcome::Jumped)
}

fn op_ret(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let coord = ctx.organism.pop_call().ok_or(FailureKind::StackUnderflow)?;
    ctx.organism.set_ip(coord);
    Ok(ExecOutcome::Jumped)
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Write target for pointer-relative grid writes: active data pointer plus
/// the vector operand at index 1.
fn pointer_write_target(ctx: &TargetCtx<'_>) -> Option<usize> {
    match ctx.operands.get(1) {
        Some(OperandValue::Vector(offset)) => {
            let coord = ctx
                .env
                .shape()
                .target_coord(ctx.organism.active_data_pointer(), offset);
            Some(ctx.env.shape().flat_index(&coord))
        }
        _ => None,
    }
}

fn op_peek(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let offset = ctx.vector(1)?.to_vec();
    let coord = ctx
        .env
        .shape()
        .target_coord(ctx.organism.active_data_pointer(), &offset);
    let value = i64::from(ctx.env.get_molecule(&coord).value_signed());
    ctx.write_register(0, value)?;
    Ok(ExecOutcome::Advance)
}

fn write_through_pointer(ctx: &mut ExecCtx<'_>, value: i64) -> Result<ExecOutcome, FailureKind> {
    let offset = ctx.vector(1)?.to_vec();
    let coord = ctx
        .env
        .shape()
        .target_coord(ctx.organism.active_data_pointer(), &offset);
    let owner = ctx.organism.id();
    ctx.env
        .set_molecule(Molecule::of(MoleculeType::Data, value as u32), owner, &coord);
    Ok(ExecOutcome::Advance)
}

fn op_poke(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let value = ctx.scalar(0)?;
    write_through_pointer(ctx, value)
}

fn op_poks(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let value = ctx.scalar(0)?;
    write_through_pointer(ctx, value)
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

fn op_energy(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let energy = ctx.organism.energy();
    ctx.write_register(0, energy)?;
    Ok(ExecOutcome::Advance)
}

fn op_fork(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let amount = ctx.scalar(0)?;
    if amount <= 0 || amount >= ctx.organism.energy() {
        return Err(FailureKind::InsufficientEnergy);
    }
    let offset = ctx.vector(1)?.to_vec();
    let origin = ctx
        .env
        .shape()
        .target_coord(ctx.organism.ip_before_fetch(), &offset);
    ctx.organism.debit_energy(amount);
    ctx.spawns.push(SpawnRequest {
        parent: ctx.organism.id(),
        origin,
        energy: amount,
    });
    Ok(ExecOutcome::Advance)
}

fn op_die(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    ctx.organism.kill();
    Ok(ExecOutcome::Advance)
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

fn op_dp_save(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let id = ctx.location_register(0)?;
    let coord = ctx.organism.active_data_pointer().to_vec();
    ctx.organism.set_location_register(id, coord);
    Ok(ExecOutcome::Advance)
}

fn op_dp_load(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let id = ctx.location_register(0)?;
    let coord = ctx
        .organism
        .location_register(id)
        .ok_or(FailureKind::InvalidMemoryAccess)?
        .to_vec();
    ctx.organism.set_active_data_pointer(coord);
    Ok(ExecOutcome::Advance)
}

fn op_loc_push(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let id = ctx.location_register(0)?;
    let coord = ctx
        .organism
        .location_register(id)
        .ok_or(FailureKind::InvalidMemoryAccess)?
        .to_vec();
    ctx.organism.push_location(coord);
    Ok(ExecOutcome::Advance)
}

fn op_loc_pop(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let id = ctx.location_register(0)?;
    let coord = ctx
        .organism
        .pop_location()
        .ok_or(FailureKind::StackUnderflow)?;
    ctx.organism.set_location_register(id, coord);
    Ok(ExecOutcome::Advance)
}

fn op_distance(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let id = ctx.location_register(1)?;
    let target = ctx
        .organism
        .location_register(id)
        .ok_or(FailureKind::InvalidMemoryAccess)?
        .to_vec();
    let distance = ctx
        .env
        .shape()
        .torus_distance(ctx.organism.active_data_pointer(), &target);
    ctx.write_register(0, distance as i64)?;
    Ok(ExecOutcome::Advance)
}

fn op_dp_select(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let idx = ctx.scalar(0)?;
    ctx.organism.select_data_pointer(idx);
    Ok(ExecOutcome::Advance)
}

fn op_dp_move(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let offset = ctx.vector(0)?.to_vec();
    let coord = ctx
        .env
        .shape()
        .target_coord(ctx.organism.active_data_pointer(), &offset);
    ctx.organism.set_active_data_pointer(coord);
    Ok(ExecOutcome::Advance)
}

// ---------------------------------------------------------------------------
// Vector
// ---------------------------------------------------------------------------

fn op_dv_set(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let dv = ctx.vector(0)?.to_vec();
    if dv.iter().all(|&c| c == 0) {
        return Err(FailureKind::OutOfDomainVector);
    }
    ctx.organism.set_dv(dv);
    Ok(ExecOutcome::Advance)
}

fn op_dp_set(ctx: &mut ExecCtx<'_>) -> Result<ExecOutcome, FailureKind> {
    let offset = ctx.vector(0)?.to_vec();
    let coord = ctx
        .env
        .shape()
        .target_coord(ctx.organism.ip_before_fetch(), &offset);
    ctx.organism.set_active_data_pointer(coord);
    Ok(ExecOutcome::Advance)
}
