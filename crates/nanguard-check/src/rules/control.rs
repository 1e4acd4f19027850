//! Rules for control-flow primitives.
//!
//! Each rule rewrites the embedded sub-programs once, before anything runs,
//! so that they carry the error state, then binds the original primitive
//! with the rewritten sub-programs on the underlying emitter.

use std::collections::BTreeMap;
use std::sync::Arc;

use nanguard_core::{
    inline_program, Atom, ClosedProgram, CoreError, Emitter, Primitive, ProgramBuilder,
};

use super::{rule_mismatch, Application, RuleOutput, RuleTable};
use crate::error_value::ErrorValue;
use crate::subprogram::{checkify_subprogram, split_error, ErrorAvals, ErrorSlots};
use crate::trace::{ErrorTrace, Tracked};

fn error_avals<E: Emitter>(emitter: &E, error: &ErrorValue<E::Value>) -> ErrorAvals {
    ErrorAvals {
        err: emitter.aval(&error.err),
        code: emitter.aval(&error.code),
    }
}

/// `cond`: every branch threads its own copy of the incoming error.
pub(super) fn cond_rule<E: Emitter>(
    emitter: &mut E,
    table: &Arc<RuleTable>,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let Primitive::Cond { branches } = &app.primitive else {
        return Err(rule_mismatch("cond", &app.primitive));
    };
    let Some((index, operands)) = app.inputs.split_first() else {
        return Err(CoreError::ArityMismatch {
            primitive: "cond",
            expected: 1,
            actual: 0,
        });
    };
    let avals = error_avals(emitter, error);
    let mut messages = error.messages.clone();
    let mut checked = Vec::with_capacity(branches.len());
    for branch in branches {
        let (branch, branch_messages) =
            checkify_subprogram(table, branch, ErrorSlots::LEADING, &avals)?;
        messages.extend(branch_messages);
        checked.push(branch);
    }

    let mut inputs = vec![index.clone(), error.err.clone(), error.code.clone()];
    inputs.extend_from_slice(operands);
    let outputs = emitter.bind(Primitive::Cond { branches: checked }, &inputs, app.source)?;
    let (err, code, outputs) = split_error(outputs, 0)?;
    Ok((outputs, ErrorValue { err, code, messages }))
}

/// `scan`: the error becomes two extra carry slots after the existing ones.
pub(super) fn scan_rule<E: Emitter>(
    emitter: &mut E,
    table: &Arc<RuleTable>,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let Primitive::Scan {
        body,
        length,
        reverse,
        num_consts,
        num_carry,
    } = &app.primitive
    else {
        return Err(rule_mismatch("scan", &app.primitive));
    };
    let carry_end = num_consts + num_carry;
    if app.inputs.len() < carry_end {
        return Err(CoreError::ArityMismatch {
            primitive: "scan",
            expected: carry_end,
            actual: app.inputs.len(),
        });
    }
    let slots = ErrorSlots {
        input: carry_end,
        output: *num_carry,
    };
    let (checked, body_messages) =
        checkify_subprogram(table, body, slots, &error_avals(emitter, error))?;

    let mut inputs = app.inputs[..carry_end].to_vec();
    inputs.push(error.err.clone());
    inputs.push(error.code.clone());
    inputs.extend_from_slice(&app.inputs[carry_end..]);
    let primitive = Primitive::Scan {
        body: checked,
        length: *length,
        reverse: *reverse,
        num_consts: *num_consts,
        num_carry: num_carry + 2,
    };
    let outputs = emitter.bind(primitive, &inputs, app.source)?;
    let (err, code, outputs) = split_error(outputs, *num_carry)?;

    let mut messages = error.messages.clone();
    messages.extend(body_messages);
    Ok((outputs, ErrorValue { err, code, messages }))
}

/// `while`: the predicate is checked once before the loop, and the body
/// re-evaluates it on its own result so a failing predicate check is caught
/// one iteration ahead. The loop's own predicate ignores the error slots.
pub(super) fn while_rule<E: Emitter>(
    emitter: &mut E,
    table: &Arc<RuleTable>,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let Primitive::While {
        cond,
        body,
        cond_nconsts,
        body_nconsts,
    } = &app.primitive
    else {
        return Err(rule_mismatch("while", &app.primitive));
    };
    let (nc, nb) = (*cond_nconsts, *body_nconsts);
    if app.inputs.len() < nc + nb {
        return Err(CoreError::ArityMismatch {
            primitive: "while",
            expected: nc + nb,
            actual: app.inputs.len(),
        });
    }
    let (cond_consts, rest) = app.inputs.split_at(nc);
    let (body_consts, carry) = rest.split_at(nb);

    // Seed the error with the predicate's checks on the initial carry.
    let mut seed = ErrorTrace::new(&mut *emitter, Arc::clone(table), error.clone());
    let cond_args: Vec<Tracked<E::Value>> = cond_consts
        .iter()
        .chain(carry)
        .cloned()
        .map(Tracked::Tracked)
        .collect();
    inline_program(&mut seed, cond, &cond_args)?;
    let error = seed.finish();

    let avals = error_avals(emitter, &error);
    let (checked_body, body_messages) = checked_while_body(table, cond, body, (nc, nb), &avals)?;
    let checked_cond = error_blind_cond(table, cond, nc, &avals)?;

    let mut inputs: Vec<E::Value> = cond_consts.to_vec();
    inputs.extend_from_slice(cond_consts);
    inputs.extend_from_slice(body_consts);
    inputs.push(error.err.clone());
    inputs.push(error.code.clone());
    inputs.extend_from_slice(carry);
    let primitive = Primitive::While {
        cond: checked_cond,
        body: checked_body,
        cond_nconsts: nc,
        body_nconsts: nc + nb,
    };
    let outputs = emitter.bind(primitive, &inputs, app.source)?;
    let (err, code, outputs) = split_error(outputs, 0)?;

    let mut messages = error.messages;
    messages.extend(body_messages);
    Ok((outputs, ErrorValue { err, code, messages }))
}

/// Body taking `[cond_consts, body_consts, err, code, carry]`: runs the
/// original body, then the predicate on the new carry, and returns
/// `[err, code, carry']`.
fn checked_while_body(
    table: &Arc<RuleTable>,
    cond: &ClosedProgram,
    body: &ClosedProgram,
    (nc, nb): (usize, usize),
    avals: &ErrorAvals,
) -> Result<(ClosedProgram, BTreeMap<i64, String>), CoreError> {
    let cond_avals = cond.in_avals()?;
    let body_avals = body.in_avals()?;
    let mut builder = ProgramBuilder::new();
    let cond_consts: Vec<Atom> = cond_avals[..nc]
        .iter()
        .map(|aval| builder.add_input(aval.clone()))
        .collect();
    let body_consts: Vec<Atom> = body_avals[..nb]
        .iter()
        .map(|aval| builder.add_input(aval.clone()))
        .collect();
    let initial = ErrorValue {
        err: builder.add_input(avals.err.clone()),
        code: builder.add_input(avals.code.clone()),
        messages: BTreeMap::new(),
    };
    let carry: Vec<Atom> = body_avals[nb..]
        .iter()
        .map(|aval| builder.add_input(aval.clone()))
        .collect();

    let mut trace = ErrorTrace::new(&mut builder, Arc::clone(table), initial);
    let body_args: Vec<Tracked<Atom>> = body_consts
        .into_iter()
        .chain(carry)
        .map(Tracked::Tracked)
        .collect();
    let next = inline_program(&mut trace, body, &body_args)?;
    let cond_args: Vec<Tracked<Atom>> = cond_consts
        .into_iter()
        .map(Tracked::Tracked)
        .chain(next.iter().cloned())
        .collect();
    inline_program(&mut trace, cond, &cond_args)?;
    let error = trace.finish();

    let mut outputs = vec![error.err, error.code];
    outputs.extend(next.into_iter().map(Tracked::into_value));
    Ok((builder.finish(outputs), error.messages))
}

/// Predicate taking `[cond_consts, err, code, carry]` that ignores the
/// error slots. Assertions inside the predicate are discharged and dropped;
/// the checked body already reported them.
fn error_blind_cond(
    table: &Arc<RuleTable>,
    cond: &ClosedProgram,
    nc: usize,
    avals: &ErrorAvals,
) -> Result<ClosedProgram, CoreError> {
    let cond_avals = cond.in_avals()?;
    let mut builder = ProgramBuilder::new();
    let consts: Vec<Atom> = cond_avals[..nc]
        .iter()
        .map(|aval| builder.add_input(aval.clone()))
        .collect();
    let ignored = ErrorValue {
        err: builder.add_input(avals.err.clone()),
        code: builder.add_input(avals.code.clone()),
        messages: BTreeMap::new(),
    };
    let carry: Vec<Atom> = cond_avals[nc..]
        .iter()
        .map(|aval| builder.add_input(aval.clone()))
        .collect();
    let args: Vec<Tracked<Atom>> = consts
        .into_iter()
        .chain(carry)
        .map(Tracked::Tracked)
        .collect();

    let mut trace = ErrorTrace::new(&mut builder, Arc::clone(table), ignored);
    let outputs = inline_program(&mut trace, cond, &args)?;
    // Already reported by the checked body, one iteration ahead.
    let _reported = trace.finish();
    Ok(builder.finish(outputs.into_iter().map(Tracked::into_value).collect()))
}
