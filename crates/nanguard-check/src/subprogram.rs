//! Rewriting embedded sub-programs to thread the error state.
//!
//! A rewritten sub-program takes the error flag and code as two extra
//! inputs at a fixed position, runs its body under the checking overlay,
//! and returns the updated flag and code as two extra outputs at another
//! fixed position. Call, map and cond put both pairs first; scan puts
//! them after the carried state.

use std::collections::BTreeMap;
use std::sync::Arc;

use nanguard_core::{inline_program, AbstractValue, Atom, ClosedProgram, CoreError, ProgramBuilder};

use crate::error_value::ErrorValue;
use crate::rules::RuleTable;
use crate::trace::{ErrorTrace, Tracked};

/// Positions of the error flag and code in a rewritten signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorSlots {
    /// Index of the flag among the inputs; the code follows it.
    pub input: usize,
    /// Index of the flag among the outputs; the code follows it.
    pub output: usize,
}

impl ErrorSlots {
    pub const LEADING: ErrorSlots = ErrorSlots {
        input: 0,
        output: 0,
    };
}

/// Types of the error flag and code threaded through a sub-program.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorAvals {
    pub err: AbstractValue,
    pub code: AbstractValue,
}

/// Rewrites `program` to take and return the error state at `slots`.
///
/// Returns the checked program and the messages for every code its checks
/// can raise. The message table starts empty; callers merge it into their
/// own.
pub fn checkify_subprogram(
    rules: &Arc<RuleTable>,
    program: &ClosedProgram,
    slots: ErrorSlots,
    avals: &ErrorAvals,
) -> Result<(ClosedProgram, BTreeMap<i64, String>), CoreError> {
    let in_avals = program.in_avals()?;
    if slots.input > in_avals.len() || slots.output > program.num_outputs() {
        return Err(CoreError::InvalidParams {
            primitive: "checkify",
            reason: format!(
                "error slots {slots:?} out of range for {} input(s) and {} output(s)",
                in_avals.len(),
                program.num_outputs()
            ),
        });
    }

    let mut builder = ProgramBuilder::new();
    let (before, after) = in_avals.split_at(slots.input);
    let mut args: Vec<Tracked<Atom>> = before
        .iter()
        .map(|aval| Tracked::Tracked(builder.add_input(aval.clone())))
        .collect();
    let err = builder.add_input(avals.err.clone());
    let code = builder.add_input(avals.code.clone());
    args.extend(
        after
            .iter()
            .map(|aval| Tracked::Tracked(builder.add_input(aval.clone()))),
    );

    let initial = ErrorValue {
        err,
        code,
        messages: BTreeMap::new(),
    };
    let mut trace = ErrorTrace::new(&mut builder, Arc::clone(rules), initial);
    let outputs = inline_program(&mut trace, program, &args)?;
    let error = trace.finish();

    let mut outputs: Vec<Atom> = outputs.into_iter().map(Tracked::into_value).collect();
    outputs.splice(slots.output..slots.output, [error.err, error.code]);
    let checked = builder.finish(outputs);
    tracing::debug!(
        inputs = checked.num_inputs(),
        outputs = checked.num_outputs(),
        codes = error.messages.len(),
        "checkified sub-program"
    );
    Ok((checked, error.messages))
}

/// Removes the flag and code at `at` from a rewritten primitive's outputs.
pub(crate) fn split_error<V>(mut outputs: Vec<V>, at: usize) -> Result<(V, V, Vec<V>), CoreError> {
    if outputs.len() < at + 2 {
        return Err(CoreError::InvalidParams {
            primitive: "checkify",
            reason: format!("expected error outputs at {at}, got {} output(s)", outputs.len()),
        });
    }
    let mut rest = outputs.split_off(at);
    let tail = rest.split_off(2);
    let mut pair = rest.into_iter();
    match (pair.next(), pair.next()) {
        (Some(err), Some(code)) => {
            outputs.extend(tail);
            Ok((err, code, outputs))
        }
        _ => Err(CoreError::InvalidParams {
            primitive: "checkify",
            reason: "missing error outputs".to_string(),
        }),
    }
}
