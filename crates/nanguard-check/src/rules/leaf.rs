//! Checks on first-order primitives.

use nanguard_core::eval::scatter_window_sizes;
use nanguard_core::{
    inline_program, AbstractValue, Array, CoreError, DType, Emitter, Ops, Primitive, ReduceOp,
    Scalar, Shape,
};

use super::{rule_mismatch, Application, PredicateFn, RuleOutput};
use crate::error_value::{assert_func, fold, ErrorValue};

/// Reduces a boolean value to a scalar "any element true".
fn any<E: Emitter>(emitter: &mut E, flags: &E::Value) -> Result<E::Value, CoreError> {
    if emitter.aval(flags).shape.is_scalar() {
        return Ok(flags.clone());
    }
    emitter.reduce_all(ReduceOp::Or, flags)
}

fn all<E: Emitter>(emitter: &mut E, flags: &E::Value) -> Result<E::Value, CoreError> {
    if emitter.aval(flags).shape.is_scalar() {
        return Ok(flags.clone());
    }
    emitter.reduce_all(ReduceOp::And, flags)
}

/// Asserts that no floating-point output contains a NaN.
fn nan_check<E: Emitter>(
    emitter: &mut E,
    mut error: ErrorValue<E::Value>,
    name: &str,
    summary: &str,
    outputs: &[E::Value],
) -> Result<ErrorValue<E::Value>, CoreError> {
    for out in outputs {
        if !emitter.aval(out).dtype.is_float() {
            continue;
        }
        let is_nan = emitter.ne(out, out)?;
        let any_nan = any(emitter, &is_nan)?;
        let ok = emitter.not(&any_nan)?;
        error = assert_func(
            emitter,
            &error,
            &ok,
            format!("nan generated by primitive {name} at {summary}"),
        )?;
    }
    Ok(error)
}

/// Asserts every index vector in `indices` lies within `[0, upper]`
/// elementwise.
fn bounds_check<E: Emitter>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    indices: &E::Value,
    upper: Vec<i64>,
    message: String,
) -> Result<ErrorValue<E::Value>, CoreError> {
    if upper.is_empty() {
        return Ok(error.clone());
    }
    let index_shape = emitter.aval(indices).shape;
    let last = index_shape.rank().saturating_sub(1);
    let upper = emitter.constant(Array::vector_i64(&upper));
    let upper = emitter.broadcast_in_dim(&upper, index_shape, &[last])?;
    let zero = emitter.i64(0);
    let above = emitter.ge(indices, &zero)?;
    let below = emitter.le(indices, &upper)?;
    let in_bounds = emitter.and(&above, &below)?;
    let ok = all(emitter, &in_bounds)?;
    assert_func(emitter, error, &ok, message)
}

pub(super) fn nan_rule<E: Emitter>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let summary = app.summary();
    let name = app.primitive.name();
    let outputs = emitter.bind(app.primitive, &app.inputs, app.source)?;
    let error = nan_check(emitter, error.clone(), name, &summary, &outputs)?;
    Ok((outputs, error))
}

/// Division: the divisor must be nonzero everywhere. Reported before any
/// NaN the quotient produces.
pub(super) fn div_rule<E: Emitter>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let [_, divisor] = app.inputs.as_slice() else {
        return Err(rule_mismatch("div", &app.primitive));
    };
    let summary = app.summary();
    let name = app.primitive.name();

    let dtype = emitter.aval(divisor).dtype;
    let zero = emitter.literal(Scalar::I64(0).cast(dtype));
    let is_zero = emitter.eq(divisor, &zero)?;
    let any_zero = any(emitter, &is_zero)?;
    let nonzero = emitter.not(&any_zero)?;
    let error = assert_func(emitter, error, &nonzero, format!("divided by zero at {summary}"))?;

    let outputs = emitter.bind(app.primitive, &app.inputs, app.source)?;
    let error = nan_check(emitter, error, name, &summary, &outputs)?;
    Ok((outputs, error))
}

pub(super) fn gather_rule<E: Emitter>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let Primitive::Gather {
        dimension_numbers,
        slice_sizes,
    } = &app.primitive
    else {
        return Err(rule_mismatch("gather-bounds", &app.primitive));
    };
    let [operand, indices] = app.inputs.as_slice() else {
        return Err(rule_mismatch("gather-bounds", &app.primitive));
    };
    let operand_shape = emitter.aval(operand).shape;
    let upper = upper_bounds(&operand_shape, slice_sizes, &dimension_numbers.start_index_map);
    let indices = indices.clone();
    let summary = app.summary();

    let outputs = emitter.bind(app.primitive, &app.inputs, app.source)?;
    let error = bounds_check(
        emitter,
        error,
        &indices,
        upper,
        format!("out-of-bounds indexing at {summary}"),
    )?;
    Ok((outputs, error))
}

/// Scatter: start indices in bounds, then no NaN in the updated operand.
pub(super) fn scatter_rule<E: Emitter>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let Primitive::Scatter {
        dimension_numbers, ..
    } = &app.primitive
    else {
        return Err(rule_mismatch("scatter-bounds", &app.primitive));
    };
    let [operand, indices, updates] = app.inputs.as_slice() else {
        return Err(rule_mismatch("scatter-bounds", &app.primitive));
    };
    let operand_shape = emitter.aval(operand).shape;
    let update_shape = emitter.aval(updates).shape;
    let dimension_numbers = dimension_numbers.clone();
    let indices = indices.clone();
    let summary = app.summary();
    let name = app.primitive.name();

    // Window sizes are only meaningful once the shape rule accepted the bind.
    let outputs = emitter.bind(app.primitive, &app.inputs, app.source)?;
    let sizes = scatter_window_sizes(&operand_shape, &update_shape, &dimension_numbers);
    let upper = upper_bounds(
        &operand_shape,
        &sizes,
        &dimension_numbers.scatter_dims_to_operand_dims,
    );
    let error = bounds_check(
        emitter,
        error,
        &indices,
        upper,
        format!("out-of-bounds indexing while updating at {summary}"),
    )?;
    let error = nan_check(emitter, error, name, &summary, &outputs)?;
    Ok((outputs, error))
}

/// Largest legal start index for each indexed operand axis.
fn upper_bounds(operand: &Shape, slice_sizes: &[usize], axes: &[usize]) -> Vec<i64> {
    axes.iter()
        .map(|&axis| {
            let dim = operand.dims().get(axis).copied().unwrap_or(0) as i64;
            let size = slice_sizes.get(axis).copied().unwrap_or(1) as i64;
            dim - size
        })
        .collect()
}

/// Folds an `assert` equation into the error under its own code and
/// messages instead of executing it.
pub(super) fn assert_rule<E: Emitter>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let Primitive::Assert { messages } = &app.primitive else {
        return Err(rule_mismatch("assert", &app.primitive));
    };
    let [pred, code] = app.inputs.as_slice() else {
        return Err(CoreError::ArityMismatch {
            primitive: "assert",
            expected: 2,
            actual: app.inputs.len(),
        });
    };
    if emitter.aval(pred).dtype != DType::Bool {
        return Err(CoreError::DTypeMismatch {
            primitive: "assert",
            expected: DType::Bool,
            actual: emitter.aval(pred).dtype,
        });
    }
    let error = fold(emitter, error, pred, code, messages.clone())?;
    Ok((Vec::new(), error))
}

pub(super) fn custom_rule<E: Emitter>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
    predicate: PredicateFn,
    message: &str,
) -> Result<RuleOutput<E::Value>, CoreError> {
    let summary = app.summary();
    let name = app.primitive.name();
    let in_avals: Vec<_> = app.inputs.iter().map(|v| emitter.aval(v)).collect();
    let outputs = emitter.bind(app.primitive, &app.inputs, app.source)?;
    let out_avals: Vec<_> = outputs.iter().map(|v| emitter.aval(v)).collect();

    let program = predicate(&in_avals, &out_avals)?;
    let args: Vec<E::Value> = app.inputs.iter().chain(&outputs).cloned().collect();
    let result = inline_program(emitter, &program, &args)?;
    let ok = match result.as_slice() {
        [ok] if emitter.aval(ok) == AbstractValue::scalar(DType::Bool) => ok.clone(),
        _ => {
            return Err(CoreError::InvalidParams {
                primitive: name,
                reason: "custom check must return one scalar bool".to_string(),
            })
        }
    };
    let error = assert_func(emitter, error, &ok, format!("{message} at {summary}"))?;
    Ok((outputs, error))
}
