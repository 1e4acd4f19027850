//! Abstract evaluation: output types of every primitive from its input types.
//!
//! These rules are the single source of truth for what a well-typed
//! application looks like. The staging builder runs them on every bind,
//! [`Program::validate`](crate::program::Program::validate) re-runs them
//! over stored equations, and the evaluator relies on them having passed.

use crate::error::CoreError;
use crate::ops::{
    BinaryOp, CmpOp, GatherDimensionNumbers, Primitive, ReduceOp, ScatterDimensionNumbers,
    ScatterKind, UnaryOp,
};
use crate::program::ClosedProgram;
use crate::types::{AbstractValue, DType, Shape};

/// Computes the output types of applying `primitive` to operands of the
/// given types.
pub fn abstract_eval(
    primitive: &Primitive,
    inputs: &[AbstractValue],
) -> Result<Vec<AbstractValue>, CoreError> {
    let name = primitive.name();
    match primitive {
        Primitive::Unary(op) => unary(*op, name, inputs).map(|a| vec![a]),
        Primitive::Binary(op) => binary(*op, name, inputs).map(|a| vec![a]),
        Primitive::Compare(op) => compare(*op, name, inputs).map(|a| vec![a]),
        Primitive::Select => {
            expect_arity(name, inputs, 3)?;
            expect_dtype(name, &inputs[0], DType::Bool)?;
            same_dtype(name, &inputs[1], &inputs[2])?;
            let shape = broadcast_shapes(name, &[&inputs[0], &inputs[1], &inputs[2]])?;
            Ok(vec![AbstractValue::new(inputs[1].dtype, shape)])
        }
        Primitive::Clamp => {
            expect_arity(name, inputs, 3)?;
            let operand = &inputs[1];
            expect_numeric(name, operand)?;
            for bound in [&inputs[0], &inputs[2]] {
                same_dtype(name, operand, bound)?;
                if !bound.shape.is_scalar() && bound.shape != operand.shape {
                    return Err(shape_mismatch(name, &operand.shape, &bound.shape));
                }
            }
            Ok(vec![operand.clone()])
        }
        Primitive::Reduce { op, axes } => {
            expect_arity(name, inputs, 1)?;
            let operand = &inputs[0];
            match op {
                ReduceOp::And | ReduceOp::Or => expect_dtype(name, operand, DType::Bool)?,
                _ => expect_numeric(name, operand)?,
            }
            check_axes(name, axes, operand.shape.rank())?;
            let dims: Vec<usize> = operand
                .shape
                .dims()
                .iter()
                .enumerate()
                .filter(|(axis, _)| !axes.contains(axis))
                .map(|(_, d)| *d)
                .collect();
            Ok(vec![AbstractValue::new(operand.dtype, Shape::new(&dims))])
        }
        Primitive::Cumulative { axis, .. } => {
            expect_arity(name, inputs, 1)?;
            expect_numeric(name, &inputs[0])?;
            check_axes(name, &[*axis], inputs[0].shape.rank())?;
            Ok(vec![inputs[0].clone()])
        }
        Primitive::ConvertElementType { dtype } => {
            expect_arity(name, inputs, 1)?;
            Ok(vec![inputs[0].with_dtype(*dtype)])
        }
        Primitive::BroadcastInDim {
            shape,
            broadcast_dimensions,
        } => {
            expect_arity(name, inputs, 1)?;
            let operand = &inputs[0];
            if broadcast_dimensions.len() != operand.shape.rank() {
                return Err(invalid(
                    name,
                    format!(
                        "{} broadcast dimension(s) for operand of rank {}",
                        broadcast_dimensions.len(),
                        operand.shape.rank()
                    ),
                ));
            }
            if broadcast_dimensions.windows(2).any(|w| w[0] >= w[1]) {
                return Err(invalid(name, "broadcast dimensions must be strictly increasing"));
            }
            for (&in_dim, &out_axis) in operand.shape.dims().iter().zip(broadcast_dimensions) {
                let out_dim = *shape.dims().get(out_axis).ok_or_else(|| {
                    invalid(name, format!("broadcast dimension {out_axis} out of range"))
                })?;
                if in_dim != 1 && in_dim != out_dim {
                    return Err(invalid(
                        name,
                        format!("operand dimension {in_dim} cannot broadcast to {out_dim}"),
                    ));
                }
            }
            Ok(vec![AbstractValue::new(operand.dtype, shape.clone())])
        }
        Primitive::Reshape { new_sizes } => {
            expect_arity(name, inputs, 1)?;
            if new_sizes.numel() != inputs[0].shape.numel() {
                return Err(shape_mismatch(name, &inputs[0].shape, new_sizes));
            }
            Ok(vec![AbstractValue::new(inputs[0].dtype, new_sizes.clone())])
        }
        Primitive::Transpose { permutation } => {
            expect_arity(name, inputs, 1)?;
            let rank = inputs[0].shape.rank();
            let mut seen = vec![false; rank];
            if permutation.len() != rank {
                return Err(invalid(name, "permutation length must equal operand rank"));
            }
            for &axis in permutation {
                match seen.get_mut(axis) {
                    Some(slot) if !*slot => *slot = true,
                    _ => return Err(invalid(name, format!("{permutation:?} is not a permutation"))),
                }
            }
            let dims: Vec<usize> = permutation.iter().map(|&a| inputs[0].shape.dims()[a]).collect();
            Ok(vec![AbstractValue::new(inputs[0].dtype, Shape::new(&dims))])
        }
        Primitive::Rev { dimensions } => {
            expect_arity(name, inputs, 1)?;
            check_axes(name, dimensions, inputs[0].shape.rank())?;
            Ok(vec![inputs[0].clone()])
        }
        Primitive::Slice {
            start_indices,
            limit_indices,
        } => {
            expect_arity(name, inputs, 1)?;
            let dims = inputs[0].shape.dims();
            if start_indices.len() != dims.len() || limit_indices.len() != dims.len() {
                return Err(invalid(name, "slice bounds must match operand rank"));
            }
            let mut out = Vec::with_capacity(dims.len());
            for ((&start, &limit), &dim) in start_indices.iter().zip(limit_indices).zip(dims) {
                if start > limit || limit > dim {
                    return Err(invalid(
                        name,
                        format!("bounds {start}..{limit} invalid for dimension {dim}"),
                    ));
                }
                out.push(limit - start);
            }
            Ok(vec![AbstractValue::new(inputs[0].dtype, Shape::new(&out))])
        }
        Primitive::Concatenate { dimension } => {
            let first = inputs.first().ok_or(CoreError::ArityMismatch {
                primitive: name,
                expected: 1,
                actual: 0,
            })?;
            check_axes(name, &[*dimension], first.shape.rank())?;
            let mut total = 0;
            for operand in inputs {
                same_dtype(name, first, operand)?;
                if operand.shape.rank() != first.shape.rank()
                    || operand.shape.without_axis(*dimension) != first.shape.without_axis(*dimension)
                {
                    return Err(shape_mismatch(name, &first.shape, &operand.shape));
                }
                total += operand.shape.dims()[*dimension];
            }
            let mut dims = first.shape.dims().to_vec();
            dims[*dimension] = total;
            Ok(vec![AbstractValue::new(first.dtype, Shape::new(&dims))])
        }
        Primitive::Iota { dtype, size } => {
            expect_arity(name, inputs, 0)?;
            if !dtype.is_numeric() {
                return Err(CoreError::UnsupportedDType {
                    primitive: name,
                    dtype: *dtype,
                });
            }
            Ok(vec![AbstractValue::new(*dtype, Shape::vector(*size))])
        }
        Primitive::Dot => {
            expect_arity(name, inputs, 2)?;
            let (lhs, rhs) = (&inputs[0], &inputs[1]);
            expect_numeric(name, lhs)?;
            same_dtype(name, lhs, rhs)?;
            let out = match (lhs.shape.dims(), rhs.shape.dims()) {
                ([n], [m]) if n == m => Shape::scalar(),
                ([rows, n], [m]) if n == m => Shape::vector(*rows),
                ([rows, k], [j, cols]) if k == j => Shape::new(&[*rows, *cols]),
                _ => return Err(shape_mismatch(name, &lhs.shape, &rhs.shape)),
            };
            Ok(vec![AbstractValue::new(lhs.dtype, out)])
        }
        Primitive::Sort {
            dimension,
            num_keys,
        } => {
            let first = inputs.first().ok_or(CoreError::ArityMismatch {
                primitive: name,
                expected: 1,
                actual: 0,
            })?;
            if *num_keys == 0 || *num_keys > inputs.len() {
                return Err(invalid(
                    name,
                    format!("num_keys {num_keys} invalid for {} operand(s)", inputs.len()),
                ));
            }
            check_axes(name, &[*dimension], first.shape.rank())?;
            for operand in inputs {
                if operand.shape != first.shape {
                    return Err(shape_mismatch(name, &first.shape, &operand.shape));
                }
            }
            Ok(inputs.to_vec())
        }
        Primitive::Gather {
            dimension_numbers,
            slice_sizes,
        } => gather(name, dimension_numbers, slice_sizes, inputs).map(|a| vec![a]),
        Primitive::Scatter {
            kind,
            dimension_numbers,
        } => scatter(name, *kind, dimension_numbers, inputs).map(|a| vec![a]),
        Primitive::Cond { branches } => {
            let (index, operands) = inputs.split_first().ok_or(CoreError::ArityMismatch {
                primitive: name,
                expected: 1,
                actual: 0,
            })?;
            if !index.shape.is_scalar() || !matches!(index.dtype, DType::I64 | DType::Bool) {
                return Err(invalid(name, format!("branch index must be a scalar integer, got {index}")));
            }
            let first = branches
                .first()
                .ok_or_else(|| invalid(name, "at least one branch is required"))?;
            let out = first.out_avals()?;
            for (i, branch) in branches.iter().enumerate() {
                expect_signature(name, &format!("branch {i} inputs"), &branch.in_avals()?, operands)?;
                expect_signature(name, &format!("branch {i} outputs"), &branch.out_avals()?, &out)?;
            }
            Ok(out)
        }
        Primitive::Scan {
            body,
            length,
            num_consts,
            num_carry,
            ..
        } => {
            if num_consts + num_carry > inputs.len() {
                return Err(CoreError::ArityMismatch {
                    primitive: name,
                    expected: num_consts + num_carry,
                    actual: inputs.len(),
                });
            }
            let (fixed, xs) = inputs.split_at(num_consts + num_carry);
            let carry = &fixed[*num_consts..];
            let mut body_in = fixed.to_vec();
            for x in xs {
                if x.shape.dims().first() != Some(length) {
                    return Err(invalid(
                        name,
                        format!("scanned operand {x} does not have leading dimension {length}"),
                    ));
                }
                body_in.push(AbstractValue::new(x.dtype, x.shape.without_axis(0)));
            }
            expect_signature(name, "body inputs", &body.in_avals()?, &body_in)?;
            let body_out = body.out_avals()?;
            if body_out.len() < *num_carry {
                return Err(signature(name, "body returns fewer values than the carry"));
            }
            let (carry_out, ys) = body_out.split_at(*num_carry);
            expect_signature(name, "body carry outputs", carry_out, carry)?;
            let mut out = carry_out.to_vec();
            out.extend(
                ys.iter()
                    .map(|y| AbstractValue::new(y.dtype, y.shape.with_axis(0, *length))),
            );
            Ok(out)
        }
        Primitive::While {
            cond,
            body,
            cond_nconsts,
            body_nconsts,
        } => {
            if cond_nconsts + body_nconsts > inputs.len() {
                return Err(CoreError::ArityMismatch {
                    primitive: name,
                    expected: cond_nconsts + body_nconsts,
                    actual: inputs.len(),
                });
            }
            let (cond_consts, rest) = inputs.split_at(*cond_nconsts);
            let (body_consts, carry) = rest.split_at(*body_nconsts);
            let cond_in: Vec<AbstractValue> = cond_consts.iter().chain(carry).cloned().collect();
            expect_signature(name, "cond inputs", &cond.in_avals()?, &cond_in)?;
            expect_signature(
                name,
                "cond outputs",
                &cond.out_avals()?,
                &[AbstractValue::scalar(DType::Bool)],
            )?;
            let body_in: Vec<AbstractValue> = body_consts.iter().chain(carry).cloned().collect();
            expect_signature(name, "body inputs", &body.in_avals()?, &body_in)?;
            expect_signature(name, "body outputs", &body.out_avals()?, carry)?;
            Ok(carry.to_vec())
        }
        Primitive::Call { body, .. } => {
            expect_signature(name, "inputs", &body.in_avals()?, inputs)?;
            body.out_avals()
        }
        Primitive::Map {
            body,
            axis_size,
            in_axes,
            out_axes,
        } => map(name, body, *axis_size, in_axes, out_axes, inputs),
        Primitive::Assert { .. } => {
            expect_arity(name, inputs, 2)?;
            expect_dtype(name, &inputs[0], DType::Bool)?;
            expect_dtype(name, &inputs[1], DType::I64)?;
            if !inputs[1].shape.is_scalar() && inputs[1].shape != inputs[0].shape {
                return Err(shape_mismatch(name, &inputs[0].shape, &inputs[1].shape));
            }
            Ok(Vec::new())
        }
    }
}

fn unary(op: UnaryOp, name: &'static str, inputs: &[AbstractValue]) -> Result<AbstractValue, CoreError> {
    expect_arity(name, inputs, 1)?;
    let x = &inputs[0];
    let ok = match op {
        UnaryOp::Not => matches!(x.dtype, DType::Bool | DType::I64),
        _ if op.requires_float() => x.dtype.is_float(),
        _ => x.dtype.is_numeric(),
    };
    if !ok {
        return Err(CoreError::UnsupportedDType {
            primitive: name,
            dtype: x.dtype,
        });
    }
    Ok(x.clone())
}

fn binary(op: BinaryOp, name: &'static str, inputs: &[AbstractValue]) -> Result<AbstractValue, CoreError> {
    expect_arity(name, inputs, 2)?;
    let (lhs, rhs) = (&inputs[0], &inputs[1]);
    same_dtype(name, lhs, rhs)?;
    let ok = if op.is_logical() {
        matches!(lhs.dtype, DType::Bool | DType::I64)
    } else if op.is_shift() {
        lhs.dtype.is_integer()
    } else if op == BinaryOp::Atan2 {
        lhs.dtype.is_float()
    } else {
        lhs.dtype.is_numeric()
    };
    if !ok {
        return Err(CoreError::UnsupportedDType {
            primitive: name,
            dtype: lhs.dtype,
        });
    }
    let shape = broadcast_shapes(name, &[lhs, rhs])?;
    Ok(AbstractValue::new(lhs.dtype, shape))
}

fn compare(op: CmpOp, name: &'static str, inputs: &[AbstractValue]) -> Result<AbstractValue, CoreError> {
    expect_arity(name, inputs, 2)?;
    let (lhs, rhs) = (&inputs[0], &inputs[1]);
    same_dtype(name, lhs, rhs)?;
    if !matches!(op, CmpOp::Eq | CmpOp::Ne) {
        expect_numeric(name, lhs)?;
    }
    let shape = broadcast_shapes(name, &[lhs, rhs])?;
    Ok(AbstractValue::new(DType::Bool, shape))
}

fn gather(
    name: &'static str,
    dnums: &GatherDimensionNumbers,
    slice_sizes: &[usize],
    inputs: &[AbstractValue],
) -> Result<AbstractValue, CoreError> {
    expect_arity(name, inputs, 2)?;
    let (operand, indices) = (&inputs[0], &inputs[1]);
    expect_dtype(name, indices, DType::I64)?;
    let index_dims = indices.shape.dims();
    let (&index_len, batch_dims) = index_dims
        .split_last()
        .ok_or_else(|| invalid(name, "indices must have an index vector dimension"))?;
    if index_len != dnums.start_index_map.len() {
        return Err(invalid(
            name,
            format!(
                "index vector of length {index_len} for start_index_map of length {}",
                dnums.start_index_map.len()
            ),
        ));
    }
    let rank = operand.shape.rank();
    check_axes(name, &dnums.start_index_map, rank)?;
    check_axes(name, &dnums.collapsed_slice_dims, rank)?;
    if slice_sizes.len() != rank {
        return Err(invalid(name, "slice_sizes must match operand rank"));
    }
    for (axis, (&size, &dim)) in slice_sizes.iter().zip(operand.shape.dims()).enumerate() {
        if size > dim {
            return Err(invalid(
                name,
                format!("slice size {size} exceeds dimension {dim} on axis {axis}"),
            ));
        }
    }
    for &axis in &dnums.collapsed_slice_dims {
        if slice_sizes[axis] != 1 {
            return Err(invalid(name, format!("collapsed axis {axis} must have slice size 1")));
        }
    }
    let window: Vec<usize> = (0..rank)
        .filter(|axis| !dnums.collapsed_slice_dims.contains(axis))
        .map(|axis| slice_sizes[axis])
        .collect();
    if window.len() != dnums.offset_dims.len() {
        return Err(invalid(name, "offset_dims must list every non-collapsed slice dimension"));
    }
    let out_rank = batch_dims.len() + window.len();
    if dnums.offset_dims.windows(2).any(|w| w[0] >= w[1]) {
        return Err(invalid(name, "offset_dims must be strictly increasing"));
    }
    check_axes(name, &dnums.offset_dims, out_rank)?;
    let mut batch = batch_dims.iter();
    let mut offsets = window.iter();
    let dims: Vec<usize> = (0..out_rank)
        .map(|axis| {
            let next = if dnums.offset_dims.contains(&axis) {
                offsets.next()
            } else {
                batch.next()
            };
            next.copied().unwrap_or(0)
        })
        .collect();
    Ok(AbstractValue::new(operand.dtype, Shape::new(&dims)))
}

fn scatter(
    name: &'static str,
    kind: ScatterKind,
    dnums: &ScatterDimensionNumbers,
    inputs: &[AbstractValue],
) -> Result<AbstractValue, CoreError> {
    expect_arity(name, inputs, 3)?;
    let (operand, indices, updates) = (&inputs[0], &inputs[1], &inputs[2]);
    expect_dtype(name, indices, DType::I64)?;
    same_dtype(name, operand, updates)?;
    if kind != ScatterKind::Replace {
        expect_numeric(name, operand)?;
    }
    let index_dims = indices.shape.dims();
    let (&index_len, batch_dims) = index_dims
        .split_last()
        .ok_or_else(|| invalid(name, "indices must have an index vector dimension"))?;
    if index_len != dnums.scatter_dims_to_operand_dims.len() {
        return Err(invalid(
            name,
            "index vector length must match scatter_dims_to_operand_dims",
        ));
    }
    let rank = operand.shape.rank();
    check_axes(name, &dnums.scatter_dims_to_operand_dims, rank)?;
    check_axes(name, &dnums.inserted_window_dims, rank)?;
    if dnums.update_window_dims.len() + dnums.inserted_window_dims.len() != rank {
        return Err(invalid(
            name,
            "update_window_dims and inserted_window_dims must cover the operand rank",
        ));
    }
    let update_rank = updates.shape.rank();
    if update_rank != batch_dims.len() + dnums.update_window_dims.len() {
        return Err(invalid(name, format!("updates {updates} have the wrong rank")));
    }
    check_axes(name, &dnums.update_window_dims, update_rank)?;
    let window_axes: Vec<usize> = (0..rank)
        .filter(|axis| !dnums.inserted_window_dims.contains(axis))
        .collect();
    for (&update_axis, &operand_axis) in dnums.update_window_dims.iter().zip(&window_axes) {
        if updates.shape.dims()[update_axis] > operand.shape.dims()[operand_axis] {
            return Err(invalid(
                name,
                format!("update window on axis {update_axis} exceeds operand axis {operand_axis}"),
            ));
        }
    }
    let update_batch: Vec<usize> = (0..update_rank)
        .filter(|axis| !dnums.update_window_dims.contains(axis))
        .map(|axis| updates.shape.dims()[axis])
        .collect();
    if update_batch != batch_dims {
        return Err(shape_mismatch(name, &Shape::new(batch_dims), &Shape::new(&update_batch)));
    }
    Ok(operand.clone())
}

fn map(
    name: &'static str,
    body: &ClosedProgram,
    axis_size: usize,
    in_axes: &[Option<usize>],
    out_axes: &[usize],
    inputs: &[AbstractValue],
) -> Result<Vec<AbstractValue>, CoreError> {
    if in_axes.len() != inputs.len() {
        return Err(invalid(name, "in_axes must have one entry per operand"));
    }
    let mut lane_in = Vec::with_capacity(inputs.len());
    for (input, axis) in inputs.iter().zip(in_axes) {
        match axis {
            None => lane_in.push(input.clone()),
            Some(axis) => {
                if input.shape.dims().get(*axis) != Some(&axis_size) {
                    return Err(invalid(
                        name,
                        format!("operand {input} has no axis {axis} of size {axis_size}"),
                    ));
                }
                lane_in.push(AbstractValue::new(input.dtype, input.shape.without_axis(*axis)));
            }
        }
    }
    expect_signature(name, "body inputs", &body.in_avals()?, &lane_in)?;
    let body_out = body.out_avals()?;
    if out_axes.len() != body_out.len() {
        return Err(invalid(name, "out_axes must have one entry per body output"));
    }
    body_out
        .iter()
        .zip(out_axes)
        .map(|(out, &axis)| {
            if axis > out.shape.rank() {
                return Err(invalid(name, format!("out axis {axis} out of range for {out}")));
            }
            Ok(AbstractValue::new(out.dtype, out.shape.with_axis(axis, axis_size)))
        })
        .collect()
}

/// Common shape of elementwise operands: all equal, or rank 0.
pub fn broadcast_shapes(name: &'static str, operands: &[&AbstractValue]) -> Result<Shape, CoreError> {
    let mut out = Shape::scalar();
    for operand in operands {
        if operand.shape.is_scalar() {
            continue;
        }
        if out.is_scalar() {
            out = operand.shape.clone();
        } else if out != operand.shape {
            return Err(shape_mismatch(name, &out, &operand.shape));
        }
    }
    Ok(out)
}

fn expect_arity(name: &'static str, inputs: &[AbstractValue], expected: usize) -> Result<(), CoreError> {
    if inputs.len() != expected {
        return Err(CoreError::ArityMismatch {
            primitive: name,
            expected,
            actual: inputs.len(),
        });
    }
    Ok(())
}

fn expect_dtype(name: &'static str, aval: &AbstractValue, dtype: DType) -> Result<(), CoreError> {
    if aval.dtype != dtype {
        return Err(CoreError::DTypeMismatch {
            primitive: name,
            expected: dtype,
            actual: aval.dtype,
        });
    }
    Ok(())
}

fn expect_numeric(name: &'static str, aval: &AbstractValue) -> Result<(), CoreError> {
    if !aval.dtype.is_numeric() {
        return Err(CoreError::UnsupportedDType {
            primitive: name,
            dtype: aval.dtype,
        });
    }
    Ok(())
}

fn same_dtype(name: &'static str, a: &AbstractValue, b: &AbstractValue) -> Result<(), CoreError> {
    expect_dtype(name, b, a.dtype)
}

fn check_axes(name: &'static str, axes: &[usize], rank: usize) -> Result<(), CoreError> {
    for (i, &axis) in axes.iter().enumerate() {
        if axis >= rank {
            return Err(invalid(name, format!("axis {axis} out of range for rank {rank}")));
        }
        if axes[..i].contains(&axis) {
            return Err(invalid(name, format!("axis {axis} repeated")));
        }
    }
    Ok(())
}

fn expect_signature(
    name: &'static str,
    what: &str,
    actual: &[AbstractValue],
    expected: &[AbstractValue],
) -> Result<(), CoreError> {
    if actual != expected {
        return Err(signature(
            name,
            format!("{what}: expected {}, got {}", list(expected), list(actual)),
        ));
    }
    Ok(())
}

fn list(avals: &[AbstractValue]) -> String {
    let parts: Vec<String> = avals.iter().map(ToString::to_string).collect();
    format!("({})", parts.join(", "))
}

fn shape_mismatch(name: &'static str, expected: &Shape, actual: &Shape) -> CoreError {
    CoreError::ShapeMismatch {
        primitive: name,
        expected: expected.clone(),
        actual: actual.clone(),
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidParams {
        primitive: name,
        reason: reason.into(),
    }
}

fn signature(name: &'static str, reason: impl Into<String>) -> CoreError {
    CoreError::SignatureMismatch {
        primitive: name,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64s(dims: &[usize]) -> AbstractValue {
        AbstractValue::new(DType::F64, Shape::new(dims))
    }

    fn i64s(dims: &[usize]) -> AbstractValue {
        AbstractValue::new(DType::I64, Shape::new(dims))
    }

    #[test]
    fn binary_broadcasts_scalars() {
        let out = abstract_eval(&Primitive::Binary(BinaryOp::Mul), &[f64s(&[2, 3]), f64s(&[])]).unwrap();
        assert_eq!(out, vec![f64s(&[2, 3])]);
    }

    #[test]
    fn binary_rejects_mixed_dtypes() {
        let err = abstract_eval(&Primitive::Binary(BinaryOp::Add), &[f64s(&[]), i64s(&[])]).unwrap_err();
        assert!(matches!(err, CoreError::DTypeMismatch { primitive: "add", .. }));
    }

    #[test]
    fn float_only_unary_rejects_ints() {
        let err = abstract_eval(&Primitive::Unary(UnaryOp::Log), &[i64s(&[3])]).unwrap_err();
        assert!(matches!(err, CoreError::UnsupportedDType { primitive: "log", .. }));
    }

    #[test]
    fn reduce_drops_axes() {
        let prim = Primitive::Reduce { op: ReduceOp::Sum, axes: vec![0, 2] };
        assert_eq!(abstract_eval(&prim, &[f64s(&[2, 3, 4])]).unwrap(), vec![f64s(&[3])]);
    }

    #[test]
    fn gather_scalar_index_into_vector() {
        let prim = Primitive::Gather {
            dimension_numbers: GatherDimensionNumbers {
                offset_dims: vec![],
                collapsed_slice_dims: vec![0],
                start_index_map: vec![0],
            },
            slice_sizes: vec![1],
        };
        assert_eq!(abstract_eval(&prim, &[f64s(&[5]), i64s(&[1])]).unwrap(), vec![f64s(&[])]);
        assert_eq!(abstract_eval(&prim, &[f64s(&[5]), i64s(&[4, 1])]).unwrap(), vec![f64s(&[4])]);
    }

    #[test]
    fn gather_row_windows() {
        let prim = Primitive::Gather {
            dimension_numbers: GatherDimensionNumbers {
                offset_dims: vec![1],
                collapsed_slice_dims: vec![0],
                start_index_map: vec![0],
            },
            slice_sizes: vec![1, 3],
        };
        assert_eq!(abstract_eval(&prim, &[f64s(&[4, 3]), i64s(&[2, 1])]).unwrap(), vec![f64s(&[2, 3])]);
    }

    #[test]
    fn scatter_checks_update_shape() {
        let prim = Primitive::Scatter {
            kind: ScatterKind::Add,
            dimension_numbers: ScatterDimensionNumbers {
                update_window_dims: vec![],
                inserted_window_dims: vec![0],
                scatter_dims_to_operand_dims: vec![0],
            },
        };
        let ok = abstract_eval(&prim, &[f64s(&[5]), i64s(&[2, 1]), f64s(&[2])]).unwrap();
        assert_eq!(ok, vec![f64s(&[5])]);
        assert!(abstract_eval(&prim, &[f64s(&[5]), i64s(&[2, 1]), f64s(&[3])]).is_err());
    }

    #[test]
    fn dot_shapes() {
        assert_eq!(abstract_eval(&Primitive::Dot, &[f64s(&[3]), f64s(&[3])]).unwrap(), vec![f64s(&[])]);
        assert_eq!(abstract_eval(&Primitive::Dot, &[f64s(&[2, 3]), f64s(&[3, 4])]).unwrap(), vec![f64s(&[2, 4])]);
        assert!(abstract_eval(&Primitive::Dot, &[f64s(&[2, 3]), f64s(&[2])]).is_err());
    }

    #[test]
    fn slice_and_concatenate() {
        let slice = Primitive::Slice { start_indices: vec![1], limit_indices: vec![4] };
        assert_eq!(abstract_eval(&slice, &[f64s(&[5])]).unwrap(), vec![f64s(&[3])]);
        let concat = Primitive::Concatenate { dimension: 0 };
        assert_eq!(abstract_eval(&concat, &[f64s(&[2]), f64s(&[3])]).unwrap(), vec![f64s(&[5])]);
    }

    #[test]
    fn assert_has_no_outputs() {
        let prim = Primitive::Assert { messages: Default::default() };
        let out = abstract_eval(&prim, &[AbstractValue::scalar(DType::Bool), i64s(&[])]).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn transpose_rejects_non_permutation() {
        let prim = Primitive::Transpose { permutation: vec![0, 0] };
        assert!(abstract_eval(&prim, &[f64s(&[2, 2])]).is_err());
    }
}
