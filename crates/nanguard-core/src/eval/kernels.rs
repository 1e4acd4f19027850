//! Reference kernels for elementwise, reduction, and structural primitives.
//!
//! Every kernel is total on well-typed operands: integer division and
//! remainder by zero, out-of-range shifts, and overflow all produce defined
//! values instead of panicking. Shape rules have already run by the time a
//! kernel is called, so `out` always holds the result types.

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::array::{Array, ArrayData, Scalar};
use crate::error::CoreError;
use crate::ops::{BinaryOp, CmpOp, CumulativeOp, Primitive, ReduceOp, UnaryOp};
use crate::types::{AbstractValue, DType, Shape};

pub(crate) fn apply(
    primitive: &Primitive,
    inputs: &[Array],
    out: &[AbstractValue],
) -> Result<Vec<Array>, CoreError> {
    let single = |array: Array| Ok(vec![array]);
    match primitive {
        Primitive::Unary(op) => single(unary(*op, &inputs[0])?),
        Primitive::Binary(op) => single(binary(*op, &inputs[0], &inputs[1], &out[0])?),
        Primitive::Compare(op) => single(compare(*op, &inputs[0], &inputs[1], &out[0])?),
        Primitive::Select => {
            let (pred, on_true, on_false) = (&inputs[0], &inputs[1], &inputs[2]);
            let scalars = (0..out[0].shape.numel()).map(|i| {
                let take_true = matches!(pred.get(bcast(pred, i)), Scalar::Bool(true));
                if take_true {
                    on_true.get(bcast(on_true, i))
                } else {
                    on_false.get(bcast(on_false, i))
                }
            });
            single(from_scalars(&out[0], scalars)?)
        }
        Primitive::Clamp => {
            let (lo, x, hi) = (&inputs[0], &inputs[1], &inputs[2]);
            let scalars = (0..x.len()).map(|i| {
                let v = x.get(i);
                let v = if cmp_scalar(v, lo.get(bcast(lo, i))) == Ordering::Less {
                    lo.get(bcast(lo, i))
                } else {
                    v
                };
                if cmp_scalar(v, hi.get(bcast(hi, i))) == Ordering::Greater {
                    hi.get(bcast(hi, i))
                } else {
                    v
                }
            });
            single(from_scalars(&out[0], scalars)?)
        }
        Primitive::Reduce { op, axes } => single(reduce(*op, &inputs[0], axes, &out[0])?),
        Primitive::Cumulative { op, axis, reverse } => {
            single(cumulative(*op, &inputs[0], *axis, *reverse)?)
        }
        Primitive::ConvertElementType { dtype } => {
            let data = ArrayData::from_scalars(*dtype, inputs[0].scalars());
            single(Array::new(inputs[0].shape().clone(), data)?)
        }
        Primitive::BroadcastInDim {
            shape,
            broadcast_dimensions,
        } => {
            let operand = &inputs[0];
            let in_dims = operand.shape().dims();
            let offsets = offsets_for(shape, |out_index| {
                let index: SmallVec<[usize; 4]> = in_dims
                    .iter()
                    .zip(broadcast_dimensions)
                    .map(|(&dim, &axis)| if dim == 1 { 0 } else { out_index[axis] })
                    .collect();
                operand.shape().flat_index(&index)
            });
            single(operand.take(shape.clone(), &offsets)?)
        }
        Primitive::Reshape { new_sizes } => single(inputs[0].reshape(new_sizes.clone())?),
        Primitive::Transpose { permutation } => {
            let operand = &inputs[0];
            let offsets = offsets_for(&out[0].shape, |out_index| {
                let mut index: SmallVec<[usize; 4]> = SmallVec::from_elem(0, permutation.len());
                for (k, &axis) in permutation.iter().enumerate() {
                    index[axis] = out_index[k];
                }
                operand.shape().flat_index(&index)
            });
            single(operand.take(out[0].shape.clone(), &offsets)?)
        }
        Primitive::Rev { dimensions } => {
            let operand = &inputs[0];
            let dims = operand.shape().dims();
            let offsets = offsets_for(operand.shape(), |out_index| {
                let mut index: SmallVec<[usize; 4]> = SmallVec::from_slice(out_index);
                for &axis in dimensions {
                    index[axis] = dims[axis] - 1 - index[axis];
                }
                operand.shape().flat_index(&index)
            });
            single(operand.take(operand.shape().clone(), &offsets)?)
        }
        Primitive::Slice { start_indices, .. } => {
            let operand = &inputs[0];
            let offsets = offsets_for(&out[0].shape, |out_index| {
                let index: SmallVec<[usize; 4]> = out_index
                    .iter()
                    .zip(start_indices)
                    .map(|(i, s)| i + s)
                    .collect();
                operand.shape().flat_index(&index)
            });
            single(operand.take(out[0].shape.clone(), &offsets)?)
        }
        Primitive::Concatenate { dimension } => {
            let shape = &out[0].shape;
            let scalars = (0..shape.numel()).map(|flat| {
                let mut index = shape.unravel(flat);
                let mut part = 0;
                while index[*dimension] >= inputs[part].shape().dims()[*dimension] {
                    index[*dimension] -= inputs[part].shape().dims()[*dimension];
                    part += 1;
                }
                inputs[part].at(&index)
            });
            single(from_scalars(&out[0], scalars)?)
        }
        Primitive::Iota { dtype, size } => {
            let data = ArrayData::from_scalars(*dtype, (0..*size).map(|i| Scalar::I64(i as i64)));
            single(Array::new(Shape::vector(*size), data)?)
        }
        Primitive::Dot => single(dot(&inputs[0], &inputs[1], &out[0])?),
        Primitive::Sort {
            dimension,
            num_keys,
        } => sort(inputs, *dimension, *num_keys),
        _ => Err(CoreError::InvalidParams {
            primitive: primitive.name(),
            reason: "not an elementwise or structural primitive".to_string(),
        }),
    }
}

/// Flat offset into an operand that is either rank 0 or full-shaped.
fn bcast(array: &Array, i: usize) -> usize {
    if array.shape().is_scalar() {
        0
    } else {
        i
    }
}

fn from_scalars(
    aval: &AbstractValue,
    scalars: impl IntoIterator<Item = Scalar>,
) -> Result<Array, CoreError> {
    Array::new(aval.shape.clone(), ArrayData::from_scalars(aval.dtype, scalars))
}

/// Computes, for every output position of `shape`, the source offset chosen by `f`.
fn offsets_for(shape: &Shape, f: impl Fn(&[usize]) -> usize) -> Vec<usize> {
    (0..shape.numel()).map(|flat| f(&shape.unravel(flat))).collect()
}

/// Total order used by sort and clamp. NaN sorts after every number.
pub(crate) fn cmp_scalar(a: Scalar, b: Scalar) -> Ordering {
    match (a, b) {
        (Scalar::F64(x), Scalar::F64(y)) => match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        },
        (Scalar::I64(x), Scalar::I64(y)) => x.cmp(&y),
        (Scalar::Bool(x), Scalar::Bool(y)) => x.cmp(&y),
        _ => a.as_i64().cmp(&b.as_i64()),
    }
}

fn map_f64(x: &[f64], f: impl Fn(f64) -> f64) -> ArrayData {
    ArrayData::F64(x.iter().map(|&v| f(v)).collect())
}

fn unary(op: UnaryOp, x: &Array) -> Result<Array, CoreError> {
    let data = match x.data() {
        ArrayData::F64(v) => match op {
            UnaryOp::Neg => map_f64(v, |a| -a),
            UnaryOp::Abs => map_f64(v, f64::abs),
            UnaryOp::Sign => map_f64(v, |a| if a == 0.0 || a.is_nan() { a } else { a.signum() }),
            UnaryOp::Floor => map_f64(v, f64::floor),
            UnaryOp::Ceil => map_f64(v, f64::ceil),
            UnaryOp::Round => map_f64(v, f64::round),
            UnaryOp::Exp => map_f64(v, f64::exp),
            UnaryOp::Expm1 => map_f64(v, f64::exp_m1),
            UnaryOp::Log => map_f64(v, f64::ln),
            UnaryOp::Log1p => map_f64(v, f64::ln_1p),
            UnaryOp::Sqrt => map_f64(v, f64::sqrt),
            UnaryOp::Rsqrt => map_f64(v, |a| 1.0 / a.sqrt()),
            UnaryOp::Sin => map_f64(v, f64::sin),
            UnaryOp::Cos => map_f64(v, f64::cos),
            UnaryOp::Tan => map_f64(v, f64::tan),
            UnaryOp::Tanh => map_f64(v, f64::tanh),
            UnaryOp::Sinh => map_f64(v, f64::sinh),
            UnaryOp::Cosh => map_f64(v, f64::cosh),
            UnaryOp::Asinh => map_f64(v, f64::asinh),
            UnaryOp::Acosh => map_f64(v, f64::acosh),
            UnaryOp::Atanh => map_f64(v, f64::atanh),
            UnaryOp::Not => return Err(unsupported(op.name(), DType::F64)),
        },
        ArrayData::I64(v) => {
            let f: fn(i64) -> i64 = match op {
                UnaryOp::Neg => i64::wrapping_neg,
                UnaryOp::Abs => i64::wrapping_abs,
                UnaryOp::Sign => i64::signum,
                UnaryOp::Not => |a| !a,
                _ => return Err(unsupported(op.name(), DType::I64)),
            };
            ArrayData::I64(v.iter().map(|&a| f(a)).collect())
        }
        ArrayData::Bool(v) => match op {
            UnaryOp::Not => ArrayData::Bool(v.iter().map(|&a| !a).collect()),
            _ => return Err(unsupported(op.name(), DType::Bool)),
        },
    };
    Array::new(x.shape().clone(), data)
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn int_div(a: i64, b: i64) -> i64 {
    if b == 0 {
        -1
    } else {
        a.wrapping_div(b)
    }
}

fn int_rem(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        a.wrapping_rem(b)
    }
}

fn int_pow(a: i64, b: i64) -> i64 {
    if b < 0 {
        return match a {
            1 => 1,
            -1 if b % 2 == 0 => 1,
            -1 => -1,
            _ => 0,
        };
    }
    a.wrapping_pow(b.min(u32::MAX as i64) as u32)
}

fn shift_left(a: i64, b: i64) -> i64 {
    if (0..64).contains(&b) {
        a << b
    } else {
        0
    }
}

fn shift_right_arithmetic(a: i64, b: i64) -> i64 {
    if (0..64).contains(&b) {
        a >> b
    } else if a < 0 {
        -1
    } else {
        0
    }
}

fn shift_right_logical(a: i64, b: i64) -> i64 {
    if (0..64).contains(&b) {
        ((a as u64) >> b) as i64
    } else {
        0
    }
}

fn zip_with<T: Copy, U>(a: &[T], b: &[T], n: usize, f: impl Fn(T, T) -> U) -> Vec<U> {
    let pick = |v: &[T], i: usize| if v.len() == n { v[i] } else { v[0] };
    (0..n).map(|i| f(pick(a, i), pick(b, i))).collect()
}

fn binary(op: BinaryOp, a: &Array, b: &Array, out: &AbstractValue) -> Result<Array, CoreError> {
    let n = out.shape.numel();
    let data = match (a.data(), b.data()) {
        (ArrayData::F64(x), ArrayData::F64(y)) => {
            let f: fn(f64, f64) -> f64 = match op {
                BinaryOp::Add => |p, q| p + q,
                BinaryOp::Sub => |p, q| p - q,
                BinaryOp::Mul => |p, q| p * q,
                BinaryOp::Div => |p, q| p / q,
                BinaryOp::Rem => |p, q| p % q,
                BinaryOp::Pow => f64::powf,
                BinaryOp::Atan2 => f64::atan2,
                BinaryOp::Max => nan_max,
                BinaryOp::Min => nan_min,
                _ => return Err(unsupported(op.name(), DType::F64)),
            };
            ArrayData::F64(zip_with(x, y, n, f))
        }
        (ArrayData::I64(x), ArrayData::I64(y)) => {
            let f: fn(i64, i64) -> i64 = match op {
                BinaryOp::Add => i64::wrapping_add,
                BinaryOp::Sub => i64::wrapping_sub,
                BinaryOp::Mul => i64::wrapping_mul,
                BinaryOp::Div => int_div,
                BinaryOp::Rem => int_rem,
                BinaryOp::Pow => int_pow,
                BinaryOp::Max => |p, q| p.max(q),
                BinaryOp::Min => |p, q| p.min(q),
                BinaryOp::And => |p, q| p & q,
                BinaryOp::Or => |p, q| p | q,
                BinaryOp::Xor => |p, q| p ^ q,
                BinaryOp::ShiftLeft => shift_left,
                BinaryOp::ShiftRightArithmetic => shift_right_arithmetic,
                BinaryOp::ShiftRightLogical => shift_right_logical,
                BinaryOp::Atan2 => return Err(unsupported(op.name(), DType::I64)),
            };
            ArrayData::I64(zip_with(x, y, n, f))
        }
        (ArrayData::Bool(x), ArrayData::Bool(y)) => {
            let f: fn(bool, bool) -> bool = match op {
                BinaryOp::And | BinaryOp::Min => |p, q| p & q,
                BinaryOp::Or | BinaryOp::Max => |p, q| p | q,
                BinaryOp::Xor => |p, q| p ^ q,
                _ => return Err(unsupported(op.name(), DType::Bool)),
            };
            ArrayData::Bool(zip_with(x, y, n, f))
        }
        _ => {
            return Err(CoreError::DTypeMismatch {
                primitive: op.name(),
                expected: a.dtype(),
                actual: b.dtype(),
            })
        }
    };
    Array::new(out.shape.clone(), data)
}

fn compare(op: CmpOp, a: &Array, b: &Array, out: &AbstractValue) -> Result<Array, CoreError> {
    fn test<T: PartialOrd>(op: CmpOp, p: T, q: T) -> bool {
        match op {
            CmpOp::Eq => p == q,
            CmpOp::Ne => p != q,
            CmpOp::Lt => p < q,
            CmpOp::Le => p <= q,
            CmpOp::Gt => p > q,
            CmpOp::Ge => p >= q,
        }
    }
    let n = out.shape.numel();
    let result = match (a.data(), b.data()) {
        (ArrayData::F64(x), ArrayData::F64(y)) => zip_with(x, y, n, |p, q| test(op, p, q)),
        (ArrayData::I64(x), ArrayData::I64(y)) => zip_with(x, y, n, |p, q| test(op, p, q)),
        (ArrayData::Bool(x), ArrayData::Bool(y)) => zip_with(x, y, n, |p, q| test(op, p, q)),
        _ => {
            return Err(CoreError::DTypeMismatch {
                primitive: op.name(),
                expected: a.dtype(),
                actual: b.dtype(),
            })
        }
    };
    Array::new(out.shape.clone(), ArrayData::Bool(result))
}

fn reduce_into<T: Copy>(
    data: &[T],
    shape: &Shape,
    axes: &[usize],
    out: &Shape,
    init: T,
    f: impl Fn(T, T) -> T,
) -> Vec<T> {
    let mut acc = vec![init; out.numel()];
    for (flat, &value) in data.iter().enumerate() {
        let index = shape.unravel(flat);
        let kept: SmallVec<[usize; 4]> = index
            .iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .map(|(_, i)| *i)
            .collect();
        let slot = out.flat_index(&kept);
        acc[slot] = f(acc[slot], value);
    }
    acc
}

fn reduce(op: ReduceOp, x: &Array, axes: &[usize], out: &AbstractValue) -> Result<Array, CoreError> {
    let shape = x.shape();
    let o = &out.shape;
    let data = match x.data() {
        ArrayData::F64(v) => ArrayData::F64(match op {
            ReduceOp::Sum => reduce_into(v, shape, axes, o, 0.0, |p, q| p + q),
            ReduceOp::Prod => reduce_into(v, shape, axes, o, 1.0, |p, q| p * q),
            ReduceOp::Max => reduce_into(v, shape, axes, o, f64::NEG_INFINITY, nan_max),
            ReduceOp::Min => reduce_into(v, shape, axes, o, f64::INFINITY, nan_min),
            _ => return Err(unsupported(op.name(), DType::F64)),
        }),
        ArrayData::I64(v) => ArrayData::I64(match op {
            ReduceOp::Sum => reduce_into(v, shape, axes, o, 0, i64::wrapping_add),
            ReduceOp::Prod => reduce_into(v, shape, axes, o, 1, i64::wrapping_mul),
            ReduceOp::Max => reduce_into(v, shape, axes, o, i64::MIN, |p, q| p.max(q)),
            ReduceOp::Min => reduce_into(v, shape, axes, o, i64::MAX, |p, q| p.min(q)),
            _ => return Err(unsupported(op.name(), DType::I64)),
        }),
        ArrayData::Bool(v) => ArrayData::Bool(match op {
            ReduceOp::And => reduce_into(v, shape, axes, o, true, |p, q| p & q),
            ReduceOp::Or => reduce_into(v, shape, axes, o, false, |p, q| p | q),
            _ => return Err(unsupported(op.name(), DType::Bool)),
        }),
    };
    Array::new(out.shape.clone(), data)
}

fn scan_axis<T: Copy>(data: &[T], shape: &Shape, axis: usize, reverse: bool, f: impl Fn(T, T) -> T) -> Vec<T> {
    let mut out = data.to_vec();
    let len = shape.dims()[axis];
    let stride = shape.strides()[axis];
    for flat in 0..data.len() {
        if shape.unravel(flat)[axis] != 0 {
            continue;
        }
        let mut acc: Option<T> = None;
        for k in 0..len {
            let pos = if reverse { len - 1 - k } else { k };
            let offset = flat + pos * stride;
            let value = match acc {
                None => data[offset],
                Some(prev) => f(prev, data[offset]),
            };
            acc = Some(value);
            out[offset] = value;
        }
    }
    out
}

fn cumulative(op: CumulativeOp, x: &Array, axis: usize, reverse: bool) -> Result<Array, CoreError> {
    let shape = x.shape();
    let data = match x.data() {
        ArrayData::F64(v) => ArrayData::F64(match op {
            CumulativeOp::Sum => scan_axis(v, shape, axis, reverse, |p, q| p + q),
            CumulativeOp::Prod => scan_axis(v, shape, axis, reverse, |p, q| p * q),
            CumulativeOp::Max => scan_axis(v, shape, axis, reverse, nan_max),
            CumulativeOp::Min => scan_axis(v, shape, axis, reverse, nan_min),
        }),
        ArrayData::I64(v) => ArrayData::I64(match op {
            CumulativeOp::Sum => scan_axis(v, shape, axis, reverse, i64::wrapping_add),
            CumulativeOp::Prod => scan_axis(v, shape, axis, reverse, i64::wrapping_mul),
            CumulativeOp::Max => scan_axis(v, shape, axis, reverse, |p, q| p.max(q)),
            CumulativeOp::Min => scan_axis(v, shape, axis, reverse, |p, q| p.min(q)),
        }),
        ArrayData::Bool(_) => return Err(unsupported(op.name(), DType::Bool)),
    };
    Array::new(shape.clone(), data)
}

fn dot(a: &Array, b: &Array, out: &AbstractValue) -> Result<Array, CoreError> {
    fn matmul<T: Copy>(
        x: &[T],
        y: &[T],
        (m, k, n): (usize, usize, usize),
        zero: T,
        add: fn(T, T) -> T,
        mul: fn(T, T) -> T,
    ) -> Vec<T> {
        let mut out = vec![zero; m * n];
        for i in 0..m {
            for j in 0..n {
                let mut acc = zero;
                for l in 0..k {
                    acc = add(acc, mul(x[i * k + l], y[l * n + j]));
                }
                out[i * n + j] = acc;
            }
        }
        out
    }

    let (m, k) = match a.shape().dims() {
        [k] => (1, *k),
        [m, k] => (*m, *k),
        _ => return Err(shape_error("dot", a.shape(), b.shape())),
    };
    let n = match b.shape().dims() {
        [_] => 1,
        [_, n] => *n,
        _ => return Err(shape_error("dot", a.shape(), b.shape())),
    };
    let data = match (a.data(), b.data()) {
        (ArrayData::F64(x), ArrayData::F64(y)) => {
            ArrayData::F64(matmul(x, y, (m, k, n), 0.0, |p, q| p + q, |p, q| p * q))
        }
        (ArrayData::I64(x), ArrayData::I64(y)) => ArrayData::I64(matmul(
            x,
            y,
            (m, k, n),
            0,
            i64::wrapping_add,
            i64::wrapping_mul,
        )),
        _ => return Err(unsupported("dot", a.dtype())),
    };
    Array::new(out.shape.clone(), data)
}

fn sort(inputs: &[Array], dimension: usize, num_keys: usize) -> Result<Vec<Array>, CoreError> {
    let shape = inputs[0].shape();
    let len = shape.dims()[dimension];
    let stride = shape.strides()[dimension];
    let mut offsets: Vec<usize> = (0..shape.numel()).collect();
    for flat in 0..shape.numel() {
        if shape.unravel(flat)[dimension] != 0 {
            continue;
        }
        let mut line: Vec<usize> = (0..len).map(|k| flat + k * stride).collect();
        line.sort_by(|&p, &q| {
            inputs[..num_keys]
                .iter()
                .map(|key| cmp_scalar(key.get(p), key.get(q)))
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        for (k, source) in line.into_iter().enumerate() {
            offsets[flat + k * stride] = source;
        }
    }
    inputs
        .iter()
        .map(|operand| operand.take(shape.clone(), &offsets))
        .collect()
}

fn unsupported(primitive: &'static str, dtype: DType) -> CoreError {
    CoreError::UnsupportedDType { primitive, dtype }
}

fn shape_error(primitive: &'static str, expected: &Shape, actual: &Shape) -> CoreError {
    CoreError::ShapeMismatch {
        primitive,
        expected: expected.clone(),
        actual: actual.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape_rules::abstract_eval;

    fn run(prim: Primitive, inputs: &[Array]) -> Vec<Array> {
        let avals: Vec<_> = inputs.iter().map(Array::aval).collect();
        let out = abstract_eval(&prim, &avals).unwrap();
        apply(&prim, inputs, &out).unwrap()
    }

    fn run1(prim: Primitive, inputs: &[Array]) -> Array {
        run(prim, inputs).remove(0)
    }

    #[test]
    fn float_division_is_ieee() {
        let out = run1(
            Primitive::Binary(BinaryOp::Div),
            &[Array::scalar_f64(1.0), Array::vector_f64(&[0.0, 2.0])],
        );
        assert_eq!(out.as_f64_slice().unwrap(), &[f64::INFINITY, 0.5]);
    }

    #[test]
    fn integer_division_by_zero_does_not_panic() {
        let out = run1(
            Primitive::Binary(BinaryOp::Div),
            &[Array::vector_i64(&[7, 7]), Array::vector_i64(&[0, 2])],
        );
        assert_eq!(out.as_i64_slice().unwrap(), &[-1, 3]);
        let rem = run1(
            Primitive::Binary(BinaryOp::Rem),
            &[Array::vector_i64(&[7]), Array::vector_i64(&[0])],
        );
        assert_eq!(rem.as_i64_slice().unwrap(), &[7]);
    }

    #[test]
    fn max_propagates_nan() {
        let out = run1(
            Primitive::Binary(BinaryOp::Max),
            &[Array::vector_f64(&[f64::NAN, 1.0]), Array::vector_f64(&[0.0, 2.0])],
        );
        let v = out.as_f64_slice().unwrap();
        assert!(v[0].is_nan());
        assert_eq!(v[1], 2.0);
    }

    #[test]
    fn reduce_over_rows() {
        let m = Array::from_f64(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let out = run1(Primitive::Reduce { op: ReduceOp::Sum, axes: vec![1] }, &[m]);
        assert_eq!(out, Array::vector_f64(&[6.0, 15.0]));
    }

    #[test]
    fn cumulative_reverse() {
        let x = Array::vector_i64(&[1, 2, 3]);
        let fwd = run1(Primitive::Cumulative { op: CumulativeOp::Sum, axis: 0, reverse: false }, &[x.clone()]);
        let rev = run1(Primitive::Cumulative { op: CumulativeOp::Sum, axis: 0, reverse: true }, &[x]);
        assert_eq!(fwd, Array::vector_i64(&[1, 3, 6]));
        assert_eq!(rev, Array::vector_i64(&[6, 5, 3]));
    }

    #[test]
    fn broadcast_transpose_slice() {
        let v = Array::vector_i64(&[1, 2]);
        let b = run1(
            Primitive::BroadcastInDim { shape: Shape::new(&[3, 2]), broadcast_dimensions: vec![1] },
            &[v],
        );
        assert_eq!(b, Array::from_i64(&[3, 2], vec![1, 2, 1, 2, 1, 2]).unwrap());
        let t = run1(Primitive::Transpose { permutation: vec![1, 0] }, &[b]);
        assert_eq!(t, Array::from_i64(&[2, 3], vec![1, 1, 1, 2, 2, 2]).unwrap());
        let s = run1(Primitive::Slice { start_indices: vec![1, 1], limit_indices: vec![2, 3] }, &[t]);
        assert_eq!(s, Array::from_i64(&[1, 2], vec![2, 2]).unwrap());
    }

    #[test]
    fn concatenate_and_rev() {
        let c = run1(
            Primitive::Concatenate { dimension: 0 },
            &[Array::vector_i64(&[1]), Array::vector_i64(&[2, 3])],
        );
        assert_eq!(c, Array::vector_i64(&[1, 2, 3]));
        let r = run1(Primitive::Rev { dimensions: vec![0] }, &[c]);
        assert_eq!(r, Array::vector_i64(&[3, 2, 1]));
    }

    #[test]
    fn dot_matrix_vector() {
        let m = Array::from_i64(&[2, 2], vec![1, 2, 3, 4]).unwrap();
        let out = run1(Primitive::Dot, &[m, Array::vector_i64(&[1, 1])]);
        assert_eq!(out, Array::vector_i64(&[3, 7]));
    }

    #[test]
    fn sort_is_stable_and_carries_values() {
        let keys = Array::vector_bool(&[true, false, true, false]);
        let vals = Array::vector_i64(&[10, 20, 30, 40]);
        let out = run(Primitive::Sort { dimension: 0, num_keys: 1 }, &[keys, vals]);
        assert_eq!(out[0], Array::vector_bool(&[false, false, true, true]));
        assert_eq!(out[1], Array::vector_i64(&[20, 40, 10, 30]));
    }

    #[test]
    fn select_and_clamp() {
        let s = run1(
            Primitive::Select,
            &[Array::vector_bool(&[true, false]), Array::scalar_f64(1.0), Array::vector_f64(&[5.0, 6.0])],
        );
        assert_eq!(s, Array::vector_f64(&[1.0, 6.0]));
        let c = run1(
            Primitive::Clamp,
            &[Array::scalar_i64(0), Array::vector_i64(&[-3, 2, 9]), Array::scalar_i64(4)],
        );
        assert_eq!(c, Array::vector_i64(&[0, 2, 4]));
    }
}
