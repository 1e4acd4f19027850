//! Gather and scatter with XLA dimension numbers.
//!
//! The index vector always lives in the last dimension of the index
//! operand. Gather clamps every start index into `[0, dim - slice_size]`,
//! so it always reads in bounds. Scatter drops any update window whose
//! start would place part of it outside the operand.

use smallvec::SmallVec;

use crate::array::{Array, ArrayData, Scalar};
use crate::error::CoreError;
use crate::ops::{GatherDimensionNumbers, ScatterDimensionNumbers, ScatterKind};
use crate::types::{AbstractValue, Shape};

/// Reads the index vector at batch position `batch` of `indices`.
fn index_vector(indices: &Array, batch: &[usize]) -> SmallVec<[i64; 4]> {
    let dims = indices.shape().dims();
    let len = dims.last().copied().unwrap_or(0);
    let mut at: SmallVec<[usize; 4]> = SmallVec::from_slice(batch);
    at.push(0);
    (0..len)
        .map(|k| {
            let last = at.len() - 1;
            at[last] = k;
            indices.at(&at).as_i64()
        })
        .collect()
}

pub(crate) fn gather(
    operand: &Array,
    indices: &Array,
    dnums: &GatherDimensionNumbers,
    slice_sizes: &[usize],
    out: &AbstractValue,
) -> Result<Array, CoreError> {
    let operand_dims = operand.shape().dims();
    let window_axes: SmallVec<[usize; 4]> = (0..operand_dims.len())
        .filter(|axis| !dnums.collapsed_slice_dims.contains(axis))
        .collect();
    let out_shape = &out.shape;

    let offsets: Vec<usize> = (0..out_shape.numel())
        .map(|flat| {
            let out_index = out_shape.unravel(flat);
            let mut batch: SmallVec<[usize; 4]> = SmallVec::new();
            let mut window: SmallVec<[usize; 4]> = SmallVec::new();
            for (axis, &i) in out_index.iter().enumerate() {
                if dnums.offset_dims.contains(&axis) {
                    window.push(i);
                } else {
                    batch.push(i);
                }
            }

            let starts = index_vector(indices, &batch);
            let mut operand_index: SmallVec<[usize; 4]> = SmallVec::from_elem(0, operand_dims.len());
            for (k, &axis) in dnums.start_index_map.iter().enumerate() {
                let max_start = (operand_dims[axis] - slice_sizes[axis]) as i64;
                operand_index[axis] = starts[k].clamp(0, max_start) as usize;
            }
            for (&axis, &offset) in window_axes.iter().zip(&window) {
                operand_index[axis] += offset;
            }
            operand.shape().flat_index(&operand_index)
        })
        .collect();

    operand.take(out_shape.clone(), &offsets)
}

/// Slice size of every operand axis implied by a scatter's update window.
pub fn scatter_window_sizes(
    operand: &Shape,
    updates: &Shape,
    dnums: &ScatterDimensionNumbers,
) -> Vec<usize> {
    let mut sizes = vec![1; operand.rank()];
    let window_axes = (0..operand.rank()).filter(|axis| !dnums.inserted_window_dims.contains(axis));
    for (axis, &update_axis) in window_axes.zip(&dnums.update_window_dims) {
        if let Some(&size) = updates.dims().get(update_axis) {
            sizes[axis] = size;
        }
    }
    sizes
}

fn combine(kind: ScatterKind, old: Scalar, new: Scalar) -> Scalar {
    match (kind, old, new) {
        (ScatterKind::Replace, _, _) => new,
        (ScatterKind::Add, Scalar::F64(a), Scalar::F64(b)) => Scalar::F64(a + b),
        (ScatterKind::Add, Scalar::I64(a), Scalar::I64(b)) => Scalar::I64(a.wrapping_add(b)),
        (ScatterKind::Mul, Scalar::F64(a), Scalar::F64(b)) => Scalar::F64(a * b),
        (ScatterKind::Mul, Scalar::I64(a), Scalar::I64(b)) => Scalar::I64(a.wrapping_mul(b)),
        (ScatterKind::Min, Scalar::F64(a), Scalar::F64(b)) => {
            Scalar::F64(if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) })
        }
        (ScatterKind::Min, Scalar::I64(a), Scalar::I64(b)) => Scalar::I64(a.min(b)),
        (ScatterKind::Max, Scalar::F64(a), Scalar::F64(b)) => {
            Scalar::F64(if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) })
        }
        (ScatterKind::Max, Scalar::I64(a), Scalar::I64(b)) => Scalar::I64(a.max(b)),
        _ => new,
    }
}

pub(crate) fn scatter(
    kind: ScatterKind,
    operand: &Array,
    indices: &Array,
    updates: &Array,
    dnums: &ScatterDimensionNumbers,
) -> Result<Array, CoreError> {
    let operand_shape = operand.shape();
    let operand_dims = operand_shape.dims();
    let sizes = scatter_window_sizes(operand_shape, updates.shape(), dnums);
    let window_axes: SmallVec<[usize; 4]> = (0..operand_dims.len())
        .filter(|axis| !dnums.inserted_window_dims.contains(axis))
        .collect();
    let mut values: Vec<Scalar> = operand.scalars().collect();

    for flat in 0..updates.len() {
        let update_index = updates.shape().unravel(flat);
        let mut batch: SmallVec<[usize; 4]> = SmallVec::new();
        let mut window: SmallVec<[usize; 4]> = SmallVec::new();
        for (axis, &i) in update_index.iter().enumerate() {
            if dnums.update_window_dims.contains(&axis) {
                window.push(i);
            } else {
                batch.push(i);
            }
        }

        let starts = index_vector(indices, &batch);
        let mut start: SmallVec<[i64; 4]> = SmallVec::from_elem(0, operand_dims.len());
        for (k, &axis) in dnums.scatter_dims_to_operand_dims.iter().enumerate() {
            start[axis] = starts[k];
        }
        let in_bounds = start
            .iter()
            .zip(operand_dims)
            .zip(&sizes)
            .all(|((&s, &dim), &size)| s >= 0 && s <= dim as i64 - size as i64);
        if !in_bounds {
            continue;
        }

        let mut operand_index: SmallVec<[usize; 4]> = start.iter().map(|&s| s as usize).collect();
        for (&axis, &offset) in window_axes.iter().zip(&window) {
            operand_index[axis] += offset;
        }
        let slot = operand_shape.flat_index(&operand_index);
        values[slot] = combine(kind, values[slot], updates.get(flat));
    }

    Array::new(
        operand_shape.clone(),
        ArrayData::from_scalars(operand.dtype(), values),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Primitive;
    use crate::shape_rules::abstract_eval;

    fn point_gather() -> (GatherDimensionNumbers, Vec<usize>) {
        (
            GatherDimensionNumbers {
                offset_dims: vec![],
                collapsed_slice_dims: vec![0],
                start_index_map: vec![0],
            },
            vec![1],
        )
    }

    fn gather_out(operand: &Array, indices: &Array) -> Array {
        let (dnums, sizes) = point_gather();
        let prim = Primitive::Gather {
            dimension_numbers: dnums.clone(),
            slice_sizes: sizes.clone(),
        };
        let out = abstract_eval(&prim, &[operand.aval(), indices.aval()]).unwrap();
        gather(operand, indices, &dnums, &sizes, &out[0]).unwrap()
    }

    #[test]
    fn gather_reads_points() {
        let x = Array::vector_f64(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let idx = Array::from_i64(&[2, 1], vec![3, 0]).unwrap();
        assert_eq!(gather_out(&x, &idx), Array::vector_f64(&[13.0, 10.0]));
    }

    #[test]
    fn gather_clamps_out_of_range() {
        let x = Array::vector_f64(&[10.0, 11.0, 12.0, 13.0, 14.0]);
        let idx = Array::from_i64(&[2, 1], vec![10, -4]).unwrap();
        assert_eq!(gather_out(&x, &idx), Array::vector_f64(&[14.0, 10.0]));
    }

    #[test]
    fn gather_row_window() {
        let m = Array::from_i64(&[3, 2], vec![0, 1, 2, 3, 4, 5]).unwrap();
        let idx = Array::vector_i64(&[2]);
        let dnums = GatherDimensionNumbers {
            offset_dims: vec![0],
            collapsed_slice_dims: vec![0],
            start_index_map: vec![0],
        };
        let out = AbstractValue::new(m.dtype(), Shape::vector(2));
        let row = gather(&m, &idx, &dnums, &[1, 2], &out).unwrap();
        assert_eq!(row, Array::vector_i64(&[4, 5]));
    }

    fn point_scatter() -> ScatterDimensionNumbers {
        ScatterDimensionNumbers {
            update_window_dims: vec![],
            inserted_window_dims: vec![0],
            scatter_dims_to_operand_dims: vec![0],
        }
    }

    #[test]
    fn scatter_add_accumulates_duplicates() {
        let x = Array::vector_i64(&[0, 0, 0]);
        let idx = Array::from_i64(&[3, 1], vec![1, 1, 2]).unwrap();
        let upd = Array::vector_i64(&[5, 6, 7]);
        let out = scatter(ScatterKind::Add, &x, &idx, &upd, &point_scatter()).unwrap();
        assert_eq!(out, Array::vector_i64(&[0, 11, 7]));
    }

    #[test]
    fn scatter_drops_out_of_bounds_windows() {
        let x = Array::vector_i64(&[1, 2, 3]);
        let idx = Array::from_i64(&[4, 1], vec![3, -1, i64::MAX, i64::MIN]).unwrap();
        let upd = Array::vector_i64(&[9, 9, 9, 9]);
        let out = scatter(ScatterKind::Replace, &x, &idx, &upd, &point_scatter()).unwrap();
        assert_eq!(out, x);
    }

    #[test]
    fn window_sizes_follow_update_dims() {
        let dnums = ScatterDimensionNumbers {
            update_window_dims: vec![1],
            inserted_window_dims: vec![0],
            scatter_dims_to_operand_dims: vec![0],
        };
        let sizes = scatter_window_sizes(&Shape::new(&[4, 3]), &Shape::new(&[2, 3]), &dnums);
        assert_eq!(sizes, vec![1, 3]);
    }
}
