//! Dense, row-major arrays: the runtime values of the evaluator.
//!
//! [`Array`] pairs a [`Shape`] with flat, dtype-tagged storage
//! ([`ArrayData`]). [`Scalar`] is the element-level view used by the
//! indexing kernels that move elements without caring about their dtype.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{AbstractValue, DType, Shape};

/// A single element of any dtype.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Bool(bool),
    I64(i64),
    F64(f64),
}

impl Scalar {
    pub fn dtype(self) -> DType {
        match self {
            Scalar::Bool(_) => DType::Bool,
            Scalar::I64(_) => DType::I64,
            Scalar::F64(_) => DType::F64,
        }
    }

    /// Converts to `dtype` with `convert_element_type` semantics: floats
    /// truncate toward zero (NaN becomes 0), non-zero values become `true`.
    pub fn cast(self, dtype: DType) -> Scalar {
        match (self, dtype) {
            (Scalar::Bool(b), DType::Bool) => Scalar::Bool(b),
            (Scalar::Bool(b), DType::I64) => Scalar::I64(b as i64),
            (Scalar::Bool(b), DType::F64) => Scalar::F64(if b { 1.0 } else { 0.0 }),
            (Scalar::I64(v), DType::Bool) => Scalar::Bool(v != 0),
            (Scalar::I64(v), DType::I64) => Scalar::I64(v),
            (Scalar::I64(v), DType::F64) => Scalar::F64(v as f64),
            (Scalar::F64(v), DType::Bool) => Scalar::Bool(v != 0.0),
            (Scalar::F64(v), DType::I64) => Scalar::I64(v as i64),
            (Scalar::F64(v), DType::F64) => Scalar::F64(v),
        }
    }

    /// Integer view used for index operands.
    pub fn as_i64(self) -> i64 {
        match self.cast(DType::I64) {
            Scalar::I64(v) => v,
            _ => 0,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v:?}"),
        }
    }
}

/// Flat element storage, tagged by dtype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Bool(Vec<bool>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl ArrayData {
    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::I64(_) => DType::I64,
            ArrayData::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, flat: usize) -> Scalar {
        match self {
            ArrayData::Bool(v) => Scalar::Bool(v[flat]),
            ArrayData::I64(v) => Scalar::I64(v[flat]),
            ArrayData::F64(v) => Scalar::F64(v[flat]),
        }
    }

    /// Gathers the elements at the given flat offsets.
    pub fn take(&self, offsets: &[usize]) -> ArrayData {
        match self {
            ArrayData::Bool(v) => ArrayData::Bool(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::I64(v) => ArrayData::I64(offsets.iter().map(|&i| v[i]).collect()),
            ArrayData::F64(v) => ArrayData::F64(offsets.iter().map(|&i| v[i]).collect()),
        }
    }

    /// Builds storage of `dtype` from scalars, casting each element.
    pub fn from_scalars(dtype: DType, scalars: impl IntoIterator<Item = Scalar>) -> ArrayData {
        let iter = scalars.into_iter().map(|s| s.cast(dtype));
        match dtype {
            DType::Bool => ArrayData::Bool(
                iter.map(|s| matches!(s, Scalar::Bool(true))).collect(),
            ),
            DType::I64 => ArrayData::I64(iter.map(Scalar::as_i64).collect()),
            DType::F64 => ArrayData::F64(
                iter.map(|s| match s {
                    Scalar::F64(v) => v,
                    _ => 0.0,
                })
                .collect(),
            ),
        }
    }

    fn filled(scalar: Scalar, len: usize) -> ArrayData {
        match scalar {
            Scalar::Bool(b) => ArrayData::Bool(vec![b; len]),
            Scalar::I64(v) => ArrayData::I64(vec![v; len]),
            Scalar::F64(v) => ArrayData::F64(vec![v; len]),
        }
    }
}

/// A dense array value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawArray")]
pub struct Array {
    shape: Shape,
    data: ArrayData,
}

/// Wire form of [`Array`]; deserialization goes through [`Array::new`].
#[derive(Deserialize)]
struct RawArray {
    shape: Shape,
    data: ArrayData,
}

impl TryFrom<RawArray> for Array {
    type Error = CoreError;

    fn try_from(raw: RawArray) -> Result<Self, CoreError> {
        Array::new(raw.shape, raw.data)
    }
}

impl Array {
    /// Creates an array, checking that `data` has exactly `shape.numel()` elements.
    pub fn new(shape: Shape, data: ArrayData) -> Result<Self, CoreError> {
        let expected = shape.numel();
        if data.len() != expected {
            return Err(CoreError::ElementCountMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Array { shape, data })
    }

    pub fn scalar(value: Scalar) -> Self {
        Array {
            shape: Shape::scalar(),
            data: ArrayData::filled(value, 1),
        }
    }

    pub fn scalar_f64(value: f64) -> Self {
        Array::scalar(Scalar::F64(value))
    }

    pub fn scalar_i64(value: i64) -> Self {
        Array::scalar(Scalar::I64(value))
    }

    pub fn scalar_bool(value: bool) -> Self {
        Array::scalar(Scalar::Bool(value))
    }

    pub fn vector_f64(values: &[f64]) -> Self {
        Array {
            shape: Shape::vector(values.len()),
            data: ArrayData::F64(values.to_vec()),
        }
    }

    pub fn vector_i64(values: &[i64]) -> Self {
        Array {
            shape: Shape::vector(values.len()),
            data: ArrayData::I64(values.to_vec()),
        }
    }

    pub fn vector_bool(values: &[bool]) -> Self {
        Array {
            shape: Shape::vector(values.len()),
            data: ArrayData::Bool(values.to_vec()),
        }
    }

    pub fn from_f64(dims: &[usize], values: Vec<f64>) -> Result<Self, CoreError> {
        Array::new(Shape::new(dims), ArrayData::F64(values))
    }

    pub fn from_i64(dims: &[usize], values: Vec<i64>) -> Result<Self, CoreError> {
        Array::new(Shape::new(dims), ArrayData::I64(values))
    }

    /// An array of `shape` with every element equal to `value`.
    pub fn full(value: Scalar, shape: Shape) -> Self {
        let len = shape.numel();
        Array {
            shape,
            data: ArrayData::filled(value, len),
        }
    }

    pub fn zeros(dtype: DType, shape: Shape) -> Self {
        Array::full(Scalar::I64(0).cast(dtype), shape)
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn aval(&self) -> AbstractValue {
        AbstractValue::new(self.dtype(), self.shape.clone())
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn into_data(self) -> ArrayData {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Element at a flat row-major offset.
    pub fn get(&self, flat: usize) -> Scalar {
        self.data.get(flat)
    }

    /// Element at a multi-index.
    pub fn at(&self, index: &[usize]) -> Scalar {
        self.data.get(self.shape.flat_index(index))
    }

    /// Iterates elements as scalars in row-major order.
    pub fn scalars(&self) -> impl Iterator<Item = Scalar> + '_ {
        (0..self.len()).map(move |i| self.data.get(i))
    }

    pub fn as_f64_slice(&self) -> Option<&[f64]> {
        match &self.data {
            ArrayData::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64_slice(&self) -> Option<&[i64]> {
        match &self.data {
            ArrayData::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool_slice(&self) -> Option<&[bool]> {
        match &self.data {
            ArrayData::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// The single element of a rank-0 array.
    pub fn as_scalar(&self) -> Option<Scalar> {
        if self.shape.is_scalar() {
            Some(self.data.get(0))
        } else {
            None
        }
    }

    pub fn as_f64_scalar(&self) -> Option<f64> {
        match self.as_scalar()? {
            Scalar::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64_scalar(&self) -> Option<i64> {
        match self.as_scalar()? {
            Scalar::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool_scalar(&self) -> Option<bool> {
        match self.as_scalar()? {
            Scalar::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Returns `true` if any element is NaN. Always `false` for non-float dtypes.
    pub fn any_nan(&self) -> bool {
        match &self.data {
            ArrayData::F64(v) => v.iter().any(|x| x.is_nan()),
            _ => false,
        }
    }

    /// Same elements, new shape with the same element count.
    pub fn reshape(&self, shape: Shape) -> Result<Array, CoreError> {
        Array::new(shape, self.data.clone())
    }

    /// Builds an array of `shape` whose element at each position is taken
    /// from this array's flat offset `offsets[i]`.
    pub fn take(&self, shape: Shape, offsets: &[usize]) -> Result<Array, CoreError> {
        Array::new(shape, self.data.take(offsets))
    }

    /// Selects index `i` along `axis`, dropping that axis.
    pub fn index_axis(&self, axis: usize, i: usize) -> Array {
        let out_shape = self.shape.without_axis(axis);
        let offsets: Vec<usize> = (0..out_shape.numel())
            .map(|flat| {
                let mut index = out_shape.unravel(flat);
                index.insert(axis, i);
                self.shape.flat_index(&index)
            })
            .collect();
        Array {
            data: self.data.take(&offsets),
            shape: out_shape,
        }
    }

    /// Stacks equally-typed arrays along a new `axis`.
    pub fn stack(axis: usize, parts: &[Array], aval: &AbstractValue) -> Result<Array, CoreError> {
        for part in parts {
            if part.dtype() != aval.dtype {
                return Err(CoreError::DTypeMismatch {
                    primitive: "stack",
                    expected: aval.dtype,
                    actual: part.dtype(),
                });
            }
            if part.shape != aval.shape {
                return Err(CoreError::ShapeMismatch {
                    primitive: "stack",
                    expected: aval.shape.clone(),
                    actual: part.shape.clone(),
                });
            }
        }
        let out_shape = aval.shape.with_axis(axis, parts.len());
        let scalars = (0..out_shape.numel()).map(|flat| {
            let mut index = out_shape.unravel(flat);
            let part = index.remove(axis);
            parts[part].at(&index)
        });
        let data = ArrayData::from_scalars(aval.dtype, scalars);
        Array::new(out_shape, data)
    }

    /// Repeats a rank-0 array over `shape`. Arrays already of `shape` are cloned.
    pub fn broadcast_to(&self, shape: &Shape) -> Result<Array, CoreError> {
        if &self.shape == shape {
            return Ok(self.clone());
        }
        match self.as_scalar() {
            Some(value) => Ok(Array::full(value, shape.clone())),
            None => Err(CoreError::ShapeMismatch {
                primitive: "broadcast",
                expected: shape.clone(),
                actual: self.shape.clone(),
            }),
        }
    }
}

impl fmt::Display for Array {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_axis(
            f: &mut fmt::Formatter<'_>,
            array: &Array,
            axis: usize,
            offset: usize,
        ) -> fmt::Result {
            let dims = array.shape.dims();
            if axis == dims.len() {
                return write!(f, "{}", array.get(offset));
            }
            let stride: usize = dims[axis + 1..].iter().product();
            f.write_str("[")?;
            for i in 0..dims[axis] {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write_axis(f, array, axis + 1, offset + i * stride)?;
            }
            f.write_str("]")
        }
        write_axis(f, self, 0, 0)
    }
}
