//! Element types, shapes, and abstract values.
//!
//! An [`AbstractValue`] is everything staging knows about a value: its
//! [`DType`] and its [`Shape`]. Shape rules in [`crate::shape_rules`] map
//! input abstract values to output abstract values for every primitive.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Element type of an array.
///
/// There is no implicit promotion: binary primitives require both operands
/// to share a dtype, and conversions go through `convert_element_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Bool,
    I64,
    F64,
}

impl DType {
    /// Returns the short name used in pretty-printed programs.
    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::I64 => "i64",
            DType::F64 => "f64",
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F64)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, DType::I64)
    }

    /// Numeric dtypes support arithmetic and ordering reductions.
    pub fn is_numeric(self) -> bool {
        matches!(self, DType::I64 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Row-major array shape. Rank 0 is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape(pub SmallVec<[usize; 4]>);

impl Shape {
    pub fn scalar() -> Self {
        Shape(SmallVec::new())
    }

    pub fn new(dims: &[usize]) -> Self {
        Shape(SmallVec::from_slice(dims))
    }

    pub fn vector(len: usize) -> Self {
        Shape::new(&[len])
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of elements (1 for a scalar).
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> SmallVec<[usize; 4]> {
        let mut strides: SmallVec<[usize; 4]> = SmallVec::from_elem(1, self.rank());
        for axis in (0..self.rank().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.0[axis + 1];
        }
        strides
    }

    /// Converts a multi-index to a flat row-major offset.
    pub fn flat_index(&self, index: &[usize]) -> usize {
        self.strides()
            .iter()
            .zip(index)
            .map(|(stride, i)| stride * i)
            .sum()
    }

    /// Converts a flat row-major offset to a multi-index.
    pub fn unravel(&self, mut flat: usize) -> SmallVec<[usize; 4]> {
        let mut index: SmallVec<[usize; 4]> = SmallVec::from_elem(0, self.rank());
        for axis in (0..self.rank()).rev() {
            let dim = self.0[axis];
            if dim > 0 {
                index[axis] = flat % dim;
                flat /= dim;
            }
        }
        index
    }

    /// Returns this shape with `axis` removed.
    pub fn without_axis(&self, axis: usize) -> Shape {
        let mut dims = self.0.clone();
        dims.remove(axis);
        Shape(dims)
    }

    /// Returns this shape with a new dimension of `size` inserted at `axis`.
    pub fn with_axis(&self, axis: usize, size: usize) -> Shape {
        let mut dims = self.0.clone();
        dims.insert(axis, size);
        Shape(dims)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

/// Static type of a value: dtype plus shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AbstractValue {
    pub dtype: DType,
    pub shape: Shape,
}

impl AbstractValue {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        AbstractValue { dtype, shape }
    }

    pub fn scalar(dtype: DType) -> Self {
        AbstractValue::new(dtype, Shape::scalar())
    }

    /// Same shape, different dtype.
    pub fn with_dtype(&self, dtype: DType) -> Self {
        AbstractValue::new(dtype, self.shape.clone())
    }
}

impl fmt::Display for AbstractValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        let shape = Shape::new(&[2, 3, 4]);
        assert_eq!(shape.strides().as_slice(), &[12, 4, 1]);
        assert_eq!(shape.numel(), 24);
    }

    #[test]
    fn flat_index_and_unravel_agree() {
        let shape = Shape::new(&[2, 3, 4]);
        for flat in 0..shape.numel() {
            let index = shape.unravel(flat);
            assert_eq!(shape.flat_index(&index), flat);
        }
    }

    #[test]
    fn scalar_shape_has_one_element() {
        let shape = Shape::scalar();
        assert!(shape.is_scalar());
        assert_eq!(shape.numel(), 1);
        assert_eq!(shape.flat_index(&[]), 0);
    }

    #[test]
    fn axis_insertion_and_removal() {
        let shape = Shape::new(&[2, 3]);
        assert_eq!(shape.with_axis(0, 5), Shape::new(&[5, 2, 3]));
        assert_eq!(shape.without_axis(1), Shape::new(&[2]));
    }

    #[test]
    fn abstract_value_display() {
        let aval = AbstractValue::new(DType::F64, Shape::new(&[2, 3]));
        assert_eq!(aval.to_string(), "f64[2,3]");
        assert_eq!(AbstractValue::scalar(DType::Bool).to_string(), "bool[]");
    }
}
