//! Primitive operations of the intermediate representation.
//!
//! A [`Primitive`] carries its static parameters inline (axes, shapes,
//! dimension numbers, embedded sub-programs). [`PrimitiveKind`] is the
//! parameter-free identity of a primitive, used as the key of dispatch
//! tables such as the checking rule table.
//!
//! Operand conventions:
//! - `Select`: `(pred, on_true, on_false)`
//! - `Clamp`: `(min, operand, max)`
//! - `Gather`: `(operand, start_indices)`, index vector in the last dimension
//! - `Scatter`: `(operand, indices, updates)`, index vector in the last dimension
//! - `Cond`: `(index, operands...)`, each branch takes `operands`
//! - `Scan`: `(consts..., carry..., xs...)`, body takes the same and returns
//!   `(carry..., ys...)`
//! - `While`: `(cond_consts..., body_consts..., carry...)`
//! - `Assert`: `(pred, code)`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::program::ClosedProgram;
use crate::types::{DType, Shape};

/// Elementwise unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sign,
    Floor,
    Ceil,
    Round,
    Exp,
    Expm1,
    Log,
    Log1p,
    Sqrt,
    Rsqrt,
    Sin,
    Cos,
    Tan,
    Tanh,
    Sinh,
    Cosh,
    Asinh,
    Acosh,
    Atanh,
    /// Logical not for `bool`, bitwise not for `i64`.
    Not,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Sign => "sign",
            UnaryOp::Floor => "floor",
            UnaryOp::Ceil => "ceil",
            UnaryOp::Round => "round",
            UnaryOp::Exp => "exp",
            UnaryOp::Expm1 => "expm1",
            UnaryOp::Log => "log",
            UnaryOp::Log1p => "log1p",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Rsqrt => "rsqrt",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Tanh => "tanh",
            UnaryOp::Sinh => "sinh",
            UnaryOp::Cosh => "cosh",
            UnaryOp::Asinh => "asinh",
            UnaryOp::Acosh => "acosh",
            UnaryOp::Atanh => "atanh",
            UnaryOp::Not => "not",
        }
    }

    /// Transcendental and rounding ops are only defined on floats.
    pub fn requires_float(self) -> bool {
        !matches!(self, UnaryOp::Neg | UnaryOp::Abs | UnaryOp::Sign | UnaryOp::Not)
    }
}

/// Elementwise binary operators. Both operands share a dtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    /// Float division follows IEEE 754. Integer division by zero yields `-1`.
    Div,
    /// Integer remainder by zero yields the dividend.
    Rem,
    Pow,
    Atan2,
    Max,
    Min,
    And,
    Or,
    Xor,
    ShiftLeft,
    ShiftRightArithmetic,
    ShiftRightLogical,
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::Pow => "pow",
            BinaryOp::Atan2 => "atan2",
            BinaryOp::Max => "max",
            BinaryOp::Min => "min",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::ShiftLeft => "shift_left",
            BinaryOp::ShiftRightArithmetic => "shift_right_arithmetic",
            BinaryOp::ShiftRightLogical => "shift_right_logical",
        }
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }

    pub fn is_shift(self) -> bool {
        matches!(
            self,
            BinaryOp::ShiftLeft | BinaryOp::ShiftRightArithmetic | BinaryOp::ShiftRightLogical
        )
    }
}

/// Elementwise comparisons producing `bool`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn name(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        }
    }
}

/// Reductions over a set of axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Prod,
    Max,
    Min,
    And,
    Or,
}

impl ReduceOp {
    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "reduce_sum",
            ReduceOp::Prod => "reduce_prod",
            ReduceOp::Max => "reduce_max",
            ReduceOp::Min => "reduce_min",
            ReduceOp::And => "reduce_and",
            ReduceOp::Or => "reduce_or",
        }
    }
}

/// Cumulative (prefix) reductions along one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CumulativeOp {
    Sum,
    Prod,
    Max,
    Min,
}

impl CumulativeOp {
    pub fn name(self) -> &'static str {
        match self {
            CumulativeOp::Sum => "cumsum",
            CumulativeOp::Prod => "cumprod",
            CumulativeOp::Max => "cummax",
            CumulativeOp::Min => "cummin",
        }
    }
}

/// How a scatter combines updates with the existing operand element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScatterKind {
    Replace,
    Add,
    Mul,
    Min,
    Max,
}

impl ScatterKind {
    pub fn name(self) -> &'static str {
        match self {
            ScatterKind::Replace => "scatter",
            ScatterKind::Add => "scatter-add",
            ScatterKind::Mul => "scatter-mul",
            ScatterKind::Min => "scatter-min",
            ScatterKind::Max => "scatter-max",
        }
    }
}

/// XLA-style gather dimension numbers. The index vector dimension is always
/// the last dimension of `start_indices`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GatherDimensionNumbers {
    /// Output dimensions that correspond to (non-collapsed) slice dimensions.
    pub offset_dims: Vec<usize>,
    /// Operand dimensions sliced with size 1 and dropped from the output.
    pub collapsed_slice_dims: Vec<usize>,
    /// Operand dimension indexed by each component of the index vector.
    pub start_index_map: Vec<usize>,
}

/// XLA-style scatter dimension numbers. The index vector dimension is always
/// the last dimension of `indices`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScatterDimensionNumbers {
    /// Update dimensions that form the window written into the operand.
    pub update_window_dims: Vec<usize>,
    /// Operand dimensions with an implicit window size of 1.
    pub inserted_window_dims: Vec<usize>,
    /// Operand dimension indexed by each component of the index vector.
    pub scatter_dims_to_operand_dims: Vec<usize>,
}

/// A primitive operation with its static parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CmpOp),
    Select,
    Clamp,
    Reduce {
        op: ReduceOp,
        axes: Vec<usize>,
    },
    Cumulative {
        op: CumulativeOp,
        axis: usize,
        reverse: bool,
    },
    ConvertElementType {
        dtype: DType,
    },
    BroadcastInDim {
        shape: Shape,
        broadcast_dimensions: Vec<usize>,
    },
    Reshape {
        new_sizes: Shape,
    },
    Transpose {
        permutation: Vec<usize>,
    },
    Rev {
        dimensions: Vec<usize>,
    },
    Slice {
        start_indices: Vec<usize>,
        limit_indices: Vec<usize>,
    },
    Concatenate {
        dimension: usize,
    },
    Iota {
        dtype: DType,
        size: usize,
    },
    /// Vector/matrix product: `[n]·[n]`, `[m,n]·[n]`, or `[m,k]·[k,n]`.
    Dot,
    /// Stable sort of all operands along `dimension`, ordered
    /// lexicographically by the first `num_keys` operands.
    Sort {
        dimension: usize,
        num_keys: usize,
    },
    Gather {
        dimension_numbers: GatherDimensionNumbers,
        slice_sizes: Vec<usize>,
    },
    Scatter {
        kind: ScatterKind,
        dimension_numbers: ScatterDimensionNumbers,
    },
    /// N-way conditional: the (clamped) index operand selects a branch.
    Cond {
        branches: Vec<ClosedProgram>,
    },
    /// Bounded loop over the leading axis of the `xs` operands.
    Scan {
        body: ClosedProgram,
        length: usize,
        reverse: bool,
        num_consts: usize,
        num_carry: usize,
    },
    /// Unbounded loop: `body` runs while `cond` returns `true`.
    While {
        cond: ClosedProgram,
        body: ClosedProgram,
        cond_nconsts: usize,
        body_nconsts: usize,
    },
    /// Opaque call of a compiled sub-program.
    Call {
        name: String,
        body: ClosedProgram,
    },
    /// Vectorized map: `body` runs once per lane of a batch of `axis_size`.
    /// `None` in `in_axes` broadcasts that operand to every lane.
    Map {
        body: ClosedProgram,
        axis_size: usize,
        in_axes: Vec<Option<usize>>,
        out_axes: Vec<usize>,
    },
    /// Zero-result assertion carrying the message for every code it can raise.
    Assert {
        messages: BTreeMap<i64, String>,
    },
}

/// Parameter-free identity of a [`Primitive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Compare(CmpOp),
    Select,
    Clamp,
    Reduce(ReduceOp),
    Cumulative(CumulativeOp),
    ConvertElementType,
    BroadcastInDim,
    Reshape,
    Transpose,
    Rev,
    Slice,
    Concatenate,
    Iota,
    Dot,
    Sort,
    Gather,
    Scatter(ScatterKind),
    Cond,
    Scan,
    While,
    Call,
    Map,
    Assert,
}

impl PrimitiveKind {
    /// Canonical primitive name, as printed in programs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Unary(op) => op.name(),
            PrimitiveKind::Binary(op) => op.name(),
            PrimitiveKind::Compare(op) => op.name(),
            PrimitiveKind::Select => "select",
            PrimitiveKind::Clamp => "clamp",
            PrimitiveKind::Reduce(op) => op.name(),
            PrimitiveKind::Cumulative(op) => op.name(),
            PrimitiveKind::ConvertElementType => "convert_element_type",
            PrimitiveKind::BroadcastInDim => "broadcast_in_dim",
            PrimitiveKind::Reshape => "reshape",
            PrimitiveKind::Transpose => "transpose",
            PrimitiveKind::Rev => "rev",
            PrimitiveKind::Slice => "slice",
            PrimitiveKind::Concatenate => "concatenate",
            PrimitiveKind::Iota => "iota",
            PrimitiveKind::Dot => "dot",
            PrimitiveKind::Sort => "sort",
            PrimitiveKind::Gather => "gather",
            PrimitiveKind::Scatter(kind) => kind.name(),
            PrimitiveKind::Cond => "cond",
            PrimitiveKind::Scan => "scan",
            PrimitiveKind::While => "while",
            PrimitiveKind::Call => "call",
            PrimitiveKind::Map => "map",
            PrimitiveKind::Assert => "assert",
        }
    }

    /// Returns `true` for primitives that embed sub-programs.
    pub fn is_higher_order(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Cond
                | PrimitiveKind::Scan
                | PrimitiveKind::While
                | PrimitiveKind::Call
                | PrimitiveKind::Map
        )
    }
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Unary(op) => PrimitiveKind::Unary(*op),
            Primitive::Binary(op) => PrimitiveKind::Binary(*op),
            Primitive::Compare(op) => PrimitiveKind::Compare(*op),
            Primitive::Select => PrimitiveKind::Select,
            Primitive::Clamp => PrimitiveKind::Clamp,
            Primitive::Reduce { op, .. } => PrimitiveKind::Reduce(*op),
            Primitive::Cumulative { op, .. } => PrimitiveKind::Cumulative(*op),
            Primitive::ConvertElementType { .. } => PrimitiveKind::ConvertElementType,
            Primitive::BroadcastInDim { .. } => PrimitiveKind::BroadcastInDim,
            Primitive::Reshape { .. } => PrimitiveKind::Reshape,
            Primitive::Transpose { .. } => PrimitiveKind::Transpose,
            Primitive::Rev { .. } => PrimitiveKind::Rev,
            Primitive::Slice { .. } => PrimitiveKind::Slice,
            Primitive::Concatenate { .. } => PrimitiveKind::Concatenate,
            Primitive::Iota { .. } => PrimitiveKind::Iota,
            Primitive::Dot => PrimitiveKind::Dot,
            Primitive::Sort { .. } => PrimitiveKind::Sort,
            Primitive::Gather { .. } => PrimitiveKind::Gather,
            Primitive::Scatter { kind, .. } => PrimitiveKind::Scatter(*kind),
            Primitive::Cond { .. } => PrimitiveKind::Cond,
            Primitive::Scan { .. } => PrimitiveKind::Scan,
            Primitive::While { .. } => PrimitiveKind::While,
            Primitive::Call { .. } => PrimitiveKind::Call,
            Primitive::Map { .. } => PrimitiveKind::Map,
            Primitive::Assert { .. } => PrimitiveKind::Assert,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Sub-programs embedded in this primitive, in parameter order.
    pub fn sub_programs(&self) -> Vec<&ClosedProgram> {
        match self {
            Primitive::Cond { branches } => branches.iter().collect(),
            Primitive::Scan { body, .. } => vec![body],
            Primitive::While { cond, body, .. } => vec![cond, body],
            Primitive::Call { body, .. } => vec![body],
            Primitive::Map { body, .. } => vec![body],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_match_kinds() {
        assert_eq!(Primitive::Binary(BinaryOp::Div).name(), "div");
        assert_eq!(
            Primitive::Reduce { op: ReduceOp::Or, axes: vec![0] }.name(),
            "reduce_or"
        );
        assert_eq!(
            PrimitiveKind::Scatter(ScatterKind::Add).name(),
            "scatter-add"
        );
    }

    #[test]
    fn kind_ignores_params() {
        let a = Primitive::Reduce { op: ReduceOp::Sum, axes: vec![0] };
        let b = Primitive::Reduce { op: ReduceOp::Sum, axes: vec![0, 1] };
        assert_eq!(a.kind(), b.kind());
        assert_ne!(a, b);
    }

    #[test]
    fn higher_order_kinds() {
        assert!(PrimitiveKind::Cond.is_higher_order());
        assert!(PrimitiveKind::Map.is_higher_order());
        assert!(!PrimitiveKind::Gather.is_higher_order());
        assert!(!PrimitiveKind::Assert.is_higher_order());
    }

    #[test]
    fn float_only_unary_ops() {
        assert!(UnaryOp::Log.requires_float());
        assert!(!UnaryOp::Neg.requires_float());
        assert!(!UnaryOp::Not.requires_float());
    }

    #[test]
    fn serde_roundtrip_primitive() {
        let prim = Primitive::Gather {
            dimension_numbers: GatherDimensionNumbers {
                offset_dims: vec![],
                collapsed_slice_dims: vec![0],
                start_index_map: vec![0],
            },
            slice_sizes: vec![1],
        };
        let json = serde_json::to_string(&prim).unwrap();
        let back: Primitive = serde_json::from_str(&json).unwrap();
        assert_eq!(prim, back);
    }
}
