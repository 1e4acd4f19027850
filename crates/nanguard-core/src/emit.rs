//! The binding seam shared by eager execution and staging.
//!
//! Everything that builds computations (user functions, the checking
//! overlay, the control-flow rewriters) is written against [`Emitter`].
//! [`Eager`](crate::eval::Eager) executes each primitive as it is bound;
//! [`ProgramBuilder`](crate::builder::ProgramBuilder) records it as an
//! equation. [`Ops`] adds typed constructors on top of the raw `bind`, and
//! records the caller's source location on every bind.

use std::fmt;

use crate::array::{Array, Scalar};
use crate::error::CoreError;
use crate::ops::{
    BinaryOp, CmpOp, CumulativeOp, GatherDimensionNumbers, Primitive, ReduceOp,
    ScatterDimensionNumbers, ScatterKind, UnaryOp,
};
use crate::program::{Atom, ClosedProgram, SourceLocation};
use crate::types::{AbstractValue, DType, Shape};

/// Something that can apply primitives to values.
pub trait Emitter {
    type Value: Clone + fmt::Debug;

    /// Applies `primitive` to `inputs`, returning one value per output.
    fn bind(
        &mut self,
        primitive: Primitive,
        inputs: &[Self::Value],
        source: Option<SourceLocation>,
    ) -> Result<Vec<Self::Value>, CoreError>;

    /// Lifts a concrete array into this emitter's value space.
    fn constant(&mut self, value: Array) -> Self::Value;

    /// The static type of a value.
    fn aval(&self, value: &Self::Value) -> AbstractValue;
}

/// Typed primitive constructors available on every [`Emitter`].
pub trait Ops: Emitter {
    /// Binds a single-output primitive at the caller's location.
    #[track_caller]
    fn bind1(&mut self, primitive: Primitive, inputs: &[Self::Value]) -> Result<Self::Value, CoreError> {
        let name = primitive.name();
        let mut outs = self.bind(primitive, inputs, Some(SourceLocation::caller()))?;
        match (outs.pop(), outs.is_empty()) {
            (Some(out), true) => Ok(out),
            _ => Err(CoreError::InvalidParams {
                primitive: name,
                reason: "expected exactly one output".to_string(),
            }),
        }
    }

    /// Binds a multi-output primitive at the caller's location.
    #[track_caller]
    fn bind_n(&mut self, primitive: Primitive, inputs: &[Self::Value]) -> Result<Vec<Self::Value>, CoreError> {
        self.bind(primitive, inputs, Some(SourceLocation::caller()))
    }

    fn literal(&mut self, value: Scalar) -> Self::Value {
        self.constant(Array::scalar(value))
    }

    fn f64(&mut self, value: f64) -> Self::Value {
        self.literal(Scalar::F64(value))
    }

    fn i64(&mut self, value: i64) -> Self::Value {
        self.literal(Scalar::I64(value))
    }

    fn bool(&mut self, value: bool) -> Self::Value {
        self.literal(Scalar::Bool(value))
    }

    #[track_caller]
    fn unary(&mut self, op: UnaryOp, x: &Self::Value) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Unary(op), &[x.clone()])
    }

    #[track_caller]
    fn binary(&mut self, op: BinaryOp, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Binary(op), &[a.clone(), b.clone()])
    }

    #[track_caller]
    fn compare(&mut self, op: CmpOp, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Compare(op), &[a.clone(), b.clone()])
    }

    #[track_caller]
    fn add(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::Add, a, b)
    }

    #[track_caller]
    fn sub(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::Sub, a, b)
    }

    #[track_caller]
    fn mul(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::Mul, a, b)
    }

    #[track_caller]
    fn div(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::Div, a, b)
    }

    #[track_caller]
    fn rem(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::Rem, a, b)
    }

    #[track_caller]
    fn max(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::Max, a, b)
    }

    #[track_caller]
    fn min(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::Min, a, b)
    }

    #[track_caller]
    fn and(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::And, a, b)
    }

    #[track_caller]
    fn or(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.binary(BinaryOp::Or, a, b)
    }

    #[track_caller]
    fn not(&mut self, x: &Self::Value) -> Result<Self::Value, CoreError> {
        self.unary(UnaryOp::Not, x)
    }

    #[track_caller]
    fn neg(&mut self, x: &Self::Value) -> Result<Self::Value, CoreError> {
        self.unary(UnaryOp::Neg, x)
    }

    #[track_caller]
    fn exp(&mut self, x: &Self::Value) -> Result<Self::Value, CoreError> {
        self.unary(UnaryOp::Exp, x)
    }

    #[track_caller]
    fn log(&mut self, x: &Self::Value) -> Result<Self::Value, CoreError> {
        self.unary(UnaryOp::Log, x)
    }

    #[track_caller]
    fn sqrt(&mut self, x: &Self::Value) -> Result<Self::Value, CoreError> {
        self.unary(UnaryOp::Sqrt, x)
    }

    #[track_caller]
    fn sin(&mut self, x: &Self::Value) -> Result<Self::Value, CoreError> {
        self.unary(UnaryOp::Sin, x)
    }

    #[track_caller]
    fn eq(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.compare(CmpOp::Eq, a, b)
    }

    #[track_caller]
    fn ne(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.compare(CmpOp::Ne, a, b)
    }

    #[track_caller]
    fn lt(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.compare(CmpOp::Lt, a, b)
    }

    #[track_caller]
    fn le(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.compare(CmpOp::Le, a, b)
    }

    #[track_caller]
    fn gt(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.compare(CmpOp::Gt, a, b)
    }

    #[track_caller]
    fn ge(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.compare(CmpOp::Ge, a, b)
    }

    #[track_caller]
    fn select(
        &mut self,
        pred: &Self::Value,
        on_true: &Self::Value,
        on_false: &Self::Value,
    ) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Select, &[pred.clone(), on_true.clone(), on_false.clone()])
    }

    #[track_caller]
    fn clamp(&mut self, lo: &Self::Value, x: &Self::Value, hi: &Self::Value) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Clamp, &[lo.clone(), x.clone(), hi.clone()])
    }

    #[track_caller]
    fn reduce(&mut self, op: ReduceOp, x: &Self::Value, axes: &[usize]) -> Result<Self::Value, CoreError> {
        self.bind1(
            Primitive::Reduce {
                op,
                axes: axes.to_vec(),
            },
            &[x.clone()],
        )
    }

    /// Reduces over every axis to a scalar.
    #[track_caller]
    fn reduce_all(&mut self, op: ReduceOp, x: &Self::Value) -> Result<Self::Value, CoreError> {
        let rank = self.aval(x).shape.rank();
        let axes: Vec<usize> = (0..rank).collect();
        self.reduce(op, x, &axes)
    }

    #[track_caller]
    fn reduce_sum(&mut self, x: &Self::Value) -> Result<Self::Value, CoreError> {
        self.reduce_all(ReduceOp::Sum, x)
    }

    #[track_caller]
    fn cumulative(
        &mut self,
        op: CumulativeOp,
        x: &Self::Value,
        axis: usize,
        reverse: bool,
    ) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Cumulative { op, axis, reverse }, &[x.clone()])
    }

    #[track_caller]
    fn convert(&mut self, x: &Self::Value, dtype: DType) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::ConvertElementType { dtype }, &[x.clone()])
    }

    #[track_caller]
    fn broadcast_in_dim(
        &mut self,
        x: &Self::Value,
        shape: Shape,
        broadcast_dimensions: &[usize],
    ) -> Result<Self::Value, CoreError> {
        self.bind1(
            Primitive::BroadcastInDim {
                shape,
                broadcast_dimensions: broadcast_dimensions.to_vec(),
            },
            &[x.clone()],
        )
    }

    /// Broadcasts a value to `shape`; a no-op if it already has that shape.
    #[track_caller]
    fn broadcast_to(&mut self, x: &Self::Value, shape: &Shape) -> Result<Self::Value, CoreError> {
        let current = self.aval(x).shape;
        if &current == shape {
            return Ok(x.clone());
        }
        let offset = shape.rank().saturating_sub(current.rank());
        let dims: Vec<usize> = (offset..shape.rank()).collect();
        self.broadcast_in_dim(x, shape.clone(), &dims)
    }

    #[track_caller]
    fn reshape(&mut self, x: &Self::Value, shape: Shape) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Reshape { new_sizes: shape }, &[x.clone()])
    }

    #[track_caller]
    fn transpose(&mut self, x: &Self::Value, permutation: &[usize]) -> Result<Self::Value, CoreError> {
        self.bind1(
            Primitive::Transpose {
                permutation: permutation.to_vec(),
            },
            &[x.clone()],
        )
    }

    #[track_caller]
    fn rev(&mut self, x: &Self::Value, dimensions: &[usize]) -> Result<Self::Value, CoreError> {
        self.bind1(
            Primitive::Rev {
                dimensions: dimensions.to_vec(),
            },
            &[x.clone()],
        )
    }

    #[track_caller]
    fn slice(&mut self, x: &Self::Value, start: &[usize], limit: &[usize]) -> Result<Self::Value, CoreError> {
        self.bind1(
            Primitive::Slice {
                start_indices: start.to_vec(),
                limit_indices: limit.to_vec(),
            },
            &[x.clone()],
        )
    }

    #[track_caller]
    fn concatenate(&mut self, parts: &[Self::Value], dimension: usize) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Concatenate { dimension }, parts)
    }

    #[track_caller]
    fn iota(&mut self, dtype: DType, size: usize) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Iota { dtype, size }, &[])
    }

    #[track_caller]
    fn dot(&mut self, a: &Self::Value, b: &Self::Value) -> Result<Self::Value, CoreError> {
        self.bind1(Primitive::Dot, &[a.clone(), b.clone()])
    }

    #[track_caller]
    fn sort(
        &mut self,
        operands: &[Self::Value],
        dimension: usize,
        num_keys: usize,
    ) -> Result<Vec<Self::Value>, CoreError> {
        self.bind_n(Primitive::Sort { dimension, num_keys }, operands)
    }

    #[track_caller]
    fn gather(
        &mut self,
        operand: &Self::Value,
        indices: &Self::Value,
        dimension_numbers: GatherDimensionNumbers,
        slice_sizes: &[usize],
    ) -> Result<Self::Value, CoreError> {
        self.bind1(
            Primitive::Gather {
                dimension_numbers,
                slice_sizes: slice_sizes.to_vec(),
            },
            &[operand.clone(), indices.clone()],
        )
    }

    /// `operand[index]` along axis 0 for a scalar integer `index`, dropping
    /// the indexed axis.
    #[track_caller]
    fn take(&mut self, operand: &Self::Value, index: &Self::Value) -> Result<Self::Value, CoreError> {
        let shape = self.aval(operand).shape;
        let indices = self.reshape(index, Shape::vector(1))?;
        let mut slice_sizes = shape.dims().to_vec();
        if let Some(first) = slice_sizes.first_mut() {
            *first = 1;
        }
        let dnums = GatherDimensionNumbers {
            offset_dims: (0..shape.rank().saturating_sub(1)).collect(),
            collapsed_slice_dims: vec![0],
            start_index_map: vec![0],
        };
        self.gather(operand, &indices, dnums, &slice_sizes)
    }

    #[track_caller]
    fn scatter(
        &mut self,
        kind: ScatterKind,
        operand: &Self::Value,
        indices: &Self::Value,
        updates: &Self::Value,
        dimension_numbers: ScatterDimensionNumbers,
    ) -> Result<Self::Value, CoreError> {
        self.bind1(
            Primitive::Scatter {
                kind,
                dimension_numbers,
            },
            &[operand.clone(), indices.clone(), updates.clone()],
        )
    }

    /// N-way conditional on an integer `index`.
    #[track_caller]
    fn cond(
        &mut self,
        index: &Self::Value,
        branches: Vec<ClosedProgram>,
        operands: &[Self::Value],
    ) -> Result<Vec<Self::Value>, CoreError> {
        let mut inputs = Vec::with_capacity(operands.len() + 1);
        inputs.push(index.clone());
        inputs.extend_from_slice(operands);
        self.bind_n(Primitive::Cond { branches }, &inputs)
    }

    #[track_caller]
    fn scan(
        &mut self,
        body: ClosedProgram,
        length: usize,
        reverse: bool,
        consts: &[Self::Value],
        init: &[Self::Value],
        xs: &[Self::Value],
    ) -> Result<Vec<Self::Value>, CoreError> {
        let inputs: Vec<Self::Value> = consts.iter().chain(init).chain(xs).cloned().collect();
        self.bind_n(
            Primitive::Scan {
                body,
                length,
                reverse,
                num_consts: consts.len(),
                num_carry: init.len(),
            },
            &inputs,
        )
    }

    #[track_caller]
    fn while_loop(
        &mut self,
        cond: ClosedProgram,
        body: ClosedProgram,
        cond_consts: &[Self::Value],
        body_consts: &[Self::Value],
        init: &[Self::Value],
    ) -> Result<Vec<Self::Value>, CoreError> {
        let inputs: Vec<Self::Value> = cond_consts
            .iter()
            .chain(body_consts)
            .chain(init)
            .cloned()
            .collect();
        self.bind_n(
            Primitive::While {
                cond,
                body,
                cond_nconsts: cond_consts.len(),
                body_nconsts: body_consts.len(),
            },
            &inputs,
        )
    }

    #[track_caller]
    fn call(
        &mut self,
        name: &str,
        body: ClosedProgram,
        args: &[Self::Value],
    ) -> Result<Vec<Self::Value>, CoreError> {
        self.bind_n(
            Primitive::Call {
                name: name.to_string(),
                body,
            },
            args,
        )
    }

    #[track_caller]
    fn map(
        &mut self,
        body: ClosedProgram,
        axis_size: usize,
        in_axes: Vec<Option<usize>>,
        out_axes: Vec<usize>,
        args: &[Self::Value],
    ) -> Result<Vec<Self::Value>, CoreError> {
        self.bind_n(
            Primitive::Map {
                body,
                axis_size,
                in_axes,
                out_axes,
            },
            args,
        )
    }
}

impl<E: Emitter + ?Sized> Ops for E {}

/// Replays a closed program's equations through `emitter`.
///
/// Constants are lifted with [`Emitter::constant`]; every equation keeps its
/// original source location.
pub fn inline_program<E: Emitter + ?Sized>(
    emitter: &mut E,
    program: &ClosedProgram,
    args: &[E::Value],
) -> Result<Vec<E::Value>, CoreError> {
    let p = &program.program;
    if args.len() != p.invars.len() {
        return Err(CoreError::ArityMismatch {
            primitive: "inline",
            expected: p.invars.len(),
            actual: args.len(),
        });
    }
    let mut env: Vec<Option<E::Value>> = vec![None; p.vars.len()];
    for (var, value) in p.constvars.iter().zip(&program.consts) {
        env[var.index()] = Some(emitter.constant(value.clone()));
    }
    for (var, value) in p.invars.iter().zip(args) {
        env[var.index()] = Some(value.clone());
    }

    for eqn in &p.equations {
        let inputs = eqn
            .inputs
            .iter()
            .map(|atom| read_atom(emitter, &env, atom))
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = emitter.bind(eqn.primitive.clone(), &inputs, eqn.source.clone())?;
        for (var, value) in eqn.outputs.iter().zip(outputs) {
            env[var.index()] = Some(value);
        }
    }

    p.outvars
        .iter()
        .map(|atom| read_atom(emitter, &env, atom))
        .collect()
}

fn read_atom<E: Emitter + ?Sized>(
    emitter: &mut E,
    env: &[Option<E::Value>],
    atom: &Atom,
) -> Result<E::Value, CoreError> {
    match atom {
        Atom::Var(var) => env
            .get(var.index())
            .and_then(Clone::clone)
            .ok_or(CoreError::UnboundVar { var: *var }),
        Atom::Literal(value) => Ok(emitter.constant(value.clone())),
    }
}
