//! Reference evaluator: the execution backend for programs.
//!
//! [`Evaluator`] runs closed programs equation by equation. It is the
//! "compiled" path: an `assert` equation reaching it was staged without the
//! checking overlay and is rejected as [`CoreError::Unstageable`].
//!
//! [`Eager`] is the eager [`Emitter`]: it executes every primitive as soon as
//! it is bound. Binding `assert` eagerly behaves like an ordinary assertion
//! and fails locally with [`CoreError::AssertionFailed`].

mod control;
mod indexing;
mod kernels;

use std::collections::BTreeMap;

use crate::array::Array;
use crate::emit::{inline_program, Emitter};
use crate::error::CoreError;
use crate::ops::Primitive;
use crate::program::{ClosedProgram, SourceLocation};
use crate::shape_rules::abstract_eval;
use crate::types::AbstractValue;

pub use indexing::scatter_window_sizes;

/// Configuration for evaluation.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Upper bound on iterations of any single while loop. Default: 1_000_000.
    pub max_while_iterations: usize,
    /// Whether to record a [`TraceEntry`] per evaluated equation.
    pub trace_enabled: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            max_while_iterations: 1_000_000,
            trace_enabled: false,
        }
    }
}

/// A single entry in the execution trace, recording one primitive evaluation.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub primitive: &'static str,
    /// Where the equation was staged, if known.
    pub source: Option<SourceLocation>,
    pub inputs: Vec<AbstractValue>,
    pub outputs: Vec<Array>,
}

/// Executes programs over concrete arrays.
#[derive(Debug, Default)]
pub struct Evaluator {
    config: EvalConfig,
    trace: Vec<TraceEntry>,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Evaluator {
            config,
            trace: Vec::new(),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// The execution trace recorded so far (empty unless tracing is enabled).
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn take_trace(&mut self) -> Vec<TraceEntry> {
        std::mem::take(&mut self.trace)
    }

    /// Evaluates a closed program on arguments matching its input types.
    pub fn eval_closed(
        &mut self,
        program: &ClosedProgram,
        args: &[Array],
    ) -> Result<Vec<Array>, CoreError> {
        program.check_args(args)?;
        inline_program(self, program, args)
    }

    /// Applies any primitive except `assert` to concrete operands.
    pub fn apply(
        &mut self,
        primitive: &Primitive,
        inputs: &[Array],
        source: Option<SourceLocation>,
    ) -> Result<Vec<Array>, CoreError> {
        let in_avals: Vec<AbstractValue> = inputs.iter().map(Array::aval).collect();
        let out_avals = abstract_eval(primitive, &in_avals)?;

        let outputs = match primitive {
            Primitive::Assert { .. } => {
                return Err(CoreError::Unstageable {
                    primitive: primitive.name(),
                })
            }
            Primitive::Gather {
                dimension_numbers,
                slice_sizes,
            } => vec![indexing::gather(
                &inputs[0],
                &inputs[1],
                dimension_numbers,
                slice_sizes,
                &out_avals[0],
            )?],
            Primitive::Scatter {
                kind,
                dimension_numbers,
            } => vec![indexing::scatter(
                *kind,
                &inputs[0],
                &inputs[1],
                &inputs[2],
                dimension_numbers,
            )?],
            Primitive::Cond { branches } => self.eval_cond(branches, inputs)?,
            Primitive::Scan {
                body,
                length,
                reverse,
                num_consts,
                num_carry,
            } => self.eval_scan(
                body,
                *length,
                *reverse,
                (*num_consts, *num_carry),
                inputs,
                &out_avals,
            )?,
            Primitive::While {
                cond,
                body,
                cond_nconsts,
                body_nconsts,
            } => self.eval_while(cond, body, (*cond_nconsts, *body_nconsts), inputs)?,
            Primitive::Call { body, .. } => self.eval_closed(body, inputs)?,
            Primitive::Map {
                body,
                axis_size,
                in_axes,
                out_axes,
            } => self.eval_map(body, *axis_size, (in_axes, out_axes), inputs)?,
            _ => kernels::apply(primitive, inputs, &out_avals)?,
        };

        if self.config.trace_enabled {
            self.trace.push(TraceEntry {
                primitive: primitive.name(),
                source,
                inputs: in_avals,
                outputs: outputs.clone(),
            });
        }
        Ok(outputs)
    }
}

impl Emitter for Evaluator {
    type Value = Array;

    fn bind(
        &mut self,
        primitive: Primitive,
        inputs: &[Array],
        source: Option<SourceLocation>,
    ) -> Result<Vec<Array>, CoreError> {
        self.apply(&primitive, inputs, source)
    }

    fn constant(&mut self, value: Array) -> Array {
        value
    }

    fn aval(&self, value: &Array) -> AbstractValue {
        value.aval()
    }
}

/// Evaluates `program` with the default configuration.
pub fn eval_closed(program: &ClosedProgram, args: &[Array]) -> Result<Vec<Array>, CoreError> {
    Evaluator::default().eval_closed(program, args)
}

/// Eager execution: every bind runs immediately.
#[derive(Debug, Default)]
pub struct Eager {
    evaluator: Evaluator,
}

impl Eager {
    pub fn new(config: EvalConfig) -> Self {
        Eager {
            evaluator: Evaluator::new(config),
        }
    }

    pub fn evaluator(&mut self) -> &mut Evaluator {
        &mut self.evaluator
    }
}

impl Emitter for Eager {
    type Value = Array;

    fn bind(
        &mut self,
        primitive: Primitive,
        inputs: &[Array],
        source: Option<SourceLocation>,
    ) -> Result<Vec<Array>, CoreError> {
        match &primitive {
            Primitive::Assert { messages } => {
                let in_avals: Vec<AbstractValue> = inputs.iter().map(Array::aval).collect();
                abstract_eval(&primitive, &in_avals)?;
                assert_eagerly(messages, &inputs[0], &inputs[1])?;
                Ok(Vec::new())
            }
            _ => self.evaluator.apply(&primitive, inputs, source),
        }
    }

    fn constant(&mut self, value: Array) -> Array {
        value
    }

    fn aval(&self, value: &Array) -> AbstractValue {
        value.aval()
    }
}

/// Fails with the message of the first position whose predicate is false.
fn assert_eagerly(
    messages: &BTreeMap<i64, String>,
    pred: &Array,
    code: &Array,
) -> Result<(), CoreError> {
    let failed = pred
        .as_bool_slice()
        .and_then(|p| p.iter().position(|ok| !ok));
    match failed {
        None => Ok(()),
        Some(i) => {
            let code = code.get(if code.shape().is_scalar() { 0 } else { i }).as_i64();
            let message = messages
                .get(&code)
                .cloned()
                .unwrap_or_else(|| format!("assertion with unknown code {code}"));
            Err(CoreError::AssertionFailed { message })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::trace;
    use crate::emit::Ops;
    use crate::types::{DType, Shape};

    fn f64_scalar() -> AbstractValue {
        AbstractValue::scalar(DType::F64)
    }

    #[test]
    fn evaluates_reciprocal() {
        let cp = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
            let one = b.f64(1.0);
            Ok(vec![b.div(&one, &args[0])?])
        })
        .unwrap();
        let out = eval_closed(&cp, &[Array::scalar_f64(2.0)]).unwrap();
        assert_eq!(out, vec![Array::scalar_f64(0.5)]);
    }

    #[test]
    fn rejects_wrong_arguments() {
        let cp = trace::<_, CoreError>(&[f64_scalar()], |_, args| Ok(args.to_vec())).unwrap();
        let err = eval_closed(&cp, &[Array::scalar_i64(1)]).unwrap_err();
        assert!(matches!(err, CoreError::ArgumentMismatch { index: 0, .. }));
    }

    #[test]
    fn staged_assert_is_unstageable() {
        let cp = trace::<_, CoreError>(&[AbstractValue::scalar(DType::Bool)], |b, args| {
            let code = b.i64(1);
            b.bind_n(Primitive::Assert { messages: BTreeMap::new() }, &[args[0].clone(), code])?;
            Ok(vec![])
        })
        .unwrap();
        let err = eval_closed(&cp, &[Array::scalar_bool(true)]).unwrap_err();
        assert!(matches!(err, CoreError::Unstageable { primitive: "assert" }));
    }

    #[test]
    fn eager_assert_fails_locally() {
        let mut eager = Eager::default();
        let messages = BTreeMap::from([(7, "x must be positive".to_string())]);
        let prim = Primitive::Assert { messages };
        let ok = eager.bind(prim.clone(), &[Array::scalar_bool(true), Array::scalar_i64(7)], None);
        assert!(ok.unwrap().is_empty());
        let err = eager
            .bind(prim, &[Array::scalar_bool(false), Array::scalar_i64(7)], None)
            .unwrap_err();
        assert!(matches!(err, CoreError::AssertionFailed { ref message } if message == "x must be positive"));
    }

    #[test]
    fn scan_accumulates_and_stacks() {
        let carry = AbstractValue::scalar(DType::I64);
        let body = trace::<_, CoreError>(&[carry.clone(), carry.clone()], |b, args| {
            let next = b.add(&args[0], &args[1])?;
            Ok(vec![next.clone(), next])
        })
        .unwrap();
        let cp = trace::<_, CoreError>(&[carry, AbstractValue::new(DType::I64, Shape::vector(4))], |b, args| {
            b.scan(body, 4, false, &[], &args[..1], &args[1..])
        })
        .unwrap();
        let out = eval_closed(&cp, &[Array::scalar_i64(0), Array::vector_i64(&[1, 2, 3, 4])]).unwrap();
        assert_eq!(out, vec![Array::scalar_i64(10), Array::vector_i64(&[1, 3, 6, 10])]);
    }

    #[test]
    fn while_counts_to_limit() {
        let counter = AbstractValue::scalar(DType::I64);
        let cond = trace::<_, CoreError>(&[counter.clone()], |b, args| {
            let ten = b.i64(10);
            Ok(vec![b.lt(&args[0], &ten)?])
        })
        .unwrap();
        let body = trace::<_, CoreError>(&[counter.clone()], |b, args| {
            let one = b.i64(1);
            Ok(vec![b.add(&args[0], &one)?])
        })
        .unwrap();
        let cp = trace::<_, CoreError>(&[counter], |b, args| {
            b.while_loop(cond, body, &[], &[], args)
        })
        .unwrap();
        assert_eq!(eval_closed(&cp, &[Array::scalar_i64(0)]).unwrap(), vec![Array::scalar_i64(10)]);

        let mut bounded = Evaluator::new(EvalConfig { max_while_iterations: 3, trace_enabled: false });
        let err = bounded.eval_closed(&cp, &[Array::scalar_i64(0)]).unwrap_err();
        assert!(matches!(err, CoreError::WhileIterationLimit { limit: 3 }));
    }

    #[test]
    fn cond_clamps_index() {
        let x = f64_scalar();
        let neg = trace::<_, CoreError>(&[x.clone()], |b, args| Ok(vec![b.neg(&args[0])?])).unwrap();
        let id = trace::<_, CoreError>(&[x.clone()], |_, args| Ok(args.to_vec())).unwrap();
        let cp = trace::<_, CoreError>(&[AbstractValue::scalar(DType::I64), x], |b, args| {
            b.cond(&args[0], vec![neg, id], &args[1..])
        })
        .unwrap();
        let run = |i| eval_closed(&cp, &[Array::scalar_i64(i), Array::scalar_f64(3.0)]).unwrap();
        assert_eq!(run(0), vec![Array::scalar_f64(-3.0)]);
        assert_eq!(run(1), vec![Array::scalar_f64(3.0)]);
        assert_eq!(run(9), vec![Array::scalar_f64(3.0)]);
    }

    #[test]
    fn map_splits_and_stacks() {
        let body = trace::<_, CoreError>(&[f64_scalar(), f64_scalar()], |b, args| {
            Ok(vec![b.mul(&args[0], &args[1])?])
        })
        .unwrap();
        let cp = trace::<_, CoreError>(
            &[AbstractValue::new(DType::F64, Shape::vector(3)), f64_scalar()],
            |b, args| b.map(body, 3, vec![Some(0), None], vec![0], args),
        )
        .unwrap();
        let out = eval_closed(&cp, &[Array::vector_f64(&[1.0, 2.0, 3.0]), Array::scalar_f64(2.0)]).unwrap();
        assert_eq!(out, vec![Array::vector_f64(&[2.0, 4.0, 6.0])]);
    }

    #[test]
    fn trace_records_each_equation() {
        let cp = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
            let y = b.exp(&args[0])?;
            Ok(vec![b.neg(&y)?])
        })
        .unwrap();
        let mut evaluator = Evaluator::new(EvalConfig { trace_enabled: true, ..EvalConfig::default() });
        evaluator.eval_closed(&cp, &[Array::scalar_f64(0.0)]).unwrap();
        let names: Vec<_> = evaluator.trace().iter().map(|e| e.primitive).collect();
        assert_eq!(names, vec!["exp", "neg"]);
    }
}
