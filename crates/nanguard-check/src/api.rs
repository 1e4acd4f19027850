//! Entry points: `checkify`, its staged and batched compositions, and
//! `assert_`.

use std::collections::BTreeMap;
use std::sync::Arc;

use nanguard_core::{
    inline_program, trace, AbstractValue, Array, Atom, ClosedProgram, CoreError, DType, Eager,
    EvalConfig, Emitter, Evaluator, Ops, Primitive, ProgramBuilder, SourceLocation, TraceEntry,
};
use serde::{Deserialize, Serialize};

use crate::config::CheckifyConfig;
use crate::error::CheckError;
use crate::error_value::{next_code, ErrorValue};
use crate::subprogram::split_error;
use crate::trace::{ErrorTrace, Tracked};

/// A program prepared for checked execution.
#[derive(Debug, Clone)]
pub struct Checkified {
    program: ClosedProgram,
    config: CheckifyConfig,
}

/// Transforms `program` so that calling it also returns an [`ErrorValue`].
pub fn checkify(program: &ClosedProgram) -> Checkified {
    checkify_with(program, CheckifyConfig::default())
}

pub fn checkify_with(program: &ClosedProgram, config: CheckifyConfig) -> Checkified {
    Checkified {
        program: program.clone(),
        config,
    }
}

/// Stages `f` over inputs of the given types and checkifies the result.
pub fn checkify_fn<F>(in_avals: &[AbstractValue], f: F) -> Result<Checkified, CheckError>
where
    F: FnOnce(&mut ProgramBuilder, &[Atom]) -> Result<Vec<Atom>, CheckError>,
{
    let program = trace(in_avals, f)?;
    Ok(checkify(&program))
}

impl Checkified {
    /// The unchecked program.
    pub fn program(&self) -> &ClosedProgram {
        &self.program
    }

    pub fn config(&self) -> &CheckifyConfig {
        &self.config
    }

    /// Runs the program eagerly under the checking overlay.
    pub fn call(&self, args: &[Array]) -> Result<(ErrorValue, Vec<Array>), CheckError> {
        let (error, outputs, _) = self.run_eager(args, self.config.eval.clone())?;
        Ok((error, outputs))
    }

    /// Like [`call`](Self::call), also returning the execution trace.
    pub fn call_traced(
        &self,
        args: &[Array],
    ) -> Result<(ErrorValue, Vec<Array>, Vec<TraceEntry>), CheckError> {
        let eval = EvalConfig {
            trace_enabled: true,
            ..self.config.eval.clone()
        };
        self.run_eager(args, eval)
    }

    fn run_eager(
        &self,
        args: &[Array],
        eval: EvalConfig,
    ) -> Result<(ErrorValue, Vec<Array>, Vec<TraceEntry>), CheckError> {
        self.program.check_args(args)?;
        let mut eager = Eager::new(eval);
        let initial = ErrorValue::init(&mut eager);
        let mut overlay = ErrorTrace::new(&mut eager, Arc::clone(&self.config.rules), initial);
        let tracked: Vec<Tracked<Array>> = args.iter().cloned().map(Tracked::Tracked).collect();
        let outputs = inline_program(&mut overlay, &self.program, &tracked)?;
        let error = overlay.finish();
        let trace = eager.evaluator().take_trace();
        let outputs = outputs.into_iter().map(Tracked::into_value).collect();
        Ok((error, outputs, trace))
    }

    /// Stages the checked program. Its first two outputs are the error flag
    /// and code; the rest are the original outputs.
    pub fn stage(&self) -> Result<StagedCheck, CheckError> {
        let mut builder = ProgramBuilder::new();
        let args: Vec<Tracked<Atom>> = self
            .program
            .in_avals()?
            .into_iter()
            .map(|aval| Tracked::Tracked(builder.add_input(aval)))
            .collect();
        let initial = ErrorValue::init(&mut builder);
        let mut overlay = ErrorTrace::new(&mut builder, Arc::clone(&self.config.rules), initial);
        let outputs = inline_program(&mut overlay, &self.program, &args)?;
        let error = overlay.finish();

        let mut atoms = vec![error.err, error.code];
        atoms.extend(outputs.into_iter().map(Tracked::into_value));
        let program = builder.finish(atoms);
        tracing::debug!(
            equations = program.program.equations.len(),
            codes = error.messages.len(),
            "staged checked program"
        );
        Ok(StagedCheck {
            program,
            messages: error.messages,
        })
    }

    /// Runs the staged checked program once per lane of a batch.
    ///
    /// `in_axes[i]` names the batch axis of argument `i`, or `None` to
    /// broadcast it. The returned error has one entry per lane; outputs are
    /// batched on axis 0.
    pub fn call_batched(
        &self,
        args: &[Array],
        in_axes: &[Option<usize>],
    ) -> Result<(ErrorValue, Vec<Array>), CheckError> {
        if args.len() != in_axes.len() {
            return Err(CheckError::InvalidBatch {
                reason: format!("{} argument(s) but {} axis spec(s)", args.len(), in_axes.len()),
            });
        }
        let axis_size = batch_size(args, in_axes)?;
        let staged = self.stage()?;
        let map = Primitive::Map {
            out_axes: vec![0; staged.program.num_outputs()],
            body: staged.program.clone(),
            axis_size,
            in_axes: in_axes.to_vec(),
        };
        let outputs = Evaluator::new(self.config.eval.clone()).apply(&map, args, None)?;
        staged.unpack(outputs)
    }
}

fn batch_size(args: &[Array], in_axes: &[Option<usize>]) -> Result<usize, CheckError> {
    let mut size = None;
    for (i, (arg, axis)) in args.iter().zip(in_axes).enumerate() {
        let Some(axis) = axis else { continue };
        let n = arg
            .shape()
            .dims()
            .get(*axis)
            .copied()
            .ok_or_else(|| CheckError::InvalidBatch {
                reason: format!("argument {i} of shape {} has no axis {axis}", arg.shape()),
            })?;
        match size {
            None => size = Some(n),
            Some(expected) if expected != n => {
                return Err(CheckError::InvalidBatch {
                    reason: format!("argument {i} has batch size {n}, expected {expected}"),
                })
            }
            Some(_) => {}
        }
    }
    size.ok_or_else(|| CheckError::InvalidBatch {
        reason: "no argument is batched".to_string(),
    })
}

/// A staged checked program together with its message table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedCheck {
    pub program: ClosedProgram,
    pub messages: BTreeMap<i64, String>,
}

impl StagedCheck {
    pub fn call(&self, args: &[Array]) -> Result<(ErrorValue, Vec<Array>), CheckError> {
        self.call_with(args, &EvalConfig::default())
    }

    pub fn call_with(
        &self,
        args: &[Array],
        config: &EvalConfig,
    ) -> Result<(ErrorValue, Vec<Array>), CheckError> {
        let outputs = Evaluator::new(config.clone()).eval_closed(&self.program, args)?;
        self.unpack(outputs)
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserializes a staged program, validating its body.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let staged: StagedCheck = serde_json::from_str(json)?;
        staged.program.validate()?;
        Ok(staged)
    }

    fn unpack(&self, outputs: Vec<Array>) -> Result<(ErrorValue, Vec<Array>), CheckError> {
        let (err, code, outputs) = split_error(outputs, 0)?;
        let error = ErrorValue {
            err,
            code,
            messages: self.messages.clone(),
        };
        Ok((error, outputs))
    }
}

/// Records the assertion that `pred` holds.
///
/// Under the checking overlay a false `pred` is folded into the error value
/// with `message`. Bound eagerly outside it, a false `pred` fails right
/// away. Staged outside it, the program cannot be evaluated.
#[track_caller]
pub fn assert_<E: Emitter + ?Sized>(
    emitter: &mut E,
    pred: &E::Value,
    message: impl Into<String>,
) -> Result<(), CheckError> {
    let aval = emitter.aval(pred);
    if aval != AbstractValue::scalar(DType::Bool) {
        return Err(CheckError::NonScalarPredicate { aval });
    }
    let code = next_code();
    let code_value = emitter.i64(code);
    let messages = BTreeMap::from([(code, message.into())]);
    emitter.bind(
        Primitive::Assert { messages },
        &[pred.clone(), code_value],
        Some(SourceLocation::caller()),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar() -> AbstractValue {
        AbstractValue::scalar(DType::F64)
    }

    #[test]
    fn assert_rejects_non_scalar_predicate() {
        let mut eager = Eager::default();
        let pred = Array::vector_bool(&[true, true]);
        let err = assert_(&mut eager, &pred, "never").unwrap_err();
        assert!(matches!(err, CheckError::NonScalarPredicate { .. }));
    }

    #[test]
    fn eager_assert_fails_locally() {
        let mut eager = Eager::default();
        let err = assert_(&mut eager, &Array::scalar_bool(false), "must hold").unwrap_err();
        assert!(matches!(
            err,
            CheckError::Core(CoreError::AssertionFailed { ref message }) if message == "must hold"
        ));
        assert!(assert_(&mut eager, &Array::scalar_bool(true), "must hold").is_ok());
    }

    #[test]
    fn staged_assert_without_overlay_is_unstageable() {
        let program = trace::<_, CheckError>(&[scalar()], |b, args| {
            let zero = b.f64(0.0);
            let positive = b.gt(&args[0], &zero)?;
            assert_(b, &positive, "x must be positive")?;
            Ok(args.to_vec())
        })
        .unwrap();
        let err = nanguard_core::eval_closed(&program, &[Array::scalar_f64(1.0)]).unwrap_err();
        assert!(matches!(err, CoreError::Unstageable { primitive: "assert" }));
    }

    #[test]
    fn assert_is_discharged_under_checkify() {
        let checked = checkify_fn(&[scalar()], |b, args| {
            let zero = b.f64(0.0);
            let positive = b.gt(&args[0], &zero)?;
            assert_(b, &positive, "x must be positive")?;
            Ok(vec![b.neg(&args[0])?])
        })
        .unwrap();

        let (error, out) = checked.call(&[Array::scalar_f64(-2.0)]).unwrap();
        assert_eq!(error.get().as_deref(), Some("x must be positive"));
        assert_eq!(out, vec![Array::scalar_f64(2.0)]);

        let (error, _) = checked.call(&[Array::scalar_f64(3.0)]).unwrap();
        assert_eq!(error.get(), None);
    }

    #[test]
    fn staged_program_matches_eager() {
        let checked = checkify_fn(&[scalar()], |b, args| {
            let one = b.f64(1.0);
            Ok(vec![b.div(&one, &args[0])?])
        })
        .unwrap();
        let staged = checked.stage().unwrap();
        assert_eq!(staged.program.num_outputs(), 3);

        let (error, out) = staged.call(&[Array::scalar_f64(4.0)]).unwrap();
        assert_eq!(error.get(), None);
        assert_eq!(out, vec![Array::scalar_f64(0.25)]);

        let (error, _) = staged.call(&[Array::scalar_f64(0.0)]).unwrap();
        assert!(error.get().unwrap().starts_with("divided by zero at "));

        let restored = StagedCheck::from_json(&staged.to_json().unwrap()).unwrap();
        assert_eq!(restored, staged);
    }

    #[test]
    fn call_traced_records_equations() {
        let checked = checkify_fn(&[scalar()], |b, args| Ok(vec![b.exp(&args[0])?])).unwrap();
        let (_, _, trace) = checked.call_traced(&[Array::scalar_f64(0.0)]).unwrap();
        assert!(trace.iter().any(|entry| entry.primitive == "exp"));
    }

    #[test]
    fn batch_size_validation() {
        let checked = checkify_fn(&[scalar()], |_, args| Ok(args.to_vec())).unwrap();
        let err = checked
            .call_batched(&[Array::vector_f64(&[1.0])], &[None])
            .unwrap_err();
        assert!(matches!(err, CheckError::InvalidBatch { .. }));
        let err = checked
            .call_batched(&[Array::vector_f64(&[1.0])], &[])
            .unwrap_err();
        assert!(matches!(err, CheckError::InvalidBatch { .. }));
    }
}
