//! The checking overlay: an [`Emitter`] that wraps another emitter and
//! threads an [`ErrorValue`] through everything bound on it.
//!
//! Values flowing through the overlay are [`Tracked`] when they derive from
//! a checked function's inputs, and [`Tracked::Untracked`] when they are
//! constants. First-order primitives consult the rule table; `call` and
//! `map` have their bodies rewritten to take and return the error state;
//! `cond`, `scan` and `while` are rewritten by their rules.
//!
//! The overlay owns its error exclusively. [`ErrorTrace::finish`] consumes
//! the overlay and hands the error back.

use std::sync::Arc;

use nanguard_core::{
    AbstractValue, Array, ClosedProgram, CoreError, Emitter, Ops, Primitive, PrimitiveKind,
    SourceLocation,
};

use crate::error_value::ErrorValue;
use crate::rules::{apply_rule, Application, RuleTable};
use crate::subprogram::{checkify_subprogram, split_error, ErrorAvals, ErrorSlots};

/// A value seen by the overlay.
#[derive(Debug, Clone, PartialEq)]
pub enum Tracked<V> {
    /// Derived from the checked function's inputs.
    Tracked(V),
    /// A constant introduced inside the function.
    Untracked(V),
}

impl<V> Tracked<V> {
    pub fn value(&self) -> &V {
        match self {
            Tracked::Tracked(v) | Tracked::Untracked(v) => v,
        }
    }

    pub fn into_value(self) -> V {
        match self {
            Tracked::Tracked(v) | Tracked::Untracked(v) => v,
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, Tracked::Tracked(_))
    }
}

/// Overlay interpreter over an underlying emitter `E`.
pub struct ErrorTrace<'e, E: Emitter> {
    emitter: &'e mut E,
    rules: Arc<RuleTable>,
    error: ErrorValue<E::Value>,
}

impl<'e, E: Emitter> ErrorTrace<'e, E> {
    pub fn new(emitter: &'e mut E, rules: Arc<RuleTable>, error: ErrorValue<E::Value>) -> Self {
        ErrorTrace {
            emitter,
            rules,
            error,
        }
    }

    /// The error state accumulated so far.
    pub fn error(&self) -> &ErrorValue<E::Value> {
        &self.error
    }

    /// Leaves the overlay, returning the final error state.
    pub fn finish(self) -> ErrorValue<E::Value> {
        self.error
    }

    fn error_avals(&self) -> ErrorAvals {
        ErrorAvals {
            err: self.emitter.aval(&self.error.err),
            code: self.emitter.aval(&self.error.code),
        }
    }

    /// Replaces the current flag and code, merging in new messages.
    fn install(
        &mut self,
        err: E::Value,
        code: E::Value,
        messages: std::collections::BTreeMap<i64, String>,
    ) {
        self.error.err = err;
        self.error.code = code;
        self.error.messages.extend(messages);
    }

    fn process_primitive(
        &mut self,
        primitive: Primitive,
        inputs: &[Tracked<E::Value>],
        source: Option<SourceLocation>,
    ) -> Result<Vec<Tracked<E::Value>>, CoreError> {
        let kind = primitive.kind();
        let values: Vec<E::Value> = inputs.iter().map(|v| v.value().clone()).collect();
        let intercept = kind.is_higher_order()
            || kind == PrimitiveKind::Assert
            || inputs.iter().any(Tracked::is_tracked);
        if !intercept {
            let outputs = self.emitter.bind(primitive, &values, source)?;
            return Ok(outputs.into_iter().map(Tracked::Untracked).collect());
        }

        let rules = Arc::clone(&self.rules);
        let outputs = match primitive {
            Primitive::Call { name, body } => self.process_call(name, &body, values, source)?,
            Primitive::Map {
                body,
                axis_size,
                in_axes,
                out_axes,
            } => self.process_map(&body, axis_size, (in_axes, out_axes), values, source)?,
            primitive => match rules.get(kind) {
                Some(rule) => {
                    let app = Application {
                        primitive,
                        inputs: values,
                        source,
                    };
                    let (outputs, error) =
                        apply_rule(rule, &mut *self.emitter, &self.rules, &self.error, app)?;
                    self.error = error;
                    outputs
                }
                None => self.emitter.bind(primitive, &values, source)?,
            },
        };
        Ok(outputs.into_iter().map(Tracked::Tracked).collect())
    }

    /// `call`: the body takes and returns the error as its first two
    /// operands and results.
    fn process_call(
        &mut self,
        name: String,
        body: &ClosedProgram,
        values: Vec<E::Value>,
        source: Option<SourceLocation>,
    ) -> Result<Vec<E::Value>, CoreError> {
        let (checked, messages) =
            checkify_subprogram(&self.rules, body, ErrorSlots::LEADING, &self.error_avals())?;
        let mut inputs = vec![self.error.err.clone(), self.error.code.clone()];
        inputs.extend(values);
        let outputs = self.emitter.bind(
            Primitive::Call {
                name,
                body: checked,
            },
            &inputs,
            source,
        )?;
        let (err, code, rest) = split_error(outputs, 0)?;
        self.install(err, code, messages);
        Ok(rest)
    }

    /// `map`: like `call`, with the incoming error broadcast to every lane
    /// and the per-lane errors reduced back to one.
    fn process_map(
        &mut self,
        body: &ClosedProgram,
        axis_size: usize,
        (in_axes, out_axes): (Vec<Option<usize>>, Vec<usize>),
        values: Vec<E::Value>,
        source: Option<SourceLocation>,
    ) -> Result<Vec<E::Value>, CoreError> {
        let (checked, messages) =
            checkify_subprogram(&self.rules, body, ErrorSlots::LEADING, &self.error_avals())?;
        let mut inputs = vec![self.error.err.clone(), self.error.code.clone()];
        inputs.extend(values);
        let outputs = self.emitter.bind(
            Primitive::Map {
                body: checked,
                axis_size,
                in_axes: [None, None].into_iter().chain(in_axes).collect(),
                out_axes: [0, 0].into_iter().chain(out_axes).collect(),
            },
            &inputs,
            source,
        )?;
        let (errs, codes, rest) = split_error(outputs, 0)?;
        if axis_size == 0 {
            self.error.messages.extend(messages);
        } else {
            let (err, code) = reduce_batched(&mut *self.emitter, &errs, &codes)?;
            self.install(err, code, messages);
        }
        Ok(rest)
    }
}

impl<E: Emitter> Emitter for ErrorTrace<'_, E> {
    type Value = Tracked<E::Value>;

    fn bind(
        &mut self,
        primitive: Primitive,
        inputs: &[Tracked<E::Value>],
        source: Option<SourceLocation>,
    ) -> Result<Vec<Tracked<E::Value>>, CoreError> {
        self.process_primitive(primitive, inputs, source)
    }

    fn constant(&mut self, value: Array) -> Tracked<E::Value> {
        Tracked::Untracked(self.emitter.constant(value))
    }

    fn aval(&self, value: &Tracked<E::Value>) -> AbstractValue {
        self.emitter.aval(value.value())
    }
}

/// Collapses per-lane error flags and codes (batched on axis 0) into one.
///
/// Lanes are stably sorted by flag and the last one is kept, so the result
/// is triggered whenever any lane is, carrying the code of a triggered lane.
pub fn reduce_batched<E: Emitter + ?Sized>(
    emitter: &mut E,
    errs: &E::Value,
    codes: &E::Value,
) -> Result<(E::Value, E::Value), CoreError> {
    let shape = emitter.aval(errs).shape;
    let dims = shape.dims();
    let Some(&lanes) = dims.first().filter(|&&n| n > 0) else {
        return Err(CoreError::InvalidParams {
            primitive: "map",
            reason: "cannot reduce errors over an empty batch".to_string(),
        });
    };
    let sorted = emitter.sort(&[errs.clone(), codes.clone()], 0, 1)?;
    let mut start = vec![0; dims.len()];
    start[0] = lanes - 1;
    let limit = dims.to_vec();
    let lane = shape.without_axis(0);

    let err = emitter.slice(&sorted[0], &start, &limit)?;
    let err = emitter.reshape(&err, lane.clone())?;
    let code = emitter.slice(&sorted[1], &start, &limit)?;
    let code = emitter.reshape(&code, lane)?;
    tracing::debug!(lanes, "reduced batched errors");
    Ok((err, code))
}
