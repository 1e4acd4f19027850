//! The functional error carrier threaded through checked execution.
//!
//! An [`ErrorValue`] is a triple `(err, code, messages)`. `err` and `code`
//! always share a shape: scalar inside the overlay, one entry per lane after
//! a batched call. A position that has triggered keeps its code; later
//! checks only fill in positions that are still clean.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use nanguard_core::{Array, CoreError, Emitter, Ops};
use serde::{Deserialize, Serialize};

use crate::error::CheckError;

static NEXT_CODE: AtomicI64 = AtomicI64::new(0);

/// Allocates a fresh error code. Codes start at 1 and are never reused in
/// this process; 0 means "no error recorded".
pub fn next_code() -> i64 {
    NEXT_CODE.fetch_add(1, Ordering::Relaxed) + 1
}

/// Error state: whether anything failed, which check failed first, and a
/// message for every code that can appear.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorValue<V = Array> {
    pub err: V,
    pub code: V,
    pub messages: BTreeMap<i64, String>,
}

impl<V> ErrorValue<V> {
    /// The untriggered error `(false, 0, {})` in `emitter`'s value space.
    pub fn init<E>(emitter: &mut E) -> Self
    where
        E: Emitter<Value = V> + ?Sized,
    {
        ErrorValue {
            err: emitter.bool(false),
            code: emitter.i64(0),
            messages: BTreeMap::new(),
        }
    }
}

impl ErrorValue<Array> {
    /// A concrete untriggered error.
    pub fn empty() -> Self {
        ErrorValue {
            err: Array::scalar_bool(false),
            code: Array::scalar_i64(0),
            messages: BTreeMap::new(),
        }
    }

    /// Returns `true` if any position has triggered.
    pub fn is_triggered(&self) -> bool {
        self.err
            .as_bool_slice()
            .is_some_and(|flags| flags.iter().any(|&f| f))
    }

    fn message_for(&self, code: i64) -> String {
        self.messages
            .get(&code)
            .cloned()
            .unwrap_or_else(|| format!("unknown error code {code}"))
    }

    /// Human-readable summary, or `None` if nothing triggered.
    ///
    /// A scalar error renders as its message. An array error renders one
    /// `at index <idx>: <message>` line per triggered position, in ascending
    /// index order.
    pub fn get(&self) -> Option<String> {
        let flags = self.err.as_bool_slice()?;
        let shape = self.err.shape();
        if shape.is_scalar() {
            return flags
                .first()
                .filter(|&&f| f)
                .map(|_| self.message_for(self.code.get(0).as_i64()));
        }

        let lines: Vec<String> = flags
            .iter()
            .enumerate()
            .filter(|(_, &f)| f)
            .map(|(flat, _)| {
                let index = shape.unravel(flat);
                let index = match index.as_slice() {
                    [i] => i.to_string(),
                    many => format!(
                        "({})",
                        many.iter().map(usize::to_string).collect::<Vec<_>>().join(", ")
                    ),
                };
                let message = self.message_for(self.code.get(flat).as_i64());
                format!("at index {index}: {message}")
            })
            .collect();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }

    /// Converts a triggered error into [`CheckError::Triggered`].
    pub fn throw(&self) -> Result<(), CheckError> {
        match self.get() {
            Some(summary) => Err(CheckError::Triggered { summary }),
            None => Ok(()),
        }
    }
}

/// Folds the assertion `pred` into `error` under a freshly allocated code.
///
/// Wherever `pred` is false and `error` has not yet triggered, the result
/// triggers with the new code.
pub fn assert_func<E: Emitter + ?Sized>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    pred: &E::Value,
    message: String,
) -> Result<ErrorValue<E::Value>, CoreError> {
    let code = next_code();
    let code_value = emitter.i64(code);
    fold(emitter, error, pred, &code_value, BTreeMap::from([(code, message)]))
}

/// `err' = err | !pred`, `code' = select(err, code, new_code)`, and the
/// message tables merged. Scalar parts are broadcast to the widest shape.
pub(crate) fn fold<E: Emitter + ?Sized>(
    emitter: &mut E,
    error: &ErrorValue<E::Value>,
    pred: &E::Value,
    new_code: &E::Value,
    messages: BTreeMap<i64, String>,
) -> Result<ErrorValue<E::Value>, CoreError> {
    let err_shape = emitter.aval(&error.err).shape;
    let pred_shape = emitter.aval(pred).shape;
    let shape = if pred_shape.rank() > err_shape.rank() {
        pred_shape
    } else {
        err_shape
    };

    let err = emitter.broadcast_to(&error.err, &shape)?;
    let old_code = emitter.broadcast_to(&error.code, &shape)?;
    let pred = emitter.broadcast_to(pred, &shape)?;
    let new_code = emitter.broadcast_to(new_code, &shape)?;

    let failed = emitter.not(&pred)?;
    let triggered = emitter.or(&err, &failed)?;
    let code = emitter.select(&err, &old_code, &new_code)?;

    let mut merged = error.messages.clone();
    merged.extend(messages);
    Ok(ErrorValue {
        err: triggered,
        code,
        messages: merged,
    })
}
