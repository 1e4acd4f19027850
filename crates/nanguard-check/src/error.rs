//! Error types for the checking transformation.
//!
//! Only contract violations end up here: misuse of the API, ill-typed
//! programs, or an eager assertion that fails outside the overlay. Numerical
//! failures found by checks never become a `CheckError`; they are recorded
//! in the returned [`ErrorValue`](crate::ErrorValue) instead, until a caller
//! opts into [`ErrorValue::throw`](crate::ErrorValue::throw).

use nanguard_core::{AbstractValue, CoreError};

/// Errors produced by the nanguard-check crate.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// Building, staging, or evaluating a program failed.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// `assert_` was given something other than a scalar `bool`.
    #[error("assert_ takes a scalar bool predicate, got {aval}")]
    NonScalarPredicate { aval: AbstractValue },

    /// Arguments to a batched call do not describe a consistent batch.
    #[error("invalid batch: {reason}")]
    InvalidBatch { reason: String },

    /// A triggered error value was converted into a failure.
    #[error("{summary}")]
    Triggered { summary: String },
}
