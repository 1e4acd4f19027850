//! Core error types for nanguard-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! malformed programs, ill-typed primitive applications, and evaluation
//! failures that are contract violations rather than numerical results.

use thiserror::Error;

use crate::id::Var;
use crate::types::{AbstractValue, DType, Shape};

/// Core errors produced by the nanguard-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A primitive received the wrong number of operands.
    #[error("{primitive}: expected {expected} operand(s), got {actual}")]
    ArityMismatch {
        primitive: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Two operands that must share a dtype do not.
    #[error("{primitive}: dtype mismatch, expected {expected}, got {actual}")]
    DTypeMismatch {
        primitive: &'static str,
        expected: DType,
        actual: DType,
    },

    /// A primitive does not accept operands of this dtype.
    #[error("{primitive}: unsupported dtype {dtype}")]
    UnsupportedDType {
        primitive: &'static str,
        dtype: DType,
    },

    /// Two operands that must share a shape do not.
    #[error("{primitive}: shape mismatch, expected {expected}, got {actual}")]
    ShapeMismatch {
        primitive: &'static str,
        expected: Shape,
        actual: Shape,
    },

    /// Static parameters of a primitive are inconsistent with its operands.
    #[error("{primitive}: invalid parameters: {reason}")]
    InvalidParams {
        primitive: &'static str,
        reason: String,
    },

    /// An embedded sub-program does not match the signature its call site needs.
    #[error("{primitive}: sub-program signature mismatch: {reason}")]
    SignatureMismatch {
        primitive: &'static str,
        reason: String,
    },

    /// An argument passed to a program does not match its declared input type.
    #[error("argument {index}: expected {expected}, got {actual}")]
    ArgumentMismatch {
        index: usize,
        expected: AbstractValue,
        actual: AbstractValue,
    },

    /// A variable is read before any binding defines it.
    #[error("unbound variable {var}")]
    UnboundVar { var: Var },

    /// A variable is bound twice (SSA violation).
    #[error("variable {var} is bound more than once")]
    DuplicateBinding { var: Var },

    /// Flat data length does not match the declared shape.
    #[error("element count mismatch: shape {shape} needs {expected} element(s), got {actual}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        actual: usize,
    },

    /// A primitive that only exists under the checking overlay reached
    /// lowering or evaluation without it.
    #[error("primitive '{primitive}' cannot be staged outside the checking overlay")]
    Unstageable { primitive: &'static str },

    /// An eagerly bound assertion failed.
    #[error("assertion failed: {message}")]
    AssertionFailed { message: String },

    /// A while loop exceeded the configured iteration bound.
    #[error("while loop exceeded {limit} iteration(s)")]
    WhileIterationLimit { limit: usize },

    /// Program (de)serialization failed.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
