//! The rule table: which check, if any, each primitive gets.
//!
//! A lookup miss means the primitive runs unchecked. The standard table is
//! built once per process and shared; custom tables start from
//! [`RuleTable::standard`] or [`RuleTable::empty`] and register rules per
//! [`PrimitiveKind`].

mod control;
mod leaf;

use std::fmt;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use nanguard_core::{
    AbstractValue, BinaryOp, ClosedProgram, CoreError, CumulativeOp, Emitter, Primitive,
    PrimitiveKind, ReduceOp, ScatterKind, SourceLocation, UnaryOp,
};

use crate::error_value::ErrorValue;

/// Builds a predicate program for a custom rule from the primitive's input
/// and output types. The program takes `inputs ++ outputs` and returns one
/// scalar `bool` that must be true.
pub type PredicateFn =
    fn(&[AbstractValue], &[AbstractValue]) -> Result<ClosedProgram, CoreError>;

/// A check attached to a primitive kind.
#[derive(Debug, Clone)]
pub enum CheckRule {
    /// No NaN in any floating-point output.
    Nan,
    /// Nonzero divisor, then the NaN check.
    Div,
    /// Every gather start index within `[0, dim - slice_size]`.
    GatherBounds,
    /// Scatter start indices in bounds, then the NaN check.
    ScatterBounds,
    /// Fold an `assert` equation into the error instead of executing it.
    AssertDischarge,
    /// Thread the error through every branch of a `cond`.
    Cond,
    /// Carry the error through a `scan` body.
    Scan,
    /// Carry the error through a `while` body, checking the loop predicate
    /// one iteration ahead.
    While,
    /// A user-supplied predicate over the primitive's inputs and outputs.
    Custom {
        predicate: PredicateFn,
        message: String,
    },
}

impl CheckRule {
    pub fn name(&self) -> &'static str {
        match self {
            CheckRule::Nan => "nan",
            CheckRule::Div => "div",
            CheckRule::GatherBounds => "gather-bounds",
            CheckRule::ScatterBounds => "scatter-bounds",
            CheckRule::AssertDischarge => "assert",
            CheckRule::Cond => "cond",
            CheckRule::Scan => "scan",
            CheckRule::While => "while",
            CheckRule::Custom { .. } => "custom",
        }
    }
}

impl fmt::Display for CheckRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckRule::Custom { message, .. } => write!(f, "custom({message})"),
            rule => f.write_str(rule.name()),
        }
    }
}

/// Primitives whose floating-point outputs get the NaN check.
const NAN_CHECKED_UNARY: &[UnaryOp] = &[
    UnaryOp::Floor,
    UnaryOp::Ceil,
    UnaryOp::Round,
    UnaryOp::Sign,
    UnaryOp::Abs,
    UnaryOp::Exp,
    UnaryOp::Expm1,
    UnaryOp::Log,
    UnaryOp::Log1p,
    UnaryOp::Sqrt,
    UnaryOp::Rsqrt,
    UnaryOp::Sin,
    UnaryOp::Cos,
    UnaryOp::Tan,
    UnaryOp::Tanh,
    UnaryOp::Sinh,
    UnaryOp::Cosh,
    UnaryOp::Asinh,
    UnaryOp::Acosh,
    UnaryOp::Atanh,
];

const NAN_CHECKED_BINARY: &[BinaryOp] = &[
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::Rem,
    BinaryOp::Pow,
    BinaryOp::Atan2,
    BinaryOp::Max,
    BinaryOp::Min,
    BinaryOp::ShiftLeft,
    BinaryOp::ShiftRightArithmetic,
    BinaryOp::ShiftRightLogical,
];

const NAN_CHECKED_OTHER: &[PrimitiveKind] = &[
    PrimitiveKind::Select,
    PrimitiveKind::Clamp,
    PrimitiveKind::ConvertElementType,
    PrimitiveKind::BroadcastInDim,
    PrimitiveKind::Concatenate,
    PrimitiveKind::Reshape,
    PrimitiveKind::Rev,
    PrimitiveKind::Transpose,
    PrimitiveKind::Slice,
    PrimitiveKind::Dot,
    PrimitiveKind::Reduce(ReduceOp::Sum),
    PrimitiveKind::Reduce(ReduceOp::Max),
    PrimitiveKind::Reduce(ReduceOp::Min),
    PrimitiveKind::Cumulative(CumulativeOp::Sum),
    PrimitiveKind::Cumulative(CumulativeOp::Prod),
    PrimitiveKind::Cumulative(CumulativeOp::Max),
    PrimitiveKind::Cumulative(CumulativeOp::Min),
];

const SCATTER_KINDS: &[ScatterKind] = &[
    ScatterKind::Replace,
    ScatterKind::Add,
    ScatterKind::Mul,
    ScatterKind::Min,
    ScatterKind::Max,
];

/// Mapping from primitive kind to its check rule, in registration order.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: IndexMap<PrimitiveKind, CheckRule>,
}

impl RuleTable {
    /// A table with no rules: every primitive runs unchecked.
    pub fn empty() -> Self {
        RuleTable::default()
    }

    /// The standard checks: NaN production, division by zero, gather and
    /// scatter bounds, assertion discharge, and control-flow threading.
    pub fn standard() -> Self {
        let mut table = RuleTable::empty();
        for &op in NAN_CHECKED_UNARY {
            table.register(PrimitiveKind::Unary(op), CheckRule::Nan);
        }
        for &op in NAN_CHECKED_BINARY {
            table.register(PrimitiveKind::Binary(op), CheckRule::Nan);
        }
        for &kind in NAN_CHECKED_OTHER {
            table.register(kind, CheckRule::Nan);
        }
        table.register(PrimitiveKind::Binary(BinaryOp::Div), CheckRule::Div);
        table.register(PrimitiveKind::Gather, CheckRule::GatherBounds);
        for &kind in SCATTER_KINDS {
            table.register(PrimitiveKind::Scatter(kind), CheckRule::ScatterBounds);
        }
        table.register(PrimitiveKind::Assert, CheckRule::AssertDischarge);
        table.register(PrimitiveKind::Cond, CheckRule::Cond);
        table.register(PrimitiveKind::Scan, CheckRule::Scan);
        table.register(PrimitiveKind::While, CheckRule::While);
        table
    }

    /// The process-wide standard table.
    pub fn global() -> Arc<RuleTable> {
        static GLOBAL: OnceLock<Arc<RuleTable>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(RuleTable::standard())))
    }

    /// Installs `rule` for `kind`, returning the rule it replaces.
    pub fn register(&mut self, kind: PrimitiveKind, rule: CheckRule) -> Option<CheckRule> {
        self.rules.insert(kind, rule)
    }

    pub fn unregister(&mut self, kind: PrimitiveKind) -> Option<CheckRule> {
        self.rules.shift_remove(&kind)
    }

    pub fn get(&self, kind: PrimitiveKind) -> Option<&CheckRule> {
        self.rules.get(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PrimitiveKind, &CheckRule)> {
        self.rules.iter().map(|(kind, rule)| (*kind, rule))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// One intercepted primitive application, with operands already unwrapped
/// into the underlying emitter's values.
#[derive(Debug)]
pub(crate) struct Application<V> {
    pub primitive: Primitive,
    pub inputs: Vec<V>,
    pub source: Option<SourceLocation>,
}

impl<V> Application<V> {
    /// Source location used in check messages.
    pub fn summary(&self) -> String {
        match &self.source {
            Some(loc) => loc.to_string(),
            None => "<unknown location>".to_string(),
        }
    }
}

pub(crate) type RuleOutput<V> = (Vec<V>, ErrorValue<V>);

/// Runs `rule` for one application, returning its outputs and the new error.
pub(crate) fn apply_rule<E: Emitter>(
    rule: &CheckRule,
    emitter: &mut E,
    table: &Arc<RuleTable>,
    error: &ErrorValue<E::Value>,
    app: Application<E::Value>,
) -> Result<RuleOutput<E::Value>, CoreError> {
    tracing::trace!(
        primitive = app.primitive.name(),
        rule = rule.name(),
        "applying check rule"
    );
    match rule {
        CheckRule::Nan => leaf::nan_rule(emitter, error, app),
        CheckRule::Div => leaf::div_rule(emitter, error, app),
        CheckRule::GatherBounds => leaf::gather_rule(emitter, error, app),
        CheckRule::ScatterBounds => leaf::scatter_rule(emitter, error, app),
        CheckRule::AssertDischarge => leaf::assert_rule(emitter, error, app),
        CheckRule::Custom { predicate, message } => {
            leaf::custom_rule(emitter, error, app, *predicate, message)
        }
        CheckRule::Cond => control::cond_rule(emitter, table, error, app),
        CheckRule::Scan => control::scan_rule(emitter, table, error, app),
        CheckRule::While => control::while_rule(emitter, table, error, app),
    }
}

fn rule_mismatch(rule: &'static str, primitive: &Primitive) -> CoreError {
    CoreError::InvalidParams {
        primitive: primitive.name(),
        reason: format!("the {rule} rule cannot check this primitive"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_table_covers_checked_primitives() {
        let table = RuleTable::standard();
        assert!(matches!(
            table.get(PrimitiveKind::Binary(BinaryOp::Div)),
            Some(CheckRule::Div)
        ));
        assert!(matches!(
            table.get(PrimitiveKind::Unary(UnaryOp::Log)),
            Some(CheckRule::Nan)
        ));
        assert!(matches!(
            table.get(PrimitiveKind::Scatter(ScatterKind::Add)),
            Some(CheckRule::ScatterBounds)
        ));
        assert!(table.get(PrimitiveKind::Unary(UnaryOp::Neg)).is_none());
        assert!(table.get(PrimitiveKind::Call).is_none());
    }

    #[test]
    fn register_and_unregister() {
        let mut table = RuleTable::standard();
        let before = table.len();
        let old = table.register(PrimitiveKind::Binary(BinaryOp::Div), CheckRule::Nan);
        assert!(matches!(old, Some(CheckRule::Div)));
        assert_eq!(table.len(), before);
        assert!(table.unregister(PrimitiveKind::Gather).is_some());
        assert!(table.get(PrimitiveKind::Gather).is_none());
        assert_eq!(table.len(), before - 1);
    }

    #[test]
    fn global_table_is_shared() {
        let a = RuleTable::global();
        let b = RuleTable::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!a.is_empty());
    }

    #[test]
    fn iteration_follows_registration_order() {
        let mut table = RuleTable::empty();
        table.register(PrimitiveKind::Gather, CheckRule::GatherBounds);
        table.register(PrimitiveKind::Assert, CheckRule::AssertDischarge);
        let kinds: Vec<_> = table.iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec![PrimitiveKind::Gather, PrimitiveKind::Assert]);
    }
}
