pub mod array;
pub mod builder;
pub mod emit;
pub mod error;
pub mod eval;
pub mod id;
pub mod ops;
mod pretty;
pub mod program;
pub mod shape_rules;
pub mod types;

// Re-export commonly used types
pub use array::{Array, ArrayData, Scalar};
pub use builder::{trace, ProgramBuilder};
pub use emit::{inline_program, Emitter, Ops};
pub use error::CoreError;
pub use eval::{eval_closed, Eager, EvalConfig, Evaluator, TraceEntry};
pub use id::Var;
pub use ops::{
    BinaryOp, CmpOp, CumulativeOp, GatherDimensionNumbers, Primitive, PrimitiveKind, ReduceOp,
    ScatterDimensionNumbers, ScatterKind, UnaryOp,
};
pub use program::{Atom, ClosedProgram, Equation, Program, SourceLocation};
pub use types::{AbstractValue, DType, Shape};
