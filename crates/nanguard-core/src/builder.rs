//! Staging: recording primitive applications into a [`ClosedProgram`].
//!
//! [`ProgramBuilder`] is the staging [`Emitter`]. Every bind runs the
//! primitive's shape rule, allocates typed output variables, and appends an
//! equation. Scalar constants become inline literals; larger constants are
//! hoisted into constant variables of the resulting [`ClosedProgram`].

use smallvec::SmallVec;

use crate::array::Array;
use crate::emit::Emitter;
use crate::error::CoreError;
use crate::ops::Primitive;
use crate::program::{Atom, ClosedProgram, Equation, Program, SourceLocation};
use crate::shape_rules::abstract_eval;
use crate::types::AbstractValue;

/// Incrementally builds one program.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    program: Program,
    consts: Vec<Array>,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder::default()
    }

    /// Declares the next program input.
    pub fn add_input(&mut self, aval: AbstractValue) -> Atom {
        let var = self.program.new_var(aval);
        self.program.invars.push(var);
        Atom::Var(var)
    }

    /// The program staged so far.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Closes the program over its hoisted constants.
    pub fn finish(mut self, outputs: Vec<Atom>) -> ClosedProgram {
        self.program.outvars = outputs;
        ClosedProgram::new(self.program, self.consts)
    }
}

impl Emitter for ProgramBuilder {
    type Value = Atom;

    fn bind(
        &mut self,
        primitive: Primitive,
        inputs: &[Atom],
        source: Option<SourceLocation>,
    ) -> Result<Vec<Atom>, CoreError> {
        let in_avals = inputs
            .iter()
            .map(|atom| self.program.atom_aval(atom))
            .collect::<Result<Vec<_>, _>>()?;
        let out_avals = abstract_eval(&primitive, &in_avals)?;
        let outputs: SmallVec<[_; 2]> = out_avals
            .into_iter()
            .map(|aval| self.program.new_var(aval))
            .collect();
        tracing::trace!(
            primitive = primitive.name(),
            outputs = outputs.len(),
            "staged equation"
        );
        let atoms = outputs.iter().map(|var| Atom::Var(*var)).collect();
        self.program.equations.push(Equation {
            primitive,
            inputs: inputs.iter().cloned().collect(),
            outputs,
            source,
        });
        Ok(atoms)
    }

    fn constant(&mut self, value: Array) -> Atom {
        if value.shape().is_scalar() {
            return Atom::Literal(value);
        }
        let var = self.program.new_var(value.aval());
        self.program.constvars.push(var);
        self.consts.push(value);
        Atom::Var(var)
    }

    fn aval(&self, value: &Atom) -> AbstractValue {
        match value {
            Atom::Var(var) => self.program.vars[var.index()].clone(),
            Atom::Literal(array) => array.aval(),
        }
    }
}

/// Stages `f` over fresh inputs of the given types.
///
/// ```ignore
/// let program = trace(&[AbstractValue::scalar(DType::F64)], |b, args| {
///     let one = b.f64(1.0);
///     Ok(vec![b.div(&one, &args[0])?])
/// })?;
/// ```
pub fn trace<F, E>(in_avals: &[AbstractValue], f: F) -> Result<ClosedProgram, E>
where
    F: FnOnce(&mut ProgramBuilder, &[Atom]) -> Result<Vec<Atom>, E>,
    E: From<CoreError>,
{
    let mut builder = ProgramBuilder::new();
    let args: Vec<Atom> = in_avals
        .iter()
        .map(|aval| builder.add_input(aval.clone()))
        .collect();
    let outputs = f(&mut builder, &args)?;
    Ok(builder.finish(outputs))
}
