//! SSA programs: the intermediate representation every transformation works on.
//!
//! A [`Program`] owns an arena of variable types indexed by [`Var`], the
//! constant and input variables, a flat list of [`Equation`]s in evaluation
//! order, and the output atoms. A [`ClosedProgram`] pairs a program with
//! the concrete values of its constant variables, so it can be evaluated or
//! embedded in a higher-order primitive without outside context.

use std::fmt;
use std::panic::Location;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::array::Array;
use crate::error::CoreError;
use crate::id::Var;
use crate::ops::Primitive;
use crate::shape_rules::abstract_eval;
use crate::types::AbstractValue;

/// An equation operand: a variable or an inline scalar literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Atom {
    Var(Var),
    Literal(Array),
}

impl From<Var> for Atom {
    fn from(var: Var) -> Self {
        Atom::Var(var)
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Atom::Var(var) => write!(f, "{var}"),
            Atom::Literal(value) => write!(f, "{value}"),
        }
    }
}

/// Where in user code an equation was staged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn from_location(location: &Location<'_>) -> Self {
        SourceLocation {
            file: location.file().to_string(),
            line: location.line(),
            column: location.column(),
        }
    }

    /// Location of the caller of the enclosing `#[track_caller]` function.
    #[track_caller]
    pub fn caller() -> Self {
        SourceLocation::from_location(Location::caller())
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// One primitive application: `outputs = primitive(inputs)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Equation {
    pub primitive: Primitive,
    pub inputs: SmallVec<[Atom; 4]>,
    pub outputs: SmallVec<[Var; 2]>,
    pub source: Option<SourceLocation>,
}

impl Equation {
    /// Human-readable location used in check messages.
    pub fn source_summary(&self) -> String {
        match &self.source {
            Some(loc) => loc.to_string(),
            None => "<unknown location>".to_string(),
        }
    }
}

/// An open SSA program. Constant variables are bound by the enclosing
/// [`ClosedProgram`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub vars: Vec<AbstractValue>,
    pub constvars: Vec<Var>,
    pub invars: Vec<Var>,
    pub outvars: Vec<Atom>,
    pub equations: Vec<Equation>,
}

impl Program {
    pub fn new() -> Self {
        Program::default()
    }

    /// Allocates a fresh variable of type `aval`.
    pub fn new_var(&mut self, aval: AbstractValue) -> Var {
        let var = Var(self.vars.len() as u32);
        self.vars.push(aval);
        var
    }

    pub fn var_aval(&self, var: Var) -> Result<&AbstractValue, CoreError> {
        self.vars.get(var.index()).ok_or(CoreError::UnboundVar { var })
    }

    pub fn atom_aval(&self, atom: &Atom) -> Result<AbstractValue, CoreError> {
        match atom {
            Atom::Var(var) => self.var_aval(*var).cloned(),
            Atom::Literal(value) => Ok(value.aval()),
        }
    }

    pub fn in_avals(&self) -> Result<Vec<AbstractValue>, CoreError> {
        self.invars.iter().map(|v| self.var_aval(*v).cloned()).collect()
    }

    pub fn const_avals(&self) -> Result<Vec<AbstractValue>, CoreError> {
        self.constvars.iter().map(|v| self.var_aval(*v).cloned()).collect()
    }

    pub fn out_avals(&self) -> Result<Vec<AbstractValue>, CoreError> {
        self.outvars.iter().map(|a| self.atom_aval(a)).collect()
    }

    /// Checks SSA well-formedness and re-derives every equation's output
    /// types from its shape rule.
    ///
    /// # Errors
    ///
    /// - [`CoreError::UnboundVar`] if a variable is read before it is bound
    /// - [`CoreError::DuplicateBinding`] if a variable is bound twice
    /// - any shape-rule error, including sub-program signature mismatches
    pub fn validate(&self) -> Result<(), CoreError> {
        let mut bound = vec![false; self.vars.len()];
        let bind = |var: Var, bound: &mut Vec<bool>| -> Result<(), CoreError> {
            let slot = bound
                .get_mut(var.index())
                .ok_or(CoreError::UnboundVar { var })?;
            if *slot {
                return Err(CoreError::DuplicateBinding { var });
            }
            *slot = true;
            Ok(())
        };
        let read = |atom: &Atom, bound: &Vec<bool>| -> Result<(), CoreError> {
            match atom {
                Atom::Var(var) if !bound.get(var.index()).copied().unwrap_or(false) => {
                    Err(CoreError::UnboundVar { var: *var })
                }
                _ => Ok(()),
            }
        };

        for var in self.constvars.iter().chain(&self.invars) {
            bind(*var, &mut bound)?;
        }

        for eqn in &self.equations {
            for atom in &eqn.inputs {
                read(atom, &bound)?;
            }
            for sub in eqn.primitive.sub_programs() {
                sub.validate()?;
            }
            let in_avals = eqn
                .inputs
                .iter()
                .map(|a| self.atom_aval(a))
                .collect::<Result<Vec<_>, _>>()?;
            let expected = abstract_eval(&eqn.primitive, &in_avals)?;
            if expected.len() != eqn.outputs.len() {
                return Err(CoreError::InvalidParams {
                    primitive: eqn.primitive.name(),
                    reason: format!(
                        "equation binds {} output(s), primitive produces {}",
                        eqn.outputs.len(),
                        expected.len()
                    ),
                });
            }
            for (var, aval) in eqn.outputs.iter().zip(&expected) {
                let declared = self.var_aval(*var)?;
                if declared != aval {
                    return Err(CoreError::InvalidParams {
                        primitive: eqn.primitive.name(),
                        reason: format!("output {var} declared {declared}, produces {aval}"),
                    });
                }
                bind(*var, &mut bound)?;
            }
        }

        for atom in &self.outvars {
            read(atom, &bound)?;
        }
        Ok(())
    }
}

/// A program together with the values of its constant variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosedProgram {
    pub program: Program,
    pub consts: Vec<Array>,
}

impl ClosedProgram {
    pub fn new(program: Program, consts: Vec<Array>) -> Self {
        ClosedProgram { program, consts }
    }

    pub fn num_inputs(&self) -> usize {
        self.program.invars.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.program.outvars.len()
    }

    pub fn in_avals(&self) -> Result<Vec<AbstractValue>, CoreError> {
        self.program.in_avals()
    }

    pub fn out_avals(&self) -> Result<Vec<AbstractValue>, CoreError> {
        self.program.out_avals()
    }

    /// Validates the program and checks that every constant matches the type
    /// of the variable it binds.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.consts.len() != self.program.constvars.len() {
            return Err(CoreError::InvalidParams {
                primitive: "closed_program",
                reason: format!(
                    "{} constant value(s) for {} constant variable(s)",
                    self.consts.len(),
                    self.program.constvars.len()
                ),
            });
        }
        for (index, (value, expected)) in self
            .consts
            .iter()
            .zip(self.program.const_avals()?)
            .enumerate()
        {
            if value.aval() != expected {
                return Err(CoreError::ArgumentMismatch {
                    index,
                    expected,
                    actual: value.aval(),
                });
            }
        }
        self.program.validate()
    }

    /// Checks that `args` match the declared input types.
    pub fn check_args(&self, args: &[Array]) -> Result<(), CoreError> {
        let in_avals = self.in_avals()?;
        if in_avals.len() != args.len() {
            return Err(CoreError::ArityMismatch {
                primitive: "program",
                expected: in_avals.len(),
                actual: args.len(),
            });
        }
        for (index, (arg, expected)) in args.iter().zip(in_avals).enumerate() {
            if arg.aval() != expected {
                return Err(CoreError::ArgumentMismatch {
                    index,
                    expected,
                    actual: arg.aval(),
                });
            }
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Deserializes and validates a program.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let program: ClosedProgram = serde_json::from_str(json)?;
        program.validate()?;
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::BinaryOp;
    use crate::types::{DType, Shape};

    fn add_program() -> ClosedProgram {
        let mut program = Program::new();
        let f = AbstractValue::new(DType::F64, Shape::vector(3));
        let x = program.new_var(f.clone());
        let y = program.new_var(f.clone());
        let z = program.new_var(f);
        program.invars = vec![x, y];
        program.equations.push(Equation {
            primitive: Primitive::Binary(BinaryOp::Add),
            inputs: SmallVec::from_vec(vec![Atom::Var(x), Atom::Var(y)]),
            outputs: SmallVec::from_vec(vec![z]),
            source: None,
        });
        program.outvars = vec![Atom::Var(z)];
        ClosedProgram::new(program, vec![])
    }

    #[test]
    fn well_formed_program_validates() {
        add_program().validate().unwrap();
    }

    #[test]
    fn unbound_input_is_rejected() {
        let mut cp = add_program();
        cp.program.invars.pop();
        assert!(matches!(cp.validate(), Err(CoreError::UnboundVar { var: Var(1) })));
    }

    #[test]
    fn rebinding_is_rejected() {
        let mut cp = add_program();
        cp.program.equations[0].outputs[0] = Var(0);
        assert!(matches!(cp.validate(), Err(CoreError::DuplicateBinding { var: Var(0) })));
    }

    #[test]
    fn mistyped_output_is_rejected() {
        let mut cp = add_program();
        cp.program.vars[2] = AbstractValue::scalar(DType::F64);
        assert!(matches!(cp.validate(), Err(CoreError::InvalidParams { primitive: "add", .. })));
    }

    #[test]
    fn check_args_reports_index() {
        let cp = add_program();
        let args = vec![Array::vector_f64(&[1.0, 2.0, 3.0]), Array::vector_i64(&[1, 2, 3])];
        assert!(matches!(
            cp.check_args(&args),
            Err(CoreError::ArgumentMismatch { index: 1, .. })
        ));
    }

    #[test]
    fn json_roundtrip_validates() {
        let cp = add_program();
        let json = cp.to_json().unwrap();
        assert_eq!(ClosedProgram::from_json(&json).unwrap(), cp);
    }

    #[test]
    fn source_summary_falls_back() {
        let cp = add_program();
        assert_eq!(cp.program.equations[0].source_summary(), "<unknown location>");
        let loc = SourceLocation { file: "f.rs".into(), line: 3, column: 9 };
        assert_eq!(loc.to_string(), "f.rs:3:9");
    }
}
