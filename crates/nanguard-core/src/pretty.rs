//! Textual rendering of programs.
//!
//! ```text
//! { lambda v0:f64[3] ; v1:f64[] .
//!   v2:f64[] = div 1.0 v1
//!   v3:f64[3] = mul v0 v2
//!   in (v3) }
//! ```
//!
//! Sub-programs of higher-order equations are printed indented beneath the
//! equation that embeds them.

use std::fmt::{self, Write};

use crate::ops::Primitive;
use crate::program::{ClosedProgram, Equation, Program};

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_program(f, self, 0)
    }
}

impl fmt::Display for ClosedProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_program(f, &self.program, 0)
    }
}

fn write_binders(out: &mut impl Write, program: &Program, vars: &[crate::id::Var]) -> fmt::Result {
    for (i, var) in vars.iter().enumerate() {
        if i > 0 {
            out.write_char(' ')?;
        }
        match program.vars.get(var.index()) {
            Some(aval) => write!(out, "{var}:{aval}")?,
            None => write!(out, "{var}:?")?,
        }
    }
    Ok(())
}

fn write_program(out: &mut impl Write, program: &Program, indent: usize) -> fmt::Result {
    let pad = " ".repeat(indent);
    out.write_str("{ lambda ")?;
    write_binders(out, program, &program.constvars)?;
    out.write_str(" ; ")?;
    write_binders(out, program, &program.invars)?;
    out.write_str(" .\n")?;
    for eqn in &program.equations {
        write_equation(out, program, eqn, indent + 2)?;
    }
    write!(out, "{pad}  in (")?;
    for (i, atom) in program.outvars.iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write!(out, "{atom}")?;
    }
    out.write_str(") }")
}

fn write_equation(out: &mut impl Write, program: &Program, eqn: &Equation, indent: usize) -> fmt::Result {
    let pad = " ".repeat(indent);
    out.write_str(&pad)?;
    if eqn.outputs.is_empty() {
        out.write_str("_")?;
    } else {
        write_binders(out, program, &eqn.outputs)?;
    }
    write!(out, " = {}", eqn.primitive.name())?;
    let params = params(&eqn.primitive);
    if !params.is_empty() {
        write!(out, "[{params}]")?;
    }
    for atom in &eqn.inputs {
        write!(out, " {atom}")?;
    }
    out.write_char('\n')?;
    for (i, sub) in eqn.primitive.sub_programs().into_iter().enumerate() {
        write!(out, "{pad}    {}: ", sub_label(&eqn.primitive, i))?;
        write_program(out, &sub.program, indent + 4)?;
        out.write_char('\n')?;
    }
    Ok(())
}

fn sub_label(primitive: &Primitive, index: usize) -> String {
    match primitive {
        Primitive::Cond { .. } => format!("branch{index}"),
        Primitive::While { .. } if index == 0 => "cond".to_string(),
        _ => "body".to_string(),
    }
}

/// Static parameters, excluding embedded sub-programs.
fn params(primitive: &Primitive) -> String {
    match primitive {
        Primitive::Reduce { axes, .. } => format!("axes={axes:?}"),
        Primitive::Cumulative { axis, reverse, .. } => format!("axis={axis} reverse={reverse}"),
        Primitive::ConvertElementType { dtype } => format!("dtype={dtype}"),
        Primitive::BroadcastInDim {
            shape,
            broadcast_dimensions,
        } => format!("shape={shape} dims={broadcast_dimensions:?}"),
        Primitive::Reshape { new_sizes } => format!("new_sizes={new_sizes}"),
        Primitive::Transpose { permutation } => format!("permutation={permutation:?}"),
        Primitive::Rev { dimensions } => format!("dimensions={dimensions:?}"),
        Primitive::Slice {
            start_indices,
            limit_indices,
        } => format!("start={start_indices:?} limit={limit_indices:?}"),
        Primitive::Concatenate { dimension } => format!("dimension={dimension}"),
        Primitive::Iota { dtype, size } => format!("dtype={dtype} size={size}"),
        Primitive::Sort {
            dimension,
            num_keys,
        } => format!("dimension={dimension} num_keys={num_keys}"),
        Primitive::Gather {
            dimension_numbers: d,
            slice_sizes,
        } => format!(
            "offset_dims={:?} collapsed={:?} start_index_map={:?} slice_sizes={slice_sizes:?}",
            d.offset_dims, d.collapsed_slice_dims, d.start_index_map
        ),
        Primitive::Scatter {
            dimension_numbers: d,
            ..
        } => format!(
            "window={:?} inserted={:?} to_operand={:?}",
            d.update_window_dims, d.inserted_window_dims, d.scatter_dims_to_operand_dims
        ),
        Primitive::Scan {
            length,
            reverse,
            num_consts,
            num_carry,
            ..
        } => format!("length={length} reverse={reverse} consts={num_consts} carry={num_carry}"),
        Primitive::While {
            cond_nconsts,
            body_nconsts,
            ..
        } => format!("cond_nconsts={cond_nconsts} body_nconsts={body_nconsts}"),
        Primitive::Call { name, .. } => format!("name={name}"),
        Primitive::Map {
            axis_size,
            in_axes,
            out_axes,
            ..
        } => format!("axis_size={axis_size} in_axes={in_axes:?} out_axes={out_axes:?}"),
        Primitive::Assert { messages } => format!("codes={:?}", messages.keys().collect::<Vec<_>>()),
        _ => String::new(),
    }
}
