//! Built-in example programs for trying the checker from the command line.

use nanguard_core::{trace, AbstractValue, ClosedProgram, CoreError, DType, Ops, Shape};

/// Names accepted by `nanguard demo`.
pub const DEMOS: &[(&str, &str)] = &[
    ("reciprocal", "1 / x for a scalar x"),
    ("accumulate", "scan over 10 elements of acc += 1/x + log(x)"),
    ("lookup", "xs[i] for a 5-element vector and an integer index"),
    ("countdown", "decrement x while 1/x < 10"),
];

fn f64_scalar() -> AbstractValue {
    AbstractValue::scalar(DType::F64)
}

pub fn build(name: &str) -> Result<ClosedProgram, String> {
    let program = match name {
        "reciprocal" => reciprocal(),
        "accumulate" => accumulate(),
        "lookup" => lookup(),
        "countdown" => countdown(),
        _ => {
            let known: Vec<&str> = DEMOS.iter().map(|(name, _)| *name).collect();
            return Err(format!(
                "unknown demo '{}', expected one of: {}",
                name,
                known.join(", ")
            ));
        }
    };
    program.map_err(|e| format!("failed to build demo '{}': {}", name, e))
}

fn reciprocal() -> Result<ClosedProgram, CoreError> {
    trace(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        Ok(vec![b.div(&one, &args[0])?])
    })
}

fn accumulate() -> Result<ClosedProgram, CoreError> {
    let body = trace::<_, CoreError>(&[f64_scalar(), f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        let inv = b.div(&one, &args[1])?;
        let log = b.log(&args[1])?;
        let step = b.add(&inv, &log)?;
        Ok(vec![b.add(&args[0], &step)?])
    })?;
    let xs = AbstractValue::new(DType::F64, Shape::vector(10));
    trace(&[f64_scalar(), xs], |b, args| {
        b.scan(body, 10, false, &[], &args[..1], &args[1..])
    })
}

fn lookup() -> Result<ClosedProgram, CoreError> {
    let xs = AbstractValue::new(DType::F64, Shape::vector(5));
    trace(&[xs, AbstractValue::scalar(DType::I64)], |b, args| {
        Ok(vec![b.take(&args[0], &args[1])?])
    })
}

fn countdown() -> Result<ClosedProgram, CoreError> {
    let cond = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        let ten = b.f64(10.0);
        let r = b.div(&one, &args[0])?;
        Ok(vec![b.lt(&r, &ten)?])
    })?;
    let body = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        Ok(vec![b.sub(&args[0], &one)?])
    })?;
    trace(&[f64_scalar()], |b, args| {
        b.while_loop(cond, body, &[], &[], args)
    })
}
