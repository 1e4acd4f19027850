//! End-to-end behavior of checked programs: leaf checks, control flow,
//! batching, staging and custom rules.

use nanguard_check::{
    assert_, assert_func, checkify, checkify_fn, checkify_with, CheckError, CheckRule,
    CheckifyConfig, Checkified, ErrorValue, RuleTable,
};
use nanguard_core::{
    eval_closed, trace, AbstractValue, Array, BinaryOp, ClosedProgram, CoreError, DType, Eager,
    Ops, PrimitiveKind, Shape, UnaryOp,
};
use proptest::prelude::*;

fn f64_scalar() -> AbstractValue {
    AbstractValue::scalar(DType::F64)
}

fn i64_scalar() -> AbstractValue {
    AbstractValue::scalar(DType::I64)
}

fn f64_vector(len: usize) -> AbstractValue {
    AbstractValue::new(DType::F64, Shape::vector(len))
}

fn reciprocal() -> Checkified {
    checkify_fn(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        Ok(vec![b.div(&one, &args[0])?])
    })
    .unwrap()
}

fn polynomial() -> ClosedProgram {
    trace::<_, CoreError>(&[f64_scalar()], |b, args| {
        let x = &args[0];
        let two = b.f64(2.0);
        let one = b.f64(1.0);
        let sq = b.mul(x, x)?;
        let lin = b.mul(&two, x)?;
        let sum = b.add(&sq, &lin)?;
        Ok(vec![b.add(&sum, &one)?])
    })
    .unwrap()
}

proptest! {
    #[test]
    fn assertion_reports_only_when_false(p in any::<bool>(), message in "[a-z][a-z ]{0,20}") {
        let mut eager = Eager::default();
        let init = ErrorValue::init(&mut eager);
        let pred = eager.bool(p);
        let error = assert_func(&mut eager, &init, &pred, message.clone()).unwrap();
        if p {
            prop_assert_eq!(error.get(), None);
        } else {
            prop_assert_eq!(error.get(), Some(message));
        }
    }

    #[test]
    fn clean_runs_match_unchecked(x in -1.0e3f64..1.0e3) {
        let program = polynomial();
        let args = [Array::scalar_f64(x)];
        let (error, out) = checkify(&program).call(&args).unwrap();
        prop_assert_eq!(&error.err, &Array::scalar_bool(false));
        prop_assert_eq!(error.get(), None);
        prop_assert_eq!(out, eval_closed(&program, &args).unwrap());
    }
}

#[test]
fn reciprocal_of_zero_reports_division() {
    let checked = reciprocal();

    let (error, _) = checked.call(&[Array::scalar_f64(0.0)]).unwrap();
    let summary = error.get().unwrap();
    assert!(summary.starts_with("divided by zero at "), "{summary}");
    assert!(summary.contains("checkify.rs"), "{summary}");

    let (error, out) = checked.call(&[Array::scalar_f64(2.0)]).unwrap();
    assert_eq!(error.get(), None);
    assert_eq!(out, vec![Array::scalar_f64(0.5)]);
}

#[test]
fn throw_converts_triggered_error() {
    let (error, _) = reciprocal().call(&[Array::scalar_f64(0.0)]).unwrap();
    let err = error.throw().unwrap_err();
    assert!(matches!(err, CheckError::Triggered { ref summary } if summary.starts_with("divided by zero")));

    let (error, _) = reciprocal().call(&[Array::scalar_f64(1.0)]).unwrap();
    assert!(error.throw().is_ok());
}

#[test]
fn nan_from_log_names_the_primitive() {
    let checked = checkify_fn(&[f64_scalar()], |b, args| Ok(vec![b.log(&args[0])?])).unwrap();
    let (error, out) = checked.call(&[Array::scalar_f64(-1.0)]).unwrap();
    assert!(error.get().unwrap().starts_with("nan generated by primitive log at "));
    // The numerical result is left intact.
    assert!(out[0].any_nan());
}

#[test]
fn gather_out_of_bounds() {
    let checked = checkify_fn(&[f64_vector(5), i64_scalar()], |b, args| {
        Ok(vec![b.take(&args[0], &args[1])?])
    })
    .unwrap();
    let xs = Array::vector_f64(&[10.0, 11.0, 12.0, 13.0, 14.0]);

    let (error, _) = checked.call(&[xs.clone(), Array::scalar_i64(10)]).unwrap();
    assert!(error.get().unwrap().starts_with("out-of-bounds indexing at "));

    let (error, out) = checked.call(&[xs, Array::scalar_i64(3)]).unwrap();
    assert_eq!(error.get(), None);
    assert_eq!(out, vec![Array::scalar_f64(13.0)]);
}

#[test]
fn scatter_out_of_bounds() {
    let dnums = nanguard_core::ScatterDimensionNumbers {
        update_window_dims: vec![],
        inserted_window_dims: vec![0],
        scatter_dims_to_operand_dims: vec![0],
    };
    let indices = AbstractValue::new(DType::I64, Shape::new(&[1, 1]));
    let checked = checkify_fn(&[f64_vector(3), indices, f64_vector(1)], |b, args| {
        Ok(vec![b.scatter(
            nanguard_core::ScatterKind::Add,
            &args[0],
            &args[1],
            &args[2],
            dnums,
        )?])
    })
    .unwrap();
    let xs = Array::vector_f64(&[1.0, 2.0, 3.0]);
    let update = Array::vector_f64(&[5.0]);

    for index in [3, -1, i64::MAX, i64::MIN] {
        let bad = Array::from_i64(&[1, 1], vec![index]).unwrap();
        let (error, out) = checked.call(&[xs.clone(), bad, update.clone()]).unwrap();
        assert!(
            error
                .get()
                .unwrap()
                .starts_with("out-of-bounds indexing while updating at "),
            "index {index}"
        );
        assert_eq!(out, vec![xs.clone()]);
    }

    let good = Array::from_i64(&[1, 1], vec![2]).unwrap();
    let (error, out) = checked.call(&[xs, good, update]).unwrap();
    assert_eq!(error.get(), None);
    assert_eq!(out, vec![Array::vector_f64(&[1.0, 2.0, 8.0])]);
}

/// Ten iterations of `acc += 1/x + log(x)`.
fn accumulate() -> Checkified {
    let body = trace::<_, CoreError>(&[f64_scalar(), f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        let inv = b.div(&one, &args[1])?;
        let log = b.log(&args[1])?;
        let step = b.add(&inv, &log)?;
        Ok(vec![b.add(&args[0], &step)?])
    })
    .unwrap();
    checkify_fn(&[f64_scalar(), f64_vector(10)], |b, args| {
        Ok(b.scan(body, 10, false, &[], &args[..1], &args[1..])?)
    })
    .unwrap()
}

#[test]
fn scan_keeps_first_failing_iteration() {
    let checked = accumulate();
    let zero = Array::scalar_f64(0.0);

    let ones = Array::vector_f64(&[1.0; 10]);
    let (error, _) = checked.call(&[zero.clone(), ones]).unwrap();
    assert_eq!(error.get(), None);

    let only_fourth = Array::vector_f64(&[1.0, 1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0]);
    let (first, _) = checked.call(&[zero.clone(), only_fourth]).unwrap();

    // Later iterations fail differently (log of negatives is NaN).
    let noisy_tail = Array::vector_f64(&[1.0, 1.0, 1.0, 1.0, 0.0, -1.0, -2.0, 0.0, -1.0, -3.0]);
    let (second, _) = checked.call(&[zero, noisy_tail]).unwrap();

    let summary = first.get().unwrap();
    assert!(summary.starts_with("divided by zero at "), "{summary}");
    assert_eq!(second.get(), Some(summary));
}

#[test]
fn scan_threads_error_past_consts_and_carry() {
    // acc += scale / x, emitting scale * x per element.
    let body = trace::<_, CoreError>(&[f64_scalar(), f64_scalar(), f64_scalar()], |b, args| {
        let (scale, acc, x) = (&args[0], &args[1], &args[2]);
        let step = b.div(scale, x)?;
        Ok(vec![b.add(acc, &step)?, b.mul(scale, x)?])
    })
    .unwrap();
    let checked = checkify_fn(&[f64_scalar(), f64_scalar(), f64_vector(4)], |b, args| {
        Ok(b.scan(body, 4, false, &args[..1], &args[1..2], &args[2..])?)
    })
    .unwrap();
    let scale = Array::scalar_f64(2.0);
    let acc = Array::scalar_f64(0.0);

    let (error, out) = checked
        .call(&[scale.clone(), acc.clone(), Array::vector_f64(&[1.0, 2.0, 4.0, 8.0])])
        .unwrap();
    assert_eq!(error.get(), None);
    assert_eq!(
        out,
        vec![Array::scalar_f64(3.75), Array::vector_f64(&[2.0, 4.0, 8.0, 16.0])]
    );

    let (error, out) = checked
        .call(&[scale.clone(), acc.clone(), Array::vector_f64(&[1.0, 2.0, 0.0, 8.0])])
        .unwrap();
    assert!(error.get().unwrap().starts_with("divided by zero at "));
    assert_eq!(out[1], Array::vector_f64(&[2.0, 4.0, 0.0, 16.0]));

    let staged = checked.stage().unwrap();
    let (error, _) = staged
        .call(&[scale, acc, Array::vector_f64(&[0.0, 2.0, 4.0, 8.0])])
        .unwrap();
    assert!(error.get().unwrap().starts_with("divided by zero at "));
}

/// Counts up from `x` while `x < 5`; the predicate asserts `x < limit`.
fn guarded_count(limit: i64) -> Checkified {
    let cond = trace::<_, CheckError>(&[i64_scalar()], |b, args| {
        let bound = b.i64(limit);
        let below = b.lt(&args[0], &bound)?;
        assert_(b, &below, "counter below limit")?;
        let five = b.i64(5);
        Ok(vec![b.lt(&args[0], &five)?])
    })
    .unwrap();
    let body = trace::<_, CoreError>(&[i64_scalar()], |b, args| {
        let one = b.i64(1);
        Ok(vec![b.add(&args[0], &one)?])
    })
    .unwrap();
    checkify_fn(&[i64_scalar()], |b, args| {
        Ok(b.while_loop(cond, body, &[], &[], args)?)
    })
    .unwrap()
}

#[test]
fn assertion_in_while_predicate_is_reported() {
    // Fails on the fourth predicate evaluation (x == 3).
    let (error, out) = guarded_count(3).call(&[Array::scalar_i64(0)]).unwrap();
    assert_eq!(out, vec![Array::scalar_i64(5)]);
    assert_eq!(error.get().as_deref(), Some("counter below limit"));

    // Fails before the first iteration.
    let (error, out) = guarded_count(3).call(&[Array::scalar_i64(7)]).unwrap();
    assert_eq!(out, vec![Array::scalar_i64(7)]);
    assert_eq!(error.get().as_deref(), Some("counter below limit"));

    let (error, out) = guarded_count(10).call(&[Array::scalar_i64(0)]).unwrap();
    assert_eq!(out, vec![Array::scalar_i64(5)]);
    assert_eq!(error.get(), None);

    let staged = guarded_count(3).stage().unwrap();
    let (error, out) = staged.call(&[Array::scalar_i64(0)]).unwrap();
    assert_eq!(out, vec![Array::scalar_i64(5)]);
    assert_eq!(error.get().as_deref(), Some("counter below limit"));
}

#[test]
fn assertion_in_cond_branch_is_reported() {
    let plain = trace::<_, CoreError>(&[f64_scalar()], |b, args| Ok(vec![b.neg(&args[0])?])).unwrap();
    let guarded = trace::<_, CheckError>(&[f64_scalar()], |b, args| {
        let zero = b.f64(0.0);
        let positive = b.gt(&args[0], &zero)?;
        assert_(b, &positive, "branch input must be positive")?;
        Ok(vec![b.neg(&args[0])?])
    })
    .unwrap();
    let checked = checkify_fn(&[i64_scalar(), f64_scalar()], |b, args| {
        Ok(b.cond(&args[0], vec![plain, guarded], &args[1..])?)
    })
    .unwrap();

    let (error, out) = checked
        .call(&[Array::scalar_i64(1), Array::scalar_f64(-1.0)])
        .unwrap();
    assert_eq!(out, vec![Array::scalar_f64(1.0)]);
    assert_eq!(error.get().as_deref(), Some("branch input must be positive"));

    let (error, _) = checked
        .call(&[Array::scalar_i64(0), Array::scalar_f64(-1.0)])
        .unwrap();
    assert_eq!(error.get(), None);

    let (error, _) = checked
        .call(&[Array::scalar_i64(1), Array::scalar_f64(2.0)])
        .unwrap();
    assert_eq!(error.get(), None);
}

#[test]
fn while_predicate_failure_is_reported() {
    // Counts x down by one while 1/x < 10; the last predicate divides by zero.
    let cond = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        let ten = b.f64(10.0);
        let r = b.div(&one, &args[0])?;
        Ok(vec![b.lt(&r, &ten)?])
    })
    .unwrap();
    let body = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        Ok(vec![b.sub(&args[0], &one)?])
    })
    .unwrap();
    let checked = checkify_fn(&[f64_scalar()], |b, args| {
        Ok(b.while_loop(cond, body, &[], &[], args)?)
    })
    .unwrap();

    let (error, out) = checked.call(&[Array::scalar_f64(3.0)]).unwrap();
    assert_eq!(out, vec![Array::scalar_f64(0.0)]);
    assert!(error.get().unwrap().starts_with("divided by zero at "));

    // Caught before the first iteration as well.
    let (error, out) = checked.call(&[Array::scalar_f64(0.0)]).unwrap();
    assert_eq!(out, vec![Array::scalar_f64(0.0)]);
    assert!(error.get().unwrap().starts_with("divided by zero at "));

    let staged = checked.stage().unwrap();
    let (error, _) = staged.call(&[Array::scalar_f64(3.0)]).unwrap();
    assert!(error.get().unwrap().starts_with("divided by zero at "));
}

#[test]
fn while_body_checks_thread_through_iterations() {
    let cond = trace::<_, CoreError>(&[i64_scalar(), f64_scalar()], |b, args| {
        let three = b.i64(3);
        Ok(vec![b.lt(&args[0], &three)?])
    })
    .unwrap();
    let body = trace::<_, CoreError>(&[f64_scalar(), i64_scalar(), f64_scalar()], |b, args| {
        let one = b.i64(1);
        let next = b.add(&args[1], &one)?;
        let acc = b.sqrt(&args[0])?;
        Ok(vec![next, b.add(&args[2], &acc)?])
    })
    .unwrap();
    let checked = checkify_fn(&[f64_scalar()], |b, args| {
        let zero = b.i64(0);
        let acc = b.f64(0.0);
        b.while_loop(cond, body, &[], &args[..1], &[zero, acc])
            .map_err(CheckError::from)
    })
    .unwrap();

    let (error, out) = checked.call(&[Array::scalar_f64(4.0)]).unwrap();
    assert_eq!(error.get(), None);
    assert_eq!(out, vec![Array::scalar_i64(3), Array::scalar_f64(6.0)]);

    let (error, _) = checked.call(&[Array::scalar_f64(-4.0)]).unwrap();
    assert!(error.get().unwrap().starts_with("nan generated by primitive sqrt at "));
}

#[test]
fn cond_branches_thread_their_own_errors() {
    let divide = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        Ok(vec![b.div(&one, &args[0])?])
    })
    .unwrap();
    let negate = trace::<_, CoreError>(&[f64_scalar()], |b, args| Ok(vec![b.neg(&args[0])?])).unwrap();
    let checked = checkify_fn(&[i64_scalar(), f64_scalar()], |b, args| {
        Ok(b.cond(&args[0], vec![negate, divide], &args[1..])?)
    })
    .unwrap();

    let (error, out) = checked.call(&[Array::scalar_i64(0), Array::scalar_f64(0.0)]).unwrap();
    assert_eq!(error.get(), None);
    assert_eq!(out, vec![Array::scalar_f64(-0.0)]);

    let (error, _) = checked.call(&[Array::scalar_i64(1), Array::scalar_f64(0.0)]).unwrap();
    assert!(error.get().unwrap().starts_with("divided by zero at "));
}

/// `call(cond(index, [identity, scan(while(...))]))`, where the innermost
/// loop computes `acc += 1 / (x - i)` for `i` in `0..3`.
fn nested() -> Checkified {
    let cond = trace::<_, CoreError>(&[i64_scalar(), f64_scalar()], |b, args| {
        let three = b.i64(3);
        Ok(vec![b.lt(&args[0], &three)?])
    })
    .unwrap();
    let body = trace::<_, CoreError>(&[f64_scalar(), i64_scalar(), f64_scalar()], |b, args| {
        let i = b.convert(&args[1], DType::F64)?;
        let d = b.sub(&args[0], &i)?;
        let one = b.f64(1.0);
        let r = b.div(&one, &d)?;
        let acc = b.add(&args[2], &r)?;
        let step = b.i64(1);
        Ok(vec![b.add(&args[1], &step)?, acc])
    })
    .unwrap();
    let scan_body = trace::<_, CoreError>(&[f64_scalar(), f64_scalar()], |b, args| {
        let zero = b.i64(0);
        let outs = b.while_loop(cond, body, &[], &args[1..], &[zero, args[0].clone()])?;
        Ok(vec![outs[1].clone()])
    })
    .unwrap();
    let looped = trace::<_, CoreError>(&[f64_scalar(), f64_vector(4)], |b, args| {
        b.scan(scan_body, 4, false, &[], &args[..1], &args[1..])
    })
    .unwrap();
    let identity =
        trace::<_, CoreError>(&[f64_scalar(), f64_vector(4)], |_, args| Ok(vec![args[0].clone()]))
            .unwrap();
    let inner = trace::<_, CoreError>(&[i64_scalar(), f64_scalar(), f64_vector(4)], |b, args| {
        b.cond(&args[0], vec![identity, looped], &args[1..])
    })
    .unwrap();
    checkify_fn(&[i64_scalar(), f64_scalar(), f64_vector(4)], |b, args| {
        Ok(b.call("outer", inner, args)?)
    })
    .unwrap()
}

#[test]
fn messages_survive_nested_control_flow() {
    let checked = nested();
    let hits = Array::vector_f64(&[0.5, 1.5, 2.0, 3.5]);
    let misses = Array::vector_f64(&[0.5, 1.5, 2.5, 3.5]);
    let acc = Array::scalar_f64(0.0);

    let (error, _) = checked
        .call(&[Array::scalar_i64(1), acc.clone(), hits.clone()])
        .unwrap();
    let code = error.code.as_i64_scalar().unwrap();
    assert!(error.messages.contains_key(&code));
    assert!(error.get().unwrap().starts_with("divided by zero at "));

    let (error, _) = checked
        .call(&[Array::scalar_i64(0), acc.clone(), hits.clone()])
        .unwrap();
    assert_eq!(error.get(), None);

    let (error, _) = checked
        .call(&[Array::scalar_i64(1), acc.clone(), misses])
        .unwrap();
    assert_eq!(error.get(), None);

    let staged = checked.stage().unwrap();
    let (error, _) = staged
        .call(&[Array::scalar_i64(1), acc, hits])
        .unwrap();
    let code = error.code.as_i64_scalar().unwrap();
    assert!(staged.messages.contains_key(&code));
    assert!(error.get().unwrap().starts_with("divided by zero at "));
}

#[test]
fn map_inside_checked_function_reduces_lanes() {
    let body = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        Ok(vec![b.div(&one, &args[0])?])
    })
    .unwrap();
    let checked = checkify_fn(&[f64_vector(3)], |b, args| {
        Ok(b.map(body, 3, vec![Some(0)], vec![0], args)?)
    })
    .unwrap();

    let (error, out) = checked.call(&[Array::vector_f64(&[1.0, 2.0, 4.0])]).unwrap();
    assert_eq!(error.get(), None);
    assert_eq!(out, vec![Array::vector_f64(&[1.0, 0.5, 0.25])]);

    let (error, _) = checked.call(&[Array::vector_f64(&[1.0, 0.0, 4.0])]).unwrap();
    assert!(error.err.as_bool_scalar().unwrap());
    assert!(error.get().unwrap().starts_with("divided by zero at "));
}

#[test]
fn batched_call_reports_each_lane() {
    let checked = checkify_fn(&[f64_scalar()], |b, args| {
        let zero = b.f64(0.0);
        let positive = b.gt(&args[0], &zero)?;
        assert_(b, &positive, "x must be positive")?;
        Ok(vec![b.neg(&args[0])?])
    })
    .unwrap();
    let xs = Array::vector_f64(&[1.0, -1.0, 2.0, -3.0]);
    let (error, out) = checked.call_batched(&[xs], &[Some(0)]).unwrap();
    assert_eq!(out, vec![Array::vector_f64(&[-1.0, 1.0, -2.0, 3.0])]);
    insta::assert_snapshot!(error.get().unwrap(), @r"
    at index 1: x must be positive
    at index 3: x must be positive
    ");
}

#[test]
fn staged_program_serializes() {
    let staged = reciprocal().stage().unwrap();
    let json = staged.program.to_json().unwrap();
    let restored = ClosedProgram::from_json(&json).unwrap();
    assert_eq!(restored, staged.program);
}

fn neg_lower_bound(
    inputs: &[AbstractValue],
    outputs: &[AbstractValue],
) -> Result<ClosedProgram, CoreError> {
    let avals: Vec<AbstractValue> = inputs.iter().chain(outputs).cloned().collect();
    trace(&avals, |b, args| {
        let limit = b.f64(-100.0);
        Ok(vec![b.ge(&args[1], &limit)?])
    })
}

#[test]
fn custom_rules_extend_the_table() {
    let mut rules = RuleTable::standard();
    rules.register(
        PrimitiveKind::Unary(UnaryOp::Neg),
        CheckRule::Custom {
            predicate: neg_lower_bound,
            message: "negation below -100".to_string(),
        },
    );
    let program = trace::<_, CoreError>(&[f64_scalar()], |b, args| Ok(vec![b.neg(&args[0])?])).unwrap();
    let checked = checkify_with(&program, CheckifyConfig::default().with_rules(rules));

    let (error, _) = checked.call(&[Array::scalar_f64(5.0)]).unwrap();
    assert_eq!(error.get(), None);
    let (error, _) = checked.call(&[Array::scalar_f64(500.0)]).unwrap();
    assert!(error.get().unwrap().starts_with("negation below -100 at "));
}

#[test]
fn empty_table_checks_nothing() {
    let program = trace::<_, CoreError>(&[f64_scalar()], |b, args| {
        let one = b.f64(1.0);
        Ok(vec![b.div(&one, &args[0])?])
    })
    .unwrap();
    let checked = checkify_with(&program, CheckifyConfig::default().with_rules(RuleTable::empty()));
    let (error, out) = checked.call(&[Array::scalar_f64(0.0)]).unwrap();
    assert_eq!(error.get(), None);
    assert_eq!(out, vec![Array::scalar_f64(f64::INFINITY)]);
}

#[test]
fn unregistered_division_runs_unchecked() {
    let mut rules = RuleTable::standard();
    rules.unregister(PrimitiveKind::Binary(BinaryOp::Div));
    let checked = checkify_with(reciprocal().program(), CheckifyConfig::default().with_rules(rules));
    let (error, _) = checked.call(&[Array::scalar_f64(0.0)]).unwrap();
    assert_eq!(error.get(), None);
}
