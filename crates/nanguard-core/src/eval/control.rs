//! Evaluation of higher-order primitives.
//!
//! Each construct re-enters the [`Evaluator`] on its embedded sub-programs,
//! so nested assertions are rejected the same way at every depth.

use crate::array::Array;
use crate::error::CoreError;
use crate::program::ClosedProgram;
use crate::types::AbstractValue;

use super::Evaluator;

impl Evaluator {
    pub(super) fn eval_cond(
        &mut self,
        branches: &[ClosedProgram],
        inputs: &[Array],
    ) -> Result<Vec<Array>, CoreError> {
        let (index, operands) = inputs.split_first().ok_or(CoreError::ArityMismatch {
            primitive: "cond",
            expected: 1,
            actual: 0,
        })?;
        let raw = index.as_scalar().map(|s| s.as_i64()).unwrap_or(0);
        let last = branches.len().saturating_sub(1) as i64;
        let chosen = raw.clamp(0, last) as usize;
        tracing::trace!(branch = chosen, "cond");
        self.eval_closed(&branches[chosen], operands)
    }

    pub(super) fn eval_scan(
        &mut self,
        body: &ClosedProgram,
        length: usize,
        reverse: bool,
        (num_consts, num_carry): (usize, usize),
        inputs: &[Array],
        out: &[AbstractValue],
    ) -> Result<Vec<Array>, CoreError> {
        let (consts, rest) = inputs.split_at(num_consts);
        let (init, xs) = rest.split_at(num_carry);
        let mut carry = init.to_vec();
        let num_ys = out.len() - num_carry;
        let mut ys: Vec<Vec<Option<Array>>> = vec![vec![None; length]; num_ys];

        for step in 0..length {
            let i = if reverse { length - 1 - step } else { step };
            let mut args: Vec<Array> = consts.to_vec();
            args.append(&mut carry);
            args.extend(xs.iter().map(|x| x.index_axis(0, i)));
            let mut outs = self.eval_closed(body, &args)?;
            let step_ys = outs.split_off(num_carry);
            carry = outs;
            for (slot, y) in ys.iter_mut().zip(step_ys) {
                slot[i] = Some(y);
            }
        }

        let mut results = carry;
        for (parts, aval) in ys.into_iter().zip(&out[num_carry..]) {
            let parts: Vec<Array> = parts.into_iter().flatten().collect();
            let lane = AbstractValue::new(aval.dtype, aval.shape.without_axis(0));
            results.push(Array::stack(0, &parts, &lane)?);
        }
        Ok(results)
    }

    pub(super) fn eval_while(
        &mut self,
        cond: &ClosedProgram,
        body: &ClosedProgram,
        (cond_nconsts, body_nconsts): (usize, usize),
        inputs: &[Array],
    ) -> Result<Vec<Array>, CoreError> {
        let (cond_consts, rest) = inputs.split_at(cond_nconsts);
        let (body_consts, init) = rest.split_at(body_nconsts);
        let mut carry = init.to_vec();
        let limit = self.config.max_while_iterations;
        let mut iterations = 0usize;

        loop {
            let cond_args: Vec<Array> = cond_consts.iter().chain(&carry).cloned().collect();
            let keep_going = self
                .eval_closed(cond, &cond_args)?
                .first()
                .and_then(Array::as_bool_scalar)
                .unwrap_or(false);
            if !keep_going {
                break;
            }
            if iterations >= limit {
                return Err(CoreError::WhileIterationLimit { limit });
            }
            iterations += 1;
            let body_args: Vec<Array> = body_consts.iter().chain(&carry).cloned().collect();
            carry = self.eval_closed(body, &body_args)?;
        }
        tracing::trace!(iterations, "while loop finished");
        Ok(carry)
    }

    pub(super) fn eval_map(
        &mut self,
        body: &ClosedProgram,
        axis_size: usize,
        (in_axes, out_axes): (&[Option<usize>], &[usize]),
        inputs: &[Array],
    ) -> Result<Vec<Array>, CoreError> {
        let lane_avals = body.out_avals()?;
        let mut per_output: Vec<Vec<Array>> = vec![Vec::with_capacity(axis_size); lane_avals.len()];
        for lane in 0..axis_size {
            let args: Vec<Array> = inputs
                .iter()
                .zip(in_axes)
                .map(|(input, axis)| match axis {
                    Some(axis) => input.index_axis(*axis, lane),
                    None => input.clone(),
                })
                .collect();
            for (parts, value) in per_output.iter_mut().zip(self.eval_closed(body, &args)?) {
                parts.push(value);
            }
        }
        per_output
            .iter()
            .zip(&lane_avals)
            .zip(out_axes)
            .map(|((parts, aval), &axis)| Array::stack(axis, parts, aval))
            .collect()
    }
}
