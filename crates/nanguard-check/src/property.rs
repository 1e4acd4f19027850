//! Randomized input harness for checked programs.
//!
//! Seed inputs (interesting cases) run first, then `iterations` random
//! inputs drawn from a deterministic ChaCha PRNG. Every input whose checked
//! run produces a non-empty error value is reported together with the
//! error summary and the execution trace.
//!
//! Reproducibility: the same `random_seed` generates the same inputs and
//! therefore the same failures.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use nanguard_core::{AbstractValue, Array, ArrayData, CoreError, DType, Scalar, TraceEntry};

use crate::api::Checkified;
use crate::error::CheckError;

/// Configuration for a fuzz run.
#[derive(Debug, Clone)]
pub struct FuzzConfig {
    /// Inputs that always run before the random ones.
    pub seeds: Vec<Vec<Array>>,
    /// Number of random inputs to try.
    pub iterations: u32,
    pub random_seed: u64,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        FuzzConfig {
            seeds: Vec::new(),
            iterations: 100,
            random_seed: 42,
        }
    }
}

/// Result of a fuzz run.
#[derive(Debug, Clone)]
pub struct FuzzResult {
    /// Seeds plus random inputs.
    pub total_run: u32,
    pub passed: u32,
    pub failures: Vec<FuzzFailure>,
    /// The random seed used (for reproducibility).
    pub random_seed: u64,
}

/// One input that triggered a check.
#[derive(Debug, Clone)]
pub struct FuzzFailure {
    pub inputs: Vec<Array>,
    /// Rendered error value.
    pub summary: String,
    pub trace: Vec<TraceEntry>,
}

/// Generates one random element.
///
/// Boundary values (0, 1, -1, extremes) are weighted into the mix to
/// increase edge-case coverage.
pub fn generate_random_scalar(dtype: DType, rng: &mut ChaCha8Rng) -> Scalar {
    match dtype {
        DType::Bool => Scalar::Bool(rng.gen_bool(0.5)),
        DType::I64 => {
            // ~30% chance of boundary value
            if rng.gen_ratio(3, 10) {
                let boundaries: &[i64] = &[0, 1, -1, i64::MIN, i64::MAX];
                Scalar::I64(boundaries[rng.gen_range(0..boundaries.len())])
            } else {
                // Small magnitudes, so integers used as indices land both in
                // and out of bounds.
                Scalar::I64(rng.gen_range(-16..16))
            }
        }
        DType::F64 => {
            if rng.gen_ratio(3, 10) {
                let boundaries: &[f64] = &[0.0, -0.0, 1.0, -1.0, f64::INFINITY, f64::NEG_INFINITY];
                Scalar::F64(boundaries[rng.gen_range(0..boundaries.len())])
            } else {
                Scalar::F64(rng.gen_range(-1e6f64..1e6f64))
            }
        }
    }
}

/// Generates a random array of the given type.
pub fn generate_random_value(aval: &AbstractValue, rng: &mut ChaCha8Rng) -> Result<Array, CoreError> {
    let scalars: Vec<Scalar> = (0..aval.shape.numel())
        .map(|_| generate_random_scalar(aval.dtype, rng))
        .collect();
    Array::new(aval.shape.clone(), ArrayData::from_scalars(aval.dtype, scalars))
}

/// Generates one random input per program parameter.
pub fn generate_random_inputs(
    avals: &[AbstractValue],
    rng: &mut ChaCha8Rng,
) -> Result<Vec<Array>, CoreError> {
    avals
        .iter()
        .map(|aval| generate_random_value(aval, rng))
        .collect()
}

/// Runs `checked` on the seeds and on random inputs, collecting every input
/// that triggered a check.
pub fn run_fuzz(checked: &Checkified, config: FuzzConfig) -> Result<FuzzResult, CheckError> {
    let avals = checked.program().in_avals()?;
    let mut rng = ChaCha8Rng::seed_from_u64(config.random_seed);
    let mut failures = Vec::new();
    let mut total_run: u32 = 0;
    let mut passed: u32 = 0;

    let mut cases = config.seeds;
    for _ in 0..config.iterations {
        cases.push(generate_random_inputs(&avals, &mut rng)?);
    }

    for inputs in cases {
        total_run += 1;
        let (error, _, trace) = checked.call_traced(&inputs)?;
        match error.get() {
            None => passed += 1,
            Some(summary) => failures.push(FuzzFailure {
                inputs,
                summary,
                trace,
            }),
        }
    }
    tracing::debug!(total_run, passed, failures = failures.len(), "fuzz run finished");

    Ok(FuzzResult {
        total_run,
        passed,
        failures,
        random_seed: config.random_seed,
    })
}
