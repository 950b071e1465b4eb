//! One independent correctness trial.
//!
//! A trial owns everything it touches: its seeded RNG, host matrices and
//! device buffers. Failures of any device step end the trial early and count
//! as zero mismatches.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, warn};

use crate::console::Console;
use crate::dispatch::MatMulDispatch;
use crate::error::TrialError;
use crate::matrix::{HostMatrix, MatMulDims};
use crate::verify::{self, Mismatch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    Passed,
    Failed { mismatches: Vec<Mismatch> },
    Skipped {
        step: &'static str,
        #[serde(serialize_with = "serialize_display")]
        error: TrialError,
    },
}

fn serialize_display<S: serde::Serializer>(e: &TrialError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

impl TrialOutcome {
    pub fn skipped(error: TrialError) -> Self {
        TrialOutcome::Skipped {
            step: error.step(),
            error,
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, TrialOutcome::Passed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TrialOutcome::Skipped { .. })
    }
}

/// Everything one trial produced. Written once, never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct TrialReport {
    pub index: usize,
    pub seed: u64,
    pub outcome: TrialOutcome,
    pub a: HostMatrix,
    pub b: HostMatrix,
    /// The product read back from the device, if the trial got that far.
    pub result: Option<HostMatrix>,
}

impl TrialReport {
    /// Number of miscompared elements. Zero for passed and skipped trials.
    pub fn mismatch_count(&self) -> usize {
        match &self.outcome {
            TrialOutcome::Failed { mismatches } => mismatches.len(),
            _ => 0,
        }
    }
}

/// `"A: " ... "\nB: " ... "\nMul: " ... "\n"`, one newline-led row per line.
pub fn failure_dump(a: &HostMatrix, b: &HostMatrix, product: &HostMatrix) -> String {
    format!("A: {}\nB: {}\nMul: {}\n", a, b, product)
}

/// Generate inputs from `seed`, multiply them with `strategy` and verify.
pub fn run_trial(
    index: usize,
    seed: u64,
    dims: &MatMulDims,
    value_bound: i32,
    strategy: &dyn MatMulDispatch,
    console: &Console,
) -> TrialReport {
    console.line(format!("Iteration: {} started <<<<", index));
    debug!(index, seed, %dims, strategy = strategy.name(), "Trial started");

    let mut rng = StdRng::seed_from_u64(seed);
    let a = HostMatrix::random(dims.rows, dims.inner, value_bound, &mut rng);
    let b = HostMatrix::random(dims.inner, dims.cols, value_bound, &mut rng);

    let (outcome, result) = match strategy.dispatch(&a, &b, dims) {
        Ok(product) => match verify::check(&a, &b, &product, dims, console) {
            Ok(mismatches) if mismatches.is_empty() => {
                console.line(format!("Iteration: {} \t\t SUCCESSFUL >>>", index));
                (TrialOutcome::Passed, Some(product))
            }
            Ok(mismatches) => {
                console.text(format!(
                    "Iteration: {} \t\t FAILED: {} Errors >>>\n{}",
                    index,
                    mismatches.len(),
                    failure_dump(&a, &b, &product)
                ));
                (TrialOutcome::Failed { mismatches }, Some(product))
            }
            Err(e) => {
                let err = TrialError::from(e);
                console.line(err.to_string());
                (TrialOutcome::skipped(err), Some(product))
            }
        },
        Err(err) => {
            warn!(index, step = err.step(), error = ?err.device_error(), "Trial skipped");
            console.line(err.to_string());
            (TrialOutcome::skipped(err), None)
        }
    };

    console.line(format!("Iteration: {} finished >>>", index));
    TrialReport {
        index,
        seed,
        outcome,
        a,
        b,
        result,
    }
}
