//! Trial orchestration: availability gate, concurrent fan-out, join, offload
//! trial and the final tally.

use std::sync::{Arc, OnceLock};

use rayon::ThreadPoolBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::buffers::DeviceBufferManager;
use crate::config::HarnessConfig;
use crate::console::Console;
use crate::device::{check_compute_device, Accelerator, Availability};
use crate::dispatch::{DirectiveOffload, ExplicitDispatch, MatMulDispatch};
use crate::error::{HarnessError, TrialError};
use crate::matrix::{HostMatrix, MatMulDims};
use crate::trial::{self, TrialOutcome, TrialReport};
use crate::verify;

/// Largest exit code a mismatch total maps to. 255 is left for usage errors.
pub const MAX_MISMATCH_EXIT_CODE: i32 = 254;

/// Aggregated result of one harness run.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessSummary {
    pub backend: String,
    pub device_available: bool,
    pub dims: MatMulDims,
    /// Base seed the trial seeds were derived from.
    pub seed: u64,
    pub trials_attempted: usize,
    /// Explicit-dispatch trials in trial order.
    pub trials: Vec<TrialReport>,
    /// The directive-offload trial, run after every other trial finished.
    pub offload: Option<TrialReport>,
    /// Device buffers deliberately left allocated.
    pub leaked_buffers: usize,
    total_mismatches: usize,
}

impl HarnessSummary {
    fn new(
        backend: &str,
        dims: MatMulDims,
        seed: u64,
        trials: Vec<TrialReport>,
        offload: Option<TrialReport>,
        leaked_buffers: usize,
    ) -> Self {
        let total_mismatches = trials
            .iter()
            .chain(offload.iter())
            .map(TrialReport::mismatch_count)
            .sum();
        Self {
            backend: backend.to_string(),
            device_available: true,
            dims,
            seed,
            trials_attempted: trials.len(),
            trials,
            offload,
            leaked_buffers,
            total_mismatches,
        }
    }

    fn unavailable(backend: &str, dims: MatMulDims, seed: u64) -> Self {
        Self {
            device_available: false,
            ..Self::new(backend, dims, seed, Vec::new(), None, 0)
        }
    }

    /// Mismatches over every explicit-dispatch trial plus the offload trial.
    pub fn total_mismatches(&self) -> usize {
        self.total_mismatches
    }

    /// Process exit code: the mismatch total, clamped to
    /// [`MAX_MISMATCH_EXIT_CODE`] so it survives the 8-bit exit status.
    pub fn exit_code(&self) -> i32 {
        i32::try_from(self.total_mismatches)
            .unwrap_or(i32::MAX)
            .min(MAX_MISMATCH_EXIT_CODE)
    }

    pub fn is_success(&self) -> bool {
        self.total_mismatches == 0
    }

    /// Trials that ended before verification.
    pub fn skipped_trials(&self) -> usize {
        self.trials.iter().filter(|t| t.outcome.is_skipped()).count()
    }
}

/// Runs the configured trials against one accelerator.
pub struct Harness {
    accel: Arc<dyn Accelerator>,
    config: HarnessConfig,
    console: Console,
}

impl Harness {
    pub fn new(accel: Arc<dyn Accelerator>, config: HarnessConfig, console: Console) -> Self {
        Self {
            accel,
            config,
            console,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Check the device, run every trial concurrently, then the offload trial.
    ///
    /// Only configuration and pool construction failures are errors; device
    /// failures end up in the per-trial reports.
    pub fn run(&self) -> Result<HarnessSummary, HarnessError> {
        self.config.validate()?;
        let HarnessConfig {
            dims,
            trials,
            workers,
            value_bound,
            release_device_memory,
            ..
        } = self.config;
        let base_seed = self.config.seed.unwrap_or_else(rand::random);
        let backend = self.accel.name();

        match check_compute_device(self.accel.as_ref()) {
            Availability::Available(device) => {
                info!(backend, device, %dims, trials, workers, base_seed, "Compute device available");
            }
            Availability::Prohibited(device) => {
                self.console.line("Compute mode is prohibited");
                self.console.line("No compute device available");
                info!(backend, device, "Skipping all trials: compute mode prohibited");
                return Ok(HarnessSummary::unavailable(backend, dims, base_seed));
            }
            Availability::Unresolved(e) => {
                self.console.line(e.to_string());
                self.console.line("No compute device available");
                info!(backend, error = %e, "Skipping all trials: no device");
                return Ok(HarnessSummary::unavailable(backend, dims, base_seed));
            }
        }

        let pool = Arc::new(
            ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("trial-worker-{}", i))
                .build()
                .map_err(|e| HarnessError::Pool(e.to_string()))?,
        );

        let buffers = Arc::new(DeviceBufferManager::new(
            Arc::clone(&self.accel),
            release_device_memory,
        ));
        let explicit = ExplicitDispatch::new(Arc::clone(&self.accel), Arc::clone(&buffers));
        let slots: Vec<OnceLock<TrialReport>> = (0..trials).map(|_| OnceLock::new()).collect();

        {
            let (slots, explicit, console, config) =
                (&slots, &explicit, &self.console, &self.config);
            pool.scope(|s| {
                // schedule(static, 1): slot `w` owns trials w, w+W, w+2W, ...
                for worker in 0..workers.min(trials) {
                    s.spawn(move |s| {
                        for index in (worker..trials).step_by(workers) {
                            s.spawn(move |_| {
                                let seed = config.trial_seed(base_seed, index);
                                let report =
                                    trial::run_trial(index, seed, &dims, value_bound, explicit, console);
                                if slots[index].set(report).is_err() {
                                    warn!(index, "Trial report already recorded");
                                }
                            });
                        }
                    });
                }
            });
        }

        let reports = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.into_inner()
                    .ok_or_else(|| HarnessError::Pool(format!("trial {} produced no report", index)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            completed = reports.len(),
            mismatches = reports.iter().map(TrialReport::mismatch_count).sum::<usize>(),
            "All explicit-dispatch trials joined"
        );

        let offload_seed = self.config.trial_seed(base_seed, trials);
        let offload = self.run_offload(offload_seed, DirectiveOffload::with_pool(Arc::clone(&pool)));

        let summary = HarnessSummary::new(
            backend,
            dims,
            base_seed,
            reports,
            Some(offload),
            buffers.leaked(),
        );
        if summary.leaked_buffers > 0 {
            warn!(leaked = summary.leaked_buffers, "Device buffers were not released");
        }
        if summary.is_success() {
            self.console.line("\nSuccess");
        } else {
            self.console.line("\nFailed");
        }
        info!(
            total_mismatches = summary.total_mismatches(),
            skipped = summary.skipped_trials(),
            "Harness finished"
        );
        Ok(summary)
    }

    /// The single directive-offload trial on freshly seeded matrices.
    fn run_offload(&self, seed: u64, strategy: DirectiveOffload) -> TrialReport {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let HarnessConfig {
            dims, value_bound, ..
        } = self.config;
        let mut rng = StdRng::seed_from_u64(seed);
        let a = HostMatrix::random(dims.rows, dims.inner, value_bound, &mut rng);
        let b = HostMatrix::random(dims.inner, dims.cols, value_bound, &mut rng);

        self.console.text(format!("A: {}\nB: {}", a, b));
        self.console.line("\n\nCalling targetMatrixMul");
        debug!(seed, %dims, strategy = strategy.name(), "Offload trial started");

        let product = match strategy.dispatch(&a, &b, &dims) {
            Ok(product) => product,
            Err(e) => {
                warn!(error = %e, "Offload trial could not run");
                self.console.line(e.to_string());
                return skipped_report(trial_index(&self.config), seed, e, a, b);
            }
        };

        self.verify_offload(seed, a, b, product)
    }

    /// Verify the offload product, print its result line and the `Multarget:` dump.
    fn verify_offload(&self, seed: u64, a: HostMatrix, b: HostMatrix, product: HostMatrix) -> TrialReport {
        let index = trial_index(&self.config);
        let outcome = match verify::check(&a, &b, &product, &self.config.dims, &self.console) {
            Ok(mismatches) if mismatches.is_empty() => {
                self.console.line("targetMatrixMul \t\t SUCCESSFUL >>>");
                TrialOutcome::Passed
            }
            Ok(mismatches) => {
                self.console.line(format!(
                    "targetMatrixMul \t\t FAILED: {} Errors >>>",
                    mismatches.len()
                ));
                TrialOutcome::Failed { mismatches }
            }
            Err(e) => {
                warn!(error = %e, "Offload result could not be verified");
                let err = TrialError::from(e);
                self.console.line(err.to_string());
                TrialOutcome::skipped(err)
            }
        };
        self.console.line(format!("\nMultarget: {}", product));

        TrialReport {
            index,
            seed,
            outcome,
            a,
            b,
            result: Some(product),
        }
    }
}

/// The offload trial is numbered after the last explicit-dispatch trial.
fn trial_index(config: &HarnessConfig) -> usize {
    config.trials
}

fn skipped_report(
    index: usize,
    seed: u64,
    error: TrialError,
    a: HostMatrix,
    b: HostMatrix,
) -> TrialReport {
    TrialReport {
        index,
        seed,
        outcome: TrialOutcome::skipped(error),
        a,
        b,
        result: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::sim::{FaultPlan, SimulatedDevice};
    use crate::device::ComputeMode;

    fn config() -> HarnessConfig {
        HarnessConfig::default().with_seed(1234).with_workers(4)
    }

    fn harness(faults: FaultPlan, config: HarnessConfig) -> (Arc<SimulatedDevice>, Harness, crate::console::CapturedOutput) {
        let dev = Arc::new(SimulatedDevice::with_faults(faults));
        let (console, out) = Console::capture();
        (dev.clone(), Harness::new(dev, config, console), out)
    }

    #[test]
    fn test_default_run_succeeds() {
        let (dev, harness, out) = harness(FaultPlan::default(), config());
        let summary = harness.run().unwrap();
        assert!(summary.device_available);
        assert_eq!(summary.trials_attempted, 10);
        assert_eq!(summary.exit_code(), 0);
        assert!(summary.offload.as_ref().unwrap().outcome.is_passed());
        assert_eq!(dev.live_allocations(), 0);
        assert_eq!(dev.launches(), 10);

        let text = out.contents();
        for i in 0..10 {
            assert!(text.contains(&format!("Iteration: {} \t\t SUCCESSFUL >>>\n", i)));
        }
        assert!(text.contains("\n\nCalling targetMatrixMul\n"));
        assert!(text.contains("targetMatrixMul \t\t SUCCESSFUL >>>\n"));
        assert!(text.ends_with("\nSuccess\n"));
    }

    #[test]
    fn test_reports_are_in_trial_order() {
        let (_dev, harness, _out) = harness(FaultPlan::default(), config().with_trials(7).with_workers(3));
        let summary = harness.run().unwrap();
        let indices: Vec<_> = summary.trials.iter().map(|t| t.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
        assert_eq!(summary.trials[3].seed, 1237);
        assert_eq!(summary.offload.as_ref().unwrap().seed, 1241);
    }

    #[test]
    fn test_no_device_runs_nothing() {
        let (dev, harness, out) = harness(FaultPlan::default().no_device(), config());
        let summary = harness.run().unwrap();
        assert!(!summary.device_available);
        assert_eq!(summary.trials_attempted, 0);
        assert!(summary.offload.is_none());
        assert_eq!(summary.exit_code(), 0);
        assert_eq!(dev.allocation_calls(), 0);
        assert_eq!(out.lines().last().unwrap(), "No compute device available");
    }

    #[test]
    fn test_prohibited_compute_mode() {
        let faults = FaultPlan::default().compute_mode(ComputeMode::Prohibited);
        let (_dev, harness, out) = harness(faults, config());
        let summary = harness.run().unwrap();
        assert_eq!(summary.trials_attempted, 0);
        assert_eq!(
            out.lines(),
            vec!["Compute mode is prohibited", "No compute device available"]
        );
    }

    #[test]
    fn test_corrupted_output_sets_exit_code() {
        let (_dev, harness, out) = harness(FaultPlan::default().corrupt_output(), config());
        let summary = harness.run().unwrap();
        assert_eq!(summary.total_mismatches(), 10);
        assert_eq!(summary.exit_code(), 10);
        assert!(summary.offload.as_ref().unwrap().outcome.is_passed());
        assert!(out.contents().ends_with("\nFailed\n"));
    }

    #[test]
    fn test_leak_mode_counts_buffers() {
        let cfg = config().with_release_device_memory(false);
        let (dev, harness, _out) = harness(FaultPlan::default(), cfg);
        let summary = harness.run().unwrap();
        assert_eq!(summary.leaked_buffers, 30);
        assert_eq!(dev.live_allocations(), 30);
        assert_eq!(dev.frees(), 0);
    }

    #[test]
    fn test_zero_trials_still_runs_offload() {
        let (dev, harness, _out) = harness(FaultPlan::default(), config().with_trials(0));
        let summary = harness.run().unwrap();
        assert_eq!(summary.trials_attempted, 0);
        assert!(summary.offload.is_some());
        assert_eq!(dev.launches(), 0);
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let (_dev, harness, _out) = harness(FaultPlan::default(), config().with_workers(0));
        assert!(matches!(harness.run(), Err(HarnessError::Config(_))));
    }

    #[test]
    fn test_exit_code_clamps_to_status_range() {
        let mut summary = HarnessSummary::new("simulated", MatMulDims::square(1), 0, Vec::new(), None, 0);
        for (total, code) in [(0, 0), (3, 3), (254, 254), (255, 254), (256, 254), (usize::MAX, 254)] {
            summary.total_mismatches = total;
            assert_eq!(summary.exit_code(), code, "total {}", total);
        }
    }

    #[test]
    fn test_unverifiable_offload_result_is_reported() {
        let (_dev, harness, out) = harness(FaultPlan::default(), config());
        let a = HostMatrix::zeros(3, 3);
        let b = HostMatrix::zeros(3, 3);
        let report = harness.verify_offload(1, a, b, HostMatrix::zeros(2, 2));
        assert!(report.outcome.is_skipped());
        assert_eq!(report.mismatch_count(), 0);
        let lines = out.lines();
        assert!(lines[0].starts_with("Invalid trial shape: "), "{:?}", lines);
        assert!(out.contents().contains("\nMultarget: \n[0, 0]\n[0, 0]\n"));
    }
}
