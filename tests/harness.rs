//! End-to-end harness runs against the simulated accelerator.

use std::sync::Arc;

use offload_harness::buffers::DeviceBufferManager;
use offload_harness::device::sim::{FaultPlan, SimulatedDevice};
use offload_harness::device::Accelerator;
use offload_harness::dispatch::{DirectiveOffload, ExplicitDispatch};
use offload_harness::matrix::HostMatrix;
use offload_harness::trial::{run_trial, TrialOutcome};
use offload_harness::{Console, Harness, HarnessConfig, MatMulDims, MatMulDispatch, TrialError};

fn sim(faults: FaultPlan) -> Arc<SimulatedDevice> {
    Arc::new(SimulatedDevice::with_faults(faults))
}

#[test]
fn test_identity_scenario_both_strategies() {
    let dev: Arc<dyn Accelerator> = sim(FaultPlan::default());
    let buffers = Arc::new(DeviceBufferManager::new(dev.clone(), true));
    let strategies: [Box<dyn MatMulDispatch>; 2] = [
        Box::new(ExplicitDispatch::new(dev, buffers)),
        Box::new(DirectiveOffload::new()),
    ];
    let a = HostMatrix::from_rows(&[&[1, 2, 3], &[4, 5, 6], &[7, 8, 9]]).unwrap();
    for strategy in &strategies {
        let c = strategy
            .dispatch(&a, &HostMatrix::identity(3), &MatMulDims::square(3))
            .unwrap();
        assert_eq!(c, a, "strategy {}", strategy.name());
    }
}

#[test]
fn test_unavailable_device_exits_zero() {
    let dev = sim(FaultPlan::default().no_device());
    let (console, out) = Console::capture();
    let summary = Harness::new(dev.clone(), HarnessConfig::default().with_seed(1), console)
        .run()
        .unwrap();
    assert_eq!(summary.trials_attempted, 0);
    assert_eq!(summary.exit_code(), 0);
    assert_eq!(dev.allocation_calls(), 0);
    assert!(out.lines().contains(&"No compute device available".to_string()));
    assert!(!out.contents().contains("Iteration"));
}

#[test]
fn test_second_allocation_failure_skips_one_trial() {
    let dev = sim(FaultPlan::default().fail_allocation(2));
    let (console, out) = Console::capture();
    let config = HarnessConfig::default().with_seed(3).with_workers(4);
    let summary = Harness::new(dev.clone(), config, console).run().unwrap();

    assert_eq!(summary.trials_attempted, 10);
    assert_eq!(summary.skipped_trials(), 1);
    assert_eq!(summary.total_mismatches(), 0);
    assert_eq!(summary.exit_code(), 0);
    let skipped: Vec<_> = summary
        .trials
        .iter()
        .filter(|t| t.outcome.is_skipped())
        .collect();
    assert!(matches!(
        skipped[0].outcome,
        TrialOutcome::Skipped { error: TrialError::Allocation(_), .. }
    ));
    assert_eq!(
        out.lines().iter().filter(|l| *l == "Unable to allocate").count(),
        1
    );
    assert_eq!(dev.live_allocations(), 0);
    assert_eq!(dev.launches(), 9);
}

#[test]
fn test_concurrent_trials_match_sequential_reruns() {
    let dev = sim(FaultPlan::default());
    let config = HarnessConfig::default()
        .with_dims(MatMulDims::new(4, 5, 3))
        .with_seed(77)
        .with_workers(4)
        .with_value_bound(1000);
    let summary = Harness::new(dev.clone(), config.clone(), Console::sink())
        .run()
        .unwrap();
    assert_eq!(summary.exit_code(), 0);

    let accel: Arc<dyn Accelerator> = sim(FaultPlan::default());
    let buffers = Arc::new(DeviceBufferManager::new(accel.clone(), true));
    let explicit = ExplicitDispatch::new(accel, buffers);
    for concurrent in &summary.trials {
        let sequential = run_trial(
            concurrent.index,
            concurrent.seed,
            &config.dims,
            config.value_bound,
            &explicit,
            &Console::sink(),
        );
        assert_eq!(sequential.a, concurrent.a);
        assert_eq!(sequential.b, concurrent.b);
        assert_eq!(sequential.result, concurrent.result);
        assert_eq!(sequential.outcome, concurrent.outcome);
    }
}

#[test]
fn test_same_seed_is_idempotent() {
    let run = || {
        let config = HarnessConfig::default().with_seed(2024).with_workers(3);
        Harness::new(sim(FaultPlan::default()), config, Console::sink())
            .run()
            .unwrap()
    };
    let (first, second) = (run(), run());
    assert_eq!(first.total_mismatches(), 0);
    assert_eq!(second.total_mismatches(), 0);
    for (x, y) in first.trials.iter().zip(&second.trials) {
        assert_eq!(x.a, y.a);
        assert_eq!(x.result, y.result);
    }
}

#[test]
fn test_release_modes_and_live_allocations() {
    for (release, live) in [(true, 0), (false, 30)] {
        let dev = sim(FaultPlan::default());
        let config = HarnessConfig::default()
            .with_seed(9)
            .with_release_device_memory(release);
        let summary = Harness::new(dev.clone(), config, Console::sink()).run().unwrap();
        assert_eq!(dev.live_allocations(), live);
        assert_eq!(summary.leaked_buffers, live);
        assert_eq!(summary.exit_code(), 0);
    }
}

#[test]
fn test_corrupted_kernel_output_is_counted() {
    let dev = sim(FaultPlan::default().corrupt_output());
    let (console, out) = Console::capture();
    let config = HarnessConfig::default().with_seed(5).with_trials(3).with_workers(2);
    let summary = Harness::new(dev, config, console).run().unwrap();

    assert_eq!(summary.exit_code(), 3);
    for report in &summary.trials {
        match &report.outcome {
            TrialOutcome::Failed { mismatches } => {
                assert_eq!(mismatches.len(), 1);
                assert_eq!((mismatches[0].row, mismatches[0].col), (0, 0));
                assert_eq!(mismatches[0].delta(), 1);
            }
            other => panic!("trial {} should fail, got {:?}", report.index, other),
        }
    }
    let text = out.contents();
    assert_eq!(text.matches("\tError: Matrices miscompare devC[0,0]-hostC: 1\n").count(), 3);
    assert!(text.ends_with("\nFailed\n"));
}

#[test]
fn test_transfer_failures_have_distinct_errors() {
    let cases = [
        (FaultPlan::default().fail_copy_to_device(2), "copy_to_device"),
        (FaultPlan::default().fail_copy_to_host(1), "copy_to_host"),
        (FaultPlan::default().fail_launch(1), "launch"),
    ];
    for (faults, step) in cases {
        let config = HarnessConfig::default().with_seed(8).with_trials(1).with_workers(1);
        let summary = Harness::new(sim(faults), config, Console::sink()).run().unwrap();
        match &summary.trials[0].outcome {
            TrialOutcome::Skipped { step: got, .. } => assert_eq!(*got, step),
            other => panic!("expected skipped trial, got {:?}", other),
        }
        assert_eq!(summary.exit_code(), 0);
    }
}

#[test]
fn test_single_element_and_unit_inner() {
    let config = HarnessConfig::default()
        .with_dims(MatMulDims::new(1, 1, 1))
        .with_seed(12)
        .with_trials(2);
    let summary = Harness::new(sim(FaultPlan::default()), config, Console::sink())
        .run()
        .unwrap();
    assert_eq!(summary.exit_code(), 0);
    let t = &summary.trials[0];
    assert_eq!(t.result.as_ref().unwrap().get(0, 0), t.a.get(0, 0) * t.b.get(0, 0));

    let config = HarnessConfig::default()
        .with_dims(MatMulDims::new(3, 1, 4))
        .with_seed(13);
    let summary = Harness::new(sim(FaultPlan::default()), config, Console::sink())
        .run()
        .unwrap();
    assert_eq!(summary.exit_code(), 0);
}

#[test]
fn test_mismatch_totals_past_the_status_byte_still_fail() {
    let dev = sim(FaultPlan::default().corrupt_output());
    let config = HarnessConfig::default()
        .with_seed(21)
        .with_trials(256)
        .with_workers(4)
        .with_dims(MatMulDims::new(1, 1, 1));
    let summary = Harness::new(dev, config, Console::sink()).run().unwrap();

    assert_eq!(summary.total_mismatches(), 256);
    let code = summary.exit_code();
    assert_eq!(code, offload_harness::orchestrator::MAX_MISMATCH_EXIT_CODE);
    // Only the low byte reaches the parent process.
    assert_ne!(code & 0xff, 0);
    assert_ne!(code, offload_harness::cli::USAGE_ERROR_EXIT_CODE);
}
