use std::time::Duration;

use latency_harness_lib::{client::ThrottlingRetryOptions, scenario::OperationKind};

use crate::{
    cmd::run::{ScenarioParams, run_scenario},
    config::ScenarioConfig,
};

fn quick_config() -> ScenarioConfig {
    ScenarioConfig {
        delay: Duration::ZERO,
        budget: Some(Duration::from_secs(5)),
        retry: ThrottlingRetryOptions {
            max_attempts: 3,
            max_wait: Duration::from_secs(12),
        },
        ceiling: Duration::from_secs(30),
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_baseline_scenario_completes_within_budget() {
    let cfg = quick_config();
    for operation in [OperationKind::ListCollections, OperationKind::BulkUpsert] {
        let report = run_scenario(ScenarioParams {
            operation,
            cfg: &cfg,
            backend: None,
            throttle_every: None,
            master_key: "test-master-key",
        })
        .await
        .unwrap();
        assert_eq!(
            "completed_within_budget",
            report.outcome.finding(),
            "operation = {operation}",
        );
        assert!(report.elapsed < Duration::from_secs(5));
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_budget_bound_failure_is_reported_near_the_budget() {
    let cfg = ScenarioConfig {
        delay: Duration::from_millis(600),
        budget: Some(Duration::from_millis(200)),
        ..quick_config()
    };
    let report = run_scenario(ScenarioParams {
        operation: OperationKind::DatabaseRead,
        cfg: &cfg,
        backend: None,
        throttle_every: None,
        master_key: "test-master-key",
    })
    .await
    .unwrap();

    assert_eq!("failed_within_budget", report.outcome.finding());
    // the budget cut the operation short well before the injected delay
    assert!(
        report.elapsed < Duration::from_millis(600),
        "elapsed = {:?}",
        report.elapsed,
    );
    match &report.outcome {
        latency_harness_lib::scenario::ScenarioOutcome::ClientError { error, .. } => {
            assert!(error.contains("budget"), "error = {error}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_external_ceiling_flags_an_observed_hang() {
    let cfg = ScenarioConfig {
        delay: Duration::from_secs(2),
        budget: None,
        ceiling: Duration::from_millis(500),
        ..quick_config()
    };
    let report = run_scenario(ScenarioParams {
        operation: OperationKind::DatabaseRead,
        cfg: &cfg,
        backend: None,
        throttle_every: None,
        master_key: "test-master-key",
    })
    .await
    .unwrap();

    assert!(report.outcome.is_hang(), "outcome = {:?}", report.outcome);
    // the ceiling, not the stalled operation, bounded the scenario
    assert!(
        report.elapsed < Duration::from_millis(1500),
        "elapsed = {:?}",
        report.elapsed,
    );
}

#[tokio::test]
#[tracing_test::traced_test]
async fn test_throttling_retries_are_driven_and_bounded() {
    let cfg = ScenarioConfig {
        budget: None,
        retry: ThrottlingRetryOptions {
            max_attempts: 2,
            max_wait: Duration::from_secs(1),
        },
        ..quick_config()
    };
    // every document request answered 429: the client retries its configured
    // number of times and then gives up
    let report = run_scenario(ScenarioParams {
        operation: OperationKind::CountAll,
        cfg: &cfg,
        backend: None,
        throttle_every: Some(1),
        master_key: "test-master-key",
    })
    .await
    .unwrap();

    assert_eq!("failed_within_budget", report.outcome.finding());
    match &report.outcome {
        latency_harness_lib::scenario::ScenarioOutcome::ClientError { error, .. } => {
            assert!(error.contains("throttling"), "error = {error}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
