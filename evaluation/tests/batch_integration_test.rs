//! Integration tests for concurrent batch evaluation: sample isolation,
//! budgets and cancellation.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use evaluation::{
    AbandonReason, BatchRunner, EvalError, EvaluationConfig, EvaluationResult, Sample, TerminalState,
};
use tokio_util::sync::CancellationToken;

fn samples(ids: &[&str]) -> Vec<Sample> {
    ids.iter().map(|id| Sample::new(*id, FORTRAN_SOURCE)).collect()
}

fn by_id<'a>(results: &'a [EvaluationResult], id: &str) -> &'a EvaluationResult {
    results
        .iter()
        .find(|r| r.sample_id == id)
        .unwrap_or_else(|| panic!("no result for {id}"))
}

/// Test: a panicking generator call only takes down its own sample
#[tokio::test]
async fn test_panic_is_isolated_to_its_sample() {
    let generator = Arc::new(SelectiveGenerator {
        bad_sample: "b".to_string(),
        misbehavior: Misbehavior::Panic,
    });
    let runner = BatchRunner::new(generator, Arc::new(AlwaysCompiles), &EvaluationConfig::default()).unwrap();

    let results = runner.run(samples(&["a", "b", "c"]), &CancellationToken::new()).await;

    assert_eq!(results.len(), 3);
    let bad = by_id(&results, "b");
    assert_eq!(bad.terminal, TerminalState::Abandoned);
    assert!(matches!(bad.abandon_reason, Some(AbandonReason::Fatal { .. })));
    assert_eq!(bad.model, "selective");
    for id in ["a", "c"] {
        assert_eq!(by_id(&results, id).terminal, TerminalState::Converged);
    }
}

/// Test: a generator contract violation is reported as that sample's fatal result
#[tokio::test]
async fn test_contract_violation_is_isolated() {
    let generator = Arc::new(SelectiveGenerator {
        bad_sample: "b".to_string(),
        misbehavior: Misbehavior::EmptyOutput,
    });
    let runner = BatchRunner::new(generator, Arc::new(AlwaysCompiles), &EvaluationConfig::default()).unwrap();

    let results = runner.run(samples(&["a", "b", "c"]), &CancellationToken::new()).await;

    let Some(AbandonReason::Fatal { message }) = &by_id(&results, "b").abandon_reason else {
        panic!("expected a fatal abandon");
    };
    assert!(message.contains("empty"), "{message}");
    assert!(by_id(&results, "a").converged());
    assert!(by_id(&results, "c").converged());
}

/// Test: the wall-clock budget cancels every in-flight sample
#[tokio::test(start_paused = true)]
async fn test_wall_clock_budget_abandons_hung_samples() {
    let mut config = EvaluationConfig::default();
    config.batch.wall_clock_budget_secs = Some(5);
    let runner = BatchRunner::new(
        Arc::new(ScriptedGenerator::new("scripted")),
        Arc::new(HangingProbe),
        &config,
    )
    .unwrap();

    let results = runner.run(samples(&["a", "b", "c", "d", "e", "f"]), &CancellationToken::new()).await;

    assert_eq!(results.len(), 6);
    for result in &results {
        assert_eq!(result.terminal, TerminalState::Abandoned);
        assert_eq!(result.abandon_reason, Some(AbandonReason::Cancelled));
    }
}

/// Test: cancelling the caller's token cancels the batch
#[tokio::test(start_paused = true)]
async fn test_external_cancellation() {
    let runner = BatchRunner::new(
        Arc::new(ScriptedGenerator::new("scripted")),
        Arc::new(HangingProbe),
        &EvaluationConfig::default(),
    )
    .unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let results = runner.run(samples(&["a", "b"]), &cancel).await;

    assert_eq!(results.len(), 2);
    assert!(results
        .iter()
        .all(|r| r.abandon_reason == Some(AbandonReason::Cancelled)));
}

/// Test: every sample is reported through the callback exactly once
#[tokio::test]
async fn test_callback_sees_every_result() {
    let generator = Arc::new(ScriptedGenerator::new("scripted"));
    let mut config = EvaluationConfig::default();
    config.batch.max_concurrent_samples = 2;
    config.batch.sandbox_slots = Some(1);
    let runner = BatchRunner::new(generator.clone(), Arc::new(AlwaysCompiles), &config).unwrap();

    let ids = ["s1", "s2", "s3", "s4", "s5"];
    let mut seen = Vec::new();
    let results = runner
        .run_with(samples(&ids), &CancellationToken::new(), |r| {
            seen.push(r.sample_id.clone())
        })
        .await;

    seen.sort();
    assert_eq!(seen, ids);
    assert_eq!(results.len(), ids.len());
    assert_eq!(generator.calls(), ids.len());
    assert_eq!(runner.model(), "scripted");
}

/// Test: generator requests are spaced by the shared rate limiter
#[tokio::test(start_paused = true)]
async fn test_rate_limit_spaces_generator_calls() {
    let mut config = EvaluationConfig::default();
    config.batch.min_request_interval_ms = 250;
    let runner = BatchRunner::new(
        Arc::new(ScriptedGenerator::new("scripted")),
        Arc::new(AlwaysCompiles),
        &config,
    )
    .unwrap();

    let start = tokio::time::Instant::now();
    let results = runner.run(samples(&["a", "b", "c", "d"]), &CancellationToken::new()).await;

    assert_eq!(results.len(), 4);
    assert!(start.elapsed() >= Duration::from_millis(750));
}

#[test]
fn test_invalid_config_rejected_at_construction() {
    let mut config = EvaluationConfig::default();
    config.batch.max_concurrent_samples = 0;
    let err = BatchRunner::new(
        Arc::new(ScriptedGenerator::new("scripted")),
        Arc::new(AlwaysCompiles),
        &config,
    )
    .err()
    .expect("construction should fail");
    assert!(matches!(err, EvalError::Configuration(_)));
}
