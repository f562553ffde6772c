//! Concurrent evaluation of many samples.
//!
//! Samples run as independent tasks in a `JoinSet`, bounded by a semaphore.
//! The only state they share is:
//!
//! - a [`RateLimiter`] in front of the generator (minimum spacing between
//!   requests across all samples), and
//! - a pool of sandbox slots in front of the probe.
//!
//! A failing or panicking sample yields an `Abandoned(Fatal)` result for that
//! sample alone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EvaluationConfig;
use crate::error::{EvalError, EvalResult};
use crate::feedback::{ErrorClassifier, FeedbackComposer};
use crate::generator::{GenerationRequest, Generator};
use crate::probe::{CompilationProbe, ProbeOutcome};
use crate::refinement::{EvaluationResult, RefinementLoop, Sample};

/// `[batch]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub max_concurrent_samples: usize,
    /// Concurrent compilations; defaults to `max_concurrent_samples`.
    pub sandbox_slots: Option<usize>,
    /// Minimum spacing between generator requests (0 = unlimited).
    pub min_request_interval_ms: u64,
    /// Wall-clock budget for the whole batch.
    pub wall_clock_budget_secs: Option<u64>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_samples: 4,
            sandbox_slots: None,
            min_request_interval_ms: 0,
            wall_clock_budget_secs: None,
        }
    }
}

impl BatchConfig {
    pub fn validate(&self) -> EvalResult<()> {
        if self.max_concurrent_samples == 0 {
            return Err(EvalError::config("batch.max_concurrent_samples must be >= 1"));
        }
        if self.sandbox_slots == Some(0) {
            return Err(EvalError::config("batch.sandbox_slots must be >= 1"));
        }
        Ok(())
    }

    pub fn effective_sandbox_slots(&self) -> usize {
        self.sandbox_slots.unwrap_or(self.max_concurrent_samples)
    }
}

/// Minimum-interval rate limiter, safe under concurrent acquisition.
///
/// Each caller reserves the next free slot under the lock and sleeps outside
/// it, so waiters are spaced `interval` apart in reservation order.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<tokio::time::Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(None),
        }
    }

    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let at = {
            let mut next = self.next_slot.lock().await;
            let now = tokio::time::Instant::now();
            let at = next.map_or(now, |slot| slot.max(now));
            *next = Some(at + self.interval);
            at
        };
        tokio::time::sleep_until(at).await;
    }
}

/// Generator wrapper that waits on a shared [`RateLimiter`].
pub struct RateLimitedGenerator {
    inner: Arc<dyn Generator>,
    limiter: Arc<RateLimiter>,
}

impl RateLimitedGenerator {
    pub fn new(inner: Arc<dyn Generator>, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl Generator for RateLimitedGenerator {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, request: &GenerationRequest) -> EvalResult<String> {
        self.limiter.acquire().await;
        self.inner.generate(request).await
    }
}

/// Probe wrapper that holds a sandbox slot for the duration of a compile.
pub struct SlottedProbe {
    inner: Arc<dyn CompilationProbe>,
    slots: Arc<Semaphore>,
}

impl SlottedProbe {
    pub fn new(inner: Arc<dyn CompilationProbe>, slots: usize) -> Self {
        Self {
            inner,
            slots: Arc::new(Semaphore::new(slots)),
        }
    }
}

#[async_trait]
impl CompilationProbe for SlottedProbe {
    async fn compile(&self, candidate: &str) -> EvalResult<ProbeOutcome> {
        let _permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| EvalError::Probe("sandbox pool closed".to_string()))?;
        self.inner.compile(candidate).await
    }
}

/// Runs a set of samples through one shared refinement loop.
pub struct BatchRunner {
    refinement: Arc<RefinementLoop>,
    config: BatchConfig,
}

impl BatchRunner {
    /// Wire generator and probe behind the shared limiter and sandbox pool.
    pub fn new(
        generator: Arc<dyn Generator>,
        probe: Arc<dyn CompilationProbe>,
        config: &EvaluationConfig,
    ) -> EvalResult<Self> {
        config.validate()?;
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(
            config.batch.min_request_interval_ms,
        )));
        let generator: Arc<dyn Generator> = Arc::new(RateLimitedGenerator::new(generator, limiter));
        let probe: Arc<dyn CompilationProbe> = Arc::new(SlottedProbe::new(
            probe,
            config.batch.effective_sandbox_slots(),
        ));

        let refinement = RefinementLoop::new(generator, probe, config.refinement.clone())?
            .with_classifier(ErrorClassifier::default())
            .with_composer(FeedbackComposer::new(config.composer.clone())?)
            .with_scorer(config.similarity.scorer()?)
            .with_templates(config.prompts.clone());

        Ok(Self {
            refinement: Arc::new(refinement),
            config: config.batch.clone(),
        })
    }

    pub fn model(&self) -> &str {
        self.refinement.model()
    }

    /// Evaluate every sample; results come back in completion order.
    pub async fn run(&self, samples: Vec<Sample>, cancel: &CancellationToken) -> Vec<EvaluationResult> {
        self.run_with(samples, cancel, |_| {}).await
    }

    /// As [`run`](Self::run), calling `on_result` as each result arrives.
    pub async fn run_with<F>(
        &self,
        samples: Vec<Sample>,
        cancel: &CancellationToken,
        mut on_result: F,
    ) -> Vec<EvaluationResult>
    where
        F: FnMut(&EvaluationResult),
    {
        let started = Instant::now();
        let total = samples.len();
        let budget = cancel.child_token();
        let timer = self.config.wall_clock_budget_secs.map(|secs| {
            let budget = budget.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                warn!(budget_secs = secs, "Wall-clock budget exhausted; cancelling remaining samples");
                budget.cancel();
            })
        });

        let sem = Arc::new(Semaphore::new(self.config.max_concurrent_samples));
        let mut join_set: JoinSet<EvaluationResult> = JoinSet::new();

        for sample in samples {
            let sem = sem.clone();
            let refinement = self.refinement.clone();
            let token = budget.child_token();

            join_set.spawn(async move {
                let model = refinement.model().to_string();
                let sample_id = sample.id.clone();
                let sample_started = Instant::now();
                let Ok(_permit) = sem.acquire_owned().await else {
                    return EvaluationResult::fatal(&sample_id, &model, "sample pool closed", 0);
                };

                // Inner task so a panic still maps back to this sample.
                let handle = tokio::spawn(async move { refinement.run(&sample, &token).await });
                let elapsed = || sample_started.elapsed().as_millis() as u64;
                match handle.await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => {
                        warn!(sample_id = %sample_id, error = %e, kind = %e.failure_kind(), "Sample failed");
                        EvaluationResult::fatal(&sample_id, &model, e.to_string(), elapsed())
                    }
                    Err(e) => {
                        warn!(sample_id = %sample_id, error = %e, "Sample task panicked");
                        EvaluationResult::fatal(&sample_id, &model, format!("task failed: {e}"), elapsed())
                    }
                }
            });
        }

        let mut results = Vec::with_capacity(total);
        while let Some(res) = join_set.join_next().await {
            match res {
                Ok(result) => {
                    on_result(&result);
                    results.push(result);
                }
                Err(e) => {
                    // Outer wrapper only fails if the runtime is shutting down.
                    warn!(error = %e, "sample wrapper task failed");
                }
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }
        info!(
            model = %self.model(),
            samples = total,
            completed = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        results
    }
}
