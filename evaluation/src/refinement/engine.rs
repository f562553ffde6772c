//! The compile → classify → correct loop for a single sample.
//!
//! ```text
//! Init ──generate──▶ Probing ──compiled──▶ Converged
//!                      │
//!                      └─failed─▶ Refining ──budget spent──▶ ExhaustedIterations
//!                                    │  └──stagnation──▶ Abandoned
//!                                    └──compose + generate──▶ Probing
//! ```
//!
//! Each sample owns its history; nothing here is shared between samples.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::attempt::{EvaluationResult, TranslationAttempt};
use super::state::{AbandonReason, RefinementState, StateMachine, TerminalState};
use crate::error::{EvalError, EvalResult};
use crate::feedback::{ErrorClassifier, ErrorRecord, FeedbackComposer};
use crate::generator::{check_output, GenerationKind, GenerationRequest, Generator};
use crate::probe::{CompilationProbe, ProbeOutcome};
use crate::prompts::PromptTemplates;
use crate::retry::RetryPolicy;
use crate::similarity::{SimilarityBreakdown, SimilarityScorer};

/// Loop settings (`[refinement]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Corrective rounds allowed after the initial attempt.
    pub max_iterations: u32,
    /// Minimum composite improvement that counts as progress.
    pub epsilon: f64,
    /// Consecutive stagnant rounds before giving up.
    pub stagnation_limit: u32,
    /// When false, stop after the first probe.
    pub feedback_enabled: bool,
    /// Score every attempt (true) or only the final one.
    pub score_every_attempt: bool,
    pub probe_retry: RetryPolicy,
    pub generator_retry: RetryPolicy,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            epsilon: 0.01,
            stagnation_limit: 2,
            feedback_enabled: true,
            score_every_attempt: true,
            probe_retry: RetryPolicy::probe(),
            generator_retry: RetryPolicy::default(),
        }
    }
}

impl RefinementConfig {
    pub fn validate(&self) -> EvalResult<()> {
        if self.max_iterations < 1 {
            return Err(EvalError::config("refinement.max_iterations must be >= 1"));
        }
        if self.epsilon.is_nan() || self.epsilon < 0.0 {
            return Err(EvalError::config("refinement.epsilon must be >= 0"));
        }
        if self.stagnation_limit < 1 {
            return Err(EvalError::config("refinement.stagnation_limit must be >= 1"));
        }
        Ok(())
    }
}

/// One unit of work: a source program and optionally its reference
/// translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Pre-generated iteration-0 candidate; skips the initial generator call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_candidate: Option<String>,
}

impl Sample {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            reference: None,
            initial_candidate: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_initial_candidate(mut self, candidate: impl Into<String>) -> Self {
        self.initial_candidate = Some(candidate.into());
        self
    }
}

/// Per-run mutable state, owned by a single `run` call.
struct Run<'a> {
    sample: &'a Sample,
    machine: StateMachine,
    attempts: Vec<TranslationAttempt>,
    stagnation: u32,
    started: Instant,
}

/// Drives one sample to a terminal state.
pub struct RefinementLoop {
    generator: Arc<dyn Generator>,
    probe: Arc<dyn CompilationProbe>,
    classifier: ErrorClassifier,
    composer: FeedbackComposer,
    scorer: SimilarityScorer,
    templates: PromptTemplates,
    config: RefinementConfig,
}

impl RefinementLoop {
    pub fn new(
        generator: Arc<dyn Generator>,
        probe: Arc<dyn CompilationProbe>,
        config: RefinementConfig,
    ) -> EvalResult<Self> {
        config.validate()?;
        Ok(Self {
            generator,
            probe,
            classifier: ErrorClassifier::default(),
            composer: FeedbackComposer::default(),
            scorer: SimilarityScorer::default(),
            templates: PromptTemplates::default(),
            config,
        })
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_composer(mut self, composer: FeedbackComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_scorer(mut self, scorer: SimilarityScorer) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_templates(mut self, templates: PromptTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    pub fn model(&self) -> &str {
        self.generator.name()
    }

    /// Run `sample` to a terminal state.
    ///
    /// Returns `Err` only when the generator breaks its contract or stays
    /// unreachable after retries; everything else ends in a terminal state.
    pub async fn run(
        &self,
        sample: &Sample,
        cancel: &CancellationToken,
    ) -> EvalResult<EvaluationResult> {
        let mut run = Run {
            sample,
            machine: StateMachine::new(&sample.id),
            attempts: Vec::new(),
            stagnation: 0,
            started: Instant::now(),
        };

        // Init
        if cancel.is_cancelled() {
            return self.abandon(run, AbandonReason::Cancelled);
        }
        let (initial, initial_prompt) = match &sample.initial_candidate {
            Some(candidate) => (candidate.clone(), None),
            None => {
                let prompt = self.templates.initial(&sample.source);
                match self
                    .generate(sample, 0, GenerationKind::Initial, prompt.clone(), cancel)
                    .await?
                {
                    Some(text) => (text, Some(prompt)),
                    None => return self.abandon(run, AbandonReason::Cancelled),
                }
            }
        };
        transition(&mut run.machine, RefinementState::Probing, None)?;

        let mut candidate = initial;
        let mut prompt = initial_prompt;
        let mut iteration = 0u32;
        loop {
            // Probing
            if cancel.is_cancelled() {
                return self.abandon(run, AbandonReason::Cancelled);
            }
            let Some(attempt) = self.probe_candidate(sample, iteration, &candidate, cancel).await
            else {
                return self.abandon(run, AbandonReason::Cancelled);
            };
            let compiled = attempt.compiled();
            run.attempts.push(attempt.with_prompt(prompt.take()));
            if compiled {
                transition(&mut run.machine, RefinementState::Converged, Some("compiled"))?;
                return Ok(self.finish(run, None));
            }
            transition(&mut run.machine, RefinementState::Refining, None)?;

            // Refining
            if cancel.is_cancelled() {
                return self.abandon(run, AbandonReason::Cancelled);
            }
            if !self.config.feedback_enabled || iteration >= self.config.max_iterations {
                transition(
                    &mut run.machine,
                    RefinementState::ExhaustedIterations,
                    Some("iteration budget spent"),
                )?;
                return Ok(self.finish(run, None));
            }
            if self.update_stagnation(&mut run) {
                return self.abandon(run, AbandonReason::Stagnation);
            }

            let next = iteration + 1;
            let Some(last) = run.attempts.last() else {
                return Err(EvalError::Internal(anyhow::anyhow!(
                    "refining without an attempt"
                )));
            };
            let previous_categories = run
                .attempts
                .len()
                .checked_sub(2)
                .map(|i| run.attempts[i].categories());
            let context = self.composer.compose(
                &sample.source,
                last.candidate(),
                last.errors(),
                next,
                previous_categories.as_ref(),
            );
            debug!(
                sample_id = %sample.id,
                iteration = next,
                categories = ?context.categories(),
                request_alternative = context.request_alternative(),
                "Composed corrective feedback"
            );
            let corrective = context.render(&self.templates);

            match self
                .generate(sample, next, GenerationKind::Corrective, corrective.clone(), cancel)
                .await?
            {
                Some(text) => {
                    candidate = text;
                    prompt = Some(corrective);
                }
                None => return self.abandon(run, AbandonReason::Cancelled),
            }
            iteration = next;
            run.machine.set_iteration(iteration);
            transition(&mut run.machine, RefinementState::Probing, None)?;
        }
    }

    /// Generator call raced against cancellation. `Ok(None)` when cancelled.
    async fn generate(
        &self,
        sample: &Sample,
        iteration: u32,
        kind: GenerationKind,
        prompt: String,
        cancel: &CancellationToken,
    ) -> EvalResult<Option<String>> {
        let request = GenerationRequest {
            sample_id: sample.id.clone(),
            iteration,
            kind,
            prompt,
        };
        let generator = &self.generator;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Ok(None),
            result = self.config.generator_retry.run("generate", || generator.generate(&request)) => {
                let text = result.map_err(|e| {
                    warn!(sample_id = %sample.id, iteration, error = %e, "Generator failed");
                    e
                })?;
                check_output(text).map(Some)
            }
        }
    }

    /// Probe (with retry) and classify. `None` when cancelled.
    async fn probe_candidate(
        &self,
        sample: &Sample,
        iteration: u32,
        candidate: &str,
        cancel: &CancellationToken,
    ) -> Option<TranslationAttempt> {
        let started = Instant::now();
        let probe = &self.probe;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            outcome = self.config.probe_retry.run("probe", || probe.compile(candidate)) => outcome,
        };
        let elapsed = started.elapsed().as_millis() as u64;

        let attempt = match outcome {
            Ok(outcome) if outcome.success => TranslationAttempt::from_probe(
                &sample.id, iteration, &sample.source, candidate, &outcome, Vec::new(), elapsed,
            ),
            Ok(outcome) => {
                let errors = self.classify(&outcome);
                info!(
                    sample_id = %sample.id,
                    iteration,
                    errors = errors.len(),
                    categories = ?errors.iter().map(|e| e.category).collect::<std::collections::BTreeSet<_>>(),
                    "Compilation failed"
                );
                TranslationAttempt::from_probe(
                    &sample.id, iteration, &sample.source, candidate, &outcome, errors, elapsed,
                )
            }
            Err(e) => {
                warn!(
                    sample_id = %sample.id,
                    iteration,
                    error = %e,
                    kind = %e.failure_kind(),
                    "Probe failed after retry; recording infrastructural failure"
                );
                TranslationAttempt::infrastructural(
                    &sample.id, iteration, &sample.source, candidate, &e, elapsed,
                )
            }
        };

        let similarity = if self.config.score_every_attempt {
            self.score(sample, candidate)
        } else {
            None
        };
        Some(attempt.with_similarity(similarity))
    }

    fn classify(&self, outcome: &ProbeOutcome) -> Vec<ErrorRecord> {
        let errors = self.classifier.classify(&outcome.diagnostics);
        if errors.is_empty() {
            // Failed without saying why.
            let status = outcome
                .exit_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return vec![ErrorRecord::other(format!(
                "compiler exited with status {status} and no diagnostics"
            ))];
        }
        errors
    }

    fn score(&self, sample: &Sample, candidate: &str) -> Option<SimilarityBreakdown> {
        sample
            .reference
            .as_deref()
            .map(|reference| self.scorer.score(reference, candidate))
    }

    /// Update the stagnation counter from the last two attempts. Returns
    /// `true` when the limit is reached.
    fn update_stagnation(&self, run: &mut Run<'_>) -> bool {
        let n = run.attempts.len();
        if n < 2 {
            return false;
        }
        let (prev, last) = (&run.attempts[n - 2], &run.attempts[n - 1]);
        let improvement = match (prev.similarity(), last.similarity()) {
            (Some(a), Some(b)) => b.composite - a.composite,
            _ => 0.0,
        };
        if prev.categories() == last.categories() && improvement < self.config.epsilon {
            run.stagnation += 1;
            debug!(
                sample_id = %run.sample.id,
                stagnation = run.stagnation,
                improvement,
                "No progress between iterations"
            );
        } else {
            run.stagnation = 0;
        }
        run.stagnation >= self.config.stagnation_limit
    }

    fn abandon(&self, mut run: Run<'_>, reason: AbandonReason) -> EvalResult<EvaluationResult> {
        run.machine
            .abandon(&reason)
            .map_err(|e| EvalError::Internal(e.into()))?;
        Ok(self.finish(run, Some(reason)))
    }

    fn finish(&self, run: Run<'_>, abandon_reason: Option<AbandonReason>) -> EvaluationResult {
        let terminal = run
            .machine
            .current()
            .terminal()
            .unwrap_or(TerminalState::Abandoned);

        let final_similarity = match run.attempts.last() {
            Some(last) if self.config.score_every_attempt => last.similarity().copied(),
            Some(last) => self.score(run.sample, last.candidate()),
            None => None,
        };
        let first_similarity = run.attempts.first().and_then(|a| a.similarity().copied());
        let similarity_improvement = match (first_similarity, final_similarity) {
            (Some(first), Some(last)) => Some(last.composite - first.composite),
            _ => None,
        };
        let iteration_count = run.attempts.last().map(|a| a.iteration()).unwrap_or(0);

        EvaluationResult {
            sample_id: run.sample.id.clone(),
            model: self.generator.name().to_string(),
            terminal,
            abandon_reason,
            final_similarity,
            similarity_improvement,
            iteration_count,
            stagnation_count: run.stagnation,
            duration_ms: run.started.elapsed().as_millis() as u64,
            attempts: run.attempts,
            transitions: run.machine.into_transitions(),
        }
    }
}

fn transition(
    machine: &mut StateMachine,
    to: RefinementState,
    reason: Option<&str>,
) -> EvalResult<()> {
    machine
        .advance(to, reason)
        .map_err(|e| EvalError::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        fn name(&self) -> &str {
            "echo"
        }

        async fn generate(&self, request: &GenerationRequest) -> EvalResult<String> {
            Ok(format!("// iteration {}\nint main() {{ return 0; }}", request.iteration))
        }
    }

    /// Fails every candidate with the queued diagnostics, then succeeds.
    struct QueueProbe(Mutex<Vec<String>>);

    #[async_trait]
    impl CompilationProbe for QueueProbe {
        async fn compile(&self, _candidate: &str) -> EvalResult<ProbeOutcome> {
            let mut queue = self.0.lock().unwrap();
            if queue.is_empty() {
                Ok(ProbeOutcome::success())
            } else {
                Ok(ProbeOutcome::failure(queue.remove(0), Some(1)))
            }
        }
    }

    fn refinement(diagnostics: &[&str], config: RefinementConfig) -> RefinementLoop {
        let probe = QueueProbe(Mutex::new(diagnostics.iter().map(|s| s.to_string()).collect()));
        RefinementLoop::new(Arc::new(EchoGenerator), Arc::new(probe), config).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(RefinementConfig::default().validate().is_ok());
        let bad = RefinementConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(matches!(bad.validate(), Err(EvalError::Configuration(_))));
        let bad = RefinementConfig {
            epsilon: -0.1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn test_converges_on_first_probe() {
        let result = refinement(&[], RefinementConfig::default())
            .run(&Sample::new("s1", "program p\nend"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.terminal, TerminalState::Converged);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.iteration_count, 0);
        assert_eq!(result.model, "echo");
        assert!(result.first_attempt_compiled());
    }

    #[tokio::test]
    async fn test_converges_after_one_correction() {
        let result = refinement(
            &["a.cpp:1:1: error: 'n' was not declared in this scope"],
            RefinementConfig::default(),
        )
        .run(&Sample::new("s1", "src"), &CancellationToken::new())
        .await
        .unwrap();
        assert_eq!(result.terminal, TerminalState::Converged);
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(result.attempts[1].iteration(), 1);
        assert_eq!(result.iteration_count, 1);
    }

    #[tokio::test]
    async fn test_feedback_disabled_stops_after_first_probe() {
        let config = RefinementConfig {
            feedback_enabled: false,
            ..Default::default()
        };
        let result = refinement(&["x.cpp:1:1: error: expected ';' before '}' token"], config)
            .run(&Sample::new("s1", "src"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.terminal, TerminalState::ExhaustedIterations);
        assert_eq!(result.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_without_diagnostics_gets_other_record() {
        let result = refinement(&[""], RefinementConfig::default())
            .run(&Sample::new("s1", "src"), &CancellationToken::new())
            .await
            .unwrap();
        let first = &result.attempts[0];
        assert_eq!(first.errors().len(), 1);
        assert!(first.errors()[0].message.contains("no diagnostics"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = refinement(&[], RefinementConfig::default())
            .run(&Sample::new("s1", "src"), &cancel)
            .await
            .unwrap();
        assert_eq!(result.terminal, TerminalState::Abandoned);
        assert_eq!(result.abandon_reason, Some(AbandonReason::Cancelled));
        assert!(result.attempts.is_empty());
    }
}
