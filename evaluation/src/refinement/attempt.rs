//! Attempt records and per-sample results.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{AbandonReason, TerminalState, TransitionRecord};
use crate::error::EvalError;
use crate::feedback::{ErrorCategory, ErrorRecord};
use crate::probe::ProbeOutcome;
use crate::similarity::SimilarityBreakdown;

/// One candidate and its verdict. Write-once: built by the loop, then only
/// read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationAttempt {
    sample_id: String,
    iteration: u32,
    source: String,
    candidate: String,
    /// blake3 of the candidate text, for spotting repeated candidates.
    candidate_digest: String,
    /// Prompt that produced the candidate; absent for supplied candidates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    compiled: bool,
    exit_status: Option<i32>,
    diagnostics: Option<String>,
    errors: Vec<ErrorRecord>,
    similarity: Option<SimilarityBreakdown>,
    infrastructural_failure: bool,
    duration_ms: u64,
    timestamp: DateTime<Utc>,
}

impl TranslationAttempt {
    /// Attempt with a compiler verdict.
    pub fn from_probe(
        sample_id: &str,
        iteration: u32,
        source: &str,
        candidate: &str,
        outcome: &ProbeOutcome,
        errors: Vec<ErrorRecord>,
        duration_ms: u64,
    ) -> Self {
        let diagnostics = (!outcome.diagnostics.trim().is_empty()).then(|| outcome.diagnostics.clone());
        Self {
            sample_id: sample_id.to_string(),
            iteration,
            source: source.to_string(),
            candidate: candidate.to_string(),
            candidate_digest: digest(candidate),
            prompt: None,
            compiled: outcome.success,
            exit_status: outcome.exit_status,
            diagnostics,
            errors,
            similarity: None,
            infrastructural_failure: false,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// Attempt whose probe never produced a verdict. Carries one synthetic
    /// `Other` record describing the failure.
    pub fn infrastructural(
        sample_id: &str,
        iteration: u32,
        source: &str,
        candidate: &str,
        failure: &EvalError,
        duration_ms: u64,
    ) -> Self {
        let message = failure.to_string();
        Self {
            sample_id: sample_id.to_string(),
            iteration,
            source: source.to_string(),
            candidate: candidate.to_string(),
            candidate_digest: digest(candidate),
            prompt: None,
            compiled: false,
            exit_status: None,
            diagnostics: Some(message.clone()),
            errors: vec![ErrorRecord::other(message)],
            similarity: None,
            infrastructural_failure: true,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    /// Attach the generator prompt before the attempt is recorded.
    pub fn with_prompt(mut self, prompt: Option<String>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Attach a similarity score before the attempt is recorded.
    pub fn with_similarity(mut self, similarity: Option<SimilarityBreakdown>) -> Self {
        self.similarity = similarity;
        self
    }

    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn candidate_digest(&self) -> &str {
        &self.candidate_digest
    }

    pub fn compiled(&self) -> bool {
        self.compiled
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.exit_status
    }

    pub fn diagnostics(&self) -> Option<&str> {
        self.diagnostics.as_deref()
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn similarity(&self) -> Option<&SimilarityBreakdown> {
        self.similarity.as_ref()
    }

    pub fn infrastructural_failure(&self) -> bool {
        self.infrastructural_failure
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Distinct error categories of this attempt.
    pub fn categories(&self) -> BTreeSet<ErrorCategory> {
        self.errors.iter().map(|e| e.category).collect()
    }
}

fn digest(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Outcome of one sample's refinement loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub sample_id: String,
    /// Generator name
    pub model: String,
    /// Append-only attempt history, in iteration order
    pub attempts: Vec<TranslationAttempt>,
    pub terminal: TerminalState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abandon_reason: Option<AbandonReason>,
    pub final_similarity: Option<SimilarityBreakdown>,
    /// Final composite minus the first attempt's composite
    pub similarity_improvement: Option<f64>,
    pub iteration_count: u32,
    pub stagnation_count: u32,
    pub duration_ms: u64,
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,
}

impl EvaluationResult {
    /// Result for a sample that died before its loop could report
    /// (panic, contract violation surfaced outside the loop).
    pub fn fatal(sample_id: &str, model: &str, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            sample_id: sample_id.to_string(),
            model: model.to_string(),
            attempts: Vec::new(),
            terminal: TerminalState::Abandoned,
            abandon_reason: Some(AbandonReason::Fatal {
                message: message.into(),
            }),
            final_similarity: None,
            similarity_improvement: None,
            iteration_count: 0,
            stagnation_count: 0,
            duration_ms,
            transitions: Vec::new(),
        }
    }

    pub fn converged(&self) -> bool {
        self.terminal == TerminalState::Converged
    }

    pub fn first_attempt_compiled(&self) -> bool {
        self.attempts.first().is_some_and(|a| a.compiled())
    }

    /// Categories present in any attempt.
    pub fn categories_seen(&self) -> BTreeSet<ErrorCategory> {
        self.attempts.iter().flat_map(|a| a.categories()).collect()
    }

    pub fn final_candidate(&self) -> Option<&str> {
        self.attempts.last().map(|a| a.candidate())
    }
}
