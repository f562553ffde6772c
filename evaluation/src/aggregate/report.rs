//! Aggregate report types and their Markdown rendering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::stats::ConfidenceInterval;
use crate::error::EvalResult;
use crate::feedback::ErrorCategory;
use crate::refinement::TerminalState;

/// Statistics for samples that hit one error category at least once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryStats {
    pub samples: usize,
    pub convergence_rate: f64,
    /// Final composite similarity, over samples that have one.
    pub final_similarity: Option<ConfidenceInterval>,
}

/// Per-generator summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub samples: usize,
    pub convergence_rate: f64,
    pub first_attempt_compile_rate: f64,
    pub mean_iterations_to_success: Option<f64>,
    pub mean_final_similarity: Option<f64>,
}

/// Cross-sample statistics for one batch of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub total_samples: usize,
    pub by_terminal: BTreeMap<TerminalState, usize>,
    /// Abandoned samples by reason (`stagnation`, `cancelled`, `fatal`).
    pub abandoned_by_reason: BTreeMap<String, usize>,
    pub convergence_rate: f64,
    pub first_attempt_compile_rate: f64,
    /// Over converged samples only.
    pub mean_iterations_to_success: Option<f64>,
    pub infrastructural_failures: usize,
    pub categories: BTreeMap<ErrorCategory, CategoryStats>,
    pub similarity_by_terminal: BTreeMap<TerminalState, ConfidenceInterval>,
    /// Final composite over every scored sample.
    pub overall_similarity: Option<ConfidenceInterval>,
    pub mean_similarity_improvement: Option<f64>,
    pub models: BTreeMap<String, ModelSummary>,
    pub resamples: usize,
    pub confidence: f64,
}

impl AggregateReport {
    pub fn terminal_count(&self, terminal: TerminalState) -> usize {
        self.by_terminal.get(&terminal).copied().unwrap_or(0)
    }

    pub fn to_json(&self) -> EvalResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("# Translation Evaluation Results\n\n");

        report.push_str("## Summary\n\n");
        report.push_str(&format!(
            "| Metric | Value |\n\
             |--------|-------|\n\
             | Samples | {} |\n\
             | Converged | {} |\n\
             | Exhausted Iterations | {} |\n\
             | Abandoned | {} |\n\
             | Infrastructural Failures | {} |\n\n",
            self.total_samples,
            self.terminal_count(TerminalState::Converged),
            self.terminal_count(TerminalState::ExhaustedIterations),
            self.terminal_count(TerminalState::Abandoned),
            self.infrastructural_failures,
        ));

        report.push_str("## Rates\n\n");
        report.push_str(&format!(
            "| Metric | Value |\n\
             |--------|-------|\n\
             | First-attempt compile | {:.1}% |\n\
             | Convergence | {:.1}% |\n\
             | Mean iterations to success | {} |\n\
             | Mean similarity improvement | {} |\n\n",
            self.first_attempt_compile_rate * 100.0,
            self.convergence_rate * 100.0,
            fmt_opt(self.mean_iterations_to_success, 2),
            fmt_signed(self.mean_similarity_improvement),
        ));

        if !self.abandoned_by_reason.is_empty() {
            report.push_str("## Abandon Reasons\n\n");
            report.push_str("| Reason | Samples |\n|--------|---------|\n");
            for (reason, count) in &self.abandoned_by_reason {
                report.push_str(&format!("| {} | {} |\n", reason, count));
            }
            report.push('\n');
        }

        let ci_pct = self.confidence * 100.0;
        report.push_str("## Similarity by Terminal State\n\n");
        report.push_str(&format!(
            "| Terminal | N | Mean | {ci_pct:.0}% CI |\n|----------|---|------|--------|\n"
        ));
        for (terminal, ci) in &self.similarity_by_terminal {
            report.push_str(&format!(
                "| {} | {} | {:.3} | [{:.3}, {:.3}] |\n",
                terminal, ci.n, ci.mean, ci.lower, ci.upper
            ));
        }
        if let Some(ci) = &self.overall_similarity {
            report.push_str(&format!(
                "| all | {} | {:.3} | [{:.3}, {:.3}] |\n",
                ci.n, ci.mean, ci.lower, ci.upper
            ));
        }
        report.push('\n');

        if !self.categories.is_empty() {
            report.push_str("## Error Categories\n\n");
            report.push_str(&format!(
                "| Category | Samples | Converged | Final Similarity | {ci_pct:.0}% CI |\n\
                 |----------|---------|-----------|------------------|--------|\n"
            ));
            for (category, stats) in &self.categories {
                let (mean, ci) = match &stats.final_similarity {
                    Some(ci) => (
                        format!("{:.3}", ci.mean),
                        format!("[{:.3}, {:.3}]", ci.lower, ci.upper),
                    ),
                    None => ("-".to_string(), "-".to_string()),
                };
                report.push_str(&format!(
                    "| {} | {} | {:.1}% | {} | {} |\n",
                    category,
                    stats.samples,
                    stats.convergence_rate * 100.0,
                    mean,
                    ci
                ));
            }
            report.push('\n');
        }

        if self.models.len() > 1 {
            report.push_str("## Models\n\n");
            report.push_str(
                "| Model | Samples | First Compile | Converged | Mean Iterations | Mean Similarity |\n\
                 |-------|---------|---------------|-----------|-----------------|-----------------|\n",
            );
            for (model, summary) in &self.models {
                report.push_str(&format!(
                    "| {} | {} | {:.1}% | {:.1}% | {} | {} |\n",
                    model,
                    summary.samples,
                    summary.first_attempt_compile_rate * 100.0,
                    summary.convergence_rate * 100.0,
                    fmt_opt(summary.mean_iterations_to_success, 2),
                    fmt_opt(summary.mean_final_similarity, 3),
                ));
            }
            report.push('\n');
        }

        report.push_str(&format!(
            "_Bootstrap: {} resamples, {:.0}% confidence._\n",
            self.resamples, ci_pct
        ));
        report
    }
}

/// Differences between two reports (candidate minus baseline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDelta {
    pub baseline: AggregateReport,
    pub candidate: AggregateReport,
    /// Positive = improvement.
    pub convergence_rate_delta: f64,
    /// Positive = improvement.
    pub first_attempt_compile_delta: f64,
    /// Negative = improvement.
    pub iterations_delta: Option<f64>,
    /// Positive = improvement.
    pub similarity_delta: Option<f64>,
    pub improvement_delta: Option<f64>,
    /// Candidate CI lies entirely above or below the baseline CI.
    pub similarity_significant: bool,
}

impl AggregateDelta {
    pub fn to_json(&self) -> EvalResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn format_comparison(delta: &AggregateDelta) -> String {
    let mut report = String::new();
    let (b, c) = (&delta.baseline, &delta.candidate);

    report.push_str("# Evaluation Comparison\n\n");
    report.push_str("| Metric | Baseline | Candidate | Delta |\n");
    report.push_str("|--------|----------|-----------|-------|\n");
    report.push_str(&format!(
        "| Samples | {} | {} | |\n",
        b.total_samples, c.total_samples
    ));
    report.push_str(&format!(
        "| First-attempt compile | {:.1}% | {:.1}% | {:+.1}% |\n",
        b.first_attempt_compile_rate * 100.0,
        c.first_attempt_compile_rate * 100.0,
        delta.first_attempt_compile_delta * 100.0,
    ));
    report.push_str(&format!(
        "| Convergence | {:.1}% | {:.1}% | {:+.1}% |\n",
        b.convergence_rate * 100.0,
        c.convergence_rate * 100.0,
        delta.convergence_rate_delta * 100.0,
    ));
    report.push_str(&format!(
        "| Mean iterations to success | {} | {} | {} |\n",
        fmt_opt(b.mean_iterations_to_success, 2),
        fmt_opt(c.mean_iterations_to_success, 2),
        fmt_signed(delta.iterations_delta),
    ));
    report.push_str(&format!(
        "| Final similarity | {} | {} | {} |\n",
        fmt_opt(b.overall_similarity.map(|ci| ci.mean), 3),
        fmt_opt(c.overall_similarity.map(|ci| ci.mean), 3),
        fmt_signed(delta.similarity_delta),
    ));
    report.push_str(&format!(
        "| Similarity improvement | {} | {} | {} |\n\n",
        fmt_signed(b.mean_similarity_improvement),
        fmt_signed(c.mean_similarity_improvement),
        fmt_signed(delta.improvement_delta),
    ));

    if delta.similarity_significant {
        report.push_str("Similarity confidence intervals do not overlap.\n");
    } else {
        report.push_str("Similarity confidence intervals overlap.\n");
    }
    report
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}

fn fmt_signed(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:+.3}"))
}
