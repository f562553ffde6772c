//! Cross-sample statistics over finished [`EvaluationResult`]s.
//!
//! Aggregation is a pure function of the multiset of results: every grouping
//! uses ordered maps and every bootstrap sorts its values first, so arrival
//! order never changes the report.

pub mod report;
pub mod stats;

pub use report::{format_comparison, AggregateDelta, AggregateReport, CategoryStats, ModelSummary};
pub use stats::ConfidenceInterval;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EvalError, EvalResult};
use crate::feedback::ErrorCategory;
use crate::refinement::{AbandonReason, EvaluationResult, TerminalState};
use stats::{bootstrap_ci, mean, rate};

/// `[aggregate]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Bootstrap resamples per interval.
    pub resamples: usize,
    /// Two-sided confidence level, strictly between 0 and 1.
    pub confidence: f64,
    pub seed: u64,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            resamples: 1000,
            confidence: 0.95,
            seed: 0x5EED,
        }
    }
}

impl AggregateConfig {
    pub fn validate(&self) -> EvalResult<()> {
        if self.resamples == 0 {
            return Err(EvalError::config("aggregate.resamples must be >= 1"));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(EvalError::config(format!(
                "aggregate.confidence must be in (0,1), got {}",
                self.confidence
            )));
        }
        Ok(())
    }
}

pub struct ResultAggregator {
    config: AggregateConfig,
}

impl Default for ResultAggregator {
    fn default() -> Self {
        Self {
            config: AggregateConfig::default(),
        }
    }
}

impl ResultAggregator {
    pub fn new(config: AggregateConfig) -> EvalResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn interval(&self, values: &[f64]) -> Option<ConfidenceInterval> {
        bootstrap_ci(
            values,
            self.config.resamples,
            self.config.confidence,
            self.config.seed,
        )
    }

    pub fn aggregate(&self, results: &[EvaluationResult]) -> AggregateReport {
        let total = results.len();

        let mut by_terminal: BTreeMap<TerminalState, usize> = BTreeMap::new();
        let mut abandoned_by_reason: BTreeMap<String, usize> = BTreeMap::new();
        let mut similarity_values: BTreeMap<TerminalState, Vec<f64>> = BTreeMap::new();
        let mut category_members: BTreeMap<ErrorCategory, Vec<&EvaluationResult>> = BTreeMap::new();
        let mut model_members: BTreeMap<&str, Vec<&EvaluationResult>> = BTreeMap::new();
        let mut infrastructural_failures = 0;

        for result in results {
            *by_terminal.entry(result.terminal).or_default() += 1;
            if let Some(reason) = &result.abandon_reason {
                *abandoned_by_reason.entry(reason_key(reason).to_string()).or_default() += 1;
            }
            if let Some(sim) = &result.final_similarity {
                similarity_values
                    .entry(result.terminal)
                    .or_default()
                    .push(sim.composite);
            }
            for category in result.categories_seen() {
                category_members.entry(category).or_default().push(result);
            }
            model_members.entry(result.model.as_str()).or_default().push(result);
            infrastructural_failures += result
                .attempts
                .iter()
                .filter(|a| a.infrastructural_failure())
                .count();
        }

        let categories = category_members
            .into_iter()
            .map(|(category, members)| {
                let stats = CategoryStats {
                    samples: members.len(),
                    convergence_rate: rate(members.iter().filter(|r| r.converged()).count(), members.len()),
                    final_similarity: self.interval(&final_composites(&members)),
                };
                (category, stats)
            })
            .collect();

        let similarity_by_terminal = similarity_values
            .iter()
            .filter_map(|(terminal, values)| Some((*terminal, self.interval(values)?)))
            .collect();

        let all: Vec<&EvaluationResult> = results.iter().collect();
        let models = model_members
            .into_iter()
            .map(|(model, members)| (model.to_string(), summarize(&members)))
            .collect();

        let overall = summarize(&all);
        AggregateReport {
            total_samples: total,
            by_terminal,
            abandoned_by_reason,
            convergence_rate: overall.convergence_rate,
            first_attempt_compile_rate: overall.first_attempt_compile_rate,
            mean_iterations_to_success: overall.mean_iterations_to_success,
            infrastructural_failures,
            categories,
            similarity_by_terminal,
            overall_similarity: self.interval(&final_composites(&all)),
            mean_similarity_improvement: mean(&sorted(
                results.iter().filter_map(|r| r.similarity_improvement),
            )),
            models,
            resamples: self.config.resamples,
            confidence: self.config.confidence,
        }
    }

    /// Aggregate both sides and diff them.
    pub fn compare(&self, baseline: &[EvaluationResult], candidate: &[EvaluationResult]) -> AggregateDelta {
        compare(self.aggregate(baseline), self.aggregate(candidate))
    }
}

/// Diff two finished reports (candidate minus baseline).
pub fn compare(baseline: AggregateReport, candidate: AggregateReport) -> AggregateDelta {
    let diff = |a: Option<f64>, b: Option<f64>| Some(b? - a?);
    let base_sim = baseline.overall_similarity;
    let cand_sim = candidate.overall_similarity;
    let similarity_significant = match (base_sim, cand_sim) {
        (Some(b), Some(c)) => c.lower > b.upper || c.upper < b.lower,
        _ => false,
    };

    AggregateDelta {
        convergence_rate_delta: candidate.convergence_rate - baseline.convergence_rate,
        first_attempt_compile_delta: candidate.first_attempt_compile_rate
            - baseline.first_attempt_compile_rate,
        iterations_delta: diff(
            baseline.mean_iterations_to_success,
            candidate.mean_iterations_to_success,
        ),
        similarity_delta: diff(base_sim.map(|ci| ci.mean), cand_sim.map(|ci| ci.mean)),
        improvement_delta: diff(
            baseline.mean_similarity_improvement,
            candidate.mean_similarity_improvement,
        ),
        similarity_significant,
        baseline,
        candidate,
    }
}

fn summarize(members: &[&EvaluationResult]) -> ModelSummary {
    let n = members.len();
    let iterations = sorted(
        members
            .iter()
            .filter(|r| r.converged())
            .map(|r| f64::from(r.iteration_count)),
    );
    ModelSummary {
        samples: n,
        convergence_rate: rate(members.iter().filter(|r| r.converged()).count(), n),
        first_attempt_compile_rate: rate(
            members.iter().filter(|r| r.first_attempt_compiled()).count(),
            n,
        ),
        mean_iterations_to_success: mean(&iterations),
        mean_final_similarity: mean(&final_composites(members)),
    }
}

/// Sorted final composites of the scored members.
fn final_composites(members: &[&EvaluationResult]) -> Vec<f64> {
    sorted(
        members
            .iter()
            .filter_map(|r| r.final_similarity.as_ref().map(|s| s.composite)),
    )
}

// Float sums depend on order; sorting keeps means bit-identical across
// permutations of the input.
fn sorted(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut values: Vec<f64> = values.collect();
    values.sort_by(f64::total_cmp);
    values
}

fn reason_key(reason: &AbandonReason) -> &'static str {
    match reason {
        AbandonReason::Stagnation => "stagnation",
        AbandonReason::Cancelled => "cancelled",
        AbandonReason::Fatal { .. } => "fatal",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::SimilarityBreakdown;

    fn result(id: &str, model: &str, terminal: TerminalState, composite: Option<f64>, iterations: u32) -> EvaluationResult {
        let mut r = EvaluationResult::fatal(id, model, "x", 0);
        r.terminal = terminal;
        r.abandon_reason = (terminal == TerminalState::Abandoned).then_some(AbandonReason::Stagnation);
        r.final_similarity = composite.map(|c| SimilarityBreakdown {
            composite: c,
            ..Default::default()
        });
        r.iteration_count = iterations;
        r
    }

    #[test]
    fn test_config_validation() {
        assert!(AggregateConfig::default().validate().is_ok());
        for bad in [
            AggregateConfig { resamples: 0, ..Default::default() },
            AggregateConfig { confidence: 1.0, ..Default::default() },
            AggregateConfig { confidence: f64::NAN, ..Default::default() },
        ] {
            assert!(ResultAggregator::new(bad).is_err());
        }
    }

    #[test]
    fn test_empty_input() {
        let report = ResultAggregator::default().aggregate(&[]);
        assert_eq!(report.total_samples, 0);
        assert_eq!(report.convergence_rate, 0.0);
        assert!(report.mean_iterations_to_success.is_none());
        assert!(report.overall_similarity.is_none());
        assert!(report.format_report().contains("| Samples | 0 |"));
    }

    #[test]
    fn test_counts_and_rates() {
        let results = vec![
            result("a", "m", TerminalState::Converged, Some(0.9), 0),
            result("b", "m", TerminalState::Converged, Some(0.7), 2),
            result("c", "m", TerminalState::ExhaustedIterations, Some(0.4), 5),
            result("d", "m", TerminalState::Abandoned, None, 3),
        ];
        let report = ResultAggregator::default().aggregate(&results);

        assert_eq!(report.total_samples, 4);
        assert_eq!(report.terminal_count(TerminalState::Converged), 2);
        assert_eq!(report.convergence_rate, 0.5);
        assert_eq!(report.mean_iterations_to_success, Some(1.0));
        assert_eq!(report.abandoned_by_reason.get("stagnation"), Some(&1));
        assert!(!report.similarity_by_terminal.contains_key(&TerminalState::Abandoned));
        let converged = report.similarity_by_terminal[&TerminalState::Converged];
        assert_eq!(converged.n, 2);
        assert!((converged.mean - 0.8).abs() < 1e-12);
        assert_eq!(report.overall_similarity.map(|ci| ci.n), Some(3));
    }

    #[test]
    fn test_compare_reports_deltas() {
        let agg = ResultAggregator::default();
        let baseline = vec![
            result("a", "old", TerminalState::ExhaustedIterations, Some(0.2), 5),
            result("b", "old", TerminalState::Converged, Some(0.3), 4),
        ];
        let candidate = vec![
            result("a", "new", TerminalState::Converged, Some(0.9), 1),
            result("b", "new", TerminalState::Converged, Some(0.95), 1),
        ];
        let delta = agg.compare(&baseline, &candidate);
        assert!((delta.convergence_rate_delta - 0.5).abs() < 1e-12);
        assert_eq!(delta.iterations_delta, Some(-3.0));
        assert!(delta.similarity_delta.unwrap() > 0.6);
        assert!(delta.similarity_significant);
        let table = format_comparison(&delta);
        assert!(table.contains("| Convergence | 50.0% | 100.0% | +50.0% |"));
    }

    #[test]
    fn test_report_json_roundtrip() {
        let results = vec![result("a", "m", TerminalState::Converged, Some(1.0), 0)];
        let report = ResultAggregator::default().aggregate(&results);
        let json = report.to_json().unwrap();
        let parsed: AggregateReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, report);
    }
}
