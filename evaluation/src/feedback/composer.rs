//! Corrective feedback composition
//!
//! Picks which classified errors go back to the generator and in what order.
//! Output is a [`CorrectiveContext`]; rendering it into prompt text is
//! [`CorrectiveContext::render`].

use super::classifier::{ErrorCategory, ErrorRecord};
use crate::error::{EvalError, EvalResult};
use crate::prompts::PromptTemplates;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Composer settings (`[composer]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComposerConfig {
    /// Distinct categories surfaced per round
    pub max_categories: usize,
    /// Iteration after which a repeated category set asks for a new approach
    pub plateau_threshold: u32,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            max_categories: 5,
            plateau_threshold: 2,
        }
    }
}

impl ComposerConfig {
    pub fn validate(&self) -> EvalResult<()> {
        if self.max_categories == 0 {
            return Err(EvalError::config("composer.max_categories must be >= 1"));
        }
        Ok(())
    }
}

/// Everything the generator needs to attempt a correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectiveContext {
    records: Vec<ErrorRecord>,
    total_errors: usize,
    previous_candidate: String,
    original_source: String,
    iteration: u32,
    request_alternative: bool,
}

impl CorrectiveContext {
    /// Prioritised records, at most one per category
    pub fn records(&self) -> &[ErrorRecord] {
        &self.records
    }

    /// Number of errors before prioritisation
    pub fn total_errors(&self) -> usize {
        self.total_errors
    }

    pub fn previous_candidate(&self) -> &str {
        &self.previous_candidate
    }

    pub fn original_source(&self) -> &str {
        &self.original_source
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn request_alternative(&self) -> bool {
        self.request_alternative
    }

    /// Categories of the prioritised records
    pub fn categories(&self) -> BTreeSet<ErrorCategory> {
        self.records.iter().map(|r| r.category).collect()
    }

    /// Render the corrective prompt
    pub fn render(&self, templates: &PromptTemplates) -> String {
        templates.corrective(self)
    }
}

/// Builds [`CorrectiveContext`]s. Pure and deterministic.
#[derive(Debug, Clone, Default)]
pub struct FeedbackComposer {
    config: ComposerConfig,
}

impl FeedbackComposer {
    pub fn new(config: ComposerConfig) -> EvalResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    /// Compose the corrective context for one refinement round.
    ///
    /// Records are stably sorted by severity (ties keep source order) and the
    /// first record of each category is kept, up to `max_categories`.
    pub fn compose(
        &self,
        original_source: &str,
        previous_candidate: &str,
        errors: &[ErrorRecord],
        iteration: u32,
        previous_categories: Option<&BTreeSet<ErrorCategory>>,
    ) -> CorrectiveContext {
        let mut ordered: Vec<&ErrorRecord> = errors.iter().collect();
        ordered.sort_by(|a, b| b.severity.total_cmp(&a.severity));

        let mut seen = BTreeSet::new();
        let records: Vec<ErrorRecord> = ordered
            .into_iter()
            .filter(|r| seen.insert(r.category))
            .take(self.config.max_categories)
            .cloned()
            .collect();

        let current: BTreeSet<ErrorCategory> = errors.iter().map(|r| r.category).collect();
        let request_alternative = iteration > self.config.plateau_threshold
            && previous_categories.is_some_and(|prev| *prev == current);

        CorrectiveContext {
            records,
            total_errors: errors.len(),
            previous_candidate: previous_candidate.to_string(),
            original_source: original_source.to_string(),
            iteration,
            request_alternative,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::classifier::ErrorClassifier;

    fn record(category: ErrorCategory, message: &str) -> ErrorRecord {
        ErrorRecord {
            category,
            message: message.to_string(),
            identifier: None,
            severity: category.severity(),
            line: 0,
            context: Vec::new(),
        }
    }

    #[test]
    fn test_prioritised_by_severity_one_per_category() {
        let errors = vec![
            record(ErrorCategory::MemoryManagement, "m1"),
            record(ErrorCategory::TypeMismatch, "t1"),
            record(ErrorCategory::Syntax, "s1"),
            record(ErrorCategory::TypeMismatch, "t2"),
            record(ErrorCategory::UndeclaredIdentifier, "u1"),
        ];
        let ctx = FeedbackComposer::default().compose("src", "prev", &errors, 1, None);
        let messages: Vec<&str> = ctx.records().iter().map(|r| r.message.as_str()).collect();
        // Syntax and UndeclaredIdentifier tie at 1.0 and keep source order.
        assert_eq!(messages, vec!["s1", "u1", "t1", "m1"]);
        assert_eq!(ctx.total_errors(), 5);
    }

    #[test]
    fn test_max_categories_limits_records() {
        let composer = FeedbackComposer::new(ComposerConfig {
            max_categories: 2,
            ..Default::default()
        })
        .unwrap();
        let errors = vec![
            record(ErrorCategory::Other, "o"),
            record(ErrorCategory::LibraryMapping, "l"),
            record(ErrorCategory::Syntax, "s"),
        ];
        let ctx = composer.compose("src", "prev", &errors, 1, None);
        assert_eq!(ctx.records().len(), 2);
        assert_eq!(ctx.records()[0].category, ErrorCategory::Syntax);
        assert_eq!(ctx.records()[1].category, ErrorCategory::LibraryMapping);
    }

    #[test]
    fn test_zero_max_categories_rejected() {
        let err = FeedbackComposer::new(ComposerConfig {
            max_categories: 0,
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, EvalError::Configuration(_)));
    }

    #[test]
    fn test_request_alternative_after_plateau() {
        let composer = FeedbackComposer::default();
        let errors = vec![record(ErrorCategory::TypeMismatch, "t")];
        let prev: BTreeSet<_> = [ErrorCategory::TypeMismatch].into_iter().collect();

        assert!(!composer.compose("s", "p", &errors, 2, Some(&prev)).request_alternative());
        assert!(composer.compose("s", "p", &errors, 3, Some(&prev)).request_alternative());

        let other: BTreeSet<_> = [ErrorCategory::Syntax].into_iter().collect();
        assert!(!composer.compose("s", "p", &errors, 3, Some(&other)).request_alternative());
        assert!(!composer.compose("s", "p", &errors, 3, None).request_alternative());
    }

    #[test]
    fn test_inputs_not_mutated() {
        let errors = vec![
            record(ErrorCategory::Other, "o"),
            record(ErrorCategory::Syntax, "s"),
        ];
        let before = errors.clone();
        let _ = FeedbackComposer::default().compose("src", "prev", &errors, 1, None);
        assert_eq!(errors, before);
    }

    #[test]
    fn test_internal_compiler_error_rendered_verbatim() {
        let records = ErrorClassifier::default().classify("internal compiler error: segmentation fault");
        let ctx = FeedbackComposer::default().compose("program p\nend", "int main(){}", &records, 1, None);
        let prompt = ctx.render(&PromptTemplates::default());
        assert!(prompt.contains("internal compiler error: segmentation fault"));
        assert!(prompt.contains("```cpp\nint main(){}\n```"));
        assert!(prompt.contains("```fortran\nprogram p\nend\n```"));
    }

    #[test]
    fn test_render_adds_category_hints() {
        let errors = vec![
            record(ErrorCategory::MemoryManagement, "use of deleted function"),
            record(ErrorCategory::TypeMismatch, "invalid conversion"),
        ];
        let prompt = FeedbackComposer::default()
            .compose("src", "prev", &errors, 1, None)
            .render(&PromptTemplates::default());
        assert!(prompt.contains("0-based indexing"));
        assert!(prompt.contains("memory management"));
    }
}
