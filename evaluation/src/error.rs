//! Error taxonomy for the evaluation core.
//!
//! Only genuinely unexpected conditions are errors. "Did not converge" and
//! "stopped making progress" are terminal states of the refinement loop, not
//! variants here, but they still have a place in [`FailureKind`] so that
//! reports can talk about every failure mode with one vocabulary.
//!
//! | Kind                    | Raised? | Handling                              |
//! |-------------------------|---------|---------------------------------------|
//! | InfrastructuralFailure  | yes     | retried once, then recorded           |
//! | ClassificationGap       | no      | recorded as `Other`                   |
//! | ConfigurationError      | yes     | fails fast at construction            |
//! | StagnationAbandon       | no      | terminal state `Abandoned`            |
//! | BudgetExhausted         | no      | terminal state `ExhaustedIterations`  |

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure classification shared by errors, records and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Probe timeout, sandbox crash or generator transport failure.
    InfrastructuralFailure,
    /// Diagnostic text that no classifier rule recognised.
    ClassificationGap,
    /// Invalid weights, thresholds or budgets.
    ConfigurationError,
    /// Loop stopped because iterations no longer changed anything.
    StagnationAbandon,
    /// Loop ran out of iterations.
    BudgetExhausted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InfrastructuralFailure => write!(f, "infrastructural_failure"),
            Self::ClassificationGap => write!(f, "classification_gap"),
            Self::ConfigurationError => write!(f, "configuration_error"),
            Self::StagnationAbandon => write!(f, "stagnation_abandon"),
            Self::BudgetExhausted => write!(f, "budget_exhausted"),
        }
    }
}

/// Unified error type for the evaluation core.
#[derive(Debug, Error)]
pub enum EvalError {
    // ── Retriable ─────────────────────────────────────────────────────────
    /// Compilation probe could not produce a verdict (timeout, sandbox crash).
    #[error("Probe failure: {0}")]
    Probe(String),

    /// Generator request failed in transport (network, 5xx, rate limit).
    #[error("Generator failure: {0}")]
    Generator(String),

    // ── Non-retriable ─────────────────────────────────────────────────────
    /// Generator answered, but not with usable text.
    #[error("Generator contract violated: {0}")]
    GeneratorContract(String),

    /// Configuration invariant violated.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The sample's run was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Anything else (e.g. a panicked sample task).
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EvalError {
    /// Build a `Configuration` variant conveniently.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Map this error onto the failure taxonomy.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Probe(_) | Self::Generator(_) => FailureKind::InfrastructuralFailure,
            Self::Configuration(_) | Self::Toml(_) => FailureKind::ConfigurationError,
            Self::GeneratorContract(_)
            | Self::Cancelled(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Internal(_) => FailureKind::InfrastructuralFailure,
        }
    }

    /// Returns `true` if the caller may retry after this error.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Probe(_) | Self::Generator(_))
    }
}

/// Result type alias for evaluation operations.
pub type EvalResult<T> = Result<T, EvalError>;
