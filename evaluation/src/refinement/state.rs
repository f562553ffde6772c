//! Refinement state machine: explicit states and legal transition guards.
//!
//! ```text
//! Init     → Probing
//! Probing  → Converged | Refining
//! Refining → Probing | ExhaustedIterations | Abandoned
//! any non-terminal → Abandoned   (cancellation, fatal generator errors)
//! ```
//!
//! Every transition is validated, logged and recorded so a sample's path can
//! be replayed from its result.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementState {
    /// Obtaining the initial candidate.
    Init,
    /// Waiting on the compilation probe.
    Probing,
    /// Deciding whether and how to ask for a correction.
    Refining,
    /// Candidate compiled. Terminal.
    Converged,
    /// Iteration budget spent. Terminal.
    ExhaustedIterations,
    /// Stopped early. Terminal.
    Abandoned,
}

impl RefinementState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Converged | Self::ExhaustedIterations | Self::Abandoned
        )
    }

    pub fn terminal(self) -> Option<TerminalState> {
        match self {
            Self::Converged => Some(TerminalState::Converged),
            Self::ExhaustedIterations => Some(TerminalState::ExhaustedIterations),
            Self::Abandoned => Some(TerminalState::Abandoned),
            _ => None,
        }
    }
}

impl fmt::Display for RefinementState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Probing => write!(f, "Probing"),
            Self::Refining => write!(f, "Refining"),
            Self::Converged => write!(f, "Converged"),
            Self::ExhaustedIterations => write!(f, "ExhaustedIterations"),
            Self::Abandoned => write!(f, "Abandoned"),
        }
    }
}

/// How a sample's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalState {
    Converged,
    ExhaustedIterations,
    Abandoned,
}

impl TerminalState {
    pub fn all() -> [TerminalState; 3] {
        [Self::Converged, Self::ExhaustedIterations, Self::Abandoned]
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::ExhaustedIterations => write!(f, "exhausted_iterations"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}

/// Why an `Abandoned` sample stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbandonReason {
    /// Consecutive iterations stopped changing anything.
    Stagnation,
    /// The run was cancelled or its wall-clock budget ran out.
    Cancelled,
    /// Unrecoverable error for this sample only.
    Fatal { message: String },
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stagnation => write!(f, "stagnation"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Fatal { message } => write!(f, "fatal: {message}"),
        }
    }
}

fn is_legal_transition(from: RefinementState, to: RefinementState) -> bool {
    use RefinementState::*;

    if to == Abandoned && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Init, Probing)
            | (Probing, Converged)
            | (Probing, Refining)
            | (Refining, Probing)
            | (Refining, ExhaustedIterations)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RefinementState,
    pub to: RefinementState,
    pub iteration: u32,
    /// Milliseconds since the machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RefinementState,
    pub to: RefinementState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} → {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Per-sample state machine with a complete transition log.
#[derive(Debug)]
pub struct StateMachine {
    sample_id: String,
    current: RefinementState,
    iteration: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new(sample_id: impl Into<String>) -> Self {
        Self {
            sample_id: sample_id.into(),
            current: RefinementState::Init,
            iteration: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RefinementState {
        self.current
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: u32) {
        self.iteration = iteration;
    }

    pub fn advance(
        &mut self,
        to: RefinementState,
        reason: Option<&str>,
    ) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            iteration: self.iteration,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        if to.is_terminal() {
            tracing::info!(
                sample_id = %self.sample_id,
                from = %self.current,
                state = %to,
                iteration = self.iteration,
                reason = reason.unwrap_or(""),
                "Terminal state reached"
            );
        } else {
            tracing::info!(
                sample_id = %self.sample_id,
                from = %self.current,
                state = %to,
                iteration = self.iteration,
                "State transition"
            );
        }

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Move to `Abandoned`; legal from any non-terminal state.
    pub fn abandon(&mut self, reason: &AbandonReason) -> Result<(), IllegalTransition> {
        self.advance(RefinementState::Abandoned, Some(&reason.to_string()))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }

    pub fn summary(&self) -> String {
        let path: Vec<String> = std::iter::once(RefinementState::Init.to_string())
            .chain(self.transitions.iter().map(|t| t.to.to_string()))
            .collect();
        format!(
            "{} ({}ms, {} transitions)",
            path.join(" → "),
            self.created_at.elapsed().as_millis(),
            self.transitions.len()
        )
    }
}
