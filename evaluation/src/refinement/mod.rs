//! Iterative compiler-feedback refinement.

pub mod attempt;
pub mod engine;
pub mod state;

pub use attempt::{EvaluationResult, TranslationAttempt};
pub use engine::{RefinementConfig, RefinementLoop, Sample};
pub use state::{AbandonReason, RefinementState, StateMachine, TerminalState, TransitionRecord};
