//! Compiler feedback: diagnostic classification and corrective composition.

pub mod classifier;
pub mod composer;

pub use classifier::{ErrorCategory, ErrorClassifier, ErrorRecord, ErrorSummary};
pub use composer::{ComposerConfig, CorrectiveContext, FeedbackComposer};
