//! Translation evaluation library
//!
//! This library provides:
//! - A compiler-feedback refinement loop that drives a generator and a
//!   compilation probe until a candidate compiles, the iteration budget runs
//!   out, or progress stalls
//! - A compiler-diagnostic taxonomy and a composer that turns classified
//!   errors into corrective prompts
//! - A four-component structural similarity scorer (lexical, keyword,
//!   syntax tree, data flow)
//! - Concurrent batch evaluation with a shared rate limiter and sandbox pool
//! - Cross-sample aggregation with bootstrap confidence intervals
//!
//! # Usage
//!
//! ```ignore
//! let config = EvaluationConfig::load(Path::new("eval.toml"))?;
//! let runner = BatchRunner::new(generator, probe, &config)?;
//! let results = runner.run(samples, &CancellationToken::new()).await;
//! let report = ResultAggregator::new(config.aggregate.clone())?.aggregate(&results);
//! println!("{}", report.format_report());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod error;
pub mod feedback;
pub mod generator;
pub mod probe;
pub mod prompts;
pub mod refinement;
pub mod retry;
pub mod similarity;

pub use aggregate::{AggregateConfig, AggregateDelta, AggregateReport, ResultAggregator};
pub use batch::{BatchConfig, BatchRunner, RateLimiter};
pub use config::{EvaluationConfig, SimilarityConfig};
pub use error::{EvalError, EvalResult, FailureKind};
pub use feedback::{ErrorCategory, ErrorClassifier, ErrorRecord, FeedbackComposer};
pub use generator::{GenerationKind, GenerationRequest, Generator};
pub use probe::{CompilationProbe, ProbeOutcome};
pub use prompts::PromptTemplates;
pub use refinement::{
    AbandonReason, EvaluationResult, RefinementConfig, RefinementLoop, Sample, TerminalState,
    TranslationAttempt,
};
pub use retry::RetryPolicy;
pub use similarity::{SimilarityBreakdown, SimilarityScorer, SimilarityWeights, TargetLanguage};
