//! Text generator seam.
//!
//! The refinement loop only ever sees this trait. Backends (HTTP endpoints,
//! local models, scripted fakes) are adapters living outside the core.

use crate::error::{EvalError, EvalResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why the generator is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    /// First translation of the source
    Initial,
    /// Repair of a previous candidate from compiler feedback
    Corrective,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub sample_id: String,
    pub iteration: u32,
    pub kind: GenerationKind,
    pub prompt: String,
}

/// Produces candidate text from a prompt.
///
/// Implementations must be safe to call again with the same request: the
/// loop retries transient failures.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Model or backend name, recorded on results.
    fn name(&self) -> &str;

    /// `Err(Generator)` for transport failures (retried);
    /// `Err(GeneratorContract)` when the backend answered with nothing usable.
    async fn generate(&self, request: &GenerationRequest) -> EvalResult<String>;
}

#[async_trait]
impl<G: Generator + ?Sized> Generator for Arc<G> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn generate(&self, request: &GenerationRequest) -> EvalResult<String> {
        (**self).generate(request).await
    }
}

/// Reject empty or whitespace-only output.
pub fn check_output(text: String) -> EvalResult<String> {
    if text.trim().is_empty() {
        return Err(EvalError::GeneratorContract(
            "generator returned empty text".to_string(),
        ));
    }
    Ok(text)
}
