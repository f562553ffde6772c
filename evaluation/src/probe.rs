//! Compilation probe seam.

use crate::error::EvalResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Verdict of one compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub success: bool,
    /// Compiler stderr (and stdout, if any). Empty on a clean success.
    pub diagnostics: String,
    pub exit_status: Option<i32>,
}

impl ProbeOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            diagnostics: String::new(),
            exit_status: Some(0),
        }
    }

    pub fn failure(diagnostics: impl Into<String>, exit_status: Option<i32>) -> Self {
        Self {
            success: false,
            diagnostics: diagnostics.into(),
            exit_status,
        }
    }
}

/// Submits a candidate to a compiler.
///
/// A nonzero exit is `Ok` with `success == false`. `Err` is reserved for
/// infrastructural failures where no verdict exists (timeout, sandbox crash).
#[async_trait]
pub trait CompilationProbe: Send + Sync {
    async fn compile(&self, candidate: &str) -> EvalResult<ProbeOutcome>;
}

#[async_trait]
impl<P: CompilationProbe + ?Sized> CompilationProbe for Arc<P> {
    async fn compile(&self, candidate: &str) -> EvalResult<ProbeOutcome> {
        (**self).compile(candidate).await
    }
}
