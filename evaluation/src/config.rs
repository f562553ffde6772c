//! Evaluation configuration (TOML).
//!
//! ```toml
//! [refinement]
//! max_iterations = 5
//! epsilon = 0.01
//! stagnation_limit = 2
//!
//! [composer]
//! max_categories = 5
//!
//! [similarity]
//! lexical = 0.25
//! keyword = 0.25
//! syntax_tree = 0.25
//! data_flow = 0.25
//! language = "cpp"
//!
//! [batch]
//! max_concurrent_samples = 4
//!
//! [aggregate]
//! resamples = 1000
//! confidence = 0.95
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateConfig;
use crate::batch::BatchConfig;
use crate::error::{EvalError, EvalResult};
use crate::feedback::ComposerConfig;
use crate::prompts::PromptTemplates;
use crate::refinement::RefinementConfig;
use crate::similarity::syntax_tree::DEFAULT_NODE_BUDGET;
use crate::similarity::{SimilarityScorer, SimilarityWeights, TargetLanguage};

/// `[similarity]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    #[serde(flatten)]
    pub weights: SimilarityWeights,
    pub language: TargetLanguage,
    /// Cap on syntax-tree skeleton size
    pub node_budget: usize,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            weights: SimilarityWeights::default(),
            language: TargetLanguage::default(),
            node_budget: DEFAULT_NODE_BUDGET,
        }
    }
}

impl SimilarityConfig {
    pub fn scorer(&self) -> EvalResult<SimilarityScorer> {
        Ok(SimilarityScorer::new(self.weights, self.language)?.with_node_budget(self.node_budget))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub refinement: RefinementConfig,
    pub composer: ComposerConfig,
    pub similarity: SimilarityConfig,
    pub batch: BatchConfig,
    pub aggregate: AggregateConfig,
    pub prompts: PromptTemplates,
}

impl EvaluationConfig {
    pub fn from_toml_str(text: &str) -> EvalResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> EvalResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check every invariant; the first violation is reported.
    pub fn validate(&self) -> EvalResult<()> {
        self.refinement.validate()?;
        self.composer.validate()?;
        self.similarity.weights.validate()?;
        if self.similarity.node_budget == 0 {
            return Err(EvalError::config("similarity.node_budget must be >= 1"));
        }
        self.batch.validate()?;
        self.aggregate.validate()?;
        // Prompts always target the scored language.
        if self.prompts.target_language != self.similarity.language {
            return Err(EvalError::config(format!(
                "prompts.target_language ({}) differs from similarity.language ({})",
                self.prompts.target_language, self.similarity.language
            )));
        }
        Ok(())
    }
}
