//! Structural similarity between a reference and a candidate translation.
//!
//! Four independently computed components, each in [0,1]:
//!
//! | Component     | Module          | Measures                                  |
//! |---------------|-----------------|-------------------------------------------|
//! | `lexical`     | [`lexical`]     | clipped n-gram precision (n = 1..=4)      |
//! | `keyword`     | [`keyword`]     | cross-language constructs + identifiers   |
//! | `syntax_tree` | [`syntax_tree`] | tree edit distance over node skeletons    |
//! | `data_flow`   | [`data_flow`]   | statement graph edge overlap              |
//!
//! The composite is their weighted sum. Scoring never fails: missing or
//! unparsable input degrades components to 0 instead.

pub mod data_flow;
pub mod keyword;
pub mod language;
pub mod lexical;
pub mod syntax_tree;
pub mod tokenize;

pub use language::TargetLanguage;

use crate::error::{EvalError, EvalResult};
use data_flow::DataFlowGraph;
use serde::{Deserialize, Serialize};
use syntax_tree::Skeleton;
use tracing::debug;

/// Allowed deviation of the weight sum from 1.0.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Component weights. Each in [0,1]; together they sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityWeights {
    pub lexical: f64,
    pub keyword: f64,
    pub syntax_tree: f64,
    pub data_flow: f64,
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self {
            lexical: 0.25,
            keyword: 0.25,
            syntax_tree: 0.25,
            data_flow: 0.25,
        }
    }
}

impl SimilarityWeights {
    pub fn new(lexical: f64, keyword: f64, syntax_tree: f64, data_flow: f64) -> EvalResult<Self> {
        let weights = Self {
            lexical,
            keyword,
            syntax_tree,
            data_flow,
        };
        weights.validate()?;
        Ok(weights)
    }

    pub fn sum(&self) -> f64 {
        self.lexical + self.keyword + self.syntax_tree + self.data_flow
    }

    pub fn validate(&self) -> EvalResult<()> {
        for (name, w) in [
            ("lexical", self.lexical),
            ("keyword", self.keyword),
            ("syntax_tree", self.syntax_tree),
            ("data_flow", self.data_flow),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(EvalError::config(format!(
                    "similarity weight `{name}` must be in [0,1], got {w}"
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(EvalError::config(format!(
                "similarity weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Per-component scores plus the weighted composite, all in [0,1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    pub lexical: f64,
    pub keyword: f64,
    pub syntax_tree: f64,
    pub data_flow: f64,
    pub composite: f64,
}

impl SimilarityBreakdown {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Structures derived from one parsed text.
struct Structure {
    skeleton: Skeleton,
    flow: DataFlowGraph,
}

/// Weighted four-component similarity scorer.
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    weights: SimilarityWeights,
    language: TargetLanguage,
    node_budget: usize,
}

impl Default for SimilarityScorer {
    fn default() -> Self {
        Self {
            weights: SimilarityWeights::default(),
            language: TargetLanguage::default(),
            node_budget: syntax_tree::DEFAULT_NODE_BUDGET,
        }
    }
}

impl SimilarityScorer {
    /// Fails with `Configuration` when the weights are out of range or do not
    /// sum to 1.
    pub fn new(weights: SimilarityWeights, language: TargetLanguage) -> EvalResult<Self> {
        weights.validate()?;
        Ok(Self {
            weights,
            language,
            ..Self::default()
        })
    }

    pub fn with_node_budget(mut self, budget: usize) -> Self {
        self.node_budget = budget.max(1);
        self
    }

    pub fn weights(&self) -> &SimilarityWeights {
        &self.weights
    }

    pub fn language(&self) -> TargetLanguage {
        self.language
    }

    fn structure(&self, source: &str) -> Option<Structure> {
        let tree = self.language.parse(source)?;
        Some(Structure {
            skeleton: Skeleton::from_tree(&tree, self.node_budget)?,
            flow: DataFlowGraph::from_tree(&tree, source)?,
        })
    }

    /// Score `candidate` against `reference`.
    ///
    /// Not symmetric: the lexical and keyword components are precisions
    /// relative to the candidate.
    pub fn score(&self, reference: &str, candidate: &str) -> SimilarityBreakdown {
        if candidate.trim().is_empty() {
            return SimilarityBreakdown::zero();
        }

        let ref_tokens = tokenize::tokenize(reference);
        let cand_tokens = tokenize::tokenize(candidate);
        let lexical = lexical::score(&ref_tokens, &cand_tokens);
        let keyword = if cand_tokens.is_empty() {
            0.0
        } else {
            keyword::score(&ref_tokens, &cand_tokens)
        };

        let (syntax_tree, data_flow) = match (self.structure(reference), self.structure(candidate))
        {
            (Some(r), Some(c)) => (
                syntax_tree::similarity(&r.skeleton, &c.skeleton),
                data_flow::similarity(&r.flow, &c.flow),
            ),
            (_, None) => {
                debug!(language = %self.language, "candidate unparsable; structural components zeroed");
                (0.0, 0.0)
            }
            (None, _) => {
                debug!(language = %self.language, "reference unparsable; structural components zeroed");
                (0.0, 0.0)
            }
        };

        let w = &self.weights;
        let composite = (w.lexical * lexical
            + w.keyword * keyword
            + w.syntax_tree * syntax_tree
            + w.data_flow * data_flow)
            .clamp(0.0, 1.0);

        debug!(lexical, keyword, syntax_tree, data_flow, composite, "similarity scored");

        SimilarityBreakdown {
            lexical,
            keyword,
            syntax_tree,
            data_flow,
            composite,
        }
    }
}
