//! Prompt rendering and code extraction for generator round-trips.

use crate::feedback::classifier::ErrorCategory;
use crate::feedback::composer::CorrectiveContext;
use crate::similarity::TargetLanguage;
use serde::{Deserialize, Serialize};

/// Source/target pair the prompts are written for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    /// Name of the source language, e.g. "Fortran".
    pub source_language: String,
    pub target_language: TargetLanguage,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            source_language: "Fortran".to_string(),
            target_language: TargetLanguage::Cpp,
        }
    }
}

impl PromptTemplates {
    fn source_tag(&self) -> String {
        self.source_language.to_ascii_lowercase()
    }

    fn target_tag(&self) -> &'static str {
        self.target_language.fence_tags()[0]
    }

    /// Prompt for the first translation of `source`.
    pub fn initial(&self, source: &str) -> String {
        let target = self.target_language.display_name();
        let target_hint = match self.target_language {
            TargetLanguage::Cpp => format!("modern {target} (C++17 or newer)"),
            _ => target.to_string(),
        };
        let mut prompt = String::new();
        prompt.push_str(&format!(
            "Translate the following {} code to {}.\n",
            self.source_language, target_hint
        ));
        prompt.push_str(&format!(
            "Maintain functional equivalence while using {target} idioms where appropriate.\n"
        ));
        prompt.push_str(&format!(
            "Return only the translated {target} code with brief comments explaining key translation decisions.\n\n"
        ));
        prompt.push_str(&format!("{} code:\n", self.source_language));
        prompt.push_str(&format!("```{}\n{}\n```\n", self.source_tag(), source.trim_end()));
        prompt
    }

    /// Prompt asking the generator to repair its previous candidate.
    pub fn corrective(&self, ctx: &CorrectiveContext) -> String {
        let target = self.target_language.display_name();
        let mut prompt = String::new();

        prompt.push_str(&format!(
            "I've attempted to compile your {} to {} translation (iteration {}), but encountered the following errors:\n\n",
            self.source_language,
            target,
            ctx.iteration()
        ));

        for record in ctx.records() {
            prompt.push_str("- ");
            prompt.push_str(&record.format_for_prompt());
            prompt.push('\n');
        }
        let shown = ctx.records().len();
        if ctx.total_errors() > shown {
            prompt.push_str(&format!(
                "({} further error(s) omitted; fix the ones above first.)\n",
                ctx.total_errors() - shown
            ));
        }

        prompt.push_str("\nPlease revise your translation to address these issues.");
        let categories = ctx.categories();
        if categories.contains(&ErrorCategory::TypeMismatch) {
            prompt.push_str(" Pay special attention to type conversions.");
        }
        if self.target_language != TargetLanguage::Python
            && (categories.contains(&ErrorCategory::TypeMismatch)
                || categories.contains(&ErrorCategory::UndeclaredIdentifier))
        {
            prompt.push_str(&format!(
                " Remember array indexing: {target} uses 0-based indexing."
            ));
        }
        if categories.contains(&ErrorCategory::MemoryManagement) {
            prompt.push_str(
                " Review memory management: prefer owning containers and smart pointers over manual allocation.",
            );
        }
        if categories.contains(&ErrorCategory::LibraryMapping) {
            prompt.push_str(&format!(
                " Check that every library call maps to a real {target} standard library facility and that the needed headers are included."
            ));
        }
        prompt.push('\n');

        if ctx.request_alternative() {
            prompt.push_str(
                "\nThe same kinds of errors have persisted across several attempts. \
                 Take a structurally different approach instead of patching the previous attempt.\n",
            );
        }

        prompt.push_str("\nHere's your previous translation attempt:\n");
        prompt.push_str(&format!(
            "```{}\n{}\n```\n\n",
            self.target_tag(),
            ctx.previous_candidate().trim_end()
        ));
        prompt.push_str(&format!("Original {} code for reference:\n", self.source_language));
        prompt.push_str(&format!(
            "```{}\n{}\n```\n",
            self.source_tag(),
            ctx.original_source().trim_end()
        ));
        prompt
    }
}

/// Pull code out of a generator response: the first fenced block tagged for
/// `target`, else the first fenced block of any kind, else the whole trimmed
/// response.
pub fn extract_code(response: &str, target: TargetLanguage) -> String {
    let blocks = fenced_blocks(response);
    let tagged = blocks.iter().find(|(tag, _)| {
        target
            .fence_tags()
            .iter()
            .any(|t| tag.eq_ignore_ascii_case(t))
    });
    match tagged.or_else(|| blocks.first()) {
        Some((_, body)) => body.trim().to_string(),
        None => response.trim().to_string(),
    }
}

/// Closed ``` fences as (info string, body) pairs.
fn fenced_blocks(text: &str) -> Vec<(String, String)> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after = &rest[open + 3..];
        let Some(newline) = after.find('\n') else {
            break;
        };
        let tag = after[..newline].trim().to_string();
        let body_start = &after[newline + 1..];
        let Some(close) = body_start.find("```") else {
            break;
        };
        blocks.push((tag, body_start[..close].to_string()));
        rest = &body_start[close + 3..];
    }
    blocks
}
