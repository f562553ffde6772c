//! Compiler diagnostic classification
//!
//! Turns raw compiler output into a language-agnostic list of
//! [`ErrorRecord`]s. Rules are tried in priority order and the first hit wins,
//! so a line is never counted twice. Lines no rule recognises are kept as
//! [`ErrorCategory::Other`] rather than dropped.

use crate::error::{EvalError, EvalResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Marks a line as a diagnostic (as opposed to a source echo, caret or note).
static DIAGNOSTIC_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|[\s:])(?:fatal error|internal compiler error|error|warning)(?:\[[A-Z]\d+\])?\s*:")
        .unwrap()
});

/// Linker failures that carry no `error:` marker (GNU ld).
static LINKER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:undefined reference to|multiple definition of|\bld(?:\.\w+)?: cannot find)")
        .unwrap()
});

/// First quoted token on a line: 'x', ‘x’, `x` or "x".
static QUOTED_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['‘`"]([^'’`"]+)['’`"]"#).unwrap());

/// Built-in rules, most specific first. Tuned for GCC, Clang and gfortran.
const DEFAULT_RULES: &[(ErrorCategory, &str)] = &[
    // Syntax
    (
        ErrorCategory::Syntax,
        r"(?i)expected (?:primary-expression|unqualified-id|declaration|identifier|expression|initializer|type-specifier)",
    ),
    (
        ErrorCategory::Syntax,
        r"(?i)\bexpected\b.*\b(?:before|after|at end of)\b",
    ),
    (
        ErrorCategory::Syntax,
        r"(?i)(?:stray '|missing terminating|syntax error|unclassifiable statement|parse error|unterminated)",
    ),
    // Undeclared identifiers
    (
        ErrorCategory::UndeclaredIdentifier,
        r"(?i)['‘`]([^'’`]+)['’`] was not declared in this scope",
    ),
    (
        ErrorCategory::UndeclaredIdentifier,
        r"(?i)use of undeclared identifier ['‘`]([^'’`]+)['’`]",
    ),
    (
        ErrorCategory::UndeclaredIdentifier,
        r"(?i)(?:unknown type name|does not name a type|has no implicit type|identifier .* is undefined|undeclared)",
    ),
    // Library mapping
    (
        ErrorCategory::LibraryMapping,
        r"(?i)['‘`]([^'’`]+)['’`] is not a member of ['‘`]std['’`]",
    ),
    (
        ErrorCategory::LibraryMapping,
        r"(?i)no (?:member|template) named ['‘`]([^'’`]+)['’`] in namespace ['‘`]std['’`]",
    ),
    (
        ErrorCategory::LibraryMapping,
        r"(?i)fatal error: ([\w./<>-]+): no such file or directory",
    ),
    (
        ErrorCategory::LibraryMapping,
        r"(?i)undefined reference to [`'‘]([^'’`]+)['’`]",
    ),
    // Memory management
    (
        ErrorCategory::MemoryManagement,
        r"(?i)(?:double free|free-nonheap|mismatched-new-delete|dangling|address of local variable|reference to local variable|memory leak|use of deleted function .*(?:unique_ptr|shared_ptr))",
    ),
    (
        ErrorCategory::MemoryManagement,
        r"(?i)(?:operator (?:new|delete)|['‘]delete(?:\[\])?['’]|\bmalloc\b|\bfree\b|\b(?:de)?allocate\b|unique_ptr|shared_ptr)",
    ),
    // Semantic / type mismatch
    (
        ErrorCategory::TypeMismatch,
        r"(?i)invalid types ['‘`]([^'’`]+)['’`]",
    ),
    (
        ErrorCategory::TypeMismatch,
        r"(?i)no matching function for call to ['‘`]([^'’`]+)['’`]",
    ),
    (
        ErrorCategory::TypeMismatch,
        r"(?i)(?:cannot convert|invalid conversion|incompatible types?|invalid operands|no match for|narrowing conversion|conversion from .* to .* requested|too (?:many|few) arguments|cannot bind|type mismatch|rank mismatch|lvalue required|discards qualifiers|non-class type|invalid use of|read-only|cannot initialize)",
    ),
];

/// Language-agnostic error taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed source; blocks compilation outright
    Syntax,
    /// Semantic errors, chiefly type mismatches and bad overloads
    TypeMismatch,
    /// Name used before (or without) declaration
    UndeclaredIdentifier,
    /// Source-library construct mapped to the wrong target-library facility
    LibraryMapping,
    /// Allocation, ownership and lifetime mistakes
    MemoryManagement,
    /// Anything no rule recognised
    Other,
}

impl ErrorCategory {
    /// Severity weight in [0,1]. Drives feedback prioritisation only.
    pub fn severity(&self) -> f64 {
        match self {
            Self::Syntax | Self::UndeclaredIdentifier => 1.0,
            Self::TypeMismatch => 0.75,
            Self::LibraryMapping => 0.6,
            Self::MemoryManagement => 0.5,
            Self::Other => 0.25,
        }
    }

    /// Whether this category on its own prevents compilation.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Syntax | Self::UndeclaredIdentifier)
    }

    pub fn all() -> [ErrorCategory; 6] {
        [
            Self::Syntax,
            Self::TypeMismatch,
            Self::UndeclaredIdentifier,
            Self::LibraryMapping,
            Self::MemoryManagement,
            Self::Other,
        ]
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax => write!(f, "syntax"),
            Self::TypeMismatch => write!(f, "type_mismatch"),
            Self::UndeclaredIdentifier => write!(f, "undeclared_identifier"),
            Self::LibraryMapping => write!(f, "library_mapping"),
            Self::MemoryManagement => write!(f, "memory_management"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One classified diagnostic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Taxonomy category
    pub category: ErrorCategory,
    /// Raw diagnostic excerpt (the full text for unmatched output)
    pub message: String,
    /// Identifier the diagnostic refers to, if one was quoted
    pub identifier: Option<String>,
    /// Severity weight in [0,1]
    pub severity: f64,
    /// Index of the source line within the diagnostic text
    pub line: usize,
    /// Source echoes, carets, notes and headers that belong to this diagnostic
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl ErrorRecord {
    /// Synthetic record for output the classifier cannot attribute, or for
    /// infrastructural failures where no compiler ever ran.
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            category: ErrorCategory::Other,
            message: message.into(),
            identifier: None,
            severity: ErrorCategory::Other.severity(),
            line: 0,
            context: Vec::new(),
        }
    }

    /// Format for a corrective prompt; context lines follow, indented.
    pub fn format_for_prompt(&self) -> String {
        let mut text = match &self.identifier {
            Some(ident) => format!("[{}] {} (identifier: {})", self.category, self.message, ident),
            None => format!("[{}] {}", self.category, self.message),
        };
        for line in &self.context {
            text.push_str("\n    ");
            text.push_str(line);
        }
        text
    }
}

/// A single classification rule
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub category: ErrorCategory,
    pub pattern: Regex,
}

fn is_diagnostic_line(line: &str) -> bool {
    DIAGNOSTIC_MARKER.is_match(line) || LINKER_MARKER.is_match(line)
}

/// Ordered, first-match-wins diagnostic classifier
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    rules: Vec<PatternRule>,
}

static DEFAULT_CLASSIFIER: LazyLock<ErrorClassifier> = LazyLock::new(|| {
    ErrorClassifier::with_rules(DEFAULT_RULES).unwrap()
});

impl Default for ErrorClassifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

impl ErrorClassifier {
    /// Build a classifier from `(category, regex)` pairs in priority order.
    pub fn with_rules(rules: &[(ErrorCategory, &str)]) -> EvalResult<Self> {
        let rules = rules
            .iter()
            .map(|(category, pattern)| {
                Regex::new(pattern)
                    .map(|pattern| PatternRule {
                        category: *category,
                        pattern,
                    })
                    .map_err(|e| EvalError::config(format!("invalid classifier rule: {e}")))
            })
            .collect::<EvalResult<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Number of rules, for diagnostics
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Classify raw diagnostic text.
    ///
    /// Every diagnostic line yields exactly one record, in source order.
    /// Other non-blank lines are attached as context to the preceding
    /// record; lines before the first diagnostic go to the first one.
    /// Non-blank text without any diagnostic line yields one `Other` record
    /// carrying the whole text.
    pub fn classify(&self, diagnostics: &str) -> Vec<ErrorRecord> {
        let mut records: Vec<ErrorRecord> = Vec::new();
        let mut leading: Vec<String> = Vec::new();
        for (idx, line) in diagnostics.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            if is_diagnostic_line(line) {
                let mut record = self.classify_line(idx, line.trim());
                if records.is_empty() {
                    record.context = std::mem::take(&mut leading);
                }
                records.push(record);
            } else {
                match records.last_mut() {
                    Some(record) => record.context.push(line.trim_end().to_string()),
                    None => leading.push(line.trim_end().to_string()),
                }
            }
        }

        if records.is_empty() && !diagnostics.trim().is_empty() {
            return vec![ErrorRecord::other(diagnostics.trim())];
        }
        records
    }

    /// Classify one diagnostic line against the ordered rules.
    fn classify_line(&self, idx: usize, line: &str) -> ErrorRecord {
        for rule in &self.rules {
            if let Some(caps) = rule.pattern.captures(line) {
                let identifier = caps
                    .get(1)
                    .map(|m| m.as_str().to_string())
                    .or_else(|| {
                        QUOTED_TOKEN
                            .captures(line)
                            .and_then(|c| c.get(1))
                            .map(|m| m.as_str().to_string())
                    });
                return ErrorRecord {
                    category: rule.category,
                    message: line.to_string(),
                    identifier,
                    severity: rule.category.severity(),
                    line: idx,
                    context: Vec::new(),
                };
            }
        }

        ErrorRecord {
            line: idx,
            ..ErrorRecord::other(line)
        }
    }

    /// Group records by category, preserving source order within a group
    pub fn group_by_category(records: &[ErrorRecord]) -> BTreeMap<ErrorCategory, Vec<&ErrorRecord>> {
        let mut groups = BTreeMap::new();
        for record in records {
            groups
                .entry(record.category)
                .or_insert_with(Vec::new)
                .push(record);
        }
        groups
    }

    /// Get summary statistics for a set of records
    pub fn summarize(records: &[ErrorRecord]) -> ErrorSummary {
        let by_category = Self::group_by_category(records)
            .into_iter()
            .map(|(k, v)| (k, v.len()))
            .collect();
        ErrorSummary {
            total: records.len(),
            by_category,
            max_severity: records.iter().map(|r| r.severity).fold(0.0, f64::max),
        }
    }
}

/// Summary of classified errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    /// Total record count
    pub total: usize,
    /// Count by category
    pub by_category: BTreeMap<ErrorCategory, usize>,
    /// Highest severity present (0 when empty)
    pub max_severity: f64,
}

impl ErrorSummary {
    /// Whether any compilation-blocking category is present
    pub fn has_blocking(&self) -> bool {
        self.by_category.keys().any(|c| c.is_blocking())
    }
}
