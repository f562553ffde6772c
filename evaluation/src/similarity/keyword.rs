//! Keyword/identifier component.
//!
//! Keywords from either side of a translation are mapped onto a shared set of
//! [`Construct`]s, so Fortran `do` and C++ `for` count as the same loop. The
//! construct half is a weighted clipped precision; the identifier half is the
//! Jaccard overlap of the remaining names. The component is their mean.

use super::tokenize;
use std::collections::{BTreeMap, HashSet};

/// Language-neutral keyword class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Construct {
    Loop,
    Conditional,
    Jump,
    Function,
    Call,
    Allocate,
    Deallocate,
    Pointer,
    IntegerType,
    RealType,
    BoolType,
    CharType,
    Array,
    Record,
    Module,
    Constant,
    Io,
}

impl Construct {
    /// Control flow and memory constructs weigh more than declarations.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Loop | Self::Conditional | Self::Allocate | Self::Deallocate => 2.0,
            Self::Jump | Self::Function | Self::Pointer => 1.5,
            Self::Call
            | Self::IntegerType
            | Self::RealType
            | Self::BoolType
            | Self::CharType
            | Self::Array
            | Self::Record => 1.0,
            Self::Module | Self::Constant | Self::Io => 0.5,
        }
    }

    /// Look up a lowercased word in the equivalence table.
    pub fn of(word: &str) -> Option<Self> {
        let construct = match word {
            "do" | "for" | "while" | "loop" | "foreach" | "forall" | "range" => Self::Loop,
            "if" | "else" | "elif" | "elseif" | "then" | "switch" | "case" | "select" | "match"
            | "where" => Self::Conditional,
            "break" | "continue" | "exit" | "cycle" | "goto" | "return" | "stop" => Self::Jump,
            "function" | "subroutine" | "def" | "fn" | "func" | "lambda" | "program"
            | "procedure" => Self::Function,
            "call" => Self::Call,
            "allocate" | "new" | "malloc" | "calloc" | "realloc" | "make" | "make_unique"
            | "make_shared" | "box" | "resize" | "reserve" => Self::Allocate,
            "deallocate" | "delete" | "free" | "drop" | "nullify" => Self::Deallocate,
            "pointer" | "target" | "unique_ptr" | "shared_ptr" | "nullptr" | "null"
            | "associated" => Self::Pointer,
            "integer" | "int" | "long" | "short" | "unsigned" | "size_t" | "int32_t"
            | "int64_t" | "i32" | "i64" | "usize" | "isize" => Self::IntegerType,
            "real" | "double" | "float" | "complex" | "f32" | "f64" | "float64" => Self::RealType,
            "logical" | "bool" | "true" | "false" => Self::BoolType,
            "character" | "char" | "string" | "str" => Self::CharType,
            "dimension" | "array" | "vector" | "vec" | "valarray" | "span" | "slice" => {
                Self::Array
            }
            "type" | "struct" | "class" | "record" | "impl" | "enum" => Self::Record,
            "module" | "namespace" | "use" | "import" | "include" | "package" | "mod"
            | "contains" | "using" => Self::Module,
            "parameter" | "const" | "constexpr" | "static" | "final" => Self::Constant,
            "print" | "write" | "read" | "cout" | "cin" | "cerr" | "printf" | "scanf"
            | "println" | "endl" | "open" | "close" => Self::Io,
            _ => return None,
        };
        Some(construct)
    }
}

/// Construct counts and identifier set extracted from one text.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct KeywordProfile {
    pub constructs: BTreeMap<Construct, usize>,
    pub identifiers: HashSet<String>,
}

impl KeywordProfile {
    pub fn from_tokens(tokens: &[String]) -> Self {
        let mut profile = Self::default();
        for word in tokenize::words(tokens) {
            match Construct::of(&word) {
                Some(c) => *profile.constructs.entry(c).or_insert(0) += 1,
                None => {
                    profile.identifiers.insert(word);
                }
            }
        }
        profile
    }
}

/// Weighted clipped precision of candidate constructs against the reference.
pub fn construct_precision(reference: &KeywordProfile, candidate: &KeywordProfile) -> f64 {
    let total: f64 = candidate
        .constructs
        .iter()
        .map(|(c, n)| c.weight() * *n as f64)
        .sum();
    if total == 0.0 {
        return if reference.constructs.is_empty() { 1.0 } else { 0.0 };
    }
    let clipped: f64 = candidate
        .constructs
        .iter()
        .map(|(c, n)| {
            let r = reference.constructs.get(c).copied().unwrap_or(0);
            c.weight() * (*n).min(r) as f64
        })
        .sum();
    clipped / total
}

/// Jaccard overlap of identifier sets; two empty sets agree perfectly.
pub fn identifier_overlap(reference: &KeywordProfile, candidate: &KeywordProfile) -> f64 {
    let union = reference.identifiers.union(&candidate.identifiers).count();
    if union == 0 {
        return 1.0;
    }
    let inter = reference
        .identifiers
        .intersection(&candidate.identifiers)
        .count();
    inter as f64 / union as f64
}

pub fn score(reference: &[String], candidate: &[String]) -> f64 {
    let r = KeywordProfile::from_tokens(reference);
    let c = KeywordProfile::from_tokens(candidate);
    (construct_precision(&r, &c) + identifier_overlap(&r, &c)) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::tokenize::tokenize;

    #[test]
    fn test_cross_language_loop_equivalence() {
        assert_eq!(Construct::of("do"), Construct::of("for"));
        assert_eq!(Construct::of("allocate"), Some(Construct::Allocate));
        assert_eq!(Construct::of("new"), Some(Construct::Allocate));
        assert_eq!(Construct::of("matrix"), None);
    }

    #[test]
    fn test_control_flow_weighs_more_than_io() {
        assert!(Construct::Loop.weight() > Construct::Io.weight());
        assert!(Construct::Deallocate.weight() > Construct::IntegerType.weight());
    }

    #[test]
    fn test_identical_text_scores_one() {
        let t = tokenize("for (int i = 0; i < n; i++) { total += a[i]; }");
        assert_eq!(score(&t, &t), 1.0);
    }

    #[test]
    fn test_translation_keeps_construct_credit() {
        let fortran = tokenize("do i = 1, n\n  total = total + a(i)\nend do");
        let cpp = tokenize("for (i = 1; i <= n; i++) { total = total + a[i]; }");
        let r = KeywordProfile::from_tokens(&fortran);
        let c = KeywordProfile::from_tokens(&cpp);
        assert_eq!(construct_precision(&r, &c), 1.0);
    }

    #[test]
    fn test_missing_constructs_lose_credit() {
        let r = KeywordProfile::from_tokens(&tokenize("int x = 1;"));
        let c = KeywordProfile::from_tokens(&tokenize("while (x) { delete p; }"));
        assert_eq!(construct_precision(&r, &c), 0.0);
    }

    #[test]
    fn test_identifier_jaccard() {
        let r = KeywordProfile::from_tokens(&tokenize("alpha beta gamma"));
        let c = KeywordProfile::from_tokens(&tokenize("alpha beta delta"));
        assert!((identifier_overlap(&r, &c) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_both_empty_halves_agree() {
        let empty = KeywordProfile::default();
        assert_eq!(construct_precision(&empty, &empty), 1.0);
        assert_eq!(identifier_overlap(&empty, &empty), 1.0);
    }
}
