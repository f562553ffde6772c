//! Target languages the structural components can parse.

use serde::{Deserialize, Serialize};
use tree_sitter::{Language, Parser, Tree};

/// Language of the reference and candidate texts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    #[default]
    Cpp,
    C,
    Rust,
    Python,
    Go,
}

impl TargetLanguage {
    pub fn grammar(&self) -> Language {
        match self {
            Self::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Self::C => tree_sitter_c::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
        }
    }

    /// Code-fence tags a generator may use for this language.
    pub fn fence_tags(&self) -> &'static [&'static str] {
        match self {
            Self::Cpp => &["cpp", "c++", "cxx", "cc"],
            Self::C => &["c"],
            Self::Rust => &["rust", "rs"],
            Self::Python => &["python", "py"],
            Self::Go => &["go", "golang"],
        }
    }

    /// Human-readable name used in prompts.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Cpp => "C++",
            Self::C => "C",
            Self::Rust => "Rust",
            Self::Python => "Python",
            Self::Go => "Go",
        }
    }

    /// File extension for a candidate written to disk.
    pub fn source_extension(&self) -> &'static str {
        match self {
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Rust => "rs",
            Self::Python => "py",
            Self::Go => "go",
        }
    }

    /// Parse `source`. `None` when the grammar cannot be loaded or the parser
    /// gives up; callers treat both as "unparsable".
    pub fn parse(&self, source: &str) -> Option<Tree> {
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&self.grammar()) {
            tracing::warn!(language = %self, error = %e, "failed to load grammar");
            return None;
        }
        parser.parse(source, None)
    }
}

impl std::fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpp => write!(f, "cpp"),
            Self::C => write!(f, "c"),
            Self::Rust => write!(f, "rust"),
            Self::Python => write!(f, "python"),
            Self::Go => write!(f, "go"),
        }
    }
}

impl std::str::FromStr for TargetLanguage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpp" | "c++" | "cxx" => Ok(Self::Cpp),
            "c" => Ok(Self::C),
            "rust" | "rs" => Ok(Self::Rust),
            "python" | "py" => Ok(Self::Python),
            "go" | "golang" => Ok(Self::Go),
            other => Err(format!("unsupported target language: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_grammar_loads() {
        for lang in [
            TargetLanguage::Cpp,
            TargetLanguage::C,
            TargetLanguage::Rust,
            TargetLanguage::Python,
            TargetLanguage::Go,
        ] {
            assert!(lang.parse("x").is_some(), "{lang} grammar failed to load");
        }
    }

    #[test]
    fn test_from_str_aliases() {
        assert_eq!("C++".parse::<TargetLanguage>().unwrap(), TargetLanguage::Cpp);
        assert_eq!("golang".parse::<TargetLanguage>().unwrap(), TargetLanguage::Go);
        assert!("fortran".parse::<TargetLanguage>().is_err());
    }
}
