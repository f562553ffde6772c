//! Best-effort lexical tokenization shared by the lexical and keyword
//! components. Works on any text, parsable or not.

use regex::Regex;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        "(?:[^"\\\n]|\\.)*"          # string literal
        | '(?:[^'\\\n]|\\.)'         # char literal
        | [A-Za-z_][A-Za-z0-9_]*     # identifier / keyword
        | \d+(?:\.\d+)?(?:[eE][+-]?\d+)?  # number
        | ::|->|<<|>>|<=|>=|==|!=|&&|\|\||\+\+|--|\+=|-=|\*=|/=
        | [^\sA-Za-z0-9_]            # any other single symbol
        "#,
    )
    .unwrap()
});

static LINE_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)(//|#(?:[^a-z]|$)).*$").unwrap());

static BLOCK_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").unwrap());

/// Token kinds the keyword component cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Word,
    Literal,
    Symbol,
}

/// Strip `//`, `#` and `/* */` comments. Preprocessor directives survive:
/// a `#` directly followed by a lowercase letter is not a comment.
pub fn strip_comments(source: &str) -> String {
    let without_blocks = BLOCK_COMMENT.replace_all(source, " ");
    LINE_COMMENT.replace_all(&without_blocks, "").into_owned()
}

/// Tokenize `source` after comment stripping.
pub fn tokenize(source: &str) -> Vec<String> {
    let stripped = strip_comments(source);
    TOKEN
        .find_iter(&stripped)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Classify a single token.
pub fn kind_of(token: &str) -> TokenKind {
    match token.chars().next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => TokenKind::Word,
        Some(c) if c.is_ascii_digit() || c == '"' || c == '\'' => TokenKind::Literal,
        _ => TokenKind::Symbol,
    }
}

/// Lowercased word tokens; keywords and identifiers only.
pub fn words(tokens: &[String]) -> impl Iterator<Item = String> + '_ {
    tokens
        .iter()
        .filter(|t| kind_of(t) == TokenKind::Word)
        .map(|t| t.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_basic_statement() {
        let tokens = tokenize("for (int i = 0; i < n; ++i) { a[i] += 1.5e3; }");
        assert_eq!(
            tokens,
            vec![
                "for", "(", "int", "i", "=", "0", ";", "i", "<", "n", ";", "++", "i", ")", "{",
                "a", "[", "i", "]", "+=", "1.5e3", ";", "}"
            ]
        );
    }

    #[test]
    fn test_comments_are_dropped() {
        let tokens = tokenize("int x; // trailing\n/* block\n comment */ int y;");
        assert_eq!(tokens, vec!["int", "x", ";", "int", "y", ";"]);
    }

    #[test]
    fn test_include_directive_kept() {
        let tokens = tokenize("#include <vector>");
        assert!(tokens.contains(&"include".to_string()));
        assert!(tokens.contains(&"vector".to_string()));
    }

    #[test]
    fn test_string_literal_single_token() {
        let tokens = tokenize(r#"std::cout << "a b c";"#);
        assert_eq!(tokens, vec!["std", "::", "cout", "<<", "\"a b c\"", ";"]);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(kind_of("foo"), TokenKind::Word);
        assert_eq!(kind_of("42"), TokenKind::Literal);
        assert_eq!(kind_of("+="), TokenKind::Symbol);
    }
}
