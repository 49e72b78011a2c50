//! Quote-aware splitting of tag contents.

use std::sync::LazyLock;

use regex::Regex;

use crate::SyntaxError;

static SMART_SPLIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"((?:[^\s'"]*(?:(?:"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')[^\s'"]*)+)|\S+)"#,
    )
    .expect("smart split pattern is valid")
});

/// Split on whitespace, keeping quoted substrings (with their quotes) intact.
///
/// ```
/// use quire_syntax::smart_split;
///
/// assert_eq!(
///     smart_split(r#"This is "a person's" test."#),
///     vec!["This", "is", r#""a person's""#, "test."],
/// );
/// ```
pub fn smart_split(text: &str) -> Vec<String> {
    SMART_SPLIT_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Strip the surrounding quotes from a string literal and undo its escapes.
pub fn unescape_string_literal(s: &str) -> Result<String, SyntaxError> {
    let quote = match s.chars().next() {
        Some(q @ ('"' | '\'')) if s.len() >= 2 && s.ends_with(q) => q,
        _ => return Err(SyntaxError::new(format!("Not a string literal: {s:?}"))),
    };
    let inner = &s[1..s.len() - 1];
    Ok(inner
        .replace(&format!("\\{quote}"), &quote.to_string())
        .replace("\\\\", "\\"))
}
