//! Tokens produced by the lexer.

use crate::split::smart_split;
use crate::Location;

/// Kinds of tokens in a template stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// Literal text between tags.
    Text,
    /// `{{ ... }}`
    Variable,
    /// `{% ... %}`
    Block,
    /// `{# ... #}`
    Comment,
}

/// Byte range of a token in its source, recorded by the debug lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub contents: String,
    pub line: usize,
    pub span: Option<Span>,
}

impl Token {
    pub fn new(kind: TokenKind, contents: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            contents: contents.into(),
            line,
            span: None,
        }
    }

    pub fn location(&self) -> Location {
        Location::new(self.line, self.span)
    }

    /// Split block contents into arguments.
    ///
    /// Quoted strings stay whole, and a `_("...")` translation marker that
    /// contains spaces is stitched back together.
    pub fn split_contents(&self) -> Vec<String> {
        let mut split = Vec::new();
        let mut bits = smart_split(&self.contents).into_iter();
        while let Some(bit) = bits.next() {
            if bit.starts_with("_(\"") || bit.starts_with("_('") {
                let sentinel = format!("{})", &bit[2..3]);
                let mut joined = vec![bit];
                while !joined.last().is_some_and(|b| b.ends_with(&sentinel)) {
                    match bits.next() {
                        Some(next) => joined.push(next),
                        None => break,
                    }
                }
                split.push(joined.join(" "));
            } else {
                split.push(bit);
            }
        }
        split
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn block(contents: &str) -> Token {
        Token::new(TokenKind::Block, contents, 1)
    }

    #[test]
    fn test_split_contents_plain() {
        assert_eq!(
            block("for x in items").split_contents(),
            vec!["for", "x", "in", "items"]
        );
    }

    #[test]
    fn test_split_contents_keeps_quoted_strings() {
        assert_eq!(
            block(r#"include "a b.html" with x=1"#).split_contents(),
            vec!["include", r#""a b.html""#, "with", "x=1"]
        );
    }

    #[test]
    fn test_split_contents_rejoins_translation_marker() {
        assert_eq!(
            block(r#"with _("hello there") as greeting"#).split_contents(),
            vec!["with", r#"_("hello there")"#, "as", "greeting"]
        );
    }

    #[test]
    fn test_split_contents_unterminated_marker_takes_rest() {
        assert_eq!(
            block("x _('a b c").split_contents(),
            vec!["x", "_('a b c"]
        );
    }
}
