//! Regex-driven lexer.
//!
//! The source is cut on a single pattern matching `{% %}`, `{{ }}` and
//! `{# #}`. Pieces between matches are literal text; matched pieces are tag
//! tokens with their delimiters stripped and contents trimmed. The lexer
//! never fails: empty tags are reported by the parser.

use std::sync::LazyLock;

use regex::Regex;

use crate::token::{Span, Token, TokenKind};
use crate::{
    BLOCK_TAG_START, COMMENT_TAG_START, TRANSLATOR_COMMENT_MARK, VARIABLE_TAG_START,
};

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{%.*?%\}|\{\{.*?\}\}|\{#.*?#\}").expect("tag pattern is valid")
});

/// Tokenize a source string without span information.
pub fn tokenize(source: &str) -> Vec<Token> {
    Lexer::new(source).tokenize()
}

pub struct Lexer<'a> {
    source: &'a str,
    debug: bool,
    line: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            debug: false,
            line: 1,
        }
    }

    /// A lexer that records byte spans on every token.
    pub fn debug(source: &'a str) -> Self {
        Self {
            debug: true,
            ..Self::new(source)
        }
    }

    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut upto = 0;

        for m in TAG_RE.find_iter(self.source) {
            if m.start() > upto {
                tokens.push(self.create_token(upto, m.start(), false));
            }
            tokens.push(self.create_token(m.start(), m.end(), true));
            upto = m.end();
        }
        if upto < self.source.len() {
            tokens.push(self.create_token(upto, self.source.len(), false));
        }

        tokens
    }

    fn create_token(&mut self, start: usize, end: usize, in_tag: bool) -> Token {
        let token_string = &self.source[start..end];
        let mut token = if in_tag {
            let inner = token_string[2..token_string.len() - 2].trim();
            if token_string.starts_with(VARIABLE_TAG_START) {
                Token::new(TokenKind::Variable, inner, self.line)
            } else if token_string.starts_with(BLOCK_TAG_START) {
                Token::new(TokenKind::Block, inner, self.line)
            } else {
                debug_assert!(token_string.starts_with(COMMENT_TAG_START));
                let contents = if inner.contains(TRANSLATOR_COMMENT_MARK) {
                    inner
                } else {
                    ""
                };
                Token::new(TokenKind::Comment, contents, self.line)
            }
        } else {
            Token::new(TokenKind::Text, token_string, self.line)
        };

        if self.debug {
            token.span = Some(Span { start, end });
        }
        self.line += token_string.matches('\n').count();
        token
    }
}
