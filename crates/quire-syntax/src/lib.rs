//! Syntax layer for quire templates.
//!
//! This crate knows how template source is cut into tokens and how the
//! contents of a block tag are split into arguments. It has no notion of
//! values, contexts or rendering; the `quire` crate builds on top of it.

mod lexer;
mod split;
mod token;
mod token_parser;

pub use lexer::{tokenize, Lexer};
pub use split::{smart_split, unescape_string_literal};
pub use token::{Span, Token, TokenKind};
pub use token_parser::TokenParser;

use thiserror::Error;

// ============================================================================
// Delimiters
// ============================================================================

pub const BLOCK_TAG_START: &str = "{%";
pub const BLOCK_TAG_END: &str = "%}";
pub const VARIABLE_TAG_START: &str = "{{";
pub const VARIABLE_TAG_END: &str = "}}";
pub const COMMENT_TAG_START: &str = "{#";
pub const COMMENT_TAG_END: &str = "#}";
pub const SINGLE_BRACE_START: &str = "{";
pub const SINGLE_BRACE_END: &str = "}";

pub const FILTER_SEPARATOR: char = '|';
pub const FILTER_ARGUMENT_SEPARATOR: char = ':';
pub const VARIABLE_ATTRIBUTE_SEPARATOR: char = '.';

/// Comments containing this marker keep their contents in the token stream.
pub const TRANSLATOR_COMMENT_MARK: &str = "Translators";

// ============================================================================
// Location
// ============================================================================

/// Where a token came from (1-indexed line, optional byte span).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub line: usize,
    pub span: Option<Span>,
}

impl Location {
    pub fn new(line: usize, span: Option<Span>) -> Self {
        Self { line, span }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// A template syntax error.
///
/// The message is what users see; the location is attached by the parser
/// when it knows which token was being compiled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SyntaxError {
    pub message: String,
    pub location: Option<Location>,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
        }
    }

    /// Attach a location unless one is already recorded.
    pub fn at(mut self, location: Location) -> Self {
        if self.location.is_none() {
            self.location = Some(location);
        }
        self
    }
}
