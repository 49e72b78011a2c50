//! Error types for the quire template engine.

use std::fmt;

use thiserror::Error;

pub use quire_syntax::{Location, SyntaxError};

/// A failure raised by host code (an [`Object`](crate::Object) or
/// [`Callable`](crate::Callable)) while a template looks something up.
///
/// Failures that report themselves as silent are swallowed by variable
/// resolution and replaced with the invalid-variable fallback.
pub trait TemplateFailure: std::error::Error + Send + Sync + 'static {
    fn is_silent(&self) -> bool {
        false
    }
}

/// Why calling a context value did not produce a result.
#[derive(Debug)]
pub enum CallError {
    /// The callable needs arguments a template cannot supply.
    MissingArguments,
    Failed(Box<dyn TemplateFailure>),
}

impl<F: TemplateFailure> From<F> for CallError {
    fn from(failure: F) -> Self {
        CallError::Failed(Box::new(failure))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingAction {
    Set,
    Get,
}

impl fmt::Display for SettingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SettingAction::Set => "set",
            SettingAction::Get => "get",
        })
    }
}

/// All errors that can occur in quire
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Failed lookup for key [{key}] in {within}")]
    VariableDoesNotExist { key: String, within: String },

    #[error("{0}")]
    TemplateDoesNotExist(String),

    #[error("context stack has no frame left to pop")]
    ContextPop,

    #[error("Unable to {action} an unknown setting '{key}'.")]
    UnknownSetting { action: SettingAction, key: String },

    #[error("Noniterable \"{0}\" is passed to for loop.")]
    NonIterable(String),

    #[error("{0}")]
    NoReverseMatch(String),

    #[error("Context data must be a mapping, got {0}")]
    InvalidContext(&'static str),

    #[error("{0}")]
    Raised(Box<dyn TemplateFailure>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl Error {
    pub fn syntax(message: impl Into<String>) -> Self {
        Error::Syntax(SyntaxError::new(message))
    }

    /// True for the recoverable "variable does not exist" outcome.
    pub fn is_missing_variable(&self) -> bool {
        matches!(self, Error::VariableDoesNotExist { .. })
    }

    pub(crate) fn located(self, location: Location) -> Self {
        match self {
            Error::Syntax(e) => Error::Syntax(e.at(location)),
            other => other,
        }
    }
}

/// Result type alias for quire operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("boom")]
    struct Boom;

    impl TemplateFailure for Boom {}

    #[test]
    fn test_unknown_setting_messages() {
        let set = Error::UnknownSetting {
            action: SettingAction::Set,
            key: "NOPE".into(),
        };
        let get = Error::UnknownSetting {
            action: SettingAction::Get,
            key: "NOPE".into(),
        };
        assert_eq!(set.to_string(), "Unable to set an unknown setting 'NOPE'.");
        assert_eq!(get.to_string(), "Unable to get an unknown setting 'NOPE'.");
    }

    #[test]
    fn test_raised_displays_failure() {
        let err = Error::Raised(Box::new(Boom));
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_missing_variable());
    }

    #[test]
    fn test_call_error_from_failure() {
        assert!(matches!(CallError::from(Boom), CallError::Failed(_)));
    }
}
