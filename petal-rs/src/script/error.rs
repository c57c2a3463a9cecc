//! Error taxonomy for the Petal language.
//!
//! Every failure inside the lexer, parser, evaluator or a host callback is a
//! [`ScriptError`].  Nothing is recovered inside a script: the first error
//! aborts the execution and is converted to text at the interpreter boundary.

use std::time::Duration;

use thiserror::Error;

/// Convenience result alias used throughout the `script` module.
pub type Result<T> = std::result::Result<T, ScriptError>;

/// Any error raised while lexing, parsing or evaluating a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Malformed token stream or grammar violation.
    #[error("{message} at position {position}")]
    Syntax { message: String, position: usize },

    /// An operation was applied to an incompatible value.
    #[error("{0}")]
    Type(String),

    /// Undeclared/redeclared variables, unsupported operators, bad arguments.
    #[error("{0}")]
    Runtime(String),

    /// The execution's cancel token was triggered by the host.
    #[error("Execution was cancelled")]
    Cancelled,

    /// The execution's deadline passed; carries the allotted time.
    #[error("Execution timed out after {} seconds", .0.as_secs_f64())]
    TimedOut(Duration),

    /// Anything else, usually raised by host code.
    #[error("{0}")]
    Host(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl ScriptError {
    pub fn syntax(message: impl Into<String>, position: usize) -> Self {
        ScriptError::Syntax {
            message: message.into(),
            position,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        ScriptError::Type(message.into())
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        ScriptError::Runtime(message.into())
    }

    /// Wrap an arbitrary host error.
    pub fn host(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        ScriptError::Host(err.into())
    }

    /// Prefix used when the error is rendered for the host.
    pub fn category(&self) -> &'static str {
        match self {
            ScriptError::Syntax { .. } => "Syntax Error",
            ScriptError::Type(_) => "Type Error",
            ScriptError::Runtime(_) => "Runtime Error",
            ScriptError::Cancelled | ScriptError::TimedOut(_) => "Cancelled",
            ScriptError::Host(_) => "Unknown Error",
        }
    }

    /// `true` for the two cancellation variants.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ScriptError::Cancelled | ScriptError::TimedOut(_))
    }

    /// Render the categorized message returned by `execute`/`validate`.
    pub fn describe(&self) -> String {
        if self.is_cancellation() {
            self.to_string()
        } else {
            format!("{}: {self}", self.category())
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
