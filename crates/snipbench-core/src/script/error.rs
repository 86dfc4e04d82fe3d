//! Error type for the snippet language front end and evaluator.

use thiserror::Error;

/// Failure raised by the script layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    /// Malformed source, detected before anything runs.
    #[error("{message} ({line}:{column})")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// A value was thrown and not caught.
    #[error("{0}")]
    Runtime(String),
}

impl ScriptError {
    pub fn syntax(message: impl Into<String>, line: usize, column: usize) -> Self {
        ScriptError::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, ScriptError::Syntax { .. })
    }
}
