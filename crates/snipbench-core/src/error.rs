//! Error types for snipbench-core.

use thiserror::Error;

/// Result type for snipbench-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in snipbench-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Snippet or setup source is malformed.
    #[error("Code compilation error: {0}")]
    Compile(String),

    /// Snippet compiled but threw while running.
    #[error("Execution error: {0}")]
    Execution(String),

    /// An enabled dependency is invalid or failed to load.
    #[error("Dependencies loading failed: {0}")]
    Dependency(String),

    /// The measurement engine produced no usable result.
    #[error("benchmark engine failed: {0}")]
    Engine(String),

    /// The worker process could not be created or is gone.
    #[error("Worker unavailable: {0}")]
    Unavailable(String),

    /// A run was requested while another one is outstanding.
    #[error("Benchmark test already in progress")]
    RunInProgress,

    /// The worker was terminated while a run was outstanding.
    #[error("Worker terminated")]
    Terminated,

    /// The worker process died on its own.
    #[error("Worker execution error: {0}")]
    WorkerCrashed(String),

    /// The worker reported a whole-run failure.
    #[error("{0}")]
    Benchmark(String),

    /// IPC communication error with the worker process.
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Lookup of a stored item failed.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid operation (e.g., removing the last test case).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Whether this error is scoped to a single snippet rather than the whole run.
    pub fn is_per_snippet(&self) -> bool {
        matches!(self, Error::Compile(_) | Error::Execution(_))
    }

    /// Render the error together with a short recovery hint.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Compile(_) => Some("check the snippet for unbalanced brackets or unsupported syntax"),
            Error::Execution(_) => Some("the snippet threw during its dry run; fix it and run again"),
            Error::Dependency(_) => Some("verify the dependency URL, mode and global name"),
            Error::Unavailable(_) => {
                Some("build the worker with `cargo build -p snipbench` or set SNIPBENCH_WORKER_PATH")
            }
            Error::RunInProgress => Some("wait for the current run to finish or terminate it"),
            Error::Terminated => Some("restart the run manager before starting another run"),
            Error::WorkerCrashed(_) => Some("the worker process exited unexpectedly; see its stderr"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }
}

impl From<crate::script::ScriptError> for Error {
    fn from(e: crate::script::ScriptError) -> Self {
        match e {
            crate::script::ScriptError::Syntax { .. } => Error::Compile(e.to_string()),
            crate::script::ScriptError::Runtime(message) => Error::Execution(message),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_snippet_classification() {
        assert!(Error::Compile("x".into()).is_per_snippet());
        assert!(Error::Execution("x".into()).is_per_snippet());
        assert!(!Error::Dependency("x".into()).is_per_snippet());
        assert!(!Error::RunInProgress.is_per_snippet());
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(
            Error::Execution("boom".into()).to_string(),
            "Execution error: boom"
        );
        assert_eq!(
            Error::Compile("Unexpected token".into()).to_string(),
            "Code compilation error: Unexpected token"
        );
        assert_eq!(Error::Benchmark("raw".into()).to_string(), "raw");
    }

    #[test]
    fn test_hint_is_appended() {
        let rendered = Error::RunInProgress.with_hint();
        assert!(rendered.starts_with("Benchmark test already in progress"));
        assert!(rendered.contains("hint:"));

        assert_eq!(Error::NotFound("abc".into()).with_hint(), "not found: abc");
    }

    #[test]
    fn test_script_error_conversion() {
        let compile: Error = crate::script::ScriptError::syntax("Unexpected token '}'", 2, 5).into();
        assert_eq!(
            compile.to_string(),
            "Code compilation error: Unexpected token '}' (2:5)"
        );

        let runtime: Error = crate::script::ScriptError::Runtime("boom".into()).into();
        assert!(matches!(runtime, Error::Execution(ref m) if m == "boom"));
    }
}
