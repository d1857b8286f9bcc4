//! Error taxonomy for the execution engine
//!
//! Failures that originate from the user's code (non-zero exit, compile
//! failure, timeout, kill) are never surfaced here; they are reported inside
//! a normally-returned [`ExecutionResult`](crate::types::ExecutionResult).
//! This enum covers infrastructure failures only.

use thiserror::Error;

/// Errors raised by the sandbox factory and backends
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("sandbox unavailable: {0}")]
    Unavailable(String),

    #[error("container sandbox required but unavailable: {0}")]
    ContainerRequiredButUnavailable(String),

    #[error("concurrent execution capacity exceeded ({limit} running)")]
    CapacityExceeded { limit: usize },

    #[error("file execution is not supported by the container sandbox; read the file and call execute instead")]
    FileExecutionUnsupported,

    #[error("code execution is disabled by configuration")]
    ExecutionDisabled,

    #[error("execution {0} is already running")]
    DuplicateExecution(crate::types::ExecutionId),

    #[error("container engine error: {0}")]
    Engine(#[from] bollard::errors::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("internal sandbox error: {0}")]
    Internal(String),
}

/// Outcome of a kill request.
///
/// Killing an execution that already finished (or was never known) signals
/// nothing went wrong, so it is a distinct outcome rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The execution was live and has been terminated.
    Killed,
    /// No live execution with that id; nothing to do.
    AlreadyFinished,
}
