//! Terminal manager errors

use crate::session::SessionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("terminal session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("terminal session capacity reached ({limit} sessions)")]
    CapacityExceeded { limit: usize },

    #[error("shell not found: {0}")]
    ShellNotFound(String),

    #[error("terminal session is closed")]
    SessionClosed,

    #[error("pty error: {0}")]
    Pty(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
