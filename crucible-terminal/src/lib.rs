//! Crucible terminal - multiplexed PTY sessions
//!
//! Long-lived shell sessions behind a `TerminalManager`: bounded scrollback
//! replayed to late joiners, per-subscriber fan-out that never stalls on a
//! slow consumer, and an idle sweep that reclaims abandoned sessions.

mod error;
mod history;
mod manager;
pub mod protocol;
mod session;

pub use error::TerminalError;
pub use manager::{available_shells, CleanupHandle, TerminalConfig, TerminalManager};
pub use session::{Attachment, SessionId, SessionOptions, SessionSnapshot, SubscriberId};
