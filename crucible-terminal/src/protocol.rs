//! Wire frames spoken by terminal transports
//!
//! Tagged JSON, transport-agnostic: a websocket layer (or the CLI) decodes
//! `ClientFrame`s from the peer and encodes `ServerFrame`s toward it. PTY
//! bytes are carried as UTF-8 text with lossy replacement; escape sequences
//! survive that intact.

use serde::{Deserialize, Serialize};

/// Frames received from an attached client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Keystrokes destined for the PTY
    Input { data: String },
    /// Viewport change
    Resize { rows: u16, cols: u16 },
    /// Liveness check; answered with `Pong`
    Ping,
}

/// Frames sent to an attached client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Live PTY output
    Output { data: String },
    /// Scrollback replay, sent once right after attach
    History { data: String },
    Pong,
    /// The shell exited; no more output will follow
    Exit {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<u32>,
    },
    Error { message: String },
}

impl ServerFrame {
    pub fn output(bytes: &[u8]) -> Self {
        ServerFrame::Output {
            data: String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn history(bytes: &[u8]) -> Self {
        ServerFrame::History {
            data: String::from_utf8_lossy(bytes).into_owned(),
        }
    }
}
