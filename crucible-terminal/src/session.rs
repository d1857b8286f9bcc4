//! One multiplexed PTY session
//!
//! A session owns the PTY master, a bounded history ring, and a set of
//! subscribers. A blocking pump task copies PTY output into the ring and
//! fans it out; each subscriber has its own bounded broadcast channel, so
//! overflow drops that subscriber's oldest frames without stalling the
//! pump or the other subscribers.

use crate::error::TerminalError;
use crate::history::HistoryRing;
use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub uuid::Uuid);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options for creating a session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Display name; defaults to "terminal"
    pub name: Option<String>,
    /// Shell name ("bash", "zsh", "sh") or absolute path;
    /// empty means resolve from the environment
    pub shell: Option<String>,
    /// Working directory; defaults to the system temp dir
    pub work_dir: Option<PathBuf>,
    /// Initial viewport, zero means 24x80
    pub rows: u16,
    pub cols: u16,
    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Read-only view of a session's state
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub name: String,
    pub shell: String,
    pub work_dir: PathBuf,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub rows: u16,
    pub cols: u16,
    pub subscribers: usize,
    pub alive: bool,
}

struct Activity {
    instant: Instant,
    at: DateTime<Utc>,
}

struct PtyHandles {
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

pub(crate) struct TerminalSession {
    pub(crate) id: SessionId,
    name: String,
    shell: String,
    work_dir: PathBuf,
    created_at: DateTime<Utc>,
    size: Mutex<(u16, u16)>,
    activity: Mutex<Activity>,
    history: Mutex<HistoryRing>,
    subscribers: Mutex<HashMap<SubscriberId, broadcast::Sender<Vec<u8>>>>,
    pty: Mutex<PtyHandles>,
    killer: Mutex<Box<dyn ChildKiller + Send + Sync>>,
    exit_code: Mutex<Option<u32>>,
    closed: AtomicBool,
    subscriber_buffer: usize,
}

impl TerminalSession {
    /// Open the PTY, spawn the shell, and start the output pump. Returns
    /// the session and the child handle the caller waits on.
    pub(crate) fn spawn(
        shell: String,
        work_dir: PathBuf,
        opts: &SessionOptions,
        history_bytes: usize,
        subscriber_buffer: usize,
    ) -> Result<(Arc<Self>, Box<dyn portable_pty::Child + Send + Sync>), TerminalError> {
        let rows = if opts.rows == 0 { 24 } else { opts.rows };
        let cols = if opts.cols == 0 { 80 } else { opts.cols };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(TerminalError::Pty)?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(&work_dir);
        cmd.env("TERM", "xterm-256color");
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }

        let child = pair.slave.spawn_command(cmd).map_err(TerminalError::Pty)?;
        // The slave fd is the child's now; holding ours open would keep the
        // pump from seeing EOF when the shell exits.
        drop(pair.slave);

        let reader = pair.master.try_clone_reader().map_err(TerminalError::Pty)?;
        let writer = pair.master.take_writer().map_err(TerminalError::Pty)?;
        let killer = child.clone_killer();

        let id = SessionId::new();
        let now = Utc::now();
        let session = Arc::new(Self {
            id,
            name: opts.name.clone().unwrap_or_else(|| "terminal".to_string()),
            shell,
            work_dir,
            created_at: now,
            size: Mutex::new((rows, cols)),
            activity: Mutex::new(Activity {
                instant: Instant::now(),
                at: now,
            }),
            history: Mutex::new(HistoryRing::new(history_bytes)),
            subscribers: Mutex::new(HashMap::new()),
            pty: Mutex::new(PtyHandles {
                master: Some(pair.master),
                writer: Some(writer),
            }),
            killer: Mutex::new(killer),
            exit_code: Mutex::new(None),
            closed: AtomicBool::new(false),
            subscriber_buffer,
        });

        let pump = Arc::clone(&session);
        tokio::task::spawn_blocking(move || pump.pump_output(reader));

        Ok((session, child))
    }

    /// Blocking read loop: PTY output goes into history and out to every
    /// subscriber. Runs until the PTY reaches EOF.
    fn pump_output(&self, mut reader: Box<dyn Read + Send>) {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = &buf[..n];
                    self.touch();
                    self.history
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(chunk);
                    let senders: Vec<broadcast::Sender<Vec<u8>>> = self
                        .subscribers
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .values()
                        .cloned()
                        .collect();
                    for tx in senders {
                        // Full channels overwrite that subscriber's oldest
                        // frame; send only fails with zero receivers.
                        let _ = tx.send(chunk.to_vec());
                    }
                }
            }
        }
        tracing::debug!(session_id = %self.id, "pty output pump finished");
    }

    pub(crate) fn write(&self, data: &[u8]) -> Result<(), TerminalError> {
        self.touch();
        let mut pty = self.pty.lock().unwrap_or_else(|e| e.into_inner());
        let writer = pty.writer.as_mut().ok_or(TerminalError::SessionClosed)?;
        writer.write_all(data)?;
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn resize(&self, rows: u16, cols: u16) -> Result<(), TerminalError> {
        if rows == 0 || cols == 0 {
            return Ok(());
        }
        self.touch();
        let pty = self.pty.lock().unwrap_or_else(|e| e.into_inner());
        let master = pty.master.as_ref().ok_or(TerminalError::SessionClosed)?;
        master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(TerminalError::Pty)?;
        *self.size.lock().unwrap_or_else(|e| e.into_inner()) = (rows, cols);
        Ok(())
    }

    pub(crate) fn history_snapshot(&self) -> Vec<u8> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .snapshot()
    }

    pub(crate) fn attach(self: &Arc<Self>) -> Result<Attachment, TerminalError> {
        if self.is_closed() {
            return Err(TerminalError::SessionClosed);
        }
        self.touch();
        let (tx, rx) = broadcast::channel(self.subscriber_buffer);
        let subscriber_id = SubscriberId(uuid::Uuid::new_v4());
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(subscriber_id, tx);
        Ok(Attachment {
            session_id: self.id,
            subscriber_id,
            history: self.history_snapshot(),
            receiver: rx,
            dropped_frames: 0,
            session: Arc::downgrade(self),
        })
    }

    /// Remove a subscriber. Unknown ids are a no-op.
    pub(crate) fn detach(&self, subscriber_id: SubscriberId) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&subscriber_id);
        self.touch();
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        let (rows, cols) = *self.size.lock().unwrap_or_else(|e| e.into_inner());
        let last_active_at = self
            .activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .at;
        SessionSnapshot {
            id: self.id,
            name: self.name.clone(),
            shell: self.shell.clone(),
            work_dir: self.work_dir.clone(),
            created_at: self.created_at,
            last_active_at,
            rows,
            cols,
            subscribers: self
                .subscribers
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            alive: !self.is_closed(),
        }
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .instant
            .elapsed()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn exit_code(&self) -> Option<u32> {
        *self.exit_code.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called by the wait task when the shell exits on its own.
    pub(crate) fn mark_exited(&self, code: Option<u32>) {
        *self.exit_code.lock().unwrap_or_else(|e| e.into_inner()) = code;
        self.close();
    }

    /// Kill the shell and release the PTY. Idempotent; subscribers observe
    /// a closed channel after their buffered frames drain.
    pub(crate) fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let mut pty = self.pty.lock().unwrap_or_else(|e| e.into_inner());
            pty.writer.take();
            // Dropping the master closes the fd the pump reads from.
            pty.master.take();
        }
        if let Err(e) = self
            .killer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .kill()
        {
            tracing::debug!(session_id = %self.id, error = %e, "shell kill failed");
        }
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        tracing::info!(session_id = %self.id, "terminal session closed");
    }

    fn touch(&self) {
        let mut activity = self.activity.lock().unwrap_or_else(|e| e.into_inner());
        activity.instant = Instant::now();
        activity.at = Utc::now();
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// A subscriber's live view of a session.
///
/// `history` carries the scrollback present at attach time; `recv` yields
/// frames produced after that. Dropping the attachment detaches: the
/// session's subscriber slot is reclaimed, so transports that reconnect
/// without an explicit detach do not accumulate dead senders.
pub struct Attachment {
    pub session_id: SessionId,
    pub subscriber_id: SubscriberId,
    pub history: Vec<u8>,
    receiver: broadcast::Receiver<Vec<u8>>,
    dropped_frames: u64,
    session: Weak<TerminalSession>,
}

impl Attachment {
    /// Next output frame, or `None` once the session has closed and the
    /// buffer is drained. Overflow is absorbed by dropping this
    /// subscriber's oldest frames and counted in [`Self::dropped_frames`].
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.recv().await {
                Ok(chunk) => return Some(chunk),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    self.dropped_frames += n;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`Self::recv`].
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.receiver.try_recv() {
                Ok(chunk) => return Some(chunk),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    self.dropped_frames += n;
                }
                Err(_) => return None,
            }
        }
    }

    /// Frames this subscriber lost to overflow.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if let Some(session) = self.session.upgrade() {
            session.detach(self.subscriber_id);
        }
    }
}
