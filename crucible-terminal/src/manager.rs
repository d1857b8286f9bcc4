//! Shared terminal session registry
//!
//! Owns every live session, enforces the session cap, resolves shells, and
//! sweeps idle or exited sessions on an interval.

use crate::error::TerminalError;
use crate::session::{
    Attachment, SessionId, SessionOptions, SessionSnapshot, SubscriberId, TerminalSession,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalConfig {
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Scrollback retained per session, in bytes
    #[serde(default = "default_history_bytes")]
    pub history_bytes: usize,

    /// Sessions idle past this are swept
    #[serde(default = "default_idle_timeout", with = "humantime_serde")]
    pub idle_timeout: Duration,

    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Frames buffered per subscriber before drop-oldest kicks in
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Shell used when a session does not name one and $SHELL is unset
    pub default_shell: Option<String>,
}

fn default_max_sessions() -> usize {
    128
}
fn default_history_bytes() -> usize {
    128 * 1024
}
fn default_idle_timeout() -> Duration {
    Duration::from_secs(45 * 60)
}
fn default_sweep_interval() -> Duration {
    Duration::from_secs(2 * 60)
}
fn default_subscriber_buffer() -> usize {
    256
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            history_bytes: default_history_bytes(),
            idle_timeout: default_idle_timeout(),
            sweep_interval: default_sweep_interval(),
            subscriber_buffer: default_subscriber_buffer(),
            default_shell: None,
        }
    }
}

pub struct TerminalManager {
    config: TerminalConfig,
    sessions: Arc<RwLock<HashMap<SessionId, Arc<TerminalSession>>>>,
}

impl TerminalManager {
    pub fn new(config: TerminalConfig) -> Self {
        Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Spawn a new shell session. Fails fast at the session cap.
    pub fn create_session(
        &self,
        opts: SessionOptions,
    ) -> Result<SessionSnapshot, TerminalError> {
        {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            if sessions.len() >= self.config.max_sessions {
                return Err(TerminalError::CapacityExceeded {
                    limit: self.config.max_sessions,
                });
            }
        }

        let shell = resolve_shell(
            opts.shell.as_deref(),
            self.config.default_shell.as_deref(),
        )?;
        let work_dir = match &opts.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::temp_dir(),
        };
        std::fs::create_dir_all(&work_dir)?;

        let (session, mut child) = TerminalSession::spawn(
            shell,
            work_dir,
            &opts,
            self.config.history_bytes,
            self.config.subscriber_buffer,
        )?;

        {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            // Cap re-checked under the write lock; creations race.
            if sessions.len() >= self.config.max_sessions {
                session.close();
                // Reap the killed shell so it does not linger as a zombie.
                let _ = child.wait();
                return Err(TerminalError::CapacityExceeded {
                    limit: self.config.max_sessions,
                });
            }
            sessions.insert(session.id, Arc::clone(&session));
        }

        // Reap the shell when it exits on its own; the session then reads
        // as dead until the sweep or an explicit delete removes it.
        let watched = Arc::clone(&session);
        tokio::task::spawn_blocking(move || {
            let code = child.wait().ok().map(|status| status.exit_code());
            tracing::debug!(session_id = %watched.id, ?code, "terminal shell exited");
            watched.mark_exited(code);
        });

        let snapshot = session.snapshot();
        tracing::info!(
            session_id = %snapshot.id,
            shell = %snapshot.shell,
            rows = snapshot.rows,
            cols = snapshot.cols,
            "terminal session created"
        );
        Ok(snapshot)
    }

    fn get(&self, id: SessionId) -> Result<Arc<TerminalSession>, TerminalError> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
            .cloned()
            .ok_or(TerminalError::SessionNotFound(id))
    }

    /// Subscribe to a session's output. The returned attachment carries the
    /// scrollback present at attach time.
    pub fn attach(&self, id: SessionId) -> Result<Attachment, TerminalError> {
        self.get(id)?.attach()
    }

    pub fn detach(&self, id: SessionId, subscriber: SubscriberId) -> Result<(), TerminalError> {
        self.get(id)?.detach(subscriber);
        Ok(())
    }

    pub fn write_input(&self, id: SessionId, data: &[u8]) -> Result<(), TerminalError> {
        self.get(id)?.write(data)
    }

    pub fn resize(&self, id: SessionId, rows: u16, cols: u16) -> Result<(), TerminalError> {
        self.get(id)?.resize(rows, cols)
    }

    pub fn history(&self, id: SessionId) -> Result<Vec<u8>, TerminalError> {
        Ok(self.get(id)?.history_snapshot())
    }

    pub fn snapshot(&self, id: SessionId) -> Result<SessionSnapshot, TerminalError> {
        Ok(self.get(id)?.snapshot())
    }

    /// Exit code of the shell, once it has exited.
    pub fn exit_code(&self, id: SessionId) -> Result<Option<u32>, TerminalError> {
        Ok(self.get(id)?.exit_code())
    }

    pub fn list_sessions(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|s| s.snapshot())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Kill the shell and forget the session. Deleting an id that was
    /// already deleted (or never existed) is `Ok`.
    pub fn delete_session(&self, id: SessionId) -> Result<(), TerminalError> {
        let removed = self
            .sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
        if let Some(session) = removed {
            session.close();
        }
        Ok(())
    }

    /// Close one sweep's worth of idle and dead sessions. Returns how many
    /// were removed; called on an interval by the cleanup task and directly
    /// by tests.
    pub fn sweep(&self) -> usize {
        let expired: Vec<SessionId> = {
            let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
            sessions
                .values()
                .filter(|s| s.is_closed() || s.idle_for() > self.config.idle_timeout)
                .map(|s| s.id)
                .collect()
        };
        for id in &expired {
            tracing::info!(session_id = %id, "sweeping terminal session");
            let _ = self.delete_session(*id);
        }
        expired.len()
    }

    /// Start the periodic idle sweep. The handle stops it; dropping the
    /// handle leaves it running for the life of the process.
    pub fn start_cleanup(self: &Arc<Self>) -> CleanupHandle {
        let cancel = CancellationToken::new();
        let manager = Arc::clone(self);
        let token = cancel.clone();
        let interval = self.config.sweep_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = manager.sweep();
                        if swept > 0 {
                            tracing::debug!(swept, "terminal sweep pass");
                        }
                    }
                    _ = token.cancelled() => break,
                }
            }
        });
        CleanupHandle {
            cancel,
            task: Some(task),
        }
    }

    /// Close every session.
    pub fn shutdown(&self) {
        let drained: Vec<Arc<TerminalSession>> = {
            let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in drained {
            session.close();
        }
    }
}

/// Stops the periodic sweep when asked.
pub struct CleanupHandle {
    cancel: CancellationToken,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl CleanupHandle {
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

/// Resolve a shell request to an existing binary.
///
/// Known names map to conventional paths, absolute paths are taken as-is,
/// and an empty request walks $SHELL, then /bin/bash, then /bin/sh.
fn resolve_shell(
    requested: Option<&str>,
    default_shell: Option<&str>,
) -> Result<String, TerminalError> {
    let requested = requested
        .filter(|s| !s.trim().is_empty())
        .or(default_shell);
    if let Some(name) = requested {
        let path = match name {
            "bash" => "/bin/bash".to_string(),
            "zsh" => first_existing(&["/bin/zsh", "/usr/bin/zsh"])
                .unwrap_or_else(|| "/bin/zsh".to_string()),
            "sh" => "/bin/sh".to_string(),
            custom => custom.to_string(),
        };
        if !Path::new(&path).exists() {
            return Err(TerminalError::ShellNotFound(path));
        }
        return Ok(path);
    }

    if let Ok(shell) = std::env::var("SHELL") {
        if !shell.is_empty() && Path::new(&shell).exists() {
            return Ok(shell);
        }
    }
    first_existing(&["/bin/bash", "/bin/sh"])
        .ok_or_else(|| TerminalError::ShellNotFound("/bin/sh".to_string()))
}

/// Shells installed on this host, as `(name, path)` pairs in preference
/// order. Transports expose this so clients can offer a shell picker.
pub fn available_shells() -> Vec<(String, String)> {
    let candidates = [
        ("bash", &["/bin/bash", "/usr/bin/bash"][..]),
        ("zsh", &["/bin/zsh", "/usr/bin/zsh"][..]),
        ("fish", &["/usr/bin/fish", "/usr/local/bin/fish"][..]),
        ("sh", &["/bin/sh"][..]),
    ];
    candidates
        .iter()
        .filter_map(|(name, paths)| {
            first_existing(paths).map(|path| (name.to_string(), path))
        })
        .collect()
}

fn first_existing(candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|p| PathBuf::from(p).exists())
        .map(|p| p.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn manager() -> Arc<TerminalManager> {
        Arc::new(TerminalManager::new(TerminalConfig {
            default_shell: Some("sh".to_string()),
            ..Default::default()
        }))
    }

    async fn read_until(
        attachment: &mut Attachment,
        needle: &[u8],
        timeout: Duration,
    ) -> Vec<u8> {
        let deadline = Instant::now() + timeout;
        let mut collected = attachment.history.clone();
        while Instant::now() < deadline {
            if collected
                .windows(needle.len())
                .any(|window| window == needle)
            {
                return collected;
            }
            match tokio::time::timeout(Duration::from_millis(200), attachment.recv()).await {
                Ok(Some(chunk)) => collected.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        collected
    }

    #[tokio::test]
    async fn session_lifecycle_echoes_through_pty() {
        let manager = manager();
        let snapshot = manager
            .create_session(SessionOptions::default())
            .expect("create session");
        assert!(snapshot.alive);
        assert_eq!(snapshot.rows, 24);

        let mut attachment = manager.attach(snapshot.id).unwrap();
        manager
            .write_input(snapshot.id, b"echo crucible-marker\n")
            .unwrap();
        let output = read_until(
            &mut attachment,
            b"crucible-marker",
            Duration::from_secs(5),
        )
        .await;
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("crucible-marker"), "got: {text}");

        manager.resize(snapshot.id, 40, 120).unwrap();
        assert_eq!(manager.snapshot(snapshot.id).unwrap().rows, 40);

        let history = manager.history(snapshot.id).unwrap();
        assert!(!history.is_empty());

        manager.delete_session(snapshot.id).unwrap();
        assert!(matches!(
            manager.snapshot(snapshot.id),
            Err(TerminalError::SessionNotFound(_))
        ));
        // second delete is still fine
        manager.delete_session(snapshot.id).unwrap();
    }

    #[tokio::test]
    async fn dropped_attachment_releases_its_slot() {
        let manager = manager();
        let session = manager.create_session(SessionOptions::default()).unwrap();
        {
            let _attachment = manager.attach(session.id).unwrap();
            assert_eq!(manager.snapshot(session.id).unwrap().subscribers, 1);
        }
        // no explicit detach; the drop reclaimed the slot
        assert_eq!(manager.snapshot(session.id).unwrap().subscribers, 0);
        manager.shutdown();
    }

    #[test]
    fn shell_discovery_lists_sh() {
        let shells = available_shells();
        // /bin/sh exists on any host these tests run on
        assert!(shells.iter().any(|(name, path)| name == "sh" && path == "/bin/sh"));
    }

    #[tokio::test]
    async fn capacity_limit_fails_fast() {
        let manager = Arc::new(TerminalManager::new(TerminalConfig {
            max_sessions: 1,
            default_shell: Some("sh".to_string()),
            ..Default::default()
        }));
        let first = manager.create_session(SessionOptions::default()).unwrap();
        let err = manager
            .create_session(SessionOptions::default())
            .unwrap_err();
        assert!(matches!(err, TerminalError::CapacityExceeded { limit: 1 }));
        manager.delete_session(first.id).unwrap();
        manager.create_session(SessionOptions::default()).unwrap();
        manager.shutdown();
    }

    #[tokio::test]
    async fn idle_sessions_are_swept() {
        let manager = Arc::new(TerminalManager::new(TerminalConfig {
            idle_timeout: Duration::from_millis(50),
            default_shell: Some("sh".to_string()),
            ..Default::default()
        }));
        let snapshot = manager.create_session(SessionOptions::default()).unwrap();
        // let shell startup output settle past the idle threshold
        tokio::time::sleep(Duration::from_millis(400)).await;
        let swept = manager.sweep();
        assert!(swept >= 1, "expected the idle session to be swept");
        assert!(matches!(
            manager.snapshot(snapshot.id),
            Err(TerminalError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn exited_shell_reads_as_dead_and_gets_reaped() {
        let manager = manager();
        let snapshot = manager.create_session(SessionOptions::default()).unwrap();
        manager.write_input(snapshot.id, b"exit 7\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if !manager.snapshot(snapshot.id).map(|s| s.alive).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(manager.exit_code(snapshot.id).unwrap(), Some(7));
        assert_eq!(manager.sweep(), 1);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn cleanup_handle_stops_cleanly() {
        let manager = manager();
        let handle = manager.start_cleanup();
        handle.stop().await;
    }

    #[test]
    fn unknown_shell_is_rejected() {
        let err = resolve_shell(Some("/no/such/shell"), None).unwrap_err();
        assert!(matches!(err, TerminalError::ShellNotFound(_)));
    }

    #[test]
    fn named_shells_resolve_to_paths() {
        assert_eq!(resolve_shell(Some("sh"), None).unwrap(), "/bin/sh");
        let empty = resolve_shell(None, None).unwrap();
        assert!(empty.starts_with('/'));
    }

    #[tokio::test]
    async fn detach_drops_the_subscriber_slot() {
        let manager = manager();
        let snapshot = manager.create_session(SessionOptions::default()).unwrap();
        let attachment = manager.attach(snapshot.id).unwrap();
        assert_eq!(manager.snapshot(snapshot.id).unwrap().subscribers, 1);
        manager
            .detach(snapshot.id, attachment.subscriber_id)
            .unwrap();
        assert_eq!(manager.snapshot(snapshot.id).unwrap().subscribers, 0);
        manager.shutdown();
    }
}
