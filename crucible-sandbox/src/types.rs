//! Core types for sandbox execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Unique execution identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub uuid::Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Short prefix used in container and scratch-directory names.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..12].to_string()
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request to execute code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// Language identifier or alias ("python", "py", "c++", ...)
    pub language: String,

    /// The code to execute
    pub code: String,

    /// Optional stdin input
    pub stdin: Option<String>,

    /// Wall-clock timeout override (None = backend default)
    #[serde(default, with = "humantime_serde::option")]
    pub timeout: Option<Duration>,

    /// Environment overrides applied on top of the sanitized base env
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory override (process backend only)
    pub working_dir: Option<PathBuf>,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            stdin: None,
            timeout: None,
            env: HashMap::new(),
            working_dir: None,
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Terminal state of one execution call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Killed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

/// Result of one code execution.
///
/// Finalized exactly once and handed to the caller by value; callers that
/// cache a result must copy before mutating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: ExecutionId,
    pub status: ExecutionStatus,

    /// Captured stdout, capped at the configured byte limit
    pub stdout: String,
    /// Captured stderr, capped at the configured byte limit
    pub stderr: String,
    /// True when the cap cut the stream short
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,

    pub exit_code: i32,

    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Peak resident set in bytes, where rusage is obtainable (process backend)
    pub memory_used_bytes: u64,
    /// User + system CPU time in milliseconds, where obtainable
    pub cpu_time_ms: u64,

    pub timed_out: bool,
    pub killed: bool,

    /// Compiler diagnostics when the compile step failed; UIs render this
    /// differently from a runtime failure
    pub compile_error: Option<String>,

    pub language: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ExecutionResult {
    /// Fresh result in the running state, created at call start.
    pub fn started(id: ExecutionId, language: &str) -> Self {
        Self {
            id,
            status: ExecutionStatus::Running,
            stdout: String::new(),
            stderr: String::new(),
            stdout_truncated: false,
            stderr_truncated: false,
            exit_code: 0,
            duration: Duration::ZERO,
            memory_used_bytes: 0,
            cpu_time_ms: 0,
            timed_out: false,
            killed: false,
            compile_error: None,
            language: language.to_string(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == ExecutionStatus::Completed && self.exit_code == 0
    }
}

/// What a given backend instance can guarantee.
///
/// UIs use this to warn users when the weaker process backend is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxCapabilities {
    pub container_isolation: bool,
    pub network_isolation: bool,
    pub seccomp_enabled: bool,
    pub read_only_root: bool,
    pub resource_limits: bool,
    pub supported_languages: Vec<String>,
}

/// Result of the container engine availability probe
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStatus {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Execution counters for one backend
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub timeout_executions: u64,
    pub killed_executions: u64,
    pub concurrent_executions: usize,
    pub max_concurrent_executions: usize,
    /// Cumulative wall time spent running user code, in milliseconds
    pub total_run_time_ms: u64,
}

impl SandboxStats {
    /// Fold another backend's counters into this one. Peaks are tracked per
    /// backend, so the merged peak is the larger of the two.
    pub fn merge(&mut self, other: &SandboxStats) {
        self.total_executions += other.total_executions;
        self.successful_executions += other.successful_executions;
        self.failed_executions += other.failed_executions;
        self.timeout_executions += other.timeout_executions;
        self.killed_executions += other.killed_executions;
        self.concurrent_executions += other.concurrent_executions;
        self.max_concurrent_executions =
            self.max_concurrent_executions.max(other.max_concurrent_executions);
        self.total_run_time_ms += other.total_run_time_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_builder_sets_fields() {
        let req = ExecutionRequest::new("python", "print(1)")
            .with_stdin("42\n")
            .with_timeout(Duration::from_secs(5))
            .with_env("FOO", "bar");
        assert_eq!(req.language, "python");
        assert_eq!(req.stdin.as_deref(), Some("42\n"));
        assert_eq!(req.timeout, Some(Duration::from_secs(5)));
        assert_eq!(req.env.get("FOO").map(String::as_str), Some("bar"));
    }

    #[test]
    fn started_result_is_running() {
        let res = ExecutionResult::started(ExecutionId::new(), "go");
        assert_eq!(res.status, ExecutionStatus::Running);
        assert!(!res.status.is_terminal());
        assert!(res.completed_at.is_none());
    }

    #[test]
    fn short_id_is_twelve_chars() {
        assert_eq!(ExecutionId::new().short().len(), 12);
    }
}
