//! Resource limits applied to sandboxed executions

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits applied to one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes
    pub memory_bytes: u64,

    /// CPU cores (fractional; container backend only enforces fractions,
    /// the process backend rounds up to whole CPU-seconds)
    pub cpu_cores: f64,

    /// Wall-clock timeout
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Maximum number of processes/threads
    pub pids_limit: u64,

    /// Size of the writable /tmp tmpfs inside a container, e.g. "64m"
    pub tmpfs_size: String,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 256 * 1024 * 1024,
            cpu_cores: 0.5,
            timeout: Duration::from_secs(30),
            pids_limit: 100,
            tmpfs_size: "64m".to_string(),
        }
    }
}

impl ResourceLimits {
    /// Wider limits used for compiled languages, where the toolchain itself
    /// needs headroom.
    pub fn compiled() -> Self {
        Self {
            memory_bytes: 512 * 1024 * 1024,
            cpu_cores: 1.0,
            timeout: Duration::from_secs(60),
            pids_limit: 100,
            tmpfs_size: "128m".to_string(),
        }
    }

    /// CPU-seconds for RLIMIT_CPU, rounded up from the wall timeout.
    pub fn cpu_seconds(&self) -> u64 {
        self.timeout.as_secs().max(1)
    }
}
