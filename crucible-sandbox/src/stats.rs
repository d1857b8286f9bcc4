//! Atomic execution counters shared by both backends

use crate::types::{ExecutionStatus, SandboxStats};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    timeout: AtomicU64,
    killed: AtomicU64,
    concurrent: AtomicUsize,
    max_concurrent: AtomicUsize,
    total_run_ms: AtomicU64,
}

impl StatsRecorder {
    /// Mark one execution as started; returns the new concurrency level.
    pub fn enter(&self) -> usize {
        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);
        current
    }

    pub fn exit(&self) {
        self.concurrent.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record(&self, status: ExecutionStatus, duration: Duration) {
        self.total.fetch_add(1, Ordering::SeqCst);
        self.total_run_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
        let counter = match status {
            ExecutionStatus::Completed => &self.successful,
            ExecutionStatus::Timeout => &self.timeout,
            ExecutionStatus::Killed => &self.killed,
            _ => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> SandboxStats {
        SandboxStats {
            total_executions: self.total.load(Ordering::SeqCst),
            successful_executions: self.successful.load(Ordering::SeqCst),
            failed_executions: self.failed.load(Ordering::SeqCst),
            timeout_executions: self.timeout.load(Ordering::SeqCst),
            killed_executions: self.killed.load(Ordering::SeqCst),
            concurrent_executions: self.concurrent.load(Ordering::SeqCst),
            max_concurrent_executions: self.max_concurrent.load(Ordering::SeqCst),
            total_run_time_ms: self.total_run_ms.load(Ordering::SeqCst),
        }
    }
}
