//! The executor contract implemented by both sandbox backends

use crate::error::{KillOutcome, SandboxError};
use crate::types::{
    ExecutionId, ExecutionRequest, ExecutionResult, SandboxCapabilities, SandboxStats,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which backend a caller wants from the factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxKind {
    /// Container when the engine is reachable, process otherwise
    Auto,
    Container,
    Process,
}

/// Abstract contract each sandbox backend implements.
///
/// Failures of the user's code are reported inside the returned
/// [`ExecutionResult`]; `Err` means the sandbox itself failed.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    /// Run inline code and wait for the terminal result.
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError>;

    /// Run an existing file with arguments. The container backend does not
    /// support this and returns [`SandboxError::FileExecutionUnsupported`].
    async fn execute_file(
        &self,
        path: &Path,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<ExecutionResult, SandboxError>;

    /// Terminate a running execution. Unknown or already-finished ids are
    /// the non-fatal [`KillOutcome::AlreadyFinished`].
    async fn kill(&self, id: ExecutionId) -> Result<KillOutcome, SandboxError>;

    /// Number of currently running executions.
    fn active_executions(&self) -> usize;

    /// What this backend instance can guarantee.
    fn capabilities(&self) -> SandboxCapabilities;

    /// Execution counters.
    fn stats(&self) -> SandboxStats;

    /// Force-release every resource this backend still tracks. Safe to call
    /// when resources are already gone.
    async fn cleanup(&self) -> Result<(), SandboxError>;
}
