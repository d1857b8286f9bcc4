//! Crucible sandbox - isolated code execution
//!
//! Runs untrusted code snippets behind a common `CodeExecutor` interface
//! with two interchangeable backends: locked-down Docker containers and
//! rlimit-constrained local processes. The `SandboxFactory` picks a backend
//! by policy and caches the engine availability probe.

mod config;
mod container;
mod error;
mod executor;
mod factory;
mod languages;
mod limits;
mod process;
mod seccomp;
mod stats;
mod types;

pub use config::{ContainerConfig, FactoryConfig, ProcessConfig};
pub use container::ContainerSandbox;
pub use error::{KillOutcome, SandboxError};
pub use executor::{CodeExecutor, SandboxKind};
pub use factory::SandboxFactory;
pub use languages::{CommandTemplate, LanguageRegistry, LanguageRunner};
pub use limits::ResourceLimits;
pub use process::ProcessSandbox;
pub use seccomp::SeccompProfile;
pub use types::{
    EngineStatus, ExecutionId, ExecutionRequest, ExecutionResult, ExecutionStatus,
    SandboxCapabilities, SandboxStats,
};
