//! Shared helpers for integration tests

use crucible_sandbox::{ExecutionRequest, FactoryConfig, SandboxFactory};
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize tracing once per test binary; respects RUST_LOG.
pub fn setup_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// A minimal python request; python3 is assumed present on test hosts.
pub fn python_request(code: &str) -> ExecutionRequest {
    ExecutionRequest::new("python", code)
}

/// Whether a container engine is reachable. Container tests skip
/// themselves when it is not.
pub async fn engine_available() -> bool {
    SandboxFactory::new(FactoryConfig::default())
        .engine_status()
        .await
        .available
}
