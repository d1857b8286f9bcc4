//! End-to-end tests against a live container engine
//!
//! Each test skips itself when no engine is reachable, so the suite stays
//! green on hosts without Docker.

use crate::common::{engine_available, python_request, setup_test_logging};
use crucible_sandbox::{
    ExecutionStatus, FactoryConfig, SandboxError, SandboxFactory, SandboxKind,
};
use std::time::Duration;

#[tokio::test]
async fn container_backend_runs_python() {
    setup_test_logging();
    if !engine_available().await {
        eprintln!("skipping: no container engine");
        return;
    }
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Container).await.unwrap();
    let caps = executor.capabilities();
    assert!(caps.container_isolation);
    assert!(caps.network_isolation);

    let result = executor
        .execute(python_request("print(\"from-container\")"))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(result.stdout.contains("from-container"));
}

#[tokio::test]
async fn container_network_is_unreachable() {
    setup_test_logging();
    if !engine_available().await {
        eprintln!("skipping: no container engine");
        return;
    }
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Container).await.unwrap();

    let code = r#"
import socket
try:
    socket.create_connection(("1.1.1.1", 53), timeout=2)
    print("connected")
except OSError:
    print("unreachable")
"#;
    let result = executor.execute(python_request(code)).await.unwrap();
    assert!(
        result.stdout.contains("unreachable"),
        "network escaped isolation: {}",
        result.stdout
    );
}

#[tokio::test]
async fn container_timeout_is_enforced() {
    setup_test_logging();
    if !engine_available().await {
        eprintln!("skipping: no container engine");
        return;
    }
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Container).await.unwrap();

    let request =
        python_request("import time; time.sleep(60)").with_timeout(Duration::from_secs(2));
    let result = executor.execute(request).await.unwrap();
    assert_eq!(result.status, ExecutionStatus::Timeout);
    assert!(result.timed_out);
    assert_eq!(result.exit_code, 124);
}

#[tokio::test]
async fn container_backend_refuses_file_execution() {
    setup_test_logging();
    if !engine_available().await {
        eprintln!("skipping: no container engine");
        return;
    }
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Container).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("x.py");
    std::fs::write(&script, "print(1)").unwrap();
    let err = executor.execute_file(&script, &[], None).await.unwrap_err();
    assert!(matches!(err, SandboxError::FileExecutionUnsupported));
}

#[tokio::test]
async fn auto_policy_prefers_containers_when_available() {
    setup_test_logging();
    if !engine_available().await {
        eprintln!("skipping: no container engine");
        return;
    }
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Auto).await.unwrap();
    assert!(executor.capabilities().container_isolation);
}
