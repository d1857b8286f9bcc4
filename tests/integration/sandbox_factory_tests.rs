//! Factory + process backend integration tests

use crate::common::{python_request, setup_test_logging};
use crucible_sandbox::{
    ExecutionRequest, ExecutionStatus, FactoryConfig, SandboxError, SandboxFactory, SandboxKind,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn process_backend_runs_python_end_to_end() {
    setup_test_logging();
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Process).await.unwrap();

    let result = executor
        .execute(python_request("print(\"end-to-end\")"))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Completed);
    assert!(result.success());
    assert!(result.stdout.contains("end-to-end"));
    assert_eq!(executor.active_executions(), 0);

    let stats = executor.stats();
    assert_eq!(stats.total_executions, 1);
    assert_eq!(stats.successful_executions, 1);
}

#[tokio::test]
async fn environment_overrides_reach_the_program() {
    setup_test_logging();
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Process).await.unwrap();

    let request = ExecutionRequest::new(
        "python",
        "import os; print(os.environ.get(\"GREETING\", \"missing\"))",
    )
    .with_env("GREETING", "salve");
    let result = executor.execute(request).await.unwrap();
    assert!(result.stdout.contains("salve"));
    // the parent env must not leak through env_clear
    let request = ExecutionRequest::new(
        "python",
        "import os; print(\"leaked\" if \"CARGO\" in os.environ else \"clean\")",
    );
    let result = executor.execute(request).await.unwrap();
    assert!(result.stdout.contains("clean"));
}

#[tokio::test]
async fn cleanup_terminates_inflight_executions() {
    setup_test_logging();
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Process).await.unwrap();

    let running = {
        let executor = Arc::clone(&executor);
        tokio::spawn(async move {
            executor
                .execute(python_request("import time; time.sleep(30)"))
                .await
        })
    };
    // wait for the execution to register
    for _ in 0..100 {
        if executor.active_executions() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(executor.active_executions(), 1);

    executor.cleanup().await.unwrap();
    let result = running.await.unwrap().unwrap();
    assert_eq!(result.status, ExecutionStatus::Killed);
    assert!(result.killed);
    assert_eq!(result.exit_code, 137);
    assert_eq!(executor.active_executions(), 0);
}

#[tokio::test]
async fn compile_failure_is_reported_not_errored() {
    setup_test_logging();
    let factory = SandboxFactory::new(FactoryConfig::default());
    let executor = factory.get_executor(SandboxKind::Process).await.unwrap();

    // only meaningful where a C toolchain exists; gcc is part of the
    // standard build image
    if !std::path::Path::new("/usr/bin/gcc").exists() {
        eprintln!("skipping: gcc not installed");
        return;
    }
    let result = executor
        .execute(ExecutionRequest::new("c", "int main( { return 0; }"))
        .await
        .unwrap();
    assert_eq!(result.status, ExecutionStatus::Failed);
    assert!(result.compile_error.is_some());
}

#[tokio::test]
async fn disabled_engine_rejects_requests() {
    setup_test_logging();
    let factory = SandboxFactory::new(FactoryConfig {
        disable_execution: true,
        ..Default::default()
    });
    assert!(matches!(
        factory.get_executor(SandboxKind::Auto).await,
        Err(SandboxError::ExecutionDisabled)
    ));
}
