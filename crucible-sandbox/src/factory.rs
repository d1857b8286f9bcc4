//! Backend selection
//!
//! Chooses between the container and process backends according to policy:
//! `Auto` prefers containers and falls back to processes when the engine is
//! unreachable, `Container` is strict, `Process` skips the engine entirely.
//! Backends are built once and shared, so every handle from `get_executor`
//! sees the same execution tracking, and factory-level stats and cleanup
//! cover everything the factory handed out. The engine probe result is
//! cached until `refresh_engine_status` is called.

use crate::config::FactoryConfig;
use crate::container::{probe_engine, ContainerSandbox};
use crate::error::SandboxError;
use crate::executor::{CodeExecutor, SandboxKind};
use crate::languages::LanguageRegistry;
use crate::process::ProcessSandbox;
use crate::types::{
    EngineStatus, ExecutionRequest, ExecutionResult, SandboxCapabilities, SandboxStats,
};
use bollard::Docker;
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct SandboxFactory {
    config: FactoryConfig,
    registry: Arc<LanguageRegistry>,
    engine: RwLock<Option<EngineStatus>>,
    process: RwLock<Option<Arc<ProcessSandbox>>>,
    container: RwLock<Option<Arc<ContainerSandbox>>>,
}

impl SandboxFactory {
    pub fn new(config: FactoryConfig) -> Self {
        Self::with_registry(config, LanguageRegistry::builtin())
    }

    pub fn with_registry(config: FactoryConfig, registry: Arc<LanguageRegistry>) -> Self {
        Self {
            config,
            registry,
            engine: RwLock::new(None),
            process: RwLock::new(None),
            container: RwLock::new(None),
        }
    }

    /// Probe the container engine on first call; later calls return the
    /// cached status until `refresh_engine_status` invalidates it.
    pub async fn engine_status(&self) -> EngineStatus {
        if let Some(status) = self.engine.read().await.clone() {
            return status;
        }
        let mut cached = self.engine.write().await;
        // Another caller may have probed while we waited for the write lock.
        if let Some(status) = cached.clone() {
            return status;
        }
        let status = probe_once().await;
        *cached = Some(status.clone());
        status
    }

    /// Discard the cached probe and ask the engine again. Lets callers pick
    /// up a daemon that started (or died) after the factory was built.
    pub async fn refresh_engine_status(&self) -> EngineStatus {
        let status = probe_once().await;
        *self.engine.write().await = Some(status.clone());
        status
    }

    pub async fn is_container_available(&self) -> bool {
        self.engine_status().await.available
    }

    /// Hand out the executor for the requested backend policy. Repeated
    /// calls for the same backend share one instance.
    pub async fn get_executor(
        &self,
        kind: SandboxKind,
    ) -> Result<Arc<dyn CodeExecutor>, SandboxError> {
        if self.config.disable_execution {
            return Err(SandboxError::ExecutionDisabled);
        }

        match kind {
            SandboxKind::Process => {
                if self.config.force_container {
                    return Err(SandboxError::ContainerRequiredButUnavailable(
                        "process backend requested but containers are required".to_string(),
                    ));
                }
                tracing::info!("using process sandbox backend");
                Ok(self.process_backend().await?)
            }
            SandboxKind::Container => match self.container_backend().await {
                Ok(sandbox) => Ok(sandbox),
                Err(SandboxError::Unavailable(reason)) => {
                    Err(SandboxError::ContainerRequiredButUnavailable(reason))
                }
                Err(e) => Err(e),
            },
            SandboxKind::Auto => match self.container_backend().await {
                Ok(sandbox) => {
                    tracing::info!("using container sandbox backend");
                    Ok(sandbox)
                }
                Err(SandboxError::Unavailable(reason)) => {
                    if self.config.force_container {
                        return Err(SandboxError::ContainerRequiredButUnavailable(reason));
                    }
                    tracing::warn!(
                        %reason,
                        "container engine unavailable, falling back to process backend"
                    );
                    Ok(self.process_backend().await?)
                }
                Err(e) => Err(e),
            },
        }
    }

    /// One-shot execute under the `Auto` policy.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, SandboxError> {
        let executor = self.get_executor(SandboxKind::Auto).await?;
        executor.execute(request).await
    }

    /// What the backend the `Auto` policy would pick can guarantee.
    pub async fn capabilities(&self) -> Result<SandboxCapabilities, SandboxError> {
        Ok(self.get_executor(SandboxKind::Auto).await?.capabilities())
    }

    /// Counters aggregated across every backend this factory has built.
    pub async fn stats(&self) -> SandboxStats {
        let mut stats = SandboxStats::default();
        if let Some(container) = self.container.read().await.clone() {
            stats.merge(&container.stats());
        }
        if let Some(process) = self.process.read().await.clone() {
            stats.merge(&process.stats());
        }
        stats
    }

    /// Kill every tracked execution and remove leftover containers, across
    /// every backend this factory has built. Safe when nothing is running.
    pub async fn cleanup(&self) -> Result<(), SandboxError> {
        let container = self.container.read().await.clone();
        if let Some(container) = container {
            container.cleanup().await?;
        }
        let process = self.process.read().await.clone();
        if let Some(process) = process {
            process.cleanup().await?;
        }
        Ok(())
    }

    async fn container_backend(&self) -> Result<Arc<ContainerSandbox>, SandboxError> {
        if let Some(sandbox) = self.container.read().await.clone() {
            return Ok(sandbox);
        }
        let status = self.engine_status().await;
        if !status.available {
            return Err(SandboxError::Unavailable(
                status.error.unwrap_or_else(|| "engine probe failed".to_string()),
            ));
        }
        let mut slot = self.container.write().await;
        if let Some(sandbox) = slot.clone() {
            return Ok(sandbox);
        }
        let sandbox = Arc::new(
            ContainerSandbox::connect(self.config.container.clone(), Arc::clone(&self.registry))
                .await?,
        );
        *slot = Some(Arc::clone(&sandbox));
        Ok(sandbox)
    }

    async fn process_backend(&self) -> Result<Arc<ProcessSandbox>, SandboxError> {
        if let Some(sandbox) = self.process.read().await.clone() {
            return Ok(sandbox);
        }
        let mut slot = self.process.write().await;
        if let Some(sandbox) = slot.clone() {
            return Ok(sandbox);
        }
        let sandbox = Arc::new(ProcessSandbox::new(
            self.config.process.clone(),
            Arc::clone(&self.registry),
        )?);
        *slot = Some(Arc::clone(&sandbox));
        Ok(sandbox)
    }
}

async fn probe_once() -> EngineStatus {
    match Docker::connect_with_local_defaults() {
        Ok(docker) => probe_engine(&docker).await,
        Err(e) => EngineStatus {
            available: false,
            version: None,
            api_version: None,
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExecutionStatus;
    use std::time::Duration;

    #[tokio::test]
    async fn disabled_execution_rejects_every_backend() {
        let factory = SandboxFactory::new(FactoryConfig {
            disable_execution: true,
            ..Default::default()
        });
        for kind in [SandboxKind::Auto, SandboxKind::Container, SandboxKind::Process] {
            assert!(matches!(
                factory.get_executor(kind).await,
                Err(SandboxError::ExecutionDisabled)
            ));
        }
    }

    #[tokio::test]
    async fn process_backend_always_builds() {
        let factory = SandboxFactory::new(FactoryConfig::default());
        let sandbox = factory.get_executor(SandboxKind::Process).await.unwrap();
        assert!(!sandbox.capabilities().container_isolation);
        assert_eq!(sandbox.active_executions(), 0);
    }

    #[tokio::test]
    async fn force_container_refuses_process_backend() {
        let factory = SandboxFactory::new(FactoryConfig {
            force_container: true,
            ..Default::default()
        });
        assert!(matches!(
            factory.get_executor(SandboxKind::Process).await,
            Err(SandboxError::ContainerRequiredButUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn engine_status_is_cached_until_refreshed() {
        let factory = SandboxFactory::new(FactoryConfig::default());
        let first = factory.engine_status().await;
        let second = factory.engine_status().await;
        assert_eq!(first.available, second.available);
        let refreshed = factory.refresh_engine_status().await;
        assert_eq!(refreshed.available, factory.is_container_available().await);
    }

    #[tokio::test]
    async fn executor_handles_share_one_backend() {
        let factory = SandboxFactory::new(FactoryConfig::default());
        let first = factory.get_executor(SandboxKind::Process).await.unwrap();
        let second = factory.get_executor(SandboxKind::Process).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // An execution started through one handle is visible to the other
        // and to factory-level cleanup.
        let running = {
            let first = Arc::clone(&first);
            tokio::spawn(async move {
                first
                    .execute(ExecutionRequest::new(
                        "python",
                        "import time; time.sleep(30)",
                    ))
                    .await
            })
        };
        for _ in 0..100 {
            if second.active_executions() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(second.active_executions(), 1);

        factory.cleanup().await.unwrap();
        let result = running.await.unwrap().unwrap();
        assert_eq!(result.status, ExecutionStatus::Killed);
        assert_eq!(second.active_executions(), 0);
    }

    #[tokio::test]
    async fn factory_stats_aggregate_built_backends() {
        let factory = SandboxFactory::new(FactoryConfig::default());
        assert_eq!(factory.stats().await.total_executions, 0);

        let executor = factory.get_executor(SandboxKind::Process).await.unwrap();
        let result = executor
            .execute(ExecutionRequest::new("python", "print(\"counted\")"))
            .await
            .unwrap();
        assert!(result.success());

        let stats = factory.stats().await;
        assert_eq!(stats.total_executions, 1);
        assert_eq!(stats.successful_executions, 1);
    }
}
