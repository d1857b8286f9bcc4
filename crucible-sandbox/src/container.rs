//! Container-based sandbox backend
//!
//! Each execution gets a dedicated, locked-down container: no network,
//! all capabilities dropped, no-new-privileges, optional read-only root
//! with a tmpfs /tmp, a seccomp allowlist, and cgroup memory/cpu/pids
//! limits. Source code reaches the container through a per-execution
//! scratch directory bind-mounted read-only at /work; containers are
//! force-removed after log collection on every exit path.

use crate::config::ContainerConfig;
use crate::error::{KillOutcome, SandboxError};
use crate::executor::CodeExecutor;
use crate::languages::{LanguageRegistry, LanguageRunner};
use crate::limits::ResourceLimits;
use crate::seccomp::SeccompProfile;
use crate::stats::StatsRecorder;
use crate::types::{
    EngineStatus, ExecutionId, ExecutionRequest, ExecutionResult, ExecutionStatus,
    SandboxCapabilities, SandboxStats,
};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions, WaitContainerOptions,
};
use bollard::Docker;
use chrono::Utc;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Mount point of the per-execution scratch directory inside the container.
const WORK_DIR: &str = "/work";
const STDIN_FILE: &str = ".stdin";

const EXIT_TIMEOUT: i32 = 124;
const EXIT_KILLED: i32 = 137;

struct RunningContainer {
    container_id: String,
    cancel: CancellationToken,
}

/// Docker-backed code executor
pub struct ContainerSandbox {
    docker: Docker,
    config: ContainerConfig,
    registry: Arc<LanguageRegistry>,
    engine: EngineStatus,
    seccomp_json: Option<String>,
    executions: Arc<Mutex<HashMap<ExecutionId, RunningContainer>>>,
    capacity: Arc<Semaphore>,
    stats: Arc<StatsRecorder>,
}

impl ContainerSandbox {
    /// Connect to the local engine and verify it responds. Fails with
    /// `Unavailable` when the daemon cannot be reached, so the factory can
    /// fall back.
    pub async fn connect(
        config: ContainerConfig,
        registry: Arc<LanguageRegistry>,
    ) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::Unavailable(e.to_string()))?;
        let engine = probe_engine(&docker).await;
        if !engine.available {
            return Err(SandboxError::Unavailable(
                engine.error.unwrap_or_else(|| "engine probe failed".to_string()),
            ));
        }

        std::fs::create_dir_all(&config.scratch_dir)?;
        let seccomp_json = if config.enable_seccomp {
            let json = SeccompProfile::restrictive()
                .to_json()
                .map_err(|e| SandboxError::Internal(format!("seccomp profile: {e}")))?;
            Some(json)
        } else {
            None
        };

        tracing::info!(
            version = engine.version.as_deref().unwrap_or("unknown"),
            api_version = engine.api_version.as_deref().unwrap_or("unknown"),
            seccomp = config.enable_seccomp,
            network = config.enable_network,
            "container engine connected"
        );

        let capacity = Arc::new(Semaphore::new(config.max_concurrent));
        Ok(Self {
            docker,
            config,
            registry,
            engine,
            seccomp_json,
            executions: Arc::new(Mutex::new(HashMap::new())),
            capacity,
            stats: Arc::new(StatsRecorder::default()),
        })
    }

    pub fn engine_status(&self) -> &EngineStatus {
        &self.engine
    }

    fn host_config(&self, runner: &LanguageRunner, limits: &ResourceLimits, scratch: &Path) -> HostConfig {
        let mut security_opt = vec!["no-new-privileges:true".to_string()];
        if let Some(json) = &self.seccomp_json {
            security_opt.push(format!("seccomp={json}"));
        }

        // Compiled languages write their binary to /tmp, so that mount must
        // stay executable for them.
        let tmp_opts = if runner.needs_executable_tmp {
            format!("rw,exec,nosuid,size={}", limits.tmpfs_size)
        } else {
            format!("rw,noexec,nosuid,size={}", limits.tmpfs_size)
        };
        let mut tmpfs = HashMap::new();
        tmpfs.insert("/tmp".to_string(), tmp_opts);

        HostConfig {
            // Source and stdin are written host-side before start; the
            // container never needs to write /work.
            binds: Some(vec![format!("{}:{}:ro", scratch.display(), WORK_DIR)]),
            memory: Some(limits.memory_bytes as i64),
            // Same value as memory: no swap headroom.
            memory_swap: Some(limits.memory_bytes as i64),
            nano_cpus: Some((limits.cpu_cores * 1_000_000_000.0) as i64),
            pids_limit: Some(limits.pids_limit as i64),
            network_mode: Some(if self.config.enable_network {
                "bridge".to_string()
            } else {
                "none".to_string()
            }),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(security_opt),
            readonly_rootfs: Some(self.config.read_only_root),
            tmpfs: Some(tmpfs),
            ..Default::default()
        }
    }

    /// Build the command run inside the container, redirecting stdin from
    /// the scratch-mounted `.stdin` file when input was provided.
    fn container_command(runner: &LanguageRunner, file: &str, with_stdin: bool) -> Vec<String> {
        let rendered: Vec<String> = runner
            .container_command
            .iter()
            .map(|a| a.replace("{file}", file))
            .collect();
        if !with_stdin {
            return rendered;
        }
        let script = match rendered.as_slice() {
            [sh, flag, body] if sh == "sh" && flag == "-c" => body.clone(),
            _ => rendered
                .iter()
                .map(|a| shell_quote(a))
                .collect::<Vec<_>>()
                .join(" "),
        };
        vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("{script} < {WORK_DIR}/{STDIN_FILE}"),
        ]
    }

    /// Collect stdout/stderr from the finished container, capped per stream.
    async fn collect_logs(&self, container_id: &str) -> (String, bool, String, bool) {
        let cap = self.config.max_output_bytes;
        let mut stream = self.docker.logs(
            container_id,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        );
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut stdout_truncated = false;
        let mut stderr_truncated = false;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message }) => {
                    append_capped(&mut stdout, &message, cap, &mut stdout_truncated)
                }
                Ok(LogOutput::StdErr { message }) => {
                    append_capped(&mut stderr, &message, cap, &mut stderr_truncated)
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(container_id, error = %e, "log collection interrupted");
                    break;
                }
            }
        }
        (
            String::from_utf8_lossy(&stdout).into_owned(),
            stdout_truncated,
            String::from_utf8_lossy(&stderr).into_owned(),
            stderr_truncated,
        )
    }

    async fn stop_container(&self, container_id: &str) {
        let grace = self.config.stop_grace.as_secs() as i32;
        if let Err(e) = self
            .docker
            .stop_container(
                container_id,
                Some(StopContainerOptions {
                    t: Some(grace),
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::debug!(container_id, error = %e, "stop_container failed");
        }
    }

    async fn remove_container_quiet(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            tracing::debug!(container_id, error = %e, "remove_container failed");
        }
    }

    async fn run_container(
        &self,
        id: ExecutionId,
        runner: &LanguageRunner,
        scratch: &TempDir,
        cmd: Vec<String>,
        env: Vec<String>,
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult, SandboxError> {
        let mut result = ExecutionResult::started(id, &runner.id);
        let started = Instant::now();

        let name = format!("{}-{}", self.config.name_prefix, id.short());
        // Toolchain caches need a writable home even with a read-only root.
        let mut full_env = vec![
            "HOME=/tmp".to_string(),
            "TMPDIR=/tmp".to_string(),
            "GOCACHE=/tmp/.gocache".to_string(),
        ];
        full_env.extend(env);
        let body = ContainerCreateBody {
            image: Some(runner.image.clone()),
            cmd: Some(cmd),
            env: Some(full_env),
            user: self.config.run_as_user.clone(),
            working_dir: Some(WORK_DIR.to_string()),
            host_config: Some(self.host_config(runner, limits, scratch.path())),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(name),
                    ..Default::default()
                }),
                body,
            )
            .await?;
        let container_id = created.id.clone();

        let cancel = CancellationToken::new();
        // Lock fully scoped before the removal await below.
        let duplicate = {
            let mut executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
            if executions.contains_key(&id) {
                true
            } else {
                executions.insert(
                    id,
                    RunningContainer {
                        container_id: container_id.clone(),
                        cancel: cancel.clone(),
                    },
                );
                false
            }
        };
        if duplicate {
            self.remove_container_quiet(&container_id).await;
            return Err(SandboxError::DuplicateExecution(id));
        }
        let _guard = ExecutionGuard {
            id,
            executions: Arc::clone(&self.executions),
        };

        self.stats.enter();
        let outcome = self
            .supervise_container(&container_id, limits.timeout, &cancel)
            .await;
        self.stats.exit();

        let (stdout, stdout_truncated, stderr, stderr_truncated) =
            self.collect_logs(&container_id).await;
        result.stdout = stdout;
        result.stderr = stderr;
        result.stdout_truncated = stdout_truncated;
        result.stderr_truncated = stderr_truncated;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.remove_container_quiet(&container_id).await;
                return Err(e);
            }
        };
        match outcome {
            ContainerOutcome::Exited(code) => {
                let status = match code {
                    0 => ExecutionStatus::Completed,
                    // cgroup OOM kill surfaces as 137 without our stop call
                    137 => ExecutionStatus::Killed,
                    _ => ExecutionStatus::Failed,
                };
                result.status = status;
                result.exit_code = code as i32;
                result.killed = status == ExecutionStatus::Killed;
                if status == ExecutionStatus::Killed {
                    result.stderr.push_str("\nprocess killed (memory limit exceeded?)");
                }
            }
            ContainerOutcome::Deadline => {
                self.stop_container(&container_id).await;
                result.status = ExecutionStatus::Timeout;
                result.exit_code = EXIT_TIMEOUT;
                result.timed_out = true;
            }
            ContainerOutcome::Killed => {
                self.stop_container(&container_id).await;
                result.status = ExecutionStatus::Killed;
                result.exit_code = EXIT_KILLED;
                result.killed = true;
            }
        }
        self.remove_container_quiet(&container_id).await;

        result.duration = started.elapsed();
        result.completed_at = Some(Utc::now());

        self.stats.record(result.status, result.duration);
        tracing::info!(
            execution_id = %id,
            language = %runner.id,
            status = ?result.status,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "container execution finished"
        );
        Ok(result)
    }

    async fn supervise_container(
        &self,
        container_id: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<ContainerOutcome, SandboxError> {
        self.docker
            .start_container(container_id, None::<StartContainerOptions>)
            .await?;

        let mut wait = self
            .docker
            .wait_container(container_id, None::<WaitContainerOptions>);
        tokio::select! {
            exited = wait.next() => match exited {
                Some(Ok(response)) => Ok(ContainerOutcome::Exited(response.status_code)),
                // The engine can report a non-zero exit as a stream error
                // carrying the status code.
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    Ok(ContainerOutcome::Exited(code))
                }
                Some(Err(e)) => Err(SandboxError::Engine(e)),
                None => Err(SandboxError::Internal(
                    "container wait stream ended without a status".to_string(),
                )),
            },
            _ = tokio::time::sleep(timeout) => Ok(ContainerOutcome::Deadline),
            _ = cancel.cancelled() => Ok(ContainerOutcome::Killed),
        }
    }
}

#[async_trait]
impl CodeExecutor for ContainerSandbox {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        let runner = self.registry.get(&request.language)?;
        let _permit = self
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| SandboxError::CapacityExceeded {
                limit: self.config.max_concurrent,
            })?;

        let id = ExecutionId::new();
        let scratch = tempfile::Builder::new()
            .prefix(&format!("exec-{}-", id.short()))
            .tempdir_in(&self.config.scratch_dir)?;

        let file_name = runner.file_name(&request.code);
        tokio::fs::write(
            scratch.path().join(&file_name),
            runner.scaffold(&request.code),
        )
        .await?;

        let with_stdin = request.stdin.is_some();
        if let Some(stdin) = &request.stdin {
            tokio::fs::write(scratch.path().join(STDIN_FILE), stdin).await?;
        }

        let mut limits = self.config.limits_for(&runner.id);
        if let Some(timeout) = request.timeout {
            limits.timeout = timeout;
        }

        let file_in_container = format!("{WORK_DIR}/{file_name}");
        let cmd = Self::container_command(&runner, &file_in_container, with_stdin);
        let env = request
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();

        self.run_container(id, &runner, &scratch, cmd, env, &limits)
            .await
    }

    async fn execute_file(
        &self,
        _path: &Path,
        _args: &[String],
        _stdin: Option<String>,
    ) -> Result<ExecutionResult, SandboxError> {
        // Arbitrary host paths are not bind-mounted into sandbox containers.
        Err(SandboxError::FileExecutionUnsupported)
    }

    async fn kill(&self, id: ExecutionId) -> Result<KillOutcome, SandboxError> {
        let cancel = {
            let executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
            executions.get(&id).map(|e| e.cancel.clone())
        };
        match cancel {
            Some(cancel) => {
                cancel.cancel();
                Ok(KillOutcome::Killed)
            }
            None => Ok(KillOutcome::AlreadyFinished),
        }
    }

    fn active_executions(&self) -> usize {
        self.executions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn capabilities(&self) -> SandboxCapabilities {
        SandboxCapabilities {
            container_isolation: true,
            network_isolation: !self.config.enable_network,
            seccomp_enabled: self.seccomp_json.is_some(),
            read_only_root: self.config.read_only_root,
            resource_limits: true,
            supported_languages: self.registry.language_ids(),
        }
    }

    fn stats(&self) -> SandboxStats {
        self.stats.snapshot()
    }

    /// Stop tracked containers, then sweep orphans left by earlier runs of
    /// this host (matched by the configured name prefix).
    async fn cleanup(&self) -> Result<(), SandboxError> {
        let tracked: Vec<(ExecutionId, String, CancellationToken)> = {
            let executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
            executions
                .iter()
                .map(|(id, r)| (*id, r.container_id.clone(), r.cancel.clone()))
                .collect()
        };
        for (id, container_id, cancel) in tracked {
            tracing::debug!(execution_id = %id, container_id, "stopping tracked container");
            cancel.cancel();
            self.stop_container(&container_id).await;
        }

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                ..Default::default()
            }))
            .await?;
        let prefix = format!("/{}-", self.config.name_prefix);
        for summary in containers {
            let is_ours = summary
                .names
                .as_deref()
                .unwrap_or_default()
                .iter()
                .any(|n| n.starts_with(&prefix));
            if !is_ours {
                continue;
            }
            if let Some(container_id) = summary.id {
                tracing::info!(container_id, "removing orphaned sandbox container");
                let _ = self
                    .docker
                    .remove_container(
                        &container_id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await;
            }
        }
        Ok(())
    }
}

enum ContainerOutcome {
    Exited(i64),
    Deadline,
    Killed,
}

struct ExecutionGuard {
    id: ExecutionId,
    executions: Arc<Mutex<HashMap<ExecutionId, RunningContainer>>>,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if let Ok(mut executions) = self.executions.lock() {
            executions.remove(&self.id);
        }
    }
}

/// Probe the engine once; the result is cached for the life of the sandbox.
pub async fn probe_engine(docker: &Docker) -> EngineStatus {
    match docker.version().await {
        Ok(version) => EngineStatus {
            available: true,
            version: version.version,
            api_version: version.api_version,
            error: None,
        },
        Err(e) => EngineStatus {
            available: false,
            version: None,
            api_version: None,
            error: Some(e.to_string()),
        },
    }
}

fn append_capped(buf: &mut Vec<u8>, chunk: &[u8], cap: usize, truncated: &mut bool) {
    if buf.len() >= cap {
        *truncated = true;
        return;
    }
    let take = chunk.len().min(cap - buf.len());
    buf.extend_from_slice(&chunk[..take]);
    if take < chunk.len() {
        *truncated = true;
    }
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
