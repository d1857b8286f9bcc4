//! Process-based sandbox backend
//!
//! Runs user code as plain child processes with best-effort OS limits.
//! Isolation is weaker than the container backend by construction: rlimits
//! (CPU time, address space, file descriptors, process count) instead of
//! namespaces, and no syscall filtering. The factory only hands this
//! backend out as an availability fallback, and the capability report makes
//! the downgrade visible to callers.

use crate::config::ProcessConfig;
use crate::error::{KillOutcome, SandboxError};
use crate::executor::CodeExecutor;
use crate::languages::{LanguageRegistry, LanguageRunner};
use crate::limits::ResourceLimits;
use crate::stats::StatsRecorder;
use crate::types::{
    ExecutionId, ExecutionRequest, ExecutionResult, ExecutionStatus, SandboxCapabilities,
    SandboxStats,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exit codes reported for forced terminations, matching coreutils timeout
/// and docker kill conventions.
const EXIT_TIMEOUT: i32 = 124;
const EXIT_KILLED: i32 = 137;

struct ActiveExecution {
    cancel: CancellationToken,
}

/// Process-based code executor
pub struct ProcessSandbox {
    config: ProcessConfig,
    registry: Arc<LanguageRegistry>,
    executions: Arc<Mutex<HashMap<ExecutionId, ActiveExecution>>>,
    capacity: Arc<Semaphore>,
    stats: Arc<StatsRecorder>,
}

impl ProcessSandbox {
    pub fn new(config: ProcessConfig, registry: Arc<LanguageRegistry>) -> Result<Self, SandboxError> {
        std::fs::create_dir_all(&config.scratch_dir)?;
        let capacity = Arc::new(Semaphore::new(config.max_concurrent));
        Ok(Self {
            config,
            registry,
            executions: Arc::new(Mutex::new(HashMap::new())),
            capacity,
            stats: Arc::new(StatsRecorder::default()),
        })
    }

    fn scratch_dir(&self, id: ExecutionId) -> Result<TempDir, SandboxError> {
        Ok(tempfile::Builder::new()
            .prefix(&format!("exec-{}-", id.short()))
            .tempdir_in(&self.config.scratch_dir)?)
    }

    fn effective_limits(&self, request_timeout: Option<Duration>) -> ResourceLimits {
        let mut limits = self.config.default_limits.clone();
        if let Some(timeout) = request_timeout {
            limits.timeout = timeout;
        }
        limits
    }

    /// Sanitized environment: fixed PATH, HOME/TMPDIR inside the scratch
    /// dir, then config and request overrides.
    fn build_env(
        &self,
        scratch: &Path,
        overrides: &HashMap<String, String>,
    ) -> Vec<(String, String)> {
        let mut env = vec![
            (
                "PATH".to_string(),
                "/usr/local/bin:/usr/bin:/bin:/usr/sbin:/sbin".to_string(),
            ),
            ("HOME".to_string(), scratch.display().to_string()),
            ("TMPDIR".to_string(), scratch.display().to_string()),
            ("LANG".to_string(), "C.UTF-8".to_string()),
            ("LC_ALL".to_string(), "C.UTF-8".to_string()),
        ];
        for (k, v) in &self.config.environment {
            env.push((k.clone(), v.clone()));
        }
        for (k, v) in overrides {
            env.push((k.clone(), v.clone()));
        }
        env
    }

    fn build_command(
        &self,
        program: &str,
        args: &[String],
        cwd: &Path,
        env: &[(String, String)],
        limits: &ResourceLimits,
    ) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .env_clear()
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let rlimits = RunLimits {
                cpu_seconds: limits.cpu_seconds(),
                memory_bytes: limits.memory_bytes,
                open_files: 256,
                processes: limits.pids_limit,
            };
            // New process group so the whole tree can be signalled at once.
            unsafe {
                cmd.pre_exec(move || {
                    if libc::setpgid(0, 0) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    apply_rlimits(&rlimits)
                });
            }
        }
        #[cfg(not(unix))]
        let _ = limits;

        cmd
    }

    /// Run the compile step, if the language has one. A compiler failure is
    /// a user-code failure: it finalizes the result instead of erroring.
    async fn compile(
        &self,
        runner: &LanguageRunner,
        result: &mut ExecutionResult,
        file: &str,
        dir: &str,
        bin: &str,
        env: &[(String, String)],
        limits: &ResourceLimits,
        started: Instant,
    ) -> Result<bool, SandboxError> {
        let Some(template) = &runner.compile else {
            return Ok(true);
        };
        let (program, args) = template.render(file, dir, bin);
        tracing::debug!(language = %runner.id, %program, "compiling");

        let mut cmd = self.build_command(&program, &args, Path::new(dir), env, limits);
        let mut child = cmd.spawn()?;
        drop(child.stdin.take());
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Internal("stderr pipe missing".to_string()))?;
        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Internal("stdout pipe missing".to_string()))?;
        let stderr = spawn_capped_reader(stderr_pipe, self.config.max_output_bytes);
        let stdout = spawn_capped_reader(stdout_pipe, self.config.max_output_bytes);

        let status = match tokio::time::timeout(limits.timeout, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                terminate_tree(&mut child, self.config.stop_grace).await;
                finalize(result, ExecutionStatus::Timeout, EXIT_TIMEOUT, started);
                result.timed_out = true;
                result.compile_error = Some("compilation timed out".to_string());
                return Ok(false);
            }
        };

        if status.success() {
            return Ok(true);
        }

        let (err_bytes, _) = stderr.await.unwrap_or_default();
        let (out_bytes, _) = stdout.await.unwrap_or_default();
        let diagnostics = if err_bytes.is_empty() { out_bytes } else { err_bytes };
        finalize(
            result,
            ExecutionStatus::Failed,
            status.code().unwrap_or(1),
            started,
        );
        result.compile_error = Some(String::from_utf8_lossy(&diagnostics).into_owned());
        result.stderr = result.compile_error.clone().unwrap_or_default();
        Ok(false)
    }

    /// Supervise the run step: pump stdin/stdout/stderr concurrently,
    /// enforce the deadline, and react to explicit kills.
    async fn supervise(
        &self,
        id: ExecutionId,
        mut cmd: Command,
        stdin: Option<String>,
        limits: &ResourceLimits,
        result: &mut ExecutionResult,
        started: Instant,
    ) -> Result<(), SandboxError> {
        let cancel = CancellationToken::new();
        {
            let mut executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
            if executions.contains_key(&id) {
                return Err(SandboxError::DuplicateExecution(id));
            }
            executions.insert(
                id,
                ActiveExecution {
                    cancel: cancel.clone(),
                },
            );
        }
        // Remove the tracking entry on every exit path, including early `?`.
        let _guard = ExecutionGuard {
            id,
            executions: Arc::clone(&self.executions),
        };

        let mut child = cmd.spawn()?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                tokio::spawn(async move {
                    let _ = pipe.write_all(input.as_bytes()).await;
                    let _ = pipe.shutdown().await;
                });
            }
        } else {
            drop(child.stdin.take());
        }

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Internal("stdout pipe missing".to_string()))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Internal("stderr pipe missing".to_string()))?;
        let stdout = spawn_capped_reader(stdout_pipe, self.config.max_output_bytes);
        let stderr = spawn_capped_reader(stderr_pipe, self.config.max_output_bytes);

        // The wall budget covers the whole execution, so the run step only
        // gets what the compile step left of it.
        let remaining = limits.timeout.saturating_sub(started.elapsed());
        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status?),
            _ = tokio::time::sleep(remaining) => WaitOutcome::Deadline,
            _ = cancel.cancelled() => WaitOutcome::Killed,
        };

        match outcome {
            WaitOutcome::Exited(status) => {
                let (code, exit_status) = classify_exit(status);
                finalize(result, exit_status, code, started);
                match exit_status {
                    ExecutionStatus::Timeout => result.timed_out = true,
                    ExecutionStatus::Killed => result.killed = true,
                    _ => {}
                }
            }
            WaitOutcome::Deadline => {
                terminate_tree(&mut child, self.config.stop_grace).await;
                finalize(result, ExecutionStatus::Timeout, EXIT_TIMEOUT, started);
                result.timed_out = true;
            }
            WaitOutcome::Killed => {
                terminate_tree(&mut child, self.config.stop_grace).await;
                finalize(result, ExecutionStatus::Killed, EXIT_KILLED, started);
                result.killed = true;
            }
        }

        let (out, out_truncated) = stdout.await.unwrap_or_default();
        let (err, err_truncated) = stderr.await.unwrap_or_default();
        result.stdout = String::from_utf8_lossy(&out).into_owned();
        result.stderr = String::from_utf8_lossy(&err).into_owned();
        result.stdout_truncated = out_truncated;
        result.stderr_truncated = err_truncated;

        #[cfg(unix)]
        {
            let (maxrss, cpu_ms) = children_rusage();
            result.memory_used_bytes = maxrss;
            result.cpu_time_ms = cpu_ms;
        }

        Ok(())
    }

    async fn run_prepared(
        &self,
        id: ExecutionId,
        runner: &LanguageRunner,
        scratch: &TempDir,
        file: &str,
        args: &[String],
        request_stdin: Option<String>,
        request_timeout: Option<Duration>,
        env_overrides: &HashMap<String, String>,
        working_dir: Option<&Path>,
    ) -> Result<ExecutionResult, SandboxError> {
        let limits = self.effective_limits(request_timeout);
        let dir = scratch.path().display().to_string();
        let bin = scratch.path().join("main.bin").display().to_string();
        let env = self.build_env(scratch.path(), env_overrides);

        let mut result = ExecutionResult::started(id, &runner.id);
        let started = Instant::now();

        self.stats.enter();
        let run = async {
            if !self
                .compile(runner, &mut result, file, &dir, &bin, &env, &limits, started)
                .await?
            {
                return Ok::<(), SandboxError>(());
            }

            let (program, mut run_args) = runner.run.render(file, &dir, &bin);
            run_args.extend(args.iter().cloned());
            let cwd = working_dir.unwrap_or_else(|| scratch.path());
            let cmd = self.build_command(&program, &run_args, cwd, &env, &limits);
            self.supervise(id, cmd, request_stdin, &limits, &mut result, started)
                .await
        }
        .await;
        self.stats.exit();

        run?;
        self.stats.record(result.status, result.duration);
        tracing::info!(
            execution_id = %id,
            language = %runner.id,
            status = ?result.status,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "process execution finished"
        );
        Ok(result)
    }
}

#[async_trait]
impl CodeExecutor for ProcessSandbox {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, SandboxError> {
        // Reject before any resource is allocated.
        let runner = self.registry.get(&request.language)?;
        let _permit = self
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| SandboxError::CapacityExceeded {
                limit: self.config.max_concurrent,
            })?;

        let id = ExecutionId::new();
        let scratch = self.scratch_dir(id)?;
        let file_name = runner.file_name(&request.code);
        let file_path = scratch.path().join(&file_name);
        tokio::fs::write(&file_path, runner.scaffold(&request.code)).await?;

        self.run_prepared(
            id,
            &runner,
            &scratch,
            &file_path.display().to_string(),
            &[],
            request.stdin,
            request.timeout,
            &request.env,
            request.working_dir.as_deref(),
        )
        .await
    }

    async fn execute_file(
        &self,
        path: &Path,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<ExecutionResult, SandboxError> {
        let runner = self.registry.detect(path)?;
        let _permit = self
            .capacity
            .clone()
            .try_acquire_owned()
            .map_err(|_| SandboxError::CapacityExceeded {
                limit: self.config.max_concurrent,
            })?;

        let id = ExecutionId::new();
        // Scratch dir only holds compiled artifacts here; the file runs in
        // its own directory.
        let scratch = self.scratch_dir(id)?;
        let parent = path.parent().map(PathBuf::from);

        self.run_prepared(
            id,
            &runner,
            &scratch,
            &path.display().to_string(),
            args,
            stdin,
            None,
            &HashMap::new(),
            parent.as_deref(),
        )
        .await
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
        self.executions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn capabilities(&self) -> SandboxCapabilities {
        SandboxCapabilities {
            container_isolation: false,
            network_isolation: false,
            seccomp_enabled: false,
            read_only_root: false,
            resource_limits: true,
            // Only languages whose toolchain exists on this host.
            supported_languages: self.registry.host_available_ids(),
        }
    }

    fn stats(&self) -> SandboxStats {
        self.stats.snapshot()
    }

    async fn cleanup(&self) -> Result<(), SandboxError> {
        let tokens: Vec<CancellationToken> = {
            let executions = self.executions.lock().unwrap_or_else(|e| e.into_inner());
            executions.values().map(|e| e.cancel.clone()).collect()
        };
        for token in tokens {
            token.cancel();
        }
        Ok(())
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    Deadline,
    Killed,
}

struct ExecutionGuard {
    id: ExecutionId,
    executions: Arc<Mutex<HashMap<ExecutionId, ActiveExecution>>>,
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if let Ok(mut executions) = self.executions.lock() {
            executions.remove(&self.id);
        }
    }
}

fn finalize(result: &mut ExecutionResult, status: ExecutionStatus, code: i32, started: Instant) {
    result.status = status;
    result.exit_code = code;
    result.duration = started.elapsed();
    result.completed_at = Some(Utc::now());
}

/// Map an exit status to (code, terminal status). A SIGKILL'd child usually
/// hit the memory limit; SIGXCPU is the CPU rlimit firing.
fn classify_exit(status: std::process::ExitStatus) -> (i32, ExecutionStatus) {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return match signal {
                libc::SIGKILL => (EXIT_KILLED, ExecutionStatus::Killed),
                libc::SIGXCPU => (EXIT_TIMEOUT, ExecutionStatus::Timeout),
                _ => (128 + signal, ExecutionStatus::Failed),
            };
        }
    }
    match status.code() {
        Some(0) => (0, ExecutionStatus::Completed),
        Some(code) => (code, ExecutionStatus::Failed),
        None => (1, ExecutionStatus::Failed),
    }
}

/// Read a stream to EOF, keeping at most `cap` bytes. Draining past the cap
/// keeps the child from blocking on a full pipe.
fn spawn_capped_reader<R>(mut reader: R, cap: usize) -> JoinHandle<(Vec<u8>, bool)>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        let mut truncated = false;
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if buf.len() < cap {
                        let take = n.min(cap - buf.len());
                        buf.extend_from_slice(&chunk[..take]);
                        if take < n {
                            truncated = true;
                        }
                    } else {
                        truncated = true;
                    }
                }
            }
        }
        (buf, truncated)
    })
}

/// Two-stage termination of the whole process group: SIGTERM, a grace
/// period, then SIGKILL, then reap.
async fn terminate_tree(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            let pgid = pid as libc::pid_t;
            unsafe {
                libc::killpg(pgid, libc::SIGTERM);
            }
            if tokio::time::timeout(grace, child.wait()).await.is_ok() {
                return;
            }
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill().await;
    let _ = child.wait().await;
}

#[cfg(unix)]
struct RunLimits {
    cpu_seconds: u64,
    memory_bytes: u64,
    open_files: u64,
    processes: u64,
}

/// Best-effort rlimits applied between fork and exec. Weaker than cgroup
/// accounting: RLIMIT_AS is per-process, not per-tree.
#[cfg(unix)]
fn apply_rlimits(limits: &RunLimits) -> std::io::Result<()> {
    unsafe {
        // Resource type left to inference: linux-gnu wants u32 here while
        // other unixes use c_int.
        let set = |resource, value: libc::rlim_t| -> std::io::Result<()> {
            let lim = libc::rlimit {
                rlim_cur: value,
                rlim_max: value,
            };
            if libc::setrlimit(resource, &lim) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        };
        set(libc::RLIMIT_CPU, limits.cpu_seconds as libc::rlim_t)?;
        #[cfg(any(target_os = "linux", target_os = "android"))]
        set(libc::RLIMIT_AS, limits.memory_bytes as libc::rlim_t)?;
        set(libc::RLIMIT_NOFILE, limits.open_files as libc::rlim_t)?;
        #[cfg(any(target_os = "linux", target_os = "android", target_os = "macos"))]
        set(libc::RLIMIT_NPROC, limits.processes as libc::rlim_t)?;
        // No core dumps from sandboxed code.
        set(libc::RLIMIT_CORE, 0)?;
    }
    Ok(())
}

/// Coarse rusage sample: peak RSS and CPU time across all reaped children
/// of this process. An upper bound when executions run concurrently.
#[cfg(unix)]
fn children_rusage() -> (u64, u64) {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, &mut usage) };
    if rc != 0 {
        return (0, 0);
    }
    let maxrss_bytes = (usage.ru_maxrss as u64).saturating_mul(1024);
    let cpu_ms = (usage.ru_utime.tv_sec as u64 + usage.ru_stime.tv_sec as u64) * 1000
        + (usage.ru_utime.tv_usec as u64 + usage.ru_stime.tv_usec as u64) / 1000;
    (maxrss_bytes, cpu_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::LanguageRegistry;

    fn sandbox() -> ProcessSandbox {
        ProcessSandbox::new(ProcessConfig::default(), LanguageRegistry::builtin()).unwrap()
    }

    #[tokio::test]
    async fn executes_python_hello() {
        let result = sandbox()
            .execute(ExecutionRequest::new("python", "print(\"hello\")"))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
        assert!(result.completed_at.is_some());
    }

    #[tokio::test]
    async fn pipes_stdin_through() {
        let result = sandbox()
            .execute(
                ExecutionRequest::new("python", "import sys; print(sys.stdin.read().strip())")
                    .with_stdin("forty-two\n"),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.stdout.contains("forty-two"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed_result_not_error() {
        let result = sandbox()
            .execute(ExecutionRequest::new("python", "import sys; sys.exit(3)"))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Failed);
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let started = Instant::now();
        let result = sandbox()
            .execute(
                ExecutionRequest::new("python", "import time; time.sleep(5)")
                    .with_timeout(Duration::from_secs(1)),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.timed_out);
        assert_eq!(result.exit_code, EXIT_TIMEOUT);
        // 1s deadline plus at most the grace period
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn unsupported_language_rejected_before_allocation() {
        let err = sandbox()
            .execute(ExecutionRequest::new("cobol", "DISPLAY 'HI'"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::UnsupportedLanguage(_)));
    }

    #[tokio::test]
    async fn kill_on_unknown_id_is_already_finished() {
        let outcome = sandbox().kill(ExecutionId::new()).await.unwrap();
        assert_eq!(outcome, KillOutcome::AlreadyFinished);
    }

    #[tokio::test]
    async fn execute_file_runs_a_script() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("hello.py");
        std::fs::write(&script, "print(\"from-file\")").unwrap();
        let result = sandbox()
            .execute_file(&script, &[], None)
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.stdout.contains("from-file"));
    }

    #[tokio::test]
    async fn capacity_exhaustion_fails_fast() {
        let config = ProcessConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        let sandbox = ProcessSandbox::new(config, LanguageRegistry::builtin()).unwrap();
        let err = sandbox
            .execute(ExecutionRequest::new("python", "print(1)"))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::CapacityExceeded { .. }));
    }

    #[tokio::test]
    async fn concurrent_executions_are_isolated() {
        let sandbox = Arc::new(sandbox());
        let mut handles = Vec::new();
        for i in 0..4 {
            let sandbox = Arc::clone(&sandbox);
            handles.push(tokio::spawn(async move {
                let token = format!("token-{i}");
                let result = sandbox
                    .execute(ExecutionRequest::new(
                        "python",
                        format!("print(\"{token}\")"),
                    ))
                    .await
                    .unwrap();
                (token, result)
            }));
        }
        for handle in handles {
            let (token, result) = handle.await.unwrap();
            assert!(result.stdout.contains(&token));
            for j in 0..4 {
                let other = format!("token-{j}");
                if other != token {
                    assert!(!result.stdout.contains(&other));
                }
            }
        }
    }

    #[tokio::test]
    async fn wall_timeout_covers_compile_and_run_together() {
        use crate::languages::{CommandTemplate, LanguageRunner};

        // A fake compiled language whose "compiler" burns most of the wall
        // budget; the run step must only get the remainder.
        let registry = LanguageRegistry::custom(vec![LanguageRunner {
            id: "slow".into(),
            aliases: vec![],
            source_file: "main.slow".into(),
            extensions: vec![".slow".into()],
            needs_compile: true,
            compile: Some(CommandTemplate {
                program: "sh".into(),
                args: vec!["-c".into(), "sleep 1".into()],
            }),
            run: CommandTemplate {
                program: "sh".into(),
                args: vec!["-c".into(), "sleep 10".into()],
            },
            image: "none".into(),
            container_command: vec!["true".into()],
            needs_executable_tmp: false,
        }]);
        let sandbox = ProcessSandbox::new(ProcessConfig::default(), registry).unwrap();

        let started = Instant::now();
        let result = sandbox
            .execute(
                ExecutionRequest::new("slow", "ignored")
                    .with_timeout(Duration::from_millis(1500)),
            )
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Timeout);
        assert!(result.timed_out);
        // compile (~1s) plus the leftover run budget (~0.5s), never the
        // full timeout twice over
        assert!(result.duration < Duration::from_millis(2400));
        // total including the kill grace stays well under two full budgets
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn output_cap_truncates_and_flags() {
        let config = ProcessConfig {
            max_output_bytes: 64,
            ..Default::default()
        };
        let sandbox = ProcessSandbox::new(config, LanguageRegistry::builtin()).unwrap();
        let result = sandbox
            .execute(ExecutionRequest::new("python", "print(\"x\" * 100000)"))
            .await
            .unwrap();
        assert_eq!(result.status, ExecutionStatus::Completed);
        assert!(result.stdout_truncated);
        assert!(result.stdout.len() <= 64);
    }
}
