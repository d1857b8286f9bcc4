//! CLI command implementations

use anyhow::{anyhow, bail, Context, Result};
use crucible_sandbox::{
    ExecutionRequest, ExecutionResult, FactoryConfig, LanguageRegistry, SandboxFactory,
    SandboxKind,
};
use crucible_terminal::{SessionOptions, TerminalConfig, TerminalManager};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

pub struct RunArgs {
    pub language: Option<String>,
    pub code: Option<String>,
    pub file: Option<PathBuf>,
    pub stdin: Option<String>,
    pub timeout: Option<u64>,
    pub backend: String,
    pub json: bool,
}

pub async fn load_settings(path: Option<&Path>) -> Result<FactoryConfig> {
    match path {
        Some(path) => FactoryConfig::from_toml_path(path)
            .await
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(FactoryConfig::default()),
    }
}

fn parse_backend(backend: &str) -> Result<SandboxKind> {
    match backend {
        "auto" => Ok(SandboxKind::Auto),
        "container" => Ok(SandboxKind::Container),
        "process" => Ok(SandboxKind::Process),
        other => bail!("unknown backend: {other}"),
    }
}

pub async fn run(settings: FactoryConfig, args: RunArgs) -> Result<()> {
    let (language, code) = match (&args.code, &args.file) {
        (Some(code), None) => {
            let language = args
                .language
                .clone()
                .ok_or_else(|| anyhow!("--language is required with inline code"))?;
            (language, code.clone())
        }
        (None, Some(file)) => {
            let registry = LanguageRegistry::builtin();
            let language = match args.language.clone() {
                Some(language) => language,
                None => registry.detect(file)?.id.clone(),
            };
            let code = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            (language, code)
        }
        (Some(_), Some(_)) => bail!("pass either inline code or a file, not both"),
        (None, None) => bail!("nothing to run: pass -e CODE or FILE"),
    };

    let factory = SandboxFactory::new(settings);
    let executor = factory.get_executor(parse_backend(&args.backend)?).await?;
    debug!(
        container = executor.capabilities().container_isolation,
        "sandbox backend ready"
    );

    let mut request = ExecutionRequest::new(language, code);
    request.stdin = args.stdin;
    request.timeout = args.timeout.map(Duration::from_secs);

    let result = executor.execute(request).await?;
    print_result(&result, args.json)?;
    std::process::exit(result.exit_code);
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    if let Some(compile_error) = &result.compile_error {
        eprintln!("compile error:\n{compile_error}");
    }
    print!("{}", result.stdout);
    eprint!("{}", result.stderr);
    if result.timed_out {
        eprintln!("(timed out after {:?})", result.duration);
    }
    Ok(())
}

pub async fn probe(settings: FactoryConfig) -> Result<()> {
    let factory = SandboxFactory::new(settings);
    let status = factory.engine_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

pub fn languages() -> Result<()> {
    for id in LanguageRegistry::builtin().language_ids() {
        println!("{id}");
    }
    Ok(())
}

pub fn shells() -> Result<()> {
    for (name, path) in crucible_terminal::available_shells() {
        println!("{name}\t{path}");
    }
    Ok(())
}

pub async fn cleanup(settings: FactoryConfig, backend: String) -> Result<()> {
    let factory = SandboxFactory::new(settings);
    let executor = factory.get_executor(parse_backend(&backend)?).await?;
    executor.cleanup().await?;
    println!("cleanup complete");
    Ok(())
}

/// One-shot PTY demo: run a command line in a fresh shell session and echo
/// what the terminal produced.
pub async fn terminal(command: String, capture_secs: u64) -> Result<()> {
    let manager = Arc::new(TerminalManager::new(TerminalConfig::default()));
    let snapshot = manager.create_session(SessionOptions::default())?;
    let mut attachment = manager.attach(snapshot.id)?;

    manager.write_input(snapshot.id, format!("{command}\n").as_bytes())?;
    manager.write_input(snapshot.id, b"exit\n")?;

    let deadline = Instant::now() + Duration::from_secs(capture_secs);
    let mut output = attachment.history.clone();
    while Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(200), attachment.recv()).await {
            Ok(Some(chunk)) => output.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(_) => continue,
        }
    }

    print!("{}", String::from_utf8_lossy(&output));
    if attachment.dropped_frames() > 0 {
        eprintln!("({} frames dropped)", attachment.dropped_frames());
    }
    manager.delete_session(snapshot.id)?;
    Ok(())
}
