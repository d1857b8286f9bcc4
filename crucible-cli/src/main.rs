mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "crucible")]
#[command(about = "Sandboxed code execution and terminal sessions")]
#[command(version)]
pub struct Cli {
    /// Optional TOML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute code in a sandbox and print the result
    Run {
        /// Language identifier or alias (python, js, go, ...)
        #[arg(short, long)]
        language: Option<String>,

        /// Inline code to run; mutually exclusive with FILE
        #[arg(short = 'e', long)]
        code: Option<String>,

        /// Source file to run (language detected from extension)
        file: Option<PathBuf>,

        /// Stdin passed to the program
        #[arg(long)]
        stdin: Option<String>,

        /// Wall-clock timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Sandbox backend (auto, container, process)
        #[arg(short, long, default_value = "auto", value_parser = ["auto", "container", "process"])]
        backend: String,

        /// Print the full result as JSON instead of raw output
        #[arg(long)]
        json: bool,
    },
    /// Probe the container engine and print its status
    Probe,
    /// List supported languages
    Languages,
    /// List shells available for terminal sessions
    Shells,
    /// Remove orphaned sandbox containers and kill live executions
    Cleanup {
        /// Sandbox backend (auto, container, process)
        #[arg(short, long, default_value = "auto", value_parser = ["auto", "container", "process"])]
        backend: String,
    },
    /// Run a command through a PTY terminal session and print its output
    Terminal {
        /// Shell command line to execute
        #[arg(short = 'e', long, default_value = "echo crucible")]
        command: String,

        /// Seconds to capture output before closing the session
        #[arg(long, default_value_t = 2)]
        capture: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = commands::load_settings(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Run {
            language,
            code,
            file,
            stdin,
            timeout,
            backend,
            json,
        } => {
            commands::run(
                settings,
                commands::RunArgs {
                    language,
                    code,
                    file,
                    stdin,
                    timeout,
                    backend,
                    json,
                },
            )
            .await
        }
        Commands::Probe => commands::probe(settings).await,
        Commands::Languages => commands::languages(),
        Commands::Shells => commands::shells(),
        Commands::Cleanup { backend } => commands::cleanup(settings, backend).await,
        Commands::Terminal { command, capture } => commands::terminal(command, capture).await,
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
