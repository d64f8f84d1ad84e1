use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stampede::{Config, Engine};

/// A config-driven HTTP API load testing tool.
///
/// Supports weighted multi-endpoint tests, stage-based ramp profiles, data
/// templating, and periodic stats output.
#[derive(Debug, Parser)]
#[command(name = "stampede", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,

    /// debug logging as default; use RUST_LOG for finer control
    #[arg(long, short = 'v', default_value_t = false, global = true)]
    verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a load test
    Run {
        #[arg(default_value = "stampede.yaml")]
        config: PathBuf,
    },
    /// Validate a config file
    Validate {
        #[arg(default_value = "stampede.yaml")]
        config: PathBuf,
    },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Run { config } => run(config).await,
        Command::Validate { config } => validate(config),
        Command::Version => {
            println!("stampede version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn run(path: PathBuf) -> anyhow::Result<()> {
    let cfg = Config::load(&path)
        .with_context(|| format!("loading config {}", path.display()))?;

    println!("Starting load test: {}", cfg.name);
    if !cfg.description.is_empty() {
        println!("  {}", cfg.description);
    }
    println!(
        "  Duration: {}  Endpoints: {}\n",
        humantime::format_duration(cfg.total_duration()),
        cfg.endpoints.len()
    );

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down gracefully...");
            ctrl_c_cancel.cancel();
        }
    });

    if let Err(err) = Engine::new(cfg).run(cancel).await {
        eprintln!("Test completed with failures: {err}");
        std::process::exit(1);
    }
    Ok(())
}

fn validate(path: PathBuf) -> anyhow::Result<()> {
    let cfg = Config::load(&path)
        .with_context(|| format!("config {} is invalid", path.display()))?;

    println!("Config is valid!");
    println!("  Name:      {}", cfg.name);
    println!(
        "  Duration:  {}",
        humantime::format_duration(cfg.total_duration())
    );
    println!("  Endpoints: {}", cfg.endpoints.len());
    for ep in &cfg.endpoints {
        println!("    - [weight:{}] {} {}", ep.weight, ep.method, ep.url);
    }
    Ok(())
}
