//! Runforge CLI - launch an LLM training run from a YAML configuration.
//!
//! `runforge <config.yaml> [key.path=value ...]` merges the overrides into the
//! configuration, assembles the run and hands it to the training engine.

use anyhow::Context;
use clap::Parser;
use runforge_training::{ConfigTree, DryRunEngine, Registries, RunOrchestrator};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "runforge",
    author,
    version,
    about = "Assemble and launch a distributed LLM training run",
    long_about = "Reads a YAML run configuration, applies key=value overrides (override wins), \
                  validates and builds every component, and delegates the run to the training engine."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Base run configuration (YAML)
    config: PathBuf,

    /// Overrides in `key.path=value` form, applied in order
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ConfigTree::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?
        .with_overrides(&args.overrides)
        .context("invalid override")?;

    RunOrchestrator::new(Registries::with_builtins()).launch(&config, &DryRunEngine).await?;
    Ok(())
}
