//! LangHook - Webhook normalization and intelligent fan-out pipeline
//!
//! # Usage
//!
//! ```bash
//! # Run the full pipeline (default)
//! langhook
//! langhook serve
//!
//! # Configuration is environment-driven; see langhook-config for the
//! # recognized variables (BROKER_URL, CACHE_URL, STORE_DSN, ...)
//! ```

mod cmd;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// LangHook - webhook normalization and fan-out pipeline
#[derive(Parser, Debug)]
#[command(name = "langhook")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline: ingest gateway, map workers, matchers and API
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Some(Command::Serve) | None => cmd::serve::run().await,
    }
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(level)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| anyhow::anyhow!("invalid log level: {}", e))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
