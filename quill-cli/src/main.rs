//! Quill CLI
//!
//! Command-line front end for running multi-stage workflows against the
//! remote task service.

mod commands;
mod render;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use quill_engine::Config;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Quill multi-stage workflow runner", long_about = None)]
struct Cli {
    /// Task service URL
    #[arg(long, env = "QUILL_SERVICE_URL", default_value = "http://localhost:8000")]
    service_url: String,

    /// Delay between two status fetches, in milliseconds
    #[arg(long, env = "QUILL_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Fail a stage whose task is still running after this many seconds
    #[arg(long, env = "QUILL_TASK_TIMEOUT_SECS")]
    task_timeout_secs: Option<u64>,

    /// Timeout of a single HTTP request, in seconds
    #[arg(long, env = "QUILL_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    request_timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so they never interleave with rendered output on stdout
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quill_cli=info,quill_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = Config::new(cli.service_url);
    config.poll_interval = Duration::from_millis(cli.poll_interval_ms);
    config.task_timeout = cli.task_timeout_secs.map(Duration::from_secs);
    config.request_timeout = Duration::from_secs(cli.request_timeout_secs);
    config.validate()?;

    handle_command(cli.command, &config).await
}
