//! tripwire - inline safety-monitoring proxy for streaming LLM traffic.
//!
//! Forwards OpenAI-compatible chat-completions requests to a configured
//! upstream while scoring the streamed tokens against tripwire rules;
//! sessions that cross the pause threshold are cut off mid-stream.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use tripwire_core::config::TripwireConfig;
use tripwire_core::recorder::retention::purge_old_files;
use tripwire_proxy::{build_router, build_state};

/// Hourly is plenty for a retention granularity measured in days.
const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Path to the YAML configuration file.
    /// If not specified, searches: TRIPWIRE_CONFIG env, /etc/tripwire/config.yaml, ./config.yaml
    #[arg(long)]
    config: Option<PathBuf>,

    /// Upstream base URL override (e.g. "http://localhost:1234/v1")
    #[arg(long, env = "UPSTREAM_URL")]
    upstream_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TripwireConfig::load_from_path(path)?,
        None => TripwireConfig::load()?,
    };

    let state = build_state(&config, cli.upstream_url.clone())?;
    info!(
        upstream = %state.upstream_url,
        evidence = %state.recorder.path().display(),
        privacy_mode = config.storage.privacy_mode,
        "pipeline wired"
    );

    // Background retention sweep over the evidence directory.
    let storage = config.storage.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match purge_old_files(&storage.path, storage.retention_days) {
                Ok(removed) if !removed.is_empty() => {
                    info!(count = removed.len(), "retention sweep removed files");
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "retention sweep failed"),
            }
        }
    });

    let addr = format!("{}:{}", cli.bind, config.transport.http_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "listening");

    let router = build_router(state);
    if let Err(err) = axum::serve(listener, router).await {
        error!(error = %err, "server exited with error");
        return Err(err.into());
    }
    Ok(())
}
