use std::num::NonZeroUsize;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use nexus::{Config, Layout, Multiplexer, Registry};

/// Follow several log files in one terminal, one color per source.
#[derive(Debug, Parser)]
#[command(name = "nexus", version, about)]
struct Cli {
    /// Path to the JSON file listing the sources.
    #[arg(short, long, default_value = "nexus.json")]
    config: PathBuf,

    /// Lines that may wait for the terminal before sources are held back.
    #[arg(long, default_value = "1024")]
    queue_capacity: NonZeroUsize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_env("NEXUS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = Config::load(&cli.config)
        .with_context(|| format!("cannot start without {}", cli.config.display()))?;
    let registry = Registry::from_config(config);
    let layout = Layout::detect().context("cannot lay out output")?;

    let mux = Multiplexer::open(&registry, cli.queue_capacity.get()).await;
    mux.run(layout, std::io::stdout(), shutdown_signal()).await?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot listen for SIGTERM"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for interrupts");
    }
}
