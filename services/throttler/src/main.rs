//! Deploy throttler
//!
//! Performs one admission pass: finds instances whose last successful
//! deployment is behind their upstream branch and triggers update and
//! deploy cycles for as many as the compile job cap allows. Run it from
//! cron or a systemd timer; it does not loop.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use throttle_scheduler::{config::Config, startup};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "throttler", version, about = "Trigger TGS deployments for stale instances")]
struct Cli {
    /// Configuration file.
    #[arg(long, env = "THROTTLER_CONFIG", default_value = "throttler.toml")]
    config: PathBuf,

    /// Evaluate instances without sending update or deploy requests.
    #[arg(long)]
    dry_run: bool,

    /// Seed for the instance visiting order.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Prefer RUST_LOG, fall back to THROTTLER_LOG_LEVEL
    let log_level = std::env::var("THROTTLER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Throttler run failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(&cli.config)?;
    info!(
        config = %cli.config.display(),
        max_compile_jobs = config.throttle.max_compile_jobs,
        dry_run = cli.dry_run,
        "Configuration loaded"
    );

    let connected = startup::connect(&config, cli.dry_run)
        .await
        .map_err(|e| {
            let dependency = e.dependency();
            anyhow::Error::new(e).context(format!("startup failed acquiring {dependency}"))
        })?;

    let mut throttler = connected.throttler;
    if let Some(seed) = cli.seed {
        throttler = throttler.with_seed(seed);
    }

    let result = throttler.run().await;
    connected.database.close().await;
    result.context("scheduler run aborted")?;

    Ok(())
}
