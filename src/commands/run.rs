//! `dumpwarden run`: the backup daemon.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::info;

use dumpwarden::backup::BackupPipeline;
use dumpwarden::build_info;
use dumpwarden::config::Config;
use dumpwarden::process::{HostRunner, Provisioner};
use dumpwarden::scheduler::Scheduler;

pub async fn run(config_path: &Path, once: bool) -> Result<()> {
    let config = Config::load(config_path)
        .await
        .with_context(|| format!("Failed to load configuration from '{}'", config_path.display()))?;

    info!(version = %build_info::version_string(), "Starting dumpwarden");

    let runner = Arc::new(HostRunner::new());
    let provisioner = Arc::new(Provisioner::new(runner.clone()));
    let pipeline = BackupPipeline::new(&config, runner, provisioner)?;
    let scheduler = Scheduler::new(pipeline, &config);

    if once || config.schedule.run_once {
        if !scheduler.run_once().await {
            bail!("Backup cycle failed");
        }
        return Ok(());
    }

    scheduler.run_forever(shutdown_signal()?).await;
    info!("Stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
///
/// Handlers are installed before returning so a signal that arrives during
/// a cycle is still seen once that cycle ends.
#[cfg(unix)]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received Ctrl+C, shutting down..."),
            _ = terminate.recv() => info!("Received SIGTERM, shutting down..."),
        }
    })
}

#[cfg(not(unix))]
fn shutdown_signal() -> Result<impl std::future::Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down...");
    })
}
