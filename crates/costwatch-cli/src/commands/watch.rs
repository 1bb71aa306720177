//! `costwatch watch` — run on an interval until Ctrl-C.

use anyhow::anyhow;
use costwatch_cli::job::{Job, RunOptions};
use costwatch_cli::schedule;
use costwatch_core::CostwatchConfig;
use costwatch_core::config::parse_duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub async fn watch(
    file: CostwatchConfig,
    interval: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let settings = super::resolve_settings(file)?;
    let interval = match interval {
        Some(raw) => parse_duration(raw)
            .filter(|d| !d.is_zero())
            .ok_or_else(|| anyhow!("invalid --interval {raw:?}, expected e.g. \"24h\""))?,
        None => settings.interval,
    };
    if settings.state_path.is_none() {
        warn!("no state path configured; notification history lasts only for this process");
    }

    let job = Job::from_settings(&settings)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let runs = schedule::run_every(
        &job,
        interval,
        settings.report_offset_days,
        RunOptions {
            dry_run,
            force: false,
        },
        shutdown_rx,
    )
    .await;

    info!(runs, "costwatch watch stopped");
    Ok(())
}
