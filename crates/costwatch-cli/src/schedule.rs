//! Interval loop for `costwatch watch`.

use std::time::Duration;

use chrono::Utc;
use costwatch_billing::CostSource;
use tokio::sync::watch;
use tracing::{error, info};

use crate::job::{Job, RunOptions, report_date_for};

/// Run `job` now and then every `interval` until `shutdown` flips.
///
/// A failed run is logged and the loop continues. Runs never overlap.
/// Returns the number of runs attempted.
pub async fn run_every<S: CostSource>(
    job: &Job<S>,
    interval: Duration,
    offset_days: u32,
    opts: RunOptions,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    info!(interval_secs = interval.as_secs(), "watch loop started");
    let mut runs = 0u64;

    loop {
        if *shutdown.borrow() {
            break;
        }

        match report_date_for(Utc::now().date_naive(), offset_days) {
            Ok(report_date) => {
                runs += 1;
                match job.run(report_date, opts).await {
                    Ok(outcome) => info!(
                        %report_date,
                        anomalies = outcome.report.anomalies.len(),
                        "scheduled run finished"
                    ),
                    Err(e) => error!(%report_date, error = format!("{e:#}"), "scheduled run failed"),
                }
            }
            Err(e) => error!(error = format!("{e:#}"), "skipping scheduled run"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("watch loop shutting down");
                break;
            }
        }
    }
    runs
}
