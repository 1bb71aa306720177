//! `costwatch history` — list recorded runs.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use costwatch_core::CostwatchConfig;
use costwatch_state::{RunRecord, StateStore};
use tracing::warn;

use crate::OutputFormat;

pub fn history(file: CostwatchConfig, limit: usize, format: OutputFormat) -> anyhow::Result<()> {
    // Only the state path is needed, so billing settings are not resolved.
    let path = std::env::var_os("COSTWATCH_STATE_PATH")
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| file.state.and_then(|s| s.path));

    let runs = match path {
        Some(path) if path.exists() => StateStore::open(&path)
            .with_context(|| format!("opening {}", path.display()))?
            .list_runs(limit)?,
        Some(path) => {
            warn!(path = %path.display(), "state file does not exist yet");
            Vec::new()
        }
        None => {
            warn!("no state path configured (state.path or COSTWATCH_STATE_PATH)");
            Vec::new()
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Text => print!("{}", format_runs(&runs)),
    }
    Ok(())
}

fn format_runs(runs: &[RunRecord]) -> String {
    if runs.is_empty() {
        return "No runs recorded.\n".to_string();
    }
    let mut out = format!(
        "{:<12} {:<20} {:>8} {:>12} {:>9}  NOTIFIED\n",
        "DATE", "STARTED (UTC)", "SERVICES", "SPEND", "ANOMALIES"
    );
    for run in runs {
        let notified: Vec<&str> = run
            .deliveries
            .iter()
            .filter(|(_, o)| o.is_sent())
            .map(|(c, _)| c.as_str())
            .collect();
        let notified = match (run.dry_run, notified.is_empty()) {
            (true, _) => "dry-run".to_string(),
            (false, true) => "-".to_string(),
            (false, false) => notified.join(","),
        };
        let _ = writeln!(
            out,
            "{:<12} {:<20} {:>8} {:>12} {:>9}  {}",
            run.report_date,
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.services_checked,
            format!("${:.2}", run.total_recent_cost),
            run.anomalies.len(),
            notified,
        );
    }
    out
}
