//! `costwatch run` — a single detection run.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::NaiveDate;
use costwatch_cli::job::{self, Job, JobOutcome, RunOptions};
use costwatch_core::{CostwatchConfig, report};
use tracing::info;

use crate::OutputFormat;

pub struct RunArgs {
    pub date: Option<NaiveDate>,
    pub format: OutputFormat,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
    pub force: bool,
    pub fail_on_anomaly: bool,
}

pub async fn run(file: CostwatchConfig, args: RunArgs) -> anyhow::Result<ExitCode> {
    let settings = super::resolve_settings(file)?;
    let job = Job::from_settings(&settings)?;
    let report_date = match args.date {
        Some(date) => date,
        None => job::default_report_date(&settings)?,
    };

    let outcome = job
        .run(
            report_date,
            RunOptions {
                dry_run: args.dry_run,
                force: args.force,
            },
        )
        .await?;

    let rendered = render(&outcome, args.format)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => print!("{rendered}"),
    }

    if args.fail_on_anomaly && outcome.has_anomalies() {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn render(outcome: &JobOutcome, format: OutputFormat) -> anyhow::Result<String> {
    match format {
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string_pretty(outcome)?)),
        OutputFormat::Text => {
            let mut out = report::format_summary(&outcome.report);
            if !outcome.deliveries.is_empty() {
                out.push_str("\nNotifications:\n");
                for (channel, result) in &outcome.deliveries {
                    let _ = writeln!(out, "  {channel:<14} {result}");
                }
            }
            Ok(out)
        }
    }
}
