//! Human-readable renderings of a [`DetectionReport`].

use std::fmt::Write;

use crate::types::{Anomaly, DetectionReport};

fn format_change(anomaly: &Anomaly) -> String {
    match anomaly.percent_change {
        Some(pct) => format!("{pct:+.1}%"),
        None => "N/A".to_string(),
    }
}

/// Slack mrkdwn message listing at most `max_listed` anomalies.
pub fn format_message(report: &DetectionReport, max_listed: usize) -> String {
    let mut out = format!(
        "*GCP Cost Anomalies for {}* — {} found\n",
        report.report_date,
        report.anomalies.len()
    );

    for anomaly in report.anomalies.iter().take(max_listed) {
        let _ = write!(
            out,
            "\n*Service:* {}\n  - Recent: ${:.2}\n  - Baseline avg/day: ${:.2}\n  - Change: {}\n  - Note: {}\n",
            anomaly.service,
            anomaly.recent_cost,
            anomaly.baseline_avg,
            format_change(anomaly),
            anomaly.reason,
        );
    }

    let hidden = report.anomalies.len().saturating_sub(max_listed);
    if hidden > 0 {
        let _ = write!(out, "\n…and {hidden} more");
    }

    out
}

pub fn issue_title(report: &DetectionReport) -> String {
    format!(
        "[Cost Anomaly] {} anomaly(s) on {}",
        report.anomalies.len(),
        report.report_date
    )
}

pub fn issue_body(report: &DetectionReport, max_listed: usize) -> String {
    format!(
        "{}\n\nBaseline window: {} to {} ({} days).\n\nDetected by automated job.",
        format_message(report, max_listed),
        report.baseline_start,
        baseline_end(report),
        report.baseline_days,
    )
}

/// Last day of the baseline window, the day before the report date.
fn baseline_end(report: &DetectionReport) -> chrono::NaiveDate {
    report.report_date.pred_opt().unwrap_or(report.report_date)
}

/// Plain-text summary for the terminal.
pub fn format_summary(report: &DetectionReport) -> String {
    let mut out = format!(
        "Report date:   {}\nBaseline:      {} .. {} ({} days)\nServices:      {}\nRecent spend:  ${:.2}\n",
        report.report_date,
        report.baseline_start,
        baseline_end(report),
        report.baseline_days,
        report.services_checked,
        report.total_recent_cost,
    );

    if report.anomalies.is_empty() {
        out.push_str("\n✓ No anomalies detected\n");
        return out;
    }

    let _ = writeln!(out, "\n{} anomaly(s):\n", report.anomalies.len());
    let _ = writeln!(
        out,
        "  {:<32} {:>12} {:>14} {:>10}  NOTE",
        "SERVICE", "RECENT", "BASELINE/DAY", "CHANGE"
    );
    for a in &report.anomalies {
        let _ = writeln!(
            out,
            "  {:<32} {:>12} {:>14} {:>10}  {}",
            truncate(&a.service, 32),
            format!("${:.2}", a.recent_cost),
            format!("${:.2}", a.baseline_avg),
            format_change(a),
            a.reason,
        );
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(max.saturating_sub(1)).collect();
        t.push('…');
        t
    }
}
