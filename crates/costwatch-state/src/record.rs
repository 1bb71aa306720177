//! Persisted records.

use chrono::{DateTime, NaiveDate, Utc};
use costwatch_core::{Anomaly, Channel, ChannelOutcome, DetectionReport};
use serde::{Deserialize, Serialize};

/// One completed job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub report_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub services_checked: usize,
    pub total_recent_cost: f64,
    pub anomalies: Vec<Anomaly>,
    /// Fingerprint of the anomaly set, `None` when nothing was flagged.
    pub fingerprint: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    pub deliveries: Vec<(Channel, ChannelOutcome)>,
}

impl RunRecord {
    pub fn from_report(
        report: &DetectionReport,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        deliveries: Vec<(Channel, ChannelOutcome)>,
    ) -> Self {
        Self {
            report_date: report.report_date,
            started_at,
            finished_at,
            services_checked: report.services_checked,
            total_recent_cost: report.total_recent_cost,
            anomalies: report.anomalies.clone(),
            fingerprint: report.has_anomalies().then(|| report.fingerprint()),
            dry_run: false,
            deliveries,
        }
    }

    /// Key in the `runs` table. Sorts by date, then start time.
    pub fn table_key(&self) -> String {
        format!(
            "{}:{:019}",
            self.report_date,
            self.started_at.timestamp_nanos_opt().unwrap_or(0).max(0)
        )
    }
}

/// A successful delivery of one anomaly set to one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMark {
    pub report_date: NaiveDate,
    pub channel: Channel,
    pub fingerprint: String,
    pub sent_at: DateTime<Utc>,
}

impl NotificationMark {
    pub fn table_key(&self) -> String {
        notification_key(self.report_date, self.channel)
    }
}

pub(crate) fn notification_key(date: NaiveDate, channel: Channel) -> String {
    format!("{date}:{}", channel.as_str())
}
