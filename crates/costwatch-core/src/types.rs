//! Shared types used across costwatch crates.

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Spend for one billed service: the report date against its baseline window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCost {
    /// Billing `service.description`, e.g. "Compute Engine".
    pub service: String,
    /// Total cost on the report date.
    pub recent_cost: f64,
    /// Total cost over the whole baseline window (0 when the service is new).
    pub baseline_total: f64,
}

/// Why a service was flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyReason {
    /// No baseline spend; the recent cost alone crossed the absolute floor.
    NoBaseline { min_absolute: f64 },
    /// The percentage margin was the binding term.
    PercentThreshold { threshold_percent: f64 },
    /// The absolute floor was the binding term.
    AbsoluteFloor { min_absolute: f64 },
}

impl fmt::Display for AnomalyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyReason::NoBaseline { min_absolute } => {
                write!(f, "no baseline; recent > ${min_absolute:.2}")
            }
            AnomalyReason::PercentThreshold { threshold_percent } => {
                write!(f, ">{threshold_percent}% over baseline")
            }
            AnomalyReason::AbsoluteFloor { min_absolute } => {
                write!(f, "increase > ${min_absolute:.2} floor")
            }
        }
    }
}

/// A service whose spend on the report date crossed the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub service: String,
    pub recent_cost: f64,
    /// Average daily cost over the baseline window.
    pub baseline_avg: f64,
    /// `recent_cost - baseline_avg`.
    pub deviation_abs: f64,
    /// Percentage change against the baseline, `None` without a baseline.
    pub percent_change: Option<f64>,
    pub reason: AnomalyReason,
}

/// Outcome of evaluating one report date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionReport {
    pub report_date: NaiveDate,
    /// First day of the baseline window (inclusive).
    pub baseline_start: NaiveDate,
    pub baseline_days: u32,
    pub services_checked: usize,
    pub total_recent_cost: f64,
    /// Anomalies in input order (highest recent cost first).
    pub anomalies: Vec<Anomaly>,
}

impl DetectionReport {
    pub fn has_anomalies(&self) -> bool {
        !self.anomalies.is_empty()
    }

    /// SHA-256 over the sorted anomalous service names.
    ///
    /// Stable across runs for the same set of services, regardless of
    /// cost ordering, so repeated runs for one date can be de-duplicated.
    pub fn fingerprint(&self) -> String {
        let mut services: Vec<&str> = self.anomalies.iter().map(|a| a.service.as_str()).collect();
        services.sort_unstable();
        services.dedup();

        let mut hasher = Sha256::new();
        for service in services {
            hasher.update(service.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

/// A notification destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Slack,
    GithubIssue,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Slack, Channel::GithubIssue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Slack => "slack",
            Channel::GithubIssue => "github_issue",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened when a channel was offered a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelOutcome {
    /// Delivered; `detail` is e.g. the created issue URL.
    Sent { detail: Option<String> },
    Skipped { reason: String },
    Failed { error: String },
}

impl ChannelOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, ChannelOutcome::Sent { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ChannelOutcome::Failed { .. })
    }
}

impl fmt::Display for ChannelOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelOutcome::Sent { detail: Some(d) } => write!(f, "sent ({d})"),
            ChannelOutcome::Sent { detail: None } => f.write_str("sent"),
            ChannelOutcome::Skipped { reason } => write!(f, "skipped: {reason}"),
            ChannelOutcome::Failed { error } => write!(f, "failed: {error}"),
        }
    }
}
