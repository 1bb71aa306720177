//! One detection run: query, detect, notify, record.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use costwatch_billing::{BigQueryClient, CostSource};
use costwatch_core::{Channel, ChannelOutcome, DetectionReport, Detector, Settings, report};
use costwatch_notify::{Dispatcher, Notification};
use costwatch_state::{RunRecord, StateStore};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Detect and report, but send nothing.
    pub dry_run: bool,
    /// Notify even when this anomaly set was already delivered.
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub report: DetectionReport,
    pub deliveries: Vec<(Channel, ChannelOutcome)>,
}

impl JobOutcome {
    pub fn has_anomalies(&self) -> bool {
        self.report.has_anomalies()
    }
}

pub struct Job<S> {
    source: S,
    detector: Detector,
    dispatcher: Dispatcher,
    state: StateStore,
    max_listed: usize,
}

impl Job<BigQueryClient> {
    /// Wire a job against BigQuery from resolved settings.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("costwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        let source = BigQueryClient::from_settings(&settings.billing, http.clone())
            .context("initializing BigQuery client")?;
        let state = StateStore::open_or_memory(settings.state_path.as_deref())
            .context("opening state store")?;
        Ok(Self::new(
            source,
            Detector::new(settings.thresholds)
                .with_exclusions(settings.exclude_services.clone()),
            Dispatcher::from_settings(settings, http),
            state,
            settings.max_listed,
        ))
    }
}

impl<S: CostSource> Job<S> {
    pub fn new(
        source: S,
        detector: Detector,
        dispatcher: Dispatcher,
        state: StateStore,
        max_listed: usize,
    ) -> Self {
        Self {
            source,
            detector,
            dispatcher,
            state,
            max_listed,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Run detection for `report_date` and deliver any anomalies.
    ///
    /// Query failures abort the run. Delivery failures are recorded per
    /// channel and do not.
    pub async fn run(&self, report_date: NaiveDate, opts: RunOptions) -> Result<JobOutcome> {
        let started_at = Utc::now();
        let baseline_days = self.detector.thresholds().baseline_days;
        info!(%report_date, baseline_days, dry_run = opts.dry_run, "cost anomaly run started");

        let rows = self
            .source
            .service_costs(report_date, baseline_days)
            .await
            .with_context(|| format!("querying billing export for {report_date}"))?;
        let report = self.detector.report(report_date, &rows);

        let deliveries = if !report.has_anomalies() {
            info!(%report_date, services = report.services_checked, "no anomalies detected");
            Vec::new()
        } else if opts.dry_run {
            info!(anomalies = report.anomalies.len(), "dry run, not notifying");
            Channel::ALL
                .iter()
                .map(|&c| {
                    (c, ChannelOutcome::Skipped { reason: "dry run".to_string() })
                })
                .collect()
        } else {
            self.notify(&report, opts.force).await?
        };

        let mut record = RunRecord::from_report(&report, started_at, Utc::now(), deliveries.clone());
        record.dry_run = opts.dry_run;
        self.state.put_run(&record).context("recording run")?;

        Ok(JobOutcome { report, deliveries })
    }

    async fn notify(
        &self,
        report: &DetectionReport,
        force: bool,
    ) -> Result<Vec<(Channel, ChannelOutcome)>> {
        let fingerprint = report.fingerprint();
        let already_sent = if force {
            Vec::new()
        } else {
            self.state
                .notified_channels(report.report_date, &fingerprint)
                .context("reading notification history")?
        };
        if !already_sent.is_empty() {
            info!(channels = ?already_sent, "anomaly set already delivered, skipping those channels");
        }

        let message = report::format_message(report, self.max_listed);
        info!(anomalies = report.anomalies.len(), "anomalies detected:\n{message}");

        let notification = Notification {
            issue_title: report::issue_title(report),
            issue_body: report::issue_body(report, self.max_listed),
            message,
        };
        let deliveries = self.dispatcher.dispatch(&notification, &already_sent).await;

        for (channel, outcome) in &deliveries {
            if outcome.is_sent()
                && let Err(e) = self
                    .state
                    .mark_notified(report.report_date, *channel, &fingerprint)
            {
                warn!(%channel, error = %e, "failed to record notification");
            }
        }
        Ok(deliveries)
    }
}

/// The report date for a run on `today`: `offset_days` earlier.
pub fn report_date_for(today: NaiveDate, offset_days: u32) -> Result<NaiveDate> {
    today
        .checked_sub_days(chrono::Days::new(u64::from(offset_days)))
        .with_context(|| format!("report offset of {offset_days} days from {today} is out of range"))
}

/// Default report date: yesterday (or the configured offset) in UTC.
pub fn default_report_date(settings: &Settings) -> Result<NaiveDate> {
    report_date_for(Utc::now().date_naive(), settings.report_offset_days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_date_offsets_back_from_today() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(
            report_date_for(today, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert_eq!(report_date_for(today, 0).unwrap(), today);
    }

    #[test]
    fn report_date_out_of_range_is_an_error() {
        let err = report_date_for(NaiveDate::MIN, 1).unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert!(report_date_for(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(), u32::MAX).is_err());
    }
}
