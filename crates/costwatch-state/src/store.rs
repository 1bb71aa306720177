//! StateStore — redb-backed persistence for costwatch.
//!
//! Records completed runs and which anomaly set has already been delivered
//! to which channel for a report date. Supports both on-disk and in-memory
//! backends.

use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use costwatch_core::Channel;
use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::record::{NotificationMark, RunRecord, notification_key};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    ///
    /// Missing parent directories are created.
    pub fn open(path: &Path) -> StateResult<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(map_err!(Open))?;
        }
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Open at `path` when given, otherwise in memory.
    pub fn open_or_memory(path: Option<&Path>) -> StateResult<Self> {
        match path {
            Some(path) => Self::open(path),
            None => Self::open_in_memory(),
        }
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(RUNS).map_err(map_err!(Table))?;
        txn.open_table(NOTIFICATIONS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Runs ───────────────────────────────────────────────────────

    /// Append a run record.
    pub fn put_run(&self, run: &RunRecord) -> StateResult<()> {
        let key = run.table_key();
        let value = serde_json::to_vec(run).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RUNS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, anomalies = run.anomalies.len(), "run stored");
        Ok(())
    }

    /// Most recent runs first, by report date then start time.
    pub fn list_runs(&self, limit: usize) -> StateResult<Vec<RunRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev().take(limit) {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let run: RunRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(run);
        }
        Ok(results)
    }

    /// The last run recorded for a report date.
    pub fn latest_run_for_date(&self, date: NaiveDate) -> StateResult<Option<RunRecord>> {
        let prefix = format!("{date}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RUNS).map_err(map_err!(Table))?;
        let mut latest = None;
        for entry in table
            .range(prefix.as_str()..)
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let run: RunRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            latest = Some(run);
        }
        Ok(latest)
    }

    // ── Notifications ──────────────────────────────────────────────

    /// Record that `fingerprint` was delivered to `channel` for `date`.
    ///
    /// Replaces any earlier mark for the same date and channel.
    pub fn mark_notified(
        &self,
        date: NaiveDate,
        channel: Channel,
        fingerprint: &str,
    ) -> StateResult<()> {
        let mark = NotificationMark {
            report_date: date,
            channel,
            fingerprint: fingerprint.to_string(),
            sent_at: Utc::now(),
        };
        let key = mark.table_key();
        let value = serde_json::to_vec(&mark).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NOTIFICATIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "notification marked");
        Ok(())
    }

    pub fn get_notification(
        &self,
        date: NaiveDate,
        channel: Channel,
    ) -> StateResult<Option<NotificationMark>> {
        let key = notification_key(date, channel);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NOTIFICATIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let mark: NotificationMark =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(mark))
            }
            None => Ok(None),
        }
    }

    /// True when this exact anomaly set was already delivered to `channel`.
    pub fn was_notified(
        &self,
        date: NaiveDate,
        channel: Channel,
        fingerprint: &str,
    ) -> StateResult<bool> {
        Ok(self
            .get_notification(date, channel)?
            .is_some_and(|mark| mark.fingerprint == fingerprint))
    }

    /// Channels that already received `fingerprint` for `date`.
    pub fn notified_channels(&self, date: NaiveDate, fingerprint: &str) -> StateResult<Vec<Channel>> {
        let mut channels = Vec::new();
        for channel in Channel::ALL {
            if self.was_notified(date, channel, fingerprint)? {
                channels.push(channel);
            }
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use costwatch_core::{Anomaly, AnomalyReason, ChannelOutcome};

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
    }

    fn at(d: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, hour, 0, 0).unwrap()
    }

    fn test_run(report_date: NaiveDate, started_at: DateTime<Utc>, flagged: &[&str]) -> RunRecord {
        let anomalies: Vec<Anomaly> = flagged
            .iter()
            .map(|s| Anomaly {
                service: s.to_string(),
                recent_cost: 50.0,
                baseline_avg: 10.0,
                deviation_abs: 40.0,
                percent_change: Some(400.0),
                reason: AnomalyReason::AbsoluteFloor { min_absolute: 5.0 },
            })
            .collect();
        RunRecord {
            report_date,
            started_at,
            finished_at: started_at + chrono::Duration::seconds(3),
            services_checked: 5,
            total_recent_cost: 120.0,
            fingerprint: (!anomalies.is_empty()).then(|| "fp".to_string()),
            anomalies,
            dry_run: false,
            deliveries: vec![(Channel::Slack, ChannelOutcome::Sent { detail: None })],
        }
    }

    // ── Runs ───────────────────────────────────────────────────────

    #[test]
    fn run_put_and_list() {
        let store = StateStore::open_in_memory().unwrap();
        let run = test_run(date(2), at(3, 6), &["BigQuery"]);
        store.put_run(&run).unwrap();

        let runs = store.list_runs(10).unwrap();
        assert_eq!(runs, vec![run]);
    }

    #[test]
    fn runs_listed_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_run(&test_run(date(1), at(2, 6), &[])).unwrap();
        store.put_run(&test_run(date(3), at(4, 6), &["BigQuery"])).unwrap();
        store.put_run(&test_run(date(2), at(3, 6), &[])).unwrap();
        store.put_run(&test_run(date(3), at(4, 9), &[])).unwrap();

        let runs = store.list_runs(10).unwrap();
        let order: Vec<(NaiveDate, DateTime<Utc>)> =
            runs.iter().map(|r| (r.report_date, r.started_at)).collect();
        assert_eq!(
            order,
            vec![
                (date(3), at(4, 9)),
                (date(3), at(4, 6)),
                (date(2), at(3, 6)),
                (date(1), at(2, 6)),
            ]
        );

        assert_eq!(store.list_runs(2).unwrap().len(), 2);
        assert!(store.list_runs(0).unwrap().is_empty());
    }

    #[test]
    fn latest_run_for_date_picks_last_start() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_run(&test_run(date(2), at(3, 6), &[])).unwrap();
        store.put_run(&test_run(date(2), at(3, 18), &["Cloud Run"])).unwrap();
        store.put_run(&test_run(date(20), at(21, 6), &[])).unwrap();

        let latest = store.latest_run_for_date(date(2)).unwrap().unwrap();
        assert_eq!(latest.started_at, at(3, 18));
        assert_eq!(latest.anomalies[0].service, "Cloud Run");

        assert!(store.latest_run_for_date(date(9)).unwrap().is_none());
    }

    #[test]
    fn run_from_report_sets_fingerprint_only_with_anomalies() {
        let report = costwatch_core::DetectionReport {
            report_date: date(2),
            baseline_start: NaiveDate::from_ymd_opt(2024, 4, 25).unwrap(),
            baseline_days: 7,
            services_checked: 3,
            total_recent_cost: 10.0,
            anomalies: vec![],
        };
        let run = RunRecord::from_report(&report, at(3, 6), at(3, 6), vec![]);
        assert!(run.fingerprint.is_none());
        assert_eq!(run.table_key(), "2024-05-02:1714716000000000000");
    }

    // ── Notifications ──────────────────────────────────────────────

    #[test]
    fn notification_dedup_by_fingerprint() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store.was_notified(date(2), Channel::Slack, "abc").unwrap());

        store.mark_notified(date(2), Channel::Slack, "abc").unwrap();
        assert!(store.was_notified(date(2), Channel::Slack, "abc").unwrap());
        // Different anomaly set, channel or date is not covered.
        assert!(!store.was_notified(date(2), Channel::Slack, "def").unwrap());
        assert!(!store.was_notified(date(2), Channel::GithubIssue, "abc").unwrap());
        assert!(!store.was_notified(date(3), Channel::Slack, "abc").unwrap());
    }

    #[test]
    fn mark_replaces_previous_fingerprint() {
        let store = StateStore::open_in_memory().unwrap();
        store.mark_notified(date(2), Channel::GithubIssue, "old").unwrap();
        store.mark_notified(date(2), Channel::GithubIssue, "new").unwrap();

        let mark = store.get_notification(date(2), Channel::GithubIssue).unwrap().unwrap();
        assert_eq!(mark.fingerprint, "new");
        assert!(!store.was_notified(date(2), Channel::GithubIssue, "old").unwrap());
    }

    #[test]
    fn notified_channels_lists_matches() {
        let store = StateStore::open_in_memory().unwrap();
        store.mark_notified(date(2), Channel::GithubIssue, "fp").unwrap();
        assert_eq!(
            store.notified_channels(date(2), "fp").unwrap(),
            vec![Channel::GithubIssue]
        );
        assert!(store.notified_channels(date(2), "other").unwrap().is_empty());
    }

    // ── Persistence ────────────────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.redb");

        {
            let store = StateStore::open(&path).unwrap();
            store.put_run(&test_run(date(2), at(3, 6), &["BigQuery"])).unwrap();
            store.mark_notified(date(2), Channel::Slack, "fp").unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.list_runs(10).unwrap().len(), 1);
        assert!(store.was_notified(date(2), Channel::Slack, "fp").unwrap());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_or_memory(None).unwrap();
        assert!(store.list_runs(5).unwrap().is_empty());
        assert!(store.latest_run_for_date(date(1)).unwrap().is_none());
        assert!(store.get_notification(date(1), Channel::Slack).unwrap().is_none());
    }

    #[test]
    fn corrupt_run_record_is_reported() {
        let store = StateStore::open_in_memory().unwrap();
        let txn = store.db.begin_write().unwrap();
        {
            let mut table = txn.open_table(RUNS).unwrap();
            table
                .insert("2024-05-02:0000000000000000001", b"{not json".as_slice())
                .unwrap();
        }
        txn.commit().unwrap();

        let err = store.list_runs(10).unwrap_err();
        assert!(matches!(err, StateError::Deserialize(_)));
        assert!(err.to_string().starts_with("corrupt record in state database:"));
    }
}
