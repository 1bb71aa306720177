//! costwatch.toml parsing and settings resolution.
//!
//! Settings are layered: built-in defaults, then `costwatch.toml`, then
//! environment variables. The CLI applies its flags on top of the result.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::detector::Thresholds;
use crate::table::{BillingTable, TableError};

pub const DEFAULT_CONFIG_FILE: &str = "costwatch.toml";
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
pub const DEFAULT_MAX_LISTED: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("invalid {key} = {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Table(#[from] TableError),
}

impl ConfigError {
    pub fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// A credential or webhook URL that must never be logged.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

// ── File layer ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostwatchConfig {
    pub billing: Option<BillingConfig>,
    pub detection: Option<DetectionConfig>,
    pub slack: Option<SlackConfig>,
    pub github: Option<GitHubConfig>,
    pub state: Option<StateConfig>,
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingConfig {
    /// `project.dataset.table` of the billing export.
    pub table: Option<String>,
    /// Project that runs (and pays for) the query job.
    pub project: Option<String>,
    /// BigQuery location, e.g. "US" or "europe-west1".
    pub location: Option<String>,
    /// Service account key: inline JSON or a path.
    pub service_account_key: Option<String>,
    /// Add `credits.amount` to each row's cost.
    pub include_credits: Option<bool>,
    pub query_timeout: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub threshold_percent: Option<f64>,
    pub baseline_days: Option<u32>,
    pub min_absolute_increase: Option<f64>,
    /// Days before today (UTC) to report on. 1 = yesterday.
    pub report_offset_days: Option<u32>,
    pub exclude_services: Option<Vec<String>>,
    /// Anomalies listed individually in a message before summarizing.
    pub max_listed: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub create_issue: Option<bool>,
    pub token: Option<String>,
    /// `owner/repo`.
    pub repository: Option<String>,
    pub api_url: Option<String>,
    pub labels: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub interval: Option<String>,
}

impl CostwatchConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Scaffold a costwatch.toml with the defaults spelled out.
    pub fn scaffold(table: &str) -> Self {
        let defaults = Thresholds::default();
        CostwatchConfig {
            billing: Some(BillingConfig {
                table: Some(table.to_string()),
                project: None,
                location: Some("US".to_string()),
                service_account_key: None,
                include_credits: Some(false),
                query_timeout: Some("60s".to_string()),
            }),
            detection: Some(DetectionConfig {
                threshold_percent: Some(defaults.threshold_percent),
                baseline_days: Some(defaults.baseline_days),
                min_absolute_increase: Some(defaults.min_absolute_increase),
                report_offset_days: Some(1),
                exclude_services: Some(Vec::new()),
                max_listed: Some(DEFAULT_MAX_LISTED),
            }),
            slack: None,
            github: Some(GitHubConfig {
                create_issue: Some(false),
                token: None,
                repository: None,
                api_url: None,
                labels: Some(vec!["cost-anomaly".to_string()]),
            }),
            state: Some(StateConfig {
                path: Some(PathBuf::from(".costwatch/state.redb")),
            }),
            schedule: Some(ScheduleConfig {
                interval: Some("24h".to_string()),
            }),
        }
    }
}

// ── Resolved settings ──────────────────────────────────────────────

/// Where BigQuery access tokens come from.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialSource {
    /// Service account key JSON, inline.
    ServiceAccountJson(Secret),
    /// Service account key JSON on disk.
    ServiceAccountFile(PathBuf),
    /// A pre-minted OAuth access token.
    AccessToken(Secret),
    /// Workload identity through the GCE metadata server.
    Metadata { host: String },
}

impl CredentialSource {
    pub fn kind(&self) -> &'static str {
        match self {
            CredentialSource::ServiceAccountJson(_) => "service_account_key (inline)",
            CredentialSource::ServiceAccountFile(_) => "service_account_key (file)",
            CredentialSource::AccessToken(_) => "access_token",
            CredentialSource::Metadata { .. } => "metadata_server",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BillingSettings {
    pub table: BillingTable,
    pub project: Option<String>,
    pub location: Option<String>,
    pub credentials: CredentialSource,
    pub include_credits: bool,
    pub query_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct GitHubSettings {
    pub create_issue: bool,
    pub token: Option<Secret>,
    pub repository: Option<String>,
    pub api_url: String,
    pub labels: Vec<String>,
}

/// Fully-resolved settings for a run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub billing: BillingSettings,
    pub thresholds: Thresholds,
    pub report_offset_days: u32,
    pub exclude_services: Vec<String>,
    pub max_listed: usize,
    pub slack_webhook: Option<Secret>,
    pub github: GitHubSettings,
    pub state_path: Option<PathBuf>,
    pub interval: Duration,
}

impl Settings {
    /// Resolve from a config file layer and the process environment.
    pub fn from_env(file: CostwatchConfig) -> Result<Self, ConfigError> {
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Resolve from a config file layer and an environment lookup.
    pub fn resolve<F>(file: CostwatchConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let billing = file.billing.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let slack = file.slack.unwrap_or_default();
        let github = file.github.unwrap_or_default();
        let state = file.state.unwrap_or_default();
        let schedule = file.schedule.unwrap_or_default();

        let table_raw = env("BILLING_TABLE")
            .or(billing.table)
            .ok_or(ConfigError::Missing("BILLING_TABLE"))?;
        let table = BillingTable::parse(&table_raw)?;

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            threshold_percent: parse_env(&env, "THRESHOLD_PERCENT")?
                .or(detection.threshold_percent)
                .unwrap_or(defaults.threshold_percent),
            baseline_days: parse_env(&env, "BASELINE_DAYS")?
                .or(detection.baseline_days)
                .unwrap_or(defaults.baseline_days),
            min_absolute_increase: parse_env(&env, "MIN_ABSOLUTE_INCREASE")?
                .or(detection.min_absolute_increase)
                .unwrap_or(defaults.min_absolute_increase),
        };
        thresholds.validate()?;

        let credentials = resolve_credentials(&env, billing.service_account_key);

        let query_timeout = match billing.query_timeout {
            Some(raw) => parse_duration(&raw).ok_or_else(|| {
                ConfigError::invalid("billing.query_timeout", raw, "expected a duration like \"60s\"")
            })?,
            None => Duration::from_secs(60),
        };

        let interval_raw = env("COSTWATCH_INTERVAL").or(schedule.interval);
        let interval = match interval_raw {
            Some(raw) => parse_duration(&raw)
                .filter(|d| !d.is_zero())
                .ok_or_else(|| {
                    ConfigError::invalid("schedule.interval", raw, "expected a duration like \"24h\"")
                })?,
            None => Duration::from_secs(24 * 60 * 60),
        };

        let create_issue = match env("CREATE_GITHUB_ISSUE") {
            Some(raw) => parse_bool(&raw),
            None => github.create_issue.unwrap_or(false),
        };

        let repository = env("GITHUB_REPOSITORY").or(github.repository);
        if let Some(repo) = &repository
            && !is_owner_repo(repo)
        {
            return Err(ConfigError::invalid(
                "GITHUB_REPOSITORY",
                repo.clone(),
                "expected owner/repo",
            ));
        }

        Ok(Settings {
            billing: BillingSettings {
                table,
                project: env("GCP_PROJECT")
                    .or_else(|| env("GOOGLE_CLOUD_PROJECT"))
                    .or(billing.project),
                location: env("BIGQUERY_LOCATION").or(billing.location),
                credentials,
                include_credits: billing.include_credits.unwrap_or(false),
                query_timeout,
            },
            thresholds,
            report_offset_days: detection.report_offset_days.unwrap_or(1),
            exclude_services: detection.exclude_services.unwrap_or_default(),
            max_listed: detection.max_listed.unwrap_or(DEFAULT_MAX_LISTED).max(1),
            slack_webhook: env("SLACK_WEBHOOK_URL").or(slack.webhook_url).map(Secret::new),
            github: GitHubSettings {
                create_issue,
                token: env("GITHUB_TOKEN").or(github.token).map(Secret::new),
                repository,
                api_url: github
                    .api_url
                    .unwrap_or_else(|| DEFAULT_GITHUB_API.to_string()),
                labels: github.labels.unwrap_or_default(),
            },
            state_path: env("COSTWATCH_STATE_PATH").map(PathBuf::from).or(state.path),
            interval,
        })
    }

    /// Human-readable settings with secrets redacted.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let set_or_unset = |s: &Option<Secret>| match s {
            Some(secret) => secret.to_string(),
            None => "(unset)".to_string(),
        };
        let t = &self.thresholds;
        vec![
            ("billing.table", self.billing.table.to_string()),
            (
                "billing.project",
                self.billing
                    .project
                    .clone()
                    .unwrap_or_else(|| format!("(from credentials or {})", self.billing.table.project)),
            ),
            (
                "billing.location",
                self.billing.location.clone().unwrap_or_else(|| "(default)".to_string()),
            ),
            ("billing.credentials", self.billing.credentials.kind().to_string()),
            ("billing.include_credits", self.billing.include_credits.to_string()),
            ("billing.query_timeout", format!("{:?}", self.billing.query_timeout)),
            ("detection.threshold_percent", t.threshold_percent.to_string()),
            ("detection.baseline_days", t.baseline_days.to_string()),
            ("detection.min_absolute_increase", format!("{:.2}", t.min_absolute_increase)),
            ("detection.report_offset_days", self.report_offset_days.to_string()),
            ("detection.exclude_services", self.exclude_services.join(", ")),
            ("detection.max_listed", self.max_listed.to_string()),
            ("slack.webhook_url", set_or_unset(&self.slack_webhook)),
            ("github.create_issue", self.github.create_issue.to_string()),
            ("github.token", set_or_unset(&self.github.token)),
            (
                "github.repository",
                self.github.repository.clone().unwrap_or_else(|| "(unset)".to_string()),
            ),
            ("github.api_url", self.github.api_url.clone()),
            ("github.labels", self.github.labels.join(", ")),
            (
                "state.path",
                self.state_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(in-memory)".to_string()),
            ),
            ("schedule.interval", format!("{:?}", self.interval)),
        ]
    }
}

fn resolve_credentials<F>(env: &F, file_key: Option<String>) -> CredentialSource
where
    F: Fn(&str) -> Option<String>,
{
    let key_source = |raw: String| {
        if raw.trim_start().starts_with('{') {
            CredentialSource::ServiceAccountJson(Secret::new(raw))
        } else {
            CredentialSource::ServiceAccountFile(PathBuf::from(raw))
        }
    };

    if let Some(raw) = env("GCP_SERVICE_ACCOUNT_KEY").or(file_key) {
        return key_source(raw);
    }
    if let Some(path) = env("GOOGLE_APPLICATION_CREDENTIALS") {
        return CredentialSource::ServiceAccountFile(PathBuf::from(path));
    }
    if let Some(token) = env("GOOGLE_OAUTH_ACCESS_TOKEN") {
        return CredentialSource::AccessToken(Secret::new(token));
    }
    CredentialSource::Metadata {
        host: env("GCE_METADATA_HOST").unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string()),
    }
}

fn parse_env<F, T>(env: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, raw.clone(), e.to_string())),
        None => Ok(None),
    }
}

fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn is_owner_repo(s: &str) -> bool {
    matches!(s.split_once('/'), Some((owner, repo))
        if !owner.is_empty() && !repo.is_empty() && !repo.contains('/'))
}

/// Parse a duration string like "5s", "500ms", "1m", "24h", "7d".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        scaled_secs(mins, 60)
    } else if let Some(hours) = s.strip_suffix('h') {
        scaled_secs(hours, 3600)
    } else if let Some(days) = s.strip_suffix('d') {
        scaled_secs(days, 86_400)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn scaled_secs(n: &str, unit: u64) -> Option<Duration> {
    n.parse::<u64>()
        .ok()?
        .checked_mul(unit)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const TABLE: &str = "acme-billing.exports.gcp_billing_export_v1";

    #[test]
    fn defaults_from_env_only() {
        let settings =
            Settings::resolve(CostwatchConfig::default(), env_of(&[("BILLING_TABLE", TABLE)]))
                .unwrap();
        assert_eq!(settings.billing.table.to_string(), TABLE);
        assert_eq!(settings.thresholds, Thresholds::default());
        assert_eq!(settings.report_offset_days, 1);
        assert!(!settings.github.create_issue);
        assert!(settings.slack_webhook.is_none());
        assert_eq!(
            settings.billing.credentials,
            CredentialSource::Metadata {
                host: DEFAULT_METADATA_HOST.to_string()
            }
        );
        assert_eq!(settings.interval, Duration::from_secs(86_400));
    }

    #[test]
    fn missing_table_is_an_error() {
        let err = Settings::resolve(CostwatchConfig::default(), env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BILLING_TABLE")));
    }

    #[test]
    fn env_overrides_file() {
        let mut file = CostwatchConfig::scaffold("file-project.ds.tbl");
        file.detection.as_mut().unwrap().threshold_percent = Some(50.0);

        let settings = Settings::resolve(
            file,
            env_of(&[
                ("BILLING_TABLE", TABLE),
                ("THRESHOLD_PERCENT", "25"),
                ("CREATE_GITHUB_ISSUE", "TRUE"),
                ("GITHUB_REPOSITORY", "acme/infra"),
            ]),
        )
        .unwrap();

        assert_eq!(settings.billing.table.project, "acme-billing");
        assert_eq!(settings.thresholds.threshold_percent, 25.0);
        assert!(settings.github.create_issue);
        assert_eq!(settings.github.repository.as_deref(), Some("acme/infra"));
        assert_eq!(settings.github.labels, vec!["cost-anomaly".to_string()]);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let settings = Settings::resolve(
            CostwatchConfig::scaffold(TABLE),
            env_of(&[("SLACK_WEBHOOK_URL", ""), ("BASELINE_DAYS", "  ")]),
        )
        .unwrap();
        assert!(settings.slack_webhook.is_none());
        assert_eq!(settings.thresholds.baseline_days, 7);
    }

    #[test]
    fn bad_number_names_the_key() {
        let err = Settings::resolve(
            CostwatchConfig::default(),
            env_of(&[("BILLING_TABLE", TABLE), ("BASELINE_DAYS", "seven")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("BASELINE_DAYS"));
    }

    #[test]
    fn zero_baseline_days_rejected() {
        let err = Settings::resolve(
            CostwatchConfig::default(),
            env_of(&[("BILLING_TABLE", TABLE), ("BASELINE_DAYS", "0")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BASELINE_DAYS", .. }));
    }

    #[test]
    fn bad_repository_rejected() {
        let err = Settings::resolve(
            CostwatchConfig::default(),
            env_of(&[("BILLING_TABLE", TABLE), ("GITHUB_REPOSITORY", "just-a-name")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("owner/repo"));
    }

    #[test]
    fn credential_resolution_order() {
        let inline = r#"{"type":"service_account"}"#;
        let s = Settings::resolve(
            CostwatchConfig::default(),
            env_of(&[
                ("BILLING_TABLE", TABLE),
                ("GCP_SERVICE_ACCOUNT_KEY", inline),
                ("GOOGLE_OAUTH_ACCESS_TOKEN", "ya29.token"),
            ]),
        )
        .unwrap();
        assert_eq!(
            s.billing.credentials,
            CredentialSource::ServiceAccountJson(Secret::new(inline))
        );

        let s = Settings::resolve(
            CostwatchConfig::default(),
            env_of(&[
                ("BILLING_TABLE", TABLE),
                ("GOOGLE_APPLICATION_CREDENTIALS", "/keys/sa.json"),
            ]),
        )
        .unwrap();
        assert_eq!(
            s.billing.credentials,
            CredentialSource::ServiceAccountFile(PathBuf::from("/keys/sa.json"))
        );

        let s = Settings::resolve(
            CostwatchConfig::default(),
            env_of(&[("BILLING_TABLE", TABLE), ("GOOGLE_OAUTH_ACCESS_TOKEN", "ya29.token")]),
        )
        .unwrap();
        assert_eq!(s.billing.credentials.kind(), "access_token");
    }

    #[test]
    fn secrets_are_redacted() {
        let s = Settings::resolve(
            CostwatchConfig::default(),
            env_of(&[
                ("BILLING_TABLE", TABLE),
                ("SLACK_WEBHOOK_URL", "https://hooks.slack.com/services/T/B/secret"),
                ("GITHUB_TOKEN", "ghp_secret"),
            ]),
        )
        .unwrap();
        let rendered = format!("{:?} {:?}", s, s.describe());
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("ghp_"));
    }

    #[test]
    fn scaffold_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        let config = CostwatchConfig::scaffold(TABLE);
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let parsed = CostwatchConfig::from_file(&path).unwrap();
        assert_eq!(parsed.billing.unwrap().table.as_deref(), Some(TABLE));
        assert_eq!(parsed.detection.unwrap().baseline_days, Some(7));
    }

    #[test]
    fn parse_minimal_file() {
        let toml_str = r#"
[billing]
table = "acme-billing.exports.gcp_billing_export_v1"
"#;
        let config: CostwatchConfig = toml::from_str(toml_str).unwrap();
        assert!(config.detection.is_none());
        let settings = Settings::resolve(config, env_of(&[])).unwrap();
        assert_eq!(settings.billing.table.dataset, "exports");
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn parse_duration_rejects_overflow() {
        assert_eq!(parse_duration("999999999999999999d"), None);
        assert_eq!(parse_duration(&format!("{}h", u64::MAX)), None);
        assert_eq!(parse_duration(&format!("{}s", u64::MAX)), Some(Duration::from_secs(u64::MAX)));
    }
}
