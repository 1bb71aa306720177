//! BigQuery REST client for the billing export query.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use costwatch_core::config::BillingSettings;
use costwatch_core::{BillingTable, ServiceCost};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::CostSource;
use crate::auth::Authenticator;
use crate::error::{BillingError, BillingResult};
use crate::query::{BASELINE_COLUMN, QueryRequest, RECENT_COLUMN, SERVICE_COLUMN};

pub const DEFAULT_BIGQUERY_URL: &str = "https://bigquery.googleapis.com";

/// How long each jobs.query / getQueryResults call may block server-side.
const SERVER_WAIT_MS: u64 = 10_000;
const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    v: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    reason: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: u16,
    message: String,
}

/// Column positions resolved from a result schema.
#[derive(Debug, Clone, Copy)]
struct Columns {
    service: usize,
    recent: usize,
    baseline: usize,
}

impl Columns {
    fn from_schema(schema: &TableSchema) -> BillingResult<Self> {
        let index: HashMap<&str, usize> = schema
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.as_str(), i))
            .collect();
        let find = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| BillingError::Decode(format!("result schema has no `{name}` column")))
        };
        Ok(Columns {
            service: find(SERVICE_COLUMN)?,
            recent: find(RECENT_COLUMN)?,
            baseline: find(BASELINE_COLUMN)?,
        })
    }
}

/// Runs the billing export query through the BigQuery v2 REST API.
pub struct BigQueryClient {
    http: reqwest::Client,
    auth: Authenticator,
    base_url: String,
    project: String,
    location: Option<String>,
    table: BillingTable,
    include_credits: bool,
    timeout: Duration,
}

impl BigQueryClient {
    pub fn new(http: reqwest::Client, auth: Authenticator, table: BillingTable) -> Self {
        let project = auth
            .project_id()
            .map(str::to_string)
            .unwrap_or_else(|| table.project.clone());
        Self {
            http,
            auth,
            base_url: DEFAULT_BIGQUERY_URL.to_string(),
            project,
            location: None,
            table,
            include_credits: false,
            timeout: Duration::from_secs(60),
        }
    }

    /// Build a client from resolved billing settings.
    ///
    /// The job project is the configured one, else the service account's,
    /// else the billing table's.
    pub fn from_settings(settings: &BillingSettings, http: reqwest::Client) -> BillingResult<Self> {
        let auth = Authenticator::from_source(&settings.credentials, http.clone())?;
        let mut client = Self::new(http, auth, settings.table.clone())
            .with_location(settings.location.clone())
            .with_credits(settings.include_credits)
            .with_timeout(settings.query_timeout);
        if let Some(project) = &settings.project {
            client = client.with_project(project.clone());
        }
        Ok(client)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn with_credits(mut self, include_credits: bool) -> Self {
        self.include_credits = include_credits;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    async fn start_query(&self, request: &QueryRequest) -> BillingResult<QueryResponse> {
        let url = format!("{}/bigquery/v2/projects/{}/queries", self.base_url, self.project);
        let token = self.auth.token().await?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(token.expose())
            .json(request)
            .send()
            .await?;
        decode_response(resp).await
    }

    async fn get_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> BillingResult<QueryResponse> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/queries/{}",
            self.base_url, job.project_id, job.job_id
        );
        let mut params: Vec<(&str, String)> = vec![("timeoutMs", SERVER_WAIT_MS.to_string())];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            params.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            params.push(("pageToken", token.to_string()));
        }

        let token = self.auth.token().await?;
        let resp = self
            .http
            .get(&url)
            .bearer_auth(token.expose())
            .query(&params)
            .send()
            .await?;
        decode_response(resp).await
    }

    /// Run the query to completion and collect every page of rows.
    async fn run(&self, request: &QueryRequest) -> BillingResult<Vec<ServiceCost>> {
        let started = Instant::now();
        let mut resp = self.start_query(request).await?;

        while !resp.job_complete {
            if started.elapsed() >= self.timeout {
                return Err(BillingError::Timeout(self.timeout));
            }
            let job = resp
                .job_reference
                .clone()
                .ok_or_else(|| BillingError::Decode("incomplete job without jobReference".into()))?;
            debug!(job_id = %job.job_id, "query still running");
            tokio::time::sleep(POLL_INTERVAL).await;
            resp = self.get_results(&job, None).await?;
        }
        check_errors(&resp)?;

        let columns = match &resp.schema {
            Some(schema) => Columns::from_schema(schema)?,
            None if resp.rows.is_empty() => return Ok(Vec::new()),
            None => return Err(BillingError::Decode("rows without a schema".into())),
        };

        let mut costs = decode_rows(&resp.rows, columns)?;
        let job = resp.job_reference.clone();
        let mut page_token = resp.page_token.take();

        while let Some(token) = page_token {
            let job = job
                .as_ref()
                .ok_or_else(|| BillingError::Decode("paged result without jobReference".into()))?;
            let mut page = self.get_results(job, Some(&token)).await?;
            check_errors(&page)?;
            costs.extend(decode_rows(&page.rows, columns)?);
            page_token = page.page_token.take();
        }

        Ok(costs)
    }
}

impl CostSource for BigQueryClient {
    async fn service_costs(
        &self,
        report_date: NaiveDate,
        baseline_days: u32,
    ) -> BillingResult<Vec<ServiceCost>> {
        let baseline_start = report_date
            .checked_sub_days(chrono::Days::new(u64::from(baseline_days)))
            .ok_or_else(|| BillingError::Query(format!("baseline window before {report_date} underflows")))?;

        let request = QueryRequest::service_costs(
            &self.table,
            self.include_credits,
            report_date,
            baseline_start,
            self.location.clone(),
            SERVER_WAIT_MS,
        );

        info!(
            table = %self.table,
            project = %self.project,
            %report_date,
            baseline_days,
            auth = self.auth.kind(),
            "running billing query"
        );

        let started = Instant::now();
        let rows = self.run(&request).await?;
        info!(
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "billing query complete"
        );
        Ok(rows)
    }
}

async fn decode_response(resp: reqwest::Response) -> BillingResult<QueryResponse> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ApiErrorEnvelope>(&body)
            .map(|e| e.error)
            .map(|e| (e.code, e.message))
            .unwrap_or_else(|_| (status.as_u16(), body.trim().to_string()));
        warn!(status = %status, "BigQuery request failed");
        return Err(BillingError::Api {
            code: message.0,
            message: message.1,
        });
    }

    serde_json::from_str(&body).map_err(|e| BillingError::Decode(e.to_string()))
}

/// Entries in `errors` alongside a result set are warnings; without one
/// the job failed.
fn check_errors(resp: &QueryResponse) -> BillingResult<()> {
    if resp.errors.is_empty() {
        return Ok(());
    }
    let messages: Vec<String> = resp
        .errors
        .iter()
        .map(|e| {
            format!(
                "{}: {}",
                e.reason.as_deref().unwrap_or("error"),
                e.message.as_deref().unwrap_or("(no message)")
            )
        })
        .collect();
    if resp.schema.is_none() && resp.rows.is_empty() {
        return Err(BillingError::Query(messages.join("; ")));
    }
    warn!(warnings = %messages.join("; "), "billing query completed with warnings");
    Ok(())
}

fn decode_rows(rows: &[TableRow], columns: Columns) -> BillingResult<Vec<ServiceCost>> {
    rows.iter()
        .map(|row| {
            let cell = |i: usize| {
                row.f
                    .get(i)
                    .map(|c| &c.v)
                    .ok_or_else(|| BillingError::Decode(format!("row has no column {i}")))
            };
            Ok(ServiceCost {
                service: match cell(columns.service)? {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => "(unknown service)".to_string(),
                    other => other.to_string(),
                },
                recent_cost: decode_number(cell(columns.recent)?)?,
                baseline_total: decode_number(cell(columns.baseline)?)?,
            })
        })
        .collect()
}

/// BigQuery encodes FLOAT64 cells as strings; `null` sums read as zero.
fn decode_number(value: &serde_json::Value) -> BillingResult<f64> {
    match value {
        serde_json::Value::Null => Ok(0.0),
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| BillingError::Decode(format!("non-finite number {n}"))),
        serde_json::Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| BillingError::Decode(format!("bad numeric cell {s:?}: {e}"))),
        other => Err(BillingError::Decode(format!("unexpected cell {other}"))),
    }
}
