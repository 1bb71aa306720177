//! End-to-end job runs: fixed billing rows, mock Slack and GitHub servers,
//! real state store.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde_json::{Value, json};

use costwatch_billing::{BillingError, BillingResult, CostSource};
use costwatch_cli::schedule;
use costwatch_cli::{Job, RunOptions};
use costwatch_core::{Channel, ChannelOutcome, Detector, Secret, ServiceCost, Thresholds};
use costwatch_notify::{Dispatcher, GitHubIssues, RetryPolicy, SlackNotifier};
use costwatch_state::StateStore;

struct FixedRows(Vec<ServiceCost>);

impl CostSource for FixedRows {
    async fn service_costs(
        &self,
        _report_date: NaiveDate,
        _baseline_days: u32,
    ) -> BillingResult<Vec<ServiceCost>> {
        Ok(self.0.clone())
    }
}

struct Broken;

impl CostSource for Broken {
    async fn service_costs(
        &self,
        _report_date: NaiveDate,
        _baseline_days: u32,
    ) -> BillingResult<Vec<ServiceCost>> {
        Err(BillingError::Api {
            code: 403,
            message: "Access Denied: Table acme-billing:exports.gcp_billing_export_v1".to_string(),
        })
    }
}

#[derive(Clone, Default)]
struct Inbox {
    slack: Arc<Mutex<Vec<Value>>>,
    issues: Arc<Mutex<Vec<Value>>>,
}

async fn serve(inbox: Inbox) -> String {
    async fn hook(State(inbox): State<Inbox>, Json(body): Json<Value>) -> &'static str {
        inbox.slack.lock().unwrap().push(body);
        "ok"
    }
    async fn issue(State(inbox): State<Inbox>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        let mut issues = inbox.issues.lock().unwrap();
        issues.push(body);
        let n = issues.len();
        (
            StatusCode::CREATED,
            Json(json!({
                "number": n,
                "html_url": format!("https://github.com/acme/infra/issues/{n}")
            })),
        )
    }

    let router = Router::new()
        .route("/hook", post(hook))
        .route("/repos/{owner}/{repo}/issues", post(issue))
        .with_state(inbox);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn row(service: &str, recent: f64, baseline_total: f64) -> ServiceCost {
    ServiceCost {
        service: service.to_string(),
        recent_cost: recent,
        baseline_total,
    }
}

fn spiky_rows() -> Vec<ServiceCost> {
    vec![
        // 700 / 7 = 100 per day; 150 > 100 + 30.
        row("Compute Engine", 150.0, 700.0),
        // 10 per day; 12 < 10 + 5.
        row("Cloud Storage", 12.0, 70.0),
        // New service above the floor.
        row("Vertex AI", 9.5, 0.0),
    ]
}

fn dispatcher(base: &str) -> Dispatcher {
    let http = reqwest::Client::new();
    Dispatcher::new(
        Some(
            SlackNotifier::new(http.clone(), Secret::new(format!("{base}/hook")))
                .with_retry(RetryPolicy::none()),
        ),
        Some(
            GitHubIssues::new(http, base, "acme/infra", Secret::new("ghp_test"))
                .with_labels(vec!["cost-anomaly".to_string()])
                .with_retry(RetryPolicy::none()),
        ),
    )
}

fn build_job<S: CostSource>(source: S, base: &str, state: StateStore) -> Job<S> {
    Job::new(
        source,
        Detector::new(Thresholds::default()),
        dispatcher(base),
        state,
        20,
    )
}

fn may2() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()
}

#[tokio::test]
async fn anomalies_are_posted_and_recorded() {
    let inbox = Inbox::default();
    let base = serve(inbox.clone()).await;
    let job = build_job(FixedRows(spiky_rows()), &base, StateStore::open_in_memory().unwrap());

    let outcome = job.run(may2(), RunOptions::default()).await.unwrap();

    let flagged: Vec<&str> = outcome.report.anomalies.iter().map(|a| a.service.as_str()).collect();
    assert_eq!(flagged, vec!["Compute Engine", "Vertex AI"]);
    assert_eq!(outcome.report.services_checked, 3);

    assert_eq!(
        outcome.deliveries,
        vec![
            (Channel::Slack, ChannelOutcome::Sent { detail: None }),
            (
                Channel::GithubIssue,
                ChannelOutcome::Sent {
                    detail: Some("https://github.com/acme/infra/issues/1".to_string())
                }
            ),
        ]
    );

    let slack = inbox.slack.lock().unwrap();
    let text = slack[0]["text"].as_str().unwrap();
    assert!(text.starts_with("*GCP Cost Anomalies for 2024-05-02*"));
    assert!(text.contains("Compute Engine"));
    assert!(!text.contains("Cloud Storage"));

    let issues = inbox.issues.lock().unwrap();
    assert_eq!(issues[0]["title"], "[Cost Anomaly] 2 anomaly(s) on 2024-05-02");
    assert!(issues[0]["body"].as_str().unwrap().ends_with("Detected by automated job."));
    assert_eq!(issues[0]["labels"], json!(["cost-anomaly"]));

    let runs = job.state().list_runs(10).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].report_date, may2());
    assert_eq!(runs[0].fingerprint.as_deref(), Some(outcome.report.fingerprint().as_str()));
}

#[tokio::test]
async fn repeat_run_does_not_renotify_same_anomalies() {
    let inbox = Inbox::default();
    let base = serve(inbox.clone()).await;
    let job = build_job(FixedRows(spiky_rows()), &base, StateStore::open_in_memory().unwrap());

    job.run(may2(), RunOptions::default()).await.unwrap();
    let second = job.run(may2(), RunOptions::default()).await.unwrap();

    assert!(second.deliveries.iter().all(|(_, o)| matches!(
        o,
        ChannelOutcome::Skipped { reason } if reason.contains("already notified")
    )));
    assert_eq!(inbox.slack.lock().unwrap().len(), 1);
    assert_eq!(inbox.issues.lock().unwrap().len(), 1);

    let forced = job
        .run(
            may2(),
            RunOptions {
                dry_run: false,
                force: true,
            },
        )
        .await
        .unwrap();
    assert!(forced.deliveries.iter().all(|(_, o)| o.is_sent()));
    assert_eq!(inbox.slack.lock().unwrap().len(), 2);
    assert_eq!(job.state().list_runs(10).unwrap().len(), 3);
}

#[tokio::test]
async fn dedup_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.redb");
    let inbox = Inbox::default();
    let base = serve(inbox.clone()).await;

    {
        let job = build_job(FixedRows(spiky_rows()), &base, StateStore::open(&path).unwrap());
        job.run(may2(), RunOptions::default()).await.unwrap();
    }

    let job = build_job(FixedRows(spiky_rows()), &base, StateStore::open(&path).unwrap());
    job.run(may2(), RunOptions::default()).await.unwrap();
    assert_eq!(inbox.slack.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn changed_anomaly_set_is_notified_again() {
    let inbox = Inbox::default();
    let base = serve(inbox.clone()).await;
    let state = StateStore::open_in_memory().unwrap();

    build_job(FixedRows(spiky_rows()), &base, state.clone())
        .run(may2(), RunOptions::default())
        .await
        .unwrap();

    let mut rows = spiky_rows();
    rows.push(row("Cloud Run", 40.0, 70.0));
    build_job(FixedRows(rows), &base, state)
        .run(may2(), RunOptions::default())
        .await
        .unwrap();

    assert_eq!(inbox.slack.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn quiet_day_sends_nothing() {
    let inbox = Inbox::default();
    let base = serve(inbox.clone()).await;
    let job = build_job(
        FixedRows(vec![row("Compute Engine", 101.0, 700.0)]),
        &base,
        StateStore::open_in_memory().unwrap(),
    );

    let outcome = job.run(may2(), RunOptions::default()).await.unwrap();
    assert!(!outcome.has_anomalies());
    assert!(outcome.deliveries.is_empty());
    assert!(inbox.slack.lock().unwrap().is_empty());

    let runs = job.state().list_runs(1).unwrap();
    assert!(runs[0].fingerprint.is_none());
}

#[tokio::test]
async fn dry_run_skips_delivery() {
    let inbox = Inbox::default();
    let base = serve(inbox.clone()).await;
    let job = build_job(FixedRows(spiky_rows()), &base, StateStore::open_in_memory().unwrap());

    let outcome = job
        .run(
            may2(),
            RunOptions {
                dry_run: true,
                force: false,
            },
        )
        .await
        .unwrap();
    assert!(outcome.has_anomalies());
    assert!(outcome
        .deliveries
        .iter()
        .all(|(_, o)| matches!(o, ChannelOutcome::Skipped { .. })));
    assert!(inbox.slack.lock().unwrap().is_empty());

    // A dry run does not count as delivered.
    job.run(may2(), RunOptions::default()).await.unwrap();
    assert_eq!(inbox.slack.lock().unwrap().len(), 1);
    assert!(job.state().list_runs(10).unwrap()[1].dry_run);
}

#[tokio::test]
async fn query_failure_aborts_run() {
    let base = serve(Inbox::default()).await;
    let job = build_job(Broken, &base, StateStore::open_in_memory().unwrap());

    let err = job.run(may2(), RunOptions::default()).await.unwrap_err();
    let chain = format!("{err:#}");
    assert!(chain.contains("querying billing export for 2024-05-02"));
    assert!(chain.contains("Access Denied"));
    assert!(job.state().list_runs(10).unwrap().is_empty());
}

#[tokio::test]
async fn watch_loop_runs_until_shutdown() {
    let inbox = Inbox::default();
    let base = serve(inbox.clone()).await;
    let job = build_job(FixedRows(spiky_rows()), &base, StateStore::open_in_memory().unwrap());

    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = tx.send(true);
    });

    let runs = schedule::run_every(&job, Duration::from_millis(20), 1, RunOptions::default(), rx).await;
    assert!(runs >= 2, "expected several runs, got {runs}");
    // Same date and anomaly set every time: delivered once.
    assert_eq!(inbox.slack.lock().unwrap().len(), 1);
    assert_eq!(job.state().list_runs(100).unwrap().len() as u64, runs);
}

#[tokio::test]
async fn watch_loop_survives_failing_runs() {
    let base = serve(Inbox::default()).await;
    let job = build_job(Broken, &base, StateStore::open_in_memory().unwrap());

    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(true);
    });

    let runs = schedule::run_every(&job, Duration::from_millis(10), 1, RunOptions::default(), rx).await;
    assert!(runs >= 2);
}

#[tokio::test]
async fn watch_loop_skips_out_of_range_offset() {
    let inbox = Inbox::default();
    let base = serve(inbox.clone()).await;
    let job = build_job(FixedRows(spiky_rows()), &base, StateStore::open_in_memory().unwrap());

    let (tx, rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = tx.send(true);
    });

    let runs = schedule::run_every(&job, Duration::from_millis(10), u32::MAX, RunOptions::default(), rx).await;
    assert_eq!(runs, 0);
    assert!(job.state().list_runs(10).unwrap().is_empty());
    assert!(inbox.slack.lock().unwrap().is_empty());
}
