//! GitHub issue creation.

use std::time::Duration;

use costwatch_core::Secret;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NotifyError, NotifyResult, check_status};
use crate::retry::RetryPolicy;

const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("costwatch/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct NewIssue<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "no_labels")]
    labels: &'a [String],
}

fn no_labels(labels: &&[String]) -> bool {
    labels.is_empty()
}

/// The parts of GitHub's issue response we report back.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedIssue {
    pub number: u64,
    pub html_url: String,
}

pub struct GitHubIssues {
    http: reqwest::Client,
    api_url: String,
    /// `owner/repo`.
    repository: String,
    token: Secret,
    labels: Vec<String>,
    retry: RetryPolicy,
}

impl GitHubIssues {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        repository: impl Into<String>,
        token: Secret,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            repository: repository.into(),
            token,
            labels: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Open an issue and return its number and URL.
    pub async fn create(&self, title: &str, body: &str) -> NotifyResult<CreatedIssue> {
        let url = format!("{}/repos/{}/issues", self.api_url, self.repository);
        let url = url.as_str();
        let issue = &NewIssue {
            title,
            body,
            labels: &self.labels,
        };

        let created = self
            .retry
            .run("github issue", move || async move {
                let resp = self
                    .http
                    .post(url)
                    .bearer_auth(self.token.expose())
                    .header("Accept", "application/vnd.github+json")
                    .header("X-GitHub-Api-Version", API_VERSION)
                    .header(reqwest::header::USER_AGENT, USER_AGENT)
                    .timeout(REQUEST_TIMEOUT)
                    .json(issue)
                    .send()
                    .await?;
                let resp = check_status("github", resp).await?;
                resp.json::<CreatedIssue>()
                    .await
                    .map_err(|e| NotifyError::Decode {
                        service: "github",
                        message: e.without_url().to_string(),
                    })
            })
            .await?;

        info!(
            repository = %self.repository,
            number = created.number,
            url = %created.html_url,
            "github issue created"
        );
        Ok(created)
    }
}
