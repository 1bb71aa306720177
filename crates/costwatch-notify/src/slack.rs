//! Slack incoming-webhook notifier.

use std::time::Duration;

use costwatch_core::Secret;
use serde::Serialize;
use tracing::info;

use crate::error::{NotifyError, NotifyResult, check_status};
use crate::retry::RetryPolicy;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
}

pub struct SlackNotifier {
    http: reqwest::Client,
    webhook: Secret,
    retry: RetryPolicy,
}

impl SlackNotifier {
    pub fn new(http: reqwest::Client, webhook: Secret) -> Self {
        Self {
            http,
            webhook,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Post a mrkdwn message to the webhook.
    pub async fn post(&self, text: &str) -> NotifyResult<()> {
        let payload = &WebhookPayload { text };
        self.retry
            .run("slack webhook", move || async move {
                let resp = self
                    .http
                    .post(self.webhook.expose())
                    .timeout(REQUEST_TIMEOUT)
                    .json(payload)
                    .send()
                    .await?;
                check_status("slack", resp).await?;
                Ok::<_, NotifyError>(())
            })
            .await?;
        info!(bytes = text.len(), "slack notification sent");
        Ok(())
    }
}
