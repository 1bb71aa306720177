//! Error types for notification delivery.

use thiserror::Error;

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Carries no request URL; a Slack webhook URL is itself a credential.
    #[error("request failed: {0}")]
    Transport(reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("invalid response from {service}: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.without_url())
    }
}

impl NotifyError {
    /// Transport failures, rate limits and server errors are worth another
    /// attempt; other client errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotifyError::Transport(e) => !e.is_builder(),
            NotifyError::Status { status, .. } => *status == 429 || *status >= 500,
            NotifyError::Decode { .. } => false,
        }
    }
}

/// Map a non-2xx response to [`NotifyError::Status`].
pub(crate) async fn check_status(
    service: &'static str,
    resp: reqwest::Response,
) -> NotifyResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(NotifyError::Status {
        service,
        status: status.as_u16(),
        body: body.trim().chars().take(500).collect(),
    })
}
