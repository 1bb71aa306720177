//! Error types for billing queries.

use std::time::Duration;

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("credentials error: {0}")]
    Credentials(String),

    #[error("token request failed: {0}")]
    Token(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("BigQuery API error {code}: {message}")]
    Api { code: u16, message: String },

    #[error("query failed: {0}")]
    Query(String),

    #[error("query did not complete within {0:?}")]
    Timeout(Duration),

    #[error("unexpected response: {0}")]
    Decode(String),
}
