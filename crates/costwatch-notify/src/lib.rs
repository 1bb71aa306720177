//! costwatch-notify — delivery of anomaly reports.
//!
//! Posts to a Slack incoming webhook and opens GitHub issues. Each channel
//! retries transient failures with exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!   ├── SlackNotifier  (POST {"text": ...} to the webhook)
//!   ├── GitHubIssues   (POST /repos/{owner}/{repo}/issues)
//!   └── RetryPolicy    (500ms → 8s, 3 attempts, 429/5xx/transport only)
//! ```
//!
//! A channel that is unconfigured or fails never stops the others; the
//! dispatcher returns one [`ChannelOutcome`](costwatch_core::ChannelOutcome)
//! per channel.

pub mod dispatch;
pub mod error;
pub mod github;
pub mod retry;
pub mod slack;

pub use dispatch::{Dispatcher, Notification};
pub use error::{NotifyError, NotifyResult};
pub use github::{CreatedIssue, GitHubIssues};
pub use retry::RetryPolicy;
pub use slack::SlackNotifier;
