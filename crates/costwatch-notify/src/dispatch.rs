//! Fan a notification out to every configured channel.
//!
//! A channel that is not configured is skipped with a warning; a channel
//! that fails is logged and reported. Neither aborts the run.

use costwatch_core::config::GitHubSettings;
use costwatch_core::{Channel, ChannelOutcome, Settings};
use tracing::{error, info, warn};

use crate::github::GitHubIssues;
use crate::retry::RetryPolicy;
use crate::slack::SlackNotifier;

/// The texts sent for one detection report.
#[derive(Debug, Clone)]
pub struct Notification {
    /// Chat message (Slack mrkdwn).
    pub message: String,
    pub issue_title: String,
    pub issue_body: String,
}

enum GitHubTarget {
    Disabled,
    Misconfigured(&'static str),
    Enabled(GitHubIssues),
}

pub struct Dispatcher {
    slack: Option<SlackNotifier>,
    github: GitHubTarget,
}

impl Dispatcher {
    pub fn new(slack: Option<SlackNotifier>, github: Option<GitHubIssues>) -> Self {
        Self {
            slack,
            github: match github {
                Some(issues) => GitHubTarget::Enabled(issues),
                None => GitHubTarget::Disabled,
            },
        }
    }

    pub fn from_settings(settings: &Settings, http: reqwest::Client) -> Self {
        Self::from_settings_with_retry(settings, http, RetryPolicy::default())
    }

    pub fn from_settings_with_retry(
        settings: &Settings,
        http: reqwest::Client,
        retry: RetryPolicy,
    ) -> Self {
        let slack = settings
            .slack_webhook
            .clone()
            .map(|webhook| SlackNotifier::new(http.clone(), webhook).with_retry(retry));
        Self {
            slack,
            github: github_target(&settings.github, http, retry),
        }
    }

    /// Channels that would attempt delivery.
    pub fn active_channels(&self) -> Vec<Channel> {
        let mut channels = Vec::new();
        if self.slack.is_some() {
            channels.push(Channel::Slack);
        }
        if matches!(self.github, GitHubTarget::Enabled(_)) {
            channels.push(Channel::GithubIssue);
        }
        channels
    }

    /// Deliver to each channel, skipping those listed in `already_sent`.
    pub async fn dispatch(
        &self,
        notification: &Notification,
        already_sent: &[Channel],
    ) -> Vec<(Channel, ChannelOutcome)> {
        let mut outcomes = Vec::with_capacity(2);

        let slack = match &self.slack {
            _ if already_sent.contains(&Channel::Slack) => skipped("already notified for this anomaly set"),
            None => {
                warn!("SLACK_WEBHOOK_URL not set, skipping Slack post");
                skipped("SLACK_WEBHOOK_URL not set")
            }
            Some(notifier) => match notifier.post(&notification.message).await {
                Ok(()) => ChannelOutcome::Sent { detail: None },
                Err(e) => {
                    error!(error = %e, "failed to send Slack message");
                    ChannelOutcome::Failed { error: e.to_string() }
                }
            },
        };
        outcomes.push((Channel::Slack, slack));

        let github = match &self.github {
            GitHubTarget::Disabled => skipped("issue creation disabled"),
            _ if already_sent.contains(&Channel::GithubIssue) => {
                skipped("already notified for this anomaly set")
            }
            GitHubTarget::Misconfigured(reason) => {
                warn!(reason, "skipping issue creation");
                skipped(reason)
            }
            GitHubTarget::Enabled(issues) => {
                match issues
                    .create(&notification.issue_title, &notification.issue_body)
                    .await
                {
                    Ok(created) => ChannelOutcome::Sent {
                        detail: Some(created.html_url),
                    },
                    Err(e) => {
                        error!(repository = issues.repository(), error = %e, "failed to create GitHub issue");
                        ChannelOutcome::Failed { error: e.to_string() }
                    }
                }
            }
        };
        outcomes.push((Channel::GithubIssue, github));

        let sent = outcomes.iter().filter(|(_, o)| o.is_sent()).count();
        info!(sent, channels = outcomes.len(), "dispatch complete");
        outcomes
    }
}

fn github_target(settings: &GitHubSettings, http: reqwest::Client, retry: RetryPolicy) -> GitHubTarget {
    if !settings.create_issue {
        return GitHubTarget::Disabled;
    }
    match (&settings.token, &settings.repository) {
        (Some(token), Some(repository)) => GitHubTarget::Enabled(
            GitHubIssues::new(http, settings.api_url.clone(), repository.clone(), token.clone())
                .with_labels(settings.labels.clone())
                .with_retry(retry),
        ),
        _ => GitHubTarget::Misconfigured("GITHUB_TOKEN or GITHUB_REPOSITORY not set"),
    }
}

fn skipped(reason: &str) -> ChannelOutcome {
    ChannelOutcome::Skipped {
        reason: reason.to_string(),
    }
}
