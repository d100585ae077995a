//! Run status notifications.
//!
//! Summaries go to a DingTalk robot when one is configured; without one,
//! [`Notifier`] is a no-op.

pub mod dingtalk;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::errors::NotificationError;
use crate::git::remote_url::{pr_ref, pull_request_url};
use crate::models::{CommitReport, MigrationSummary};

/// Title used for the batch status message.
pub const STATUS_TITLE: &str = "Auto Merge Status";

/// Where run summaries go.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Deliver a markdown status message.
    async fn send_status(&self, title: &str, body: &str) -> Result<(), NotificationError>;
}

/// Notifier backed by the configured chat robot, if any.
pub struct Notifier {
    dingtalk: Option<dingtalk::DingTalkNotifier>,
}

impl Notifier {
    /// Create a notifier from a resolved notification configuration.
    pub fn new(config: &NotificationConfig) -> Self {
        let dingtalk = config.dingtalk_access_token.as_ref().map(|token| {
            info!(signed = config.dingtalk_secret.is_some(), "DingTalk notifications enabled");
            dingtalk::DingTalkNotifier::new(token.clone(), config.dingtalk_secret.clone())
        });
        Self { dingtalk }
    }
}

#[async_trait]
impl NotificationSink for Notifier {
    fn is_configured(&self) -> bool {
        self.dingtalk.is_some()
    }

    async fn send_status(&self, title: &str, body: &str) -> Result<(), NotificationError> {
        let Some(ref dingtalk) = self.dingtalk else {
            debug!(title, "no notification channel, dropping status");
            return Ok(());
        };
        info!(title, "sending status notification");
        dingtalk.send_markdown(title, body).await.inspect_err(|e| {
            warn!(error = %e, "DingTalk notification failed");
        })
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Repository coordinates needed to render links in a summary.
#[derive(Debug, Clone, Copy)]
pub struct SummaryLinks<'a> {
    pub web_base: &'a str,
    pub source_repo: &'a str,
    pub target_repo: &'a str,
}

/// Render the batch status as markdown: merged entries, then the failed one.
pub fn format_summary_markdown(summary: &MigrationSummary, links: SummaryLinks<'_>) -> String {
    let merged: Vec<String> = summary
        .succeeded()
        .map(|r| report_line(r, links))
        .collect();
    let failed: Vec<String> = summary.failed().map(|r| report_line(r, links)).into_iter().collect();

    format!(
        "### {}\nMerge successfully:\n\n{}\n\nFailed to merge:\n\n{}",
        STATUS_TITLE,
        join_or_none(&merged),
        join_or_none(&failed)
    )
}

fn join_or_none(lines: &[String]) -> String {
    if lines.is_empty() {
        "None".to_string()
    } else {
        lines.join("\n\n")
    }
}

fn markdown_link(web_base: &str, repo: &str, number: u64) -> String {
    format!(
        "[{}]({})",
        pr_ref(repo, number),
        pull_request_url(web_base, repo, number)
    )
}

/// `[src#N](url) -> [dst#M](url) login`
fn report_line(report: &CommitReport, links: SummaryLinks<'_>) -> String {
    let mut line = match report.commit.pr_number() {
        Some(n) => markdown_link(links.web_base, links.source_repo, n),
        None => {
            let sha = report.commit.sha();
            format!("`{}`", &sha[..sha.len().min(8)])
        }
    };
    if let Some(m) = report.workflow.downstream_pr {
        line.push_str(" -> ");
        line.push_str(&markdown_link(links.web_base, links.target_repo, m));
    }
    let source = report.commit.source();
    line.push(' ');
    line.push_str(source.login.as_deref().unwrap_or(&source.author_name));
    line
}
