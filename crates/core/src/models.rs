//! Domain model types used throughout patchport.
//!
//! These are value objects passed by the batch runner through the pipeline:
//! parser → divergence detector → patch engine → PR workflow → summary.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Commits
// ---------------------------------------------------------------------------

/// Handle on the commit a [`CommitRecord`] was parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRef {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    /// Platform account linked to the commit author, when the platform could
    /// associate one.
    pub login: Option<String>,
}

impl CommitRef {
    /// `Name <email>` form used for `--author` and co-author trailers.
    pub fn author_ident(&self) -> String {
        format!("{} <{}>", self.author_name, self.author_email)
    }
}

/// A commit as listed by the hosting platform, before parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCommit {
    pub source: CommitRef,
    pub message: String,
}

/// One commit's logical identity: its cleaned title and upstream PR number.
///
/// Built by [`crate::commit_parser::parse`]. Validity is computed once at
/// construction and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    raw_message: String,
    title: Option<String>,
    pr_number: Option<u64>,
    source: CommitRef,
    valid: bool,
}

impl CommitRecord {
    pub(crate) fn new(
        raw_message: String,
        title: Option<String>,
        pr_number: Option<u64>,
        source: CommitRef,
    ) -> Self {
        let valid = pr_number.is_some() || title.is_some();
        Self {
            raw_message,
            title,
            pr_number,
            source,
            valid,
        }
    }

    pub fn raw_message(&self) -> &str {
        &self.raw_message
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn pr_number(&self) -> Option<u64> {
        self.pr_number
    }

    pub fn source(&self) -> &CommitRef {
        &self.source
    }

    pub fn sha(&self) -> &str {
        &self.source.sha
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Case-insensitive exact title comparison. Records without a title
    /// never match anything.
    pub fn has_same_title(&self, other: &CommitRecord) -> bool {
        match (self.title(), other.title()) {
            (Some(a), Some(b)) => a.to_lowercase() == b.to_lowercase(),
            _ => false,
        }
    }
}

/// Ordered sequence of commits pending migration, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationBatch {
    commits: Vec<CommitRecord>,
}

impl MigrationBatch {
    /// Build a batch from commits that are already oldest-first.
    pub fn from_oldest_first(commits: Vec<CommitRecord>) -> Self {
        Self { commits }
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommitRecord> {
        self.commits.iter()
    }

    pub fn as_slice(&self) -> &[CommitRecord] {
        &self.commits
    }
}

impl IntoIterator for MigrationBatch {
    type Item = CommitRecord;
    type IntoIter = std::vec::IntoIter<CommitRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.commits.into_iter()
    }
}

impl<'a> IntoIterator for &'a MigrationBatch {
    type Item = &'a CommitRecord;
    type IntoIter = std::slice::Iter<'a, CommitRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.commits.iter()
    }
}

// ---------------------------------------------------------------------------
// Pull requests
// ---------------------------------------------------------------------------

/// Change status of a file in a pull request, as reported by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Removed,
    Modified,
    Renamed,
    Copied,
    Changed,
    Unchanged,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
            Self::Renamed => write!(f, "renamed"),
            Self::Copied => write!(f, "copied"),
            Self::Changed => write!(f, "changed"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A file changed by an upstream commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub filename: String,
    pub status: FileStatus,
    /// Download location of the file's content at that commit.
    pub raw_url: Option<String>,
    pub previous_filename: Option<String>,
}

/// The upstream pull request a commit was merged from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
}

/// A pull request freshly opened on the downstream repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPullRequest {
    pub number: u64,
    pub html_url: String,
}

/// Merge strategy passed to the merge endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMethod {
    #[default]
    Squash,
    Merge,
    Rebase,
}

impl std::fmt::Display for MergeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Squash => write!(f, "squash"),
            Self::Merge => write!(f, "merge"),
            Self::Rebase => write!(f, "rebase"),
        }
    }
}

/// Result reported by the merge endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeResult {
    pub merged: bool,
    pub sha: Option<String>,
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result of replaying one commit onto a fresh downstream branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchOutcome {
    pub branch_name: String,
    pub conflicted: bool,
    pub conflicted_files: BTreeSet<String>,
    /// Files written or removed by the upstream-wins resolution.
    pub overwritten_files: BTreeSet<String>,
    pub pushed: bool,
}

/// Why the batch stopped after a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HaltReason {
    /// The replay conflicted; a human has to review the overwritten files.
    Conflict { files: BTreeSet<String> },
    /// The downstream PR is not mergeable.
    NotMergeable,
    /// The merge endpoint answered but did not merge.
    MergeIncomplete { message: Option<String> },
    /// A remote or local operation failed.
    Failed { error: String },
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conflict { files } => write!(f, "conflict in {} file(s)", files.len()),
            Self::NotMergeable => write!(f, "pull request is not mergeable"),
            Self::MergeIncomplete { message } => match message {
                Some(m) => write!(f, "merge did not complete: {}", m),
                None => write!(f, "merge did not complete"),
            },
            Self::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Result of driving one downstream pull request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkflowOutcome {
    pub created: bool,
    pub downstream_pr: Option<u64>,
    pub merged: bool,
    pub halt: Option<HaltReason>,
}

impl WorkflowOutcome {
    /// Mark the outcome as halted. A merged outcome is never halted.
    pub fn halted(mut self, reason: HaltReason) -> Self {
        self.merged = false;
        self.halt = Some(reason);
        self
    }

    pub fn failed(downstream_pr: Option<u64>, error: impl std::fmt::Display) -> Self {
        Self {
            created: downstream_pr.is_some(),
            downstream_pr,
            merged: false,
            halt: Some(HaltReason::Failed {
                error: error.to_string(),
            }),
        }
    }
}

/// Everything recorded about one attempted commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub commit: CommitRecord,
    pub patch: Option<PatchOutcome>,
    pub workflow: WorkflowOutcome,
}

impl CommitReport {
    pub fn succeeded(&self) -> bool {
        self.workflow.merged
    }
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationSummary {
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of commits the divergence detector reported as pending.
    pub pending: usize,
    /// One report per attempted commit, in replay order. Only the last one
    /// can be a failure.
    pub reports: Vec<CommitReport>,
}

impl MigrationSummary {
    pub fn new(pending: usize) -> Self {
        Self {
            started_at: Utc::now(),
            completed_at: None,
            pending,
            reports: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &CommitReport> {
        self.reports.iter().filter(|r| r.succeeded())
    }

    pub fn failed(&self) -> Option<&CommitReport> {
        self.reports.last().filter(|r| !r.succeeded())
    }

    /// Commits that were pending but never attempted because of a halt.
    pub fn skipped(&self) -> usize {
        self.pending.saturating_sub(self.reports.len())
    }

    pub fn is_halted(&self) -> bool {
        self.failed().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_ref() -> CommitRef {
        CommitRef {
            sha: "abc123".into(),
            author_name: "Alice".into(),
            author_email: "alice@example.com".into(),
            login: Some("alice".into()),
        }
    }

    #[test]
    fn test_validity_fixed_at_construction() {
        let r = CommitRecord::new("x".into(), Some("x".into()), None, commit_ref());
        assert!(r.is_valid());
        let r = CommitRecord::new("(#3)".into(), None, Some(3), commit_ref());
        assert!(r.is_valid());
        let r = CommitRecord::new(String::new(), None, None, commit_ref());
        assert!(!r.is_valid());
    }

    #[test]
    fn test_untitled_records_never_match() {
        let a = CommitRecord::new(String::new(), None, Some(1), commit_ref());
        let b = CommitRecord::new(String::new(), None, Some(1), commit_ref());
        assert!(!a.has_same_title(&b));
    }

    #[test]
    fn test_author_ident() {
        assert_eq!(commit_ref().author_ident(), "Alice <alice@example.com>");
    }

    #[test]
    fn test_file_status_deserialize() {
        let f: ChangedFile = serde_json::from_str(
            r#"{"filename":"a.txt","status":"removed","raw_url":null,"previous_filename":null}"#,
        )
        .unwrap();
        assert_eq!(f.status, FileStatus::Removed);
        let f: ChangedFile =
            serde_json::from_str(r#"{"filename":"a.txt","status":"brand-new","raw_url":null,"previous_filename":null}"#)
                .unwrap();
        assert_eq!(f.status, FileStatus::Unknown);
    }

    #[test]
    fn test_summary_failed_only_last() {
        let commit = CommitRecord::new("t".into(), Some("t".into()), Some(1), commit_ref());
        let ok = CommitReport {
            commit: commit.clone(),
            patch: None,
            workflow: WorkflowOutcome {
                created: true,
                downstream_pr: Some(10),
                merged: true,
                halt: None,
            },
        };
        let bad = CommitReport {
            commit,
            patch: None,
            workflow: WorkflowOutcome::failed(None, "boom"),
        };
        let mut summary = MigrationSummary::new(3);
        summary.reports.push(ok);
        assert!(!summary.is_halted());
        summary.reports.push(bad);
        assert!(summary.is_halted());
        assert_eq!(summary.succeeded().count(), 1);
        assert_eq!(summary.skipped(), 1);
    }

    #[test]
    fn test_halt_reason_display() {
        assert_eq!(
            HaltReason::NotMergeable.to_string(),
            "pull request is not mergeable"
        );
        let files: BTreeSet<String> = ["a".to_string(), "b".to_string()].into();
        assert_eq!(
            HaltReason::Conflict { files }.to_string(),
            "conflict in 2 file(s)"
        );
    }
}
