//! Repository collaborators: the hosting platform API and the local working
//! copy.
//!
//! The engine only talks to these through [`RepositoryApi`] and
//! [`VersionControl`], so tests can substitute in-memory fakes.

pub mod client;
pub mod github;
pub mod remote_url;

use std::path::Path;

use async_trait::async_trait;

use crate::errors::{GitError, GitHubError};
use crate::models::{
    ChangedFile, CreatedPullRequest, MergeMethod, MergeResult, RemoteCommit, SourcePullRequest,
};

pub use client::GitClient;
pub use github::GitHubClient;

/// Operations the engine needs from the repository hosting platform.
///
/// `repo` arguments are always in `owner/name` form.
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// Login of the account the API token belongs to.
    async fn authenticated_login(&self) -> Result<String, GitHubError>;

    /// Up to `limit` most recent commits on `branch`, newest first.
    async fn list_commits(
        &self,
        repo: &str,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<RemoteCommit>, GitHubError>;

    /// A pull request's title and body.
    async fn get_pull_request(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<SourcePullRequest, GitHubError>;

    /// Files changed by commit `sha`, with content references pinned to
    /// that commit.
    async fn get_commit_files(&self, repo: &str, sha: &str)
        -> Result<Vec<ChangedFile>, GitHubError>;

    /// `None` while the platform is still computing mergeability.
    async fn is_mergeable(&self, repo: &str, number: u64) -> Result<Option<bool>, GitHubError>;

    async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<CreatedPullRequest, GitHubError>;

    async fn add_labels(&self, repo: &str, number: u64, labels: &[String])
        -> Result<(), GitHubError>;

    async fn merge_pull_request(
        &self,
        repo: &str,
        number: u64,
        method: MergeMethod,
        commit_title: &str,
    ) -> Result<MergeResult, GitHubError>;

    async fn list_org_members(&self, org: &str) -> Result<Vec<String>, GitHubError>;

    async fn create_issue_comment(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError>;

    /// Fetch the exact bytes behind a file content reference.
    async fn download_raw(&self, url: &str) -> Result<Vec<u8>, GitHubError>;
}

/// Result of replaying a commit in the working copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Replay {
    /// The commit applied cleanly and was committed.
    Applied,
    /// The replay stopped; `output` is what the tool reported.
    Rejected { output: String },
}

/// Operations the engine needs from the local working copy of the
/// downstream repository.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Root of the working tree.
    fn workdir(&self) -> &Path;

    /// Set the repository-local committer identity.
    async fn set_identity(&self, name: &str, email: &str) -> Result<(), GitError>;

    /// Point `name` at `url`, replacing any existing remote of that name.
    async fn replace_remote(&self, name: &str, url: &str) -> Result<(), GitError>;

    /// Fetch a single branch from a remote into its remote-tracking ref.
    async fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError>;

    /// Remove untracked files from the working tree.
    async fn clean(&self) -> Result<(), GitError>;

    /// Create (or reset) branch `name` at `<remote>/<base>` and check it out.
    async fn create_branch(&self, name: &str, remote: &str, base: &str) -> Result<(), GitError>;

    async fn cherry_pick(&self, sha: &str) -> Result<Replay, GitError>;

    async fn abort_cherry_pick(&self) -> Result<(), GitError>;

    /// Stage every change in the working tree, deletions included.
    async fn stage_all(&self) -> Result<(), GitError>;

    /// Commit the index on top of HEAD. Returns the new commit id.
    async fn commit(
        &self,
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<String, GitError>;

    async fn push(&self, remote: &str, branch: &str) -> Result<(), GitError>;
}
