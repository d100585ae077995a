//! In-memory fakes of the repository, working copy and notification ports.
//!
//! Each fake records the calls it receives and supports error injection so
//! failure paths can be driven without a network or a real repository.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use patchport_core::config::{
    AppConfig, GitHubConfig, MigrationConfig, NotificationConfig, RunnerConfig, SourceConfig,
    TargetConfig,
};
use patchport_core::errors::{GitError, GitHubError, NotificationError};
use patchport_core::git::{Replay, RepositoryApi, VersionControl};
use patchport_core::models::{
    ChangedFile, CommitRef, CreatedPullRequest, FileStatus, MergeMethod, MergeResult,
    RemoteCommit, SourcePullRequest,
};
use patchport_core::NotificationSink;

pub const SOURCE_REPO: &str = "acme/widgets";
pub const TARGET_REPO: &str = "acme-inc/widgets-ee";
pub const BOT: &str = "sync-bot";

pub fn test_config(workdir: &Path) -> AppConfig {
    AppConfig {
        runner: RunnerConfig {
            log_level: "debug".into(),
            workdir: workdir.to_path_buf(),
        },
        source: SourceConfig {
            repo: SOURCE_REPO.into(),
            branch: "master".into(),
            remote_name: "community".into(),
            members_org: None,
        },
        target: TargetConfig {
            repo: TARGET_REPO.into(),
            branch: "master".into(),
            remote_name: "origin".into(),
        },
        github: GitHubConfig {
            token: Some("test-token".into()),
            ..GitHubConfig::default()
        },
        migration: MigrationConfig {
            mergeable_poll_attempts: 3,
            mergeable_poll_interval_secs: 0,
            ..MigrationConfig::default()
        },
        notifications: NotificationConfig::default(),
    }
}

pub fn remote_commit(sha: &str, message: &str, login: &str) -> RemoteCommit {
    RemoteCommit {
        source: CommitRef {
            sha: sha.into(),
            author_name: format!("{} name", login),
            author_email: format!("{}@example.com", login),
            login: Some(login.into()),
        },
        message: message.into(),
    }
}

/// A file modified by commit `sha`, its content pinned to that commit.
pub fn modified(sha: &str, path: &str) -> ChangedFile {
    ChangedFile {
        filename: path.into(),
        status: FileStatus::Modified,
        raw_url: Some(raw_url(sha, path)),
        previous_filename: None,
    }
}

pub fn removed(path: &str) -> ChangedFile {
    ChangedFile {
        filename: path.into(),
        status: FileStatus::Removed,
        raw_url: None,
        previous_filename: None,
    }
}

pub fn raw_url(rev: &str, path: &str) -> String {
    format!("https://raw.example/{}/{}", rev, path)
}

// ---------------------------------------------------------------------------
// Repository API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePrCall {
    pub repo: String,
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeCall {
    pub number: u64,
    pub method: MergeMethod,
    pub commit_title: String,
}

pub struct FakeApi {
    login: String,
    next_pr_number: AtomicU64,
    commits: Mutex<HashMap<String, Vec<RemoteCommit>>>,
    pull_requests: Mutex<HashMap<u64, SourcePullRequest>>,
    commit_files: Mutex<HashMap<String, Vec<ChangedFile>>>,
    raw: Mutex<HashMap<String, Vec<u8>>>,
    members: Mutex<Vec<String>>,
    /// Mergeability answers keyed by head branch, consumed front to back.
    mergeable_by_head: Mutex<HashMap<String, Vec<Option<bool>>>>,
    merge_refused_for: Mutex<HashSet<String>>,
    heads: Mutex<HashMap<u64, String>>,
    // Call tracking
    pub create_pr_calls: Mutex<Vec<CreatePrCall>>,
    pub label_calls: Mutex<Vec<(u64, Vec<String>)>>,
    pub comment_calls: Mutex<Vec<(u64, String)>>,
    pub merge_calls: Mutex<Vec<MergeCall>>,
    pub mergeable_calls: Mutex<Vec<u64>>,
    pub get_pr_calls: Mutex<Vec<u64>>,
    pub commit_files_calls: Mutex<Vec<(String, String)>>,
    pub download_calls: Mutex<Vec<String>>,
    // Error injection
    error_on_members: Mutex<bool>,
    error_on_create_pr: Mutex<Option<String>>,
    error_on_login: Mutex<bool>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            login: BOT.into(),
            next_pr_number: AtomicU64::new(1000),
            commits: Mutex::new(HashMap::new()),
            pull_requests: Mutex::new(HashMap::new()),
            commit_files: Mutex::new(HashMap::new()),
            raw: Mutex::new(HashMap::new()),
            members: Mutex::new(Vec::new()),
            mergeable_by_head: Mutex::new(HashMap::new()),
            merge_refused_for: Mutex::new(HashSet::new()),
            heads: Mutex::new(HashMap::new()),
            create_pr_calls: Mutex::new(Vec::new()),
            label_calls: Mutex::new(Vec::new()),
            comment_calls: Mutex::new(Vec::new()),
            merge_calls: Mutex::new(Vec::new()),
            mergeable_calls: Mutex::new(Vec::new()),
            get_pr_calls: Mutex::new(Vec::new()),
            commit_files_calls: Mutex::new(Vec::new()),
            download_calls: Mutex::new(Vec::new()),
            error_on_members: Mutex::new(false),
            error_on_create_pr: Mutex::new(None),
            error_on_login: Mutex::new(false),
        }
    }

    /// Newest first, as the platform lists them.
    pub fn set_commits(&self, repo: &str, commits: Vec<RemoteCommit>) {
        self.commits.lock().unwrap().insert(repo.into(), commits);
    }

    pub fn add_pull_request(&self, number: u64, title: &str) {
        self.pull_requests.lock().unwrap().insert(
            number,
            SourcePullRequest {
                number,
                title: title.into(),
                body: Some(format!("Body of #{}", number)),
            },
        );
    }

    pub fn set_commit_files(&self, sha: &str, files: Vec<ChangedFile>) {
        self.commit_files
            .lock()
            .unwrap()
            .insert(sha.into(), files);
    }

    /// Content of `path` as of revision `rev` (a commit sha or a branch).
    pub fn set_raw(&self, rev: &str, path: &str, content: &[u8]) {
        self.raw
            .lock()
            .unwrap()
            .insert(raw_url(rev, path), content.to_vec());
    }

    pub fn set_members(&self, members: &[&str]) {
        *self.members.lock().unwrap() = members.iter().map(|m| m.to_string()).collect();
    }

    pub fn set_mergeable(&self, head: &str, answers: Vec<Option<bool>>) {
        self.mergeable_by_head
            .lock()
            .unwrap()
            .insert(head.into(), answers);
    }

    pub fn refuse_merge(&self, head: &str) {
        self.merge_refused_for.lock().unwrap().insert(head.into());
    }

    pub fn fail_members(&self) {
        *self.error_on_members.lock().unwrap() = true;
    }

    pub fn fail_create_pr(&self, msg: &str) {
        *self.error_on_create_pr.lock().unwrap() = Some(msg.into());
    }

    pub fn fail_login(&self) {
        *self.error_on_login.lock().unwrap() = true;
    }

    pub fn created_heads(&self) -> Vec<String> {
        self.create_pr_calls
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.head.clone())
            .collect()
    }

    fn head_of(&self, number: u64) -> String {
        self.heads
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RepositoryApi for FakeApi {
    async fn authenticated_login(&self) -> Result<String, GitHubError> {
        if *self.error_on_login.lock().unwrap() {
            return Err(GitHubError::AuthenticationFailed("HTTP 401".into()));
        }
        Ok(self.login.clone())
    }

    async fn list_commits(
        &self,
        repo: &str,
        _branch: &str,
        limit: usize,
    ) -> Result<Vec<RemoteCommit>, GitHubError> {
        let commits = self.commits.lock().unwrap();
        let list = commits.get(repo).cloned().unwrap_or_default();
        Ok(list.into_iter().take(limit).collect())
    }

    async fn get_pull_request(
        &self,
        _repo: &str,
        number: u64,
    ) -> Result<SourcePullRequest, GitHubError> {
        self.get_pr_calls.lock().unwrap().push(number);
        self.pull_requests
            .lock()
            .unwrap()
            .get(&number)
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("pull/{}", number)))
    }

    async fn get_commit_files(
        &self,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<ChangedFile>, GitHubError> {
        self.commit_files_calls
            .lock()
            .unwrap()
            .push((repo.into(), sha.into()));
        self.commit_files
            .lock()
            .unwrap()
            .get(sha)
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(format!("commits/{}", sha)))
    }

    async fn is_mergeable(&self, _repo: &str, number: u64) -> Result<Option<bool>, GitHubError> {
        self.mergeable_calls.lock().unwrap().push(number);
        let head = self.head_of(number);
        let mut answers = self.mergeable_by_head.lock().unwrap();
        match answers.get_mut(&head) {
            Some(queue) if !queue.is_empty() => Ok(queue.remove(0)),
            Some(_) => Ok(None),
            None => Ok(Some(true)),
        }
    }

    async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<CreatedPullRequest, GitHubError> {
        if let Some(msg) = self.error_on_create_pr.lock().unwrap().clone() {
            return Err(GitHubError::ApiError {
                status: 422,
                body: msg,
            });
        }
        self.create_pr_calls.lock().unwrap().push(CreatePrCall {
            repo: repo.into(),
            title: title.into(),
            body: body.into(),
            head: head.into(),
            base: base.into(),
        });
        let number = self.next_pr_number.fetch_add(1, Ordering::SeqCst);
        self.heads.lock().unwrap().insert(number, head.into());
        Ok(CreatedPullRequest {
            number,
            html_url: format!("https://github.com/{}/pull/{}", repo, number),
        })
    }

    async fn add_labels(
        &self,
        _repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<(), GitHubError> {
        self.label_calls
            .lock()
            .unwrap()
            .push((number, labels.to_vec()));
        Ok(())
    }

    async fn merge_pull_request(
        &self,
        _repo: &str,
        number: u64,
        method: MergeMethod,
        commit_title: &str,
    ) -> Result<MergeResult, GitHubError> {
        self.merge_calls.lock().unwrap().push(MergeCall {
            number,
            method,
            commit_title: commit_title.into(),
        });
        if self
            .merge_refused_for
            .lock()
            .unwrap()
            .contains(&self.head_of(number))
        {
            return Ok(MergeResult {
                merged: false,
                sha: None,
                message: Some("Head branch was modified".into()),
            });
        }
        Ok(MergeResult {
            merged: true,
            sha: Some(format!("merge{}", number)),
            message: Some("Pull Request successfully merged".into()),
        })
    }

    async fn list_org_members(&self, _org: &str) -> Result<Vec<String>, GitHubError> {
        if *self.error_on_members.lock().unwrap() {
            return Err(GitHubError::AuthenticationFailed("HTTP 403".into()));
        }
        Ok(self.members.lock().unwrap().clone())
    }

    async fn create_issue_comment(
        &self,
        _repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        self.comment_calls
            .lock()
            .unwrap()
            .push((number, body.into()));
        Ok(())
    }

    async fn download_raw(&self, url: &str) -> Result<Vec<u8>, GitHubError> {
        self.download_calls.lock().unwrap().push(url.into());
        self.raw
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| GitHubError::NotFound(url.into()))
    }
}

// ---------------------------------------------------------------------------
// Working copy
// ---------------------------------------------------------------------------

/// Records operations; the working tree itself is a plain directory so file
/// overwrites can be inspected.
pub struct FakeVcs {
    workdir: PathBuf,
    conflicts: Mutex<HashMap<String, String>>,
    error_on_push: Mutex<bool>,
    error_on_fetch: Mutex<Option<String>>,
    pub ops: Mutex<Vec<String>>,
}

impl FakeVcs {
    pub fn new(workdir: &Path) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            conflicts: Mutex::new(HashMap::new()),
            error_on_push: Mutex::new(false),
            error_on_fetch: Mutex::new(None),
            ops: Mutex::new(Vec::new()),
        }
    }

    /// Make the replay of `sha` stop with `output`.
    pub fn reject(&self, sha: &str, output: &str) {
        self.conflicts
            .lock()
            .unwrap()
            .insert(sha.into(), output.into());
    }

    pub fn fail_push(&self) {
        *self.error_on_push.lock().unwrap() = true;
    }

    pub fn fail_fetch(&self, remote: &str) {
        *self.error_on_fetch.lock().unwrap() = Some(remote.into());
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    pub fn ops_starting_with(&self, prefix: &str) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter(|op| op.starts_with(prefix))
            .collect()
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl VersionControl for FakeVcs {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    async fn set_identity(&self, name: &str, email: &str) -> Result<(), GitError> {
        self.record(format!("identity {} <{}>", name, email));
        Ok(())
    }

    async fn replace_remote(&self, name: &str, url: &str) -> Result<(), GitError> {
        self.record(format!("remote {} {}", name, url));
        Ok(())
    }

    async fn fetch(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        self.record(format!("fetch {} {}", remote, branch));
        if self.error_on_fetch.lock().unwrap().as_deref() == Some(remote) {
            return Err(GitError::RefNotFound(format!("{}/{}", remote, branch)));
        }
        Ok(())
    }

    async fn clean(&self) -> Result<(), GitError> {
        self.record("clean".into());
        Ok(())
    }

    async fn create_branch(&self, name: &str, remote: &str, base: &str) -> Result<(), GitError> {
        self.record(format!("branch {} {}/{}", name, remote, base));
        Ok(())
    }

    async fn cherry_pick(&self, sha: &str) -> Result<Replay, GitError> {
        self.record(format!("cherry-pick {}", sha));
        match self.conflicts.lock().unwrap().get(sha) {
            Some(output) => Ok(Replay::Rejected {
                output: output.clone(),
            }),
            None => Ok(Replay::Applied),
        }
    }

    async fn abort_cherry_pick(&self) -> Result<(), GitError> {
        self.record("cherry-pick --abort".into());
        Ok(())
    }

    async fn stage_all(&self) -> Result<(), GitError> {
        self.record("stage".into());
        Ok(())
    }

    async fn commit(
        &self,
        message: &str,
        author_name: &str,
        author_email: &str,
    ) -> Result<String, GitError> {
        self.record(format!("commit {} by {} <{}>", message, author_name, author_email));
        Ok("c0ffee".into())
    }

    async fn push(&self, remote: &str, branch: &str) -> Result<(), GitError> {
        self.record(format!("push {} {}", remote, branch));
        if *self.error_on_push.lock().unwrap() {
            return Err(GitError::PushRejected {
                branch: branch.into(),
                detail: "protected".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub struct FakeNotifier {
    configured: bool,
    fail: bool,
    pub sent: Mutex<Vec<(String, String)>>,
}

impl FakeNotifier {
    pub fn enabled() -> Self {
        Self {
            configured: true,
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn disabled() -> Self {
        Self {
            configured: false,
            ..Self::enabled()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::enabled()
        }
    }
}

#[async_trait]
impl NotificationSink for FakeNotifier {
    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn send_status(&self, title: &str, body: &str) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push((title.into(), body.into()));
        if self.fail {
            return Err(NotificationError::DingTalkError("errcode 310000".into()));
        }
        Ok(())
    }
}
