//! Patch application engine.
//!
//! Replays one upstream commit onto a fresh `pr-<N>` branch cut from the
//! downstream default branch. When the replay conflicts, upstream wins: the
//! replay is aborted and every file the upstream commit touched is written
//! with its content at that commit, then committed under the upstream author.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use crate::errors::{GitError, GitHubError, MigrationError};
use crate::git::{Replay, RepositoryApi, VersionControl};
use crate::models::{ChangedFile, CommitRecord, FileStatus, PatchOutcome};

/// Line prefix the replay tool uses for a content conflict.
const CONTENT_CONFLICT_PREFIX: &str = "CONFLICT (content): Merge conflict in ";

/// Any conflict kind reported by the replay tool.
const CONFLICT_MARKER: &str = "CONFLICT (";

/// Where replayed commits come from, and where migrated branches are cut
/// from and pushed to.
#[derive(Debug, Clone)]
pub struct PatchSettings {
    /// `owner/name` of the upstream repository, for file content lookups.
    pub source_repo: String,
    pub target_remote: String,
    pub target_branch: String,
}

/// How the replay ended before pushing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyState {
    CleanApply,
    /// Resolved in favour of upstream; holds the paths the tool reported.
    Conflict(BTreeSet<String>),
}

/// Branch name used for the downstream PR of upstream PR `number`.
pub fn branch_name(number: u64) -> String {
    format!("pr-{}", number)
}

/// Paths reported as content conflicts in replay tool output.
pub fn conflicted_paths(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .filter_map(|line| line.trim_end().strip_prefix(CONTENT_CONFLICT_PREFIX))
        .map(str::to_string)
        .collect()
}

fn reports_conflict(output: &str) -> bool {
    output.lines().any(|l| l.starts_with(CONFLICT_MARKER))
}

/// Resolve a repository-relative path inside `root`, refusing anything that
/// could land outside it.
pub fn resolve_in_workdir(root: &Path, relative: &str) -> Result<PathBuf, GitError> {
    let rel = Path::new(relative);
    if relative.is_empty() {
        return Err(GitError::UnsafePath(relative.to_string()));
    }
    for component in rel.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(GitError::UnsafePath(relative.to_string()));
            }
        }
    }
    Ok(root.join(rel))
}

pub struct PatchEngine<'a> {
    vcs: &'a dyn VersionControl,
    api: &'a dyn RepositoryApi,
    settings: &'a PatchSettings,
}

impl<'a> PatchEngine<'a> {
    pub fn new(
        vcs: &'a dyn VersionControl,
        api: &'a dyn RepositoryApi,
        settings: &'a PatchSettings,
    ) -> Self {
        Self { vcs, api, settings }
    }

    /// Replay `commit` onto `pr-<N>` and push it.
    ///
    /// Push failures are recorded in the outcome, not returned.
    #[instrument(skip_all, fields(sha = %commit.sha(), pr = ?commit.pr_number()))]
    pub async fn apply(
        &self,
        commit: &CommitRecord,
    ) -> Result<PatchOutcome, MigrationError> {
        let number = commit
            .pr_number()
            .ok_or_else(|| MigrationError::MissingPullRequest {
                sha: commit.sha().to_string(),
            })?;
        let branch = branch_name(number);
        let author = commit.source();
        let remote = &self.settings.target_remote;

        self.vcs
            .set_identity(&author.author_name, &author.author_email)
            .await?;
        self.vcs.clean().await?;
        self.vcs.fetch(remote, &self.settings.target_branch).await?;
        self.vcs
            .create_branch(&branch, remote, &self.settings.target_branch)
            .await?;
        info!(branch = %branch, state = "branch_created", "replaying commit");

        let mut outcome = PatchOutcome {
            branch_name: branch.clone(),
            ..PatchOutcome::default()
        };

        let state = match self.vcs.cherry_pick(commit.sha()).await? {
            Replay::Applied => ApplyState::CleanApply,
            Replay::Rejected { output } => {
                self.vcs.abort_cherry_pick().await?;
                if !reports_conflict(&output) {
                    return Err(GitError::CommandFailed {
                        command: "cherry-pick".into(),
                        exit_code: 1,
                        stderr: output,
                    }
                    .into());
                }
                let files = conflicted_paths(&output);
                warn!(branch = %branch, files = ?files, "replay conflicted, taking upstream content");
                outcome.overwritten_files = self.overwrite_with_upstream(commit, &files).await?;

                let title = commit.title().ok_or_else(|| MigrationError::MissingTitle {
                    sha: commit.sha().to_string(),
                })?;
                self.vcs.stage_all().await?;
                let sha = self
                    .vcs
                    .commit(title, &author.author_name, &author.author_email)
                    .await?;
                debug!(sha = %sha, "committed upstream resolution");
                ApplyState::Conflict(files)
            }
        };

        match state {
            ApplyState::CleanApply => {
                info!(branch = %branch, state = "clean_apply", "commit applied cleanly");
            }
            ApplyState::Conflict(files) => {
                info!(
                    branch = %branch,
                    state = "conflict_resolved",
                    overwritten = outcome.overwritten_files.len(),
                    "conflict resolved with upstream content"
                );
                outcome.conflicted = true;
                outcome.conflicted_files = files;
            }
        }

        match self.vcs.push(remote, &branch).await {
            Ok(()) => outcome.pushed = true,
            Err(e) => warn!(branch = %branch, error = %e, "push failed, continuing"),
        }
        info!(branch = %branch, state = "push_attempted", pushed = outcome.pushed, "replay finished");

        Ok(outcome)
    }

    /// Write every file changed by the upstream commit with its content at
    /// that commit.
    async fn overwrite_with_upstream(
        &self,
        commit: &CommitRecord,
        conflicted: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>, MigrationError> {
        let files = self
            .api
            .get_commit_files(&self.settings.source_repo, commit.sha())
            .await?;
        let listed: BTreeSet<&str> = files.iter().map(|f| f.filename.as_str()).collect();
        for path in conflicted.iter().filter(|p| !listed.contains(p.as_str())) {
            warn!(path = %path, "conflicted path is not part of the upstream commit");
        }

        let mut written = BTreeSet::new();
        for file in &files {
            if file.status == FileStatus::Renamed {
                if let Some(previous) = &file.previous_filename {
                    self.remove(previous).await?;
                    written.insert(previous.clone());
                }
            }
            match file.status {
                FileStatus::Removed => self.remove(&file.filename).await?,
                _ => self.write_upstream(file).await?,
            }
            written.insert(file.filename.clone());
        }
        Ok(written)
    }

    async fn remove(&self, relative: &str) -> Result<(), GitError> {
        let path = resolve_in_workdir(self.vcs.workdir(), relative)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %relative, "removed file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_upstream(&self, file: &ChangedFile) -> Result<(), MigrationError> {
        let path = resolve_in_workdir(self.vcs.workdir(), &file.filename)?;
        let url = file.raw_url.as_deref().ok_or_else(|| {
            GitHubError::ParseError(format!("no content reference for '{}'", file.filename))
        })?;
        let bytes = self.api.download_raw(url).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(GitError::from)?;
        }
        tokio::fs::write(&path, &bytes).await.map_err(GitError::from)?;
        debug!(path = %file.filename, size = bytes.len(), status = %file.status, "wrote upstream content");
        Ok(())
    }
}
