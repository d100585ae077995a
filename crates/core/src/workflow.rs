//! Downstream pull request lifecycle: open, label, then either ask a human
//! to review a conflict resolution or squash-merge.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::errors::MigrationError;
use crate::git::remote_url::pr_ref;
use crate::git::RepositoryApi;
use crate::models::{
    CommitRecord, HaltReason, MergeMethod, PatchOutcome, SourcePullRequest, WorkflowOutcome,
};

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub source_repo: String,
    pub source_branch: String,
    pub source_remote: String,
    pub source_clone_url: String,
    pub target_repo: String,
    pub target_branch: String,
    pub target_clone_url: String,
    pub label: String,
    pub merge_method: MergeMethod,
    pub mergeable_poll_attempts: u32,
    pub mergeable_poll_interval: Duration,
}

/// PR body: upstream description followed by the provenance block.
pub fn provenance_body(
    source_repo: &str,
    source_pr: &SourcePullRequest,
    commit: &CommitRecord,
) -> String {
    format!(
        "{}\n\nMigrated from {}\n\nCo-authored-by: {}\n",
        source_pr.body.as_deref().unwrap_or(""),
        pr_ref(source_repo, source_pr.number),
        commit.source().author_ident()
    )
}

/// Comment asking a maintainer to review an upstream-wins resolution.
pub fn conflict_comment(
    settings: &WorkflowSettings,
    commit: &CommitRecord,
    patch: &PatchOutcome,
    org_members: &[String],
) -> String {
    let mut comment = String::new();
    match commit.source().login.as_deref() {
        Some(login) if org_members.iter().any(|m| m == login) => {
            comment.push_str(&format!("@{}\n", login));
            debug!(login, "mentioning author in conflict comment");
        }
        login => debug!(?login, "author is not an organization member, not mentioning"),
    }

    let repo_dir = settings
        .target_repo
        .rsplit('/')
        .next()
        .unwrap_or(&settings.target_repo);
    let files: Vec<&str> = patch.conflicted_files.iter().map(String::as_str).collect();

    comment.push_str(&format!(
        "This PR will cause conflicts when applying patch.
Please carefully compare all the changes in this PR to avoid overwriting legal codes.
If you need to make changes, please make the commits on current branch.

You can use following commands to resolve the conflicts locally:

```shell
$ git clone {target_url}
$ cd {repo_dir}
$ git checkout -b {branch} origin/{target_branch}
$ git remote add {remote} {source_url}
$ git fetch {remote} {source_branch}
$ git cherry-pick {sha}
# resolve the conflicts
$ git cherry-pick --continue
$ git push -f origin {branch}
```

CONFLICT FILES:
```text
{files}
```
",
        target_url = settings.target_clone_url,
        repo_dir = repo_dir,
        branch = patch.branch_name,
        target_branch = settings.target_branch,
        remote = settings.source_remote,
        source_url = settings.source_clone_url,
        source_branch = settings.source_branch,
        sha = commit.sha(),
        files = files.join("\n"),
    ));
    comment
}

pub struct PrWorkflow<'a> {
    api: &'a dyn RepositoryApi,
    settings: &'a WorkflowSettings,
}

impl<'a> PrWorkflow<'a> {
    pub fn new(api: &'a dyn RepositoryApi, settings: &'a WorkflowSettings) -> Self {
        Self { api, settings }
    }

    /// Drive the downstream PR for one replayed commit. Never returns an
    /// error: failures become a `Failed` halt carrying the best-known PR
    /// number.
    #[instrument(skip_all, fields(sha = %commit.sha(), branch = %patch.branch_name))]
    pub async fn run(
        &self,
        patch: &PatchOutcome,
        commit: &CommitRecord,
        source_pr: &SourcePullRequest,
        org_members: &[String],
    ) -> WorkflowOutcome {
        let mut created = None;
        match self
            .drive(patch, commit, source_pr, org_members, &mut created)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    source_pr = source_pr.number,
                    downstream_pr = ?created,
                    error = %e,
                    "failed to migrate pull request"
                );
                WorkflowOutcome::failed(created, e)
            }
        }
    }

    async fn drive(
        &self,
        patch: &PatchOutcome,
        commit: &CommitRecord,
        source_pr: &SourcePullRequest,
        org_members: &[String],
        created: &mut Option<u64>,
    ) -> Result<WorkflowOutcome, MigrationError> {
        let s = self.settings;
        let title = commit.title().ok_or_else(|| MigrationError::MissingTitle {
            sha: commit.sha().to_string(),
        })?;
        let body = provenance_body(&s.source_repo, source_pr, commit);

        let pr = self
            .api
            .create_pull_request(&s.target_repo, title, &body, &patch.branch_name, &s.target_branch)
            .await?;
        *created = Some(pr.number);
        info!(pr = %pr_ref(&s.target_repo, pr.number), url = %pr.html_url, "created pull request");

        let outcome = WorkflowOutcome {
            created: true,
            downstream_pr: Some(pr.number),
            ..WorkflowOutcome::default()
        };

        self.api
            .add_labels(&s.target_repo, pr.number, std::slice::from_ref(&s.label))
            .await?;

        if patch.conflicted {
            let comment = conflict_comment(s, commit, patch, org_members);
            self.api
                .create_issue_comment(&s.target_repo, pr.number, &comment)
                .await?;
            info!(pr = pr.number, files = patch.conflicted_files.len(), "left conflict review comment");
            return Ok(outcome.halted(HaltReason::Conflict {
                files: patch.conflicted_files.clone(),
            }));
        }

        if self.poll_mergeable(pr.number).await? != Some(true) {
            warn!(pr = pr.number, "pull request is not mergeable");
            return Ok(outcome.halted(HaltReason::NotMergeable));
        }

        let commit_title = format!("{} (#{})", title, pr.number);
        let result = self
            .api
            .merge_pull_request(&s.target_repo, pr.number, s.merge_method, &commit_title)
            .await?;
        if !result.merged {
            warn!(pr = pr.number, message = ?result.message, "merge did not complete");
            return Ok(outcome.halted(HaltReason::MergeIncomplete {
                message: result.message,
            }));
        }

        info!(pr = pr.number, sha = ?result.sha, "merged pull request");
        Ok(WorkflowOutcome {
            merged: true,
            ..outcome
        })
    }

    /// Wait for the platform to compute mergeability. `None` after the last
    /// attempt means it never decided.
    async fn poll_mergeable(&self, number: u64) -> Result<Option<bool>, MigrationError> {
        let s = self.settings;
        for attempt in 1..=s.mergeable_poll_attempts.max(1) {
            tokio::time::sleep(s.mergeable_poll_interval).await;
            let state = self.api.is_mergeable(&s.target_repo, number).await?;
            debug!(number, attempt, mergeable = ?state, "polled mergeability");
            if state.is_some() {
                return Ok(state);
            }
        }
        Ok(None)
    }
}
