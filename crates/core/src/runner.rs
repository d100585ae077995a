//! Batch runner: detect pending commits, replay them one at a time and stop
//! at the first one that does not end up merged.

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::commit_parser;
use crate::config::AppConfig;
use crate::divergence::find_unmerged;
use crate::errors::MigrationError;
use crate::git::remote_url::{derive_git_base_url, derive_git_remote_url, pr_ref};
use crate::git::{RepositoryApi, VersionControl};
use crate::models::{
    CommitRecord, CommitReport, MigrationBatch, MigrationSummary, RemoteCommit, WorkflowOutcome,
};
use crate::notify::{format_summary_markdown, NotificationSink, SummaryLinks, STATUS_TITLE};
use crate::patch::{PatchEngine, PatchSettings};
use crate::workflow::{PrWorkflow, WorkflowSettings};

pub struct MigrationRunner<'a> {
    config: &'a AppConfig,
    api: &'a dyn RepositoryApi,
    vcs: &'a dyn VersionControl,
    notifier: &'a dyn NotificationSink,
}

impl<'a> MigrationRunner<'a> {
    pub fn new(
        config: &'a AppConfig,
        api: &'a dyn RepositoryApi,
        vcs: &'a dyn VersionControl,
        notifier: &'a dyn NotificationSink,
    ) -> Self {
        Self {
            config,
            api,
            vcs,
            notifier,
        }
    }

    /// Commits that a run would migrate, oldest first. Read-only.
    pub async fn pending(&self) -> Result<MigrationBatch, MigrationError> {
        self.detect().await
    }

    /// Migrate every pending commit until the first one that is not merged.
    ///
    /// Errors are returned only for setup failures (identity, commit
    /// listing, source remote). Per-commit failures end up in the summary.
    #[instrument(skip(self), fields(source = %self.config.source.repo, target = %self.config.target.repo))]
    pub async fn run(&self) -> Result<MigrationSummary, MigrationError> {
        let batch = self.detect().await?;
        let mut summary = MigrationSummary::new(batch.len());
        if batch.is_empty() {
            info!("no commits to migrate");
            summary.completed_at = Some(Utc::now());
            return Ok(summary);
        }

        let members = self.org_members().await;
        self.prepare_source_remote().await?;

        let patch_settings = self.patch_settings();
        let workflow_settings = self.workflow_settings();
        let engine = PatchEngine::new(self.vcs, self.api, &patch_settings);
        let workflow = PrWorkflow::new(self.api, &workflow_settings);

        for commit in batch {
            let report = self.migrate_one(&engine, &workflow, commit, &members).await;
            let merged = report.succeeded();
            summary.reports.push(report);
            if !merged {
                warn!(
                    attempted = summary.reports.len(),
                    skipped = summary.skipped(),
                    "halting batch"
                );
                break;
            }
        }

        summary.completed_at = Some(Utc::now());
        info!(
            merged = summary.succeeded().count(),
            halted = summary.is_halted(),
            "migration batch finished"
        );
        self.notify(&summary).await;
        Ok(summary)
    }

    async fn detect(&self) -> Result<MigrationBatch, MigrationError> {
        let window = self.config.migration.commit_window;
        let automation = self.api.authenticated_login().await?;
        info!(login = %automation, "resolved automation identity");

        let src = &self.config.source;
        let dst = &self.config.target;
        let source = parse_all(self.api.list_commits(&src.repo, &src.branch, window).await?);
        let downstream = parse_all(self.api.list_commits(&dst.repo, &dst.branch, window).await?);
        debug!(
            source = source.len(),
            downstream = downstream.len(),
            "listed recent commits"
        );

        let batch = find_unmerged(&source, &downstream, &automation);
        info!(pending = batch.len(), "computed pending commits");
        Ok(batch)
    }

    async fn org_members(&self) -> Vec<String> {
        let org = self.config.source.members_org();
        match self.api.list_org_members(org).await {
            Ok(members) => {
                debug!(org, count = members.len(), "listed organization members");
                members
            }
            Err(e) => {
                warn!(org, error = %e, "could not list organization members, nobody will be mentioned");
                Vec::new()
            }
        }
    }

    async fn prepare_source_remote(&self) -> Result<(), MigrationError> {
        let src = &self.config.source;
        let gh = &self.config.github;
        let url = derive_git_remote_url(&gh.api_url, gh.git_base_url.as_deref(), &src.repo);
        self.vcs.replace_remote(&src.remote_name, &url).await?;
        self.vcs.fetch(&src.remote_name, &src.branch).await?;
        info!(remote = %src.remote_name, url = %url, "source remote ready");
        Ok(())
    }

    async fn migrate_one(
        &self,
        engine: &PatchEngine<'_>,
        workflow: &PrWorkflow<'_>,
        commit: CommitRecord,
        members: &[String],
    ) -> CommitReport {
        let Some(number) = commit.pr_number() else {
            let error = MigrationError::MissingPullRequest {
                sha: commit.sha().to_string(),
            };
            warn!(error = %error, "cannot migrate commit");
            return failed_report(commit, error);
        };
        let source_ref = pr_ref(&self.config.source.repo, number);
        info!(pr = %source_ref, sha = %commit.sha(), "migrating");

        let source_pr = match self
            .api
            .get_pull_request(&self.config.source.repo, number)
            .await
        {
            Ok(pr) => pr,
            Err(e) => {
                warn!(pr = %source_ref, error = %e, "could not fetch upstream pull request");
                return failed_report(commit, e);
            }
        };

        let patch = match engine.apply(&commit).await {
            Ok(patch) => patch,
            Err(e) => {
                warn!(pr = %source_ref, error = %e, "replay failed");
                return failed_report(commit, e);
            }
        };

        let outcome = workflow.run(&patch, &commit, &source_pr, members).await;
        match (&outcome.halt, outcome.downstream_pr) {
            (None, Some(n)) => info!(
                pr = %source_ref,
                downstream = %pr_ref(&self.config.target.repo, n),
                "migrated"
            ),
            (halt, n) => warn!(pr = %source_ref, downstream_pr = ?n, halt = ?halt, "not merged"),
        }
        CommitReport {
            commit,
            patch: Some(patch),
            workflow: outcome,
        }
    }

    async fn notify(&self, summary: &MigrationSummary) {
        if summary.reports.is_empty() {
            return;
        }
        if !self.notifier.is_configured() {
            debug!("no notification channel configured");
            return;
        }
        let gh = &self.config.github;
        let web_base = derive_git_base_url(&gh.api_url, gh.git_base_url.as_deref());
        let links = SummaryLinks {
            web_base: &web_base,
            source_repo: &self.config.source.repo,
            target_repo: &self.config.target.repo,
        };
        let body = format_summary_markdown(summary, links);
        if let Err(e) = self.notifier.send_status(STATUS_TITLE, &body).await {
            warn!(error = %e, "failed to send status notification");
        }
    }

    fn patch_settings(&self) -> PatchSettings {
        PatchSettings {
            source_repo: self.config.source.repo.clone(),
            target_remote: self.config.target.remote_name.clone(),
            target_branch: self.config.target.branch.clone(),
        }
    }

    fn workflow_settings(&self) -> WorkflowSettings {
        let c = self.config;
        let gh = &c.github;
        WorkflowSettings {
            source_repo: c.source.repo.clone(),
            source_branch: c.source.branch.clone(),
            source_remote: c.source.remote_name.clone(),
            source_clone_url: derive_git_remote_url(
                &gh.api_url,
                gh.git_base_url.as_deref(),
                &c.source.repo,
            ),
            target_repo: c.target.repo.clone(),
            target_branch: c.target.branch.clone(),
            target_clone_url: derive_git_remote_url(
                &gh.api_url,
                gh.git_base_url.as_deref(),
                &c.target.repo,
            ),
            label: c.migration.label.clone(),
            merge_method: c.migration.merge_method,
            mergeable_poll_attempts: c.migration.mergeable_poll_attempts,
            mergeable_poll_interval: c.migration.mergeable_poll_interval(),
        }
    }
}

fn parse_all(commits: Vec<RemoteCommit>) -> Vec<CommitRecord> {
    commits
        .into_iter()
        .map(|c| commit_parser::parse(&c.message, c.source))
        .collect()
}

fn failed_report(commit: CommitRecord, error: impl std::fmt::Display) -> CommitReport {
    CommitReport {
        commit,
        patch: None,
        workflow: WorkflowOutcome::failed(None, error),
    }
}
