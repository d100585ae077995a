//! TOML-based configuration for patchport.
//!
//! Secrets (API token, webhook URLs) are stored as `_env` fields naming an
//! environment variable. The values are resolved at runtime via
//! [`AppConfig::resolve_env_vars`]. When no file is given, [`AppConfig::from_env`]
//! builds the same structure from GitHub Actions style inputs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;
use crate::models::MergeMethod;

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Community repository the commits come from.
    pub source: SourceConfig,

    /// Enterprise repository the commits are replayed into.
    pub target: TargetConfig,

    #[serde(default)]
    pub github: GitHubConfig,

    #[serde(default)]
    pub migration: MigrationConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Log level filter used when neither `--log-level` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Working copy of the target repository.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            workdir: default_workdir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repositories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Repository in `owner/name` format.
    pub repo: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Name of the remote added to the working copy for the source.
    #[serde(default = "default_source_remote")]
    pub remote_name: String,

    /// Organization whose members get mentioned on conflicts. Defaults to
    /// the owner of `repo`.
    #[serde(default)]
    pub members_org: Option<String>,
}

impl SourceConfig {
    pub fn members_org(&self) -> &str {
        match self.members_org.as_deref() {
            Some(org) if !org.is_empty() => org,
            _ => repo_owner(&self.repo),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Repository in `owner/name` format.
    pub repo: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Remote of the working copy that points at the target repository.
    #[serde(default = "default_target_remote")]
    pub remote_name: String,
}

fn default_branch() -> String {
    "master".into()
}
fn default_source_remote() -> String {
    "community".into()
}
fn default_target_remote() -> String {
    "origin".into()
}

fn repo_owner(repo: &str) -> &str {
    repo.split('/').next().unwrap_or(repo)
}

// ---------------------------------------------------------------------------
// GitHub
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL (default `https://api.github.com`, Enterprise Server uses
    /// `https://<host>/api/v3`).
    #[serde(default = "default_github_api_url")]
    pub api_url: String,

    /// Override for the web/clone base URL when it cannot be derived from
    /// `api_url`.
    #[serde(default)]
    pub git_base_url: Option<String>,

    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_github_api_url() -> String {
    "https://api.github.com".into()
}
fn default_token_env() -> String {
    "GITHUB_TOKEN".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_github_api_url(),
            git_base_url: None,
            token_env: default_token_env(),
            token: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Migration behaviour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Label added to every downstream PR.
    #[serde(default = "default_label")]
    pub label: String,

    /// How many recent commits of each branch are compared.
    #[serde(default = "default_commit_window")]
    pub commit_window: usize,

    #[serde(default)]
    pub merge_method: MergeMethod,

    #[serde(default = "default_poll_attempts")]
    pub mergeable_poll_attempts: u32,

    #[serde(default = "default_poll_interval")]
    pub mergeable_poll_interval_secs: u64,
}

fn default_label() -> String {
    "auto-sync".into()
}
fn default_commit_window() -> usize {
    101
}
fn default_poll_attempts() -> u32 {
    3
}
fn default_poll_interval() -> u64 {
    2
}

impl MigrationConfig {
    pub fn mergeable_poll_interval(&self) -> Duration {
        Duration::from_secs(self.mergeable_poll_interval_secs)
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            label: default_label(),
            commit_window: default_commit_window(),
            merge_method: MergeMethod::default(),
            mergeable_poll_attempts: default_poll_attempts(),
            mergeable_poll_interval_secs: default_poll_interval(),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Notification channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    /// Environment variable holding the DingTalk robot access token.
    #[serde(default)]
    pub dingtalk_access_token_env: Option<String>,

    /// Environment variable holding the DingTalk signing secret.
    #[serde(default)]
    pub dingtalk_secret_env: Option<String>,

    #[serde(skip)]
    pub dingtalk_access_token: Option<String>,

    #[serde(skip)]
    pub dingtalk_secret: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file.
    ///
    /// This does **not** resolve environment variables.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from the process environment.
    ///
    /// The API token is required; a missing notification secret only
    /// disables that channel.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    fn resolve_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        info!("resolving environment variable references in config");

        self.github.token = resolve_optional(&lookup, &self.github.token_env, "github.token_env");
        if self.github.token.is_none() {
            return Err(ConfigError::EnvVarMissing {
                var: self.github.token_env.clone(),
                field: "github.token_env".into(),
            });
        }

        let n = &mut self.notifications;
        if let Some(ref env_name) = n.dingtalk_access_token_env {
            n.dingtalk_access_token =
                resolve_optional(&lookup, env_name, "notifications.dingtalk_access_token_env");
        }
        if let Some(ref env_name) = n.dingtalk_secret_env {
            n.dingtalk_secret =
                resolve_optional(&lookup, env_name, "notifications.dingtalk_secret_env");
        }

        debug!("environment variable resolution complete");
        Ok(())
    }

    /// Validate repository names and numeric ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_repo("source.repo", &self.source.repo)?;
        validate_repo("target.repo", &self.target.repo)?;
        if self.source.repo.eq_ignore_ascii_case(&self.target.repo) {
            return Err(ConfigError::InvalidValue {
                field: "target.repo".into(),
                detail: "source and target must be different repositories".into(),
            });
        }
        for (field, value) in [
            ("source.branch", &self.source.branch),
            ("source.remote_name", &self.source.remote_name),
            ("target.branch", &self.target.branch),
            ("target.remote_name", &self.target.remote_name),
            ("migration.label", &self.migration.label),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.into(),
                    detail: "must not be empty".into(),
                });
            }
        }
        if self.source.remote_name == self.target.remote_name {
            return Err(ConfigError::InvalidValue {
                field: "source.remote_name".into(),
                detail: "must differ from target.remote_name".into(),
            });
        }
        if self.migration.commit_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "migration.commit_window".into(),
                detail: "commit window must be > 0".into(),
            });
        }
        if self.migration.mergeable_poll_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "migration.mergeable_poll_attempts".into(),
                detail: "at least one attempt is required".into(),
            });
        }
        if !self.github.api_url.starts_with("http://") && !self.github.api_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "github.api_url".into(),
                detail: "must be an http(s) URL".into(),
            });
        }
        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Build, resolve, and validate a configuration from GitHub Actions
    /// inputs: `INPUT_FROM_REPO` (source), `GITHUB_REPOSITORY` (target),
    /// `INPUT_REPO_TOKEN`, and optionally `INPUT_DINGTALK_ACCESS_TOKEN` with
    /// `INPUT_DINGTALK_SECRET`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &str, field: &str| {
            lookup(var)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ConfigError::EnvVarMissing {
                    var: var.into(),
                    field: field.into(),
                })
        };

        let mut config = AppConfig {
            runner: RunnerConfig::default(),
            source: SourceConfig {
                repo: required("INPUT_FROM_REPO", "source.repo")?,
                branch: default_branch(),
                remote_name: default_source_remote(),
                members_org: None,
            },
            target: TargetConfig {
                repo: required("GITHUB_REPOSITORY", "target.repo")?,
                branch: default_branch(),
                remote_name: default_target_remote(),
            },
            github: GitHubConfig {
                token_env: "INPUT_REPO_TOKEN".into(),
                ..GitHubConfig::default()
            },
            migration: MigrationConfig::default(),
            notifications: NotificationConfig {
                dingtalk_access_token_env: Some("INPUT_DINGTALK_ACCESS_TOKEN".into()),
                dingtalk_secret_env: Some("INPUT_DINGTALK_SECRET".into()),
                ..NotificationConfig::default()
            },
        };
        if let Some(api_url) = lookup("GITHUB_API_URL").filter(|v| !v.is_empty()) {
            config.github.api_url = api_url;
        }
        if let Some(workspace) = lookup("GITHUB_WORKSPACE").filter(|v| !v.is_empty()) {
            config.runner.workdir = PathBuf::from(workspace);
        }

        config.resolve_with(&lookup)?;
        config.validate()?;
        Ok(config)
    }
}

fn validate_repo(field: &str, repo: &str) -> Result<(), ConfigError> {
    let mut parts = repo.split('/');
    let well_formed = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
    );
    if !well_formed {
        return Err(ConfigError::InvalidValue {
            field: field.into(),
            detail: format!("'{}' must be in 'owner/name' format", repo),
        });
    }
    Ok(())
}

/// Look up an environment variable by name. Unset and empty both resolve to
/// `None` with a warning.
fn resolve_optional<F>(lookup: &F, env_name: &str, field: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(env_name) {
        Some(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Some(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        None => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}
