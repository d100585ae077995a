//! Error types for the patchport core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    GitHub(#[from] GitHubError),

    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Notification(#[from] NotificationError),
}

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the local working copy (git2 and the `git` binary).
#[derive(Debug, Error)]
pub enum GitError {
    /// The repository path does not exist or is not a git repo.
    #[error("git repository not found at '{0}'")]
    RepositoryNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// A ref (branch, remote branch, SHA) could not be resolved.
    #[error("git ref not found: {0}")]
    RefNotFound(String),

    /// Push was rejected (e.g. non-fast-forward).
    #[error("git push rejected for branch '{branch}': {detail}")]
    PushRejected { branch: String, detail: String },

    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found")]
    BinaryNotFound,

    /// A `git` command exited with an unexpected status.
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A path reported by the remote would land outside the working copy.
    #[error("refusing to write outside the working copy: '{0}'")]
    UnsafePath(String),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// GitHub API errors
// ---------------------------------------------------------------------------

/// Errors from GitHub REST API interactions.
#[derive(Debug, Error)]
pub enum GitHubError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("GitHub HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The API returned a non-success status code.
    #[error("GitHub API error (HTTP {status}): {body}")]
    ApiError { status: u16, body: String },

    /// Authentication token is missing or invalid.
    #[error("GitHub authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Rate limit exceeded.
    #[error("GitHub rate limit exceeded, resets at {reset_at}")]
    RateLimited { reset_at: String },

    /// The requested resource does not exist.
    #[error("GitHub resource not found: {0}")]
    NotFound(String),

    /// JSON deserialization failure.
    #[error("GitHub response parse error: {0}")]
    ParseError(String),
}

// ---------------------------------------------------------------------------
// Migration errors
// ---------------------------------------------------------------------------

/// Errors raised while migrating a single commit or preparing a batch.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The commit carries no upstream pull request number, so there is no
    /// PR body or file list to migrate from.
    #[error("commit {sha} has no upstream pull request number")]
    MissingPullRequest { sha: String },

    /// The commit title could not be recovered from its message.
    #[error("commit {sha} has no usable title")]
    MissingTitle { sha: String },

    /// Underlying Git error.
    #[error("migration git error: {0}")]
    Git(#[from] GitError),

    /// Underlying GitHub error.
    #[error("migration GitHub error: {0}")]
    GitHub(#[from] GitHubError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Notification errors
// ---------------------------------------------------------------------------

/// Errors from the notification subsystem.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// DingTalk robot delivery failed.
    #[error("DingTalk notification failed: {0}")]
    DingTalkError(String),

    /// HTTP error during notification delivery.
    #[error("notification HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = GitError::RepositoryNotFound("/tmp/repo".into());
        assert_eq!(err.to_string(), "git repository not found at '/tmp/repo'");

        let err = GitError::CommandFailed {
            command: "cherry-pick".into(),
            exit_code: 128,
            stderr: "fatal: bad revision".into(),
        };
        assert_eq!(
            err.to_string(),
            "git cherry-pick failed (exit 128): fatal: bad revision"
        );

        let err = GitHubError::RateLimited {
            reset_at: "1700000000".into(),
        };
        assert!(err.to_string().contains("rate limit"));

        let err = MigrationError::MissingPullRequest { sha: "abc123".into() };
        assert!(err.to_string().contains("abc123"));

        let err = ConfigError::EnvVarMissing {
            var: "INPUT_REPO_TOKEN".into(),
            field: "github.token_env".into(),
        };
        assert!(err.to_string().contains("INPUT_REPO_TOKEN"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let git_err = GitError::BinaryNotFound;
        let core_err: CoreError = git_err.into();
        assert!(matches!(core_err, CoreError::Git(_)));

        let migration_err: MigrationError = GitHubError::NotFound("pulls/7".into()).into();
        assert!(matches!(migration_err, MigrationError::GitHub(_)));
        let core_err: CoreError = migration_err.into();
        assert!(matches!(core_err, CoreError::Migration(_)));
    }
}
