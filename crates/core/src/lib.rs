//! patchport core library.
//!
//! Migrates squash-merged pull requests from a community repository into an
//! enterprise fork: commit identity parsing, synchronization frontier
//! detection, patch replay with upstream-wins conflict resolution, and the
//! downstream pull request workflow.

pub mod commit_parser;
pub mod config;
pub mod divergence;
pub mod errors;
pub mod git;
pub mod models;
pub mod notify;
pub mod patch;
pub mod runner;
pub mod workflow;

// Re-exports for convenience.
pub use config::AppConfig;
pub use errors::CoreError;
pub use git::{GitClient, GitHubClient, RepositoryApi, VersionControl};
pub use notify::{NotificationSink, Notifier};
pub use runner::MigrationRunner;
