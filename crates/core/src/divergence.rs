//! Synchronization frontier detection.
//!
//! Finds the newest source commit that this tool has already replayed
//! downstream and returns everything newer than it. Commits are correlated by
//! title, because replaying rewrites both the sha and the PR number.

use tracing::{debug, info, warn};

use crate::models::{CommitRecord, MigrationBatch};

/// Compute the source commits not yet present downstream.
///
/// Both inputs are newest-first. Invalid records are dropped before
/// correlation. A downstream commit only establishes the frontier when it was
/// authored by `automation_login`; a title match authored by anyone else is a
/// manual port and is skipped with a warning. When no frontier is found the
/// batch is empty. The returned batch is oldest-first.
pub fn find_unmerged(
    source: &[CommitRecord],
    downstream: &[CommitRecord],
    automation_login: &str,
) -> MigrationBatch {
    let source: Vec<&CommitRecord> = valid_only(source, "source");
    let downstream: Vec<&CommitRecord> = valid_only(downstream, "downstream");

    for ent in &downstream {
        let Some(position) = source.iter().position(|s| ent.has_same_title(s)) else {
            continue;
        };

        let author = ent.source().login.as_deref().unwrap_or("<unknown>");
        if author != automation_login {
            warn!(
                title = ent.title().unwrap_or_default(),
                sha = %ent.sha(),
                author,
                expected = automation_login,
                "commit was checked in by another account, not treating it as synchronized"
            );
            continue;
        }

        let frontier = source[position];
        info!(
            frontier_sha = %frontier.sha(),
            downstream_sha = %ent.sha(),
            title = frontier.title().unwrap_or_default(),
            pending = position,
            "found synchronization frontier"
        );

        let pending: Vec<CommitRecord> = source[..position]
            .iter()
            .rev()
            .map(|c| (*c).clone())
            .collect();
        return MigrationBatch::from_oldest_first(pending);
    }

    info!("no synchronization frontier found, nothing to migrate");
    MigrationBatch::default()
}

fn valid_only<'a>(commits: &'a [CommitRecord], side: &str) -> Vec<&'a CommitRecord> {
    commits
        .iter()
        .filter(|c| {
            if !c.is_valid() {
                debug!(side, sha = %c.sha(), "dropping commit without title or PR number");
            }
            c.is_valid()
        })
        .collect()
}
