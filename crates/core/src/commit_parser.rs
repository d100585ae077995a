//! Commit identity parsing.
//!
//! Squash merges on GitHub produce messages like `Fix race condition (#123)`.
//! A commit replayed downstream and squash-merged again gains a second
//! reference: `Fix race condition (#123) (#456)`. The parser recovers the
//! logical title (all references stripped) and the PR number (the last
//! reference on the first line), which is what lets the two histories be
//! correlated.

use std::sync::LazyLock;

use regex_lite::Regex;
use tracing::debug;

use crate::models::{CommitRecord, CommitRef};

/// `<title>(#<digits>)` at the end of the first line. `.` never crosses a
/// newline, so only the first line is considered; the greedy title group
/// makes the last reference win.
static PR_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.*)\(#(\d+)\)(?:\n|$)").expect("PR suffix pattern is valid"));

/// Parse a raw commit message into a [`CommitRecord`].
pub fn parse(raw_message: &str, source: CommitRef) -> CommitRecord {
    let (title, pr_number) = match split_pr_suffix(raw_message) {
        Some((title, number)) => (Some(strip_nested_refs(title)), Some(number)),
        None => (first_line_title(raw_message), None),
    };

    let record = CommitRecord::new(raw_message.to_string(), title, pr_number, source);
    if !record.is_valid() {
        debug!(sha = %record.sha(), "commit message has neither title nor PR number");
    }
    record
}

/// Split `<title>(#N)` into the trimmed title and `N`.
fn split_pr_suffix(text: &str) -> Option<(String, u64)> {
    let caps = PR_SUFFIX.captures(text)?;
    let number = caps.get(2)?.as_str().parse::<u64>().ok()?;
    let title = caps.get(1)?.as_str().trim().to_string();
    Some((title, number))
}

/// Strip nested `(#M)` suffixes one at a time. The PR number is decided by
/// the outermost match only, so nested numbers are discarded.
fn strip_nested_refs(mut title: String) -> String {
    // Each iteration removes at least `(#M)`, so the loop is bounded by the
    // title length.
    while let Some((inner, _)) = split_pr_suffix(&title) {
        title = inner;
    }
    title
}

fn first_line_title(message: &str) -> Option<String> {
    let line = message.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        None
    } else {
        Some(line.to_string())
    }
}
