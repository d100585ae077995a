//! Host-aware URL derivation.
//!
//! Builds clone URLs and pull request links from the configured API URL, so
//! the same configuration works against github.com and Enterprise Server.

/// Derive the HTTPS clone URL for a repository in `owner/name` form.
///
/// Resolution order for the base:
/// 1. `git_base_url` when it is `Some(non-empty)`.
/// 2. Otherwise derived from `api_url`:
///    - `https://api.github.com` → `https://github.com`
///    - `https://<host>/api/v3`  → `https://<host>`
///    - anything else            → used as-is, trailing slash stripped
pub fn derive_git_remote_url(api_url: &str, git_base_url: Option<&str>, repo: &str) -> String {
    let base = derive_git_base_url(api_url, git_base_url);
    format!("{}/{}.git", base, repo)
}

/// Derive the web/Git base URL without a repository path.
pub fn derive_git_base_url(api_url: &str, git_base_url: Option<&str>) -> String {
    if let Some(explicit) = git_base_url {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return trimmed.trim_end_matches('/').to_string();
        }
    }

    let url = api_url.trim().trim_end_matches('/');

    if url.eq_ignore_ascii_case("https://api.github.com") {
        return "https://github.com".to_string();
    }

    if let Some(base) = url.strip_suffix("/api/v3") {
        return base.to_string();
    }

    url.to_string()
}

/// Browser link to a pull request.
pub fn pull_request_url(web_base: &str, repo: &str, number: u64) -> String {
    format!("{}/{}/pull/{}", web_base.trim_end_matches('/'), repo, number)
}

/// Cross-repository reference in GitHub markdown, e.g. `acme/widgets#12`.
pub fn pr_ref(repo: &str, number: u64) -> String {
    format!("{}#{}", repo, number)
}
