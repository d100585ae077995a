//! GitHub REST API client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::RepositoryApi;
use crate::errors::GitHubError;
use crate::models::{
    ChangedFile, CommitRef, CreatedPullRequest, MergeMethod, MergeResult, RemoteCommit,
    SourcePullRequest,
};

/// Largest page size the REST API accepts.
const PER_PAGE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCommit {
    pub sha: String,
    pub commit: GitHubCommitDetail,
    pub author: Option<GitHubUserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubCommitDetail {
    pub message: String,
    pub author: GitHubGitActor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubGitActor {
    pub name: String,
    pub email: String,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUserSummary {
    pub login: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    pub body: Option<String>,
    pub state: String,
    pub mergeable: Option<bool>,
}

impl From<GitHubCommit> for RemoteCommit {
    fn from(c: GitHubCommit) -> Self {
        RemoteCommit {
            source: CommitRef {
                sha: c.sha,
                author_name: c.commit.author.name,
                author_email: c.commit.author.email,
                login: c.author.map(|a| a.login),
            },
            message: c.commit.message,
        }
    }
}

/// `GET /repos/{repo}/commits/{sha}`, reduced to the changed files.
#[derive(Debug, Deserialize)]
struct CommitFilesPage {
    #[serde(default)]
    files: Vec<ChangedFile>,
}

#[derive(Debug, Deserialize)]
struct MergeResponse {
    merged: Option<bool>,
    sha: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Asynchronous GitHub REST API client.
#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl GitHubClient {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Result<Self, GitHubError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let token = token.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("patchport/", env!("CARGO_PKG_VERSION"))),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static("2022-11-28"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        info!(api_url = %api_url, "created GitHubClient");
        Ok(Self {
            http,
            api_url,
            token,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, GitHubError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        resp.json::<T>()
            .await
            .map_err(|e| GitHubError::ParseError(e.to_string()))
    }

    /// Walk a paged list endpoint until `limit` items are collected or a
    /// short page signals the end. The page size stays fixed so page
    /// offsets line up; the overshoot of the last page is cut off.
    async fn get_paged<T: DeserializeOwned>(
        &self,
        url: &str,
        extra: &[(&str, String)],
        limit: Option<usize>,
    ) -> Result<Vec<T>, GitHubError> {
        let mut items = Vec::new();
        let mut page = 1usize;
        loop {
            let mut query: Vec<(&str, String)> = extra.to_vec();
            query.push(("per_page", PER_PAGE.to_string()));
            query.push(("page", page.to_string()));
            let batch: Vec<T> = self.get_json(url, &query).await?;
            let short = batch.len() < PER_PAGE;
            items.extend(batch);
            if short || limit.is_some_and(|l| items.len() >= l) {
                break;
            }
            page += 1;
        }
        if let Some(limit) = limit {
            items.truncate(limit);
        }
        debug!(url, count = items.len(), pages = page, "fetched paged list");
        Ok(items)
    }

    async fn get_pr(&self, repo: &str, number: u64) -> Result<PullRequest, GitHubError> {
        let url = format!("{}/repos/{}/pulls/{}", self.api_url, repo, number);
        self.get_json(&url, &[]).await
    }
}

#[async_trait]
impl RepositoryApi for GitHubClient {
    #[instrument(skip(self))]
    async fn authenticated_login(&self) -> Result<String, GitHubError> {
        let url = format!("{}/user", self.api_url);
        let user: GitHubUserSummary = self.get_json(&url, &[]).await?;
        debug!(login = %user.login, "fetched authenticated user");
        Ok(user.login)
    }

    #[instrument(skip(self))]
    async fn list_commits(
        &self,
        repo: &str,
        branch: &str,
        limit: usize,
    ) -> Result<Vec<RemoteCommit>, GitHubError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let url = format!("{}/repos/{}/commits", self.api_url, repo);
        let commits: Vec<GitHubCommit> = self
            .get_paged(&url, &[("sha", branch.to_string())], Some(limit))
            .await?;
        debug!(count = commits.len(), "fetched commits");
        Ok(commits.into_iter().map(RemoteCommit::from).collect())
    }

    #[instrument(skip(self))]
    async fn get_pull_request(
        &self,
        repo: &str,
        number: u64,
    ) -> Result<SourcePullRequest, GitHubError> {
        let pr = self.get_pr(repo, number).await?;
        debug!(number, state = %pr.state, "fetched pull request");
        Ok(SourcePullRequest {
            number: pr.number,
            title: pr.title,
            body: pr.body,
        })
    }

    #[instrument(skip(self))]
    async fn get_commit_files(
        &self,
        repo: &str,
        sha: &str,
    ) -> Result<Vec<ChangedFile>, GitHubError> {
        let url = format!("{}/repos/{}/commits/{}", self.api_url, repo, sha);
        let mut files = Vec::new();
        let mut page = 1usize;
        loop {
            let query = [
                ("per_page", PER_PAGE.to_string()),
                ("page", page.to_string()),
            ];
            let batch: CommitFilesPage = self.get_json(&url, &query).await?;
            let short = batch.files.len() < PER_PAGE;
            files.extend(batch.files);
            if short {
                break;
            }
            page += 1;
        }
        debug!(count = files.len(), pages = page, "fetched commit files");
        Ok(files)
    }

    async fn is_mergeable(&self, repo: &str, number: u64) -> Result<Option<bool>, GitHubError> {
        let pr = self.get_pr(repo, number).await?;
        debug!(number, mergeable = ?pr.mergeable, state = %pr.state, "checked mergeability");
        Ok(pr.mergeable)
    }

    #[instrument(skip(self, body))]
    async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<CreatedPullRequest, GitHubError> {
        let url = format!("{}/repos/{}/pulls", self.api_url, repo);
        let payload =
            serde_json::json!({ "title": title, "body": body, "head": head, "base": base });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        let resp = check_response(resp).await?;
        let pr: PullRequest = resp
            .json()
            .await
            .map_err(|e| GitHubError::ParseError(e.to_string()))?;
        info!(number = pr.number, "created pull request");
        Ok(CreatedPullRequest {
            number: pr.number,
            html_url: pr.html_url,
        })
    }

    #[instrument(skip(self))]
    async fn add_labels(
        &self,
        repo: &str,
        number: u64,
        labels: &[String],
    ) -> Result<(), GitHubError> {
        let url = format!("{}/repos/{}/issues/{}/labels", self.api_url, repo, number);
        let payload = serde_json::json!({ "labels": labels });
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;
        check_response(resp).await?;
        debug!(number, "labelled pull request");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn merge_pull_request(
        &self,
        repo: &str,
        number: u64,
        method: MergeMethod,
        commit_title: &str,
    ) -> Result<MergeResult, GitHubError> {
        let url = format!("{}/repos/{}/pulls/{}/merge", self.api_url, repo, number);
        let payload = serde_json::json!({
            "merge_method": method.to_string(),
            "commit_title": commit_title,
        });
        let resp = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await?;

        // 405 (not mergeable) and 409 (head moved) are refusals, not faults.
        if matches!(
            resp.status(),
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::CONFLICT
        ) {
            let status = resp.status();
            let message = resp
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| format!("HTTP {}", status));
            warn!(number, %status, %message, "merge refused");
            return Ok(MergeResult {
                merged: false,
                sha: None,
                message: Some(message),
            });
        }

        let resp = check_response(resp).await?;
        let body: MergeResponse = resp
            .json()
            .await
            .map_err(|e| GitHubError::ParseError(e.to_string()))?;
        let merged = body.merged.unwrap_or(false);
        info!(number, merged, "merge requested");
        Ok(MergeResult {
            merged,
            sha: body.sha,
            message: body.message,
        })
    }

    #[instrument(skip(self))]
    async fn list_org_members(&self, org: &str) -> Result<Vec<String>, GitHubError> {
        let url = format!("{}/orgs/{}/members", self.api_url, org);
        let members: Vec<GitHubUserSummary> = self.get_paged(&url, &[], None).await?;
        Ok(members.into_iter().map(|m| m.login).collect())
    }

    #[instrument(skip(self, body))]
    async fn create_issue_comment(
        &self,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<(), GitHubError> {
        let url = format!("{}/repos/{}/issues/{}/comments", self.api_url, repo, number);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        check_response(resp).await?;
        info!(number, "posted comment");
        Ok(())
    }

    async fn download_raw(&self, url: &str) -> Result<Vec<u8>, GitHubError> {
        let resp = self.http.get(url).bearer_auth(&self.token).send().await?;
        let resp = check_response(resp).await?;
        let bytes = resp.bytes().await?;
        debug!(url, size = bytes.len(), "downloaded raw content");
        Ok(bytes.to_vec())
    }
}

/// Map error statuses to [`GitHubError`], passing successful responses
/// through.
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response, GitHubError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let url = resp.url().to_string();
    match status.as_u16() {
        401 | 403 => {
            if status.as_u16() == 403 && rate_limit_exhausted(&resp) {
                return Err(GitHubError::RateLimited {
                    reset_at: rate_limit_reset(&resp),
                });
            }
            Err(GitHubError::AuthenticationFailed(format!("HTTP {}", status)))
        }
        404 => Err(GitHubError::NotFound(url)),
        429 => Err(GitHubError::RateLimited {
            reset_at: rate_limit_reset(&resp),
        }),
        code => {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {}", status));
            Err(GitHubError::ApiError { status: code, body })
        }
    }
}

fn rate_limit_exhausted(resp: &reqwest::Response) -> bool {
    resp.headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0")
}

fn rate_limit_reset(resp: &reqwest::Response) -> String {
    resp.headers()
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}
