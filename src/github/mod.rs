//! GitHub API client
//!
//! Rate-limit-aware fetcher for repository metadata and commit pages. The
//! client never retries; callers own retry policy. The only shared mutable
//! state is the rate-limit snapshot behind a readers-writer lock.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::AppConfig;
use crate::error::UpstreamError;

/// GitHub caps per_page at 100; fewer items than this means the last page.
const PER_PAGE: usize = 100;

const ACCEPT_HEADER: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("gitmirror/", env!("CARGO_PKG_VERSION"));

/// Snapshot of the upstream rate-limit state, derived from the
/// `X-RateLimit-*` headers of the most recent response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitInfo {
    pub remaining: u32,
    pub limit: u32,
    pub reset: DateTime<Utc>,
}

/// Repository payload from `GET /repos/{owner}/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryResponse {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub html_url: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub forks_count: i32,
    #[serde(default)]
    pub stargazers_count: i32,
    #[serde(default)]
    pub watchers_count: i32,
    #[serde(default)]
    pub open_issues_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One element of the `GET /repos/{owner}/{name}/commits` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub sha: String,
    pub commit: CommitDetail,
    pub html_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitDetail {
    pub author: CommitIdentity,
    pub committer: CommitIdentity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
    pub date: DateTime<Utc>,
}

/// Operation surface of the upstream API. The sync service and the
/// coordinators depend on this trait; tests substitute their own variant.
#[async_trait]
pub trait Upstream: Send + Sync {
    async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<RepositoryResponse, UpstreamError>;

    /// Fetches commits newer than `since` (inclusive at second resolution),
    /// newest first. `None` fetches the full window the upstream permits.
    async fn get_commits(
        &self,
        owner: &str,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitResponse>, UpstreamError>;

    fn rate_limit_info(&self) -> RateLimitInfo;
}

/// GitHub API client backed by reqwest.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
    max_pages: u32,
    rate_limit: RwLock<RateLimitInfo>,
}

impl Client {
    pub fn new(config: &AppConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.github_request_timeout_secs))
            .build()
            .expect("reqwest client construction is infallible with these options");

        Self {
            http,
            base_url: config.github_api_base.trim_end_matches('/').to_string(),
            token: config.github_token.clone(),
            max_pages: config.github_max_pages,
            // Anonymous quota until the first response teaches us better.
            rate_limit: RwLock::new(RateLimitInfo {
                remaining: 60,
                limit: 60,
                reset: Utc::now() + chrono::Duration::hours(1),
            }),
        }
    }

    /// Suspends until the cached reset when the quota is exhausted. Callers
    /// that need a deadline wrap the whole request in `tokio::time::timeout`.
    async fn wait_for_rate_limit(&self) {
        let snapshot = *self.rate_limit.read().expect("rate limit lock poisoned");

        if snapshot.remaining == 0 {
            let wait = snapshot.reset - Utc::now();
            if let Ok(wait) = wait.to_std()
                && !wait.is_zero()
            {
                warn!(
                    reset = %snapshot.reset,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limit exhausted, waiting for reset"
                );
                tokio::time::sleep(wait).await;
            }
        }
    }

    fn update_rate_limit(&self, response: &reqwest::Response) {
        let mut snapshot = self.rate_limit.write().expect("rate limit lock poisoned");

        if let Some(remaining) = header_value(response, "X-RateLimit-Remaining") {
            snapshot.remaining = remaining;
        }
        if let Some(limit) = header_value(response, "X-RateLimit-Limit") {
            snapshot.limit = limit;
        }
        if let Some(reset) = header_value::<i64>(response, "X-RateLimit-Reset")
            && let Some(reset) = DateTime::from_timestamp(reset, 0)
        {
            snapshot.reset = reset;
        }
    }

    /// Issues one GET with the rate-limit gate consulted up front and the
    /// snapshot refreshed from the reply.
    async fn get(&self, url: Url) -> Result<reqwest::Response, UpstreamError> {
        self.wait_for_rate_limit().await;

        let mut request = self
            .http
            .get(url.clone())
            .header("Accept", ACCEPT_HEADER)
            .header("User-Agent", USER_AGENT);
        if !self.token.is_empty() {
            request = request.header("Authorization", format!("token {}", self.token));
        }

        let response = request.send().await.map_err(|source| {
            UpstreamError::Network {
                url: url.to_string(),
                source,
            }
        })?;

        self.update_rate_limit(&response);

        if response.status() == StatusCode::FORBIDDEN
            && header_value::<u32>(&response, "X-RateLimit-Remaining") == Some(0)
        {
            let reset = self
                .rate_limit
                .read()
                .expect("rate limit lock poisoned")
                .reset;
            return Err(UpstreamError::RateLimited { reset });
        }

        Ok(response)
    }

    fn repo_url(&self, owner: &str, name: &str) -> Result<Url, url::ParseError> {
        Url::parse(&format!("{}/repos/{}/{}", self.base_url, owner, name))
    }

    fn commits_url(
        &self,
        owner: &str,
        name: &str,
        since: Option<DateTime<Utc>>,
        page: u32,
    ) -> Result<Url, url::ParseError> {
        let mut url = Url::parse(&format!(
            "{}/repos/{}/{}/commits",
            self.base_url, owner, name
        ))?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(since) = since {
                query.append_pair("since", &since.to_rfc3339());
            }
            query.append_pair("per_page", &PER_PAGE.to_string());
            query.append_pair("page", &page.to_string());
        }
        Ok(url)
    }

    #[cfg(test)]
    fn set_rate_limit(&self, info: RateLimitInfo) {
        *self.rate_limit.write().expect("rate limit lock poisoned") = info;
    }
}

fn header_value<T: std::str::FromStr>(response: &reqwest::Response, name: &str) -> Option<T> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[async_trait]
impl Upstream for Client {
    async fn get_repository(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<RepositoryResponse, UpstreamError> {
        let url = self.repo_url(owner, name)?;
        let response = self.get(url.clone()).await?;

        if !response.status().is_success() {
            return Err(UpstreamError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.json().await.map_err(|source| UpstreamError::Decode {
            url: url.to_string(),
            source,
        })
    }

    async fn get_commits(
        &self,
        owner: &str,
        name: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<CommitResponse>, UpstreamError> {
        let mut all = Vec::new();
        let mut page = 1_u32;

        debug!(owner, name, since = ?since, "Starting commit fetch");

        loop {
            let url = self.commits_url(owner, name, since, page)?;
            let response = self.get(url.clone()).await?;

            if !response.status().is_success() {
                return Err(UpstreamError::Status {
                    url: url.to_string(),
                    status: response.status().as_u16(),
                });
            }

            let page_commits: Vec<CommitResponse> =
                response.json().await.map_err(|source| UpstreamError::Decode {
                    url: url.to_string(),
                    source,
                })?;

            let page_len = page_commits.len();
            all.extend(page_commits);

            if page_len < PER_PAGE {
                break;
            }
            if self.max_pages > 0 && page >= self.max_pages {
                warn!(
                    owner,
                    name,
                    pages = page,
                    "Commit pagination truncated by configured page bound"
                );
                break;
            }
            page += 1;
        }

        info!(owner, name, commits_fetched = all.len(), "Completed commit fetch");
        Ok(all)
    }

    fn rate_limit_info(&self) -> RateLimitInfo {
        *self.rate_limit.read().expect("rate limit lock poisoned")
    }
}
