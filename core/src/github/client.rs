//! GitHub REST client.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use serde::Deserialize;

use super::ApiError;
use super::RepoHost;
use crate::model::RepositoryRef;
use crate::model::sort_by_recency;

/// Public GitHub API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Largest page GitHub serves for the repository listing.
pub const MAX_PER_PAGE: usize = 100;

const API_VERSION: &str = "2022-11-28";

const USER_AGENT: &str = concat!("repo-audit/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";
const RETRY_AFTER: &str = "retry-after";

/// Subset of the repository payload the audit needs.
#[derive(Debug, Deserialize)]
struct RawRepository {
    name: String,
    #[serde(default)]
    pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

impl From<RawRepository> for RepositoryRef {
    fn from(raw: RawRepository) -> Self {
        let updated_at = raw
            .pushed_at
            .or(raw.updated_at)
            .unwrap_or(DateTime::UNIX_EPOCH);
        RepositoryRef::new(raw.name, updated_at)
    }
}

/// Authenticated accessor for the GitHub REST API.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    branch: Option<String>,
}

impl GitHubClient {
    /// Client for the public GitHub API.
    pub fn new(token: Option<String>) -> Result<Self, ApiError> {
        Self::with_base_url(DEFAULT_API_BASE, token)
    }

    /// Client for any API base URL (GitHub Enterprise, a mock server).
    pub fn with_base_url(base_url: &str, token: Option<String>) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidRequest(format!("bad base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest(format!(
                "base url cannot carry a path: {base_url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
            branch: None,
        })
    }

    /// Probe paths on this git ref instead of the default branch.
    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch.filter(|b| !b.trim().is_empty());
        self
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn endpoint<'a, I>(&self, segments: I) -> Result<Url, ApiError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidRequest(format!("bad base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ApiError::InvalidRequest("token is not a valid header".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ApiError> {
        self.client
            .get(url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(transport_error)
    }
}

#[async_trait]
impl RepoHost for GitHubClient {
    async fn list_repositories(
        &self,
        user: &str,
        max_count: usize,
    ) -> Result<Vec<RepositoryRef>, ApiError> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let per_page = max_count.min(MAX_PER_PAGE);

        let mut url = self.endpoint(["users", user, "repos"])?;
        url.query_pairs_mut()
            .append_pair("sort", "pushed")
            .append_pair("direction", "desc")
            .append_pair("per_page", &per_page.to_string());

        tracing::debug!(user, per_page, "listing repositories");
        let response = self.get(url).await?;
        let status = response.status();
        match status {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => return Err(ApiError::Unauthorized),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                return Err(ApiError::RateLimited {
                    reset_at: rate_limit_reset(response.headers(), Utc::now()),
                });
            }
            StatusCode::NOT_FOUND => {
                return Err(ApiError::UserNotFound {
                    user: user.to_string(),
                });
            }
            other => {
                let message = response.text().await.unwrap_or_default();
                return Err(ApiError::Http {
                    status: other.as_u16(),
                    message,
                });
            }
        }

        let raw: Vec<RawRepository> = response.json().await.map_err(|e| {
            if e.is_decode() {
                ApiError::Decode(e.to_string())
            } else {
                transport_error(e)
            }
        })?;

        let mut repositories: Vec<RepositoryRef> = raw.into_iter().map(Into::into).collect();
        sort_by_recency(&mut repositories);
        repositories.truncate(max_count);
        Ok(repositories)
    }

    async fn probe_path(&self, user: &str, repo: &str, path: &str) -> Result<bool, ApiError> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(ApiError::InvalidRequest(format!(
                "empty check item path for {repo}"
            )));
        }

        let mut url = self.endpoint(
            ["repos", user, repo, "contents"]
                .into_iter()
                .chain(segments.iter().copied()),
        )?;
        if let Some(branch) = &self.branch {
            url.query_pairs_mut().append_pair("ref", branch);
        }

        let response = self.get(url).await?;
        let status = response.status();
        if status == StatusCode::OK {
            return Ok(true);
        }
        if matches!(status, StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS)
            && rate_limit_exhausted(response.headers())
        {
            return Err(ApiError::RateLimited {
                reset_at: rate_limit_reset(response.headers(), Utc::now()),
            });
        }
        tracing::trace!(repo, path, status = status.as_u16(), "path not present");
        Ok(false)
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::Transport(format!("request timed out: {err}"))
    } else {
        ApiError::Transport(err.to_string())
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// Whether a 403/429 is throttling rather than a plain refusal.
fn rate_limit_exhausted(headers: &HeaderMap) -> bool {
    header_str(headers, RATE_LIMIT_REMAINING) == Some("0") || headers.contains_key(RETRY_AFTER)
}

/// Reset time from `x-ratelimit-reset` (epoch seconds) or `retry-after` (seconds from now).
fn rate_limit_reset(headers: &HeaderMap, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(epoch) = header_str(headers, RATE_LIMIT_RESET).and_then(|v| v.parse::<i64>().ok())
    {
        return DateTime::from_timestamp(epoch, 0);
    }
    header_str(headers, RETRY_AFTER)
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delay| now.checked_add_signed(delay))
}
