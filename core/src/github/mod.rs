//! Remote repository host access.
//!
//! [`RepoHost`] is the seam the engine talks to; [`GitHubClient`] is the
//! reqwest-backed implementation for the GitHub REST API. Tests substitute
//! either a wiremock server behind `GitHubClient` or their own `RepoHost`.

mod client;

pub use client::DEFAULT_API_BASE;
pub use client::GitHubClient;
pub use client::MAX_PER_PAGE;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::model::RepositoryRef;

/// Errors from the remote host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The credential was rejected (HTTP 401).
    #[error("credential rejected by GitHub (HTTP 401)")]
    Unauthorized,

    /// Throttled by the remote. Carries the reset time when the response said.
    #[error("GitHub rate limit exceeded{}", describe_reset(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// The user does not exist (HTTP 404 on the listing call).
    #[error("GitHub user not found: {user}")]
    UserNotFound { user: String },

    /// Timeout, refused connection, DNS failure and friends.
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other non-success status on a call where status matters.
    #[error("unexpected HTTP status {status}: {message}")]
    Http { status: u16, message: String },

    /// The response body was not what the API documents.
    #[error("failed to decode GitHub response: {0}")]
    Decode(String),

    /// The request could not be built (bad base URL, empty path).
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport(_))
    }
}

fn describe_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!(" (resets at {})", at.to_rfc3339()),
        None => String::new(),
    }
}

/// Read-only access to a user's repositories on a hosting service.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// List up to `max_count` repositories for `user`, most recently updated first.
    async fn list_repositories(
        &self,
        user: &str,
        max_count: usize,
    ) -> Result<Vec<RepositoryRef>, ApiError>;

    /// Whether `path` exists in `user/repo`.
    ///
    /// A non-success response means "does not exist"; transport failures are
    /// returned as [`ApiError::Transport`] so callers can tell outages from
    /// genuine absence.
    async fn probe_path(&self, user: &str, repo: &str, path: &str) -> Result<bool, ApiError>;
}
