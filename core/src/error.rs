//! Error taxonomy for an audit run.
//!
//! Listing-phase errors are fatal to a run. Per-item probe failures never
//! reach this type; the engine isolates them as unknown cells instead.

use std::path::PathBuf;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::github::ApiError;

pub type Result<T> = std::result::Result<T, AuditError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    /// Bad or missing credential; needs user action.
    #[error("authentication failed: the GitHub token was rejected")]
    Auth,

    /// Throttled by the remote; retry after `reset_at`.
    #[error("rate limited by GitHub{}", describe_reset(.reset_at))]
    RateLimited { reset_at: Option<DateTime<Utc>> },

    /// Unknown user.
    #[error("GitHub user not found: {user}")]
    NotFound { user: String },

    /// Timeout or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The listing call answered with a status the audit cannot use.
    #[error("unexpected response from GitHub (HTTP {status}): {message}")]
    Http { status: u16, message: String },

    /// The listing response could not be decoded.
    #[error("malformed response from GitHub: {0}")]
    Decode(String),

    /// Persistence failed. Runs report this as a warning, not a failure.
    #[error("cache not persisted: {message}")]
    CacheWrite { path: PathBuf, message: String },

    /// The configuration driving a re-audit was malformed.
    #[error("invalid configuration: {0}")]
    ConfigParse(String),

    /// A newer run superseded this one.
    #[error("audit cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

fn describe_reset(reset_at: &Option<DateTime<Utc>>) -> String {
    match reset_at {
        Some(at) => format!("; limit resets at {}", at.to_rfc3339()),
        None => String::new(),
    }
}

impl AuditError {
    /// Whether retrying the same run later can succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuditError::RateLimited { .. }
                | AuditError::Transport(_)
                | AuditError::CacheWrite { .. }
        )
    }

    /// How long to wait before retrying, when the error says.
    pub fn suggested_backoff(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            AuditError::RateLimited {
                reset_at: Some(at),
            } => Some((*at - now).to_std().unwrap_or(Duration::ZERO)),
            _ => None,
        }
    }
}

impl From<ApiError> for AuditError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized => AuditError::Auth,
            ApiError::RateLimited { reset_at } => AuditError::RateLimited { reset_at },
            ApiError::UserNotFound { user } => AuditError::NotFound { user },
            ApiError::Transport(message) => AuditError::Transport(message),
            ApiError::Http { status, message } => AuditError::Http { status, message },
            ApiError::Decode(message) => AuditError::Decode(message),
            ApiError::InvalidRequest(message) => AuditError::Other(message),
        }
    }
}

impl From<CacheError> for AuditError {
    fn from(err: CacheError) -> Self {
        AuditError::CacheWrite {
            path: err.path().to_path_buf(),
            message: err.to_string(),
        }
    }
}

impl From<ConfigError> for AuditError {
    fn from(err: ConfigError) -> Self {
        AuditError::ConfigParse(err.to_string())
    }
}
