//! Root of the `repo-audit-core` library.
//!
//! Audits one GitHub user's most recently pushed repositories for the
//! presence of configured paths, caching the listing for an hour and every
//! probe result indefinitely, and flags drift against the newest repository.

// Library code reports through tracing; rendering belongs to the binary.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod config_watcher;
pub mod engine;
pub mod error;
pub mod github;
pub mod model;
pub mod result;
pub mod runner;
mod timing;

pub use cache::CacheError;
pub use cache::CacheStore;
pub use clock::Clock;
pub use clock::ManualClock;
pub use clock::SystemClock;
pub use config::AuditConfig;
pub use config::ConfigError;
pub use config::ConfigOverrides;
pub use config_watcher::ConfigWatcher;
pub use engine::AuditEngine;
pub use engine::AuditOptions;
pub use engine::AuditRequest;
pub use error::AuditError;
pub use github::ApiError;
pub use github::GitHubClient;
pub use github::RepoHost;
pub use model::CheckItem;
pub use model::ProbeResult;
pub use model::RepositoryRef;
pub use result::AuditResult;
pub use result::CellState;
pub use result::RepositoryAudit;
pub use runner::AuditRunner;
pub use runner::RunOutcome;
