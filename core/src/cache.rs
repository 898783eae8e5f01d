//! On-disk cache for repository listings and probe results.
//!
//! ## Layout
//!
//! ```text
//! <cache_dir>/
//!   repositories.json     ListingCacheEntry (one per cache dir, tagged with user + limit)
//!   repos/<name>.json     ProbeCacheEntry (one per repository)
//! ```
//!
//! Listings expire after a TTL judged at read time. Probe entries never
//! expire and only grow; deleting the directory forces a full re-audit.
//! Undecodable files read as absent. Every write is fsynced and renamed into
//! place before the call returns.

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::model::ListingCacheEntry;
use crate::model::ProbeCacheEntry;
use crate::model::ProbeResult;
use crate::model::RepositoryRef;

pub const LISTING_FILE: &str = "repositories.json";
pub const PROBE_DIR: &str = "repos";

/// Failures persisting cache entries.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode cache entry for {path}: {source}")]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to remove cache directory {path}: {source}")]
    Clear {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl CacheError {
    pub fn path(&self) -> &Path {
        match self {
            CacheError::Write { path, .. }
            | CacheError::Encode { path, .. }
            | CacheError::Clear { path, .. } => path,
        }
    }
}

/// Listing cache plus per-repository probe caches under one directory.
pub struct CacheStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    listing_lock: Mutex<()>,
    repo_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_clock(root, Arc::new(SystemClock))
    }

    pub fn with_clock(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
            listing_lock: Mutex::new(()),
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The cached listing for `user`/`limit`, if younger than `max_age`.
    ///
    /// Stale, foreign and undecodable entries are all plain misses.
    pub fn read_listing(
        &self,
        user: &str,
        limit: usize,
        max_age: Duration,
    ) -> Option<ListingCacheEntry> {
        let path = self.listing_path();
        let entry: ListingCacheEntry = read_json(&path)?;
        if !entry.matches(user, limit) {
            tracing::debug!(
                cached_user = %entry.user,
                cached_limit = entry.limit,
                "listing cache belongs to another query"
            );
            return None;
        }
        if !entry.is_fresh(self.clock.now(), max_age) {
            tracing::debug!(fetched_at = %entry.fetched_at, "listing cache expired");
            return None;
        }
        Some(entry)
    }

    /// Replace the listing entry wholesale, stamped with the current time.
    pub fn write_listing(
        &self,
        user: &str,
        limit: usize,
        repositories: &[RepositoryRef],
    ) -> Result<ListingCacheEntry, CacheError> {
        let _guard = lock(&self.listing_lock);
        let entry = ListingCacheEntry {
            user: user.to_string(),
            limit,
            fetched_at: self.clock.now(),
            repositories: repositories.to_vec(),
        };
        write_json(&self.listing_path(), &entry)?;
        Ok(entry)
    }

    /// Everything recorded for `repo`; empty when never probed.
    pub fn read_probe_cache(&self, repo: &str) -> ProbeResult {
        self.load_probe_entry(repo).results
    }

    /// Add keys from `partial` that are not recorded yet and persist.
    ///
    /// Keys absent from `partial` are untouched and a recorded key keeps its
    /// first value. Returns the merged mapping.
    pub fn merge_probe_cache(
        &self,
        repo: &str,
        partial: &ProbeResult,
    ) -> Result<ProbeResult, CacheError> {
        let repo_lock = self.repo_lock(repo);
        let _guard = lock(&repo_lock);

        let mut entry = self.load_probe_entry(repo);
        let added = entry.merge(partial);
        if added > 0 {
            write_json(&self.probe_path(repo), &entry)?;
            tracing::debug!(repo, added, total = entry.results.len(), "probe cache updated");
        }
        Ok(entry.results)
    }

    /// Remove the whole cache directory.
    pub fn clear(&self) -> Result<(), CacheError> {
        let _listing = lock(&self.listing_lock);
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Clear {
                path: self.root.clone(),
                source,
            }),
        }
    }

    fn load_probe_entry(&self, repo: &str) -> ProbeCacheEntry {
        match read_json::<ProbeCacheEntry>(&self.probe_path(repo)) {
            Some(entry) if entry.repository == repo => entry,
            Some(entry) => {
                tracing::warn!(
                    repo,
                    found = %entry.repository,
                    "probe cache file belongs to another repository; ignoring"
                );
                ProbeCacheEntry::new(repo)
            }
            None => ProbeCacheEntry::new(repo),
        }
    }

    fn repo_lock(&self, repo: &str) -> Arc<Mutex<()>> {
        let mut locks = lock(&self.repo_locks);
        Arc::clone(locks.entry(repo.to_string()).or_default())
    }

    fn listing_path(&self) -> PathBuf {
        self.root.join(LISTING_FILE)
    }

    fn probe_path(&self, repo: &str) -> PathBuf {
        self.root
            .join(PROBE_DIR)
            .join(format!("{}.json", file_stem_for(repo)))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Map a repository name onto a safe file stem.
fn file_stem_for(repo: &str) -> String {
    let stem: String = repo
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() || stem.chars().all(|c| c == '.') {
        format!("_{stem}")
    } else {
        stem
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cache file unreadable; treating as absent");
            return None;
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "cache file corrupt; treating as absent");
            None
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let write_err = |source: std::io::Error| CacheError::Write {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    let json = serde_json::to_vec_pretty(value).map_err(|source| CacheError::Encode {
        path: path.to_path_buf(),
        source,
    })?;

    // Write to a sibling, flush to disk, then rename over the target.
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp).map_err(write_err)?;
    file.write_all(&json).map_err(write_err)?;
    file.sync_all().map_err(write_err)?;
    drop(file);
    fs::rename(&tmp, path).map_err(write_err)?;
    Ok(())
}
