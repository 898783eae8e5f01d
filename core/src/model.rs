//! Data model shared by the client, the cache and the engine.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A relative path (file or directory) whose existence is audited.
pub type CheckItem = String;

/// Existence results for one repository, keyed by check item.
///
/// May be partial: items configured after the last probe are simply absent.
pub type ProbeResult = BTreeMap<CheckItem, bool>;

/// A repository as returned by the listing call.
///
/// Identity is the name. A later fetch for the same name replaces the whole
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    pub name: String,
    pub updated_at: DateTime<Utc>,
}

impl RepositoryRef {
    pub fn new(name: impl Into<String>, updated_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            updated_at,
        }
    }
}

/// Order repositories most-recently-updated first. Ties keep their input order.
pub fn sort_by_recency(repositories: &mut [RepositoryRef]) {
    repositories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
}

/// Remove duplicate check items, keeping the first occurrence of each.
pub fn dedup_check_items<I, S>(items: I) -> Vec<CheckItem>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(Into::into)
        .filter(|item: &String| seen.insert(item.clone()))
        .collect()
}

/// Persisted repository listing for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCacheEntry {
    pub user: String,
    pub limit: usize,
    pub fetched_at: DateTime<Utc>,
    pub repositories: Vec<RepositoryRef>,
}

impl ListingCacheEntry {
    /// True while `now - fetched_at < ttl`. Exactly `ttl` old is expired.
    pub fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        let age = now.signed_duration_since(self.fetched_at);
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => age < ttl,
            // A TTL too large for chrono never expires.
            Err(_) => true,
        }
    }

    /// Whether this entry was fetched for the given user and listing bound.
    pub fn matches(&self, user: &str, limit: usize) -> bool {
        self.user == user && self.limit == limit
    }
}

/// Persisted probe results for one repository. Keys are only ever added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeCacheEntry {
    pub repository: String,
    pub results: ProbeResult,
}

impl ProbeCacheEntry {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            results: ProbeResult::new(),
        }
    }

    /// Configured items that have no recorded result yet, in configured order.
    pub fn missing<'a>(&self, items: &'a [CheckItem]) -> Vec<&'a CheckItem> {
        items
            .iter()
            .filter(|item| !self.results.contains_key(item.as_str()))
            .collect()
    }

    /// Insert keys from `partial` that are not recorded yet.
    ///
    /// A recorded key keeps its first value. Returns how many keys were added.
    pub fn merge(&mut self, partial: &ProbeResult) -> usize {
        let mut added = 0;
        for (item, exists) in partial {
            if !self.results.contains_key(item) {
                self.results.insert(item.clone(), *exists);
                added += 1;
            }
        }
        added
    }

    /// The recorded results restricted to `items`.
    pub fn restrict_to(&self, items: &[CheckItem]) -> ProbeResult {
        items
            .iter()
            .filter_map(|item| self.results.get(item).map(|v| (item.clone(), *v)))
            .collect()
    }
}
