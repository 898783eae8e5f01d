//! Audit orchestration.
//!
//! One run resolves the repository listing (cache first, then the host),
//! resolves every repository's probe results incrementally against the probe
//! cache, and assembles an [`AuditResult`]. Only check items with no recorded
//! result are sent to the host.

use std::sync::Arc;
use std::time::Duration;

use backon::ExponentialBuilder;
use backon::Retryable;
use futures::StreamExt;
use futures::TryStreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheStore;
use crate::clock::Clock;
use crate::clock::SystemClock;
use crate::error::AuditError;
use crate::error::Result;
use crate::github::ApiError;
use crate::github::RepoHost;
use crate::measure_time_async;
use crate::model::CheckItem;
use crate::model::ProbeCacheEntry;
use crate::model::ProbeResult;
use crate::model::RepositoryRef;
use crate::model::dedup_check_items;
use crate::model::sort_by_recency;
use crate::result::AuditResult;
use crate::result::RepositoryAudit;

/// How long a fetched listing is trusted.
pub const DEFAULT_LISTING_TTL: Duration = Duration::from_secs(60 * 60);

/// Courtesy pause between two probes of the same repository.
pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_millis(100);

const RETRY_MIN_DELAY: Duration = Duration::from_millis(250);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(4);

/// Tuning for an [`AuditEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditOptions {
    pub listing_ttl: Duration,
    pub probe_delay: Duration,
    /// Repositories resolved at the same time. Probes within one repository
    /// are always sequential.
    pub max_concurrent_repos: usize,
    /// Extra attempts for a probe that failed at the transport level.
    pub probe_retries: usize,
}

impl Default for AuditOptions {
    fn default() -> Self {
        Self {
            listing_ttl: DEFAULT_LISTING_TTL,
            probe_delay: DEFAULT_PROBE_DELAY,
            max_concurrent_repos: 4,
            probe_retries: 1,
        }
    }
}

/// What to audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRequest {
    pub user: String,
    pub check_items: Vec<CheckItem>,
    pub listing_count: usize,
}

/// Per-repository outcome before assembly.
struct Resolved {
    audit: RepositoryAudit,
    cache_warning: Option<AuditError>,
}

pub struct AuditEngine {
    host: Arc<dyn RepoHost>,
    cache: Arc<CacheStore>,
    clock: Arc<dyn Clock>,
    options: AuditOptions,
}

impl AuditEngine {
    pub fn new(host: Arc<dyn RepoHost>, cache: Arc<CacheStore>, options: AuditOptions) -> Self {
        Self {
            host,
            cache,
            clock: Arc::new(SystemClock),
            options,
        }
    }

    /// Stamp results with `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &AuditOptions {
        &self.options
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Run one audit to completion.
    pub async fn audit(&self, request: &AuditRequest) -> Result<AuditResult> {
        self.audit_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Run one audit, giving up with [`AuditError::Cancelled`] once `cancel`
    /// fires. Cache files written before cancellation stay valid.
    pub async fn audit_with_cancel(
        &self,
        request: &AuditRequest,
        cancel: &CancellationToken,
    ) -> Result<AuditResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::debug!(user = %request.user, "audit cancelled");
                Err(AuditError::Cancelled)
            }
            result = self.run(request) => result,
        }
    }

    async fn run(&self, request: &AuditRequest) -> Result<AuditResult> {
        let user = request.user.as_str();
        let check_items = dedup_check_items(request.check_items.iter().map(String::as_str));
        let mut cache_warnings = Vec::new();

        let listing = match self
            .resolve_listing(user, request.listing_count, &mut cache_warnings)
            .await
        {
            Ok(listing) => listing,
            Err(err) => {
                tracing::error!(user, error = %err, "repository listing failed");
                return Err(err);
            }
        };
        if let Some(baseline) = listing.first() {
            tracing::debug!(user, baseline = %baseline.name, "baseline repository");
        }

        let items = &check_items;
        let resolved: Vec<Resolved> = stream::iter(listing.iter().cloned())
            .map(|repo| async move { self.resolve_repository(user, &repo, items).await })
            .buffered(self.options.max_concurrent_repos.max(1))
            .try_collect()
            .await
            .inspect_err(|err| tracing::error!(user, error = %err, "audit aborted"))?;

        let mut repositories = Vec::with_capacity(resolved.len());
        for entry in resolved {
            cache_warnings.extend(entry.cache_warning);
            repositories.push(entry.audit);
        }

        let result = AuditResult::new(
            user,
            self.clock.now(),
            check_items,
            repositories,
            cache_warnings,
        );
        tracing::info!(
            user,
            repositories = result.repositories().len(),
            unknown = result.unknown_cells(),
            "audit complete"
        );
        Ok(result)
    }

    /// Cached listing when fresh, otherwise a remote fetch written back to
    /// the cache. Remote failures are fatal; cache write failures are not.
    async fn resolve_listing(
        &self,
        user: &str,
        limit: usize,
        cache_warnings: &mut Vec<AuditError>,
    ) -> Result<Vec<RepositoryRef>> {
        if let Some(entry) = self.cache.read_listing(user, limit, self.options.listing_ttl) {
            tracing::debug!(user, count = entry.repositories.len(), "listing cache hit");
            return Ok(entry.repositories);
        }

        tracing::info!(user, limit, "fetching repository listing");
        let mut repositories = measure_time_async!(
            "list_repositories",
            self.host.list_repositories(user, limit),
            user = user
        )?;
        sort_by_recency(&mut repositories);
        repositories.truncate(limit);

        if let Err(err) = self.cache.write_listing(user, limit, &repositories) {
            tracing::warn!(user, error = %err, "failed to persist repository listing");
            cache_warnings.push(err.into());
        }
        Ok(repositories)
    }

    async fn resolve_repository(
        &self,
        user: &str,
        repo: &RepositoryRef,
        check_items: &[CheckItem],
    ) -> Result<Resolved> {
        measure_time_async!(
            "resolve_repository",
            self.probe_missing(user, repo, check_items),
            repo = repo.name.as_str()
        )
    }

    async fn probe_missing(
        &self,
        user: &str,
        repo: &RepositoryRef,
        check_items: &[CheckItem],
    ) -> Result<Resolved> {
        let mut entry = ProbeCacheEntry {
            repository: repo.name.clone(),
            results: self.cache.read_probe_cache(&repo.name),
        };
        let missing = entry.missing(check_items);
        tracing::debug!(
            repo = %repo.name,
            cached = check_items.len() - missing.len(),
            missing = missing.len(),
            "resolving check items"
        );

        let mut fresh = ProbeResult::new();
        let mut unknown = Vec::new();
        for (index, item) in missing.into_iter().enumerate() {
            if index > 0 && !self.options.probe_delay.is_zero() {
                tokio::time::sleep(self.options.probe_delay).await;
            }
            match self.probe_with_retry(user, &repo.name, item).await {
                Ok(exists) => {
                    fresh.insert(item.clone(), exists);
                }
                Err(err @ (ApiError::RateLimited { .. } | ApiError::Unauthorized)) => {
                    // Keep what this repository already answered before giving up.
                    if !fresh.is_empty()
                        && let Err(cache_err) = self.cache.merge_probe_cache(&repo.name, &fresh)
                    {
                        tracing::warn!(repo = %repo.name, error = %cache_err, "failed to persist probe results");
                    }
                    return Err(err.into());
                }
                Err(err) => {
                    tracing::warn!(repo = %repo.name, item = %item, error = %err, "probe failed; result unknown");
                    unknown.push(item.clone());
                }
            }
        }

        let mut cache_warning = None;
        if !fresh.is_empty() {
            match self.cache.merge_probe_cache(&repo.name, &fresh) {
                Ok(merged) => entry.results = merged,
                Err(err) => {
                    tracing::warn!(repo = %repo.name, error = %err, "failed to persist probe results");
                    entry.merge(&fresh);
                    cache_warning = Some(err.into());
                }
            }
        }

        Ok(Resolved {
            audit: RepositoryAudit::new(repo.clone(), entry.restrict_to(check_items), unknown),
            cache_warning,
        })
    }

    async fn probe_with_retry(
        &self,
        user: &str,
        repo: &str,
        item: &str,
    ) -> std::result::Result<bool, ApiError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(RETRY_MIN_DELAY)
            .with_max_delay(RETRY_MAX_DELAY)
            .with_max_times(self.options.probe_retries);

        (|| async { self.host.probe_path(user, repo, item).await })
            .retry(backoff)
            .when(ApiError::is_transport)
            .notify(|err: &ApiError, after: Duration| {
                tracing::debug!(
                    repo,
                    item,
                    error = %err,
                    retry_in_ms = after.as_millis() as u64,
                    "retrying probe"
                );
            })
            .await
    }
}
