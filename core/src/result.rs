//! The audit data product handed to renderers and exporters.
//!
//! An [`AuditResult`] is built once per run and never mutated. Drift is
//! computed here: an item drifts on a repository when it is absent there and
//! present on the baseline (the most recently updated repository).

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use serde::Serializer;

use crate::error::AuditError;
use crate::model::CheckItem;
use crate::model::ProbeResult;
use crate::model::RepositoryRef;

/// Classification of one (repository, item) cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    Present,
    /// Absent, and the baseline lacks it too.
    Absent,
    /// Absent while the baseline has it.
    Drift,
    /// The probe failed this run; nothing is known.
    Unknown,
}

fn serialize_warnings<S: Serializer>(
    warnings: &[AuditError],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(warnings.iter().map(ToString::to_string))
}

/// True iff the repository lacks the item and the baseline has it.
pub fn is_drift(value: Option<bool>, baseline: Option<bool>) -> bool {
    value == Some(false) && baseline == Some(true)
}

/// Per-repository slice of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryAudit {
    repository: RepositoryRef,
    results: ProbeResult,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    unknown: Vec<CheckItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    drift: Vec<CheckItem>,
}

impl RepositoryAudit {
    /// `results` should already be restricted to the configured items;
    /// `unknown` lists the items whose probe failed this run.
    pub fn new(repository: RepositoryRef, results: ProbeResult, unknown: Vec<CheckItem>) -> Self {
        Self {
            repository,
            results,
            unknown,
            drift: Vec::new(),
        }
    }

    pub fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    pub fn name(&self) -> &str {
        &self.repository.name
    }

    pub fn results(&self) -> &ProbeResult {
        &self.results
    }

    pub fn unknown(&self) -> &[CheckItem] {
        &self.unknown
    }

    /// Items flagged as drift against the baseline.
    pub fn drift(&self) -> &[CheckItem] {
        &self.drift
    }

    pub fn get(&self, item: &str) -> Option<bool> {
        self.results.get(item).copied()
    }
}

/// Outcome of one audit run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditResult {
    user: String,
    generated_at: DateTime<Utc>,
    check_items: Vec<CheckItem>,
    total_repos: usize,
    repositories: Vec<RepositoryAudit>,
    baseline: Option<RepositoryRef>,
    #[serde(
        skip_serializing_if = "Vec::is_empty",
        serialize_with = "serialize_warnings"
    )]
    cache_warnings: Vec<AuditError>,
}

impl AuditResult {
    /// Assemble a result. The first repository becomes the baseline and drift
    /// is filled in for every repository.
    pub fn new(
        user: impl Into<String>,
        generated_at: DateTime<Utc>,
        check_items: Vec<CheckItem>,
        mut repositories: Vec<RepositoryAudit>,
        cache_warnings: Vec<AuditError>,
    ) -> Self {
        let baseline_results = repositories.first().map(|r| r.results.clone());
        if let Some(baseline_results) = &baseline_results {
            for repo in &mut repositories {
                repo.drift = check_items
                    .iter()
                    .filter(|item| {
                        is_drift(
                            repo.results.get(item.as_str()).copied(),
                            baseline_results.get(item.as_str()).copied(),
                        )
                    })
                    .cloned()
                    .collect();
            }
        }
        let baseline = repositories.first().map(|r| r.repository.clone());
        Self {
            user: user.into(),
            generated_at,
            check_items,
            total_repos: repositories.len(),
            repositories,
            baseline,
            cache_warnings,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn generated_at(&self) -> DateTime<Utc> {
        self.generated_at
    }

    pub fn check_items(&self) -> &[CheckItem] {
        &self.check_items
    }

    pub fn repositories(&self) -> &[RepositoryAudit] {
        &self.repositories
    }

    /// None for an empty listing.
    pub fn baseline(&self) -> Option<&RepositoryRef> {
        self.baseline.as_ref()
    }

    /// Non-fatal persistence failures, each an [`AuditError::CacheWrite`].
    pub fn cache_warnings(&self) -> &[AuditError] {
        &self.cache_warnings
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    pub fn repository(&self, name: &str) -> Option<&RepositoryAudit> {
        self.repositories.iter().find(|r| r.name() == name)
    }

    /// Classify one cell.
    pub fn cell(&self, repo: &RepositoryAudit, item: &str) -> CellState {
        match repo.get(item) {
            Some(true) => CellState::Present,
            None => CellState::Unknown,
            Some(false) => {
                let baseline = self.repositories.first().and_then(|b| b.get(item));
                if is_drift(Some(false), baseline) {
                    CellState::Drift
                } else {
                    CellState::Absent
                }
            }
        }
    }

    /// For each configured item, how many repositories lack it.
    pub fn missing_counts(&self) -> Vec<(&str, usize)> {
        self.check_items
            .iter()
            .map(|item| {
                let count = self
                    .repositories
                    .iter()
                    .filter(|r| r.get(item) == Some(false))
                    .count();
                (item.as_str(), count)
            })
            .collect()
    }

    /// Total number of cells whose probe failed.
    pub fn unknown_cells(&self) -> usize {
        self.repositories.iter().map(|r| r.unknown.len()).sum()
    }
}
