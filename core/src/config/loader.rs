use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::error::ConfigError;
use super::error::Result;
use crate::engine::AuditOptions;
use crate::engine::AuditRequest;
use crate::github::MAX_PER_PAGE;
use crate::model::CheckItem;
use crate::model::dedup_check_items;

/// File name used when no `--config` path is given.
pub const DEFAULT_CONFIG_FILE: &str = "audit_config.toml";

/// Written on first run so there is something to edit.
pub const DEFAULT_CONFIG_TEXT: &str = r#"# Repository audit configuration.
# Edits are picked up automatically when running with --watch.

# github_user = "your-github-username"
listing_count = 20

check_items = [
    "README.md",
    "LICENSE",
    ".gitignore",
]

[display]
show_updated_at = true
highlight_missing = true
"#;

/// Root configuration for an audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Account whose repositories are audited.
    #[serde(default)]
    pub github_user: String,

    /// Number of most recently pushed repositories to audit.
    #[serde(default = "default_listing_count")]
    pub listing_count: usize,

    /// Paths whose existence is checked, in display order.
    #[serde(default)]
    pub check_items: Vec<CheckItem>,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Maximum age of the cached repository listing.
    #[serde(default = "default_listing_ttl_secs")]
    pub listing_ttl_secs: u64,

    /// Pause between probes of the same repository.
    #[serde(default = "default_probe_delay_ms")]
    pub probe_delay_ms: u64,

    #[serde(default = "default_max_concurrent_repos")]
    pub max_concurrent_repos: usize,

    /// In-run retries for a probe that failed at the transport level.
    #[serde(default = "default_probe_retries")]
    pub probe_retries: usize,

    /// Git ref to probe; the repository's default branch when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(default)]
    pub display: DisplayConfig,
}

/// Presentation switches read by renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub show_updated_at: bool,

    /// Color drift cells when the terminal supports it.
    #[serde(default = "default_true")]
    pub highlight_missing: bool,
}

/// Values given on the command line that win over the file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub github_user: Option<String>,
    pub listing_count: Option<usize>,
    pub cache_dir: Option<PathBuf>,
}

fn default_listing_count() -> usize {
    20
}
fn default_cache_dir() -> PathBuf {
    PathBuf::from("cache")
}
fn default_listing_ttl_secs() -> u64 {
    3600
}
fn default_probe_delay_ms() -> u64 {
    100
}
fn default_max_concurrent_repos() -> usize {
    4
}
fn default_probe_retries() -> usize {
    1
}
fn default_true() -> bool {
    true
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_updated_at: default_true(),
            highlight_missing: default_true(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            github_user: String::new(),
            listing_count: default_listing_count(),
            check_items: Vec::new(),
            cache_dir: default_cache_dir(),
            listing_ttl_secs: default_listing_ttl_secs(),
            probe_delay_ms: default_probe_delay_ms(),
            max_concurrent_repos: default_max_concurrent_repos(),
            probe_retries: default_probe_retries(),
            branch: None,
            display: DisplayConfig::default(),
        }
    }
}

impl AuditConfig {
    /// Parse TOML text without touching the filesystem.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(user) = &overrides.github_user {
            self.github_user = user.clone();
        }
        if let Some(count) = overrides.listing_count {
            self.listing_count = count;
        }
        if let Some(dir) = &overrides.cache_dir {
            self.cache_dir = dir.clone();
        }
    }

    /// Trim, dedupe and clamp, then reject values no audit can run with.
    pub fn normalize(&mut self) -> Result<()> {
        self.github_user = self.github_user.trim().to_string();
        if self.github_user.is_empty() {
            return Err(ConfigError::Validation(
                "github_user must be set in the config file or passed with --user".into(),
            ));
        }

        self.check_items = dedup_check_items(
            self.check_items
                .iter()
                .map(|item| item.trim())
                .filter(|item| !item.is_empty()),
        );
        if self.check_items.is_empty() {
            return Err(ConfigError::Validation(
                "check_items must list at least one path".into(),
            ));
        }

        self.listing_count = self.listing_count.clamp(1, MAX_PER_PAGE);
        self.max_concurrent_repos = self.max_concurrent_repos.max(1);
        self.branch = self.branch.take().filter(|b| !b.trim().is_empty());
        Ok(())
    }

    pub fn to_request(&self) -> AuditRequest {
        AuditRequest {
            user: self.github_user.clone(),
            check_items: self.check_items.clone(),
            listing_count: self.listing_count,
        }
    }

    pub fn engine_options(&self) -> AuditOptions {
        AuditOptions {
            listing_ttl: Duration::from_secs(self.listing_ttl_secs),
            probe_delay: Duration::from_millis(self.probe_delay_ms),
            max_concurrent_repos: self.max_concurrent_repos,
            probe_retries: self.probe_retries,
        }
    }
}

/// Create `path` with [`DEFAULT_CONFIG_TEXT`] unless it already exists.
/// Returns whether a file was written.
pub fn write_default_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_CONFIG_TEXT)?;
    tracing::info!(path = %path.display(), "wrote default configuration");
    Ok(true)
}

/// Read and validate an existing configuration file.
///
/// Used for reloads: a file that vanished mid-edit is reported, not recreated.
pub fn read_config(path: &Path, overrides: &ConfigOverrides) -> Result<AuditConfig> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    let mut config = AuditConfig::from_toml_str(&text, path)?;
    config.apply_overrides(overrides);
    config.normalize()?;
    Ok(config)
}

/// Load the configuration, writing the default file first when it is missing.
pub fn load_config(path: &Path, overrides: &ConfigOverrides) -> Result<AuditConfig> {
    write_default_config(path)?;
    read_config(path, overrides)
}
