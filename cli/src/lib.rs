//! `repo-audit` command line.
//!
//! Loads the configuration, resolves a GitHub credential, runs one audit and
//! prints the table. With `--watch` it keeps running and re-audits whenever
//! the configuration file changes.

pub mod render;
pub mod token;

use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::DateTime;
use chrono::Utc;
use clap::Parser;
use render::TableStyle;
use repo_audit_core::AuditConfig;
use repo_audit_core::AuditEngine;
use repo_audit_core::AuditError;
use repo_audit_core::AuditResult;
use repo_audit_core::AuditRunner;
use repo_audit_core::CacheStore;
use repo_audit_core::ConfigOverrides;
use repo_audit_core::ConfigWatcher;
use repo_audit_core::GitHubClient;
use repo_audit_core::RunOutcome;
use repo_audit_core::config::DEFAULT_CONFIG_FILE;
use repo_audit_core::config::load_config;
use repo_audit_core::config::read_config;
use repo_audit_core::config_watcher::DEFAULT_POLL_INTERVAL;
use tokio::sync::mpsc;

/// Audit GitHub repositories for required files.
#[derive(Debug, Parser)]
#[command(name = "repo-audit", version, about)]
pub struct Cli {
    /// Path to the TOML configuration; created with defaults when missing.
    #[arg(long, short = 'c', value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// GitHub user to audit (overrides `github_user`).
    #[arg(long)]
    pub user: Option<String>,

    /// Number of most recently pushed repositories to audit (1-100).
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// GitHub token. Falls back to GITHUB_TOKEN, then `gh auth token`.
    #[arg(long, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Cache directory (overrides `cache_dir`).
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Also write the result as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub json: Option<PathBuf>,

    /// Delete the cache before auditing.
    #[arg(long)]
    pub refresh: bool,

    /// Keep running and re-audit when the configuration file changes.
    #[arg(long)]
    pub watch: bool,
}

impl Cli {
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            github_user: self.user.clone(),
            listing_count: self.limit,
            cache_dir: self.cache_dir.clone(),
        }
    }
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = cli.overrides();
    let config = load_config(&cli.config, &overrides)
        .with_context(|| format!("failed to load configuration {}", cli.config.display()))?;
    tracing::debug!(?config, "configuration loaded");

    let token = token::resolve_token(cli.token.as_deref()).await;
    if token.is_none() {
        tracing::warn!("no GitHub token found; unauthenticated rate limits apply");
    }
    let engine = build_engine(&config, token)?;
    if cli.refresh {
        engine.cache().clear().context("failed to clear cache")?;
        tracing::info!(dir = %config.cache_dir.display(), "cache cleared");
    }

    let style = TableStyle::new(&config.display, render::stdout_supports_color());
    if cli.watch {
        return watch(&cli, &overrides, config, engine, style).await;
    }

    let result = engine.audit(&config.to_request()).await?;
    emit(&result, style, cli.json.as_deref())
}

fn build_engine(config: &AuditConfig, token: Option<String>) -> anyhow::Result<Arc<AuditEngine>> {
    let client = GitHubClient::new(token)
        .context("failed to build GitHub client")?
        .with_branch(config.branch.clone());
    Ok(Arc::new(AuditEngine::new(
        Arc::new(client),
        Arc::new(CacheStore::new(&config.cache_dir)),
        config.engine_options(),
    )))
}

fn emit(result: &AuditResult, style: TableStyle, json: Option<&Path>) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    render::write_table(&mut stdout, result, style).context("failed to write table")?;
    if let Some(path) = json {
        render::write_json_file(path, result)?;
    }
    Ok(())
}

/// Re-audit on every configuration change until Ctrl-C.
///
/// Only the user, check items and listing count are reloaded; cache and
/// client settings keep their startup values.
async fn watch(
    cli: &Cli,
    overrides: &ConfigOverrides,
    config: AuditConfig,
    engine: Arc<AuditEngine>,
    style: TableStyle,
) -> anyhow::Result<()> {
    let (runner, mut outcomes) = AuditRunner::new(engine);
    let mut published = runner.subscribe();

    let (changes_tx, mut changes) = mpsc::unbounded_channel();
    let watcher = ConfigWatcher::start(
        &cli.config,
        DEFAULT_POLL_INTERVAL,
        Arc::new(move || {
            let _ = changes_tx.send(());
        }),
    );
    runner.trigger(config.to_request());
    tracing::info!(config = %cli.config.display(), "watching for configuration changes; Ctrl-C to exit");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let outcome = loop {
        tokio::select! {
            _ = &mut shutdown => break Ok(()),
            Some(()) = changes.recv() => {
                let loaded = read_config(&cli.config, overrides).map(|c| c.to_request());
                runner.trigger_from_config(loaded);
            }
            changed = published.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let latest = published.borrow_and_update().clone();
                if let Some(result) = latest
                    && let Err(err) = emit(&result, style, cli.json.as_deref())
                {
                    break Err(err);
                }
            }
            Some(outcome) = outcomes.recv() => {
                if let RunOutcome::Failed { error, .. } = outcome {
                    let mut stderr = std::io::stderr().lock();
                    let _ = writeln!(
                        stderr,
                        "audit failed: {}; keeping previous result",
                        describe_failure(&error, Utc::now())
                    );
                }
            }
        }
    };

    runner.cancel();
    watcher.stop().await;
    outcome
}

/// Error text plus when to try again, if the error says.
pub fn describe_failure(err: &AuditError, now: DateTime<Utc>) -> String {
    match err.suggested_backoff(now) {
        Some(wait) => format!("{err} (retry in {}s)", wait.as_secs()),
        None if err.is_retryable() => format!("{err} (retry later)"),
        None => err.to_string(),
    }
}
