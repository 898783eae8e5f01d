//! GitHub credential lookup.
//!
//! Order: `--token`, then `GITHUB_TOKEN`, then `gh auth token`. A missing
//! credential is not an error; the audit runs anonymously with GitHub's
//! lower rate limit.

use std::future::Future;
use std::time::Duration;

use tokio::process::Command;

pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

/// Upper bound on waiting for `gh auth token`.
pub const GH_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the credential from the real environment.
pub async fn resolve_token(flag: Option<&str>) -> Option<String> {
    resolve_token_with(flag, |name| std::env::var(name).ok(), || {
        command_output(gh_command(), GH_TIMEOUT)
    })
    .await
}

/// Resolution with injectable sources. `gh` only runs when nothing earlier
/// produced a token.
pub async fn resolve_token_with<E, G, F>(flag: Option<&str>, env: E, gh: G) -> Option<String>
where
    E: Fn(&str) -> Option<String>,
    G: FnOnce() -> F,
    F: Future<Output = Option<String>>,
{
    if let Some(token) = non_blank(flag.map(str::to_string)) {
        tracing::debug!("using token from --token");
        return Some(token);
    }
    if let Some(token) = non_blank(env(TOKEN_ENV_VAR)) {
        tracing::debug!(var = TOKEN_ENV_VAR, "using token from environment");
        return Some(token);
    }
    let token = non_blank(gh().await);
    if token.is_some() {
        tracing::debug!("using token from gh auth token");
    }
    token
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn gh_command() -> Command {
    let mut command = Command::new("gh");
    command.args(["auth", "token"]);
    command
}

/// Stdout of `command`, or None when it fails, is missing, or outlives `limit`.
/// A timed-out child is killed.
async fn command_output(mut command: Command, limit: Duration) -> Option<String> {
    command.kill_on_drop(true);
    match tokio::time::timeout(limit, command.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            tracing::debug!(status = %output.status, "credential helper failed");
            None
        }
        Ok(Err(err)) => {
            tracing::debug!(error = %err, "credential helper not available");
            None
        }
        Err(_) => {
            tracing::warn!(timeout_secs = limit.as_secs(), "credential helper timed out");
            None
        }
    }
}
