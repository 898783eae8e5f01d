#![allow(clippy::expect_used)]

//! Fixtures shared by the integration suite: a wiremock stand-in for the
//! GitHub REST API and helpers to point the core at it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use repo_audit_core::AuditEngine;
use repo_audit_core::AuditOptions;
use repo_audit_core::AuditRequest;
use repo_audit_core::CacheStore;
use repo_audit_core::GitHubClient;
use repo_audit_core::RepoHost;
use serde_json::Value;
use serde_json::json;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

/// Token every fixture client sends.
pub const TEST_TOKEN: &str = "test-token";

/// One entry of the `/users/{user}/repos` payload.
pub fn repo_json(name: &str, pushed_at: &str) -> Value {
    json!({
        "name": name,
        "full_name": format!("octocat/{name}"),
        "private": false,
        "pushed_at": pushed_at,
        "updated_at": pushed_at,
    })
}

/// Serve `repos` (name, pushed_at) as the listing for `user`.
pub async fn mount_listing(server: &MockServer, user: &str, repos: &[(&str, &str)]) {
    let body: Vec<Value> = repos
        .iter()
        .map(|(name, pushed_at)| repo_json(name, pushed_at))
        .collect();
    Mock::given(method("GET"))
        .and(path(format!("/users/{user}/repos")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Answer 200 for `item` in `user/repo`. Anything unmounted is a 404.
pub async fn mount_present(server: &MockServer, user: &str, repo: &str, item: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/repos/{user}/{repo}/contents/{item}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "type": "file",
            "name": item.rsplit('/').next().unwrap_or(item),
            "path": item,
        })))
        .mount(server)
        .await;
}

pub fn client_for(server: &MockServer) -> GitHubClient {
    GitHubClient::with_base_url(&server.uri(), Some(TEST_TOKEN.to_string()))
        .expect("mock server uri is a valid base")
}

/// Engine against the mock server with pacing disabled.
pub fn engine_for(server: &MockServer, cache_dir: &Path) -> AuditEngine {
    engine_with_host(Arc::new(client_for(server)), cache_dir)
}

pub fn engine_with_host(host: Arc<dyn RepoHost>, cache_dir: &Path) -> AuditEngine {
    AuditEngine::new(
        host,
        Arc::new(CacheStore::new(cache_dir)),
        AuditOptions {
            probe_delay: Duration::ZERO,
            probe_retries: 0,
            ..AuditOptions::default()
        },
    )
}

pub fn request(user: &str, items: &[&str]) -> AuditRequest {
    AuditRequest {
        user: user.to_string(),
        check_items: items.iter().map(ToString::to_string).collect(),
        listing_count: 20,
    }
}

/// Paths of every request the server has seen, in arrival order.
pub async fn received_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .expect("request recording is enabled")
        .iter()
        .map(|req| req.url.path().to_string())
        .collect()
}

/// Number of content probes the server has seen for `repo`.
pub async fn probe_count(server: &MockServer, user: &str, repo: &str) -> usize {
    let prefix = format!("/repos/{user}/{repo}/contents/");
    received_paths(server)
        .await
        .iter()
        .filter(|p| p.starts_with(&prefix))
        .count()
}
