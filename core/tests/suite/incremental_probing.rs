use std::sync::Arc;

use audit_test_support::client_for;
use audit_test_support::engine_for;
use audit_test_support::mount_listing;
use audit_test_support::mount_present;
use audit_test_support::probe_count;
use audit_test_support::received_paths;
use audit_test_support::request;
use chrono::TimeZone;
use chrono::Utc;
use pretty_assertions::assert_eq;
use repo_audit_core::AuditEngine;
use repo_audit_core::AuditOptions;
use repo_audit_core::CacheStore;
use repo_audit_core::ManualClock;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::MockServer;

async fn two_repo_server() -> MockServer {
    let server = MockServer::start().await;
    mount_listing(
        &server,
        "alice",
        &[
            ("r1", "2026-02-10T00:00:00Z"),
            ("r2", "2026-02-01T00:00:00Z"),
        ],
    )
    .await;
    mount_present(&server, "alice", "r1", "README.md").await;
    mount_present(&server, "alice", "r1", "AGENTS.md").await;
    mount_present(&server, "alice", "r2", "README.md").await;
    server
}

async fn listing_calls(server: &MockServer) -> usize {
    received_paths(server)
        .await
        .iter()
        .filter(|p| p.as_str() == "/users/alice/repos")
        .count()
}

#[tokio::test]
async fn superset_audit_only_probes_the_difference() {
    let server = two_repo_server().await;
    let cache = TempDir::new().unwrap();
    let engine = engine_for(&server, cache.path());

    engine
        .audit(&request("alice", &["README.md", "LICENSE"]))
        .await
        .unwrap();
    assert_eq!(probe_count(&server, "alice", "r1").await, 2);
    assert_eq!(probe_count(&server, "alice", "r2").await, 2);

    let result = engine
        .audit(&request("alice", &["README.md", "LICENSE", "AGENTS.md"]))
        .await
        .unwrap();

    assert_eq!(probe_count(&server, "alice", "r1").await, 3);
    assert_eq!(probe_count(&server, "alice", "r2").await, 3);
    let probed: Vec<String> = received_paths(&server)
        .await
        .into_iter()
        .filter(|p| p.contains("/contents/"))
        .skip(4)
        .collect();
    assert!(probed.iter().all(|p| p.ends_with("/AGENTS.md")), "{probed:?}");

    let r2 = result.repository("r2").unwrap();
    assert_eq!(r2.drift(), ["AGENTS.md".to_string()]);
}

#[tokio::test]
async fn fully_cached_audit_makes_no_requests() {
    let server = two_repo_server().await;
    let cache = TempDir::new().unwrap();
    let engine = engine_for(&server, cache.path());
    let items = ["README.md", "LICENSE"];

    let first = engine.audit(&request("alice", &items)).await.unwrap();
    let seen = received_paths(&server).await.len();

    let second = engine.audit(&request("alice", &items)).await.unwrap();

    assert_eq!(received_paths(&server).await.len(), seen);
    assert_eq!(first.repositories(), second.repositories());
}

#[tokio::test]
async fn cache_survives_a_new_engine() {
    let server = two_repo_server().await;
    let cache = TempDir::new().unwrap();

    engine_for(&server, cache.path())
        .audit(&request("alice", &["README.md"]))
        .await
        .unwrap();
    let seen = received_paths(&server).await.len();

    engine_for(&server, cache.path())
        .audit(&request("alice", &["README.md"]))
        .await
        .unwrap();

    assert_eq!(received_paths(&server).await.len(), seen);
}

#[tokio::test]
async fn listing_is_refetched_once_the_ttl_elapses() {
    let server = two_repo_server().await;
    let cache = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 2, 11, 9, 0, 0).unwrap(),
    ));
    let engine = AuditEngine::new(
        Arc::new(client_for(&server)),
        Arc::new(CacheStore::with_clock(cache.path(), clock.clone())),
        AuditOptions {
            probe_delay: Duration::ZERO,
            ..AuditOptions::default()
        },
    )
    .with_clock(clock.clone());
    let req = request("alice", &["README.md"]);

    engine.audit(&req).await.unwrap();
    assert_eq!(listing_calls(&server).await, 1);

    clock.advance(chrono::Duration::minutes(59));
    engine.audit(&req).await.unwrap();
    assert_eq!(listing_calls(&server).await, 1);

    clock.advance(chrono::Duration::minutes(1));
    let result = engine.audit(&req).await.unwrap();
    assert_eq!(listing_calls(&server).await, 2);
    assert_eq!(
        result.generated_at(),
        Utc.with_ymd_and_hms(2026, 2, 11, 10, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn clearing_the_cache_forces_a_full_audit() {
    let server = two_repo_server().await;
    let cache = TempDir::new().unwrap();
    let engine = engine_for(&server, cache.path());
    let req = request("alice", &["README.md"]);

    engine.audit(&req).await.unwrap();
    engine.cache().clear().unwrap();
    engine.audit(&req).await.unwrap();

    assert_eq!(listing_calls(&server).await, 2);
    assert_eq!(probe_count(&server, "alice", "r1").await, 2);
}

#[tokio::test]
async fn corrupt_cache_files_are_cold_misses() {
    let server = two_repo_server().await;
    let cache = TempDir::new().unwrap();
    let engine = engine_for(&server, cache.path());
    let req = request("alice", &["README.md"]);
    engine.audit(&req).await.unwrap();

    std::fs::write(cache.path().join("repositories.json"), b"{truncated").unwrap();
    std::fs::write(cache.path().join("repos").join("r1.json"), b"[]").unwrap();
    let result = engine.audit(&req).await.unwrap();

    assert_eq!(listing_calls(&server).await, 2);
    assert_eq!(probe_count(&server, "alice", "r1").await, 2);
    assert_eq!(probe_count(&server, "alice", "r2").await, 1);
    assert_eq!(result.repository("r1").unwrap().get("README.md"), Some(true));
}
