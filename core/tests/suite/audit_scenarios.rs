use audit_test_support::engine_for;
use audit_test_support::mount_listing;
use audit_test_support::mount_present;
use audit_test_support::request;
use chrono::DateTime;
use pretty_assertions::assert_eq;
use repo_audit_core::AuditError;
use repo_audit_core::CellState;
use repo_audit_core::cache::LISTING_FILE;
use tempfile::TempDir;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::method;
use wiremock::matchers::path;

#[tokio::test]
async fn stale_repository_is_flagged_against_the_newest() {
    let server = MockServer::start().await;
    let cache = TempDir::new().unwrap();
    mount_listing(
        &server,
        "alice",
        &[
            ("r2", "2026-02-01T00:00:00Z"),
            ("r1", "2026-02-10T00:00:00Z"),
        ],
    )
    .await;
    mount_present(&server, "alice", "r1", "README.md").await;
    mount_present(&server, "alice", "r1", "LICENSE").await;
    mount_present(&server, "alice", "r2", "README.md").await;

    let result = engine_for(&server, cache.path())
        .audit(&request("alice", &["README.md", "LICENSE"]))
        .await
        .unwrap();

    assert_eq!(result.baseline().unwrap().name, "r1");
    let r2 = result.repository("r2").unwrap();
    assert_eq!(result.cell(r2, "LICENSE"), CellState::Drift);
    assert_eq!(result.cell(r2, "README.md"), CellState::Present);
    assert_eq!(r2.drift(), ["LICENSE".to_string()]);

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["user"], "alice");
    assert_eq!(json["total_repos"], 2);
    assert_eq!(json["baseline"]["name"], "r1");
    assert_eq!(json["repositories"][1]["results"]["LICENSE"], false);
    assert_eq!(json["repositories"][1]["drift"][0], "LICENSE");
}

#[tokio::test]
async fn empty_listing_produces_no_baseline() {
    let server = MockServer::start().await;
    let cache = TempDir::new().unwrap();
    mount_listing(&server, "alice", &[]).await;

    let result = engine_for(&server, cache.path())
        .audit(&request("alice", &["README.md"]))
        .await
        .unwrap();

    assert!(result.is_empty());
    assert!(result.baseline().is_none());
    assert_eq!(result.missing_counts(), vec![("README.md", 0)]);
}

#[tokio::test]
async fn rate_limited_listing_fails_and_writes_nothing() {
    let server = MockServer::start().await;
    let cache = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/users/alice/repos"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1770000000"),
        )
        .mount(&server)
        .await;

    let err = engine_for(&server, cache.path())
        .audit(&request("alice", &["README.md"]))
        .await
        .unwrap_err();

    let expected = DateTime::from_timestamp(1_770_000_000, 0);
    assert!(
        matches!(&err, AuditError::RateLimited { reset_at } if *reset_at == expected),
        "got {err:?}"
    );
    assert!(err.to_string().contains("2026-02-02T02:40:00+00:00"));
    assert!(!cache.path().join(LISTING_FILE).exists());
}

#[tokio::test]
async fn unknown_user_is_fatal() {
    let server = MockServer::start().await;
    let cache = TempDir::new().unwrap();

    let err = engine_for(&server, cache.path())
        .audit(&request("ghost", &["README.md"]))
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::NotFound { ref user } if user == "ghost"));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn bad_credential_is_fatal() {
    let server = MockServer::start().await;
    let cache = TempDir::new().unwrap();
    Mock::given(method("GET"))
        .and(path("/users/alice/repos"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = engine_for(&server, cache.path())
        .audit(&request("alice", &["README.md"]))
        .await
        .unwrap_err();

    assert!(matches!(err, AuditError::Auth));
}
