use audit_test_support::TEST_TOKEN;
use audit_test_support::client_for;
use audit_test_support::mount_listing;
use audit_test_support::mount_present;
use chrono::DateTime;
use pretty_assertions::assert_eq;
use repo_audit_core::ApiError;
use repo_audit_core::GitHubClient;
use repo_audit_core::RepoHost;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;

#[tokio::test]
async fn listing_sends_auth_and_returns_newest_first() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/octocat/repos"))
        .and(query_param("sort", "pushed"))
        .and(query_param("direction", "desc"))
        .and(query_param("per_page", "2"))
        .and(header("authorization", format!("Bearer {TEST_TOKEN}").as_str()))
        .and(header("accept", "application/vnd.github+json"))
        .and(header("x-github-api-version", "2022-11-28"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "name": "older", "pushed_at": "2026-01-01T00:00:00Z" },
            { "name": "newest", "pushed_at": "2026-02-10T00:00:00Z" },
            { "name": "middle", "pushed_at": "2026-02-01T00:00:00Z" },
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let repos = client_for(&server)
        .list_repositories("octocat", 2)
        .await
        .unwrap();

    let names: Vec<&str> = repos.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["newest", "middle"]);
}

#[tokio::test]
async fn listing_status_codes_map_to_errors() {
    let cases = [
        (401, ApiError::Unauthorized),
        (
            404,
            ApiError::UserNotFound {
                user: "octocat".into(),
            },
        ),
        (403, ApiError::RateLimited { reset_at: None }),
    ];
    for (status, expected) in cases {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/octocat/repos"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .list_repositories("octocat", 5)
            .await
            .unwrap_err();
        assert_eq!(err, expected, "status {status}");
    }
}

#[tokio::test]
async fn listing_server_error_and_bad_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/broken/repos"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/garbled/repos"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
        .mount(&server)
        .await;
    let client = client_for(&server);

    let err = client.list_repositories("broken", 5).await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Http {
            status: 502,
            message: "bad gateway".into()
        }
    );

    let err = client.list_repositories("garbled", 5).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)), "got {err:?}");
}

#[tokio::test]
async fn probe_treats_every_non_success_as_absent() {
    let server = MockServer::start().await;
    mount_present(&server, "octocat", "demo", "README.md").await;
    mount_present(&server, "octocat", "demo", ".github/workflows/ci.yml").await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/demo/contents/BROKEN"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/demo/contents/SECRET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let client = client_for(&server);

    assert!(client.probe_path("octocat", "demo", "README.md").await.unwrap());
    assert!(
        client
            .probe_path("octocat", "demo", ".github/workflows/ci.yml")
            .await
            .unwrap()
    );
    assert!(!client.probe_path("octocat", "demo", "LICENSE").await.unwrap());
    assert!(!client.probe_path("octocat", "demo", "BROKEN").await.unwrap());
    assert!(!client.probe_path("octocat", "demo", "SECRET").await.unwrap());
}

#[tokio::test]
async fn probe_surfaces_exhausted_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/demo/contents/LICENSE"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", "1770000000"),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .probe_path("octocat", "demo", "LICENSE")
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::RateLimited {
            reset_at: DateTime::from_timestamp(1_770_000_000, 0)
        }
    );
}

#[tokio::test]
async fn probe_uses_configured_branch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/octocat/demo/contents/AGENTS.md"))
        .and(query_param("ref", "develop"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_branch(Some("develop".into()));
    assert!(client.probe_path("octocat", "demo", "AGENTS.md").await.unwrap());
}

#[tokio::test]
async fn connection_failure_is_transport_not_absence() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = GitHubClient::with_base_url(&format!("http://{addr}"), None).unwrap();

    let err = client
        .probe_path("octocat", "demo", "README.md")
        .await
        .unwrap_err();
    assert!(err.is_transport(), "got {err:?}");

    let err = client.list_repositories("octocat", 5).await.unwrap_err();
    assert!(err.is_transport(), "got {err:?}");
}

#[tokio::test]
async fn anonymous_client_sends_no_authorization() {
    let server = MockServer::start().await;
    mount_listing(&server, "octocat", &[("solo", "2026-02-01T00:00:00Z")]).await;

    let client = GitHubClient::with_base_url(&server.uri(), None).unwrap();
    client.list_repositories("octocat", 5).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].headers.contains_key("authorization"));
}
