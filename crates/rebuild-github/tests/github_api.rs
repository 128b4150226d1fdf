//! Integration tests for the GitHub adapter against a mock API server.

use std::sync::Arc;
use std::time::Duration;

use rebuild_core::{
    BranchLister, BranchName, BranchSource, DispatchJob, DispatchSettings, DispatchState,
    Dispatcher, FetchError, RepoRef, RepoTarget, RetryPolicy,
};
use rebuild_github::{
    DiscoverySettings, GitHubBranchSource, GitHubClient, GitHubConfig, GitHubWorkflowTrigger,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> GitHubClient {
    GitHubClient::new(GitHubConfig::new(&server.uri()).with_token("test-token")).expect("client")
}

fn impatient_client(server: &MockServer, timeout: Duration) -> GitHubClient {
    GitHubClient::new(GitHubConfig::new(&server.uri()).with_timeout(timeout)).expect("client")
}

fn branch_page(names: impl IntoIterator<Item = String>) -> serde_json::Value {
    json!(names
        .into_iter()
        .map(|n| json!({"name": n, "commit": {"sha": "0000"}, "protected": false}))
        .collect::<Vec<_>>())
}

fn job(repo: &str, branch: &str) -> DispatchJob {
    DispatchJob::new(
        RepoTarget::new(RepoRef::new("mlrun", repo), "build.yaml")
            .with_input("build_from_cache", "false"),
        BranchName::new(branch).unwrap(),
    )
}

fn quick_trigger(server: &MockServer) -> GitHubWorkflowTrigger {
    GitHubWorkflowTrigger::new(client(server)).with_discovery(DiscoverySettings {
        attempts: 3,
        interval: Duration::from_millis(10),
    })
}

/// Test: listing follows pagination until a short page
#[tokio::test]
async fn test_branch_listing_follows_pages() {
    let server = MockServer::start().await;

    let first: Vec<String> = (0..100).map(|i| format!("feature/{i}")).collect();
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/branches"))
        .and(query_param("page", "1"))
        .and(query_param("per_page", "100"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(branch_page(first)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/branches"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(branch_page(["1.6.x".to_string(), "1.7.x".to_string()])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let source = GitHubBranchSource::new(client(&server));
    let names = source
        .fetch_branch_names(&RepoRef::new("mlrun", "mlrun"))
        .await
        .expect("list");
    assert_eq!(names.len(), 102);
    assert_eq!(names[100], "1.6.x");
    assert_eq!(names[101], "1.7.x");
}

/// Test: non-2xx responses surface as status errors
#[tokio::test]
async fn test_branch_listing_status_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/branches"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Not Found"))
        .mount(&server)
        .await;

    let source = GitHubBranchSource::new(client(&server));
    let err = source
        .fetch_branch_names(&RepoRef::new("mlrun", "mlrun"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        FetchError::Status {
            status: 404,
            body: "Not Found".to_string()
        }
    );
}

/// Test: the lister retries a transient 502 against the real adapter
#[tokio::test]
async fn test_branch_listing_retries_through_lister() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/branches"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/branches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(branch_page(["1.7.x".to_string()])))
        .mount(&server)
        .await;

    let lister = BranchLister::new(
        Arc::new(GitHubBranchSource::new(client(&server))),
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(5),
        },
    );
    let names = lister
        .list(&RepoRef::new("mlrun", "mlrun"))
        .await
        .expect("third attempt succeeds");
    assert_eq!(names, vec!["1.7.x"]);
}

/// Test: dispatch, discover the new run, poll it to success
#[tokio::test]
async fn test_dispatch_and_poll_to_success() {
    let server = MockServer::start().await;
    let runs_path = "/repos/mlrun/mlrun/actions/workflows/build.yaml/runs";

    // Before dispatch: run 41 is the newest.
    Mock::given(method("GET"))
        .and(path(runs_path))
        .and(query_param("event", "workflow_dispatch"))
        .and(query_param("branch", "1.6.x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "workflow_runs": [{"id": 41, "status": "completed", "conclusion": "success"}]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // After dispatch: run 42 shows up.
    Mock::given(method("GET"))
        .and(path(runs_path))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 2,
            "workflow_runs": [
                {"id": 42, "status": "queued", "html_url": "https://github.com/mlrun/mlrun/actions/runs/42"},
                {"id": 41, "status": "completed", "conclusion": "success"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/mlrun/mlrun/actions/workflows/build.yaml/dispatches"))
        .and(body_partial_json(json!({
            "ref": "1.6.x",
            "inputs": {"build_from_cache": "false"}
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/actions/runs/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": 42, "status": "completed", "conclusion": "success"
        })))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(
        Arc::new(quick_trigger(&server)),
        DispatchSettings {
            poll_interval: Duration::from_millis(10),
            trigger_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(10),
        },
    );
    let outcome = dispatcher
        .run_job(job("mlrun", "1.6.x"), CancellationToken::new())
        .await;

    assert_eq!(outcome.state, DispatchState::Succeeded, "{:?}", outcome.detail);
    let run = outcome.run.expect("run recorded");
    assert_eq!(run.id, 42);
    assert_eq!(
        run.url.as_deref(),
        Some("https://github.com/mlrun/mlrun/actions/runs/42")
    );
}

/// Test: a rejected dispatch fails the cell without polling
#[tokio::test]
async fn test_rejected_dispatch_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/ui/actions/workflows/build.yaml/runs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "workflow_runs": []})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/mlrun/ui/actions/workflows/build.yaml/dispatches"))
        .respond_with(
            ResponseTemplate::new(422).set_body_string(r#"{"message":"No ref found for: 9.9.x"}"#),
        )
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(
        Arc::new(quick_trigger(&server)),
        DispatchSettings {
            poll_interval: Duration::from_millis(10),
            trigger_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(10),
        },
    );
    let outcome = dispatcher
        .run_job(job("ui", "9.9.x"), CancellationToken::new())
        .await;

    assert_eq!(outcome.state, DispatchState::Failed);
    assert!(outcome.run.is_none());
    assert!(outcome.detail.unwrap().contains("422"));
}

/// Test: a dispatch whose run never appears is reported as failed
#[tokio::test]
async fn test_dispatched_run_never_visible() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/ui/actions/workflows/build.yaml/runs"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "workflow_runs": [{"id": 7, "status": "completed", "conclusion": "success"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/mlrun/ui/actions/workflows/build.yaml/dispatches"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(
        Arc::new(quick_trigger(&server)),
        DispatchSettings {
            poll_interval: Duration::from_millis(10),
            trigger_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(10),
        },
    );
    let outcome = dispatcher
        .run_job(job("ui", "development"), CancellationToken::new())
        .await;

    assert_eq!(outcome.state, DispatchState::Failed);
    assert!(outcome.detail.unwrap().contains("could not be located"));
}

/// Test: a stalled listing request times out and the lister retries it
#[tokio::test]
async fn test_stalled_listing_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/branches"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(branch_page(["1.0.x".to_string()]))
                .set_delay(Duration::from_secs(600)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/branches"))
        .respond_with(ResponseTemplate::new(200).set_body_json(branch_page(["1.7.x".to_string()])))
        .mount(&server)
        .await;

    let lister = BranchLister::new(
        Arc::new(GitHubBranchSource::new(impatient_client(
            &server,
            Duration::from_millis(200),
        ))),
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(5),
        },
    );
    let names = tokio::time::timeout(
        Duration::from_secs(5),
        lister.list(&RepoRef::new("mlrun", "mlrun")),
    )
    .await
    .expect("listing finishes despite the stalled request")
    .expect("second attempt succeeds");
    assert_eq!(names, vec!["1.7.x"]);
}

/// Test: a stalled request surfaces as a transport error
#[tokio::test]
async fn test_stalled_request_is_transport_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/mlrun/branches"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(600)))
        .mount(&server)
        .await;

    let source = GitHubBranchSource::new(impatient_client(&server, Duration::from_millis(100)));
    let err = source
        .fetch_branch_names(&RepoRef::new("mlrun", "mlrun"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Transport(_)), "{err:?}");
}

/// Test: a dispatch call that never answers ends the cell as timed out
#[tokio::test]
async fn test_stalled_dispatch_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/mlrun/ui/actions/workflows/build.yaml/runs"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"total_count": 0, "workflow_runs": []})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/mlrun/ui/actions/workflows/build.yaml/dispatches"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(600)))
        .mount(&server)
        .await;

    let dispatcher = Dispatcher::new(
        Arc::new(quick_trigger(&server)),
        DispatchSettings {
            poll_interval: Duration::from_millis(10),
            trigger_timeout: Duration::from_millis(300),
            wait_timeout: Duration::from_secs(1),
        },
    );
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        dispatcher.run_job(job("ui", "1.7.x"), CancellationToken::new()),
    )
    .await
    .expect("cell reaches a terminal state");

    assert_eq!(outcome.state, DispatchState::TimedOut);
    assert!(outcome.run.is_none());
}

/// Test: two cells dispatching the same ref each track their own run
#[tokio::test]
async fn test_same_ref_cells_get_distinct_runs() {
    let server = MockServer::start().await;
    let runs_path = "/repos/mlrun/ui/actions/workflows/build.yaml/runs";

    // Latest run recorded before dispatch.
    Mock::given(method("GET"))
        .and(path(runs_path))
        .and(query_param("per_page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 1,
            "workflow_runs": [{"id": 41, "status": "completed", "conclusion": "success"}]
        })))
        .mount(&server)
        .await;
    // Both dispatched runs are visible during discovery.
    Mock::given(method("GET"))
        .and(path(runs_path))
        .and(query_param("per_page", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "total_count": 3,
            "workflow_runs": [
                {"id": 43, "status": "queued"},
                {"id": 42, "status": "queued"},
                {"id": 41, "status": "completed", "conclusion": "success"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/repos/mlrun/ui/actions/workflows/build.yaml/dispatches"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;
    for id in [42, 43] {
        Mock::given(method("GET"))
            .and(path(format!("/repos/mlrun/ui/actions/runs/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": id, "status": "completed", "conclusion": "success"
            })))
            .mount(&server)
            .await;
    }

    let dispatcher = Dispatcher::new(
        Arc::new(quick_trigger(&server)),
        DispatchSettings {
            poll_interval: Duration::from_millis(10),
            trigger_timeout: Duration::from_secs(10),
            wait_timeout: Duration::from_secs(10),
        },
    );
    let (first, second) = tokio::join!(
        dispatcher.run_job(job("ui", "1.5.x"), CancellationToken::new()),
        dispatcher.run_job(job("ui", "1.5.x"), CancellationToken::new()),
    );

    assert_eq!(first.state, DispatchState::Succeeded);
    assert_eq!(second.state, DispatchState::Succeeded);
    let mut ids = vec![first.run.unwrap().id, second.run.unwrap().id];
    ids.sort_unstable();
    assert_eq!(ids, vec![42, 43]);
}
