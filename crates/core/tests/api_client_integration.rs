//! Integration tests for the request lifecycle controller
//!
//! Purpose:
//!   Drive `ApiClient` end to end against scripted transports, refreshers and
//!   offline queues, and check what the caller and collaborators observe.
//!
//! Coverage:
//!   - Retry budget and offline hand-off for connection errors
//!   - Recovery mode suspension and the serial recovery queue
//!   - Token refresh coordination and its per-request limit
//!   - Recovery requests around a token refresh
//!   - Flushing pending and in-flight work on the normal queue
//!   - Encoding of bodies for GET and POST
//!   - Waiter timeouts and domain errors
//!   - Attachment uploads

mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chatwire_core::{ApiClient, ConnectionDetails, ProgressSink};
use chatwire_domain::{
    ClientConfig, ClientError, ClientResult, Endpoint, HttpMethod, Token, WaitSubject,
};
use serde_json::{json, Value};
use support::*;

fn endpoint(path: &str) -> Endpoint<Value> {
    Endpoint::get(path)
}

fn config_with(apply: impl FnOnce(&mut ClientConfig)) -> ClientConfig {
    let mut config = config();
    apply(&mut config);
    config
}

/// Client whose refresher takes long enough to observe the refresh in flight
fn slow_refresh_client(config: ClientConfig, transport: MockTransport) -> TestClient {
    let details = Arc::new(ConnectionDetails::new(true));
    details.set_token(Some(Token::new("old-token", "luke")));
    let refresher = Arc::new(
        MockRefresher::new(Arc::clone(&details), Token::new("new-token", "luke"))
            .with_delay(Duration::from_millis(200)),
    );
    test_client_with(config, transport, details, refresher)
}

// ============================================================================
// Retries and the offline queue
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_attempt_success_is_delivered() {
    let t = test_client(config(), MockTransport::always(ok_response()));
    let (done, rx) = completion();

    t.client.request(endpoint("/app").requiring_token(false), None, done);

    let value = outcome(rx).await.expect("request should succeed");
    assert_eq!(value, json!({ "ok": true }));
    assert_eq!(t.transport.calls(), 1);
    assert_eq!(t.offline.len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_errors_exhaust_budget_then_queue_offline() {
    let config = config_with(|c| c.max_retries = 3);
    let t = test_client(config, MockTransport::always(connection_lost()));
    let (done, rx) = completion();

    t.client.request(Endpoint::<Value>::post("/channels/messaging/general/message"), None, done);

    let result = outcome(rx).await;
    assert!(matches!(result, Err(ClientError::Connection(_))), "{result:?}");
    assert_eq!(t.transport.calls(), 4);

    let entries = t.offline.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0.url.path(), "/channels/messaging/general/message");
    assert!(entries[0].1.contains("Value"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_failure_recovers_within_budget() {
    let transport =
        MockTransport::scripted(vec![connection_lost(), connection_lost()], ok_response());
    let t = test_client(config(), transport);
    let (done, rx) = completion();

    t.client.request(endpoint("/channels"), None, done);

    assert!(outcome(rx).await.is_ok());
    assert_eq!(t.transport.calls(), 3);
    assert_eq!(t.offline.len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_domain_error_is_delivered_without_retry() {
    let t = test_client(config(), MockTransport::always(not_found()));
    let (done, rx) = completion();

    t.client.request(endpoint("/channels/messaging/missing"), None, done);

    match outcome(rx).await {
        Err(ClientError::Server(payload)) => {
            assert_eq!(payload.code, 16);
            assert_eq!(payload.status_code, 404);
        }
        other => panic!("expected a server error, got {other:?}"),
    }
    assert_eq!(t.transport.calls(), 1);
    assert_eq!(t.offline.len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_missing_token_times_out_without_reaching_transport() {
    let config = config_with(|c| {
        c.waiter_timeout_ms = 50;
        c.max_retries = 1;
    });
    let details = Arc::new(ConnectionDetails::new(true));
    let refresher = Arc::new(MockRefresher::new(details.clone(), Token::new("t", "luke")));
    let t = test_client_with(config, MockTransport::always(ok_response()), details, refresher);
    let (done, rx) = completion();

    t.client.request(endpoint("/channels"), None, done);

    match outcome(rx).await {
        Err(ClientError::WaiterTimeout { subject, .. }) => {
            assert_eq!(subject, WaitSubject::Token);
        }
        other => panic!("expected a waiter timeout, got {other:?}"),
    }
    assert_eq!(t.transport.calls(), 0);
}

// ============================================================================
// Encoding
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_body_becomes_query_and_post_body_is_sent() {
    let t = test_client(config(), MockTransport::always(ok_response()));

    let get = Endpoint::<Value>::get("/channels")
        .with_body(&json!({ "limit": 10, "filter": "messaging" }))
        .unwrap();
    let post = Endpoint::<Value>::post("/channels/messaging/general/query")
        .with_body(&json!({ "state": true }))
        .unwrap();

    t.client.send(get).await.unwrap();
    t.client.send(post).await.unwrap();

    let requests = t.transport.requests();
    assert_eq!(requests.len(), 2);

    let get = &requests[0];
    assert_eq!(get.method, HttpMethod::Get);
    assert!(get.body.is_none());
    assert_eq!(get.query_value("limit").as_deref(), Some("10"));
    assert_eq!(get.query_value("filter").as_deref(), Some("messaging"));
    assert_eq!(get.query_value("api_key").as_deref(), Some("test-key"));
    assert_eq!(get.header("Authorization"), Some("old-token"));

    let post = &requests[1];
    assert_eq!(post.method, HttpMethod::Post);
    let body: Value = serde_json::from_slice(post.body.as_deref().unwrap()).unwrap();
    assert_eq!(body, json!({ "state": true }));
    assert_eq!(post.query_value("state"), None);
}

// ============================================================================
// Recovery mode
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recovery_mode_holds_normal_requests_until_exit() {
    let t = test_client(config(), MockTransport::always(ok_response()));
    t.client.enter_recovery_mode();
    t.client.enter_recovery_mode();

    let receivers: Vec<_> = (0..5)
        .map(|i| {
            let (done, rx) = completion();
            t.client.request(endpoint(&format!("/channels/{i}")), None, done);
            rx
        })
        .collect();

    settle().await;
    assert_eq!(t.transport.calls(), 0);
    assert!(t.client.mode().recovery);

    t.client.exit_recovery_mode();
    for rx in receivers {
        assert!(outcome(rx).await.is_ok());
    }
    assert_eq!(t.transport.calls(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recovery_requests_run_serially_in_order() {
    let transport = MockTransport::always(ok_response()).with_delay(Duration::from_millis(20));
    let t = test_client(config(), transport);
    t.client.enter_recovery_mode();

    let receivers: Vec<_> = (0..5)
        .map(|i| {
            let (done, rx) = completion();
            t.client.recovery_request(endpoint(&format!("/sync/{i}")), done);
            rx
        })
        .collect();

    for rx in receivers {
        assert!(outcome(rx).await.is_ok());
    }
    assert_eq!(t.transport.calls(), 5);
    assert_eq!(t.transport.max_in_flight(), 1);
    let expected: Vec<String> = (0..5).map(|i| format!("/sync/{i}")).collect();
    assert_eq!(t.transport.paths(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recovery_request_outside_recovery_mode_still_runs() {
    let t = test_client(config(), MockTransport::always(ok_response()));
    let (done, rx) = completion();

    t.client.recovery_request(endpoint("/sync"), done);

    assert!(outcome(rx).await.is_ok());
    assert_eq!(t.transport.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recovery_request_exhausting_budget_is_not_queued_offline() {
    let config = config_with(|c| c.max_retries = 2);
    let t = test_client(config, MockTransport::always(connection_lost()));
    t.client.enter_recovery_mode();
    let (done, rx) = completion();

    t.client.recovery_request(endpoint("/sync"), done);

    let result = outcome(rx).await;
    assert!(matches!(result, Err(ClientError::Connection(_))), "{result:?}");
    assert_eq!(t.transport.calls(), 3);
    assert_eq!(t.offline.len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_connection_error_during_recovery_requeues_normal_request() {
    let transport = MockTransport::scripted(vec![connection_lost()], ok_response())
        .with_delay(Duration::from_millis(100));
    let t = test_client(config(), transport);
    let (done, mut rx) = completion();

    t.client.request(endpoint("/channels"), None, done);
    tokio::time::sleep(Duration::from_millis(30)).await;
    t.client.enter_recovery_mode();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(t.transport.calls(), 1);
    assert!(rx.try_recv().is_err(), "request should wait for recovery to end");

    t.client.exit_recovery_mode();
    assert!(outcome(rx).await.is_ok());
    assert_eq!(t.transport.calls(), 2);
    assert_eq!(t.offline.len(), 0);
}

// ============================================================================
// Token refresh
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_expired_token_refreshes_once_and_retries() {
    let config = config_with(|c| c.normal_queue_concurrency = 1);
    let transport = MockTransport::new(|request, _| {
        let stale = request.header("Authorization") == Some("old-token");
        if stale && request.url.path() == "/target" {
            expired_token()
        } else {
            ok_response()
        }
    });
    let t = test_client(config, transport);

    let (done, target) = completion();
    t.client.request(endpoint("/target"), None, done);
    let others: Vec<_> = (0..5)
        .map(|i| {
            let (done, rx) = completion();
            t.client.request(endpoint(&format!("/other/{i}")), None, done);
            rx
        })
        .collect();

    assert!(outcome(target).await.is_ok());
    for rx in others {
        assert!(outcome(rx).await.is_ok());
    }

    assert_eq!(t.transport.calls_to("/target"), 2);
    assert_eq!(t.refresher.calls(), 1);
    assert_eq!(t.details.token().map(|token| token.raw), Some("new-token".to_string()));
    assert!(!t.client.mode().refreshing_token);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refresh_limit_is_enforced_per_request() {
    let config = config_with(|c| c.max_token_refresh_attempts = 2);
    let t = test_client(config, MockTransport::always(expired_token()));
    let (done, rx) = completion();

    t.client.request(endpoint("/channels"), None, done);

    let result = outcome(rx).await;
    assert!(matches!(result, Err(ClientError::TokenRefreshLimitExceeded(2))), "{result:?}");
    assert_eq!(t.refresher.calls(), 2);
    assert_eq!(t.transport.calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_refresh_is_delivered_and_clears_flag() {
    let details = Arc::new(ConnectionDetails::new(true));
    details.set_token(Some(Token::new("old-token", "luke")));
    let refresher = Arc::new(MockRefresher::failing(details.clone()));
    let t =
        test_client_with(config(), MockTransport::always(expired_token()), details, refresher);
    let (done, rx) = completion();

    t.client.request(endpoint("/channels"), None, done);

    let result = outcome(rx).await;
    assert!(matches!(result, Err(ClientError::TokenRefreshFailed(_))), "{result:?}");
    assert!(!t.client.mode().refreshing_token);
    assert_eq!(t.transport.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_joining_a_refresh_in_flight_does_not_spend_refresh_limit() {
    let config = config_with(|c| c.max_token_refresh_attempts = 1);
    let second_seen = AtomicUsize::new(0);
    let transport = MockTransport::new(move |request, _| {
        if request.header("Authorization") == Some("old-token") {
            return expired_token();
        }
        let first_fresh = request.url.path() == "/second"
            && second_seen.fetch_add(1, Ordering::SeqCst) == 0;
        if first_fresh {
            expired_token()
        } else {
            ok_response()
        }
    })
    .with_delay(Duration::from_millis(50));
    let t = slow_refresh_client(config, transport);

    let (done, first) = completion::<Value>();
    t.client.request(endpoint("/first"), None, done);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let (done, second) = completion::<Value>();
    t.client.request(endpoint("/second"), None, done);

    // `/second` joined the refresh started by `/first`, so it may still start its own
    assert!(outcome(first).await.is_ok());
    let result = outcome(second).await;
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(t.refresher.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recovery_order_is_kept_while_first_request_refreshes() {
    let sync_zero_seen = AtomicUsize::new(0);
    let transport = MockTransport::new(move |request, _| {
        let expired = request.url.path() == "/sync/0"
            && sync_zero_seen.fetch_add(1, Ordering::SeqCst) < 2;
        if expired {
            expired_token()
        } else {
            ok_response()
        }
    })
    .with_delay(Duration::from_millis(10));
    let t = test_client(config(), transport);
    t.client.enter_recovery_mode();

    let receivers: Vec<_> = (0..5)
        .map(|i| {
            let (done, rx) = completion::<Value>();
            t.client.recovery_request(endpoint(&format!("/sync/{i}")), done);
            rx
        })
        .collect();

    for rx in receivers {
        assert!(outcome(rx).await.is_ok());
    }
    let mut expected = vec!["/sync/0".to_string(); 3];
    expected.extend((1..5).map(|i| format!("/sync/{i}")));
    assert_eq!(t.transport.paths(), expected);
    assert_eq!(t.transport.max_in_flight(), 1);
    assert_eq!(t.refresher.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recovery_request_waits_for_refresh_started_by_normal_request() {
    let transport = MockTransport::new(|request, _| {
        if request.header("Authorization") == Some("old-token") {
            expired_token()
        } else {
            ok_response()
        }
    });
    let t = slow_refresh_client(config(), transport);

    let (done, normal) = completion::<Value>();
    t.client.request(endpoint("/channels"), None, done);
    wait_until(|| t.client.mode().refreshing_token).await;

    t.client.enter_recovery_mode();
    let (done, recovery) = completion::<Value>();
    t.client.recovery_request(endpoint("/sync"), done);

    let result = outcome(recovery).await;
    assert!(result.is_ok(), "{result:?}");
    let sync_requests: Vec<_> =
        t.transport.requests().into_iter().filter(|r| r.url.path() == "/sync").collect();
    assert_eq!(sync_requests.len(), 1);
    assert_eq!(sync_requests[0].header("Authorization"), Some("new-token"));

    t.client.exit_recovery_mode();
    assert!(outcome(normal).await.is_ok());
    assert_eq!(t.refresher.calls(), 1);
}

// ============================================================================
// Flushing
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_drops_pending_requests_without_completing_them() {
    let t = test_client(config(), MockTransport::always(ok_response()));
    let fired = Arc::new(AtomicUsize::new(0));
    t.client.enter_token_fetch_mode();

    for i in 0..5 {
        let fired = fired.clone();
        t.client.request(endpoint(&format!("/channels/{i}")), None, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    t.client.flush_requests_queue();
    t.client.exit_token_fetch_mode();

    settle().await;
    assert_eq!(t.transport.calls(), 0);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_aborts_in_flight_requests_without_completing_them() {
    let transport = MockTransport::always(ok_response()).with_delay(Duration::from_millis(300));
    let t = test_client(config(), transport);
    let fired = Arc::new(AtomicUsize::new(0));

    for i in 0..3 {
        let fired = fired.clone();
        t.client.request(endpoint(&format!("/channels/{i}")), None, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }
    wait_until(|| t.transport.calls() == 3).await;
    t.client.flush_requests_queue();

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(t.transport.calls(), 3);

    // The queue keeps serving requests submitted after the flush
    let (done, rx) = completion::<Value>();
    t.client.request(endpoint("/channels/after"), None, done);
    assert!(outcome(rx).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_flush_during_refresh_clears_flag_without_completing() {
    let t = slow_refresh_client(config(), MockTransport::always(expired_token()));
    let fired = Arc::new(AtomicUsize::new(0));

    let counter = fired.clone();
    t.client.request(endpoint("/channels"), None, move |_: ClientResult<Value>| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    wait_until(|| t.client.mode().refreshing_token).await;
    t.client.flush_requests_queue();

    wait_until(|| !t.client.mode().refreshing_token).await;
    settle().await;
    let mode = t.client.mode();
    assert!(!mode.refreshing_token);
    assert!(!mode.recovery);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(t.refresher.calls(), 1);
    assert_eq!(t.transport.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_send_reports_cancelled_after_flush() {
    let t = test_client(config(), MockTransport::always(ok_response()));
    t.client.enter_token_fetch_mode();

    let client = t.client.clone();
    let pending = tokio::spawn(async move { client.send(endpoint("/channels")).await });
    settle().await;
    t.client.flush_requests_queue();

    let result = tokio::time::timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(result, Err(ClientError::Cancelled));
    assert_eq!(t.transport.calls(), 0);
}

// ============================================================================
// Uploads
// ============================================================================

fn upload_client(cdn: Arc<MockCdn>) -> ApiClient {
    let details = Arc::new(ConnectionDetails::new(true));
    details.set_token(Some(Token::new("old-token", "luke")));
    let refresher = Arc::new(MockRefresher::new(details.clone(), Token::new("t", "luke")));
    ApiClient::builder(config())
        .transport(Arc::new(MockTransport::always(ok_response())))
        .connection_details(details)
        .token_refresher(refresher)
        .cdn(cdn)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upload_retries_connection_errors_and_reports_progress() {
    let lost = || Err(ClientError::Connection(chatwire_domain::TransportError::not_connected()));
    let cdn = Arc::new(MockCdn::scripted(vec![lost(), lost(), Ok(uploaded_file())]));
    let client = upload_client(cdn.clone());

    let progress_seen = Arc::new(Mutex::new(Vec::new()));
    let sink: ProgressSink = {
        let progress_seen = progress_seen.clone();
        Arc::new(move |fraction: f64| progress_seen.lock().unwrap().push(fraction))
    };
    let (done, rx) = completion();

    client.upload_attachment(attachment(), Some(sink), done);

    let file = outcome(rx).await.expect("upload should succeed");
    assert_eq!(file.remote_url.as_str(), "https://cdn.example.com/images/cat.png");
    assert_eq!(cdn.calls(), 3);
    assert_eq!(progress_seen.lock().unwrap().last().copied(), Some(1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upload_domain_error_is_not_retried() {
    let rejected = Err(ClientError::Upload("file too large".into()));
    let cdn = Arc::new(MockCdn::scripted(vec![rejected, Ok(uploaded_file())]));
    let client = upload_client(cdn.clone());
    let (done, rx) = completion();

    client.upload_attachment(attachment(), None, done);

    assert!(matches!(outcome(rx).await, Err(ClientError::Upload(_))));
    assert_eq!(cdn.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_upload_without_cdn_fails_immediately() {
    let t = test_client(config(), MockTransport::always(ok_response()));
    let (done, rx) = completion();

    t.client.upload_attachment(attachment(), None, done);

    assert!(matches!(outcome(rx).await, Err(ClientError::Upload(_))));
}
