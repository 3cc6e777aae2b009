//! Shared mocks for `ApiClient` integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatwire_core::{
    ApiClient, CdnClient, ConnectionDetails, OfflineRequestQueue, ProgressSink, TokenRefresher,
    Transport,
};
use chatwire_domain::{
    AttachmentKind, AttachmentUpload, ClientConfig, ClientError, ClientResult, Token,
    TransportError, TransportErrorKind, TransportResponse, UploadedFile, WireRequest,
};
use serde_json::json;
use tokio::sync::oneshot;
use url::Url;

pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Responses
// ============================================================================

pub fn ok_response() -> TransportResponse {
    TransportResponse::http(200, json!({ "ok": true }).to_string())
}

pub fn connection_lost() -> TransportResponse {
    TransportResponse::failed(TransportError::new(
        TransportErrorKind::NetworkConnectionLost,
        "The network connection was lost",
    ))
}

pub fn expired_token() -> TransportResponse {
    TransportResponse::http(
        401,
        json!({ "code": 40, "message": "token expired", "StatusCode": 401 }).to_string(),
    )
}

pub fn not_found() -> TransportResponse {
    TransportResponse::http(
        404,
        json!({ "code": 16, "message": "channel not found", "StatusCode": 404 }).to_string(),
    )
}

// ============================================================================
// Transport
// ============================================================================

type Responder = Box<dyn Fn(&WireRequest, usize) -> TransportResponse + Send + Sync>;

/// Transport that records every request and answers through a responder
pub struct MockTransport {
    responder: Responder,
    delay: Duration,
    requests: Mutex<Vec<WireRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockTransport {
    /// `responder` receives the request and its zero-based call index
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&WireRequest, usize) -> TransportResponse + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn always(response: TransportResponse) -> Self {
        Self::new(move |_, _| response.clone())
    }

    /// Answer with `script` in order, then `fallback` forever
    pub fn scripted(script: Vec<TransportResponse>, fallback: TransportResponse) -> Self {
        let script = Mutex::new(VecDeque::from(script));
        Self::new(move |_, _| {
            script.lock().unwrap().pop_front().unwrap_or_else(|| fallback.clone())
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.url.path() == path).count()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|r| r.url.path().to_string()).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: WireRequest) -> TransportResponse {
        let index = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() - 1
        };
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let response = (self.responder)(&request, index);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        response
    }
}

// ============================================================================
// Token refresher
// ============================================================================

/// Refresher that publishes `token` after `delay`, or fails
pub struct MockRefresher {
    details: Arc<ConnectionDetails>,
    token: Token,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl MockRefresher {
    pub fn new(details: Arc<ConnectionDetails>, token: Token) -> Self {
        Self {
            details,
            token,
            delay: Duration::from_millis(20),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(details: Arc<ConnectionDetails>) -> Self {
        Self { fail: true, ..Self::new(details, Token::new("unused", "luke")) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for MockRefresher {
    async fn refresh_token(&self) -> ClientResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(ClientError::Unexpected("token provider unreachable".into()));
        }
        self.details.set_token(Some(self.token.clone()));
        Ok(())
    }
}

// ============================================================================
// Offline queue
// ============================================================================

#[derive(Default)]
pub struct RecordingOfflineQueue {
    requests: Mutex<Vec<(WireRequest, &'static str)>>,
}

impl RecordingOfflineQueue {
    pub fn len(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn entries(&self) -> Vec<(WireRequest, &'static str)> {
        self.requests.lock().unwrap().clone()
    }
}

impl OfflineRequestQueue for RecordingOfflineQueue {
    fn queue_offline_request(&self, request: WireRequest, response_type: &'static str) {
        self.requests.lock().unwrap().push((request, response_type));
    }
}

// ============================================================================
// CDN
// ============================================================================

/// CDN client answering from a script and reporting fixed progress steps
pub struct MockCdn {
    script: Mutex<VecDeque<ClientResult<UploadedFile>>>,
    calls: AtomicUsize,
}

impl MockCdn {
    pub fn scripted(script: Vec<ClientResult<UploadedFile>>) -> Self {
        Self { script: Mutex::new(VecDeque::from(script)), calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CdnClient for MockCdn {
    async fn upload_attachment(
        &self,
        _attachment: &AttachmentUpload,
        progress: ProgressSink,
    ) -> ClientResult<UploadedFile> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        progress(0.5);
        progress(1.0);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClientError::Upload("script exhausted".into())))
    }
}

pub fn uploaded_file() -> UploadedFile {
    UploadedFile {
        remote_url: Url::parse("https://cdn.example.com/images/cat.png").unwrap(),
        thumbnail_url: None,
    }
}

pub fn attachment() -> AttachmentUpload {
    AttachmentUpload {
        channel_type: "messaging".into(),
        channel_id: "general".into(),
        kind: AttachmentKind::Image,
        file_name: "cat.png".into(),
        mime_type: "image/png".into(),
        data: vec![0u8; 256],
    }
}

// ============================================================================
// Client assembly
// ============================================================================

pub fn config() -> ClientConfig {
    ClientConfig::new(Url::parse("https://chat.example.com").unwrap(), "test-key")
}

pub struct TestClient {
    pub client: ApiClient,
    pub transport: Arc<MockTransport>,
    pub details: Arc<ConnectionDetails>,
    pub refresher: Arc<MockRefresher>,
    pub offline: Arc<RecordingOfflineQueue>,
}

/// Client with a published JWT token and a connected realtime connection
pub fn test_client(config: ClientConfig, transport: MockTransport) -> TestClient {
    let details = Arc::new(ConnectionDetails::new(true));
    details.set_token(Some(Token::new("old-token", "luke")));
    let refresher =
        Arc::new(MockRefresher::new(Arc::clone(&details), Token::new("new-token", "luke")));
    test_client_with(config, transport, details, refresher)
}

pub fn test_client_with(
    config: ClientConfig,
    transport: MockTransport,
    details: Arc<ConnectionDetails>,
    refresher: Arc<MockRefresher>,
) -> TestClient {
    let transport = Arc::new(transport);
    let offline = Arc::new(RecordingOfflineQueue::default());
    let client = ApiClient::builder(config)
        .transport(transport.clone())
        .connection_details(details.clone())
        .token_refresher(refresher.clone())
        .offline_queue(offline.clone())
        .build()
        .expect("client should build");

    TestClient { client, transport, details, refresher, offline }
}

/// Completion that forwards its result to a receiver
pub fn completion<T: Send + 'static>(
) -> (impl FnOnce(ClientResult<T>) + Send + 'static, oneshot::Receiver<ClientResult<T>>) {
    let (tx, rx) = oneshot::channel();
    (
        move |result| {
            let _ = tx.send(result);
        },
        rx,
    )
}

/// Wait for a completion, failing the test if it never fires
pub async fn outcome<T>(rx: oneshot::Receiver<ClientResult<T>>) -> ClientResult<T> {
    tokio::time::timeout(WAIT, rx)
        .await
        .expect("completion should fire in time")
        .expect("completion should not be dropped")
}

/// Poll `condition` until it holds, failing the test after [`WAIT`]
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold in time");
}

pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}
