//! Port interfaces consumed by the request orchestration layer

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatwire_domain::{
    AttachmentUpload, ClientResult, ConnectionId, Token, TransportResponse, UploadedFile,
    WireRequest,
};
use tracing::warn;

/// Progress callback for uploads, called with a fraction in `0.0..=1.0`
pub type ProgressSink = Arc<dyn Fn(f64) + Send + Sync>;

/// Sends fully formed requests over the network
///
/// Implementations must support concurrent in-flight requests. Dropping the
/// returned future cancels the request.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a request and hand back whatever the network produced
    async fn execute(&self, request: WireRequest) -> TransportResponse;
}

/// Obtains a fresh token after the server reported the current one expired
///
/// A successful refresh is expected to publish the new token to the
/// connection details provider before returning.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refresh the token
    async fn refresh_token(&self) -> ClientResult<()>;
}

/// External sink for requests that exhausted their retries while offline
pub trait OfflineRequestQueue: Send + Sync {
    /// Hand over a request together with its expected response type tag
    fn queue_offline_request(&self, request: WireRequest, response_type: &'static str);
}

/// Performs the byte transfer for attachment uploads
#[async_trait]
pub trait CdnClient: Send + Sync {
    /// Upload an attachment, reporting progress zero or more times
    async fn upload_attachment(
        &self,
        attachment: &AttachmentUpload,
        progress: ProgressSink,
    ) -> ClientResult<UploadedFile>;
}

/// Source of the auth token and realtime connection id
#[async_trait]
pub trait ConnectionDetailsProvider: Send + Sync {
    /// Wait up to `timeout` for a token
    async fn provide_token(&self, timeout: Duration) -> ClientResult<Token>;

    /// Wait up to `timeout` for a connection id
    async fn provide_connection_id(&self, timeout: Duration) -> ClientResult<ConnectionId>;
}

/// Offline queue that logs and discards what it is handed
///
/// Used when the embedding SDK has no persistence layer.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingOfflineQueue;

impl OfflineRequestQueue for LoggingOfflineQueue {
    fn queue_offline_request(&self, request: WireRequest, response_type: &'static str) {
        warn!(
            method = %request.method,
            url = %request.url,
            response_type,
            "dropping request that failed while offline; no offline queue configured"
        );
    }
}
