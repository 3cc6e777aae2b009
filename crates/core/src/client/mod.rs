//! Request lifecycle controller
//!
//! [`ApiClient`] owns a concurrent normal queue and a serial recovery queue.
//! Every request becomes a [`RetryableOperation`] whose work encodes, sends
//! and decodes, then asks [`lifecycle::next_action`] what to do with the
//! outcome: deliver it, retry in place, refresh the token, requeue, or hand
//! the request to the offline queue.
//!
//! Completions are called at most once per logical request, and exactly once
//! unless the request is dropped by [`ApiClient::flush_requests_queue`].

pub mod lifecycle;
mod mode;
pub mod upload;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chatwire_domain::{ClientConfig, ClientError, ClientResult, Endpoint, ErrorKind, WireRequest};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use self::lifecycle::{Action, DecisionContext, PhaseTracker, QueueClass, RequestPhase};
pub use self::mode::ModeFlags;
use self::mode::ModeState;
use crate::decoder::ResponseDecoder;
use crate::encoder::RequestEncoder;
use crate::ports::{
    CdnClient, ConnectionDetailsProvider, LoggingOfflineQueue, OfflineRequestQueue,
    TokenRefresher, Transport,
};
use crate::scheduling::{Done, OperationContext, OperationQueue, RetryableOperation};

/// Callback receiving the outcome of a request
pub type Completion<T> = Box<dyn FnOnce(ClientResult<T>) + Send>;

/// Holds a completion until it is called once
struct CompletionSlot<T>(Mutex<Option<Completion<T>>>);

impl<T> CompletionSlot<T> {
    fn new(completion: Completion<T>) -> Self {
        Self(Mutex::new(Some(completion)))
    }

    fn deliver(&self, result: ClientResult<T>) {
        let completion = self.0.lock().take();
        if let Some(completion) = completion {
            completion(result);
        }
    }
}

/// One call to `request`/`recovery_request`, shared by every operation
/// created for it
struct LogicalRequest<T> {
    id: Uuid,
    endpoint: Endpoint<T>,
    timeout: Duration,
    queue_class: QueueClass,
    completion: CompletionSlot<T>,
    refresh_attempts: AtomicU32,
}

enum RefreshOutcome {
    Refreshed,
    InProgress,
    Failed(ClientError),
}

struct ClientInner {
    config: ClientConfig,
    encoder: RequestEncoder,
    decoder: ResponseDecoder,
    transport: Arc<dyn Transport>,
    refresher: Arc<dyn TokenRefresher>,
    offline_queue: Arc<dyn OfflineRequestQueue>,
    cdn: Option<Arc<dyn CdnClient>>,
    normal: OperationQueue,
    recovery: OperationQueue,
    mode: Arc<ModeState>,
    runtime: Handle,
}

/// Entry point for every API call made by the SDK
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    pub fn builder(config: ClientConfig) -> ApiClientBuilder {
        ApiClientBuilder::new(config)
    }

    /// Send `endpoint` through the normal queue.
    ///
    /// `timeout` bounds each wait for the token or connection id and defaults
    /// to the configured waiter timeout.
    pub fn request<T, F>(&self, endpoint: Endpoint<T>, timeout: Option<Duration>, completion: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(ClientResult<T>) + Send + 'static,
    {
        self.submit(endpoint, timeout, QueueClass::Normal, Box::new(completion));
    }

    /// Send `endpoint` through the serial recovery queue.
    ///
    /// Only valid while in recovery mode. Outside it the misuse is logged and
    /// the request still runs.
    pub fn recovery_request<T, F>(&self, endpoint: Endpoint<T>, completion: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: FnOnce(ClientResult<T>) + Send + 'static,
    {
        if !self.inner.mode.snapshot().recovery {
            error!(path = %endpoint.path, "recovery request issued outside recovery mode");
        }
        self.submit(endpoint, None, QueueClass::Recovery, Box::new(completion));
    }

    /// Async wrapper around [`Self::request`].
    ///
    /// # Errors
    /// The error delivered to the completion, or `ClientError::Cancelled` if
    /// the request was flushed before completing.
    #[instrument(skip_all, fields(path = %endpoint.path, method = %endpoint.method))]
    pub async fn send<T>(&self, endpoint: Endpoint<T>) -> ClientResult<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.request(endpoint, None, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap_or(Err(ClientError::Cancelled))
    }

    pub fn enter_recovery_mode(&self) {
        self.inner.mode.enter_recovery(&self.inner.normal);
    }

    pub fn exit_recovery_mode(&self) {
        self.inner.mode.exit_recovery(&self.inner.normal);
    }

    /// Suspend the normal queue while the realtime connection fetches a token
    pub fn enter_token_fetch_mode(&self) {
        self.inner.mode.try_begin_refresh(&self.inner.normal);
    }

    pub fn exit_token_fetch_mode(&self) {
        self.inner.mode.end_refresh(&self.inner.normal);
    }

    /// Drop every pending and running normal-queue request.
    ///
    /// Their completions are never called. Recovery requests are unaffected.
    pub fn flush_requests_queue(&self) {
        info!("flushing normal request queue");
        self.inner.normal.cancel_all_operations();
    }

    pub fn mode(&self) -> ModeFlags {
        self.inner.mode.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn encoder(&self) -> &RequestEncoder {
        &self.inner.encoder
    }

    fn submit<T>(
        &self,
        endpoint: Endpoint<T>,
        timeout: Option<Duration>,
        queue_class: QueueClass,
        completion: Completion<T>,
    ) where
        T: DeserializeOwned + Send + 'static,
    {
        let request = Arc::new(LogicalRequest {
            id: Uuid::new_v4(),
            timeout: timeout.unwrap_or_else(|| self.inner.config.waiter_timeout()),
            endpoint,
            queue_class,
            completion: CompletionSlot::new(completion),
            refresh_attempts: AtomicU32::new(0),
        });
        debug!(
            request_id = %request.id,
            path = %request.endpoint.path,
            queue = ?queue_class,
            "request submitted"
        );
        self.inner.enqueue(request);
    }
}

impl ClientInner {
    /// Wrap `request` in a fresh operation on its queue
    fn enqueue<T>(self: &Arc<Self>, request: Arc<LogicalRequest<T>>)
    where
        T: DeserializeOwned + Send + 'static,
    {
        let queue = match request.queue_class {
            QueueClass::Normal => &self.normal,
            QueueClass::Recovery => &self.recovery,
        };
        let client: Weak<ClientInner> = Arc::downgrade(self);
        let operation = RetryableOperation::new(self.config.max_retries, move |context| {
            let client = client.upgrade();
            let request = Arc::clone(&request);
            async move {
                match client {
                    Some(client) => client.attempt(request, context).await,
                    None => Done::Continue,
                }
            }
        });
        queue.add(operation);
    }

    async fn attempt<T>(
        self: Arc<Self>,
        request: Arc<LogicalRequest<T>>,
        context: OperationContext,
    ) -> Done
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut tracker = PhaseTracker::new(request.id);

        'attempt: loop {
            let refreshing = self.mode.snapshot().refreshing_token;
            if let Some(action) = lifecycle::on_attempt_start(refreshing, request.queue_class) {
                tracker.transition(action.phase());
                if action == Action::Requeue {
                    self.enqueue(request);
                    return Done::Continue;
                }
                self.wait_for_refresh().await;
                continue 'attempt;
            }

            tracker.transition(RequestPhase::Running);
            let (wire, result) = self.execute(&request, &mut tracker).await;
            let mut outcome = result.as_ref().err().map(ClientError::kind);

            loop {
                let decision = self.decision_context(&context, &request);
                let action = lifecycle::next_action(outcome, decision);
                tracker.transition(action.phase());
                debug!(
                    request_id = %request.id,
                    operation_id = %context.id(),
                    attempt = context.current_retry_count(),
                    ?outcome,
                    ?action,
                    "attempt finished"
                );

                match action {
                    Action::Deliver => {
                        request.completion.deliver(result);
                        return Done::Continue;
                    }
                    Action::QueueOfflineAndDeliver => {
                        if let Some(wire) = wire {
                            info!(request_id = %request.id, "queueing request offline");
                            self.offline_queue
                                .queue_offline_request(wire, request.endpoint.response_type());
                        }
                        request.completion.deliver(result);
                        return Done::Continue;
                    }
                    Action::RetryInPlace => return Done::Retry,
                    Action::ResetAndRetry => {
                        context.reset_retries();
                        return Done::Retry;
                    }
                    Action::Requeue => {
                        self.enqueue(request);
                        return Done::Continue;
                    }
                    Action::AwaitRefresh => {
                        self.wait_for_refresh().await;
                        continue 'attempt;
                    }
                    Action::RefreshToken => match self.refresh_token(&request).await {
                        RefreshOutcome::Refreshed => outcome = Some(ErrorKind::TokenRefreshed),
                        RefreshOutcome::InProgress => {
                            outcome = Some(ErrorKind::RefreshingTokenInProgress);
                        }
                        RefreshOutcome::Failed(err) => {
                            tracker.transition(RequestPhase::Done);
                            request.completion.deliver(Err(err));
                            return Done::Continue;
                        }
                    },
                }
            }
        }
    }

    /// Encode, send and decode one attempt.
    ///
    /// The wire request is returned alongside the result so it can be handed
    /// to the offline queue.
    async fn execute<T>(
        &self,
        request: &LogicalRequest<T>,
        tracker: &mut PhaseTracker,
    ) -> (Option<WireRequest>, ClientResult<T>)
    where
        T: DeserializeOwned,
    {
        let endpoint = &request.endpoint;
        let mut wire = match self.encoder.prepare(endpoint) {
            Ok(wire) => wire,
            Err(err) => return (None, Err(err)),
        };

        if endpoint.requires_token {
            tracker.transition(RequestPhase::AwaitingToken);
        }
        if let Err(err) = self.encoder.authorize(&mut wire, endpoint, request.timeout).await {
            return (None, Err(err));
        }

        if endpoint.requires_connection_id {
            tracker.transition(RequestPhase::AwaitingConnectionId);
        }
        if let Err(err) =
            self.encoder.attach_connection_id(&mut wire, endpoint, request.timeout).await
        {
            return (None, Err(err));
        }

        tracker.transition(RequestPhase::Running);
        debug!(
            request_id = %request.id,
            method = %wire.method,
            url = %wire.url,
            "sending request"
        );
        let response = self.transport.execute(wire.clone()).await;
        (Some(wire), self.decoder.decode(response))
    }

    fn decision_context<T>(
        &self,
        context: &OperationContext,
        request: &LogicalRequest<T>,
    ) -> DecisionContext {
        DecisionContext {
            can_retry: context.can_retry(),
            in_recovery_mode: self.mode.snapshot().recovery,
            queue_class: request.queue_class,
        }
    }

    /// Run the token refresher unless a refresh is already in flight.
    ///
    /// Only refreshes this request starts count against its limit; joining
    /// a refresh already in flight is free. The refresher runs in a detached
    /// task so a flush of the triggering operation cannot leave the
    /// refreshing flag set.
    async fn refresh_token<T>(&self, request: &LogicalRequest<T>) -> RefreshOutcome {
        let limit = self.config.max_token_refresh_attempts;
        if request.refresh_attempts.load(Ordering::SeqCst) >= limit {
            warn!(request_id = %request.id, limit, "token refresh limit reached");
            return RefreshOutcome::Failed(ClientError::TokenRefreshLimitExceeded(limit));
        }

        if !self.mode.try_begin_refresh(&self.normal) {
            debug!(request_id = %request.id, "token refresh already in flight");
            return RefreshOutcome::InProgress;
        }
        let attempts = request.refresh_attempts.fetch_add(1, Ordering::SeqCst) + 1;

        info!(request_id = %request.id, attempt = attempts, "refreshing expired token");
        let (tx, rx) = oneshot::channel();
        let refresher = Arc::clone(&self.refresher);
        let mode = Arc::clone(&self.mode);
        let normal = self.normal.clone();
        self.runtime.spawn(async move {
            let outcome = refresher.refresh_token().await;
            mode.end_refresh(&normal);
            let _ = tx.send(outcome);
        });

        match rx.await {
            Ok(Ok(())) => RefreshOutcome::Refreshed,
            Ok(Err(err @ ClientError::TokenRefreshFailed(_))) => RefreshOutcome::Failed(err),
            Ok(Err(err)) => {
                error!(request_id = %request.id, error = %err, "token refresh failed");
                RefreshOutcome::Failed(ClientError::TokenRefreshFailed(err.to_string()))
            }
            Err(_) => RefreshOutcome::Failed(ClientError::TokenRefreshFailed(
                "refresh task ended without a result".into(),
            )),
        }
    }

    async fn wait_for_refresh(&self) {
        let mut refreshing = self.mode.subscribe_refresh();
        // Sender lives in `self.mode`, so the channel cannot close here.
        let _ = refreshing.wait_for(|refreshing| !*refreshing).await;
    }
}

/// Builder for [`ApiClient`]
pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    connection_details: Option<Arc<dyn ConnectionDetailsProvider>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    offline_queue: Arc<dyn OfflineRequestQueue>,
    cdn: Option<Arc<dyn CdnClient>>,
    runtime: Option<Handle>,
}

impl ApiClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            transport: None,
            connection_details: None,
            refresher: None,
            offline_queue: Arc::new(LoggingOfflineQueue),
            cdn: None,
            runtime: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn connection_details(mut self, details: Arc<dyn ConnectionDetailsProvider>) -> Self {
        self.connection_details = Some(details);
        self
    }

    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn offline_queue(mut self, queue: Arc<dyn OfflineRequestQueue>) -> Self {
        self.offline_queue = queue;
        self
    }

    pub fn cdn(mut self, cdn: Arc<dyn CdnClient>) -> Self {
        self.cdn = Some(cdn);
        self
    }

    /// Runtime the queues spawn on; defaults to the current runtime.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Validate the configuration and assemble the client.
    ///
    /// # Errors
    /// Returns `ClientError::Config` if the configuration is invalid, a
    /// required collaborator is missing, or no tokio runtime is available.
    pub fn build(self) -> ClientResult<ApiClient> {
        self.config.validate()?;

        let transport = self.transport.ok_or_else(|| missing("transport"))?;
        let details = self.connection_details.ok_or_else(|| missing("connection details"))?;
        let refresher = self.refresher.ok_or_else(|| missing("token refresher"))?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current()
                .map_err(|e| ClientError::Config(format!("no tokio runtime available: {e}")))?,
        };

        let encoder =
            RequestEncoder::new(self.config.base_url.clone(), self.config.api_key.clone(), details)
                .with_blocking_timeout(self.config.blocking_encode_timeout());
        let normal =
            OperationQueue::new("normal", self.config.normal_queue_concurrency, runtime.clone());
        let recovery = OperationQueue::serial("recovery", runtime.clone());

        info!(
            base_url = %self.config.base_url,
            max_retries = self.config.max_retries,
            normal_concurrency = self.config.normal_queue_concurrency,
            "api client ready"
        );

        Ok(ApiClient {
            inner: Arc::new(ClientInner {
                config: self.config,
                encoder,
                decoder: ResponseDecoder::new(),
                transport,
                refresher,
                offline_queue: self.offline_queue,
                cdn: self.cdn,
                normal,
                recovery,
                mode: Arc::new(ModeState::new()),
                runtime,
            }),
        })
    }
}

fn missing(what: &str) -> ClientError {
    ClientError::Config(format!("{what} is required to build an ApiClient"))
}
