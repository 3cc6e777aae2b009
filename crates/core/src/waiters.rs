//! Waiter registry for values that arrive asynchronously
//!
//! The realtime connection produces the auth token and the connection id at
//! arbitrary times. Requests that need either register a waiter and get called
//! back once the value is known, or with [`WaiterError::TimedOut`] if nothing
//! arrives in time.
//!
//! Registrations persist after an immediate delivery, so a later producer
//! notifies them again. Callbacks must tolerate being called more than once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatwire_domain::{ClientError, ClientResult, ConnectionId, Token, WaitSubject};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::ports::ConnectionDetailsProvider;

/// Identifier of one registration
pub type WaiterId = u64;

/// Callback invoked with the awaited value or a failure
pub type WaiterCallback<T> = Box<dyn FnMut(Result<T, WaiterError>) + Send>;

/// Why a waiter did not receive a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaiterError {
    /// Nothing was published within the timeout
    #[error("no value published within {0:?}")]
    TimedOut(Duration),
    /// The producer declared the value unavailable
    #[error("value unavailable")]
    Unavailable,
}

struct Registration<T> {
    callback: WaiterCallback<T>,
    satisfied: bool,
}

struct RegistryState<T> {
    value: Option<T>,
    waiters: HashMap<WaiterId, Registration<T>>,
    next_id: WaiterId,
}

/// Registry of callbacks waiting for a single value
pub struct WaiterRegistry<T> {
    name: &'static str,
    state: Arc<Mutex<RegistryState<T>>>,
}

impl<T> WaiterRegistry<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(RegistryState {
                value: None,
                waiters: HashMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Currently known value
    pub fn current(&self) -> Option<T> {
        self.state.lock().value.clone()
    }

    /// Number of registrations still attached
    pub fn pending_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Register `callback` and arm its timeout.
    ///
    /// Must be called from within a tokio runtime for the timeout to fire.
    pub fn register(&self, timeout: Duration, mut callback: WaiterCallback<T>) -> WaiterId {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        let satisfied = if let Some(value) = state.value.clone() {
            drop(state);
            callback(Ok(value));
            state = self.state.lock();
            true
        } else {
            false
        };

        state.waiters.insert(id, Registration { callback, satisfied });
        drop(state);

        self.arm_timeout(id, timeout);
        id
    }

    /// Wait up to `timeout` for a value
    ///
    /// # Errors
    /// Returns the [`WaiterError`] the registration was failed with.
    pub async fn wait(&self, timeout: Duration) -> Result<T, WaiterError> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        self.register(
            timeout,
            Box::new(move |outcome| {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(outcome);
                }
            }),
        );
        rx.await.unwrap_or(Err(WaiterError::Unavailable))
    }

    /// Publish a new value, or declare it unavailable with `None`.
    ///
    /// Every registration is notified and removed.
    pub fn publish(&self, value: Option<T>) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.value = value.clone();
            state.waiters.drain().map(|(_, registration)| registration).collect()
        };

        debug!(
            registry = self.name,
            waiters = drained.len(),
            available = value.is_some(),
            "publishing value"
        );

        for mut registration in drained {
            match &value {
                Some(value) => (registration.callback)(Ok(value.clone())),
                None => (registration.callback)(Err(WaiterError::Unavailable)),
            }
        }
    }

    /// Store a value without notifying anyone
    pub fn update_silently(&self, value: Option<T>) {
        self.state.lock().value = value;
    }

    fn arm_timeout(&self, id: WaiterId, timeout: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(registry = self.name, "no tokio runtime; waiter timeout not armed");
            return;
        };

        let state = Arc::clone(&self.state);
        let name = self.name;
        handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = state.lock().waiters.remove(&id);
            if let Some(mut registration) = expired {
                if !registration.satisfied {
                    debug!(registry = name, ?timeout, "waiter timed out");
                    (registration.callback)(Err(WaiterError::TimedOut(timeout)));
                }
            }
        });
    }
}

/// Connection lifecycle as reported by the realtime component
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    WaitingForConnectionId,
    Connected(ConnectionId),
    Disconnecting,
    WaitingForReconnect,
    Disconnected { token_expired: bool },
}

/// Token and connection id sources backed by waiter registries
pub struct ConnectionDetails {
    token: WaiterRegistry<Token>,
    connection_id: WaiterRegistry<ConnectionId>,
    active_mode: AtomicBool,
}

impl ConnectionDetails {
    /// `active_mode` is false for clients that never open a realtime
    /// connection; such clients never get a connection id.
    pub fn new(active_mode: bool) -> Self {
        Self {
            token: WaiterRegistry::new("token"),
            connection_id: WaiterRegistry::new("connection_id"),
            active_mode: AtomicBool::new(active_mode),
        }
    }

    pub fn set_active_mode(&self, active: bool) {
        self.active_mode.store(active, Ordering::SeqCst);
    }

    pub fn is_active_mode(&self) -> bool {
        self.active_mode.load(Ordering::SeqCst)
    }

    /// Publish a token, or fail pending token waiters with `None`
    pub fn set_token(&self, token: Option<Token>) {
        self.token.publish(token);
    }

    pub fn token(&self) -> Option<Token> {
        self.token.current()
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id.current()
    }

    pub fn connection_state_changed(&self, state: ConnectionState) {
        debug!(?state, "connection state changed");
        match state {
            ConnectionState::Connected(id) => self.connection_id.publish(Some(id)),
            ConnectionState::Disconnected { token_expired: false } => {
                self.connection_id.publish(None);
            }
            // A reconnect with a fresh token or a transient state follows;
            // waiters keep waiting.
            ConnectionState::Disconnected { token_expired: true }
            | ConnectionState::Connecting
            | ConnectionState::WaitingForConnectionId
            | ConnectionState::Disconnecting
            | ConnectionState::WaitingForReconnect => self.connection_id.update_silently(None),
        }
    }
}

#[async_trait]
impl ConnectionDetailsProvider for ConnectionDetails {
    async fn provide_token(&self, timeout: Duration) -> ClientResult<Token> {
        self.token.wait(timeout).await.map_err(|err| match err {
            WaiterError::TimedOut(timeout) => {
                ClientError::WaiterTimeout { subject: WaitSubject::Token, timeout }
            }
            WaiterError::Unavailable => ClientError::MissingToken("no token available".into()),
        })
    }

    async fn provide_connection_id(&self, timeout: Duration) -> ClientResult<ConnectionId> {
        if !self.is_active_mode() {
            return Err(ClientError::MissingConnectionId(
                "client is in passive mode and has no realtime connection".into(),
            ));
        }

        self.connection_id.wait(timeout).await.map_err(|err| match err {
            WaiterError::TimedOut(timeout) => {
                ClientError::WaiterTimeout { subject: WaitSubject::ConnectionId, timeout }
            }
            WaiterError::Unavailable => {
                ClientError::MissingConnectionId("connection closed".into())
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::time::Instant;

    use super::*;

    fn counting_callback(
        hits: &Arc<AtomicUsize>,
        outcomes: &Arc<Mutex<Vec<Result<String, WaiterError>>>>,
    ) -> WaiterCallback<String> {
        let hits = Arc::clone(hits);
        let outcomes = Arc::clone(outcomes);
        Box::new(move |outcome| {
            hits.fetch_add(1, Ordering::SeqCst);
            outcomes.lock().push(outcome);
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_no_earlier_than_timeout() {
        let registry = WaiterRegistry::<String>::new("token");
        let timeout = Duration::from_secs(10);

        let started = Instant::now();
        let outcome = registry.wait(timeout).await;
        let elapsed = started.elapsed();

        assert_eq!(outcome, Err(WaiterError::TimedOut(timeout)));
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(50));
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_notifies_pending_waiters() {
        let registry = WaiterRegistry::<String>::new("token");
        let hits = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        registry.register(Duration::from_secs(10), counting_callback(&hits, &outcomes));
        registry.register(Duration::from_secs(10), counting_callback(&hits, &outcomes));
        registry.publish(Some("abc".into()));

        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(registry.pending_count(), 0);

        // Drained registrations never time out.
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_value_is_delivered_and_registration_persists() {
        let registry = WaiterRegistry::<String>::new("connection_id");
        registry.update_silently(Some("first".into()));
        let hits = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        registry.register(Duration::from_secs(10), counting_callback(&hits, &outcomes));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 1);

        registry.publish(Some("second".into()));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(
            *outcomes.lock(),
            vec![Ok("first".to_string()), Ok("second".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_satisfied_registration_is_dropped_silently_at_timeout() {
        let registry = WaiterRegistry::<String>::new("token");
        registry.update_silently(Some("abc".into()));
        let hits = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        registry.register(Duration::from_secs(1), counting_callback(&hits, &outcomes));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_none_fails_waiters() {
        let registry = WaiterRegistry::<String>::new("token");
        let hits = Arc::new(AtomicUsize::new(0));
        let outcomes = Arc::new(Mutex::new(Vec::new()));

        registry.register(Duration::from_secs(10), counting_callback(&hits, &outcomes));
        registry.publish(None);

        assert_eq!(*outcomes.lock(), vec![Err(WaiterError::Unavailable)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_passive_mode_has_no_connection_id() {
        let details = ConnectionDetails::new(false);
        let outcome = details.provide_connection_id(Duration::from_secs(10)).await;
        assert!(matches!(outcome, Err(ClientError::MissingConnectionId(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_state_drives_connection_id() {
        let details = Arc::new(ConnectionDetails::new(true));

        let waiter = {
            let details = Arc::clone(&details);
            tokio::spawn(
                async move { details.provide_connection_id(Duration::from_secs(10)).await },
            )
        };
        while details.connection_id.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        details.connection_state_changed(ConnectionState::Connected("conn-1".into()));
        assert_eq!(waiter.await.unwrap(), Ok("conn-1".to_string()));

        details.connection_state_changed(ConnectionState::WaitingForReconnect);
        assert_eq!(details.connection_id(), None);

        let waiter = {
            let details = Arc::clone(&details);
            tokio::spawn(
                async move { details.provide_connection_id(Duration::from_secs(10)).await },
            )
        };
        while details.connection_id.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        details.connection_state_changed(ConnectionState::Disconnected { token_expired: false });
        assert!(matches!(waiter.await.unwrap(), Err(ClientError::MissingConnectionId(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_timeout_maps_to_waiter_timeout() {
        let details = ConnectionDetails::new(true);
        let outcome = details.provide_token(Duration::from_secs(3)).await;
        assert_eq!(
            outcome.unwrap_err(),
            ClientError::WaiterTimeout {
                subject: WaitSubject::Token,
                timeout: Duration::from_secs(3),
            }
        );
    }
}
