//! Request lifecycle decisions
//!
//! Pure functions mapping the outcome of an attempt to the controller's next
//! move. [`ApiClient`](super::ApiClient) performs the side effects; everything
//! that decides between retrying, requeueing and delivering lives here.

use std::fmt;

use chatwire_domain::ErrorKind;
use tracing::debug;
use uuid::Uuid;

/// Where a logical request is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Running,
    AwaitingToken,
    AwaitingConnectionId,
    Retrying,
    Requeued,
    Done,
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::AwaitingToken => "awaiting_token",
            Self::AwaitingConnectionId => "awaiting_connection_id",
            Self::Retrying => "retrying",
            Self::Requeued => "requeued",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Queue a request was submitted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueClass {
    Normal,
    Recovery,
}

/// Facts the decision depends on besides the outcome itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecisionContext {
    pub can_retry: bool,
    pub in_recovery_mode: bool,
    pub queue_class: QueueClass,
}

/// Next move of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Hand the result to the caller; the operation is done
    Deliver,
    /// Start (or join) a token refresh
    RefreshToken,
    /// Same operation again, spending one retry
    RetryInPlace,
    /// Same operation again with a fresh retry budget
    ResetAndRetry,
    /// Submit a new operation for the same request and finish this one
    Requeue,
    /// Stay in the current slot until the token refresh ends, then run again
    AwaitRefresh,
    /// Hand the wire request to the offline queue, then deliver
    QueueOfflineAndDeliver,
}

impl Action {
    /// Phase the request enters when this action is taken
    pub fn phase(self) -> RequestPhase {
        match self {
            Self::Deliver | Self::QueueOfflineAndDeliver => RequestPhase::Done,
            Self::RefreshToken | Self::AwaitRefresh => RequestPhase::AwaitingToken,
            Self::RetryInPlace | Self::ResetAndRetry => RequestPhase::Retrying,
            Self::Requeue => RequestPhase::Requeued,
        }
    }
}

/// Decide what happens before an attempt starts.
///
/// `None` means run the attempt. A refresh in flight moves normal requests to
/// the back of their (suspended) queue; recovery requests wait in place so
/// the serial recovery order is kept.
pub fn on_attempt_start(refreshing_token: bool, queue_class: QueueClass) -> Option<Action> {
    if !refreshing_token {
        return None;
    }
    Some(match queue_class {
        QueueClass::Normal => Action::Requeue,
        QueueClass::Recovery => Action::AwaitRefresh,
    })
}

/// Decide what happens after an attempt; `None` is a success.
pub fn next_action(outcome: Option<ErrorKind>, context: DecisionContext) -> Action {
    let Some(kind) = outcome else {
        return Action::Deliver;
    };

    match kind {
        ErrorKind::ExpiredToken => Action::RefreshToken,
        ErrorKind::RefreshingTokenInProgress => match context.queue_class {
            QueueClass::Normal => Action::Requeue,
            QueueClass::Recovery => Action::AwaitRefresh,
        },
        ErrorKind::TokenRefreshed => Action::ResetAndRetry,
        ErrorKind::WaiterTimeout if context.can_retry => Action::RetryInPlace,
        ErrorKind::ConnectionError => connection_error_action(context),
        ErrorKind::WaiterTimeout
        | ErrorKind::DomainError
        | ErrorKind::ResponseBodyEmpty
        | ErrorKind::AuthMissing
        | ErrorKind::Unexpected => Action::Deliver,
    }
}

fn connection_error_action(context: DecisionContext) -> Action {
    let DecisionContext { can_retry, in_recovery_mode, queue_class } = context;
    if in_recovery_mode && queue_class == QueueClass::Normal && can_retry {
        Action::Requeue
    } else if can_retry {
        Action::RetryInPlace
    } else if in_recovery_mode {
        Action::Deliver
    } else {
        Action::QueueOfflineAndDeliver
    }
}

/// Uploads reuse the connection-error predicate only.
pub fn next_upload_action(outcome: Option<ErrorKind>, can_retry: bool) -> Action {
    match outcome {
        Some(ErrorKind::ConnectionError) if can_retry => Action::RetryInPlace,
        _ => Action::Deliver,
    }
}

/// Tracks and logs the phase of one logical request
#[derive(Debug)]
pub struct PhaseTracker {
    request_id: Uuid,
    phase: RequestPhase,
}

impl PhaseTracker {
    pub fn new(request_id: Uuid) -> Self {
        Self { request_id, phase: RequestPhase::Running }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    pub fn transition(&mut self, next: RequestPhase) {
        if self.phase != next {
            debug!(request_id = %self.request_id, from = %self.phase, to = %next, "request phase");
            self.phase = next;
        }
    }
}
