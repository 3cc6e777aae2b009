//! Retryable operation
//!
//! A unit of asynchronous work with a bounded, resettable retry budget. The
//! work reports [`Done::Continue`] when the operation is finished, or
//! [`Done::Retry`] to run again in place: same queue slot, no re-enqueue.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error};
use uuid::Uuid;

/// Verdict of one run of an operation's work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    /// The operation is complete; the queue may advance
    Continue,
    /// Run the work again in place, spending one retry
    Retry,
}

#[derive(Debug)]
struct RetryBudget {
    id: Uuid,
    max_retries: u32,
    current: AtomicU32,
}

/// Handle on an operation's identity and retry budget, passed to its work
#[derive(Debug, Clone)]
pub struct OperationContext {
    budget: Arc<RetryBudget>,
}

impl OperationContext {
    fn new(max_retries: u32) -> Self {
        Self {
            budget: Arc::new(RetryBudget {
                id: Uuid::new_v4(),
                max_retries,
                current: AtomicU32::new(0),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.budget.id
    }

    pub fn max_retries(&self) -> u32 {
        self.budget.max_retries
    }

    pub fn current_retry_count(&self) -> u32 {
        self.budget.current.load(Ordering::SeqCst)
    }

    pub fn can_retry(&self) -> bool {
        self.current_retry_count() < self.budget.max_retries
    }

    /// Give the same operation a fresh budget
    pub fn reset_retries(&self) {
        self.budget.current.store(0, Ordering::SeqCst);
    }

    /// Spend one retry; false once the budget is exhausted.
    fn try_consume_retry(&self) -> bool {
        let max = self.budget.max_retries;
        self.budget
            .current
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < max).then_some(current + 1)
            })
            .is_ok()
    }
}

type Work = Box<dyn Fn(OperationContext) -> BoxFuture<'static, Done> + Send + Sync>;

/// Deferred work with a bounded retry budget
///
/// Exists for exactly one enqueue.
pub struct RetryableOperation {
    context: OperationContext,
    work: Work,
}

impl RetryableOperation {
    pub fn new<F, Fut>(max_retries: u32, work: F) -> Self
    where
        F: Fn(OperationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Done> + Send + 'static,
    {
        Self {
            context: OperationContext::new(max_retries),
            work: Box::new(move |context| work(context).boxed()),
        }
    }

    pub fn context(&self) -> OperationContext {
        self.context.clone()
    }

    /// Run the work until it reports [`Done::Continue`].
    ///
    /// A retry requested with an exhausted budget is logged and ends the
    /// operation.
    pub async fn run(self) {
        let context = self.context;
        loop {
            match (self.work)(context.clone()).await {
                Done::Continue => break,
                Done::Retry if context.try_consume_retry() => {
                    debug!(
                        operation_id = %context.id(),
                        attempt = context.current_retry_count(),
                        max_retries = context.max_retries(),
                        "retrying operation in place"
                    );
                }
                Done::Retry => {
                    error!(
                        operation_id = %context.id(),
                        max_retries = context.max_retries(),
                        "retry requested with an exhausted budget"
                    );
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for RetryableOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryableOperation")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}
