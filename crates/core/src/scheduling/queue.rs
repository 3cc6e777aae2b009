//! Operation queue
//!
//! FIFO queue running up to `max_concurrent` [`RetryableOperation`]s at once
//! on a tokio runtime. Suspension withholds new starts without dropping
//! anything; resuming starts pending operations in enqueue order.
//! [`OperationQueue::cancel_all_operations`] drops pending operations and stops
//! polling running ones, so their work never runs again.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::operation::RetryableOperation;

struct QueueState {
    pending: VecDeque<RetryableOperation>,
    running: usize,
    suspended: bool,
    cancel: CancellationToken,
    /// Bumped on every cancel so stale tasks do not release slots twice.
    generation: u64,
}

struct QueueShared {
    name: &'static str,
    max_concurrent: usize,
    runtime: Handle,
    state: Mutex<QueueState>,
}

/// Cloneable handle on a shared operation queue
#[derive(Clone)]
pub struct OperationQueue {
    shared: Arc<QueueShared>,
}

impl OperationQueue {
    pub fn new(name: &'static str, max_concurrent: usize, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                name,
                max_concurrent: max_concurrent.max(1),
                runtime,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    running: 0,
                    suspended: false,
                    cancel: CancellationToken::new(),
                    generation: 0,
                }),
            }),
        }
    }

    /// Queue that never runs two operations at the same time
    pub fn serial(name: &'static str, runtime: Handle) -> Self {
        Self::new(name, 1, runtime)
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    pub fn add(&self, operation: RetryableOperation) {
        debug!(queue = self.shared.name, operation_id = %operation.context().id(), "enqueue");
        self.shared.state.lock().pending.push_back(operation);
        pump(&self.shared);
    }

    pub fn set_suspended(&self, suspended: bool) {
        {
            let mut state = self.shared.state.lock();
            if state.suspended == suspended {
                return;
            }
            state.suspended = suspended;
        }
        debug!(queue = self.shared.name, suspended, "queue suspension changed");
        if !suspended {
            pump(&self.shared);
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.state.lock().suspended
    }

    /// Drop every pending operation and stop every running one
    pub fn cancel_all_operations(&self) {
        let (dropped, stopped) = {
            let mut state = self.shared.state.lock();
            let dropped = std::mem::take(&mut state.pending);
            let stopped = state.running;
            state.cancel.cancel();
            state.cancel = CancellationToken::new();
            state.running = 0;
            state.generation += 1;
            (dropped, stopped)
        };
        debug!(
            queue = self.shared.name,
            pending = dropped.len(),
            running = stopped,
            "cancelled all operations"
        );
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.shared.state.lock().running
    }
}

fn pump(shared: &Arc<QueueShared>) {
    let mut launch = Vec::new();
    {
        let mut state = shared.state.lock();
        while !state.suspended && state.running < shared.max_concurrent {
            let Some(operation) = state.pending.pop_front() else {
                break;
            };
            state.running += 1;
            launch.push((operation, state.cancel.clone(), state.generation));
        }
    }

    for (operation, cancel, generation) in launch {
        let task_shared = Arc::clone(shared);
        shared.runtime.spawn(async move {
            let operation_id = operation.context().id();
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!(queue = task_shared.name, %operation_id, "operation cancelled");
                }
                () = operation.run() => {}
            }
            finish(&task_shared, generation);
        });
    }
}

fn finish(shared: &Arc<QueueShared>, generation: u64) {
    {
        let mut state = shared.state.lock();
        if state.generation != generation {
            return;
        }
        state.running = state.running.saturating_sub(1);
    }
    pump(shared);
}
