//! Retryable operations and the queues that run them

pub mod operation;
pub mod queue;

pub use operation::{Done, OperationContext, RetryableOperation};
pub use queue::OperationQueue;
