//! Client mode flags
//!
//! Recovery mode and token refresh are independent, but either one suspends
//! the normal queue. The flags only change under one lock, and the queue's
//! suspension is recomputed from them in the same critical section, so two
//! concurrent toggles can never leave the queue in the wrong state.

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::info;

use crate::scheduling::OperationQueue;

/// Snapshot of the process-wide client modes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeFlags {
    pub recovery: bool,
    pub refreshing_token: bool,
}

impl ModeFlags {
    pub fn suspends_normal_queue(self) -> bool {
        self.recovery || self.refreshing_token
    }
}

pub(crate) struct ModeState {
    flags: Mutex<ModeFlags>,
    refreshing: watch::Sender<bool>,
}

impl ModeState {
    pub(crate) fn new() -> Self {
        let (refreshing, _) = watch::channel(false);
        Self { flags: Mutex::new(ModeFlags::default()), refreshing }
    }

    pub(crate) fn snapshot(&self) -> ModeFlags {
        *self.flags.lock()
    }

    /// Receiver that observes the refreshing flag
    pub(crate) fn subscribe_refresh(&self) -> watch::Receiver<bool> {
        self.refreshing.subscribe()
    }

    /// Set `refreshing_token` if it was clear; false if a refresh is already
    /// in flight.
    pub(crate) fn try_begin_refresh(&self, normal: &OperationQueue) -> bool {
        self.compare_and_set(normal, |flags| !flags.refreshing_token, |flags| {
            flags.refreshing_token = true;
        })
    }

    pub(crate) fn end_refresh(&self, normal: &OperationQueue) -> bool {
        self.compare_and_set(normal, |flags| flags.refreshing_token, |flags| {
            flags.refreshing_token = false;
        })
    }

    pub(crate) fn enter_recovery(&self, normal: &OperationQueue) -> bool {
        self.compare_and_set(normal, |flags| !flags.recovery, |flags| flags.recovery = true)
    }

    pub(crate) fn exit_recovery(&self, normal: &OperationQueue) -> bool {
        self.compare_and_set(normal, |flags| flags.recovery, |flags| flags.recovery = false)
    }

    fn compare_and_set(
        &self,
        normal: &OperationQueue,
        expected: impl FnOnce(&ModeFlags) -> bool,
        apply: impl FnOnce(&mut ModeFlags),
    ) -> bool {
        let mut flags = self.flags.lock();
        if !expected(&*flags) {
            return false;
        }
        apply(&mut *flags);

        normal.set_suspended(flags.suspends_normal_queue());
        self.refreshing.send_replace(flags.refreshing_token);
        info!(
            recovery = flags.recovery,
            refreshing_token = flags.refreshing_token,
            "client mode changed"
        );
        true
    }
}
