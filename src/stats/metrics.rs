//! Counters for publisher activity

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Publisher-level counters
///
/// Updated from the serialized owner and the background tasks; reads are
/// relaxed and only meant for display and tests.
#[derive(Debug, Default)]
pub struct PublisherStats {
    sessions_started: AtomicU64,
    sessions_failed: AtomicU64,
    sync_calls: AtomicU64,
    syncs_coalesced: AtomicU64,
    control_reconnects: AtomicU64,
    recoveries: AtomicU64,
    consecutive_control_failures: AtomicU32,
}

impl PublisherStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn session_failed(&self) {
        self.sessions_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sync_call(&self) {
        self.sync_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sync_coalesced(&self) {
        self.syncs_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn control_reconnect(&self) {
        self.control_reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_control_failures(&self, failures: u32) {
        self.consecutive_control_failures
            .store(failures, Ordering::Relaxed);
    }

    /// Copy the current values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
            sync_calls: self.sync_calls.load(Ordering::Relaxed),
            syncs_coalesced: self.syncs_coalesced.load(Ordering::Relaxed),
            control_reconnects: self.control_reconnects.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            consecutive_control_failures: self
                .consecutive_control_failures
                .load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PublisherStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Sessions registered after a start command
    pub sessions_started: u64,
    /// Start attempts that failed after resolving the source
    pub sessions_failed: u64,
    /// Sync calls sent to the hub
    pub sync_calls: u64,
    /// Sync requests folded into a pending re-run
    pub syncs_coalesced: u64,
    /// Control channel reconnect attempts
    pub control_reconnects: u64,
    /// Forced re-registrations
    pub recoveries: u64,
    /// Current run of control channel failures
    pub consecutive_control_failures: u32,
}
