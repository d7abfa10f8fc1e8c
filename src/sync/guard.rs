//! Coalescing guard for stream synchronization
//!
//! At most one sync runs at a time. A request that arrives while one is in
//! flight only marks a re-run; however many arrive, the runner performs one
//! more pass when it finishes. Only the latest declared state matters, so
//! intermediate requests are never executed on their own.

use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct GuardState {
    in_flight: bool,
    pending: bool,
}

/// Single-flight, mark-and-rerun guard
#[derive(Debug, Default)]
pub struct SyncGuard {
    state: Mutex<GuardState>,
}

/// Outcome of [`SyncGuard::try_begin`]
#[derive(Debug)]
pub enum Admission<'a> {
    /// Caller runs the sync
    Run(SyncTicket<'a>),
    /// A sync is already running; a re-run has been scheduled
    Coalesced,
}

impl SyncGuard {
    /// Create an idle guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Become the runner, or fold this request into the running one
    pub fn try_begin(&self) -> Admission<'_> {
        let mut state = self.lock();
        if state.in_flight {
            state.pending = true;
            Admission::Coalesced
        } else {
            // This pass reads current state, which covers any earlier mark
            state.in_flight = true;
            state.pending = false;
            Admission::Run(SyncTicket {
                guard: self,
                released: false,
            })
        }
    }

    /// Check if a sync is running
    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Check if a re-run is scheduled
    pub fn is_pending(&self) -> bool {
        self.lock().pending
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        // The state is two flags; a poisoned lock still holds valid data
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Held by the runner for as long as the sync is in flight
#[derive(Debug)]
pub struct SyncTicket<'a> {
    guard: &'a SyncGuard,
    released: bool,
}

impl<'a> SyncTicket<'a> {
    /// Finish one pass
    ///
    /// Returns the ticket again if a re-run was requested meanwhile; the
    /// check and the release happen under one lock so no request is lost.
    pub fn finish(mut self) -> Option<SyncTicket<'a>> {
        let mut state = self.guard.lock();
        if state.pending {
            state.pending = false;
            drop(state);
            Some(self)
        } else {
            state.in_flight = false;
            drop(state);
            self.released = true;
            None
        }
    }
}

impl Drop for SyncTicket<'_> {
    fn drop(&mut self) {
        if !self.released {
            // Runner was cancelled mid-pass; a scheduled re-run stays marked
            // until the next runner picks it up
            self.guard.lock().in_flight = false;
        }
    }
}
