//! Stream set synchronization
//!
//! Declares every enabled source to the hub and adopts the returned ids and
//! paths. Runs through the [`SyncGuard`](crate::sync::SyncGuard): one call in
//! flight, later requests folded into a single re-run that reads whatever
//! state is current when it starts.

use std::collections::HashMap;

use crate::hub::RemoteStream;
use crate::sync::Admission;

use super::sessions::Closing;
use super::state::PublisherState;
use super::Publisher;

impl Publisher {
    /// Reconcile the declared stream set with the hub
    ///
    /// Returns immediately if a sync is already running; that sync will run
    /// once more before finishing. Failures leave the existing mappings and
    /// sessions untouched and are surfaced as the publisher status.
    ///
    /// The passes run in their own task, so dropping the returned future
    /// neither abandons a pass nor loses a re-run requested meanwhile.
    pub async fn request_sync(&self) {
        let publisher = self.clone();
        let task = tokio::spawn(async move { publisher.run_sync().await });
        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::warn!(error = %e, "Stream sync panicked");
            }
        }
    }

    async fn run_sync(&self) {
        let mut ticket = match self.inner.sync_guard.try_begin() {
            Admission::Run(ticket) => ticket,
            Admission::Coalesced => {
                self.inner.stats.sync_coalesced();
                tracing::debug!("Sync already in flight, scheduled re-run");
                return;
            }
        };

        loop {
            self.sync_once().await;
            match ticket.finish() {
                Some(next) => ticket = next,
                None => break,
            }
        }
    }

    async fn sync_once(&self) {
        let (base_url, token, generation, declared) = {
            let state = self.lock_state().await;
            if !state.active {
                return;
            }
            let Some(token) = state.token() else {
                return;
            };
            (
                state.base_url.clone(),
                token.to_string(),
                state.generation,
                state.sources.declared_streams(),
            )
        };

        self.inner.stats.sync_call();
        tracing::debug!(streams = declared.len(), "Synchronizing streams");
        let result = self
            .inner
            .hub
            .sync_streams(&base_url, &token, &declared)
            .await;

        let mut state = self.lock_state().await;
        if !state.is_current(generation) || state.token() != Some(token.as_str()) {
            tracing::debug!("Discarding sync result for a superseded identity");
            return;
        }

        let mut closing = Vec::new();
        match result {
            Ok(mapped) => {
                closing = self.apply_mapping(&mut state, &mapped);
                state.status = format!("synchronized {} streams", state.stream_map.len());
                tracing::info!(mapped = state.stream_map.len(), "Streams synchronized");
                self.persist(&state);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stream sync failed");
                state.status = format!("sync failed: {e}");
            }
        }
        self.commit(&state);
        drop(state);

        self.release_sessions(closing).await;
    }

    /// Adopt the hub's mapping
    ///
    /// Sessions whose stream id no longer belongs to their source are torn
    /// down before any id is reassigned, so no id ever has two owners. The
    /// returned sessions are released once the lock is dropped.
    fn apply_mapping(&self, state: &mut PublisherState, mapped: &[RemoteStream]) -> Vec<Closing> {
        let by_name: HashMap<&str, &RemoteStream> =
            mapped.iter().map(|r| (r.name.as_str(), r)).collect();

        let stale: Vec<String> = state
            .sessions
            .iter()
            .filter(|(stream_id, session)| {
                by_name
                    .get(session.source_id.as_str())
                    .map_or(true, |remote| remote.id != **stream_id)
            })
            .map(|(stream_id, _)| stream_id.clone())
            .collect();
        let closing = stale
            .iter()
            .filter_map(|stream_id| self.teardown_session(state, stream_id))
            .collect();

        for source in state.sources.sources_mut() {
            match by_name.get(source.id.as_str()) {
                Some(remote) => {
                    source.stream_id = remote.id.clone();
                    source.path = remote.path.clone();
                }
                None => source.clear_assignment(),
            }
            if !source.is_publishing {
                source.status = source.idle_status();
            }
        }
        state.rebuild_stream_map();
        closing
    }
}
