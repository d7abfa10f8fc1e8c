//! Publish session start/stop
//!
//! Start and stop decide under the state lock, so two commands for the same
//! stream id can never interleave. Network work never holds the lock: the
//! transport connects in a tracked task, and a stopped session stays in the
//! map as `Closing` while its transport is closed outside the lock.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use futures::future::join_all;

use crate::capture::{resolve_device, CaptureAttachment};
use crate::error::Error;
use crate::hub::{ControlCommand, StreamState};
use crate::registry::{Source, SourceStatus};
use crate::session::{ActiveSession, SessionResources};
use crate::transport::{publish_url, DisconnectCallback, ReadyState, TransportMode, TransportSession};

use super::state::PublisherState;
use super::Publisher;

/// A session taken out of service under the lock, released after it
pub(super) struct Closing {
    stream_id: String,
    source_id: String,
    serial: u64,
    resources: SessionResources,
}

impl Closing {
    async fn release(self) -> (String, u64) {
        self.resources.release().await;
        (self.stream_id, self.serial)
    }
}

/// Whatever a failed start had already built
#[derive(Default)]
struct PartialSession {
    transport: Option<Arc<dyn TransportSession>>,
    attachment: Option<Box<dyn CaptureAttachment>>,
}

impl PartialSession {
    async fn release(self) {
        if let Some(transport) = self.transport {
            transport.close().await;
        }
        if let Some(mut attachment) = self.attachment {
            attachment.detach();
        }
    }
}

type OpenResult = std::result::Result<(Arc<dyn TransportSession>, SessionResources), (Error, PartialSession)>;

impl Publisher {
    /// Apply one control command
    pub async fn handle_command(&self, command: ControlCommand) {
        match command {
            ControlCommand::Start { stream_id, path } => {
                self.start_stream(&stream_id, path.as_deref()).await
            }
            ControlCommand::Stop { stream_id } => self.stop_stream(&stream_id).await,
        }
    }

    /// Dispatch from a command subscriber. Returns false once `generation`
    /// has been superseded.
    pub(crate) async fn dispatch(&self, generation: u64, command: ControlCommand) -> bool {
        if !self.inner.state.lock().await.is_current(generation) {
            return false;
        }
        tracing::debug!(stream_id = %command.stream_id(), command = ?command, "Control command");
        self.handle_command(command).await;
        true
    }

    /// Start publishing a hub stream
    ///
    /// A no-op when the publisher is off, the stream is already running, or
    /// the stream id does not resolve to an enabled source. Returns once the
    /// session is registered; the transport connects in the background.
    pub async fn start_stream(&self, stream_id: &str, path: Option<&str>) {
        let mut state = self.lock_state().await;

        if !state.active {
            tracing::debug!(stream_id = %stream_id, "Ignoring start, publisher is off");
            return;
        }
        if let Some(existing) = state.sessions.get(stream_id) {
            if existing.is_closing() {
                tracing::debug!(stream_id = %stream_id, "Ignoring start, previous session still closing");
            } else {
                tracing::debug!(stream_id = %stream_id, "Ignoring start, session already running");
            }
            return;
        }
        let Some(source) = state
            .stream_map
            .get(stream_id)
            .and_then(|source_id| state.sources.get(source_id))
            .cloned()
        else {
            tracing::debug!(stream_id = %stream_id, "Ignoring start for unknown stream");
            return;
        };
        if !source.enabled {
            tracing::debug!(stream_id = %stream_id, source = %source.id, "Ignoring start for disabled source");
            return;
        }
        let Some(token) = state.token().map(str::to_string) else {
            return;
        };

        let path = path
            .filter(|p| !p.is_empty())
            .unwrap_or(source.path.as_str())
            .to_string();
        let serial = self.inner.next_serial.fetch_add(1, Ordering::Relaxed);

        let (transport, resources) =
            match self.open_session(&source, &state.base_url, &path, &token) {
                Ok(parts) => parts,
                Err((e, partial)) => {
                    tracing::warn!(
                        stream_id = %stream_id,
                        source = %source.id,
                        error = %e,
                        "Session start failed"
                    );
                    self.inner.stats.session_failed();
                    if let Some(source) = state.sources.get_mut(&source.id) {
                        source.is_publishing = false;
                        source.status = match e {
                            Error::DeviceUnavailable(_) => SourceStatus::DeviceUnavailable,
                            other => SourceStatus::Failed(other.to_string()),
                        };
                    }
                    self.report_state(&state, stream_id, StreamState::Idle);
                    self.commit(&state);
                    drop(state);

                    partial.release().await;
                    return;
                }
            };

        let mut session = ActiveSession::new(serial, stream_id, source.id.clone(), resources);
        session.track_task(self.spawn_ready_watcher(transport.ready_state(), stream_id, serial));
        session.track_task(self.spawn_connector(transport, stream_id, serial));
        state.sessions.insert(stream_id.to_string(), session);

        if let Some(source) = state.sources.get_mut(&source.id) {
            source.is_publishing = true;
            source.status = SourceStatus::Starting;
        }
        self.inner.stats.session_started();
        self.report_state(&state, stream_id, StreamState::Starting);
        self.commit(&state);

        tracing::info!(
            stream_id = %stream_id,
            source = %source.id,
            path = %path,
            serial = serial,
            "Session starting"
        );
    }

    /// Stop publishing a hub stream. A no-op if nothing is running.
    pub async fn stop_stream(&self, stream_id: &str) {
        self.stop_session(stream_id, None).await;
    }

    /// Stop every session and set every source to `ready`
    pub async fn stop_all_and_reset(&self) {
        let mut state = self.lock_state().await;
        let closing = self.stop_all_locked(&mut state);
        self.commit(&state);
        drop(state);

        self.release_sessions(closing).await;
    }

    /// Take every session out of service and reset every source to `ready`.
    /// The returned sessions must be passed to [`release_sessions`].
    ///
    /// [`release_sessions`]: Publisher::release_sessions
    pub(super) fn stop_all_locked(&self, state: &mut PublisherState) -> Vec<Closing> {
        let stream_ids: Vec<String> = state.sessions.keys().cloned().collect();
        let closing = stream_ids
            .iter()
            .filter_map(|stream_id| self.teardown_session(state, stream_id))
            .collect();
        state.sources.reset_all(SourceStatus::Ready);
        closing
    }

    /// Stop `stream_id`; with `serial`, only if that session is still the
    /// one registered
    async fn stop_session(&self, stream_id: &str, serial: Option<u64>) {
        let mut state = self.lock_state().await;
        match state.sessions.get(stream_id) {
            None => {
                tracing::debug!(stream_id = %stream_id, "Ignoring stop, no session");
                return;
            }
            Some(session) if serial.is_some_and(|n| n != session.serial) => {
                tracing::debug!(stream_id = %stream_id, "Ignoring stop for superseded session");
                return;
            }
            Some(_) => {}
        }

        let closing = self.teardown_session(&mut state, stream_id);
        self.commit(&state);
        drop(state);

        self.release_sessions(closing.into_iter().collect()).await;
    }

    /// Take one session out of service and reset its source
    ///
    /// Aborts the session's tasks and marks it closing; the entry stays in
    /// the map until [`release_sessions`] has closed its transport. Returns
    /// `None` if there is no session or it is already closing.
    ///
    /// [`release_sessions`]: Publisher::release_sessions
    pub(super) fn teardown_session(
        &self,
        state: &mut PublisherState,
        stream_id: &str,
    ) -> Option<Closing> {
        let session = state.sessions.get_mut(stream_id)?;
        let resources = session.begin_teardown()?;
        let closing = Closing {
            stream_id: stream_id.to_string(),
            source_id: session.source_id.clone(),
            serial: session.serial,
            resources,
        };

        if let Some(source) = state.sources.get_mut(&closing.source_id) {
            source.is_publishing = false;
            source.status = source.idle_status();
        }
        self.report_state(state, stream_id, StreamState::Idle);

        tracing::info!(
            stream_id = %stream_id,
            source = %closing.source_id,
            "Session stopped"
        );
        Some(closing)
    }

    /// Release closed sessions and drop their map entries
    ///
    /// Must be called without the state lock. Runs in its own task so a
    /// cancelled caller cannot leave an entry stuck in `Closing`.
    pub(super) async fn release_sessions(&self, closing: Vec<Closing>) {
        if closing.is_empty() {
            return;
        }

        let publisher = self.clone();
        let task = tokio::spawn(async move {
            let released = join_all(closing.into_iter().map(Closing::release)).await;

            let mut state = publisher.lock_state().await;
            for (stream_id, serial) in released {
                if state
                    .sessions
                    .get(&stream_id)
                    .is_some_and(|s| s.serial == serial)
                {
                    state.sessions.remove(&stream_id);
                }
            }
            publisher.commit(&state);
        });

        if let Err(e) = task.await {
            if e.is_panic() {
                tracing::warn!(error = %e, "Session release panicked");
            }
        }
    }

    /// Resolve the device, build the transport, attach and start capture
    fn open_session(&self, source: &Source, base_url: &str, path: &str, token: &str) -> OpenResult {
        let device = resolve_device(self.inner.devices.as_ref(), source).ok_or_else(|| {
            (
                Error::DeviceUnavailable(source.id.clone()),
                PartialSession::default(),
            )
        })?;

        let target = publish_url(base_url, path, token).map_err(|e| (e, PartialSession::default()))?;
        let transport = self
            .inner
            .transports
            .build(&target, TransportMode::Publish)
            .map_err(|e| (e, PartialSession::default()))?;

        let mut attachment = match self.inner.devices.attach(&device, transport.as_ref()) {
            Ok(attachment) => attachment,
            Err(e) => {
                let partial = PartialSession {
                    transport: Some(transport),
                    attachment: None,
                };
                return Err((e, partial));
            }
        };

        if let Err(e) = attachment.start() {
            let partial = PartialSession {
                transport: Some(transport),
                attachment: Some(attachment),
            };
            return Err((e, partial));
        }

        Ok((Arc::clone(&transport), SessionResources::new(transport, attachment)))
    }

    fn spawn_ready_watcher(
        &self,
        mut ready: watch::Receiver<ReadyState>,
        stream_id: &str,
        serial: u64,
    ) -> JoinHandle<()> {
        let publisher = self.downgrade();
        let stream_id = stream_id.to_string();

        tokio::spawn(async move {
            loop {
                let current = *ready.borrow_and_update();
                match current {
                    ReadyState::Open => {
                        if let Some(publisher) = publisher.upgrade() {
                            publisher.mark_live(&stream_id, serial).await;
                        }
                        return;
                    }
                    ReadyState::Closed => return,
                    ReadyState::Connecting => {}
                }
                if ready.changed().await.is_err() {
                    return;
                }
            }
        })
    }

    fn spawn_connector(
        &self,
        transport: Arc<dyn TransportSession>,
        stream_id: &str,
        serial: u64,
    ) -> JoinHandle<()> {
        let publisher = self.downgrade();
        let on_disconnect = self.disconnect_callback(stream_id, serial);
        let stream_id = stream_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = transport.connect(on_disconnect).await {
                tracing::warn!(stream_id = %stream_id, error = %e, "Transport connect failed");
                // Teardown aborts this task, so the cleanup runs on its own
                if let Some(publisher) = publisher.upgrade() {
                    tokio::spawn(async move {
                        publisher.fail_session(&stream_id, serial, e).await;
                    });
                }
            }
        })
    }

    /// Disconnects after connect are handled exactly like a stop command
    fn disconnect_callback(&self, stream_id: &str, serial: u64) -> DisconnectCallback {
        let publisher = self.downgrade();
        let stream_id = stream_id.to_string();
        let runtime = tokio::runtime::Handle::current();

        Box::new(move || {
            runtime.spawn(async move {
                if let Some(publisher) = publisher.upgrade() {
                    tracing::info!(stream_id = %stream_id, "Transport disconnected");
                    publisher.stop_session(&stream_id, Some(serial)).await;
                }
            });
        })
    }

    async fn mark_live(&self, stream_id: &str, serial: u64) {
        let mut state = self.lock_state().await;
        let source_id = match state.sessions.get_mut(stream_id) {
            Some(session) if session.serial == serial => {
                if !session.mark_live() {
                    return;
                }
                session.source_id.clone()
            }
            _ => return,
        };

        if let Some(source) = state.sources.get_mut(&source_id) {
            source.status = SourceStatus::Live;
        }
        self.report_state(&state, stream_id, StreamState::Live);
        self.commit(&state);

        tracing::info!(stream_id = %stream_id, source = %source_id, "Session live");
    }

    async fn fail_session(&self, stream_id: &str, serial: u64, error: Error) {
        let mut state = self.lock_state().await;
        if !state
            .sessions
            .get(stream_id)
            .is_some_and(|s| s.serial == serial)
        {
            return;
        }

        let Some(closing) = self.teardown_session(&mut state, stream_id) else {
            return;
        };
        self.inner.stats.session_failed();

        if let Some(source) = state.sources.get_mut(&closing.source_id) {
            source.status = SourceStatus::Failed(format!("connect failed: {error}"));
        }
        self.commit(&state);
        drop(state);

        self.release_sessions(vec![closing]).await;
    }
}
