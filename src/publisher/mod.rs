//! Publisher
//!
//! [`Publisher`] is the single owner of all mutable publisher and source
//! state. Background work (the command subscriber, readiness watchers,
//! transport connectors) runs in separate tasks and funnels every mutation
//! back through the state lock.
//!
//! # Locking
//!
//! - `state` serializes access to sources, mappings and the session map. It
//!   is never held across a hub call; network calls snapshot what they need,
//!   release the lock, and re-check the generation when they come back.
//! - `lifecycle` serializes publisher-level commands (bootstrap, toggle,
//!   device reload) so two toggles cannot interleave.
//! - Stream synchronization is gated by a [`SyncGuard`] instead of a lock.

pub mod config;
mod sessions;
mod state;
mod sync;

use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::capture::{enumerate_all, CaptureDeviceProvider};
use crate::control::CommandSubscriber;
use crate::error::{Error, Result};
use crate::hub::{HubApi, PublisherIdentity, StreamState};
use crate::registry::{ConfigStore, MediaKind, SourceRegistry};
use crate::stats::{PublisherStats, StatsSnapshot};
use crate::sync::SyncGuard;
use crate::transport::url::parse_base;
use crate::transport::TransportFactory;

pub use config::PublisherConfig;
pub use state::PublisherSnapshot;

use state::PublisherState;

pub(crate) struct Inner {
    config: PublisherConfig,
    hub: Arc<dyn HubApi>,
    devices: Arc<dyn CaptureDeviceProvider>,
    transports: Arc<dyn TransportFactory>,
    store: Arc<dyn ConfigStore>,
    state: Mutex<PublisherState>,
    lifecycle: Mutex<()>,
    sync_guard: SyncGuard,
    stats: PublisherStats,
    snapshot_tx: watch::Sender<PublisherSnapshot>,
    next_serial: AtomicU64,
}

/// Multi-stream publisher
///
/// Cheap to clone; all clones share one state.
///
/// # Example
/// ```no_run
/// # use std::sync::Arc;
/// # use hall_publisher::capture::CaptureDeviceProvider;
/// # use hall_publisher::transport::TransportFactory;
/// use hall_publisher::registry::JsonFileStore;
/// use hall_publisher::{Publisher, PublisherConfig};
///
/// # async fn example(
/// #     devices: Arc<dyn CaptureDeviceProvider>,
/// #     transports: Arc<dyn TransportFactory>,
/// # ) -> hall_publisher::Result<()> {
/// let config = PublisherConfig::new("https://hub.example").display_name("Lobby");
/// let store = Arc::new(JsonFileStore::new("publisher.json"));
/// let publisher = Publisher::with_http_hub(config, devices, transports, store)?;
///
/// publisher.bootstrap().await?;
/// publisher.toggle_publisher().await?;
/// println!("{}", publisher.snapshot().await.summary);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Inner>,
}

/// Non-owning handle used by background tasks
#[derive(Clone)]
pub(crate) struct WeakPublisher {
    inner: Weak<Inner>,
}

impl WeakPublisher {
    pub(crate) fn upgrade(&self) -> Option<Publisher> {
        self.inner.upgrade().map(|inner| Publisher { inner })
    }
}

impl Publisher {
    /// Create a publisher from its collaborators
    pub fn new(
        config: PublisherConfig,
        hub: Arc<dyn HubApi>,
        devices: Arc<dyn CaptureDeviceProvider>,
        transports: Arc<dyn TransportFactory>,
        store: Arc<dyn ConfigStore>,
    ) -> Self {
        let state = PublisherState::new(&config);
        let (snapshot_tx, _) = watch::channel(state.snapshot());

        Self {
            inner: Arc::new(Inner {
                config,
                hub,
                devices,
                transports,
                store,
                state: Mutex::new(state),
                lifecycle: Mutex::new(()),
                sync_guard: SyncGuard::new(),
                stats: PublisherStats::new(),
                snapshot_tx,
                next_serial: AtomicU64::new(1),
            }),
        }
    }

    /// Create a publisher talking to the hub over HTTP
    pub fn with_http_hub(
        config: PublisherConfig,
        devices: Arc<dyn CaptureDeviceProvider>,
        transports: Arc<dyn TransportFactory>,
        store: Arc<dyn ConfigStore>,
    ) -> Result<Self> {
        let hub = Arc::new(config.hub_client()?);
        Ok(Self::new(config, hub, devices, transports, store))
    }

    /// Get the configuration
    pub fn config(&self) -> &PublisherConfig {
        &self.inner.config
    }

    /// Current observable state
    pub async fn snapshot(&self) -> PublisherSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    /// Receive a new snapshot after every state change
    pub fn subscribe(&self) -> watch::Receiver<PublisherSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Get publisher counters
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Number of sessions that are starting or live
    ///
    /// Sessions still closing their transport are not counted.
    pub async fn active_sessions(&self) -> usize {
        let state = self.inner.state.lock().await;
        state.sessions.values().filter(|s| !s.is_closing()).count()
    }

    /// Load persisted settings, enumerate devices and honour auto-start
    pub async fn bootstrap(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let saved = match self.inner.store.load() {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load publisher state, using defaults");
                None
            }
        };

        let auto_start = {
            let mut state = self.lock_state().await;
            if let Some(saved) = saved {
                if !saved.base_url.is_empty() {
                    state.base_url = saved.base_url;
                }
                if !saved.display_name.is_empty() {
                    state.display_name = saved.display_name;
                }
                state.auto_start = saved.auto_start;
                state.client_id = saved.client_id;
                if !state.active {
                    state.sources = SourceRegistry::from_persisted(saved.sources);
                }
            }
            ensure_client_id(&mut state);
            state.auto_start && !state.active
        };

        self.reload_devices_locked(false).await;

        if auto_start {
            tracing::info!("Auto-starting publisher");
            self.start_publisher().await?;
        }
        Ok(())
    }

    /// Turn the publisher on or off
    ///
    /// Turning off returns only after the command subscriber has stopped and
    /// every session is torn down.
    pub async fn toggle_publisher(&self) -> Result<()> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let active = self.inner.state.lock().await.active;
        if active {
            self.stop_publisher().await;
            Ok(())
        } else {
            self.start_publisher().await
        }
    }

    /// Check if the publisher is on
    pub async fn is_active(&self) -> bool {
        self.inner.state.lock().await.active
    }

    /// Stop every session and re-enumerate devices
    ///
    /// With `force_sync`, the new source set is declared to the hub right
    /// away when the publisher is on.
    pub async fn reload_devices(&self, force_sync: bool) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.reload_devices_locked(force_sync).await;
    }

    /// Flip a source's enabled flag
    ///
    /// Disabling a mapped source stops its session immediately; the next
    /// sync leaves it out of the declared streams.
    pub async fn source_toggled(&self, source_id: &str) -> Result<()> {
        let (active, closing) = {
            let mut state = self.lock_state().await;
            let (enabled, stream_id) = match state.sources.get_mut(source_id) {
                Some(source) => {
                    source.enabled = !source.enabled;
                    (source.enabled, source.stream_id.clone())
                }
                None => return Err(Error::Config(format!("unknown source {source_id}"))),
            };

            let closing = if !enabled && !stream_id.is_empty() {
                self.teardown_session(&mut state, &stream_id)
            } else {
                None
            };

            let status = state.sources.get(source_id).map(|s| state.rest_status(s));
            if let Some(source) = state.sources.get_mut(source_id) {
                if let Some(status) = status {
                    if !source.is_publishing {
                        source.status = status;
                    }
                }
            }

            tracing::info!(source = source_id, enabled = enabled, "Source toggled");
            self.persist(&state);
            self.commit(&state);
            (state.active, closing)
        };

        self.release_sessions(closing.into_iter().collect()).await;
        if active {
            self.request_sync().await;
        }
        Ok(())
    }

    /// Rename a source
    pub async fn set_source_title(&self, source_id: &str, title: &str) -> Result<()> {
        let resync = {
            let mut state = self.lock_state().await;
            let source = state
                .sources
                .get_mut(source_id)
                .ok_or_else(|| Error::Config(format!("unknown source {source_id}")))?;
            source.title = title.to_string();
            let enabled = source.enabled;
            self.persist(&state);
            self.commit(&state);
            state.active && enabled
        };

        if resync {
            self.request_sync().await;
        }
        Ok(())
    }

    /// Change the persisted settings
    ///
    /// A new base URL or display name takes effect on the next registration.
    pub async fn update_settings(
        &self,
        base_url: &str,
        display_name: &str,
        auto_start: bool,
    ) -> Result<()> {
        if !base_url.trim().is_empty() {
            parse_base(base_url)?;
        }

        let mut state = self.lock_state().await;
        state.base_url = base_url.trim().to_string();
        state.display_name = display_name.trim().to_string();
        state.auto_start = auto_start;
        self.persist(&state);
        self.commit(&state);
        Ok(())
    }

    async fn start_publisher(&self) -> Result<()> {
        let (base_url, display_name, client_id, kinds) = {
            let mut state = self.lock_state().await;
            if let Err(e) = parse_base(&state.base_url) {
                state.status = e.to_string();
                self.commit(&state);
                return Err(e);
            }
            if ensure_client_id(&mut state) {
                self.persist(&state);
            }

            let kinds: Vec<MediaKind> = MediaKind::ALL
                .into_iter()
                .filter(|kind| {
                    state
                        .sources
                        .sources()
                        .iter()
                        .any(|s| s.enabled && s.kind == *kind)
                })
                .collect();

            state.status = "requesting access".to_string();
            self.commit(&state);
            (
                state.base_url.clone(),
                state.display_name.clone(),
                state.client_id.clone(),
                kinds,
            )
        };

        for kind in kinds {
            if !self.inner.devices.request_access(kind).await {
                let err = Error::PermissionDenied(kind);
                tracing::warn!(kind = %kind, "Capture access denied");
                self.set_status(err.to_string()).await;
                return Err(err);
            }
        }

        self.set_status("registering").await;
        let identity = match self
            .inner
            .hub
            .register(&base_url, &display_name, &client_id)
            .await
        {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Registration failed");
                self.set_status(format!("registration failed: {e}")).await;
                return Err(e);
            }
        };

        let generation = {
            let mut state = self.lock_state().await;
            state.identity = Some(identity);
            state.active = true;
            state.generation += 1;
            state.status = "synchronizing".to_string();
            state.refresh_idle_statuses();
            self.commit(&state);
            state.generation
        };
        tracing::info!(generation = generation, "Publisher started");

        self.request_sync().await;

        let handle = CommandSubscriber::spawn(self, generation);
        let mut state = self.lock_state().await;
        if let Some(previous) = state.subscriber.replace(handle) {
            previous.cancel();
        }
        Ok(())
    }

    async fn stop_publisher(&self) {
        let subscriber = {
            let mut state = self.lock_state().await;
            state.active = false;
            state.generation += 1;
            state.status = "stopping".to_string();
            self.commit(&state);
            state.subscriber.take()
        };

        if let Some(subscriber) = subscriber {
            subscriber.shutdown().await;
        }

        let (identity, base_url, client_id, closing) = {
            let mut state = self.lock_state().await;
            // Every source reads `ready` while the publisher is off
            let closing = self.stop_all_locked(&mut state);
            let identity = state.identity.take();
            state.status = "stopped".to_string();
            self.persist(&state);
            self.commit(&state);
            (identity, state.base_url.clone(), state.client_id.clone(), closing)
        };
        self.release_sessions(closing).await;
        tracing::info!("Publisher stopped");

        if let Some(identity) = identity {
            if let Err(e) = self
                .inner
                .hub
                .unregister(&base_url, &identity.token, &client_id)
                .await
            {
                tracing::warn!(error = %e, "Unregister failed");
            }
        }
    }

    async fn reload_devices_locked(&self, force_sync: bool) {
        // Device handles are about to be invalidated
        let closing = {
            let mut state = self.lock_state().await;
            let closing = self.stop_all_locked(&mut state);
            self.commit(&state);
            closing
        };
        self.release_sessions(closing).await;

        let active = {
            let mut state = self.lock_state().await;
            let devices = enumerate_all(self.inner.devices.as_ref());
            state.sources.merge(&devices);
            state.rebuild_stream_map();
            state.refresh_idle_statuses();

            tracing::info!(sources = state.sources.len(), "Devices reloaded");
            self.persist(&state);
            self.commit(&state);
            state.active
        };

        if active && force_sync {
            self.request_sync().await;
        }
    }

    pub(crate) fn downgrade(&self) -> WeakPublisher {
        WeakPublisher {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub(crate) fn hub(&self) -> Arc<dyn HubApi> {
        Arc::clone(&self.inner.hub)
    }

    pub(crate) fn stats_handle(&self) -> &PublisherStats {
        &self.inner.stats
    }

    /// Base URL and token for the control stream, if `generation` is current
    pub(crate) async fn control_target(&self, generation: u64) -> Option<(String, String)> {
        let state = self.inner.state.lock().await;
        if !state.is_current(generation) {
            return None;
        }
        let token = state.token()?.to_string();
        Some((state.base_url.clone(), token))
    }

    /// Registration parameters, if `generation` is current
    pub(crate) async fn registration_params(
        &self,
        generation: u64,
    ) -> Option<(String, String, String)> {
        let state = self.inner.state.lock().await;
        if !state.is_current(generation) {
            return None;
        }
        Some((
            state.base_url.clone(),
            state.display_name.clone(),
            state.client_id.clone(),
        ))
    }

    /// Install a new identity. Returns false if `generation` is stale.
    pub(crate) async fn replace_identity(
        &self,
        generation: u64,
        identity: PublisherIdentity,
    ) -> bool {
        let mut state = self.lock_state().await;
        if !state.is_current(generation) {
            return false;
        }
        tracing::info!(publisher_id = %identity.publisher_id, "Publisher identity replaced");
        state.identity = Some(identity);
        true
    }

    /// Set the status line if `generation` is current
    pub(crate) async fn set_status_for(&self, generation: u64, status: impl Into<String>) -> bool {
        let mut state = self.lock_state().await;
        if !state.is_current(generation) {
            return false;
        }
        state.status = status.into();
        self.commit(&state);
        true
    }

    async fn set_status(&self, status: impl Into<String>) {
        let mut state = self.lock_state().await;
        state.status = status.into();
        self.commit(&state);
    }

    async fn lock_state(&self) -> MutexGuard<'_, PublisherState> {
        self.inner.state.lock().await
    }

    fn commit(&self, state: &PublisherState) {
        self.inner.snapshot_tx.send_replace(state.snapshot());
    }

    fn persist(&self, state: &PublisherState) {
        if let Err(e) = self.inner.store.save(&state.persisted()) {
            tracing::warn!(error = %e, "Failed to save publisher state");
        }
    }

    /// Fire-and-forget state report
    fn report_state(&self, state: &PublisherState, stream_id: &str, stream_state: StreamState) {
        let Some(token) = state.token() else {
            return;
        };
        let hub = Arc::clone(&self.inner.hub);
        let base_url = state.base_url.clone();
        let token = token.to_string();
        let stream_id = stream_id.to_string();

        tokio::spawn(async move {
            if let Err(e) = hub
                .report_stream_state(&base_url, &token, &stream_id, stream_state)
                .await
            {
                tracing::debug!(
                    stream_id = %stream_id,
                    state = %stream_state,
                    error = %e,
                    "State report failed"
                );
            }
        });
    }
}

/// Generate a client id if none exists. Returns true if one was created.
fn ensure_client_id(state: &mut PublisherState) -> bool {
    if state.client_id.is_empty() {
        state.client_id = uuid::Uuid::new_v4().to_string();
        true
    } else {
        false
    }
}
