//! In-process fakes for scenario tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use tokio::sync::watch;

use hall_publisher::capture::{CaptureAttachment, CaptureDeviceProvider, Device};
use hall_publisher::hub::{
    CommandStream, ControlCommand, DeclaredStream, HubApi, PublisherIdentity, RemoteStream,
    StreamState,
};
use hall_publisher::registry::{ConfigStore, MemoryStore};
use hall_publisher::transport::{
    DisconnectCallback, ReadyState, TransportFactory, TransportMode, TransportSession,
};
use hall_publisher::{Error, MediaKind, Publisher, PublisherConfig, Result};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Poll `check` until it holds or two seconds pass
pub async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Shared, ordered record of side effects
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

// Hub

#[derive(Debug, Clone, PartialEq)]
pub enum HubCall {
    Register { client_id: String },
    Unregister { token: String },
    Report { stream_id: String, state: StreamState },
    Sync { token: String, streams: Vec<DeclaredStream> },
    Subscribe { token: String },
}

#[derive(Default)]
pub struct FakeHub {
    calls: Mutex<Vec<HubCall>>,
    registrations: AtomicUsize,
    fail_register: AtomicBool,
    mapping: Mutex<HashMap<String, (String, String)>>,
    sync_delay: Mutex<Duration>,
    subscribe_failures: Mutex<VecDeque<String>>,
    control: Mutex<Option<mpsc::UnboundedSender<Result<ControlCommand>>>>,
}

impl FakeHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Assign `id`/`path` to a declared stream name
    pub fn map(&self, name: &str, id: &str, path: &str) {
        self.mapping
            .lock()
            .unwrap()
            .insert(name.to_string(), (id.to_string(), path.to_string()));
    }

    pub fn unmap(&self, name: &str) {
        self.mapping.lock().unwrap().remove(name);
    }

    pub fn set_sync_delay(&self, delay: Duration) {
        *self.sync_delay.lock().unwrap() = delay;
    }

    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    /// Make the next `count` control subscriptions fail
    pub fn fail_subscriptions(&self, count: usize) {
        let mut failures = self.subscribe_failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back("connection refused".to_string());
        }
    }

    pub fn calls(&self) -> Vec<HubCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&HubCall) -> bool) -> usize {
        self.calls().iter().filter(|c| matches(c)).count()
    }

    pub fn registers(&self) -> usize {
        self.count(|c| matches!(c, HubCall::Register { .. }))
    }

    pub fn syncs(&self) -> usize {
        self.count(|c| matches!(c, HubCall::Sync { .. }))
    }

    pub fn subscribes(&self) -> usize {
        self.count(|c| matches!(c, HubCall::Subscribe { .. }))
    }

    pub fn reports(&self, stream_id: &str) -> Vec<StreamState> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                HubCall::Report { stream_id: id, state } if id == stream_id => Some(state),
                _ => None,
            })
            .collect()
    }

    pub fn last_declared(&self) -> Vec<DeclaredStream> {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                HubCall::Sync { streams, .. } => Some(streams),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Push a command down the open control stream
    pub fn send(&self, command: ControlCommand) -> bool {
        match self.control.lock().unwrap().as_ref() {
            Some(tx) => tx.unbounded_send(Ok(command)).is_ok(),
            None => false,
        }
    }

    /// End the open control stream from the hub side
    pub fn close_control(&self) {
        self.control.lock().unwrap().take();
    }

    /// Check if the subscriber still holds the open control stream
    pub fn control_open(&self) -> bool {
        self.control
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn record(&self, call: HubCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl HubApi for FakeHub {
    async fn register(
        &self,
        _base_url: &str,
        _display_name: &str,
        client_id: &str,
    ) -> Result<PublisherIdentity> {
        self.record(HubCall::Register {
            client_id: client_id.to_string(),
        });
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(Error::protocol(503, "hub unavailable"));
        }
        let n = self.registrations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PublisherIdentity {
            publisher_id: format!("pub-{n}"),
            token: format!("tok-{n}"),
        })
    }

    async fn unregister(&self, _base_url: &str, token: &str, _client_id: &str) -> Result<()> {
        self.record(HubCall::Unregister {
            token: token.to_string(),
        });
        Ok(())
    }

    async fn report_stream_state(
        &self,
        _base_url: &str,
        _token: &str,
        stream_id: &str,
        state: StreamState,
    ) -> Result<()> {
        self.record(HubCall::Report {
            stream_id: stream_id.to_string(),
            state,
        });
        Ok(())
    }

    async fn sync_streams(
        &self,
        _base_url: &str,
        token: &str,
        streams: &[DeclaredStream],
    ) -> Result<Vec<RemoteStream>> {
        self.record(HubCall::Sync {
            token: token.to_string(),
            streams: streams.to_vec(),
        });

        let delay = *self.sync_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mapping = self.mapping.lock().unwrap();
        Ok(streams
            .iter()
            .filter_map(|s| {
                mapping.get(&s.name).map(|(id, path)| RemoteStream {
                    id: id.clone(),
                    name: s.name.clone(),
                    path: path.clone(),
                })
            })
            .collect())
    }

    async fn subscribe_control(&self, _base_url: &str, token: &str) -> Result<CommandStream> {
        self.record(HubCall::Subscribe {
            token: token.to_string(),
        });
        if let Some(reason) = self.subscribe_failures.lock().unwrap().pop_front() {
            return Err(Error::Transport(reason));
        }

        let (tx, rx) = mpsc::unbounded();
        *self.control.lock().unwrap() = Some(tx);
        Ok(rx.boxed())
    }
}

// Capture

#[derive(Default)]
pub struct FakeDevices {
    devices: Mutex<Vec<Device>>,
    denied: Mutex<Vec<MediaKind>>,
    fail_attach: AtomicBool,
    log: EventLog,
}

impl FakeDevices {
    pub fn new(devices: Vec<Device>, log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            devices: Mutex::new(devices),
            log,
            ..Default::default()
        })
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn deny(&self, kind: MediaKind) {
        self.denied.lock().unwrap().push(kind);
    }

    pub fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptureDeviceProvider for FakeDevices {
    async fn request_access(&self, kind: MediaKind) -> bool {
        !self.denied.lock().unwrap().contains(&kind)
    }

    fn enumerate(&self, kind: MediaKind) -> Vec<Device> {
        self.devices
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.kind == kind)
            .cloned()
            .collect()
    }

    fn attach(
        &self,
        device: &Device,
        _session: &dyn TransportSession,
    ) -> Result<Box<dyn CaptureAttachment>> {
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(Error::DeviceUnavailable(device.unique_id.clone()));
        }
        self.log.push(format!("attach {}", device.unique_id));
        Ok(Box::new(FakeAttachment {
            device: device.unique_id.clone(),
            log: self.log.clone(),
        }))
    }
}

struct FakeAttachment {
    device: String,
    log: EventLog,
}

impl CaptureAttachment for FakeAttachment {
    fn start(&mut self) -> Result<()> {
        self.log.push(format!("start {}", self.device));
        Ok(())
    }

    fn detach(&mut self) {
        self.log.push(format!("detach {}", self.device));
    }

    fn stop(&mut self) {
        self.log.push(format!("stop {}", self.device));
    }
}

// Transport

pub struct FakeTransport {
    pub target: String,
    ready: watch::Sender<ReadyState>,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
    connect_error: Option<String>,
    auto_open: bool,
    close_delay: Duration,
    log: EventLog,
}

impl FakeTransport {
    /// Report the transport as open
    pub fn open(&self) {
        self.ready.send_replace(ReadyState::Open);
    }

    /// Drop an established connection
    pub fn disconnect(&self) {
        self.ready.send_replace(ReadyState::Closed);
        if let Some(callback) = self.on_disconnect.lock().unwrap().take() {
            callback();
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.ready.borrow() == ReadyState::Closed
    }
}

#[async_trait]
impl TransportSession for FakeTransport {
    async fn connect(&self, on_disconnect: DisconnectCallback) -> Result<()> {
        if let Some(reason) = &self.connect_error {
            return Err(Error::Transport(reason.clone()));
        }
        *self.on_disconnect.lock().unwrap() = Some(on_disconnect);
        if self.auto_open {
            self.open();
        }
        Ok(())
    }

    fn ready_state(&self) -> watch::Receiver<ReadyState> {
        self.ready.subscribe()
    }

    async fn close(&self) {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.log.push("close");
        self.ready.send_replace(ReadyState::Closed);
    }
}

#[derive(Default)]
pub struct FakeTransports {
    built: Mutex<Vec<Arc<FakeTransport>>>,
    connect_error: Mutex<Option<String>>,
    auto_open: AtomicBool,
    close_delay: Mutex<Duration>,
    log: EventLog,
}

impl FakeTransports {
    pub fn new(log: EventLog) -> Arc<Self> {
        Arc::new(Self {
            log,
            ..Default::default()
        })
    }

    pub fn fail_connect(&self, reason: &str) {
        *self.connect_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn auto_open(&self, open: bool) {
        self.auto_open.store(open, Ordering::SeqCst);
    }

    /// Make transports built from now on take `delay` to close
    pub fn set_close_delay(&self, delay: Duration) {
        *self.close_delay.lock().unwrap() = delay;
    }

    pub fn built(&self) -> Vec<Arc<FakeTransport>> {
        self.built.lock().unwrap().clone()
    }

    pub fn last(&self) -> Arc<FakeTransport> {
        self.built().pop().expect("no transport built")
    }
}

impl TransportFactory for FakeTransports {
    fn build(&self, target: &url::Url, _mode: TransportMode) -> Result<Arc<dyn TransportSession>> {
        let (ready, _) = watch::channel(ReadyState::Connecting);
        let transport = Arc::new(FakeTransport {
            target: target.to_string(),
            ready,
            on_disconnect: Mutex::new(None),
            connect_error: self.connect_error.lock().unwrap().clone(),
            auto_open: self.auto_open.load(Ordering::SeqCst),
            close_delay: *self.close_delay.lock().unwrap(),
            log: self.log.clone(),
        });
        self.built.lock().unwrap().push(Arc::clone(&transport));
        Ok(transport)
    }
}

// Harness

pub struct Harness {
    pub publisher: Publisher,
    pub hub: Arc<FakeHub>,
    pub devices: Arc<FakeDevices>,
    pub transports: Arc<FakeTransports>,
    pub store: Arc<MemoryStore>,
    pub log: EventLog,
}

pub fn default_devices() -> Vec<Device> {
    vec![
        Device::new("v1", "Cam1", MediaKind::Video),
        Device::new("a1", "Default - Desk Mic", MediaKind::Audio),
    ]
}

pub fn test_config() -> PublisherConfig {
    PublisherConfig::new("https://hub.example")
        .display_name("Lobby")
        .reconnect_backoff(Duration::from_millis(10))
}

impl Harness {
    pub fn new() -> Self {
        Self::with(test_config(), MemoryStore::new())
    }

    pub fn with(config: PublisherConfig, store: MemoryStore) -> Self {
        init_tracing();
        let log = EventLog::default();
        let hub = FakeHub::new();
        let devices = FakeDevices::new(default_devices(), log.clone());
        let transports = FakeTransports::new(log.clone());
        let store = Arc::new(store);

        let publisher = Publisher::new(
            config,
            Arc::clone(&hub) as Arc<dyn HubApi>,
            Arc::clone(&devices) as Arc<dyn CaptureDeviceProvider>,
            Arc::clone(&transports) as Arc<dyn TransportFactory>,
            Arc::clone(&store) as Arc<dyn ConfigStore>,
        );

        Self {
            publisher,
            hub,
            devices,
            transports,
            store,
            log,
        }
    }

    /// Bootstrap, map `video-cam1` to `s1` and turn the publisher on
    pub async fn start(&self) {
        self.hub.map("video-cam1", "s1", "room/s1");
        self.publisher.bootstrap().await.expect("bootstrap");
        self.publisher.toggle_publisher().await.expect("toggle on");
        self.wait_status("connected").await;
    }

    pub async fn wait_status(&self, status: &str) {
        let publisher = self.publisher.clone();
        wait_for(&format!("publisher status {status:?}"), || {
            let publisher = publisher.clone();
            let status = status.to_string();
            async move { publisher.snapshot().await.status == status }
        })
        .await;
    }

    pub async fn source_status(&self, id: &str) -> String {
        self.publisher
            .snapshot()
            .await
            .source(id)
            .map(|s| s.status.to_string())
            .unwrap_or_default()
    }

    pub async fn wait_source(&self, id: &str, status: &str) {
        let publisher = self.publisher.clone();
        wait_for(&format!("{id} status {status:?}"), || {
            let publisher = publisher.clone();
            let id = id.to_string();
            let status = status.to_string();
            async move {
                publisher
                    .snapshot()
                    .await
                    .source(&id)
                    .is_some_and(|s| s.status.to_string() == status)
            }
        })
        .await;
    }

    pub async fn wait_report(&self, stream_id: &str, state: StreamState) {
        let hub = Arc::clone(&self.hub);
        wait_for(&format!("{stream_id} report {state}"), || {
            let found = hub.reports(stream_id).contains(&state);
            async move { found }
        })
        .await;
    }
}
