//! Active publish session
//!
//! Tracks the live resources of one stream from registration to teardown.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use crate::capture::CaptureAttachment;
use crate::transport::TransportSession;

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Registered, transport connecting
    Starting,
    /// Transport reported open
    Live,
    /// Tasks aborted, resources being released
    Closing,
}

/// Transport and capture attachment owned by one session
///
/// Released outside the publisher's state lock, since closing a transport
/// may wait on the network.
pub struct SessionResources {
    transport: Arc<dyn TransportSession>,
    attachment: Box<dyn CaptureAttachment>,
}

impl SessionResources {
    /// Bundle an attached, running capture pipeline with its transport
    pub fn new(transport: Arc<dyn TransportSession>, attachment: Box<dyn CaptureAttachment>) -> Self {
        Self {
            transport,
            attachment,
        }
    }

    /// Close the transport, then detach the device and stop the pipeline
    ///
    /// The transport goes first so no frames are delivered into a closing
    /// transport.
    pub async fn release(mut self) {
        self.transport.close().await;
        self.attachment.detach();
        self.attachment.stop();
    }
}

/// Live resources for one hub stream id
///
/// Owns its transport and capture attachment exclusively. The entry stays
/// in the session map in the [`Closing`](SessionPhase::Closing) phase until
/// its resources have been released.
pub struct ActiveSession {
    /// Serial distinguishing this session from earlier ones on the same id
    pub serial: u64,

    /// Hub stream id
    pub stream_id: String,

    /// Identity key of the source being published
    pub source_id: String,

    /// Current phase
    pub phase: SessionPhase,

    /// When the session was registered
    pub started_at: Instant,

    resources: Option<SessionResources>,
    tasks: Vec<JoinHandle<()>>,
}

impl ActiveSession {
    /// Create a session around its resources
    pub fn new(
        serial: u64,
        stream_id: impl Into<String>,
        source_id: impl Into<String>,
        resources: SessionResources,
    ) -> Self {
        Self {
            serial,
            stream_id: stream_id.into(),
            source_id: source_id.into(),
            phase: SessionPhase::Starting,
            started_at: Instant::now(),
            resources: Some(resources),
            tasks: Vec::new(),
        }
    }

    /// Attach a background task (readiness watcher, connector) that is
    /// aborted on teardown
    pub fn track_task(&mut self, handle: JoinHandle<()>) {
        self.tasks.push(handle);
    }

    /// Mark the transport open. Returns false if the session was not starting.
    pub fn mark_live(&mut self) -> bool {
        if self.phase == SessionPhase::Starting {
            self.phase = SessionPhase::Live;
            true
        } else {
            false
        }
    }

    /// Check if the transport reported open
    pub fn is_live(&self) -> bool {
        self.phase == SessionPhase::Live
    }

    /// Check if teardown has begun
    pub fn is_closing(&self) -> bool {
        self.phase == SessionPhase::Closing
    }

    /// Abort background tasks and hand over the resources for release
    ///
    /// Returns `None` if teardown already began.
    pub fn begin_teardown(&mut self) -> Option<SessionResources> {
        if self.is_closing() {
            return None;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.phase = SessionPhase::Closing;

        tracing::debug!(
            stream_id = %self.stream_id,
            source = %self.source_id,
            duration_ms = self.started_at.elapsed().as_millis() as u64,
            "Session closing"
        );
        self.resources.take()
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("serial", &self.serial)
            .field("stream_id", &self.stream_id)
            .field("source_id", &self.source_id)
            .field("phase", &self.phase)
            .finish()
    }
}
