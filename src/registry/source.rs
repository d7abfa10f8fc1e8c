//! Source entry and status types
//!
//! This module defines the per-source state held by the registry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::Device;

/// Kind of capture input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Camera or other video input
    Video,
    /// Microphone or other audio input
    Audio,
}

impl MediaKind {
    /// All kinds, in display order
    pub const ALL: [MediaKind; 2] = [MediaKind::Video, MediaKind::Audio];

    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Human-facing status of a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceStatus {
    /// Publisher is off
    Ready,
    /// Mapped by the hub, waiting for a start command
    WaitingViewer,
    /// Session built, transport connecting
    Starting,
    /// Transport reported open
    Live,
    /// Source disabled by the user
    Disabled,
    /// Enabled but not yet mapped by the hub
    Pending,
    /// No physical device matches the source
    DeviceUnavailable,
    /// Last start attempt failed
    Failed(String),
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceStatus::Ready => f.write_str("ready"),
            SourceStatus::WaitingViewer => f.write_str("waiting viewer"),
            SourceStatus::Starting => f.write_str("starting"),
            SourceStatus::Live => f.write_str("live"),
            SourceStatus::Disabled => f.write_str("disabled"),
            SourceStatus::Pending => f.write_str("pending"),
            SourceStatus::DeviceUnavailable => f.write_str("device unavailable"),
            SourceStatus::Failed(reason) => f.write_str(reason),
        }
    }
}

/// One capture input the device can offer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    /// Stable identity key, see [`identity_key`](super::identity_key)
    pub id: String,

    /// Provider unique id of the backing device
    pub device_id: String,

    /// Video or audio
    pub kind: MediaKind,

    /// Device label as reported by the provider
    pub label: String,

    /// User-facing title declared to the hub
    pub title: String,

    /// Whether the source is declared to the hub
    pub enabled: bool,

    /// Hub-assigned stream id (empty until synchronized)
    pub stream_id: String,

    /// Hub-assigned publish path (empty until synchronized)
    pub path: String,

    /// Whether a publish session is running
    pub is_publishing: bool,

    /// Current status
    pub status: SourceStatus,
}

impl Source {
    /// Create a fresh source for a device with the given identity key
    pub fn from_device(id: String, device: &Device) -> Self {
        Self {
            id,
            device_id: device.unique_id.clone(),
            kind: device.kind,
            label: device.label.clone(),
            title: device.label.clone(),
            enabled: true,
            stream_id: String::new(),
            path: String::new(),
            is_publishing: false,
            status: SourceStatus::Ready,
        }
    }

    /// Check if the hub has assigned a stream id
    pub fn is_mapped(&self) -> bool {
        !self.stream_id.is_empty()
    }

    /// Status for a source with no running session
    pub fn idle_status(&self) -> SourceStatus {
        if !self.enabled {
            SourceStatus::Disabled
        } else if self.is_mapped() {
            SourceStatus::WaitingViewer
        } else {
            SourceStatus::Pending
        }
    }

    /// Drop the hub assignment
    pub fn clear_assignment(&mut self) {
        self.stream_id.clear();
        self.path.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cam() -> Source {
        let device = Device::new("uid-1", "Cam1", MediaKind::Video);
        Source::from_device("video-cam1".into(), &device)
    }

    #[test]
    fn test_from_device_defaults() {
        let source = cam();
        assert_eq!(source.title, "Cam1");
        assert!(source.enabled);
        assert!(!source.is_mapped());
        assert_eq!(source.status, SourceStatus::Ready);
    }

    #[test]
    fn test_idle_status() {
        let mut source = cam();
        assert_eq!(source.idle_status(), SourceStatus::Pending);

        source.stream_id = "s1".into();
        assert_eq!(source.idle_status(), SourceStatus::WaitingViewer);

        source.enabled = false;
        assert_eq!(source.idle_status(), SourceStatus::Disabled);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(SourceStatus::WaitingViewer.to_string(), "waiting viewer");
        assert_eq!(SourceStatus::DeviceUnavailable.to_string(), "device unavailable");
        assert_eq!(
            SourceStatus::Failed("connect failed".into()).to_string(),
            "connect failed"
        );
    }

    #[test]
    fn test_kind_order() {
        assert!(MediaKind::Video < MediaKind::Audio);
    }
}
