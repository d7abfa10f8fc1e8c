//! Capture device provider interface
//!
//! Enumerating physical devices and feeding encoded media into a transport
//! are platform concerns. The publisher only needs these seams.

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::{identity_key, MediaKind, Source};
use crate::transport::TransportSession;

/// A physical capture device as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Platform unique id (not stable across OS versions)
    pub unique_id: String,
    /// Human readable label
    pub label: String,
    /// Video or audio
    pub kind: MediaKind,
}

impl Device {
    /// Create a device description
    pub fn new(unique_id: impl Into<String>, label: impl Into<String>, kind: MediaKind) -> Self {
        Self {
            unique_id: unique_id.into(),
            label: label.into(),
            kind,
        }
    }
}

/// A device attached to a transport session
///
/// Teardown calls `detach` then `stop`, after the transport is closed.
pub trait CaptureAttachment: Send + Sync {
    /// Begin running the capture pipeline
    fn start(&mut self) -> Result<()>;

    /// Disconnect the device from the transport
    fn detach(&mut self);

    /// Stop the capture pipeline
    fn stop(&mut self);
}

/// Platform capture device access
#[async_trait]
pub trait CaptureDeviceProvider: Send + Sync {
    /// Ask the platform for capture permission
    async fn request_access(&self, kind: MediaKind) -> bool;

    /// List the devices of one kind currently present
    fn enumerate(&self, kind: MediaKind) -> Vec<Device>;

    /// Attach a device to a transport session
    fn attach(
        &self,
        device: &Device,
        session: &dyn TransportSession,
    ) -> Result<Box<dyn CaptureAttachment>>;
}

/// Enumerate every kind, video first
pub fn enumerate_all(provider: &dyn CaptureDeviceProvider) -> Vec<Device> {
    MediaKind::ALL
        .iter()
        .flat_map(|kind| provider.enumerate(*kind))
        .collect()
}

/// Find the live device backing a source
///
/// Matches on the provider unique id first, then on the identity key of the
/// label, since unique ids are not stable across platform updates.
pub fn resolve_device(provider: &dyn CaptureDeviceProvider, source: &Source) -> Option<Device> {
    let devices = provider.enumerate(source.kind);

    if let Some(device) = devices
        .iter()
        .find(|d| !source.device_id.is_empty() && d.unique_id == source.device_id)
    {
        return Some(device.clone());
    }

    // Suffixed keys (duplicate labels) only match by unique id
    devices
        .into_iter()
        .find(|d| identity_key(d.kind, &d.label) == source.id)
}
