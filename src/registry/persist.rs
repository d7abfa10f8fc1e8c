//! Persisted publisher configuration
//!
//! The publisher saves one snapshot: settings, the generated client id and
//! every source's configuration. Storage is behind [`ConfigStore`] so the
//! embedding application can pick its own backend.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::source::{MediaKind, Source, SourceStatus};

/// Persisted form of a [`Source`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedSource {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
    #[serde(default)]
    pub device_id: String,
    pub title: String,
    pub enabled: bool,
    #[serde(default)]
    pub stream_id: String,
    #[serde(default)]
    pub path: String,
}

impl From<&Source> for PersistedSource {
    fn from(source: &Source) -> Self {
        Self {
            id: source.id.clone(),
            kind: source.kind,
            label: source.label.clone(),
            device_id: source.device_id.clone(),
            title: source.title.clone(),
            enabled: source.enabled,
            stream_id: source.stream_id.clone(),
            path: source.path.clone(),
        }
    }
}

impl From<PersistedSource> for Source {
    fn from(p: PersistedSource) -> Self {
        Self {
            id: p.id,
            device_id: p.device_id,
            kind: p.kind,
            label: p.label,
            title: p.title,
            enabled: p.enabled,
            stream_id: p.stream_id,
            path: p.path,
            is_publishing: false,
            status: SourceStatus::Ready,
        }
    }
}

/// Everything the publisher keeps across restarts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    /// Hub base URL
    pub base_url: String,
    /// Publisher display name sent on registration
    pub display_name: String,
    /// Turn the publisher on after bootstrap
    pub auto_start: bool,
    /// Locally generated id correlating re-registrations
    pub client_id: String,
    /// Configured sources
    pub sources: Vec<PersistedSource>,
}

/// Load/save interface for the persisted snapshot
pub trait ConfigStore: Send + Sync {
    /// Load the last saved snapshot, `None` if nothing was saved yet
    fn load(&self) -> Result<Option<PersistedState>>;

    /// Replace the saved snapshot
    fn save(&self, state: &PersistedState) -> Result<()>;
}

/// JSON file backed store
///
/// Writes go to a sibling temp file first and are renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&data)?))
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<Option<PersistedState>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `state`
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
        }
    }

    /// Last saved snapshot
    pub fn snapshot(&self) -> Option<PersistedState> {
        self.state.lock().ok().and_then(|s| s.clone())
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<Option<PersistedState>> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &PersistedState) -> Result<()> {
        if let Ok(mut slot) = self.state.lock() {
            *slot = Some(state.clone());
        }
        Ok(())
    }
}
