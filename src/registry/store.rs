//! Source registry implementation
//!
//! Holds the ordered list of configured sources. The registry is plain data:
//! it is owned by the publisher's serialized state and never locked on its own.

use std::collections::{HashMap, HashSet};

use crate::capture::Device;
use crate::hub::DeclaredStream;

use super::key::identity_key;
use super::persist::PersistedSource;
use super::source::{Source, SourceStatus};

/// Ordered table of configured sources
#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry from previously persisted sources
    pub fn from_persisted(sources: Vec<PersistedSource>) -> Self {
        let mut registry = Self {
            sources: sources.into_iter().map(Source::from).collect(),
        };
        registry.sort();
        registry
    }

    /// Snapshot of the sources for persistence
    pub fn to_persisted(&self) -> Vec<PersistedSource> {
        self.sources.iter().map(PersistedSource::from).collect()
    }

    /// All sources in display order
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Mutable access to every source
    pub fn sources_mut(&mut self) -> impl Iterator<Item = &mut Source> {
        self.sources.iter_mut()
    }

    /// Get a source by identity key
    pub fn get(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Get a mutable source by identity key
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Source> {
        self.sources.iter_mut().find(|s| s.id == id)
    }

    /// Total number of sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if there are no sources
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Replace the table with freshly enumerated devices
    ///
    /// Prior `enabled`, `title`, stream id and path are carried over by
    /// identity key. Sources whose device is gone are dropped. Devices that
    /// share a key get the lowest free `-2`, `-3`, ... suffix in enumeration
    /// order; a suffix never takes a key some device owns by its label.
    pub fn merge(&mut self, devices: &[Device]) {
        let keys: Vec<String> = devices
            .iter()
            .map(|d| identity_key(d.kind, &d.label))
            .collect();
        let labelled: HashSet<&str> = keys.iter().map(String::as_str).collect();
        let mut taken: HashSet<String> = HashSet::new();
        let mut merged = Vec::with_capacity(devices.len());

        for (device, base) in devices.iter().zip(&keys) {
            let id = if taken.contains(base) {
                (2..)
                    .map(|n| format!("{base}-{n}"))
                    .find(|key| !taken.contains(key) && !labelled.contains(key.as_str()))
                    .unwrap_or_else(|| base.clone())
            } else {
                base.clone()
            };
            taken.insert(id.clone());

            let mut source = Source::from_device(id, device);
            if let Some(prior) = self.get(&source.id) {
                source.title = prior.title.clone();
                source.enabled = prior.enabled;
                source.stream_id = prior.stream_id.clone();
                source.path = prior.path.clone();
            }
            merged.push(source);
        }

        let dropped = self
            .sources
            .iter()
            .filter(|old| !merged.iter().any(|s| s.id == old.id))
            .count();

        tracing::debug!(
            sources = merged.len(),
            dropped = dropped,
            "Source registry merged"
        );

        self.sources = merged;
        self.sort();
    }

    /// Streams to declare to the hub: every enabled source
    pub fn declared_streams(&self) -> Vec<DeclaredStream> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| DeclaredStream {
                name: s.id.clone(),
                title: s.title.clone(),
                media: s.kind,
                enabled: true,
            })
            .collect()
    }

    /// Map of hub stream id to source id
    pub fn stream_map(&self) -> HashMap<String, String> {
        self.sources
            .iter()
            .filter(|s| s.is_mapped())
            .map(|s| (s.stream_id.clone(), s.id.clone()))
            .collect()
    }

    /// Set every source to not publishing with the given status
    pub fn reset_all(&mut self, status: SourceStatus) {
        for source in &mut self.sources {
            source.is_publishing = false;
            source.status = status.clone();
        }
    }

    /// Number of sources with a running session
    pub fn publishing_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_publishing).count()
    }

    /// Summary line, e.g. `"1 live / 3 total"`
    pub fn summary(&self) -> String {
        format!("{} live / {} total", self.publishing_count(), self.len())
    }

    fn sort(&mut self) {
        self.sources.sort_by(|a, b| {
            a.kind
                .cmp(&b.kind)
                .then_with(|| a.label.to_lowercase().cmp(&b.label.to_lowercase()))
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}
