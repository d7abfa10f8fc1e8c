//! Publisher state
//!
//! Everything mutable about a publisher lives in [`PublisherState`], behind
//! the publisher's single state lock.

use std::collections::HashMap;

use crate::control::SubscriberHandle;
use crate::hub::PublisherIdentity;
use crate::registry::{PersistedState, Source, SourceRegistry, SourceStatus};
use crate::session::ActiveSession;

use super::config::PublisherConfig;

/// Serialized publisher state
pub(crate) struct PublisherState {
    pub base_url: String,
    pub display_name: String,
    pub auto_start: bool,
    pub client_id: String,

    /// Publisher toggled on
    pub active: bool,
    /// Publisher-level status line
    pub status: String,
    /// Current hub identity (set while active)
    pub identity: Option<PublisherIdentity>,
    /// Bumped on every toggle; background tasks of an older generation stop
    pub generation: u64,

    pub sources: SourceRegistry,
    /// Hub stream id to source id
    pub stream_map: HashMap<String, String>,
    /// Live sessions by hub stream id
    pub sessions: HashMap<String, ActiveSession>,
    pub subscriber: Option<SubscriberHandle>,
}

impl PublisherState {
    pub fn new(config: &PublisherConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            display_name: config.display_name.clone(),
            auto_start: false,
            client_id: String::new(),
            active: false,
            status: "stopped".to_string(),
            identity: None,
            generation: 0,
            sources: SourceRegistry::new(),
            stream_map: HashMap::new(),
            sessions: HashMap::new(),
            subscriber: None,
        }
    }

    /// Check if background work of `generation` may still act
    pub fn is_current(&self, generation: u64) -> bool {
        self.active && self.generation == generation
    }

    /// Token of the current identity
    pub fn token(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.token.as_str())
    }

    /// Status for a source with no session, given the publisher state
    pub fn rest_status(&self, source: &Source) -> SourceStatus {
        rest_status(self.active, source)
    }

    /// Re-derive the status of every source without a session
    pub fn refresh_idle_statuses(&mut self) {
        let active = self.active;
        for source in self.sources.sources_mut() {
            if source.is_publishing {
                continue;
            }
            source.status = rest_status(active, source);
        }
    }

    pub fn rebuild_stream_map(&mut self) {
        self.stream_map = self.sources.stream_map();
    }

    pub fn persisted(&self) -> PersistedState {
        PersistedState {
            base_url: self.base_url.clone(),
            display_name: self.display_name.clone(),
            auto_start: self.auto_start,
            client_id: self.client_id.clone(),
            sources: self.sources.to_persisted(),
        }
    }

    pub fn snapshot(&self) -> PublisherSnapshot {
        PublisherSnapshot {
            base_url: self.base_url.clone(),
            display_name: self.display_name.clone(),
            auto_start: self.auto_start,
            active: self.active,
            status: self.status.clone(),
            sources: self.sources.sources().to_vec(),
            summary: self.sources.summary(),
        }
    }
}

fn rest_status(active: bool, source: &Source) -> SourceStatus {
    if active {
        source.idle_status()
    } else if !source.enabled {
        SourceStatus::Disabled
    } else {
        SourceStatus::Ready
    }
}

/// Observable view of the publisher for a UI or CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherSnapshot {
    /// Hub base URL
    pub base_url: String,
    /// Display name sent on registration
    pub display_name: String,
    /// Start the publisher after bootstrap
    pub auto_start: bool,
    /// Publisher toggled on
    pub active: bool,
    /// Publisher-level status line
    pub status: String,
    /// Sources in display order
    pub sources: Vec<Source>,
    /// `"<live> live / <total> total"`
    pub summary: String,
}

impl PublisherSnapshot {
    /// Look up a source by identity key
    pub fn source(&self, id: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.id == id)
    }
}
