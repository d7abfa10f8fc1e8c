//! Hub wire messages
//!
//! JSON bodies of the hub's request/response endpoints.

use serde::{Deserialize, Serialize};

use crate::registry::MediaKind;

/// `POST /register` body
#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub display_name: &'a str,
    pub client_id: &'a str,
}

/// `POST /register` response
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegisterResponse {
    pub publisher_id: String,
    pub token: String,
}

/// One stream the publisher offers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredStream {
    /// Source identity key
    pub name: String,
    pub title: String,
    pub media: MediaKind,
    pub enabled: bool,
}

/// `POST /streams` body
#[derive(Debug, Serialize)]
pub struct SyncRequest<'a> {
    pub token: &'a str,
    pub streams: &'a [DeclaredStream],
}

/// A stream as mapped by the hub
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStream {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: String,
}

/// `POST /streams` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncResponse {
    #[serde(default)]
    pub streams: Vec<RemoteStream>,
}

/// Publish state reported to the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Starting,
    Live,
    Idle,
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StreamState::Starting => "starting",
            StreamState::Live => "live",
            StreamState::Idle => "idle",
        };
        f.write_str(s)
    }
}

/// `POST /state` body
#[derive(Debug, Serialize)]
pub struct StateReport<'a> {
    pub token: &'a str,
    pub stream_id: &'a str,
    pub state: StreamState,
}

/// `POST /unregister` body
#[derive(Debug, Serialize)]
pub struct UnregisterRequest<'a> {
    pub token: &'a str,
    pub client_id: &'a str,
}
