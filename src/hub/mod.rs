//! Hub client
//!
//! The hub is the remote service that registers publishers, maps declared
//! streams to ids and paths, and pushes start/stop commands.
//!
//! - [`HubApi`] - the request/response and control-stream seam
//! - [`HubClient`] - the HTTP implementation
//! - [`control`] - control-stream line codec

pub mod client;
pub mod control;
pub mod message;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;

pub use client::HubClient;
pub use control::{ControlCommand, ControlDecoder};
pub use message::{DeclaredStream, RemoteStream, StreamState};

/// Lazily decoded commands from one control connection
///
/// The stream ends when the hub closes the connection; an `Err` item means
/// the connection failed and no further items follow.
pub type CommandStream = BoxStream<'static, Result<ControlCommand>>;

/// Identity issued by the hub on registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublisherIdentity {
    /// Hub-side publisher id
    pub publisher_id: String,
    /// Opaque bearer token attached to every authenticated call
    pub token: String,
}

/// Calls the publisher makes against the hub
///
/// Every method takes the hub base URL, since the user can change it while
/// the client lives on.
#[async_trait]
pub trait HubApi: Send + Sync {
    /// Register the publisher, minting a new identity
    async fn register(
        &self,
        base_url: &str,
        display_name: &str,
        client_id: &str,
    ) -> Result<PublisherIdentity>;

    /// Release the identity
    async fn unregister(&self, base_url: &str, token: &str, client_id: &str) -> Result<()>;

    /// Report a stream's publish state
    async fn report_stream_state(
        &self,
        base_url: &str,
        token: &str,
        stream_id: &str,
        state: StreamState,
    ) -> Result<()>;

    /// Declare the stream set, returning the hub's mapping
    async fn sync_streams(
        &self,
        base_url: &str,
        token: &str,
        streams: &[DeclaredStream],
    ) -> Result<Vec<RemoteStream>>;

    /// Open the control stream for `token`
    async fn subscribe_control(&self, base_url: &str, token: &str) -> Result<CommandStream>;
}
