//! Transport session interface
//!
//! The media transport (WHIP over WebRTC in practice) is provided by the
//! embedding application. A session is built for a target URL, connected
//! with a disconnect callback, watched for readiness and closed on teardown.

pub mod url;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;

pub use self::url::{hub_endpoint, publish_url};

/// Direction of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// Push local media to the remote end
    Publish,
}

/// Readiness of a transport session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Negotiation in progress
    Connecting,
    /// Media is flowing
    Open,
    /// Session ended
    Closed,
}

/// Invoked once when an established session drops
pub type DisconnectCallback = Box<dyn FnOnce() + Send + 'static>;

/// A connectable, closable media transport session
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Connect to the target
    ///
    /// `on_disconnect` is called if the session drops after connecting.
    async fn connect(&self, on_disconnect: DisconnectCallback) -> Result<()>;

    /// Readiness updates, starting from the current state
    fn ready_state(&self) -> watch::Receiver<ReadyState>;

    /// Close the session
    async fn close(&self);
}

/// Builds transport sessions
pub trait TransportFactory: Send + Sync {
    /// Build a session for `target`
    fn build(&self, target: &::url::Url, mode: TransportMode) -> Result<Arc<dyn TransportSession>>;
}
