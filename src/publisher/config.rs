//! Publisher configuration

use std::time::Duration;

use crate::error::Result;
use crate::hub::HubClient;

/// Publisher configuration options
///
/// `base_url` and `display_name` are only initial values; once a snapshot
/// has been persisted, the saved settings win.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Initial hub base URL
    pub base_url: String,

    /// Initial display name sent on registration
    pub display_name: String,

    /// Wait between control channel reconnects
    pub reconnect_backoff: Duration,

    /// Consecutive control channel failures before re-registering
    pub recovery_threshold: u32,

    /// Timeout for request/response hub calls
    pub request_timeout: Duration,

    /// User agent for hub calls
    pub user_agent: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            display_name: "Publisher".to_string(),
            reconnect_backoff: Duration::from_secs(1),
            recovery_threshold: 2,
            request_timeout: Duration::from_secs(15),
            user_agent: concat!("hall-publisher/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl PublisherConfig {
    /// Create a config for a hub base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the initial display name
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set the reconnect backoff
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Set the recovery threshold (at least 1)
    pub fn recovery_threshold(mut self, failures: u32) -> Self {
        self.recovery_threshold = failures.max(1);
        self
    }

    /// Set the request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the user agent
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Build an HTTP hub client with these timeouts
    pub fn hub_client(&self) -> Result<HubClient> {
        HubClient::with_options(self.request_timeout, &self.user_agent)
    }
}
