//! Command subscriber loop
//!
//! One attempt is `connecting -> streaming -> (closed | error)`. Every end
//! of an attempt counts as a failure; the counter resets on a successful
//! connect. Once it reaches the recovery threshold the publisher registers
//! again and re-synchronizes before the next attempt.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::hub::{CommandStream, HubApi};
use crate::publisher::{Publisher, WeakPublisher};
use crate::stats::PublisherStats;

/// Handle to a running command subscriber
#[derive(Debug)]
pub struct SubscriberHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriberHandle {
    /// Ask the loop to stop without waiting for it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the loop and wait until it has released its connection
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::warn!(error = %e, "Command subscriber panicked");
            }
        }
    }
}

/// Long-lived control channel reader for one publisher generation
pub struct CommandSubscriber {
    publisher: WeakPublisher,
    generation: u64,
    backoff: Duration,
    threshold: u32,
    failures: u32,
    cancel: CancellationToken,
}

impl CommandSubscriber {
    /// Spawn a subscriber for `generation` of `publisher`
    pub(crate) fn spawn(publisher: &Publisher, generation: u64) -> SubscriberHandle {
        let cancel = CancellationToken::new();
        let config = publisher.config();

        let subscriber = Self {
            publisher: publisher.downgrade(),
            generation,
            backoff: config.reconnect_backoff,
            threshold: config.recovery_threshold.max(1),
            failures: 0,
            cancel: cancel.clone(),
        };

        SubscriberHandle {
            cancel,
            task: tokio::spawn(subscriber.run()),
        }
    }

    async fn run(mut self) {
        tracing::info!(generation = self.generation, "Command subscriber started");

        while !self.cancel.is_cancelled() {
            if !self.attempt().await {
                break;
            }
            if !self.on_failure().await {
                break;
            }
        }

        tracing::info!(generation = self.generation, "Command subscriber stopped");
    }

    /// Connect and stream commands until the channel ends. Returns false
    /// when the subscriber should exit.
    async fn attempt(&mut self) -> bool {
        let Some((hub, base_url, token)) = self.target().await else {
            return false;
        };
        if !self.set_status("connecting").await {
            return false;
        }

        let result = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            result = hub.subscribe_control(&base_url, &token) => result,
        };
        drop(hub);

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "Control channel connect failed");
                return true;
            }
        };

        self.failures = 0;
        self.with_stats(|stats| stats.set_control_failures(0));
        if !self.set_status("connected").await {
            return false;
        }
        tracing::info!(generation = self.generation, "Control channel connected");

        self.read_commands(stream).await
    }

    async fn read_commands(&self, mut stream: CommandStream) -> bool {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return false,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(command)) => {
                    let Some(publisher) = self.publisher.upgrade() else {
                        return false;
                    };
                    if !publisher.dispatch(self.generation, command).await {
                        return false;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Control channel read failed");
                    return true;
                }
                None => {
                    tracing::info!("Control channel closed by hub");
                    return true;
                }
            }
        }
    }

    /// Count a failure, back off and recover if the threshold is reached.
    /// Returns false when the subscriber should exit.
    async fn on_failure(&mut self) -> bool {
        self.failures += 1;
        let failures = self.failures;
        self.with_stats(|stats| {
            stats.control_reconnect();
            stats.set_control_failures(failures);
        });

        if !self.set_status("reconnecting").await {
            return false;
        }
        tracing::debug!(
            failures = failures,
            backoff_ms = self.backoff.as_millis() as u64,
            "Control channel reconnecting"
        );

        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(self.backoff) => {}
        }

        if self.failures >= self.threshold {
            return self.recover().await;
        }
        true
    }

    /// Register again under a new token and re-declare the streams
    async fn recover(&mut self) -> bool {
        let Some(publisher) = self.publisher.upgrade() else {
            return false;
        };
        let Some((base_url, display_name, client_id)) =
            publisher.registration_params(self.generation).await
        else {
            return false;
        };
        let hub = publisher.hub();
        drop(publisher);

        tracing::info!(failures = self.failures, "Control channel failing, re-registering");
        let result = tokio::select! {
            _ = self.cancel.cancelled() => return false,
            result = hub.register(&base_url, &display_name, &client_id) => result,
        };

        let identity = match result {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(error = %e, "Recovery registration failed");
                return self.set_status(format!("recovery failed: {e}")).await;
            }
        };

        let Some(publisher) = self.publisher.upgrade() else {
            return false;
        };
        if !publisher.replace_identity(self.generation, identity).await {
            return false;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = publisher.request_sync() => {}
        }

        self.failures = 0;
        let stats = publisher.stats_handle();
        stats.recovery();
        stats.set_control_failures(0);
        true
    }

    async fn target(&self) -> Option<(Arc<dyn HubApi>, String, String)> {
        let publisher = self.publisher.upgrade()?;
        let (base_url, token) = publisher.control_target(self.generation).await?;
        Some((publisher.hub(), base_url, token))
    }

    async fn set_status(&self, status: impl Into<String>) -> bool {
        match self.publisher.upgrade() {
            Some(publisher) => publisher.set_status_for(self.generation, status).await,
            None => false,
        }
    }

    fn with_stats(&self, f: impl FnOnce(&PublisherStats)) {
        if let Some(publisher) = self.publisher.upgrade() {
            f(publisher.stats_handle());
        }
    }
}
