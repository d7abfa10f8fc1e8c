//! Control channel
//!
//! While the publisher is on, one [`CommandSubscriber`] keeps a streaming
//! subscription to the hub open, dispatches the start/stop commands it
//! delivers, and re-registers the publisher when the channel keeps failing.

mod subscriber;

pub use subscriber::{CommandSubscriber, SubscriberHandle};
