//! Publish session management
//!
//! One [`ActiveSession`] exists per hub stream id while it is being
//! published. The session map itself lives in the publisher's serialized
//! state; start/stop logic is on [`Publisher`](crate::Publisher).

pub mod state;

pub use state::{ActiveSession, SessionPhase, SessionResources};
