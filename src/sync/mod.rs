//! Stream synchronization
//!
//! Reconciles the locally declared stream set with the hub. The guard keeps
//! one call in flight; [`Publisher::request_sync`](crate::Publisher::request_sync)
//! drives it and applies the mapping.

pub mod guard;

pub use guard::{Admission, SyncGuard, SyncTicket};
