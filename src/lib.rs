//! Control plane for a multi-stream WHIP publisher
//!
//! A device offers several capture sources (cameras, microphones). Each one is
//! declared to a hub as a named stream; the hub assigns stream ids and pushes
//! start/stop commands over a long-lived control channel. This crate keeps the
//! local source table, the hub's view and the live transport sessions in step.
//!
//! ```text
//!   SourceRegistry ──► request_sync ──► HubApi::sync_streams
//!                                              │ ids / paths
//!   CommandSubscriber ◄── /control ◄───────────┘
//!          │ start / stop
//!          ▼
//!   Publisher (serialized owner) ──► TransportSession + CaptureAttachment
//! ```
//!
//! Media capture and the transport itself are external collaborators, modelled
//! by the [`capture`] and [`transport`] traits.

pub mod capture;
pub mod control;
pub mod error;
pub mod hub;
pub mod publisher;
pub mod registry;
pub mod session;
pub mod stats;
pub mod sync;
pub mod transport;

pub use error::{Error, Result};
pub use publisher::{Publisher, PublisherConfig, PublisherSnapshot};
pub use registry::{MediaKind, Source, SourceStatus};
