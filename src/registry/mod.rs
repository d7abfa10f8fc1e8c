//! Local source registry
//!
//! The registry tracks every capture input the device can offer, merged with
//! the user's prior configuration by a stable identity key.
//!
//! ```text
//!   enumerate(video) ─┐
//!                     ├─► merge by identity_key ─► sort ─► SourceRegistry
//!   enumerate(audio) ─┘          ▲                              │
//!                                │                              ▼
//!                      prior enabled / title /            ConfigStore::save
//!                      stream id / path
//! ```
//!
//! Stream ids are only ever assigned by the hub; the registry records them.

pub mod key;
pub mod persist;
pub mod source;
pub mod store;

pub use key::{identity_key, normalize_label, slugify};
pub use persist::{ConfigStore, JsonFileStore, MemoryStore, PersistedSource, PersistedState};
pub use source::{MediaKind, Source, SourceStatus};
pub use store::SourceRegistry;
