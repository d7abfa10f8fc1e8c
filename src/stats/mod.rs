//! Statistics for the publisher

pub mod metrics;

pub use metrics::{PublisherStats, StatsSnapshot};
