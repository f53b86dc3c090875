//! Database module for device inventory, metric samples and audit events
//!
//! Provides SQLite storage behind the [`HostSink`] and
//! [`SampleStore`](crate::metrics::SampleStore) seams used by discovery and
//! the metrics engine.

pub mod connection;
pub mod models;
pub mod queries;
pub mod schema;

pub use connection::Database;
pub use models::*;
pub use queries::*;

use crate::models::HostRecord;

/// Destination of completed host records. Failures are the sink's
/// problem: discovery logs them and carries on.
pub trait HostSink: Send + Sync {
    fn save_host(&self, host: &HostRecord) -> anyhow::Result<()>;
}
