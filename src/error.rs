//! Error types for probe boundaries and request validation
//!
//! `ProbeError` never leaves a probe pipeline: the orchestrator turns it into
//! an absent or negative field. `ConfigError` is the one class that is
//! reported straight back to the caller, before any network traffic.

use std::future::Future;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single best-effort network probe
#[derive(Error, Debug)]
pub enum ProbeError {
    /// TCP connect refused, reset or unroutable
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Operation exceeded its time budget
    #[error("{operation} timed out after {timeout_ms} ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response arrived but could not be understood
    #[error("decode error: {0}")]
    Decode(String),

    /// Remote side rejected the supplied credentials
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("SNMP error: {0}")]
    Snmp(String),

    /// Remote answered with something other than the expected protocol
    #[error("unexpected response: {0}")]
    Unexpected(String),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<serde_json::Error> for ProbeError {
    fn from(err: serde_json::Error) -> Self {
        ProbeError::Decode(err.to_string())
    }
}

impl ProbeError {
    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        ProbeError::Timeout {
            operation: operation.into(),
            timeout_ms: limit.as_millis() as u64,
        }
    }
}

/// Rejected request parameters. Raised before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("device type '{0}' is not supported")]
    InvalidDeviceType(String),

    #[error("invalid SNMPv3 parameters: {}", .0.join("; "))]
    InvalidSnmpV3(Vec<String>),

    #[error("invalid SNMP value for type {kind}: {reason}")]
    InvalidSnmpValue { kind: String, reason: String },

    #[error("unknown {field} '{value}'")]
    UnknownVariant { field: &'static str, value: String },
}

/// Runs `fut` under `limit`, mapping an elapsed timer into `ProbeError::Timeout`.
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::timeout(operation, limit)),
    }
}
