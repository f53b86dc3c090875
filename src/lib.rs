//! netinv core engine: host discovery, classification and metrics sampling
//!
//! This crate provides:
//! - Target expansion (CIDR, address ranges, host lists)
//! - Bounded-concurrency TCP port scanning
//! - Protocol probes (SSH banner, HTTP/HTTPS, Docker Engine API, node
//!   exporter, database handshakes, SNMP)
//! - Credentialed enrichment over SSH and WinRM
//! - OS, virtualization and service classification
//! - Counter-to-rate metrics derivation
//! - SQLite persistence for devices, metric samples and audit events

pub mod app;
pub mod classifier;
mod cli;
pub mod cli_adapter;
pub mod command;
mod command_handlers;
pub mod config;
pub mod database;
pub mod discovery;
pub mod enrich;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod network;
pub mod ratelimit;
pub mod scanner;

pub use app::{
    AppCommandResult, AppContext, AppEvent, EventHook, OutputHook, execute_command,
    execute_command_typed, execute_command_with_context, run, run_with_context, run_with_ctrl_c,
};
pub use classifier::{compose_os_label, guess_os_from_ports, guess_virtualization};
pub use command::{AppCommand, SnmpOptions};
pub use database::{Database, HostSink};
pub use discovery::{DiscoveryOptions, discover, host_info, probe_docker_host};
pub use enrich::{DeviceCommandRequest, SshCredentials, WinrmCredentials, run_device_command};
pub use error::{ConfigError, ProbeError};
pub use metrics::{MemorySampleStore, MetricsReport, SampleStore, record_scrape, sample_metrics};
pub use models::*;
pub use network::{ScanMethod, TargetSpec};
pub use ratelimit::{RateLimitExceeded, RateLimitedAction, RateLimiter};
pub use scanner::{probe_databases, scan_ports};

// Re-export logging macros for use across crate
pub use crate::logging::macros;
