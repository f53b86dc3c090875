//! Scanner module - TCP port scan and protocol-specific probes
//!
//! Every probe returns `Result<_, ProbeError>` at its own boundary. The
//! per-port results of one host are collected as [`ProbeOutcome`]s keyed by
//! port: a missing key means the port was not probed, `Failed` means it was
//! and the probe came back empty.

mod banner;
pub mod database;
pub mod docker;
mod http;
pub mod node_exporter;
pub mod snmp;
pub(crate) mod tcp;

pub use banner::probe_ssh_banner;
pub use database::{DB_CHECKS, DbKind, probe_database, probe_databases};
pub use docker::{merge_ssh_docker, probe_docker};
pub use http::{HttpFingerprint, insecure_client, probe_http, probe_https, url_host};
pub use node_exporter::{parse_node_metrics, scrape_node_exporter};
pub use tcp::{open_ports, scan_ports, tcp_check, tcp_latency_ms};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::ProbeError;
use crate::models::DbProbeResult;

/// Ports answered with an SSH banner read
pub const SSH_BANNER_PORTS: &[u16] = &[22];
/// Ports fingerprinted with a plain `GET /`
pub const HTTP_PORTS: &[u16] = &[80, 8080, 3000, 5000];
/// Ports fingerprinted over TLS with a body snippet
pub const HTTPS_PORTS: &[u16] = &[443, 9443, 9440, 5480];

/// Protocol payload of a successful per-port probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum PortProbe {
    Ssh { banner: String },
    Http(HttpFingerprint),
    Https(HttpFingerprint),
    Database(DbProbeResult),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ProbeOutcome {
    Verified(PortProbe),
    Failed { reason: String },
}

impl ProbeOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, ProbeOutcome::Verified(_))
    }

    pub fn probe(&self) -> Option<&PortProbe> {
        match self {
            ProbeOutcome::Verified(probe) => Some(probe),
            ProbeOutcome::Failed { .. } => None,
        }
    }

    fn from_result(result: Result<PortProbe, ProbeError>) -> Self {
        match result {
            Ok(probe) => ProbeOutcome::Verified(probe),
            Err(e) => ProbeOutcome::Failed { reason: e.to_string() },
        }
    }
}

/// Per-port probe outcomes of one host
pub type HostProbes = BTreeMap<u16, ProbeOutcome>;

/// Runs the protocol probe that applies to `port`, if any.
pub async fn probe_port(ip: IpAddr, port: u16, limit: Duration) -> Option<ProbeOutcome> {
    let outcome = if SSH_BANNER_PORTS.contains(&port) {
        ProbeOutcome::from_result(
            probe_ssh_banner(ip, port, limit)
                .await
                .map(|banner| PortProbe::Ssh { banner }),
        )
    } else if HTTP_PORTS.contains(&port) {
        ProbeOutcome::from_result(probe_http(ip, port, limit).await.map(PortProbe::Http))
    } else if HTTPS_PORTS.contains(&port) {
        ProbeOutcome::from_result(probe_https(ip, port, limit).await.map(PortProbe::Https))
    } else if let Some(kind) = DbKind::for_port(port) {
        let result = probe_database(kind, ip, port, limit).await;
        if result.reachable {
            ProbeOutcome::Verified(PortProbe::Database(result))
        } else {
            ProbeOutcome::Failed {
                reason: result.error.unwrap_or_else(|| "unreachable".to_string()),
            }
        }
    } else {
        return None;
    };
    Some(outcome)
}

/// Probes every open port of one host in sequence.
pub async fn probe_open_ports(ip: IpAddr, open: &[u16], limit: Duration) -> HostProbes {
    let mut probes = HostProbes::new();
    for &port in open {
        if let Some(outcome) = probe_port(ip, port, limit).await {
            crate::log_debug!(
                "{}:{} probe {}",
                ip,
                port,
                if outcome.is_verified() { "verified" } else { "failed" }
            );
            probes.insert(port, outcome);
        }
    }
    probes
}
