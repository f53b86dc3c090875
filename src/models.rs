//! Data models produced by the discovery engine
//!
//! Field names follow the JSON shape consumed by the persistence and HTTP
//! layers (`open_ports`, `services_detailed`, `linux_ports`, ...).

use serde::{Deserialize, Serialize};

/// Host liveness derived from the port scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HostStatus {
    Online,
    Offline,
}

impl HostStatus {
    pub fn from_open_ports(open_ports: &[u16]) -> Self {
        if open_ports.is_empty() {
            HostStatus::Offline
        } else {
            HostStatus::Online
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Online => "Online",
            HostStatus::Offline => "Offline",
        }
    }
}

/// Service label bound to one port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub service: String,
    pub port: u16,
}

/// Service label plus the outcome of its lightweight verification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDetail {
    pub service: String,
    pub port: u16,
    pub verified: bool,
    pub detail: Option<String>,
}

/// Parsed node exporter scrape
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeExporterInfo {
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_total_bytes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_available_bytes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mem_used_percent: Option<f64>,
    /// Cumulative idle CPU seconds across every core
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_idle_seconds: Option<f64>,
    /// Cumulative CPU seconds across every core and mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_total_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_rx_bytes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_tx_bytes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_size_bytes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_avail_bytes: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fs_used_percent: Option<f64>,
    /// Raw `node_uname_info` sample line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uname: Option<String>,
    /// OS string derived from the uname labels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
}

/// `GET /version` of the Docker Engine API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DockerVersion {
    pub version: Option<String>,
    pub api_version: Option<String>,
    pub os: Option<String>,
    pub arch: Option<String>,
    pub kernel_version: Option<String>,
}

/// `GET /info` of the Docker Engine API (subset)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DockerDaemonInfo {
    pub name: Option<String>,
    pub server_version: Option<String>,
    pub operating_system: Option<String>,
    #[serde(rename = "OSType")]
    pub os_type: Option<String>,
    pub kernel_version: Option<String>,
    pub architecture: Option<String>,
    pub containers: Option<u64>,
    pub containers_running: Option<u64>,
    pub images: Option<u64>,
    #[serde(rename = "NCPU")]
    pub ncpu: Option<u64>,
    pub mem_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: String,
}

impl ContainerPort {
    /// Port a client would connect to: the published one when present
    pub fn effective_port(&self) -> u16 {
        self.public_port.unwrap_or(self.private_port)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub name: Option<String>,
    pub image: Option<String>,
    pub state: Option<String>,
    pub status: Option<String>,
    pub running: bool,
    pub ports: Vec<ContainerPort>,
    /// `service:port` labels for every exposed port
    pub services: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_tail: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComposeProject {
    pub name: Option<String>,
    pub status: Option<String>,
    pub created: Option<String>,
    /// Text output when the CLI could not emit JSON
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DockerSource {
    Api,
    Ssh,
}

/// Aggregated Docker evidence for one host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerInfo {
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DockerSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<DockerVersion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<DockerDaemonInfo>,
    #[serde(default)]
    pub containers: Vec<ContainerSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub compose_projects: Vec<ComposeProject>,
    /// Engine metrics endpoint answered
    #[serde(default)]
    pub metrics_present: bool,
    /// A container UI answered on the alternate management port
    #[serde(default)]
    pub hint_portainer: bool,
    /// Presence was confirmed over SSH
    #[serde(default)]
    pub hint_ssh: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DockerInfo {
    /// Daemon-reported OS, only when the daemon itself was reached
    pub fn daemon_os(&self) -> Option<&str> {
        if !self.present {
            return None;
        }
        self.info
            .as_ref()
            .and_then(|info| info.operating_system.as_deref())
            .filter(|os| !os.trim().is_empty())
    }
}

/// Database wire-handshake result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbProbeResult {
    pub name: String,
    pub port: u16,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_supported: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pong: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amqp_ready: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One row of `ss -tulnp`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListeningSocket {
    pub protocol: String,
    pub state: String,
    pub local_address: String,
    pub local_port: u16,
    pub process: Option<String>,
    pub service: String,
}

/// One TCP listener reported over WinRM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsListener {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub process: Option<String>,
    pub path: Option<String>,
    pub service: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowsOsInfo {
    pub caption: Option<String>,
    pub version: Option<String>,
    pub build_number: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnrichmentKind {
    Ssh,
    Winrm,
}

/// Outcome of a credentialed enrichment step that was attempted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentReport {
    pub kind: EnrichmentKind,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Inventory record for one discovered host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub ip: String,
    pub hostname: String,
    pub status: HostStatus,
    pub open_ports: Vec<u16>,
    pub services: Vec<ServiceEntry>,
    pub services_detailed: Vec<ServiceDetail>,
    pub os: String,
    pub virtualization: Option<String>,
    pub node_exporter: NodeExporterInfo,
    pub docker: DockerInfo,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub databases: Vec<DbProbeResult>,
    pub linux_ports: Option<Vec<ListeningSocket>>,
    pub windows_ports: Option<Vec<WindowsListener>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub windows_os: Option<WindowsOsInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enrichment: Vec<EnrichmentReport>,
    pub timestamp: String,
}

impl HostRecord {
    /// Canonical minimal constructor to avoid field drift across call-sites.
    pub fn new(ip: String, hostname: String) -> Self {
        Self {
            ip,
            hostname,
            status: HostStatus::Offline,
            open_ports: Vec::new(),
            services: Vec::new(),
            services_detailed: Vec::new(),
            os: "Unknown".to_string(),
            virtualization: None,
            node_exporter: NodeExporterInfo::default(),
            docker: DockerInfo::default(),
            databases: Vec::new(),
            linux_ports: None,
            windows_ports: None,
            windows_os: None,
            enrichment: Vec::new(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == HostStatus::Online
    }
}

/// Result envelope of a discovery run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub method: String,
    pub discovered_devices: Vec<HostRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpInterface {
    pub index: u32,
    pub description: Option<String>,
    pub speed_bps: Option<u64>,
    /// ifOperStatus: 1 up, 2 down, 3 testing, ...
    pub oper_status: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpStorage {
    pub index: u32,
    pub description: Option<String>,
    pub total_bytes: u64,
    pub used_bytes: u64,
    /// Null when the reported size is zero
    pub used_percent: Option<f64>,
}

/// SNMP-derived host summary. Every field is optional: absence means the
/// agent returned nothing for that MIB branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnmpHostInfo {
    pub target: String,
    pub version: String,
    pub sys_descr: Option<String>,
    pub sys_name: Option<String>,
    /// Hundredths of a second since the agent started
    pub sys_uptime_ticks: Option<u64>,
    pub memory_kb: Option<u64>,
    pub cpu_load_avg: Option<f64>,
    pub interfaces: Vec<SnmpInterface>,
    pub storage: Vec<SnmpStorage>,
    pub processes_total: Option<u64>,
    pub processes_running: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NeighborProtocol {
    #[serde(rename = "LLDP")]
    Lldp,
    #[serde(rename = "CDP")]
    Cdp,
}

/// LLDP/CDP neighbor learned from a device's tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpNeighbor {
    pub local_if: Option<String>,
    pub remote_hostname: String,
    pub remote_port: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_platform: Option<String>,
    pub protocol: NeighborProtocol,
}
