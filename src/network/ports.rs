//! Static port and service tables
//!
//! These tables decide service labels for every discovered port and the
//! port sets each scan method probes. They must stay in sync with what
//! downstream consumers expect to see in stored device records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Well-known port to service label map
pub const SERVICE_PORTS: &[(u16, &str)] = &[
    (22, "ssh"),
    (80, "http"),
    (443, "https"),
    (8080, "http-alt"),
    (3000, "grafana-or-app"),
    (5000, "app-or-registry"),
    (5432, "postgresql"),
    (5433, "postgresql"),
    (6379, "redis"),
    (27017, "mongodb"),
    (3306, "mysql"),
    (5672, "rabbitmq"),
    (15672, "rabbitmq-admin"),
    (9090, "prometheus"),
    (9091, "prometheus-pushgateway"),
    (9093, "alertmanager"),
    (9094, "alertmanager-alt"),
    (9100, "node-exporter"),
    (9200, "elasticsearch"),
    (5601, "kibana"),
    (8000, "app"),
    (8022, "ssh-alt"),
    (2375, "docker-api"),
    (2376, "docker-api-tls"),
    (9323, "docker-engine-metrics"),
    (902, "vmware-vim"),
    (903, "vmware-console"),
    (9440, "nutanix-prism"),
    (9443, "vcenter-client"),
    (5480, "vcenter-vami"),
    (5985, "winrm"),
    (5986, "winrm-ssl"),
];

/// Ports probed by the default `tcp` method
pub const COMMON_PORTS: &[u16] = &[
    22, 80, 443, 8080, 3000, 5000, 5432, 5433, 6379, 27017, 3306, 5672, 15672, 9090, 9091, 9093,
    9094, 9100, 9200, 5601, 8000, 8022, 2375, 2376, 9323,
    // management / virtualization
    902, 903, 9440, 9443, 5480, 5985, 5986,
];

/// Additional ports folded into the `aggressive` method
pub const EXTRA_PORTS: &[u16] = &[
    21, 23, 25, 53, 110, 143, 993, 995, 8081, 8082, 8090, 8181, 8443, 8880, 8888, 9000, 9092, 9201,
    9300, 3001, 4000, 4001, 5001, 7001, 8001, 902, 903, 9440, 9443, 5480, 5985, 5986,
];

/// Process-name fragments mapped to service labels, checked in order
pub const PROCESS_SERVICE_KEYWORDS: &[(&str, &str)] = &[
    ("nginx", "http"),
    ("apache", "http"),
    ("httpd", "http"),
    ("postgres", "postgresql"),
    ("mysqld", "mysql"),
    ("redis", "redis"),
    ("mongod", "mongodb"),
    ("dockerd", "docker-engine"),
    ("docker-proxy", "container-port"),
    ("sshd", "ssh"),
    ("w3wp", "iis"),
    ("sqlservr", "mssql"),
    ("winrm", "winrm"),
];

/// Port-set selector for a discovery run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMethod {
    #[default]
    Tcp,
    Aggressive,
}

impl ScanMethod {
    /// Lenient parse: `aggressive` and its alias `nmap` select the wide
    /// set, anything else falls back to `tcp`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "aggressive" | "nmap" => ScanMethod::Aggressive,
            _ => ScanMethod::Tcp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMethod::Tcp => "tcp",
            ScanMethod::Aggressive => "aggressive",
        }
    }

    /// Ports probed for this method, ascending and unique
    pub fn ports(&self) -> Vec<u16> {
        match self {
            ScanMethod::Tcp => COMMON_PORTS.to_vec(),
            ScanMethod::Aggressive => {
                let mut expanded: BTreeSet<u16> = COMMON_PORTS.iter().copied().collect();
                expanded.extend(EXTRA_PORTS.iter().copied());
                expanded.extend(1..=1023);
                expanded.extend(3000..=3100);
                expanded.extend(8000..=8100);
                expanded.into_iter().collect()
            }
        }
    }
}

/// Service label for a port, `port-<n>` when the port is not in the table
pub fn service_for_port(port: u16) -> String {
    SERVICE_PORTS
        .iter()
        .find(|(p, _)| *p == port)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| format!("port-{port}"))
}

/// Service label from an owning process name, falling back to the port table.
/// Returns `unknown` when neither is available.
pub fn service_for_process(process: Option<&str>, port: Option<u16>) -> String {
    if let Some(process) = process {
        let lower = process.to_ascii_lowercase();
        if let Some((_, service)) = PROCESS_SERVICE_KEYWORDS
            .iter()
            .find(|(keyword, _)| lower.contains(keyword))
        {
            return service.to_string();
        }
    }
    match port {
        Some(port) => service_for_port(port),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_method_uses_common_ports() {
        let ports = ScanMethod::Tcp.ports();
        assert_eq!(ports.len(), COMMON_PORTS.len());
        assert!(ports.contains(&6379));
        assert!(!ports.contains(&135));
    }

    #[test]
    fn aggressive_method_is_sorted_superset() {
        let ports = ScanMethod::Aggressive.ports();
        assert!(ports.windows(2).all(|w| w[0] < w[1]));
        for p in COMMON_PORTS.iter().chain(EXTRA_PORTS) {
            assert!(ports.contains(p));
        }
        assert!(ports.contains(&1) && ports.contains(&1023));
        assert!(ports.contains(&3100) && ports.contains(&8100));
        assert!(!ports.contains(&1024));
        // 1..=1023, 3000..=3100, 8000..=8100 plus the out-of-band extras
        assert_eq!(ports.len(), 1023 + 101 + 101 + 35);
    }

    #[test]
    fn method_parse_is_lenient() {
        assert_eq!(ScanMethod::parse("nmap"), ScanMethod::Aggressive);
        assert_eq!(ScanMethod::parse("AGGRESSIVE"), ScanMethod::Aggressive);
        assert_eq!(ScanMethod::parse("udp"), ScanMethod::Tcp);
    }

    #[test]
    fn unknown_ports_get_numbered_label() {
        assert_eq!(service_for_port(6379), "redis");
        assert_eq!(service_for_port(4444), "port-4444");
    }

    #[test]
    fn process_keywords_win_over_port_table() {
        assert_eq!(service_for_process(Some("nginx: master"), Some(8080)), "http");
        assert_eq!(service_for_process(Some("docker-proxy"), Some(5432)), "container-port");
        assert_eq!(service_for_process(Some("java"), Some(9200)), "elasticsearch");
        assert_eq!(service_for_process(None, None), "unknown");
    }
}
