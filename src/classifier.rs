//! Host classifier: OS, virtualization and service labels from evidence
//!
//! Everything here is pure. The discovery pipeline gathers probe and
//! enrichment results into a [`HostRecord`] and calls these functions; the
//! final OS label is composed once, after every stage has run.

use crate::models::{DockerInfo, HostRecord, NodeExporterInfo, ServiceDetail, ServiceEntry};
use crate::network::{service_for_port, service_for_process};
use crate::scanner::{HostProbes, PortProbe, ProbeOutcome};

pub const WINDOWS_HEURISTIC: &str = "Windows (heuristic)";
pub const LINUX_HEURISTIC: &str = "Linux/Unix (heuristic)";
pub const UNKNOWN_OS: &str = "Unknown";

pub const NUTANIX: &str = "Nutanix Prism/AHV (heuristic)";
pub const VMWARE: &str = "VMware ESXi/vCenter (heuristic)";
pub const HYPERV: &str = "Microsoft Hyper-V/Windows (heuristic)";

const WINRM_PORTS: [u16; 2] = [5985, 5986];
const DCE_RPC_PORT: u16 = 135;
const SSH_PORT: u16 = 22;
const NUTANIX_PRISM_PORT: u16 = 9440;
const ESXI_PORT: u16 = 902;
const VCENTER_VAMI_PORT: u16 = 5480;
const VCENTER_HTTPS_PORT: u16 = 9443;
const PORTAINER_EDGE_PORT: u16 = 8000;
const DOCKER_API_PORTS: [u16; 2] = [2375, 2376];
const NODE_EXPORTER_PORT: u16 = 9100;

fn any_open(open: &[u16], ports: &[u16]) -> bool {
    ports.iter().any(|p| open.contains(p))
}

/// Lowest-precedence OS guess from the open port set.
/// DCE/RPC only counts when SSH is closed.
pub fn guess_os_from_ports(open: &[u16]) -> Option<&'static str> {
    if any_open(open, &WINRM_PORTS) {
        return Some(WINDOWS_HEURISTIC);
    }
    if open.contains(&DCE_RPC_PORT) && !open.contains(&SSH_PORT) {
        return Some(WINDOWS_HEURISTIC);
    }
    if open.contains(&SSH_PORT) {
        return Some(LINUX_HEURISTIC);
    }
    None
}

/// Virtualization platform from management ports. A lone 9443 is not
/// enough for VMware: it needs 902 or 5480 next to it.
pub fn guess_virtualization(open: &[u16]) -> Option<&'static str> {
    if open.contains(&NUTANIX_PRISM_PORT) {
        return Some(NUTANIX);
    }
    // 9443 only ever corroborates, so the anchors alone decide
    if open.contains(&ESXI_PORT) || open.contains(&VCENTER_VAMI_PORT) {
        return Some(VMWARE);
    }
    if any_open(open, &WINRM_PORTS) {
        return Some(HYPERV);
    }
    None
}

/// Generic port label, replaced by the product name when an HTTPS
/// fingerprint or a companion port identifies it.
pub fn refine_service_name(port: u16, open: &[u16], probes: &HostProbes) -> String {
    let base = service_for_port(port);
    if port != VCENTER_HTTPS_PORT {
        return base;
    }
    let fingerprint_match = matches!(
        probes.get(&port).and_then(ProbeOutcome::probe),
        Some(PortProbe::Https(fp)) if fp.mentions("portainer")
    );
    if fingerprint_match || open.contains(&PORTAINER_EDGE_PORT) {
        "portainer".to_string()
    } else {
        base
    }
}

fn probe_detail(outcome: &ProbeOutcome) -> (bool, Option<String>) {
    match outcome {
        ProbeOutcome::Failed { reason } => (false, Some(reason.clone())),
        ProbeOutcome::Verified(PortProbe::Ssh { banner }) => (true, (!banner.is_empty()).then(|| banner.clone())),
        ProbeOutcome::Verified(PortProbe::Http(fp) | PortProbe::Https(fp)) => {
            (true, Some(fp.server.clone().unwrap_or_else(|| format!("HTTP {}", fp.status_code))))
        }
        ProbeOutcome::Verified(PortProbe::Database(db)) => (
            true,
            Some(
                db.server_version
                    .clone()
                    .unwrap_or_else(|| format!("{} handshake", db.name)),
            ),
        ),
    }
}

/// Service labels for every open port, one entry per port in scan order
pub fn build_services(open: &[u16], probes: &HostProbes) -> Vec<ServiceEntry> {
    open.iter()
        .map(|&port| ServiceEntry {
            service: refine_service_name(port, open, probes),
            port,
        })
        .collect()
}

/// Verified-service entries for the open ports. Docker API and node
/// exporter ports are verified by their dedicated probes.
pub fn build_service_details(
    open: &[u16],
    probes: &HostProbes,
    node: &NodeExporterInfo,
    docker: &DockerInfo,
) -> Vec<ServiceDetail> {
    open.iter()
        .map(|&port| {
            let service = refine_service_name(port, open, probes);
            let (verified, detail) = if let Some(outcome) = probes.get(&port) {
                probe_detail(outcome)
            } else if DOCKER_API_PORTS.contains(&port) {
                (docker.present, docker.present.then(|| "Docker Engine API".to_string()))
            } else if port == NODE_EXPORTER_PORT {
                (node.present, node.present.then(|| "Node Exporter".to_string()))
            } else {
                (false, None)
            };
            ServiceDetail {
                service,
                port,
                verified,
                detail,
            }
        })
        .collect()
}

/// Appends enrichment-sourced listeners as verified entries
pub fn append_listener_details<'a>(
    details: &mut Vec<ServiceDetail>,
    listeners: impl IntoIterator<Item = (Option<u16>, Option<&'a str>)>,
) {
    for (port, process) in listeners {
        let Some(port) = port else {
            continue;
        };
        details.push(ServiceDetail {
            service: service_for_process(process, Some(port)),
            port,
            verified: true,
            detail: process.map(str::to_string),
        });
    }
}

/// Evidence sources an OS label can come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsSource {
    WindowsCaption,
    NodeExporterUname,
    DockerDaemon,
    PortHeuristic,
}

type OsExtractor = fn(&HostRecord) -> Option<String>;

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

fn windows_caption(host: &HostRecord) -> Option<String> {
    non_empty(host.windows_os.as_ref().and_then(|os| os.caption.as_deref()))
}

fn node_exporter_os(host: &HostRecord) -> Option<String> {
    if !host.node_exporter.present {
        return None;
    }
    non_empty(host.node_exporter.os.as_deref().or(host.node_exporter.uname.as_deref()))
}

fn docker_daemon_os(host: &HostRecord) -> Option<String> {
    non_empty(host.docker.daemon_os())
}

fn port_heuristic(host: &HostRecord) -> Option<String> {
    guess_os_from_ports(&host.open_ports).map(str::to_string)
}

/// Highest precedence first
pub const OS_PRECEDENCE: &[(OsSource, OsExtractor)] = &[
    (OsSource::WindowsCaption, windows_caption),
    (OsSource::NodeExporterUname, node_exporter_os),
    (OsSource::DockerDaemon, docker_daemon_os),
    (OsSource::PortHeuristic, port_heuristic),
];

/// First source in [`OS_PRECEDENCE`] that has evidence, with its label
pub fn resolve_os(host: &HostRecord) -> Option<(OsSource, String)> {
    OS_PRECEDENCE
        .iter()
        .find_map(|(source, extract)| extract(host).map(|label| (*source, label)))
}

/// Final OS label. Reads only evidence fields, never `host.os`, so running
/// it again over the same record gives the same answer.
pub fn compose_os_label(host: &HostRecord) -> String {
    resolve_os(host)
        .map(|(_, label)| label)
        .unwrap_or_else(|| UNKNOWN_OS.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DockerDaemonInfo, WindowsOsInfo};
    use crate::scanner::HttpFingerprint;

    fn host(open: &[u16]) -> HostRecord {
        let mut host = HostRecord::new("10.0.0.9".to_string(), "10.0.0.9".to_string());
        host.open_ports = open.to_vec();
        host
    }

    #[test]
    fn os_heuristic_tiers() {
        assert_eq!(guess_os_from_ports(&[22, 5985]), Some(WINDOWS_HEURISTIC));
        assert_eq!(guess_os_from_ports(&[135, 445]), Some(WINDOWS_HEURISTIC));
        assert_eq!(guess_os_from_ports(&[22, 135]), Some(LINUX_HEURISTIC));
        assert_eq!(guess_os_from_ports(&[22]), Some(LINUX_HEURISTIC));
        assert_eq!(guess_os_from_ports(&[80, 445]), None);
    }

    #[test]
    fn lone_9443_is_not_vmware() {
        assert_eq!(guess_virtualization(&[9443]), None);
        assert_eq!(guess_virtualization(&[9443, 902]), Some(VMWARE));
        assert_eq!(guess_virtualization(&[5480]), Some(VMWARE));
        assert_eq!(guess_virtualization(&[9440, 902]), Some(NUTANIX));
        assert_eq!(guess_virtualization(&[5986]), Some(HYPERV));
    }

    #[test]
    fn portainer_detected_by_fingerprint_or_companion_port() {
        let mut probes = HostProbes::new();
        assert_eq!(refine_service_name(9443, &[9443], &probes), "vcenter-client");
        assert_eq!(refine_service_name(9443, &[8000, 9443], &probes), "portainer");

        probes.insert(
            9443,
            ProbeOutcome::Verified(PortProbe::Https(HttpFingerprint {
                status_code: 200,
                server: None,
                text_snippet: Some("<title>Portainer</title>".to_string()),
            })),
        );
        assert_eq!(refine_service_name(9443, &[9443], &probes), "portainer");
        assert_eq!(refine_service_name(443, &[443, 8000], &probes), "https");
    }

    #[test]
    fn details_use_dedicated_probes_for_docker_and_node() {
        let mut probes = HostProbes::new();
        probes.insert(
            22,
            ProbeOutcome::Verified(PortProbe::Ssh {
                banner: "SSH-2.0-OpenSSH_8.9p1".to_string(),
            }),
        );
        probes.insert(
            80,
            ProbeOutcome::Failed {
                reason: "connect to 10.0.0.9:80 failed".to_string(),
            },
        );
        let node = NodeExporterInfo {
            present: true,
            ..Default::default()
        };
        let docker = DockerInfo::default();

        let details = build_service_details(&[22, 80, 2375, 9100, 6000], &probes, &node, &docker);
        assert_eq!(details.len(), 5);
        assert!(details[0].verified);
        assert_eq!(details[0].detail.as_deref(), Some("SSH-2.0-OpenSSH_8.9p1"));
        assert!(!details[1].verified);
        assert!(!details[2].verified);
        assert_eq!(details[2].detail, None);
        assert_eq!(details[3].detail.as_deref(), Some("Node Exporter"));
        assert_eq!(details[4].service, "port-6000");
    }

    #[test]
    fn listener_details_skip_portless_rows() {
        let mut details = Vec::new();
        append_listener_details(&mut details, [(Some(5432), Some("postgres")), (None, Some("System"))]);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].service, "postgresql");
        assert!(details[0].verified);
    }

    #[test]
    fn winrm_caption_outranks_heuristic() {
        let mut h = host(&[135, 5985]);
        assert_eq!(compose_os_label(&h), WINDOWS_HEURISTIC);

        h.windows_os = Some(WindowsOsInfo {
            caption: Some("Microsoft Windows Server 2019".to_string()),
            ..Default::default()
        });
        assert_eq!(compose_os_label(&h), "Microsoft Windows Server 2019");
        assert_eq!(resolve_os(&h).map(|(s, _)| s), Some(OsSource::WindowsCaption));
    }

    #[test]
    fn node_exporter_outranks_docker_daemon() {
        let mut h = host(&[22, 2375, 9100]);
        h.docker.present = true;
        h.docker.info = Some(DockerDaemonInfo {
            operating_system: Some("Ubuntu 22.04.4 LTS".to_string()),
            ..Default::default()
        });
        assert_eq!(compose_os_label(&h), "Ubuntu 22.04.4 LTS");

        h.node_exporter.present = true;
        h.node_exporter.os = Some("Linux 6.8.0-45-generic".to_string());
        assert_eq!(compose_os_label(&h), "Linux 6.8.0-45-generic");
    }

    #[test]
    fn composition_is_idempotent() {
        let mut h = host(&[22]);
        h.os = compose_os_label(&h);
        let first = h.os.clone();
        h.os = compose_os_label(&h);
        assert_eq!(h.os, first);
        assert_eq!(first, LINUX_HEURISTIC);

        assert_eq!(compose_os_label(&host(&[])), UNKNOWN_OS);
    }
}
