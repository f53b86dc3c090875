use crate::enrich::{DeviceCommandRequest, SshCredentials, WinrmCredentials};
use crate::network::ScanMethod;
use crate::scanner::snmp::{SnmpV3Credentials, SnmpVersion};

/// How to reach one SNMP agent, before the host is resolved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnmpOptions {
    pub host: String,
    pub version: SnmpVersion,
    pub community: Option<String>,
    pub v3: Option<SnmpV3Credentials>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    Discover {
        target: String,
        method: ScanMethod,
        ssh: Option<SshCredentials>,
        winrm: Option<WinrmCredentials>,
        deadline_secs: Option<u64>,
        ports: Option<Vec<u16>>,
        persist: bool,
    },
    HostInfo {
        ip: String,
        method: ScanMethod,
        ssh: Option<SshCredentials>,
        winrm: Option<WinrmCredentials>,
    },
    Docker {
        ip: String,
        ssh: Option<SshCredentials>,
    },
    DbProbe {
        ip: String,
        only_online: bool,
    },
    SnmpGet {
        snmp: SnmpOptions,
        oid: String,
    },
    SnmpWalk {
        snmp: SnmpOptions,
        oid: String,
    },
    SnmpSet {
        snmp: SnmpOptions,
        oid: String,
        value_type: String,
        value: String,
    },
    SnmpInfo {
        snmp: SnmpOptions,
    },
    SnmpNeighbors {
        snmp: SnmpOptions,
    },
    Metrics {
        ip: String,
        points: usize,
    },
    DeviceCommand(DeviceCommandRequest),
    Help,
    Version,
}
