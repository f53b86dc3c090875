//! LLDP / CDP neighbor tables

use std::collections::HashMap;

use super::{SnmpClient, SnmpTarget, VarBind, oid_suffix};
use crate::models::{NeighborProtocol, SnmpNeighbor};

const LLDP_REM_SYS_NAME: &str = "1.0.8802.1.1.2.1.4.1.1.9";
const LLDP_REM_PORT_ID: &str = "1.0.8802.1.1.2.1.4.1.1.7";
const LLDP_REM_LOCAL_PORT_NUM: &str = "1.0.8802.1.1.2.1.4.1.1.2";
const LLDP_LOC_PORT_DESC: &str = "1.0.8802.1.1.2.1.3.7.1.3";

const CDP_CACHE_DEVICE_ID: &str = "1.3.6.1.4.1.9.9.23.1.2.1.1.6";
const CDP_CACHE_DEVICE_PORT: &str = "1.3.6.1.4.1.9.9.23.1.2.1.1.7";
const CDP_CACHE_PLATFORM: &str = "1.3.6.1.4.1.9.9.23.1.2.1.1.8";
const IF_NAME: &str = "1.3.6.1.2.1.31.1.1.1.1";

fn column<'a>(rows: &'a [VarBind], base: &str) -> HashMap<&'a str, &'a str> {
    rows.iter()
        .filter_map(|(oid, value)| Some((oid_suffix(oid, base)?, clean(value))))
        .collect()
}

fn clean(value: &str) -> &str {
    value.trim().trim_matches('"')
}

/// LLDP neighbors from the remote-systems table. The local interface name
/// comes from lldpLocPortDesc, falling back to `port-<n>`.
pub fn lldp_neighbors(
    rem_sys_name: &[VarBind],
    rem_port_id: &[VarBind],
    rem_local_port: &[VarBind],
    loc_port_desc: &[VarBind],
) -> Vec<SnmpNeighbor> {
    let names = column(rem_sys_name, LLDP_REM_SYS_NAME);
    let ports = column(rem_port_id, LLDP_REM_PORT_ID);
    let local_desc = column(loc_port_desc, LLDP_LOC_PORT_DESC);

    rem_local_port
        .iter()
        .filter_map(|(oid, value)| {
            let key = oid_suffix(oid, LLDP_REM_LOCAL_PORT_NUM)?;
            let remote = names.get(key)?;
            let local_num = clean(value);
            let local_if = local_desc
                .get(local_num)
                .map(|d| d.to_string())
                .unwrap_or_else(|| format!("port-{local_num}"));
            Some(SnmpNeighbor {
                local_if: Some(local_if),
                remote_hostname: remote.to_string(),
                remote_port: ports.get(key).map(|p| p.to_string()),
                remote_platform: None,
                protocol: NeighborProtocol::Lldp,
            })
        })
        .collect()
}

/// CDP cache entries. The row index starts with the local ifIndex, which
/// is resolved through ifName, falling back to `if-<n>`.
pub fn cdp_neighbors(
    device_ids: &[VarBind],
    device_ports: &[VarBind],
    platforms: &[VarBind],
    if_names: &[VarBind],
) -> Vec<SnmpNeighbor> {
    let ports = column(device_ports, CDP_CACHE_DEVICE_PORT);
    let platforms = column(platforms, CDP_CACHE_PLATFORM);
    let names = column(if_names, IF_NAME);

    device_ids
        .iter()
        .filter_map(|(oid, value)| {
            let suffix = oid_suffix(oid, CDP_CACHE_DEVICE_ID)?;
            let if_index = suffix.split('.').next().filter(|s| !s.is_empty());
            let local_if = if_index.map(|idx| {
                names
                    .get(idx)
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| format!("if-{idx}"))
            });
            Some(SnmpNeighbor {
                local_if,
                remote_hostname: clean(value).to_string(),
                remote_port: ports.get(suffix).map(|p| p.to_string()),
                remote_platform: platforms.get(suffix).map(|p| p.to_string()),
                protocol: NeighborProtocol::Cdp,
            })
        })
        .collect()
}

/// LLDP first; the CDP cache is only read when LLDP yields nothing.
pub async fn discover_neighbors(target: &SnmpTarget) -> Vec<SnmpNeighbor> {
    let mut client = match Box::pin(SnmpClient::connect(target)).await {
        Ok(client) => client,
        Err(e) => {
            crate::log_debug!("SNMP neighbors for {}: no session: {}", target.ip, e);
            return Vec::new();
        }
    };

    let rem_sys = client.walk(LLDP_REM_SYS_NAME).await;
    if !rem_sys.is_empty() {
        let rem_port = client.walk(LLDP_REM_PORT_ID).await;
        let rem_local = client.walk(LLDP_REM_LOCAL_PORT_NUM).await;
        let loc_desc = client.walk(LLDP_LOC_PORT_DESC).await;
        let neighbors = lldp_neighbors(&rem_sys, &rem_port, &rem_local, &loc_desc);
        if !neighbors.is_empty() {
            return neighbors;
        }
    }

    let device_ids = client.walk(CDP_CACHE_DEVICE_ID).await;
    if device_ids.is_empty() {
        return Vec::new();
    }
    let device_ports = client.walk(CDP_CACHE_DEVICE_PORT).await;
    let platforms = client.walk(CDP_CACHE_PLATFORM).await;
    let if_names = client.walk(IF_NAME).await;
    cdp_neighbors(&device_ids, &device_ports, &platforms, &if_names)
}
