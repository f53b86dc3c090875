//! Host summary from the standard system, interfaces and host-resources MIBs

use std::collections::BTreeMap;

use super::{SnmpClient, SnmpTarget, VarBind, last_arc};
use crate::models::{SnmpHostInfo, SnmpInterface, SnmpStorage};
use crate::scanner::tcp::round2;

const SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
const SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
const SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
const HR_MEMORY_SIZE: &str = "1.3.6.1.2.1.25.2.2.0";
const HR_PROCESSOR_LOAD: &str = "1.3.6.1.2.1.25.3.3.1.2";
const IF_DESCR: &str = "1.3.6.1.2.1.2.2.1.2";
const IF_SPEED: &str = "1.3.6.1.2.1.2.2.1.5";
const IF_OPER_STATUS: &str = "1.3.6.1.2.1.2.2.1.8";
const HR_STORAGE_DESCR: &str = "1.3.6.1.2.1.25.2.3.1.3";
const HR_STORAGE_UNITS: &str = "1.3.6.1.2.1.25.2.3.1.4";
const HR_STORAGE_SIZE: &str = "1.3.6.1.2.1.25.2.3.1.5";
const HR_STORAGE_USED: &str = "1.3.6.1.2.1.25.2.3.1.6";
const HR_SWRUN_NAME: &str = "1.3.6.1.2.1.25.4.2.1.2";
const HR_SWRUN_STATUS: &str = "1.3.6.1.2.1.25.4.2.1.7";

/// hrSWRunStatus value for `running`
const SWRUN_RUNNING: i64 = 1;

/// Column values keyed by their last index arc
fn by_index(rows: &[VarBind]) -> BTreeMap<u32, &str> {
    rows.iter()
        .filter_map(|(oid, value)| Some((last_arc(oid).parse().ok()?, value.as_str())))
        .collect()
}

fn numeric_by_index(rows: &[VarBind]) -> BTreeMap<u32, u64> {
    by_index(rows)
        .into_iter()
        .map(|(idx, v)| (idx, v.trim().parse().unwrap_or(0)))
        .collect()
}

/// Mean of the per-core load samples; `None` if empty or any sample is
/// not a number.
pub fn average_load(rows: &[VarBind]) -> Option<f64> {
    if rows.is_empty() {
        return None;
    }
    let loads: Option<Vec<f64>> = rows.iter().map(|(_, v)| v.trim().parse::<f64>().ok()).collect();
    let loads = loads?;
    Some(loads.iter().sum::<f64>() / loads.len() as f64)
}

/// Joins the ifTable columns on ifIndex.
pub fn interface_entries(descrs: &[VarBind], speeds: &[VarBind], oper: &[VarBind]) -> Vec<SnmpInterface> {
    let speeds = by_index(speeds);
    let oper = by_index(oper);
    by_index(descrs)
        .into_iter()
        .map(|(index, descr)| SnmpInterface {
            index,
            description: Some(descr.to_string()).filter(|d| !d.is_empty()),
            speed_bps: speeds.get(&index).and_then(|v| v.trim().parse().ok()),
            oper_status: oper.get(&index).and_then(|v| v.trim().parse().ok()),
        })
        .collect()
}

/// Joins the hrStorage columns on hrStorageIndex. Rows without allocation
/// units or size are skipped.
pub fn storage_entries(descrs: &[VarBind], units: &[VarBind], sizes: &[VarBind], used: &[VarBind]) -> Vec<SnmpStorage> {
    let units = numeric_by_index(units);
    let sizes = numeric_by_index(sizes);
    let used = numeric_by_index(used);

    by_index(descrs)
        .into_iter()
        .filter_map(|(index, descr)| {
            let unit = units.get(&index).copied().unwrap_or(0);
            let size = sizes.get(&index).copied().unwrap_or(0);
            if unit == 0 || size == 0 {
                return None;
            }
            let total_bytes = unit.saturating_mul(size);
            let used_bytes = unit.saturating_mul(used.get(&index).copied().unwrap_or(0));
            let used_percent = (total_bytes > 0).then(|| round2(used_bytes as f64 / total_bytes as f64 * 100.0));
            Some(SnmpStorage {
                index,
                description: Some(descr.to_string()),
                total_bytes,
                used_bytes,
                used_percent,
            })
        })
        .collect()
}

/// `(total, running)` from hrSWRunName and hrSWRunStatus
pub fn process_counts(names: &[VarBind], statuses: &[VarBind]) -> (Option<u64>, Option<u64>) {
    if names.is_empty() && statuses.is_empty() {
        return (None, None);
    }
    let running = statuses
        .iter()
        .filter(|(_, v)| v.trim().parse::<i64>().ok() == Some(SWRUN_RUNNING))
        .count();
    (Some(names.len() as u64), Some(running as u64))
}

/// Collects the SNMP host summary over one session. Every field stays
/// empty when the agent does not answer.
pub async fn build_snmp_hostinfo(target: &SnmpTarget) -> SnmpHostInfo {
    let mut info = SnmpHostInfo {
        target: target.ip.to_string(),
        version: target.version.as_str().to_string(),
        ..Default::default()
    };

    let mut client = match Box::pin(SnmpClient::connect(target)).await {
        Ok(client) => client,
        Err(e) => {
            crate::log_debug!("SNMP host info for {}: no session: {}", target.ip, e);
            return info;
        }
    };

    info.sys_descr = client.get(SYS_DESCR).await;
    info.sys_name = client.get(SYS_NAME).await;
    info.sys_uptime_ticks = client.get(SYS_UPTIME).await.and_then(|v| v.trim().parse().ok());
    info.memory_kb = client.get(HR_MEMORY_SIZE).await.and_then(|v| v.trim().parse().ok());

    let loads = client.walk(HR_PROCESSOR_LOAD).await;
    info.cpu_load_avg = average_load(&loads);

    let descrs = client.walk(IF_DESCR).await;
    let speeds = client.walk(IF_SPEED).await;
    let oper = client.walk(IF_OPER_STATUS).await;
    info.interfaces = interface_entries(&descrs, &speeds, &oper);

    let storage_descr = client.walk(HR_STORAGE_DESCR).await;
    let storage_units = client.walk(HR_STORAGE_UNITS).await;
    let storage_size = client.walk(HR_STORAGE_SIZE).await;
    let storage_used = client.walk(HR_STORAGE_USED).await;
    info.storage = storage_entries(&storage_descr, &storage_units, &storage_size, &storage_used);

    let names = client.walk(HR_SWRUN_NAME).await;
    let statuses = client.walk(HR_SWRUN_STATUS).await;
    (info.processes_total, info.processes_running) = process_counts(&names, &statuses);

    crate::log_debug!(
        "SNMP host info for {}: {} interfaces, {} storage rows",
        target.ip,
        info.interfaces.len(),
        info.storage.len()
    );
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(base: &str, values: &[(u32, &str)]) -> Vec<VarBind> {
        values
            .iter()
            .map(|(idx, v)| (format!("{base}.{idx}"), v.to_string()))
            .collect()
    }

    #[test]
    fn storage_joins_columns_by_index() {
        let descr = rows(HR_STORAGE_DESCR, &[(1, "Physical memory"), (31, "/")]);
        let units = rows(HR_STORAGE_UNITS, &[(1, "1024"), (31, "4096")]);
        let size = rows(HR_STORAGE_SIZE, &[(1, "8000"), (31, "3000")]);
        let used = rows(HR_STORAGE_USED, &[(1, "2000"), (31, "1000")]);

        let storage = storage_entries(&descr, &units, &size, &used);
        assert_eq!(storage.len(), 2);
        assert_eq!(storage[0].index, 1);
        assert_eq!(storage[0].total_bytes, 8_192_000);
        assert_eq!(storage[0].used_percent, Some(25.0));
        assert_eq!(storage[1].description.as_deref(), Some("/"));
        assert_eq!(storage[1].used_bytes, 4_096_000);
        assert_eq!(storage[1].used_percent, Some(33.33));
    }

    #[test]
    fn storage_rows_without_size_are_skipped() {
        let descr = rows(HR_STORAGE_DESCR, &[(1, "Virtual memory"), (2, "Floppy")]);
        let units = rows(HR_STORAGE_UNITS, &[(1, "0"), (2, "512")]);
        let size = rows(HR_STORAGE_SIZE, &[(1, "100"), (2, "0")]);
        let used = rows(HR_STORAGE_USED, &[]);
        assert!(storage_entries(&descr, &units, &size, &used).is_empty());
    }

    #[test]
    fn load_average_is_mean_of_cores() {
        let loads = rows(HR_PROCESSOR_LOAD, &[(196608, "10"), (196609, "30")]);
        assert_eq!(average_load(&loads), Some(20.0));
        assert_eq!(average_load(&[]), None);
        let bad = rows(HR_PROCESSOR_LOAD, &[(1, "n/a")]);
        assert_eq!(average_load(&bad), None);
    }

    #[test]
    fn interfaces_join_speed_and_status() {
        let descr = rows(IF_DESCR, &[(1, "lo"), (2, "eth0")]);
        let speed = rows(IF_SPEED, &[(2, "1000000000")]);
        let oper = rows(IF_OPER_STATUS, &[(1, "1"), (2, "2")]);
        let ifaces = interface_entries(&descr, &speed, &oper);
        assert_eq!(ifaces.len(), 2);
        assert_eq!(ifaces[0].speed_bps, None);
        assert_eq!(ifaces[1].speed_bps, Some(1_000_000_000));
        assert_eq!(ifaces[1].oper_status, Some(2));
    }

    #[test]
    fn processes_count_running_entries() {
        let names = rows(HR_SWRUN_NAME, &[(1, "init"), (2, "sshd"), (3, "cron")]);
        let statuses = rows(HR_SWRUN_STATUS, &[(1, "1"), (2, "2"), (3, "1")]);
        assert_eq!(process_counts(&names, &statuses), (Some(3), Some(2)));
        assert_eq!(process_counts(&[], &[]), (None, None));
    }
}
