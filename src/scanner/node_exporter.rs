//! Node exporter scrape and Prometheus text parsing

use regex::Regex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use super::http::{insecure_client, url_host};
use crate::error::ProbeError;
use crate::models::NodeExporterInfo;

pub const NODE_EXPORTER_PORT: u16 = 9100;

static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="((?:[^"\\]|\\.)*)""#).expect("static label regex"));

/// One sample line of the text exposition format
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<'a> {
    pub name: &'a str,
    pub labels: HashMap<String, String>,
    pub value: f64,
    pub raw: &'a str,
}

impl Sample<'_> {
    fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Parses one non-comment line. Label values may contain spaces.
pub fn parse_sample(line: &str) -> Option<Sample<'_>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let (name, labels, rest) = match line.find('{') {
        Some(open) => {
            let close = line.rfind('}')?;
            if close < open {
                return None;
            }
            let labels = LABEL_RE
                .captures_iter(&line[open + 1..close])
                .map(|c| (c[1].to_string(), c[2].replace("\\\"", "\"")))
                .collect();
            (&line[..open], labels, &line[close + 1..])
        }
        None => {
            let split = line.find(char::is_whitespace)?;
            (&line[..split], HashMap::new(), &line[split..])
        }
    };

    let value = rest.split_whitespace().next()?.parse::<f64>().ok()?;
    Some(Sample {
        name: name.trim(),
        labels,
        value,
        raw: line,
    })
}

fn used_percent(total: f64, available: f64) -> Option<f64> {
    (total > 0.0 && available > 0.0).then(|| (total - available) / total * 100.0)
}

/// Folds a full `/metrics` body into the node summary.
pub fn parse_node_metrics(body: &str) -> NodeExporterInfo {
    let mut info = NodeExporterInfo {
        present: true,
        ..Default::default()
    };

    let mut cpu_idle = 0.0;
    let mut cpu_total = 0.0;
    let mut rx = 0.0;
    let mut tx = 0.0;
    let mut fs_size = 0.0;
    let mut fs_avail = 0.0;

    for sample in body.lines().filter_map(parse_sample) {
        match sample.name {
            "node_memory_MemTotal_bytes" => info.mem_total_bytes = Some(sample.value),
            "node_memory_MemAvailable_bytes" => info.mem_available_bytes = Some(sample.value),
            "node_cpu_seconds_total" => {
                cpu_total += sample.value;
                if sample.label("mode") == Some("idle") {
                    cpu_idle += sample.value;
                }
            }
            "node_network_receive_bytes_total" if sample.label("device") != Some("lo") => {
                rx += sample.value
            }
            "node_network_transmit_bytes_total" if sample.label("device") != Some("lo") => {
                tx += sample.value
            }
            "node_filesystem_size_bytes" | "node_filesystem_avail_bytes" => {
                if matches!(sample.label("fstype"), Some("tmpfs") | Some("aufs")) {
                    continue;
                }
                if sample.name == "node_filesystem_size_bytes" {
                    fs_size += sample.value;
                } else {
                    fs_avail += sample.value;
                }
            }
            "node_uname_info" if info.uname.is_none() => {
                info.uname = Some(sample.raw.to_string());
                info.os = uname_os(&sample);
            }
            _ => {}
        }
    }

    info.mem_used_percent = match (info.mem_total_bytes, info.mem_available_bytes) {
        (Some(total), Some(available)) => used_percent(total, available),
        _ => None,
    };
    info.cpu_idle_seconds = Some(cpu_idle);
    info.cpu_total_seconds = Some(cpu_total);
    info.net_rx_bytes = Some(rx);
    info.net_tx_bytes = Some(tx);
    info.fs_size_bytes = Some(fs_size);
    info.fs_avail_bytes = Some(fs_avail);
    info.fs_used_percent = used_percent(fs_size, fs_avail);
    info
}

/// `"<sysname> <release>"` from the uname labels, else the raw line
fn uname_os(sample: &Sample<'_>) -> Option<String> {
    match (sample.label("sysname"), sample.label("release")) {
        (Some(sys), Some(rel)) if !sys.is_empty() => Some(format!("{sys} {rel}").trim().to_string()),
        (Some(sys), None) if !sys.is_empty() => Some(sys.to_string()),
        _ => Some(sample.raw.to_string()),
    }
}

/// Scrapes `http://ip:9100/metrics`. Present iff HTTP 200 and the body
/// carries `node_` series.
pub async fn scrape_node_exporter(ip: IpAddr, limit: Duration) -> Result<NodeExporterInfo, ProbeError> {
    let client = insecure_client(limit)?;
    let url = format!("http://{}:{}/metrics", url_host(ip), NODE_EXPORTER_PORT);
    let resp = client.get(&url).send().await?;
    let status = resp.status().as_u16();
    if status != 200 {
        return Err(ProbeError::Unexpected(format!("{url} returned HTTP {status}")));
    }
    let body = resp.text().await?;
    if !body.contains("node_") {
        return Err(ProbeError::Unexpected(format!("{url} exposes no node_ series")));
    }
    Ok(parse_node_metrics(&body))
}
