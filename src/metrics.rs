//! Metrics delta engine
//!
//! Node exporter counters are monotonic. Rates and percentages are derived
//! by diffing a fresh scrape against the last persisted sample of the same
//! `(entity, metric)` pair; no state is kept in memory between calls.

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::Mutex;

use crate::config::probe_timeout;
use crate::models::NodeExporterInfo;
use crate::scanner::scrape_node_exporter;

pub const CPU_IDLE_CUM: &str = "cpu_idle_cum";
pub const CPU_TOTAL_CUM: &str = "cpu_total_cum";
pub const NET_RX_CUM: &str = "net_rx_cum";
pub const NET_TX_CUM: &str = "net_tx_cum";
pub const CPU_USAGE_PERCENT: &str = "cpu_usage_percent";
pub const MEM_USED_PERCENT: &str = "mem_used_percent";
pub const FS_USED_PERCENT: &str = "fs_used_percent";
pub const NET_RX_BPS: &str = "net_rx_bps";
pub const NET_TX_BPS: &str = "net_tx_bps";

/// Series returned to callers, in this order
pub const DERIVED_SERIES: &[&str] = &[CPU_USAGE_PERCENT, MEM_USED_PERCENT, FS_USED_PERCENT, NET_RX_BPS, NET_TX_BPS];

/// Elapsed time between samples never drops below this many seconds.
const MIN_ELAPSED_SECS: f64 = 1.0;

/// One persisted sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredSample {
    pub value: f64,
    pub at: DateTime<Utc>,
}

/// Persisted metric samples, keyed by entity and metric name
pub trait SampleStore: Send + Sync {
    fn last_sample(&self, entity: &str, metric: &str) -> Result<Option<StoredSample>>;

    fn record_sample(&self, entity: &str, metric: &str, value: f64, at: DateTime<Utc>) -> Result<()>;

    /// Last `points` samples, oldest first
    fn series(&self, entity: &str, metric: &str, points: usize) -> Result<Vec<StoredSample>>;
}

/// In-process store for tests and runs without a database
#[derive(Debug, Default)]
pub struct MemorySampleStore {
    samples: Mutex<HashMap<(String, String), Vec<StoredSample>>>,
}

impl MemorySampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_samples<T>(&self, f: impl FnOnce(&mut HashMap<(String, String), Vec<StoredSample>>) -> T) -> Result<T> {
        let mut guard = self
            .samples
            .lock()
            .map_err(|_| anyhow::anyhow!("Sample store lock poisoned"))?;
        Ok(f(&mut guard))
    }
}

impl SampleStore for MemorySampleStore {
    fn last_sample(&self, entity: &str, metric: &str) -> Result<Option<StoredSample>> {
        self.with_samples(|map| {
            map.get(&(entity.to_string(), metric.to_string()))
                .and_then(|samples| samples.iter().max_by_key(|s| s.at).copied())
        })
    }

    fn record_sample(&self, entity: &str, metric: &str, value: f64, at: DateTime<Utc>) -> Result<()> {
        self.with_samples(|map| {
            let samples = map.entry((entity.to_string(), metric.to_string())).or_default();
            samples.push(StoredSample { value, at });
            samples.sort_by_key(|s| s.at);
        })
    }

    fn series(&self, entity: &str, metric: &str, points: usize) -> Result<Vec<StoredSample>> {
        self.with_samples(|map| {
            let samples = map
                .get(&(entity.to_string(), metric.to_string()))
                .map(Vec::as_slice)
                .unwrap_or_default();
            samples[samples.len().saturating_sub(points)..].to_vec()
        })
    }
}

/// `(1 - idle_delta / total_delta) * 100`, clamped to 0..=100.
/// `None` unless the total advanced.
pub fn cpu_usage_percent(prev_idle: f64, prev_total: f64, idle: f64, total: f64) -> Option<f64> {
    let total_delta = total - prev_total;
    if total_delta <= 0.0 {
        return None;
    }
    let idle_delta = idle - prev_idle;
    Some(((1.0 - idle_delta / total_delta) * 100.0).clamp(0.0, 100.0))
}

/// Per-second rate between two counter readings, elapsed floored at 1 s
pub fn counter_rate(previous: StoredSample, value: f64, now: DateTime<Utc>) -> f64 {
    let elapsed = (now - previous.at).num_milliseconds() as f64 / 1000.0;
    (value - previous.value) / elapsed.max(MIN_ELAPSED_SECS)
}

/// Values derived from one scrape. Derivatives are absent on the first
/// scrape of an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedMetrics {
    pub cpu_usage_percent: Option<f64>,
    pub mem_used_percent: Option<f64>,
    pub fs_used_percent: Option<f64>,
    pub net_rx_bps: Option<f64>,
    pub net_tx_bps: Option<f64>,
}

/// Stores raw counters and derived metrics for one scrape. Previous
/// counters are read before anything new is written.
pub fn record_scrape(
    store: &dyn SampleStore,
    entity: &str,
    node: &NodeExporterInfo,
    now: DateTime<Utc>,
) -> Result<DerivedMetrics> {
    let idle = node.cpu_idle_seconds.unwrap_or(0.0);
    let total = node.cpu_total_seconds.unwrap_or(0.0);
    let rx = node.net_rx_bytes.unwrap_or(0.0);
    let tx = node.net_tx_bytes.unwrap_or(0.0);

    let prev_idle = store.last_sample(entity, CPU_IDLE_CUM)?;
    let prev_total = store.last_sample(entity, CPU_TOTAL_CUM)?;
    let prev_rx = store.last_sample(entity, NET_RX_CUM)?;
    let prev_tx = store.last_sample(entity, NET_TX_CUM)?;

    for (metric, value) in [(CPU_IDLE_CUM, idle), (CPU_TOTAL_CUM, total), (NET_RX_CUM, rx), (NET_TX_CUM, tx)] {
        store.record_sample(entity, metric, value, now)?;
    }

    let derived = DerivedMetrics {
        cpu_usage_percent: prev_idle
            .zip(prev_total)
            .and_then(|(pi, pt)| cpu_usage_percent(pi.value, pt.value, idle, total)),
        mem_used_percent: node.mem_used_percent,
        fs_used_percent: node.fs_used_percent,
        net_rx_bps: prev_rx.map(|p| counter_rate(p, rx, now)),
        net_tx_bps: prev_tx.map(|p| counter_rate(p, tx, now)),
    };

    for (metric, value) in [
        (CPU_USAGE_PERCENT, derived.cpu_usage_percent),
        (MEM_USED_PERCENT, derived.mem_used_percent),
        (FS_USED_PERCENT, derived.fs_used_percent),
        (NET_RX_BPS, derived.net_rx_bps),
        (NET_TX_BPS, derived.net_tx_bps),
    ] {
        if let Some(value) = value {
            store.record_sample(entity, metric, value, now)?;
        }
    }
    Ok(derived)
}

/// One chart point, local wall-clock time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub time: String,
    pub value: f64,
}

impl From<StoredSample> for SeriesPoint {
    fn from(sample: StoredSample) -> Self {
        Self {
            time: sample.at.with_timezone(&Local).format("%H:%M:%S").to_string(),
            value: sample.value,
        }
    }
}

/// Response of a metrics sampling call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub present: bool,
    pub series: BTreeMap<String, Vec<SeriesPoint>>,
}

/// Last `points` samples of every derived series
pub fn derived_series(store: &dyn SampleStore, entity: &str, points: usize) -> Result<BTreeMap<String, Vec<SeriesPoint>>> {
    DERIVED_SERIES
        .iter()
        .map(|metric| {
            let samples = store.series(entity, metric, points)?.into_iter().map(SeriesPoint::from).collect();
            Ok((metric.to_string(), samples))
        })
        .collect()
}

/// Scrapes the node exporter on `ip`, stores the sample and returns the
/// derived series. A host without an exporter yields `present: false`.
pub async fn sample_metrics(ip: IpAddr, store: &dyn SampleStore, points: usize) -> Result<MetricsReport> {
    let node = match scrape_node_exporter(ip, probe_timeout()).await {
        Ok(node) if node.present => node,
        Ok(_) => return Ok(MetricsReport::default()),
        Err(e) => {
            crate::log_debug!("Node exporter on {} unavailable: {}", ip, e);
            return Ok(MetricsReport::default());
        }
    };

    let entity = ip.to_string();
    let derived = record_scrape(store, &entity, &node, Utc::now())?;
    crate::log_debug!("Metrics for {}: {:?}", entity, derived);

    Ok(MetricsReport {
        present: true,
        series: derived_series(store, &entity, points)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn scrape(idle: f64, total: f64, rx: f64) -> NodeExporterInfo {
        NodeExporterInfo {
            present: true,
            cpu_idle_seconds: Some(idle),
            cpu_total_seconds: Some(total),
            net_rx_bytes: Some(rx),
            net_tx_bytes: Some(0.0),
            mem_used_percent: Some(42.5),
            ..Default::default()
        }
    }

    #[test]
    fn cpu_usage_from_counter_deltas() {
        assert_eq!(cpu_usage_percent(100.0, 500.0, 120.0, 600.0), Some(80.0));
        assert_eq!(cpu_usage_percent(100.0, 500.0, 120.0, 500.0), None);
        assert_eq!(cpu_usage_percent(100.0, 500.0, 300.0, 600.0), Some(0.0));
    }

    #[test]
    fn rate_floors_elapsed_at_one_second() {
        let now = Utc::now();
        let prev = StoredSample { value: 1000.0, at: now };
        assert_eq!(counter_rate(prev, 1500.0, now), 500.0);
        let prev = StoredSample {
            value: 1000.0,
            at: now - Duration::seconds(10),
        };
        assert_eq!(counter_rate(prev, 1500.0, now), 50.0);
    }

    #[test]
    fn first_scrape_stores_baseline_without_derivatives() {
        let store = MemorySampleStore::new();
        let derived = record_scrape(&store, "10.0.0.5", &scrape(100.0, 500.0, 0.0), Utc::now()).unwrap();

        assert_eq!(derived.cpu_usage_percent, None);
        assert_eq!(derived.net_rx_bps, None);
        assert_eq!(derived.mem_used_percent, Some(42.5));
        assert!(store.last_sample("10.0.0.5", CPU_IDLE_CUM).unwrap().is_some());
        assert!(store.series("10.0.0.5", CPU_USAGE_PERCENT, 30).unwrap().is_empty());
    }

    #[test]
    fn second_scrape_derives_against_previous_sample() {
        let store = MemorySampleStore::new();
        let t0 = Utc::now() - Duration::seconds(20);
        record_scrape(&store, "10.0.0.5", &scrape(100.0, 500.0, 1_000.0), t0).unwrap();
        let derived = record_scrape(
            &store,
            "10.0.0.5",
            &scrape(120.0, 600.0, 3_000.0),
            t0 + Duration::seconds(20),
        )
        .unwrap();

        assert_eq!(derived.cpu_usage_percent, Some(80.0));
        assert_eq!(derived.net_rx_bps, Some(100.0));

        let series = derived_series(&store, "10.0.0.5", 30).unwrap();
        assert_eq!(series[CPU_USAGE_PERCENT].len(), 1);
        assert_eq!(series[CPU_USAGE_PERCENT][0].value, 80.0);
        assert_eq!(series[MEM_USED_PERCENT].len(), 2);
        assert_eq!(series.len(), DERIVED_SERIES.len());
    }

    #[test]
    fn series_keeps_latest_points_in_ascending_order() {
        let store = MemorySampleStore::new();
        let base = Utc::now();
        for i in 0..5 {
            store
                .record_sample("h", MEM_USED_PERCENT, i as f64, base + Duration::seconds(i))
                .unwrap();
        }
        let values: Vec<f64> = store
            .series("h", MEM_USED_PERCENT, 3)
            .unwrap()
            .iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0]);
    }
}
