//! Configuration constants and runtime overrides for the discovery engine
//!
//! Every tunable has a compile-time default. The accessor functions read a
//! `NETINV_*` environment variable, clamp it to a sane range and fall back to
//! the default when the variable is unset or unparsable.

use std::path::PathBuf;
use std::time::Duration;

// ====== Concurrency ======

/// Maximum host pipelines running at once across a whole target set
pub const HOST_WORKER_CAP: usize = 64;

/// Maximum concurrent TCP connects inside a single host's port scan
pub const PORT_WORKER_CAP: usize = 64;

/// Hard cap on the number of IPs a target specification may expand to
pub const MAX_TARGET_HOSTS: usize = 4096;

// ====== Timeouts ======

/// Plain liveness connect timeout used by the port scanner
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_millis(350);

/// Protocol probe timeout (banner reads, HTTP(S), DB handshakes, node exporter)
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(800);

/// Docker Engine API request timeout
pub const DOCKER_API_TIMEOUT: Duration = Duration::from_millis(1500);

/// SSH connect/exec timeout for credentialed enrichment
pub const SSH_TIMEOUT: Duration = Duration::from_secs(3);

/// WinRM request timeout for credentialed enrichment
pub const WINRM_TIMEOUT: Duration = Duration::from_secs(4);

/// Network device command timeout (interactive gear is slow to answer)
pub const DEVICE_CMD_TIMEOUT: Duration = Duration::from_secs(8);

/// Reverse DNS lookup timeout
pub const DNS_TIMEOUT: Duration = Duration::from_millis(2000);

// ====== SNMP ======

/// SNMP community string for v1/v2c
pub const SNMP_COMMUNITY: &str = "public";

/// SNMP request timeout
pub const SNMP_TIMEOUT: Duration = Duration::from_secs(1);

/// SNMP SET timeout (writes get a little more room)
pub const SNMP_SET_TIMEOUT: Duration = Duration::from_secs(2);

/// SNMP agent port
pub const SNMP_PORT: u16 = 161;

/// Retries per SNMP request (0 = single attempt)
pub const SNMP_RETRIES: u8 = 0;

/// Upper bound on varbinds collected by one subtree walk
pub const SNMP_WALK_MAX_ROWS: usize = 10_000;

// ====== Docker ======

/// Lines of container log requested per container
pub const CONTAINER_LOG_TAIL: usize = 100;

/// Characters of container log kept (tail end)
pub const CONTAINER_LOG_MAX_CHARS: usize = 4000;

/// HTTPS body bytes buffered for signature matching
pub const HTTPS_SNIPPET_BYTES: usize = 256;

// ====== Metrics ======

/// Default number of points returned per metric series
pub const METRICS_SERIES_POINTS: usize = 30;

// ====== Rate limits ======

/// SNMP SET requests allowed per client per window
pub const SNMP_SET_RATE_LIMIT: usize = 10;

/// Remote device commands allowed per client per window
pub const DEVICE_CMD_RATE_LIMIT: usize = 5;

/// Sliding window length for rate limits
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    match env_var(name).and_then(|v| v.parse::<u64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_usize(name: &str, default: usize, min: usize, max: usize) -> usize {
    match env_var(name).and_then(|v| v.parse::<usize>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_u16(name: &str, default: u16, min: u16, max: u16) -> u16 {
    match env_var(name).and_then(|v| v.parse::<u16>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_u8(name: &str, default: u8, min: u8, max: u8) -> u8 {
    match env_var(name).and_then(|v| v.parse::<u8>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_duration_ms(name: &str, default: Duration, min: u64, max: u64) -> Duration {
    Duration::from_millis(env_parse_u64(
        name,
        default.as_millis() as u64,
        min,
        max,
    ))
}

/// Runtime-tunable host pipeline cap.
/// Env: `NETINV_HOST_WORKERS`
pub fn host_worker_cap() -> usize {
    env_parse_usize("NETINV_HOST_WORKERS", HOST_WORKER_CAP, 1, 512)
}

/// Runtime-tunable per-host port scan cap.
/// Env: `NETINV_PORT_WORKERS`
pub fn port_worker_cap() -> usize {
    env_parse_usize("NETINV_PORT_WORKERS", PORT_WORKER_CAP, 1, 512)
}

/// Runtime-tunable target expansion cap.
/// Env: `NETINV_MAX_TARGET_HOSTS`
pub fn max_target_hosts() -> usize {
    env_parse_usize("NETINV_MAX_TARGET_HOSTS", MAX_TARGET_HOSTS, 1, 65_536)
}

/// Runtime-tunable liveness connect timeout.
/// Env: `NETINV_TCP_CONNECT_TIMEOUT_MS`
pub fn tcp_connect_timeout() -> Duration {
    env_duration_ms("NETINV_TCP_CONNECT_TIMEOUT_MS", TCP_CONNECT_TIMEOUT, 50, 10_000)
}

/// Runtime-tunable protocol probe timeout.
/// Env: `NETINV_PROBE_TIMEOUT_MS`
pub fn probe_timeout() -> Duration {
    env_duration_ms("NETINV_PROBE_TIMEOUT_MS", PROBE_TIMEOUT, 50, 10_000)
}

/// Env: `NETINV_DOCKER_TIMEOUT_MS`
pub fn docker_api_timeout() -> Duration {
    env_duration_ms("NETINV_DOCKER_TIMEOUT_MS", DOCKER_API_TIMEOUT, 100, 30_000)
}

/// Env: `NETINV_SSH_TIMEOUT_MS`
pub fn ssh_timeout() -> Duration {
    env_duration_ms("NETINV_SSH_TIMEOUT_MS", SSH_TIMEOUT, 500, 60_000)
}

/// Env: `NETINV_WINRM_TIMEOUT_MS`
pub fn winrm_timeout() -> Duration {
    env_duration_ms("NETINV_WINRM_TIMEOUT_MS", WINRM_TIMEOUT, 500, 60_000)
}

/// Env: `NETINV_DEVICE_CMD_TIMEOUT_MS`
pub fn device_cmd_timeout() -> Duration {
    env_duration_ms("NETINV_DEVICE_CMD_TIMEOUT_MS", DEVICE_CMD_TIMEOUT, 1_000, 120_000)
}

/// Env: `NETINV_DNS_TIMEOUT_MS`
pub fn dns_timeout() -> Duration {
    env_duration_ms("NETINV_DNS_TIMEOUT_MS", DNS_TIMEOUT, 100, 10_000)
}

/// Runtime-tunable SNMP community.
/// Env: `NETINV_SNMP_COMMUNITY`
pub fn snmp_community() -> String {
    env_var("NETINV_SNMP_COMMUNITY").unwrap_or_else(|| SNMP_COMMUNITY.to_string())
}

/// Env: `NETINV_SNMP_TIMEOUT_MS`
pub fn snmp_timeout() -> Duration {
    env_duration_ms("NETINV_SNMP_TIMEOUT_MS", SNMP_TIMEOUT, 100, 10_000)
}

/// Env: `NETINV_SNMP_PORT`
pub fn snmp_port() -> u16 {
    env_parse_u16("NETINV_SNMP_PORT", SNMP_PORT, 1, u16::MAX)
}

/// Env: `NETINV_SNMP_RETRIES`
pub fn snmp_retries() -> u8 {
    env_parse_u8("NETINV_SNMP_RETRIES", SNMP_RETRIES, 0, 5)
}

/// Env: `NETINV_SERIES_POINTS`
pub fn metrics_series_points() -> usize {
    env_parse_usize("NETINV_SERIES_POINTS", METRICS_SERIES_POINTS, 1, 1_000)
}

/// Env: `NETINV_SNMP_SET_RATE_LIMIT`
pub fn snmp_set_rate_limit() -> usize {
    env_parse_usize("NETINV_SNMP_SET_RATE_LIMIT", SNMP_SET_RATE_LIMIT, 1, 1_000)
}

/// Env: `NETINV_DEVICE_CMD_RATE_LIMIT`
pub fn device_cmd_rate_limit() -> usize {
    env_parse_usize("NETINV_DEVICE_CMD_RATE_LIMIT", DEVICE_CMD_RATE_LIMIT, 1, 1_000)
}

/// Database location override.
/// Env: `NETINV_DB_PATH`
pub fn db_path_override() -> Option<PathBuf> {
    env_var("NETINV_DB_PATH").map(PathBuf::from)
}
