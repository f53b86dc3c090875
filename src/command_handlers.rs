use anyhow::{Context, Result};
use serde_json::json;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use crate::app::{AppContext, AppEvent, SnmpRow, SnmpValueReport, SnmpWalkReport};
use crate::command::SnmpOptions;
use crate::config::{probe_timeout, snmp_community};
use crate::database::{EventKind, queries::insert_event};
use crate::discovery::{DiscoveryOptions, discover, host_info, probe_docker_host};
use crate::enrich::{
    DeviceCommandOutput, DeviceCommandRequest, SshCredentials, WinrmCredentials,
    run_device_command,
};
use crate::error::ConfigError;
use crate::metrics::{MetricsReport, sample_metrics};
use crate::models::{DbProbeResult, DiscoveryResult, DockerInfo, HostRecord, SnmpHostInfo, SnmpNeighbor};
use crate::network::{ScanMethod, resolve_host};
use crate::ratelimit::RateLimitedAction;
use crate::scanner::probe_databases;
use crate::scanner::snmp::{
    SetOutcome, SnmpTarget, SnmpVersion, build_snmp_hostinfo, discover_neighbors, snmp_get,
    snmp_set, snmp_walk,
};

async fn resolve_ip(host: &str) -> Result<IpAddr> {
    if host.trim().is_empty() {
        return Err(ConfigError::MissingField("ip").into());
    }
    resolve_host(host)
        .await
        .ok_or_else(|| anyhow::anyhow!("Cannot resolve host '{}'", host.trim()))
}

fn progress_pct(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Database-backed sink, or none when the database cannot be opened
fn host_sink(context: &AppContext) -> Option<Arc<dyn crate::database::HostSink>> {
    match context.open_database() {
        Ok(db) => Some(Arc::new(db)),
        Err(e) => {
            crate::log_warn!("Persistence disabled for this run: {:#}", e);
            context.emit_event(AppEvent::Warn {
                message: format!("Persistence disabled: {e}"),
            });
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn discover_hosts(
    target: &str,
    method: ScanMethod,
    ssh: Option<&SshCredentials>,
    winrm: Option<&WinrmCredentials>,
    deadline_secs: Option<u64>,
    ports: Option<Vec<u16>>,
    persist: bool,
    context: &AppContext,
) -> DiscoveryResult {
    let events = context.clone();
    let mut options = DiscoveryOptions::default()
        .with_cancel_flag(context.cancel_flag())
        .with_progress(Arc::new(move |done, total| {
            events.emit_event(AppEvent::DiscoveryProgress {
                done,
                total,
                progress_pct: progress_pct(done, total),
            });
        }));
    if let Some(secs) = deadline_secs {
        options = options.with_deadline(Duration::from_secs(secs));
    }
    if let Some(ports) = ports {
        options = options.with_ports(ports);
    }
    if persist && let Some(sink) = host_sink(context) {
        options = options.with_sink(sink);
    }

    let result = discover(target, method, ssh, winrm, &options).await;

    if context.is_cancelled() {
        context.emit_event(AppEvent::Cancelled {
            stage: "discovery".to_string(),
        });
    }
    result
}

pub(crate) async fn host_info_record(
    host: &str,
    method: ScanMethod,
    ssh: Option<&SshCredentials>,
    winrm: Option<&WinrmCredentials>,
    context: &AppContext,
) -> Result<HostRecord> {
    let ip = resolve_ip(host).await?;
    let mut options = DiscoveryOptions::default();
    if let Some(sink) = host_sink(context) {
        options = options.with_sink(sink);
    }
    Ok(host_info(ip, method, ssh, winrm, &options).await)
}

pub(crate) async fn docker_info(host: &str, ssh: Option<&SshCredentials>) -> Result<DockerInfo> {
    let ip = resolve_ip(host).await?;
    Ok(probe_docker_host(ip, ssh).await)
}

pub(crate) async fn db_probe(host: &str, only_online: bool) -> Result<Vec<DbProbeResult>> {
    let ip = resolve_ip(host).await?;
    Ok(probe_databases(ip, probe_timeout(), only_online).await)
}

/// Validated target. Credentials are checked before the host is resolved.
async fn snmp_target(options: &SnmpOptions) -> Result<SnmpTarget> {
    let placeholder = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
    let mut target = match (options.version, &options.v3) {
        (SnmpVersion::V3, Some(creds)) => SnmpTarget::v3(placeholder, creds.clone()),
        (version, _) => SnmpTarget::community(
            placeholder,
            version,
            options.community.clone().unwrap_or_else(snmp_community),
        ),
    };
    if let Some(port) = options.port {
        target.port = port;
    }
    target.validate()?;
    target.ip = resolve_ip(&options.host).await?;
    Ok(target)
}

pub(crate) async fn snmp_get_value(options: &SnmpOptions, oid: &str) -> Result<SnmpValueReport> {
    let target = snmp_target(options).await?;
    Ok(SnmpValueReport {
        target: target.ip.to_string(),
        oid: oid.to_string(),
        value: snmp_get(&target, oid).await,
    })
}

pub(crate) async fn snmp_walk_rows(options: &SnmpOptions, oid: &str) -> Result<SnmpWalkReport> {
    let target = snmp_target(options).await?;
    let rows = snmp_walk(&target, oid)
        .await
        .into_iter()
        .map(|(oid, value)| SnmpRow { oid, value })
        .collect();
    Ok(SnmpWalkReport {
        target: target.ip.to_string(),
        oid: oid.to_string(),
        rows,
    })
}

pub(crate) async fn snmp_info(options: &SnmpOptions) -> Result<SnmpHostInfo> {
    let target = snmp_target(options).await?;
    Ok(build_snmp_hostinfo(&target).await)
}

pub(crate) async fn snmp_neighbors(options: &SnmpOptions) -> Result<Vec<SnmpNeighbor>> {
    let target = snmp_target(options).await?;
    Ok(discover_neighbors(&target).await)
}

fn enforce_rate_limit(context: &AppContext, action: RateLimitedAction) -> Result<()> {
    context
        .rate_limiter()
        .check(context.client_id(), action)
        .map_err(|e| {
            context.emit_event(AppEvent::RateLimited {
                action: e.action.to_string(),
                retry_after_secs: e.retry_after_secs,
            });
            anyhow::Error::new(e)
        })
}

/// Best-effort audit trail entry
fn audit(context: &AppContext, kind: EventKind, target: &str, ok: bool, details: serde_json::Value) {
    let recorded = context
        .open_database()
        .and_then(|db| db.with_conn(|conn| insert_event(conn, kind, context.client_id(), target, ok, &details)));
    if let Err(e) = recorded {
        crate::log_warn!("Audit of {} on {} not recorded: {:#}", kind, target, e);
    }
}

pub(crate) async fn snmp_set_value(
    options: &SnmpOptions,
    oid: &str,
    value_type: &str,
    value: &str,
    context: &AppContext,
) -> Result<SetOutcome> {
    let target = snmp_target(options).await?;
    enforce_rate_limit(context, RateLimitedAction::SnmpSet)?;

    let outcome = snmp_set(&target, oid, value_type, value)
        .await
        .context("SNMP SET rejected")?;

    audit(
        context,
        EventKind::SnmpSet,
        &target.ip.to_string(),
        outcome.ok,
        json!({
            "oid": oid,
            "type": value_type,
            "value": value,
            "version": target.version.as_str(),
            "community": target.community,
            "v3_user": target.v3.as_ref().map(|v3| v3.user.clone()),
            "error": outcome.error,
        }),
    );
    Ok(outcome)
}

pub(crate) async fn device_command(
    request: &DeviceCommandRequest,
    context: &AppContext,
) -> Result<DeviceCommandOutput> {
    request.validate().context("Device command rejected")?;
    enforce_rate_limit(context, RateLimitedAction::DeviceCommand)?;

    let output = run_device_command(request)
        .await
        .context("Device command rejected")?;

    audit(
        context,
        EventKind::DeviceCommand,
        &output.host,
        output.ok,
        json!({
            "device_type": output.device_type,
            "command": request.command,
            "username": request.username,
            "password": request.password,
            "secret": request.secret,
            "port": request.port,
            "error": output.error,
        }),
    );
    Ok(output)
}

pub(crate) async fn metrics_report(host: &str, points: usize, context: &AppContext) -> Result<MetricsReport> {
    let ip = resolve_ip(host).await?;
    let db = context.open_database()?;
    sample_metrics(ip, &db, points).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Database, queries::get_recent_events};
    use crate::scanner::snmp::{AuthProtocol, SnmpV3Credentials};

    fn temp_db_path(prefix: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}_{}.db", prefix, uuid::Uuid::new_v4()))
    }

    #[test]
    fn progress_is_bounded() {
        assert_eq!(progress_pct(0, 0), 100);
        assert_eq!(progress_pct(1, 4), 25);
        assert_eq!(progress_pct(5, 4), 100);
    }

    #[tokio::test]
    async fn v3_without_credentials_is_rejected_before_resolving() {
        let options = SnmpOptions {
            host: "host.invalid".to_string(),
            version: SnmpVersion::V3,
            ..Default::default()
        };
        let err = snmp_target(&options).await.expect_err("v3 needs credentials");
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::MissingField("v3"))
        );
    }

    #[tokio::test]
    async fn weak_v3_auth_password_is_rejected() {
        let options = SnmpOptions {
            host: "10.0.0.1".to_string(),
            version: SnmpVersion::V3,
            v3: Some(SnmpV3Credentials {
                user: "ops".to_string(),
                auth_protocol: AuthProtocol::Sha,
                auth_password: Some("short".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let err = snmp_target(&options).await.expect_err("short password");
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::InvalidSnmpV3(_))
        ));
    }

    #[tokio::test]
    async fn community_target_uses_overrides() {
        let options = SnmpOptions {
            host: "10.0.0.1".to_string(),
            version: SnmpVersion::V1,
            community: Some("ops".to_string()),
            port: Some(1161),
            ..Default::default()
        };
        let target = snmp_target(&options).await.unwrap();
        assert_eq!(target.ip, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(target.port, 1161);
        assert_eq!(target.community, "ops");
    }

    #[tokio::test]
    async fn invalid_device_type_is_not_rate_limited() {
        let context = AppContext::from_env().with_db_path(temp_db_path("netinv_devcmd"));
        let request = DeviceCommandRequest {
            host: "10.0.0.1".to_string(),
            device_type: "toaster".to_string(),
            username: "admin".to_string(),
            command: "show version".to_string(),
            ..Default::default()
        };
        let err = device_command(&request, &context).await.expect_err("bad type");
        assert!(err.root_cause().to_string().contains("toaster"));
        assert_eq!(context.rate_limiter().tracked_windows(), 0);
    }

    #[tokio::test]
    async fn device_commands_are_audited_and_limited() {
        let path = temp_db_path("netinv_devcmd_audit");
        let context = AppContext::from_env().with_db_path(path.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = DeviceCommandRequest {
            host: "127.0.0.1".to_string(),
            device_type: "linux".to_string(),
            username: "admin".to_string(),
            password: Some("hunter22".to_string()),
            command: "uptime".to_string(),
            port: Some(port),
            ..Default::default()
        };

        let limit = RateLimitedAction::DeviceCommand.default_limit();
        for _ in 0..limit {
            let output = device_command(&request, &context).await.unwrap();
            assert!(!output.ok);
        }
        assert!(device_command(&request, &context).await.is_err());

        let db = Database::new(path).unwrap();
        let events = db.with_conn(|conn| get_recent_events(conn, 50)).unwrap();
        assert_eq!(events.len(), limit);
        assert_eq!(events[0].kind, EventKind::DeviceCommand);
        assert_ne!(events[0].details["password"], json!("hunter22"));
    }
}
