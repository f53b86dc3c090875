use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cli::{usage_text, version_text};
use crate::command::AppCommand;
use crate::command_handlers::{
    db_probe, device_command, discover_hosts, docker_info, host_info_record, metrics_report,
    snmp_get_value, snmp_info, snmp_neighbors, snmp_set_value, snmp_walk_rows,
};
use crate::enrich::DeviceCommandOutput;
use crate::metrics::MetricsReport;
use crate::models::{DbProbeResult, DiscoveryResult, DockerInfo, HostRecord, SnmpHostInfo, SnmpNeighbor};
use crate::ratelimit::RateLimiter;
use crate::scanner::snmp::SetOutcome;

pub type OutputHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type EventHook = Arc<dyn Fn(&AppEvent) + Send + Sync>;

/// Identity used for rate limiting and auditing when the caller gives none
pub const LOCAL_CLIENT_ID: &str = "local";

#[derive(Clone)]
pub struct AppContext {
    db_path: PathBuf,
    client_id: String,
    output_hook: OutputHook,
    event_hook: EventHook,
    cancel_flag: Arc<AtomicBool>,
    rate_limiter: Arc<RateLimiter>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppEvent {
    Info { message: String },
    Warn { message: String },
    Error { message: String },
    DiscoveryProgress { done: usize, total: usize, progress_pct: u8 },
    RateLimited { action: String, retry_after_secs: u64 },
    Cancelled { stage: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpValueReport {
    pub target: String,
    pub oid: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpRow {
    pub oid: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnmpWalkReport {
    pub target: String,
    pub oid: String,
    pub rows: Vec<SnmpRow>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum AppCommandResult {
    HelpText(String),
    VersionText(String),
    Discovery(DiscoveryResult),
    HostInfo(Box<HostRecord>),
    Docker(DockerInfo),
    DbProbe(Vec<DbProbeResult>),
    SnmpGet(SnmpValueReport),
    SnmpWalk(SnmpWalkReport),
    SnmpSet(SetOutcome),
    SnmpInfo(SnmpHostInfo),
    SnmpNeighbors(Vec<SnmpNeighbor>),
    Metrics(MetricsReport),
    DeviceCommand(DeviceCommandOutput),
}

impl Default for AppContext {
    fn default() -> Self {
        Self::from_env()
    }
}

impl AppContext {
    pub fn from_env() -> Self {
        Self {
            db_path: crate::database::Database::default_path(),
            client_id: LOCAL_CLIENT_ID.to_string(),
            output_hook: Arc::new(|line| println!("{}", line)),
            event_hook: Arc::new(|_| {}),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            rate_limiter: Arc::new(RateLimiter::default()),
        }
    }

    pub fn with_db_path(mut self, db_path: PathBuf) -> Self {
        self.db_path = db_path;
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn with_output_hook(mut self, output_hook: OutputHook) -> Self {
        self.output_hook = output_hook;
        self
    }

    pub fn with_event_hook(mut self, event_hook: EventHook) -> Self {
        self.event_hook = event_hook;
        self
    }

    /// Shares one limiter between several contexts
    pub fn with_rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn open_database(&self) -> Result<crate::database::Database> {
        crate::database::Database::new(self.db_path.clone())
            .with_context(|| format!("Failed to open database at {}", self.db_path.display()))
    }

    pub fn emit_line(&self, line: &str) {
        (self.output_hook)(line);
    }

    pub fn emit_event(&self, event: AppEvent) {
        (self.event_hook)(&event);
    }

    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
    }

    pub fn reset_cancel(&self) {
        self.cancel_flag.store(false, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }
}

/// Compatibility wrapper for CLI adapter entrypoint.
pub async fn run<I, S>(args: I) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    crate::cli_adapter::run(args).await
}

/// Compatibility wrapper for CLI adapter entrypoint.
pub async fn run_with_ctrl_c<I, S>(args: I, context: &AppContext) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    crate::cli_adapter::run_with_ctrl_c(args, context).await
}

/// Compatibility wrapper for CLI adapter entrypoint.
pub async fn run_with_context<I, S>(args: I, context: &AppContext) -> Result<()>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    crate::cli_adapter::run_with_context(args, context).await
}

/// Execute a pre-parsed command. This is reusable for non-CLI entrypoints.
pub async fn execute_command(command: AppCommand) -> Result<()> {
    let context = AppContext::from_env();
    execute_command_with_context(command, &context).await
}

/// Execute a pre-parsed command with an explicit execution context.
pub async fn execute_command_with_context(command: AppCommand, context: &AppContext) -> Result<()> {
    let result = execute_command_typed(command, context).await?;
    emit_command_result(&result, context)
}

/// Execute a pre-parsed command and return a strongly-typed result payload.
pub async fn execute_command_typed(
    command: AppCommand,
    context: &AppContext,
) -> Result<AppCommandResult> {
    match command {
        AppCommand::Help => Ok(AppCommandResult::HelpText(usage_text())),
        AppCommand::Version => Ok(AppCommandResult::VersionText(version_text())),
        AppCommand::Discover {
            target,
            method,
            ssh,
            winrm,
            deadline_secs,
            ports,
            persist,
        } => Ok(AppCommandResult::Discovery(
            discover_hosts(
                &target,
                method,
                ssh.as_ref(),
                winrm.as_ref(),
                deadline_secs,
                ports,
                persist,
                context,
            )
            .await,
        )),
        AppCommand::HostInfo {
            ip,
            method,
            ssh,
            winrm,
        } => Ok(AppCommandResult::HostInfo(Box::new(
            host_info_record(&ip, method, ssh.as_ref(), winrm.as_ref(), context).await?,
        ))),
        AppCommand::Docker { ip, ssh } => Ok(AppCommandResult::Docker(
            docker_info(&ip, ssh.as_ref()).await?,
        )),
        AppCommand::DbProbe { ip, only_online } => {
            Ok(AppCommandResult::DbProbe(db_probe(&ip, only_online).await?))
        }
        AppCommand::SnmpGet { snmp, oid } => Ok(AppCommandResult::SnmpGet(
            Box::pin(snmp_get_value(&snmp, &oid)).await?,
        )),
        AppCommand::SnmpWalk { snmp, oid } => Ok(AppCommandResult::SnmpWalk(
            Box::pin(snmp_walk_rows(&snmp, &oid)).await?,
        )),
        AppCommand::SnmpSet {
            snmp,
            oid,
            value_type,
            value,
        } => Ok(AppCommandResult::SnmpSet(
            Box::pin(snmp_set_value(&snmp, &oid, &value_type, &value, context)).await?,
        )),
        AppCommand::SnmpInfo { snmp } => Ok(AppCommandResult::SnmpInfo(Box::pin(snmp_info(&snmp)).await?)),
        AppCommand::SnmpNeighbors { snmp } => Ok(AppCommandResult::SnmpNeighbors(
            Box::pin(snmp_neighbors(&snmp)).await?,
        )),
        AppCommand::Metrics { ip, points } => Ok(AppCommandResult::Metrics(
            metrics_report(&ip, points, context).await?,
        )),
        AppCommand::DeviceCommand(request) => Ok(AppCommandResult::DeviceCommand(
            device_command(&request, context).await?,
        )),
    }
}

fn emit_json<T: Serialize>(value: &T, what: &str, context: &AppContext) -> Result<()> {
    let output = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {} output", what))?;
    context.emit_line(&output);
    Ok(())
}

fn emit_command_result(result: &AppCommandResult, context: &AppContext) -> Result<()> {
    match result {
        AppCommandResult::HelpText(text) | AppCommandResult::VersionText(text) => {
            context.emit_line(text);
            Ok(())
        }
        AppCommandResult::Discovery(result) => emit_json(result, "discover", context),
        AppCommandResult::HostInfo(host) => emit_json(host, "hostinfo", context),
        AppCommandResult::Docker(docker) => emit_json(docker, "docker", context),
        AppCommandResult::DbProbe(results) => emit_json(results, "dbprobe", context),
        AppCommandResult::SnmpGet(report) => emit_json(report, "snmp-get", context),
        AppCommandResult::SnmpWalk(report) => emit_json(report, "snmp-walk", context),
        AppCommandResult::SnmpSet(outcome) => emit_json(outcome, "snmp-set", context),
        AppCommandResult::SnmpInfo(info) => emit_json(info, "snmp-info", context),
        AppCommandResult::SnmpNeighbors(neighbors) => {
            if neighbors.is_empty() {
                context.emit_event(AppEvent::Info {
                    message: "No LLDP or CDP neighbors reported".to_string(),
                });
            }
            emit_json(neighbors, "snmp-neighbors", context)
        }
        AppCommandResult::Metrics(report) => emit_json(report, "metrics", context),
        AppCommandResult::DeviceCommand(output) => emit_json(output, "device-cmd", context),
    }
}

#[cfg(test)]
mod tests {
    use crate::AppCommand;
    use crate::models::{DiscoveryResult, HostRecord};
    use std::sync::{Arc, Mutex};

    use super::{AppCommandResult, AppContext, AppEvent, execute_command_typed};

    #[test]
    fn discovery_result_uses_camel_case_envelope() {
        let result = AppCommandResult::Discovery(DiscoveryResult {
            method: "tcp".to_string(),
            discovered_devices: vec![HostRecord::new("10.0.0.5".to_string(), "db01".to_string())],
        });

        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"kind\":\"discovery\""));
        assert!(json.contains("\"discoveredDevices\":["));
        assert!(json.contains("\"ip\":\"10.0.0.5\""));
    }

    #[tokio::test]
    async fn execute_command_typed_help_returns_help_variant() {
        let context = AppContext::from_env();
        let result = execute_command_typed(AppCommand::Help, &context)
            .await
            .expect("typed command execution should succeed");

        assert!(matches!(result, AppCommandResult::HelpText(text) if text.contains("Usage:")));
    }

    #[test]
    fn context_event_hook_receives_emitted_event() {
        let events: Arc<Mutex<Vec<AppEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let context = AppContext::from_env().with_event_hook(Arc::new(move |event| {
            sink.lock()
                .expect("event lock should not be poisoned")
                .push(event.clone());
        }));

        context.emit_event(AppEvent::Info {
            message: "hello".to_string(),
        });

        let captured = events.lock().expect("event lock should not be poisoned");
        assert_eq!(captured.len(), 1);
        assert_eq!(
            captured[0],
            AppEvent::Info {
                message: "hello".to_string()
            }
        );
    }

    #[test]
    fn context_cancel_flag_can_be_set_and_reset() {
        let context = AppContext::from_env();
        assert!(!context.is_cancelled());
        context.cancel();
        assert!(context.is_cancelled());
        assert!(context.cancel_flag().load(std::sync::atomic::Ordering::Relaxed));
        context.reset_cancel();
        assert!(!context.is_cancelled());
    }

    #[test]
    fn cloned_contexts_share_the_rate_limiter() {
        let context = AppContext::from_env().with_client_id("10.9.9.9");
        let clone = context.clone();
        context
            .rate_limiter()
            .check("10.9.9.9", crate::ratelimit::RateLimitedAction::SnmpSet)
            .unwrap();
        assert_eq!(clone.rate_limiter().tracked_windows(), 1);
        assert_eq!(clone.client_id(), "10.9.9.9");
    }
}
