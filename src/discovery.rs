//! Discovery orchestrator
//!
//! Expands a target into addresses and runs one host pipeline per address:
//! scan ports, probe what answered, classify, optionally enrich over SSH or
//! WinRM, then compose the final OS label. Host pipelines run at a bounded
//! concurrency that is independent of the per-host port scan cap.

use std::collections::HashSet;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::classifier::{
    append_listener_details, build_service_details, build_services, compose_os_label,
    guess_virtualization,
};
use crate::config::{
    docker_api_timeout, host_worker_cap, max_target_hosts, port_worker_cap, probe_timeout,
    tcp_connect_timeout,
};
use crate::database::HostSink;
use crate::enrich::{
    SshCredentials, WinrmCredentials, docker_via_ssh, enrich_linux, enrich_windows,
    should_enrich_linux, should_enrich_windows,
};
use crate::models::{
    DiscoveryResult, DockerInfo, EnrichmentKind, EnrichmentReport, HostRecord, HostStatus,
};
use crate::network::{ScanMethod, TargetSpec, reverse_dns};
use crate::scanner::{
    PortProbe, merge_ssh_docker, open_ports, probe_docker, probe_open_ports, scan_ports,
    scrape_node_exporter,
};

/// Called after each finished host with `(done, total)`
pub type ProgressHook = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Knobs of one discovery run
#[derive(Clone)]
pub struct DiscoveryOptions {
    /// Once set, no further hosts are scheduled
    pub cancel: Option<Arc<AtomicBool>>,
    /// Overall budget; in-flight hosts finish, new ones are not started
    pub deadline: Option<Duration>,
    pub sink: Option<Arc<dyn HostSink>>,
    pub progress: Option<ProgressHook>,
    /// Replaces the method's port set when present
    pub ports: Option<Vec<u16>>,
    pub host_workers: usize,
    pub port_workers: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            cancel: None,
            deadline: None,
            sink: None,
            progress: None,
            ports: None,
            host_workers: host_worker_cap(),
            port_workers: port_worker_cap(),
        }
    }
}

impl DiscoveryOptions {
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn HostSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_progress(mut self, progress: ProgressHook) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Some(ports);
        self
    }

    fn port_set(&self, method: ScanMethod) -> Vec<u16> {
        match &self.ports {
            Some(ports) => {
                let mut seen = HashSet::new();
                ports
                    .iter()
                    .copied()
                    .filter(|p| *p != 0 && seen.insert(*p))
                    .collect()
            }
            None => method.ports(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

fn enrichment_report(kind: EnrichmentKind, error: Option<String>) -> EnrichmentReport {
    EnrichmentReport {
        kind,
        ok: error.is_none(),
        error,
    }
}

/// Full pipeline for one host. Never fails: every probe or enrichment
/// error ends up as an absent field or an `ok: false` report.
pub async fn host_info(
    ip: IpAddr,
    method: ScanMethod,
    ssh: Option<&SshCredentials>,
    winrm: Option<&WinrmCredentials>,
    options: &DiscoveryOptions,
) -> HostRecord {
    let hostname = reverse_dns(ip).await;
    let mut host = HostRecord::new(ip.to_string(), hostname);

    // Scanning
    let ports = options.port_set(method);
    let scan = scan_ports(ip, &ports, tcp_connect_timeout(), options.port_workers).await;
    let open = open_ports(&scan);
    host.status = HostStatus::from_open_ports(&open);

    // Probing
    let limit = probe_timeout();
    let probes = probe_open_ports(ip, &open, limit).await;
    let (node, docker) = tokio::join!(
        scrape_node_exporter(ip, limit),
        probe_docker(ip, docker_api_timeout(), limit)
    );
    host.node_exporter = node.unwrap_or_else(|e| {
        crate::log_debug!("Node exporter on {} absent: {}", ip, e);
        Default::default()
    });
    host.docker = docker;

    // Preliminary classification
    host.services = build_services(&open, &probes);
    host.services_detailed = build_service_details(&open, &probes, &host.node_exporter, &host.docker);
    host.databases = probes
        .values()
        .filter_map(|outcome| match outcome.probe() {
            Some(PortProbe::Database(db)) => Some(db.clone()),
            _ => None,
        })
        .collect();
    host.virtualization = guess_virtualization(&open).map(str::to_string);
    host.open_ports = open;
    host.os = compose_os_label(&host);

    // Enriching
    if should_enrich_linux(&host.os, &host.open_ports, ssh)
        && let Some(creds) = ssh
    {
        let error = match enrich_linux(ip, creds).await {
            Ok(enrichment) => {
                append_listener_details(
                    &mut host.services_detailed,
                    enrichment
                        .sockets
                        .iter()
                        .map(|s| (Some(s.local_port), s.process.as_deref())),
                );
                host.linux_ports = Some(enrichment.sockets);
                host.docker = merge_ssh_docker(std::mem::take(&mut host.docker), enrichment.docker);
                None
            }
            Err(e) => {
                crate::log_warn!("SSH enrichment of {} failed: {}", ip, e);
                Some(e.to_string())
            }
        };
        host.enrichment.push(enrichment_report(EnrichmentKind::Ssh, error));
    }

    if should_enrich_windows(&host.os, &host.open_ports, winrm)
        && let Some(creds) = winrm
    {
        let error = match enrich_windows(ip, creds).await {
            Ok(enrichment) => {
                append_listener_details(
                    &mut host.services_detailed,
                    enrichment
                        .listeners
                        .iter()
                        .map(|l| (l.port, l.process.as_deref())),
                );
                host.windows_ports = Some(enrichment.listeners);
                host.windows_os = enrichment.os;
                None
            }
            Err(e) => {
                crate::log_warn!("WinRM enrichment of {} failed: {}", ip, e);
                Some(e.to_string())
            }
        };
        host.enrichment.push(enrichment_report(EnrichmentKind::Winrm, error));
    }

    // Classified
    host.os = compose_os_label(&host);

    crate::log_debug!(
        "{} classified: status={} os={} open={:?}",
        ip,
        host.status.as_str(),
        host.os,
        host.open_ports
    );

    if let Some(sink) = &options.sink {
        persist_host(Arc::clone(sink), &host).await;
    }

    host
}

/// Hands the record to the sink on the blocking pool. Failures are logged.
async fn persist_host(sink: Arc<dyn HostSink>, host: &HostRecord) {
    let record = host.clone();
    let ip = host.ip.clone();
    match tokio::task::spawn_blocking(move || sink.save_host(&record)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => crate::log_warn!("Persisting {} failed: {:#}", ip, e),
        Err(e) => crate::log_warn!("Persist task for {} failed: {}", ip, e),
    }
}

/// Docker evidence for one host: the Engine API probe, then, with
/// credentials, the SSH listing folded over it.
pub async fn probe_docker_host(ip: IpAddr, ssh: Option<&SshCredentials>) -> DockerInfo {
    let docker = probe_docker(ip, docker_api_timeout(), probe_timeout()).await;
    let Some(creds) = ssh.filter(|c| c.is_usable()) else {
        return docker;
    };
    match docker_via_ssh(ip, creds).await {
        Ok(ssh_docker) => merge_ssh_docker(docker, ssh_docker),
        Err(e) => {
            crate::log_warn!("Docker over SSH on {} failed: {}", ip, e);
            let mut docker = docker;
            if !docker.present {
                docker.error = Some(e.to_string());
            }
            docker
        }
    }
}

fn sort_key(host: &HostRecord) -> (Option<IpAddr>, String) {
    (host.ip.parse().ok(), host.ip.clone())
}

/// Discovers every host of `target`.
///
/// Malformed targets expand to nothing and give an empty device list. A
/// cancelled flag or an elapsed deadline stops scheduling; pipelines that
/// already started run to completion and are returned.
pub async fn discover(
    target: &str,
    method: ScanMethod,
    ssh: Option<&SshCredentials>,
    winrm: Option<&WinrmCredentials>,
    options: &DiscoveryOptions,
) -> DiscoveryResult {
    let ssh = Arc::new(ssh.cloned());
    let winrm = Arc::new(winrm.cloned());
    let pipeline_options = options.clone();

    let devices = run_host_pipelines(target, method, options, move |ip| {
        let ssh = Arc::clone(&ssh);
        let winrm = Arc::clone(&winrm);
        let options = pipeline_options.clone();
        async move { host_info(ip, method, (*ssh).as_ref(), (*winrm).as_ref(), &options).await }
    })
    .await;

    DiscoveryResult {
        method: method.as_str().to_string(),
        discovered_devices: devices,
    }
}

/// Expands `target` and runs `pipeline` once per address under the
/// host-level semaphore. Results come back sorted by address.
async fn run_host_pipelines<F, Fut>(
    target: &str,
    method: ScanMethod,
    options: &DiscoveryOptions,
    pipeline: F,
) -> Vec<HostRecord>
where
    F: Fn(IpAddr) -> Fut,
    Fut: Future<Output = HostRecord> + Send + 'static,
{
    let started = Instant::now();
    let deadline = options.deadline.map(|d| started + d);
    let ips = TargetSpec::parse(target).expand(max_target_hosts()).await;
    let total = ips.len();

    crate::log_stderr!(
        "Discovering {} host(s) in '{}' with method {}",
        total,
        target,
        method.as_str()
    );

    let semaphore = Arc::new(Semaphore::new(options.host_workers.max(1)));
    let results: Arc<Mutex<Vec<HostRecord>>> = Arc::new(Mutex::new(Vec::with_capacity(total)));
    let done = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(total);

    for ip in ips {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                crate::log_warn!("Host semaphore closed: {}", e);
                break;
            }
        };

        if options.is_cancelled() {
            crate::log_stderr!("Discovery cancelled; not scheduling {} and later hosts", ip);
            break;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            crate::log_warn!("Discovery deadline reached; not scheduling {} and later hosts", ip);
            break;
        }

        let results = Arc::clone(&results);
        let done = Arc::clone(&done);
        let progress = options.progress.clone();
        let host = pipeline(ip);

        handles.push(tokio::spawn(async move {
            let _permit = permit;
            let host = host.await;
            results.lock().await.push(host);

            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(progress) = &progress {
                progress(finished, total);
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            crate::log_warn!("Host pipeline task failed: {}", e);
        }
    }

    let mut devices = std::mem::take(&mut *results.lock().await);
    devices.sort_by_key(sort_key);

    let online = devices.iter().filter(|h| h.is_online()).count();
    crate::log_stderr!(
        "Discovery finished: {} of {} host(s) online in {} ms",
        online,
        devices.len(),
        started.elapsed().as_millis()
    );
    devices
}
