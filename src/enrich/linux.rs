//! Linux enrichment over SSH: listening sockets and Docker via the CLI

use regex::Regex;
use ssh2::Session;
use std::net::IpAddr;
use std::sync::LazyLock;

use super::SshCredentials;
use super::ssh::{CommandOutput, exec_on, with_session};
use crate::config::{CONTAINER_LOG_MAX_CHARS, CONTAINER_LOG_TAIL};
use crate::error::ProbeError;
use crate::models::{ComposeProject, ContainerSummary, DockerInfo, DockerSource, ListeningSocket};
use crate::network::service_for_process;
use crate::scanner::docker::{container_from_ps_line, parse_compose_ls, tail_chars};

static SS_PROCESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"users:\(\("([^"]+)""#).expect("static ss process regex"));

const SS_COMMAND: &str = "ss -tulnp";
const DOCKER_PS_COMMAND: &str = "docker ps -a --format '{{json .}}'";
const COMPOSE_LS_COMMANDS: &[&str] = &[
    "docker compose ls --format json",
    "docker compose ls",
    "docker-compose ls --format json",
    "docker-compose ls",
];

/// Sessions that run the whole Docker listing get this many timeouts.
const DOCKER_SESSION_BUDGET_FACTOR: u32 = 40;

/// What a successful SSH enrichment learned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinuxEnrichment {
    pub sockets: Vec<ListeningSocket>,
    pub docker: DockerInfo,
}

/// Linux-looking label, SSH open and usable credentials
pub fn should_enrich_linux(os_label: &str, open_ports: &[u16], creds: Option<&SshCredentials>) -> bool {
    let Some(creds) = creds else {
        return false;
    };
    os_label.to_ascii_lowercase().contains("linux") && open_ports.contains(&creds.port) && creds.is_usable()
}

/// Parses `ss -tulnp` output. The header row and short lines are skipped;
/// rows whose local port is not numeric are dropped.
pub fn parse_ss_tulnp(text: &str) -> Vec<ListeningSocket> {
    let mut sockets = Vec::new();
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.to_ascii_lowercase().starts_with("netid") {
            continue;
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            continue;
        }
        let Some(addr_port) = parts
            .iter()
            .find(|p| p.contains(':') && !p.ends_with(':') && !p.starts_with("users:("))
        else {
            continue;
        };
        let Some((addr, port)) = addr_port.rsplit_once(':') else {
            continue;
        };
        let Ok(local_port) = port.parse::<u16>() else {
            continue;
        };
        let process = SS_PROCESS_RE.captures(line).map(|c| c[1].to_string());
        sockets.push(ListeningSocket {
            protocol: parts[0].to_string(),
            state: parts[1].to_string(),
            local_address: addr.trim_start_matches('[').trim_end_matches(']').to_string(),
            local_port,
            service: service_for_process(process.as_deref(), Some(local_port)),
            process,
        });
    }
    sockets
}

/// `compose ls` attempts in order; the first that prints without a
/// not-found / unknown-command signature wins.
fn list_compose_projects(session: &Session) -> Option<Vec<ComposeProject>> {
    for command in COMPOSE_LS_COMMANDS {
        let out = match exec_on(session, command) {
            Ok(out) => out,
            Err(e) => {
                crate::log_debug!("'{}' failed: {}", command, e);
                continue;
            }
        };
        let stderr = out.stderr.to_ascii_lowercase();
        if stderr.contains("not found") || stderr.contains("unknown") {
            continue;
        }
        if !out.stdout.trim().is_empty() {
            return Some(parse_compose_ls(&out.stdout));
        }
    }
    None
}

fn container_logs_command(id: &str) -> String {
    format!("docker logs {id} --tail {CONTAINER_LOG_TAIL} 2>&1")
}

/// Both streams of `docker logs`, in the order the remote shell merged them
fn log_text(output: CommandOutput) -> Option<String> {
    let mut combined = output.stdout;
    if !output.stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&output.stderr);
    }
    (!combined.is_empty()).then(|| tail_chars(&combined, CONTAINER_LOG_MAX_CHARS))
}

fn container_logs(session: &Session, id: &str) -> Option<String> {
    match exec_on(session, &container_logs_command(id)) {
        Ok(output) => log_text(output),
        Err(e) => {
            crate::log_debug!("docker logs {} failed: {}", id, e);
            None
        }
    }
}

/// Docker evidence through the CLI on an authenticated session.
/// Present when `compose ls` worked or `docker ps` ran without a
/// not-found signature.
pub fn docker_on_session(session: &Session) -> DockerInfo {
    let compose = list_compose_projects(session);

    let mut ps_ran = false;
    let mut containers: Vec<ContainerSummary> = Vec::new();
    match exec_on(session, DOCKER_PS_COMMAND) {
        Ok(out) if out.command_not_found() => {}
        Ok(out) => {
            ps_ran = true;
            containers = out.stdout.lines().filter_map(container_from_ps_line).collect();
        }
        Err(e) => crate::log_debug!("docker ps over SSH failed: {}", e),
    }
    for container in containers.iter_mut().filter(|c| !c.id.is_empty()) {
        container.logs_tail = container_logs(session, &container.id);
    }

    let present = compose.is_some() || ps_ran;
    DockerInfo {
        present,
        source: Some(DockerSource::Ssh),
        containers,
        compose_projects: compose.unwrap_or_default(),
        hint_ssh: present,
        error: (!present).then(|| "Docker not detected over SSH (compose/ps)".to_string()),
        ..Default::default()
    }
}

/// Standalone Docker probe over SSH.
pub async fn docker_via_ssh(ip: IpAddr, creds: &SshCredentials) -> Result<DockerInfo, ProbeError> {
    let budget = creds.timeout * DOCKER_SESSION_BUDGET_FACTOR;
    with_session(ip, creds, budget, |session| Ok(docker_on_session(session))).await
}

/// `ss -tulnp`, then the Docker listing, over a single session.
pub async fn enrich_linux(ip: IpAddr, creds: &SshCredentials) -> Result<LinuxEnrichment, ProbeError> {
    let budget = creds.timeout * DOCKER_SESSION_BUDGET_FACTOR;
    let enrichment = with_session(ip, creds, budget, |session| {
        let ss = exec_on(session, SS_COMMAND)?;
        if ss.stdout.trim().is_empty() {
            return Err(ProbeError::Unexpected(format!(
                "'{SS_COMMAND}' printed nothing (exit {}): {}",
                ss.exit_status,
                ss.stderr.trim()
            )));
        }
        Ok(LinuxEnrichment {
            sockets: parse_ss_tulnp(&ss.stdout),
            docker: docker_on_session(session),
        })
    })
    .await?;

    crate::log_stderr!(
        "SSH enrichment of {}: {} listening sockets, docker present: {}",
        ip,
        enrichment.sockets.len(),
        enrichment.docker.present
    );
    Ok(enrichment)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SS_OUTPUT: &str = r#"Netid State  Recv-Q Send-Q Local Address:Port  Peer Address:Port Process
udp   UNCONN 0      0          127.0.0.53%lo:53         0.0.0.0:*     users:(("systemd-resolve",pid=612,fd=13))
tcp   LISTEN 0      128           0.0.0.0:22            0.0.0.0:*     users:(("sshd",pid=901,fd=3))
tcp   LISTEN 0      511           0.0.0.0:80            0.0.0.0:*     users:(("nginx",pid=1200,fd=6),("nginx",pid=1201,fd=6))
tcp   LISTEN 0      4096             [::]:5432             [::]:*     users:(("postgres",pid=777,fd=7))
tcp   LISTEN 0      4096        127.0.0.1:9999          0.0.0.0:*
short line
"#;

    #[test]
    fn container_logs_keep_both_streams() {
        assert!(container_logs_command("3f2a").ends_with("--tail 100 2>&1"));

        let merged = log_text(CommandOutput {
            exit_status: 0,
            stdout: "GET / 200\nlistening on :8080".to_string(),
            stderr: "WARN cache miss\n".to_string(),
        });
        assert_eq!(merged.as_deref(), Some("GET / 200\nlistening on :8080\nWARN cache miss\n"));

        let stderr_only = log_text(CommandOutput {
            stderr: "panic: boom\n".to_string(),
            ..Default::default()
        });
        assert_eq!(stderr_only.as_deref(), Some("panic: boom\n"));
        assert_eq!(log_text(CommandOutput::default()), None);
    }

    #[test]
    fn ss_rows_map_to_services() {
        let sockets = parse_ss_tulnp(SS_OUTPUT);
        assert_eq!(sockets.len(), 5);

        assert_eq!(sockets[0].protocol, "udp");
        assert_eq!(sockets[0].local_address, "127.0.0.53%lo");
        assert_eq!(sockets[0].local_port, 53);

        assert_eq!(sockets[1].process.as_deref(), Some("sshd"));
        assert_eq!(sockets[1].service, "ssh");

        assert_eq!(sockets[2].service, "http");
        assert_eq!(sockets[2].state, "LISTEN");

        assert_eq!(sockets[3].local_address, "::");
        assert_eq!(sockets[3].service, "postgresql");

        assert_eq!(sockets[4].process, None);
        assert_eq!(sockets[4].service, "port-9999");
    }

    #[test]
    fn header_only_output_is_empty() {
        assert!(parse_ss_tulnp("Netid State Recv-Q Send-Q Local Address:Port Peer Address:Port").is_empty());
        assert!(parse_ss_tulnp("").is_empty());
    }

    #[test]
    fn linux_enrichment_needs_label_port_and_credentials() {
        let creds = SshCredentials::password("ops", "pw");
        assert!(should_enrich_linux("Linux/Unix (heuristic)", &[22], Some(&creds)));
        assert!(!should_enrich_linux("Windows (heuristic)", &[22], Some(&creds)));
        assert!(!should_enrich_linux("Linux/Unix (heuristic)", &[80], Some(&creds)));
        assert!(!should_enrich_linux("Linux/Unix (heuristic)", &[22], None));
        let no_secret = SshCredentials::password("ops", "");
        assert!(!should_enrich_linux("Linux/Unix (heuristic)", &[22], Some(&no_secret)));
    }
}
