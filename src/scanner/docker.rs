//! Docker Engine detection
//!
//! The remote API (plain 2375, TLS 2376) is authoritative. The engine
//! metrics endpoint is a weaker presence signal, and a container UI on the
//! alternate management port only ever sets a hint.

use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;

use super::http::{insecure_client, probe_https, url_host};
use crate::config::{CONTAINER_LOG_MAX_CHARS, CONTAINER_LOG_TAIL};
use crate::error::ProbeError;
use crate::models::{
    ComposeProject, ContainerPort, ContainerSummary, DockerDaemonInfo, DockerInfo, DockerSource,
    DockerVersion,
};
use crate::network::service_for_port;

pub const DOCKER_API_PORT: u16 = 2375;
pub const DOCKER_API_TLS_PORT: u16 = 2376;
pub const DOCKER_METRICS_PORT: u16 = 9323;
pub const PORTAINER_HINT_PORT: u16 = 9443;

static PS_PORT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:(\d+)->)?(\d+)/(tcp|udp)?").expect("static port regex"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiContainer {
    id: String,
    #[serde(default)]
    names: Vec<String>,
    image: Option<String>,
    state: Option<String>,
    status: Option<String>,
    #[serde(default)]
    ports: Vec<ApiPort>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiPort {
    private_port: u16,
    public_port: Option<u16>,
    #[serde(rename = "Type")]
    kind: Option<String>,
}

/// One line of `docker ps --format '{{json .}}'`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsLine {
    #[serde(rename = "ID")]
    id: Option<String>,
    names: Option<String>,
    image: Option<String>,
    state: Option<String>,
    status: Option<String>,
    ports: Option<String>,
}

/// `service:port` labels for exposed container ports
pub fn classify_container_ports(ports: &[ContainerPort]) -> Vec<String> {
    ports
        .iter()
        .map(|p| {
            let port = p.effective_port();
            format!("{}:{}", service_for_port(port), port)
        })
        .collect()
}

/// Keeps the last `max` characters of `text`
pub fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        return text.to_string();
    }
    text.chars().skip(count - max).collect()
}

/// Strips the 8-byte stream headers Docker puts on non-TTY log output.
/// Input that does not look multiplexed is returned as text unchanged.
pub fn demux_log_stream(raw: &[u8]) -> String {
    let looks_framed =
        raw.len() >= 8 && raw[0] <= 2 && raw[1] == 0 && raw[2] == 0 && raw[3] == 0;
    if !looks_framed {
        return String::from_utf8_lossy(raw).into_owned();
    }

    let mut out = Vec::with_capacity(raw.len());
    let mut rest = raw;
    while rest.len() >= 8 {
        let len = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let end = (8 + len).min(rest.len());
        out.extend_from_slice(&rest[8..end]);
        rest = &rest[end..];
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parses the `Ports` column of `docker ps`, e.g.
/// `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 6379/tcp`.
pub fn parse_ps_ports(ports: &str) -> Vec<ContainerPort> {
    let mut parsed: Vec<ContainerPort> = Vec::new();
    for part in ports.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some(caps) = PS_PORT_RE.captures(part) else {
            continue;
        };
        let public_port = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok());
        let Some(private_port) = caps.get(2).and_then(|m| m.as_str().parse::<u16>().ok()) else {
            continue;
        };
        let port = ContainerPort {
            private_port,
            public_port,
            protocol: caps
                .get(3)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "tcp".to_string()),
        };
        // IPv4 and IPv6 bindings of the same mapping show up twice.
        if !parsed.contains(&port) {
            parsed.push(port);
        }
    }
    parsed
}

/// Container summary from one `docker ps` JSON line; `None` for lines that
/// are not JSON objects.
pub fn container_from_ps_line(line: &str) -> Option<ContainerSummary> {
    let ps: PsLine = serde_json::from_str(line.trim()).ok()?;
    let ports = ps.ports.as_deref().map(parse_ps_ports).unwrap_or_default();
    let running = ps
        .status
        .as_deref()
        .is_some_and(|s| s.trim().to_ascii_lowercase().starts_with("up"));
    Some(ContainerSummary {
        id: ps.id.unwrap_or_default(),
        name: ps.names,
        image: ps.image,
        state: ps.state,
        status: ps.status,
        running,
        services: classify_container_ports(&ports),
        ports,
        logs_tail: None,
    })
}

#[derive(Debug, Deserialize)]
struct ComposeLsEntry {
    #[serde(alias = "Name", alias = "project")]
    name: Option<String>,
    #[serde(alias = "Status")]
    status: Option<String>,
    #[serde(alias = "Created")]
    created: Option<String>,
}

/// Parses `docker compose ls` output: JSON array when `--format json` was
/// honoured, otherwise the first 512 characters of text are kept raw.
pub fn parse_compose_ls(output: &str) -> Vec<ComposeProject> {
    match serde_json::from_str::<Vec<ComposeLsEntry>>(output.trim()) {
        Ok(entries) => entries
            .into_iter()
            .map(|e| ComposeProject {
                name: e.name,
                status: e.status,
                created: e.created,
                raw: None,
            })
            .collect(),
        Err(_) => vec![ComposeProject {
            raw: Some(output.chars().take(512).collect()),
            ..Default::default()
        }],
    }
}

async fn get_ok(client: &Client, url: &str) -> Result<reqwest::Response, ProbeError> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        return Err(ProbeError::Unexpected(format!(
            "{url} returned HTTP {}",
            resp.status().as_u16()
        )));
    }
    Ok(resp)
}

async fn fetch_container_logs(client: &Client, base: &str, id: &str) -> Result<String, ProbeError> {
    let url = format!("{base}/containers/{id}/logs?stdout=1&stderr=1&tail={CONTAINER_LOG_TAIL}");
    let body = get_ok(client, &url).await?.bytes().await?;
    Ok(tail_chars(&demux_log_stream(&body), CONTAINER_LOG_MAX_CHARS))
}

async fn query_engine(client: &Client, base: &str) -> Result<DockerInfo, ProbeError> {
    let version: DockerVersion = get_ok(client, &format!("{base}/version")).await?.json().await?;

    let mut docker = DockerInfo {
        present: true,
        source: Some(DockerSource::Api),
        endpoint: Some(base.to_string()),
        version: Some(version),
        ..Default::default()
    };

    match get_ok(client, &format!("{base}/info")).await {
        Ok(resp) => match resp.json::<DockerDaemonInfo>().await {
            Ok(info) => docker.info = Some(info),
            Err(e) => crate::log_debug!("Docker /info from {} undecodable: {}", base, e),
        },
        Err(e) => crate::log_debug!("Docker /info from {} failed: {}", base, e),
    }

    let containers: Vec<ApiContainer> =
        match get_ok(client, &format!("{base}/containers/json?all=0")).await {
            Ok(resp) => resp.json().await.unwrap_or_default(),
            Err(e) => {
                crate::log_debug!("Docker container list from {} failed: {}", base, e);
                Vec::new()
            }
        };

    for c in containers {
        let ports: Vec<ContainerPort> = c
            .ports
            .iter()
            .map(|p| ContainerPort {
                private_port: p.private_port,
                public_port: p.public_port,
                protocol: p.kind.clone().unwrap_or_else(|| "tcp".to_string()),
            })
            .collect();
        let logs_tail = match fetch_container_logs(client, base, &c.id).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                crate::log_debug!("Logs for container {} unavailable: {}", c.id, e);
                None
            }
        };
        docker.containers.push(ContainerSummary {
            name: c.names.first().map(|n| n.trim_start_matches('/').to_string()),
            running: c.state.as_deref() == Some("running"),
            image: c.image,
            state: c.state,
            status: c.status,
            services: classify_container_ports(&ports),
            ports,
            logs_tail,
            id: c.id,
        });
    }

    Ok(docker)
}

/// Remote Engine API: plaintext port first, TLS second. The first endpoint
/// whose `/version` answers wins.
pub async fn probe_docker_api(ip: IpAddr, limit: Duration) -> Result<DockerInfo, ProbeError> {
    let client = insecure_client(limit)?;
    let host = url_host(ip);
    let bases = [
        format!("http://{host}:{DOCKER_API_PORT}"),
        format!("https://{host}:{DOCKER_API_TLS_PORT}"),
    ];

    let mut last_err = None;
    for base in &bases {
        match query_engine(&client, base).await {
            Ok(docker) => return Ok(docker),
            Err(e) => {
                crate::log_debug!("Docker API {} unavailable: {}", base, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| ProbeError::Unexpected("no Docker endpoint tried".to_string())))
}

/// Engine metrics endpoint: present when it exposes daemon series
pub async fn probe_docker_metrics(ip: IpAddr, limit: Duration) -> Result<bool, ProbeError> {
    let client = insecure_client(limit)?;
    let url = format!("http://{}:{}/metrics", url_host(ip), DOCKER_METRICS_PORT);
    let body = get_ok(&client, &url).await?.text().await?;
    Ok(body.contains("engine_daemon") || body.contains("dockerd"))
}

/// Full Docker probe. Each sub-probe failure only leaves its fields empty.
pub async fn probe_docker(ip: IpAddr, api_timeout: Duration, probe_timeout: Duration) -> DockerInfo {
    let mut docker = match probe_docker_api(ip, api_timeout).await {
        Ok(docker) => docker,
        Err(e) => DockerInfo {
            error: Some(e.to_string()),
            ..Default::default()
        },
    };

    match probe_docker_metrics(ip, api_timeout).await {
        Ok(true) => {
            docker.present = true;
            docker.metrics_present = true;
            docker.error = None;
        }
        Ok(false) => {}
        Err(e) => crate::log_debug!("Docker metrics on {} unavailable: {}", ip, e),
    }

    if let Ok(fp) = probe_https(ip, PORTAINER_HINT_PORT, probe_timeout).await
        && fp.mentions("portainer")
    {
        docker.hint_portainer = true;
    }

    docker
}

/// Folds SSH-sourced Docker evidence into an API-sourced result.
/// Prior fields survive; SSH presence wins when it confirms Docker.
pub fn merge_ssh_docker(mut base: DockerInfo, ssh: DockerInfo) -> DockerInfo {
    if ssh.present {
        base.present = true;
        base.hint_ssh = true;
        base.error = None;
        if base.source.is_none() {
            base.source = Some(DockerSource::Ssh);
        }
    }
    if !ssh.containers.is_empty() || base.containers.is_empty() {
        base.containers = ssh.containers;
    }
    if !ssh.compose_projects.is_empty() {
        base.compose_projects = ssh.compose_projects;
    }
    if !base.present && base.error.is_none() {
        base.error = ssh.error;
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ps_ports_prefer_published_port() {
        let ports = parse_ps_ports("0.0.0.0:8080->80/tcp, :::8080->80/tcp, 6379/tcp");
        assert_eq!(
            ports,
            vec![
                ContainerPort {
                    private_port: 80,
                    public_port: Some(8080),
                    protocol: "tcp".to_string()
                },
                ContainerPort {
                    private_port: 6379,
                    public_port: None,
                    protocol: "tcp".to_string()
                },
            ]
        );
        assert_eq!(
            classify_container_ports(&ports),
            vec!["http-alt:8080".to_string(), "redis:6379".to_string()]
        );
    }

    #[test]
    fn ps_line_becomes_container_summary() {
        let line = r#"{"ID":"a1b2c3","Names":"cache","Image":"redis:7","State":"running","Status":"Up 3 hours","Ports":"0.0.0.0:6379->6379/tcp"}"#;
        let c = container_from_ps_line(line).expect("valid json line");
        assert_eq!(c.id, "a1b2c3");
        assert!(c.running);
        assert_eq!(c.services, vec!["redis:6379".to_string()]);
    }

    #[test]
    fn exited_containers_are_not_running() {
        let line = r#"{"ID":"ff","Names":"job","Status":"Exited (0) 2 days ago","Ports":""}"#;
        let c = container_from_ps_line(line).unwrap();
        assert!(!c.running);
        assert!(c.ports.is_empty());
    }

    #[test]
    fn non_json_ps_lines_are_skipped() {
        assert!(container_from_ps_line("CONTAINER ID   IMAGE").is_none());
    }

    #[test]
    fn demux_strips_stream_headers() {
        let mut raw = vec![1u8, 0, 0, 0, 0, 0, 0, 6];
        raw.extend_from_slice(b"hello\n");
        raw.extend_from_slice(&[2u8, 0, 0, 0, 0, 0, 0, 4]);
        raw.extend_from_slice(b"err\n");
        assert_eq!(demux_log_stream(&raw), "hello\nerr\n");
    }

    #[test]
    fn demux_passes_plain_text_through() {
        assert_eq!(demux_log_stream(b"tty output\n"), "tty output\n");
    }

    #[test]
    fn tail_keeps_last_characters() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }

    #[test]
    fn compose_ls_json_and_text() {
        let json = r#"[{"Name":"stack","Status":"running(3)","ConfigFiles":"/srv/stack/compose.yml"}]"#;
        let projects = parse_compose_ls(json);
        assert_eq!(projects[0].name.as_deref(), Some("stack"));
        assert_eq!(projects[0].status.as_deref(), Some("running(3)"));

        let text = parse_compose_ls("NAME STATUS\nstack running(3)\n");
        assert!(text[0].raw.as_deref().unwrap().starts_with("NAME"));
    }

    #[test]
    fn ssh_merge_keeps_api_fields() {
        let api = DockerInfo {
            present: true,
            source: Some(DockerSource::Api),
            info: Some(DockerDaemonInfo {
                operating_system: Some("Ubuntu 22.04".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let ssh = DockerInfo {
            present: true,
            containers: vec![ContainerSummary {
                id: "x".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let merged = merge_ssh_docker(api, ssh);
        assert!(merged.hint_ssh);
        assert_eq!(merged.source, Some(DockerSource::Api));
        assert_eq!(merged.daemon_os(), Some("Ubuntu 22.04"));
        assert_eq!(merged.containers.len(), 1);
    }
}
