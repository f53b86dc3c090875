//! Database wire-handshake probes
//!
//! Each probe does the smallest exchange that identifies the service
//! without authenticating, and records the round trip in milliseconds.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::tcp::{connect, elapsed_ms};
use crate::error::{ProbeError, with_timeout};
use crate::models::DbProbeResult;

/// PostgreSQL SSLRequest: length 8, request code 80877103
const PG_SSL_REQUEST: [u8; 8] = [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f];
const MYSQL_PROTOCOL_V10: u8 = 10;
const REDIS_PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";
const AMQP_HEADER: &[u8] = b"AMQP\x00\x00\x09\x01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    Postgresql,
    Mysql,
    Sqlserver,
    Mongodb,
    Redis,
    Rabbitmq,
}

/// Fixed check list of the standalone database probe
pub const DB_CHECKS: &[(DbKind, u16)] = &[
    (DbKind::Postgresql, 5432),
    (DbKind::Postgresql, 5433),
    (DbKind::Mysql, 3306),
    (DbKind::Sqlserver, 1433),
    (DbKind::Mongodb, 27017),
    (DbKind::Redis, 6379),
    (DbKind::Rabbitmq, 5672),
];

impl DbKind {
    pub fn name(&self) -> &'static str {
        match self {
            DbKind::Postgresql => "postgresql",
            DbKind::Mysql => "mysql",
            DbKind::Sqlserver => "sqlserver",
            DbKind::Mongodb => "mongodb",
            DbKind::Redis => "redis",
            DbKind::Rabbitmq => "rabbitmq",
        }
    }

    /// Database kind listening on a well-known port, if any
    pub fn for_port(port: u16) -> Option<DbKind> {
        DB_CHECKS
            .iter()
            .find(|(_, p)| *p == port)
            .map(|(kind, _)| *kind)
    }
}

/// Handshake-specific evidence, merged into a `DbProbeResult`
#[derive(Debug, Default)]
struct Handshake {
    tls_supported: Option<bool>,
    server_version: Option<String>,
    banner: Option<String>,
    pong: Option<bool>,
    amqp_ready: Option<bool>,
}

async fn read_some(stream: &mut TcpStream, max: usize, limit: Duration) -> Result<Vec<u8>, ProbeError> {
    let mut buf = vec![0u8; max];
    let n = with_timeout("handshake read", limit, async {
        stream.read(&mut buf).await.map_err(ProbeError::from)
    })
    .await?;
    buf.truncate(n);
    Ok(buf)
}

async fn send(stream: &mut TcpStream, payload: &[u8], limit: Duration) -> Result<(), ProbeError> {
    with_timeout("handshake write", limit, async {
        stream.write_all(payload).await.map_err(ProbeError::from)
    })
    .await
}

/// Version string after the protocol byte of a MySQL greeting
pub fn mysql_version(greeting: &[u8]) -> Option<String> {
    if greeting.len() <= 5 {
        return None;
    }
    let body = &greeting[1..];
    let end = body.iter().position(|b| *b == 0)?;
    Some(String::from_utf8_lossy(&body[..end]).into_owned())
}

/// Version from a greeting read off the wire. The 4-byte packet header
/// is skipped only when protocol version 10 follows it.
fn greeting_version(greeting: &[u8]) -> Option<String> {
    match greeting.get(4) {
        Some(&MYSQL_PROTOCOL_V10) => mysql_version(&greeting[4..]),
        _ => mysql_version(greeting),
    }
}

fn hex_prefix(bytes: &[u8], max: usize) -> String {
    bytes.iter().take(max).map(|b| format!("{b:02x}")).collect()
}

async fn handshake(kind: DbKind, stream: &mut TcpStream, limit: Duration) -> Result<Handshake, ProbeError> {
    let mut hs = Handshake::default();
    match kind {
        DbKind::Postgresql => {
            send(stream, &PG_SSL_REQUEST, limit).await?;
            let resp = read_some(stream, 1, limit).await?;
            hs.tls_supported = Some(resp.first() == Some(&b'S'));
        }
        DbKind::Mysql => {
            let greeting = read_some(stream, 128, limit).await?;
            hs.server_version = greeting_version(&greeting);
        }
        DbKind::Sqlserver => {}
        DbKind::Mongodb => {
            // Mongo does not talk first; an empty read still proves the socket.
            if let Ok(data) = read_some(stream, 64, limit).await
                && !data.is_empty()
            {
                hs.banner = Some(hex_prefix(&data, 16));
            }
        }
        DbKind::Redis => {
            send(stream, REDIS_PING, limit).await?;
            let resp = read_some(stream, 64, limit).await?;
            hs.pong = Some(resp.starts_with(b"+PONG"));
        }
        DbKind::Rabbitmq => {
            send(stream, AMQP_HEADER, limit).await?;
            let resp = read_some(stream, 64, limit).await.unwrap_or_default();
            hs.amqp_ready = Some(!resp.is_empty());
        }
    }
    Ok(hs)
}

async fn run_probe(kind: DbKind, ip: IpAddr, port: u16, limit: Duration) -> Result<(Handshake, f64), ProbeError> {
    let started = Instant::now();
    let mut stream = connect(ip, port, limit).await?;
    let hs = handshake(kind, &mut stream, limit).await?;
    Ok((hs, elapsed_ms(started)))
}

/// Probes one database endpoint. Failures become `reachable: false` with
/// the error text; nothing propagates.
pub async fn probe_database(kind: DbKind, ip: IpAddr, port: u16, limit: Duration) -> DbProbeResult {
    let mut result = DbProbeResult {
        name: kind.name().to_string(),
        port,
        ..Default::default()
    };
    match run_probe(kind, ip, port, limit).await {
        Ok((hs, latency)) => {
            result.reachable = true;
            result.latency_ms = Some(latency);
            result.tls_supported = hs.tls_supported;
            result.server_version = hs.server_version;
            result.banner = hs.banner;
            result.pong = hs.pong;
            result.amqp_ready = hs.amqp_ready;
        }
        Err(e) => {
            crate::log_debug!("{} probe on {}:{} failed: {}", kind.name(), ip, port, e);
            result.error = Some(e.to_string());
        }
    }
    result
}

/// Runs the fixed database check list against one host.
pub async fn probe_databases(ip: IpAddr, limit: Duration, only_online: bool) -> Vec<DbProbeResult> {
    let mut results = Vec::with_capacity(DB_CHECKS.len());
    for &(kind, port) in DB_CHECKS {
        results.push(probe_database(kind, ip, port, limit).await);
    }
    if only_online {
        results.retain(|r| r.reachable);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn serve_once<F>(respond: F) -> u16
    where
        F: FnOnce(Vec<u8>) -> Vec<u8> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 64];
            let n = tokio::time::timeout(Duration::from_millis(200), sock.read(&mut buf))
                .await
                .map(|r| r.unwrap_or(0))
                .unwrap_or(0);
            buf.truncate(n);
            let reply = respond(buf);
            if !reply.is_empty() {
                sock.write_all(&reply).await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(300)).await;
        });
        port
    }

    #[test]
    fn ssl_request_encodes_magic_code() {
        let code = u32::from_be_bytes([PG_SSL_REQUEST[4], PG_SSL_REQUEST[5], PG_SSL_REQUEST[6], PG_SSL_REQUEST[7]]);
        assert_eq!(code, 80877103);
    }

    #[test]
    fn mysql_version_reads_null_terminated_string() {
        let mut greeting = vec![10u8];
        greeting.extend_from_slice(b"8.0.36\0rest-of-greeting");
        assert_eq!(mysql_version(&greeting).as_deref(), Some("8.0.36"));
        assert_eq!(mysql_version(&[10, 1, 2]), None);
    }

    #[test]
    fn greeting_header_is_skipped_only_before_protocol_ten() {
        let mut framed = vec![0x4a, 0, 0, 0, 10];
        framed.extend_from_slice(b"8.0.36\0rest");
        assert_eq!(greeting_version(&framed).as_deref(), Some("8.0.36"));

        let mut bare = vec![10u8];
        bare.extend_from_slice(b"8.0.36\0rest");
        assert_eq!(greeting_version(&bare).as_deref(), Some("8.0.36"));
    }

    #[tokio::test]
    async fn redis_ping_yields_pong() {
        let port = serve_once(|req| {
            assert_eq!(req, REDIS_PING);
            b"+PONG\r\n".to_vec()
        })
        .await;
        let r = probe_database(DbKind::Redis, LOCALHOST, port, Duration::from_secs(1)).await;
        assert!(r.reachable);
        assert_eq!(r.pong, Some(true));
        assert!(r.latency_ms.is_some());
    }

    #[tokio::test]
    async fn postgres_ssl_request_detects_tls() {
        let port = serve_once(|_| b"S".to_vec()).await;
        let r = probe_database(DbKind::Postgresql, LOCALHOST, port, Duration::from_secs(1)).await;
        assert!(r.reachable);
        assert_eq!(r.tls_supported, Some(true));
    }

    #[tokio::test]
    async fn mysql_greeting_version_is_extracted() {
        let port = serve_once(|_| {
            let mut packet = vec![0x4a, 0, 0, 0, 10];
            packet.extend_from_slice(b"5.7.44-log\0\x01\x02\x03\x04");
            packet
        })
        .await;
        let r = probe_database(DbKind::Mysql, LOCALHOST, port, Duration::from_secs(1)).await;
        assert!(r.reachable);
        assert_eq!(r.server_version.as_deref(), Some("5.7.44-log"));
    }

    #[tokio::test]
    async fn closed_port_is_unreachable_with_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let r = probe_database(DbKind::Redis, LOCALHOST, port, Duration::from_millis(300)).await;
        assert!(!r.reachable);
        assert!(r.error.is_some());
        assert_eq!(r.name, "redis");
    }

    #[test]
    fn well_known_ports_map_to_kinds() {
        assert_eq!(DbKind::for_port(5433), Some(DbKind::Postgresql));
        assert_eq!(DbKind::for_port(6379), Some(DbKind::Redis));
        assert_eq!(DbKind::for_port(80), None);
    }
}
