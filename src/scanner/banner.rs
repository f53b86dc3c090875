//! Banner readers for line-oriented services

use std::net::IpAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use super::tcp::connect;
use crate::error::{ProbeError, with_timeout};

/// Bytes read from a service greeting
const BANNER_READ_BYTES: usize = 128;

/// Reads the SSH identification string.
///
/// Reachable iff the read completes, even with an empty banner: presence of
/// the daemon is the signal, not its greeting.
pub async fn probe_ssh_banner(ip: IpAddr, port: u16, limit: Duration) -> Result<String, ProbeError> {
    let mut stream = connect(ip, port, limit).await?;
    let mut buf = [0u8; BANNER_READ_BYTES];
    let n = with_timeout("ssh banner read", limit, async {
        stream.read(&mut buf).await.map_err(ProbeError::from)
    })
    .await?;
    Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
}
