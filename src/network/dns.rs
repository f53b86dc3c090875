//! Forward and reverse name resolution
//!
//! `dns_lookup` is synchronous, so every call runs on the blocking pool
//! under a timeout.

use dns_lookup::{lookup_addr, lookup_host};
use std::net::IpAddr;

use crate::config::dns_timeout;

/// Reverse lookup for one address. `None` when the resolver has no name or
/// only echoes the address back.
pub fn reverse_lookup(ip: IpAddr) -> Option<String> {
    match lookup_addr(&ip) {
        Ok(hostname) if hostname != ip.to_string() => Some(hostname),
        _ => None,
    }
}

/// Hostname for `ip`, defaulting to the IP string when resolution fails or
/// times out.
pub async fn reverse_dns(ip: IpAddr) -> String {
    let lookup = tokio::time::timeout(
        dns_timeout(),
        tokio::task::spawn_blocking(move || reverse_lookup(ip)),
    )
    .await;

    match lookup {
        Ok(Ok(Some(hostname))) => hostname,
        Ok(Ok(None)) => ip.to_string(),
        Ok(Err(e)) => {
            crate::log_warn!("DNS worker join failed for {}: {}", ip, e);
            ip.to_string()
        }
        Err(_) => {
            crate::log_debug!("Reverse DNS for {} timed out", ip);
            ip.to_string()
        }
    }
}

/// Resolves a hostname (or literal address) to a single IP, preferring IPv4.
pub async fn resolve_host(name: &str) -> Option<IpAddr> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return None;
    }
    if let Ok(ip) = name.parse::<IpAddr>() {
        return Some(ip);
    }

    let query = name.clone();
    let lookup = tokio::time::timeout(
        dns_timeout(),
        tokio::task::spawn_blocking(move || lookup_host(&query)),
    )
    .await;

    match lookup {
        Ok(Ok(Ok(addrs))) => addrs
            .iter()
            .find(|ip| ip.is_ipv4())
            .or_else(|| addrs.first())
            .copied(),
        Ok(Ok(Err(e))) => {
            crate::log_debug!("Could not resolve {}: {}", name, e);
            None
        }
        Ok(Err(e)) => {
            crate::log_warn!("DNS worker join failed for {}: {}", name, e);
            None
        }
        Err(_) => {
            crate::log_debug!("Resolving {} timed out", name);
            None
        }
    }
}
