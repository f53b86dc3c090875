//! Target specification parsing and expansion
//!
//! A discovery target is a CIDR block, an inclusive `start-end` address
//! range, or a list of hostnames. Malformed input expands to nothing; it
//! is never an error for the caller.

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use super::dns::resolve_host;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum TargetSpec {
    Cidr(String),
    Range { start: String, end: String },
    Hosts(Vec<String>),
}

/// Checks if an IP address is the network or broadcast address of `subnet`
pub fn is_special_address(ip: Ipv4Addr, subnet: &Ipv4Network) -> bool {
    ip == subnet.network() || ip == subnet.broadcast()
}

fn looks_like_range(raw: &str) -> bool {
    raw.contains('-')
        && raw
            .chars()
            .all(|c| c.is_ascii_hexdigit() || matches!(c, '.' | ':' | '-' | ' '))
        && raw.chars().next().is_some_and(|c| c.is_ascii_hexdigit())
        && raw.split('-').all(|part| {
            let part = part.trim();
            part.contains('.') || part.contains(':')
        })
}

impl TargetSpec {
    /// Classifies a raw target string.
    ///
    /// `/` selects CIDR, an address-shaped `a-b` selects a range, and
    /// anything else is a comma or whitespace separated host list.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.contains('/') {
            return TargetSpec::Cidr(raw.to_string());
        }
        if looks_like_range(raw) {
            let (start, end) = raw.split_once('-').unwrap_or((raw, ""));
            return TargetSpec::Range {
                start: start.trim().to_string(),
                end: end.trim().to_string(),
            };
        }
        TargetSpec::Hosts(
            raw.split(|c: char| c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Expands to unique addresses, at most `max_hosts` of them.
    pub async fn expand(&self, max_hosts: usize) -> Vec<IpAddr> {
        let ips = match self {
            TargetSpec::Cidr(cidr) => expand_cidr(cidr, max_hosts),
            TargetSpec::Range { start, end } => expand_range(start, end, max_hosts),
            TargetSpec::Hosts(names) => {
                let mut resolved = Vec::new();
                for name in names.iter() {
                    match resolve_host(name).await {
                        Some(ip) => resolved.push(ip),
                        None => crate::log_warn!("Skipping unresolvable target {}", name),
                    }
                }
                resolved
            }
        };

        let mut seen = HashSet::new();
        let unique: Vec<IpAddr> = ips.into_iter().filter(|ip| seen.insert(*ip)).collect();
        if unique.len() > max_hosts {
            crate::log_warn!(
                "Target expands to {} hosts, limiting to {}",
                unique.len(),
                max_hosts
            );
        }
        unique.into_iter().take(max_hosts).collect()
    }
}

/// CIDR hosts: network and broadcast excluded, except /31 and /32 where
/// every address is a host.
pub fn expand_cidr(cidr: &str, max_hosts: usize) -> Vec<IpAddr> {
    let network: IpNetwork = match cidr.trim().parse() {
        Ok(n) => n,
        Err(e) => {
            crate::log_warn!("Invalid CIDR target '{}': {}", cidr, e);
            return Vec::new();
        }
    };

    match network {
        IpNetwork::V4(net) => {
            let subnet = match Ipv4Network::new(net.network(), net.prefix()) {
                Ok(s) => s,
                Err(e) => {
                    crate::log_warn!("Invalid CIDR target '{}': {}", cidr, e);
                    return Vec::new();
                }
            };
            let keep_all = subnet.prefix() >= 31;
            // One past the cap lets the caller see that the set was truncated.
            subnet
                .iter()
                .filter(|ip| keep_all || !is_special_address(*ip, &subnet))
                .take(max_hosts.saturating_add(1))
                .map(IpAddr::V4)
                .collect()
        }
        IpNetwork::V6(net) => {
            let subnet = match Ipv6Network::new(net.network(), net.prefix()) {
                Ok(s) => s,
                Err(e) => {
                    crate::log_warn!("Invalid CIDR target '{}': {}", cidr, e);
                    return Vec::new();
                }
            };
            let keep_all = subnet.prefix() >= 127;
            subnet
                .iter()
                .filter(|ip| keep_all || *ip != subnet.network())
                .take(max_hosts.saturating_add(1))
                .map(IpAddr::V6)
                .collect()
        }
    }
}

/// Inclusive address range. Reversed, mixed-family or unparsable ranges
/// expand to nothing.
pub fn expand_range(start: &str, end: &str, max_hosts: usize) -> Vec<IpAddr> {
    let (start_ip, end_ip) = match (start.trim().parse::<IpAddr>(), end.trim().parse::<IpAddr>()) {
        (Ok(s), Ok(e)) => (s, e),
        _ => {
            crate::log_warn!("Invalid range target '{}-{}'", start, end);
            return Vec::new();
        }
    };

    let limit = max_hosts.saturating_add(1);
    match (start_ip, end_ip) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            let (s, e) = (u32::from(s), u32::from(e));
            if s > e {
                crate::log_warn!("Reversed range target '{}-{}'", start, end);
                return Vec::new();
            }
            (s..=e)
                .take(limit)
                .map(|n| IpAddr::V4(Ipv4Addr::from(n)))
                .collect()
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => {
            let (s, e) = (u128::from(s), u128::from(e));
            if s > e {
                crate::log_warn!("Reversed range target '{}-{}'", start, end);
                return Vec::new();
            }
            (s..=e)
                .take(limit)
                .map(|n| IpAddr::V6(Ipv6Addr::from(n)))
                .collect()
        }
        _ => {
            crate::log_warn!("Mixed address families in range '{}-{}'", start, end);
            Vec::new()
        }
    }
}

#[cfg(test)]
#[path = "target_tests.rs"]
mod target_tests;
