//! HTTP/HTTPS fingerprinting
//!
//! Discovery cannot assume trusted CAs, so every HTTPS request here skips
//! certificate validation.

use reqwest::Client;
use reqwest::header::SERVER;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

use crate::config::HTTPS_SNIPPET_BYTES;
use crate::error::ProbeError;

/// Status line and headers of a single `GET /`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpFingerprint {
    pub status_code: u16,
    pub server: Option<String>,
    /// First bytes of the body, HTTPS only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_snippet: Option<String>,
}

impl HttpFingerprint {
    /// Case-insensitive search of the Server header and body snippet
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_ascii_lowercase();
        let in_server = self
            .server
            .as_deref()
            .is_some_and(|s| s.to_ascii_lowercase().contains(&needle));
        let in_body = self
            .text_snippet
            .as_deref()
            .is_some_and(|s| s.to_ascii_lowercase().contains(&needle));
        in_server || in_body
    }
}

/// Host part of a URL; IPv6 literals need brackets
pub fn url_host(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}

/// Client that ignores certificate errors
pub fn insecure_client(limit: Duration) -> Result<Client, ProbeError> {
    Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(limit)
        .build()
        .map_err(ProbeError::from)
}

fn server_header(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get(SERVER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Plain-HTTP `GET /`
pub async fn probe_http(ip: IpAddr, port: u16, limit: Duration) -> Result<HttpFingerprint, ProbeError> {
    let client = insecure_client(limit)?;
    let url = format!("http://{}:{}/", url_host(ip), port);
    let resp = client.get(&url).send().await?;
    Ok(HttpFingerprint {
        status_code: resp.status().as_u16(),
        server: server_header(&resp),
        text_snippet: None,
    })
}

/// HTTPS `GET /`, buffering the first body bytes for signature matching
pub async fn probe_https(ip: IpAddr, port: u16, limit: Duration) -> Result<HttpFingerprint, ProbeError> {
    let client = insecure_client(limit)?;
    let url = format!("https://{}:{}/", url_host(ip), port);
    let mut resp = client.get(&url).send().await?;
    let status_code = resp.status().as_u16();
    let server = server_header(&resp);

    let mut body: Vec<u8> = Vec::with_capacity(HTTPS_SNIPPET_BYTES);
    // Body errors only cost the snippet, the status line already proved reachability.
    while body.len() < HTTPS_SNIPPET_BYTES {
        match resp.chunk().await {
            Ok(Some(chunk)) => body.extend_from_slice(&chunk),
            Ok(None) => break,
            Err(e) => {
                crate::log_debug!("HTTPS body read from {} stopped: {}", url, e);
                break;
            }
        }
    }
    body.truncate(HTTPS_SNIPPET_BYTES);

    Ok(HttpFingerprint {
        status_code,
        server,
        text_snippet: Some(String::from_utf8_lossy(&body).into_owned()),
    })
}
