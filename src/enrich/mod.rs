//! Credentialed enrichment over SSH and WinRM
//!
//! Both enrichers are conditional: they run only when the host looks like
//! the matching platform and the caller supplied credentials. A failed
//! login or command is reported as `ok: false` and leaves the record's
//! enrichment fields empty.

pub mod device;
pub mod linux;
pub mod ssh;
pub mod windows;
pub mod winrm;

pub use device::{DeviceCommandOutput, DeviceCommandRequest, DeviceType, run_device_command};
pub use linux::{LinuxEnrichment, docker_via_ssh, enrich_linux, parse_ss_tulnp, should_enrich_linux};
pub use ssh::{CommandOutput, ssh_exec};
pub use windows::{WindowsEnrichment, enrich_windows, parse_windows_listeners, parse_windows_os, should_enrich_windows};
pub use winrm::run_powershell;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ssh_timeout, winrm_timeout};
use crate::logging::mask_secret;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_WINRM_PORT: u16 = 5985;

/// SSH login material: password, private key, or both
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default = "ssh_timeout", with = "duration_ms")]
    pub timeout: Duration,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl SshCredentials {
    pub fn password(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: Some(password.into()),
            key_path: None,
            port: DEFAULT_SSH_PORT,
            timeout: ssh_timeout(),
        }
    }

    pub fn key(user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: Some(key_path.into()),
            password: None,
            ..Self::password(user, String::new())
        }
    }

    /// A user plus at least one secret
    pub fn is_usable(&self) -> bool {
        !self.user.trim().is_empty()
            && (self.password.as_deref().is_some_and(|p| !p.is_empty()) || self.key_path.is_some())
    }
}

impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("user", &self.user)
            .field("password", &self.password.as_deref().map(mask_secret))
            .field("key_path", &self.key_path)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// WinRM basic-auth login over HTTP or HTTPS
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinrmCredentials {
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_winrm_port")]
    pub port: u16,
    #[serde(default = "winrm_timeout", with = "duration_ms")]
    pub timeout: Duration,
}

fn default_winrm_port() -> u16 {
    DEFAULT_WINRM_PORT
}

impl WinrmCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            use_tls: false,
            port: DEFAULT_WINRM_PORT,
            timeout: winrm_timeout(),
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.user.trim().is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for WinrmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WinrmCredentials")
            .field("user", &self.user)
            .field("password", &mask_secret(&self.password))
            .field("use_tls", &self.use_tls)
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Timeouts travel as integer milliseconds in JSON payloads.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
