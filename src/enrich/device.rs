//! One-shot commands on network gear over SSH

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use super::SshCredentials;
use super::ssh::{exec_on, shell_on, with_session};
use crate::config::device_cmd_timeout;
use crate::error::{ConfigError, ProbeError};
use crate::logging::mask_secret;
use crate::network::resolve_host;

/// Device families accepted for remote commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    CiscoIos,
    CiscoXe,
    CiscoNxos,
    CiscoXr,
    AristaEos,
    JuniperJunos,
    Huawei,
    HpProcurve,
    MikrotikRouteros,
    UbiquitiEdgerouter,
    Linux,
}

impl DeviceType {
    pub const ALL: [DeviceType; 11] = [
        DeviceType::CiscoIos,
        DeviceType::CiscoXe,
        DeviceType::CiscoNxos,
        DeviceType::CiscoXr,
        DeviceType::AristaEos,
        DeviceType::JuniperJunos,
        DeviceType::Huawei,
        DeviceType::HpProcurve,
        DeviceType::MikrotikRouteros,
        DeviceType::UbiquitiEdgerouter,
        DeviceType::Linux,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::CiscoIos => "cisco_ios",
            DeviceType::CiscoXe => "cisco_xe",
            DeviceType::CiscoNxos => "cisco_nxos",
            DeviceType::CiscoXr => "cisco_xr",
            DeviceType::AristaEos => "arista_eos",
            DeviceType::JuniperJunos => "juniper_junos",
            DeviceType::Huawei => "huawei",
            DeviceType::HpProcurve => "hp_procurve",
            DeviceType::MikrotikRouteros => "mikrotik_routeros",
            DeviceType::UbiquitiEdgerouter => "ubiquiti_edgerouter",
            DeviceType::Linux => "linux",
        }
    }

    /// Platforms whose privileged mode is entered with `enable`
    fn uses_enable(&self) -> bool {
        matches!(
            self,
            DeviceType::CiscoIos | DeviceType::CiscoXe | DeviceType::CiscoNxos | DeviceType::AristaEos
        )
    }
}

impl FromStr for DeviceType {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let wanted = raw.trim().to_ascii_lowercase();
        DeviceType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ConfigError::InvalidDeviceType(raw.trim().to_string()))
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request as received from a caller. Everything is validated by
/// [`DeviceCommandRequest::validate`] before a connection is opened.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommandRequest {
    pub host: String,
    pub device_type: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub command: String,
    /// Enable secret for platforms with a privileged mode
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

impl fmt::Debug for DeviceCommandRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCommandRequest")
            .field("host", &self.host)
            .field("device_type", &self.device_type)
            .field("username", &self.username)
            .field("password", &self.password.as_deref().map(mask_secret))
            .field("command", &self.command)
            .field("secret", &self.secret.as_deref().map(mask_secret))
            .field("port", &self.port)
            .finish()
    }
}

impl DeviceCommandRequest {
    pub fn validate(&self) -> Result<DeviceType, ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingField("host"));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingField("username"));
        }
        if self.command.trim().is_empty() {
            return Err(ConfigError::MissingField("command"));
        }
        self.device_type.parse()
    }

    fn credentials(&self) -> SshCredentials {
        let mut creds = SshCredentials::password(self.username.trim(), self.password.clone().unwrap_or_default());
        if let Some(port) = self.port {
            creds.port = port;
        }
        creds.timeout = device_cmd_timeout();
        creds
    }

    /// Text fed to an interactive shell when an enable secret is given
    fn shell_script(&self, secret: &str) -> String {
        format!("enable\n{secret}\nterminal length 0\n{}\nexit\n", self.command.trim())
    }
}

/// Outcome of a device command. Transport and auth failures land in
/// `error` with `ok: false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCommandOutput {
    pub ok: bool,
    pub host: String,
    pub device_type: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn execute(ip: IpAddr, device_type: DeviceType, request: &DeviceCommandRequest) -> Result<String, ProbeError> {
    let creds = request.credentials();
    // login, the exchange and the teardown
    let budget = creds.timeout * 3;
    let secret = request
        .secret
        .as_deref()
        .filter(|s| !s.is_empty() && device_type.uses_enable())
        .map(str::to_string);
    let command = request.command.trim().to_string();
    let script = secret.as_deref().map(|s| request.shell_script(s));

    let out = with_session(ip, &creds, budget, move |session| match script {
        Some(script) => shell_on(session, &script),
        None => exec_on(session, &command),
    })
    .await?;

    if out.stderr.trim().is_empty() {
        Ok(out.stdout)
    } else if out.stdout.trim().is_empty() {
        Ok(out.stderr)
    } else {
        Ok(format!("{}\n{}", out.stdout, out.stderr))
    }
}

/// Validates, resolves and runs the request. Only validation failures are
/// returned as errors; everything after that is reported in the output.
pub async fn run_device_command(request: &DeviceCommandRequest) -> Result<DeviceCommandOutput, ConfigError> {
    let device_type = request.validate()?;
    let host = request.host.trim().to_string();
    let mut result = DeviceCommandOutput {
        host: host.clone(),
        device_type: device_type.to_string(),
        ..Default::default()
    };

    let Some(ip) = resolve_host(&host).await else {
        result.error = Some(format!("cannot resolve host {host}"));
        return Ok(result);
    };

    crate::log_stderr!("Running device command on {} ({}) as {}", host, device_type, request.username);
    match execute(ip, device_type, request).await {
        Ok(output) => {
            result.ok = true;
            result.output = output;
        }
        Err(e) => {
            crate::log_warn!("Device command on {} failed: {}", host, e);
            result.error = Some(e.to_string());
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(device_type: &str) -> DeviceCommandRequest {
        DeviceCommandRequest {
            host: "10.0.0.1".to_string(),
            device_type: device_type.to_string(),
            username: "netops".to_string(),
            password: Some("sup3r-secret".to_string()),
            command: "show version".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn allow_list_accepts_known_families() {
        assert_eq!("cisco_ios".parse::<DeviceType>(), Ok(DeviceType::CiscoIos));
        assert_eq!(" Juniper_Junos ".parse::<DeviceType>(), Ok(DeviceType::JuniperJunos));
        for t in DeviceType::ALL {
            assert_eq!(t.as_str().parse::<DeviceType>(), Ok(t));
        }
    }

    #[test]
    fn unknown_family_is_a_config_error() {
        assert_eq!(
            request("fortinet").validate(),
            Err(ConfigError::InvalidDeviceType("fortinet".to_string()))
        );
    }

    #[test]
    fn required_fields_are_checked_first() {
        let mut req = request("cisco_ios");
        req.command = "  ".to_string();
        assert_eq!(req.validate(), Err(ConfigError::MissingField("command")));
        req.username.clear();
        assert_eq!(req.validate(), Err(ConfigError::MissingField("username")));
        req.host.clear();
        assert_eq!(req.validate(), Err(ConfigError::MissingField("host")));
    }

    #[test]
    fn enable_script_carries_secret_and_command() {
        let req = request("cisco_ios");
        let script = req.shell_script("en4ble");
        assert!(script.starts_with("enable\nen4ble\n"));
        assert!(script.contains("show version\n"));
        assert!(DeviceType::CiscoIos.uses_enable());
        assert!(!DeviceType::Linux.uses_enable());
    }

    #[test]
    fn debug_masks_password_and_secret() {
        let mut req = request("cisco_ios");
        req.secret = Some("enable-pass".to_string());
        let dbg = format!("{req:?}");
        assert!(!dbg.contains("sup3r-secret"));
        assert!(!dbg.contains("enable-pass"));
    }

    #[tokio::test]
    async fn invalid_request_never_touches_network() {
        let err = run_device_command(&request("not-a-device")).await.unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDeviceType(_)));
    }

    #[tokio::test]
    async fn unreachable_device_reports_failure_in_output() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut req = request("linux");
        req.host = "127.0.0.1".to_string();
        req.port = Some(port);
        let out = run_device_command(&req).await.unwrap();
        assert!(!out.ok);
        assert!(out.error.is_some());
        assert_eq!(out.device_type, "linux");
    }
}
