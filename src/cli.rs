use anyhow::Result;
use std::collections::BTreeMap;

use crate::command::{AppCommand, SnmpOptions};
use crate::config::metrics_series_points;
use crate::enrich::{DeviceCommandRequest, SshCredentials, WinrmCredentials};
use crate::network::ScanMethod;
use crate::scanner::snmp::{AuthProtocol, PrivProtocol, SnmpV3Credentials, SnmpVersion};

const WINRM_TLS_PORT: u16 = 5986;

const COMMANDS: &[&str] = &[
    "discover",
    "hostinfo",
    "docker",
    "dbprobe",
    "snmp-get",
    "snmp-walk",
    "snmp-set",
    "snmp-info",
    "snmp-neighbors",
    "metrics",
    "device-cmd",
];

/// Flags that take a value, long form
const VALUE_FLAGS: &[&str] = &[
    "--target",
    "--method",
    "--ip",
    "--ports",
    "--deadline-secs",
    "--ssh-user",
    "--ssh-password",
    "--ssh-key",
    "--ssh-port",
    "--winrm-user",
    "--winrm-password",
    "--winrm-port",
    "--snmp-version",
    "--community",
    "--snmp-port",
    "--v3-user",
    "--auth-protocol",
    "--auth-password",
    "--priv-protocol",
    "--priv-password",
    "--oid",
    "--value-type",
    "--value",
    "--points",
    "--host",
    "--device-type",
    "--user",
    "--password",
    "--command",
    "--secret",
    "--port",
];

const SWITCH_FLAGS: &[&str] = &["--winrm-tls", "--no-persist", "--all"];

const SSH_FLAGS: &[&str] = &["--ssh-user", "--ssh-password", "--ssh-key", "--ssh-port"];
const WINRM_FLAGS: &[&str] = &["--winrm-user", "--winrm-password", "--winrm-port", "--winrm-tls"];
const SNMP_FLAGS: &[&str] = &[
    "--ip",
    "--snmp-version",
    "--community",
    "--snmp-port",
    "--v3-user",
    "--auth-protocol",
    "--auth-password",
    "--priv-protocol",
    "--priv-password",
];

pub(crate) fn version_text() -> String {
    format!("netinv-core {}", env!("CARGO_PKG_VERSION"))
}

pub(crate) fn usage_text() -> String {
    format!(
        "{version}
Network inventory: host discovery, classification and metrics sampling

Usage:
  netinv-core discover --target <CIDR|A-B|HOSTS> [--method tcp|aggressive] [--ports <P,..>]
                       [--deadline-secs <N>] [--no-persist] [SSH] [WINRM]
  netinv-core hostinfo --ip <IP> [--method tcp|aggressive] [SSH] [WINRM]
  netinv-core docker --ip <IP> [SSH]
  netinv-core dbprobe --ip <IP> [--all]
  netinv-core snmp-get --ip <IP> --oid <OID> [SNMP]
  netinv-core snmp-walk --ip <IP> --oid <OID> [SNMP]
  netinv-core snmp-set --ip <IP> --oid <OID> --value-type <TYPE> --value <V> [SNMP]
  netinv-core snmp-info --ip <IP> [SNMP]
  netinv-core snmp-neighbors --ip <IP> [SNMP]
  netinv-core metrics --ip <IP> [--points <N>]
  netinv-core device-cmd --host <HOST> --device-type <TYPE> --user <USER> --command <CMD>
                         [--password <PW>] [--secret <PW>] [--port <N>]
  netinv-core --help
  netinv-core --version

Options:
  -t, --target <SPEC>        CIDR block, inclusive address range or host list
  -m, --method <METHOD>      Port set: tcp (well-known) or aggressive (default: tcp)
      --ports <P,..>         Probe exactly these ports instead of the method's set
      --deadline-secs <N>    Stop scheduling new hosts after N seconds
      --no-persist           Do not save discovered hosts to the database
      --all                  dbprobe: include unreachable databases
      --points <N>           metrics: samples per series (default: {points})

SSH:
      --ssh-user <USER> [--ssh-password <PW> | --ssh-key <PATH>] [--ssh-port <N>]
WINRM:
      --winrm-user <USER> --winrm-password <PW> [--winrm-tls] [--winrm-port <N>]
SNMP:
      --snmp-version v1|v2c|v3 (default: v2c)  --community <NAME>  --snmp-port <N>
      --v3-user <USER> [--auth-protocol md5|sha|sha256|sha384|sha512 --auth-password <PW>]
                       [--priv-protocol des|aes128|aes192|aes256 --priv-password <PW>]
      --value-type octetstring|integer|ipaddress|gauge32|counter32|oid

  -h, --help                 Show this help text
  -V, --version              Show version",
        version = version_text(),
        points = metrics_series_points()
    )
}

fn parse_u16_arg(flag: &str, raw: &str) -> Result<u16> {
    raw.parse::<u16>().ok().filter(|v| *v > 0).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid value for {}: '{}'. Expected a port number (1-65535).\n\n{}",
            flag,
            raw,
            usage_text()
        )
    })
}

fn parse_u64_arg(flag: &str, raw: &str) -> Result<u64> {
    raw.parse::<u64>().ok().filter(|v| *v > 0).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid value for {}: '{}'. Expected a positive integer.\n\n{}",
            flag,
            raw,
            usage_text()
        )
    })
}

fn parse_usize_arg(flag: &str, raw: &str) -> Result<usize> {
    raw.parse::<usize>().ok().filter(|v| *v > 0).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid value for {}: '{}'. Expected a positive integer.\n\n{}",
            flag,
            raw,
            usage_text()
        )
    })
}

fn parse_port_list(raw: &str) -> Result<Vec<u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| parse_u16_arg("--ports", p))
        .collect()
}

fn lookup(table: &[&'static str], name: &str) -> Option<&'static str> {
    table.iter().copied().find(|entry| *entry == name)
}

fn expand_short(arg: &str) -> &str {
    match arg {
        "-t" => "--target",
        "-m" => "--method",
        _ => arg,
    }
}

/// Flags collected from the command line, keyed by long name
struct Flags(BTreeMap<&'static str, String>);

impl Flags {
    fn get(&self, flag: &str) -> Option<&str> {
        self.0.get(flag).map(String::as_str)
    }

    fn has(&self, flag: &str) -> bool {
        self.0.contains_key(flag)
    }

    fn owned(&self, flag: &str) -> Option<String> {
        self.get(flag).map(str::to_string)
    }

    fn require(&self, flag: &str, command: &str) -> Result<String> {
        self.owned(flag).ok_or_else(|| {
            anyhow::anyhow!("Missing {} for {}.\n\n{}", flag, command, usage_text())
        })
    }

    fn reject_unless(&self, command: &str, allowed: &[&[&str]]) -> Result<()> {
        let stray: Vec<&str> = self
            .0
            .keys()
            .copied()
            .filter(|flag| !allowed.iter().any(|group| group.contains(flag)))
            .collect();
        if stray.is_empty() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "{} not valid with {}.\n\n{}",
                stray.join("/"),
                command,
                usage_text()
            ))
        }
    }

    fn method(&self) -> ScanMethod {
        self.get("--method").map(ScanMethod::parse).unwrap_or_default()
    }

    fn ssh(&self) -> Result<Option<SshCredentials>> {
        let Some(user) = self.owned("--ssh-user") else {
            if self.has("--ssh-password") || self.has("--ssh-key") || self.has("--ssh-port") {
                return Err(anyhow::anyhow!(
                    "--ssh-password/--ssh-key/--ssh-port require --ssh-user.\n\n{}",
                    usage_text()
                ));
            }
            return Ok(None);
        };
        let mut creds = match self.owned("--ssh-key") {
            Some(key) => {
                let mut creds = SshCredentials::key(user, key);
                creds.password = self.owned("--ssh-password");
                creds
            }
            None => SshCredentials::password(user, self.owned("--ssh-password").unwrap_or_default()),
        };
        if let Some(port) = self.get("--ssh-port") {
            creds.port = parse_u16_arg("--ssh-port", port)?;
        }
        Ok(Some(creds))
    }

    fn winrm(&self) -> Result<Option<WinrmCredentials>> {
        let Some(user) = self.owned("--winrm-user") else {
            if WINRM_FLAGS.iter().any(|flag| self.has(flag)) {
                return Err(anyhow::anyhow!(
                    "WinRM options require --winrm-user.\n\n{}",
                    usage_text()
                ));
            }
            return Ok(None);
        };
        let mut creds = WinrmCredentials::new(user, self.require("--winrm-password", "WinRM")?);
        creds.use_tls = self.has("--winrm-tls");
        creds.port = match self.get("--winrm-port") {
            Some(port) => parse_u16_arg("--winrm-port", port)?,
            None if creds.use_tls => WINRM_TLS_PORT,
            None => creds.port,
        };
        Ok(Some(creds))
    }

    fn snmp(&self, command: &str) -> Result<SnmpOptions> {
        let version = match self.get("--snmp-version") {
            Some(raw) => SnmpVersion::parse(raw)?,
            None => SnmpVersion::default(),
        };
        let v3 = match self.owned("--v3-user") {
            Some(user) => Some(SnmpV3Credentials {
                user,
                auth_protocol: AuthProtocol::parse(self.get("--auth-protocol").unwrap_or_default())?,
                auth_password: self.owned("--auth-password"),
                priv_protocol: PrivProtocol::parse(self.get("--priv-protocol").unwrap_or_default())?,
                priv_password: self.owned("--priv-password"),
            }),
            None => None,
        };
        let port = self
            .get("--snmp-port")
            .map(|raw| parse_u16_arg("--snmp-port", raw))
            .transpose()?;
        Ok(SnmpOptions {
            host: self.require("--ip", command)?,
            version,
            community: self.owned("--community"),
            v3,
            port,
        })
    }
}

pub(crate) fn parse_cli_args<I, S>(args: I) -> Result<AppCommand>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut iter = args.into_iter();
    let _program_name = iter.next();

    let mut command: Option<&'static str> = None;
    let mut flags: BTreeMap<&'static str, String> = BTreeMap::new();

    while let Some(arg) = iter.next() {
        let arg = expand_short(arg.as_ref());
        let (name, inline) = match arg.split_once('=') {
            Some((name, value)) if name.starts_with("--") => (name, Some(value)),
            _ => (arg, None),
        };

        if matches!(name, "-h" | "--help") {
            return Ok(AppCommand::Help);
        }
        if matches!(name, "-V" | "--version") {
            return Ok(AppCommand::Version);
        }

        if let Some(word) = lookup(COMMANDS, name) {
            if command.is_some_and(|existing| existing != word) {
                return Err(anyhow::anyhow!(
                    "Multiple commands provided. Use only one command.\n\n{}",
                    usage_text()
                ));
            }
            command = Some(word);
        } else if let Some(flag) = lookup(VALUE_FLAGS, name) {
            let value = match inline {
                Some(value) => value.to_string(),
                None => iter
                    .next()
                    .map(|v| v.as_ref().to_string())
                    .ok_or_else(|| anyhow::anyhow!("Missing value for {}.\n\n{}", flag, usage_text()))?,
            };
            if value.is_empty() {
                return Err(anyhow::anyhow!("Missing value for {}.\n\n{}", flag, usage_text()));
            }
            flags.insert(flag, value);
        } else if let Some(flag) = lookup(SWITCH_FLAGS, name).filter(|_| inline.is_none()) {
            flags.insert(flag, String::new());
        } else {
            return Err(anyhow::anyhow!(
                "Unknown argument: {arg}\n\n{}",
                usage_text()
            ));
        }
    }

    let flags = Flags(flags);
    let Some(command) = command else {
        if flags.0.is_empty() {
            return Ok(AppCommand::Help);
        }
        return Err(anyhow::anyhow!("No command given.\n\n{}", usage_text()));
    };

    match command {
        "discover" => {
            flags.reject_unless(
                command,
                &[
                    &["--target", "--method", "--ports", "--deadline-secs", "--no-persist"],
                    SSH_FLAGS,
                    WINRM_FLAGS,
                ],
            )?;
            Ok(AppCommand::Discover {
                target: flags.require("--target", command)?,
                method: flags.method(),
                ssh: flags.ssh()?,
                winrm: flags.winrm()?,
                deadline_secs: flags
                    .get("--deadline-secs")
                    .map(|raw| parse_u64_arg("--deadline-secs", raw))
                    .transpose()?,
                ports: flags.get("--ports").map(parse_port_list).transpose()?,
                persist: !flags.has("--no-persist"),
            })
        }
        "hostinfo" => {
            flags.reject_unless(command, &[&["--ip", "--method"], SSH_FLAGS, WINRM_FLAGS])?;
            Ok(AppCommand::HostInfo {
                ip: flags.require("--ip", command)?,
                method: flags.method(),
                ssh: flags.ssh()?,
                winrm: flags.winrm()?,
            })
        }
        "docker" => {
            flags.reject_unless(command, &[&["--ip"], SSH_FLAGS])?;
            Ok(AppCommand::Docker {
                ip: flags.require("--ip", command)?,
                ssh: flags.ssh()?,
            })
        }
        "dbprobe" => {
            flags.reject_unless(command, &[&["--ip", "--all"]])?;
            Ok(AppCommand::DbProbe {
                ip: flags.require("--ip", command)?,
                only_online: !flags.has("--all"),
            })
        }
        "snmp-get" | "snmp-walk" => {
            flags.reject_unless(command, &[SNMP_FLAGS, &["--oid"]])?;
            let snmp = flags.snmp(command)?;
            let oid = flags.require("--oid", command)?;
            if command == "snmp-get" {
                Ok(AppCommand::SnmpGet { snmp, oid })
            } else {
                Ok(AppCommand::SnmpWalk { snmp, oid })
            }
        }
        "snmp-set" => {
            flags.reject_unless(command, &[SNMP_FLAGS, &["--oid", "--value-type", "--value"]])?;
            Ok(AppCommand::SnmpSet {
                snmp: flags.snmp(command)?,
                oid: flags.require("--oid", command)?,
                value_type: flags.require("--value-type", command)?,
                value: flags.require("--value", command)?,
            })
        }
        "snmp-info" => {
            flags.reject_unless(command, &[SNMP_FLAGS])?;
            Ok(AppCommand::SnmpInfo {
                snmp: flags.snmp(command)?,
            })
        }
        "snmp-neighbors" => {
            flags.reject_unless(command, &[SNMP_FLAGS])?;
            Ok(AppCommand::SnmpNeighbors {
                snmp: flags.snmp(command)?,
            })
        }
        "metrics" => {
            flags.reject_unless(command, &[&["--ip", "--points"]])?;
            Ok(AppCommand::Metrics {
                ip: flags.require("--ip", command)?,
                points: flags
                    .get("--points")
                    .map(|raw| parse_usize_arg("--points", raw))
                    .transpose()?
                    .unwrap_or_else(metrics_series_points),
            })
        }
        "device-cmd" => {
            flags.reject_unless(
                command,
                &[&[
                    "--host",
                    "--device-type",
                    "--user",
                    "--password",
                    "--command",
                    "--secret",
                    "--port",
                ]],
            )?;
            Ok(AppCommand::DeviceCommand(DeviceCommandRequest {
                host: flags.owned("--host").unwrap_or_default(),
                device_type: flags.owned("--device-type").unwrap_or_default(),
                username: flags.owned("--user").unwrap_or_default(),
                password: flags.owned("--password"),
                command: flags.owned("--command").unwrap_or_default(),
                secret: flags.owned("--secret"),
                port: flags
                    .get("--port")
                    .map(|raw| parse_u16_arg("--port", raw))
                    .transpose()?,
            }))
        }
        other => Err(anyhow::anyhow!("Unknown command: {other}\n\n{}", usage_text())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_help_flag() {
        let args = ["netinv-core", "--help"];
        let parsed = parse_cli_args(args).expect("help args should parse");
        assert_eq!(parsed, AppCommand::Help);
    }

    #[test]
    fn parse_version_flag() {
        let args = ["netinv-core", "-V"];
        let parsed = parse_cli_args(args).expect("version args should parse");
        assert_eq!(parsed, AppCommand::Version);
    }

    #[test]
    fn no_arguments_show_help() {
        let parsed = parse_cli_args(["netinv-core"]).expect("empty args should parse");
        assert_eq!(parsed, AppCommand::Help);
    }

    #[test]
    fn parse_discover_with_defaults() {
        let args = ["netinv-core", "discover", "--target", "10.0.0.0/30"];
        let parsed = parse_cli_args(args).expect("discover should parse");
        assert_eq!(
            parsed,
            AppCommand::Discover {
                target: "10.0.0.0/30".to_string(),
                method: ScanMethod::Tcp,
                ssh: None,
                winrm: None,
                deadline_secs: None,
                ports: None,
                persist: true,
            }
        );
    }

    #[test]
    fn parse_discover_with_every_option() {
        let args = [
            "netinv-core",
            "discover",
            "-t",
            "10.0.0.5-10.0.0.9",
            "--method=nmap",
            "--ports",
            "22, 6379",
            "--deadline-secs",
            "30",
            "--no-persist",
            "--ssh-user",
            "root",
            "--ssh-password",
            "toor",
            "--winrm-user",
            "admin",
            "--winrm-password",
            "secret",
            "--winrm-tls",
        ];
        let AppCommand::Discover {
            method,
            ssh,
            winrm,
            deadline_secs,
            ports,
            persist,
            ..
        } = parse_cli_args(args).expect("discover should parse")
        else {
            panic!("expected discover");
        };
        assert_eq!(method, ScanMethod::Aggressive);
        assert_eq!(deadline_secs, Some(30));
        assert_eq!(ports, Some(vec![22, 6379]));
        assert!(!persist);
        let ssh = ssh.expect("ssh creds");
        assert_eq!(ssh.user, "root");
        assert_eq!(ssh.port, 22);
        let winrm = winrm.expect("winrm creds");
        assert!(winrm.use_tls);
        assert_eq!(winrm.port, 5986);
    }

    #[test]
    fn discover_requires_target() {
        let err = parse_cli_args(["netinv-core", "discover"]).expect_err("target is required");
        assert!(err.to_string().contains("Missing --target"));
    }

    #[test]
    fn ssh_password_without_user_is_rejected() {
        let args = ["netinv-core", "hostinfo", "--ip", "10.0.0.5", "--ssh-password", "x"];
        let err = parse_cli_args(args).expect_err("user is required");
        assert!(err.to_string().contains("require --ssh-user"));
    }

    #[test]
    fn parse_snmp_set_v3() {
        let args = [
            "netinv-core",
            "snmp-set",
            "--ip",
            "10.0.0.1",
            "--snmp-version",
            "v3",
            "--v3-user",
            "ops",
            "--auth-protocol",
            "sha256",
            "--auth-password",
            "longenough",
            "--oid",
            "1.3.6.1.2.1.1.6.0",
            "--value-type",
            "octetstring",
            "--value",
            "rack 4",
        ];
        let AppCommand::SnmpSet { snmp, oid, value, .. } = parse_cli_args(args).expect("snmp-set should parse") else {
            panic!("expected snmp-set");
        };
        assert_eq!(snmp.version, SnmpVersion::V3);
        let v3 = snmp.v3.expect("v3 creds");
        assert_eq!(v3.auth_protocol, AuthProtocol::Sha256);
        assert_eq!(v3.priv_protocol, PrivProtocol::None);
        assert_eq!(oid, "1.3.6.1.2.1.1.6.0");
        assert_eq!(value, "rack 4");
    }

    #[test]
    fn unknown_snmp_version_is_rejected() {
        let args = ["netinv-core", "snmp-info", "--ip", "10.0.0.1", "--snmp-version", "v4"];
        let err = parse_cli_args(args).expect_err("v4 does not exist");
        assert!(err.to_string().contains("snmp version"));
    }

    #[test]
    fn parse_metrics_uses_default_points() {
        let parsed = parse_cli_args(["netinv-core", "metrics", "--ip", "10.0.0.5"]).expect("metrics should parse");
        assert_eq!(
            parsed,
            AppCommand::Metrics {
                ip: "10.0.0.5".to_string(),
                points: metrics_series_points(),
            }
        );
    }

    #[test]
    fn parse_device_cmd() {
        let args = [
            "netinv-core",
            "device-cmd",
            "--host",
            "sw1",
            "--device-type",
            "cisco_ios",
            "--user",
            "admin",
            "--command",
            "show version",
            "--port=2222",
        ];
        let AppCommand::DeviceCommand(request) = parse_cli_args(args).expect("device-cmd should parse") else {
            panic!("expected device-cmd");
        };
        assert_eq!(request.host, "sw1");
        assert_eq!(request.command, "show version");
        assert_eq!(request.port, Some(2222));
        assert!(request.password.is_none());
    }

    #[test]
    fn flags_are_checked_per_command() {
        let args = ["netinv-core", "dbprobe", "--ip", "10.0.0.5", "--oid", "1.3"];
        let err = parse_cli_args(args).expect_err("dbprobe takes no oid");
        assert!(err.to_string().contains("--oid not valid with dbprobe"));
    }

    #[test]
    fn multiple_commands_are_rejected() {
        let err = parse_cli_args(["netinv-core", "docker", "dbprobe"]).expect_err("two commands");
        assert!(err.to_string().contains("Multiple commands provided"));
    }

    #[test]
    fn invalid_port_list_is_rejected() {
        let args = ["netinv-core", "discover", "--target", "10.0.0.1", "--ports", "22,0"];
        let err = parse_cli_args(args).expect_err("port 0 is invalid");
        assert!(err.to_string().contains("Invalid value for --ports"));
    }

    #[test]
    fn parse_unknown_argument_errors() {
        let args = ["netinv-core", "--unknown"];
        let err = parse_cli_args(args).expect_err("unknown flag should fail");
        assert!(err.to_string().contains("Unknown argument"));
    }
}
