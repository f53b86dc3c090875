//! Windows enrichment over WinRM: TCP listeners joined to processes, and
//! the OS caption from CIM

use serde_json::Value;
use std::net::IpAddr;

use super::WinrmCredentials;
use super::winrm::{run_powershell, script_budget};
use crate::error::{ProbeError, with_timeout};
use crate::models::{WindowsListener, WindowsOsInfo};
use crate::network::service_for_process;

const WINRM_PORTS: &[u16] = &[5985, 5986];

pub const LISTENERS_SCRIPT: &str = r#"
$cons = @()
try {
  $cons = Get-NetTCPConnection -State Listen | Select-Object -Property LocalAddress,LocalPort,OwningProcess
} catch {
  $cons = @()
}
$procs = Get-Process | Select-Object -Property Id, ProcessName, Path
$results = @()
foreach ($c in $cons) {
  $p = $procs | Where-Object { $_.Id -eq $c.OwningProcess } | Select-Object -First 1
  $name = if ($p) { $p.ProcessName } else { $null }
  $path = if ($p) { $p.Path } else { $null }
  $results += [pscustomobject]@{ addr = $c.LocalAddress; port = [int]$c.LocalPort; pid = [int]$c.OwningProcess; process = $name; path = $path }
}
$results | ConvertTo-Json
"#;

pub const OS_SCRIPT: &str = r#"
$os = Get-CimInstance Win32_OperatingSystem | Select-Object -Property Caption,Version,BuildNumber
$os | ConvertTo-Json
"#;

/// What a WinRM enrichment learned. `os` is only set when the CIM query
/// produced a caption.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowsEnrichment {
    pub listeners: Vec<WindowsListener>,
    pub os: Option<WindowsOsInfo>,
}

/// Windows-looking label or an open WinRM port, plus usable credentials
pub fn should_enrich_windows(os_label: &str, open_ports: &[u16], creds: Option<&WinrmCredentials>) -> bool {
    let Some(creds) = creds else {
        return false;
    };
    let looks_windows =
        os_label.to_ascii_lowercase().contains("windows") || WINRM_PORTS.iter().any(|p| open_ports.contains(p));
    looks_windows && creds.is_usable()
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `ConvertTo-Json` prints a bare object for a single row and an array
/// otherwise; both are accepted. Empty output means no listeners.
pub fn parse_windows_listeners(json: &str) -> Result<Vec<WindowsListener>, ProbeError> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let rows = match serde_json::from_str::<Value>(trimmed)? {
        Value::Array(rows) => rows,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(ProbeError::Decode(format!("listener list is neither object nor array: {other}")));
        }
    };

    Ok(rows
        .iter()
        .filter(|row| row.is_object())
        .map(|row| {
            let port = row.get("port").and_then(as_u64).and_then(|p| u16::try_from(p).ok());
            let process = row.get("process").and_then(as_text);
            WindowsListener {
                address: row.get("addr").and_then(as_text),
                port,
                pid: row.get("pid").and_then(as_u64).and_then(|p| u32::try_from(p).ok()),
                service: service_for_process(process.as_deref(), port),
                process,
                path: row.get("path").and_then(as_text),
            }
        })
        .collect())
}

/// Caption, version and build from the CIM query. `None` without a caption.
pub fn parse_windows_os(json: &str) -> Option<WindowsOsInfo> {
    let value: Value = serde_json::from_str(json.trim()).ok()?;
    let obj = match &value {
        Value::Array(rows) => rows.first()?,
        other => other,
    };
    let caption = obj.get("Caption").and_then(as_text)?.trim().to_string();
    if caption.is_empty() {
        return None;
    }
    Some(WindowsOsInfo {
        caption: Some(caption),
        version: obj.get("Version").and_then(as_text),
        build_number: obj.get("BuildNumber").and_then(as_text),
    })
}

async fn run_script(ip: IpAddr, creds: &WinrmCredentials, script: &str) -> Result<String, ProbeError> {
    let out = with_timeout("winrm script", script_budget(creds.timeout), run_powershell(ip, creds, script)).await?;
    if out.exit_status != 0 {
        return Err(ProbeError::Unexpected(format!(
            "script exited with {}: {}",
            out.exit_status,
            out.stderr.trim().chars().take(200).collect::<String>()
        )));
    }
    Ok(out.stdout)
}

/// Listener collection, then the OS query. A failed listener script fails
/// the enrichment; a failed OS query only leaves `os` empty.
pub async fn enrich_windows(ip: IpAddr, creds: &WinrmCredentials) -> Result<WindowsEnrichment, ProbeError> {
    let listeners = parse_windows_listeners(&run_script(ip, creds, LISTENERS_SCRIPT).await?)?;

    let os = match run_script(ip, creds, OS_SCRIPT).await {
        Ok(out) => parse_windows_os(&out),
        Err(e) => {
            crate::log_warn!("WinRM OS query on {} failed: {}", ip, e);
            None
        }
    };

    crate::log_stderr!(
        "WinRM enrichment of {}: {} listeners, caption {:?}",
        ip,
        listeners.len(),
        os.as_ref().and_then(|o| o.caption.as_deref())
    );
    Ok(WindowsEnrichment { listeners, os })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_array_maps_processes_to_services() {
        let json = r#"[
            {"addr":"0.0.0.0","port":80,"pid":4,"process":"System","path":null},
            {"addr":"::","port":1433,"pid":2100,"process":"sqlservr","path":"C:\\Program Files\\sqlservr.exe"},
            {"addr":"0.0.0.0","port":5985,"pid":4,"process":null,"path":null}
        ]"#;
        let listeners = parse_windows_listeners(json).unwrap();
        assert_eq!(listeners.len(), 3);
        assert_eq!(listeners[0].service, "http");
        assert_eq!(listeners[1].service, "mssql");
        assert_eq!(listeners[1].pid, Some(2100));
        assert_eq!(listeners[2].service, "winrm");
        assert_eq!(listeners[2].process, None);
    }

    #[test]
    fn single_listener_object_is_wrapped() {
        let json = r#"{"addr":"0.0.0.0","port":"3389","pid":"1020","process":"svchost","path":null}"#;
        let listeners = parse_windows_listeners(json).unwrap();
        assert_eq!(listeners.len(), 1);
        assert_eq!(listeners[0].port, Some(3389));
        assert_eq!(listeners[0].pid, Some(1020));
        assert_eq!(listeners[0].service, "port-3389");
    }

    #[test]
    fn non_json_listener_output_is_decode_error() {
        assert!(matches!(
            parse_windows_listeners("Get-NetTCPConnection : Access denied"),
            Err(ProbeError::Decode(_))
        ));
        assert!(parse_windows_listeners("   ").unwrap().is_empty());
    }

    #[test]
    fn os_caption_is_extracted() {
        let json = r#"{"Caption":"Microsoft Windows Server 2019 Standard","Version":"10.0.17763","BuildNumber":"17763"}"#;
        let os = parse_windows_os(json).unwrap();
        assert_eq!(os.caption.as_deref(), Some("Microsoft Windows Server 2019 Standard"));
        assert_eq!(os.build_number.as_deref(), Some("17763"));
        assert_eq!(parse_windows_os(r#"{"Caption":""}"#), None);
        assert_eq!(parse_windows_os("oops"), None);
    }

    #[test]
    fn windows_enrichment_needs_hint_and_credentials() {
        let creds = WinrmCredentials::new("Administrator", "P@ssw0rd!");
        assert!(should_enrich_windows("Unknown", &[5985], Some(&creds)));
        assert!(should_enrich_windows("Windows (heuristic)", &[135], Some(&creds)));
        assert!(!should_enrich_windows("Linux/Unix (heuristic)", &[22], Some(&creds)));
        assert!(!should_enrich_windows("Unknown", &[5986], None));
    }
}
