//! Minimal WS-Management client: one PowerShell script per shell
//!
//! Create shell -> Command -> Receive until done -> Signal -> Delete, all
//! as SOAP envelopes over basic auth. Scripts travel as
//! `powershell -EncodedCommand` (UTF-16LE, base64).

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::net::IpAddr;
use std::sync::LazyLock;
use std::time::Duration;
use uuid::Uuid;

use super::WinrmCredentials;
use super::ssh::CommandOutput;
use crate::error::ProbeError;
use crate::scanner::{insecure_client, url_host};

const NS_SHELL_CMD: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/cmd";
const ACTION_CREATE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Create";
const ACTION_DELETE: &str = "http://schemas.xmlsoap.org/ws/2004/09/transfer/Delete";
const ACTION_COMMAND: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Command";
const ACTION_RECEIVE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Receive";
const ACTION_SIGNAL: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/Signal";
const SIGNAL_TERMINATE: &str = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/signal/terminate";
const STATE_DONE: &str = "CommandState/Done";

/// Receive polls before giving up on a command that never finishes
const MAX_RECEIVE_ROUNDS: usize = 64;

static SHELL_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:<(?:\w+:)?ShellId>([^<]+)</(?:\w+:)?ShellId>|Name="ShellId">([^<]+)<)"#)
        .expect("static shell id regex")
});
static COMMAND_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:\w+:)?CommandId>([^<]+)</(?:\w+:)?CommandId>").expect("static command id regex"));
static STREAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<(?:\w+:)?Stream\b[^>]*Name="(stdout|stderr)"[^>]*?(?:/>|>([^<]*)</(?:\w+:)?Stream>)"#)
        .expect("static stream regex")
});
static EXIT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<(?:\w+:)?ExitCode>(-?\d+)</(?:\w+:)?ExitCode>").expect("static exit code regex"));
static FAULT_TEXT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:\w+:)?(?:Text|Message)[^>]*>([^<]+)</(?:\w+:)?(?:Text|Message)>").expect("static fault regex")
});

/// `powershell -EncodedCommand` payload for `script`
pub fn encode_powershell(script: &str) -> String {
    let utf16: Vec<u8> = script.encode_utf16().flat_map(u16::to_le_bytes).collect();
    BASE64.encode(utf16)
}

pub fn parse_shell_id(xml: &str) -> Option<String> {
    SHELL_ID_RE
        .captures(xml)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
}

pub fn parse_command_id(xml: &str) -> Option<String> {
    COMMAND_ID_RE.captures(xml).map(|c| c[1].trim().to_string())
}

/// Decoded output of one Receive response
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReceiveChunk {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub done: bool,
    pub exit_code: Option<i32>,
}

pub fn parse_receive(xml: &str) -> Result<ReceiveChunk, ProbeError> {
    let mut chunk = ReceiveChunk::default();
    for caps in STREAM_RE.captures_iter(xml) {
        let Some(body) = caps.get(2).map(|m| m.as_str().trim()).filter(|b| !b.is_empty()) else {
            continue;
        };
        let bytes = BASE64
            .decode(body)
            .map_err(|e| ProbeError::Decode(format!("WinRM stream is not base64: {e}")))?;
        if &caps[1] == "stdout" {
            chunk.stdout.extend(bytes);
        } else {
            chunk.stderr.extend(bytes);
        }
    }
    chunk.done = xml.contains(STATE_DONE);
    chunk.exit_code = EXIT_CODE_RE.captures(xml).and_then(|c| c[1].parse().ok());
    Ok(chunk)
}

fn fault_text(xml: &str) -> String {
    FAULT_TEXT_RE
        .captures(xml)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| xml.chars().take(200).collect())
}

/// One authenticated WS-Man endpoint
struct WsmanClient {
    client: Client,
    endpoint: String,
    user: String,
    password: String,
    operation_timeout_secs: u64,
}

impl WsmanClient {
    fn new(ip: IpAddr, creds: &WinrmCredentials) -> Result<Self, ProbeError> {
        let scheme = if creds.use_tls { "https" } else { "http" };
        Ok(Self {
            client: insecure_client(creds.timeout)?,
            endpoint: format!("{scheme}://{}:{}/wsman", url_host(ip), creds.port),
            user: creds.user.clone(),
            password: creds.password.clone(),
            operation_timeout_secs: creds.timeout.as_secs().max(1),
        })
    }

    fn envelope(&self, action: &str, shell_id: Option<&str>, options: &str, body: &str) -> String {
        let selector = shell_id
            .map(|id| format!(r#"<w:SelectorSet><w:Selector Name="ShellId">{id}</w:Selector></w:SelectorSet>"#))
            .unwrap_or_default();
        format!(
            concat!(
                r#"<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" "#,
                r#"xmlns:a="http://schemas.xmlsoap.org/ws/2004/08/addressing" "#,
                r#"xmlns:w="http://schemas.dmtf.org/wbem/wsman/1/wsman.xsd" "#,
                r#"xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">"#,
                "<s:Header>",
                "<a:To>{to}</a:To>",
                r#"<a:ReplyTo><a:Address s:mustUnderstand="true">http://schemas.xmlsoap.org/ws/2004/08/addressing/role/anonymous</a:Address></a:ReplyTo>"#,
                r#"<w:MaxEnvelopeSize s:mustUnderstand="true">153600</w:MaxEnvelopeSize>"#,
                "<a:MessageID>uuid:{id}</a:MessageID>",
                r#"<w:Locale xml:lang="en-US" s:mustUnderstand="false"/>"#,
                "<w:OperationTimeout>PT{secs}S</w:OperationTimeout>",
                r#"<w:ResourceURI s:mustUnderstand="true">{resource}</w:ResourceURI>"#,
                r#"<a:Action s:mustUnderstand="true">{action}</a:Action>"#,
                "{selector}{options}",
                "</s:Header>",
                "<s:Body>{body}</s:Body>",
                "</s:Envelope>"
            ),
            to = self.endpoint,
            id = Uuid::new_v4().as_hyphenated().to_string().to_uppercase(),
            secs = self.operation_timeout_secs,
            resource = NS_SHELL_CMD,
            action = action,
            selector = selector,
            options = options,
            body = body,
        )
    }

    async fn post(&self, envelope: String) -> Result<String, ProbeError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .header(reqwest::header::CONTENT_TYPE, "application/soap+xml;charset=UTF-8")
            .body(envelope)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        match status {
            s if s.is_success() => Ok(text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProbeError::Auth(format!(
                "WinRM login as {} rejected (HTTP {})",
                self.user,
                status.as_u16()
            ))),
            s => Err(ProbeError::Unexpected(format!(
                "WinRM HTTP {}: {}",
                s.as_u16(),
                fault_text(&text)
            ))),
        }
    }

    async fn create_shell(&self) -> Result<String, ProbeError> {
        let options = concat!(
            "<w:OptionSet>",
            r#"<w:Option Name="WINRS_NOPROFILE">FALSE</w:Option>"#,
            r#"<w:Option Name="WINRS_CODEPAGE">65001</w:Option>"#,
            "</w:OptionSet>"
        );
        let body = "<rsp:Shell><rsp:InputStreams>stdin</rsp:InputStreams><rsp:OutputStreams>stdout stderr</rsp:OutputStreams></rsp:Shell>";
        let xml = self.post(self.envelope(ACTION_CREATE, None, options, body)).await?;
        parse_shell_id(&xml).ok_or_else(|| ProbeError::Decode("WinRM Create response has no ShellId".to_string()))
    }

    async fn start_command(&self, shell_id: &str, script: &str) -> Result<String, ProbeError> {
        let options = concat!(
            "<w:OptionSet>",
            r#"<w:Option Name="WINRS_CONSOLEMODE_STDIN">TRUE</w:Option>"#,
            r#"<w:Option Name="WINRS_SKIP_CMD_SHELL">FALSE</w:Option>"#,
            "</w:OptionSet>"
        );
        let body = format!(
            "<rsp:CommandLine><rsp:Command>powershell</rsp:Command><rsp:Arguments>-NoProfile -NonInteractive -EncodedCommand {}</rsp:Arguments></rsp:CommandLine>",
            encode_powershell(script)
        );
        let xml = self.post(self.envelope(ACTION_COMMAND, Some(shell_id), options, &body)).await?;
        parse_command_id(&xml).ok_or_else(|| ProbeError::Decode("WinRM Command response has no CommandId".to_string()))
    }

    async fn receive(&self, shell_id: &str, command_id: &str) -> Result<CommandOutput, ProbeError> {
        let body = format!(r#"<rsp:Receive><rsp:DesiredStream CommandId="{command_id}">stdout stderr</rsp:DesiredStream></rsp:Receive>"#);
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for _ in 0..MAX_RECEIVE_ROUNDS {
            let xml = self.post(self.envelope(ACTION_RECEIVE, Some(shell_id), "", &body)).await?;
            let chunk = parse_receive(&xml)?;
            stdout.extend(chunk.stdout);
            stderr.extend(chunk.stderr);
            if chunk.done {
                return Ok(CommandOutput {
                    exit_status: chunk.exit_code.unwrap_or(0),
                    stdout: String::from_utf8_lossy(&stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                });
            }
        }
        Err(ProbeError::Unexpected(format!(
            "WinRM command still running after {MAX_RECEIVE_ROUNDS} receive rounds"
        )))
    }

    async fn cleanup(&self, shell_id: &str, command_id: Option<&str>) {
        if let Some(command_id) = command_id {
            let body = format!(
                r#"<rsp:Signal CommandId="{command_id}"><rsp:Code>{SIGNAL_TERMINATE}</rsp:Code></rsp:Signal>"#
            );
            if let Err(e) = self.post(self.envelope(ACTION_SIGNAL, Some(shell_id), "", &body)).await {
                crate::log_debug!("WinRM signal on {} failed: {}", self.endpoint, e);
            }
        }
        if let Err(e) = self.post(self.envelope(ACTION_DELETE, Some(shell_id), "", "")).await {
            crate::log_debug!("WinRM shell delete on {} failed: {}", self.endpoint, e);
        }
    }
}

/// Runs one PowerShell script. A non-zero exit status is returned as
/// output, not as an error.
pub async fn run_powershell(ip: IpAddr, creds: &WinrmCredentials, script: &str) -> Result<CommandOutput, ProbeError> {
    let wsman = WsmanClient::new(ip, creds)?;
    let shell_id = wsman.create_shell().await?;

    match wsman.start_command(&shell_id, script).await {
        Ok(command_id) => {
            let out = wsman.receive(&shell_id, &command_id).await;
            wsman.cleanup(&shell_id, Some(&command_id)).await;
            out
        }
        Err(e) => {
            wsman.cleanup(&shell_id, None).await;
            Err(e)
        }
    }
}

/// Overall budget for one script: four round trips plus polling.
pub fn script_budget(limit: Duration) -> Duration {
    limit * 6
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const CREATE_RESPONSE: &str = r#"<s:Envelope><s:Body><rsp:Shell><rsp:ShellId>11111111-AAAA-BBBB-CCCC-000000000001</rsp:ShellId></rsp:Shell></s:Body></s:Envelope>"#;
    const COMMAND_RESPONSE: &str = r#"<s:Envelope><s:Body><rsp:CommandResponse><rsp:CommandId>22222222-DDDD-EEEE-FFFF-000000000002</rsp:CommandId></rsp:CommandResponse></s:Body></s:Envelope>"#;

    fn receive_response(stdout: &str, done: bool) -> String {
        let state = if done {
            r#"<rsp:CommandState CommandId="22222222" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done"><rsp:ExitCode>0</rsp:ExitCode></rsp:CommandState>"#
        } else {
            r#"<rsp:CommandState CommandId="22222222" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running"/>"#
        };
        format!(
            r#"<s:Envelope><s:Body><rsp:ReceiveResponse><rsp:Stream Name="stdout" CommandId="22222222">{}</rsp:Stream><rsp:Stream Name="stderr" CommandId="22222222" End="true"/>{}</rsp:ReceiveResponse></s:Body></s:Envelope>"#,
            BASE64.encode(stdout),
            state
        )
    }

    #[test]
    fn powershell_is_utf16le_base64() {
        // "ls" -> 6c 00 73 00
        assert_eq!(encode_powershell("ls"), "bABzAA==");
    }

    #[test]
    fn ids_are_extracted_from_either_form() {
        assert_eq!(
            parse_shell_id(CREATE_RESPONSE).as_deref(),
            Some("11111111-AAAA-BBBB-CCCC-000000000001")
        );
        let selector = r#"<w:SelectorSet><w:Selector Name="ShellId">ABC-1</w:Selector></w:SelectorSet>"#;
        assert_eq!(parse_shell_id(selector).as_deref(), Some("ABC-1"));
        assert_eq!(
            parse_command_id(COMMAND_RESPONSE).as_deref(),
            Some("22222222-DDDD-EEEE-FFFF-000000000002")
        );
    }

    #[test]
    fn receive_decodes_streams_and_completion() {
        let chunk = parse_receive(&receive_response("hello", true)).unwrap();
        assert_eq!(chunk.stdout, b"hello");
        assert!(chunk.stderr.is_empty());
        assert!(chunk.done);
        assert_eq!(chunk.exit_code, Some(0));

        let running = parse_receive(&receive_response("part", false)).unwrap();
        assert!(!running.done);
    }

    #[test]
    fn receive_rejects_garbage_stream() {
        let xml = r#"<rsp:Stream Name="stdout" CommandId="1">!!not base64!!</rsp:Stream>"#;
        assert!(matches!(parse_receive(xml), Err(ProbeError::Decode(_))));
    }

    /// Serves `responses` in order, one HTTP request each, on keep-alive
    /// connections.
    async fn fake_wsman(responses: Vec<(u16, String)>) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        let responses = Arc::new(responses);
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let responses = responses.clone();
                let counter = counter.clone();
                tokio::spawn(serve_connection(sock, responses, counter));
            }
        });
        (port, served)
    }

    async fn serve_connection(mut sock: TcpStream, responses: Arc<Vec<(u16, String)>>, counter: Arc<AtomicUsize>) {
        let mut buf = Vec::new();
        loop {
            let mut chunk = [0u8; 4096];
            let n = match sock.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            buf.extend_from_slice(&chunk[..n]);
            let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..header_end]).to_ascii_lowercase();
            let length: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0);
            if buf.len() < header_end + 4 + length {
                continue;
            }
            buf.drain(..header_end + 4 + length);

            let idx = counter.fetch_add(1, Ordering::SeqCst);
            let (status, body) = responses
                .get(idx)
                .cloned()
                .unwrap_or((200, "<s:Envelope/>".to_string()));
            let reply = format!(
                "HTTP/1.1 {status} X\r\nContent-Type: application/soap+xml\r\nContent-Length: {}\r\n\r\n{body}",
                body.len()
            );
            if sock.write_all(reply.as_bytes()).await.is_err() {
                return;
            }
        }
    }

    fn local_creds(port: u16) -> WinrmCredentials {
        let mut creds = WinrmCredentials::new("Administrator", "P@ssw0rd!");
        creds.port = port;
        creds.timeout = Duration::from_secs(2);
        creds
    }

    #[tokio::test]
    async fn script_runs_through_full_shell_lifecycle() {
        let (port, served) = fake_wsman(vec![
            (200, CREATE_RESPONSE.to_string()),
            (200, COMMAND_RESPONSE.to_string()),
            (200, receive_response("[{\"port\":", false)),
            (200, receive_response("3389}]", true)),
            (200, "<s:Envelope/>".to_string()),
            (200, "<s:Envelope/>".to_string()),
        ])
        .await;

        let out = run_powershell(IpAddr::V4(Ipv4Addr::LOCALHOST), &local_creds(port), "Get-Date")
            .await
            .unwrap();
        assert_eq!(out.stdout, "[{\"port\":3389}]");
        assert_eq!(out.exit_status, 0);
        // create, command, two receives, signal, delete
        assert_eq!(served.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn rejected_login_is_auth_error() {
        let (port, _) = fake_wsman(vec![(401, String::new())]).await;
        let err = run_powershell(IpAddr::V4(Ipv4Addr::LOCALHOST), &local_creds(port), "Get-Date")
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Auth(_)), "got {err:?}");
    }
}
