//! Blocking `ssh2` sessions driven from async code
//!
//! libssh2 is synchronous, so every session lives on a blocking worker.
//! The session timeout bounds each libssh2 call; the async side adds an
//! overall budget on top.

use ssh2::Session;
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream};
use std::time::Duration;

use super::SshCredentials;
use crate::error::{ProbeError, with_timeout};

/// Result of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Shell reported the binary as missing
    pub fn command_not_found(&self) -> bool {
        let err = self.stderr.to_ascii_lowercase();
        err.contains("not found") || self.exit_status == 127
    }
}

/// Connects and authenticates. Key auth is tried first, then password.
pub fn open_session(ip: IpAddr, creds: &SshCredentials) -> Result<Session, ProbeError> {
    let addr = SocketAddr::new(ip, creds.port);
    let stream = TcpStream::connect_timeout(&addr, creds.timeout).map_err(|source| ProbeError::Connect {
        addr: addr.to_string(),
        source,
    })?;
    stream.set_read_timeout(Some(creds.timeout))?;
    stream.set_write_timeout(Some(creds.timeout))?;

    let mut session = Session::new()?;
    session.set_tcp_stream(stream);
    session.set_timeout(creds.timeout.as_millis().min(u32::MAX as u128) as u32);
    session.handshake()?;

    if let Some(key) = &creds.key_path
        && let Err(e) = session.userauth_pubkey_file(&creds.user, None, key, None)
    {
        crate::log_debug!("SSH key auth for {}@{} failed: {}", creds.user, addr, e);
    }
    if !session.authenticated()
        && let Some(password) = creds.password.as_deref().filter(|p| !p.is_empty())
        && let Err(e) = session.userauth_password(&creds.user, password)
    {
        crate::log_debug!("SSH password auth for {}@{} failed: {}", creds.user, addr, e);
    }
    if !session.authenticated() {
        return Err(ProbeError::Auth(format!("SSH login as {} to {} rejected", creds.user, addr)));
    }
    Ok(session)
}

/// Runs one command on an open session.
pub fn exec_on(session: &Session, command: &str) -> Result<CommandOutput, ProbeError> {
    let mut channel = session.channel_session()?;
    channel.exec(command)?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    let mut stderr = String::new();
    channel.stderr().read_to_string(&mut stderr)?;

    channel.wait_close()?;
    Ok(CommandOutput {
        exit_status: channel.exit_status()?,
        stdout,
        stderr,
    })
}

/// Feeds `input` to an interactive shell on a PTY and collects everything
/// it prints until the remote side closes. Network gear that needs an
/// `enable` step only accepts it this way.
pub fn shell_on(session: &Session, input: &str) -> Result<CommandOutput, ProbeError> {
    let mut channel = session.channel_session()?;
    channel.request_pty("vt100", None, None)?;
    channel.shell()?;
    channel.write_all(input.as_bytes())?;
    channel.flush()?;
    channel.send_eof()?;

    let mut stdout = String::new();
    channel.read_to_string(&mut stdout)?;
    channel.wait_close()?;
    Ok(CommandOutput {
        exit_status: channel.exit_status()?,
        stdout,
        stderr: String::new(),
    })
}

/// Opens one session on a blocking worker and hands it to `work`.
/// `budget` caps the whole exchange, login included.
pub async fn with_session<T, F>(ip: IpAddr, creds: &SshCredentials, budget: Duration, work: F) -> Result<T, ProbeError>
where
    T: Send + 'static,
    F: FnOnce(&Session) -> Result<T, ProbeError> + Send + 'static,
{
    let creds = creds.clone();
    let handle = tokio::task::spawn_blocking(move || {
        let session = open_session(ip, &creds)?;
        let result = work(&session);
        if let Err(e) = session.disconnect(None, "bye", None) {
            crate::log_debug!("SSH disconnect from {} failed: {}", ip, e);
        }
        result
    });
    with_timeout("ssh session", budget, async { handle.await? }).await
}

/// Runs a single command with its own session.
pub async fn ssh_exec(ip: IpAddr, creds: &SshCredentials, command: &str) -> Result<CommandOutput, ProbeError> {
    let command = command.to_string();
    // connect, handshake and the command each get one timeout
    let budget = creds.timeout * 3;
    with_session(ip, creds, budget, move |session| exec_on(session, &command)).await
}
