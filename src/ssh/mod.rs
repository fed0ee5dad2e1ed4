//! Remote command execution over SSH
//!
//! One session per call: `execute` runs a single bounded command,
//! `stream` runs a long-lived command and forwards output lines until
//! the channel closes, a stop signal fires, or the wall-clock ceiling
//! elapses. The blocking ssh2 session is isolated behind
//! `spawn_blocking` so callers stay async.

mod escape;

pub use escape::shell_escape;

use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ssh2::Session;
use tokio::sync::{mpsc, watch};

use crate::domain::Host;

/// Connection identity and credentials for one host, passed explicitly
/// into every call rather than read from process environment.
#[derive(Debug, Clone)]
pub struct HostConnection {
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Candidate private keys, tried in order
    pub key_paths: Vec<PathBuf>,
    /// Offered as an additional auth method in the same session
    pub password: Option<String>,
}

impl HostConnection {
    pub fn from_host(host: &Host) -> Self {
        Self {
            host: host.ip.clone(),
            port: host.port,
            username: host.username.clone(),
            key_paths: host.key_paths.clone(),
            password: host.password.clone(),
        }
    }

    /// Fails fast when neither a key nor a password is configured,
    /// before any network I/O happens.
    fn require_auth_method(&self) -> Result<(), SshError> {
        if self.key_paths.is_empty() && self.password.is_none() {
            return Err(SshError::NoAuthMethod);
        }
        Ok(())
    }
}

/// Result of a single remote command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Combined stdout + stderr, lossily decoded to valid UTF-8
    pub output: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// SSH error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("Authentication failed. Please check your SSH key or password.")]
    AuthenticationFailed,

    #[error("Connection timeout. Server may be unreachable.")]
    ConnectionTimeout,

    #[error("Host unreachable. Check the IP address and network connectivity.")]
    HostUnreachable,

    #[error("Connection refused. Check if SSH service is running on port {port}.")]
    ConnectionRefused { port: u16 },

    #[error("Command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("No authentication method available (no SSH key or password configured)")]
    NoAuthMethod,

    #[error("SSH session error: {0}")]
    Session(String),
}

impl SshError {
    /// Connectivity and authentication failures abort an attempt
    /// outright; command-level failures let diagnostics continue.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SshError::CommandTimeout { .. })
    }
}

/// Seam between the pipeline/synchronizers and the SSH transport.
/// Tests substitute a scripted runner.
#[async_trait]
pub trait RemoteRunner: Send + Sync {
    /// Run one bounded command and collect its output
    async fn execute(
        &self,
        conn: &HostConnection,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SshError>;

    /// Run a long-lived command, forwarding each output line. Returns
    /// when the remote channel closes, `stop` flips to true, or the
    /// wall-clock ceiling elapses.
    async fn stream(
        &self,
        conn: &HostConnection,
        command: &str,
        lines: mpsc::Sender<String>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), SshError>;
}

/// ssh2-backed executor
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: Duration,
    stream_ceiling: Duration,
}

impl SshExecutor {
    pub fn new(connect_timeout: Duration, stream_ceiling: Duration) -> Self {
        Self {
            connect_timeout,
            stream_ceiling,
        }
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30 * 60))
    }
}

#[async_trait]
impl RemoteRunner for SshExecutor {
    async fn execute(
        &self,
        conn: &HostConnection,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, SshError> {
        conn.require_auth_method()?;

        let conn = conn.clone();
        let command = command.to_string();
        let connect_timeout = self.connect_timeout;

        tokio::task::spawn_blocking(move || {
            execute_blocking(&conn, &command, connect_timeout, timeout)
        })
        .await
        .map_err(|e| SshError::Session(e.to_string()))?
    }

    async fn stream(
        &self,
        conn: &HostConnection,
        command: &str,
        lines: mpsc::Sender<String>,
        stop: watch::Receiver<bool>,
    ) -> Result<(), SshError> {
        conn.require_auth_method()?;

        let conn = conn.clone();
        let command = command.to_string();
        let connect_timeout = self.connect_timeout;
        let ceiling = self.stream_ceiling;

        tokio::task::spawn_blocking(move || {
            stream_blocking(&conn, &command, lines, stop, connect_timeout, ceiling)
        })
        .await
        .map_err(|e| SshError::Session(e.to_string()))?
    }
}

fn execute_blocking(
    conn: &HostConnection,
    command: &str,
    connect_timeout: Duration,
    timeout: Duration,
) -> Result<CommandOutput, SshError> {
    let session = open_session(conn, connect_timeout)?;
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);

    let mut channel = session
        .channel_session()
        .map_err(|e| map_ssh2_error(e, command, timeout))?;
    channel
        .exec(command)
        .map_err(|e| map_ssh2_error(e, command, timeout))?;

    let mut stdout = Vec::new();
    channel
        .read_to_end(&mut stdout)
        .map_err(|e| map_read_error(e, command, timeout))?;

    let mut stderr = Vec::new();
    channel
        .stderr()
        .read_to_end(&mut stderr)
        .map_err(|e| map_read_error(e, command, timeout))?;

    // Best-effort: a command that already produced output should not
    // fail the call because close handshaking hiccuped
    let _ = channel.wait_close();
    let exit_code = channel.exit_status().unwrap_or(-1);

    let mut output = String::from_utf8_lossy(&stdout).into_owned();
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&String::from_utf8_lossy(&stderr));
    }

    Ok(CommandOutput { output, exit_code })
}

fn stream_blocking(
    conn: &HostConnection,
    command: &str,
    lines: mpsc::Sender<String>,
    stop: watch::Receiver<bool>,
    connect_timeout: Duration,
    ceiling: Duration,
) -> Result<(), SshError> {
    let session = open_session(conn, connect_timeout)?;
    // Short read timeout so the loop can poll the stop signal between
    // data chunks; cancellation is cooperative, never preemptive
    session.set_timeout(500);

    let mut channel = session
        .channel_session()
        .map_err(|e| map_ssh2_error(e, command, ceiling))?;
    channel
        .exec(command)
        .map_err(|e| map_ssh2_error(e, command, ceiling))?;

    let started = Instant::now();
    let mut buf = [0u8; 8192];
    let mut pending = String::new();

    loop {
        if *stop.borrow() {
            tracing::debug!("stop signal set, ending stream of `{}`", command);
            break;
        }
        if started.elapsed() >= ceiling {
            tracing::warn!("stream of `{}` hit the {}s ceiling", command, ceiling.as_secs());
            break;
        }

        match channel.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                pending.push_str(&String::from_utf8_lossy(&buf[..n]));
                while let Some(idx) = pending.find('\n') {
                    let line: String = pending.drain(..=idx).collect();
                    let line = line.trim_end_matches(['\n', '\r']);
                    if !line.is_empty() && lines.blocking_send(line.to_string()).is_err() {
                        // Receiver gone, nobody is tailing anymore
                        let _ = channel.close();
                        return Ok(());
                    }
                }
            }
            Err(e) if is_timeout_io(&e) => continue,
            Err(e) => return Err(map_read_error(e, command, ceiling)),
        }
    }

    if let Some(trailing) = trailing_line(&pending, *stop.borrow()) {
        let _ = lines.blocking_send(trailing.to_string());
    }

    let _ = channel.close();
    Ok(())
}

/// Leftover partial line when the stream ends. Nothing may be emitted
/// once the stop signal has fired, so a stopped stream discards it.
fn trailing_line(pending: &str, stopped: bool) -> Option<&str> {
    if stopped {
        return None;
    }
    let trailing = pending.trim_end_matches(['\n', '\r']);
    (!trailing.is_empty()).then_some(trailing)
}

fn open_session(conn: &HostConnection, connect_timeout: Duration) -> Result<Session, SshError> {
    let addr = (conn.host.as_str(), conn.port)
        .to_socket_addrs()
        .map_err(|_| SshError::HostUnreachable)?
        .next()
        .ok_or(SshError::HostUnreachable)?;

    let tcp = TcpStream::connect_timeout(&addr, connect_timeout).map_err(|e| {
        match e.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                SshError::ConnectionTimeout
            }
            std::io::ErrorKind::ConnectionRefused => SshError::ConnectionRefused {
                port: conn.port,
            },
            _ => SshError::HostUnreachable,
        }
    })?;

    let mut session = Session::new().map_err(|e| SshError::Session(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(connect_timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| SshError::Session(format!("SSH handshake failed: {}", e)))?;

    authenticate(conn, &session)?;
    Ok(session)
}

/// Key auth first; a configured password is offered as an additional
/// method within the same session negotiation, never a reconnect.
fn authenticate(conn: &HostConnection, session: &Session) -> Result<(), SshError> {
    for key_path in &conn.key_paths {
        if !key_path.exists() {
            tracing::warn!("SSH key not found, skipping: {:?}", key_path);
            continue;
        }
        let _ = session.userauth_pubkey_file(&conn.username, None, key_path, None);
        if session.authenticated() {
            return Ok(());
        }
    }

    if let Some(password) = &conn.password {
        let _ = session.userauth_password(&conn.username, password);
        if session.authenticated() {
            return Ok(());
        }
    }

    Err(SshError::AuthenticationFailed)
}

fn is_timeout_io(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

fn map_read_error(e: std::io::Error, command: &str, timeout: Duration) -> SshError {
    if is_timeout_io(&e) {
        SshError::CommandTimeout {
            command: command.to_string(),
            seconds: timeout.as_secs(),
        }
    } else {
        SshError::Session(e.to_string())
    }
}

fn map_ssh2_error(e: ssh2::Error, command: &str, timeout: Duration) -> SshError {
    let message = e.message().to_lowercase();
    if message.contains("timeout") || message.contains("timed out") {
        SshError::CommandTimeout {
            command: command.to_string(),
            seconds: timeout.as_secs(),
        }
    } else {
        SshError::Session(e.message().to_string())
    }
}
