//! Host-level operations: connection testing, server fact gathering,
//! Dokku bootstrap installation, and live application log streaming

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use regex::Regex;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::SshConfig;
use crate::db;
use crate::domain::{ConnectionStatus, HostInfo};
use crate::events::{deploy_log_topic, Notifier, NotifierMessage};
use crate::ssh::{shell_escape, HostConnection, RemoteRunner, SshError};

const DOKKU_BOOTSTRAP_VERSION: &str = "v0.34.9";

/// Host operation error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum HostOpsError {
    #[error("Host not found: {0}")]
    NotFound(Uuid),

    #[error("Deployment not found: {0}")]
    DeploymentNotFound(Uuid),

    #[error("Dokku installation failed: {0}")]
    InstallFailed(String),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct HostOps {
    pool: SqlitePool,
    runner: Arc<dyn RemoteRunner>,
    notifier: Notifier,
    ssh: SshConfig,
    /// Stop handles for live log streams, keyed by deployment
    streams: Arc<Mutex<HashMap<Uuid, watch::Sender<bool>>>>,
}

impl HostOps {
    pub fn new(
        pool: SqlitePool,
        runner: Arc<dyn RemoteRunner>,
        notifier: Notifier,
        ssh: SshConfig,
    ) -> Self {
        Self {
            pool,
            runner,
            notifier,
            ssh,
            streams: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open a session, gather server facts, and record the outcome on
    /// the host row. Connection errors mark the host failed rather than
    /// propagating.
    pub async fn test_connection(&self, host_id: Uuid) -> Result<ConnectionStatus, HostOpsError> {
        let host = db::get_host(&self.pool, host_id)
            .await?
            .ok_or(HostOpsError::NotFound(host_id))?;
        let conn = HostConnection::from_host(&host);

        match self.gather_info(&conn).await {
            Ok(info) => {
                db::update_connection_result(&self.pool, host_id, ConnectionStatus::Connected, Some(&info))
                    .await?;
                tracing::info!(host = %host.name, "connection test succeeded");
                Ok(ConnectionStatus::Connected)
            }
            Err(e) => {
                tracing::warn!(host = %host.name, "connection test failed: {}", e);
                db::update_connection_result(&self.pool, host_id, ConnectionStatus::Failed, None).await?;
                Ok(ConnectionStatus::Failed)
            }
        }
    }

    async fn gather_info(&self, conn: &HostConnection) -> Result<HostInfo, SshError> {
        let timeout = Duration::from_secs(self.ssh.command);

        // One round trip for the OS-level facts
        let facts = self
            .runner
            .execute(
                conn,
                "grep PRETTY_NAME /etc/os-release; nproc; grep -m1 'model name' /proc/cpuinfo; free -h | grep Mem; df -h / | tail -1; uptime -p",
                timeout,
            )
            .await?;

        let mut info = parse_host_facts(&facts.output);

        let dokku = self
            .runner
            .execute(conn, "dokku version 2>/dev/null", timeout)
            .await?;
        if dokku.success() {
            info.dokku_version = parse_dokku_version(&dokku.output);
        }

        Ok(info)
    }

    /// Install Dokku with the official bootstrap script if it is not
    /// already present. Idempotent; the install runs under the long
    /// install timeout.
    pub async fn install_dokku(&self, host_id: Uuid) -> Result<String, HostOpsError> {
        let host = db::get_host(&self.pool, host_id)
            .await?
            .ok_or(HostOpsError::NotFound(host_id))?;
        let conn = HostConnection::from_host(&host);
        let command_timeout = Duration::from_secs(self.ssh.command);

        let existing = self
            .runner
            .execute(&conn, "dokku version 2>/dev/null", command_timeout)
            .await?;
        if existing.success() {
            if let Some(version) = parse_dokku_version(&existing.output) {
                return Ok(version);
            }
        }

        tracing::info!(host = %host.name, "installing Dokku {}", DOKKU_BOOTSTRAP_VERSION);
        let install = self
            .runner
            .execute(
                &conn,
                &format!(
                    "wget -qO /tmp/dokku-bootstrap.sh https://dokku.com/install/{v}/bootstrap.sh && DOKKU_TAG={v} bash /tmp/dokku-bootstrap.sh",
                    v = DOKKU_BOOTSTRAP_VERSION
                ),
                Duration::from_secs(self.ssh.install),
            )
            .await?;
        if !install.success() {
            return Err(HostOpsError::InstallFailed(
                install.output.trim().chars().take(500).collect(),
            ));
        }

        let version = self
            .runner
            .execute(&conn, "dokku version", command_timeout)
            .await?;
        let version = parse_dokku_version(&version.output)
            .ok_or_else(|| HostOpsError::InstallFailed("dokku not runnable after install".into()))?;

        let info = HostInfo {
            dokku_version: Some(version.clone()),
            ..Default::default()
        };
        db::update_connection_result(&self.pool, host_id, ConnectionStatus::Connected, Some(&info))
            .await?;
        Ok(version)
    }

    /// Run one ad-hoc Dokku subcommand against a deployment's app,
    /// broadcasting the command and its output on the deployment topic
    /// line by line. The subcommand is the part after `dokku`, e.g.
    /// `ps:restart` or `config:show`.
    pub async fn run_command(
        &self,
        deployment_id: Uuid,
        subcommand: &str,
    ) -> Result<crate::ssh::CommandOutput, HostOpsError> {
        let deployment = db::get_deployment(&self.pool, deployment_id)
            .await?
            .ok_or(HostOpsError::DeploymentNotFound(deployment_id))?;
        let host = db::get_host(&self.pool, deployment.host_id)
            .await?
            .ok_or(HostOpsError::NotFound(deployment.host_id))?;
        let conn = HostConnection::from_host(&host);

        let command = format!(
            "dokku {} {}",
            subcommand.trim(),
            shell_escape(&deployment.app_name)
        );
        let topic = deploy_log_topic(deployment_id);
        self.notifier
            .publish(&topic, NotifierMessage::log(format!("$ {}", command)));

        let output = self
            .runner
            .execute(&conn, &command, Duration::from_secs(self.ssh.command))
            .await?;

        for line in output.output.lines().filter(|l| !l.trim().is_empty()) {
            self.notifier
                .publish(&topic, NotifierMessage::log(line.trim_end()));
        }
        if !output.success() {
            self.notifier.publish(
                &topic,
                NotifierMessage::error(format!(
                    "Command exited {}: {}",
                    output.exit_code, command
                )),
            );
        }

        Ok(output)
    }

    /// Start tailing `dokku logs -t` for a deployment, broadcasting
    /// each line on the deployment topic. A second start for the same
    /// deployment is a no-op. The stream ends on stop, on the remote
    /// side closing, or at the wall-clock ceiling.
    pub async fn start_log_stream(&self, deployment_id: Uuid) -> Result<bool, HostOpsError> {
        let deployment = db::get_deployment(&self.pool, deployment_id)
            .await?
            .ok_or(HostOpsError::DeploymentNotFound(deployment_id))?;
        let host = db::get_host(&self.pool, deployment.host_id)
            .await?
            .ok_or(HostOpsError::NotFound(deployment.host_id))?;

        let stop_rx = {
            let mut streams = self.streams.lock().expect("stream registry poisoned");
            if streams.contains_key(&deployment_id) {
                return Ok(false);
            }
            let (stop_tx, stop_rx) = watch::channel(false);
            streams.insert(deployment_id, stop_tx);
            stop_rx
        };

        let conn = HostConnection::from_host(&host);
        let command = format!("dokku logs {} -t", shell_escape(&deployment.app_name));
        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);

        let notifier = self.notifier.clone();
        let topic = deploy_log_topic(deployment_id);
        tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                notifier.publish(&topic, NotifierMessage::log(line));
            }
        });

        let runner = Arc::clone(&self.runner);
        let notifier = self.notifier.clone();
        let streams = Arc::clone(&self.streams);
        tokio::spawn(async move {
            if let Err(e) = runner.stream(&conn, &command, line_tx, stop_rx).await {
                notifier.publish(
                    &deploy_log_topic(deployment_id),
                    NotifierMessage::error(format!("Log stream ended: {}", e)),
                );
            }
            // The stream is over either way; free the slot
            if let Ok(mut streams) = streams.lock() {
                streams.remove(&deployment_id);
            }
        });

        Ok(true)
    }

    /// Signal a running log stream to stop
    pub fn stop_log_stream(&self, deployment_id: Uuid) -> bool {
        let mut streams = self.streams.lock().expect("stream registry poisoned");
        match streams.remove(&deployment_id) {
            Some(stop_tx) => {
                let _ = stop_tx.send(true);
                true
            }
            None => false,
        }
    }
}

/// Parse the combined fact-gathering output into structured fields
fn parse_host_facts(output: &str) -> HostInfo {
    let mut info = HostInfo::default();

    if let Some(caps) = Regex::new(r#"PRETTY_NAME="?([^"\n]+)"?"#)
        .ok()
        .and_then(|re| re.captures(output))
    {
        info.os_version = Some(caps[1].trim().to_string());
    }

    if let Some(caps) = Regex::new(r"model name\s*:\s*(.+)")
        .ok()
        .and_then(|re| re.captures(output))
    {
        info.cpu_model = Some(caps[1].trim().to_string());
    }

    // nproc prints a bare integer on its own line
    info.cpu_cores = output
        .lines()
        .find_map(|l| l.trim().parse::<i32>().ok());

    if let Some(caps) = Regex::new(r"Mem:\s+(\S+)")
        .ok()
        .and_then(|re| re.captures(output))
    {
        info.ram_total = Some(caps[1].to_string());
    }

    // df -h output: filesystem size used avail use% mount
    if let Some(caps) = Regex::new(r"(?m)^\S+\s+(\S+)\s+\S+\s+\S+\s+\S+%\s+/\s*$")
        .ok()
        .and_then(|re| re.captures(output))
    {
        info.disk_total = Some(caps[1].to_string());
    }

    if let Some(caps) = Regex::new(r"up\s+(.+)").ok().and_then(|re| re.captures(output)) {
        info.uptime = Some(caps[1].trim().to_string());
    }

    info
}

/// `dokku version` prints "dokku version 0.34.9"
fn parse_dokku_version(output: &str) -> Option<String> {
    Regex::new(r"dokku version\s+(\S+)")
        .ok()?
        .captures(output)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_facts() {
        let output = r#"PRETTY_NAME="Ubuntu 24.04.1 LTS"
4
model name	: AMD EPYC 7282 16-Core Processor
Mem:           7.8Gi       1.2Gi       5.1Gi
/dev/sda1        78G   12G   63G  16% /
up 3 weeks, 2 days, 5 hours"#;

        let info = parse_host_facts(output);
        assert_eq!(info.os_version.as_deref(), Some("Ubuntu 24.04.1 LTS"));
        assert_eq!(info.cpu_cores, Some(4));
        assert_eq!(info.cpu_model.as_deref(), Some("AMD EPYC 7282 16-Core Processor"));
        assert_eq!(info.ram_total.as_deref(), Some("7.8Gi"));
        assert_eq!(info.disk_total.as_deref(), Some("78G"));
        assert_eq!(info.uptime.as_deref(), Some("3 weeks, 2 days, 5 hours"));
    }

    #[test]
    fn test_parse_dokku_version() {
        assert_eq!(
            parse_dokku_version("dokku version 0.34.9").as_deref(),
            Some("0.34.9")
        );
        assert_eq!(parse_dokku_version("command not found"), None);
    }

    #[test]
    fn test_parse_partial_facts() {
        let info = parse_host_facts("PRETTY_NAME=\"Debian GNU/Linux 12\"\n");
        assert_eq!(info.os_version.as_deref(), Some("Debian GNU/Linux 12"));
        assert!(info.cpu_model.is_none());
        assert!(info.ram_total.is_none());
    }
}
