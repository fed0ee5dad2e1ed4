//! Host domain model - a remote server running the Dokku agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Reachability state of a host, updated after each SSH session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Unknown,
    Connected,
    Failed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Unknown => write!(f, "unknown"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for ConnectionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(ConnectionStatus::Unknown),
            "connected" => Ok(ConnectionStatus::Connected),
            "failed" => Ok(ConnectionStatus::Failed),
            _ => Err(format!("Unknown connection status: {}", s)),
        }
    }
}

/// A remote host that deployments target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub id: Uuid,
    pub name: String,
    pub ip: String,
    pub port: u16,
    pub username: String,
    /// Candidate private key paths, tried in order
    pub key_paths: Vec<PathBuf>,
    /// Optional password fallback, offered alongside key auth
    pub password: Option<String>,
    pub connection_status: ConnectionStatus,
    pub last_connected_at: Option<DateTime<Utc>>,
    pub dokku_version: Option<String>,
    pub os_version: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores: Option<i32>,
    pub ram_total: Option<String>,
    pub disk_total: Option<String>,
    pub key_sync_error: Option<String>,
    pub keys_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Host {
    pub fn new(name: String, ip: String, username: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            ip,
            port: 22,
            username,
            key_paths: Vec::new(),
            password: None,
            connection_status: ConnectionStatus::Unknown,
            last_connected_at: None,
            dokku_version: None,
            os_version: None,
            cpu_model: None,
            cpu_cores: None,
            ram_total: None,
            disk_total: None,
            key_sync_error: None,
            keys_synced_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn dokku_installed(&self) -> bool {
        self.dokku_version.is_some()
    }

    pub fn reachable(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }
}

/// Facts gathered from a host during a connection test
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostInfo {
    pub os_version: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores: Option<i32>,
    pub ram_total: Option<String>,
    pub disk_total: Option<String>,
    pub uptime: Option<String>,
    pub dokku_version: Option<String>,
}
