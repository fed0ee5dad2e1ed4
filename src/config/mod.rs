//! Configuration module for Vantage

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// SSH session and command timeouts
    #[serde(default)]
    pub ssh: SshConfig,

    /// Deployment pipeline configuration
    #[serde(default)]
    pub deploy: DeployConfig,

    /// Health prober configuration
    #[serde(default)]
    pub health: HealthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Path to SQLite database
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn get_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            PathBuf::from(path)
        } else {
            get_data_dir().join("vantage.db")
        }
    }
}

/// SSH timeouts in seconds, tiered by how long the operation is
/// allowed to run on the remote side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    /// TCP connect + handshake
    #[serde(default = "default_connect_timeout")]
    pub connect: u64,

    /// Ordinary commands
    #[serde(default = "default_command_timeout")]
    pub command: u64,

    /// Environment variable sync (app restarts after config:set)
    #[serde(default = "default_env_timeout")]
    pub env: u64,

    /// Domain and SSL operations (certificate issuance)
    #[serde(default = "default_domain_timeout")]
    pub domain: u64,

    /// Deploy push and verify
    #[serde(default = "default_update_timeout")]
    pub update: u64,

    /// Dokku bootstrap installation
    #[serde(default = "default_install_timeout")]
    pub install: u64,

    /// Hard ceiling for live log streaming
    #[serde(default = "default_stream_ceiling")]
    pub stream_ceiling: u64,
}

fn default_connect_timeout() -> u64 {
    10
}
fn default_command_timeout() -> u64 {
    30
}
fn default_env_timeout() -> u64 {
    180
}
fn default_domain_timeout() -> u64 {
    600
}
fn default_update_timeout() -> u64 {
    600
}
fn default_install_timeout() -> u64 {
    900
}
fn default_stream_ceiling() -> u64 {
    1800
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect: default_connect_timeout(),
            command: default_command_timeout(),
            env: default_env_timeout(),
            domain: default_domain_timeout(),
            update: default_update_timeout(),
            install: default_install_timeout(),
            stream_ceiling: default_stream_ceiling(),
        }
    }
}

/// Deployment pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Scratch directory for clones, one subdirectory per deployment
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    /// GitHub access token for private repositories
    pub github_token: Option<String>,

    /// Remote user Dokku's git receiver runs as
    #[serde(default = "default_dokku_user")]
    pub dokku_user: String,
}

fn default_workspace_root() -> String {
    "/tmp/vantage-deployments".to_string()
}

fn default_dokku_user() -> String {
    "dokku".to_string()
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            github_token: None,
            dokku_user: default_dokku_user(),
        }
    }
}

/// Health prober configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Seconds between scheduler ticks
    #[serde(default = "default_health_interval")]
    pub interval: u64,

    /// Per-probe HTTP timeout in seconds
    #[serde(default = "default_health_timeout")]
    pub timeout: u64,
}

fn default_health_interval() -> u64 {
    300
}
fn default_health_timeout() -> u64 {
    10
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: default_health_interval(),
            timeout: default_health_timeout(),
        }
    }
}

/// Get the data directory for Vantage
pub fn get_data_dir() -> PathBuf {
    home_dir()
        .map(|h| h.join(".vantage"))
        .unwrap_or_else(|| PathBuf::from(".vantage"))
}

/// Get the config directory for Vantage
pub fn get_config_dir() -> PathBuf {
    get_data_dir()
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

/// Load configuration from file or defaults
pub fn load_config() -> Config {
    let config_path = get_config_dir().join("config.toml");

    if config_path.exists() {
        if let Ok(contents) = std::fs::read_to_string(&config_path) {
            if let Ok(config) = toml::from_str(&contents) {
                return config;
            }
        }
    }

    Config::default()
}

/// Save configuration to file
pub fn save_config(config: &Config) -> std::io::Result<()> {
    let config_dir = get_config_dir();
    std::fs::create_dir_all(&config_dir)?;

    let config_path = config_dir.join("config.toml");
    let contents = toml::to_string_pretty(config).unwrap_or_default();
    std::fs::write(config_path, contents)?;

    Ok(())
}
