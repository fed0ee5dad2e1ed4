//! Deployment domain model - the desired end state for one application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the application source reaches the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentMethod {
    /// Private repository on GitHub, cloned with an access token
    GithubRepo,
    /// Any publicly cloneable repository
    PublicRepo,
    /// Pushed by the user directly; the pipeline does not drive these
    Manual,
}

impl std::fmt::Display for DeploymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentMethod::GithubRepo => write!(f, "github_repo"),
            DeploymentMethod::PublicRepo => write!(f, "public_repo"),
            DeploymentMethod::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for DeploymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "github_repo" => Ok(DeploymentMethod::GithubRepo),
            "public_repo" => Ok(DeploymentMethod::PublicRepo),
            "manual" => Ok(DeploymentMethod::Manual),
            _ => Err(format!("Unknown deployment method: {}", s)),
        }
    }
}

/// Overall deployment state shown to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    NotDeployed,
    Deploying,
    Deployed,
    Failed,
}

impl std::fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStatus::NotDeployed => write!(f, "not_deployed"),
            DeploymentStatus::Deploying => write!(f, "deploying"),
            DeploymentStatus::Deployed => write!(f, "deployed"),
            DeploymentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_deployed" => Ok(DeploymentStatus::NotDeployed),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "deployed" => Ok(DeploymentStatus::Deployed),
            "failed" => Ok(DeploymentStatus::Failed),
            _ => Err(format!("Unknown deployment status: {}", s)),
        }
    }
}

/// A deployment targets one Dokku app on one host
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: Uuid,
    pub host_id: Uuid,
    pub name: String,
    /// Dokku application name (lowercase letters, digits, hyphens)
    pub app_name: String,
    pub repository_url: String,
    pub repository_branch: String,
    pub method: DeploymentMethod,
    pub status: DeploymentStatus,
    /// Resolved public URL, written back after a verified deploy
    pub public_url: Option<String>,
    pub last_deployed_at: Option<DateTime<Utc>>,
    pub env_configured: bool,
    pub env_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(host_id: Uuid, name: String, app_name: String, repository_url: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            host_id,
            name,
            app_name: normalize_app_name(&app_name),
            repository_url,
            repository_branch: "main".to_string(),
            method: DeploymentMethod::PublicRepo,
            status: DeploymentStatus::NotDeployed,
            public_url: None,
            last_deployed_at: None,
            env_configured: false,
            env_sync_error: None,
            created_at: Utc::now(),
        }
    }

    /// Resolved URL for health probing: configured public URL, or the
    /// nip.io fallback derived from the host IP
    pub fn resolved_url(&self, host_ip: &str) -> Option<String> {
        if let Some(url) = &self.public_url {
            if !url.is_empty() {
                return Some(url.clone());
            }
        }
        if host_ip.is_empty() || self.app_name.is_empty() {
            return None;
        }
        Some(format!("http://{}.{}.nip.io", self.app_name, host_ip))
    }
}

/// Force a name into Dokku's app-name alphabet
pub fn normalize_app_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_app_name() {
        assert_eq!(normalize_app_name("My App!"), "my-app");
        assert_eq!(normalize_app_name("--weird__name--"), "weird-name");
        assert_eq!(normalize_app_name("already-fine-1"), "already-fine-1");
    }

    #[test]
    fn test_resolved_url_falls_back_to_nip_io() {
        let mut d = Deployment::new(
            Uuid::new_v4(),
            "demo".into(),
            "brave-butterfly".into(),
            "https://example.com/org/app.git".into(),
        );
        assert_eq!(
            d.resolved_url("203.0.113.7"),
            Some("http://brave-butterfly.203.0.113.7.nip.io".to_string())
        );
        d.public_url = Some("https://app.example.com".into());
        assert_eq!(
            d.resolved_url("203.0.113.7"),
            Some("https://app.example.com".to_string())
        );
    }
}
