//! Health check domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of a single HTTP probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Timeout,
    Error,
}

impl HealthStatus {
    /// 2xx and 3xx responses count as healthy; everything else does not
    pub fn from_response_code(code: u16) -> Self {
        match code {
            200..=399 => HealthStatus::Healthy,
            400..=599 => HealthStatus::Unhealthy,
            _ => HealthStatus::Error,
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Timeout => write!(f, "timeout"),
            HealthStatus::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(HealthStatus::Healthy),
            "unhealthy" => Ok(HealthStatus::Unhealthy),
            "timeout" => Ok(HealthStatus::Timeout),
            "error" => Ok(HealthStatus::Error),
            _ => Err(format!("Unknown health status: {}", s)),
        }
    }
}

/// One persisted probe result. Only the 20 most recent records are
/// retained per deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckRecord {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub status: HealthStatus,
    pub response_code: Option<u16>,
    pub response_time_ms: Option<i64>,
    pub response_body: Option<String>,
    pub checked_at: DateTime<Utc>,
}
