//! Deployment attempt domain model - one execution run of the pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl AttemptStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AttemptStatus::Success | AttemptStatus::Failed)
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptStatus::Pending => write!(f, "pending"),
            AttemptStatus::Running => write!(f, "running"),
            AttemptStatus::Success => write!(f, "success"),
            AttemptStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AttemptStatus::Pending),
            "running" => Ok(AttemptStatus::Running),
            "success" => Ok(AttemptStatus::Success),
            "failed" => Ok(AttemptStatus::Failed),
            _ => Err(format!("Unknown attempt status: {}", s)),
        }
    }
}

/// One execution run of the deployment pipeline. Attempts are a
/// historical record and are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentAttempt {
    pub id: Uuid,
    pub deployment_id: Uuid,
    /// Strictly increasing per deployment, allocated race-free
    pub attempt_number: i32,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Newline-delimited `[HH:MM:SS] message` lines, read back verbatim
    pub log_text: String,
    pub error_message: Option<String>,
}

impl DeploymentAttempt {
    pub fn duration_seconds(&self) -> Option<i64> {
        let completed = self.completed_at?;
        Some((completed - self.started_at).num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in ["pending", "running", "success", "failed"] {
            let status: AttemptStatus = s.parse().unwrap();
            assert_eq!(status.to_string(), s);
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(AttemptStatus::Success.is_terminal());
        assert!(AttemptStatus::Failed.is_terminal());
        assert!(!AttemptStatus::Running.is_terminal());
        assert!(!AttemptStatus::Pending.is_terminal());
    }
}
