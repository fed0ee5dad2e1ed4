//! Domain models for hosts, deployments, attempts, health, and the
//! remote resources the synchronizers manage

mod attempt;
mod deployment;
mod health;
mod host;
mod resources;

pub use attempt::{AttemptStatus, DeploymentAttempt};
pub use deployment::{normalize_app_name, Deployment, DeploymentMethod, DeploymentStatus};
pub use health::{HealthCheckRecord, HealthStatus};
pub use host::{ConnectionStatus, Host, HostInfo};
pub use resources::{
    DatabaseKind, DatabaseProvisioning, DomainConfig, EnvVar, REDIS_ENV_VAR, REDIS_PLUGIN_URL,
};
