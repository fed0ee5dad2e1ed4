//! Auxiliary resource synchronizers
//!
//! Each synchronizer reconciles one kind of remote resource (domains,
//! SSH keys, environment variables, databases) with the local record.
//! They share the pipeline's step shape: check remote state, install a
//! missing plugin, create the resource if absent, link it, and pull
//! generated values back. Failures land on that resource's
//! `configured`/`last_error` fields and never touch other resources.

mod database;
mod domains;
mod env_vars;
mod ssh_keys;

pub use database::DatabaseSynchronizer;
pub use domains::{DomainRequest, DomainSynchronizer};
pub use env_vars::EnvVarSynchronizer;
pub use ssh_keys::SshKeySynchronizer;

use uuid::Uuid;

use crate::ssh::SshError;

/// Synchronizer error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Deployment not found: {0}")]
    DeploymentNotFound(Uuid),

    #[error("Host not found: {0}")]
    HostNotFound(Uuid),

    #[error("Remote command failed: {0}")]
    Remote(String),

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
