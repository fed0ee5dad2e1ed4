//! Deployment pipeline: drives a Dokku deploy over SSH and records
//! every run as an attempt

mod classifier;
mod pipeline;

pub use classifier::classify;
pub use pipeline::{DeployOutcome, DeployPipeline};

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db;
use crate::events::{Notifier, NotifierMessage};
use crate::ssh::SshError;

/// Pipeline error taxonomy
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Deployment not found: {0}")]
    NotFound(Uuid),

    #[error("Host not found: {0}")]
    HostNotFound(Uuid),

    #[error("An attempt is already running for deployment {0}")]
    AttemptInProgress(Uuid),

    #[error("Manual deployments are pushed by the user, not the pipeline")]
    UnsupportedMethod,

    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// In-process leases, one per deployment. A second trigger while an
/// attempt holds the lease is rejected, not queued.
#[derive(Clone, Default)]
pub struct DeploymentLeases {
    held: Arc<Mutex<HashSet<Uuid>>>,
}

impl DeploymentLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the lease for a deployment
    pub fn acquire(&self, deployment_id: Uuid) -> Result<LeaseGuard, PipelineError> {
        let mut held = self.held.lock().expect("lease set poisoned");
        if !held.insert(deployment_id) {
            return Err(PipelineError::AttemptInProgress(deployment_id));
        }
        Ok(LeaseGuard {
            held: Arc::clone(&self.held),
            deployment_id,
        })
    }
}

/// Releases the lease when dropped, so every exit path frees it
pub struct LeaseGuard {
    held: Arc<Mutex<HashSet<Uuid>>>,
    deployment_id: Uuid,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(&self.deployment_id);
        }
    }
}

/// Writes timestamped lines to the attempt log and broadcasts them.
/// The database append completes before the call returns, so the
/// persisted log never lags what live subscribers saw.
pub struct AttemptLogger {
    pool: SqlitePool,
    notifier: Notifier,
    deployment_id: Uuid,
    attempt_id: Uuid,
}

impl AttemptLogger {
    pub fn new(pool: SqlitePool, notifier: Notifier, deployment_id: Uuid, attempt_id: Uuid) -> Self {
        Self {
            pool,
            notifier,
            deployment_id,
            attempt_id,
        }
    }

    pub async fn log(&self, message: &str) -> Result<(), sqlx::Error> {
        let line = format!("[{}] {}", Utc::now().format("%H:%M:%S"), message);
        db::append_log(&self.pool, self.attempt_id, &line).await?;
        self.notifier
            .publish_attempt(self.deployment_id, self.attempt_id, NotifierMessage::log(line));
        Ok(())
    }
}
