//! Environment variable synchronizer
//!
//! Pushes the stored variable set into the app with one `config:set`
//! call. Dokku restarts the app afterwards, so this runs under the
//! longer env timeout. The outcome lands on the deployment's
//! `env_configured`/`env_sync_error` fields.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::SshConfig;
use crate::db;
use crate::events::{deploy_log_topic, Notifier, NotifierMessage};
use crate::ssh::{shell_escape, HostConnection, RemoteRunner};
use crate::sync::SyncError;

pub struct EnvVarSynchronizer {
    pool: SqlitePool,
    runner: Arc<dyn RemoteRunner>,
    notifier: Notifier,
    ssh: SshConfig,
}

impl EnvVarSynchronizer {
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
        }
    }

    fn broadcast(&self, deployment_id: Uuid, message: NotifierMessage) {
        self.notifier
            .publish(&deploy_log_topic(deployment_id), message);
    }

    /// Push every stored variable into the app environment
    pub async fn sync(&self, deployment_id: Uuid) -> Result<(), SyncError> {
        let deployment = db::get_deployment(&self.pool, deployment_id)
            .await?
            .ok_or(SyncError::DeploymentNotFound(deployment_id))?;
        let host = db::get_host(&self.pool, deployment.host_id)
            .await?
            .ok_or(SyncError::HostNotFound(deployment.host_id))?;

        let vars = db::list_env_vars(&self.pool, deployment_id).await?;
        if vars.is_empty() {
            db::update_env_sync(&self.pool, deployment_id, None).await?;
            return Ok(());
        }

        self.broadcast(
            deployment_id,
            NotifierMessage::log(format!("Setting {} environment variables...", vars.len())),
        );

        let assignments = vars
            .iter()
            .map(|v| format!("{}={}", v.key, shell_escape(&v.value)))
            .collect::<Vec<_>>()
            .join(" ");
        let command = format!(
            "dokku config:set {} {}",
            shell_escape(&deployment.app_name),
            assignments
        );

        let result = self
            .runner
            .execute(
                &HostConnection::from_host(&host),
                &command,
                Duration::from_secs(self.ssh.env),
            )
            .await;

        match result {
            Ok(output) if output.success() => {
                db::update_env_sync(&self.pool, deployment_id, None).await?;
                self.broadcast(
                    deployment_id,
                    NotifierMessage::log("✓ Environment variables configured"),
                );
                tracing::info!(app = %deployment.app_name, vars = vars.len(), "environment synced");
                Ok(())
            }
            Ok(output) => {
                let message = format!("config:set exited {}: {}", output.exit_code, output.output.trim());
                db::update_env_sync(&self.pool, deployment_id, Some(&message)).await?;
                self.broadcast(deployment_id, NotifierMessage::error(message.clone()));
                Err(SyncError::Remote(message))
            }
            Err(e) => {
                db::update_env_sync(&self.pool, deployment_id, Some(&e.to_string())).await?;
                self.broadcast(deployment_id, NotifierMessage::error(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Remove one variable from the app environment and the local store
    pub async fn unset(&self, deployment_id: Uuid, key: &str) -> Result<(), SyncError> {
        let deployment = db::get_deployment(&self.pool, deployment_id)
            .await?
            .ok_or(SyncError::DeploymentNotFound(deployment_id))?;
        let host = db::get_host(&self.pool, deployment.host_id)
            .await?
            .ok_or(SyncError::HostNotFound(deployment.host_id))?;

        let command = format!(
            "dokku config:unset {} {}",
            shell_escape(&deployment.app_name),
            shell_escape(key)
        );
        let output = self
            .runner
            .execute(
                &HostConnection::from_host(&host),
                &command,
                Duration::from_secs(self.ssh.env),
            )
            .await?;
        if !output.success() {
            return Err(SyncError::Remote(format!(
                "config:unset exited {}: {}",
                output.exit_code,
                output.output.trim()
            )));
        }

        db::delete_env_var(&self.pool, deployment_id, key).await?;
        self.broadcast(
            deployment_id,
            NotifierMessage::log(format!("✓ Unset {}", key)),
        );
        Ok(())
    }
}
