//! Database synchronizer
//!
//! Provisions a managed database for a deployment through the Dokku
//! plugin for its engine: install the plugin if missing, create the
//! service if absent, link it to the app, then read the generated
//! connection URL back and store it. Deprovisioning mirrors the same
//! dispatch: unlink, destroy, unset the environment variable.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::SshConfig;
use crate::db;
use crate::domain::{DatabaseProvisioning, Deployment, Host, REDIS_ENV_VAR, REDIS_PLUGIN_URL};
use crate::events::{deploy_log_topic, Notifier, NotifierMessage};
use crate::ssh::{shell_escape, CommandOutput, HostConnection, RemoteRunner};
use crate::sync::SyncError;

pub struct DatabaseSynchronizer {
    pool: SqlitePool,
    runner: Arc<dyn RemoteRunner>,
    notifier: Notifier,
    ssh: SshConfig,
}

impl DatabaseSynchronizer {
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

    /// Provision the deployment's database (and Redis companion when
    /// enabled) and record the generated connection URLs
    pub async fn provision(&self, deployment_id: Uuid) -> Result<DatabaseProvisioning, SyncError> {
        let (provisioning, deployment, host) = self.load_target(deployment_id).await?;
        let conn = HostConnection::from_host(&host);

        self.broadcast(
            deployment_id,
            NotifierMessage::log(format!(
                "Provisioning {} database '{}'...",
                provisioning.kind, provisioning.database_name
            )),
        );

        let result = self.provision_remote(&conn, &deployment, &provisioning).await;
        match result {
            Ok((database_url, redis_url)) => {
                db::update_database_result(
                    &self.pool,
                    provisioning.id,
                    database_url.as_deref(),
                    redis_url.as_deref(),
                    None,
                )
                .await?;
                self.broadcast(
                    deployment_id,
                    NotifierMessage::log(format!(
                        "✓ Database '{}' linked to {}",
                        provisioning.database_name, deployment.app_name
                    )),
                );
            }
            Err(e) => {
                db::update_database_result(&self.pool, provisioning.id, None, None, Some(&e.to_string()))
                    .await?;
                self.broadcast(deployment_id, NotifierMessage::error(e.to_string()));
                return Err(e);
            }
        }

        db::get_database(&self.pool, deployment_id)
            .await?
            .ok_or(SyncError::DeploymentNotFound(deployment_id))
    }

    /// Tear the database down: unlink from the app, destroy the
    /// service, and unset the connection variable
    pub async fn deprovision(&self, deployment_id: Uuid) -> Result<(), SyncError> {
        let (provisioning, deployment, host) = self.load_target(deployment_id).await?;
        let conn = HostConnection::from_host(&host);
        let ns = provisioning.kind.command_namespace();
        let app = &deployment.app_name;
        let name = &provisioning.database_name;

        self.broadcast(
            deployment_id,
            NotifierMessage::log(format!("Removing database '{}'...", name)),
        );

        self.run_checked(
            &conn,
            &format!("dokku {}:unlink {} {}", ns, shell_escape(name), shell_escape(app)),
            self.ssh.command,
        )
        .await?;
        self.run_checked(
            &conn,
            &format!("dokku {}:destroy {} --force", ns, shell_escape(name)),
            self.ssh.command,
        )
        .await?;
        self.run_checked(
            &conn,
            &format!(
                "dokku config:unset {} {}",
                shell_escape(app),
                provisioning.kind.env_var_name()
            ),
            self.ssh.env,
        )
        .await?;

        if let Some(redis_name) = &provisioning.redis_name {
            self.run_checked(
                &conn,
                &format!("dokku redis:unlink {} {}", shell_escape(redis_name), shell_escape(app)),
                self.ssh.command,
            )
            .await?;
            self.run_checked(
                &conn,
                &format!("dokku redis:destroy {} --force", shell_escape(redis_name)),
                self.ssh.command,
            )
            .await?;
            self.run_checked(
                &conn,
                &format!("dokku config:unset {} {}", shell_escape(app), REDIS_ENV_VAR),
                self.ssh.env,
            )
            .await?;
        }

        db::delete_database(&self.pool, provisioning.id).await?;
        self.broadcast(
            deployment_id,
            NotifierMessage::log(format!("✓ Database '{}' removed", name)),
        );
        Ok(())
    }

    async fn provision_remote(
        &self,
        conn: &HostConnection,
        deployment: &Deployment,
        provisioning: &DatabaseProvisioning,
    ) -> Result<(Option<String>, Option<String>), SyncError> {
        let kind = provisioning.kind;
        let ns = kind.command_namespace();
        let app = &deployment.app_name;
        let name = &provisioning.database_name;

        self.ensure_plugin(conn, ns, kind.plugin_url()).await?;
        self.ensure_service(conn, ns, name).await?;
        self.ensure_link(conn, ns, name, app).await?;
        let database_url = self.read_config_var(conn, app, kind.env_var_name()).await?;

        let redis_url = match &provisioning.redis_name {
            Some(redis_name) => {
                self.ensure_plugin(conn, "redis", REDIS_PLUGIN_URL).await?;
                self.ensure_service(conn, "redis", redis_name).await?;
                self.ensure_link(conn, "redis", redis_name, app).await?;
                self.read_config_var(conn, app, REDIS_ENV_VAR).await?
            }
            None => None,
        };

        tracing::info!(app = %app, engine = %kind, "database provisioned");
        Ok((database_url, redis_url))
    }

    async fn ensure_plugin(
        &self,
        conn: &HostConnection,
        namespace: &str,
        plugin_url: &str,
    ) -> Result<(), SyncError> {
        let list = self.exec(conn, "dokku plugin:list", self.ssh.command).await?;
        if list
            .output
            .lines()
            .any(|l| l.split_whitespace().next() == Some(namespace))
        {
            return Ok(());
        }

        tracing::info!(plugin = namespace, "installing Dokku plugin");
        self.run_checked(
            conn,
            &format!("dokku plugin:install {} {}", plugin_url, namespace),
            self.ssh.install,
        )
        .await?;
        Ok(())
    }

    async fn ensure_service(
        &self,
        conn: &HostConnection,
        namespace: &str,
        name: &str,
    ) -> Result<(), SyncError> {
        let info = self
            .exec(
                conn,
                &format!("dokku {}:info {} 2>/dev/null", namespace, shell_escape(name)),
                self.ssh.command,
            )
            .await?;
        if info.success() {
            return Ok(());
        }

        self.run_checked(
            conn,
            &format!("dokku {}:create {}", namespace, shell_escape(name)),
            self.ssh.update,
        )
        .await?;
        Ok(())
    }

    async fn ensure_link(
        &self,
        conn: &HostConnection,
        namespace: &str,
        name: &str,
        app: &str,
    ) -> Result<(), SyncError> {
        let links = self
            .exec(
                conn,
                &format!("dokku {}:links {} 2>/dev/null", namespace, shell_escape(name)),
                self.ssh.command,
            )
            .await?;
        if links.output.lines().any(|l| l.trim() == app) {
            return Ok(());
        }

        // Linking restarts the app, so it runs under the env timeout
        self.run_checked(
            conn,
            &format!("dokku {}:link {} {}", namespace, shell_escape(name), shell_escape(app)),
            self.ssh.env,
        )
        .await?;
        Ok(())
    }

    async fn read_config_var(
        &self,
        conn: &HostConnection,
        app: &str,
        var: &str,
    ) -> Result<Option<String>, SyncError> {
        let output = self
            .exec(
                conn,
                &format!("dokku config:get {} {}", shell_escape(app), var),
                self.ssh.command,
            )
            .await?;
        if !output.success() {
            return Ok(None);
        }
        let value = output.output.trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    async fn exec(
        &self,
        conn: &HostConnection,
        command: &str,
        timeout_secs: u64,
    ) -> Result<CommandOutput, SyncError> {
        self.runner
            .execute(conn, command, Duration::from_secs(timeout_secs))
            .await
            .map_err(SyncError::from)
    }

    async fn run_checked(
        &self,
        conn: &HostConnection,
        command: &str,
        timeout_secs: u64,
    ) -> Result<String, SyncError> {
        let output = self.exec(conn, command, timeout_secs).await?;
        if !output.success() {
            return Err(SyncError::Remote(format!(
                "`{}` exited {}: {}",
                command,
                output.exit_code,
                output.output.trim()
            )));
        }
        Ok(output.output)
    }

    async fn load_target(
        &self,
        deployment_id: Uuid,
    ) -> Result<(DatabaseProvisioning, Deployment, Host), SyncError> {
        let deployment = db::get_deployment(&self.pool, deployment_id)
            .await?
            .ok_or(SyncError::DeploymentNotFound(deployment_id))?;
        let host = db::get_host(&self.pool, deployment.host_id)
            .await?
            .ok_or(SyncError::HostNotFound(deployment.host_id))?;
        let provisioning = db::get_database(&self.pool, deployment_id)
            .await?
            .ok_or(SyncError::DeploymentNotFound(deployment_id))?;
        Ok((provisioning, deployment, host))
    }
}
