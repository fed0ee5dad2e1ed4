//! Domain and SSL synchronizer
//!
//! Attaches custom domains to a Dokku app and optionally enables SSL
//! through the letsencrypt plugin. Certificate issuance can take
//! minutes, so domain operations run under the long domain timeout.
//! Progress is broadcast on the deployment topic as it happens.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::SshConfig;
use crate::db;
use crate::domain::DomainConfig;
use crate::events::{deploy_log_topic, Notifier, NotifierMessage};
use crate::ssh::{shell_escape, HostConnection, RemoteRunner};
use crate::sync::SyncError;

const LETSENCRYPT_PLUGIN_URL: &str = "https://github.com/dokku/dokku-letsencrypt.git";

/// Desired state for one domain in a replace call
#[derive(Debug, Clone)]
pub struct DomainRequest {
    pub name: String,
    pub ssl: bool,
}

pub struct DomainSynchronizer {
    pool: SqlitePool,
    runner: Arc<dyn RemoteRunner>,
    notifier: Notifier,
    ssh: SshConfig,
}

impl DomainSynchronizer {
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

    /// Configure one domain on the host and record the outcome on that
    /// domain's row
    pub async fn sync_domain(&self, domain_id: Uuid) -> Result<DomainConfig, SyncError> {
        let domain = sqlx::query_as::<_, db::DomainRow>("SELECT * FROM domains WHERE id = ?")
            .bind(domain_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|r| r.to_domain_config())
            .ok_or(SyncError::DeploymentNotFound(domain_id))?;

        let (deployment, host) = self.load_target(domain.deployment_id).await?;
        let conn = HostConnection::from_host(&host);
        let app = &deployment.app_name;

        self.broadcast(
            deployment.id,
            NotifierMessage::log(format!("Configuring domain {}", domain.domain_name)),
        );

        let result = self.apply_domain(&conn, app, &domain).await;
        match result {
            Ok(ssl_active) => {
                db::update_domain_result(&self.pool, domain.id, ssl_active, None).await?;
                self.broadcast(
                    deployment.id,
                    NotifierMessage::log(format!("✓ Domain {} configured", domain.domain_name)),
                );
            }
            Err(SyncError::Remote(ref message)) => {
                db::update_domain_result(&self.pool, domain.id, false, Some(message.as_str()))
                    .await?;
                self.broadcast(deployment.id, NotifierMessage::error(message.clone()));
            }
            Err(e) => {
                db::update_domain_result(&self.pool, domain.id, false, Some(&e.to_string()))
                    .await?;
                self.broadcast(deployment.id, NotifierMessage::error(e.to_string()));
                return Err(e);
            }
        }

        sqlx::query_as::<_, db::DomainRow>("SELECT * FROM domains WHERE id = ?")
            .bind(domain.id.to_string())
            .fetch_one(&self.pool)
            .await
            .map(|r| r.to_domain_config())
            .map_err(SyncError::from)
    }

    /// Replace the full domain set for a deployment. The remote side is
    /// reconciled first; the local rows only change if every remote
    /// operation succeeded, so a remote failure leaves the stored set
    /// untouched.
    pub async fn replace_domains(
        &self,
        deployment_id: Uuid,
        requests: &[DomainRequest],
    ) -> Result<Vec<DomainConfig>, SyncError> {
        let (deployment, host) = self.load_target(deployment_id).await?;
        let conn = HostConnection::from_host(&host);
        let app = &deployment.app_name;

        self.broadcast(
            deployment_id,
            NotifierMessage::log(format!("Updating domain set ({} domains)", requests.len())),
        );

        let result = self
            .reconcile_remote(&conn, app, deployment_id, requests)
            .await;
        let replacement = match result {
            Ok(replacement) => replacement,
            Err(e) => {
                self.broadcast(deployment_id, NotifierMessage::error(e.to_string()));
                return Err(e);
            }
        };

        db::replace_domains(&self.pool, deployment_id, &replacement).await?;
        self.broadcast(
            deployment_id,
            NotifierMessage::log("✓ Domain set updated"),
        );
        db::list_domains(&self.pool, deployment_id)
            .await
            .map_err(SyncError::from)
    }

    async fn reconcile_remote(
        &self,
        conn: &HostConnection,
        app: &str,
        deployment_id: Uuid,
        requests: &[DomainRequest],
    ) -> Result<Vec<DomainConfig>, SyncError> {
        let current = db::list_domains(&self.pool, deployment_id).await?;

        for stale in current
            .iter()
            .filter(|d| !requests.iter().any(|r| r.name == d.domain_name))
        {
            self.run_checked(
                conn,
                &format!(
                    "dokku domains:remove {} {}",
                    shell_escape(app),
                    shell_escape(&stale.domain_name)
                ),
                self.ssh.domain,
            )
            .await?;
            self.broadcast(
                deployment_id,
                NotifierMessage::log(format!("Removed domain {}", stale.domain_name)),
            );
        }

        let mut replacement = Vec::with_capacity(requests.len());
        let mut ssl_active = false;
        for request in requests {
            self.run_checked(
                conn,
                &format!(
                    "dokku domains:add {} {}",
                    shell_escape(app),
                    shell_escape(&request.name)
                ),
                self.ssh.domain,
            )
            .await?;
            self.broadcast(
                deployment_id,
                NotifierMessage::log(format!("✓ Added domain {}", request.name)),
            );

            if request.ssl && !ssl_active {
                ssl_active = self.enable_ssl(conn, app, deployment_id).await?;
            }

            let mut domain = DomainConfig::new(deployment_id, request.name.clone());
            domain.configured = true;
            domain.ssl_enabled = request.ssl && ssl_active;
            replacement.push(domain);
        }

        Ok(replacement)
    }

    /// Detach a domain on the host, then delete the local row
    pub async fn remove_domain(&self, domain_id: Uuid) -> Result<(), SyncError> {
        let domain = sqlx::query_as::<_, db::DomainRow>("SELECT * FROM domains WHERE id = ?")
            .bind(domain_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|r| r.to_domain_config())
            .ok_or(SyncError::DeploymentNotFound(domain_id))?;

        let (deployment, host) = self.load_target(domain.deployment_id).await?;
        let conn = HostConnection::from_host(&host);

        self.run_checked(
            &conn,
            &format!(
                "dokku domains:remove {} {}",
                shell_escape(&deployment.app_name),
                shell_escape(&domain.domain_name)
            ),
            self.ssh.domain,
        )
        .await?;
        self.broadcast(
            deployment.id,
            NotifierMessage::log(format!("Removed domain {}", domain.domain_name)),
        );

        db::delete_domain(&self.pool, domain_id).await?;
        Ok(())
    }

    async fn apply_domain(
        &self,
        conn: &HostConnection,
        app: &str,
        domain: &DomainConfig,
    ) -> Result<bool, SyncError> {
        self.run_checked(
            conn,
            &format!(
                "dokku domains:add {} {}",
                shell_escape(app),
                shell_escape(&domain.domain_name)
            ),
            self.ssh.domain,
        )
        .await?;

        if !domain.ssl_enabled {
            return Ok(false);
        }

        self.enable_ssl(conn, app, domain.deployment_id).await
    }

    /// Enable letsencrypt for the app, then read the certificate list
    /// back. The enable exit code alone does not prove issuance.
    async fn enable_ssl(
        &self,
        conn: &HostConnection,
        app: &str,
        deployment_id: Uuid,
    ) -> Result<bool, SyncError> {
        self.ensure_letsencrypt_plugin(conn).await?;
        self.run_checked(
            conn,
            &format!("dokku letsencrypt:enable {}", shell_escape(app)),
            self.ssh.domain,
        )
        .await?;

        let active = self.certificate_active(conn, app).await?;
        let message = if active {
            NotifierMessage::log(format!("✓ SSL certificate active for {}", app))
        } else {
            NotifierMessage::log(format!("SSL certificate pending for {}", app))
        };
        self.broadcast(deployment_id, message);
        Ok(active)
    }

    /// Whether the app appears in `letsencrypt:list`
    async fn certificate_active(
        &self,
        conn: &HostConnection,
        app: &str,
    ) -> Result<bool, SyncError> {
        let list = self
            .runner
            .execute(
                conn,
                "dokku letsencrypt:list",
                Duration::from_secs(self.ssh.command),
            )
            .await?;
        Ok(list.success() && list.output.lines().any(|l| l.split_whitespace().next() == Some(app)))
    }

    async fn ensure_letsencrypt_plugin(&self, conn: &HostConnection) -> Result<(), SyncError> {
        let installed = self
            .runner
            .execute(conn, "dokku plugin:list", Duration::from_secs(self.ssh.command))
            .await?;
        if installed.output.contains("letsencrypt") {
            return Ok(());
        }

        self.run_checked(
            conn,
            &format!("dokku plugin:install {} letsencrypt", LETSENCRYPT_PLUGIN_URL),
            self.ssh.install,
        )
        .await?;
        Ok(())
    }

    async fn run_checked(
        &self,
        conn: &HostConnection,
        command: &str,
        timeout_secs: u64,
    ) -> Result<String, SyncError> {
        let output = self
            .runner
            .execute(conn, command, Duration::from_secs(timeout_secs))
            .await?;
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
    ) -> Result<(crate::domain::Deployment, crate::domain::Host), SyncError> {
        let deployment = db::get_deployment(&self.pool, deployment_id)
            .await?
            .ok_or(SyncError::DeploymentNotFound(deployment_id))?;
        let host = db::get_host(&self.pool, deployment.host_id)
            .await?
            .ok_or(SyncError::HostNotFound(deployment.host_id))?;
        Ok((deployment, host))
    }
}
