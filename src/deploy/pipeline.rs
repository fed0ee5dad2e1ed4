//! The deployment pipeline
//!
//! Every command runs on the target host over SSH: the repository is
//! cloned into a scratch directory there, pushed into Dokku's git
//! receiver on the same machine, and verified with `dokku ps:report`.
//! Each step logs through the attempt logger before the next begins,
//! and the final verdict comes from the outcome classifier, not the
//! push exit code.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::config::{DeployConfig, SshConfig};
use crate::db;
use crate::deploy::{classify, AttemptLogger, DeploymentLeases, LeaseGuard, PipelineError};
use crate::domain::{
    AttemptStatus, Deployment, DeploymentMethod, DeploymentStatus, Host,
};
use crate::events::{Notifier, NotifierMessage};
use crate::ssh::{shell_escape, CommandOutput, HostConnection, RemoteRunner, SshError};

/// What one pipeline run produced
#[derive(Debug)]
pub struct DeployOutcome {
    pub success: bool,
    pub attempt_id: Uuid,
    pub attempt_number: i32,
    /// The full attempt log as persisted
    pub logs: String,
    pub error: Option<String>,
}

pub struct DeployPipeline {
    pool: SqlitePool,
    runner: Arc<dyn RemoteRunner>,
    notifier: Notifier,
    ssh: SshConfig,
    deploy: DeployConfig,
    leases: DeploymentLeases,
}

impl DeployPipeline {
    pub fn new(
        pool: SqlitePool,
        runner: Arc<dyn RemoteRunner>,
        notifier: Notifier,
        ssh: SshConfig,
        deploy: DeployConfig,
    ) -> Self {
        Self {
            pool,
            runner,
            notifier,
            ssh,
            deploy,
            leases: DeploymentLeases::new(),
        }
    }

    /// Take the deployment's lease without running anything. Callers
    /// that hand the run to a background task use this to reject a
    /// duplicate trigger before spawning.
    pub fn acquire_lease(&self, deployment_id: Uuid) -> Result<LeaseGuard, PipelineError> {
        self.leases.acquire(deployment_id)
    }

    /// Run one deployment attempt end to end
    pub async fn run(&self, deployment_id: Uuid) -> Result<DeployOutcome, PipelineError> {
        let lease = self.leases.acquire(deployment_id)?;
        self.run_locked(deployment_id, lease).await
    }

    /// Run with the lease already held; it is released on every path
    /// when the guard drops
    pub async fn run_locked(
        &self,
        deployment_id: Uuid,
        _lease: LeaseGuard,
    ) -> Result<DeployOutcome, PipelineError> {
        let deployment = db::get_deployment(&self.pool, deployment_id)
            .await?
            .ok_or(PipelineError::NotFound(deployment_id))?;

        if deployment.method == DeploymentMethod::Manual {
            return Err(PipelineError::UnsupportedMethod);
        }

        let host = db::get_host(&self.pool, deployment.host_id)
            .await?
            .ok_or(PipelineError::HostNotFound(deployment.host_id))?;

        let attempt = db::start_attempt(&self.pool, deployment_id).await?;
        db::set_deployment_status(&self.pool, deployment_id, DeploymentStatus::Deploying).await?;

        let logger = AttemptLogger::new(
            self.pool.clone(),
            self.notifier.clone(),
            deployment_id,
            attempt.id,
        );

        tracing::info!(
            deployment = %deployment.app_name,
            attempt = attempt.attempt_number,
            "starting deployment attempt"
        );

        let run = self.run_steps(&deployment, &host, &logger).await;

        let (pipeline_ok, public_url, fatal_error) = match run {
            Ok(result) => (result.ok, result.public_url, None),
            Err(e) => {
                let _ = logger.log(&format!("Deployment failed: {}", e)).await;
                (false, None, Some(e.to_string()))
            }
        };

        let attempt_row = db::get_attempt(&self.pool, attempt.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        let success = fatal_error.is_none() && classify(&attempt_row.log_text, pipeline_ok);

        let (status, error) = if success {
            (AttemptStatus::Success, None)
        } else {
            let error = fatal_error
                .clone()
                .unwrap_or_else(|| "Deployment failed. See the attempt log for details.".to_string());
            (AttemptStatus::Failed, Some(error))
        };

        db::finish_attempt(&self.pool, attempt.id, status, error.as_deref()).await?;

        if success {
            db::mark_deployed(&self.pool, deployment_id, public_url.as_deref()).await?;
        } else {
            db::set_deployment_status(&self.pool, deployment_id, DeploymentStatus::Failed).await?;
        }

        let finished = db::get_attempt(&self.pool, attempt.id)
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        self.notifier.publish_attempt(
            deployment_id,
            attempt.id,
            NotifierMessage::Completed {
                success,
                status: status.to_string(),
                duration: finished.duration_seconds().unwrap_or(0),
                error: error.clone(),
                timestamp: chrono::Utc::now(),
            },
        );

        tracing::info!(
            deployment = %deployment.app_name,
            attempt = attempt.attempt_number,
            success,
            "deployment attempt finished"
        );

        Ok(DeployOutcome {
            success,
            attempt_id: attempt.id,
            attempt_number: attempt.attempt_number,
            logs: finished.log_text,
            error,
        })
    }

    async fn run_steps(
        &self,
        deployment: &Deployment,
        host: &Host,
        logger: &AttemptLogger,
    ) -> Result<StepResult, PipelineError> {
        let conn = HostConnection::from_host(host);
        let workdir = format!("{}/{}", self.deploy.workspace_root, deployment.id);
        let repo_dir = format!("{}/repo", workdir);
        let mut ok = true;

        let result = self
            .run_steps_inner(deployment, &conn, logger, &workdir, &repo_dir, &mut ok)
            .await;

        // Step 7: the scratch directory goes away on every path
        let _ = self
            .exec(&conn, &format!("rm -rf {}", shell_escape(&workdir)), self.ssh.command)
            .await;

        let public_url = match result {
            Ok(url) => url,
            Err(e) => {
                // Fatal transport errors abort; the verdict is failed
                return Err(e.into());
            }
        };

        Ok(StepResult { ok, public_url })
    }

    async fn run_steps_inner(
        &self,
        deployment: &Deployment,
        conn: &HostConnection,
        logger: &AttemptLogger,
        workdir: &str,
        repo_dir: &str,
        ok: &mut bool,
    ) -> Result<Option<String>, SshError> {
        let app = &deployment.app_name;

        let pushed = self
            .prepare_and_push(deployment, conn, logger, workdir, repo_dir)
            .await?;
        if !pushed {
            *ok = false;
        }

        // Step 6: verify, best-effort even after an earlier failed step
        logger.log("Verifying deployment...").await.ok();
        let report = self
            .exec(conn, &format!("dokku ps:report {}", shell_escape(app)), self.ssh.command)
            .await?;
        let running = report.success() && report.output.to_lowercase().contains("running");
        if running {
            logger.log("✓ App is running on Dokku").await.ok();
        } else {
            logger.log("App is not reporting a running process").await.ok();
            *ok = false;
        }

        let url_out = self
            .exec(conn, &format!("dokku url {}", shell_escape(app)), self.ssh.command)
            .await?;
        let public_url = url_out
            .success()
            .then(|| url_out.output.lines().next().map(|l| l.trim().to_string()))
            .flatten()
            .filter(|u| !u.is_empty());
        if let Some(url) = &public_url {
            logger.log(&format!("Application URL: {}", url)).await.ok();
        }

        if running {
            logger.log("✓ Deployment verified successfully").await.ok();
        }

        Ok(public_url)
    }

    /// Steps 1 through 5. Returns false when a step failed on its exit
    /// code; only fatal transport errors propagate.
    async fn prepare_and_push(
        &self,
        deployment: &Deployment,
        conn: &HostConnection,
        logger: &AttemptLogger,
        workdir: &str,
        repo_dir: &str,
    ) -> Result<bool, SshError> {
        let app = &deployment.app_name;

        // Step 1: ensure the app exists
        logger.log(&format!("Checking Dokku app '{}'", app)).await.ok();
        let exists = self
            .exec(conn, &format!("dokku apps:exists {}", shell_escape(app)), self.ssh.command)
            .await?;
        if !exists.success() {
            let created = self
                .exec(conn, &format!("dokku apps:create {}", shell_escape(app)), self.ssh.command)
                .await?;
            if created.success() {
                logger.log(&format!("✓ Created Dokku app '{}'", app)).await.ok();
            } else {
                logger
                    .log(&format!("Deployment failed: could not create app: {}", created.output.trim()))
                    .await
                    .ok();
                return Ok(false);
            }
        }

        // Step 2: resolve the effective repository URL
        let clone_url = self.effective_repository_url(deployment, logger).await;

        // Step 3: clone, branch-qualified first
        logger
            .log(&format!(
                "Cloning repository (branch '{}')",
                deployment.repository_branch
            ))
            .await
            .ok();
        self.exec(conn, &format!("mkdir -p {}", shell_escape(workdir)), self.ssh.command)
            .await?;

        let branch_clone = self
            .exec(
                conn,
                &format!(
                    "git clone -b {} {} {}",
                    shell_escape(&deployment.repository_branch),
                    shell_escape(&clone_url),
                    shell_escape(repo_dir)
                ),
                self.ssh.update,
            )
            .await?;
        if !branch_clone.success() {
            let plain_clone = self
                .exec(
                    conn,
                    &format!("git clone {} {}", shell_escape(&clone_url), shell_escape(repo_dir)),
                    self.ssh.update,
                )
                .await?;
            if !plain_clone.success() {
                logger
                    .log(&format!("Deployment failed: clone failed: {}", plain_clone.output.trim()))
                    .await
                    .ok();
                return Ok(false);
            }
            let checkout = self
                .exec(
                    conn,
                    &format!(
                        "git -C {} checkout {}",
                        shell_escape(repo_dir),
                        shell_escape(&deployment.repository_branch)
                    ),
                    self.ssh.command,
                )
                .await?;
            if !checkout.success() {
                // Non-fatal: the default branch deploys instead
                logger
                    .log(&format!(
                        "Warning: branch '{}' not found, deploying default branch",
                        deployment.repository_branch
                    ))
                    .await
                    .ok();
            }
        }
        logger.log("✓ Repository cloned").await.ok();

        // Step 4: deploy key, idempotent by fingerprint
        self.ensure_deploy_key(conn, logger).await?;

        // Step 5: dokku remote + force push
        let remote = format!("{}@{}:{}", self.deploy.dokku_user, conn.host, app);
        self.exec(
            conn,
            &format!(
                "git -C {} remote remove dokku 2>/dev/null; git -C {} remote add dokku {}",
                shell_escape(repo_dir),
                shell_escape(repo_dir),
                shell_escape(&remote)
            ),
            self.ssh.command,
        )
        .await?;

        logger.log(&format!("Pushing to Dokku remote {}", remote)).await.ok();
        let push = self
            .exec(
                conn,
                &format!(
                    "GIT_SSH_COMMAND='ssh -o StrictHostKeyChecking=no' git -C {} push dokku {}:main --force 2>&1",
                    shell_escape(repo_dir),
                    shell_escape(&deployment.repository_branch)
                ),
                self.ssh.update,
            )
            .await?;
        for line in push.output.lines().filter(|l| !l.trim().is_empty()) {
            logger.log(line.trim_end()).await.ok();
        }
        if !push.success() {
            return Ok(false);
        }
        logger.log("✓ Git push completed").await.ok();
        Ok(true)
    }

    /// Private GitHub repositories get the access token embedded in the
    /// clone URL; anything else is used as configured.
    async fn effective_repository_url(
        &self,
        deployment: &Deployment,
        logger: &AttemptLogger,
    ) -> String {
        if deployment.method != DeploymentMethod::GithubRepo {
            return deployment.repository_url.clone();
        }
        match &self.deploy.github_token {
            Some(token) if deployment.repository_url.starts_with("https://github.com/") => {
                deployment.repository_url.replacen(
                    "https://github.com/",
                    &format!("https://x-access-token:{}@github.com/", token),
                    1,
                )
            }
            _ => {
                logger
                    .log("Warning: no GitHub token configured, cloning without credentials")
                    .await
                    .ok();
                deployment.repository_url.clone()
            }
        }
    }

    /// Generate a host-side deploy key if missing and register it with
    /// Dokku, comparing fingerprints so reruns are no-ops
    async fn ensure_deploy_key(
        &self,
        conn: &HostConnection,
        logger: &AttemptLogger,
    ) -> Result<(), SshError> {
        let keygen = "test -f ~/.ssh/id_ed25519 || ssh-keygen -t ed25519 -N '' -f ~/.ssh/id_ed25519 -q";
        let generated = self.exec(conn, keygen, self.ssh.command).await?;
        if !generated.success() {
            logger
                .log(&format!("Warning: deploy key generation failed: {}", generated.output.trim()))
                .await
                .ok();
            return Ok(());
        }

        let fingerprint = self
            .exec(conn, "ssh-keygen -lf ~/.ssh/id_ed25519.pub | awk '{print $2}'", self.ssh.command)
            .await?;
        let fingerprint = fingerprint.output.trim().to_string();

        let registered = self.exec(conn, "dokku ssh-keys:list 2>/dev/null", self.ssh.command).await?;
        if !fingerprint.is_empty() && registered.output.contains(&fingerprint) {
            return Ok(());
        }

        let added = self
            .exec(conn, "dokku ssh-keys:add vantage-deploy ~/.ssh/id_ed25519.pub", self.ssh.command)
            .await?;
        if added.success() {
            logger.log("✓ Deploy key registered with Dokku").await.ok();
        } else {
            logger
                .log(&format!("Warning: could not register deploy key: {}", added.output.trim()))
                .await
                .ok();
        }
        Ok(())
    }

    /// Fatal transport errors propagate and abort the attempt; a
    /// command timeout is downgraded to a failed command so later
    /// diagnostic steps still run
    async fn exec(
        &self,
        conn: &HostConnection,
        command: &str,
        timeout_secs: u64,
    ) -> Result<CommandOutput, SshError> {
        match self
            .runner
            .execute(conn, command, Duration::from_secs(timeout_secs))
            .await
        {
            Ok(output) => Ok(output),
            Err(e) if !e.is_fatal() => Ok(CommandOutput {
                output: e.to_string(),
                exit_code: -1,
            }),
            Err(e) => Err(e),
        }
    }
}

struct StepResult {
    ok: bool,
    public_url: Option<String>,
}
