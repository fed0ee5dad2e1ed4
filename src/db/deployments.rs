//! Deployment database operations

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{Deployment, DeploymentMethod, DeploymentStatus};

/// Row type for the deployments table
#[derive(Debug, sqlx::FromRow)]
pub struct DeploymentRow {
    pub id: String,
    pub host_id: String,
    pub name: String,
    pub app_name: String,
    pub repository_url: String,
    pub repository_branch: String,
    pub method: String,
    pub status: String,
    pub public_url: Option<String>,
    pub last_deployed_at: Option<String>,
    pub env_configured: bool,
    pub env_sync_error: Option<String>,
    pub created_at: String,
}

impl DeploymentRow {
    pub fn to_deployment(&self) -> Deployment {
        Deployment {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            host_id: Uuid::parse_str(&self.host_id).unwrap_or_default(),
            name: self.name.clone(),
            app_name: self.app_name.clone(),
            repository_url: self.repository_url.clone(),
            repository_branch: self.repository_branch.clone(),
            method: self.method.parse().unwrap_or(DeploymentMethod::PublicRepo),
            status: self.status.parse().unwrap_or(DeploymentStatus::NotDeployed),
            public_url: self.public_url.clone(),
            last_deployed_at: self
                .last_deployed_at
                .as_ref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            env_configured: self.env_configured,
            env_sync_error: self.env_sync_error.clone(),
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

/// Create a deployment
pub async fn create_deployment(pool: &SqlitePool, deployment: &Deployment) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO deployments (id, host_id, name, app_name, repository_url, repository_branch, method, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(deployment.id.to_string())
    .bind(deployment.host_id.to_string())
    .bind(&deployment.name)
    .bind(&deployment.app_name)
    .bind(&deployment.repository_url)
    .bind(&deployment.repository_branch)
    .bind(deployment.method.to_string())
    .bind(deployment.status.to_string())
    .bind(deployment.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a deployment by ID
pub async fn get_deployment(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<Option<Deployment>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = ?")
        .bind(deployment_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_deployment()))
}

/// List all deployments
pub async fn list_deployments(pool: &SqlitePool) -> Result<Vec<Deployment>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments ORDER BY created_at")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.to_deployment()).collect())
}

/// List deployments on one host
pub async fn list_deployments_for_host(
    pool: &SqlitePool,
    host_id: Uuid,
) -> Result<Vec<Deployment>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeploymentRow>(
        "SELECT * FROM deployments WHERE host_id = ? ORDER BY created_at",
    )
    .bind(host_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.to_deployment()).collect())
}

/// Move a deployment to a new status
pub async fn set_deployment_status(
    pool: &SqlitePool,
    deployment_id: Uuid,
    status: DeploymentStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE deployments SET status = ? WHERE id = ?")
        .bind(status.to_string())
        .bind(deployment_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Record a successful deploy: status, timestamp, and the URL Dokku reported
pub async fn mark_deployed(
    pool: &SqlitePool,
    deployment_id: Uuid,
    public_url: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE deployments
        SET status = 'deployed',
            last_deployed_at = ?,
            public_url = COALESCE(?, public_url)
        WHERE id = ?
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(public_url)
    .bind(deployment_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the outcome of an environment variable sync
pub async fn update_env_sync(
    pool: &SqlitePool,
    deployment_id: Uuid,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE deployments SET env_configured = ?, env_sync_error = ? WHERE id = ?")
        .bind(error.is_none())
        .bind(error)
        .bind(deployment_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete a deployment and its attempts, health checks, and resources
pub async fn delete_deployment(pool: &SqlitePool, deployment_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM deployments WHERE id = ?")
        .bind(deployment_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::hosts::create_host;
    use crate::db::pool::init_database;
    use crate::domain::Host;

    async fn seed(pool: &SqlitePool) -> Deployment {
        let host = Host::new("prod".into(), "203.0.113.9".into(), "root".into());
        create_host(pool, &host).await.unwrap();
        let deployment = Deployment::new(
            host.id,
            "Demo".into(),
            "demo".into(),
            "https://github.com/org/demo.git".into(),
        );
        create_deployment(pool, &deployment).await.unwrap();
        deployment
    }

    #[tokio::test]
    async fn test_deployment_round_trip() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let deployment = seed(&pool).await;

        let loaded = get_deployment(&pool, deployment.id).await.unwrap().unwrap();
        assert_eq!(loaded.app_name, "demo");
        assert_eq!(loaded.status, DeploymentStatus::NotDeployed);
        assert_eq!(loaded.method, DeploymentMethod::PublicRepo);
    }

    #[tokio::test]
    async fn test_mark_deployed_keeps_existing_url() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let deployment = seed(&pool).await;

        mark_deployed(&pool, deployment.id, Some("http://demo.example.com"))
            .await
            .unwrap();
        // A verify pass that could not read the URL must not erase it
        mark_deployed(&pool, deployment.id, None).await.unwrap();

        let loaded = get_deployment(&pool, deployment.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DeploymentStatus::Deployed);
        assert_eq!(loaded.public_url.as_deref(), Some("http://demo.example.com"));
        assert!(loaded.last_deployed_at.is_some());
    }

    #[tokio::test]
    async fn test_env_sync_error_is_isolated() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let deployment = seed(&pool).await;

        update_env_sync(&pool, deployment.id, Some("config:set failed")).await.unwrap();
        let loaded = get_deployment(&pool, deployment.id).await.unwrap().unwrap();
        assert!(!loaded.env_configured);
        assert_eq!(loaded.env_sync_error.as_deref(), Some("config:set failed"));

        update_env_sync(&pool, deployment.id, None).await.unwrap();
        let loaded = get_deployment(&pool, deployment.id).await.unwrap().unwrap();
        assert!(loaded.env_configured);
        assert!(loaded.env_sync_error.is_none());
    }
}
