//! Deployment attempt database operations
//!
//! Attempt numbers are allocated under a UNIQUE(deployment_id,
//! attempt_number) index: the insert computes max+1 and retries on a
//! unique violation, so two concurrent starts never share a number.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{AttemptStatus, DeploymentAttempt};

/// Row type for the deployment_attempts table
#[derive(Debug, sqlx::FromRow)]
pub struct AttemptRow {
    pub id: String,
    pub deployment_id: String,
    pub attempt_number: i32,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub log_text: String,
    pub error_message: Option<String>,
}

impl AttemptRow {
    pub fn to_attempt(&self) -> DeploymentAttempt {
        DeploymentAttempt {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            deployment_id: Uuid::parse_str(&self.deployment_id).unwrap_or_default(),
            attempt_number: self.attempt_number,
            status: self.status.parse().unwrap_or(AttemptStatus::Running),
            started_at: DateTime::parse_from_rfc3339(&self.started_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            completed_at: self
                .completed_at
                .as_ref()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
            log_text: self.log_text.clone(),
            error_message: self.error_message.clone(),
        }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}

/// Start a new attempt, allocating the next attempt number
pub async fn start_attempt(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<DeploymentAttempt, sqlx::Error> {
    // Bounded retry: each conflict means another writer took the number
    for _ in 0..5 {
        #[derive(sqlx::FromRow)]
        struct MaxRow {
            next: i32,
        }

        let row = sqlx::query_as::<_, MaxRow>(
            "SELECT COALESCE(MAX(attempt_number), 0) + 1 AS next FROM deployment_attempts WHERE deployment_id = ?",
        )
        .bind(deployment_id.to_string())
        .fetch_one(pool)
        .await?;

        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO deployment_attempts (id, deployment_id, attempt_number, status, started_at)
            VALUES (?, ?, ?, 'pending', ?)
            "#,
        )
        .bind(id.to_string())
        .bind(deployment_id.to_string())
        .bind(row.next)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await;

        match result {
            Ok(_) => {
                // The number is secured; the attempt is now live
                sqlx::query("UPDATE deployment_attempts SET status = 'running' WHERE id = ?")
                    .bind(id.to_string())
                    .execute(pool)
                    .await?;
                return get_attempt(pool, id)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound);
            }
            Err(e) if is_unique_violation(&e) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(sqlx::Error::PoolTimedOut)
}

/// Get an attempt by ID
pub async fn get_attempt(
    pool: &SqlitePool,
    attempt_id: Uuid,
) -> Result<Option<DeploymentAttempt>, sqlx::Error> {
    let row = sqlx::query_as::<_, AttemptRow>("SELECT * FROM deployment_attempts WHERE id = ?")
        .bind(attempt_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_attempt()))
}

/// List attempts for a deployment, newest first
pub async fn list_attempts(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<Vec<DeploymentAttempt>, sqlx::Error> {
    let rows = sqlx::query_as::<_, AttemptRow>(
        "SELECT * FROM deployment_attempts WHERE deployment_id = ? ORDER BY attempt_number DESC",
    )
    .bind(deployment_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.to_attempt()).collect())
}

/// Get the latest attempt for a deployment
pub async fn latest_attempt(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<Option<DeploymentAttempt>, sqlx::Error> {
    let row = sqlx::query_as::<_, AttemptRow>(
        "SELECT * FROM deployment_attempts WHERE deployment_id = ? ORDER BY attempt_number DESC LIMIT 1",
    )
    .bind(deployment_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.to_attempt()))
}

/// Append one line to an attempt's log. The write completes before this
/// returns, so the persisted log never lags what subscribers saw.
pub async fn append_log(
    pool: &SqlitePool,
    attempt_id: Uuid,
    line: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE deployment_attempts
        SET log_text = CASE WHEN log_text = '' THEN ? ELSE log_text || char(10) || ? END
        WHERE id = ?
        "#,
    )
    .bind(line)
    .bind(line)
    .bind(attempt_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Move an attempt to a terminal status
pub async fn finish_attempt(
    pool: &SqlitePool,
    attempt_id: Uuid,
    status: AttemptStatus,
    error_message: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE deployment_attempts
        SET status = ?, completed_at = ?, error_message = ?
        WHERE id = ?
        "#,
    )
    .bind(status.to_string())
    .bind(Utc::now().to_rfc3339())
    .bind(error_message)
    .bind(attempt_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}
