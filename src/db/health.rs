//! Health check database operations

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{HealthCheckRecord, HealthStatus};

/// Records retained per deployment; older probes are pruned
pub const RETAINED_CHECKS: i64 = 20;

/// Row type for the health_checks table
#[derive(Debug, sqlx::FromRow)]
pub struct HealthCheckRow {
    pub id: String,
    pub deployment_id: String,
    pub status: String,
    pub response_code: Option<i64>,
    pub response_time_ms: Option<i64>,
    pub response_body: Option<String>,
    pub checked_at: String,
}

impl HealthCheckRow {
    pub fn to_record(&self) -> HealthCheckRecord {
        HealthCheckRecord {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            deployment_id: Uuid::parse_str(&self.deployment_id).unwrap_or_default(),
            status: self.status.parse().unwrap_or(HealthStatus::Error),
            response_code: self.response_code.map(|c| c as u16),
            response_time_ms: self.response_time_ms,
            response_body: self.response_body.clone(),
            checked_at: DateTime::parse_from_rfc3339(&self.checked_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

/// Insert a probe result and prune history beyond the retention window
pub async fn record_check(
    pool: &SqlitePool,
    record: &HealthCheckRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO health_checks (id, deployment_id, status, response_code, response_time_ms, response_body, checked_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.id.to_string())
    .bind(record.deployment_id.to_string())
    .bind(record.status.to_string())
    .bind(record.response_code.map(|c| c as i64))
    .bind(record.response_time_ms)
    .bind(&record.response_body)
    .bind(record.checked_at.to_rfc3339())
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM health_checks
        WHERE deployment_id = ?
          AND id NOT IN (
            SELECT id FROM health_checks
            WHERE deployment_id = ?
            ORDER BY checked_at DESC
            LIMIT ?
          )
        "#,
    )
    .bind(record.deployment_id.to_string())
    .bind(record.deployment_id.to_string())
    .bind(RETAINED_CHECKS)
    .execute(pool)
    .await?;

    Ok(())
}

/// List retained checks for a deployment, newest first
pub async fn list_checks(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<Vec<HealthCheckRecord>, sqlx::Error> {
    let rows = sqlx::query_as::<_, HealthCheckRow>(
        "SELECT * FROM health_checks WHERE deployment_id = ? ORDER BY checked_at DESC",
    )
    .bind(deployment_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.to_record()).collect())
}

/// The most recent check, if any
pub async fn latest_check(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<Option<HealthCheckRecord>, sqlx::Error> {
    let row = sqlx::query_as::<_, HealthCheckRow>(
        "SELECT * FROM health_checks WHERE deployment_id = ? ORDER BY checked_at DESC LIMIT 1",
    )
    .bind(deployment_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.to_record()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::deployments::create_deployment;
    use crate::db::hosts::create_host;
    use crate::db::pool::init_database;
    use crate::domain::{Deployment, Host};
    use chrono::Duration;

    async fn seed(pool: &SqlitePool) -> Uuid {
        let host = Host::new("prod".into(), "203.0.113.9".into(), "root".into());
        create_host(pool, &host).await.unwrap();
        let deployment = Deployment::new(
            host.id,
            "Demo".into(),
            "demo".into(),
            "https://github.com/org/demo.git".into(),
        );
        create_deployment(pool, &deployment).await.unwrap();
        deployment.id
    }

    fn check_at(deployment_id: Uuid, status: HealthStatus, at: DateTime<Utc>) -> HealthCheckRecord {
        HealthCheckRecord {
            id: Uuid::new_v4(),
            deployment_id,
            status,
            response_code: Some(200),
            response_time_ms: Some(42),
            response_body: None,
            checked_at: at,
        }
    }

    #[tokio::test]
    async fn test_retention_keeps_twenty_newest() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let deployment_id = seed(&pool).await;

        let base = Utc::now() - Duration::hours(1);
        for i in 0..25 {
            let record = check_at(
                deployment_id,
                HealthStatus::Healthy,
                base + Duration::minutes(i),
            );
            record_check(&pool, &record).await.unwrap();
        }

        let checks = list_checks(&pool, deployment_id).await.unwrap();
        assert_eq!(checks.len(), RETAINED_CHECKS as usize);
        // Newest first, and the oldest five were pruned
        assert_eq!(checks[0].checked_at, base + Duration::minutes(24));
        assert_eq!(checks.last().unwrap().checked_at, base + Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_latest_check() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let deployment_id = seed(&pool).await;
        assert!(latest_check(&pool, deployment_id).await.unwrap().is_none());

        let base = Utc::now();
        record_check(&pool, &check_at(deployment_id, HealthStatus::Healthy, base))
            .await
            .unwrap();
        record_check(
            &pool,
            &check_at(deployment_id, HealthStatus::Timeout, base + Duration::minutes(5)),
        )
        .await
        .unwrap();

        let latest = latest_check(&pool, deployment_id).await.unwrap().unwrap();
        assert_eq!(latest.status, HealthStatus::Timeout);
    }
}
