//! Database operations for synchronizer-managed resources: domains,
//! environment variables, and database provisioning records

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{DatabaseKind, DatabaseProvisioning, DomainConfig, EnvVar};

#[derive(Debug, sqlx::FromRow)]
pub struct DomainRow {
    pub id: String,
    pub deployment_id: String,
    pub domain_name: String,
    pub default_domain: bool,
    pub ssl_enabled: bool,
    pub configured: bool,
    pub last_error: Option<String>,
    pub created_at: String,
}

impl DomainRow {
    pub fn to_domain_config(&self) -> DomainConfig {
        DomainConfig {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            deployment_id: Uuid::parse_str(&self.deployment_id).unwrap_or_default(),
            domain_name: self.domain_name.clone(),
            default_domain: self.default_domain,
            ssl_enabled: self.ssl_enabled,
            configured: self.configured,
            last_error: self.last_error.clone(),
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

/// Add one domain to a deployment
pub async fn create_domain(pool: &SqlitePool, domain: &DomainConfig) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO domains (id, deployment_id, domain_name, default_domain, ssl_enabled, configured, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(domain.id.to_string())
    .bind(domain.deployment_id.to_string())
    .bind(&domain.domain_name)
    .bind(domain.default_domain)
    .bind(domain.ssl_enabled)
    .bind(domain.configured)
    .bind(domain.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// List domains for a deployment
pub async fn list_domains(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<Vec<DomainConfig>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DomainRow>(
        "SELECT * FROM domains WHERE deployment_id = ? ORDER BY created_at",
    )
    .bind(deployment_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.to_domain_config()).collect())
}

/// Replace a deployment's domain set in one transaction. Either every
/// row lands or none do.
pub async fn replace_domains(
    pool: &SqlitePool,
    deployment_id: Uuid,
    domains: &[DomainConfig],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM domains WHERE deployment_id = ?")
        .bind(deployment_id.to_string())
        .execute(&mut *tx)
        .await?;

    for domain in domains {
        sqlx::query(
            r#"
            INSERT INTO domains (id, deployment_id, domain_name, default_domain, ssl_enabled, configured, last_error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(domain.id.to_string())
        .bind(deployment_id.to_string())
        .bind(&domain.domain_name)
        .bind(domain.default_domain)
        .bind(domain.ssl_enabled)
        .bind(domain.configured)
        .bind(&domain.last_error)
        .bind(domain.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await
}

/// Record the outcome of configuring one domain on the host
pub async fn update_domain_result(
    pool: &SqlitePool,
    domain_id: Uuid,
    ssl_enabled: bool,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE domains SET configured = ?, ssl_enabled = ?, last_error = ? WHERE id = ?")
        .bind(error.is_none())
        .bind(ssl_enabled)
        .bind(error)
        .bind(domain_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn delete_domain(pool: &SqlitePool, domain_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM domains WHERE id = ?")
        .bind(domain_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
pub struct EnvVarRow {
    pub id: String,
    pub deployment_id: String,
    pub key: String,
    pub value: String,
}

/// Upsert one environment variable
pub async fn set_env_var(pool: &SqlitePool, var: &EnvVar) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO environment_variables (id, deployment_id, key, value)
        VALUES (?, ?, ?, ?)
        ON CONFLICT (deployment_id, key) DO UPDATE SET value = excluded.value
        "#,
    )
    .bind(var.id.to_string())
    .bind(var.deployment_id.to_string())
    .bind(&var.key)
    .bind(&var.value)
    .execute(pool)
    .await?;

    Ok(())
}

/// List environment variables for a deployment
pub async fn list_env_vars(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<Vec<EnvVar>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EnvVarRow>(
        "SELECT * FROM environment_variables WHERE deployment_id = ? ORDER BY key",
    )
    .bind(deployment_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| EnvVar {
            id: Uuid::parse_str(&r.id).unwrap_or_default(),
            deployment_id: Uuid::parse_str(&r.deployment_id).unwrap_or_default(),
            key: r.key,
            value: r.value,
        })
        .collect())
}

pub async fn delete_env_var(
    pool: &SqlitePool,
    deployment_id: Uuid,
    key: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM environment_variables WHERE deployment_id = ? AND key = ?")
        .bind(deployment_id.to_string())
        .bind(key)
        .execute(pool)
        .await?;

    Ok(())
}

#[derive(Debug, sqlx::FromRow)]
pub struct DatabaseRow {
    pub id: String,
    pub deployment_id: String,
    pub kind: String,
    pub database_name: String,
    pub redis_enabled: bool,
    pub redis_name: Option<String>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub configured: bool,
    pub last_error: Option<String>,
    pub created_at: String,
}

impl DatabaseRow {
    pub fn to_provisioning(&self) -> DatabaseProvisioning {
        DatabaseProvisioning {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            deployment_id: Uuid::parse_str(&self.deployment_id).unwrap_or_default(),
            kind: self.kind.parse().unwrap_or(DatabaseKind::Postgres),
            database_name: self.database_name.clone(),
            redis_enabled: self.redis_enabled,
            redis_name: self.redis_name.clone(),
            database_url: self.database_url.clone(),
            redis_url: self.redis_url.clone(),
            configured: self.configured,
            last_error: self.last_error.clone(),
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

/// Create a provisioning record
pub async fn create_database(
    pool: &SqlitePool,
    db: &DatabaseProvisioning,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO database_configurations
            (id, deployment_id, kind, database_name, redis_enabled, redis_name, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(db.id.to_string())
    .bind(db.deployment_id.to_string())
    .bind(db.kind.to_string())
    .bind(&db.database_name)
    .bind(db.redis_enabled)
    .bind(&db.redis_name)
    .bind(db.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the provisioning record for a deployment
pub async fn get_database(
    pool: &SqlitePool,
    deployment_id: Uuid,
) -> Result<Option<DatabaseProvisioning>, sqlx::Error> {
    let row = sqlx::query_as::<_, DatabaseRow>(
        "SELECT * FROM database_configurations WHERE deployment_id = ?",
    )
    .bind(deployment_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.to_provisioning()))
}

/// Record the outcome of a provision run
pub async fn update_database_result(
    pool: &SqlitePool,
    database_id: Uuid,
    database_url: Option<&str>,
    redis_url: Option<&str>,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE database_configurations
        SET configured = ?,
            database_url = COALESCE(?, database_url),
            redis_url = COALESCE(?, redis_url),
            last_error = ?
        WHERE id = ?
        "#,
    )
    .bind(error.is_none())
    .bind(database_url)
    .bind(redis_url)
    .bind(error)
    .bind(database_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn delete_database(pool: &SqlitePool, database_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM database_configurations WHERE id = ?")
        .bind(database_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::deployments::create_deployment;
    use crate::db::hosts::create_host;
    use crate::db::pool::init_database;
    use crate::domain::{Deployment, Host};

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

    #[tokio::test]
    async fn test_replace_domains_is_atomic() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let deployment_id = seed(&pool).await;

        let old = DomainConfig::new(deployment_id, "old.example.com".into());
        create_domain(&pool, &old).await.unwrap();

        // A duplicate name inside the new set violates the unique index
        let dup_a = DomainConfig::new(deployment_id, "dup.example.com".into());
        let dup_b = DomainConfig::new(deployment_id, "dup.example.com".into());
        let result = replace_domains(&pool, deployment_id, &[dup_a, dup_b]).await;
        assert!(result.is_err());

        // The original set survived the rollback
        let domains = list_domains(&pool, deployment_id).await.unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].domain_name, "old.example.com");

        let fresh = DomainConfig::new(deployment_id, "new.example.com".into());
        replace_domains(&pool, deployment_id, &[fresh]).await.unwrap();
        let domains = list_domains(&pool, deployment_id).await.unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].domain_name, "new.example.com");
    }

    #[tokio::test]
    async fn test_env_var_upsert() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let deployment_id = seed(&pool).await;

        let mut var = EnvVar {
            id: Uuid::new_v4(),
            deployment_id,
            key: "RAILS_ENV".into(),
            value: "staging".into(),
        };
        set_env_var(&pool, &var).await.unwrap();
        var.id = Uuid::new_v4();
        var.value = "production".into();
        set_env_var(&pool, &var).await.unwrap();

        let vars = list_env_vars(&pool, deployment_id).await.unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars[0].value, "production");
    }

    #[tokio::test]
    async fn test_database_provisioning_round_trip() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let deployment_id = seed(&pool).await;

        let db = DatabaseProvisioning::new(deployment_id, DatabaseKind::Mongo, "demo-db".into())
            .with_redis();
        create_database(&pool, &db).await.unwrap();

        update_database_result(
            &pool,
            db.id,
            Some("mongodb://demo-db:27017/demo-db"),
            Some("redis://demo-db-redis:6379"),
            None,
        )
        .await
        .unwrap();

        let loaded = get_database(&pool, deployment_id).await.unwrap().unwrap();
        assert_eq!(loaded.kind, DatabaseKind::Mongo);
        assert!(loaded.configured);
        assert_eq!(loaded.redis_name.as_deref(), Some("demo-db-redis"));
        assert_eq!(
            loaded.database_url.as_deref(),
            Some("mongodb://demo-db:27017/demo-db")
        );
    }
}
