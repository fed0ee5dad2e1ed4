//! Host database operations

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::{ConnectionStatus, Host, HostInfo};

/// Row type for the hosts table
#[derive(Debug, sqlx::FromRow)]
pub struct HostRow {
    pub id: String,
    pub name: String,
    pub ip: String,
    pub port: i64,
    pub username: String,
    pub key_paths: String,
    pub password: Option<String>,
    pub connection_status: String,
    pub last_connected_at: Option<String>,
    pub dokku_version: Option<String>,
    pub os_version: Option<String>,
    pub cpu_model: Option<String>,
    pub cpu_cores: Option<i32>,
    pub ram_total: Option<String>,
    pub disk_total: Option<String>,
    pub key_sync_error: Option<String>,
    pub keys_synced_at: Option<String>,
    pub created_at: String,
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_timestamp(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

impl HostRow {
    pub fn to_host(&self) -> Host {
        let key_paths: Vec<PathBuf> = serde_json::from_str(&self.key_paths).unwrap_or_default();
        Host {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            name: self.name.clone(),
            ip: self.ip.clone(),
            port: self.port as u16,
            username: self.username.clone(),
            key_paths,
            password: self.password.clone(),
            connection_status: self
                .connection_status
                .parse()
                .unwrap_or(ConnectionStatus::Unknown),
            last_connected_at: parse_optional_timestamp(&self.last_connected_at),
            dokku_version: self.dokku_version.clone(),
            os_version: self.os_version.clone(),
            cpu_model: self.cpu_model.clone(),
            cpu_cores: self.cpu_cores,
            ram_total: self.ram_total.clone(),
            disk_total: self.disk_total.clone(),
            key_sync_error: self.key_sync_error.clone(),
            keys_synced_at: parse_optional_timestamp(&self.keys_synced_at),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

/// Create a host
pub async fn create_host(pool: &SqlitePool, host: &Host) -> Result<(), sqlx::Error> {
    let key_paths = serde_json::to_string(&host.key_paths).unwrap_or_else(|_| "[]".to_string());

    sqlx::query(
        r#"
        INSERT INTO hosts (id, name, ip, port, username, key_paths, password, connection_status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(host.id.to_string())
    .bind(&host.name)
    .bind(&host.ip)
    .bind(host.port as i64)
    .bind(&host.username)
    .bind(key_paths)
    .bind(&host.password)
    .bind(host.connection_status.to_string())
    .bind(host.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a host by ID
pub async fn get_host(pool: &SqlitePool, host_id: Uuid) -> Result<Option<Host>, sqlx::Error> {
    let row = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts WHERE id = ?")
        .bind(host_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_host()))
}

/// List all hosts
pub async fn list_hosts(pool: &SqlitePool) -> Result<Vec<Host>, sqlx::Error> {
    let rows = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts ORDER BY created_at")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.to_host()).collect())
}

/// Record the outcome of a connection test, including gathered facts
pub async fn update_connection_result(
    pool: &SqlitePool,
    host_id: Uuid,
    status: ConnectionStatus,
    info: Option<&HostInfo>,
) -> Result<(), sqlx::Error> {
    let connected_at = if status == ConnectionStatus::Connected {
        Some(Utc::now().to_rfc3339())
    } else {
        None
    };

    sqlx::query(
        r#"
        UPDATE hosts
        SET connection_status = ?,
            last_connected_at = COALESCE(?, last_connected_at),
            dokku_version = COALESCE(?, dokku_version),
            os_version = COALESCE(?, os_version),
            cpu_model = COALESCE(?, cpu_model),
            cpu_cores = COALESCE(?, cpu_cores),
            ram_total = COALESCE(?, ram_total),
            disk_total = COALESCE(?, disk_total)
        WHERE id = ?
        "#,
    )
    .bind(status.to_string())
    .bind(connected_at)
    .bind(info.and_then(|i| i.dokku_version.clone()))
    .bind(info.and_then(|i| i.os_version.clone()))
    .bind(info.and_then(|i| i.cpu_model.clone()))
    .bind(info.and_then(|i| i.cpu_cores))
    .bind(info.and_then(|i| i.ram_total.clone()))
    .bind(info.and_then(|i| i.disk_total.clone()))
    .bind(host_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the outcome of an SSH key sync
pub async fn update_key_sync(
    pool: &SqlitePool,
    host_id: Uuid,
    error: Option<&str>,
) -> Result<(), sqlx::Error> {
    let synced_at = if error.is_none() {
        Some(Utc::now().to_rfc3339())
    } else {
        None
    };

    sqlx::query("UPDATE hosts SET key_sync_error = ?, keys_synced_at = COALESCE(?, keys_synced_at) WHERE id = ?")
        .bind(error)
        .bind(synced_at)
        .bind(host_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete a host and everything attached to it
pub async fn delete_host(pool: &SqlitePool, host_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM hosts WHERE id = ?")
        .bind(host_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::pool::init_database;

    #[tokio::test]
    async fn test_host_round_trip() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let mut host = Host::new("prod".into(), "203.0.113.9".into(), "root".into());
        host.key_paths = vec![PathBuf::from("/home/u/.ssh/id_ed25519")];
        create_host(&pool, &host).await.unwrap();

        let loaded = get_host(&pool, host.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "prod");
        assert_eq!(loaded.port, 22);
        assert_eq!(loaded.key_paths, host.key_paths);
        assert_eq!(loaded.connection_status, ConnectionStatus::Unknown);
    }

    #[tokio::test]
    async fn test_connection_result_updates_facts() {
        let pool = init_database("sqlite::memory:").await.unwrap();
        let host = Host::new("prod".into(), "203.0.113.9".into(), "root".into());
        create_host(&pool, &host).await.unwrap();

        let info = HostInfo {
            dokku_version: Some("0.34.6".into()),
            os_version: Some("Ubuntu 24.04".into()),
            cpu_cores: Some(4),
            ..Default::default()
        };
        update_connection_result(&pool, host.id, ConnectionStatus::Connected, Some(&info))
            .await
            .unwrap();

        let loaded = get_host(&pool, host.id).await.unwrap().unwrap();
        assert!(loaded.reachable());
        assert!(loaded.dokku_installed());
        assert!(loaded.last_connected_at.is_some());

        // A later failure keeps the gathered facts
        update_connection_result(&pool, host.id, ConnectionStatus::Failed, None)
            .await
            .unwrap();
        let loaded = get_host(&pool, host.id).await.unwrap().unwrap();
        assert!(!loaded.reachable());
        assert_eq!(loaded.dokku_version.as_deref(), Some("0.34.6"));
    }
}
