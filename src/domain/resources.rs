//! Per-deployment remote resources reconciled by the synchronizers:
//! custom domains with SSL, environment variables, and provisioned
//! databases.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A custom domain attached to a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainConfig {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub domain_name: String,
    pub default_domain: bool,
    pub ssl_enabled: bool,
    pub configured: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DomainConfig {
    pub fn new(deployment_id: Uuid, domain_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            deployment_id,
            domain_name,
            default_domain: false,
            ssl_enabled: false,
            configured: false,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn full_url(&self) -> String {
        if self.ssl_enabled {
            format!("https://{}", self.domain_name)
        } else {
            format!("http://{}", self.domain_name)
        }
    }
}

/// One environment variable for a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvVar {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub key: String,
    pub value: String,
}

/// Supported managed database engines. Each variant carries its Dokku
/// plugin URL, command namespace, and the environment variable the
/// connection URL lands in - dispatched exhaustively instead of
/// building commands from free-form type strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseKind {
    Postgres,
    Mysql,
    Mariadb,
    Mongo,
}

impl DatabaseKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "PostgreSQL",
            DatabaseKind::Mysql => "MySQL",
            DatabaseKind::Mariadb => "MariaDB",
            DatabaseKind::Mongo => "MongoDB",
        }
    }

    /// Dokku command namespace, e.g. `postgres` in `dokku postgres:create`
    pub fn command_namespace(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "postgres",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Mariadb => "mariadb",
            DatabaseKind::Mongo => "mongo",
        }
    }

    pub fn plugin_url(&self) -> &'static str {
        match self {
            DatabaseKind::Postgres => "https://github.com/dokku/dokku-postgres.git",
            DatabaseKind::Mysql => "https://github.com/dokku/dokku-mysql.git",
            DatabaseKind::Mariadb => "https://github.com/dokku/dokku-mariadb.git",
            DatabaseKind::Mongo => "https://github.com/dokku/dokku-mongo.git",
        }
    }

    /// Environment variable the app reads the connection URL from
    pub fn env_var_name(&self) -> &'static str {
        match self {
            DatabaseKind::Mongo => "MONGO_URL",
            _ => "DATABASE_URL",
        }
    }
}

impl std::fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command_namespace())
    }
}

impl std::str::FromStr for DatabaseKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postgres" => Ok(DatabaseKind::Postgres),
            "mysql" => Ok(DatabaseKind::Mysql),
            "mariadb" => Ok(DatabaseKind::Mariadb),
            "mongo" => Ok(DatabaseKind::Mongo),
            _ => Err(format!("Unsupported database type: {}", s)),
        }
    }
}

/// Redis companion instance settings, fixed rather than per-kind
pub const REDIS_PLUGIN_URL: &str = "https://github.com/dokku/dokku-redis.git";
pub const REDIS_ENV_VAR: &str = "REDIS_URL";

/// Database provisioning state for a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseProvisioning {
    pub id: Uuid,
    pub deployment_id: Uuid,
    pub kind: DatabaseKind,
    pub database_name: String,
    pub redis_enabled: bool,
    pub redis_name: Option<String>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub configured: bool,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DatabaseProvisioning {
    pub fn new(deployment_id: Uuid, kind: DatabaseKind, database_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            deployment_id,
            kind,
            database_name,
            redis_enabled: false,
            redis_name: None,
            database_url: None,
            redis_url: None,
            configured: false,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_redis(mut self) -> Self {
        self.redis_enabled = true;
        self.redis_name = Some(format!("{}-redis", self.database_name));
        self
    }
}
