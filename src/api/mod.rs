//! REST API routes for Vantage

mod handlers;
mod ws;

pub use handlers::*;
pub use ws::*;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::deploy::{DeployPipeline, PipelineError};
use crate::events::Notifier;
use crate::health::HealthProber;
use crate::hosts::{HostOps, HostOpsError};
use crate::sync::{
    DatabaseSynchronizer, DomainSynchronizer, EnvVarSynchronizer, SshKeySynchronizer, SyncError,
};

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            meta: ResponseMeta {
                timestamp: Utc::now(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: DateTime<Utc>,
}

/// API error response
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    RemoteFailed(String),
    DatabaseError(String),
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, ApiError::new("NOT_FOUND", &msg)),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, ApiError::new("BAD_REQUEST", &msg))
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::new("CONFLICT", &msg)),
            AppError::RemoteFailed(msg) => (
                StatusCode::BAD_GATEWAY,
                ApiError::new("REMOTE_FAILED", &msg),
            ),
            AppError::DatabaseError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("DATABASE_ERROR", &msg),
            ),
            AppError::InternalError(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::new("INTERNAL_ERROR", &msg),
            ),
        };

        (status, Json(error)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Resource not found".to_string()),
            _ => AppError::DatabaseError(err.to_string()),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(_) | PipelineError::HostNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            PipelineError::AttemptInProgress(_) => AppError::Conflict(err.to_string()),
            PipelineError::UnsupportedMethod => AppError::BadRequest(err.to_string()),
            PipelineError::Ssh(e) => AppError::RemoteFailed(e.to_string()),
            PipelineError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::DeploymentNotFound(_) | SyncError::HostNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            SyncError::Remote(msg) => AppError::RemoteFailed(msg),
            SyncError::Ssh(e) => AppError::RemoteFailed(e.to_string()),
            SyncError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

impl From<HostOpsError> for AppError {
    fn from(err: HostOpsError) -> Self {
        match err {
            HostOpsError::NotFound(_) | HostOpsError::DeploymentNotFound(_) => {
                AppError::NotFound(err.to_string())
            }
            HostOpsError::InstallFailed(msg) => AppError::RemoteFailed(msg),
            HostOpsError::Ssh(e) => AppError::RemoteFailed(e.to_string()),
            HostOpsError::Database(e) => AppError::DatabaseError(e.to_string()),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub notifier: Notifier,
    pub pipeline: Arc<DeployPipeline>,
    pub host_ops: Arc<HostOps>,
    pub prober: Arc<HealthProber>,
    pub domains: Arc<DomainSynchronizer>,
    pub env_vars: Arc<EnvVarSynchronizer>,
    pub databases: Arc<DatabaseSynchronizer>,
    pub ssh_keys: Arc<SshKeySynchronizer>,
    pub config: Arc<Config>,
}

/// Build the API router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(service_health))
        .route("/api/hosts", get(list_hosts).post(create_host))
        .route("/api/hosts/:id", get(get_host).delete(delete_host))
        .route("/api/hosts/:id/test-connection", post(test_connection))
        .route("/api/hosts/:id/install-dokku", post(install_dokku))
        .route("/api/hosts/:id/sync-keys", post(sync_keys))
        .route("/api/deployments", get(list_deployments).post(create_deployment))
        .route(
            "/api/deployments/:id",
            get(get_deployment).delete(delete_deployment),
        )
        .route("/api/deployments/:id/deploy", post(trigger_deploy))
        .route("/api/deployments/:id/attempts", get(list_attempts))
        .route("/api/deployments/:id/attempts/latest", get(latest_attempt))
        .route("/api/deployments/:id/status", get(deployment_status))
        .route("/api/deployments/:id/health-checks", get(list_health_checks))
        .route("/api/deployments/:id/env", put(put_env_vars))
        .route("/api/deployments/:id/domains", put(put_domains))
        .route("/api/domains/:id/sync", post(sync_domain))
        .route("/api/domains/:id", delete(remove_domain))
        .route(
            "/api/deployments/:id/database",
            post(provision_database).delete(deprovision_database),
        )
        .route("/api/deployments/:id/command", post(run_deployment_command))
        .route("/api/deployments/:id/logs/start", post(start_log_stream))
        .route("/api/deployments/:id/logs/stop", post(stop_log_stream))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

async fn service_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
