//! Request handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use std::path::PathBuf;
use uuid::Uuid;

use crate::db;
use crate::sync::DomainRequest;
use crate::domain::{
    normalize_app_name, DatabaseKind, DatabaseProvisioning, Deployment, DeploymentMethod, EnvVar,
    Host,
};

use super::{ApiResponse, AppError, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHostRequest {
    pub name: String,
    pub ip: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub key_paths: Vec<PathBuf>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_username() -> String {
    "root".to_string()
}

pub async fn create_host(
    State(state): State<AppState>,
    Json(req): Json<CreateHostRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.name.trim().is_empty() || req.ip.trim().is_empty() {
        return Err(AppError::BadRequest("name and ip are required".into()));
    }

    let mut host = Host::new(req.name, req.ip, req.username);
    if let Some(port) = req.port {
        host.port = port;
    }
    host.key_paths = req.key_paths;
    host.password = req.password;

    db::create_host(&state.pool, &host).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(host))))
}

pub async fn list_hosts(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let hosts = db::list_hosts(&state.pool).await?;
    Ok(Json(ApiResponse::new(hosts)))
}

pub async fn get_host(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let host = db::get_host(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Host not found: {}", id)))?;
    Ok(Json(ApiResponse::new(host)))
}

pub async fn delete_host(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    db::delete_host(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let status = state.host_ops.test_connection(id).await?;
    let host = db::get_host(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Host not found: {}", id)))?;
    Ok(Json(ApiResponse::new(serde_json::json!({
        "connectionStatus": status,
        "host": host,
    }))))
}

pub async fn install_dokku(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let version = state.host_ops.install_dokku(id).await?;
    Ok(Json(ApiResponse::new(serde_json::json!({
        "dokkuVersion": version,
    }))))
}

pub async fn sync_keys(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let added = state.ssh_keys.sync(id).await?;
    Ok(Json(ApiResponse::new(serde_json::json!({
        "keysAdded": added,
    }))))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub host_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub app_name: Option<String>,
    pub repository_url: String,
    #[serde(default)]
    pub repository_branch: Option<String>,
    #[serde(default)]
    pub method: Option<DeploymentMethod>,
}

pub async fn create_deployment(
    State(state): State<AppState>,
    Json(req): Json<CreateDeploymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.name.trim().is_empty() || req.repository_url.trim().is_empty() {
        return Err(AppError::BadRequest(
            "name and repositoryUrl are required".into(),
        ));
    }

    let app_name = req.app_name.unwrap_or_else(|| req.name.clone());
    if normalize_app_name(&app_name).is_empty() {
        return Err(AppError::BadRequest(format!(
            "'{}' does not reduce to a valid app name",
            app_name
        )));
    }

    let mut deployment = Deployment::new(req.host_id, req.name, app_name, req.repository_url);
    if let Some(branch) = req.repository_branch {
        deployment.repository_branch = branch;
    }
    if let Some(method) = req.method {
        deployment.method = method;
    }

    db::create_deployment(&state.pool, &deployment).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::new(deployment))))
}

pub async fn list_deployments(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let deployments = db::list_deployments(&state.pool).await?;
    Ok(Json(ApiResponse::new(deployments)))
}

pub async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let deployment = db::get_deployment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Deployment not found: {}", id)))?;
    Ok(Json(ApiResponse::new(deployment)))
}

pub async fn delete_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    db::delete_deployment(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Kick off a deployment attempt. The lease is taken before the work
/// is handed to a background task, so a duplicate trigger while an
/// attempt is running answers 409 instead of 202. Progress arrives
/// over the notifier topics and the attempt log.
pub async fn trigger_deploy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let deployment = db::get_deployment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Deployment not found: {}", id)))?;

    let lease = state.pipeline.acquire_lease(id)?;
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.run_locked(id, lease).await {
            tracing::warn!(deployment = %id, "deployment attempt failed to run: {}", e);
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(ApiResponse::new(serde_json::json!({
            "deploymentId": deployment.id,
            "status": "accepted",
        }))),
    ))
}

pub async fn list_attempts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let attempts = db::list_attempts(&state.pool, id).await?;
    Ok(Json(ApiResponse::new(attempts)))
}

pub async fn latest_attempt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let attempt = db::latest_attempt(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No attempts for deployment {}", id)))?;
    Ok(Json(ApiResponse::new(attempt)))
}

/// Status payload: deployment state, latest health check, and uptime
/// over the retained window
pub async fn deployment_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let deployment = db::get_deployment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Deployment not found: {}", id)))?;
    let latest_check = db::latest_check(&state.pool, id).await?;
    let uptime = state.prober.uptime_percentage(id).await?;

    Ok(Json(ApiResponse::new(serde_json::json!({
        "deployment": deployment,
        "latestCheck": latest_check,
        "uptimePercentage": uptime,
    }))))
}

pub async fn list_health_checks(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let checks = db::list_checks(&state.pool, id).await?;
    Ok(Json(ApiResponse::new(checks)))
}

#[derive(Debug, Deserialize)]
pub struct PutEnvVarsRequest {
    pub vars: std::collections::BTreeMap<String, String>,
}

/// Store the variable set and push it to the app
pub async fn put_env_vars(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PutEnvVarsRequest>,
) -> Result<impl IntoResponse, AppError> {
    for (key, value) in &req.vars {
        if key.trim().is_empty() {
            return Err(AppError::BadRequest("variable keys must be non-empty".into()));
        }
        let var = EnvVar {
            id: Uuid::new_v4(),
            deployment_id: id,
            key: key.clone(),
            value: value.clone(),
        };
        db::set_env_var(&state.pool, &var).await?;
    }

    state.env_vars.sync(id).await?;
    let vars = db::list_env_vars(&state.pool, id).await?;
    Ok(Json(ApiResponse::new(vars)))
}

#[derive(Debug, Deserialize)]
pub struct PutDomainsRequest {
    pub domains: Vec<DomainEntry>,
}

#[derive(Debug, Deserialize)]
pub struct DomainEntry {
    pub name: String,
    #[serde(default)]
    pub ssl: bool,
}

/// Replace the deployment's domain set, all-or-nothing
pub async fn put_domains(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<PutDomainsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let requests: Vec<DomainRequest> = req
        .domains
        .into_iter()
        .map(|d| DomainRequest {
            name: d.name,
            ssl: d.ssl,
        })
        .collect();
    let domains = state.domains.replace_domains(id, &requests).await?;
    Ok(Json(ApiResponse::new(domains)))
}

/// Re-run configuration for one stored domain
pub async fn sync_domain(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let domain = state.domains.sync_domain(id).await?;
    Ok(Json(ApiResponse::new(domain)))
}

pub async fn remove_domain(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.domains.remove_domain(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionDatabaseRequest {
    pub kind: DatabaseKind,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub with_redis: bool,
}

pub async fn provision_database(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ProvisionDatabaseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let deployment = db::get_deployment(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Deployment not found: {}", id)))?;

    if db::get_database(&state.pool, id).await?.is_none() {
        let name = req
            .database_name
            .unwrap_or_else(|| format!("{}-db", deployment.app_name));
        let mut provisioning = DatabaseProvisioning::new(id, req.kind, name);
        if req.with_redis {
            provisioning = provisioning.with_redis();
        }
        db::create_database(&state.pool, &provisioning).await?;
    }

    let provisioned = state.databases.provision(id).await?;
    Ok(Json(ApiResponse::new(provisioned)))
}

pub async fn deprovision_database(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    state.databases.deprovision(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RunCommandRequest {
    pub command: String,
}

/// Run one Dokku subcommand against the deployment's app. Output is
/// returned here and broadcast on the deployment topic as it would be
/// during a deploy.
pub async fn run_deployment_command(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RunCommandRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.command.trim().is_empty() {
        return Err(AppError::BadRequest("command is required".into()));
    }

    let output = state.host_ops.run_command(id, &req.command).await?;
    Ok(Json(ApiResponse::new(serde_json::json!({
        "exitCode": output.exit_code,
        "output": output.output,
    }))))
}

pub async fn start_log_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let started = state.host_ops.start_log_stream(id).await?;
    Ok(Json(ApiResponse::new(serde_json::json!({
        "streaming": true,
        "started": started,
    }))))
}

pub async fn stop_log_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let stopped = state.host_ops.stop_log_stream(id);
    Ok(Json(ApiResponse::new(serde_json::json!({
        "streaming": false,
        "stopped": stopped,
    }))))
}
