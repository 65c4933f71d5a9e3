// ABOUTME: HTTP handlers exposing provisioning and lifecycle operations
// ABOUTME: Thin adapter: every handler forwards to the orchestrator and wraps the result

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use hostbox_sandbox::{
    LifecycleOutcome, ProjectRef, Sandbox, SandboxHandle, SandboxStatus, SweepReport, TemplateKind,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{ApiResponse, AppState};
use crate::error::{ApiResult, AppError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub name: String,
    pub owner: String,
    #[serde(alias = "repositoryUrl")]
    pub source_location: String,
    #[serde(default = "default_template")]
    pub template: String,
}

fn default_template() -> String {
    TemplateKind::Static.as_str().to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct ActivityRequest {
    pub at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct HostActivityRequest {
    pub hostname: String,
    pub at: Option<DateTime<Utc>>,
}

/// What the project store keeps for a freshly provisioned sandbox
#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    #[serde(flatten)]
    pub handle: SandboxHandle,
    pub proxy_reloaded: bool,
    pub reload_error: Option<String>,
}

impl From<LifecycleOutcome> for ProvisionResponse {
    fn from(outcome: LifecycleOutcome) -> Self {
        Self {
            handle: outcome.handle(),
            proxy_reloaded: outcome.proxy_reloaded(),
            reload_error: outcome.reload_error,
        }
    }
}

/// A lifecycle change plus whether the proxy picked up the new route
#[derive(Debug, Serialize)]
pub struct LifecycleResponse {
    pub sandbox: Sandbox,
    pub proxy_reloaded: bool,
    pub reload_error: Option<String>,
}

impl From<LifecycleOutcome> for LifecycleResponse {
    fn from(outcome: LifecycleOutcome) -> Self {
        Self {
            proxy_reloaded: outcome.proxy_reloaded(),
            sandbox: outcome.sandbox,
            reload_error: outcome.reload_error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EnsureResponse {
    pub restarted: bool,
    pub sandbox: Sandbox,
}

#[derive(Debug, Serialize)]
pub struct ActivityResponse {
    pub last_activity_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RemoveResponse {
    pub removed: String,
}

pub async fn provision_sandbox(
    State(orchestrator): State<AppState>,
    Json(request): Json<ProvisionRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ProvisionResponse>>)> {
    if request.source_location.trim().is_empty() {
        return Err(AppError::validation("sourceLocation is required"));
    }
    let template: TemplateKind = request.template.parse()?;

    let project = ProjectRef {
        logical_name: request.name,
        owner_key: request.owner,
        source_location: request.source_location,
        template,
    };
    let outcome = orchestrator.provision(&project).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(outcome.into()))))
}

pub async fn list_sandboxes(State(orchestrator): State<AppState>) -> Json<ApiResponse<Vec<Sandbox>>> {
    Json(ApiResponse::success(orchestrator.list().await))
}

pub async fn get_sandbox(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Sandbox>>> {
    Ok(Json(ApiResponse::success(orchestrator.get(&id).await?)))
}

pub async fn sandbox_status(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<SandboxStatus>>> {
    Ok(Json(ApiResponse::success(orchestrator.status(&id).await?)))
}

pub async fn start_sandbox(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<LifecycleResponse>>> {
    let outcome = orchestrator.start(&id).await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

pub async fn stop_sandbox(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<LifecycleResponse>>> {
    let outcome = orchestrator.stop(&id).await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

pub async fn restart_sandbox(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<LifecycleResponse>>> {
    let outcome = orchestrator.restart(&id).await?;
    Ok(Json(ApiResponse::success(outcome.into())))
}

pub async fn ensure_running(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<EnsureResponse>>> {
    let restarted = orchestrator.ensure_running(&id).await?;
    let sandbox = orchestrator.get(&id).await?;
    Ok(Json(ApiResponse::success(EnsureResponse { restarted, sandbox })))
}

pub async fn remove_sandbox(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<RemoveResponse>>> {
    orchestrator.remove(&id).await?;
    Ok(Json(ApiResponse::success(RemoveResponse { removed: id })))
}

pub async fn record_activity(
    State(orchestrator): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ActivityRequest>>,
) -> ApiResult<Json<ApiResponse<ActivityResponse>>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let last_activity_at = match request.at {
        Some(at) => orchestrator.record_activity_at(&id, at).await?,
        None => orchestrator.record_activity(&id).await?,
    };
    Ok(Json(ApiResponse::success(ActivityResponse { last_activity_at })))
}

/// Activity reported by the proxy side, keyed by hostname
pub async fn record_host_activity(
    State(orchestrator): State<AppState>,
    Json(request): Json<HostActivityRequest>,
) -> ApiResult<Json<ApiResponse<Sandbox>>> {
    if request.hostname.trim().is_empty() {
        return Err(AppError::validation("hostname is required"));
    }
    let sandbox = orchestrator
        .record_activity_for_host(&request.hostname, request.at)
        .await?;
    Ok(Json(ApiResponse::success(sandbox)))
}

pub async fn reload_proxy(State(orchestrator): State<AppState>) -> ApiResult<Json<ApiResponse<bool>>> {
    orchestrator.reload_proxy().await?;
    info!("Proxy reloaded on request");
    Ok(Json(ApiResponse::success(true)))
}

/// Run a reaper sweep now. `data` is null when a sweep was already running.
pub async fn sweep_idle(State(orchestrator): State<AppState>) -> Json<ApiResponse<Option<SweepReport>>> {
    Json(ApiResponse::success(orchestrator.sweep_idle().await))
}
