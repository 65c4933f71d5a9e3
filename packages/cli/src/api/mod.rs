use axum::{
    routing::{get, post},
    Router,
};
use hostbox_sandbox::Orchestrator;
use serde::Serialize;
use std::sync::Arc;

pub mod health;
pub mod sandboxes;

pub type AppState = Arc<Orchestrator>;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/sandboxes",
            get(sandboxes::list_sandboxes).post(sandboxes::provision_sandbox),
        )
        .route(
            "/api/sandboxes/{id}",
            get(sandboxes::get_sandbox).delete(sandboxes::remove_sandbox),
        )
        .route("/api/sandboxes/{id}/status", get(sandboxes::sandbox_status))
        .route("/api/sandboxes/{id}/start", post(sandboxes::start_sandbox))
        .route("/api/sandboxes/{id}/stop", post(sandboxes::stop_sandbox))
        .route("/api/sandboxes/{id}/restart", post(sandboxes::restart_sandbox))
        .route("/api/sandboxes/{id}/ensure", post(sandboxes::ensure_running))
        .route("/api/sandboxes/{id}/activity", post(sandboxes::record_activity))
        .route("/api/activity", post(sandboxes::record_host_activity))
        .route("/api/proxy/reload", post(sandboxes::reload_proxy))
        .route("/api/reaper/sweep", post(sandboxes::sweep_idle))
        .with_state(state)
}
