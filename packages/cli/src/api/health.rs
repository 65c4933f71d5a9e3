use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::AppState;

pub async fn health_check(State(orchestrator): State<AppState>) -> Json<Value> {
    let runtime_available = orchestrator.runtime_available().await;
    let sandboxes = orchestrator.list().await;
    let running = sandboxes.iter().filter(|s| s.is_running()).count();
    let status = if runtime_available { "healthy" } else { "degraded" };

    Json(json!({
        "status": status,
        "timestamp": chrono::Utc::now().timestamp(),
        "version": env!("CARGO_PKG_VERSION"),
        "service": "hostbox",
        "runtime": runtime_available,
        "sandboxes": {
            "total": sandboxes.len(),
            "running": running,
        },
        "ports_in_use": orchestrator.ports().in_use().await,
    }))
}
