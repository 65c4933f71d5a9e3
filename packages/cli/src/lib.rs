// ABOUTME: Hostbox daemon library: HTTP surface over the hosting orchestrator
// ABOUTME: Router assembly and server loop shared by the binary and integration tests

use axum::Router;
use hostbox_sandbox::Orchestrator;
use std::future::Future;
use std::sync::Arc;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub mod api;
pub mod config;
pub mod error;

use config::Config;

/// Full application router with tracing and panic isolation applied
pub fn build_app(orchestrator: Arc<Orchestrator>) -> Router {
    api::create_router(orchestrator)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

pub async fn run_server<F>(
    config: &Config,
    orchestrator: Arc<Orchestrator>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_app(orchestrator);
    let addr = config.addr();

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Hostbox API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Hostbox API stopped");
    Ok(())
}
