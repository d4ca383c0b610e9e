//! Axum routes of the health probe.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::llms::ChatLLM;

/// Shared state of the probe.
#[derive(Clone)]
pub struct HealthState {
    pub started: Instant,
    pub llm: Arc<dyn ChatLLM>,
}

impl HealthState {
    pub fn new(llm: Arc<dyn ChatLLM>) -> Self {
        Self {
            started: Instant::now(),
            llm,
        }
    }
}

/// Build the router.
pub fn app_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started.elapsed().as_secs(),
        "provider": state.llm.provider(),
        "model": state.llm.model(),
        "token_usage": state.llm.usage_summary(),
    }))
}

/// Serve the probe on `0.0.0.0:port` until the task is dropped.
pub async fn serve(port: u16, state: HealthState) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "health probe listening");
    axum::serve(listener, app_router(state)).await
}
