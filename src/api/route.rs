use crate::{
    api::{
        error::ApiError,
        response::{with_status, ApiResponse},
    },
    db::block,
    health::LoopHealth,
    state::AppState,
};
use axum::{extract::State, http::StatusCode, response::Response, routing::get, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

#[derive(Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub loops: BTreeMap<String, LoopHealth>,
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

// GET /health: 200 only while every loop is running
async fn health(State(state): State<Arc<AppState>>) -> Response {
    let healthy = state.health.is_healthy().await;
    let loops = state.health.snapshot().await;
    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    with_status(code, HealthReport { healthy, loops })
}

// GET /status
async fn status(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<block::PipelineStats>, ApiError> {
    let stats = block::pipeline_stats(&state.db).await?;
    Ok(ApiResponse::new(stats))
}
