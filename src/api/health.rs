use axum::{extract::State, Json};
use serde::Serialize;

use crate::controller::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    timestamp: chrono::DateTime<chrono::Utc>,
    grids: usize,
}

/// GET /healthz - liveness plus the number of live grids
pub async fn healthz(State(st): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now(),
        grids: st.controller.list_grids().await.len(),
    })
}
