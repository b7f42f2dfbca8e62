//! Grid lifecycle, simulation and command endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use validator::Validate;

use super::error::ApiError;
use crate::controller::AppState;
use crate::domain::{CommandOutcome, CommandRequest, GridCommand, GridId, GridSnapshot};

#[derive(Debug, Default, Deserialize, Validate)]
pub struct CreateGridRequest {
    pub seed: Option<u64>,
    #[validate(length(max = 32))]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SimulateRequest {
    /// Simulation time in seconds
    #[validate(range(min = 0.0))]
    pub time: f64,
}

#[derive(Debug, Serialize)]
pub struct GridList {
    pub grids: Vec<GridId>,
}

/// Snapshot after a command, plus what the command did
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub outcome: CommandOutcome,
    #[serde(flatten)]
    pub snapshot: GridSnapshot,
}

/// POST /grids - build a demo feeder; the body is optional
pub async fn create_grid(
    State(st): State<AppState>,
    body: Option<Json<CreateGridRequest>>,
) -> Result<(StatusCode, Json<GridSnapshot>), ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    req.validate()?;

    let snapshot = st
        .controller
        .create_grid(req.seed, req.tags.unwrap_or_default())
        .await;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

pub async fn list_grids(State(st): State<AppState>) -> Json<GridList> {
    Json(GridList {
        grids: st.controller.list_grids().await,
    })
}

pub async fn get_grid(
    State(st): State<AppState>,
    Path(grid_id): Path<GridId>,
) -> Result<Json<GridSnapshot>, ApiError> {
    Ok(Json(st.controller.snapshot(grid_id).await?))
}

pub async fn delete_grid(
    State(st): State<AppState>,
    Path(grid_id): Path<GridId>,
) -> Result<StatusCode, ApiError> {
    st.controller.delete_grid(grid_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn simulate_grid(
    State(st): State<AppState>,
    Path(grid_id): Path<GridId>,
    Json(req): Json<SimulateRequest>,
) -> Result<Json<GridSnapshot>, ApiError> {
    req.validate()?;
    Ok(Json(st.controller.simulate(grid_id, req.time).await?))
}

pub async fn command_grid(
    State(st): State<AppState>,
    Path(grid_id): Path<GridId>,
    Json(req): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let command = GridCommand::try_from(req)?;
    let action = command.action();
    let (outcome, snapshot) = st.controller.command(grid_id, command).await?;
    info!(grid_id = %grid_id, action, "command accepted");
    Ok(Json(CommandResponse { outcome, snapshot }))
}
