use axum::{
    routing::{get, post},
    Router,
};

use super::{grids, health, stream};
use crate::controller::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/grids", get(grids::list_grids).post(grids::create_grid))
        .route(
            "/grids/:grid_id",
            get(grids::get_grid).delete(grids::delete_grid),
        )
        .route("/grids/:grid_id/simulate", post(grids::simulate_grid))
        .route("/grids/:grid_id/command", post(grids::command_grid))
        .route("/grids/:grid_id/ws", get(stream::grid_stream))
        .route("/healthz", get(health::healthz))
        .with_state(state)
}
