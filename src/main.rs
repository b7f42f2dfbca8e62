use anyhow::Result;
use power_grid_twin::{api, config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = Config::load()?;
    let app_state = controller::AppState::new(cfg.clone());
    let app = api::router(app_state.clone());

    let addr = cfg.server.socket_addr()?;
    if cfg.server.host == "0.0.0.0" {
        warn!("binding to 0.0.0.0, grid API is reachable from the network");
    }

    info!(
        %addr,
        dt_seconds = cfg.simulation.dt_seconds,
        stream_interval_ms = cfg.simulation.stream_interval_ms,
        "starting power grid twin"
    );

    let shutdown = app_state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            telemetry::shutdown_signal().await;
            shutdown.cancel();
        })
        .await?;

    warn!("shutdown complete");
    Ok(())
}
