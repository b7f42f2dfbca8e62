//! # Real-time Grid Stream
//!
//! `GET /grids/:grid_id/ws` upgrades to a WebSocket over which the server
//! pushes a snapshot after every tick and accepts commands in the same
//! `{"action": ..., "payload": ...}` form as the HTTP command endpoint.
//!
//! Three tasks share one cancellation token: a ticker advancing the grid by
//! one step per interval, a listener applying inbound commands, and a writer
//! owning the socket sink. Whichever ends first cancels the other two.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ApiError;
use crate::controller::{AppState, GridController, GridHandle};
use crate::domain::{CommandRequest, GridCommand, GridId};

const OUTBOUND_BUFFER: usize = 32;

pub async fn grid_stream(
    State(st): State<AppState>,
    Path(grid_id): Path<GridId>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let grid = st.controller.handle(grid_id).await?;
    Ok(ws.on_upgrade(move |socket| run_stream(st, grid_id, grid, socket)))
}

async fn run_stream(st: AppState, grid_id: GridId, grid: GridHandle, socket: WebSocket) {
    let cancel = st.shutdown.child_token();
    let (mut sink, inbound) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    info!(grid_id = %grid_id, "stream opened");

    let writer = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let _guard = cancel.clone().drop_guard();
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = rx.recv() => msg,
                };
                let Some(msg) = msg else { break };
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "stream send failed");
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        }
    });

    let ticker = tokio::spawn(run_ticker(
        st.controller.clone(),
        grid.clone(),
        st.cfg.simulation.stream_interval(),
        tx.clone(),
        cancel.clone(),
    ));
    let listener = tokio::spawn(run_listener(
        st.controller.clone(),
        grid,
        inbound,
        tx,
        cancel.clone(),
    ));

    let (w, t, l) = tokio::join!(writer, ticker, listener);
    for result in [w, t, l] {
        if let Err(e) = result {
            warn!(grid_id = %grid_id, error = %e, "stream task failed");
        }
    }
    info!(grid_id = %grid_id, "stream closed");
}

async fn run_ticker(
    controller: Arc<GridController>,
    grid: GridHandle,
    period: Duration,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) {
    let _guard = cancel.clone().drop_guard();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        let frame = match controller.step(&grid).await {
            Ok(snapshot) => text_frame(&snapshot),
            Err(e) => {
                warn!(error = %e, "stream tick rejected");
                text_frame(&json!({ "error": e.to_string() }))
            }
        };
        let Some(frame) = frame else { continue };
        if tx.send(frame).await.is_err() {
            break;
        }
    }
}

async fn run_listener<S, E>(
    controller: Arc<GridController>,
    grid: GridHandle,
    mut inbound: S,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    let _guard = cancel.clone().drop_guard();

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = inbound.next() => frame,
        };
        let text = match frame {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                debug!(error = %e, "stream receive failed");
                break;
            }
        };

        let reply = handle_command_frame(&controller, &grid, &text).await;
        let Some(reply) = text_frame(&reply) else { continue };
        if tx.send(reply).await.is_err() {
            break;
        }
    }
}

/// Apply one inbound text frame and build its acknowledgement
pub async fn handle_command_frame(
    controller: &GridController,
    grid: &GridHandle,
    text: &str,
) -> Value {
    let request: CommandRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => return json!({ "error": format!("Invalid command: {e}") }),
    };
    let action = request.action.clone();

    let applied = match GridCommand::try_from(request) {
        Ok(command) => controller.apply(grid, command).await.map(|_| ()),
        Err(e) => Err(e),
    };
    match applied {
        Ok(()) => json!({ "status": "ok", "action": action }),
        Err(e) => {
            debug!(action = %action, error = %e, "stream command rejected");
            json!({ "error": e.to_string() })
        }
    }
}

fn text_frame<T: Serialize>(value: &T) -> Option<Message> {
    match serde_json::to_string(value) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            warn!(error = %e, "failed to encode stream frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::NodeKind;
    use crate::repo::InMemoryGridRepository;

    async fn setup() -> (GridController, GridHandle) {
        let ctl = GridController::new(&Config::default(), Arc::new(InMemoryGridRepository::new()));
        let id = ctl.create_grid(Some(5), Vec::new()).await.id;
        let grid = ctl.handle(id).await.unwrap();
        (ctl, grid)
    }

    #[tokio::test]
    async fn test_ack_on_valid_command() {
        let (ctl, grid) = setup().await;
        let reply = handle_command_frame(
            &ctl,
            &grid,
            r#"{"action": "add_node", "payload": {"type": "pole", "position": {"x": 1, "y": 2}}}"#,
        )
        .await;
        assert_eq!(reply, json!({ "status": "ok", "action": "add_node" }));
        let session = grid.lock().await;
        assert_eq!(session.network.nodes_of_kind(NodeKind::Pole).count(), 6);
    }

    #[tokio::test]
    async fn test_error_on_unknown_action() {
        let (ctl, grid) = setup().await;
        let reply = handle_command_frame(&ctl, &grid, r#"{"action": "explode"}"#).await;
        assert_eq!(reply["error"], "Unknown action: explode");
    }

    #[tokio::test]
    async fn test_error_on_malformed_frame() {
        let (ctl, grid) = setup().await;
        let reply = handle_command_frame(&ctl, &grid, "not json").await;
        assert!(reply["error"].as_str().unwrap().starts_with("Invalid command"));
    }

    #[tokio::test]
    async fn test_clear_faults_ack() {
        let (ctl, grid) = setup().await;
        let reply = handle_command_frame(&ctl, &grid, r#"{"action": "clear_faults"}"#).await;
        assert_eq!(reply["status"], "ok");
    }

    fn decode(msg: Message) -> Value {
        match msg {
            Message::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ticker_pushes_one_step_per_frame() {
        let (ctl, grid) = setup().await;
        let ctl = Arc::new(ctl);
        let dt = ctl.simulator().params().dt;
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let cancel = CancellationToken::new();
        let ticker = tokio::spawn(run_ticker(
            ctl.clone(),
            grid.clone(),
            Duration::from_millis(5),
            tx,
            cancel.clone(),
        ));

        for n in 1..=3u64 {
            let frame = decode(rx.recv().await.unwrap());
            assert_eq!(frame["meta"]["sim_time"].as_f64().unwrap(), n as f64 * dt);
            assert_eq!(frame["meta"]["ticks"], n);
        }

        cancel.cancel();
        drop(rx);
        tokio::time::timeout(Duration::from_secs(1), ticker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_ticker_stops_and_cancels_when_receiver_drops() {
        let (ctl, grid) = setup().await;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let cancel = CancellationToken::new();

        tokio::time::timeout(
            Duration::from_secs(1),
            run_ticker(Arc::new(ctl), grid, Duration::from_millis(5), tx, cancel.clone()),
        )
        .await
        .unwrap();
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_listener_end_cancels_ticker() {
        let (ctl, grid) = setup().await;
        let ctl = Arc::new(ctl);
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let cancel = CancellationToken::new();

        let ticker = tokio::spawn(run_ticker(
            ctl.clone(),
            grid.clone(),
            Duration::from_secs(3600),
            tx.clone(),
            cancel.clone(),
        ));
        let inbound = futures::stream::iter(vec![
            Ok::<_, axum::Error>(Message::Text(r#"{"action": "clear_faults"}"#.to_string())),
            Ok(Message::Text("not json".to_string())),
        ]);
        run_listener(ctl, grid, inbound, tx, cancel.clone()).await;

        assert!(cancel.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), ticker)
            .await
            .unwrap()
            .unwrap();

        let mut frames = Vec::new();
        while let Some(msg) = rx.recv().await {
            frames.push(decode(msg));
        }
        assert!(frames.contains(&json!({ "status": "ok", "action": "clear_faults" })));
        assert!(frames.iter().any(|f| f["error"]
            .as_str()
            .is_some_and(|e| e.starts_with("Invalid command"))));
    }
}
