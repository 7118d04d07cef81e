//! Live state push over WebSocket.
//!
//! `GET /ws/track?user_id=U1` upgrades and then sends the rider's current
//! match state as a JSON text frame on every tick of the stream interval.
//! A subscription without `user_id` is closed with code 1008 before any
//! state is sent. The loop ends when the client goes away or a send fails;
//! dropping the socket releases everything the subscription held.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::engine::MatchEngine;
use crate::web::AppState;

#[derive(Deserialize)]
pub struct TrackParams {
    user_id: Option<String>,
}

/// GET /ws/track: subscribe to a rider's state.
pub async fn ws_track(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrackParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = params.user_id.filter(|u| !u.is_empty());
    let engine = Arc::clone(&state.engine);
    let interval = state.stream_interval;

    ws.on_upgrade(move |socket| async move {
        match user_id {
            Some(user_id) => push_states(socket, engine, user_id, interval).await,
            None => reject(socket).await,
        }
    })
}

async fn reject(mut socket: WebSocket) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: "user_id is required".into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}

async fn push_states(
    mut socket: WebSocket,
    engine: Arc<MatchEngine>,
    user_id: String,
    period: Duration,
) {
    debug!(%user_id, "stream opened");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let state = match engine.state(&user_id).await {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(%user_id, error = %e, "stream state read failed");
                        break;
                    }
                };
                let text = match serde_json::to_string(&state) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!(%user_id, error = %e, "stream serialize failed");
                        break;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                // Client closed or transport error
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                // Pings are answered by axum; other client frames are ignored
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(%user_id, "stream closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
