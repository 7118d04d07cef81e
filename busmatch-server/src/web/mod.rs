//! Web server: axum REST ingestion, state pull, and WebSocket push.
//!
//! Shared state is the match engine (which owns the store handle) plus the
//! push-stream cadence.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::Json;
use axum::Router;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::engine::MatchEngine;
use crate::store::StoreError;

pub mod ingest;
pub mod routes;
pub mod stream;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub engine: Arc<MatchEngine>,
    pub stream_interval: Duration,
}

/// Error response for handlers: status plus `{"error": ...}` body.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn store_failure(e: StoreError) -> ApiError {
    warn!(error = %e, "store failure");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": e.to_string()})),
    )
}

pub(crate) fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", axum::routing::get(routes::root))
        .route(
            "/ingest/user-location",
            axum::routing::post(ingest::api_ingest_user),
        )
        .route(
            "/ingest/bus-location",
            axum::routing::post(ingest::api_ingest_bus),
        )
        .route("/state/:user_id", axum::routing::get(routes::api_state))
        .route("/ws/track", axum::routing::get(stream::ws_track))
        .with_state(state)
        .layer(cors)
}

/// Start the web server. Runs until the listener fails or ctrl-c.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("busmatch server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
}
