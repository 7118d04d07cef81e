//! Read-side route handlers: state pull and a root banner.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use busmatch_core::types::MatchState;

use crate::web::{store_failure, ApiError, AppState};

/// GET /: service banner.
pub async fn root() -> Json<Value> {
    Json(json!({"message": "busmatch rider/bus matching service"}))
}

/// GET /state/:user_id: current match state, empty state if none yet.
pub async fn api_state(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Json<MatchState>, ApiError> {
    let current = state
        .engine
        .state(&user_id)
        .await
        .map_err(store_failure)?;
    Ok(Json(current))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
