//! Location ingestion API: devices POST rider and bus fixes here.
//!
//! A rider fix is stored and immediately triggers a match computation; a bus
//! fix is only stored. Coordinates are taken as given.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use busmatch_core::types::LocationRecord;

use crate::web::{now, store_failure, ApiError, AppState};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct UserLocation {
    user_id: String,
    lat: f64,
    lon: f64,
    speed: Option<f64>,
    heading: Option<f64>,
    ts: Option<f64>,
}

#[derive(Deserialize)]
pub struct BusLocation {
    bus_id: String,
    route_id: Option<String>,
    lat: f64,
    lon: f64,
    speed: Option<f64>,
    heading: Option<f64>,
    ts: Option<f64>,
}

impl UserLocation {
    fn into_record(self, received_at: f64) -> LocationRecord {
        LocationRecord::new(self.user_id, self.lat, self.lon, self.ts.unwrap_or(received_at))
            .with_motion(self.speed.unwrap_or(0.0), self.heading.unwrap_or(0.0))
    }
}

impl BusLocation {
    fn into_record(self, received_at: f64) -> LocationRecord {
        LocationRecord::new(self.bus_id, self.lat, self.lon, self.ts.unwrap_or(received_at))
            .with_motion(self.speed.unwrap_or(0.0), self.heading.unwrap_or(0.0))
            .with_route(self.route_id.filter(|r| !r.is_empty()))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /ingest/user-location: store a rider fix and recompute their match.
pub async fn api_ingest_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<UserLocation>,
) -> Result<Json<Value>, ApiError> {
    let received_at = now();
    let record = body.into_record(received_at);

    let match_state = state
        .engine
        .ingest_user(record, received_at)
        .await
        .map_err(store_failure)?;

    Ok(Json(json!({"ok": true, "state": match_state})))
}

/// POST /ingest/bus-location: store a bus fix and move it in the geo-index.
pub async fn api_ingest_bus(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BusLocation>,
) -> Result<Json<Value>, ApiError> {
    let record = body.into_record(now());

    state
        .engine
        .ingest_bus(record)
        .await
        .map_err(store_failure)?;

    Ok(Json(json!({"ok": true})))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
