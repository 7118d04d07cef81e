//! Shared types and error enum for busmatch-core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by busmatch-core.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid fix line: {0}")]
    InvalidFix(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MatchError>;

// ---------------------------------------------------------------------------
// Location records
// ---------------------------------------------------------------------------

/// Latest known position and kinematics of a rider or a bus.
///
/// `route_id` is only ever set for buses. Speed is unit-agnostic but must be
/// consistent across riders and buses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_id: Option<String>,
}

impl LocationRecord {
    pub fn new(id: impl Into<String>, lat: f64, lon: f64, timestamp: f64) -> Self {
        LocationRecord {
            id: id.into(),
            lat,
            lon,
            speed: 0.0,
            heading: 0.0,
            timestamp,
            route_id: None,
        }
    }

    pub fn with_motion(mut self, speed: f64, heading: f64) -> Self {
        self.speed = speed;
        self.heading = heading;
        self
    }

    pub fn with_route(mut self, route_id: Option<String>) -> Self {
        self.route_id = route_id;
        self
    }
}

/// A bus found by a radius query, with its distance from the query point.
#[derive(Debug, Clone, PartialEq)]
pub struct NearbyBus {
    pub bus_id: String,
    pub distance_m: f64,
}

// ---------------------------------------------------------------------------
// Match state
// ---------------------------------------------------------------------------

/// Whether a rider is aboard a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    #[default]
    Off,
    Candidate,
    On,
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchStatus::Off => write!(f, "off"),
            MatchStatus::Candidate => write!(f, "candidate"),
            MatchStatus::On => write!(f, "on"),
        }
    }
}

/// Per-rider match decision. `bus_id` is present iff `status != Off`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MatchState {
    pub status: MatchStatus,
    pub bus_id: Option<String>,
    pub score: f64,
    pub updated_at: f64,
}

impl MatchState {
    pub fn off(now: f64) -> Self {
        MatchState {
            status: MatchStatus::Off,
            bus_id: None,
            score: 0.0,
            updated_at: now,
        }
    }

    pub fn is_on(&self) -> bool {
        self.status == MatchStatus::On
    }
}

/// A scored bus candidate for one rider.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub bus_id: String,
    pub score: f64,
    pub distance_m: f64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
