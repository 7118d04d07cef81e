//! busmatch-core: Pure matching library for rider/bus GPS fixes.
//!
//! No async, no I/O beyond the config file: just algorithms. This crate is
//! the shared core used by `busmatch-server` (web server + CLI).

pub mod config;
pub mod fix;
pub mod geo;
pub mod matcher;
pub mod scoring;
pub mod types;

// Re-export commonly used types at crate root
pub use geo::{circular_difference, haversine};
pub use matcher::{select_best, transition, Thresholds};
pub use scoring::{score, Score, ScoreParams};
pub use types::*;
