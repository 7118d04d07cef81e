//! Location storage: latest fix per rider and per bus, plus a bus geo-index.
//!
//! The engine only needs four capabilities from a store: per-key upsert,
//! geo-index add, radius search with distances, and per-key read. Two
//! backends implement them: an in-memory store with an H3 cell index and a
//! SQLite store for state that should survive restarts.

use async_trait::async_trait;
use thiserror::Error;

use busmatch_core::types::{LocationRecord, NearbyBus};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Storage-layer failures. Never a domain outcome: "not found" is `Ok(None)`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("cannot index coordinate: {0}")]
    Coordinate(String),
    #[error("store task failed: {0}")]
    Task(String),
    #[error("store lock poisoned")]
    Poisoned,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Keyed, geo-indexed storage of the latest rider and bus locations.
///
/// Writes are last-write-wins per identifier: no timestamp ordering check.
/// Upserts for different identifiers never contend.
#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn put_user(&self, record: LocationRecord) -> StoreResult<()>;

    /// Upsert a bus and move its geo-index entry to (lon, lat).
    async fn put_bus(&self, record: LocationRecord) -> StoreResult<()>;

    async fn get_user(&self, id: &str) -> StoreResult<Option<LocationRecord>>;

    async fn get_bus(&self, id: &str) -> StoreResult<Option<LocationRecord>>;

    /// Buses within `radius_m` of the point. Order is unspecified.
    async fn query_buses_near(&self, lat: f64, lon: f64, radius_m: f64)
        -> StoreResult<Vec<NearbyBus>>;
}

/// Build the store named by the config `backend` key.
pub fn open_store(backend: &str, path: &str) -> StoreResult<std::sync::Arc<dyn LocationStore>> {
    match backend {
        "sqlite" => Ok(std::sync::Arc::new(SqliteStore::open(path)?)),
        _ => Ok(std::sync::Arc::new(MemoryStore::new())),
    }
}
