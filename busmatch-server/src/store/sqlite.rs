//! SQLite location store: WAL mode, 3 tables, bounding-box geo query.
//!
//! Schema: riders, buses, bus_geo. `bus_geo` is the geo-index: one row per
//! bus with an index on (lat, lon). Radius queries scan the bounding box of
//! the circle through that index and keep rows within the haversine radius.
//!
//! rusqlite is blocking, so every call runs on tokio's blocking pool behind
//! a mutex-guarded connection.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};

use busmatch_core::geo::{bounding_box, haversine};
use busmatch_core::types::{LocationRecord, NearbyBus};

use super::{LocationStore, StoreError, StoreResult};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS riders (
    id TEXT PRIMARY KEY,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    speed REAL NOT NULL DEFAULT 0,
    heading REAL NOT NULL DEFAULT 0,
    ts REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS buses (
    id TEXT PRIMARY KEY,
    route_id TEXT,
    lat REAL NOT NULL,
    lon REAL NOT NULL,
    speed REAL NOT NULL DEFAULT 0,
    heading REAL NOT NULL DEFAULT 0,
    ts REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS bus_geo (
    id TEXT PRIMARY KEY REFERENCES buses(id),
    lat REAL NOT NULL,
    lon REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bus_geo_lat_lon ON bus_geo(lat, lon);
"#;

/// SQLite-backed store. Survives restarts; match states do not.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            // Ensure parent directory exists
            if let Some(parent) = Path::new(path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            Connection::open(path)?
        };

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open in-memory database (for testing).
    pub fn open_memory() -> StoreResult<Self> {
        Self::open(":memory:")
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn rider_from_row(r: &Row<'_>) -> rusqlite::Result<LocationRecord> {
    Ok(LocationRecord {
        id: r.get(0)?,
        lat: r.get(1)?,
        lon: r.get(2)?,
        speed: r.get(3)?,
        heading: r.get(4)?,
        timestamp: r.get(5)?,
        route_id: None,
    })
}

fn bus_from_row(r: &Row<'_>) -> rusqlite::Result<LocationRecord> {
    Ok(LocationRecord {
        id: r.get(0)?,
        lat: r.get(1)?,
        lon: r.get(2)?,
        speed: r.get(3)?,
        heading: r.get(4)?,
        timestamp: r.get(5)?,
        route_id: r.get(6)?,
    })
}

#[async_trait]
impl LocationStore for SqliteStore {
    async fn put_user(&self, record: LocationRecord) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO riders (id, lat, lon, speed, heading, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                     lat = excluded.lat,
                     lon = excluded.lon,
                     speed = excluded.speed,
                     heading = excluded.heading,
                     ts = excluded.ts",
                params![
                    record.id,
                    record.lat,
                    record.lon,
                    record.speed,
                    record.heading,
                    record.timestamp
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn put_bus(&self, record: LocationRecord) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO buses (id, route_id, lat, lon, speed, heading, ts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                     route_id = excluded.route_id,
                     lat = excluded.lat,
                     lon = excluded.lon,
                     speed = excluded.speed,
                     heading = excluded.heading,
                     ts = excluded.ts",
                params![
                    record.id,
                    record.route_id,
                    record.lat,
                    record.lon,
                    record.speed,
                    record.heading,
                    record.timestamp
                ],
            )?;
            tx.execute(
                "INSERT INTO bus_geo (id, lat, lon) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET lat = excluded.lat, lon = excluded.lon",
                params![record.id, record.lat, record.lon],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<LocationRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let rec = conn
                .query_row(
                    "SELECT id, lat, lon, speed, heading, ts FROM riders WHERE id = ?1",
                    params![id],
                    rider_from_row,
                )
                .optional()?;
            Ok(rec)
        })
        .await
    }

    async fn get_bus(&self, id: &str) -> StoreResult<Option<LocationRecord>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let rec = conn
                .query_row(
                    "SELECT id, lat, lon, speed, heading, ts, route_id FROM buses WHERE id = ?1",
                    params![id],
                    bus_from_row,
                )
                .optional()?;
            Ok(rec)
        })
        .await
    }

    async fn query_buses_near(
        &self,
        lat: f64,
        lon: f64,
        radius_m: f64,
    ) -> StoreResult<Vec<NearbyBus>> {
        let (min_lat, max_lat, mut min_lon, mut max_lon) = bounding_box(lat, lon, radius_m);
        // Box crosses the antimeridian: fall back to a latitude band
        if min_lon < -180.0 || max_lon > 180.0 {
            min_lon = f64::MIN;
            max_lon = f64::MAX;
        }

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, lat, lon FROM bus_geo
                 WHERE lat BETWEEN ?1 AND ?2 AND lon BETWEEN ?3 AND ?4",
            )?;
            let rows = stmt.query_map(params![min_lat, max_lat, min_lon, max_lon], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?, r.get::<_, f64>(2)?))
            })?;

            let mut nearby = Vec::new();
            for row in rows {
                let (bus_id, lat2, lon2) = row?;
                let distance_m = haversine(lat, lon, lat2, lon2);
                if distance_m <= radius_m {
                    nearby.push(NearbyBus { bus_id, distance_m });
                }
            }
            Ok(nearby)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(id: &str, lat: f64, lon: f64, ts: f64) -> LocationRecord {
        LocationRecord::new(id, lat, lon, ts).with_motion(10.0, 90.0)
    }

    #[tokio::test]
    async fn test_open_memory() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.get_user("nobody").await.unwrap().is_none());
        assert!(store.get_bus("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_user_overwrites() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .put_user(LocationRecord::new("U1", 37.0, 127.0, 100.0).with_motion(3.0, 45.0))
            .await
            .unwrap();
        store
            .put_user(LocationRecord::new("U1", 37.5, 127.5, 90.0))
            .await
            .unwrap();

        let got = store.get_user("U1").await.unwrap().unwrap();
        assert_eq!(got.lat, 37.5);
        assert_eq!(got.timestamp, 90.0, "older timestamp still wins the write");
        assert_eq!(got.speed, 0.0);
    }

    #[tokio::test]
    async fn test_bus_route_roundtrip() {
        let store = SqliteStore::open_memory().unwrap();
        store
            .put_bus(bus("B1", 37.0, 127.0, 1.0).with_route(Some("R7".into())))
            .await
            .unwrap();
        let got = store.get_bus("B1").await.unwrap().unwrap();
        assert_eq!(got.route_id.as_deref(), Some("R7"));
        assert_eq!(got.heading, 90.0);
    }

    #[tokio::test]
    async fn test_radius_query() {
        let store = SqliteStore::open_memory().unwrap();
        store.put_bus(bus("B1", 37.0, 127.0, 1.0)).await.unwrap();
        store.put_bus(bus("B2", 37.0, 127.0008, 1.0)).await.unwrap(); // ~71 m east
        store.put_bus(bus("B3", 37.001, 127.0, 1.0)).await.unwrap(); // ~111 m north

        let mut near = store.query_buses_near(37.0, 127.0, 80.0).await.unwrap();
        near.sort_by(|a, b| a.bus_id.cmp(&b.bus_id));
        let ids: Vec<&str> = near.iter().map(|n| n.bus_id.as_str()).collect();
        assert_eq!(ids, vec!["B1", "B2"]);
    }

    #[tokio::test]
    async fn test_geo_index_follows_bus() {
        let store = SqliteStore::open_memory().unwrap();
        store.put_bus(bus("B1", 37.0, 127.0, 1.0)).await.unwrap();
        store.put_bus(bus("B1", 37.01, 127.0, 2.0)).await.unwrap();

        assert!(store.query_buses_near(37.0, 127.0, 80.0).await.unwrap().is_empty());
        assert_eq!(store.query_buses_near(37.01, 127.0, 80.0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("busmatch.db");
        let path = path.to_str().unwrap().to_string();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.put_bus(bus("B1", 37.0, 127.0, 1.0)).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.get_bus("B1").await.unwrap().is_some());
        assert_eq!(store.query_buses_near(37.0, 127.0, 10.0).await.unwrap().len(), 1);
    }
}
