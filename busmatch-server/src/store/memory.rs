//! In-memory location store with an H3 cell index over bus positions.
//!
//! Records live in sharded `DashMap`s so upserts for different identifiers
//! never wait on each other. Each bus is indexed under its resolution-9 H3
//! cell; a radius query walks the grid disk around the query point's cell and
//! filters the buses found there by exact haversine distance.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use h3o::{CellIndex, LatLng, Resolution};

use busmatch_core::geo::haversine;
use busmatch_core::types::{LocationRecord, NearbyBus};

use super::{LocationStore, StoreError, StoreResult};

/// ~174 m average edge, ~300 m between neighbouring cell centres.
const INDEX_RESOLUTION: Resolution = Resolution::Nine;
const CELL_EDGE_M: f64 = 174.375_668;

/// Grid-disk radius (in cells) that covers every point within `radius_m`.
///
/// A matching bus sits in a cell whose centre is at most `radius_m` plus two
/// edge lengths from the origin cell's centre; one extra ring absorbs H3's
/// cell-size distortion.
fn disk_k(radius_m: f64) -> u32 {
    let spacing = CELL_EDGE_M * 3f64.sqrt();
    ((radius_m.max(0.0) + 2.0 * CELL_EDGE_M) / spacing).ceil() as u32 + 1
}

fn cell_for(lat: f64, lon: f64) -> StoreResult<CellIndex> {
    LatLng::new(lat, lon)
        .map(|ll| ll.to_cell(INDEX_RESOLUTION))
        .map_err(|e| StoreError::Coordinate(format!("({lat}, {lon}): {e}")))
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    riders: DashMap<String, LocationRecord>,
    buses: DashMap<String, (LocationRecord, CellIndex)>,
    cells: DashMap<CellIndex, HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rider_count(&self) -> usize {
        self.riders.len()
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }
}

#[async_trait]
impl LocationStore for MemoryStore {
    async fn put_user(&self, record: LocationRecord) -> StoreResult<()> {
        self.riders.insert(record.id.clone(), record);
        Ok(())
    }

    async fn put_bus(&self, record: LocationRecord) -> StoreResult<()> {
        let cell = cell_for(record.lat, record.lon)?;
        let id = record.id.clone();

        // The bus entry guard is held while the index moves, so two writes
        // for the same bus cannot interleave their index updates.
        let mut entry = self.buses.entry(id.clone()).or_insert_with(|| (record.clone(), cell));
        let old_cell = entry.1;
        *entry = (record, cell);

        if old_cell != cell {
            if let Some(mut ids) = self.cells.get_mut(&old_cell) {
                ids.remove(&id);
            }
            self.cells.remove_if(&old_cell, |_, ids| ids.is_empty());
        }
        self.cells.entry(cell).or_default().insert(id);

        Ok(())
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<LocationRecord>> {
        Ok(self.riders.get(id).map(|r| r.clone()))
    }

    async fn get_bus(&self, id: &str) -> StoreResult<Option<LocationRecord>> {
        Ok(self.buses.get(id).map(|b| b.0.clone()))
    }

    async fn query_buses_near(
        &self,
        lat: f64,
        lon: f64,
        radius_m: f64,
    ) -> StoreResult<Vec<NearbyBus>> {
        let origin = cell_for(lat, lon)?;

        // Collect ids first: cell guards must be released before bus guards
        // are taken, since put_bus locks in the opposite order.
        // A bus moving between cells mid-walk can show up twice.
        let mut seen: HashSet<String> = HashSet::new();
        let mut ids: Vec<String> = Vec::new();
        for cell in origin.grid_disk::<Vec<_>>(disk_k(radius_m)) {
            if let Some(set) = self.cells.get(&cell) {
                for id in set.iter() {
                    if seen.insert(id.clone()) {
                        ids.push(id.clone());
                    }
                }
            }
        }

        let nearby = ids
            .into_iter()
            .filter_map(|bus_id| {
                let (lat2, lon2) = {
                    let bus = self.buses.get(&bus_id)?;
                    (bus.0.lat, bus.0.lon)
                };
                let distance_m = haversine(lat, lon, lat2, lon2);
                (distance_m <= radius_m).then_some(NearbyBus { bus_id, distance_m })
            })
            .collect();

        Ok(nearby)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
