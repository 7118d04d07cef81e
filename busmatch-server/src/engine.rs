//! Match engine: ties the location store to the scoring and state machine.
//!
//! Every rider fix triggers one computation: read the rider's record, find
//! buses within the search radius, score each against the rider, pick the
//! best, and fold it into the rider's previous state. Computations for the
//! same rider run one at a time behind that rider's mutex; different riders
//! never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::debug;

use busmatch_core::config::{Config, DEFAULT_SEARCH_RADIUS_M};
use busmatch_core::matcher::{self, Thresholds};
use busmatch_core::scoring::{self, ScoreParams};
use busmatch_core::types::{LocationRecord, MatchState, NearbyBus, ScoredCandidate};

use crate::notification::WebhookDispatcher;
use crate::store::{LocationStore, StoreError, StoreResult};

/// Matching parameters, usually taken from the config file.
#[derive(Debug, Clone, Copy)]
pub struct EngineParams {
    pub search_radius_m: f64,
    pub thresholds: Thresholds,
    pub score: ScoreParams,
}

impl Default for EngineParams {
    fn default() -> Self {
        EngineParams {
            search_radius_m: DEFAULT_SEARCH_RADIUS_M,
            thresholds: Thresholds::default(),
            score: ScoreParams::default(),
        }
    }
}

impl EngineParams {
    pub fn from_config(config: &Config) -> Self {
        EngineParams {
            search_radius_m: config.matcher.search_radius_m,
            thresholds: Thresholds {
                on: config.matcher.on_threshold,
                off: config.matcher.off_threshold,
            },
            score: ScoreParams {
                max_time_skew_s: config.matcher.max_time_skew_s,
                ..ScoreParams::default()
            },
        }
    }
}

type RiderSlot = Arc<Mutex<Option<MatchState>>>;

fn is_idle(state: &Option<MatchState>, now: f64, ttl_s: f64) -> bool {
    match state {
        Some(s) => now - s.updated_at > ttl_s,
        None => true,
    }
}

/// Per-rider match states. One slot per rider ever seen (until pruned).
#[derive(Default)]
struct StateTable {
    riders: RwLock<HashMap<String, RiderSlot>>,
}

impl StateTable {
    fn slot(&self, user_id: &str) -> StoreResult<RiderSlot> {
        if let Some(slot) = self
            .riders
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(user_id)
        {
            return Ok(Arc::clone(slot));
        }
        let mut riders = self.riders.write().map_err(|_| StoreError::Poisoned)?;
        Ok(Arc::clone(riders.entry(user_id.to_string()).or_default()))
    }

    fn existing(&self, user_id: &str) -> StoreResult<Option<RiderSlot>> {
        let riders = self.riders.read().map_err(|_| StoreError::Poisoned)?;
        Ok(riders.get(user_id).cloned())
    }

    fn snapshot(&self) -> StoreResult<Vec<(String, RiderSlot)>> {
        let riders = self.riders.read().map_err(|_| StoreError::Poisoned)?;
        Ok(riders
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect())
    }
}

/// The matching engine. Cheap to share behind an `Arc`.
pub struct MatchEngine {
    store: Arc<dyn LocationStore>,
    params: EngineParams,
    states: StateTable,
    webhook: Option<WebhookDispatcher>,
}

impl MatchEngine {
    pub fn new(store: Arc<dyn LocationStore>, params: EngineParams) -> Self {
        MatchEngine {
            store,
            params,
            states: StateTable::default(),
            webhook: None,
        }
    }

    pub fn with_webhook(mut self, webhook: Option<WebhookDispatcher>) -> Self {
        self.webhook = webhook;
        self
    }

    pub fn params(&self) -> &EngineParams {
        &self.params
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Store a rider fix and recompute their match.
    pub async fn ingest_user(
        &self,
        record: LocationRecord,
        now: f64,
    ) -> StoreResult<Option<MatchState>> {
        let user_id = record.id.clone();
        self.store.put_user(record).await?;
        self.compute(&user_id, now).await
    }

    /// Store a bus fix. Riders pick it up on their next computation.
    pub async fn ingest_bus(&self, record: LocationRecord) -> StoreResult<()> {
        self.store.put_bus(record).await
    }

    // -----------------------------------------------------------------------
    // Matching
    // -----------------------------------------------------------------------

    /// Buses within the search radius of the rider.
    pub async fn nearby_buses(&self, rider: &LocationRecord) -> StoreResult<Vec<NearbyBus>> {
        self.store
            .query_buses_near(rider.lat, rider.lon, self.params.search_radius_m)
            .await
    }

    /// Score every nearby bus against the rider, in query order.
    ///
    /// Buses that vanish between the radius query and the record read are
    /// skipped. Bus records may be newer than the query result; the next
    /// rider fix recomputes anyway.
    pub async fn score_candidates(
        &self,
        rider: &LocationRecord,
    ) -> StoreResult<Vec<ScoredCandidate>> {
        let nearby = self.nearby_buses(rider).await?;
        let mut scored = Vec::with_capacity(nearby.len());

        for near in nearby {
            let Some(bus) = self.store.get_bus(&near.bus_id).await? else {
                continue;
            };
            let s = scoring::score_with(&self.params.score, rider, &bus);
            scored.push(ScoredCandidate {
                bus_id: near.bus_id,
                score: s.value,
                distance_m: s.distance_m,
            });
        }

        Ok(scored)
    }

    /// Recompute a rider's match. `Ok(None)` when the rider has no record.
    pub async fn compute(&self, user_id: &str, now: f64) -> StoreResult<Option<MatchState>> {
        let slot = self.states.slot(user_id)?;
        let mut state = slot.lock().await;

        let Some(rider) = self.store.get_user(user_id).await? else {
            return Ok(None);
        };

        let candidates = self.score_candidates(&rider).await?;
        let best = matcher::select_best(candidates);
        let next = matcher::transition(state.as_ref(), best.as_ref(), &self.params.thresholds, now);

        if matcher::is_transition(state.as_ref(), &next) {
            debug!(
                user_id,
                status = %next.status,
                bus_id = next.bus_id.as_deref().unwrap_or("-"),
                score = next.score,
                "match transition"
            );
            if let Some(webhook) = &self.webhook {
                webhook.notify(user_id, state.as_ref(), &next);
            }
        }

        *state = Some(next.clone());
        Ok(Some(next))
    }

    // -----------------------------------------------------------------------
    // Publication
    // -----------------------------------------------------------------------

    /// Current state for a rider, or the empty state if none exists yet.
    pub async fn state(&self, user_id: &str) -> StoreResult<MatchState> {
        let Some(slot) = self.states.existing(user_id)? else {
            return Ok(MatchState::default());
        };
        let state = slot.lock().await;
        Ok(state.clone().unwrap_or_default())
    }

    /// Number of riders with a state slot.
    pub fn tracked_riders(&self) -> usize {
        self.states.riders.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Drop states not recomputed within `ttl_s`. Returns count removed.
    pub async fn prune_states(&self, now: f64, ttl_s: f64) -> StoreResult<usize> {
        let mut stale = Vec::new();
        for (user_id, slot) in self.states.snapshot()? {
            let idle = is_idle(&*slot.lock().await, now, ttl_s);
            if idle {
                stale.push((user_id, Arc::clone(&slot)));
            }
        }

        let mut riders = self.states.riders.write().map_err(|_| StoreError::Poisoned)?;
        let mut removed = 0;
        for (user_id, slot) in stale {
            // Skip slots that were replaced or are in use by a computation
            let unchanged = riders
                .get(&user_id)
                .is_some_and(|current| Arc::ptr_eq(current, &slot));
            if !unchanged || Arc::strong_count(&slot) != 2 {
                continue;
            }
            let Ok(state) = slot.try_lock() else {
                continue;
            };
            // A computation may have landed since the first pass
            let still_idle = is_idle(&state, now, ttl_s);
            drop(state);
            if still_idle {
                riders.remove(&user_id);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
