//! Per-rider hysteresis state machine.
//!
//! Pure logic: no I/O, no storage. The caller scores the candidate buses,
//! picks the best one with `select_best()`, and folds it with the rider's
//! previous state through `transition()`.
//!
//! Two thresholds keep the status from flapping on noisy fixes: a rider
//! boards a bus only above `on`, but stays on the bus they are already on
//! while its score remains above `off`.

use crate::scoring::INVALID_SCORE;
use crate::types::{MatchState, MatchStatus, ScoredCandidate};

pub const ON_THRESHOLD: f64 = 0.72;
pub const OFF_THRESHOLD: f64 = 0.45;

/// Entry and retention thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub on: f64,
    pub off: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            on: ON_THRESHOLD,
            off: OFF_THRESHOLD,
        }
    }
}

/// Pick the candidate with the strictly highest valid score.
///
/// Single linear scan: a later candidate replaces the current best only when
/// its score is strictly greater, so ties go to whichever came first in the
/// iteration order. That order is whatever the store's radius query returned.
pub fn select_best<I>(candidates: I) -> Option<ScoredCandidate>
where
    I: IntoIterator<Item = ScoredCandidate>,
{
    let mut best: Option<ScoredCandidate> = None;
    let mut best_score = INVALID_SCORE;

    for cand in candidates {
        if cand.score > best_score {
            best_score = cand.score;
            best = Some(cand);
        }
    }

    best
}

/// Compute a rider's next state from their previous state and best candidate.
///
/// `prev.score` is kept in the stored state but plays no part in the decision.
pub fn transition(
    prev: Option<&MatchState>,
    best: Option<&ScoredCandidate>,
    thresholds: &Thresholds,
    now: f64,
) -> MatchState {
    let Some(best) = best else {
        return MatchState::off(now);
    };

    let prev_bus = prev.and_then(|p| p.bus_id.as_deref());
    let sticky = prev_bus == Some(best.bus_id.as_str()) && best.score > thresholds.off;

    let status = if best.score > thresholds.on || sticky {
        MatchStatus::On
    } else if best.score > 0.0 {
        MatchStatus::Candidate
    } else {
        return MatchState::off(now);
    };

    MatchState {
        status,
        bus_id: Some(best.bus_id.clone()),
        score: best.score,
        updated_at: now,
    }
}

/// True when the rider's status or bus differs between two states.
pub fn is_transition(prev: Option<&MatchState>, next: &MatchState) -> bool {
    match prev {
        Some(p) => p.status != next.status || p.bus_id != next.bus_id,
        None => next.status != MatchStatus::Off,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(bus: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            bus_id: bus.into(),
            score,
            distance_m: 10.0,
        }
    }

    fn step(prev: Option<&MatchState>, best: Option<ScoredCandidate>, now: f64) -> MatchState {
        transition(prev, best.as_ref(), &Thresholds::default(), now)
    }

    #[test]
    fn test_select_best_strictly_greater() {
        let best = select_best(vec![cand("A", 0.5), cand("B", 0.8), cand("C", 0.8)]).unwrap();
        assert_eq!(best.bus_id, "B", "tie keeps the first candidate seen");
    }

    #[test]
    fn test_select_best_skips_invalid() {
        assert!(select_best(vec![cand("A", INVALID_SCORE), cand("B", INVALID_SCORE)]).is_none());
        assert!(select_best(Vec::new()).is_none());

        let best = select_best(vec![cand("A", INVALID_SCORE), cand("B", 0.1)]).unwrap();
        assert_eq!(best.bus_id, "B");
    }

    #[test]
    fn test_boards_above_on_threshold() {
        let s = step(None, Some(cand("B", 0.80)), 1.0);
        assert_eq!(s.status, MatchStatus::On);
        assert_eq!(s.bus_id.as_deref(), Some("B"));
        assert_eq!(s.score, 0.80);
        assert_eq!(s.updated_at, 1.0);
    }

    #[test]
    fn test_candidate_below_on_threshold() {
        let s = step(None, Some(cand("B", 0.50)), 1.0);
        assert_eq!(s.status, MatchStatus::Candidate);
        assert_eq!(s.bus_id.as_deref(), Some("B"));
    }

    #[test]
    fn test_off_without_candidate() {
        let s = step(None, None, 3.0);
        assert_eq!(s, MatchState::off(3.0));
    }

    #[test]
    fn test_sticky_retention_then_drop() {
        let on = step(None, Some(cand("B", 0.80)), 1.0);
        assert!(on.is_on());

        let dipped = step(Some(&on), Some(cand("B", 0.50)), 2.0);
        assert_eq!(dipped.status, MatchStatus::On, "0.50 > off threshold keeps B");
        assert_eq!(dipped.score, 0.50);

        let dropped = step(Some(&dipped), Some(cand("B", 0.40)), 3.0);
        assert_eq!(dropped.status, MatchStatus::Candidate);
        assert_eq!(dropped.bus_id.as_deref(), Some("B"));
    }

    #[test]
    fn test_switch_requires_on_threshold() {
        let on_a = step(None, Some(cand("A", 0.90)), 1.0);
        let next = step(Some(&on_a), Some(cand("C", 0.50)), 2.0);
        assert_eq!(next.status, MatchStatus::Candidate);
        assert_eq!(next.bus_id.as_deref(), Some("C"));

        let switched = step(Some(&next), Some(cand("C", 0.75)), 3.0);
        assert_eq!(switched.status, MatchStatus::On);
        assert_eq!(switched.bus_id.as_deref(), Some("C"));
    }

    #[test]
    fn test_candidate_promoted_by_sticky_rule() {
        // A candidate is "previous bus" too: staying above off promotes it.
        let cand_state = step(None, Some(cand("B", 0.50)), 1.0);
        let next = step(Some(&cand_state), Some(cand("B", 0.46)), 2.0);
        assert_eq!(next.status, MatchStatus::On);
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let at_on = step(None, Some(cand("B", ON_THRESHOLD)), 1.0);
        assert_eq!(at_on.status, MatchStatus::Candidate);

        let on = step(None, Some(cand("B", 0.9)), 1.0);
        let at_off = step(Some(&on), Some(cand("B", OFF_THRESHOLD)), 2.0);
        assert_eq!(at_off.status, MatchStatus::Candidate);
    }

    #[test]
    fn test_updated_at_always_refreshed() {
        let a = step(None, Some(cand("B", 0.9)), 1.0);
        let b = step(Some(&a), Some(cand("B", 0.9)), 7.5);
        assert_eq!(a.status, b.status);
        assert_eq!(b.updated_at, 7.5);
    }

    #[test]
    fn test_is_transition() {
        let on = step(None, Some(cand("B", 0.9)), 1.0);
        assert!(is_transition(None, &on));
        assert!(!is_transition(None, &MatchState::off(1.0)));

        let same = step(Some(&on), Some(cand("B", 0.8)), 2.0);
        assert!(!is_transition(Some(&on), &same));

        let other = step(Some(&on), Some(cand("C", 0.95)), 3.0);
        assert!(is_transition(Some(&on), &other));
    }
}
