//! Webhook notification dispatch for rider status transitions.
//!
//! Fire-and-forget HTTP POST of each transition as JSON.

use serde_json::{json, Value};
use tracing::warn;

use busmatch_core::types::MatchState;

/// Dispatches match transitions to a webhook URL via HTTP POST.
#[derive(Clone)]
pub struct WebhookDispatcher {
    url: String,
    client: reqwest::Client,
}

impl WebhookDispatcher {
    pub fn new(url: &str) -> Self {
        WebhookDispatcher {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Fire-and-forget POST of a transition. Must be called inside a tokio runtime.
    pub fn notify(&self, user_id: &str, prev: Option<&MatchState>, next: &MatchState) {
        let body = payload(user_id, prev, next);
        let client = self.client.clone();
        let url = self.url.clone();

        tokio::spawn(async move {
            if let Err(e) = client.post(&url).json(&body).send().await {
                warn!(%url, error = %e, "webhook POST failed");
            }
        });
    }
}

fn payload(user_id: &str, prev: Option<&MatchState>, next: &MatchState) -> Value {
    json!({
        "user_id": user_id,
        "status": next.status,
        "bus_id": next.bus_id,
        "score": next.score,
        "previous_status": prev.map(|p| p.status),
        "previous_bus_id": prev.and_then(|p| p.bus_id.clone()),
        "timestamp": next.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use busmatch_core::types::MatchStatus;

    #[test]
    fn test_webhook_dispatcher_creation() {
        let wh = WebhookDispatcher::new("https://example.com/hook");
        assert_eq!(wh.url, "https://example.com/hook");
    }

    #[test]
    fn test_transition_payload() {
        let prev = MatchState {
            status: MatchStatus::Candidate,
            bus_id: Some("B1".into()),
            score: 0.6,
            updated_at: 10.0,
        };
        let next = MatchState {
            status: MatchStatus::On,
            bus_id: Some("B1".into()),
            score: 0.9,
            updated_at: 11.0,
        };

        let body = payload("U1", Some(&prev), &next);
        assert_eq!(body["user_id"], "U1");
        assert_eq!(body["status"], "on");
        assert_eq!(body["previous_status"], "candidate");
        assert_eq!(body["previous_bus_id"], "B1");
        assert_eq!(body["timestamp"], 11.0);
    }

    #[test]
    fn test_first_transition_has_no_previous() {
        let next = MatchState::off(5.0);
        let body = payload("U1", None, &next);
        assert!(body["previous_status"].is_null());
        assert!(body["bus_id"].is_null());
    }

    #[tokio::test]
    async fn test_notify_unreachable_does_not_panic() {
        let wh = WebhookDispatcher::new("http://127.0.0.1:9/hook");
        wh.notify("U1", None, &MatchState::off(1.0));
        tokio::task::yield_now().await;
    }
}
