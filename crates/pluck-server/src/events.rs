//! Event bus for extraction, teaching and voting activity.
//!
//! A `tokio::sync::broadcast` channel carrying [`PluckEvent`] values. The SSE
//! endpoint and the REPL subscribe independently; with no subscribers events
//! are dropped.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default number of buffered events per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PluckEvent {
    // ── Extraction ────────────────────
    /// A page was fetched and run through the strategy chain.
    ExtractionCompleted {
        domain: String,
        url: String,
        source: String,
        confidence: f64,
        suggest_teaching: bool,
        elapsed_ms: u64,
    },
    /// The URL gate or the fetcher refused a request.
    ExtractionFailed {
        domain: Option<String>,
        url: String,
        reason: String,
    },

    // ── Mappings ────────────────────
    MappingSaved {
        domain: String,
        mapping_id: Uuid,
        path_pattern: String,
        status: String,
        created_by: String,
    },
    MappingVoted {
        domain: String,
        mapping_id: Uuid,
        vote: String,
        confidence: f64,
        upvotes: u32,
        downvotes: u32,
    },

    // ── System ────────────────────
    ServerStarted { bind: String, version: String },
}

impl PluckEvent {
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::ExtractionCompleted { domain, .. }
            | Self::MappingSaved { domain, .. }
            | Self::MappingVoted { domain, .. } => Some(domain),
            Self::ExtractionFailed { domain, .. } => domain.as_deref(),
            Self::ServerStarted { .. } => None,
        }
    }
}

/// Whether an event passes a `?domain=` filter. Events without a domain
/// always pass.
pub fn event_matches_domain(event: &PluckEvent, filter: &str) -> bool {
    event.domain().map_or(true, |d| d == filter)
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PluckEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. Never blocks; a send with no subscribers is fine.
    pub fn emit(&self, event: PluckEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluckEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voted(domain: &str) -> PluckEvent {
        PluckEvent::MappingVoted {
            domain: domain.into(),
            mapping_id: Uuid::nil(),
            vote: "up".into(),
            confidence: 0.3,
            upvotes: 2,
            downvotes: 0,
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        bus.emit(voted("shop.com"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.emit(voted("shop.com"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.domain(), Some("shop.com"));
    }

    #[test]
    fn test_serialized_with_type_tag() {
        let json = serde_json::to_value(voted("shop.com")).unwrap();
        assert_eq!(json["type"], "MappingVoted");
        assert_eq!(json["vote"], "up");
    }

    #[test]
    fn test_domain_filter() {
        let started = PluckEvent::ServerStarted {
            bind: "127.0.0.1:0".into(),
            version: "0".into(),
        };
        assert!(event_matches_domain(&voted("shop.com"), "shop.com"));
        assert!(!event_matches_domain(&voted("other.com"), "shop.com"));
        assert!(event_matches_domain(&started, "shop.com"));
    }
}
