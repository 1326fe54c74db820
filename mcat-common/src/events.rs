//! Catalog change events
//!
//! Provides the event enum and the broadcast bus that [`crate::service`]
//! publishes committed mutations on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Catalog event types
///
/// Events are emitted only after a mutation has been committed, except
/// `ConsistencyViolation`, which reports a rolled-back mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CatalogEvent {
    /// A track's virtual key was rewritten
    VirtualKeyChanged {
        track_id: Uuid,
        old_key: String,
        new_key: String,
        timestamp: DateTime<Utc>,
    },

    /// A track's tag values changed
    TagsChanged {
        track_id: Uuid,
        group: String,
        timestamp: DateTime<Utc>,
    },

    /// `source` was folded into `target`
    ClustersMerged {
        target_cluster_id: Uuid,
        removed_cluster_id: Uuid,
        moved_track_ids: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// Tracks were carved out of `source` into a new cluster
    ClusterSplit {
        source_cluster_id: Uuid,
        new_cluster_id: Uuid,
        moved_track_ids: Vec<Uuid>,
        timestamp: DateTime<Utc>,
    },

    /// Vocabulary or scale definitions changed
    VocabularyChanged {
        /// Affected tag group or scale
        subject: String,
        /// Short description, e.g. "value deleted"
        change: String,
        timestamp: DateTime<Utc>,
    },

    /// A track left the catalog
    TrackRemoved {
        track_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// A mutation failed its post-condition check and was rolled back
    ConsistencyViolation {
        operation: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl CatalogEvent {
    /// Event type name (matches the serialized `type` tag)
    pub fn event_type(&self) -> &str {
        match self {
            CatalogEvent::VirtualKeyChanged { .. } => "VirtualKeyChanged",
            CatalogEvent::TagsChanged { .. } => "TagsChanged",
            CatalogEvent::ClustersMerged { .. } => "ClustersMerged",
            CatalogEvent::ClusterSplit { .. } => "ClusterSplit",
            CatalogEvent::VocabularyChanged { .. } => "VocabularyChanged",
            CatalogEvent::TrackRemoved { .. } => "TrackRemoved",
            CatalogEvent::ConsistencyViolation { .. } => "ConsistencyViolation",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            CatalogEvent::VirtualKeyChanged { timestamp, .. }
            | CatalogEvent::TagsChanged { timestamp, .. }
            | CatalogEvent::ClustersMerged { timestamp, .. }
            | CatalogEvent::ClusterSplit { timestamp, .. }
            | CatalogEvent::VocabularyChanged { timestamp, .. }
            | CatalogEvent::TrackRemoved { timestamp, .. }
            | CatalogEvent::ConsistencyViolation { timestamp, .. } => *timestamp,
        }
    }
}

/// Broadcast bus for catalog events
///
/// Built on `tokio::sync::broadcast`: publishing never blocks, slow
/// subscribers observe `Lagged`, and dropped receivers clean up on their own.
///
/// # Examples
///
/// ```
/// use mcat_common::events::{CatalogEvent, EventBus};
///
/// let bus = EventBus::new(100);
/// let mut rx = bus.subscribe();
///
/// bus.emit_lossy(CatalogEvent::TrackRemoved {
///     track_id: uuid::Uuid::new_v4(),
///     timestamp: chrono::Utc::now(),
/// });
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CatalogEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (`EngineConfig::validate` rejects that).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: CatalogEvent,
    ) -> Result<usize, broadcast::error::SendError<CatalogEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the case where no subscribers are listening
    pub fn emit_lossy(&self, event: CatalogEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_tag_matches_event_type() {
        let event = CatalogEvent::VirtualKeyChanged {
            track_id: Uuid::nil(),
            old_key: "calm_menu_piano_ambient_001".to_string(),
            new_key: "tense_menu_piano_ambient_001".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert_eq!(json["new_key"], "tense_menu_piano_ambient_001");

        let back: CatalogEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let result = bus.emit(CatalogEvent::TrackRemoved {
            track_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.capacity(), 10);

        let sent = bus
            .emit(CatalogEvent::VocabularyChanged {
                subject: "moods".to_string(),
                change: "value added".to_string(),
                timestamp: Utc::now(),
            })
            .unwrap();
        assert_eq!(sent, 2);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.event_type(), "VocabularyChanged");
        assert_eq!(e1, e2);
    }
}
