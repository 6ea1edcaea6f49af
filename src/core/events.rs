//! Write notifications
//!
//! The EventBus decouples the write pipeline from whatever wants to react
//! to it (cache invalidation, audit logs, push notifications). It uses
//! `tokio::sync::broadcast`, so publishing never blocks and events are
//! dropped when nobody listens.
//!
//! # Architecture
//!
//! ```text
//! handle_create ──┐
//! handle_update ──┼──▶ EventBus::publish() ──▶ broadcast channel ──▶ subscribers
//! handle_delete ──┘
//! ```
//!
//! Events are only published once the storage transaction committed.
//!
//! # Usage
//!
//! ```rust,ignore
//! let event_bus = EventBus::new(1024);
//! let mut rx = event_bus.subscribe();
//!
//! event_bus.publish(EntityEvent::Created {
//!     entity_type: "comment".to_string(),
//!     entity_id: 12,
//!     data: json!({"id": 12, "message": "hi"}),
//! });
//!
//! if let Ok(envelope) = rx.recv().await {
//!     println!("{} {}", envelope.event.action(), envelope.event.entity_type());
//! }
//! ```

use crate::core::entity::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Committed entity mutations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum EntityEvent {
    /// An entity was created; `data` is its normalized `details` view
    Created {
        entity_type: String,
        entity_id: EntityId,
        data: serde_json::Value,
    },
    /// An entity was updated; `data` is its normalized `details` view
    Updated {
        entity_type: String,
        entity_id: EntityId,
        data: serde_json::Value,
    },
    /// An entity was deleted
    Deleted {
        entity_type: String,
        entity_id: EntityId,
    },
}

impl EntityEvent {
    pub fn entity_type(&self) -> &str {
        match self {
            EntityEvent::Created { entity_type, .. }
            | EntityEvent::Updated { entity_type, .. }
            | EntityEvent::Deleted { entity_type, .. } => entity_type,
        }
    }

    pub fn entity_id(&self) -> EntityId {
        match self {
            EntityEvent::Created { entity_id, .. }
            | EntityEvent::Updated { entity_id, .. }
            | EntityEvent::Deleted { entity_id, .. } => *entity_id,
        }
    }

    /// Action name (created, updated, deleted)
    pub fn action(&self) -> &str {
        match self {
            EntityEvent::Created { .. } => "created",
            EntityEvent::Updated { .. } => "updated",
            EntityEvent::Deleted { .. } => "deleted",
        }
    }
}

/// Envelope wrapping an event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event ID
    pub id: Uuid,
    /// When the event was published
    pub timestamp: DateTime<Utc>,
    pub event: EntityEvent,
}

impl EventEnvelope {
    pub fn new(event: EntityEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Broadcast-based event bus
///
/// Cheap to clone (Arc internally) and shareable across threads.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events for slow receivers
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    ///
    /// Returns the number of receivers that will see the event.
    pub fn publish(&self, event: EntityEvent) -> usize {
        let envelope = EventEnvelope::new(event);
        // send() only fails when there are no receivers
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to events published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_event_serialization() {
        let event = EntityEvent::Created {
            entity_type: "comment".to_string(),
            entity_id: 7,
            data: json!({"message": "hi"}),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["action"], "created");
        assert_eq!(json["entity_type"], "comment");
        assert_eq!(json["entity_id"], 7);
    }

    #[test]
    fn test_event_accessors() {
        let event = EntityEvent::Deleted {
            entity_type: "tag".to_string(),
            entity_id: 3,
        };
        assert_eq!(event.entity_type(), "tag");
        assert_eq!(event.entity_id(), 3);
        assert_eq!(event.action(), "deleted");
    }

    #[test]
    fn test_event_envelope_has_metadata() {
        let envelope = EventEnvelope::new(EntityEvent::Updated {
            entity_type: "meme".to_string(),
            entity_id: 1,
            data: json!({}),
        });
        assert!(!envelope.id.is_nil());
        assert!(envelope.timestamp <= Utc::now());
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let receivers = bus.publish(EntityEvent::Created {
            entity_type: "comment".to_string(),
            entity_id: 42,
            data: json!({}),
        });
        assert_eq!(receivers, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event.entity_id(), 42);
        assert_eq!(received.event.action(), "created");
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        bus.publish(EntityEvent::Deleted {
            entity_type: "comment".to_string(),
            entity_id: 1,
        });

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();
        assert_eq!(e1.id, e2.id);
    }

    #[test]
    fn test_event_bus_publish_without_subscribers() {
        let bus = EventBus::default();
        let receivers = bus.publish(EntityEvent::Deleted {
            entity_type: "comment".to_string(),
            entity_id: 1,
        });
        assert_eq!(receivers, 0);
    }
}
