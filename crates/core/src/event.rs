//! Domain event system — decoupled observation of engine activity.
//!
//! Events are published when something interesting happens during a turn.
//! Observers (a UI, a log shipper, tests) subscribe without the engine
//! knowing about them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A pruning pass produced the view sent to the model
    ContextPruned {
        conversation_id: String,
        tokens_before: usize,
        tokens_after: usize,
        deleted: usize,
        compacted: usize,
        escalated: bool,
        timestamp: DateTime<Utc>,
    },

    /// A generation round finished
    ContinuationRound {
        conversation_id: String,
        round: usize,
        finish_reason: String,
        generated_tokens: u64,
        timestamp: DateTime<Utc>,
    },

    /// The decoder recovered from an unclosed block
    MalformedMarkup {
        conversation_id: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// A tool was executed
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// The deletion mark of a conversation was rewritten
    DeletionMarksUpdated {
        conversation_id: String,
        count: usize,
        timestamp: DateTime<Utc>,
    },

    /// An error occurred
    ErrorOccurred {
        context: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(DomainEvent::ContextPruned {
            conversation_id: "c1".into(),
            tokens_before: 9000,
            tokens_after: 4000,
            deleted: 2,
            compacted: 3,
            escalated: false,
            timestamp: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            DomainEvent::ContextPruned {
                tokens_after,
                escalated,
                ..
            } => {
                assert_eq!(*tokens_after, 4000);
                assert!(!escalated);
            }
            _ => panic!("Expected ContextPruned event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(DomainEvent::ErrorOccurred {
            context: "test".into(),
            error_message: "no subscribers".into(),
            timestamp: Utc::now(),
        });
    }
}
