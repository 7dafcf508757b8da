//! Broadcast channel for progress events.
//!
//! Publishing never blocks and never fails; events sent while nobody is
//! subscribed are dropped.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tokio::sync::broadcast;

use crate::domain::models::{EventEnvelope, QaEvent};

/// Configuration for the EventBus.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for the broadcast channel.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Central event bus for broadcasting events to multiple observers.
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an event to every current subscriber.
    pub fn publish(&self, event: QaEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(sequence, event = ?event, "publishing event");
        // No subscribers is fine.
        let _ = self.sender.send(EventEnvelope {
            sequence,
            at: Utc::now(),
            event,
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Number of events published so far.
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}
