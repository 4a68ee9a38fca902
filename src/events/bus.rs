//! In-process event bus
//!
//! Named broadcast channels over tokio. Event-scheduled collections
//! subscribe to their configured event name when the scheduler loads;
//! publishing to a name with no subscribers drops the event. Channels are
//! created lazily on first subscription or publish and each has a bounded
//! backlog — a slow subscriber loses the oldest events rather than
//! blocking publishers.

use crate::events::DomainEvent;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Named-channel pub/sub for domain events
pub struct EventBus {
    channels: RwLock<HashMap<String, broadcast::Sender<DomainEvent>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Subscribe to events published under `name`
    pub async fn subscribe(&self, name: &str) -> broadcast::Receiver<DomainEvent> {
        let mut channels = self.channels.write().await;
        channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish an event to its named channel; returns the number of
    /// subscribers it reached.
    pub async fn publish(&self, event: DomainEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&event.name) {
            Some(sender) => match sender.send(event) {
                Ok(receivers) => receivers,
                Err(broadcast::error::SendError(event)) => {
                    debug!(event = %event.name, "no live subscribers, event dropped");
                    0
                }
            },
            None => {
                debug!(event = %event.name, "no channel registered, event dropped");
                0
            }
        }
    }

    /// Number of named channels currently registered
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}
