//! Destinations for UI log events.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{LogEvent, LogLevel};

/// Where published events go. Publishing never fails the caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, topic: &str, event: &LogEvent);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn publish(&self, topic: &str, event: &LogEvent) {
        match event.level {
            LogLevel::Error => error!(topic, task = %event.task, "{}", event.message),
            LogLevel::Warning => warn!(topic, task = %event.task, "{}", event.message),
            LogLevel::Notice | LogLevel::Info => {
                info!(topic, task = %event.task, "{}", event.message);
            }
            LogLevel::Debug => debug!(topic, task = %event.task, "{}", event.message),
        }
    }
}

/// An event together with its topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedEvent {
    pub topic: String,
    pub event: LogEvent,
}

/// Fans events out to in-process subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<PublishedEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventSink for BroadcastSink {
    async fn publish(&self, topic: &str, event: &LogEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(PublishedEvent {
            topic: topic.to_string(),
            event: event.clone(),
        });
    }
}
