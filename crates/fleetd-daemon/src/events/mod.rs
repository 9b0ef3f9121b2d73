//! UI log events.
//!
//! Task failures and other operator-facing messages are published as small
//! JSON documents on host-scoped topics. Where they go is up to the injected
//! [`EventSink`]; the daemon ships a tracing sink and an in-process broadcast
//! sink that other components (or tests) can subscribe to.

mod sink;

use std::sync::Arc;

use fleetd_core::time::utc_iso_timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use sink::{BroadcastSink, EventSink, PublishedEvent, TracingSink};

/// Severity of a UI log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

/// Payload of a UI log event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub message: String,
    /// Name of the task or job that produced the message.
    pub task: String,
    pub source: String,
    pub level: LogLevel,
    /// UTC, ISO-8601, `Z`-suffixed.
    pub timestamp: String,
}

impl LogEvent {
    pub fn new(message: &str, task: &str, level: LogLevel) -> Self {
        Self {
            message: message.trim().to_string(),
            task: task.to_string(),
            source: "ui".to_string(),
            level,
            timestamp: utc_iso_timestamp(),
        }
    }
}

/// Builds UI log events and hands them to the configured sink.
#[derive(Clone)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
    topic_root: String,
    hostname: String,
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>, topic_root: &str, hostname: &str) -> Self {
        Self {
            sink,
            topic_root: topic_root.to_string(),
            hostname: hostname.to_string(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Topic for messages not tied to an experiment.
    pub fn host_topic(&self) -> String {
        format!("{}/{}/$experiment/logs/ui", self.topic_root, self.hostname)
    }

    pub fn experiment_topic(&self, experiment: &str) -> String {
        format!("{}/{}/{}/logs/ui", self.topic_root, self.hostname, experiment)
    }

    pub async fn publish_log(&self, message: &str, task: &str, level: LogLevel) {
        let event = LogEvent::new(message, task, level);
        self.sink.publish(&self.host_topic(), &event).await;
    }

    pub async fn publish_experiment_log(
        &self,
        experiment: &str,
        message: &str,
        task: &str,
        level: LogLevel,
    ) {
        let event = LogEvent::new(message, task, level);
        self.sink.publish(&self.experiment_topic(experiment), &event).await;
    }

    /// Publish an ERROR event, on the experiment's topic when one is given.
    /// Non-string payloads are JSON-encoded.
    pub async fn publish_error(&self, payload: &Value, task: &str, experiment: Option<&str>) {
        let message = match payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        match experiment {
            Some(experiment) => {
                self.publish_experiment_log(experiment, &message, task, LogLevel::Error)
                    .await;
            }
            None => self.publish_log(&message, task, LogLevel::Error).await,
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("topic_root", &self.topic_root)
            .field("hostname", &self.hostname)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn publisher() -> (EventPublisher, BroadcastSink) {
        let sink = BroadcastSink::new(16);
        let publisher = EventPublisher::new(Arc::new(sink.clone()), "pioreactor", "leader");
        (publisher, sink)
    }

    #[tokio::test]
    async fn error_is_published_on_host_topic() {
        let (publisher, sink) = publisher();
        let mut rx = sink.subscribe();

        publisher.publish_error(&json!("  disk full \n"), "save_file", None).await;

        let published = rx.recv().await.unwrap();
        assert_eq!(published.topic, "pioreactor/leader/$experiment/logs/ui");
        assert_eq!(published.event.message, "disk full");
        assert_eq!(published.event.task, "save_file");
        assert_eq!(published.event.source, "ui");
        assert_eq!(published.event.level, LogLevel::Error);
        assert!(published.event.timestamp.ends_with('Z'));
    }

    #[tokio::test]
    async fn structured_error_payload_is_json_encoded() {
        let (publisher, sink) = publisher();
        let mut rx = sink.subscribe();

        publisher.publish_error(&json!({"code": 3}), "pio", None).await;
        assert_eq!(rx.recv().await.unwrap().event.message, r#"{"code":3}"#);
    }

    #[tokio::test]
    async fn experiment_topic_is_scoped() {
        let (publisher, sink) = publisher();
        let mut rx = sink.subscribe();

        publisher
            .publish_experiment_log("exp7", "started", "pio_run", LogLevel::Info)
            .await;
        let published = rx.recv().await.unwrap();
        assert_eq!(published.topic, "pioreactor/leader/exp7/logs/ui");

        publisher.publish_error(&json!("pump stalled"), "pio", Some("exp7")).await;
        let published = rx.recv().await.unwrap();
        assert_eq!(published.topic, "pioreactor/leader/exp7/logs/ui");
        assert_eq!(published.event.level, LogLevel::Error);
    }

    #[test]
    fn level_serializes_uppercase() {
        let event = LogEvent::new("x", "t", LogLevel::Warning);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "WARNING");
        assert_eq!(json["source"], "ui");
    }
}
