//! Streaming Channel (C9, spec.md §4.9): NDJSON event publication per
//! request, modelled on the teacher's trajectory-event shape — a tagged
//! enum serialised one event per line, delivered over a bounded, ordered
//! per-request queue.

use crate::domain::Source;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

/// One NDJSON line (spec.md §4.9 "Event types"). `#[serde(tag = "type")]`
/// gives each variant the flat `{type:"...", ...}` shape the spec enumerates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        stage: String,
        progress: f64,
    },
    TextChunk {
        content: String,
        chunk_id: String,
    },
    Widget {
        widget_type: String,
        data: serde_json::Value,
    },
    Form {
        reason: String,
        fields: Vec<String>,
    },
    Sources {
        sources: Vec<Source>,
    },
    Metadata {
        #[serde(flatten)]
        data: HashMap<String, serde_json::Value>,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl StreamEvent {
    /// Serialises to one NDJSON line, without a trailing newline.
    pub fn to_ndjson_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Per-request publisher handle. Events are strictly ordered because there
/// is a single writer per request and the underlying `mpsc` channel
/// preserves send order (spec.md §4.9 "Ordering").
#[derive(Clone)]
pub struct StreamPublisher {
    sender: mpsc::Sender<StreamEvent>,
}

/// Per-request subscriber handle returned by `subscribe`.
pub struct StreamSubscriber {
    receiver: mpsc::Receiver<StreamEvent>,
}

/// `publish(event)` / `subscribe(request_id) -> event_stream` (spec.md
/// §4.9). One channel per request; `capacity` bounds backpressure
/// (`STREAM_QUEUE_CAPACITY`, default 256).
pub fn channel(capacity: usize) -> (StreamPublisher, StreamSubscriber) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (StreamPublisher { sender }, StreamSubscriber { receiver })
}

impl StreamPublisher {
    /// Blocks when the queue is full, propagating backpressure to the step
    /// producing events (spec.md §5 "Backpressure").
    pub async fn publish(&self, event: StreamEvent) -> Result<(), mpsc::error::SendError<StreamEvent>> {
        self.sender.send(event).await
    }

    /// A heartbeat status event, sent when no other event has fired within
    /// the channel's 1-second latency guarantee (spec.md §4.9 "MUST emit at
    /// least one event before 1s or send a heartbeat").
    pub async fn heartbeat(&self, stage: impl Into<String>, progress: f64) -> Result<(), mpsc::error::SendError<StreamEvent>> {
        self.publish(StreamEvent::Status {
            stage: stage.into(),
            progress,
        })
        .await
    }
}

impl StreamSubscriber {
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.receiver.recv().await
    }

    /// Receives the next event, or `None` if none arrives before
    /// `heartbeat_interval` — the caller can use this to decide whether to
    /// synthesise a heartbeat on behalf of a quiet producer.
    pub async fn recv_or_timeout(&mut self, heartbeat_interval: Duration) -> Option<StreamEvent> {
        match timeout(heartbeat_interval, self.receiver.recv()).await {
            Ok(event) => event,
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_are_received_in_publish_order() {
        let (publisher, mut subscriber) = channel(4);
        publisher
            .publish(StreamEvent::Status { stage: "retrieval".to_string(), progress: 10.0 })
            .await
            .unwrap();
        publisher
            .publish(StreamEvent::Status { stage: "synthesis".to_string(), progress: 90.0 })
            .await
            .unwrap();

        let first = subscriber.recv().await.unwrap();
        let second = subscriber.recv().await.unwrap();
        match (first, second) {
            (StreamEvent::Status { stage: s1, .. }, StreamEvent::Status { stage: s2, .. }) => {
                assert_eq!(s1, "retrieval");
                assert_eq!(s2, "synthesis");
            }
            _ => panic!("unexpected event variants"),
        }
    }

    #[test]
    fn serialises_to_tagged_ndjson() {
        let event = StreamEvent::Error {
            kind: "timeout".to_string(),
            message: "retrieval timed out".to_string(),
        };
        let line = event.to_ndjson_line().unwrap();
        assert!(line.contains("\"type\":\"error\""));
        assert!(!line.contains('\n'));
    }

    #[tokio::test]
    async fn recv_or_timeout_returns_none_when_quiet() {
        let (_publisher, mut subscriber) = channel(4);
        let event = subscriber.recv_or_timeout(Duration::from_millis(20)).await;
        assert!(event.is_none());
    }
}
