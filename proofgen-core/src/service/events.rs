//! Request lifecycle events.
//!
//! Every generation request that reaches a backend publishes exactly one
//! [`LlmServiceEvent`] on the [`EventBus`] it was created with. The bus is
//! an explicit handle: tests create one per scenario.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

use crate::error::Error;
use crate::llm::{AnalyzedChat, GeneratedRawContent};

/// Default channel capacity of an [`EventBus`].
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Data shared by both request outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestInfo {
    pub request_id: Uuid,
    pub service_name: String,
    pub model_id: String,
    /// Serialized resolved params
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzed_chat: Option<AnalyzedChat>,
    pub choices: usize,
    pub timestamp: DateTime<Utc>,
}

/// A backend answered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSucceeded {
    #[serde(flatten)]
    pub info: RequestInfo,
    pub generated: GeneratedRawContent,
}

/// Classified failure as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSummary {
    /// Taxonomy kind, e.g. "GenerationFailedError"
    pub kind: String,
    /// Kind of the wrapped cause, for generation failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause_kind: Option<String>,
    pub message: String,
    pub is_timeout: bool,
    pub is_cancelled: bool,
}

impl From<&Error> for FailureSummary {
    fn from(error: &Error) -> Self {
        let cause_kind = match error {
            Error::GenerationFailed(failed) => Some(failed.cause_kind_name()),
            _ => None,
        };
        Self {
            kind: error.kind_name().to_string(),
            cause_kind,
            message: error.to_string(),
            is_timeout: error.is_timeout(),
            is_cancelled: error.is_cancelled(),
        }
    }
}

/// A request failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFailed {
    #[serde(flatten)]
    pub info: RequestInfo,
    pub error: FailureSummary,
}

/// Event published on the bus.
#[derive(Debug, Clone)]
pub enum LlmServiceEvent {
    RequestSucceeded(Arc<RequestSucceeded>),
    RequestFailed(Arc<RequestFailed>),
}

impl LlmServiceEvent {
    /// Shared request data.
    pub fn info(&self) -> &RequestInfo {
        match self {
            Self::RequestSucceeded(e) => &e.info,
            Self::RequestFailed(e) => &e.info,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::RequestSucceeded(_))
    }
}

/// Publish/subscribe handle for [`LlmServiceEvent`]s. Cloning yields a
/// handle to the same bus.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LlmServiceEvent>,
}

impl EventBus {
    /// Create new bus with channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LlmServiceEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a counting helper.
    pub fn track(&self) -> EventsTracker {
        EventsTracker::new(self.subscribe())
    }

    /// Get number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: LlmServiceEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

/// Counts of received events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub succeeded: usize,
    pub failed: usize,
}

/// Subscriber that keeps every event it received.
#[derive(Debug)]
pub struct EventsTracker {
    receiver: broadcast::Receiver<LlmServiceEvent>,
    events: Vec<LlmServiceEvent>,
    lagged: u64,
}

impl EventsTracker {
    pub fn new(receiver: broadcast::Receiver<LlmServiceEvent>) -> Self {
        Self {
            receiver,
            events: Vec::new(),
            lagged: 0,
        }
    }

    /// Pull every pending event and return all events received so far.
    pub fn drain(&mut self) -> &[LlmServiceEvent] {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => self.events.push(event),
                Err(TryRecvError::Lagged(skipped)) => self.lagged += skipped,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        &self.events
    }

    /// Counts of events received so far.
    pub fn counts(&mut self) -> EventCounts {
        self.drain()
            .iter()
            .fold(EventCounts::default(), |mut counts, event| {
                if event.is_success() {
                    counts.succeeded += 1;
                } else {
                    counts.failed += 1;
                }
                counts
            })
    }

    /// Events lost because the subscriber fell behind.
    pub fn lagged(&self) -> u64 {
        self.lagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackendError;
    use serde_json::json;

    fn info() -> RequestInfo {
        RequestInfo {
            request_id: Uuid::new_v4(),
            service_name: "MockLLMService".to_string(),
            model_id: "mock".to_string(),
            params: json!({}),
            analyzed_chat: None,
            choices: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(LlmServiceEvent::RequestSucceeded(Arc::new(RequestSucceeded {
            info: info(),
            generated: GeneratedRawContent::default(),
        })));
    }

    #[test]
    fn test_tracker_counts() {
        let bus = EventBus::new(8);
        let mut tracker = bus.track();
        let error = Error::generation_failed(BackendError::timeout(10));

        bus.publish(LlmServiceEvent::RequestFailed(Arc::new(RequestFailed {
            info: info(),
            error: FailureSummary::from(&error),
        })));
        bus.publish(LlmServiceEvent::RequestSucceeded(Arc::new(RequestSucceeded {
            info: info(),
            generated: GeneratedRawContent::default(),
        })));

        assert_eq!(tracker.counts(), EventCounts { succeeded: 1, failed: 1 });
        let LlmServiceEvent::RequestFailed(failed) = &tracker.drain()[0] else {
            panic!("expected a failure first");
        };
        assert!(failed.error.is_timeout);
        assert_eq!(failed.error.cause_kind.as_deref(), Some("TimeoutError"));
    }

    #[test]
    fn test_independent_buses() {
        let first = EventBus::new(8);
        let second = EventBus::new(8);
        let mut tracker = second.track();
        first.publish(LlmServiceEvent::RequestSucceeded(Arc::new(RequestSucceeded {
            info: info(),
            generated: GeneratedRawContent::default(),
        })));
        assert_eq!(tracker.counts(), EventCounts::default());
    }
}
