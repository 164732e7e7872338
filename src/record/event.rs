// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use super::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A published event. Write-once: no merge, no update, never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    guid: String,
    topic: String,
    payload: Vec<u8>,
    created: Timestamp,
}

impl Event {
    /// Create an event with a fresh id.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>, created: Timestamp) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), topic, payload, created)
    }

    /// Create an event with a caller-supplied id.
    pub fn with_id(
        guid: impl Into<String>,
        topic: impl Into<String>,
        payload: impl Into<Vec<u8>>,
        created: Timestamp,
    ) -> Self {
        Self {
            guid: guid.into(),
            topic: topic.into(),
            payload: payload.into(),
            created,
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn created(&self) -> Timestamp {
        self.created
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_ids_are_unique() {
        let a = Event::new("orders", b"one".to_vec(), 1);
        let b = Event::new("orders", b"one".to_vec(), 1);
        assert_ne!(a.guid(), b.guid());
        assert_eq!(a.payload(), b"one");
    }

    #[test]
    fn test_event_with_id() {
        let e = Event::with_id("evt-1", "orders", "hello", 5);
        assert_eq!(e.guid(), "evt-1");
        assert_eq!(e.topic(), "orders");
        assert_eq!(e.created(), 5);
    }
}
