// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Dead-letter store: bounded, append-only event ids.

/// Ids of events that could not be delivered to one subscription.
///
/// Once at capacity, new ids are rejected and existing entries are kept.
/// There is no eviction.
#[derive(Debug)]
pub struct DeadLetterStore {
    ids: Vec<String>,
    capacity: usize,
}

impl DeadLetterStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: Vec::new(),
            capacity,
        }
    }

    /// Append an event id. Returns `false` if the store is full and the id
    /// was discarded.
    pub fn add(&mut self, event_id: impl Into<String>) -> bool {
        if self.is_full() {
            return false;
        }
        self.ids.push(event_id.into());
        true
    }

    /// Stored ids in insertion order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn contains(&self, event_id: &str) -> bool {
        self.ids.iter().any(|id| id == event_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ids.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_two_keeps_first_two() {
        let mut store = DeadLetterStore::new(2);
        assert!(store.add("e1"));
        assert!(store.add("e2"));
        assert!(!store.add("e3"));

        assert_eq!(store.ids(), &["e1".to_string(), "e2".to_string()]);
        assert!(!store.contains("e3"));
        assert!(store.is_full());
    }

    #[test]
    fn test_zero_capacity_rejects_everything() {
        let mut store = DeadLetterStore::new(0);
        assert!(!store.add("e1"));
        assert!(store.is_empty());
    }
}
