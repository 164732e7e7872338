// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription queue: ordered, bounded pending events.
//!
//! Events are delivered in enqueue order. When the queue grows past its
//! threshold the **oldest** events are discarded so newer arrivals get in,
//! even if the oldest one is currently the head in backoff.

use crate::record::Event;
use std::collections::VecDeque;

/// Pending events for one subscription.
#[derive(Debug)]
pub struct SubscriptionQueue {
    events: VecDeque<Event>,
    threshold: usize,
}

impl SubscriptionQueue {
    /// Create an empty queue that holds at most `threshold` events (minimum 1).
    pub fn new(threshold: usize) -> Self {
        Self {
            events: VecDeque::new(),
            threshold: threshold.max(1),
        }
    }

    /// Append an event at the tail.
    ///
    /// Returns the events discarded from the front to bring the queue back
    /// within its threshold, oldest first.
    pub fn push(&mut self, event: Event) -> Vec<Event> {
        self.events.push_back(event);
        let excess = self.events.len().saturating_sub(self.threshold);
        self.events.drain(..excess).collect()
    }

    /// The event next in line for delivery.
    pub fn head(&self) -> Option<&Event> {
        self.events.front()
    }

    /// Remove the head event.
    pub fn pop_head(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Remove all events, returning them oldest first.
    pub fn clear(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }
}
