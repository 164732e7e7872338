// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delivery receipts.

use super::{immutable, AnyRecord, Record, RecordKind, Timestamp};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Proof that an event reached a subscription's endpoint.
///
/// Receipts are write-once: they take part in replication so peers learn
/// about them, but [`Record::update_from`] always fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    guid: String,
    event_id: String,
    delivered_at: Timestamp,
    subscription: String,
    #[serde(default)]
    last_change: Option<Timestamp>,
}

impl Delivery {
    /// Create a receipt with a fresh id, stamped at the delivery time.
    pub fn new(event_id: impl Into<String>, subscription: impl Into<String>, delivered_at: Timestamp) -> Self {
        Self {
            guid: Uuid::new_v4().to_string(),
            event_id: event_id.into(),
            delivered_at,
            subscription: subscription.into(),
            last_change: Some(delivered_at),
        }
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn delivered_at(&self) -> Timestamp {
        self.delivered_at
    }

    pub fn subscription(&self) -> &str {
        &self.subscription
    }
}

impl Record for Delivery {
    type Key = String;
    const KIND: RecordKind = RecordKind::Delivery;

    fn key(&self) -> String {
        self.guid.clone()
    }

    fn last_change(&self) -> Option<Timestamp> {
        self.last_change
    }

    fn touch(&mut self, at: Timestamp) {
        self.last_change = Some(at);
    }

    fn merge_favor_other(&mut self, other: &Self) {
        self.guid.clone_from(&other.guid);
        self.event_id.clone_from(&other.event_id);
        self.delivered_at = other.delivered_at;
        self.subscription.clone_from(&other.subscription);
        self.last_change = other.last_change;
    }

    fn update_from(&mut self, _other: &Self) -> Result<()> {
        Err(immutable(RecordKind::Delivery, "update_from"))
    }

    fn from_any(any: AnyRecord) -> Option<Self> {
        match any {
            AnyRecord::Delivery(d) => Some(d),
            _ => None,
        }
    }
}
