// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscriptions: delivery endpoints registered against a topic.
//!
//! # Error Policies
//!
//! When the transport fails to deliver the head event of a subscription's
//! queue, the subscription's [`ErrorPolicy`] decides what happens next:
//!
//! | Policy | Outcome |
//! |--------|---------|
//! | `Drop` | Event removed immediately; no receipt, no retry, no dead letter |
//! | `Retry` | Event stays at the head, redelivered with doubling delay; dropped after max attempts |
//! | `DeadLetter` | Event id appended to the dead-letter store; discarded if the store is full |

use super::{AnyRecord, Record, RecordKind, Timestamp};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-subscription strategy for delivery failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorPolicy {
    #[default]
    Drop,
    Retry,
    DeadLetter,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorPolicy::Drop => write!(f, "drop"),
            ErrorPolicy::Retry => write!(f, "retry"),
            ErrorPolicy::DeadLetter => write!(f, "dead_letter"),
        }
    }
}

/// Identity of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub name: String,
    pub owner: String,
}

impl SubscriptionKey {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.owner)
    }
}

/// A subscription to a topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    name: String,
    owner: String,
    /// Name of the topic this subscription receives events from.
    topic: String,
    /// Where events are delivered.
    delivery_url: String,
    /// Probed while the subscription is deemed offline. Empty disables gating.
    #[serde(default)]
    liveliness_url: String,
    #[serde(default)]
    error_policy: ErrorPolicy,
    #[serde(default)]
    last_change: Option<Timestamp>,
}

impl Subscription {
    /// Create an unstamped subscription with the `Drop` policy and no liveliness URL.
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        topic: impl Into<String>,
        delivery_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            topic: topic.into(),
            delivery_url: delivery_url.into(),
            liveliness_url: String::new(),
            error_policy: ErrorPolicy::default(),
            last_change: None,
        }
    }

    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    #[must_use]
    pub fn with_liveliness_url(mut self, url: impl Into<String>) -> Self {
        self.liveliness_url = url.into();
        self
    }

    #[must_use]
    pub fn stamped(mut self, at: Timestamp) -> Self {
        self.last_change = Some(at);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn delivery_url(&self) -> &str {
        &self.delivery_url
    }

    pub fn liveliness_url(&self) -> Option<&str> {
        if self.liveliness_url.is_empty() {
            None
        } else {
            Some(&self.liveliness_url)
        }
    }

    pub fn error_policy(&self) -> ErrorPolicy {
        self.error_policy
    }
}

impl Record for Subscription {
    type Key = SubscriptionKey;
    const KIND: RecordKind = RecordKind::Subscription;

    fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(&self.name, &self.owner)
    }

    fn last_change(&self) -> Option<Timestamp> {
        self.last_change
    }

    fn touch(&mut self, at: Timestamp) {
        self.last_change = Some(at);
    }

    fn merge_favor_other(&mut self, other: &Self) {
        self.name.clone_from(&other.name);
        self.owner.clone_from(&other.owner);
        self.topic.clone_from(&other.topic);
        self.delivery_url.clone_from(&other.delivery_url);
        self.liveliness_url.clone_from(&other.liveliness_url);
        self.error_policy = other.error_policy;
        self.last_change = other.last_change;
    }

    fn update_from(&mut self, other: &Self) -> Result<()> {
        self.topic.clone_from(&other.topic);
        self.delivery_url.clone_from(&other.delivery_url);
        self.liveliness_url.clone_from(&other.liveliness_url);
        self.error_policy = other.error_policy;
        Ok(())
    }

    fn from_any(any: AnyRecord) -> Option<Self> {
        match any {
            AnyRecord::Subscription(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub() -> Subscription {
        Subscription::new("orders-sub", "bob", "orders", "http://bob/events")
    }

    #[test]
    fn test_subscription_defaults() {
        let s = sub();
        assert_eq!(s.error_policy(), ErrorPolicy::Drop);
        assert!(s.liveliness_url().is_none());
        assert!(s.last_change().is_none());
    }

    #[test]
    fn test_subscription_matches_on_name_and_owner() {
        let a = sub();
        let b = sub()
            .with_error_policy(ErrorPolicy::Retry)
            .with_liveliness_url("http://bob/ping")
            .stamped(5);
        assert!(a.matches(&b));
        assert!(!a.equals(&b));

        let c = Subscription::new("orders-sub", "carol", "orders", "http://bob/events");
        assert!(!a.matches(&c));
    }

    #[test]
    fn test_subscription_merge_favor_other_copies_everything() {
        let mut local = sub().stamped(1);
        let remote = sub()
            .with_error_policy(ErrorPolicy::DeadLetter)
            .with_liveliness_url("http://bob/ping")
            .stamped(2);
        local.merge_favor_other(&remote);
        assert_eq!(local, remote);
    }

    #[test]
    fn test_subscription_update_from() {
        let mut local = sub().stamped(1);
        let other = Subscription::new("ignored", "ignored", "payments", "http://bob/v2")
            .with_error_policy(ErrorPolicy::Retry);
        local.update_from(&other).unwrap();

        assert_eq!(local.name(), "orders-sub");
        assert_eq!(local.owner(), "bob");
        assert_eq!(local.topic(), "payments");
        assert_eq!(local.delivery_url(), "http://bob/v2");
        assert_eq!(local.error_policy(), ErrorPolicy::Retry);
    }

    #[test]
    fn test_error_policy_display() {
        assert_eq!(ErrorPolicy::Drop.to_string(), "drop");
        assert_eq!(ErrorPolicy::Retry.to_string(), "retry");
        assert_eq!(ErrorPolicy::DeadLetter.to_string(), "dead_letter");
    }
}
