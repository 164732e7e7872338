// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicated records.
//!
//! Every piece of shared directory state (users, topics, subscriptions,
//! node membership, delivery receipts) implements [`Record`]. The trait
//! captures the three operations the merge protocol needs:
//!
//! - **`matches`**: identity equality, considering only the identity key
//! - **`equals`**: full equality, identity + attributes + timestamp
//! - **`merge_favor_other`**: adopt every attribute of the other side,
//!   including its timestamp
//!
//! The [`AnyRecord`] enum is the tagged form used on the wire and by the
//! directory, so a snapshot can be routed to the right store and a
//! cross-kind merge is reported as [`BrokerError::TypeMismatch`].
//!
//! ```text
//!                ┌──────────── identity key ────────────┐
//! Topic          │ name + owner                         │ remote_policy
//! Subscription   │ name + owner                         │ topic, urls, error_policy
//! User           │ name                                 │ category, description, pem
//! NodeDescriptor │ dns + port                           │ description, last_connected
//! Delivery       │ guid                                 │ event_id, delivered_at, subscription
//!                └──────────────────────────────────────┘
//! ```

mod delivery;
mod event;
mod node;
mod subscription;
mod topic;
mod user;

pub use delivery::Delivery;
pub use event::Event;
pub use node::{NodeDescriptor, NodeKey};
pub use subscription::{ErrorPolicy, Subscription, SubscriptionKey};
pub use topic::{RemotePolicy, Topic, TopicKey};
pub use user::{User, UserCategory};

use crate::error::{BrokerError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;

/// Epoch milliseconds. `None` on a record means "never modified".
pub type Timestamp = u64;

/// Concrete record kind, used for dispatch and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Topic,
    Subscription,
    User,
    Node,
    Delivery,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Topic => write!(f, "topic"),
            RecordKind::Subscription => write!(f, "subscription"),
            RecordKind::User => write!(f, "user"),
            RecordKind::Node => write!(f, "node"),
            RecordKind::Delivery => write!(f, "delivery"),
        }
    }
}

/// Contract shared by every replicated entity.
///
/// `PartialEq` is the full-equality relation (`equals`): derived
/// implementations compare every field, timestamp included.
pub trait Record: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Fields that define "the same logical record".
    type Key: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Concrete kind of this record.
    const KIND: RecordKind;

    /// Identity key of this record.
    fn key(&self) -> Self::Key;

    /// Last-modified timestamp, `None` if never modified.
    fn last_change(&self) -> Option<Timestamp>;

    /// Set the last-modified timestamp.
    fn touch(&mut self, at: Timestamp);

    /// Identity equality. Never considers the timestamp.
    fn matches(&self, other: &Self) -> bool {
        self.key() == other.key()
    }

    /// Full equality: identity, attributes, and timestamp.
    fn equals(&self, other: &Self) -> bool {
        self == other
    }

    /// Overwrite every attribute with `other`'s, including the timestamp.
    fn merge_favor_other(&mut self, other: &Self);

    /// Copy the non-identity attributes of `other` into `self`.
    ///
    /// Does not touch the timestamp; callers re-stamp after a local update.
    fn update_from(&mut self, other: &Self) -> Result<()>;

    /// Unwrap from the tagged form, `None` if the kind differs.
    fn from_any(any: AnyRecord) -> Option<Self>;
}

/// Tagged variant over every replicated record kind.
///
/// Serializes as `{"kind": "...", "record": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum AnyRecord {
    Topic(Topic),
    Subscription(Subscription),
    User(User),
    Node(NodeDescriptor),
    Delivery(Delivery),
}

impl AnyRecord {
    /// Kind of the wrapped record.
    pub fn kind(&self) -> RecordKind {
        match self {
            AnyRecord::Topic(_) => RecordKind::Topic,
            AnyRecord::Subscription(_) => RecordKind::Subscription,
            AnyRecord::User(_) => RecordKind::User,
            AnyRecord::Node(_) => RecordKind::Node,
            AnyRecord::Delivery(_) => RecordKind::Delivery,
        }
    }

    /// Display form of the wrapped record's identity key.
    pub fn identity(&self) -> String {
        match self {
            AnyRecord::Topic(r) => r.key().to_string(),
            AnyRecord::Subscription(r) => r.key().to_string(),
            AnyRecord::User(r) => r.key(),
            AnyRecord::Node(r) => r.key().to_string(),
            AnyRecord::Delivery(r) => r.key(),
        }
    }

    /// Last-modified timestamp of the wrapped record.
    pub fn last_change(&self) -> Option<Timestamp> {
        match self {
            AnyRecord::Topic(r) => r.last_change(),
            AnyRecord::Subscription(r) => r.last_change(),
            AnyRecord::User(r) => r.last_change(),
            AnyRecord::Node(r) => r.last_change(),
            AnyRecord::Delivery(r) => r.last_change(),
        }
    }

    /// Identity equality across the tagged form. Different kinds never match.
    pub fn matches(&self, other: &AnyRecord) -> bool {
        match (self, other) {
            (AnyRecord::Topic(a), AnyRecord::Topic(b)) => a.matches(b),
            (AnyRecord::Subscription(a), AnyRecord::Subscription(b)) => a.matches(b),
            (AnyRecord::User(a), AnyRecord::User(b)) => a.matches(b),
            (AnyRecord::Node(a), AnyRecord::Node(b)) => a.matches(b),
            (AnyRecord::Delivery(a), AnyRecord::Delivery(b)) => a.matches(b),
            _ => false,
        }
    }

    /// Re-stamp the wrapped record.
    pub fn touch(&mut self, at: Timestamp) {
        match self {
            AnyRecord::Topic(r) => r.touch(at),
            AnyRecord::Subscription(r) => r.touch(at),
            AnyRecord::User(r) => r.touch(at),
            AnyRecord::Node(r) => r.touch(at),
            AnyRecord::Delivery(r) => r.touch(at),
        }
    }
}

macro_rules! impl_from_record {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AnyRecord {
                fn from(record: $ty) -> Self {
                    AnyRecord::$variant(record)
                }
            }
        )*
    };
}

impl_from_record! {
    Topic => Topic,
    Subscription => Subscription,
    User => User,
    Node => NodeDescriptor,
    Delivery => Delivery,
}

/// Build the `UnsupportedOperation` error for write-once records.
pub(crate) fn immutable(kind: RecordKind, operation: &'static str) -> BrokerError {
    BrokerError::UnsupportedOperation { kind, operation }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_display() {
        assert_eq!(RecordKind::Topic.to_string(), "topic");
        assert_eq!(RecordKind::Subscription.to_string(), "subscription");
        assert_eq!(RecordKind::User.to_string(), "user");
        assert_eq!(RecordKind::Node.to_string(), "node");
        assert_eq!(RecordKind::Delivery.to_string(), "delivery");
    }

    #[test]
    fn test_any_record_kind_and_identity() {
        let any: AnyRecord = Topic::new("orders", "alice").into();
        assert_eq!(any.kind(), RecordKind::Topic);
        assert_eq!(any.identity(), "orders@alice");

        let any: AnyRecord = NodeDescriptor::new("node1.example.com", 6789, "primary").into();
        assert_eq!(any.kind(), RecordKind::Node);
        assert_eq!(any.identity(), "node1.example.com:6789");
    }

    #[test]
    fn test_any_record_matches_requires_same_kind() {
        let topic: AnyRecord = Topic::new("orders", "alice").into();
        let user: AnyRecord = User::new("orders", UserCategory::Publisher, "").into();
        assert!(!topic.matches(&user));
        assert!(topic.matches(&topic.clone()));
    }

    #[test]
    fn test_any_record_serde_tagging() {
        let any: AnyRecord = User::new("bob", UserCategory::Subscriber, "reader").into();
        let json = serde_json::to_string(&any).unwrap();
        assert!(json.contains("\"kind\":\"user\""));

        let parsed: AnyRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, any);
    }

    #[test]
    fn test_from_any_rejects_other_kind() {
        let any: AnyRecord = Topic::new("orders", "alice").into();
        assert!(User::from_any(any.clone()).is_none());
        assert!(Topic::from_any(any).is_some());
    }
}
