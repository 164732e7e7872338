// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Topics: named channels that publishers write events into.

use super::{AnyRecord, Record, RecordKind, Timestamp};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a topic's events are acknowledged across the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RemotePolicy {
    /// Accept as soon as the local node has the event.
    #[default]
    Immediate,
    /// Accept once a peer acknowledges receipt.
    Acknowledged,
    /// Accept once a peer has persisted the event.
    Written,
}

/// Identity of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicKey {
    pub name: String,
    pub owner: String,
}

impl TopicKey {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
        }
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.owner)
    }
}

/// A topic, created by a publisher-category user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    name: String,
    owner: String,
    #[serde(default)]
    remote_policy: RemotePolicy,
    #[serde(default)]
    last_change: Option<Timestamp>,
}

impl Topic {
    /// Create an unstamped topic with the default remote policy.
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            remote_policy: RemotePolicy::default(),
            last_change: None,
        }
    }

    #[must_use]
    pub fn with_remote_policy(mut self, policy: RemotePolicy) -> Self {
        self.remote_policy = policy;
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

    pub fn remote_policy(&self) -> RemotePolicy {
        self.remote_policy
    }
}

impl Record for Topic {
    type Key = TopicKey;
    const KIND: RecordKind = RecordKind::Topic;

    fn key(&self) -> TopicKey {
        TopicKey::new(&self.name, &self.owner)
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
        self.remote_policy = other.remote_policy;
        self.last_change = other.last_change;
    }

    fn update_from(&mut self, other: &Self) -> Result<()> {
        self.remote_policy = other.remote_policy;
        Ok(())
    }

    fn from_any(any: AnyRecord) -> Option<Self> {
        match any {
            AnyRecord::Topic(t) => Some(t),
            _ => None,
        }
    }
}
