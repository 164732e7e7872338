// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cluster node descriptors.

use super::{AnyRecord, Record, RecordKind, Timestamp};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identity of a cluster node: DNS name and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeKey {
    pub dns: String,
    pub port: u16,
}

impl NodeKey {
    pub fn new(dns: impl Into<String>, port: u16) -> Self {
        Self {
            dns: dns.into(),
            port,
        }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dns, self.port)
    }
}

/// A member of the cluster as seen by the local node.
///
/// Identity excludes `last_connected` and `description`, so two descriptors
/// for the same host and port always match regardless of how fresh they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    dns: String,
    port: u16,
    #[serde(default)]
    description: String,
    #[serde(default)]
    last_connected: Option<Timestamp>,
    #[serde(default)]
    last_change: Option<Timestamp>,
}

impl NodeDescriptor {
    pub fn new(dns: impl Into<String>, port: u16, description: impl Into<String>) -> Self {
        Self {
            dns: dns.into(),
            port,
            description: description.into(),
            last_connected: None,
            last_change: None,
        }
    }

    #[must_use]
    pub fn connected_at(mut self, at: Timestamp) -> Self {
        self.last_connected = Some(at);
        self
    }

    #[must_use]
    pub fn stamped(mut self, at: Timestamp) -> Self {
        self.last_change = Some(at);
        self
    }

    pub fn dns(&self) -> &str {
        &self.dns
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn last_connected(&self) -> Option<Timestamp> {
        self.last_connected
    }

    /// Record a successful contact.
    pub fn mark_connected(&mut self, at: Timestamp) {
        self.last_connected = Some(at);
    }

    /// True when `now - last_connected >= timeout`.
    ///
    /// A node that has never connected is considered timed out.
    pub fn has_timed_out(&self, now: Timestamp, timeout: Duration) -> bool {
        match self.last_connected {
            Some(last) => now.saturating_sub(last) >= timeout.as_millis() as u64,
            None => true,
        }
    }
}

impl Record for NodeDescriptor {
    type Key = NodeKey;
    const KIND: RecordKind = RecordKind::Node;

    fn key(&self) -> NodeKey {
        NodeKey::new(&self.dns, self.port)
    }

    fn last_change(&self) -> Option<Timestamp> {
        self.last_change
    }

    fn touch(&mut self, at: Timestamp) {
        self.last_change = Some(at);
    }

    fn merge_favor_other(&mut self, other: &Self) {
        self.dns.clone_from(&other.dns);
        self.port = other.port;
        self.description.clone_from(&other.description);
        self.last_connected = other.last_connected;
        self.last_change = other.last_change;
    }

    fn update_from(&mut self, other: &Self) -> Result<()> {
        self.last_connected = other.last_connected;
        self.description.clone_from(&other.description);
        Ok(())
    }

    fn from_any(any: AnyRecord) -> Option<Self> {
        match any {
            AnyRecord::Node(n) => Some(n),
            _ => None,
        }
    }
}
