// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Node directory: cluster membership with liveness timeout.
//!
//! Nodes join through heartbeats or replicated descriptors and leave only
//! through the timeout sweep. There is no generic expiry.
//!
//! ```text
//! heartbeat(unknown) ──► Joined ──┐
//! heartbeat(known)   ──► Refreshed│  (update_from: last_connected, description)
//!                                 ▼
//!                 sweep(now, timeout): now - last_connected >= timeout ──► evicted
//! ```

use crate::clock::Clock;
use crate::error::Result;
use crate::merge::MergeOutcome;
use crate::metrics;
use crate::record::{NodeDescriptor, NodeKey, Record, Timestamp};
use crate::store::RecordStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What a heartbeat did to the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// Previously unknown node inserted.
    Joined,
    /// Known node's last-connected and description refreshed.
    Refreshed,
}

/// Set of known cluster nodes.
#[derive(Default)]
pub struct NodeDirectory {
    nodes: RecordStore<NodeDescriptor>,
}

impl NodeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a heartbeat or announcement received at `now`.
    ///
    /// The announcement's `last_connected` is used when present, otherwise
    /// `now`. The stored descriptor is re-stamped so the change replicates.
    pub fn heartbeat(&self, announcement: &NodeDescriptor, now: Timestamp) -> Result<(HeartbeatOutcome, NodeDescriptor)> {
        let key = announcement.key();
        let mut incoming = announcement.clone();
        if incoming.last_connected().is_none() {
            incoming.mark_connected(now);
        }

        incoming.touch(now);
        let (inserted, stored) = self.nodes.upsert(incoming, |existing, incoming| {
            existing.update_from(incoming)?;
            existing.touch(now);
            Ok(())
        })?;

        if inserted {
            info!(node = %key, "Node joined");
            metrics::set_known_nodes(self.nodes.len());
            Ok((HeartbeatOutcome::Joined, stored))
        } else {
            debug!(node = %key, "Node heartbeat");
            Ok((HeartbeatOutcome::Refreshed, stored))
        }
    }

    /// Merge a descriptor replicated from a peer.
    pub fn merge_remote(&self, remote: NodeDescriptor) -> Result<MergeOutcome> {
        let outcome = self.nodes.merge(remote)?;
        if outcome == MergeOutcome::Inserted {
            metrics::set_known_nodes(self.nodes.len());
        }
        Ok(outcome)
    }

    /// Evict every node whose last contact is at least `timeout` old.
    ///
    /// Returns the evicted descriptors. Each node is re-checked under its
    /// identity lock, so a heartbeat racing the sweep keeps the node.
    pub fn sweep(&self, now: Timestamp, timeout: Duration) -> Vec<NodeDescriptor> {
        let candidates = self.nodes.filter(|n| n.has_timed_out(now, timeout));
        let evicted: Vec<NodeDescriptor> = candidates
            .iter()
            .filter_map(|n| self.nodes.remove_if(&n.key(), |current| current.has_timed_out(now, timeout)))
            .collect();

        for node in &evicted {
            warn!(
                node = %node.key(),
                last_connected = ?node.last_connected(),
                timeout_ms = timeout.as_millis() as u64,
                "Node timed out, evicting"
            );
        }
        if !evicted.is_empty() {
            metrics::record_node_evictions(evicted.len());
            metrics::set_known_nodes(self.nodes.len());
        }
        evicted
    }

    /// Run the periodic sweep until `shutdown_rx` flips to true.
    pub async fn run_sweeper(
        self: Arc<Self>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        timeout: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        debug!("Node sweeper stopping");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.sweep(clock.now_millis(), timeout);
                }
            }
        }
    }

    pub fn get(&self, key: &NodeKey) -> Option<NodeDescriptor> {
        self.nodes.get(key)
    }

    pub fn is_known(&self, key: &NodeKey) -> bool {
        self.nodes.contains(key)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn snapshot(&self) -> Vec<NodeDescriptor> {
        self.nodes.snapshot()
    }
}
