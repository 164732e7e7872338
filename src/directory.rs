// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared directory state.
//!
//! One [`RecordStore`] per record kind plus the [`NodeDirectory`]. Every
//! change that actually alters local state is published on a broadcast
//! change feed tagged with its origin, so the replicator can forward local
//! changes to peers without echoing remote ones back.
//!
//! ```text
//!   local action ──► upsert_local / update_local ──┐
//!                                                  ├──► RecordStore::merge ──► changed? ──► feed
//!   peer snapshot ──► apply_remote ────────────────┘
//! ```

use crate::delivery::ReceiptSink;
use crate::error::{BrokerError, Result};
use crate::merge::MergeOutcome;
use crate::node::{HeartbeatOutcome, NodeDirectory};
use crate::record::{
    AnyRecord, Delivery, NodeDescriptor, Record, Subscription, SubscriptionKey, Timestamp, Topic, TopicKey,
    User,
};
use crate::store::RecordStore;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Where a directory change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Created or updated on this node.
    Local,
    /// Adopted from a peer snapshot.
    Remote,
}

/// One entry on the change feed.
#[derive(Debug, Clone)]
pub struct DirectoryChange {
    pub origin: ChangeOrigin,
    /// The record as stored after the change.
    pub record: AnyRecord,
}

/// Users, topics, subscriptions, delivery receipts and cluster nodes.
pub struct Directory {
    topics: RecordStore<Topic>,
    subscriptions: RecordStore<Subscription>,
    users: RecordStore<User>,
    deliveries: RecordStore<Delivery>,
    nodes: Arc<NodeDirectory>,
    changes: broadcast::Sender<DirectoryChange>,
}

impl Directory {
    pub fn new(change_feed_capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(change_feed_capacity.max(1));
        Self {
            topics: RecordStore::new(),
            subscriptions: RecordStore::new(),
            users: RecordStore::new(),
            deliveries: RecordStore::new(),
            nodes: Arc::new(NodeDirectory::new()),
            changes,
        }
    }

    /// Receive every subsequent change.
    pub fn subscribe(&self) -> broadcast::Receiver<DirectoryChange> {
        self.changes.subscribe()
    }

    /// Merge a record into the store of its kind.
    ///
    /// A change is published only when the merge inserted or adopted.
    /// Remote records of an identity removed here are ignored unless they
    /// are strictly newer than the removal. A local write always goes through.
    pub fn apply(&self, record: AnyRecord, origin: ChangeOrigin) -> Result<MergeOutcome> {
        if origin == ChangeOrigin::Local {
            self.forget_removal(&record);
        }

        let outcome = match &record {
            AnyRecord::Topic(r) => self.topics.merge(r.clone())?,
            AnyRecord::Subscription(r) => self.subscriptions.merge(r.clone())?,
            AnyRecord::User(r) => self.users.merge(r.clone())?,
            AnyRecord::Node(r) => self.nodes.merge_remote(r.clone())?,
            AnyRecord::Delivery(r) => self.deliveries.merge(r.clone())?,
        };

        if outcome.changed() {
            debug!(
                kind = %record.kind(),
                identity = %record.identity(),
                outcome = %outcome,
                origin = ?origin,
                "Directory changed"
            );
            self.publish(origin, record);
        }
        Ok(outcome)
    }

    /// Insert or merge a locally created record.
    pub fn upsert_local(&self, record: impl Into<AnyRecord>) -> Result<MergeOutcome> {
        self.apply(record.into(), ChangeOrigin::Local)
    }

    /// Merge a record received from a peer.
    pub fn apply_remote(&self, record: AnyRecord) -> Result<MergeOutcome> {
        self.apply(record, ChangeOrigin::Remote)
    }

    /// Copy the non-identity attributes of `record` into the stored record
    /// with the same identity and re-stamp it at `now`.
    ///
    /// Fails with `NotFound` if no such record exists, and with
    /// `UnsupportedOperation` for delivery receipts.
    pub fn update_local(&self, record: AnyRecord, now: Timestamp) -> Result<AnyRecord> {
        let updated: AnyRecord = match record {
            AnyRecord::Topic(r) => update_in(&self.topics, &r, now)?.into(),
            AnyRecord::Subscription(r) => update_in(&self.subscriptions, &r, now)?.into(),
            AnyRecord::User(r) => update_in(&self.users, &r, now)?.into(),
            AnyRecord::Delivery(r) => update_in(&self.deliveries, &r, now)?.into(),
            AnyRecord::Node(r) => {
                if !self.nodes.is_known(&r.key()) {
                    return Err(BrokerError::NotFound {
                        kind: NodeDescriptor::KIND,
                        identity: r.key().to_string(),
                    });
                }
                self.nodes.heartbeat(&r, now)?.1.into()
            }
        };

        self.publish(ChangeOrigin::Local, updated.clone());
        Ok(updated)
    }

    /// Record a heartbeat or announcement from a cluster node.
    pub fn record_heartbeat(&self, announcement: &NodeDescriptor, now: Timestamp) -> Result<HeartbeatOutcome> {
        let (outcome, stored) = self.nodes.heartbeat(announcement, now)?;
        self.publish(ChangeOrigin::Local, stored.into());
        Ok(outcome)
    }

    /// Remove a topic at `now`. Removal is local and is not replicated.
    ///
    /// Peer copies stamped at or before the removal are ignored afterwards.
    pub fn remove_topic(&self, key: &TopicKey, now: Timestamp) -> Option<Topic> {
        let removed = self.topics.remove_at(key, now);
        if removed.is_some() {
            info!(topic = %key, "Topic removed");
        }
        removed
    }

    /// Remove a subscription at `now`. Removal is local and is not replicated.
    ///
    /// Peer copies stamped at or before the removal are ignored afterwards.
    pub fn remove_subscription(&self, key: &SubscriptionKey, now: Timestamp) -> Option<Subscription> {
        let removed = self.subscriptions.remove_at(key, now);
        if removed.is_some() {
            info!(subscription = %key, "Subscription removed");
        }
        removed
    }

    fn forget_removal(&self, record: &AnyRecord) {
        match record {
            AnyRecord::Topic(r) => self.topics.forget_removal(&r.key()),
            AnyRecord::Subscription(r) => self.subscriptions.forget_removal(&r.key()),
            // Only topics and subscriptions are removed explicitly
            AnyRecord::User(_) | AnyRecord::Delivery(_) | AnyRecord::Node(_) => {}
        }
    }

    fn publish(&self, origin: ChangeOrigin, record: AnyRecord) {
        // No receivers is fine: nothing attached yet
        let _ = self.changes.send(DirectoryChange { origin, record });
    }

    pub fn topic(&self, key: &TopicKey) -> Option<Topic> {
        self.topics.get(key)
    }

    /// Whether any owner has a topic with this name.
    pub fn has_topic_named(&self, name: &str) -> bool {
        !self.topics.filter(|t| t.name() == name).is_empty()
    }

    pub fn subscription(&self, key: &SubscriptionKey) -> Option<Subscription> {
        self.subscriptions.get(key)
    }

    pub fn subscriptions_for_topic(&self, topic: &str) -> Vec<Subscription> {
        self.subscriptions.filter(|s| s.topic() == topic)
    }

    pub fn user(&self, name: &str) -> Option<User> {
        self.users.get(&name.to_string())
    }

    pub fn delivery(&self, guid: &str) -> Option<Delivery> {
        self.deliveries.get(&guid.to_string())
    }

    /// Receipts recorded for one event, in no particular order.
    pub fn deliveries_for_event(&self, event_id: &str) -> Vec<Delivery> {
        self.deliveries.filter(|d| d.event_id() == event_id)
    }

    pub fn topics(&self) -> Vec<Topic> {
        self.topics.snapshot()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.snapshot()
    }

    pub fn users(&self) -> Vec<User> {
        self.users.snapshot()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.snapshot()
    }

    pub fn nodes(&self) -> &Arc<NodeDirectory> {
        &self.nodes
    }

    /// Every record of every kind, for anti-entropy pushes.
    pub fn snapshot_all(&self) -> Vec<AnyRecord> {
        let mut all = Vec::with_capacity(
            self.users.len() + self.topics.len() + self.subscriptions.len() + self.nodes.len() + self.deliveries.len(),
        );
        // Users and topics first so a receiver sees referents before referrers
        all.extend(self.users.snapshot().into_iter().map(AnyRecord::from));
        all.extend(self.topics.snapshot().into_iter().map(AnyRecord::from));
        all.extend(self.subscriptions.snapshot().into_iter().map(AnyRecord::from));
        all.extend(self.nodes.snapshot().into_iter().map(AnyRecord::from));
        all.extend(self.deliveries.snapshot().into_iter().map(AnyRecord::from));
        all
    }
}

fn update_in<R: Record>(store: &RecordStore<R>, incoming: &R, now: Timestamp) -> Result<R> {
    store.update(&incoming.key(), |existing| {
        existing.update_from(incoming)?;
        existing.touch(now);
        Ok(())
    })
}

impl ReceiptSink for Directory {
    fn record_delivery(&self, receipt: Delivery) -> Result<()> {
        self.upsert_local(receipt).map(|_| ())
    }
}
