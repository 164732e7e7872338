// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record replication between cluster nodes.
//!
//! # Snapshot format
//!
//! Each frame is one JSON-encoded [`Snapshot`]: the originating node, the
//! tagged record, and the SHA-256 hex digest of the record's canonical JSON
//! (object keys sorted). Receivers recompute the digest and reject the frame
//! with [`BrokerError::IntegrityMismatch`] before it reaches the merge.
//!
//! # Tasks per peer
//!
//! ```text
//!             ┌──────── outbox ────────┐
//!  change feed│ Local changes only     │──► channel.send(frame)
//!             └────────────────────────┘
//!             ┌──────── intake ────────┐
//!  channel ──►│ rate limit → decode →  │──► Directory::apply_remote
//!             │ verify → merge         │    (subscriptions also reach the engine)
//!             └────────────────────────┘
//!  anti-entropy: every interval, push every local record to every peer
//! ```
//!
//! Remote changes are never forwarded, so two nodes cannot echo a record
//! back and forth. Nodes that are not directly attached converge through
//! anti-entropy of the nodes in between.

use crate::clock::Clock;
use crate::config::ReplicationSettings;
use crate::delivery::{BoxFuture, DeliveryEngine};
use crate::directory::{ChangeOrigin, Directory};
use crate::error::{BrokerError, Result};
use crate::merge::MergeOutcome;
use crate::metrics;
use crate::record::{AnyRecord, RecordKind, Record, Timestamp};
use crate::resilience::RateLimiter;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

// =============================================================================
// Snapshot codec
// =============================================================================

/// One replicated record as exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub origin: String,
    pub record: AnyRecord,
    pub content_hash: String,
}

impl Snapshot {
    /// Wrap a record and compute its digest.
    pub fn seal(origin: impl Into<String>, record: AnyRecord) -> Result<Self> {
        let content_hash = content_hash(&record)?;
        Ok(Self {
            origin: origin.into(),
            record,
            content_hash,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a frame and verify its digest.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let snapshot: Snapshot = serde_json::from_slice(bytes)?;
        snapshot.verify()?;
        Ok(snapshot)
    }

    /// Recompute the digest and compare it with the carried one.
    pub fn verify(&self) -> Result<()> {
        let actual = content_hash(&self.record)?;
        if actual != self.content_hash {
            return Err(BrokerError::IntegrityMismatch {
                expected: self.content_hash.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// SHA-256 hex digest of the record's canonical JSON.
///
/// The record goes through `serde_json::Value` first, whose maps are
/// ordered by key, so the digest does not depend on field order.
pub fn content_hash(record: &AnyRecord) -> Result<String> {
    let canonical = serde_json::to_vec(&serde_json::to_value(record)?)?;
    Ok(hex::encode(Sha256::digest(&canonical)))
}

// =============================================================================
// Channel
// =============================================================================

/// Transport for snapshot frames to and from one peer.
pub trait ReplicationChannel: Send + Sync + 'static {
    /// Identity of the node at the other end.
    fn peer_id(&self) -> &str;

    fn send<'a>(&'a self, frame: Vec<u8>) -> BoxFuture<'a, Result<()>>;

    /// Next frame from the peer, `None` once the channel is closed.
    fn receive<'a>(&'a self) -> BoxFuture<'a, Option<Vec<u8>>>;
}

/// In-process channel pair, for tests and single-process clusters.
pub struct LoopbackChannel {
    peer_id: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl LoopbackChannel {
    /// Connected ends for nodes `a` and `b`. The first end is held by `a`
    /// and talks to `b`.
    pub fn pair(a: &str, b: &str) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                peer_id: b.to_string(),
                tx: a_tx,
                rx: Mutex::new(a_rx),
            },
            Self {
                peer_id: a.to_string(),
                tx: b_tx,
                rx: Mutex::new(b_rx),
            },
        )
    }
}

impl ReplicationChannel for LoopbackChannel {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn send<'a>(&'a self, frame: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.tx
                .send(frame)
                .map_err(|_| BrokerError::Internal(format!("channel to {} closed", self.peer_id)))
        })
    }

    fn receive<'a>(&'a self) -> BoxFuture<'a, Option<Vec<u8>>> {
        Box::pin(async move { self.rx.lock().await.recv().await })
    }
}

// =============================================================================
// Replicator
// =============================================================================

/// A structural merge failure retained for operator inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictReport {
    pub peer: String,
    pub kind: RecordKind,
    pub identity: String,
    pub error: String,
    pub at: Timestamp,
}

/// Moves snapshots between the local directory and attached peers.
pub struct Replicator {
    local_node_id: String,
    directory: Arc<Directory>,
    engine: Arc<DeliveryEngine>,
    clock: Arc<dyn Clock>,
    settings: ReplicationSettings,
    rate_limiter: Option<RateLimiter>,
    peers: RwLock<Vec<Arc<dyn ReplicationChannel>>>,
    conflicts: Mutex<VecDeque<ConflictReport>>,
}

impl Replicator {
    pub fn new(
        local_node_id: impl Into<String>,
        directory: Arc<Directory>,
        engine: Arc<DeliveryEngine>,
        clock: Arc<dyn Clock>,
        settings: ReplicationSettings,
    ) -> Self {
        let rate_limiter = settings.rate_limit_config().map(|cfg| {
            info!(
                rate_per_sec = cfg.refill_rate,
                burst = cfg.burst_size,
                "Rate limiting enabled for snapshot intake"
            );
            RateLimiter::new(cfg)
        });

        Self {
            local_node_id: local_node_id.into(),
            directory,
            engine,
            clock,
            settings,
            rate_limiter,
            peers: RwLock::new(Vec::new()),
            conflicts: Mutex::new(VecDeque::new()),
        }
    }

    /// Register a peer for anti-entropy pushes.
    pub async fn attach(&self, channel: Arc<dyn ReplicationChannel>) {
        self.peers.write().await.push(channel);
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    /// Decode one frame from `peer` and merge it.
    ///
    /// Structural failures are recorded as conflict reports before being
    /// returned.
    pub async fn handle_frame(&self, peer: &str, frame: &[u8]) -> Result<MergeOutcome> {
        let snapshot = match Snapshot::decode(frame) {
            Ok(s) => s,
            Err(e) => {
                warn!(peer, error = %e, "Rejected snapshot");
                metrics::record_snapshot_received(peer, false);
                metrics::record_error("replication", e.label());
                return Err(e);
            }
        };
        metrics::record_snapshot_received(peer, true);

        let kind = snapshot.record.kind();
        let identity = snapshot.record.identity();
        let outcome = match self.directory.apply_remote(snapshot.record.clone()) {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_structural() {
                    error!(peer, kind = %kind, identity = %identity, error = %e, "Unresolvable merge");
                    self.report_conflict(peer, kind, identity, &e).await;
                }
                return Err(e);
            }
        };

        if outcome.changed() {
            debug!(peer, kind = %kind, identity = %identity, outcome = %outcome, "Adopted remote record");
            if let AnyRecord::Subscription(sub) = &snapshot.record {
                if let Some(stored) = self.directory.subscription(&sub.key()) {
                    self.engine.upsert_subscription(stored).await;
                }
            }
        }
        Ok(outcome)
    }

    async fn report_conflict(&self, peer: &str, kind: RecordKind, identity: String, err: &BrokerError) {
        let mut conflicts = self.conflicts.lock().await;
        if conflicts.len() >= self.settings.max_conflict_reports.max(1) {
            conflicts.pop_front();
        }
        conflicts.push_back(ConflictReport {
            peer: peer.to_string(),
            kind,
            identity,
            error: err.to_string(),
            at: self.clock.now_millis(),
        });
    }

    /// Most recent structural failures, oldest first.
    pub async fn conflicts(&self) -> Vec<ConflictReport> {
        self.conflicts.lock().await.iter().cloned().collect()
    }

    async fn send_record(&self, channel: &dyn ReplicationChannel, record: AnyRecord) -> Result<()> {
        let frame = Snapshot::seal(self.local_node_id.as_str(), record)?.encode()?;
        let bytes = frame.len();
        channel.send(frame).await?;
        metrics::record_snapshot_sent(channel.peer_id(), bytes);
        Ok(())
    }

    /// Send every local record to one peer. Returns how many were sent.
    pub async fn push_full_state(&self, channel: &dyn ReplicationChannel) -> Result<usize> {
        let started = Instant::now();
        let records = self.directory.snapshot_all();
        let count = records.len();
        for record in records {
            self.send_record(channel, record).await?;
        }
        metrics::record_anti_entropy(channel.peer_id(), count, started.elapsed());
        debug!(peer = %channel.peer_id(), records = count, "Pushed full state");
        Ok(count)
    }

    /// Receive and merge frames from one peer until shutdown or the channel
    /// closes.
    pub async fn run_intake(self: Arc<Self>, channel: Arc<dyn ReplicationChannel>, mut shutdown_rx: watch::Receiver<bool>) {
        let peer = channel.peer_id().to_string();
        let span = info_span!("replication_intake", peer = %peer);

        async move {
            info!("Starting snapshot intake");
            loop {
                let frame = tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }

                    frame = channel.receive() => frame,
                };

                let Some(frame) = frame else {
                    info!("Peer channel closed");
                    break;
                };

                if let Some(limiter) = &self.rate_limiter {
                    limiter.acquire().await;
                }

                // Errors are logged and counted inside handle_frame
                let _ = self.handle_frame(&peer, &frame).await;
            }
            debug!("Snapshot intake stopped");
        }
        .instrument(span)
        .await
    }

    /// Forward local changes to one peer until shutdown.
    ///
    /// Starts with a full-state push so a newly attached peer catches up.
    pub async fn run_outbox(self: Arc<Self>, channel: Arc<dyn ReplicationChannel>, mut shutdown_rx: watch::Receiver<bool>) {
        let peer = channel.peer_id().to_string();
        let span = info_span!("replication_outbox", peer = %peer);
        let mut changes = self.directory.subscribe();

        async move {
            if let Err(e) = self.push_full_state(channel.as_ref()).await {
                warn!(error = %e, "Initial state push failed");
            }

            loop {
                let change = tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }

                    change = changes.recv() => change,
                };

                match change {
                    Ok(change) if change.origin == ChangeOrigin::Local => {
                        if let Err(e) = self.send_record(channel.as_ref(), change.record).await {
                            warn!(error = %e, "Failed to forward change");
                            metrics::record_error("replication", e.label());
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Change feed lagged, pushing full state");
                        if let Err(e) = self.push_full_state(channel.as_ref()).await {
                            warn!(error = %e, "Full state push failed");
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Snapshot outbox stopped");
        }
        .instrument(span)
        .await
    }

    /// Periodically push full state to every attached peer until shutdown.
    pub async fn run_anti_entropy(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let interval = self.settings.anti_entropy_interval_duration().max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The outbox already pushed on attach
        ticker.tick().await;

        info!(interval_ms = interval.as_millis() as u64, "Starting anti-entropy task");
        loop {
            tokio::select! {
                biased;

                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        debug!("Anti-entropy task stopping");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    let peers: Vec<_> = self.peers.read().await.iter().cloned().collect();
                    let replicator = self.as_ref();
                    let results = futures::future::join_all(peers.iter().map(|channel| async move {
                        (channel.peer_id(), replicator.push_full_state(channel.as_ref()).await)
                    }))
                    .await;
                    for (peer, result) in results {
                        if let Err(e) = result {
                            warn!(peer = %peer, error = %e, "Anti-entropy push failed");
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{DeliveryConfig, LivenessConfig};
    use crate::delivery::{AlwaysOnline, DeliveryTransport, TransportOutcome};
    use crate::record::{Subscription, SubscriptionKey, Topic, User, UserCategory};

    struct Accept;

    impl DeliveryTransport for Accept {
        fn attempt<'a>(&'a self, _url: &'a str, _payload: &'a [u8]) -> BoxFuture<'a, TransportOutcome> {
            Box::pin(async { TransportOutcome::Ok })
        }
    }

    fn replicator() -> (Arc<Replicator>, Arc<Directory>, Arc<DeliveryEngine>) {
        let directory = Arc::new(Directory::new(64));
        let clock = Arc::new(ManualClock::new(100));
        let (_tx, rx) = watch::channel(false);
        let engine = Arc::new(DeliveryEngine::new(
            &DeliveryConfig::for_testing(),
            &LivenessConfig::disabled(),
            Arc::new(Accept),
            Arc::new(AlwaysOnline),
            clock.clone(),
            directory.clone(),
            rx,
        ));
        let settings = ReplicationSettings {
            max_conflict_reports: 2,
            ..ReplicationSettings::for_testing()
        };
        let replicator = Arc::new(Replicator::new("node-a", directory.clone(), engine.clone(), clock, settings));
        (replicator, directory, engine)
    }

    #[test]
    fn test_snapshot_seal_and_decode() {
        let snapshot = Snapshot::seal("node-b", Topic::new("orders", "alice").stamped(3).into()).unwrap();
        assert_eq!(snapshot.content_hash.len(), 64);

        let decoded = Snapshot::decode(&snapshot.encode().unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
    }

    #[test]
    fn test_snapshot_tampered_record_rejected() {
        let mut snapshot = Snapshot::seal("node-b", Topic::new("orders", "alice").stamped(3).into()).unwrap();
        snapshot.record = Topic::new("orders", "mallory").stamped(3).into();

        let err = Snapshot::decode(&snapshot.encode().unwrap()).unwrap_err();
        assert!(matches!(err, BrokerError::IntegrityMismatch { .. }));
    }

    #[test]
    fn test_snapshot_garbage_is_codec_error() {
        let err = Snapshot::decode(b"\x00\xffnot json").unwrap_err();
        assert_eq!(err.label(), "codec");
    }

    #[test]
    fn test_content_hash_is_field_order_independent() {
        let record: AnyRecord = User::new("bob", UserCategory::Subscriber, "reader").stamped(9).into();
        let reordered = r#"{"record":{"last_change":9,"public_key_pem":null,"description":"reader","category":"Subscriber","name":"bob"},"kind":"user"}"#;
        let parsed: AnyRecord = serde_json::from_str(reordered).unwrap();
        assert_eq!(content_hash(&record).unwrap(), content_hash(&parsed).unwrap());
    }

    #[tokio::test]
    async fn test_handle_frame_registers_remote_subscription() {
        let (replicator, directory, engine) = replicator();
        let sub = Subscription::new("a", "bob", "orders", "http://bob/a").stamped(50);
        let frame = Snapshot::seal("node-b", sub.into()).unwrap().encode().unwrap();

        let outcome = replicator.handle_frame("node-b", &frame).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Inserted);
        let key = SubscriptionKey::new("a", "bob");
        assert!(directory.subscription(&key).is_some());
        assert!(engine.contains(&key));
    }

    #[tokio::test]
    async fn test_conflicts_are_retained_and_bounded() {
        let (replicator, directory, _engine) = replicator();
        directory.upsert_local(Topic::new("orders", "alice").stamped(5)).unwrap();

        for policy in [
            crate::record::RemotePolicy::Acknowledged,
            crate::record::RemotePolicy::Written,
            crate::record::RemotePolicy::Acknowledged,
        ] {
            let remote = Topic::new("orders", "alice").with_remote_policy(policy).stamped(5);
            let frame = Snapshot::seal("node-b", remote.into()).unwrap().encode().unwrap();
            assert!(replicator.handle_frame("node-b", &frame).await.is_err());
        }

        let conflicts = replicator.conflicts().await;
        assert_eq!(conflicts.len(), 2);
        assert_eq!(conflicts[0].identity, "orders@alice");
        assert_eq!(conflicts[0].kind, RecordKind::Topic);
        assert_eq!(conflicts[0].at, 100);
    }

    #[tokio::test]
    async fn test_loopback_pair_delivers_both_ways() {
        let (a, b) = LoopbackChannel::pair("node-a", "node-b");
        assert_eq!(a.peer_id(), "node-b");
        assert_eq!(b.peer_id(), "node-a");

        a.send(b"ping".to_vec()).await.unwrap();
        b.send(b"pong".to_vec()).await.unwrap();
        assert_eq!(b.receive().await, Some(b"ping".to_vec()));
        assert_eq!(a.receive().await, Some(b"pong".to_vec()));
    }

    #[tokio::test]
    async fn test_push_full_state_sends_every_record() {
        let (replicator, directory, _engine) = replicator();
        directory.upsert_local(Topic::new("orders", "alice").stamped(1)).unwrap();
        directory.upsert_local(User::new("alice", UserCategory::Publisher, "").stamped(1)).unwrap();

        let (ours, theirs) = LoopbackChannel::pair("node-a", "node-b");
        assert_eq!(replicator.push_full_state(&ours).await.unwrap(), 2);

        let first = Snapshot::decode(&theirs.receive().await.unwrap()).unwrap();
        assert_eq!(first.origin, "node-a");
        assert_eq!(first.record.kind(), RecordKind::User);
    }
}
