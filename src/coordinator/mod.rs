// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Broker coordinator.
//!
//! The main orchestrator that ties together:
//! - Shared directory state via [`crate::directory::Directory`]
//! - Per-subscription delivery via [`crate::delivery::DeliveryEngine`]
//! - Snapshot exchange via [`crate::replication::Replicator`]
//! - Node liveness via [`crate::node::NodeDirectory`]
//!
//! # Architecture
//!
//! The coordinator manages the full broker lifecycle:
//! 1. Seeds the node directory from configuration
//! 2. Starts one delivery worker per subscription
//! 3. Runs the node timeout sweep and anti-entropy pushes
//! 4. Spawns intake/outbox tasks for every attached peer
//! 5. Handles graceful shutdown, discarding in-flight results

mod types;

pub use types::{BrokerState, HealthCheck};

use crate::clock::Clock;
use crate::config::BrokerConfig;
use crate::delivery::{DeliveryEngine, DeliveryTransport, LivenessProber};
use crate::directory::Directory;
use crate::error::{BrokerError, Result};
use crate::metrics;
use crate::node::HeartbeatOutcome;
use crate::record::{AnyRecord, Event, NodeDescriptor, Record, Subscription, SubscriptionKey, Topic, TopicKey, User};
use crate::replication::{ConflictReport, ReplicationChannel, Replicator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for each task.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// One broker node.
///
/// Local operations stamp records with the injected clock and merge them
/// into the directory; the replicator forwards them to attached peers.
pub struct Broker {
    config: BrokerConfig,

    /// Broker state (broadcast to watchers)
    state_tx: watch::Sender<BrokerState>,
    state_rx: watch::Receiver<BrokerState>,

    clock: Arc<dyn Clock>,
    directory: Arc<Directory>,
    engine: Arc<DeliveryEngine>,
    replicator: Arc<Replicator>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Sweeper, anti-entropy and per-peer task handles
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    /// Create a broker. Fails if the config does not validate.
    ///
    /// The broker starts in `Created` state. Call [`start()`](Self::start)
    /// to spawn its tasks.
    pub fn new(
        config: BrokerConfig,
        transport: Arc<dyn DeliveryTransport>,
        prober: Arc<dyn LivenessProber>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(BrokerState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let settings = &config.settings;

        let directory = Arc::new(Directory::new(settings.replication.change_feed_capacity));
        let engine = Arc::new(DeliveryEngine::new(
            &settings.delivery,
            &settings.liveness,
            transport,
            prober,
            Arc::clone(&clock),
            directory.clone(),
            shutdown_rx.clone(),
        ));
        let replicator = Arc::new(Replicator::new(
            config.local_node_id.clone(),
            Arc::clone(&directory),
            Arc::clone(&engine),
            Arc::clone(&clock),
            settings.replication.clone(),
        ));

        Ok(Self {
            config,
            state_tx,
            state_rx,
            clock,
            directory,
            engine,
            replicator,
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Get current broker state.
    pub fn state(&self) -> BrokerState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<BrokerState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), BrokerState::Running)
    }

    pub fn node_id(&self) -> &str {
        &self.config.local_node_id
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn engine(&self) -> &Arc<DeliveryEngine> {
        &self.engine
    }

    pub fn replicator(&self) -> &Arc<Replicator> {
        &self.replicator
    }

    fn set_state(&self, state: BrokerState) {
        let _ = self.state_tx.send(state);
        metrics::set_broker_state(&state.to_string());
    }

    fn require_running(&self) -> Result<()> {
        match self.state() {
            BrokerState::Running => Ok(()),
            BrokerState::ShuttingDown | BrokerState::Stopped => Err(BrokerError::Shutdown),
            other => Err(BrokerError::InvalidState {
                expected: "Running".to_string(),
                actual: other.to_string(),
            }),
        }
    }

    /// Start the broker.
    ///
    /// 1. Inserts seed nodes as connected now
    /// 2. Spawns one worker per registered subscription
    /// 3. Spawns the node sweeper
    /// 4. Spawns the anti-entropy task (if enabled)
    pub async fn start(&self) -> Result<()> {
        if self.state() != BrokerState::Created {
            return Err(BrokerError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            node_id = %self.config.local_node_id,
            seed_count = self.config.seed_nodes.len(),
            "Starting broker"
        );

        let now = self.clock.now_millis();
        for seed in &self.config.seed_nodes {
            let descriptor = NodeDescriptor::new(seed.dns.as_str(), seed.port, seed.description.as_str());
            if let Err(e) = self.directory.record_heartbeat(&descriptor, now) {
                error!(node = %descriptor.key(), error = %e, "Failed to seed node");
                self.set_state(BrokerState::Failed);
                return Err(e);
            }
        }

        self.engine.start();

        let mut handles = self.handles.lock().await;

        let nodes = &self.config.settings.nodes;
        handles.push(tokio::spawn(Arc::clone(self.directory.nodes()).run_sweeper(
            Arc::clone(&self.clock),
            nodes.sweep_interval_duration(),
            nodes.timeout_duration(),
            self.shutdown_rx.clone(),
        )));
        debug!("Spawned node sweeper");

        if self.config.settings.replication.anti_entropy_enabled {
            handles.push(tokio::spawn(
                Arc::clone(&self.replicator).run_anti_entropy(self.shutdown_rx.clone()),
            ));
            debug!("Spawned anti-entropy task");
        }
        drop(handles);

        self.set_state(BrokerState::Running);
        info!(
            subscriptions = self.engine.subscription_count(),
            known_nodes = self.directory.nodes().len(),
            "Broker running"
        );
        Ok(())
    }

    /// Attach a replication channel to a peer and start exchanging snapshots.
    pub async fn attach_peer(&self, channel: Arc<dyn ReplicationChannel>) -> Result<()> {
        self.require_running()?;

        let peer = channel.peer_id().to_string();
        self.replicator.attach(Arc::clone(&channel)).await;

        let mut handles = self.handles.lock().await;
        handles.push(tokio::spawn(
            Arc::clone(&self.replicator).run_intake(Arc::clone(&channel), self.shutdown_rx.clone()),
        ));
        handles.push(tokio::spawn(
            Arc::clone(&self.replicator).run_outbox(channel, self.shutdown_rx.clone()),
        ));

        info!(peer = %peer, "Peer attached");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Directory operations
    // ═══════════════════════════════════════════════════════════════════════

    /// Create (or overwrite) a user, stamped now.
    pub fn create_user(&self, user: User) -> Result<User> {
        let user = user.stamped(self.clock.now_millis());
        self.directory.upsert_local(user.clone())?;
        info!(user = %user.name(), category = %user.category(), "User created");
        Ok(user)
    }

    /// Create (or overwrite) a topic, stamped now.
    pub fn create_topic(&self, topic: Topic) -> Result<Topic> {
        let topic = topic.stamped(self.clock.now_millis());
        self.directory.upsert_local(topic.clone())?;
        info!(topic = %topic.key(), "Topic created");
        Ok(topic)
    }

    /// Create (or overwrite) a subscription and register its worker.
    ///
    /// Returns the subscription as stored. When a newer copy from a peer is
    /// already present the stored copy wins, and that is what the worker
    /// delivers with.
    ///
    /// Fails with `NotFound` if no topic with the referenced name exists.
    pub async fn create_subscription(&self, subscription: Subscription) -> Result<Subscription> {
        if !self.directory.has_topic_named(subscription.topic()) {
            return Err(BrokerError::NotFound {
                kind: Topic::KIND,
                identity: subscription.topic().to_string(),
            });
        }

        let key = subscription.key();
        let outcome = self
            .directory
            .upsert_local(subscription.stamped(self.clock.now_millis()))?;
        let stored = self.sync_worker(&key).await?;

        if outcome.changed() {
            info!(
                subscription = %key,
                topic = %stored.topic(),
                policy = %stored.error_policy(),
                "Subscription created"
            );
        } else {
            warn!(subscription = %key, outcome = %outcome, "Subscription kept stored copy");
        }
        Ok(stored)
    }

    /// Update an existing record's non-identity attributes and re-stamp it.
    pub async fn update(&self, record: impl Into<AnyRecord>) -> Result<AnyRecord> {
        let updated = self.directory.update_local(record.into(), self.clock.now_millis())?;
        if let AnyRecord::Subscription(sub) = &updated {
            return Ok(self.sync_worker(&sub.key()).await?.into());
        }
        Ok(updated)
    }

    /// Hand the directory's current copy of a subscription to its worker.
    async fn sync_worker(&self, key: &SubscriptionKey) -> Result<Subscription> {
        let stored = self.directory.subscription(key).ok_or_else(|| BrokerError::NotFound {
            kind: Subscription::KIND,
            identity: key.to_string(),
        })?;
        self.engine.upsert_subscription(stored.clone()).await;
        Ok(stored)
    }

    /// Remove a topic and cancel every subscription attached to it.
    ///
    /// The topic's subscriptions are removed from the directory as well.
    /// In-flight deliveries finish but their results are discarded.
    pub async fn remove_topic(&self, key: &TopicKey) -> Result<Topic> {
        let now = self.clock.now_millis();
        let topic = self.directory.remove_topic(key, now).ok_or_else(|| BrokerError::NotFound {
            kind: Topic::KIND,
            identity: key.to_string(),
        })?;

        if !self.directory.has_topic_named(topic.name()) {
            for sub in self.directory.subscriptions_for_topic(topic.name()) {
                self.directory.remove_subscription(&sub.key(), now);
            }
            self.engine.cancel_topic(topic.name()).await;
        }
        Ok(topic)
    }

    /// Remove a subscription and cancel its future deliveries.
    pub async fn remove_subscription(&self, key: &SubscriptionKey) -> Result<Subscription> {
        let removed = self
            .directory
            .remove_subscription(key, self.clock.now_millis())
            .ok_or_else(|| BrokerError::NotFound {
                kind: Subscription::KIND,
                identity: key.to_string(),
            })?;
        self.engine.remove_subscription(key).await;
        Ok(removed)
    }

    /// Append an event to every subscription queue of its topic.
    ///
    /// Returns how many subscriptions received it.
    pub async fn publish(&self, event: Event) -> Result<usize> {
        self.require_running()?;
        if !self.directory.has_topic_named(event.topic()) {
            return Err(BrokerError::NotFound {
                kind: Topic::KIND,
                identity: event.topic().to_string(),
            });
        }
        Ok(self.engine.publish(event).await)
    }

    /// Record a heartbeat from a cluster node.
    pub fn heartbeat(&self, announcement: &NodeDescriptor) -> Result<HeartbeatOutcome> {
        self.directory.record_heartbeat(announcement, self.clock.now_millis())
    }

    /// Most recent unresolvable merges reported by the replicator.
    pub async fn conflicts(&self) -> Vec<ConflictReport> {
        self.replicator.conflicts().await
    }

    /// Get health status for monitoring endpoints.
    ///
    /// **Performance**: This method performs no I/O. All data is collected
    /// from in-memory state.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let stats = self.engine.stats().await;
        let recent_conflicts = self.replicator.conflicts().await.len();
        let ready = state == BrokerState::Running;

        HealthCheck {
            state,
            ready,
            healthy: ready && stats.suspended == 0 && recent_conflicts == 0,
            subscriptions: stats.subscriptions,
            suspended_subscriptions: stats.suspended,
            queued_events: stats.queued_events,
            dead_lettered: stats.dead_lettered,
            known_nodes: self.directory.nodes().len(),
            peers: self.replicator.peer_count().await,
            recent_conflicts,
        }
    }

    /// Shutdown the broker gracefully.
    ///
    /// Shutdown sequence:
    /// 1. Signal all tasks to stop
    /// 2. Wait for delivery workers (in-flight calls finish, results discarded)
    /// 3. Wait for sweeper, anti-entropy and peer tasks
    pub async fn shutdown(&self) {
        if matches!(self.state(), BrokerState::Stopped | BrokerState::ShuttingDown) {
            return;
        }

        info!("Shutting down broker");
        self.set_state(BrokerState::ShuttingDown);
        let _ = self.shutdown_tx.send(true);

        self.engine.shutdown(DRAIN_TIMEOUT).await;

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().await);
        let task_count = handles.len();
        if task_count > 0 {
            debug!(task_count, "Waiting for tasks to complete");
        }

        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(DRAIN_TIMEOUT, handle).await {
                Ok(Ok(())) => debug!(task = i + 1, "Task completed gracefully"),
                Ok(Err(e)) => warn!(task = i + 1, error = %e, "Task panicked during shutdown"),
                Err(_) => warn!(task = i + 1, "Task timed out during shutdown"),
            }
        }

        self.set_state(BrokerState::Stopped);
        info!("Broker stopped");
    }
}
