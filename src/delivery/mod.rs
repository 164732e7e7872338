// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delivery engine.
//!
//! Owns one [`SubscriptionWorker`] per subscription and fans published
//! events out to the workers whose subscription matches the event's topic.
//!
//! # Architecture
//!
//! ```text
//!               publish(event)
//!                     │
//!        ┌────────────┼────────────┐
//!        ▼            ▼            ▼
//!   ┌─────────┐  ┌─────────┐  ┌─────────┐
//!   │ worker  │  │ worker  │  │ worker  │   one tokio task each
//!   │ sub A   │  │ sub B   │  │ sub C   │
//!   └────┬────┘  └────┬────┘  └────┬────┘
//!        │  Bulkhead (max concurrent transport calls)
//!        ▼            ▼            ▼
//!   DeliveryTransport::attempt(url, payload)
//!        │
//!        ▼ success
//!   ReceiptSink::record_delivery(receipt)  ──► directory ──► peers
//! ```

mod state;
mod transport;
mod worker;

pub use state::{DropReason, LivenessPolicy, Plan, StepOutcome, SubscriptionState};
pub use transport::{AlwaysOnline, BoxFuture, DeliveryTransport, Liveness, LivenessProber, TransportOutcome};
pub use worker::{Step, SubscriptionWorker, WorkerContext};

use crate::clock::Clock;
use crate::config::{DeliveryConfig, LivenessConfig};
use crate::error::Result;
use crate::metrics;
use crate::record::{Delivery, Event, Record, Subscription, SubscriptionKey};
use crate::resilience::{Bulkhead, RetryConfig};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where successful deliveries are reported.
///
/// The directory implements this so receipts enter the merge protocol as
/// local inserts and replicate to peers.
pub trait ReceiptSink: Send + Sync + 'static {
    fn record_delivery(&self, receipt: Delivery) -> Result<()>;
}

/// Aggregate delivery counters for health checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryStats {
    pub subscriptions: usize,
    pub suspended: usize,
    pub queued_events: usize,
    pub dead_lettered: usize,
}

struct WorkerEntry {
    worker: Arc<SubscriptionWorker>,
    task: Option<JoinHandle<()>>,
}

/// Per-subscription delivery workers.
pub struct DeliveryEngine {
    workers: DashMap<SubscriptionKey, WorkerEntry>,
    ctx: WorkerContext,
    retry: RetryConfig,
    liveness: LivenessPolicy,
    queue_threshold: usize,
    dead_letter_capacity: usize,
    shutdown_rx: watch::Receiver<bool>,
    running: AtomicBool,
}

impl DeliveryEngine {
    pub fn new(
        delivery: &DeliveryConfig,
        liveness: &LivenessConfig,
        transport: Arc<dyn DeliveryTransport>,
        prober: Arc<dyn LivenessProber>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ReceiptSink>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let ctx = WorkerContext {
            transport,
            prober,
            clock,
            sink,
            bulkhead: Arc::new(Bulkhead::new(delivery.max_concurrent_deliveries.max(1))),
            attempt_timeout: delivery.attempt_timeout_duration(),
            probe_timeout: liveness.probe_timeout_duration(),
        };

        Self {
            workers: DashMap::new(),
            ctx,
            retry: delivery.retry_config(),
            liveness: LivenessPolicy::from(liveness),
            queue_threshold: delivery.queue_threshold,
            dead_letter_capacity: delivery.dead_letter_capacity,
            shutdown_rx,
            running: AtomicBool::new(false),
        }
    }

    /// Spawn a task for every registered worker; later registrations spawn
    /// immediately.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
        for mut entry in self.workers.iter_mut() {
            if entry.task.is_none() {
                entry.task = Some(self.spawn(&entry.worker));
            }
        }
        info!(subscriptions = self.workers.len(), "Delivery engine started");
    }

    fn spawn(&self, worker: &Arc<SubscriptionWorker>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(worker).run(self.shutdown_rx.clone()))
    }

    /// Register a subscription or refresh an existing one's attributes.
    ///
    /// Returns `true` if a new worker was created.
    pub async fn upsert_subscription(&self, subscription: Subscription) -> bool {
        let key = subscription.key();
        let existing = self.workers.get(&key).map(|e| Arc::clone(&e.worker));
        if let Some(worker) = existing {
            worker.update_subscription(subscription).await;
            debug!(subscription = %key, "Subscription updated");
            return false;
        }

        let state = SubscriptionState::new(
            subscription,
            self.queue_threshold,
            self.dead_letter_capacity,
            self.retry.clone(),
            self.liveness.clone(),
        );
        let worker = Arc::new(SubscriptionWorker::new(state, self.ctx.clone()));

        let created = match self.workers.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let task = if self.running.load(Ordering::Acquire) {
                    Some(self.spawn(&worker))
                } else {
                    None
                };
                slot.insert(WorkerEntry { worker, task });
                true
            }
        };
        if created {
            info!(subscription = %key, "Subscription registered");
        }
        created
    }

    /// Cancel and forget a subscription's worker.
    ///
    /// Pending events are discarded. An in-flight transport call finishes
    /// but its result is not applied.
    pub async fn remove_subscription(&self, key: &SubscriptionKey) -> bool {
        let Some((_, entry)) = self.workers.remove(key) else {
            return false;
        };
        entry.worker.cancel().await;
        true
    }

    /// Cancel every subscription attached to `topic`. Returns how many.
    pub async fn cancel_topic(&self, topic: &str) -> usize {
        let mut keys = Vec::new();
        for worker in self.all_workers() {
            if worker.subscription().await.topic() == topic {
                keys.push(worker.key().await);
            }
        }

        let mut cancelled = 0;
        for key in keys {
            if self.remove_subscription(&key).await {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(topic, cancelled, "Topic removed, subscriptions cancelled");
        }
        cancelled
    }

    /// Append an event to every subscription queue of its topic.
    ///
    /// Returns how many queues received it.
    pub async fn publish(&self, event: Event) -> usize {
        let mut fanout = 0;
        for worker in self.all_workers() {
            if worker.offer(&event).await {
                fanout += 1;
            }
        }
        metrics::record_publish(event.topic(), fanout);
        if fanout == 0 {
            debug!(topic = %event.topic(), event_id = %event.guid(), "No subscriptions for published event");
        }
        fanout
    }

    fn all_workers(&self) -> Vec<Arc<SubscriptionWorker>> {
        self.workers.iter().map(|e| Arc::clone(&e.worker)).collect()
    }

    /// Direct handle to a subscription's worker.
    pub fn worker(&self, key: &SubscriptionKey) -> Option<Arc<SubscriptionWorker>> {
        self.workers.get(key).map(|e| Arc::clone(&e.worker))
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.workers.contains_key(key)
    }

    pub fn subscription_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn queue_len(&self, key: &SubscriptionKey) -> Option<usize> {
        match self.worker(key) {
            Some(w) => Some(w.queue_len().await),
            None => None,
        }
    }

    pub async fn dead_letters(&self, key: &SubscriptionKey) -> Option<Vec<String>> {
        match self.worker(key) {
            Some(w) => Some(w.dead_letters().await),
            None => None,
        }
    }

    pub async fn stats(&self) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        for worker in self.all_workers() {
            stats.subscriptions += 1;
            stats.queued_events += worker.queue_len().await;
            stats.dead_lettered += worker.dead_letters().await.len();
            if worker.is_suspended().await {
                stats.suspended += 1;
            }
        }
        stats
    }

    /// Wait for worker tasks to exit after the shutdown signal was sent.
    pub async fn shutdown(&self, timeout: Duration) {
        self.running.store(false, Ordering::Release);
        self.ctx.bulkhead.close();

        let handles: Vec<(SubscriptionKey, JoinHandle<()>)> = self
            .workers
            .iter_mut()
            .filter_map(|mut e| {
                let key = e.key().clone();
                e.task.take().map(|t| (key, t))
            })
            .collect();

        let results = futures::future::join_all(
            handles
                .into_iter()
                .map(|(key, handle)| async move { (key, tokio::time::timeout(timeout, handle).await) }),
        )
        .await;

        for (key, result) in results {
            match result {
                Ok(Ok(())) => debug!(subscription = %key, "Worker stopped"),
                Ok(Err(e)) => warn!(subscription = %key, error = %e, "Worker task panicked"),
                Err(_) => warn!(subscription = %key, "Worker did not stop in time"),
            }
        }
    }
}
