// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscription worker: drives one subscription's state machine.
//!
//! Each worker runs as its own tokio task so a hanging endpoint only stalls
//! its own subscription. The state lock is held only to plan and to apply a
//! result, never across the transport or probe call.

use super::state::{DropReason, Plan, StepOutcome, SubscriptionState};
use super::transport::{DeliveryTransport, Liveness, LivenessProber, TransportOutcome};
use super::ReceiptSink;
use crate::clock::Clock;
use crate::error::BrokerError;
use crate::metrics;
use crate::record::{Event, Subscription, SubscriptionKey, Timestamp};
use crate::resilience::Bulkhead;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// What one call to [`SubscriptionWorker::step`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing queued.
    Idle,
    /// Nothing to do before the given time (backoff or suspension).
    WaitUntil(Timestamp),
    /// An attempt or probe completed.
    Done(StepOutcome),
    /// The worker was cancelled.
    Cancelled,
}

/// Everything a worker needs besides its state.
#[derive(Clone)]
pub struct WorkerContext {
    pub transport: Arc<dyn DeliveryTransport>,
    pub prober: Arc<dyn LivenessProber>,
    pub clock: Arc<dyn Clock>,
    pub sink: Arc<dyn ReceiptSink>,
    pub bulkhead: Arc<Bulkhead>,
    pub attempt_timeout: Duration,
    pub probe_timeout: Duration,
}

/// Delivery loop of one subscription.
pub struct SubscriptionWorker {
    label: String,
    state: Mutex<SubscriptionState>,
    ctx: WorkerContext,
    cancelled: AtomicBool,
    wake: Notify,
}

impl SubscriptionWorker {
    pub fn new(state: SubscriptionState, ctx: WorkerContext) -> Self {
        Self {
            label: state.key().to_string(),
            state: Mutex::new(state),
            ctx,
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Display form of the subscription key.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Append an event if it belongs to this subscription's topic.
    ///
    /// Returns `true` if the event was queued.
    pub async fn offer(&self, event: &Event) -> bool {
        let (evicted, depth) = {
            let mut state = self.state.lock().await;
            if state.is_cancelled() || state.subscription().topic() != event.topic() {
                return false;
            }
            let evicted = state.enqueue(event.clone());
            (evicted, state.queue().len())
        };

        if !evicted.is_empty() {
            warn!(
                subscription = %self.label,
                evicted = evicted.len(),
                oldest = %evicted[0].guid(),
                "Queue over threshold, discarded oldest events"
            );
            metrics::record_queue_evictions(&self.label, evicted.len());
        }
        metrics::set_queue_depth(&self.label, depth);
        self.wake.notify_one();
        true
    }

    /// Replace the subscription's attributes.
    pub async fn update_subscription(&self, subscription: Subscription) {
        self.state.lock().await.update_subscription(subscription);
        self.wake.notify_one();
    }

    /// Cancel all future deliveries.
    ///
    /// An in-flight call is allowed to finish; its result is discarded.
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let dropped = self.state.lock().await.cancel();
        info!(subscription = %self.label, dropped, "Subscription cancelled");
        metrics::set_queue_depth(&self.label, 0);
        self.wake.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Run one planning/attempt cycle.
    pub async fn step(&self) -> Step {
        if self.is_cancelled() {
            return Step::Cancelled;
        }

        let plan = self.state.lock().await.plan(self.ctx.clock.now_millis());

        match plan {
            Plan::Idle | Plan::Busy => Step::Idle,
            Plan::Wait { until } | Plan::Suspended { until } => Step::WaitUntil(until),
            Plan::Probe { url } => {
                let liveness = self.probe(&url).await;
                let outcome = self
                    .state
                    .lock()
                    .await
                    .complete_probe(liveness, self.ctx.clock.now_millis());
                self.observe(&outcome);
                Step::Done(outcome)
            }
            Plan::Attempt { event, url } => {
                let Ok(permit) = self.ctx.bulkhead.acquire().await else {
                    self.state.lock().await.abandon();
                    return Step::Cancelled;
                };
                let result = self.attempt(&event, &url).await;
                drop(permit);

                let outcome = self
                    .state
                    .lock()
                    .await
                    .complete_attempt(event.guid(), result, self.ctx.clock.now_millis());
                self.observe(&outcome);

                if let StepOutcome::Delivered(receipt) = &outcome {
                    if let Err(e) = self.ctx.sink.record_delivery(receipt.clone()) {
                        error!(
                            subscription = %self.label,
                            event_id = %receipt.event_id(),
                            error = %e,
                            "Failed to record delivery receipt"
                        );
                        metrics::record_error("delivery", e.label());
                    }
                }
                Step::Done(outcome)
            }
        }
    }

    async fn attempt(&self, event: &Event, url: &str) -> Result<(), BrokerError> {
        let started = Instant::now();
        let call = self.ctx.transport.attempt(url, event.payload());
        let result = match tokio::time::timeout(self.ctx.attempt_timeout, call).await {
            Ok(TransportOutcome::Ok) => Ok(()),
            Ok(TransportOutcome::Failure(code)) => Err(BrokerError::delivery(&self.label, event.guid(), code)),
            Err(_) => Err(BrokerError::timeout(url, started.elapsed())),
        };
        metrics::record_delivery_latency(&self.label, started.elapsed());

        if let Err(e) = &result {
            debug!(subscription = %self.label, event_id = %event.guid(), error = %e, "Delivery attempt failed");
        }
        result
    }

    async fn probe(&self, url: &str) -> Liveness {
        let liveness = match tokio::time::timeout(self.ctx.probe_timeout, self.ctx.prober.probe(url)).await {
            Ok(liveness) => liveness,
            Err(_) => {
                debug!(subscription = %self.label, url, "Liveliness probe timed out");
                Liveness::Offline
            }
        };
        metrics::record_probe(&self.label, liveness == Liveness::Online);
        liveness
    }

    fn observe(&self, outcome: &StepOutcome) {
        metrics::record_delivery_outcome(&self.label, outcome.label());

        match outcome {
            StepOutcome::Delivered(receipt) => {
                debug!(subscription = %self.label, event_id = %receipt.event_id(), "Event delivered");
            }
            StepOutcome::Retrying { event_id, attempt, delay } => {
                warn!(
                    subscription = %self.label,
                    event_id = %event_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Delivery failed, retrying"
                );
                metrics::record_retry_scheduled(&self.label, *attempt, *delay);
            }
            StepOutcome::Dropped { event_id, reason } => match reason {
                DropReason::Policy => {
                    debug!(subscription = %self.label, event_id = %event_id, "Delivery failed, event dropped")
                }
                DropReason::RetriesExhausted { attempts } => warn!(
                    subscription = %self.label,
                    event_id = %event_id,
                    attempts,
                    "Retries exhausted, event dropped"
                ),
            },
            StepOutcome::DeadLettered { event_id } => {
                warn!(subscription = %self.label, event_id = %event_id, "Event dead-lettered");
                metrics::record_dead_letter(&self.label, true);
            }
            StepOutcome::DeadLetterDiscarded { event_id } => {
                warn!(subscription = %self.label, event_id = %event_id, "Dead-letter store full, event discarded");
                metrics::record_dead_letter(&self.label, false);
            }
            StepOutcome::Stale { event_id } => {
                debug!(subscription = %self.label, event_id = %event_id, "Attempted event evicted, result discarded");
                metrics::record_discarded_result(&self.label, "stale");
            }
            StepOutcome::Cancelled { .. } => {
                debug!(subscription = %self.label, "Subscription cancelled, result discarded");
                metrics::record_discarded_result(&self.label, "cancelled");
            }
            StepOutcome::Resumed => {
                info!(subscription = %self.label, "Endpoint back online, resuming deliveries");
                metrics::set_subscription_suspended(&self.label, false);
            }
            StepOutcome::StillOffline { next_probe_at } => {
                debug!(subscription = %self.label, next_probe_at, "Endpoint still offline");
                metrics::set_subscription_suspended(&self.label, true);
            }
        }
    }

    /// Run the delivery loop until cancelled or `shutdown_rx` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let span = info_span!("delivery", subscription = %self.label);

        async move {
            debug!("Subscription worker started");
            let mut was_suspended = false;

            loop {
                if self.is_cancelled() || *shutdown_rx.borrow() {
                    break;
                }

                let wait = match self.step().await {
                    Step::Cancelled => break,
                    Step::Done(_) => {
                        let suspended = self.is_suspended().await;
                        if suspended && !was_suspended {
                            warn!("Endpoint deemed offline, deliveries suspended");
                            metrics::set_subscription_suspended(&self.label, true);
                        }
                        was_suspended = suspended;
                        continue;
                    }
                    Step::Idle => None,
                    Step::WaitUntil(until) => {
                        Some(Duration::from_millis(until.saturating_sub(self.ctx.clock.now_millis())))
                    }
                };

                let sleep = async {
                    match wait {
                        Some(d) => tokio::time::sleep(d).await,
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    biased;

                    result = shutdown_rx.changed() => {
                        if result.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }

                    _ = self.wake.notified() => {}

                    _ = sleep => {}
                }
            }

            debug!("Subscription worker stopped");
        }
        .instrument(span)
        .await
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue().len()
    }

    pub async fn dead_letters(&self) -> Vec<String> {
        self.state.lock().await.dead_letters().ids().to_vec()
    }

    pub async fn is_suspended(&self) -> bool {
        self.state.lock().await.is_suspended()
    }

    pub async fn subscription(&self) -> Subscription {
        self.state.lock().await.subscription().clone()
    }

    pub async fn key(&self) -> SubscriptionKey {
        self.state.lock().await.key()
    }

    /// Failed attempts recorded for an event under the `Retry` policy.
    pub async fn retry_attempts(&self, event_id: &str) -> u32 {
        self.state.lock().await.retry_attempts(event_id)
    }
}
