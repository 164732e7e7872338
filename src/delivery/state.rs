// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-subscription delivery state machine.
//!
//! Pure logic with no I/O: the worker asks [`SubscriptionState::plan`] what to
//! do next, performs the transport or probe call without holding any lock,
//! then reports the result back through `complete_attempt` or
//! `complete_probe`.
//!
//! # Event lifecycle
//!
//! ```text
//! Queued ──► Attempting ──┬──► Delivered            (receipt emitted)
//!                         ├──► Queued-with-backoff ──► Attempting ...
//!                         ├──► Dropped              (Drop policy, or retries exhausted)
//!                         └──► DeadLettered         (or discarded if the store is full)
//! ```
//!
//! A retrying event stays at the head of the queue. Later events wait behind
//! it and are never delivered ahead of it.
//!
//! # Liveness gate
//!
//! ```text
//! Online{failures} ── failures >= threshold ──► Offline{next_probe_at}
//!       ▲                                             │
//!       └────────────── probe: Online ◄───────────────┘ (probe: Offline re-arms)
//! ```

use crate::config::LivenessConfig;
use crate::dead_letter::DeadLetterStore;
use crate::error::BrokerError;
use crate::queue::SubscriptionQueue;
use crate::record::{Delivery, ErrorPolicy, Event, Record, Subscription, SubscriptionKey, Timestamp};
use crate::resilience::RetryConfig;
use std::collections::HashMap;
use std::time::Duration;

use super::transport::Liveness;

/// When a subscription is deemed offline and how often it is re-probed.
#[derive(Debug, Clone)]
pub struct LivenessPolicy {
    pub enabled: bool,
    pub offline_after_failures: u32,
    pub probe_interval: Duration,
}

impl From<&LivenessConfig> for LivenessPolicy {
    fn from(config: &LivenessConfig) -> Self {
        Self {
            enabled: config.enabled,
            offline_after_failures: config.offline_after_failures.max(1),
            probe_interval: config.probe_interval_duration(),
        }
    }
}

impl LivenessPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            offline_after_failures: u32::MAX,
            probe_interval: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Online { consecutive_failures: u32 },
    Offline { next_probe_at: Timestamp },
}

#[derive(Debug, Clone, Copy)]
struct RetryState {
    attempts: u32,
    next_eligible: Timestamp,
}

/// What the worker should do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Plan {
    /// Queue is empty.
    Idle,
    /// Head is in backoff until the given time.
    Wait { until: Timestamp },
    /// Subscription is offline; next probe is due at the given time.
    Suspended { until: Timestamp },
    /// Probe the liveliness URL.
    Probe { url: String },
    /// Deliver the head event.
    Attempt { event: Event, url: String },
    /// An attempt or probe is already outstanding.
    Busy,
}

/// Why an event left the queue without a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The subscription's policy is `Drop`.
    Policy,
    /// The `Retry` policy ran out of attempts.
    RetriesExhausted { attempts: u32 },
}

/// Result of applying an attempt or probe result.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Delivered; the receipt should be fed to the directory.
    Delivered(Delivery),
    /// Failed under `Retry`; the event stays at the head until `delay` passes.
    Retrying {
        event_id: String,
        attempt: u32,
        delay: Duration,
    },
    /// Removed without a receipt.
    Dropped { event_id: String, reason: DropReason },
    /// Id appended to the dead-letter store.
    DeadLettered { event_id: String },
    /// Dead-letter store full; id discarded, existing entries untouched.
    DeadLetterDiscarded { event_id: String },
    /// The attempted event is no longer at the head (evicted meanwhile).
    Stale { event_id: String },
    /// The subscription was cancelled while the call was in flight.
    Cancelled { event_id: Option<String> },
    /// Probe succeeded; deliveries resume.
    Resumed,
    /// Probe failed; next probe scheduled.
    StillOffline { next_probe_at: Timestamp },
}

impl StepOutcome {
    /// Short label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StepOutcome::Delivered(_) => "delivered",
            StepOutcome::Retrying { .. } => "retrying",
            StepOutcome::Dropped { reason: DropReason::Policy, .. } => "dropped",
            StepOutcome::Dropped { .. } => "retries_exhausted",
            StepOutcome::DeadLettered { .. } => "dead_lettered",
            StepOutcome::DeadLetterDiscarded { .. } => "dead_letter_discarded",
            StepOutcome::Stale { .. } => "stale",
            StepOutcome::Cancelled { .. } => "cancelled",
            StepOutcome::Resumed => "resumed",
            StepOutcome::StillOffline { .. } => "still_offline",
        }
    }
}

/// Queue, retry map, dead-letter store and liveness gate of one subscription.
#[derive(Debug)]
pub struct SubscriptionState {
    subscription: Subscription,
    queue: SubscriptionQueue,
    dead_letters: DeadLetterStore,
    retries: HashMap<String, RetryState>,
    retry: RetryConfig,
    liveness: LivenessPolicy,
    gate: Gate,
    in_flight: Option<String>,
    probing: bool,
    cancelled: bool,
}

impl SubscriptionState {
    pub fn new(
        subscription: Subscription,
        queue_threshold: usize,
        dead_letter_capacity: usize,
        retry: RetryConfig,
        liveness: LivenessPolicy,
    ) -> Self {
        Self {
            subscription,
            queue: SubscriptionQueue::new(queue_threshold),
            dead_letters: DeadLetterStore::new(dead_letter_capacity),
            retries: HashMap::new(),
            retry,
            liveness,
            gate: Gate::Online {
                consecutive_failures: 0,
            },
            in_flight: None,
            probing: false,
            cancelled: false,
        }
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn key(&self) -> SubscriptionKey {
        self.subscription.key()
    }

    /// Replace the subscription's attributes. Queue and dead letters are kept.
    pub fn update_subscription(&mut self, subscription: Subscription) {
        if subscription.liveliness_url().is_none() {
            self.gate = Gate::Online {
                consecutive_failures: 0,
            };
        }
        self.subscription = subscription;
    }

    /// Append an event. Returns events evicted from the front of the queue.
    pub fn enqueue(&mut self, event: Event) -> Vec<Event> {
        if self.cancelled {
            return Vec::new();
        }
        let evicted = self.queue.push(event);
        for e in &evicted {
            self.retries.remove(e.guid());
        }
        evicted
    }

    /// Decide the next action at time `now`.
    ///
    /// An `Attempt` or `Probe` plan marks the call outstanding until the
    /// matching `complete_*` (or `abandon`) call.
    pub fn plan(&mut self, now: Timestamp) -> Plan {
        if self.cancelled {
            return Plan::Idle;
        }
        if self.in_flight.is_some() || self.probing {
            return Plan::Busy;
        }

        if let Gate::Offline { next_probe_at } = self.gate {
            if now < next_probe_at {
                return Plan::Suspended { until: next_probe_at };
            }
            return match self.subscription.liveliness_url() {
                Some(url) => {
                    self.probing = true;
                    Plan::Probe { url: url.to_string() }
                }
                None => {
                    self.gate = Gate::Online {
                        consecutive_failures: 0,
                    };
                    self.plan(now)
                }
            };
        }

        let Some(head) = self.queue.head() else {
            return Plan::Idle;
        };

        if let Some(retry) = self.retries.get(head.guid()) {
            if now < retry.next_eligible {
                return Plan::Wait {
                    until: retry.next_eligible,
                };
            }
        }

        self.in_flight = Some(head.guid().to_string());
        Plan::Attempt {
            event: head.clone(),
            url: self.subscription.delivery_url().to_string(),
        }
    }

    /// Release an outstanding call without applying a result.
    pub fn abandon(&mut self) {
        self.in_flight = None;
        self.probing = false;
    }

    /// Apply the result of a delivery attempt for `event_id`.
    pub fn complete_attempt(
        &mut self,
        event_id: &str,
        result: Result<(), BrokerError>,
        now: Timestamp,
    ) -> StepOutcome {
        let outstanding = self.in_flight.take();

        if self.cancelled {
            return StepOutcome::Cancelled {
                event_id: Some(event_id.to_string()),
            };
        }
        let at_head = self.queue.head().map(|e| e.guid() == event_id).unwrap_or(false);
        if outstanding.as_deref() != Some(event_id) || !at_head {
            return StepOutcome::Stale {
                event_id: event_id.to_string(),
            };
        }

        match result {
            Ok(()) => {
                self.queue.pop_head();
                self.retries.remove(event_id);
                self.gate = Gate::Online {
                    consecutive_failures: 0,
                };
                StepOutcome::Delivered(Delivery::new(event_id, self.subscription.name(), now))
            }
            Err(_) => {
                let outcome = self.apply_error_policy(event_id, now);
                self.record_failure(now);
                outcome
            }
        }
    }

    fn apply_error_policy(&mut self, event_id: &str, now: Timestamp) -> StepOutcome {
        match self.subscription.error_policy() {
            ErrorPolicy::Drop => {
                self.queue.pop_head();
                self.retries.remove(event_id);
                StepOutcome::Dropped {
                    event_id: event_id.to_string(),
                    reason: DropReason::Policy,
                }
            }
            ErrorPolicy::Retry => {
                let attempts = self.retries.get(event_id).map(|r| r.attempts).unwrap_or(0) + 1;
                if self.retry.is_exhausted(attempts) {
                    self.queue.pop_head();
                    self.retries.remove(event_id);
                    return StepOutcome::Dropped {
                        event_id: event_id.to_string(),
                        reason: DropReason::RetriesExhausted { attempts },
                    };
                }
                let delay = self.retry.delay_for_attempt(attempts);
                self.retries.insert(
                    event_id.to_string(),
                    RetryState {
                        attempts,
                        next_eligible: now.saturating_add(delay.as_millis() as u64),
                    },
                );
                StepOutcome::Retrying {
                    event_id: event_id.to_string(),
                    attempt: attempts,
                    delay,
                }
            }
            ErrorPolicy::DeadLetter => {
                self.queue.pop_head();
                self.retries.remove(event_id);
                if self.dead_letters.add(event_id) {
                    StepOutcome::DeadLettered {
                        event_id: event_id.to_string(),
                    }
                } else {
                    StepOutcome::DeadLetterDiscarded {
                        event_id: event_id.to_string(),
                    }
                }
            }
        }
    }

    fn record_failure(&mut self, now: Timestamp) {
        let Gate::Online { consecutive_failures } = self.gate else {
            return;
        };
        let failures = consecutive_failures.saturating_add(1);
        let gated = self.liveness.enabled && self.subscription.liveliness_url().is_some();

        self.gate = if gated && failures >= self.liveness.offline_after_failures {
            Gate::Offline {
                next_probe_at: now.saturating_add(self.liveness.probe_interval.as_millis() as u64),
            }
        } else {
            Gate::Online {
                consecutive_failures: failures,
            }
        };
    }

    /// Apply the result of a liveliness probe.
    pub fn complete_probe(&mut self, liveness: Liveness, now: Timestamp) -> StepOutcome {
        self.probing = false;
        if self.cancelled {
            return StepOutcome::Cancelled { event_id: None };
        }
        match liveness {
            Liveness::Online => {
                self.gate = Gate::Online {
                    consecutive_failures: 0,
                };
                StepOutcome::Resumed
            }
            Liveness::Offline => {
                let next_probe_at = now.saturating_add(self.liveness.probe_interval.as_millis() as u64);
                self.gate = Gate::Offline { next_probe_at };
                StepOutcome::StillOffline { next_probe_at }
            }
        }
    }

    /// Stop all future deliveries. Pending events and retry state are dropped.
    pub fn cancel(&mut self) -> usize {
        self.cancelled = true;
        self.retries.clear();
        self.queue.clear().len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self.gate, Gate::Offline { .. })
    }

    pub fn queue(&self) -> &SubscriptionQueue {
        &self.queue
    }

    pub fn dead_letters(&self) -> &DeadLetterStore {
        &self.dead_letters
    }

    /// Failed attempts recorded for an event under the `Retry` policy.
    pub fn retry_attempts(&self, event_id: &str) -> u32 {
        self.retries.get(event_id).map(|r| r.attempts).unwrap_or(0)
    }
}
