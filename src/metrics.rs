//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Delivery outcomes and retry backoff
//! - Subscription queue depth and evictions
//! - Dead-letter accept/reject
//! - Liveness probes
//! - Merge outcomes and conflicts
//! - Snapshot replication
//! - Node membership
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `broker_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration, size)
//!
//! # Usage
//!
//! ```rust,no_run
//! use broker_engine::metrics;
//! use std::time::Duration;
//!
//! metrics::record_delivery_outcome("orders-sub@bob", "delivered");
//! metrics::record_retry_scheduled("orders-sub@bob", 2, Duration::from_secs(2));
//! ```

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Delivery Metrics
// =============================================================================

/// Record the outcome of one delivery step (delivered, dropped, retrying, ...).
pub fn record_delivery_outcome(subscription: &str, outcome: &str) {
    counter!(
        "broker_delivery_outcomes_total",
        "subscription" => subscription.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record transport call latency.
pub fn record_delivery_latency(subscription: &str, duration: Duration) {
    histogram!("broker_delivery_duration_seconds", "subscription" => subscription.to_string())
        .record(duration.as_secs_f64());
}

/// Record a scheduled retry and its backoff delay.
pub fn record_retry_scheduled(subscription: &str, attempt: u32, delay: Duration) {
    counter!("broker_delivery_retries_total", "subscription" => subscription.to_string()).increment(1);
    histogram!("broker_delivery_retry_delay_seconds", "subscription" => subscription.to_string())
        .record(delay.as_secs_f64());
    gauge!("broker_delivery_retry_attempt", "subscription" => subscription.to_string()).set(attempt as f64);
}

/// Record an attempt result that was discarded (cancelled or stale).
pub fn record_discarded_result(subscription: &str, reason: &str) {
    counter!(
        "broker_delivery_discarded_results_total",
        "subscription" => subscription.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// =============================================================================
// Queue & Dead-Letter Metrics
// =============================================================================

/// Set current queue depth for a subscription.
pub fn set_queue_depth(subscription: &str, depth: usize) {
    gauge!("broker_queue_depth", "subscription" => subscription.to_string()).set(depth as f64);
}

/// Record events evicted because the queue exceeded its threshold.
pub fn record_queue_evictions(subscription: &str, count: usize) {
    if count == 0 {
        return;
    }
    counter!("broker_queue_evictions_total", "subscription" => subscription.to_string())
        .increment(count as u64);
}

/// Record a dead-letter append attempt.
pub fn record_dead_letter(subscription: &str, accepted: bool) {
    let status = if accepted { "accepted" } else { "rejected" };
    counter!(
        "broker_dead_letters_total",
        "subscription" => subscription.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record events published and how many queues they fanned out to.
pub fn record_publish(topic: &str, fanout: usize) {
    counter!("broker_events_published_total", "topic" => topic.to_string()).increment(1);
    histogram!("broker_publish_fanout", "topic" => topic.to_string()).record(fanout as f64);
}

// =============================================================================
// Liveness Metrics
// =============================================================================

/// Record a liveness probe result.
pub fn record_probe(subscription: &str, online: bool) {
    let status = if online { "online" } else { "offline" };
    counter!(
        "broker_liveness_probes_total",
        "subscription" => subscription.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Set whether a subscription is currently suspended (1) or active (0).
pub fn set_subscription_suspended(subscription: &str, suspended: bool) {
    gauge!("broker_subscription_suspended", "subscription" => subscription.to_string())
        .set(if suspended { 1.0 } else { 0.0 });
}

// =============================================================================
// Merge & Replication Metrics
// =============================================================================

/// Record a merge outcome for a record kind.
pub fn record_merge(kind: &str, outcome: &str) {
    counter!(
        "broker_merges_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a structural merge failure (conflict or type mismatch).
pub fn record_merge_failure(kind: &str, error_type: &str) {
    counter!(
        "broker_merge_failures_total",
        "kind" => kind.to_string(),
        "error" => error_type.to_string()
    )
    .increment(1);
}

/// Record a snapshot sent to a peer.
pub fn record_snapshot_sent(peer: &str, bytes: usize) {
    counter!("broker_snapshots_sent_total", "peer" => peer.to_string()).increment(1);
    histogram!("broker_snapshot_size_bytes", "peer" => peer.to_string()).record(bytes as f64);
}

/// Record a snapshot received from a peer.
pub fn record_snapshot_received(peer: &str, accepted: bool) {
    let status = if accepted { "accepted" } else { "rejected" };
    counter!(
        "broker_snapshots_received_total",
        "peer" => peer.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record an anti-entropy push.
pub fn record_anti_entropy(peer: &str, records: usize, duration: Duration) {
    counter!("broker_anti_entropy_rounds_total", "peer" => peer.to_string()).increment(1);
    counter!("broker_anti_entropy_records_total", "peer" => peer.to_string()).increment(records as u64);
    histogram!("broker_anti_entropy_duration_seconds", "peer" => peer.to_string())
        .record(duration.as_secs_f64());
}

// =============================================================================
// Node Directory Metrics
// =============================================================================

/// Set number of known nodes.
pub fn set_known_nodes(count: usize) {
    gauge!("broker_known_nodes").set(count as f64);
}

/// Record nodes evicted by the timeout sweep.
pub fn record_node_evictions(count: usize) {
    if count == 0 {
        return;
    }
    counter!("broker_node_evictions_total").increment(count as u64);
}

/// Gauge for broker state.
pub fn set_broker_state(state: &str) {
    // Numeric encoding for alerting
    let value = match state {
        "Created" => 0.0,
        "Running" => 1.0,
        "ShuttingDown" => 2.0,
        "Stopped" => 3.0,
        "Failed" => 4.0,
        _ => -1.0,
    };
    gauge!("broker_state").set(value);
}

/// Record an error by type.
pub fn record_error(component: &str, error_type: &str) {
    counter!(
        "broker_errors_total",
        "component" => component.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The metrics crate uses global state with a no-op recorder when none is
    // installed, so these only verify the calls do not panic.

    #[test]
    fn test_record_delivery_metrics() {
        record_delivery_outcome("orders-sub@bob", "delivered");
        record_delivery_latency("orders-sub@bob", Duration::from_millis(12));
        record_retry_scheduled("orders-sub@bob", 2, Duration::from_secs(2));
        record_discarded_result("orders-sub@bob", "cancelled");
    }

    #[test]
    fn test_record_queue_metrics() {
        set_queue_depth("orders-sub@bob", 3);
        record_queue_evictions("orders-sub@bob", 0);
        record_queue_evictions("orders-sub@bob", 2);
        record_dead_letter("orders-sub@bob", true);
        record_dead_letter("orders-sub@bob", false);
        record_publish("orders", 4);
    }

    #[test]
    fn test_record_liveness_metrics() {
        record_probe("orders-sub@bob", true);
        set_subscription_suspended("orders-sub@bob", true);
    }

    #[test]
    fn test_record_replication_metrics() {
        record_merge("topic", "adopted");
        record_merge_failure("user", "merge_conflict");
        record_snapshot_sent("peer-1", 512);
        record_snapshot_received("peer-1", false);
        record_anti_entropy("peer-1", 10, Duration::from_millis(3));
    }

    #[test]
    fn test_node_and_state_metrics() {
        set_known_nodes(3);
        record_node_evictions(1);
        set_broker_state("Running");
        set_broker_state("Unknown");
        record_error("replication", "codec");
    }
}
