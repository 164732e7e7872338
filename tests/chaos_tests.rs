// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: simulate failures and verify graceful degradation.
//!
//! These tests verify the system handles failures gracefully without panics,
//! deadlocks, or data corruption.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use broker_engine::clock::{ManualClock, SystemClock};
use broker_engine::config::{DeliveryConfig, LivenessConfig};
use broker_engine::delivery::{DropReason, Liveness, Step, StepOutcome};
use broker_engine::record::{ErrorPolicy, Event, Subscription, SubscriptionKey, Topic};
use broker_engine::replication::Snapshot;
use broker_engine::{BrokerError, Directory, LoopbackChannel, ReplicationChannel};
use common::{
    delivery_config, eventually, manual_engine, test_broker, GatedTransport, HangingTransport, ScriptedProber,
    ScriptedTransport,
};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Unresponsive Endpoints
// =============================================================================

/// Test: A hanging endpoint does not stall other subscriptions
#[tokio::test]
async fn hanging_endpoint_does_not_stall_others() {
    let transport = Arc::new(HangingTransport::new("http://slow"));
    let broker = test_broker("node-a", transport, Arc::new(SystemClock));
    broker.start().await.unwrap();

    broker.create_topic(Topic::new("orders", "alice")).unwrap();
    broker
        .create_subscription(Subscription::new("slow", "bob", "orders", "http://slow/events"))
        .await
        .unwrap();
    broker
        .create_subscription(Subscription::new("fast", "carol", "orders", "http://fast/events"))
        .await
        .unwrap();

    for i in 0..5 {
        broker
            .publish(Event::with_id(format!("e{}", i), "orders", "x", 0))
            .await
            .unwrap();
    }

    let directory = broker.directory().clone();
    let fast_done = eventually(Duration::from_secs(1), || {
        directory.deliveries().iter().filter(|d| d.subscription() == "fast").count() == 5
    })
    .await;
    assert!(fast_done, "fast subscription stalled behind the hanging one");
    assert!(directory.deliveries().iter().all(|d| d.subscription() == "fast"));

    broker.shutdown().await;
}

/// Test: An attempt that exceeds the deadline counts as a failure
#[tokio::test(start_paused = true)]
async fn attempt_timeout_is_a_failure() {
    let delivery = DeliveryConfig {
        attempt_timeout: "50ms".to_string(),
        ..delivery_config(1000, 3, 10)
    };
    let (engine, directory, _shutdown) = manual_engine(
        delivery,
        LivenessConfig::disabled(),
        Arc::new(HangingTransport::new("http://")),
        Arc::new(ScriptedProber::online()),
        Arc::new(ManualClock::new(0)),
    );
    let key = SubscriptionKey::new("sub", "bob");
    engine
        .upsert_subscription(Subscription::new("sub", "bob", "orders", "http://bob/events"))
        .await;
    engine.publish(Event::with_id("e1", "orders", "x", 0)).await;

    let step = engine.worker(&key).unwrap().step().await;
    assert_eq!(
        step,
        Step::Done(StepOutcome::Dropped {
            event_id: "e1".into(),
            reason: DropReason::Policy
        })
    );
    assert!(directory.deliveries().is_empty());
}

/// Test: Consecutive failures suspend the subscription until a probe succeeds
#[tokio::test]
async fn offline_endpoint_is_suspended_then_resumed() {
    let clock = Arc::new(ManualClock::new(0));
    let liveness = LivenessConfig {
        enabled: true,
        probe_interval: "500ms".to_string(),
        probe_timeout: "100ms".to_string(),
        offline_after_failures: 2,
    };
    let prober = Arc::new(ScriptedProber::new(vec![Liveness::Offline, Liveness::Online]));
    let (engine, _directory, _shutdown) = manual_engine(
        delivery_config(1000, 3, 10),
        liveness,
        Arc::new(ScriptedTransport::failing("503")),
        prober.clone(),
        clock.clone(),
    );
    let key = SubscriptionKey::new("sub", "bob");
    engine
        .upsert_subscription(
            Subscription::new("sub", "bob", "orders", "http://bob/events")
                .with_error_policy(ErrorPolicy::Drop)
                .with_liveliness_url("http://bob/ping"),
        )
        .await;
    for i in 0..4 {
        engine.publish(Event::with_id(format!("e{}", i), "orders", "x", 0)).await;
    }
    let worker = engine.worker(&key).unwrap();

    worker.step().await;
    assert!(!worker.is_suspended().await);
    worker.step().await;
    assert!(worker.is_suspended().await);

    // Suspended: no attempts until the probe is due
    assert_eq!(worker.step().await, Step::WaitUntil(500));
    assert_eq!(worker.queue_len().await, 2);

    clock.set(500);
    assert_eq!(
        worker.step().await,
        Step::Done(StepOutcome::StillOffline { next_probe_at: 1000 })
    );

    clock.set(1000);
    assert_eq!(worker.step().await, Step::Done(StepOutcome::Resumed));
    assert!(!worker.is_suspended().await);
    assert_eq!(prober.probes(), vec!["http://bob/ping".to_string(); 2]);
}

// =============================================================================
// Cancellation
// =============================================================================

/// Test: Removing a subscription mid-flight discards the result
#[tokio::test]
async fn cancelled_in_flight_result_is_discarded() {
    let transport = Arc::new(GatedTransport::new());
    let (engine, directory, _shutdown) = manual_engine(
        delivery_config(1000, 3, 10),
        LivenessConfig::disabled(),
        transport.clone(),
        Arc::new(ScriptedProber::online()),
        Arc::new(ManualClock::new(0)),
    );
    let key = SubscriptionKey::new("sub", "bob");
    engine
        .upsert_subscription(Subscription::new("sub", "bob", "orders", "http://bob/events"))
        .await;
    engine.publish(Event::with_id("e1", "orders", "x", 0)).await;
    engine.publish(Event::with_id("e2", "orders", "y", 0)).await;

    let worker = engine.worker(&key).unwrap();
    let in_flight = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.step().await }
    });

    transport.wait_entered().await;
    assert!(engine.remove_subscription(&key).await);
    transport.release();

    let step = in_flight.await.unwrap();
    assert_eq!(
        step,
        Step::Done(StepOutcome::Cancelled {
            event_id: Some("e1".to_string())
        })
    );
    assert!(directory.deliveries().is_empty());
    assert_eq!(worker.queue_len().await, 0);
    assert_eq!(worker.step().await, Step::Cancelled);
    assert_eq!(engine.publish(Event::new("orders", b"z".to_vec(), 0)).await, 0);
}

/// Test: Shutdown with a hanging endpoint still completes
#[tokio::test]
async fn shutdown_with_hanging_endpoint_completes() {
    let mut config = broker_engine::BrokerConfig::for_testing("node-a");
    config.settings.delivery.attempt_timeout = "200ms".to_string();
    config.settings.liveness = LivenessConfig::disabled();
    let broker = broker_engine::Broker::new(
        config,
        Arc::new(HangingTransport::new("http://")),
        Arc::new(ScriptedProber::online()),
        Arc::new(SystemClock),
    )
    .unwrap();
    broker.start().await.unwrap();

    broker.create_topic(Topic::new("orders", "alice")).unwrap();
    broker
        .create_subscription(Subscription::new("sub", "bob", "orders", "http://bob/events"))
        .await
        .unwrap();
    broker.publish(Event::new("orders", b"x".to_vec(), 0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let result = tokio::time::timeout(Duration::from_secs(5), broker.shutdown()).await;
    assert!(result.is_ok(), "shutdown hung");
    assert_eq!(broker.state(), broker_engine::BrokerState::Stopped);
}

// =============================================================================
// Corrupted Snapshots
// =============================================================================

/// Test: Corrupted frames are rejected without panicking or touching state
#[tokio::test]
async fn corrupted_snapshots_no_panic() {
    let clock = Arc::new(ManualClock::new(0));
    let broker = test_broker("node-a", Arc::new(ScriptedTransport::accepting()), clock);
    let replicator = broker.replicator().clone();

    let valid = Snapshot::seal("node-b", Topic::new("orders", "alice").stamped(1).into())
        .unwrap()
        .encode()
        .unwrap();

    // Same digest, different owner
    let tampered = String::from_utf8(valid.clone()).unwrap().replace("alice", "mallo").into_bytes();

    let mut wrong_hash = Snapshot::seal("node-b", Topic::new("orders", "alice").stamped(1).into()).unwrap();
    wrong_hash.content_hash = "0".repeat(64);

    let corrupted: Vec<Vec<u8>> = vec![
        Vec::new(),
        b"{".to_vec(),
        b"null".to_vec(),
        b"{\"origin\":\"x\"}".to_vec(),
        b"{\"origin\":\"x\",\"record\":{\"kind\":\"martian\",\"record\":{}},\"content_hash\":\"\"}".to_vec(),
        valid[..valid.len() / 2].to_vec(),
        tampered,
        wrong_hash.encode().unwrap(),
        (0..1000).map(|i| (i % 256) as u8).collect(),
    ];

    for (i, frame) in corrupted.iter().enumerate() {
        let result = replicator.handle_frame("node-b", frame).await;
        assert!(result.is_err(), "corrupted frame {} should be rejected", i);
    }
    assert!(broker.directory().topics().is_empty());

    let err = replicator.handle_frame("node-b", &wrong_hash.encode().unwrap()).await.unwrap_err();
    assert!(matches!(err, BrokerError::IntegrityMismatch { .. }));

    // A valid frame after the garbage still applies
    replicator.handle_frame("node-b", &valid).await.unwrap();
    assert_eq!(broker.directory().topics().len(), 1);
}

/// Test: Intake survives garbage on a live channel
#[tokio::test]
async fn intake_survives_garbage_frames() {
    let clock = Arc::new(ManualClock::new(0));
    let broker = test_broker("node-a", Arc::new(ScriptedTransport::accepting()), clock);
    broker.start().await.unwrap();

    let (ours, theirs) = LoopbackChannel::pair("node-a", "node-b");
    broker.attach_peer(Arc::new(ours)).await.unwrap();

    theirs.send(b"garbage".to_vec()).await.unwrap();
    theirs.send(vec![0xff; 64]).await.unwrap();
    let valid = Snapshot::seal("node-b", Topic::new("orders", "alice").stamped(1).into())
        .unwrap()
        .encode()
        .unwrap();
    theirs.send(valid).await.unwrap();

    let directory: Arc<Directory> = broker.directory().clone();
    assert!(eventually(Duration::from_secs(2), || directory.topics().len() == 1).await);

    broker.shutdown().await;
}

// =============================================================================
// Queue Pressure
// =============================================================================

/// Test: Flooding a stuck subscription evicts the oldest events, then the
/// stale in-flight result is discarded
#[tokio::test]
async fn queue_overflow_evicts_in_flight_head() {
    let transport = Arc::new(GatedTransport::new());
    let delivery = DeliveryConfig {
        queue_threshold: 3,
        ..delivery_config(1000, 3, 10)
    };
    let (engine, directory, _shutdown) = manual_engine(
        delivery,
        LivenessConfig::disabled(),
        transport.clone(),
        Arc::new(ScriptedProber::online()),
        Arc::new(ManualClock::new(0)),
    );
    let key = SubscriptionKey::new("sub", "bob");
    engine
        .upsert_subscription(Subscription::new("sub", "bob", "orders", "http://bob/events"))
        .await;
    engine.publish(Event::with_id("e0", "orders", "x", 0)).await;

    let worker = engine.worker(&key).unwrap();
    let in_flight = tokio::spawn({
        let worker = Arc::clone(&worker);
        async move { worker.step().await }
    });
    transport.wait_entered().await;

    for i in 1..=5 {
        engine.publish(Event::with_id(format!("e{}", i), "orders", "x", 0)).await;
    }
    assert_eq!(worker.queue_len().await, 3);

    transport.release();
    let step = in_flight.await.unwrap();
    assert_eq!(step, Step::Done(StepOutcome::Stale { event_id: "e0".into() }));
    assert!(directory.deliveries().is_empty());
    assert_eq!(worker.queue_len().await, 3);
}
