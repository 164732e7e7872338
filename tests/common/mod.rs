//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Scripted, hanging and gated delivery transports
//! - A scripted liveliness prober
//! - Broker/engine builders and polling helpers

#![allow(dead_code)]

pub mod mock_transport;

pub use mock_transport::*;

use broker_engine::clock::Clock;
use broker_engine::config::{BrokerConfig, DeliveryConfig, LivenessConfig};
use broker_engine::delivery::{DeliveryEngine, DeliveryTransport, LivenessProber};
use broker_engine::{Broker, Directory};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Engine wired to a fresh directory, not started.
///
/// Workers are driven by calling `step()` directly, so tests control every
/// attempt and every clock reading.
pub fn manual_engine(
    delivery: DeliveryConfig,
    liveness: LivenessConfig,
    transport: Arc<dyn DeliveryTransport>,
    prober: Arc<dyn LivenessProber>,
    clock: Arc<dyn Clock>,
) -> (Arc<DeliveryEngine>, Arc<Directory>, watch::Sender<bool>) {
    let directory = Arc::new(Directory::new(256));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let engine = Arc::new(DeliveryEngine::new(
        &delivery,
        &liveness,
        transport,
        prober,
        clock,
        directory.clone(),
        shutdown_rx,
    ));
    (engine, directory, shutdown_tx)
}

/// Delivery settings with a given base delay and attempt cap.
pub fn delivery_config(base_delay_ms: u64, max_attempts: u32, dead_letter_capacity: usize) -> DeliveryConfig {
    DeliveryConfig {
        retry_base_delay: format!("{}ms", base_delay_ms),
        max_retry_attempts: max_attempts,
        retry_max_delay: "10m".to_string(),
        dead_letter_capacity,
        ..DeliveryConfig::for_testing()
    }
}

/// Broker built from a testing config.
pub fn test_broker(
    node_id: &str,
    transport: Arc<dyn DeliveryTransport>,
    clock: Arc<dyn Clock>,
) -> Broker {
    let mut config = BrokerConfig::for_testing(node_id);
    config.settings.liveness = LivenessConfig::disabled();
    Broker::new(config, transport, Arc::new(ScriptedProber::online()), clock).unwrap()
}

/// Poll `condition` every 10ms until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
