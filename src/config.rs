//! Configuration for the broker engine.
//!
//! This module defines all configuration types needed to run a broker node.
//! Configuration is passed to [`Broker::new()`](crate::Broker::new) and can be
//! constructed programmatically or deserialized from JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use broker_engine::config::{BrokerConfig, SeedNode};
//!
//! let config = BrokerConfig {
//!     local_node_id: "node-1".into(),
//!     seed_nodes: vec![SeedNode::new("node2.example.com", 6789)],
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! BrokerConfig
//! ├── local_node_id: String              # This node's unique ID
//! ├── settings: BrokerSettings
//! │   ├── delivery: DeliveryConfig       # Backoff, queue bound, dead-letter capacity
//! │   ├── liveness: LivenessConfig       # Probe cadence and offline threshold
//! │   ├── nodes: NodeDirectoryConfig     # Node timeout and sweep cadence
//! │   └── replication: ReplicationSettings # Intake rate limit, anti-entropy
//! └── seed_nodes: Vec<SeedNode>          # Cluster members known at startup
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "local_node_id": "node1.example.com:6789",
//!   "settings": {
//!     "delivery": { "retry_base_delay": "1s", "max_retry_attempts": 5 },
//!     "nodes": { "timeout": "30s" }
//!   },
//!   "seed_nodes": [ { "dns": "node2.example.com", "port": 6789 } ]
//! }
//! ```

use crate::error::{BrokerError, Result};
use crate::resilience::{RateLimitConfig, RetryConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `Broker::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// The identity of the local node. Used as the origin of outgoing snapshots.
    pub local_node_id: String,

    /// Tunable parameters for delivery, liveness, membership and replication.
    #[serde(default)]
    pub settings: BrokerSettings,

    /// Cluster members known at startup.
    #[serde(default)]
    pub seed_nodes: Vec<SeedNode>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            local_node_id: "local.dev.node.default".to_string(),
            settings: BrokerSettings::default(),
            seed_nodes: Vec::new(),
        }
    }
}

impl BrokerConfig {
    /// Create a config with short intervals for tests.
    pub fn for_testing(local_node_id: &str) -> Self {
        Self {
            local_node_id: local_node_id.to_string(),
            settings: BrokerSettings {
                delivery: DeliveryConfig::for_testing(),
                liveness: LivenessConfig::for_testing(),
                nodes: NodeDirectoryConfig::for_testing(),
                replication: ReplicationSettings::for_testing(),
            },
            seed_nodes: Vec::new(),
        }
    }

    /// Parse a config from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BrokerError::Config(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BrokerError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    /// Check the config for values the broker cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.local_node_id.trim().is_empty() {
            return Err(BrokerError::Config("local_node_id must not be empty".into()));
        }

        let delivery = &self.settings.delivery;
        if delivery.max_retry_attempts == 0 {
            return Err(BrokerError::Config("delivery.max_retry_attempts must be at least 1".into()));
        }
        if delivery.queue_threshold == 0 {
            return Err(BrokerError::Config("delivery.queue_threshold must be at least 1".into()));
        }
        if delivery.max_concurrent_deliveries == 0 {
            return Err(BrokerError::Config(
                "delivery.max_concurrent_deliveries must be at least 1".into(),
            ));
        }
        if self.settings.liveness.offline_after_failures == 0 {
            return Err(BrokerError::Config(
                "liveness.offline_after_failures must be at least 1".into(),
            ));
        }

        let durations = [
            ("delivery.retry_base_delay", &delivery.retry_base_delay),
            ("delivery.retry_max_delay", &delivery.retry_max_delay),
            ("delivery.attempt_timeout", &delivery.attempt_timeout),
            ("liveness.probe_interval", &self.settings.liveness.probe_interval),
            ("liveness.probe_timeout", &self.settings.liveness.probe_timeout),
            ("nodes.timeout", &self.settings.nodes.timeout),
            ("nodes.sweep_interval", &self.settings.nodes.sweep_interval),
            (
                "replication.anti_entropy_interval",
                &self.settings.replication.anti_entropy_interval,
            ),
        ];
        for (name, value) in durations {
            humantime::parse_duration(value)
                .map_err(|e| BrokerError::Config(format!("{} = {:?}: {}", name, value, e)))?;
        }

        for seed in &self.seed_nodes {
            if seed.dns.is_empty() || seed.port == 0 {
                return Err(BrokerError::Config(format!(
                    "seed node {}:{} is not addressable",
                    seed.dns, seed.port
                )));
            }
        }

        Ok(())
    }
}

/// General settings for the broker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerSettings {
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub liveness: LivenessConfig,
    #[serde(default)]
    pub nodes: NodeDirectoryConfig,
    #[serde(default)]
    pub replication: ReplicationSettings,
}

fn parse_or(value: &str, fallback: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(fallback)
}

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

// ═══════════════════════════════════════════════════════════════════════════════
// DeliveryConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Delivery engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// First retry delay. Each further retry doubles it.
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay: String,

    /// Failed attempts after which a retrying event is dropped.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Ceiling for the doubled retry delay.
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay: String,

    /// Queue length beyond which the oldest events are discarded.
    #[serde(default = "default_queue_threshold")]
    pub queue_threshold: usize,

    /// Dead-letter ids kept per subscription.
    #[serde(default = "default_dead_letter_capacity")]
    pub dead_letter_capacity: usize,

    /// Deadline for one transport call. Elapsed counts as a failure.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout: String,

    /// Transport calls in flight across all subscriptions.
    #[serde(default = "default_max_concurrent_deliveries")]
    pub max_concurrent_deliveries: usize,
}

fn default_retry_base_delay() -> String {
    "1s".to_string()
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_retry_max_delay() -> String {
    "5m".to_string()
}

fn default_queue_threshold() -> usize {
    10_000
}

fn default_dead_letter_capacity() -> usize {
    1_000
}

fn default_attempt_timeout() -> String {
    "30s".to_string()
}

fn default_max_concurrent_deliveries() -> usize {
    64
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_base_delay: default_retry_base_delay(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_max_delay: default_retry_max_delay(),
            queue_threshold: default_queue_threshold(),
            dead_letter_capacity: default_dead_letter_capacity(),
            attempt_timeout: default_attempt_timeout(),
            max_concurrent_deliveries: default_max_concurrent_deliveries(),
        }
    }
}

impl DeliveryConfig {
    /// Short timeouts, small bounds.
    pub fn for_testing() -> Self {
        Self {
            retry_base_delay: "10ms".to_string(),
            max_retry_attempts: 3,
            retry_max_delay: "1s".to_string(),
            queue_threshold: 100,
            dead_letter_capacity: 10,
            attempt_timeout: "500ms".to_string(),
            max_concurrent_deliveries: 8,
        }
    }

    pub fn retry_base_delay_duration(&self) -> Duration {
        parse_or(&self.retry_base_delay, Duration::from_secs(1))
    }

    pub fn retry_max_delay_duration(&self) -> Duration {
        parse_or(&self.retry_max_delay, Duration::from_secs(300))
    }

    pub fn attempt_timeout_duration(&self) -> Duration {
        parse_or(&self.attempt_timeout, Duration::from_secs(30))
    }

    /// Backoff schedule for the `Retry` error policy.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay: self.retry_base_delay_duration(),
            max_delay: self.retry_max_delay_duration(),
            backoff_factor: 2.0,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LivenessConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Liveness gating for subscription endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// Whether repeated failures can suspend a subscription.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// How often a suspended subscription is probed.
    #[serde(default = "default_probe_interval")]
    pub probe_interval: String,

    /// Deadline for one probe. Elapsed counts as offline.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: String,

    /// Consecutive delivery failures before a subscription is deemed offline.
    #[serde(default = "default_offline_after_failures")]
    pub offline_after_failures: u32,
}

fn default_probe_interval() -> String {
    "10s".to_string()
}

fn default_probe_timeout() -> String {
    "5s".to_string()
}

fn default_offline_after_failures() -> u32 {
    3
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval: default_probe_interval(),
            probe_timeout: default_probe_timeout(),
            offline_after_failures: default_offline_after_failures(),
        }
    }
}

impl LivenessConfig {
    pub fn for_testing() -> Self {
        Self {
            enabled: true,
            probe_interval: "20ms".to_string(),
            probe_timeout: "100ms".to_string(),
            offline_after_failures: 3,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn probe_interval_duration(&self) -> Duration {
        parse_or(&self.probe_interval, Duration::from_secs(10))
    }

    pub fn probe_timeout_duration(&self) -> Duration {
        parse_or(&self.probe_timeout, Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NodeDirectoryConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Node membership configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDirectoryConfig {
    /// A node not heard from for this long is evicted.
    #[serde(default = "default_node_timeout")]
    pub timeout: String,

    /// How often the timeout sweep runs.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: String,
}

fn default_node_timeout() -> String {
    "30s".to_string()
}

fn default_sweep_interval() -> String {
    "5s".to_string()
}

impl Default for NodeDirectoryConfig {
    fn default() -> Self {
        Self {
            timeout: default_node_timeout(),
            sweep_interval: default_sweep_interval(),
        }
    }
}

impl NodeDirectoryConfig {
    pub fn for_testing() -> Self {
        Self {
            timeout: "3s".to_string(),
            sweep_interval: "50ms".to_string(),
        }
    }

    pub fn timeout_duration(&self) -> Duration {
        parse_or(&self.timeout, Duration::from_secs(30))
    }

    pub fn sweep_interval_duration(&self) -> Duration {
        parse_or(&self.sweep_interval, Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot exchange configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationSettings {
    /// Rate limit incoming snapshots per peer.
    #[serde(default = "default_false")]
    pub rate_limit_enabled: bool,

    /// Sustained snapshots per second.
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    /// Burst above the sustained rate.
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    /// Periodically push every local record to each peer.
    #[serde(default = "default_true")]
    pub anti_entropy_enabled: bool,

    #[serde(default = "default_anti_entropy_interval")]
    pub anti_entropy_interval: String,

    /// Structural merge failures retained for inspection.
    #[serde(default = "default_max_conflict_reports")]
    pub max_conflict_reports: usize,

    /// Buffer of the directory change feed.
    #[serde(default = "default_change_feed_capacity")]
    pub change_feed_capacity: usize,
}

fn default_rate_limit_per_sec() -> u32 {
    1_000
}

fn default_rate_limit_burst() -> u32 {
    100
}

fn default_anti_entropy_interval() -> String {
    "60s".to_string()
}

fn default_max_conflict_reports() -> usize {
    100
}

fn default_change_feed_capacity() -> usize {
    1_024
}

impl Default for ReplicationSettings {
    fn default() -> Self {
        Self {
            rate_limit_enabled: false,
            rate_limit_per_sec: default_rate_limit_per_sec(),
            rate_limit_burst: default_rate_limit_burst(),
            anti_entropy_enabled: true,
            anti_entropy_interval: default_anti_entropy_interval(),
            max_conflict_reports: default_max_conflict_reports(),
            change_feed_capacity: default_change_feed_capacity(),
        }
    }
}

impl ReplicationSettings {
    pub fn for_testing() -> Self {
        Self {
            anti_entropy_interval: "100ms".to_string(),
            max_conflict_reports: 16,
            ..Self::default()
        }
    }

    pub fn anti_entropy_interval_duration(&self) -> Duration {
        parse_or(&self.anti_entropy_interval, Duration::from_secs(60))
    }

    /// Rate limit for snapshot intake, `None` if disabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        if self.rate_limit_enabled {
            Some(RateLimitConfig {
                burst_size: self.rate_limit_burst,
                refill_rate: self.rate_limit_per_sec,
            })
        } else {
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SeedNode
// ═══════════════════════════════════════════════════════════════════════════════

/// A cluster member known at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedNode {
    pub dns: String,
    pub port: u16,
    #[serde(default)]
    pub description: String,
}

impl SeedNode {
    pub fn new(dns: &str, port: u16) -> Self {
        Self {
            dns: dns.to_string(),
            port,
            description: String::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
