//! # Broker Engine
//!
//! The core of a clustered publish/subscribe broker: replicated directory
//! state that converges without a central coordinator, and per-subscription
//! delivery with drop / retry / dead-letter error policies.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                               broker-engine                               │
//! │                                                                           │
//! │  ┌─────────────┐   publish   ┌────────────────┐   attempt   ┌───────────┐ │
//! │  │   Broker    │────────────►│ DeliveryEngine │────────────►│ Transport │ │
//! │  │ (lifecycle) │             │ (worker / sub) │             │ (daemon)  │ │
//! │  └─────────────┘             └────────────────┘             └───────────┘ │
//! │         │                            │ receipts                           │
//! │         ▼                            ▼                                    │
//! │  ┌─────────────────────────────────────────────┐     ┌──────────────────┐ │
//! │  │ Directory: users, topics, subscriptions,    │◄───►│ Replicator       │ │
//! │  │ deliveries, nodes  (merge per identity)     │     │ (snapshots, AE)  │ │
//! │  └─────────────────────────────────────────────┘     └──────────────────┘ │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Merge Protocol
//!
//! Every shared record carries an identity key and an optional last-change
//! timestamp. Remote copies are reconciled last-writer-wins on that
//! timestamp; equal timestamps with diverging content are reported as
//! [`BrokerError::MergeConflict`] rather than arbitrated. See the [`merge`](mod@merge) module.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use broker_engine::{Broker, BrokerConfig, SystemClock};
//! use broker_engine::delivery::{AlwaysOnline, BoxFuture, DeliveryTransport, TransportOutcome};
//! use broker_engine::record::{Event, Subscription, Topic};
//! use std::sync::Arc;
//!
//! struct Http;
//!
//! impl DeliveryTransport for Http {
//!     fn attempt<'a>(&'a self, _url: &'a str, _payload: &'a [u8]) -> BoxFuture<'a, TransportOutcome> {
//!         Box::pin(async { TransportOutcome::Ok })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> broker_engine::Result<()> {
//!     let broker = Broker::new(
//!         BrokerConfig::default(),
//!         Arc::new(Http),
//!         Arc::new(AlwaysOnline),
//!         Arc::new(SystemClock),
//!     )?;
//!     broker.start().await?;
//!
//!     broker.create_topic(Topic::new("orders", "alice"))?;
//!     broker
//!         .create_subscription(Subscription::new("audit", "bob", "orders", "http://bob/events"))
//!         .await?;
//!     broker.publish(Event::new("orders", b"{}".to_vec(), 0)).await?;
//!
//!     broker.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod coordinator;
pub mod dead_letter;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod node;
pub mod pem;
pub mod queue;
pub mod record;
pub mod replication;
pub mod resilience;
pub mod store;

// Re-exports for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BrokerConfig, BrokerSettings, DeliveryConfig, LivenessConfig, NodeDirectoryConfig, ReplicationSettings, SeedNode};
pub use coordinator::{Broker, BrokerState, HealthCheck};
pub use delivery::{DeliveryEngine, DeliveryTransport, LivenessProber};
pub use directory::{ChangeOrigin, Directory, DirectoryChange};
pub use error::{BrokerError, Result};
pub use merge::{merge, merge_any, reconcile, MergeOutcome, ReconcileReport, UnchangedReason};
pub use node::{HeartbeatOutcome, NodeDirectory};
pub use record::{AnyRecord, Record, RecordKind};
pub use replication::{ConflictReport, LoopbackChannel, ReplicationChannel, Replicator, Snapshot};
