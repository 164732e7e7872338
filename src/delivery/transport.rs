// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Delivery collaborator traits.
//!
//! The broker core never performs I/O itself. The embedding daemon supplies
//! an HTTP (or other) implementation of these traits.
//!
//! # Example
//!
//! ```rust,no_run
//! use broker_engine::delivery::{BoxFuture, DeliveryTransport, TransportOutcome};
//!
//! struct AcceptAll;
//!
//! impl DeliveryTransport for AcceptAll {
//!     fn attempt<'a>(&'a self, _url: &'a str, _payload: &'a [u8]) -> BoxFuture<'a, TransportOutcome> {
//!         Box::pin(async { TransportOutcome::Ok })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (keeps the traits object-safe).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOutcome {
    /// The endpoint explicitly acknowledged the event.
    Ok,
    /// Anything else, with a transport-specific code (status, error text).
    Failure(String),
}

/// Performs delivery of one event payload to a subscription endpoint.
///
/// Only an explicit [`TransportOutcome::Ok`] counts as success. The call may
/// block on I/O; the engine wraps it in a timeout and never holds a lock
/// across it.
pub trait DeliveryTransport: Send + Sync + 'static {
    fn attempt<'a>(&'a self, delivery_url: &'a str, payload: &'a [u8]) -> BoxFuture<'a, TransportOutcome>;
}

/// Result of a liveliness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Online,
    Offline,
}

/// Checks whether a suspended subscription's endpoint is reachable again.
pub trait LivenessProber: Send + Sync + 'static {
    fn probe<'a>(&'a self, liveliness_url: &'a str) -> BoxFuture<'a, Liveness>;
}

/// Prober that reports every endpoint online.
///
/// Used when the embedding daemon has no out-of-band health endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysOnline;

impl LivenessProber for AlwaysOnline {
    fn probe<'a>(&'a self, _liveliness_url: &'a str) -> BoxFuture<'a, Liveness> {
        Box::pin(async { Liveness::Online })
    }
}
