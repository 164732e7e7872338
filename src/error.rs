// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the broker engine.
//!
//! Errors fall into two families: **structural** errors that the replication
//! protocol cannot resolve on its own and must surface to an operator, and
//! **recoverable** errors that are absorbed locally by the delivery engine
//! or the node directory.
//!
//! # Error Categories
//!
//! | Error Type | Recoverable | Description |
//! |------------|-------------|-------------|
//! | `MergeConflict` | No | Equal timestamps, diverging content |
//! | `TypeMismatch` | No | Merge attempted across record kinds (caller bug) |
//! | `UnsupportedOperation` | No | Update attempted on an immutable record |
//! | `DeliveryFailure` | Yes | Transport reported non-success; routed through the error policy |
//! | `Timeout` | Yes | Endpoint or node unresponsive |
//! | `Codec` | No | Snapshot JSON could not be (de)serialized |
//! | `IntegrityMismatch` | No | Snapshot digest does not match its content |
//! | `Pem` | No | Malformed public-key armor |
//! | `Config` | No | Configuration invalid |
//! | `InvalidState` | No | Broker lifecycle violation |
//! | `NotFound` | No | Referenced record does not exist |
//! | `Shutdown` | No | Broker is shutting down |
//! | `Internal` | No | Unexpected internal error |
//!
//! Use [`BrokerError::is_recoverable()`] to decide whether an error is handled
//! in place, and [`BrokerError::is_structural()`] to decide whether it must
//! reach the operator-visible layer.

use crate::record::RecordKind;
use thiserror::Error;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Errors that can occur inside the broker core.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Two independent updates carry the same timestamp but different content.
    ///
    /// The merge protocol is last-writer-wins on wall-clock time and has no
    /// tiebreak, so this is reported instead of arbitrated.
    #[error("Merge conflict on {kind} {identity}: equal timestamps ({timestamp:?}) but records differ")]
    MergeConflict {
        kind: RecordKind,
        identity: String,
        timestamp: Option<u64>,
    },

    /// A merge was attempted between two different record kinds.
    #[error("Type mismatch: cannot merge {found} into {expected}")]
    TypeMismatch {
        expected: RecordKind,
        found: RecordKind,
    },

    /// An update was attempted on a write-once record.
    #[error("Unsupported operation {operation} on immutable {kind}")]
    UnsupportedOperation {
        kind: RecordKind,
        operation: &'static str,
    },

    /// The delivery transport did not return an explicit OK.
    #[error("Delivery failure ({subscription}, event {event_id}): {code}")]
    DeliveryFailure {
        subscription: String,
        event_id: String,
        code: String,
    },

    /// An endpoint, probe, or node did not answer in time.
    #[error("Timeout waiting for {target} after {elapsed_ms}ms")]
    Timeout { target: String, elapsed_ms: u64 },

    /// Snapshot JSON encoding or decoding failed.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Snapshot content hash does not match the carried digest.
    #[error("Snapshot integrity mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Public-key PEM armor could not be decoded.
    #[error("PEM error: {0}")]
    Pem(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Broker state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// A referenced record does not exist locally.
    #[error("{kind} not found: {identity}")]
    NotFound { kind: RecordKind, identity: String },

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Build a delivery failure from a transport failure code.
    pub fn delivery(
        subscription: impl Into<String>,
        event_id: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self::DeliveryFailure {
            subscription: subscription.into(),
            event_id: event_id.into(),
            code: code.into(),
        }
    }

    /// Build a timeout error.
    pub fn timeout(target: impl Into<String>, elapsed: std::time::Duration) -> Self {
        Self::Timeout {
            target: target.into(),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Check if this error is absorbed locally (error policy, liveness gate, eviction).
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::DeliveryFailure { .. } => true,
            Self::Timeout { .. } => true,
            Self::MergeConflict { .. } => false,
            Self::TypeMismatch { .. } => false,
            Self::UnsupportedOperation { .. } => false,
            Self::Codec(_) => false,
            Self::IntegrityMismatch { .. } => false,
            Self::Pem(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::NotFound { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Check if this error has no automatic resolution and must be reported.
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::MergeConflict { .. } | Self::TypeMismatch { .. })
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MergeConflict { .. } => "merge_conflict",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::UnsupportedOperation { .. } => "unsupported_operation",
            Self::DeliveryFailure { .. } => "delivery_failure",
            Self::Timeout { .. } => "timeout",
            Self::Codec(_) => "codec",
            Self::IntegrityMismatch { .. } => "integrity_mismatch",
            Self::Pem(_) => "pem",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotFound { .. } => "not_found",
            Self::Shutdown => "shutdown",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_delivery_failure_is_recoverable() {
        let err = BrokerError::delivery("orders-sub", "evt-1", "503");
        assert!(err.is_recoverable());
        assert!(!err.is_structural());
        let msg = err.to_string();
        assert!(msg.contains("orders-sub"));
        assert!(msg.contains("evt-1"));
        assert!(msg.contains("503"));
    }

    #[test]
    fn test_timeout_is_recoverable() {
        let err = BrokerError::timeout("http://sub/ping", Duration::from_millis(250));
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn test_merge_conflict_is_structural() {
        let err = BrokerError::MergeConflict {
            kind: RecordKind::Topic,
            identity: "orders/alice".to_string(),
            timestamp: Some(42),
        };
        assert!(err.is_structural());
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("orders/alice"));
    }

    #[test]
    fn test_type_mismatch_is_structural() {
        let err = BrokerError::TypeMismatch {
            expected: RecordKind::User,
            found: RecordKind::Node,
        };
        assert!(err.is_structural());
        let msg = err.to_string();
        assert!(msg.contains("user"));
        assert!(msg.contains("node"));
    }

    #[test]
    fn test_unsupported_operation_is_fatal() {
        let err = BrokerError::UnsupportedOperation {
            kind: RecordKind::Delivery,
            operation: "update_from",
        };
        assert!(!err.is_recoverable());
        assert!(!err.is_structural());
        assert!(err.to_string().contains("update_from"));
    }

    #[test]
    fn test_invalid_state_formatting() {
        let err = BrokerError::InvalidState {
            expected: "Created".to_string(),
            actual: "Running".to_string(),
        };
        assert!(err.to_string().contains("Created"));
        assert!(err.to_string().contains("Running"));
    }

    #[test]
    fn test_codec_from_serde() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: BrokerError = parse.unwrap_err().into();
        assert_eq!(err.label(), "codec");
        assert!(!err.is_recoverable());
    }
}
