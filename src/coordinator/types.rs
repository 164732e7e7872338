//! Broker state types.
//!
//! Defines the state machine for the broker lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Running
//!    │                              │
//!    │                    shutdown()│
//!    │                              ↓
//!    └──── shutdown() ────→  ShuttingDown ───→ Stopped
//!
//!        (start() on invalid config / seed) ───→ Failed
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `Broker::new()`. No tasks spawned.
//! - **Running**: Workers, node sweeper and anti-entropy running.
//! - **ShuttingDown**: `shutdown()` called. Waiting for tasks to exit.
//! - **Stopped**: Graceful shutdown complete. Safe to drop.
//! - **Failed**: Startup failed. The broker cannot continue.

/// State of the broker.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    /// Created but not started.
    Created,

    /// Delivering events and replicating records.
    Running,

    /// Shutting down gracefully.
    ///
    /// In-flight transport calls are allowed to finish.
    ShuttingDown,

    /// Stopped cleanly.
    Stopped,

    /// Failed to start.
    Failed,
}

impl std::fmt::Display for BrokerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerState::Created => write!(f, "Created"),
            BrokerState::Running => write!(f, "Running"),
            BrokerState::ShuttingDown => write!(f, "ShuttingDown"),
            BrokerState::Stopped => write!(f, "Stopped"),
            BrokerState::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time health of one broker node.
///
/// Collected from in-memory state only; building it performs no I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub state: BrokerState,
    /// Running and accepting publishes.
    pub ready: bool,
    /// Ready with no subscription suspended and no recent conflicts.
    pub healthy: bool,
    pub subscriptions: usize,
    pub suspended_subscriptions: usize,
    pub queued_events: usize,
    pub dead_lettered: usize,
    pub known_nodes: usize,
    pub peers: usize,
    pub recent_conflicts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_state_display() {
        assert_eq!(BrokerState::Created.to_string(), "Created");
        assert_eq!(BrokerState::Running.to_string(), "Running");
        assert_eq!(BrokerState::ShuttingDown.to_string(), "ShuttingDown");
        assert_eq!(BrokerState::Stopped.to_string(), "Stopped");
        assert_eq!(BrokerState::Failed.to_string(), "Failed");
    }

    #[test]
    fn test_broker_state_equality() {
        assert_eq!(BrokerState::Created, BrokerState::Created);
        assert_ne!(BrokerState::Created, BrokerState::Running);
    }

    #[test]
    fn test_broker_state_copy() {
        let state = BrokerState::Failed;
        let copied: BrokerState = state;
        assert_eq!(state, copied);
    }
}
