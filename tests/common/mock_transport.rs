//! Mock delivery collaborators.
//!
//! Records every call for assertions. Outcomes are scripted per call so
//! tests can reproduce exact failure sequences.

use broker_engine::delivery::{BoxFuture, DeliveryTransport, Liveness, LivenessProber, TransportOutcome};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// A recorded attempt() call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptCall {
    pub url: String,
    pub payload: Vec<u8>,
}

/// Transport that replays scripted outcomes, then falls back to a default.
///
/// # Example
/// ```rust,ignore
/// let transport = ScriptedTransport::failing_then_ok(2, "503");
/// // first two attempts fail with "503", the rest succeed
/// ```
pub struct ScriptedTransport {
    script: Mutex<VecDeque<TransportOutcome>>,
    fallback: TransportOutcome,
    calls: Mutex<Vec<AttemptCall>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<TransportOutcome>, fallback: TransportOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every attempt succeeds.
    pub fn accepting() -> Self {
        Self::new(Vec::new(), TransportOutcome::Ok)
    }

    /// Every attempt fails with `code`.
    pub fn failing(code: &str) -> Self {
        Self::new(Vec::new(), TransportOutcome::Failure(code.to_string()))
    }

    /// The first `n` attempts fail with `code`, the rest succeed.
    #[allow(dead_code)]
    pub fn failing_then_ok(n: usize, code: &str) -> Self {
        Self::new(
            vec![TransportOutcome::Failure(code.to_string()); n],
            TransportOutcome::Ok,
        )
    }

    pub fn calls(&self) -> Vec<AttemptCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl DeliveryTransport for ScriptedTransport {
    fn attempt<'a>(&'a self, delivery_url: &'a str, payload: &'a [u8]) -> BoxFuture<'a, TransportOutcome> {
        self.calls.lock().unwrap().push(AttemptCall {
            url: delivery_url.to_string(),
            payload: payload.to_vec(),
        });
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or_else(|| self.fallback.clone());
        Box::pin(async move { outcome })
    }
}

/// Transport that never answers for URLs starting with `hang_prefix`.
pub struct HangingTransport {
    hang_prefix: String,
    calls: Mutex<Vec<AttemptCall>>,
}

impl HangingTransport {
    pub fn new(hang_prefix: &str) -> Self {
        Self {
            hang_prefix: hang_prefix.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub fn calls(&self) -> Vec<AttemptCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl DeliveryTransport for HangingTransport {
    fn attempt<'a>(&'a self, delivery_url: &'a str, payload: &'a [u8]) -> BoxFuture<'a, TransportOutcome> {
        self.calls.lock().unwrap().push(AttemptCall {
            url: delivery_url.to_string(),
            payload: payload.to_vec(),
        });
        let hang = delivery_url.starts_with(&self.hang_prefix);
        Box::pin(async move {
            if hang {
                std::future::pending::<()>().await;
            }
            TransportOutcome::Ok
        })
    }
}

/// Transport whose calls block until [`GatedTransport::release`].
pub struct GatedTransport {
    entered: Notify,
    gate: Notify,
}

impl GatedTransport {
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            gate: Notify::new(),
        }
    }

    /// Wait until a call is in flight.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let the in-flight call return `Ok`.
    pub fn release(&self) {
        self.gate.notify_one();
    }
}

impl DeliveryTransport for GatedTransport {
    fn attempt<'a>(&'a self, _delivery_url: &'a str, _payload: &'a [u8]) -> BoxFuture<'a, TransportOutcome> {
        Box::pin(async move {
            self.entered.notify_one();
            self.gate.notified().await;
            TransportOutcome::Ok
        })
    }
}

/// Prober that replays scripted results, then reports online.
pub struct ScriptedProber {
    script: Mutex<VecDeque<Liveness>>,
    probes: Mutex<Vec<String>>,
}

impl ScriptedProber {
    pub fn new(script: Vec<Liveness>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            probes: Mutex::new(Vec::new()),
        }
    }

    pub fn online() -> Self {
        Self::new(Vec::new())
    }

    #[allow(dead_code)]
    pub fn probes(&self) -> Vec<String> {
        self.probes.lock().unwrap().clone()
    }
}

impl LivenessProber for ScriptedProber {
    fn probe<'a>(&'a self, liveliness_url: &'a str) -> BoxFuture<'a, Liveness> {
        self.probes.lock().unwrap().push(liveliness_url.to_string());
        let result = self.script.lock().unwrap().pop_front().unwrap_or(Liveness::Online);
        Box::pin(async move { result })
    }
}
