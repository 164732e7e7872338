//! Resilience utilities: retry backoff, rate limiting, bulkheads.
//!
//! - [`RetryConfig`]: Exponential backoff for the `Retry` error policy
//! - [`RateLimiter`]: Token bucket on snapshot intake
//! - [`Bulkhead`]: Semaphore capping concurrent transport calls
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), broker_engine::resilience::BulkheadFull> {
//! use broker_engine::resilience::{RateLimiter, Bulkhead, RateLimitConfig};
//!
//! // Rate limit: max 1000 snapshots/sec with burst of 100
//! let limiter = RateLimiter::new(RateLimitConfig::default());
//! limiter.acquire().await; // Blocks if over limit
//!
//! // Bulkhead: max 10 concurrent deliveries
//! let bulkhead = Bulkhead::new(10);
//! let _permit = bulkhead.acquire().await?;
//! // permit dropped = slot released
//! # Ok(())
//! # }
//! ```

use governor::{
    clock::DefaultClock,
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Backoff schedule for retried deliveries.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failed attempts after which the event is dropped.
    pub max_attempts: u32,

    /// Delay after the first failure.
    pub initial_delay: Duration,

    /// Ceiling for exponential backoff.
    pub max_delay: Duration,

    /// Backoff multiplier (2.0 = double delay each retry).
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Fast schedule for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
        }
    }

    /// Delay before retrying after the `attempt`-th failure (1-indexed).
    ///
    /// ```text
    /// Attempt  Delay (initial 1s)
    /// -------  -----
    /// 1        1s
    /// 2        2s
    /// 3        4s
    /// 4        8s
    /// ...      capped at max_delay
    /// ```
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = (attempt - 1).min(i32::MAX as u32) as i32;
        let multiplier = self.backoff_factor.powi(exponent);
        let delay_secs = self.initial_delay.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }

        // Round through millis so a 1s base yields exactly 1000, 2000, 4000...
        Duration::from_millis((delay_secs * 1000.0).round() as u64)
    }

    /// True once `attempts` failures have used up the retry budget.
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

// =============================================================================
// Rate Limiting
// =============================================================================

/// Configuration for rate limiting.
///
/// Uses a token bucket algorithm: tokens refill at `refill_rate` per second,
/// up to `burst_size` tokens. Each operation consumes one token.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum tokens that can be accumulated (burst capacity).
    pub burst_size: u32,

    /// Tokens added per second (sustained rate).
    pub refill_rate: u32,
}

impl Default for RateLimitConfig {
    /// Default: 1000 ops/sec with burst of 100.
    fn default() -> Self {
        Self {
            burst_size: 100,
            refill_rate: 1000,
        }
    }
}

/// Token bucket rate limiter.
pub struct RateLimiter {
    limiter: GovLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(config.refill_rate).unwrap_or(NonZeroU32::MIN))
            .allow_burst(NonZeroU32::new(config.burst_size).unwrap_or(NonZeroU32::MIN));

        Self {
            limiter: GovLimiter::direct(quota),
        }
    }

    /// Acquire a permit, waiting until one is available. Cancel-safe.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}

// =============================================================================
// Bulkhead (Concurrency Limiter)
// =============================================================================

/// Error when bulkhead is full.
#[derive(Debug, Clone, thiserror::Error)]
#[error("bulkhead full: max {max_concurrent} concurrent operations")]
pub struct BulkheadFull {
    /// Maximum concurrent operations allowed.
    pub max_concurrent: usize,
}

/// Limits concurrent transport calls across all subscriptions.
///
/// Each subscription worker takes a permit for the duration of its
/// transport call, so a burst of slow endpoints cannot exhaust sockets.
#[derive(Debug)]
pub struct Bulkhead {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

impl Bulkhead {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// Acquire a permit, waiting if necessary.
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, BulkheadFull> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BulkheadFull {
                max_concurrent: self.max_concurrent,
            })
    }

    /// Reject all pending and future acquires.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_base() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(300),
            backoff_factor: 2.0,
        };

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(8000));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let config = RetryConfig {
            max_attempts: 100,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        };
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(20), Duration::from_secs(10));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_for_attempt_zero() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), config.initial_delay);
    }

    #[test]
    fn test_is_exhausted() {
        let config = RetryConfig::testing();
        assert!(!config.is_exhausted(2));
        assert!(config.is_exhausted(3));
        assert!(config.is_exhausted(4));
    }

    // =========================================================================
    // Rate Limiter Tests
    // =========================================================================

    #[tokio::test]
    async fn test_rate_limiter_burst_is_immediate() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst_size: 5,
            refill_rate: 1,
        });

        let start = std::time::Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100), "burst should not wait");

        let sixth = tokio::time::timeout(Duration::from_millis(100), limiter.acquire()).await;
        assert!(sixth.is_err(), "should wait once burst is exhausted");
    }

    #[tokio::test]
    async fn test_rate_limiter_acquire_refills() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst_size: 1,
            refill_rate: 1000,
        });

        limiter.acquire().await;
        let start = std::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(100), "should refill quickly");
    }

    // =========================================================================
    // Bulkhead Tests
    // =========================================================================

    #[tokio::test]
    async fn test_bulkhead_bounds_concurrency() {
        let bulkhead = Bulkhead::new(2);

        let p1 = bulkhead.acquire().await.unwrap();
        let _p2 = bulkhead.acquire().await.unwrap();
        let third = tokio::time::timeout(Duration::from_millis(20), bulkhead.acquire()).await;
        assert!(third.is_err(), "third permit should wait");

        drop(p1);
        let third = tokio::time::timeout(Duration::from_millis(100), bulkhead.acquire()).await;
        assert!(matches!(third, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn test_bulkhead_acquire_waits() {
        let bulkhead = Arc::new(Bulkhead::new(1));
        let bulkhead2 = Arc::clone(&bulkhead);

        let permit = bulkhead.acquire().await.unwrap();

        let handle = tokio::spawn(async move {
            let start = std::time::Instant::now();
            let _p = bulkhead2.acquire().await.unwrap();
            start.elapsed()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(permit);

        let wait_time = handle.await.unwrap();
        assert!(wait_time >= Duration::from_millis(40), "should have waited");
    }

    #[tokio::test]
    async fn test_closed_bulkhead_rejects() {
        let bulkhead = Bulkhead::new(1);
        bulkhead.close();
        let err = bulkhead.acquire().await.unwrap_err();
        assert_eq!(err.to_string(), "bulkhead full: max 1 concurrent operations");
    }
}
