//! Bounded retry with exponential backoff around [`TimeReconciler::sync_now`].
//!
//! Delays are computed, not chained, and the sleep is injected so tests can
//! observe the schedule without waiting for it.

use std::time::Duration;

use tracing::{debug, warn};

use crate::reconciler::TimeReconciler;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each later attempt.
    pub initial_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay to wait before `attempt` (1-based). Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 2);
        self.initial_delay.saturating_mul(factor)
    }
}

/// Suspends the retry loop between attempts.
#[async_trait::async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real delay on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait::async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Succeeded on the given (1-based) attempt.
    Synced { attempt: u32 },
    /// Every attempt failed.
    Exhausted { attempts: u32 },
}

impl RetryOutcome {
    pub fn is_synced(&self) -> bool {
        matches!(self, RetryOutcome::Synced { .. })
    }
}

pub async fn sync_with_retry(
    reconciler: &TimeReconciler,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> RetryOutcome {
    let attempts = policy.attempts();
    for attempt in 1..=attempts {
        let delay = policy.delay_before(attempt);
        if !delay.is_zero() {
            debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before sync retry");
            sleeper.sleep(delay).await;
        }
        if reconciler.sync_now().await {
            return RetryOutcome::Synced { attempt };
        }
    }
    warn!(attempts, "clock sync retries exhausted; running on unverified time");
    RetryOutcome::Exhausted { attempts }
}
