//! # Backoff and Retry
//!
//! [`ReconnectBackoff`] computes the delay before each background
//! reconnection attempt. [`with_retry`] is a caller-side helper for
//! application calls: the manager itself never retries an `invoke`.
//!
//! ## Reconnection delay
//!
//! `delay(n) = base * min(2^n, cap) + jitter`, jitter uniform in
//! `[0, max_jitter)`. With the defaults (5 s base, cap 8, 1 s jitter):
//!
//! | Attempt | Delay range |
//! |---------|-------------|
//! | 0 | 5.0 s – 6.0 s |
//! | 1 | 10.0 s – 11.0 s |
//! | 2 | 20.0 s – 21.0 s |
//! | 3+ | 40.0 s – 41.0 s |
//!
//! ## Retrying reads through a reconnect
//!
//! ```no_run
//! use fieldops_realtime::retry::{RetryPolicy, with_retry};
//!
//! # async fn demo(manager: fieldops_realtime::HubManager) -> fieldops_realtime::HubResult<()> {
//! let open_calls: serde_json::Value = with_retry(&RetryPolicy::idempotent(), || {
//!     manager.invoke("dispatch", "GetOpenCalls", &())
//! })
//! .await?;
//! # let _ = open_calls;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use rand::Rng;

use crate::config::ReconnectConfig;
use crate::error::HubResult;

/// Delay schedule for background reconnection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    base_delay: Duration,
    max_multiplier: u32,
    max_jitter: Duration,
}

impl ReconnectBackoff {
    pub fn new(base_delay: Duration, max_multiplier: u32, max_jitter: Duration) -> Self {
        Self {
            base_delay,
            max_multiplier: max_multiplier.max(1),
            max_jitter,
        }
    }

    /// Multiplier applied to the base delay for a 0-based attempt.
    pub fn multiplier(&self, attempt: u32) -> u32 {
        let exp = attempt.min(31);
        (1u32 << exp).min(self.max_multiplier)
    }

    /// Delay without jitter.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(self.multiplier(attempt))
    }

    /// Delay with an explicit jitter value, clamped below `max_jitter`.
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            jitter.min(self.max_jitter.saturating_sub(Duration::from_nanos(1)))
        };
        self.base_delay_for(attempt) + jitter
    }

    /// Delay with random jitter drawn from `[0, max_jitter)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            let nanos = u64::try_from(self.max_jitter.as_nanos()).unwrap_or(u64::MAX);
            Duration::from_nanos(rand::thread_rng().gen_range(0..nanos))
        };
        self.delay_with_jitter(attempt, jitter)
    }
}

impl From<&ReconnectConfig> for ReconnectBackoff {
    fn from(config: &ReconnectConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            config.max_backoff_multiplier,
            Duration::from_millis(config.max_jitter_ms),
        )
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

/// How a caller retries a failed hub call.
///
/// Only errors for which [`HubError::is_retryable`](crate::HubError::is_retryable)
/// holds are retried, so a
/// `HubNotConnected` or a server-side `InvokeFailed` surfaces on the first
/// failure. The delay doubles after every retry up to `max_delay`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// Single attempt. Use for calls with side effects, such as
    /// acknowledging a dispatch.
    #[must_use]
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Rides out a short reconnection: 4 retries starting at 1 s, capped at
    /// 8 s. Meant for idempotent reads.
    #[must_use]
    pub fn idempotent() -> Self {
        Self::new(4, Duration::from_secs(1), Duration::from_secs(8))
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_before(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(31);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Run `call` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of retries.
///
/// # Errors
/// The error of the last attempt.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, mut call: F) -> HubResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = HubResult<T>>,
{
    let mut retry = 0;
    loop {
        let err = match call().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if retry >= policy.max_retries || !err.is_retryable() {
            return Err(err);
        }

        retry += 1;
        let delay = policy.delay_before(retry);
        tracing::debug!(
            retry,
            max_retries = policy.max_retries,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "Hub call failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HubError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_schedule_matches_table() {
        let backoff = ReconnectBackoff::default();
        assert_eq!(backoff.base_delay_for(0), Duration::from_secs(5));
        assert_eq!(backoff.base_delay_for(1), Duration::from_secs(10));
        assert_eq!(backoff.base_delay_for(2), Duration::from_secs(20));
        assert_eq!(backoff.base_delay_for(3), Duration::from_secs(40));
        assert_eq!(backoff.base_delay_for(4), Duration::from_secs(40));
        assert_eq!(backoff.base_delay_for(10), Duration::from_secs(40));
        assert_eq!(backoff.base_delay_for(u32::MAX), Duration::from_secs(40));
    }

    #[test]
    fn test_fixed_jitter() {
        let backoff = ReconnectBackoff::default();
        let half = Duration::from_millis(500);
        assert_eq!(backoff.delay_with_jitter(0, half), Duration::from_millis(5500));
        assert_eq!(backoff.delay_with_jitter(1, half), Duration::from_millis(10500));
        assert_eq!(backoff.delay_with_jitter(2, half), Duration::from_millis(20500));
        assert_eq!(backoff.delay_with_jitter(3, half), Duration::from_millis(40500));
        assert_eq!(backoff.delay_with_jitter(4, half), Duration::from_millis(40500));
        // Jitter never reaches the upper bound.
        assert!(backoff.delay_with_jitter(0, Duration::from_secs(5)) < Duration::from_secs(6));
    }

    #[test]
    fn test_random_jitter_stays_in_range() {
        let backoff = ReconnectBackoff::default();
        for _ in 0..200 {
            let d0 = backoff.delay_for_attempt(0);
            assert!(d0 >= Duration::from_secs(5) && d0 < Duration::from_secs(6), "{d0:?}");
            let d3 = backoff.delay_for_attempt(3);
            assert!(d3 >= Duration::from_secs(40) && d3 < Duration::from_secs(41), "{d3:?}");
            let d10 = backoff.delay_for_attempt(10);
            assert!(d10 >= Duration::from_secs(40) && d10 < Duration::from_secs(41), "{d10:?}");
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let backoff = ReconnectBackoff::new(Duration::from_millis(10), 4, Duration::ZERO);
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(10));
        assert_eq!(backoff.delay_for_attempt(5), Duration::from_millis(40));
    }

    #[test]
    fn test_retry_delays_double_up_to_cap() {
        let policy = RetryPolicy::idempotent();
        let delays: Vec<u64> = (1..=5)
            .map(|retry| u64::try_from(policy.delay_before(retry).as_millis()).unwrap())
            .collect();
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 8_000]);
        assert_eq!(RetryPolicy::default(), RetryPolicy::none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnecting_hub_is_retried_until_back() {
        let calls = AtomicU32::new(0);

        let acked = with_retry(&RetryPolicy::idempotent(), || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call < 2 {
                    Err(HubError::HubReconnecting {
                        hub: "dispatch".into(),
                        method: "GetOpenCalls".into(),
                    })
                } else {
                    Ok(vec!["call-17"])
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(acked, vec!["call-17"]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_back_last_error_when_retries_run_out() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(5), Duration::from_millis(5));

        let err = with_retry(&policy, || {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move { Err::<(), _>(HubError::Timeout { seconds: call.into() }) }
        })
        .await
        .unwrap_err();

        assert_eq!(err, HubError::Timeout { seconds: 2 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_and_none_policy_stop_at_once() {
        let calls = AtomicU32::new(0);
        let not_connected = || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err::<(), _>(HubError::HubNotConnected {
                    hub: "dispatch".into(),
                    method: "AcknowledgeCall".into(),
                })
            }
        };
        let err = with_retry(&RetryPolicy::idempotent(), not_connected)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::HubNotConnected { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = with_retry(&RetryPolicy::none(), || async {
            Err::<(), _>(HubError::Timeout { seconds: 1 })
        })
        .await
        .unwrap_err();
        assert_eq!(err, HubError::Timeout { seconds: 1 });
    }
}
