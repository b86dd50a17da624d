//! Exponential backoff for broker connection attempts

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Backoff policy for connecting to the broker
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Delay before the first retry (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy with the default delays and the given retry count
    #[must_use]
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }
}

/// Delay before retry number `attempt` (zero based)
///
/// `min(base_delay * 2^attempt, max_delay)` plus up to 25% jitter, still capped
/// at `max_delay`.
#[must_use]
pub fn delay_for_attempt(policy: &RetryPolicy, attempt: u32) -> Duration {
    let base = policy
        .base_delay
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(policy.max_delay);

    let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..0.25));

    (base + jitter).min(policy.max_delay)
}

/// Run `op` until it succeeds or the policy is exhausted
///
/// # Errors
///
/// Returns the last error once `max_retries` retries have failed
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_retries => {
                let delay = delay_for_attempt(policy, attempt);
                tracing::warn!(
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "failed to {what}, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn exponential_growth() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };

        let d0 = delay_for_attempt(&policy, 0);
        let d1 = delay_for_attempt(&policy, 1);
        let d2 = delay_for_attempt(&policy, 2);

        assert!(d0 >= Duration::from_millis(100), "attempt 0: {d0:?}");
        assert!(d1 >= Duration::from_millis(200), "attempt 1: {d1:?}");
        assert!(d2 >= Duration::from_millis(400), "attempt 2: {d2:?}");
    }

    #[test]
    fn delay_capped_at_max() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(15),
            ..RetryPolicy::default()
        };

        let d = delay_for_attempt(&policy, 3);
        assert!(d <= policy.max_delay, "delay {d:?} exceeds max");
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        };

        for _ in 0..50 {
            let d = delay_for_attempt(&policy, 0);
            assert!(d >= Duration::from_millis(1000), "below base: {d:?}");
            assert!(d <= Duration::from_millis(1250), "above 125%: {d:?}");
        }
    }

    #[tokio::test]
    async fn retry_succeeds_after_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry(&fast_policy(3), "connect", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 { Err(format!("attempt {n}")) } else { Ok(n) }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = retry(&fast_policy(2), "connect", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("refused".to_string())
        })
        .await;

        assert_eq!(result, Err("refused".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
