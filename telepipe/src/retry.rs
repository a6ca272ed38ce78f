//! Retrying failed operations with exponential backoff and jitter.
//!
//! [`RetryPolicy`] bounds the retry behavior: attempt count, initial and
//! maximum delay, and the jitter added to each delay. The retry loop runs
//! on the pipeline's dedicated worker threads, so delays are plain
//! `thread::sleep` calls and never touch an application thread.

use std::thread;
use std::time::{Duration, SystemTime};

use crate::diag_warn;

/// Configuration for retry behavior.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the initial try.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between retries.
    pub max_delay: Duration,
    /// Maximum jitter added to each delay.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_600),
            jitter: Duration::from_millis(100),
        }
    }
}

// Jitter sourced from the subsecond clock; uniformity does not matter
// here, only that concurrent retries spread out.
fn generate_jitter(max_jitter: Duration) -> Duration {
    let max_ms = max_jitter.as_millis() as u64;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    Duration::from_millis(u64::from(nanos) % (max_ms + 1))
}

/// Run `operation` until it succeeds or the retry budget is exhausted.
///
/// Delays double between attempts, are capped at `policy.max_delay`, and
/// carry jitter. The error of the final attempt is returned unchanged.
pub fn retry_with_backoff<T, E, F>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Debug,
    F: FnMut() -> Result<T, E>,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) if attempt < policy.max_retries => {
                attempt += 1;
                diag_warn!(
                    name: "Retry.Attempt",
                    operation = operation_name,
                    attempt = attempt,
                    error = format!("{err:?}")
                );
                let delay_with_jitter = (delay + generate_jitter(policy.jitter)).min(policy.max_delay);
                thread::sleep(delay_with_jitter);
                delay = (delay * 2).min(policy.max_delay);
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            jitter: Duration::from_millis(1),
        }
    }

    #[test]
    fn returns_first_success_without_retrying() {
        let attempts = AtomicUsize::new(0);
        let result = retry_with_backoff(&fast_policy(), "op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>("done")
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn retries_until_success_within_budget() {
        let attempts = AtomicUsize::new(0);
        let result = retry_with_backoff(&fast_policy(), "op", || {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err("transient")
            } else {
                Ok("done")
            }
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(), "op", || {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("down")
        });
        assert_eq!(result, Err("down"));
        // Initial attempt plus three retries.
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn jitter_stays_within_bound() {
        let max = Duration::from_millis(100);
        for _ in 0..10 {
            assert!(generate_jitter(max) <= max);
        }
    }
}
