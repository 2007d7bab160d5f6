//! Exponential backoff with full jitter for retrying compare-and-swap races.
//!
//! An operation is retried only when it fails with an error that says "retry
//! me" (see [`Retryable`]); anything else is returned immediately. There is
//! no attempt limit: callers bound total retry time with their own deadlines.
//!
//! Sleep before retry `n` (0-indexed) is drawn uniformly from
//! `[0, min(3000, 10 * 2^(n+1))]` milliseconds.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Base of the exponential schedule, in milliseconds.
pub const BACKOFF_BASE_MS: u64 = 10;
/// Upper bound of any single sleep, in milliseconds.
pub const BACKOFF_MAX_SLEEP_MS: u64 = 3000;

/// Errors that can tell a retry loop to run the operation again.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Source of the random part of each sleep.
pub trait JitterSource: Send + Sync {
    /// Draw a sleep in `[0, cap_ms]` milliseconds.
    fn draw(&self, cap_ms: u64) -> u64;
}

/// Uniform draw over `[0, cap]` (the production default).
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformJitter;

impl JitterSource for UniformJitter {
    fn draw(&self, cap_ms: u64) -> u64 {
        rand::thread_rng().gen_range(0..=cap_ms)
    }
}

/// Always sleeps the full cap.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxJitter;

impl JitterSource for MaxJitter {
    fn draw(&self, cap_ms: u64) -> u64 {
        cap_ms
    }
}

/// Never sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn draw(&self, _cap_ms: u64) -> u64 {
        0
    }
}

/// Upper bound of the sleep before retry `attempt` (0-indexed).
pub fn backoff_cap(attempt: u32) -> Duration {
    let factor = 1u64.checked_shl(attempt.saturating_add(1)).unwrap_or(u64::MAX);
    let ms = BACKOFF_BASE_MS
        .saturating_mul(factor)
        .min(BACKOFF_MAX_SLEEP_MS);
    Duration::from_millis(ms)
}

/// Retry policy shared by every persistence operation that can race.
#[derive(Clone)]
pub struct Backoff {
    jitter: Arc<dyn JitterSource>,
}

impl Backoff {
    pub fn new(jitter: impl JitterSource + 'static) -> Self {
        Self {
            jitter: Arc::new(jitter),
        }
    }

    /// Sleep to take before retry `attempt`.
    pub fn sleep_for(&self, attempt: u32) -> Duration {
        let cap = backoff_cap(attempt).as_millis() as u64;
        Duration::from_millis(self.jitter.draw(cap).min(cap))
    }

    /// Run `op` until it succeeds or fails with a non-retryable error.
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    let sleep = self.sleep_for(attempt);
                    debug!(attempt, sleep_ms = sleep.as_millis() as u64, "retrying after conflict");
                    tokio::time::sleep(sleep).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(UniformJitter)
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Retry,
        Fatal,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Retry)
        }
    }

    #[derive(Default)]
    struct RecordingJitter {
        caps: Mutex<Vec<u64>>,
    }

    impl JitterSource for Arc<RecordingJitter> {
        fn draw(&self, cap_ms: u64) -> u64 {
            self.caps.lock().unwrap().push(cap_ms);
            cap_ms
        }
    }

    #[test]
    fn schedule_doubles_then_pins_at_the_cap() {
        let backoff = Backoff::new(MaxJitter);
        let sleeps: Vec<u64> = (0..10)
            .map(|n| backoff.sleep_for(n).as_millis() as u64)
            .collect();
        assert_eq!(
            sleeps,
            vec![20, 40, 80, 160, 320, 640, 1280, 2560, 3000, 3000]
        );
    }

    #[test]
    fn huge_attempt_counts_do_not_overflow() {
        assert_eq!(backoff_cap(63), Duration::from_millis(BACKOFF_MAX_SLEEP_MS));
        assert_eq!(backoff_cap(u32::MAX), Duration::from_millis(BACKOFF_MAX_SLEEP_MS));
    }

    #[test]
    fn uniform_draws_stay_within_the_cap() {
        let jitter = UniformJitter;
        for _ in 0..1000 {
            assert!(jitter.draw(20) <= 20);
        }
        assert_eq!(jitter.draw(0), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success_with_the_full_schedule() {
        let recorder = Arc::new(RecordingJitter::default());
        let backoff = Backoff::new(recorder.clone());
        let calls = &AtomicU32::new(0);

        let result: Result<u32, TestError> = backoff
            .retry(move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 4 { Err(TestError::Retry) } else { Ok(n) }
            })
            .await;

        assert_eq!(result, Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(*recorder.caps.lock().unwrap(), vec![20, 40, 80, 160]);
    }

    #[tokio::test]
    async fn other_errors_stop_immediately() {
        let backoff = Backoff::new(NoJitter);
        let calls = &AtomicU32::new(0);

        let result: Result<(), TestError> = backoff
            .retry(move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TestError::Fatal)
            })
            .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
