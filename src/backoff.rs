//! Backoff policy for the uploader's per-batch retry loop.

use parking_lot::Mutex;
use rand::Rng;
use std::time::Duration;

/// Jitter mode for retry backoff (following AWS SDK patterns).
#[derive(Clone, Debug, Default, PartialEq)]
pub enum JitterMode {
    /// No jitter - use exact backoff delay
    None,
    /// Full jitter: random delay between 0 and calculated backoff
    #[default]
    Full,
    /// Equal jitter: half fixed + half random
    Equal,
    /// Decorrelated jitter (AWS recommended)
    Decorrelated,
}

/// Apply jitter to a backoff delay.
pub fn apply_jitter(delay: Duration, mode: &JitterMode) -> Duration {
    let mut rng = rand::thread_rng();

    match mode {
        JitterMode::None => delay,
        JitterMode::Full => Duration::from_secs_f64(rng.gen::<f64>() * delay.as_secs_f64()),
        JitterMode::Equal => {
            let half = delay.as_secs_f64() / 2.0;
            Duration::from_secs_f64(half + rng.gen::<f64>() * half)
        }
        JitterMode::Decorrelated => {
            let base = delay.as_secs_f64() / 3.0;
            let upper = delay.as_secs_f64() * 3.0;
            Duration::from_secs_f64(base + rng.gen::<f64>() * (upper - base))
        }
    }
}

/// Stateful exponential backoff with an internal cursor, matching the
/// `delay_with_backoff()` / `reset()` contract used by the uploader's retry
/// loop. Reaching `max_attempts` does not cap the delay on its own; callers
/// that care can consult `attempts_exhausted()`.
#[derive(Debug)]
pub struct BackoffPolicy {
    initial_backoff: Duration,
    max_backoff: Duration,
    multiplier: f64,
    jitter: JitterMode,
    max_attempts: Option<u32>,
    cursor: Mutex<Cursor>,
}

#[derive(Debug, Clone)]
struct Cursor {
    attempt: u32,
    delay: Duration,
}

impl BackoffPolicy {
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            max_backoff,
            multiplier: 1.3,
            jitter: JitterMode::Full,
            max_attempts: None,
            cursor: Mutex::new(Cursor {
                attempt: 0,
                delay: initial_backoff,
            }),
        }
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: JitterMode) -> Self {
        self.jitter = jitter;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Advance the internal cursor and asynchronously suspend for the next
    /// wait duration. The first call after construction or `reset()` yields
    /// `initial_backoff` (jittered); each subsequent call multiplies the
    /// previous unjittered base, capped at `max_backoff`.
    pub async fn delay_with_backoff(&self) {
        let jittered = {
            let mut cursor = self.cursor.lock();
            let base = if cursor.attempt == 0 {
                self.initial_backoff
            } else {
                let multiplied = cursor.delay.as_secs_f64() * self.multiplier;
                Duration::from_secs_f64(multiplied.min(self.max_backoff.as_secs_f64()))
            };
            cursor.attempt += 1;
            cursor.delay = base;
            apply_jitter(base, &self.jitter)
        };
        tokio::time::sleep(jittered).await;
    }

    /// Reset the cursor so the next `delay_with_backoff()` starts over from
    /// `initial_backoff`.
    pub fn reset(&self) {
        let mut cursor = self.cursor.lock();
        cursor.attempt = 0;
        cursor.delay = self.initial_backoff;
    }

    /// Number of `delay_with_backoff()` calls since construction or the last
    /// `reset()`.
    pub fn attempts(&self) -> u32 {
        self.cursor.lock().attempt
    }

    /// Whether `max_attempts` (if configured) has been reached. Not consulted
    /// by the uploader's own retry loop; exposed for callers that want to
    /// escalate beyond the unbounded default.
    pub fn attempts_exhausted(&self) -> bool {
        match self.max_attempts {
            Some(max) => self.attempts() >= max,
            None => false,
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_restores_initial_delay() {
        let policy = BackoffPolicy::new(Duration::from_millis(50), Duration::from_secs(5))
            .with_jitter(JitterMode::None);
        assert_eq!(policy.attempts(), 0);
        policy.cursor.lock().attempt = 3;
        policy.reset();
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn attempts_exhausted_without_cap_is_always_false() {
        let policy = BackoffPolicy::default();
        for _ in 0..50 {
            policy.cursor.lock().attempt += 1;
        }
        assert!(!policy.attempts_exhausted());
    }

    #[test]
    fn attempts_exhausted_respects_configured_cap() {
        let policy = BackoffPolicy::default().with_max_attempts(3);
        assert!(!policy.attempts_exhausted());
        policy.cursor.lock().attempt = 3;
        assert!(policy.attempts_exhausted());
    }

    #[test]
    fn jitter_none_is_exact() {
        let d = Duration::from_millis(250);
        assert_eq!(apply_jitter(d, &JitterMode::None), d);
    }

    #[test]
    fn jitter_full_never_exceeds_base() {
        let d = Duration::from_millis(250);
        for _ in 0..100 {
            assert!(apply_jitter(d, &JitterMode::Full) <= d);
        }
    }
}
