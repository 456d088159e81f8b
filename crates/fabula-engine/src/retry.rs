use std::thread;
use std::time::Duration;

use fabula_contracts::ProviderError;
use tracing::warn;

/// Blocks the current task. Injected so tests can record delays instead.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Bounded exponential backoff: `initial * multiplier^(n-1)`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            multiplier: 2,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay slept after the `attempt`-th (1-based) failure.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self
            .multiplier
            .max(1)
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Runs `op` until it succeeds, fails with a non-transport error, or the
    /// attempt budget is spent. `op` receives the 1-based attempt number.
    pub fn run<T, F>(&self, sleeper: &dyn Sleeper, provider: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut(u32) -> Result<T, ProviderError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !err.is_transport() || attempt >= max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_after(attempt);
                    warn!(
                        provider,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient provider failure; retrying"
                    );
                    sleeper.sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::time::Duration;

    use fabula_contracts::ProviderError;

    use super::RetryPolicy;
    use crate::test_support::RecordingSleeper;

    #[test]
    fn backoff_doubles_from_two_seconds_and_caps_at_ten() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (1..=5)
            .map(|attempt| policy.delay_after(attempt).as_secs())
            .collect();
        assert_eq!(delays, vec![2, 4, 8, 10, 10]);
    }

    #[test]
    fn transport_failures_use_the_whole_budget() {
        let sleeper = RecordingSleeper::default();
        let calls = Cell::new(0);
        let result: Result<(), ProviderError> =
            RetryPolicy::default().run(&sleeper, "OpenAI", |_| {
                calls.set(calls.get() + 1);
                Err(ProviderError::timeout("OpenAI", "late"))
            });
        assert_eq!(result.unwrap_err().status_code(), 408);
        assert_eq!(calls.get(), 3);
        assert_eq!(
            sleeper.delays(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn classified_failures_are_not_retried() {
        let sleeper = RecordingSleeper::default();
        let calls = Cell::new(0);
        let result: Result<(), ProviderError> =
            RetryPolicy::default().run(&sleeper, "OpenAI", |_| {
                calls.set(calls.get() + 1);
                Err(ProviderError::upstream("OpenAI", 503, "down"))
            });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn recovers_after_a_transient_failure() {
        let sleeper = RecordingSleeper::default();
        let result = RetryPolicy::default().run(&sleeper, "Bing", |attempt| {
            if attempt == 1 {
                Err(ProviderError::transport("Bing", "reset"))
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 2);
        assert_eq!(sleeper.delays(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn zero_attempt_budget_still_tries_once() {
        let sleeper = RecordingSleeper::default();
        let policy = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let calls = Cell::new(0);
        let _ = policy.run(&sleeper, "Google", |_| -> Result<(), ProviderError> {
            calls.set(calls.get() + 1);
            Err(ProviderError::timeout("Google", "late"))
        });
        assert_eq!(calls.get(), 1);
    }
}
