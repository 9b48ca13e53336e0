use std::{future::Future, time::Duration};

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::error::RemoteError;

/// Exponential backoff applied to every remote write.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay.max(0.0))
        }
    }

    /// Runs `op` until it succeeds, fails permanently or runs out of attempts.
    /// Every attempt is bounded by `call_timeout`. Attempts made are added to `attempts`.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        call_timeout: Duration,
        attempts: &mut u32,
        mut op: F,
    ) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            *attempts += 1;

            let error = match timeout(call_timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error,
                Err(_) => RemoteError::Transient(format!(
                    "call timed out after {}s",
                    call_timeout.as_secs_f64()
                )),
            };

            if !error.is_transient() || attempt >= max_attempts {
                return Err(error);
            }

            let delay = self.delay_after(attempt);
            warn!(
                "{what}: attempt {attempt}/{max_attempts} failed ({error}), retrying in {:.1}s",
                delay.as_secs_f64()
            );
            sleep(delay).await;
        }
    }
}
