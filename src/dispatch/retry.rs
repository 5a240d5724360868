//! Retry controller
//!
//! Retries transient agent failures with exponential backoff and jitter
//! under a per-call attempt budget. Deadline-aware: a retry is never
//! started if its backoff sleep would cross the call deadline, and the
//! whole loop is bounded by the remaining time.

use crate::agents::AgentCallError;
use crate::config::RetrySection;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

/// Backoff schedule and attempt budget for one agent call
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetrySection) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Backoff before the retry following `attempt` (1-based), exponential
    /// with up to 25% jitter and capped at the configured maximum
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let exp = exp.min(self.max_delay);
        let jitter_ms = rand::thread_rng().gen_range(0..=exp.as_millis() as u64 / 4);
        (exp + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }

    /// Run `op` with retries until success, a non-transient failure, budget
    /// exhaustion, or the deadline
    ///
    /// `op` receives the 1-based attempt number. Attempts that outlive the
    /// deadline resolve as `Timeout`.
    pub async fn run<F, Fut, T>(
        &self,
        agent: &str,
        deadline: Instant,
        mut op: F,
    ) -> Result<T, AgentCallError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AgentCallError>>,
    {
        let mut attempt = 1;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(AgentCallError::Timeout);
            }

            let result = tokio::time::timeout(deadline - now, op(attempt)).await;
            let error = match result {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) => error,
                Err(_) => return Err(AgentCallError::Timeout),
            };

            if !error.is_transient() || attempt >= self.max_attempts {
                return Err(error);
            }

            let delay = self.backoff_delay(attempt);
            if Instant::now() + delay >= deadline {
                // The retry could not possibly complete in time
                return Err(error);
            }

            debug!(agent, attempt, delay_ms = delay.as_millis() as u64, %error,
                "retrying after transient failure");
            crate::observability::metrics().record_retry(agent);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
