//! Retry Policy
//!
//! One exponential-backoff policy for every provider, built on `backon`.
//! Delays run base, base×factor, base×factor², … capped at `max_delay`.
//! Auth, bad-request and token-limit failures are returned immediately.

use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use super::provider::ProviderConfig;
use crate::config::RetryConfig;
use crate::types::{DebloatError, Result};

/// Lifecycle of one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Pending,
    Retrying,
    Success,
    /// Every allowed attempt failed
    Exhausted,
    Failed,
}

impl std::fmt::Display for InvocationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Retrying => write!(f, "RETRYING"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Exhausted => write!(f, "EXHAUSTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of running an operation under a [`RetryPolicy`]
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T>,
    /// Attempts made, including the first
    pub attempts: u32,
    /// Sum of all backoff sleeps
    pub total_backoff: Duration,
    /// States visited, starting at `Pending` and ending at a terminal state
    pub history: Vec<InvocationState>,
}

impl<T> RetryOutcome<T> {
    pub fn state(&self) -> InvocationState {
        self.history
            .last()
            .copied()
            .unwrap_or(InvocationState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    factor: f32,
    max_delay: Duration,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: config.jitter,
        }
    }

    /// A policy that never retries
    pub fn single_attempt() -> Self {
        Self::default().with_max_attempts(1)
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Apply a provider's attempt override, if it has one
    pub fn for_provider(&self, provider: &ProviderConfig) -> Self {
        match provider.max_attempts {
            Some(n) => self.clone().with_max_attempts(n),
            None => self.clone(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(self.factor)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize);
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }

    /// Planned delays between attempts (without jitter)
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut delay = self.base_delay;
        for _ in 1..self.max_attempts {
            delays.push(delay.min(self.max_delay));
            delay = delay.mul_f32(self.factor);
        }
        delays
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// runs out of attempts. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, provider: &str, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = AtomicU32::new(0);
        let mut total_backoff = Duration::ZERO;
        let mut history = vec![InvocationState::Pending];
        let max_attempts = self.max_attempts;

        let result = (|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            op(attempt)
        })
        .retry(self.backoff())
        .sleep(tokio::time::sleep)
        .when(|e: &DebloatError| e.is_recoverable())
        .notify(|e: &DebloatError, delay: Duration| {
            total_backoff += delay;
            history.push(InvocationState::Retrying);
            let attempt = attempts.load(Ordering::SeqCst);
            if let Some(hint) = e.retry_after() {
                info!(
                    provider,
                    attempt,
                    retry_after_secs = hint.as_secs(),
                    delay_ms = delay.as_millis() as u64,
                    "Provider asked to retry later; keeping policy delay"
                );
            }
            warn!(
                provider,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, retrying: {}",
                e
            );
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match &result {
            Ok(_) => history.push(InvocationState::Success),
            Err(e) => {
                if e.is_recoverable() && attempts >= max_attempts {
                    history.push(InvocationState::Exhausted);
                }
                history.push(InvocationState::Failed);
                warn!(provider, attempts, max_attempts, "Giving up: {}", e);
            }
        }

        RetryOutcome {
            result,
            attempts,
            total_backoff,
            history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, LlmError};

    fn transient() -> DebloatError {
        LlmError::new(ErrorCategory::Network, "connection reset").into()
    }

    #[test]
    fn test_default_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(
            policy.delays(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }

    #[test]
    fn test_delays_are_capped() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 1000,
            backoff_factor: 3.0,
            max_delay_ms: 5000,
            jitter: false,
        };
        let delays = RetryPolicy::from_config(&config).delays();
        assert_eq!(delays[0], Duration::from_secs(1));
        assert_eq!(delays[1], Duration::from_secs(3));
        assert_eq!(delays[2], Duration::from_secs(5));
        assert_eq!(delays[3], Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fails_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let outcome = RetryPolicy::default()
            .run("claude-3-7-sonnet", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.total_backoff, Duration::from_secs(6));
        assert_eq!(started.elapsed(), Duration::from_secs(6));
        assert_eq!(
            outcome.history,
            vec![
                InvocationState::Pending,
                InvocationState::Retrying,
                InvocationState::Retrying,
                InvocationState::Success,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let outcome: RetryOutcome<()> = RetryPolicy::default()
            .run("gpt-4o", |_| async { Err(transient()) })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.state(), InvocationState::Failed);
        assert!(outcome.history.contains(&InvocationState::Exhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_not_retried() {
        let outcome: RetryOutcome<()> = RetryPolicy::default()
            .run("gpt-4o", |_| async {
                Err(LlmError::new(ErrorCategory::Auth, "invalid api key").into())
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_backoff, Duration::ZERO);
        assert_eq!(
            outcome.history,
            vec![InvocationState::Pending, InvocationState::Failed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_keeps_policy_delay() {
        let calls = AtomicU32::new(0);
        let outcome = RetryPolicy::default()
            .run("gpt-4o", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(LlmError::new(ErrorCategory::RateLimit, "slow down")
                            .retry_after(Duration::from_secs(30))
                            .into())
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.total_backoff, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_attempt_policy() {
        let outcome: RetryOutcome<()> = RetryPolicy::single_attempt()
            .run("deepseek-r1", |_| async { Err(transient()) })
            .await;
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.total_backoff, Duration::ZERO);
    }

    #[test]
    fn test_provider_override() {
        let mut config = crate::ai::provider::ProviderRegistry::builtin()
            .get_config("deepseek-r1")
            .unwrap();
        assert_eq!(RetryPolicy::default().for_provider(&config).max_attempts(), 3);
        config.max_attempts = Some(1);
        assert_eq!(RetryPolicy::default().for_provider(&config).max_attempts(), 1);
    }
}
