//! Error classification and retry with exponential backoff.
//!
//! Backoff for attempt `n` (1-based) is `initial_delay * 2^(n-1)`, capped at
//! `max_delay`, without jitter. A rate-limit hint from the runner raises the
//! delay to at least the hinted value (still capped).

use std::future::Future;
use std::time::Duration;

use maestro_types::agent::RunnerError;
use maestro_types::config::ExecutionOptions;

use super::shutdown::ShutdownSignal;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Transient,
    RateLimited,
    Authorization,
    Fatal,
    Unknown,
}

impl ErrorClass {
    /// `Fatal` and `Authorization` failures stop retrying immediately.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::Fatal | ErrorClass::Authorization)
    }
}

/// Classify a runner error by its shape and status code.
pub fn classify(error: &RunnerError) -> ErrorClass {
    match error {
        RunnerError::Transport(_) | RunnerError::Timeout(_) => ErrorClass::Transient,
        RunnerError::RateLimited { .. } => ErrorClass::RateLimited,
        RunnerError::Unauthorized(_) => ErrorClass::Authorization,
        RunnerError::InvalidRequest(_) => ErrorClass::Fatal,
        RunnerError::Provider { status, .. } => match status {
            Some(429) => ErrorClass::RateLimited,
            Some(401) | Some(403) => ErrorClass::Authorization,
            Some(408) => ErrorClass::Transient,
            Some(s) if (500..600).contains(s) => ErrorClass::Transient,
            Some(s) if (400..500).contains(s) => ErrorClass::Fatal,
            _ => ErrorClass::Unknown,
        },
        RunnerError::Other(_) => ErrorClass::Unknown,
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_options(&ExecutionOptions::default())
    }
}

/// Result of [`RetryPolicy::retry`].
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: Option<T>,
    pub attempts: u32,
    /// Last error, when no attempt succeeded.
    pub error: Option<RunnerError>,
    /// Shutdown was requested before the operation could finish.
    pub interrupted: bool,
}

impl<T> RetryOutcome<T> {
    pub fn success(&self) -> bool {
        self.result.is_some()
    }
}

impl RetryPolicy {
    pub fn from_options(options: &ExecutionOptions) -> Self {
        Self {
            max_attempts: options.max_retries.max(1),
            initial_delay: Duration::from_millis(options.retry_initial_delay_ms),
            max_delay: Duration::from_millis(options.retry_max_delay_ms),
        }
    }

    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn delay_after(&self, attempt: u32, error: &RunnerError) -> Duration {
        let computed = self.delay_for(attempt);
        match error {
            RunnerError::RateLimited {
                retry_after_ms: Some(ms),
            } => computed.max(Duration::from_millis(*ms)).min(self.max_delay),
            _ => computed,
        }
    }

    /// Run `operation` until it succeeds, fails with a non-retryable class,
    /// or `max_attempts` is exhausted. `operation` receives the 1-based
    /// attempt number.
    ///
    /// Shutdown is observed before each attempt and interrupts backoff sleeps.
    pub async fn retry<T, F, Fut, C>(
        &self,
        mut operation: F,
        classify: C,
        shutdown: &ShutdownSignal,
    ) -> RetryOutcome<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RunnerError>>,
        C: Fn(&RunnerError) -> ErrorClass,
    {
        let mut attempt = 1;
        let mut last_error = None;

        loop {
            if shutdown.is_triggered() {
                return RetryOutcome {
                    result: None,
                    attempts: attempt - 1,
                    error: last_error,
                    interrupted: true,
                };
            }

            match operation(attempt).await {
                Ok(value) => {
                    return RetryOutcome {
                        result: Some(value),
                        attempts: attempt,
                        error: None,
                        interrupted: false,
                    };
                }
                Err(error) => {
                    let class = classify(&error);
                    if !class.is_retryable() || attempt >= self.max_attempts {
                        tracing::debug!(attempt, ?class, error = %error, "giving up");
                        return RetryOutcome {
                            result: None,
                            attempts: attempt,
                            error: Some(error),
                            interrupted: false,
                        };
                    }

                    let delay = self.delay_after(attempt, &error);
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        ?class,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "attempt failed, backing off"
                    );
                    last_error = Some(error);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.triggered() => {
                            return RetryOutcome {
                                result: None,
                                attempts: attempt,
                                error: last_error,
                                interrupted: true,
                            };
                        }
                    }
                    attempt += 1;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify(&RunnerError::Transport("reset".into())), ErrorClass::Transient);
        assert_eq!(classify(&RunnerError::Timeout(10)), ErrorClass::Transient);
        assert_eq!(
            classify(&RunnerError::RateLimited { retry_after_ms: None }),
            ErrorClass::RateLimited
        );
        assert_eq!(classify(&RunnerError::Unauthorized("x".into())), ErrorClass::Authorization);
        assert_eq!(classify(&RunnerError::InvalidRequest("x".into())), ErrorClass::Fatal);
        assert_eq!(classify(&RunnerError::Other("?".into())), ErrorClass::Unknown);

        let provider = |status| RunnerError::Provider {
            message: "x".into(),
            status,
        };
        assert_eq!(classify(&provider(Some(503))), ErrorClass::Transient);
        assert_eq!(classify(&provider(Some(429))), ErrorClass::RateLimited);
        assert_eq!(classify(&provider(Some(403))), ErrorClass::Authorization);
        assert_eq!(classify(&provider(Some(422))), ErrorClass::Fatal);
        assert_eq!(classify(&provider(None)), ErrorClass::Unknown);
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let p = policy(10);
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
        assert_eq!(p.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(p.delay_for(40), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_twice_then_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let outcome = policy(3)
            .retry(
                |_attempt| {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(RunnerError::Transport("reset".into()))
                        } else {
                            Ok("done")
                        }
                    }
                },
                classify,
                &ShutdownSignal::new(),
            )
            .await;

        assert!(outcome.success());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.result, Some("done"));
        // 100ms + 200ms of backoff.
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_stops_immediately() {
        let outcome: RetryOutcome<()> = policy(5)
            .retry(
                |_| async { Err(RunnerError::InvalidRequest("bad".into())) },
                classify,
                &ShutdownSignal::new(),
            )
            .await;
        assert!(!outcome.success());
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.error, Some(RunnerError::InvalidRequest(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_max_attempts() {
        let outcome: RetryOutcome<()> = policy(3)
            .retry(
                |_| async { Err(RunnerError::Other("flaky".into())) },
                classify,
                &ShutdownSignal::new(),
            )
            .await;
        assert_eq!(outcome.attempts, 3);
        assert!(!outcome.interrupted);
        assert!(outcome.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_hint_extends_delay() {
        let started = Instant::now();
        let outcome = policy(2)
            .retry(
                |attempt| async move {
                    if attempt == 1 {
                        Err(RunnerError::RateLimited {
                            retry_after_ms: Some(700),
                        })
                    } else {
                        Ok(())
                    }
                },
                classify,
                &ShutdownSignal::new(),
            )
            .await;
        assert!(outcome.success());
        assert_eq!(started.elapsed(), Duration::from_millis(700));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let shutdown = ShutdownSignal::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let started = Instant::now();
        let outcome: RetryOutcome<()> = policy(3)
            .retry(
                |_| async { Err(RunnerError::Transport("reset".into())) },
                classify,
                &shutdown,
            )
            .await;

        assert!(outcome.interrupted);
        assert_eq!(outcome.attempts, 1);
        assert!(started.elapsed() < Duration::from_millis(100));
    }
}
