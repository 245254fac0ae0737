use crate::error::{Result, ScreeningError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::warn;

/// Bounded retry with exponential backoff for transient activity failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// A policy that gives up after the first failure.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following failed attempt number `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// The boundary every external call of an orchestration goes through.
///
/// Transient failures are retried per the [`RetryPolicy`]; once the attempts
/// are used up the failure becomes `Fatal`. Reads additionally run under a
/// deadline, and an expired deadline counts as a transient failure.
#[derive(Debug, Clone)]
pub struct ActivityRunner {
    retry: RetryPolicy,
    read_timeout: Duration,
}

impl ActivityRunner {
    pub fn new(retry: RetryPolicy, read_timeout: Duration) -> Self {
        Self {
            retry,
            read_timeout,
        }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs a decision-affecting read under the read deadline.
    pub async fn read<T, F, Fut>(&self, activity: &'static str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.call(activity, Some(self.read_timeout), op).await
    }

    /// Runs a side-effecting call. Effects are idempotent, so a retry after an
    /// unacknowledged success is harmless.
    pub async fn effect<T, F, Fut>(&self, activity: &'static str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.call(activity, None, op).await
    }

    async fn call<T, F, Fut>(
        &self,
        activity: &'static str,
        deadline: Option<Duration>,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = match deadline {
                Some(limit) => match timeout(limit, op()).await {
                    Ok(result) => result,
                    Err(_) => Err(ScreeningError::TransientIo(format!(
                        "{} exceeded deadline of {}ms",
                        activity,
                        limit.as_millis()
                    ))),
                },
                None => op().await,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff_for(attempt);
                    warn!(
                        activity,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "activity failed, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if err.is_transient() => {
                    return Err(ScreeningError::Fatal(format!(
                        "{} failed after {} attempts: {}",
                        activity, attempt, err
                    )));
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn runner(max_attempts: u32) -> ActivityRunner {
        ActivityRunner::new(
            RetryPolicy {
                max_attempts,
                initial_backoff: Duration::from_millis(1),
                backoff_multiplier: 2,
                max_backoff: Duration::from_millis(5),
            },
            Duration::from_millis(50),
        )
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(400));
        assert_eq!(policy.backoff_for(30), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = runner(3)
            .effect("flaky", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ScreeningError::TransientIo("queue unavailable".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_fatal() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = runner(2)
            .effect("down", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScreeningError::TransientIo("store unavailable".into()))
            })
            .await;
        assert!(matches!(result, Err(ScreeningError::Fatal(m)) if m.contains("after 2 attempts")));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_transient_failure_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = runner(5)
            .read("policy", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ScreeningError::NotFound("tenant 999".into()))
            })
            .await;
        assert!(matches!(result, Err(ScreeningError::NotFound(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_read_deadline() {
        let result: Result<()> = runner(1)
            .read("slow", || async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ScreeningError::Fatal(m)) if m.contains("exceeded deadline")));
    }
}
