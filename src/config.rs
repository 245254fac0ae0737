use crate::application::activity::{ActivityRunner, RetryPolicy};
use crate::error::{Result, ScreeningError};
use crate::infrastructure::in_memory::DEFAULT_LOCK_WAIT;
use std::time::Duration;

/// Tuning of the activity boundary and the velocity stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreeningConfig {
    pub retry: RetryPolicy,
    /// Deadline of each decision-affecting read.
    pub read_timeout: Duration,
    /// How long an in-memory increment waits for a contended aggregate.
    pub lock_wait: Duration,
    /// Commit attempts of a persistent aggregate update before giving up.
    pub max_conflict_retries: u32,
}

impl Default for ScreeningConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            read_timeout: Duration::from_secs(5),
            lock_wait: DEFAULT_LOCK_WAIT,
            max_conflict_retries: 16,
        }
    }
}

impl ScreeningConfig {
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(ScreeningError::ValidationError(
                "max attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_multiplier == 0 {
            return Err(ScreeningError::ValidationError(
                "backoff multiplier must be at least 1".to_string(),
            ));
        }
        if self.read_timeout.is_zero() || self.lock_wait.is_zero() {
            return Err(ScreeningError::ValidationError(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.max_conflict_retries == 0 {
            return Err(ScreeningError::ValidationError(
                "conflict retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn activity_runner(&self) -> ActivityRunner {
        ActivityRunner::new(self.retry.clone(), self.read_timeout)
    }
}
