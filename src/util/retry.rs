use std::time::Duration;

use futures_retry::{ErrorHandler, RetryPolicy};

use crate::error::LeaseError;

/// Retries retryable errors a fixed number of times with a fixed pause.
pub(crate) struct FixedCountWithDelayStrategy {
    max_attempts: usize,
    delay: Duration,
}

impl FixedCountWithDelayStrategy {
    pub(crate) fn new(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl ErrorHandler<LeaseError> for FixedCountWithDelayStrategy {
    type OutError = LeaseError;

    fn handle(&mut self, attempt: usize, e: LeaseError) -> RetryPolicy<LeaseError> {
        if attempt >= self.max_attempts {
            return RetryPolicy::ForwardError(e);
        }

        if e.is_retryable() {
            tracing::debug!(attempt, error = %e, "retrying");
            RetryPolicy::WaitRetry(self.delay)
        } else {
            RetryPolicy::ForwardError(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing() -> LeaseError {
        LeaseError::ChannelNotFound {
            channel: "/server_requests".to_string(),
        }
    }

    #[test]
    fn retries_missing_channel_until_budget_is_spent() {
        let mut strategy = FixedCountWithDelayStrategy::new(3, Duration::from_millis(5));
        assert!(matches!(
            strategy.handle(1, missing()),
            RetryPolicy::WaitRetry(d) if d == Duration::from_millis(5)
        ));
        assert!(matches!(
            strategy.handle(3, missing()),
            RetryPolicy::ForwardError(_)
        ));
    }

    #[test]
    fn forwards_fatal_errors_immediately() {
        let mut strategy = FixedCountWithDelayStrategy::new(3, Duration::from_millis(5));
        let fatal = LeaseError::ChannelClosed {
            channel: "/client_1".to_string(),
        };
        assert!(matches!(
            strategy.handle(1, fatal),
            RetryPolicy::ForwardError(LeaseError::ChannelClosed { .. })
        ));
    }
}
