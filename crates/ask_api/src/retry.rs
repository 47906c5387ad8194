use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::cancel::{await_or_cancel, is_cancelled, CancellationSignal};
use crate::error::AskApiError;

/// Attempts per logical request, the first one included.
pub const MAX_ATTEMPTS: u32 = 3;
/// Unit of the exponential backoff.
pub const BASE_DELAY_MS: u64 = 1000;
/// Upper bound for a single backoff delay.
pub const MAX_DELAY_MS: u64 = 8000;

fn retryable_status_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"(?i)rate.?limit|overloaded|service.?unavailable|upstream.?connect|connection.?refused|timed?.?out")
            .expect("retry regex must compile")
    })
}

/// Error text retry policy for transient failures and retryable statuses.
pub fn is_retryable_http_error(status: u16, error_text: &str) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504) || retryable_status_regex().is_match(error_text)
}

/// Backoff before the retry that follows 1-indexed `attempt`, with the
/// default base and cap: `min(1000ms * 2^attempt, 8000ms)`.
pub fn retry_delay(attempt: u32) -> Duration {
    RetryPolicy::default().delay_for_attempt(attempt)
}

/// Which failures earn another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryClassification {
    /// Retry every failure except cancellation.
    #[default]
    RetryAll,
    /// Stop on failures [`AskApiError::is_retryable`] rejects.
    TransientOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub classification: RetryClassification,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            max_delay: Duration::from_millis(MAX_DELAY_MS),
            classification: RetryClassification::RetryAll,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_classification(mut self, classification: RetryClassification) -> Self {
        self.classification = classification;
        self
    }

    /// Compute exponential backoff delay for a 1-indexed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn should_retry(&self, error: &AskApiError) -> bool {
        if matches!(error, AskApiError::Cancelled) {
            return false;
        }
        match self.classification {
            RetryClassification::RetryAll => true,
            RetryClassification::TransientOnly => error.is_retryable(),
        }
    }

    fn attempt_budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Per-logical-request retry bookkeeping.
#[derive(Debug, Default)]
pub struct AttemptState {
    pub attempt_number: u32,
    pub last_error: Option<AskApiError>,
}

/// Run `operation` until it succeeds or the policy gives up.
///
/// `operation` receives the 1-indexed attempt number and must start from
/// scratch on every call. No delay follows the final attempt. When the budget
/// is spent the last failure is wrapped in [`AskApiError::RetryExhausted`];
/// cancellation and failures the policy refuses to retry are returned as-is.
pub async fn run_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancellation: Option<&CancellationSignal>,
    mut operation: F,
) -> Result<T, AskApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AskApiError>>,
{
    let budget = policy.attempt_budget();
    let mut state = AttemptState::default();

    loop {
        if is_cancelled(cancellation) {
            return Err(AskApiError::Cancelled);
        }

        state.attempt_number += 1;
        let attempt = state.attempt_number;
        debug!(attempt, budget, "starting attempt");

        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "attempt succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => error,
        };

        if !policy.should_retry(&error) {
            warn!(attempt, %error, "attempt failed; not retrying");
            return Err(error);
        }

        if attempt >= budget {
            warn!(attempt, %error, "attempt failed; retries exhausted");
            state.last_error = Some(error);
            break;
        }

        let delay = policy.delay_for_attempt(attempt);
        warn!(
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            %error,
            "attempt failed; retrying after delay"
        );
        state.last_error = Some(error);
        await_or_cancel(tokio::time::sleep(delay), cancellation).await?;
    }

    let last_error = state
        .last_error
        .take()
        .unwrap_or_else(|| AskApiError::Stream("no attempt recorded an error".to_owned()));
    Err(AskApiError::RetryExhausted {
        attempts: state.attempt_number,
        last_error: Box::new(last_error),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_backoff_table() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(8000));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(8000));
    }

    #[test]
    fn retry_all_never_retries_cancellation() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(&AskApiError::InvalidRequest("x".to_owned())));
        assert!(!policy.should_retry(&AskApiError::Cancelled));
    }

    #[test]
    fn zero_attempt_budget_still_runs_once() {
        assert_eq!(RetryPolicy::default().with_max_attempts(0).attempt_budget(), 1);
    }
}
