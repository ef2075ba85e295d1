//! Retry handling for the shared HTTP client.
//!
//! The policy types come from the `retry_policies` crate and are re-exported
//! here so embedders can wire their own policy into a custom client build.
//! The pipeline itself only uses [`default_retry_policy`].

use std::time::{Duration, SystemTime};

pub use retry_policies::{policies::*, Jitter, RetryDecision, RetryPolicy};

/// A [`RetryPolicy`] that gives up after the first attempt.
///
/// Useful in tests and for callers that run their own retry loop above the
/// client and must not have the middleware multiply their attempts.
#[derive(Clone, Copy)]
pub struct NoRetry;

impl RetryPolicy for NoRetry {
    fn should_retry(&self, _: SystemTime, _: u32) -> RetryDecision {
        RetryDecision::DoNotRetry
    }
}

/// The retry policy of the shared client: five attempts in total, backing
/// off exponentially from 100ms up to ten seconds. The middleware applies it
/// to transient failures (429 and the retryable 5xx statuses); whatever
/// still fails on the last attempt surfaces to the caller.
pub fn default_retry_policy() -> ExponentialBackoff {
    ExponentialBackoff::builder()
        .retry_bounds(Duration::from_millis(100), Duration::from_secs(10))
        .build_with_max_retries(5)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_no_retry_never_retries() {
        for attempt in 0..3 {
            assert!(matches!(
                NoRetry.should_retry(SystemTime::now(), attempt),
                RetryDecision::DoNotRetry
            ));
        }
    }
}
