//! Retry with exponential backoff for dialogue requests

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::Error;
use crate::config::{DialogueConfig, duration_from_secs};

/// Retry policy for dialogue requests
///
/// `max_attempts` counts every attempt including the first, so a policy
/// of 3 gives up after the third consecutive transient failure.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per input
    pub max_attempts: u32,
    /// Base delay between attempts (doubles each attempt)
    pub base_delay: Duration,
    /// Maximum delay cap
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(15),
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Build a policy from dialogue configuration
    #[must_use]
    pub fn from_config(config: &DialogueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: duration_from_secs(config.base_backoff_secs),
            max_delay: duration_from_secs(config.max_backoff_secs),
        }
    }

    /// Wait before the next request after attempt `attempt` (1-based) failed
    ///
    /// A `Retry-After` hint carried by a 429 replaces the schedule. Without
    /// one the wait starts at `base_delay` and doubles per failed attempt,
    /// plus up to a quarter extra. Never longer than `max_delay`.
    #[must_use]
    pub fn backoff(&self, attempt: u32, error: &Error) -> Duration {
        let wait = error.retry_after().unwrap_or_else(|| {
            let doublings = attempt.saturating_sub(1).min(16);
            let step = self.base_delay.saturating_mul(1 << doublings);
            step.saturating_add(spread(step))
        });
        wait.min(self.max_delay)
    }
}

/// Up to a quarter of `step`, taken from the wall clock
fn spread(step: Duration) -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (step / 4).mul_f64(f64::from(nanos % 1000) / 1000.0)
}

/// Map a non-success HTTP status to an error
///
/// 429 becomes [`Error::QuotaExhausted`] and 5xx [`Error::ServiceUnavailable`],
/// both retryable. Anything else is a plain [`Error::Dialogue`].
#[must_use]
pub fn classify_status(status: u16, body: &str, retry_after: Option<Duration>) -> Error {
    let message = format!("{status}: {}", body.trim());

    if status == 429 {
        return Error::QuotaExhausted {
            message,
            retry_after,
        };
    }

    if (500..600).contains(&status) {
        return Error::ServiceUnavailable(message);
    }

    Error::Dialogue(message)
}

/// Parse a `Retry-After` header value given in seconds
///
/// HTTP-date values are not supported and yield `None`.
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_quota_exhausted() {
        let err = classify_status(429, "Resource has been exhausted", Some(Duration::from_secs(3)));
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn server_errors_are_transient() {
        for status in [500, 502, 503, 599] {
            let err = classify_status(status, "", None);
            assert!(matches!(err, Error::ServiceUnavailable(_)), "{status}");
        }
    }

    #[test]
    fn client_errors_are_not_transient() {
        for status in [400, 401, 403, 404] {
            assert!(!classify_status(status, "bad", None).is_transient(), "{status}");
        }
    }

    #[test]
    fn parses_retry_after_seconds() {
        assert_eq!(parse_retry_after("30"), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(" 1 "), Some(Duration::from_secs(1)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    fn rate_limited() -> Error {
        classify_status(429, "slow down", None)
    }

    #[test]
    fn retry_after_hint_replaces_schedule() {
        let policy = RetryPolicy::from_config(&DialogueConfig::default());
        let err = classify_status(429, "slow down", Some(Duration::from_secs(40)));
        // Shorter than the 15 s base, still honored
        assert_eq!(policy.backoff(1, &err), Duration::from_secs(40));

        let brief = classify_status(429, "slow down", Some(Duration::from_secs(2)));
        assert_eq!(policy.backoff(3, &brief), Duration::from_secs(2));
    }

    #[test]
    fn retry_after_hint_is_capped() {
        let policy = RetryPolicy::from_config(&DialogueConfig::default());
        let err = classify_status(429, "try tomorrow", Some(Duration::from_secs(3600)));
        assert_eq!(policy.backoff(1, &err), Duration::from_secs(120));
    }

    #[test]
    fn backoff_doubles_from_base_until_capped() {
        let policy = RetryPolicy::from_config(&DialogueConfig::default());
        let err = Error::ServiceUnavailable("503: overloaded".to_string());

        let first = policy.backoff(1, &err);
        assert!(first >= Duration::from_secs(15), "{first:?}");
        assert!(first <= Duration::from_millis(18_750), "{first:?}");

        let second = policy.backoff(2, &err);
        assert!(second >= Duration::from_secs(30), "{second:?}");
        assert!(second <= Duration::from_millis(37_500), "{second:?}");

        // 15 s * 2^3 already exceeds the 120 s ceiling
        assert_eq!(policy.backoff(4, &err), Duration::from_secs(120));
        assert_eq!(policy.backoff(u32::MAX, &err), Duration::from_secs(120));
    }

    #[test]
    fn quota_without_hint_follows_schedule() {
        let policy = RetryPolicy::from_config(&DialogueConfig::default());
        let wait = policy.backoff(1, &rate_limited());
        assert!(wait >= Duration::from_secs(15), "{wait:?}");
        assert!(wait < Duration::from_secs(30), "{wait:?}");
    }

    #[test]
    fn policy_from_config() {
        let policy = RetryPolicy::from_config(&DialogueConfig::default());
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(15));
        assert_eq!(policy.max_delay, Duration::from_secs(120));
    }
}
