//! Rate-limited, retrying front end to a chat backend

use std::sync::Arc;
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

use super::client::ChatBackend;
use super::retry::RetryPolicy;
use super::{DialogueTurn, parse_reply};
use crate::Result;
use crate::config::DialogueConfig;

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Turns user transcripts into styled assistant turns
///
/// Requests are spaced at least `min_interval` apart. Transient failures
/// are retried with backoff; once the attempts run out the error is
/// returned and the caller moves on to the next input.
pub struct DialogueEngine {
    backend: Arc<dyn ChatBackend>,
    limiter: Option<DirectLimiter>,
    policy: RetryPolicy,
}

impl DialogueEngine {
    /// Wrap a backend
    ///
    /// A zero `min_interval` disables rate limiting.
    #[must_use]
    pub fn new(backend: Arc<dyn ChatBackend>, min_interval: Duration, policy: RetryPolicy) -> Self {
        Self {
            backend,
            limiter: Quota::with_period(min_interval).map(RateLimiter::direct),
            policy,
        }
    }

    /// Wrap a backend using dialogue configuration
    #[must_use]
    pub fn from_config(backend: Arc<dyn ChatBackend>, config: &DialogueConfig) -> Self {
        Self::new(
            backend,
            config.min_interval(),
            RetryPolicy::from_config(config),
        )
    }

    /// Backend name
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.backend.name()
    }

    /// Get the assistant's reply to `text` as styled turns
    ///
    /// # Errors
    ///
    /// Returns the last error once a transient failure has used up all
    /// attempts, or the first non-transient error
    pub async fn respond(&self, text: &str) -> Result<Vec<DialogueTurn>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            match self.backend.send(text).await {
                Ok(reply) => {
                    tracing::debug!(backend = self.backend.name(), attempt, "reply received");
                    return Ok(parse_reply(&reply));
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt, &e);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "dialogue request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!(error = %e, attempts = max_attempts, "dialogue retries exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::Error;
    use crate::dialogue::Style;

    struct Scripted {
        replies: Mutex<VecDeque<Result<String>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, _text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("[NEUTRAL] default".to_string()))
        }
    }

    fn quota() -> Error {
        Error::QuotaExhausted {
            message: "exhausted".to_string(),
            retry_after: None,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn parses_reply_into_turns() {
        let backend = Scripted::new(vec![Ok("[EXCITED] Done!".to_string())]);
        let engine = DialogueEngine::new(backend, Duration::ZERO, fast_policy());

        let turns = engine.respond("do it").await.unwrap();
        assert_eq!(turns, vec![DialogueTurn::new(Style::Excited, "Done!")]);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let backend = Scripted::new(vec![Err(quota()), Ok("[LAZY] fine".to_string())]);
        let engine = DialogueEngine::new(backend.clone(), Duration::ZERO, fast_policy());

        let turns = engine.respond("hi").await.unwrap();
        assert_eq!(turns[0].style, Style::Lazy);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let backend = Scripted::new(vec![Err(quota()), Err(quota()), Err(quota())]);
        let engine = DialogueEngine::new(backend.clone(), Duration::ZERO, fast_policy());

        let result = engine.respond("hi").await;
        assert!(matches!(result, Err(Error::QuotaExhausted { .. })));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

        // The next input goes through normally
        assert!(engine.respond("again").await.is_ok());
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let backend = Scripted::new(vec![Err(Error::Dialogue("400".to_string()))]);
        let engine = DialogueEngine::new(backend.clone(), Duration::ZERO, fast_policy());

        assert!(engine.respond("hi").await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn spaces_requests_by_min_interval() {
        let backend = Scripted::new(vec![]);
        let engine = DialogueEngine::new(backend, Duration::from_millis(100), fast_policy());

        let start = std::time::Instant::now();
        engine.respond("one").await.unwrap();
        engine.respond("two").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(90));
    }
}
