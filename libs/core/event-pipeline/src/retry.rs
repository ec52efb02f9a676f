//! Per-message retry policy.
//!
//! Retries run inline in the topic worker: a message's retry sequence
//! resolves (success or exhaustion) before the next message is pulled, so
//! retries never reorder messages within a topic.
//!
//! ```text
//! attempt 1 ──fail──> sleep 1×unit ──> attempt 2 ──fail──> sleep 2×unit ──> attempt 3 ──fail──> Exhausted
//!     │                                   │                                     │
//!     └──ok──> Handled                    └──ok──> Handled                      └──ok──> Handled
//! ```

use crate::envelope::ReceivedEnvelope;
use crate::error::PipelineError;
use crate::registry::MessageHandler;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Bounded linear-backoff retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per message (including the first one)
    pub max_attempts: u32,
    /// Sleep after failed attempt `i` is `i * backoff_unit`
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a policy
    pub fn new(max_attempts: u32, backoff_unit: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_unit,
        }
    }

    /// Delay before the attempt following failed attempt `attempt` (1-based).
    ///
    /// Returns `None` when no attempt follows.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.backoff_unit * attempt)
    }

    /// Run the handler against a message until it succeeds, fails
    /// permanently, or runs out of attempts.
    pub async fn execute(
        &self,
        handler: &dyn MessageHandler,
        message: &ReceivedEnvelope,
    ) -> HandleOutcome {
        let mut attempt = 1;

        loop {
            match attempt_once(handler, message).await {
                Ok(()) => {
                    debug!(
                        topic = %message.topic(),
                        offset = %message.offset,
                        attempt,
                        "Handler succeeded"
                    );
                    return HandleOutcome::Handled { attempts: attempt };
                }
                Err(error) if !error.is_retryable() => {
                    return HandleOutcome::Rejected { error };
                }
                Err(error) => {
                    warn!(
                        topic = %message.topic(),
                        handler = handler.name(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %error,
                        "Failed to process message, retrying"
                    );

                    match self.delay_after(attempt) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => {
                            return HandleOutcome::Exhausted {
                                attempts: attempt,
                                error,
                            };
                        }
                    }
                }
            }
        }
    }
}

/// One handler invocation. A panic counts as a failed, retryable attempt so
/// the worker keeps consuming the topic.
async fn attempt_once(
    handler: &dyn MessageHandler,
    message: &ReceivedEnvelope,
) -> Result<(), PipelineError> {
    match AssertUnwindSafe(handler.handle(&message.envelope))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            error!(
                topic = %message.topic(),
                offset = %message.offset,
                handler = handler.name(),
                panic = %reason,
                "Handler panicked"
            );
            Err(PipelineError::handler(format!("handler panicked: {}", reason)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Result of running a message through the retry policy
#[derive(Debug)]
pub enum HandleOutcome {
    /// The handler succeeded on attempt `attempts`
    Handled { attempts: u32 },
    /// Every attempt failed; `error` is the last one
    Exhausted { attempts: u32, error: PipelineError },
    /// A non-retryable error (e.g. malformed payload) ended the sequence
    Rejected { error: PipelineError },
}

impl HandleOutcome {
    /// Whether the message was handled successfully
    pub fn is_handled(&self) -> bool {
        matches!(self, HandleOutcome::Handled { .. })
    }

    /// Number of handler invocations
    pub fn attempts(&self) -> u32 {
        match self {
            HandleOutcome::Handled { attempts } => *attempts,
            HandleOutcome::Exhausted { attempts, .. } => *attempts,
            HandleOutcome::Rejected { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds
    struct FlakyHandler {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyHandler {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _envelope: &Envelope) -> Result<(), PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                Err(PipelineError::handler(format!("failure {}", call)))
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &'static str {
            "FlakyHandler"
        }
    }

    struct MalformedHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for MalformedHandler {
        async fn handle(&self, envelope: &Envelope) -> Result<(), PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            envelope.decode::<u32>().map(|_| ())
        }

        fn name(&self) -> &'static str {
            "MalformedHandler"
        }
    }

    /// Panics on the first `panics` calls, then succeeds
    struct PanickingHandler {
        panics: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageHandler for PanickingHandler {
        async fn handle(&self, _envelope: &Envelope) -> Result<(), PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.panics {
                panic!("smtp client blew up on call {}", call);
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "PanickingHandler"
        }
    }

    fn message() -> ReceivedEnvelope {
        ReceivedEnvelope::new(Envelope::new("events", "a@x.com", b"{}".to_vec()), 0, "1-0")
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1))
    }

    #[test]
    fn test_delay_after() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_after(1), Some(Duration::from_secs(1)));
        assert_eq!(policy.delay_after(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay_after(3), None);
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let handler = FlakyHandler::new(0);
        let outcome = fast_policy().execute(&handler, &message()).await;

        assert!(outcome.is_handled());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn test_fails_k_times_then_succeeds() {
        for k in 1..3 {
            let handler = FlakyHandler::new(k);
            let outcome = fast_policy().execute(&handler, &message()).await;

            assert!(outcome.is_handled());
            assert_eq!(outcome.attempts(), k + 1);
            assert_eq!(handler.calls(), k + 1);
        }
    }

    #[tokio::test]
    async fn test_always_failing_stops_after_three_attempts() {
        let handler = FlakyHandler::new(u32::MAX);
        let outcome = fast_policy().execute(&handler, &message()).await;

        match outcome {
            HandleOutcome::Exhausted { attempts, error } => {
                assert_eq!(attempts, 3);
                assert_eq!(error.to_string(), "Handler error: failure 3");
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(handler.calls(), 3);
    }

    #[tokio::test]
    async fn test_decode_error_is_not_retried() {
        let handler = MalformedHandler {
            calls: AtomicU32::new(0),
        };
        let outcome = fast_policy().execute(&handler, &message()).await;

        assert!(matches!(
            outcome,
            HandleOutcome::Rejected {
                error: PipelineError::Decode(_)
            }
        ));
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panic_counts_as_failed_attempt() {
        let handler = PanickingHandler {
            panics: 1,
            calls: AtomicU32::new(0),
        };
        let outcome = fast_policy().execute(&handler, &message()).await;

        assert!(outcome.is_handled());
        assert_eq!(outcome.attempts(), 2);

        let handler = PanickingHandler {
            panics: u32::MAX,
            calls: AtomicU32::new(0),
        };
        match fast_policy().execute(&handler, &message()).await {
            HandleOutcome::Exhausted { attempts, error } => {
                assert_eq!(attempts, 3);
                assert_eq!(error.category(), crate::error::ErrorCategory::Business);
                assert!(error.to_string().contains("smtp client blew up on call 3"));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_linear_backoff_between_attempts() {
        let handler = FlakyHandler::new(u32::MAX);
        let start = tokio::time::Instant::now();

        RetryPolicy::default().execute(&handler, &message()).await;

        // 1s after the first failure, 2s after the second, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
