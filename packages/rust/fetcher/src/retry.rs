//! Attempt budget and exponential backoff for one network phase.

use std::future::Future;
use std::time::Duration;

use reportharvest_shared::HarvestSettings;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::{FetchFailure, Phase};

/// How a single attempt failed.
#[derive(Debug)]
pub enum AttemptError {
    /// The server answered with a non-success status.
    Status(StatusCode),
    /// The request never produced a complete response.
    Transport(reqwest::Error),
}

impl From<reqwest::Error> for AttemptError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e)
    }
}

/// Retry configuration for one phase of the protocol.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: u32,
    /// Backoff unit.
    pub base_delay: Duration,
    /// Statuses worth another attempt.
    pub retryable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(300),
            retryable_statuses: vec![429, 502, 503, 504],
        }
    }
}

impl From<&HarvestSettings> for RetryPolicy {
    fn from(settings: &HarvestSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts,
            base_delay: settings.base_delay,
            retryable_statuses: settings.retryable_statuses.clone(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the failed attempt numbered `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt.min(16)))
    }

    pub fn is_retryable_status(&self, status: StatusCode) -> bool {
        self.retryable_statuses.contains(&status.as_u16())
    }

    /// Run `attempt` until it succeeds, fails permanently, or the budget runs out.
    ///
    /// `attempt` is called once per try and must build a fresh request each time.
    pub async fn run<T, F, Fut>(&self, phase: Phase, mut attempt: F) -> Result<T, FetchFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut last = String::new();

        for n in 0..self.max_attempts {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Status(status)) if self.is_retryable_status(status) => {
                    last = format!("HTTP {status}");
                }
                Err(AttemptError::Status(status)) => {
                    return Err(FetchFailure::Status {
                        phase,
                        status: status.as_u16(),
                    });
                }
                Err(AttemptError::Transport(e)) if is_connection_fault(&e) => {
                    last = e.to_string();
                }
                Err(AttemptError::Transport(e)) => {
                    return Err(FetchFailure::Unexpected {
                        phase,
                        message: e.to_string(),
                    });
                }
            }

            if n + 1 < self.max_attempts {
                let delay = self.backoff(n);
                debug!(%phase, attempt = n + 1, delay_ms = delay.as_millis() as u64, reason = %last, "retrying");
                tokio::time::sleep(delay).await;
            }
        }

        Err(FetchFailure::Exhausted {
            phase,
            attempts: self.max_attempts,
            last,
        })
    }
}

/// Timeouts, refused/reset connections and truncated bodies.
fn is_connection_fault(e: &reqwest::Error) -> bool {
    !(e.is_builder() || e.is_redirect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(300));
        assert_eq!(policy.backoff(1), Duration::from_millis(600));
        assert_eq!(policy.backoff(4), Duration::from_millis(4800));
    }

    #[test]
    fn retryable_statuses() {
        let policy = RetryPolicy::default();
        assert!(policy.is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(policy.is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!policy.is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!policy.is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(4)
            .run(Phase::Handles, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AttemptError::Status(StatusCode::BAD_GATEWAY)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(FetchFailure::Exhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected Exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_status_stops_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(6)
            .run(Phase::Artifact, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AttemptError::Status(StatusCode::FORBIDDEN)) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.unwrap_err().is_permanent());
    }

    #[tokio::test]
    async fn recovers_after_transient_statuses() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(6)
            .run(Phase::Handles, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(AttemptError::Status(StatusCode::SERVICE_UNAVAILABLE))
                    } else {
                        Ok("page")
                    }
                }
            })
            .await;

        assert_eq!(result.expect("success"), "page");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
