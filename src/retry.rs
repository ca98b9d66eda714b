//! Retry strategies for transient server failures, plus a standalone backoff helper.
//!
//! The client retries a request only when the server answers with a transient status
//! (503 or 504). Delays grow exponentially and carry no jitter, so a given strategy
//! always produces the same schedule.
//!
//! [`retry`] is an independent primitive: it wraps any fallible async operation and
//! re-runs it with exponential backoff while a caller-supplied predicate says the
//! failure is worth retrying.

use crate::ConfigError;
use http::StatusCode;
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Statuses retried by default.
pub const TRANSIENT_STATUSES: [StatusCode; 2] =
    [StatusCode::SERVICE_UNAVAILABLE, StatusCode::GATEWAY_TIMEOUT];

/// Returns `true` for 503 and 504.
pub fn is_transient(status: StatusCode) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// Defines how long to wait between attempts when a response is transient.
///
/// # Examples
///
/// ```
/// use iron_core::RetryStrategy;
/// use std::time::Duration;
///
/// // The default: 5 retries, waiting 0.5s, 1s, 2s, 4s, 8s
/// let default = RetryStrategy::default();
/// assert_eq!(default.delay_for_attempt(1), Some(Duration::from_millis(500)));
///
/// // No retries at all
/// let none = RetryStrategy::None;
/// assert_eq!(none.delay_for_attempt(1), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Do not retry.
    None,

    /// Retry with a delay that doubles after every failed attempt.
    ///
    /// Retry `n` (1-indexed) waits `initial_delay * 2^(n - 1)`.
    ExponentialBackoff {
        /// The delay before the first retry.
        initial_delay: Duration,
        /// The number of retries after the first attempt.
        max_retries: usize,
    },
}

impl RetryStrategy {
    /// Returns the delay before the given retry, or `None` if retries are exhausted.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The retry number (1-indexed, so 1 = first retry)
    pub fn delay_for_attempt(&self, attempt: usize) -> Option<Duration> {
        match self {
            RetryStrategy::None => None,
            RetryStrategy::ExponentialBackoff {
                initial_delay,
                max_retries,
            } => {
                if attempt == 0 || attempt > *max_retries {
                    return None;
                }

                let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1) as u32);
                Some(initial_delay.saturating_mul(multiplier))
            }
        }
    }

    /// Returns the maximum number of retries.
    pub fn max_retries(&self) -> usize {
        match self {
            RetryStrategy::None => 0,
            RetryStrategy::ExponentialBackoff { max_retries, .. } => *max_retries,
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::ExponentialBackoff {
            initial_delay: Duration::from_millis(500),
            max_retries: 5,
        }
    }
}

/// Decides whether a response status warrants another attempt.
///
/// # Examples
///
/// ```
/// use iron_core::RetryPredicate;
/// use http::StatusCode;
///
/// struct RetryOnBadGateway;
///
/// impl RetryPredicate for RetryOnBadGateway {
///     fn should_retry(&self, status: StatusCode, _attempt: usize) -> bool {
///         status == StatusCode::BAD_GATEWAY
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Determines whether the request should be sent again.
    ///
    /// # Arguments
    ///
    /// * `status` - The status of the response just received
    /// * `attempt` - The attempt that produced it (1-indexed)
    fn should_retry(&self, status: StatusCode, attempt: usize) -> bool;
}

/// Retry on 503 and 504 only.
#[derive(Debug, Clone, Copy)]
pub struct RetryOnTransient;

impl RetryPredicate for RetryOnTransient {
    fn should_retry(&self, status: StatusCode, _attempt: usize) -> bool {
        is_transient(status)
    }
}

/// Retry on an explicit set of statuses.
#[derive(Debug, Clone)]
pub struct RetryOnStatus {
    statuses: Vec<StatusCode>,
}

impl RetryOnStatus {
    /// Creates a predicate matching any of `statuses`.
    pub fn new(statuses: impl IntoIterator<Item = StatusCode>) -> Self {
        Self {
            statuses: statuses.into_iter().collect(),
        }
    }
}

impl RetryPredicate for RetryOnStatus {
    fn should_retry(&self, status: StatusCode, _attempt: usize) -> bool {
        self.statuses.contains(&status)
    }
}

/// Parameters for [`retry`].
///
/// `tries` counts every invocation, including the first one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    tries: usize,
    delay: Duration,
    backoff: f64,
}

impl BackoffPolicy {
    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRetryPolicy`] if `delay` is zero or `backoff` is
    /// not greater than 1.
    pub fn new(tries: usize, delay: Duration, backoff: f64) -> Result<Self, ConfigError> {
        if !backoff.is_finite() || backoff <= 1.0 {
            return Err(ConfigError::InvalidRetryPolicy(
                "backoff must be greater than 1".to_string(),
            ));
        }
        if delay.is_zero() {
            return Err(ConfigError::InvalidRetryPolicy(
                "delay must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            tries,
            delay,
            backoff,
        })
    }

    /// Maximum number of invocations.
    pub fn tries(&self) -> usize {
        self.tries
    }

    /// Delay after the first failure.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Factor applied to the delay after every failure.
    pub fn backoff(&self) -> f64 {
        self.backoff
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            tries: 5,
            delay: Duration::from_millis(500),
            backoff: 2.0,
        }
    }
}

/// Why [`retry`] gave up.
#[derive(thiserror::Error, Debug)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("Max retries reached after {attempts} attempts. Aborting.")]
    TooManyRetries {
        /// How many times the operation ran
        attempts: usize,
        /// The error from the final attempt, `None` when `tries` was 0
        last_error: Option<E>,
    },

    /// The operation failed with an error the predicate declined to retry.
    #[error("{0}")]
    Aborted(E),
}

/// Runs `op` until it succeeds, retrying with exponential backoff while
/// `should_retry` accepts the error.
///
/// # Examples
///
/// ```
/// use iron_core::retry::{retry, BackoffPolicy, RetryError};
/// use std::time::Duration;
///
/// # async fn example() {
/// let policy = BackoffPolicy::new(3, Duration::from_millis(10), 2.0).unwrap();
/// let result: Result<(), RetryError<&str>> =
///     retry(&policy, |_e: &&str| true, || async { Err("busy") }).await;
///
/// assert!(matches!(result, Err(RetryError::TooManyRetries { attempts: 3, .. })));
/// # }
/// ```
pub async fn retry<T, E, F, Fut, P>(
    policy: &BackoffPolicy,
    should_retry: P,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: fmt::Display,
{
    let mut delay = policy.delay;
    let mut last_error = None;

    for attempt in 1..=policy.tries {
        tracing::debug!(attempt = attempt, "Attempt");

        match op().await {
            Ok(value) => {
                tracing::debug!(attempt = attempt, "Success");
                return Ok(value);
            }
            Err(e) if should_retry(&e) => {
                if attempt < policy.tries {
                    tracing::debug!(
                        error = %e,
                        attempt = attempt,
                        delay_ms = delay.as_millis(),
                        "Failed, retrying after delay"
                    );
                    tokio::time::sleep(delay).await;
                    delay = Duration::try_from_secs_f64(delay.as_secs_f64() * policy.backoff)
                        .unwrap_or(Duration::MAX);
                } else {
                    tracing::debug!(error = %e, attempt = attempt, "Failed");
                }
                last_error = Some(e);
            }
            Err(e) => return Err(RetryError::Aborted(e)),
        }
    }

    Err(RetryError::TooManyRetries {
        attempts: policy.tries,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use tokio::time::Instant;

    #[test]
    fn test_default_strategy_delays() {
        let strategy = RetryStrategy::default();

        assert_eq!(
            strategy.delay_for_attempt(1),
            Some(Duration::from_millis(500))
        );
        assert_eq!(strategy.delay_for_attempt(2), Some(Duration::from_secs(1)));
        assert_eq!(strategy.delay_for_attempt(3), Some(Duration::from_secs(2)));
        assert_eq!(strategy.delay_for_attempt(4), Some(Duration::from_secs(4)));
        assert_eq!(strategy.delay_for_attempt(5), Some(Duration::from_secs(8)));
        assert_eq!(strategy.delay_for_attempt(6), None);
        assert_eq!(strategy.max_retries(), 5);
    }

    #[test]
    fn test_no_retry() {
        let strategy = RetryStrategy::None;
        assert_eq!(strategy.delay_for_attempt(1), None);
        assert_eq!(strategy.max_retries(), 0);
    }

    #[test]
    fn test_transient_predicate() {
        assert!(RetryOnTransient.should_retry(StatusCode::SERVICE_UNAVAILABLE, 1));
        assert!(RetryOnTransient.should_retry(StatusCode::GATEWAY_TIMEOUT, 1));
        assert!(!RetryOnTransient.should_retry(StatusCode::INTERNAL_SERVER_ERROR, 1));
        assert!(!RetryOnTransient.should_retry(StatusCode::OK, 1));
    }

    #[test]
    fn test_backoff_policy_validation() {
        assert!(BackoffPolicy::new(5, Duration::from_millis(500), 1.0).is_err());
        assert!(BackoffPolicy::new(5, Duration::ZERO, 2.0).is_err());
        assert!(BackoffPolicy::new(0, Duration::from_millis(1), 1.5).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_with_exponential_backoff() {
        let policy = BackoffPolicy::default();
        let calls = RefCell::new(Vec::new());

        let result: Result<u32, RetryError<&str>> = retry(
            &policy,
            |_| true,
            || {
                calls.borrow_mut().push(Instant::now());
                let n = calls.borrow().len();
                async move {
                    if n < 4 {
                        Err("unavailable")
                    } else {
                        Ok(7)
                    }
                }
            },
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        let calls = calls.into_inner();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_reports_last_error() {
        let policy = BackoffPolicy::new(3, Duration::from_millis(10), 2.0).unwrap();
        let count = Cell::new(0);

        let result: Result<(), RetryError<String>> = retry(
            &policy,
            |_| true,
            || {
                count.set(count.get() + 1);
                let n = count.get();
                async move { Err(format!("failure {}", n)) }
            },
        )
        .await;

        match result {
            Err(RetryError::TooManyRetries {
                attempts,
                last_error,
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(last_error.as_deref(), Some("failure 3"));
            }
            other => panic!("Expected TooManyRetries, got {:?}", other),
        }
        assert_eq!(count.get(), 3);
    }

    #[tokio::test]
    async fn test_retry_propagates_unmatched_errors() {
        let policy = BackoffPolicy::default();
        let count = Cell::new(0);

        let result: Result<(), RetryError<&str>> = retry(
            &policy,
            |e| *e == "transient",
            || {
                count.set(count.get() + 1);
                async { Err("fatal") }
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Aborted("fatal"))));
        assert_eq!(count.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_backoff_saturates_instead_of_panicking() {
        let policy = BackoffPolicy::new(2, Duration::from_secs(1), 1e300).unwrap();
        let calls = RefCell::new(Vec::new());

        let result: Result<(), RetryError<&str>> = retry(
            &policy,
            |_| true,
            || {
                calls.borrow_mut().push(Instant::now());
                async { Err("busy") }
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(RetryError::TooManyRetries {
                attempts: 2,
                last_error: Some("busy")
            })
        ));
        let calls = calls.into_inner();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1] - calls[0], Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_zero_tries_never_invokes() {
        let policy = BackoffPolicy::new(0, Duration::from_millis(1), 2.0).unwrap();
        let count = Cell::new(0);

        let result: Result<(), RetryError<&str>> = retry(
            &policy,
            |_| true,
            || {
                count.set(count.get() + 1);
                async { Ok(()) }
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(RetryError::TooManyRetries {
                attempts: 0,
                last_error: None
            })
        ));
        assert_eq!(count.get(), 0);
    }
}
