//! Error classification and exponential-backoff retry.
//!
//! Classification is deliberately textual: the provider SDK is out of scope,
//! so the only portable signal is the error message. Quota exhaustion is
//! never retried (another attempt would burn budget for no gain); transient
//! network failures are retried with jittered exponential backoff; anything
//! unrecognized is treated as permanent.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use thiserror::Error;

/// How a failed call should be treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Daily or rate quota spent; not retryable, handled by key rotation.
    QuotaExhausted,
    /// Worth another attempt after backoff.
    Transient,
    /// Unknown failures are not retried.
    Permanent,
}

const QUOTA_PATTERNS: &[&str] = &["quota", "rate limit", "api limit"];
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "temporarily unavailable",
    "connection reset",
    "internal server error",
    "500",
    "502",
    "503",
    "504",
];

/// Classify an error by its rendered message.
pub fn classify(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::QuotaExhausted;
    }
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return ErrorClass::Transient;
    }
    ErrorClass::Permanent
}

/// Terminal outcome of a retried operation.
#[derive(Debug, Error)]
pub enum RetryError<E: Display + std::fmt::Debug> {
    #[error("quota exhausted: {0}")]
    QuotaExhausted(E),

    #[error("permanent failure: {0}")]
    Permanent(E),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
}

impl<E: Display + std::fmt::Debug> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::QuotaExhausted(e) | RetryError::Permanent(e) => e,
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

/// Exponential backoff policy: base 2, initial 4 s, jitter ±20%, cap 60 s,
/// three attempts by default.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy for malformed-response recovery: two extra attempts, short waits.
    pub fn for_parse_recovery() -> Self {
        Self {
            max_attempts: 2,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(4),
            jitter: 0.2,
        }
    }

    /// Delay before retry number `attempt` (1-based: the delay after the
    /// first failure is `backoff_delay(1)`).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_backoff);
        let factor = rand::rng().random_range(1.0 - self.jitter..=1.0 + self.jitter);
        base.mul_f64(factor).min(self.max_backoff)
    }

    /// Drive `f` under this policy. `f` receives the 1-based attempt number.
    ///
    /// Quota and permanent failures return immediately; transient failures
    /// are retried until the attempt budget runs out.
    pub async fn run<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, RetryError<E>>
    where
        E: Display + std::fmt::Debug,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => match classify(&err.to_string()) {
                    ErrorClass::QuotaExhausted => {
                        tracing::warn!(operation, attempt, error = %err, "quota exhausted");
                        return Err(RetryError::QuotaExhausted(err));
                    }
                    ErrorClass::Permanent => {
                        tracing::error!(operation, attempt, error = %err, "permanent failure");
                        return Err(RetryError::Permanent(err));
                    }
                    ErrorClass::Transient => {
                        if attempt >= self.max_attempts {
                            tracing::error!(
                                operation,
                                attempts = attempt,
                                error = %err,
                                "retry budget exhausted"
                            );
                            return Err(RetryError::Exhausted {
                                attempts: attempt,
                                last: err,
                            });
                        }
                        let delay = self.backoff_delay(attempt);
                        tracing::warn!(
                            operation,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "transient failure; backing off"
                        );
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
    }
}
