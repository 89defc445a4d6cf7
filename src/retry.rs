//! Retry policy: which failures are retried and how long to wait in between.

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use std::time::Duration;

use crate::config::ClientConfiguration;

/// HTTP statuses worth repeating a request for.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffStrategy {
    /// Always wait the base delay.
    Fixed,
    /// Wait `base × (n + 1)` before retry `n`.
    Linear,
    /// Wait `base × multiplier^n` before retry `n`.
    Exponential { multiplier: f64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential { multiplier: 2.0 }
    }
}

/// Where a failed attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// The connection was never established, so nothing was sent.
    BeforeSend,
    /// The request may have reached the server.
    AfterSend,
}

/// Retry decisions derived from a [`ClientConfiguration`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    max_delay: Duration,
    strategy: BackoffStrategy,
    jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfiguration) -> Self {
        Self {
            max_retries: config.max_retries(),
            base_delay: config.retry_delay(),
            max_delay: config.max_retry_delay(),
            strategy: config.backoff(),
            jitter: config.retry_jitter(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total number of attempts a call may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Whether another attempt may follow attempt number `attempt` (1-based).
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts()
    }

    /// Whether a failure at `point` may be retried for `method`.
    ///
    /// Failures before the request was sent are always safe to repeat. After
    /// that only safe methods are repeated, unless the caller opted in.
    pub fn allows(&self, method: &Method, point: FailurePoint, retry_non_idempotent: bool) -> bool {
        match point {
            FailurePoint::BeforeSend => true,
            FailurePoint::AfterSend => is_safe_method(method) || retry_non_idempotent,
        }
    }

    /// Delay before retry number `retry` (0-based).
    ///
    /// A server-provided `Retry-After` wins over the computed backoff; both are
    /// capped at the configured maximum delay.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after {
            return hint.min(self.max_delay);
        }

        let base = self.base_delay.as_secs_f64();
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base * (f64::from(retry) + 1.0),
            BackoffStrategy::Exponential { multiplier } => base * multiplier.powi(exponent),
        };
        let delay = Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()));

        if self.jitter {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }
}

/// GET, HEAD and OPTIONS never change server state.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status.as_u16())
}

/// Parse a `Retry-After` header given in seconds.
///
/// HTTP-date values are not supported and yield `None`.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Waits between retry attempts.
///
/// The transport sleeps through this trait so the wait can be observed or
/// skipped.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}
