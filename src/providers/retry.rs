//! Retry configuration, delay calculation, and the shared retry loop.
//!
//! The policy is split into pure decisions on [`RetryConfig`]
//! ([`should_retry()`](RetryConfig::should_retry),
//! [`next_delay()`](RetryConfig::next_delay)) and the async loop in
//! [`with_retry()`], which only sleeps and counts. [`RetryState`] carries
//! the per-call bookkeeping and is discarded when the call completes.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::telemetry;
use crate::{FormulaError, Result};

/// Configuration for retry behaviour on transient errors.
///
/// Uses exponential backoff with optional jitter:
///
/// ```rust
/// # use formulaspark::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .initial_delay(Duration::from_millis(200))
///     .jitter(true);
/// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Base delay before the first retry. Default: 1s.
    pub initial_delay: Duration,
    /// Maximum delay between retries (caps exponential growth). Default: 30s.
    pub max_delay: Duration,
    /// Whether to add random jitter to delays. Default: true.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Set maximum attempts (including the initial request). Clamped to at least 1.
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    /// Set the base delay before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay between retries.
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    ///
    /// Uses exponential backoff: `initial_delay * 2^attempt`, capped at `max_delay`.
    /// Does NOT include jitter, see [`next_delay()`](Self::next_delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }

    /// Delay to sleep after the given (0-indexed) attempt failed.
    ///
    /// With jitter enabled the backoff is scaled by a random factor in
    /// `[0.5, 1.0]`, so it never exceeds the capped value.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter && !delay.is_zero() {
            delay.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            delay
        }
    }

    /// Whether a failure on the given (0-indexed) attempt should be retried.
    ///
    /// Only transient errors are retried, and only while budget remains.
    pub fn should_retry(&self, error: &FormulaError, attempt: u32) -> bool {
        error.is_transient() && attempt.saturating_add(1) < self.max_attempts
    }
}

/// Bookkeeping for one logical call.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Attempts made so far.
    pub attempt: u32,
    pub last_error: Option<FormulaError>,
    /// Delay before the next attempt, if one is scheduled.
    pub next_delay: Option<Duration>,
}

impl RetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failed attempt and decide what happens next.
    ///
    /// Returns the delay to wait before retrying, or `None` when the call
    /// must give up.
    pub fn record_failure(&mut self, config: &RetryConfig, error: FormulaError) -> Option<Duration> {
        let failed_attempt = self.attempt;
        self.attempt += 1;
        self.next_delay = config
            .should_retry(&error, failed_attempt)
            .then(|| config.next_delay(failed_attempt));
        self.last_error = Some(error);
        self.next_delay
    }

    /// Turn the state into the terminal error returned to the caller.
    ///
    /// Permanent errors on the first attempt are returned unchanged; anything
    /// that consumed retry budget is wrapped in
    /// [`FormulaError::RetriesExhausted`].
    pub fn into_error(self) -> FormulaError {
        let last = self
            .last_error
            .unwrap_or_else(|| FormulaError::TransientNetwork("no attempt was made".into()));
        if last.is_transient() {
            FormulaError::RetriesExhausted {
                attempts: self.attempt,
                last_error: Box::new(last),
            }
        } else {
            last
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Retries on transient errors (as classified by [`FormulaError::is_transient()`])
/// up to `config.max_attempts`, using exponential backoff. The closure gets
/// the 0-indexed attempt number.
///
/// Permanent errors are returned immediately without retry.
pub(crate) async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, mut f: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut state = RetryState::new();
    loop {
        let attempt = state.attempt;
        match f(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let summary = e.to_string();
                match state.record_failure(config, e) {
                    Some(delay) => {
                        metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                            .increment(1);
                        warn!(
                            operation,
                            attempt = attempt + 1,
                            max_attempts = config.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %summary,
                            "retrying after transient error"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(state.into_error()),
                }
            }
        }
    }
}
