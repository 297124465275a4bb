//! Exponential backoff with jitter
//!
//! Re-issues operations that failed on an optimistic-concurrency conflict.
//! Business-rule failures are returned immediately.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::retry::{INITIAL_DELAY, MAX_DELAY, MAX_RETRIES};
use crate::error::CoverageError;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries, in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay between retries, in milliseconds
    pub max_delay_ms: u64,
    /// Whether to add random jitter to delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            initial_delay_ms: INITIAL_DELAY.as_millis() as u64,
            max_delay_ms: MAX_DELAY.as_millis() as u64,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Trait for errors that may be retryable
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for CoverageError {
    fn is_retryable(&self) -> bool {
        CoverageError::is_retryable(self)
    }
}

/// Execute an operation with retry logic
///
/// The operation must re-read whatever it depends on, since a retry only
/// makes sense against fresh state.
pub fn with_retry<F, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay();

    loop {
        match operation() {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < config.max_retries => {
                let jittered = if config.jitter && !delay.is_zero() {
                    let jitter_ms = rand::thread_rng().gen_range(0..=delay.as_millis() as u64);
                    delay + Duration::from_millis(jitter_ms)
                } else {
                    delay
                };

                warn!(
                    attempt = attempt + 1,
                    max_retries = config.max_retries,
                    delay_ms = jittered.as_millis() as u64,
                    "Retrying after error: {}",
                    e
                );

                std::thread::sleep(jittered);
                attempt += 1;
                delay = (delay * 2).min(config.max_delay());
            }
            Err(e) => return Err(e),
        }
    }
}
