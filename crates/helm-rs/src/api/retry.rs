//! Retry with fixed exponential backoff.
//!
//! Retries transient failures (network errors, 429, 5xx) up to
//! [`RetryConfig::max_retries`] times. Malformed requests, rejected
//! credentials and content-policy refusals fail on the first attempt.

use std::time::Duration;

use tracing::{debug, warn};

use super::transport::ChatTransport;
use crate::error::TerminalError;
use crate::{ChatCompletion, ChatRequest};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Backoff multiplier.
    pub multiplier: f64,
    /// Scale delays by a deterministic factor to spread out concurrent clients.
    pub jitter: bool,
}

impl Default for RetryConfig {
    /// Four attempts in total, waiting 1s, 2s and 4s between them.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(4),
            multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                _ => 0.85,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}

/// Wraps a [`ChatTransport`] and retries transient failures.
pub struct RetryingTransport {
    inner: Box<dyn ChatTransport>,
    config: RetryConfig,
}

impl RetryingTransport {
    pub fn new(inner: impl ChatTransport + 'static, config: RetryConfig) -> Self {
        Self {
            inner: Box::new(inner),
            config,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Send `request`, retrying per the config. Any non-retryable error, or
    /// the last retryable one once attempts run out, is returned as a
    /// [`TerminalError`].
    pub async fn execute(&self, request: &ChatRequest) -> Result<ChatCompletion, TerminalError> {
        let max_attempts = self.config.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.inner.send(request).await {
                Ok(completion) => {
                    if attempt > 1 {
                        debug!("Model request succeeded on attempt {attempt}");
                    }
                    return Ok(completion);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = self.config.delay_for_attempt(attempt - 1);
                    warn!(
                        "Model request failed (attempt {attempt}/{max_attempts}), retrying in {:.1}s: {err}",
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!("Model request failed permanently after {attempt} attempt(s): {err}");
                    return Err(TerminalError {
                        attempts: attempt,
                        last: err,
                    });
                }
            }
        }
    }
}
