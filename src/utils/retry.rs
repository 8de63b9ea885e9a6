use anyhow::{Error, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tracing::{error, warn};

use crate::utils::strip_html;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            exponential: 2.0,
        }
    }
}

/// Upper bound of the wait after failed attempt `attempt` (1-based):
/// `base_delay_ms * exponential^(attempt - 1)`, capped at `max_delay_ms`.
pub fn backoff_ceiling(config: &RetryConfig, attempt: u32) -> u64 {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let ceiling = config.base_delay_ms as f64 * config.exponential.powi(exponent);
    (config.max_delay_ms as f64).min(ceiling) as u64
}

pub async fn retry<F, Fut, T>(operation: F, config: &RetryConfig, context: &str) -> Result<T, Error>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, Error>>,
{
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                let message = strip_html(&e.to_string());
                if attempt >= config.max_attempts {
                    error!("'{}' failed after {} attempts: {}", context, attempt, message);
                    return Err(anyhow!(message).context(format!("{context} failed after {attempt} attempts")));
                }

                // Exponential backoff with full jitter
                let delay = (fastrand::f64() * backoff_ceiling(config, attempt) as f64) as u64;
                warn!(
                    "Attempt {}/{} for '{}' failed: {}. Retrying in {}ms...",
                    attempt, config.max_attempts, context, message, delay
                );
                sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}
