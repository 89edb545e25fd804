//! Retry utilities for resilient operations
//!
//! A small bounded retry loop with optional exponential backoff. The fetch
//! worker uses it with zero delay for transport failures; the detail updater
//! uses the default backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first one
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (caps exponential growth)
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry immediately, without sleeping between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    /// Total number of attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Calculate delay for a given attempt using exponential backoff
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = if attempt == 0 {
            0
        } else {
            let exponential =
                self.base_delay_ms as f64 * self.backoff_multiplier.powi((attempt - 1) as i32);
            (exponential as u64).min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }
}

/// Execute an operation with retry logic
///
/// Returns `Ok(T)` on the first success, or the last error once
/// `config.max_retries` retries have failed. Errors for which `should_retry`
/// returns false are returned immediately.
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = config.calculate_delay(attempt);
            if !delay.is_zero() {
                debug!(
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying operation after delay"
                );
                tokio::time::sleep(delay).await;
            }
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    warn!(error = %e, "Non-retryable error encountered");
                    return Err(e);
                }

                warn!(
                    attempt = attempt,
                    max_retries = config.max_retries,
                    error = %e,
                    "Operation failed"
                );

                if attempt >= config.max_retries {
                    return Err(e);
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let config = RetryConfig::immediate(3);
        let result = with_retry_if(&config, || async { Ok::<_, String>(42) }, |_| true).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let config = RetryConfig::immediate(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_retry_if(
            &config,
            move || {
                let attempts = Arc::clone(&attempts_clone);
                async move {
                    let count = attempts.fetch_add(1, Ordering::SeqCst);
                    if count < 2 {
                        return Err("Simulated failure".to_string());
                    }
                    Ok(42)
                }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted_counts_attempts() {
        let config = RetryConfig::immediate(3);
        let attempts = AtomicU32::new(0);

        let result: Result<(), String> = with_retry_if(
            &config,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("Permanent failure".to_string()) }
            },
            |_| true,
        )
        .await;

        assert_eq!(result.unwrap_err(), "Permanent failure");
        assert_eq!(attempts.load(Ordering::SeqCst), config.max_attempts());
    }

    #[tokio::test]
    async fn test_retry_if_predicate() {
        let config = RetryConfig::immediate(3);
        let attempts = AtomicU32::new(0);

        let result: Result<(), String> = with_retry_if(
            &config,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("validation error".to_string()) }
            },
            |e| !e.contains("validation"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_calculate_delay() {
        let config = RetryConfig::default();

        assert_eq!(config.calculate_delay(0), Duration::from_millis(0));
        assert_eq!(config.calculate_delay(1), Duration::from_millis(1000));
        assert_eq!(config.calculate_delay(2), Duration::from_millis(2000));
        assert_eq!(config.calculate_delay(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_immediate_has_no_delay() {
        let config = RetryConfig::immediate(3);
        assert_eq!(config.calculate_delay(3), Duration::ZERO);
        assert_eq!(config.max_attempts(), 4);
    }
}
