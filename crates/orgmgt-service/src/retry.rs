//! Retry with exponential backoff.
//!
//! Resolution retries only errors its predicate marks as retryable, which
//! for resident resolution means [`OrgMgtError::ResolutionTimeout`]. Each
//! attempt reads a fresh ancestor chain.
//!
//! # Example
//!
//! ```rust,no_run
//! use orgmgt_core::{OrgMgtError, OrgMgtResult};
//! use orgmgt_service::retry::{with_retry_if, RetryConfig};
//!
//! async fn example() -> OrgMgtResult<u32> {
//!     let config = RetryConfig::with_attempts(2);
//!
//!     with_retry_if(&config, || async { Ok(7) }, OrgMgtError::is_retryable).await
//! }
//! ```
//!
//! [`OrgMgtError::ResolutionTimeout`]: orgmgt_core::OrgMgtError::ResolutionTimeout

use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Base for exponential backoff
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            exponential_base: 2.0,
        }
    }
}

impl RetryConfig {
    /// Default backoff with a custom attempt count.
    ///
    /// Zero is treated as one attempt.
    pub fn with_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Execute `f`, retrying errors accepted by `is_retryable`.
///
/// Errors rejected by the predicate are returned immediately. Retryable
/// errors are retried with exponential backoff until `max_attempts` is
/// reached, then the last error is returned.
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    mut f: F,
    mut is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
    P: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if !is_retryable(&e) => {
                tracing::debug!(error = ?e, "Error is not retryable, returning immediately");
                return Err(e);
            }
            Err(e) if attempt >= config.max_attempts => {
                tracing::warn!(
                    attempts = attempt,
                    error = ?e,
                    "All retry attempts exhausted"
                );
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    error = ?e,
                    "Attempt failed, retrying"
                );

                sleep(delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.exponential_base).min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgmgt_core::{IdentityKind, OrgMgtError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use uuid::Uuid;

    fn timeout_error() -> OrgMgtError {
        OrgMgtError::ResolutionTimeout {
            handle: "alice".to_string(),
            kind: IdentityKind::User,
            accessing_org_id: Uuid::nil(),
            timeout_ms: 10,
        }
    }

    #[test]
    fn test_retry_config_presets() {
        assert_eq!(RetryConfig::default().max_attempts, 2);
        assert_eq!(RetryConfig::with_attempts(0).max_attempts, 1);
        assert_eq!(RetryConfig::with_attempts(4).max_attempts, 4);
    }

    #[tokio::test]
    async fn test_retries_timeout_then_succeeds() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::with_attempts(3)
        };
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry_if(
            &config,
            || {
                let counter = counter_clone.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(timeout_error())
                    } else {
                        Ok(42)
                    }
                }
            },
            OrgMgtError::is_retryable,
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_error_returns_immediately() {
        let config = RetryConfig::with_attempts(5);
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = with_retry_if(
            &config,
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(OrgMgtError::OrganizationNotAccessible { org_id: Uuid::nil() })
                }
            },
            OrgMgtError::is_retryable,
        )
        .await;

        assert!(matches!(result, Err(OrgMgtError::OrganizationNotAccessible { .. })));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(1),
            ..RetryConfig::with_attempts(2)
        };
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result: Result<(), _> = with_retry_if(
            &config,
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(timeout_error())
                }
            },
            OrgMgtError::is_retryable,
        )
        .await;

        assert_eq!(result, Err(timeout_error()));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
