//! Organization management configuration.
//!
//! Provides the tunables for hierarchy depth, resolution time budget and the
//! resolution cache, plus the optional user-store endpoint. Configuration is
//! loaded from environment variables with defaults suitable for local
//! development.

use orgmgt_core::DEFAULT_MAX_DEPTH;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryConfig;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing required configuration.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Organization management configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMgtConfig {
    /// Maximum hierarchy depth (top-level organizations are depth 0).
    pub max_depth: u32,

    /// Time budget for one resolution attempt, in milliseconds.
    pub resolution_timeout_ms: u64,

    /// Whether resolution results are cached.
    pub cache_enabled: bool,

    /// Lifetime of a cache entry in seconds.
    pub cache_ttl_secs: u64,

    /// Maximum number of cache entries.
    pub cache_max_entries: usize,

    /// Attempts for a resolution that times out (1 disables retries).
    pub timeout_retry_attempts: u32,

    /// User-store endpoint for ownership lookups.
    #[serde(default)]
    pub user_store: Option<UserStoreEndpoint>,
}

impl Default for OrgMgtConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            resolution_timeout_ms: 2_000,
            cache_enabled: true,
            cache_ttl_secs: 300,
            cache_max_entries: 10_000,
            timeout_retry_attempts: 2,
            user_store: None,
        }
    }
}

impl OrgMgtConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `ORGMGT_MAX_DEPTH`: Maximum hierarchy depth (default: 8)
    /// - `ORGMGT_RESOLUTION_TIMEOUT_MS`: Resolution time budget (default: 2000)
    /// - `ORGMGT_CACHE_ENABLED`: Whether to cache resolutions (default: true)
    /// - `ORGMGT_CACHE_TTL_SECS`: Cache entry lifetime (default: 300)
    /// - `ORGMGT_CACHE_MAX_ENTRIES`: Cache capacity (default: 10000)
    /// - `ORGMGT_TIMEOUT_RETRY_ATTEMPTS`: Attempts on timeout (default: 2)
    /// - `ORGMGT_USER_STORE_URL`: User-store base URL (optional)
    /// - `ORGMGT_USER_STORE_API_KEY`: User-store API key (optional)
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_depth: env_parse("ORGMGT_MAX_DEPTH").unwrap_or(default.max_depth),
            resolution_timeout_ms: env_parse("ORGMGT_RESOLUTION_TIMEOUT_MS")
                .unwrap_or(default.resolution_timeout_ms),
            cache_enabled: std::env::var("ORGMGT_CACHE_ENABLED")
                .map(|s| s != "false" && s != "0")
                .unwrap_or(default.cache_enabled),
            cache_ttl_secs: env_parse("ORGMGT_CACHE_TTL_SECS").unwrap_or(default.cache_ttl_secs),
            cache_max_entries: env_parse("ORGMGT_CACHE_MAX_ENTRIES")
                .unwrap_or(default.cache_max_entries),
            timeout_retry_attempts: env_parse("ORGMGT_TIMEOUT_RETRY_ATTEMPTS")
                .unwrap_or(default.timeout_retry_attempts),
            user_store: std::env::var("ORGMGT_USER_STORE_URL")
                .ok()
                .map(|base_url| UserStoreEndpoint {
                    base_url,
                    api_key: std::env::var("ORGMGT_USER_STORE_API_KEY").ok(),
                }),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for zero depth, timeout, cache
    /// capacity or retry attempts, and for an empty user-store URL.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("max_depth", self.max_depth == 0),
            ("resolution_timeout_ms", self.resolution_timeout_ms == 0),
            ("cache_max_entries", self.cache_enabled && self.cache_max_entries == 0),
            ("timeout_retry_attempts", self.timeout_retry_attempts == 0),
        ];
        if let Some((key, _)) = checks.iter().find(|(_, invalid)| *invalid) {
            return Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        if let Some(endpoint) = &self.user_store {
            if endpoint.base_url.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "user_store.base_url".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Resolution time budget as a Duration.
    pub fn resolution_timeout(&self) -> Duration {
        Duration::from_millis(self.resolution_timeout_ms)
    }

    /// Cache entry lifetime as a Duration.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Retry policy applied to resolution timeouts.
    pub fn timeout_retry(&self) -> RetryConfig {
        RetryConfig::with_attempts(self.timeout_retry_attempts)
    }
}

/// User-store endpoint used for identity ownership lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserStoreEndpoint {
    /// Base URL for the user store (e.g., "https://users.internal").
    pub base_url: String,

    /// API key for service-to-service authentication.
    pub api_key: Option<String>,
}

impl UserStoreEndpoint {
    /// Build a full URL by appending a path to the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
