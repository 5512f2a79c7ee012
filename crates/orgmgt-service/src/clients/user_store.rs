//! User store client.
//!
//! HTTP client for the identity store that owns user and group records.
//! Ownership is probed with
//! `GET {base}/api/v1/organizations/{org_id}/{users|groups}/{handle}`:
//! `200` means the identity is natively defined in that organization and
//! `404` means it is not.

use async_trait::async_trait;
use orgmgt_core::IdentityKind;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use crate::config::UserStoreEndpoint;
use crate::lookup::{IdentityOwnershipLookup, LookupError};

/// User store client errors.
#[derive(Debug, Error)]
pub enum UserStoreError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Base URL cannot be used to build request URLs.
    #[error("Invalid user store URL: {0}")]
    InvalidUrl(String),

    /// Authentication failed.
    #[error("Authentication failed")]
    AuthenticationFailed,
}

/// User store client.
#[derive(Clone)]
pub struct UserStoreClient {
    /// HTTP client instance.
    client: Client,

    /// Service endpoint configuration.
    endpoint: UserStoreEndpoint,
}

impl UserStoreClient {
    /// Create a new user store client.
    ///
    /// # Errors
    ///
    /// Returns `RequestFailed` if the HTTP client cannot be built.
    pub fn new(endpoint: UserStoreEndpoint, timeout: Duration) -> Result<Self, UserStoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    /// Check whether an identity is natively defined in an organization.
    #[instrument(skip(self))]
    pub async fn identity_exists(
        &self,
        handle: &str,
        kind: IdentityKind,
        org_id: Uuid,
    ) -> Result<bool, UserStoreError> {
        let url = self.identity_url(handle, kind, org_id)?;
        debug!(url = %url, "Probing identity ownership");

        let mut request = self.client.get(url);
        if let Some(ref api_key) = self.endpoint.api_key {
            request = request.header("Authorization", format!("Bearer {}", api_key));
        }

        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!("User store authentication failed");
            return Err(UserStoreError::AuthenticationFailed);
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        warn!("User store API error ({}): {}", status.as_u16(), message);
        Err(UserStoreError::ApiError {
            status: status.as_u16(),
            message,
        })
    }

    fn identity_url(&self, handle: &str, kind: IdentityKind, org_id: Uuid) -> Result<Url, UserStoreError> {
        let base = self.endpoint.url("/api/v1/organizations");
        let mut url = Url::parse(&base).map_err(|e| UserStoreError::InvalidUrl(format!("{}: {}", base, e)))?;

        url.path_segments_mut()
            .map_err(|_| UserStoreError::InvalidUrl(base.clone()))?
            .pop_if_empty()
            .push(&org_id.to_string())
            .push(kind.collection())
            .push(handle);

        Ok(url)
    }
}

#[async_trait]
impl IdentityOwnershipLookup for UserStoreClient {
    async fn is_natively_defined(
        &self,
        handle: &str,
        kind: IdentityKind,
        org_id: Uuid,
    ) -> Result<bool, LookupError> {
        self.identity_exists(handle, kind, org_id)
            .await
            .map_err(|e| match e {
                UserStoreError::RequestFailed(_) => LookupError::Unavailable(e.to_string()),
                other => LookupError::UnexpectedResponse(other.to_string()),
            })
    }
}
