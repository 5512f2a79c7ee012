//! Identity ownership lookup
//!
//! The resolver asks one question of the identity store: is this handle
//! natively defined in this organization? [`IdentityOwnershipLookup`] is
//! that seam. [`crate::clients::UserStoreClient`] answers it over HTTP and
//! [`InMemoryOwnershipDirectory`] answers it from a local set.

use async_trait::async_trait;
use orgmgt_core::IdentityKind;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Errors reported by an ownership lookup.
#[derive(Debug, Error)]
pub enum LookupError {
    /// Identity store unreachable
    #[error("Identity store unavailable: {0}")]
    Unavailable(String),

    /// Identity store answered with something other than found/not found
    #[error("Unexpected identity store response: {0}")]
    UnexpectedResponse(String),
}

/// Answers whether an identity is natively defined in an organization.
///
/// `Ok(false)` means "not defined here" and the resolver keeps walking
/// outward. `Err` aborts the resolution.
#[async_trait]
pub trait IdentityOwnershipLookup: Send + Sync {
    /// Check whether `handle` of `kind` is natively defined in `org_id`.
    async fn is_natively_defined(
        &self,
        handle: &str,
        kind: IdentityKind,
        org_id: Uuid,
    ) -> Result<bool, LookupError>;
}

/// In-memory ownership directory.
///
/// An optional per-lookup latency simulates a slow identity store.
#[derive(Debug, Default)]
pub struct InMemoryOwnershipDirectory {
    entries: RwLock<HashSet<(Uuid, IdentityKind, String)>>,
    latency: RwLock<Option<Duration>>,
    lookups: AtomicU64,
}

impl InMemoryOwnershipDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `handle` is natively defined in `org_id`.
    pub async fn define(&self, org_id: Uuid, kind: IdentityKind, handle: impl Into<String>) {
        self.entries.write().await.insert((org_id, kind, handle.into()));
    }

    /// Remove a definition. Returns `true` if it existed.
    pub async fn undefine(&self, org_id: Uuid, kind: IdentityKind, handle: &str) -> bool {
        self.entries
            .write()
            .await
            .remove(&(org_id, kind, handle.to_string()))
    }

    /// Delay every lookup by `latency`, or clear the delay with `None`.
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    /// Number of lookups served.
    pub fn lookup_count(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityOwnershipLookup for InMemoryOwnershipDirectory {
    async fn is_natively_defined(
        &self,
        handle: &str,
        kind: IdentityKind,
        org_id: Uuid,
    ) -> Result<bool, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        Ok(self
            .entries
            .read()
            .await
            .contains(&(org_id, kind, handle.to_string())))
    }
}
