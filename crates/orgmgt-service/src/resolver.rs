//! Resident-organization resolution
//!
//! Given an identity handle and the organization it is accessed from, the
//! resolver finds the nearest organization on the accessing organization's
//! ancestor chain that natively defines the identity.
//!
//! # Algorithm
//!
//! 1. Read the ancestor chain under one read lock and release it. The
//!    accessing organization and every ancestor must be active.
//! 2. Return a cached outcome if one exists for the chain's version.
//! 3. Query the ownership lookup nearest first and stop at the first
//!    organization that defines the identity.
//! 4. Cache the outcome (resolved or not resolvable) at the chain's version.
//!
//! The whole attempt runs under the configured time budget. A timed-out
//! attempt is retried with a fresh chain; timeouts and lookup failures are
//! never cached.

use orgmgt_core::{
    AncestorChain, IdentityKind, OrgMgtError, OrgMgtResult, OrganizationSnapshot, OrganizationStatus, TreeIndex,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, CachedResolution, ResolutionCache};
use crate::config::OrgMgtConfig;
use crate::lookup::IdentityOwnershipLookup;
use crate::retry::{with_retry_if, RetryConfig};

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidentResolution {
    /// Organization that natively defines the identity
    pub organization_id: Uuid,

    /// Organization the identity was accessed from
    pub accessing_organization_id: Uuid,

    /// Hops from the accessing organization (0 when it defines the identity)
    pub distance: u32,
}

impl ResidentResolution {
    /// Check if the identity is defined in the accessing organization itself.
    pub fn is_local(&self) -> bool {
        self.distance == 0
    }
}

/// Resolves identities to their resident organization.
pub struct ResidentResolver {
    tree: Arc<TreeIndex>,
    lookup: Arc<dyn IdentityOwnershipLookup>,
    cache: Arc<ResolutionCache>,
    timeout: Duration,
    retry: RetryConfig,
}

impl ResidentResolver {
    /// Create a resolver over a shared tree and cache.
    pub fn new(
        tree: Arc<TreeIndex>,
        lookup: Arc<dyn IdentityOwnershipLookup>,
        cache: Arc<ResolutionCache>,
        config: &OrgMgtConfig,
    ) -> Self {
        Self {
            tree,
            lookup,
            cache,
            timeout: config.resolution_timeout(),
            retry: config.timeout_retry(),
        }
    }

    /// Resolve the resident organization of an identity.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotAccessible` if the accessing organization is
    ///   unknown, or it or an ancestor is not active
    /// - `IdentityNotResolvable` if no organization on the chain defines it
    /// - `IdentityLookupFailed` if the ownership lookup fails
    /// - `ResolutionTimeout` if every attempt exceeds the time budget
    #[instrument(skip(self))]
    pub async fn resolve_resident_organization(
        &self,
        handle: &str,
        kind: IdentityKind,
        accessing_org_id: Uuid,
    ) -> OrgMgtResult<ResidentResolution> {
        with_retry_if(
            &self.retry,
            || self.resolve_within_budget(handle, kind, accessing_org_id),
            OrgMgtError::is_retryable,
        )
        .await
    }

    /// Resolve the resident organization of a user.
    pub async fn resolve_user_resident(
        &self,
        handle: &str,
        accessing_org_id: Uuid,
    ) -> OrgMgtResult<ResidentResolution> {
        self.resolve_resident_organization(handle, IdentityKind::User, accessing_org_id)
            .await
    }

    /// Resolve the resident organization of a group.
    pub async fn resolve_group_resident(
        &self,
        handle: &str,
        accessing_org_id: Uuid,
    ) -> OrgMgtResult<ResidentResolution> {
        self.resolve_resident_organization(handle, IdentityKind::Group, accessing_org_id)
            .await
    }

    /// Organizations an identity is visible from.
    ///
    /// Starting at the identity's resident organization, walks its active
    /// descendants and returns every organization whose resolution of
    /// `handle` would land on `resident_org_id`. A descendant that defines
    /// its own identity with the same handle shadows the resident one, so
    /// it and its subtree are excluded. The resident organization comes
    /// first, followed by its descendants in pre-order.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotAccessible` if the resident organization is unknown
    ///   or not reachable
    /// - `IdentityNotResolvable` if the identity is not defined there
    /// - `IdentityLookupFailed` / `ResolutionTimeout` as for resolution
    #[instrument(skip(self))]
    pub async fn accessible_organizations(
        &self,
        handle: &str,
        kind: IdentityKind,
        resident_org_id: Uuid,
    ) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        let walk = self.collect_accessible(handle, kind, resident_org_id);
        tokio::time::timeout(self.timeout, walk)
            .await
            .map_err(|_| self.timeout_error(handle, kind, resident_org_id))?
    }

    /// Drop cached outcomes for an identity whose ownership changed.
    ///
    /// Call this when the identity is created, deleted or moved between
    /// organizations in the identity store. Returns the number of entries
    /// dropped.
    pub async fn identity_ownership_changed(&self, handle: &str, kind: IdentityKind) -> usize {
        self.cache.invalidate_identity(handle.trim(), kind).await
    }

    async fn resolve_within_budget(
        &self,
        handle: &str,
        kind: IdentityKind,
        accessing_org_id: Uuid,
    ) -> OrgMgtResult<ResidentResolution> {
        let attempt = self.resolve_once(handle, kind, accessing_org_id);
        match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    accessing_org_id = %accessing_org_id,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Resolution exceeded its time budget"
                );
                Err(self.timeout_error(handle, kind, accessing_org_id))
            }
        }
    }

    async fn resolve_once(
        &self,
        handle: &str,
        kind: IdentityKind,
        accessing_org_id: Uuid,
    ) -> OrgMgtResult<ResidentResolution> {
        let handle = handle.trim();
        let chain = self.tree.reachable_chain(accessing_org_id).await?;
        let key = CacheKey::new(handle, kind, accessing_org_id);

        if let Some(cached) = self.cache.get(&key, chain.version).await {
            debug!(version = chain.version, "Resolution served from cache");
            return outcome_to_result(cached, handle, kind, accessing_org_id);
        }

        let outcome = match self.find_resident(&chain, handle, kind).await? {
            Some(resolution) => CachedResolution::Resident(resolution),
            None => CachedResolution::NotResolvable,
        };

        debug!(
            version = chain.version,
            chain_len = chain.len(),
            resolved = matches!(outcome, CachedResolution::Resident(_)),
            "Resolution computed"
        );
        self.cache.insert(key, outcome.clone(), chain.version).await;

        outcome_to_result(outcome, handle, kind, accessing_org_id)
    }

    /// Nearest-first walk over the chain; stops at the first definition.
    async fn find_resident(
        &self,
        chain: &AncestorChain,
        handle: &str,
        kind: IdentityKind,
    ) -> OrgMgtResult<Option<ResidentResolution>> {
        let accessing_org_id = match chain.organizations.first() {
            Some(org) => org.id,
            None => return Ok(None),
        };

        for (distance, org) in chain.organizations.iter().enumerate() {
            if self.is_defined(handle, kind, org.id).await? {
                return Ok(Some(ResidentResolution {
                    organization_id: org.id,
                    accessing_organization_id: accessing_org_id,
                    distance: u32::try_from(distance).unwrap_or(u32::MAX),
                }));
            }
        }
        Ok(None)
    }

    async fn collect_accessible(
        &self,
        handle: &str,
        kind: IdentityKind,
        resident_org_id: Uuid,
    ) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        let handle = handle.trim();

        // Snapshot the resident organization and its subtree under one read.
        let (resident, descendants) = {
            let tree = self.tree.read().await;
            let chain = tree.reachable_chain(resident_org_id)?;
            let resident = chain
                .organizations
                .first()
                .cloned()
                .ok_or_else(|| OrgMgtError::OrganizationNotAccessible { org_id: resident_org_id })?;
            (resident, tree.descendants_of(resident_org_id, false)?)
        };

        if !self.is_defined(handle, kind, resident.id).await? {
            return Err(OrgMgtError::IdentityNotResolvable {
                handle: handle.to_string(),
                kind,
                accessing_org_id: resident_org_id,
            });
        }

        // Pre-order guarantees a parent is decided before its children.
        let mut excluded: HashSet<Uuid> = HashSet::new();
        let mut accessible = vec![resident];

        for org in descendants {
            let parent_excluded = org.parent_id.map_or(false, |p| excluded.contains(&p));
            if parent_excluded || org.status != OrganizationStatus::Active {
                excluded.insert(org.id);
                continue;
            }
            if self.is_defined(handle, kind, org.id).await? {
                debug!(org_id = %org.id, "Identity shadowed by a nearer definition");
                excluded.insert(org.id);
                continue;
            }
            accessible.push(org);
        }

        Ok(accessible)
    }

    async fn is_defined(&self, handle: &str, kind: IdentityKind, org_id: Uuid) -> OrgMgtResult<bool> {
        self.lookup
            .is_natively_defined(handle, kind, org_id)
            .await
            .map_err(|e| {
                warn!(org_id = %org_id, error = %e, "Ownership lookup failed");
                OrgMgtError::IdentityLookupFailed {
                    handle: handle.to_string(),
                    kind,
                    org_id,
                    message: e.to_string(),
                }
            })
    }

    fn timeout_error(&self, handle: &str, kind: IdentityKind, accessing_org_id: Uuid) -> OrgMgtError {
        OrgMgtError::ResolutionTimeout {
            handle: handle.trim().to_string(),
            kind,
            accessing_org_id,
            timeout_ms: self.timeout.as_millis() as u64,
        }
    }
}

fn outcome_to_result(
    outcome: CachedResolution,
    handle: &str,
    kind: IdentityKind,
    accessing_org_id: Uuid,
) -> OrgMgtResult<ResidentResolution> {
    match outcome {
        CachedResolution::Resident(resolution) => Ok(resolution),
        CachedResolution::NotResolvable => Err(OrgMgtError::IdentityNotResolvable {
            handle: handle.to_string(),
            kind,
            accessing_org_id,
        }),
    }
}
