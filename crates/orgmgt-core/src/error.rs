//! Error types for organization management
//!
//! This module defines every error that hierarchy mutations and resident
//! resolution can report. Each variant carries the organization id and,
//! where relevant, the identity handle so callers can audit-log failures.

use thiserror::Error;
use uuid::Uuid;

use crate::identity::IdentityKind;
use crate::organization::OrganizationStatus;

/// Organization management error types.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrgMgtError {
    /// No organization with this id exists
    #[error("Organization not found: {org_id}")]
    OrganizationNotFound {
        /// Requested organization
        org_id: Uuid,
    },

    /// The requested parent is unknown or deleted
    #[error("Parent organization not found: {parent_id}")]
    ParentNotFound {
        /// Requested parent organization
        parent_id: Uuid,
    },

    /// A sibling already uses the handle
    #[error("Handle '{handle}' already used under parent {parent_id:?}")]
    HandleConflict {
        /// Parent of the sibling set, `None` for top-level organizations
        parent_id: Option<Uuid>,
        /// Conflicting handle
        handle: String,
    },

    /// Moving the organization would create a cycle
    #[error("Moving {org_id} under {new_parent_id} would create a cycle")]
    CyclicMove {
        /// Organization being moved
        org_id: Uuid,
        /// Requested new parent
        new_parent_id: Uuid,
    },

    /// The organization or one of its ancestors is not active
    #[error("Organization not accessible: {org_id}")]
    OrganizationNotAccessible {
        /// Accessing organization
        org_id: Uuid,
    },

    /// No organization on the ancestor chain natively defines the identity
    #[error("{kind} '{handle}' is not resolvable from organization {accessing_org_id}")]
    IdentityNotResolvable {
        /// Identity handle
        handle: String,
        /// Identity kind
        kind: IdentityKind,
        /// Accessing organization
        accessing_org_id: Uuid,
    },

    /// Resolution exceeded its time budget; safe to retry
    #[error("Resolution of {kind} '{handle}' from {accessing_org_id} timed out after {timeout_ms}ms")]
    ResolutionTimeout {
        /// Identity handle
        handle: String,
        /// Identity kind
        kind: IdentityKind,
        /// Accessing organization
        accessing_org_id: Uuid,
        /// Time budget in milliseconds
        timeout_ms: u64,
    },

    /// The store adapter rejected a mutation; in-memory state was rolled back
    #[error("Persistence failure for organization {org_id}: {message}")]
    PersistenceFailure {
        /// Organization being mutated
        org_id: Uuid,
        /// Store error message
        message: String,
    },

    /// The identity-ownership lookup failed
    #[error("Ownership lookup for {kind} '{handle}' in {org_id} failed: {message}")]
    IdentityLookupFailed {
        /// Identity handle
        handle: String,
        /// Identity kind
        kind: IdentityKind,
        /// Organization that was queried
        org_id: Uuid,
        /// Lookup error message
        message: String,
    },

    /// Status change is not a forward transition
    #[error("Invalid status transition for {org_id}: {from} -> {to}")]
    InvalidStatusTransition {
        /// Organization
        org_id: Uuid,
        /// Current status
        from: OrganizationStatus,
        /// Requested status
        to: OrganizationStatus,
    },

    /// The organization is deleted and can no longer be mutated
    #[error("Organization {org_id} is deleted")]
    OrganizationDeleted {
        /// Organization
        org_id: Uuid,
    },

    /// The organization still has non-deleted children
    #[error("Organization {org_id} still has {child_count} child organization(s)")]
    OrganizationHasChildren {
        /// Organization
        org_id: Uuid,
        /// Number of non-deleted children
        child_count: usize,
    },

    /// The mutation would exceed the configured hierarchy depth
    #[error("Organization {org_id} would exceed the maximum hierarchy depth of {max_depth}")]
    DepthLimitExceeded {
        /// Organization being inserted or moved
        org_id: Uuid,
        /// Configured limit
        max_depth: u32,
    },

    /// The handle failed validation
    #[error("Invalid handle '{handle}': {reason}")]
    InvalidHandle {
        /// Rejected handle
        handle: String,
        /// Reason
        reason: String,
    },

    /// The request or loaded data violates a structural rule
    #[error("Invalid hierarchy for organization {org_id}: {reason}")]
    InvalidHierarchy {
        /// Offending organization
        org_id: Uuid,
        /// Reason
        reason: String,
    },
}

/// Result type for organization management operations.
pub type OrgMgtResult<T> = Result<T, OrgMgtError>;

impl OrgMgtError {
    /// Check if the operation may succeed when retried unchanged.
    ///
    /// Only timeouts qualify: they leave no cached side effect.
    pub fn is_retryable(&self) -> bool {
        matches!(self, OrgMgtError::ResolutionTimeout { .. })
    }

    /// Check if this error should be logged at error level.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            OrgMgtError::PersistenceFailure { .. }
                | OrgMgtError::IdentityLookupFailed { .. }
                | OrgMgtError::ResolutionTimeout { .. }
        )
    }

    /// Organization the error refers to, when there is one.
    pub fn org_id(&self) -> Option<Uuid> {
        match self {
            OrgMgtError::OrganizationNotFound { org_id }
            | OrgMgtError::CyclicMove { org_id, .. }
            | OrgMgtError::OrganizationNotAccessible { org_id }
            | OrgMgtError::PersistenceFailure { org_id, .. }
            | OrgMgtError::IdentityLookupFailed { org_id, .. }
            | OrgMgtError::InvalidStatusTransition { org_id, .. }
            | OrgMgtError::OrganizationDeleted { org_id }
            | OrgMgtError::OrganizationHasChildren { org_id, .. }
            | OrgMgtError::DepthLimitExceeded { org_id, .. }
            | OrgMgtError::InvalidHierarchy { org_id, .. } => Some(*org_id),
            OrgMgtError::ParentNotFound { parent_id } => Some(*parent_id),
            OrgMgtError::HandleConflict { parent_id, .. } => *parent_id,
            OrgMgtError::IdentityNotResolvable {
                accessing_org_id, ..
            }
            | OrgMgtError::ResolutionTimeout {
                accessing_org_id, ..
            } => Some(*accessing_org_id),
            OrgMgtError::InvalidHandle { .. } => None,
        }
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            OrgMgtError::OrganizationNotFound { .. }
            | OrgMgtError::ParentNotFound { .. }
            | OrgMgtError::IdentityNotResolvable { .. } => 404,

            OrgMgtError::HandleConflict { .. }
            | OrgMgtError::CyclicMove { .. }
            | OrgMgtError::InvalidStatusTransition { .. }
            | OrgMgtError::OrganizationDeleted { .. }
            | OrgMgtError::OrganizationHasChildren { .. } => 409,

            OrgMgtError::OrganizationNotAccessible { .. } => 403,

            OrgMgtError::DepthLimitExceeded { .. }
            | OrgMgtError::InvalidHandle { .. }
            | OrgMgtError::InvalidHierarchy { .. } => 400,

            OrgMgtError::ResolutionTimeout { .. } => 504,

            OrgMgtError::PersistenceFailure { .. } => 500,
            OrgMgtError::IdentityLookupFailed { .. } => 502,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrgMgtError::OrganizationNotFound { .. } => "ORGANIZATION_NOT_FOUND",
            OrgMgtError::ParentNotFound { .. } => "PARENT_NOT_FOUND",
            OrgMgtError::HandleConflict { .. } => "HANDLE_CONFLICT",
            OrgMgtError::CyclicMove { .. } => "CYCLIC_MOVE",
            OrgMgtError::OrganizationNotAccessible { .. } => "ORGANIZATION_NOT_ACCESSIBLE",
            OrgMgtError::IdentityNotResolvable { .. } => "IDENTITY_NOT_RESOLVABLE",
            OrgMgtError::ResolutionTimeout { .. } => "RESOLUTION_TIMEOUT",
            OrgMgtError::PersistenceFailure { .. } => "PERSISTENCE_FAILURE",
            OrgMgtError::IdentityLookupFailed { .. } => "IDENTITY_LOOKUP_FAILED",
            OrgMgtError::InvalidStatusTransition { .. } => "INVALID_STATUS_TRANSITION",
            OrgMgtError::OrganizationDeleted { .. } => "ORGANIZATION_DELETED",
            OrgMgtError::OrganizationHasChildren { .. } => "ORGANIZATION_HAS_CHILDREN",
            OrgMgtError::DepthLimitExceeded { .. } => "DEPTH_LIMIT_EXCEEDED",
            OrgMgtError::InvalidHandle { .. } => "INVALID_HANDLE",
            OrgMgtError::InvalidHierarchy { .. } => "INVALID_HIERARCHY",
        }
    }
}
