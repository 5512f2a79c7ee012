//! Organization domain models
//!
//! This module provides the Organization entity stored in the hierarchy,
//! its lifecycle status and type, and the lightweight snapshot carried by
//! events and query results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{OrgMgtError, OrgMgtResult};

/// Maximum length of an organization handle.
pub const MAX_HANDLE_LENGTH: usize = 255;

/// Lifecycle status of an organization.
///
/// Status only moves forward (`Active → Disabled → Deleted`, or straight
/// from `Active` to `Deleted`). Going back from `Disabled` to `Active` is a
/// separate reactivate operation. `Deleted` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrganizationStatus {
    /// Organization is usable and participates in resolution
    Active = 0,

    /// Organization and its whole subtree are unreachable for resolution
    Disabled = 1,

    /// Tombstone: kept in the index but excluded from every traversal
    Deleted = 2,
}

impl OrganizationStatus {
    /// Check whether moving from `self` to `next` is a forward transition.
    ///
    /// # Examples
    ///
    /// ```
    /// use orgmgt_core::OrganizationStatus;
    ///
    /// assert!(OrganizationStatus::Active.can_transition_to(OrganizationStatus::Disabled));
    /// assert!(OrganizationStatus::Active.can_transition_to(OrganizationStatus::Deleted));
    /// assert!(!OrganizationStatus::Disabled.can_transition_to(OrganizationStatus::Active));
    /// assert!(!OrganizationStatus::Deleted.can_transition_to(OrganizationStatus::Deleted));
    /// ```
    pub fn can_transition_to(&self, next: OrganizationStatus) -> bool {
        next > *self
    }

    /// Check if this status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrganizationStatus::Deleted)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationStatus::Active => "ACTIVE",
            OrganizationStatus::Disabled => "DISABLED",
            OrganizationStatus::Deleted => "DELETED",
        }
    }

    /// Parse status from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Some(OrganizationStatus::Active),
            "DISABLED" => Some(OrganizationStatus::Disabled),
            "DELETED" => Some(OrganizationStatus::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for OrganizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of organization node.
///
/// `Root` and `Tenant` organizations sit at the top of a tree and never have
/// a parent. Sub-organizations always have one and inherit reachability from
/// their ancestors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrganizationType {
    /// The platform-level root organization
    Root,

    /// Top-level organization of a tenant
    Tenant,

    /// Nested organization below a root, tenant or another sub-organization
    SubOrganization,
}

impl OrganizationType {
    /// Check whether organizations of this type live at the top of a tree.
    pub fn is_top_level(&self) -> bool {
        matches!(self, OrganizationType::Root | OrganizationType::Tenant)
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrganizationType::Root => "ROOT",
            OrganizationType::Tenant => "TENANT",
            OrganizationType::SubOrganization => "SUB_ORGANIZATION",
        }
    }
}

impl fmt::Display for OrganizationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An organization node in the multi-tenant hierarchy.
///
/// The `depth` field is derived from the parent chain and is maintained by
/// the tree index; callers building an `Organization` by hand do not need to
/// set it.
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use orgmgt_core::{Organization, OrganizationStatus};
///
/// let root = Organization::root("acme");
/// let child = Organization::sub_organization("engineering", root.id);
///
/// assert_eq!(child.parent_id, Some(root.id));
/// assert_eq!(child.status, OrganizationStatus::Active);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Organization {
    /// Globally unique, immutable identifier
    pub id: Uuid,

    /// Name unique among siblings
    pub handle: String,

    /// Human-readable display name
    pub display_name: Option<String>,

    /// Optional description
    pub description: Option<String>,

    /// Parent organization, `None` only for top-level organizations
    pub parent_id: Option<Uuid>,

    /// Distance from the top of the tree
    pub depth: u32,

    /// Lifecycle status
    pub status: OrganizationStatus,

    /// Node type
    #[serde(rename = "type")]
    pub org_type: OrganizationType,

    /// When the organization was created
    pub created_at: DateTime<Utc>,

    /// When the organization was last updated
    pub updated_at: DateTime<Utc>,

    /// Custom metadata for extensibility
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Organization {
    /// Creates a new active organization.
    ///
    /// The organization is created with a newly generated UUID v7 ID and
    /// depth 0; the tree index assigns the real depth on insert.
    ///
    /// # Arguments
    ///
    /// * `handle` - Name unique among siblings
    /// * `org_type` - Node type
    /// * `parent_id` - Parent organization, `None` for top-level organizations
    pub fn new(handle: impl Into<String>, org_type: OrganizationType, parent_id: Option<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            handle: handle.into(),
            display_name: None,
            description: None,
            parent_id,
            depth: 0,
            status: OrganizationStatus::Active,
            org_type,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }

    /// Creates a platform root organization.
    pub fn root(handle: impl Into<String>) -> Self {
        Self::new(handle, OrganizationType::Root, None)
    }

    /// Creates a top-level tenant organization.
    pub fn tenant(handle: impl Into<String>) -> Self {
        Self::new(handle, OrganizationType::Tenant, None)
    }

    /// Creates a sub-organization under `parent_id`.
    pub fn sub_organization(handle: impl Into<String>, parent_id: Uuid) -> Self {
        Self::new(handle, OrganizationType::SubOrganization, Some(parent_id))
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Check if the organization is active.
    pub fn is_active(&self) -> bool {
        self.status == OrganizationStatus::Active
    }

    /// Check if the organization is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.status == OrganizationStatus::Deleted
    }

    /// Lightweight copy for events and query results.
    pub fn snapshot(&self) -> OrganizationSnapshot {
        OrganizationSnapshot {
            id: self.id,
            handle: self.handle.clone(),
            parent_id: self.parent_id,
            depth: self.depth,
            status: self.status,
            org_type: self.org_type,
        }
    }
}

/// Structural view of an organization at a point in time.
///
/// Carried by mutation events (before/after state) and returned by
/// hierarchy queries such as `ancestors_of`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OrganizationSnapshot {
    /// Organization ID
    pub id: Uuid,

    /// Handle
    pub handle: String,

    /// Parent organization
    pub parent_id: Option<Uuid>,

    /// Depth
    pub depth: u32,

    /// Status
    pub status: OrganizationStatus,

    /// Node type
    #[serde(rename = "type")]
    pub org_type: OrganizationType,
}

/// Normalize and validate an organization handle.
///
/// Handles are trimmed; the result must be non-empty, at most
/// [`MAX_HANDLE_LENGTH`] characters and must not contain `/`.
///
/// # Errors
///
/// Returns [`OrgMgtError::InvalidHandle`] when the handle is rejected.
///
/// # Examples
///
/// ```
/// use orgmgt_core::organization::normalize_handle;
///
/// assert_eq!(normalize_handle("  sales ").unwrap(), "sales");
/// assert!(normalize_handle("   ").is_err());
/// assert!(normalize_handle("a/b").is_err());
/// ```
pub fn normalize_handle(handle: &str) -> OrgMgtResult<String> {
    let trimmed = handle.trim();
    let reason = if trimmed.is_empty() {
        Some("handle must not be empty")
    } else if trimmed.chars().count() > MAX_HANDLE_LENGTH {
        Some("handle exceeds maximum length")
    } else if trimmed.contains('/') {
        Some("handle must not contain '/'")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(OrgMgtError::InvalidHandle {
            handle: handle.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(trimmed.to_string()),
    }
}
