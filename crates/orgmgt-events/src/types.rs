//! Event types for hierarchy mutations
//!
//! Every committed mutation produces one [`OrganizationEvent`] carrying the
//! organization's state before and after the change.

use chrono::{DateTime, Utc};
use orgmgt_core::{AppliedChange, OrganizationSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Topic prefix shared by all organization events.
pub const TOPIC_PREFIX: &str = "organization";

/// Kind of mutation an event reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    /// Organization was added to the hierarchy
    Created,
    /// Organization was re-parented
    Moved,
    /// Organization handle changed
    Renamed,
    /// Organization moved forward in its lifecycle (disabled or deleted)
    StatusChanged,
    /// Disabled organization became active again
    Reactivated,
}

impl MutationKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Created => "created",
            MutationKind::Moved => "moved",
            MutationKind::Renamed => "renamed",
            MutationKind::StatusChanged => "status_changed",
            MutationKind::Reactivated => "reactivated",
        }
    }

    /// Topic for this mutation kind, e.g. `organization.moved`.
    pub fn topic(&self) -> String {
        format!("{}.{}", TOPIC_PREFIX, self.as_str())
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Committed hierarchy mutation.
///
/// # Examples
///
/// ```
/// use orgmgt_core::Organization;
/// use orgmgt_events::{MutationKind, OrganizationEvent};
///
/// let org = Organization::root("acme");
/// let event = OrganizationEvent::new(MutationKind::Created, None, org.snapshot(), 1);
///
/// assert_eq!(event.topic(), "organization.created");
/// assert_eq!(event.organization_id, org.id);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationEvent {
    /// Unique event ID
    pub id: Uuid,

    /// Mutation kind
    pub kind: MutationKind,

    /// Organization that changed
    pub organization_id: Uuid,

    /// State before the mutation, `None` for creations
    pub before: Option<OrganizationSnapshot>,

    /// State after the mutation
    pub after: OrganizationSnapshot,

    /// Hierarchy version after the mutation
    pub hierarchy_version: u64,

    /// Organizations whose ancestor chain changed
    #[serde(default)]
    pub affected: Vec<Uuid>,

    /// When the mutation committed
    pub timestamp: DateTime<Utc>,

    /// Additional metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OrganizationEvent {
    /// Create a new event.
    pub fn new(
        kind: MutationKind,
        before: Option<OrganizationSnapshot>,
        after: OrganizationSnapshot,
        hierarchy_version: u64,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            organization_id: after.id,
            before,
            after,
            hierarchy_version,
            affected: Vec::new(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Build the event for a change applied to the tree.
    pub fn from_change(kind: MutationKind, change: &AppliedChange) -> Self {
        Self::new(kind, change.before.clone(), change.after.clone(), change.version)
            .with_affected(change.affected.clone())
    }

    /// Set the affected organizations.
    pub fn with_affected(mut self, affected: Vec<Uuid>) -> Self {
        self.affected = affected;
        self
    }

    /// Add metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Topic for this event, e.g. `organization.status_changed`.
    pub fn topic(&self) -> String {
        self.kind.topic()
    }

    /// Previous parent for moves.
    pub fn previous_parent(&self) -> Option<Uuid> {
        self.before.as_ref().and_then(|b| b.parent_id)
    }
}
