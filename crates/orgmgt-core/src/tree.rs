//! In-memory organization hierarchy
//!
//! [`HierarchyTree`] holds every organization node together with a children
//! index and a sibling-handle index, and enforces the structural rules on
//! every mutation:
//!
//! - the parent relation is a forest (no cycles)
//! - `depth` always equals the length of the parent chain
//! - handles are unique within a sibling set
//! - `Deleted` organizations are tombstones that never change again
//!
//! Every applied mutation bumps the hierarchy version and returns an
//! [`UndoAction`] that restores the previous shape.
//!
//! ```text
//! None ─┬─ root (ROOT, depth 0)
//!       │    ├─ emea (SUB_ORGANIZATION, depth 1)
//!       │    │    └─ sales (SUB_ORGANIZATION, depth 2)
//!       │    └─ apac (SUB_ORGANIZATION, depth 1)
//!       └─ tenant-b (TENANT, depth 0)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;
use uuid::Uuid;

use crate::error::{OrgMgtError, OrgMgtResult};
use crate::organization::{
    normalize_handle, Organization, OrganizationSnapshot, OrganizationStatus,
};

/// Default maximum depth of the hierarchy (top-level organizations are depth 0).
pub const DEFAULT_MAX_DEPTH: u32 = 8;

/// Inverse of an applied mutation, used for compensating rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    /// Remove a freshly inserted organization
    Remove {
        /// Inserted organization
        org_id: Uuid,
    },

    /// Put a moved organization back under its previous parent
    Reparent {
        /// Moved organization
        org_id: Uuid,
        /// Previous parent
        parent_id: Uuid,
        /// Previous update timestamp
        updated_at: DateTime<Utc>,
    },

    /// Restore the previous status
    RestoreStatus {
        /// Organization
        org_id: Uuid,
        /// Previous status
        status: OrganizationStatus,
        /// Previous update timestamp
        updated_at: DateTime<Utc>,
    },

    /// Restore the previous handle
    RestoreHandle {
        /// Organization
        org_id: Uuid,
        /// Previous handle
        handle: String,
        /// Previous update timestamp
        updated_at: DateTime<Utc>,
    },
}

impl UndoAction {
    /// Organization the undo applies to.
    pub fn org_id(&self) -> Uuid {
        match self {
            UndoAction::Remove { org_id }
            | UndoAction::Reparent { org_id, .. }
            | UndoAction::RestoreStatus { org_id, .. }
            | UndoAction::RestoreHandle { org_id, .. } => *org_id,
        }
    }
}

/// Result of a mutation applied to the tree.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    /// State before the mutation, `None` for inserts
    pub before: Option<OrganizationSnapshot>,

    /// State after the mutation
    pub after: OrganizationSnapshot,

    /// Full record after the mutation, for persistence
    pub organization: Organization,

    /// Organizations whose ancestor chain changed (the moved subtree for moves)
    pub affected: Vec<Uuid>,

    /// Hierarchy version after the mutation
    pub version: u64,

    /// Inverse mutation
    pub undo: UndoAction,
}

/// Ancestor chain of an organization captured under a single read.
///
/// Ordered nearest first: the organization itself, its parent, and so on up
/// to the top-level organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorChain {
    /// Hierarchy version the chain was read at
    pub version: u64,

    /// Organizations, nearest first
    pub organizations: Vec<OrganizationSnapshot>,
}

impl AncestorChain {
    /// Organization ids, nearest first.
    pub fn ids(&self) -> Vec<Uuid> {
        self.organizations.iter().map(|o| o.id).collect()
    }

    /// Number of organizations in the chain.
    pub fn len(&self) -> usize {
        self.organizations.len()
    }

    /// Check if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.organizations.is_empty()
    }
}

type SiblingKey = (Option<Uuid>, String);

/// Organization hierarchy with structural invariants.
///
/// This type is not synchronized; see [`crate::TreeIndex`] for the shared,
/// lock-guarded wrapper.
#[derive(Debug, Clone)]
pub struct HierarchyTree {
    /// Organizations by ID, tombstones included
    nodes: HashMap<Uuid, Organization>,

    /// Children index: parent (or `None` for top level) -> children in insertion order
    children: HashMap<Option<Uuid>, Vec<Uuid>>,

    /// Sibling handle index for non-deleted organizations
    handles: HashMap<SiblingKey, Uuid>,

    /// Monotonic hierarchy version
    version: u64,

    /// Maximum allowed depth
    max_depth: u32,
}

impl Default for HierarchyTree {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl HierarchyTree {
    /// Create an empty tree.
    pub fn new(max_depth: u32) -> Self {
        Self {
            nodes: HashMap::new(),
            children: HashMap::new(),
            handles: HashMap::new(),
            version: 0,
            max_depth,
        }
    }

    /// Rebuild a tree from stored records, in any order.
    ///
    /// Records are attached top-down starting from top-level organizations.
    /// Tombstones are kept. Depths are recomputed from the parent chain and
    /// the version starts at 0.
    ///
    /// # Errors
    ///
    /// Returns [`OrgMgtError::InvalidHierarchy`] for duplicate ids, orphans,
    /// cycles, type violations or records nested deeper than `max_depth`,
    /// and [`OrgMgtError::HandleConflict`] when two live siblings share a
    /// handle.
    pub fn rebuild(records: Vec<Organization>, max_depth: u32) -> OrgMgtResult<Self> {
        let mut tree = Self::new(max_depth);
        let total = records.len();

        let mut pending: HashMap<Uuid, Organization> = HashMap::with_capacity(total);
        let mut by_parent: HashMap<Option<Uuid>, Vec<Uuid>> = HashMap::new();
        for org in records {
            check_type_placement(&org)?;
            let org_id = org.id;
            by_parent.entry(org.parent_id).or_default().push(org_id);
            if pending.insert(org_id, org).is_some() {
                return Err(OrgMgtError::InvalidHierarchy {
                    org_id,
                    reason: "duplicate organization id".to_string(),
                });
            }
        }

        // Stored order is arbitrary; keep creation order among siblings.
        for siblings in by_parent.values_mut() {
            siblings.sort_by_key(|id| pending.get(id).map(|o| o.created_at));
        }

        let mut queue: VecDeque<Uuid> = by_parent.get(&None).cloned().unwrap_or_default().into();
        while let Some(id) = queue.pop_front() {
            let Some(mut org) = pending.remove(&id) else {
                continue;
            };
            org.handle = normalize_handle(&org.handle)?;
            org.depth = match org.parent_id {
                Some(parent_id) => tree
                    .nodes
                    .get(&parent_id)
                    .map(|p| p.depth + 1)
                    .unwrap_or_default(),
                None => 0,
            };
            if org.depth > max_depth {
                warn!(
                    org_id = %org.id,
                    depth = org.depth,
                    max_depth,
                    "Stored organization exceeds configured maximum depth"
                );
                return Err(OrgMgtError::InvalidHierarchy {
                    org_id: org.id,
                    reason: format!("depth {} exceeds maximum hierarchy depth {}", org.depth, max_depth),
                });
            }
            if !org.is_deleted() {
                let key = (org.parent_id, org.handle.clone());
                if tree.handles.contains_key(&key) {
                    return Err(OrgMgtError::HandleConflict {
                        parent_id: org.parent_id,
                        handle: org.handle,
                    });
                }
                tree.handles.insert(key, org.id);
            }
            tree.children.entry(org.parent_id).or_default().push(org.id);
            if let Some(kids) = by_parent.get(&Some(id)) {
                queue.extend(kids.iter().copied());
            }
            tree.nodes.insert(org.id, org);
        }

        if let Some(org) = pending.values().next() {
            let reason = if org.parent_id.is_some_and(|p| !tree.nodes.contains_key(&p) && !pending.contains_key(&p)) {
                "parent organization does not exist"
            } else {
                "organization is part of a parent cycle"
            };
            return Err(OrgMgtError::InvalidHierarchy {
                org_id: org.id,
                reason: reason.to_string(),
            });
        }

        Ok(tree)
    }

    /// Current hierarchy version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Configured maximum depth.
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Number of organizations, tombstones included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if the tree has no organizations.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Get an organization by ID.
    pub fn get(&self, org_id: Uuid) -> Option<&Organization> {
        self.nodes.get(&org_id)
    }

    /// Find a live organization by parent and handle.
    pub fn find_by_handle(&self, parent_id: Option<Uuid>, handle: &str) -> Option<&Organization> {
        self.handles
            .get(&(parent_id, handle.trim().to_string()))
            .and_then(|id| self.nodes.get(id))
    }

    /// Iterate over all organizations, tombstones included.
    pub fn organizations(&self) -> impl Iterator<Item = &Organization> {
        self.nodes.values()
    }

    /// Add a new organization.
    ///
    /// The organization starts `Active` with `depth = parent.depth + 1`
    /// (0 for top-level organizations).
    ///
    /// # Errors
    ///
    /// - `ParentNotFound` if the parent is unknown or deleted
    /// - `HandleConflict` if a sibling already uses the handle
    /// - `DepthLimitExceeded` if the new depth exceeds the limit
    /// - `InvalidHandle` / `InvalidHierarchy` for malformed input
    pub fn insert(&mut self, mut org: Organization) -> OrgMgtResult<AppliedChange> {
        org.handle = normalize_handle(&org.handle)?;
        check_type_placement(&org)?;

        if self.nodes.contains_key(&org.id) {
            return Err(OrgMgtError::InvalidHierarchy {
                org_id: org.id,
                reason: "organization id already exists".to_string(),
            });
        }

        org.depth = match org.parent_id {
            Some(parent_id) => {
                let parent = self.live(parent_id).ok_or(OrgMgtError::ParentNotFound { parent_id })?;
                parent.depth + 1
            }
            None => 0,
        };
        if org.depth > self.max_depth {
            return Err(OrgMgtError::DepthLimitExceeded {
                org_id: org.id,
                max_depth: self.max_depth,
            });
        }

        let key = (org.parent_id, org.handle.clone());
        if self.handles.contains_key(&key) {
            return Err(OrgMgtError::HandleConflict {
                parent_id: org.parent_id,
                handle: org.handle,
            });
        }

        org.status = OrganizationStatus::Active;
        let org_id = org.id;
        self.handles.insert(key, org_id);
        self.children.entry(org.parent_id).or_default().push(org_id);
        let after = org.snapshot();
        self.nodes.insert(org_id, org.clone());
        self.version += 1;

        Ok(AppliedChange {
            before: None,
            after,
            organization: org,
            affected: vec![org_id],
            version: self.version,
            undo: UndoAction::Remove { org_id },
        })
    }

    /// Re-parent an organization and its whole subtree.
    ///
    /// Cycle detection walks upward from `new_parent_id`, so the cost is
    /// bounded by tree depth. Depths are recomputed for the moved subtree only.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotFound` / `OrganizationDeleted` for the moved organization
    /// - `CyclicMove` if `new_parent_id` is the organization or one of its descendants
    /// - `ParentNotFound` if the new parent is unknown or deleted
    /// - `HandleConflict` if the new sibling set already uses the handle
    /// - `DepthLimitExceeded` if the deepest moved node would exceed the limit
    /// - `InvalidHierarchy` when moving a top-level organization
    pub fn move_to(&mut self, org_id: Uuid, new_parent_id: Uuid) -> OrgMgtResult<AppliedChange> {
        let org = self.mutable(org_id)?;
        if org.org_type.is_top_level() {
            return Err(OrgMgtError::InvalidHierarchy {
                org_id,
                reason: format!("{} organizations cannot be moved", org.org_type),
            });
        }
        if new_parent_id == org_id {
            return Err(OrgMgtError::CyclicMove {
                org_id,
                new_parent_id,
            });
        }

        let new_parent = self
            .live(new_parent_id)
            .ok_or(OrgMgtError::ParentNotFound {
                parent_id: new_parent_id,
            })?;
        if self.is_ancestor(org_id, new_parent_id) {
            return Err(OrgMgtError::CyclicMove {
                org_id,
                new_parent_id,
            });
        }

        if let Some(existing) = self.handles.get(&(Some(new_parent_id), org.handle.clone())) {
            if *existing != org_id {
                return Err(OrgMgtError::HandleConflict {
                    parent_id: Some(new_parent_id),
                    handle: org.handle.clone(),
                });
            }
        }

        let height = self.subtree_height(org_id);
        if new_parent.depth + 1 + height > self.max_depth {
            return Err(OrgMgtError::DepthLimitExceeded {
                org_id,
                max_depth: self.max_depth,
            });
        }

        let before = org.snapshot();
        let previous_updated_at = org.updated_at;
        let Some(old_parent_id) = org.parent_id else {
            return Err(OrgMgtError::InvalidHierarchy {
                org_id,
                reason: "sub-organization has no parent".to_string(),
            });
        };

        self.reparent(org_id, new_parent_id, Utc::now());
        self.version += 1;

        let organization = self.node(org_id)?.clone();
        Ok(AppliedChange {
            before: Some(before),
            after: organization.snapshot(),
            organization,
            affected: self.subtree_ids(org_id),
            version: self.version,
            undo: UndoAction::Reparent {
                org_id,
                parent_id: old_parent_id,
                updated_at: previous_updated_at,
            },
        })
    }

    /// Move an organization forward in its lifecycle.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotFound` / `OrganizationDeleted`
    /// - `InvalidStatusTransition` unless `status` is strictly after the current one
    /// - `OrganizationHasChildren` when deleting an organization with live children
    pub fn set_status(&mut self, org_id: Uuid, status: OrganizationStatus) -> OrgMgtResult<AppliedChange> {
        let org = self.mutable(org_id)?;
        if !org.status.can_transition_to(status) {
            return Err(OrgMgtError::InvalidStatusTransition {
                org_id,
                from: org.status,
                to: status,
            });
        }
        if status == OrganizationStatus::Deleted {
            let child_count = self.live_children(org_id).count();
            if child_count > 0 {
                return Err(OrgMgtError::OrganizationHasChildren {
                    org_id,
                    child_count,
                });
            }
        }
        self.apply_status(org_id, status)
    }

    /// Bring a disabled organization back to `Active`.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotFound` / `OrganizationDeleted`
    /// - `InvalidStatusTransition` if the organization is not `Disabled`
    pub fn reactivate(&mut self, org_id: Uuid) -> OrgMgtResult<AppliedChange> {
        let org = self.mutable(org_id)?;
        if org.status != OrganizationStatus::Disabled {
            return Err(OrgMgtError::InvalidStatusTransition {
                org_id,
                from: org.status,
                to: OrganizationStatus::Active,
            });
        }
        self.apply_status(org_id, OrganizationStatus::Active)
    }

    /// Change an organization's handle.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotFound` / `OrganizationDeleted`
    /// - `InvalidHandle` if the handle fails validation
    /// - `HandleConflict` if a sibling already uses the handle
    pub fn rename(&mut self, org_id: Uuid, handle: &str) -> OrgMgtResult<AppliedChange> {
        let handle = normalize_handle(handle)?;
        let org = self.mutable(org_id)?;
        let parent_id = org.parent_id;

        if let Some(existing) = self.handles.get(&(parent_id, handle.clone())) {
            if *existing != org_id {
                return Err(OrgMgtError::HandleConflict { parent_id, handle });
            }
        }

        let before = org.snapshot();
        let undo = UndoAction::RestoreHandle {
            org_id,
            handle: org.handle.clone(),
            updated_at: org.updated_at,
        };
        self.apply_handle(org_id, handle, Utc::now());
        self.version += 1;

        let organization = self.node(org_id)?.clone();
        Ok(AppliedChange {
            before: Some(before),
            after: organization.snapshot(),
            organization,
            affected: vec![org_id],
            version: self.version,
            undo,
        })
    }

    /// Apply the inverse of a previously applied mutation.
    ///
    /// Rollback skips validation: writers are serialized, so the previous
    /// shape is still valid. The version is bumped so results computed
    /// against the rolled-back state become stale.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` if the organization vanished.
    pub fn rollback(&mut self, undo: &UndoAction) -> OrgMgtResult<u64> {
        match undo {
            UndoAction::Remove { org_id } => {
                let org = self
                    .nodes
                    .remove(org_id)
                    .ok_or(OrgMgtError::OrganizationNotFound { org_id: *org_id })?;
                if let Some(siblings) = self.children.get_mut(&org.parent_id) {
                    siblings.retain(|id| id != org_id);
                }
                self.handles.remove(&(org.parent_id, org.handle));
            }
            UndoAction::Reparent {
                org_id,
                parent_id,
                updated_at,
            } => {
                self.node(*org_id)?;
                self.reparent(*org_id, *parent_id, *updated_at);
            }
            UndoAction::RestoreStatus {
                org_id,
                status,
                updated_at,
            } => {
                let org = self.node_mut(*org_id)?;
                let was_deleted = org.is_deleted();
                org.status = *status;
                org.updated_at = *updated_at;
                if was_deleted && !status.is_terminal() {
                    let key = (org.parent_id, org.handle.clone());
                    self.handles.insert(key, *org_id);
                }
            }
            UndoAction::RestoreHandle {
                org_id,
                handle,
                updated_at,
            } => {
                self.node(*org_id)?;
                self.apply_handle(*org_id, handle.clone(), *updated_at);
            }
        }
        self.version += 1;
        Ok(self.version)
    }

    /// Ancestor chain from `org_id` up to its top-level organization.
    ///
    /// The chain is root-inclusive and nearest first, so its length is
    /// `depth + 1`.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` for unknown ids.
    pub fn ancestors_of(&self, org_id: Uuid) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        let mut current = self.node(org_id)?;
        let mut chain = vec![current.snapshot()];

        while let Some(parent_id) = current.parent_id {
            let child_id = current.id;
            if chain.len() > self.nodes.len() {
                return Err(OrgMgtError::InvalidHierarchy {
                    org_id: child_id,
                    reason: "parent chain does not terminate".to_string(),
                });
            }
            current = self
                .nodes
                .get(&parent_id)
                .ok_or_else(|| OrgMgtError::InvalidHierarchy {
                    org_id: child_id,
                    reason: "dangling parent reference".to_string(),
                })?;
            chain.push(current.snapshot());
        }

        Ok(chain)
    }

    /// Check that the organization and every ancestor are `Active`.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` for unknown ids.
    pub fn is_reachable(&self, org_id: Uuid) -> OrgMgtResult<bool> {
        Ok(self
            .ancestors_of(org_id)?
            .iter()
            .all(|o| o.status == OrganizationStatus::Active))
    }

    /// Ancestor chain of a reachable organization, tagged with the version.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotAccessible` when the organization is unknown or
    /// any organization on its chain is not `Active`.
    pub fn reachable_chain(&self, org_id: Uuid) -> OrgMgtResult<AncestorChain> {
        let organizations = self
            .ancestors_of(org_id)
            .map_err(|_| OrgMgtError::OrganizationNotAccessible { org_id })?;
        if organizations
            .iter()
            .any(|o| o.status != OrganizationStatus::Active)
        {
            return Err(OrgMgtError::OrganizationNotAccessible { org_id });
        }

        Ok(AncestorChain {
            version: self.version,
            organizations,
        })
    }

    /// Check if `ancestor_id` is a strict ancestor of `descendant_id`.
    ///
    /// Self is not an ancestor of self.
    pub fn is_ancestor(&self, ancestor_id: Uuid, descendant_id: Uuid) -> bool {
        let mut visited = HashSet::new();
        visited.insert(descendant_id);
        let mut current = self.nodes.get(&descendant_id).and_then(|o| o.parent_id);

        while let Some(parent_id) = current {
            if parent_id == ancestor_id {
                return true;
            }
            if !visited.insert(parent_id) {
                break;
            }
            current = self.nodes.get(&parent_id).and_then(|o| o.parent_id);
        }
        false
    }

    /// Direct children of an organization in creation order.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` for unknown ids.
    pub fn children_of(&self, org_id: Uuid, include_deleted: bool) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.node(org_id)?;
        Ok(self
            .children
            .get(&Some(org_id))
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
            .filter(|o| include_deleted || !o.is_deleted())
            .map(Organization::snapshot)
            .collect())
    }

    /// Descendants of an organization in pre-order, excluding the organization itself.
    ///
    /// Deleted organizations are skipped (with their subtrees) unless
    /// `include_deleted` is set.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` for unknown ids.
    pub fn descendants_of(&self, org_id: Uuid, include_deleted: bool) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.node(org_id)?;
        let mut result = Vec::new();
        let mut stack: Vec<Uuid> = self.child_ids(org_id).rev().collect();

        while let Some(id) = stack.pop() {
            let Some(org) = self.nodes.get(&id) else {
                continue;
            };
            if org.is_deleted() && !include_deleted {
                continue;
            }
            result.push(org.snapshot());
            stack.extend(self.child_ids(id).rev());
        }
        Ok(result)
    }

    /// Top-level organizations in creation order.
    pub fn top_level(&self) -> Vec<OrganizationSnapshot> {
        self.children
            .get(&None)
            .into_iter()
            .flatten()
            .filter_map(|id| self.nodes.get(id))
            .map(Organization::snapshot)
            .collect()
    }

    fn node(&self, org_id: Uuid) -> OrgMgtResult<&Organization> {
        self.nodes
            .get(&org_id)
            .ok_or(OrgMgtError::OrganizationNotFound { org_id })
    }

    fn node_mut(&mut self, org_id: Uuid) -> OrgMgtResult<&mut Organization> {
        self.nodes
            .get_mut(&org_id)
            .ok_or(OrgMgtError::OrganizationNotFound { org_id })
    }

    /// Existing, non-deleted organization that may still be mutated.
    fn mutable(&self, org_id: Uuid) -> OrgMgtResult<&Organization> {
        let org = self.node(org_id)?;
        if org.is_deleted() {
            return Err(OrgMgtError::OrganizationDeleted { org_id });
        }
        Ok(org)
    }

    fn live(&self, org_id: Uuid) -> Option<&Organization> {
        self.nodes.get(&org_id).filter(|o| !o.is_deleted())
    }

    fn child_ids(&self, org_id: Uuid) -> impl DoubleEndedIterator<Item = Uuid> + '_ {
        self.children.get(&Some(org_id)).into_iter().flatten().copied()
    }

    fn live_children(&self, org_id: Uuid) -> impl Iterator<Item = &Organization> + '_ {
        self.child_ids(org_id)
            .filter_map(|id| self.nodes.get(&id))
            .filter(|o| !o.is_deleted())
    }

    /// The organization and all its descendants (tombstones included), pre-order.
    fn subtree_ids(&self, org_id: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut stack = vec![org_id];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.child_ids(id).rev());
        }
        out
    }

    /// Depth of the deepest descendant relative to `org_id`.
    fn subtree_height(&self, org_id: Uuid) -> u32 {
        let base = self.nodes.get(&org_id).map(|o| o.depth).unwrap_or_default();
        self.subtree_ids(org_id)
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .map(|o| o.depth.saturating_sub(base))
            .max()
            .unwrap_or_default()
    }

    fn reparent(&mut self, org_id: Uuid, new_parent_id: Uuid, updated_at: DateTime<Utc>) {
        let Some(org) = self.nodes.get_mut(&org_id) else {
            return;
        };
        let old_parent_id = org.parent_id;
        let handle = org.handle.clone();
        let live = !org.is_deleted();
        org.parent_id = Some(new_parent_id);
        org.updated_at = updated_at;

        if let Some(siblings) = self.children.get_mut(&old_parent_id) {
            siblings.retain(|id| *id != org_id);
        }
        self.children.entry(Some(new_parent_id)).or_default().push(org_id);

        if live {
            self.handles.remove(&(old_parent_id, handle.clone()));
            self.handles.insert((Some(new_parent_id), handle), org_id);
        }

        self.recompute_depths(org_id);
    }

    /// Recompute depth for `org_id` and its subtree, breadth-first.
    fn recompute_depths(&mut self, org_id: Uuid) {
        let mut queue = VecDeque::from([org_id]);
        while let Some(id) = queue.pop_front() {
            let depth = self
                .nodes
                .get(&id)
                .and_then(|o| o.parent_id)
                .and_then(|p| self.nodes.get(&p))
                .map(|p| p.depth + 1)
                .unwrap_or_default();
            if let Some(org) = self.nodes.get_mut(&id) {
                org.depth = depth;
            }
            queue.extend(self.child_ids(id));
        }
    }

    fn apply_status(&mut self, org_id: Uuid, status: OrganizationStatus) -> OrgMgtResult<AppliedChange> {
        let org = self.node_mut(org_id)?;
        let before = org.snapshot();
        let undo = UndoAction::RestoreStatus {
            org_id,
            status: org.status,
            updated_at: org.updated_at,
        };
        org.status = status;
        org.updated_at = Utc::now();
        let organization = org.clone();

        if status.is_terminal() {
            self.handles
                .remove(&(organization.parent_id, organization.handle.clone()));
        }
        self.version += 1;

        Ok(AppliedChange {
            before: Some(before),
            after: organization.snapshot(),
            affected: self.subtree_ids(org_id),
            organization,
            version: self.version,
            undo,
        })
    }

    fn apply_handle(&mut self, org_id: Uuid, handle: String, updated_at: DateTime<Utc>) {
        let Some(org) = self.nodes.get_mut(&org_id) else {
            return;
        };
        let old_key = (org.parent_id, org.handle.clone());
        let new_key = (org.parent_id, handle.clone());
        let live = !org.is_deleted();
        org.handle = handle;
        org.updated_at = updated_at;
        if live {
            self.handles.remove(&old_key);
            self.handles.insert(new_key, org_id);
        }
    }
}

/// Top-level types must have no parent; sub-organizations must have one.
fn check_type_placement(org: &Organization) -> OrgMgtResult<()> {
    match (org.org_type.is_top_level(), org.parent_id) {
        (true, Some(_)) => Err(OrgMgtError::InvalidHierarchy {
            org_id: org.id,
            reason: format!("{} organizations cannot have a parent", org.org_type),
        }),
        (false, None) => Err(OrgMgtError::InvalidHierarchy {
            org_id: org.id,
            reason: "sub-organizations require a parent".to_string(),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organization::OrganizationType;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// root ─┬─ a ── b
    ///       └─ t
    fn sample_tree() -> (HierarchyTree, Uuid, Uuid, Uuid, Uuid) {
        let mut tree = HierarchyTree::default();
        let root = tree.insert(Organization::root("root")).unwrap().after.id;
        let a = tree.insert(Organization::sub_organization("a", root)).unwrap().after.id;
        let b = tree.insert(Organization::sub_organization("b", a)).unwrap().after.id;
        let t = tree.insert(Organization::sub_organization("t", root)).unwrap().after.id;
        (tree, root, a, b, t)
    }

    #[test]
    fn test_insert_assigns_depth() {
        let (tree, root, a, b, _) = sample_tree();

        assert_eq!(tree.get(root).unwrap().depth, 0);
        assert_eq!(tree.get(a).unwrap().depth, 1);
        assert_eq!(tree.get(b).unwrap().depth, 2);
        assert_eq!(tree.version(), 4);
    }

    #[test]
    fn test_insert_unknown_parent() {
        let mut tree = HierarchyTree::default();
        let missing = Uuid::now_v7();

        let err = tree
            .insert(Organization::sub_organization("x", missing))
            .unwrap_err();
        assert_eq!(err, OrgMgtError::ParentNotFound { parent_id: missing });
        assert!(tree.is_empty());
        assert_eq!(tree.version(), 0);
    }

    #[test]
    fn test_insert_under_deleted_parent() {
        let (mut tree, _, _, _, t) = sample_tree();
        tree.set_status(t, OrganizationStatus::Deleted).unwrap();

        let err = tree.insert(Organization::sub_organization("x", t)).unwrap_err();
        assert_eq!(err, OrgMgtError::ParentNotFound { parent_id: t });
    }

    #[test]
    fn test_sibling_handle_conflict() {
        let (mut tree, root, a, _, _) = sample_tree();

        let err = tree
            .insert(Organization::sub_organization("a", root))
            .unwrap_err();
        assert!(matches!(err, OrgMgtError::HandleConflict { parent_id: Some(p), .. } if p == root));

        // Same handle under a different parent is fine
        tree.insert(Organization::sub_organization("a", a)).unwrap();
    }

    #[test]
    fn test_top_level_handles_are_unique() {
        let mut tree = HierarchyTree::default();
        tree.insert(Organization::tenant("acme")).unwrap();

        let err = tree.insert(Organization::root("acme")).unwrap_err();
        assert!(matches!(err, OrgMgtError::HandleConflict { parent_id: None, .. }));
    }

    #[test]
    fn test_type_placement_rules() {
        let mut tree = HierarchyTree::default();
        let root = tree.insert(Organization::root("root")).unwrap().after.id;

        let mut nested_tenant = Organization::tenant("nested");
        nested_tenant.parent_id = Some(root);
        assert!(matches!(
            tree.insert(nested_tenant),
            Err(OrgMgtError::InvalidHierarchy { .. })
        ));

        let orphan = Organization::new("orphan", OrganizationType::SubOrganization, None);
        assert!(matches!(
            tree.insert(orphan),
            Err(OrgMgtError::InvalidHierarchy { .. })
        ));
    }

    #[test]
    fn test_depth_limit_on_insert() {
        let mut tree = HierarchyTree::new(1);
        let root = tree.insert(Organization::root("root")).unwrap().after.id;
        let a = tree.insert(Organization::sub_organization("a", root)).unwrap().after.id;

        let err = tree.insert(Organization::sub_organization("b", a)).unwrap_err();
        assert!(matches!(err, OrgMgtError::DepthLimitExceeded { max_depth: 1, .. }));
    }

    #[test]
    fn test_ancestors_length_matches_depth() {
        let (tree, root, a, b, _) = sample_tree();

        let chain = tree.ancestors_of(b).unwrap();
        let ids: Vec<Uuid> = chain.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![b, a, root]);

        for org in tree.organizations() {
            let chain = tree.ancestors_of(org.id).unwrap();
            assert_eq!(chain.len(), org.depth as usize + 1);
        }
    }

    #[test]
    fn test_move_recomputes_subtree_depth() {
        let (mut tree, root, a, b, t) = sample_tree();
        let c = tree.insert(Organization::sub_organization("c", b)).unwrap().after.id;

        let change = tree.move_to(b, t).unwrap();
        assert_eq!(change.before.as_ref().unwrap().parent_id, Some(a));
        assert_eq!(change.after.parent_id, Some(t));
        assert_eq!(change.affected, vec![b, c]);

        assert_eq!(tree.get(b).unwrap().depth, 2);
        assert_eq!(tree.get(c).unwrap().depth, 3);
        assert_eq!(
            tree.ancestors_of(c).unwrap().iter().map(|o| o.id).collect::<Vec<_>>(),
            vec![c, b, t, root]
        );
        assert!(tree.children_of(a, true).unwrap().is_empty());
    }

    #[test]
    fn test_move_rejects_cycles() {
        let (mut tree, _, a, b, _) = sample_tree();
        let version = tree.version();

        assert_eq!(
            tree.move_to(a, a).unwrap_err(),
            OrgMgtError::CyclicMove { org_id: a, new_parent_id: a }
        );
        assert_eq!(
            tree.move_to(a, b).unwrap_err(),
            OrgMgtError::CyclicMove { org_id: a, new_parent_id: b }
        );
        assert_eq!(tree.version(), version);
    }

    #[test]
    fn test_move_handle_conflict_and_top_level() {
        let (mut tree, root, a, _, t) = sample_tree();
        tree.insert(Organization::sub_organization("a", t)).unwrap();

        assert!(matches!(
            tree.move_to(a, t),
            Err(OrgMgtError::HandleConflict { .. })
        ));
        assert!(matches!(
            tree.move_to(root, t),
            Err(OrgMgtError::InvalidHierarchy { .. })
        ));
    }

    #[test]
    fn test_move_depth_limit_counts_subtree() {
        let mut tree = HierarchyTree::new(3);
        let root = tree.insert(Organization::root("root")).unwrap().after.id;
        let a = tree.insert(Organization::sub_organization("a", root)).unwrap().after.id;
        let b = tree.insert(Organization::sub_organization("b", a)).unwrap().after.id;
        let x = tree.insert(Organization::sub_organization("x", root)).unwrap().after.id;
        let y = tree.insert(Organization::sub_organization("y", x)).unwrap().after.id;
        let z = tree.insert(Organization::sub_organization("z", y)).unwrap().after.id;

        // a (height 1) under z (depth 3) would put b at depth 5
        assert!(matches!(
            tree.move_to(a, z),
            Err(OrgMgtError::DepthLimitExceeded { .. })
        ));
        // a under y puts b at depth 4
        assert!(tree.move_to(a, y).is_err());
        // a under x puts b at depth 3
        tree.move_to(a, x).unwrap();
        assert_eq!(tree.get(b).unwrap().depth, 3);
    }

    #[test]
    fn test_status_transitions() {
        let (mut tree, _, a, b, _) = sample_tree();

        tree.set_status(b, OrganizationStatus::Disabled).unwrap();
        assert!(matches!(
            tree.set_status(b, OrganizationStatus::Active),
            Err(OrgMgtError::InvalidStatusTransition { .. })
        ));
        assert!(matches!(
            tree.set_status(b, OrganizationStatus::Disabled),
            Err(OrgMgtError::InvalidStatusTransition { .. })
        ));

        tree.reactivate(b).unwrap();
        assert!(tree.get(b).unwrap().is_active());
        assert!(matches!(
            tree.reactivate(b),
            Err(OrgMgtError::InvalidStatusTransition { .. })
        ));

        assert!(matches!(
            tree.set_status(a, OrganizationStatus::Deleted),
            Err(OrgMgtError::OrganizationHasChildren { child_count: 1, .. })
        ));
        tree.set_status(b, OrganizationStatus::Deleted).unwrap();
        tree.set_status(a, OrganizationStatus::Deleted).unwrap();

        assert_eq!(
            tree.set_status(a, OrganizationStatus::Deleted).unwrap_err(),
            OrgMgtError::OrganizationDeleted { org_id: a }
        );
        assert!(matches!(
            tree.rename(a, "renamed"),
            Err(OrgMgtError::OrganizationDeleted { .. })
        ));
    }

    #[test]
    fn test_deleted_handles_can_be_reused() {
        let (mut tree, root, _, _, t) = sample_tree();
        tree.set_status(t, OrganizationStatus::Deleted).unwrap();

        let reused = tree.insert(Organization::sub_organization("t", root)).unwrap();
        assert_ne!(reused.after.id, t);
        // Tombstone stays in the index
        assert!(tree.get(t).unwrap().is_deleted());
        assert_eq!(tree.children_of(root, true).unwrap().len(), 3);
        assert_eq!(tree.children_of(root, false).unwrap().len(), 2);
    }

    #[test]
    fn test_reachability() {
        let (mut tree, root, a, b, t) = sample_tree();
        assert!(tree.is_reachable(b).unwrap());

        tree.set_status(a, OrganizationStatus::Disabled).unwrap();
        assert!(!tree.is_reachable(a).unwrap());
        assert!(!tree.is_reachable(b).unwrap());
        assert!(tree.is_reachable(t).unwrap());
        assert_eq!(
            tree.reachable_chain(b).unwrap_err(),
            OrgMgtError::OrganizationNotAccessible { org_id: b }
        );

        tree.set_status(root, OrganizationStatus::Disabled).unwrap();
        assert!(!tree.is_reachable(t).unwrap());
    }

    #[test]
    fn test_rename() {
        let (mut tree, root, a, _, _) = sample_tree();

        assert!(matches!(
            tree.rename(a, "t"),
            Err(OrgMgtError::HandleConflict { .. })
        ));
        let change = tree.rename(a, " alpha ").unwrap();
        assert_eq!(change.before.unwrap().handle, "a");
        assert_eq!(change.after.handle, "alpha");
        assert_eq!(tree.find_by_handle(Some(root), "alpha").unwrap().id, a);
        assert!(tree.find_by_handle(Some(root), "a").is_none());
    }

    #[test]
    fn test_rollback_restores_previous_shape() {
        let (mut tree, _, a, b, t) = sample_tree();

        let moved = tree.move_to(b, t).unwrap();
        tree.rollback(&moved.undo).unwrap();
        assert_eq!(tree.get(b).unwrap().parent_id, Some(a));
        assert_eq!(tree.get(b).unwrap().depth, 2);
        assert!(tree.children_of(t, true).unwrap().is_empty());

        let inserted = tree.insert(Organization::sub_organization("n", a)).unwrap();
        let version = tree.rollback(&inserted.undo).unwrap();
        assert!(tree.get(inserted.after.id).is_none());
        assert_eq!(version, tree.version());

        let deleted = tree.set_status(b, OrganizationStatus::Deleted).unwrap();
        tree.rollback(&deleted.undo).unwrap();
        assert!(tree.get(b).unwrap().is_active());
        assert_eq!(tree.find_by_handle(Some(a), "b").unwrap().id, b);

        let renamed = tree.rename(b, "bee").unwrap();
        tree.rollback(&renamed.undo).unwrap();
        assert_eq!(tree.get(b).unwrap().handle, "b");
    }

    #[test]
    fn test_descendants_pre_order() {
        let (mut tree, root, a, b, t) = sample_tree();
        let c = tree.insert(Organization::sub_organization("c", b)).unwrap().after.id;

        let ids: Vec<Uuid> = tree
            .descendants_of(root, false)
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, vec![a, b, c, t]);

        tree.set_status(c, OrganizationStatus::Deleted).unwrap();
        assert_eq!(tree.descendants_of(root, false).unwrap().len(), 3);
        assert_eq!(tree.descendants_of(root, true).unwrap().len(), 4);
        assert!(tree.is_ancestor(root, c));
        assert!(!tree.is_ancestor(c, c));
        assert!(!tree.is_ancestor(t, b));
    }

    #[test]
    fn test_rebuild_from_unordered_records() {
        let (tree, root, a, b, t) = sample_tree();
        let mut records: Vec<Organization> = tree.organizations().cloned().collect();
        records.reverse();
        for record in &mut records {
            record.depth = 42;
        }

        let rebuilt = HierarchyTree::rebuild(records, DEFAULT_MAX_DEPTH).unwrap();
        assert_eq!(rebuilt.len(), 4);
        assert_eq!(rebuilt.version(), 0);
        assert_eq!(rebuilt.get(b).unwrap().depth, 2);
        let children: Vec<Uuid> = rebuilt
            .children_of(root, false)
            .unwrap()
            .iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(children.len(), 2);
        assert!(children.contains(&a) && children.contains(&t));
    }

    #[test]
    fn test_rebuild_rejects_orphans_and_cycles() {
        let orphan = Organization::sub_organization("orphan", Uuid::now_v7());
        assert!(matches!(
            HierarchyTree::rebuild(vec![orphan], DEFAULT_MAX_DEPTH),
            Err(OrgMgtError::InvalidHierarchy { .. })
        ));

        let mut x = Organization::sub_organization("x", Uuid::nil());
        let mut y = Organization::sub_organization("y", x.id);
        x.parent_id = Some(y.id);
        y.parent_id = Some(x.id);
        let err = HierarchyTree::rebuild(vec![x, y], DEFAULT_MAX_DEPTH).unwrap_err();
        assert!(matches!(err, OrgMgtError::InvalidHierarchy { reason, .. } if reason.contains("cycle")));
    }

    #[test]
    fn test_rebuild_rejects_records_deeper_than_limit() {
        let (tree, _, _, b, _) = sample_tree();
        let records: Vec<Organization> = tree.organizations().cloned().collect();

        let err = HierarchyTree::rebuild(records.clone(), 1).unwrap_err();
        assert!(matches!(
            err,
            OrgMgtError::InvalidHierarchy { org_id, ref reason } if org_id == b && reason.contains("maximum hierarchy depth")
        ));

        let rebuilt = HierarchyTree::rebuild(records, 2).unwrap();
        assert_eq!(rebuilt.get(b).unwrap().depth, 2);
    }

    #[test]
    fn test_random_moves_never_create_cycles() {
        let mut rng = StdRng::seed_from_u64(0x0c0ffee);
        let mut tree = HierarchyTree::new(64);
        let root = tree.insert(Organization::root("root")).unwrap().after.id;
        let mut ids = vec![root];

        for i in 0..40 {
            let parent = ids[rng.gen_range(0..ids.len())];
            let id = tree
                .insert(Organization::sub_organization(format!("org-{i}"), parent))
                .unwrap()
                .after
                .id;
            ids.push(id);
        }

        let mut accepted = 0;
        for _ in 0..500 {
            let org = ids[rng.gen_range(1..ids.len())];
            let target = ids[rng.gen_range(0..ids.len())];
            match tree.move_to(org, target) {
                Ok(_) => accepted += 1,
                Err(OrgMgtError::CyclicMove { .. }) => {
                    assert!(org == target || tree.is_ancestor(org, target));
                }
                Err(err) => panic!("unexpected error: {err}"),
            }

            for id in &ids {
                assert!(!tree.is_ancestor(*id, *id));
                let chain = tree.ancestors_of(*id).unwrap();
                assert_eq!(chain.len(), tree.get(*id).unwrap().depth as usize + 1);
                assert_eq!(chain.last().unwrap().id, root);
            }
        }
        assert!(accepted > 0);
    }
}
