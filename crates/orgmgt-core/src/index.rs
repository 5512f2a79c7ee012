//! Shared tree index
//!
//! [`TreeIndex`] wraps a [`HierarchyTree`] in a `tokio::sync::RwLock` so
//! that many resolution calls can read concurrently while mutations apply
//! atomically. Every method takes the lock for the in-memory step only and
//! returns owned data, so no caller holds the lock across I/O.
//!
//! Readers never see a half-applied change: a move re-parents the node and
//! recomputes the subtree depths under one write lock.

use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::OrgMgtResult;
use crate::organization::{Organization, OrganizationSnapshot, OrganizationStatus};
use crate::tree::{AncestorChain, AppliedChange, HierarchyTree, UndoAction};

/// Lock-guarded organization hierarchy shared by manager and resolver.
#[derive(Debug, Default)]
pub struct TreeIndex {
    tree: RwLock<HierarchyTree>,
}

impl TreeIndex {
    /// Wrap an existing tree.
    pub fn new(tree: HierarchyTree) -> Self {
        Self {
            tree: RwLock::new(tree),
        }
    }

    /// Create an empty index.
    pub fn empty(max_depth: u32) -> Self {
        Self::new(HierarchyTree::new(max_depth))
    }

    /// Wrap an existing tree in an `Arc` for sharing.
    pub fn shared(tree: HierarchyTree) -> Arc<Self> {
        Arc::new(Self::new(tree))
    }

    /// Hold a read lock for several queries against one consistent state.
    ///
    /// Do not keep the guard across external calls.
    pub async fn read(&self) -> RwLockReadGuard<'_, HierarchyTree> {
        self.tree.read().await
    }

    /// Current hierarchy version.
    pub async fn version(&self) -> u64 {
        self.tree.read().await.version()
    }

    /// Number of organizations, tombstones included.
    pub async fn len(&self) -> usize {
        self.tree.read().await.len()
    }

    /// Check if the index holds no organizations.
    pub async fn is_empty(&self) -> bool {
        self.tree.read().await.is_empty()
    }

    /// Get a copy of an organization.
    pub async fn get(&self, org_id: Uuid) -> Option<Organization> {
        self.tree.read().await.get(org_id).cloned()
    }

    /// Insert a new organization. See [`HierarchyTree::insert`].
    ///
    /// # Errors
    ///
    /// Propagates the tree's structural validation errors.
    pub async fn insert(&self, org: Organization) -> OrgMgtResult<AppliedChange> {
        self.tree.write().await.insert(org)
    }

    /// Re-parent an organization. See [`HierarchyTree::move_to`].
    ///
    /// # Errors
    ///
    /// Propagates the tree's structural validation errors.
    pub async fn move_organization(&self, org_id: Uuid, new_parent_id: Uuid) -> OrgMgtResult<AppliedChange> {
        self.tree.write().await.move_to(org_id, new_parent_id)
    }

    /// Move an organization forward in its lifecycle. See [`HierarchyTree::set_status`].
    ///
    /// # Errors
    ///
    /// Propagates the tree's transition errors.
    pub async fn set_status(&self, org_id: Uuid, status: OrganizationStatus) -> OrgMgtResult<AppliedChange> {
        self.tree.write().await.set_status(org_id, status)
    }

    /// Bring a disabled organization back. See [`HierarchyTree::reactivate`].
    ///
    /// # Errors
    ///
    /// Propagates the tree's transition errors.
    pub async fn reactivate(&self, org_id: Uuid) -> OrgMgtResult<AppliedChange> {
        self.tree.write().await.reactivate(org_id)
    }

    /// Change an organization's handle. See [`HierarchyTree::rename`].
    ///
    /// # Errors
    ///
    /// Propagates the tree's validation errors.
    pub async fn rename(&self, org_id: Uuid, handle: &str) -> OrgMgtResult<AppliedChange> {
        self.tree.write().await.rename(org_id, handle)
    }

    /// Undo a previously applied change.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` if the organization vanished.
    pub async fn rollback(&self, undo: &UndoAction) -> OrgMgtResult<u64> {
        let version = self.tree.write().await.rollback(undo)?;
        debug!(org_id = %undo.org_id(), version, "Rolled back tree change");
        Ok(version)
    }

    /// Ancestor chain, nearest first and root-inclusive.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` for unknown ids.
    pub async fn ancestors_of(&self, org_id: Uuid) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.tree.read().await.ancestors_of(org_id)
    }

    /// Check that the organization and all its ancestors are active.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` for unknown ids.
    pub async fn is_reachable(&self, org_id: Uuid) -> OrgMgtResult<bool> {
        self.tree.read().await.is_reachable(org_id)
    }

    /// Version-tagged ancestor chain of a reachable organization.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotAccessible` when the chain is not fully active.
    pub async fn reachable_chain(&self, org_id: Uuid) -> OrgMgtResult<AncestorChain> {
        self.tree.read().await.reachable_chain(org_id)
    }

    /// Direct children.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` for unknown ids.
    pub async fn children_of(&self, org_id: Uuid, include_deleted: bool) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.tree.read().await.children_of(org_id, include_deleted)
    }

    /// Descendants in pre-order.
    ///
    /// # Errors
    ///
    /// Returns `OrganizationNotFound` for unknown ids.
    pub async fn descendants_of(&self, org_id: Uuid, include_deleted: bool) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.tree.read().await.descendants_of(org_id, include_deleted)
    }

    /// Check if `ancestor_id` is a strict ancestor of `descendant_id`.
    pub async fn is_ancestor(&self, ancestor_id: Uuid, descendant_id: Uuid) -> bool {
        self.tree.read().await.is_ancestor(ancestor_id, descendant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrgMgtError;

    #[tokio::test]
    async fn test_index_round_trip() {
        let index = TreeIndex::empty(4);
        let root = index.insert(Organization::root("root")).await.unwrap().after.id;
        let child = index
            .insert(Organization::sub_organization("child", root))
            .await
            .unwrap()
            .after
            .id;

        assert_eq!(index.len().await, 2);
        assert_eq!(index.version().await, 2);
        assert!(index.is_reachable(child).await.unwrap());
        assert!(index.is_ancestor(root, child).await);

        let chain = index.reachable_chain(child).await.unwrap();
        assert_eq!(chain.ids(), vec![child, root]);
        assert_eq!(chain.version, 2);
    }

    #[tokio::test]
    async fn test_rollback_bumps_version() {
        let index = TreeIndex::empty(4);
        let change = index.insert(Organization::root("root")).await.unwrap();

        let version = index.rollback(&change.undo).await.unwrap();
        assert_eq!(version, 2);
        assert!(index.is_empty().await);
        assert_eq!(
            index.ancestors_of(change.after.id).await.unwrap_err(),
            OrgMgtError::OrganizationNotFound {
                org_id: change.after.id
            }
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_observe_partial_moves() {
        let index = Arc::new(TreeIndex::empty(16));
        let root = index.insert(Organization::root("root")).await.unwrap().after.id;
        let left = index
            .insert(Organization::sub_organization("left", root))
            .await
            .unwrap()
            .after
            .id;
        let right = index
            .insert(Organization::sub_organization("right", root))
            .await
            .unwrap()
            .after
            .id;
        let mut parent = left;
        let mut leaf = left;
        for i in 0..5 {
            leaf = index
                .insert(Organization::sub_organization(format!("n{i}"), parent))
                .await
                .unwrap()
                .after
                .id;
            parent = leaf;
        }
        let subtree_root = index.children_of(left, false).await.unwrap()[0].id;

        let reader = {
            let index = index.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let guard = index.read().await;
                    let chain = guard.ancestors_of(leaf).unwrap();
                    let depth = guard.get(leaf).unwrap().depth;
                    assert_eq!(chain.len(), depth as usize + 1);
                    assert_eq!(chain.last().unwrap().id, root);
                    drop(guard);
                    tokio::task::yield_now().await;
                }
            })
        };

        for i in 0..200 {
            let target = if i % 2 == 0 { right } else { left };
            index.move_organization(subtree_root, target).await.unwrap();
        }

        reader.await.unwrap();
    }
}
