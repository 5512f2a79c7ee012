//! Organization manager
//!
//! Owns every hierarchy mutation. Each mutation runs the same pipeline
//! while holding the writer gate:
//!
//! ```text
//! validate + apply (tree write lock) → persist (no lock) ─┬─ ok    → invalidate cache → enqueue event
//!                                                         └─ error → rollback → PersistenceFailure
//! ```
//!
//! The tree lock is released before the store call, so resolution keeps
//! reading while a write is persisted. The writer gate keeps a second
//! mutation from validating against state that may still be rolled back.
//!
//! Listeners never run under the gate. Committed events go to a single
//! delivery task that calls listeners one event at a time in commit order,
//! so a listener may call back into the manager and a stuck listener only
//! delays later deliveries.

use orgmgt_core::{
    AppliedChange, OrgMgtError, OrgMgtResult, Organization, OrganizationSnapshot, OrganizationStatus, TreeIndex,
};
use orgmgt_events::{
    ListenerId, ListenerRegistry, MutationKind, OrganizationEvent, OrganizationListener, RegistryStats,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cache::ResolutionCache;
use crate::store::{HierarchyStore, StoreResult};

/// Work item for the listener delivery task.
enum Delivery {
    Event(OrganizationEvent),
    Flush(oneshot::Sender<()>),
}

/// Applies hierarchy mutations and notifies listeners.
pub struct OrganizationManager {
    tree: Arc<TreeIndex>,
    store: Arc<dyn HierarchyStore>,
    cache: Arc<ResolutionCache>,
    listeners: Arc<ListenerRegistry>,
    deliveries: mpsc::UnboundedSender<Delivery>,
    write_gate: Mutex<()>,
}

impl OrganizationManager {
    /// Create a manager over a shared tree and cache.
    ///
    /// Spawns the listener delivery task, so this must be called from
    /// within a Tokio runtime. The task stops when the manager is dropped.
    pub fn new(tree: Arc<TreeIndex>, store: Arc<dyn HierarchyStore>, cache: Arc<ResolutionCache>) -> Self {
        let listeners = Arc::new(ListenerRegistry::new());
        let deliveries = spawn_delivery(listeners.clone());

        Self {
            tree,
            store,
            cache,
            listeners,
            deliveries,
            write_gate: Mutex::new(()),
        }
    }

    /// Add an organization to the hierarchy.
    ///
    /// # Errors
    ///
    /// - `ParentNotFound`, `HandleConflict`, `DepthLimitExceeded`,
    ///   `InvalidHandle`, `InvalidHierarchy` from validation
    /// - `PersistenceFailure` if the store rejects the record
    #[instrument(skip(self, org), fields(org_id = %org.id, handle = %org.handle, parent_id = ?org.parent_id))]
    pub async fn create_organization(&self, org: Organization) -> OrgMgtResult<Organization> {
        let _gate = self.write_gate.lock().await;

        let change = self.tree.insert(org).await?;
        let stored = self.store.create_organization(&change.organization).await;
        self.settle(&change, stored).await?;

        self.commit(MutationKind::Created, &change).await;
        Ok(change.organization)
    }

    /// Re-parent a sub-organization, carrying its subtree along.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotFound`, `ParentNotFound`, `CyclicMove`,
    ///   `DepthLimitExceeded`, `OrganizationDeleted`, `InvalidHierarchy`
    /// - `PersistenceFailure` if the store rejects the change
    #[instrument(skip(self))]
    pub async fn move_organization(&self, org_id: Uuid, new_parent_id: Uuid) -> OrgMgtResult<Organization> {
        let _gate = self.write_gate.lock().await;

        let change = self.tree.move_organization(org_id, new_parent_id).await?;
        let stored = self.store.update_parent(org_id, new_parent_id).await;
        self.settle(&change, stored).await?;

        self.commit(MutationKind::Moved, &change).await;
        Ok(change.organization)
    }

    /// Move an organization forward in its lifecycle.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotFound`, `InvalidStatusTransition`,
    ///   `OrganizationHasChildren` (deleting with live children)
    /// - `PersistenceFailure` if the store rejects the change
    #[instrument(skip(self))]
    pub async fn set_organization_status(
        &self,
        org_id: Uuid,
        status: OrganizationStatus,
    ) -> OrgMgtResult<Organization> {
        let _gate = self.write_gate.lock().await;

        let change = self.tree.set_status(org_id, status).await?;
        let stored = self.store.update_status(org_id, status).await;
        self.settle(&change, stored).await?;

        self.commit(MutationKind::StatusChanged, &change).await;
        Ok(change.organization)
    }

    /// Return a disabled organization to active.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotFound`, `InvalidStatusTransition` unless disabled
    /// - `PersistenceFailure` if the store rejects the change
    #[instrument(skip(self))]
    pub async fn reactivate_organization(&self, org_id: Uuid) -> OrgMgtResult<Organization> {
        let _gate = self.write_gate.lock().await;

        let change = self.tree.reactivate(org_id).await?;
        let stored = self.store.update_status(org_id, OrganizationStatus::Active).await;
        self.settle(&change, stored).await?;

        self.commit(MutationKind::Reactivated, &change).await;
        Ok(change.organization)
    }

    /// Change an organization's handle.
    ///
    /// # Errors
    ///
    /// - `OrganizationNotFound`, `OrganizationDeleted`, `InvalidHandle`,
    ///   `HandleConflict`
    /// - `PersistenceFailure` if the store rejects the change
    #[instrument(skip(self))]
    pub async fn rename_organization(&self, org_id: Uuid, handle: &str) -> OrgMgtResult<Organization> {
        let _gate = self.write_gate.lock().await;

        let change = self.tree.rename(org_id, handle).await?;
        let stored = self.store.update_handle(org_id, &change.after.handle).await;
        self.settle(&change, stored).await?;

        self.commit(MutationKind::Renamed, &change).await;
        Ok(change.organization)
    }

    /// Get an organization, tombstones included.
    pub async fn get_organization(&self, org_id: Uuid) -> OrgMgtResult<Organization> {
        self.tree
            .get(org_id)
            .await
            .ok_or(OrgMgtError::OrganizationNotFound { org_id })
    }

    /// Ancestor chain of an organization, nearest first and self-inclusive.
    pub async fn ancestors_of(&self, org_id: Uuid) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.tree.ancestors_of(org_id).await
    }

    /// Direct children of an organization.
    pub async fn children_of(&self, org_id: Uuid, include_deleted: bool) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.tree.children_of(org_id, include_deleted).await
    }

    /// Descendants of an organization in pre-order.
    pub async fn descendants_of(
        &self,
        org_id: Uuid,
        include_deleted: bool,
    ) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.tree.descendants_of(org_id, include_deleted).await
    }

    /// Register a mutation listener.
    pub async fn register_listener(&self, listener: Arc<dyn OrganizationListener>) -> ListenerId {
        self.listeners.register(listener).await
    }

    /// Unregister a mutation listener. Returns `true` if it was registered.
    pub async fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id).await
    }

    /// Remove every listener. Returns the number removed.
    pub async fn clear_listeners(&self) -> usize {
        self.listeners.clear().await
    }

    /// Listener delivery statistics.
    pub async fn listener_stats(&self) -> RegistryStats {
        self.listeners.stats().await
    }

    /// Wait until every event committed so far has been handed to listeners.
    ///
    /// Returns `false` if the delivery task is gone. Does not return while a
    /// listener is stuck on an earlier event.
    pub async fn flush_notifications(&self) -> bool {
        let (ack, done) = oneshot::channel();
        if self.deliveries.send(Delivery::Flush(ack)).is_err() {
            return false;
        }
        done.await.is_ok()
    }

    /// Roll the tree back if the store call failed.
    async fn settle(&self, change: &AppliedChange, stored: StoreResult<()>) -> OrgMgtResult<()> {
        let Err(store_error) = stored else {
            return Ok(());
        };

        let org_id = change.after.id;
        warn!(org_id = %org_id, error = %store_error, "Persisting change failed, rolling back");

        if let Err(rollback_error) = self.tree.rollback(&change.undo).await {
            error!(
                org_id = %org_id,
                error = %rollback_error,
                "Compensating rollback failed"
            );
        }
        // Entries computed against the applied state are stale now.
        self.cache.invalidate_all().await;

        Err(OrgMgtError::PersistenceFailure {
            org_id,
            message: store_error.to_string(),
        })
    }

    async fn commit(&self, kind: MutationKind, change: &AppliedChange) {
        info!(
            org_id = %change.after.id,
            mutation = %kind,
            version = change.version,
            affected = change.affected.len(),
            "Organization change committed"
        );

        self.cache.invalidate_all().await;

        // Enqueued under the gate, so events keep commit order.
        let event = OrganizationEvent::from_change(kind, change);
        if self.deliveries.send(Delivery::Event(event)).is_err() {
            warn!(org_id = %change.after.id, mutation = %kind, "Listener delivery stopped, event dropped");
        }
    }
}

fn spawn_delivery(listeners: Arc<ListenerRegistry>) -> mpsc::UnboundedSender<Delivery> {
    let (sender, mut receiver) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(delivery) = receiver.recv().await {
            match delivery {
                Delivery::Event(event) => {
                    listeners.notify(&event).await;
                }
                Delivery::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Listener delivery task stopped");
    });

    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryHierarchyStore;
    use orgmgt_events::BroadcastListener;
    use std::time::Duration;

    struct Fixture {
        tree: Arc<TreeIndex>,
        store: Arc<InMemoryHierarchyStore>,
        manager: OrganizationManager,
    }

    fn fixture() -> Fixture {
        let tree = Arc::new(TreeIndex::default());
        let store = Arc::new(InMemoryHierarchyStore::new());
        let cache = Arc::new(ResolutionCache::new(Duration::from_secs(60), 100));
        let manager = OrganizationManager::new(tree.clone(), store.clone(), cache);
        Fixture { tree, store, manager }
    }

    #[tokio::test]
    async fn test_create_persists_and_notifies() {
        let f = fixture();
        let listener = Arc::new(BroadcastListener::all());
        let mut subscription = listener.subscribe();
        f.manager.register_listener(listener).await;

        let root = f.manager.create_organization(Organization::root("acme")).await.unwrap();

        assert_eq!(f.store.get(root.id).await.unwrap().handle, "acme");
        let event = subscription.recv().await.unwrap();
        assert_eq!(event.kind, MutationKind::Created);
        assert_eq!(event.organization_id, root.id);
        assert!(event.before.is_none());
    }

    #[tokio::test]
    async fn test_validation_failure_leaves_store_untouched() {
        let f = fixture();
        let result = f
            .manager
            .create_organization(Organization::sub_organization("orphan", Uuid::now_v7()))
            .await;

        assert!(matches!(result, Err(OrgMgtError::ParentNotFound { .. })));
        assert!(f.store.is_empty().await);
        assert!(f.tree.is_empty().await);
    }

    #[tokio::test]
    async fn test_persistence_failure_rolls_back_move() {
        let f = fixture();
        let root = f.manager.create_organization(Organization::root("root")).await.unwrap().id;
        let a = f
            .manager
            .create_organization(Organization::sub_organization("a", root))
            .await
            .unwrap()
            .id;
        let b = f
            .manager
            .create_organization(Organization::sub_organization("b", root))
            .await
            .unwrap()
            .id;

        let listener = Arc::new(BroadcastListener::all());
        let mut subscription = listener.subscribe();
        f.manager.register_listener(listener).await;
        let version_before = f.tree.version().await;

        f.store.set_reject_writes(true);
        let result = f.manager.move_organization(b, a).await;

        assert!(matches!(result, Err(OrgMgtError::PersistenceFailure { org_id, .. }) if org_id == b));
        let b_org = f.manager.get_organization(b).await.unwrap();
        assert_eq!(b_org.parent_id, Some(root));
        assert_eq!(b_org.depth, 1);
        assert!(f.tree.version().await > version_before);
        assert!(f.manager.children_of(a, false).await.unwrap().is_empty());

        // Nothing was published for the failed change.
        let pending = tokio::time::timeout(Duration::from_millis(20), subscription.recv()).await;
        assert!(pending.is_err());
    }

    #[tokio::test]
    async fn test_persistence_failure_rolls_back_create() {
        let f = fixture();
        f.store.set_reject_writes(true);

        let org = Organization::root("acme");
        let org_id = org.id;
        let result = f.manager.create_organization(org).await;

        assert!(matches!(result, Err(OrgMgtError::PersistenceFailure { .. })));
        assert!(matches!(
            f.manager.get_organization(org_id).await,
            Err(OrgMgtError::OrganizationNotFound { .. })
        ));

        // The handle is free again.
        f.store.set_reject_writes(false);
        f.manager.create_organization(Organization::root("acme")).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let f = fixture();
        let root = f.manager.create_organization(Organization::root("root")).await.unwrap().id;

        let disabled = f
            .manager
            .set_organization_status(root, OrganizationStatus::Disabled)
            .await
            .unwrap();
        assert_eq!(disabled.status, OrganizationStatus::Disabled);

        let result = f.manager.set_organization_status(root, OrganizationStatus::Active).await;
        assert!(matches!(result, Err(OrgMgtError::InvalidStatusTransition { .. })));

        let active = f.manager.reactivate_organization(root).await.unwrap();
        assert_eq!(active.status, OrganizationStatus::Active);
        assert_eq!(f.store.get(root).await.unwrap().status, OrganizationStatus::Active);
    }

    #[tokio::test]
    async fn test_rename_persists_normalized_handle() {
        let f = fixture();
        let root = f.manager.create_organization(Organization::root("root")).await.unwrap().id;

        let renamed = f.manager.rename_organization(root, "  acme ").await.unwrap();

        assert_eq!(renamed.handle, "acme");
        assert_eq!(f.store.get(root).await.unwrap().handle, "acme");
    }

    #[tokio::test]
    async fn test_unregister_listener() {
        let f = fixture();
        let listener = Arc::new(BroadcastListener::all());
        let id = f.manager.register_listener(listener).await;

        assert!(f.manager.unregister_listener(id).await);
        assert!(!f.manager.unregister_listener(id).await);

        f.manager.create_organization(Organization::root("root")).await.unwrap();
        assert!(f.manager.flush_notifications().await);
        let stats = f.manager.listener_stats().await;
        assert_eq!(stats.events_published, 1);
        assert_eq!(stats.events_delivered, 0);
        assert_eq!(stats.registered_listeners, 0);
    }
}
