//! Hierarchy persistence
//!
//! [`HierarchyStore`] is the storage seam for the organization manager. A
//! mutation is applied to the in-memory tree first and then persisted; if
//! the store call fails the manager rolls the tree back.
//!
//! [`InMemoryHierarchyStore`] keeps records in a map and can be switched to
//! reject writes, which makes the rollback path testable.

use async_trait::async_trait;
use chrono::Utc;
use orgmgt_core::{Organization, OrganizationStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Errors reported by a hierarchy store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or refused the write
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Record not present in the store
    #[error("Organization not found in store: {0}")]
    NotFound(Uuid),

    /// Record already present in the store
    #[error("Organization already exists in store: {0}")]
    AlreadyExists(Uuid),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable storage for organization records.
///
/// Implementations persist one record per organization. Depth is derived
/// when the hierarchy is rebuilt, so only the parent link needs storing.
#[async_trait]
pub trait HierarchyStore: Send + Sync {
    /// Persist a new organization.
    async fn create_organization(&self, org: &Organization) -> StoreResult<()>;

    /// Persist a parent change.
    async fn update_parent(&self, org_id: Uuid, parent_id: Uuid) -> StoreResult<()>;

    /// Persist a status change.
    async fn update_status(&self, org_id: Uuid, status: OrganizationStatus) -> StoreResult<()>;

    /// Persist a handle change.
    async fn update_handle(&self, org_id: Uuid, handle: &str) -> StoreResult<()>;

    /// Load every stored organization, tombstones included.
    async fn load_all(&self) -> StoreResult<Vec<Organization>>;
}

/// In-memory hierarchy store.
#[derive(Debug, Default)]
pub struct InMemoryHierarchyStore {
    records: RwLock<HashMap<Uuid, Organization>>,
    reject_writes: AtomicBool,
    writes: AtomicU64,
}

impl InMemoryHierarchyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records.
    pub fn with_organizations(orgs: impl IntoIterator<Item = Organization>) -> Self {
        let records = orgs.into_iter().map(|o| (o.id, o)).collect();
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    /// Make every subsequent write fail (or succeed again).
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Get a stored record.
    pub async fn get(&self, org_id: Uuid) -> Option<Organization> {
        self.records.read().await.get(&org_id).cloned()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Check if the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes are rejected".to_string()));
        }
        Ok(())
    }

    async fn update<F>(&self, org_id: Uuid, apply: F) -> StoreResult<()>
    where
        F: FnOnce(&mut Organization),
    {
        self.check_writable()?;
        let mut records = self.records.write().await;
        let record = records.get_mut(&org_id).ok_or(StoreError::NotFound(org_id))?;
        apply(record);
        record.updated_at = Utc::now();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl HierarchyStore for InMemoryHierarchyStore {
    async fn create_organization(&self, org: &Organization) -> StoreResult<()> {
        self.check_writable()?;
        let mut records = self.records.write().await;
        if records.contains_key(&org.id) {
            return Err(StoreError::AlreadyExists(org.id));
        }
        records.insert(org.id, org.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(org_id = %org.id, handle = %org.handle, "Stored organization");
        Ok(())
    }

    async fn update_parent(&self, org_id: Uuid, parent_id: Uuid) -> StoreResult<()> {
        self.update(org_id, |org| org.parent_id = Some(parent_id)).await
    }

    async fn update_status(&self, org_id: Uuid, status: OrganizationStatus) -> StoreResult<()> {
        self.update(org_id, |org| org.status = status).await
    }

    async fn update_handle(&self, org_id: Uuid, handle: &str) -> StoreResult<()> {
        self.update(org_id, |org| org.handle = handle.to_string()).await
    }

    async fn load_all(&self) -> StoreResult<Vec<Organization>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_update() {
        let store = InMemoryHierarchyStore::new();
        let root = Organization::root("root");
        let org = Organization::sub_organization("emea", root.id);

        store.create_organization(&root).await.unwrap();
        store.create_organization(&org).await.unwrap();
        store.update_handle(org.id, "europe").await.unwrap();
        store.update_status(org.id, OrganizationStatus::Disabled).await.unwrap();

        let stored = store.get(org.id).await.unwrap();
        assert_eq!(stored.handle, "europe");
        assert_eq!(stored.status, OrganizationStatus::Disabled);
        assert_eq!(store.write_count(), 4);
        assert_eq!(store.load_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_and_missing_records() {
        let store = InMemoryHierarchyStore::new();
        let root = Organization::root("root");
        store.create_organization(&root).await.unwrap();

        assert!(matches!(
            store.create_organization(&root).await,
            Err(StoreError::AlreadyExists(id)) if id == root.id
        ));
        assert!(matches!(
            store.update_parent(Uuid::now_v7(), root.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejected_writes() {
        let root = Organization::root("root");
        let store = InMemoryHierarchyStore::with_organizations([root.clone()]);
        store.set_reject_writes(true);

        let result = store.update_status(root.id, OrganizationStatus::Disabled).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.get(root.id).await.unwrap().status, OrganizationStatus::Active);
        assert_eq!(store.write_count(), 0);

        store.set_reject_writes(false);
        store.update_status(root.id, OrganizationStatus::Disabled).await.unwrap();
        assert_eq!(store.write_count(), 1);
    }
}
