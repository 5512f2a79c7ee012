//! Organization management service
//!
//! [`OrganizationManagement`] is the single entry point embedding
//! applications use. [`OrganizationManagement::initialize`] validates the
//! configuration, loads every stored organization, rebuilds the in-memory
//! hierarchy and wires the manager and resolver over one shared tree and
//! cache.

use orgmgt_core::{
    HierarchyTree, IdentityKind, OrgMgtError, OrgMgtResult, Organization, OrganizationSnapshot, OrganizationStatus,
    TreeIndex,
};
use orgmgt_events::{ListenerId, OrganizationListener};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cache::{CacheStats, ResolutionCache};
use crate::clients::{UserStoreClient, UserStoreError};
use crate::config::{ConfigError, OrgMgtConfig};
use crate::lookup::IdentityOwnershipLookup;
use crate::manager::OrganizationManager;
use crate::resolver::{ResidentResolution, ResidentResolver};
use crate::store::{HierarchyStore, StoreError};

/// Errors raised while starting the service.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Stored organizations could not be loaded
    #[error("Failed to load organizations: {0}")]
    Store(#[from] StoreError),

    /// Stored organizations do not form a valid hierarchy
    #[error("Stored hierarchy is invalid: {0}")]
    Hierarchy(#[from] OrgMgtError),

    /// User store client could not be built
    #[error("Failed to create user store client: {0}")]
    UserStore(#[from] UserStoreError),
}

/// Organization management service.
///
/// # Examples
///
/// ```rust,no_run
/// use orgmgt_core::{IdentityKind, Organization};
/// use orgmgt_service::{
///     InMemoryHierarchyStore, InMemoryOwnershipDirectory, OrgMgtConfig, OrganizationManagement,
/// };
/// use std::sync::Arc;
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let directory = Arc::new(InMemoryOwnershipDirectory::new());
///     let service = OrganizationManagement::initialize(
///         OrgMgtConfig::from_env(),
///         Arc::new(InMemoryHierarchyStore::new()),
///         directory.clone(),
///     )
///     .await?;
///
///     let root = service.create_organization(Organization::root("acme")).await?;
///     let emea = service
///         .create_organization(Organization::sub_organization("emea", root.id))
///         .await?;
///
///     directory.define(root.id, IdentityKind::User, "alice").await;
///     let resident = service
///         .resolve_resident_organization("alice", IdentityKind::User, emea.id)
///         .await?;
///     assert_eq!(resident.organization_id, root.id);
///     Ok(())
/// }
/// ```
pub struct OrganizationManagement {
    config: OrgMgtConfig,
    tree: Arc<TreeIndex>,
    cache: Arc<ResolutionCache>,
    manager: OrganizationManager,
    resolver: ResidentResolver,
}

impl OrganizationManagement {
    /// Start the service over a store and an ownership lookup.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] if the configuration is invalid, the store
    /// cannot be read, or the stored records do not form a valid hierarchy.
    #[instrument(skip_all)]
    pub async fn initialize(
        config: OrgMgtConfig,
        store: Arc<dyn HierarchyStore>,
        lookup: Arc<dyn IdentityOwnershipLookup>,
    ) -> Result<Self, StartupError> {
        config.validate()?;

        let records = store.load_all().await?;
        let tree = HierarchyTree::rebuild(records, config.max_depth)?;
        info!(
            organizations = tree.len(),
            max_depth = config.max_depth,
            cache_enabled = config.cache_enabled,
            "Organization hierarchy loaded"
        );

        let tree = TreeIndex::shared(tree);
        let cache = Arc::new(ResolutionCache::from_config(&config));
        let manager = OrganizationManager::new(tree.clone(), store, cache.clone());
        let resolver = ResidentResolver::new(tree.clone(), lookup, cache.clone(), &config);

        Ok(Self {
            config,
            tree,
            cache,
            manager,
            resolver,
        })
    }

    /// Start the service with the configured user store as ownership lookup.
    ///
    /// # Errors
    ///
    /// Returns `StartupError::Config` if no user store is configured, plus
    /// everything [`initialize`](Self::initialize) can return.
    pub async fn initialize_with_user_store(
        config: OrgMgtConfig,
        store: Arc<dyn HierarchyStore>,
    ) -> Result<Self, StartupError> {
        let endpoint = config
            .user_store
            .clone()
            .ok_or_else(|| ConfigError::Missing("ORGMGT_USER_STORE_URL".to_string()))?;
        let client = UserStoreClient::new(endpoint, config.resolution_timeout())?;

        Self::initialize(config, store, Arc::new(client)).await
    }

    /// Add an organization to the hierarchy.
    pub async fn create_organization(&self, org: Organization) -> OrgMgtResult<Organization> {
        self.manager.create_organization(org).await
    }

    /// Re-parent a sub-organization.
    pub async fn move_organization(&self, org_id: Uuid, new_parent_id: Uuid) -> OrgMgtResult<Organization> {
        self.manager.move_organization(org_id, new_parent_id).await
    }

    /// Move an organization forward in its lifecycle.
    pub async fn set_organization_status(
        &self,
        org_id: Uuid,
        status: OrganizationStatus,
    ) -> OrgMgtResult<Organization> {
        self.manager.set_organization_status(org_id, status).await
    }

    /// Return a disabled organization to active.
    pub async fn reactivate_organization(&self, org_id: Uuid) -> OrgMgtResult<Organization> {
        self.manager.reactivate_organization(org_id).await
    }

    /// Change an organization's handle.
    pub async fn rename_organization(&self, org_id: Uuid, handle: &str) -> OrgMgtResult<Organization> {
        self.manager.rename_organization(org_id, handle).await
    }

    /// Get an organization.
    pub async fn get_organization(&self, org_id: Uuid) -> OrgMgtResult<Organization> {
        self.manager.get_organization(org_id).await
    }

    /// Ancestor chain of an organization, nearest first and self-inclusive.
    pub async fn ancestors_of(&self, org_id: Uuid) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.manager.ancestors_of(org_id).await
    }

    /// Resolve the resident organization of an identity.
    pub async fn resolve_resident_organization(
        &self,
        handle: &str,
        kind: IdentityKind,
        accessing_org_id: Uuid,
    ) -> OrgMgtResult<ResidentResolution> {
        self.resolver
            .resolve_resident_organization(handle, kind, accessing_org_id)
            .await
    }

    /// Organizations an identity resident in `resident_org_id` is visible from.
    pub async fn accessible_organizations(
        &self,
        handle: &str,
        kind: IdentityKind,
        resident_org_id: Uuid,
    ) -> OrgMgtResult<Vec<OrganizationSnapshot>> {
        self.resolver
            .accessible_organizations(handle, kind, resident_org_id)
            .await
    }

    /// Drop cached resolutions for an identity whose ownership changed.
    pub async fn identity_ownership_changed(&self, handle: &str, kind: IdentityKind) -> usize {
        self.resolver.identity_ownership_changed(handle, kind).await
    }

    /// Register a mutation listener.
    pub async fn register_listener(&self, listener: Arc<dyn OrganizationListener>) -> ListenerId {
        self.manager.register_listener(listener).await
    }

    /// Unregister a mutation listener.
    pub async fn unregister_listener(&self, id: ListenerId) -> bool {
        self.manager.unregister_listener(id).await
    }

    /// Wait until listeners have been handed every committed event.
    pub async fn flush_notifications(&self) -> bool {
        self.manager.flush_notifications().await
    }

    /// Organization manager.
    pub fn manager(&self) -> &OrganizationManager {
        &self.manager
    }

    /// Resident resolver.
    pub fn resolver(&self) -> &ResidentResolver {
        &self.resolver
    }

    /// Active configuration.
    pub fn config(&self) -> &OrgMgtConfig {
        &self.config
    }

    /// Current hierarchy version.
    pub async fn hierarchy_version(&self) -> u64 {
        self.tree.version().await
    }

    /// Resolution cache statistics.
    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Detach listeners and drop cached resolutions.
    ///
    /// Events still queued for delivery are discarded once listeners are
    /// detached.
    pub async fn shutdown(&self) {
        let listeners = self.manager.clear_listeners().await;
        let cached = self.cache.invalidate_all().await;
        info!(listeners, cached, "Organization management stopped");
    }
}
