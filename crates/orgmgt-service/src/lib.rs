//! # Organization Management Service
//!
//! This crate runs the organization hierarchy of a multi-tenant identity
//! platform: it applies hierarchy mutations with persistence and rollback,
//! and resolves users and groups to the organization that owns them.
//!
//! ## Overview
//!
//! The orgmgt-service crate handles:
//! - **Manager**: Create, move, rename and lifecycle changes, persisted
//!   through a [`HierarchyStore`] and rolled back when persistence fails
//! - **Resolver**: Nearest-ancestor resolution of an identity's resident
//!   organization, bounded by a time budget
//! - **Cache**: Version-checked caching of resolution outcomes
//! - **User Store Client**: HTTP ownership lookups against the identity store
//! - **Configuration**: Environment-based settings
//!
//! ## Resolution
//!
//! ```text
//! accessing org ─► parent ─► ... ─► top-level org
//!      │             │                   │
//!      └── is the identity natively defined here? first "yes" wins
//! ```
//!
//! Resolution requires the accessing organization and every ancestor to be
//! active. A timed-out attempt is retried with a fresh ancestor chain.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use orgmgt_core::{IdentityKind, Organization};
//! use orgmgt_service::{
//!     InMemoryHierarchyStore, InMemoryOwnershipDirectory, OrgMgtConfig, OrganizationManagement,
//! };
//! use std::sync::Arc;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let directory = Arc::new(InMemoryOwnershipDirectory::new());
//!     let service = OrganizationManagement::initialize(
//!         OrgMgtConfig::default(),
//!         Arc::new(InMemoryHierarchyStore::new()),
//!         directory.clone(),
//!     )
//!     .await?;
//!
//!     let tenant = service.create_organization(Organization::tenant("acme")).await?;
//!     directory.define(tenant.id, IdentityKind::Group, "admins").await;
//!
//!     let resident = service
//!         .resolve_resident_organization("admins", IdentityKind::Group, tenant.id)
//!         .await?;
//!     assert!(resident.is_local());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clients;
pub mod config;
pub mod lookup;
pub mod management;
pub mod manager;
pub mod resolver;
pub mod retry;
pub mod store;

// Re-export main types
pub use cache::{CacheKey, CacheStats, CachedResolution, ResolutionCache};
pub use clients::{UserStoreClient, UserStoreError};
pub use config::{ConfigError, OrgMgtConfig, UserStoreEndpoint};
pub use lookup::{IdentityOwnershipLookup, InMemoryOwnershipDirectory, LookupError};
pub use management::{OrganizationManagement, StartupError};
pub use manager::OrganizationManager;
pub use resolver::{ResidentResolution, ResidentResolver};
pub use retry::RetryConfig;
pub use store::{HierarchyStore, InMemoryHierarchyStore, StoreError, StoreResult};
