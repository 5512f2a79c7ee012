//! # Organization Hierarchy Core
//!
//! This crate provides the organization hierarchy model for a multi-tenant
//! identity platform: the organization entity, the in-memory tree index
//! with its structural invariants, and the shared error type.
//!
//! ## Overview
//!
//! The orgmgt-core crate handles:
//! - **Organizations**: Root, tenant and sub-organization nodes with lifecycle status
//! - **Tree Index**: Parent/child adjacency, sibling handle uniqueness, depth tracking
//! - **Reachability**: An organization is reachable when it and every ancestor are active
//! - **Errors**: One error type for mutation and resolution failures
//!
//! ## Architecture
//!
//! ```text
//! TreeIndex (RwLock)
//!   └─ HierarchyTree
//!        ├─ nodes      id → Organization (tombstones kept)
//!        ├─ children   parent → [child ids]
//!        ├─ handles    (parent, handle) → id
//!        └─ version    bumped on every change and rollback
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use orgmgt_core::{HierarchyTree, Organization, OrganizationStatus};
//!
//! let mut tree = HierarchyTree::default();
//! let root = tree.insert(Organization::root("acme")).unwrap().after.id;
//! let emea = tree.insert(Organization::sub_organization("emea", root)).unwrap().after.id;
//!
//! assert_eq!(tree.ancestors_of(emea).unwrap().len(), 2);
//!
//! tree.set_status(root, OrganizationStatus::Disabled).unwrap();
//! assert!(!tree.is_reachable(emea).unwrap());
//! ```
//!
//! ## Related Crates
//!
//! - `orgmgt-events`: Mutation events and listener registry
//! - `orgmgt-service`: Organization manager, resident resolver and cache

pub mod error;
pub mod identity;
pub mod index;
pub mod organization;
pub mod tree;

// Re-export main types for convenience
pub use error::{OrgMgtError, OrgMgtResult};
pub use identity::IdentityKind;
pub use index::TreeIndex;
pub use organization::{Organization, OrganizationSnapshot, OrganizationStatus, OrganizationType};
pub use tree::{AncestorChain, AppliedChange, HierarchyTree, UndoAction, DEFAULT_MAX_DEPTH};
