//! # Organization Events
//!
//! This crate provides the notification side of organization management:
//! the event emitted after every committed hierarchy mutation and the
//! registry of listeners that receive it.
//!
//! ## Overview
//!
//! The orgmgt-events crate handles:
//! - **Event Types**: `OrganizationEvent` with before/after snapshots
//! - **Listeners**: The `OrganizationListener` notification hook
//! - **Registry**: Ordered register/unregister of listeners
//! - **Broadcast**: In-process fan-out to channel subscribers
//!
//! ## Topic Patterns
//!
//! Topics are structured as `organization.{mutation}`:
//! - `organization.created`
//! - `organization.moved`
//! - `organization.renamed`
//! - `organization.status_changed`
//! - `organization.reactivated`
//!
//! Wildcards:
//! - `*` matches exactly one segment
//! - `#` matches zero or more segments
//!
//! ## Usage
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use orgmgt_events::{ListenerRegistry, ListenerResult, OrganizationEvent, OrganizationListener};
//! use std::sync::Arc;
//!
//! struct AuditListener;
//!
//! #[async_trait]
//! impl OrganizationListener for AuditListener {
//!     async fn on_event(&self, event: &OrganizationEvent) -> ListenerResult<()> {
//!         println!("{} {}", event.topic(), event.organization_id);
//!         Ok(())
//!     }
//! }
//!
//! async fn setup(registry: &ListenerRegistry) {
//!     registry.register(Arc::new(AuditListener)).await;
//! }
//! ```

pub mod registry;
pub mod types;

// Re-export main types
pub use registry::{
    BroadcastListener, ListenerError, ListenerId, ListenerRegistry, ListenerResult,
    OrganizationListener, RegistryStats, Subscription,
};
pub use types::{MutationKind, OrganizationEvent, TOPIC_PREFIX};
