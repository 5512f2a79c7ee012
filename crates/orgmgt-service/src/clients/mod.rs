//! Service clients for external identity stores.
//!
//! - User store: answers whether a user or group is natively defined in an
//!   organization

pub mod user_store;

pub use user_store::{UserStoreClient, UserStoreError};
