//! Identity kinds resolved against the organization hierarchy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of identity whose resident organization is being resolved.
///
/// # Examples
///
/// ```
/// use orgmgt_core::IdentityKind;
///
/// assert_eq!(IdentityKind::parse("Group"), Some(IdentityKind::Group));
/// assert_eq!(IdentityKind::User.collection(), "users");
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// A user account
    User,

    /// A user group
    Group,
}

impl IdentityKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentityKind::User => "user",
            IdentityKind::Group => "group",
        }
    }

    /// Plural collection name, as used in user-store paths.
    pub fn collection(&self) -> &'static str {
        match self {
            IdentityKind::User => "users",
            IdentityKind::Group => "groups",
        }
    }

    /// Parse from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "user" | "users" => Some(IdentityKind::User),
            "group" | "groups" => Some(IdentityKind::Group),
            _ => None,
        }
    }
}

impl fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
