//! Permission names and sets
//!
//! Permissions are plain names such as `permissions:write`. Each character
//! must match `[a-zA-Z0-9_.:-]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest accepted permission name
pub const MAX_PERMISSION_LEN: usize = 128;

fn is_valid_permission_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("permission name cannot be empty")]
    Empty,

    #[error("permission name is too long")]
    TooLong,

    #[error("invalid permission '{0}': must match [a-zA-Z0-9_.:-]+")]
    InvalidCharacters(String),
}

/// A validated permission name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

impl Permission {
    pub fn parse(name: &str) -> Result<Self, PermissionError> {
        if name.is_empty() {
            return Err(PermissionError::Empty);
        }

        if name.len() > MAX_PERMISSION_LEN {
            return Err(PermissionError::TooLong);
        }

        if !name.chars().all(is_valid_permission_char) {
            return Err(PermissionError::InvalidCharacters(name.to_string()));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Permission {
    type Err = PermissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::parse(s)
    }
}

impl TryFrom<String> for Permission {
    type Error = PermissionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Permission::parse(&value)
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.0
    }
}

/// The permissions held by one subject
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    permissions: Vec<Permission>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self {
            permissions: Vec::new(),
        }
    }

    /// Add a permission, ignoring duplicates
    pub fn add(&mut self, permission: Permission) -> bool {
        if self.permissions.contains(&permission) {
            return false;
        }
        self.permissions.push(permission);
        true
    }

    /// Remove a permission, returning whether it was present
    pub fn remove(&mut self, permission: &Permission) -> bool {
        let before = self.permissions.len();
        self.permissions.retain(|p| p != permission);
        self.permissions.len() != before
    }

    pub fn contains(&self, permission: &Permission) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Membership test by name
    pub fn allows(&self, name: &str) -> bool {
        self.permissions.iter().any(|p| p.as_str() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        let mut set = PermissionSet::new();
        for permission in iter {
            set.add(permission);
        }
        set
    }
}
