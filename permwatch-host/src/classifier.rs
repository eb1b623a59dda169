//! Dangerous-permission classification

use crate::source::{PackageSource, SourceError};

/// Decides whether a permission is dangerous using the source's metadata
#[derive(Clone, Copy)]
pub struct PermissionClassifier<'a> {
    source: &'a dyn PackageSource,
}

impl<'a> PermissionClassifier<'a> {
    pub fn new(source: &'a dyn PackageSource) -> Self {
        Self { source }
    }

    /// Whether `permission` has protection level "dangerous".
    ///
    /// Unknown permissions are reported as [`SourceError::UnknownPermission`];
    /// the caller decides how to treat them.
    pub fn is_dangerous(&self, permission: &str) -> Result<bool, SourceError> {
        Ok(self.source.protection_level(permission)?.is_dangerous())
    }
}
