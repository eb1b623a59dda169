//! Package source abstraction
//!
//! The registry never talks to a platform package manager directly. It asks a
//! [`PackageSource`] for the installed packages, their granted permissions and
//! permission metadata.

use permwatch_api::{AppManifest, InstalledPackage, PermissionCatalog, PermissionId, ProtectionLevel};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;

/// Errors reported by a package source
#[derive(Debug, Error)]
pub enum SourceError {
    /// The package disappeared between listing and detail lookup
    #[error("Package not found: {0}")]
    PackageNotFound(String),

    /// The permission has no metadata on this platform
    #[error("Unknown permission: {0}")]
    UnknownPermission(String),

    /// A manifest could not be read or parsed
    #[error("Failed to read manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// The source as a whole cannot be queried
    #[error("Package source unavailable: {0}")]
    Unavailable(String),
}

impl SourceError {
    /// Whether this error means the package vanished mid-scan
    pub fn is_vanished(&self) -> bool {
        matches!(self, Self::PackageNotFound(_))
    }
}

/// Trait for package inventories
///
/// Implement this for a platform package manager. All methods may block.
pub trait PackageSource: Send + Sync {
    /// List every installed package
    fn list_installed(&self) -> Result<Vec<InstalledPackage>, SourceError>;

    /// Permissions currently granted to a package
    fn granted_permissions(&self, package_id: &str) -> Result<Vec<PermissionId>, SourceError>;

    /// Protection level of a permission
    fn protection_level(&self, permission: &str) -> Result<ProtectionLevel, SourceError>;

    /// Icon bytes for a package
    fn icon(&self, package_id: &str) -> Result<Vec<u8>, SourceError>;
}

// ============================================================================
// In-Memory Package Source
// ============================================================================

#[derive(Default)]
struct MemoryInventory {
    apps: Vec<AppManifest>,
    catalog: PermissionCatalog,
    vanishing: HashSet<String>,
}

/// In-memory package source for tests and embedding
///
/// Packages are listed in insertion order. A package marked as vanishing is
/// still listed, but every detail lookup for it fails with
/// [`SourceError::PackageNotFound`].
#[derive(Default)]
pub struct MemoryPackageSource {
    inventory: RwLock<MemoryInventory>,
}

impl MemoryPackageSource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a permission's protection level
    pub fn with_permission(self, permission: impl Into<PermissionId>, level: ProtectionLevel) -> Self {
        self.declare_permission(permission, level);
        self
    }

    /// Add a package
    pub fn with_app(self, manifest: AppManifest) -> Self {
        self.insert_app(manifest);
        self
    }

    /// Declare or redeclare a permission
    pub fn declare_permission(&self, permission: impl Into<PermissionId>, level: ProtectionLevel) {
        let mut inventory = self.write();
        inventory.catalog.permissions.insert(permission.into(), level);
    }

    /// Insert or replace a package
    pub fn insert_app(&self, manifest: AppManifest) {
        let mut inventory = self.write();
        match inventory
            .apps
            .iter_mut()
            .find(|m| m.package_id == manifest.package_id)
        {
            Some(existing) => *existing = manifest,
            None => inventory.apps.push(manifest),
        }
    }

    /// Uninstall a package
    pub fn remove_app(&self, package_id: &str) -> bool {
        let mut inventory = self.write();
        let before = inventory.apps.len();
        inventory.apps.retain(|m| m.package_id != package_id);
        inventory.vanishing.remove(package_id);
        inventory.apps.len() != before
    }

    /// Keep listing a package but fail all detail lookups for it
    pub fn mark_vanishing(&self, package_id: &str) {
        self.write().vanishing.insert(package_id.to_string());
    }

    /// Number of installed packages
    pub fn len(&self) -> usize {
        self.read().apps.len()
    }

    /// Check if no package is installed
    pub fn is_empty(&self) -> bool {
        self.read().apps.is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryInventory> {
        self.inventory.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryInventory> {
        self.inventory.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_manifest<T>(
        &self,
        package_id: &str,
        f: impl FnOnce(&AppManifest) -> T,
    ) -> Result<T, SourceError> {
        let inventory = self.read();
        if inventory.vanishing.contains(package_id) {
            return Err(SourceError::PackageNotFound(package_id.to_string()));
        }
        inventory
            .apps
            .iter()
            .find(|m| m.package_id == package_id)
            .map(f)
            .ok_or_else(|| SourceError::PackageNotFound(package_id.to_string()))
    }
}

impl PackageSource for MemoryPackageSource {
    fn list_installed(&self) -> Result<Vec<InstalledPackage>, SourceError> {
        Ok(self.read().apps.iter().map(AppManifest::to_installed).collect())
    }

    fn granted_permissions(&self, package_id: &str) -> Result<Vec<PermissionId>, SourceError> {
        self.with_manifest(package_id, |m| m.granted_permissions.clone())
    }

    fn protection_level(&self, permission: &str) -> Result<ProtectionLevel, SourceError> {
        self.read()
            .catalog
            .level(permission)
            .ok_or_else(|| SourceError::UnknownPermission(permission.to_string()))
    }

    fn icon(&self, package_id: &str) -> Result<Vec<u8>, SourceError> {
        self.with_manifest(package_id, |m| m.icon.clone().unwrap_or_default())
    }
}

impl std::fmt::Debug for MemoryPackageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPackageSource")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> MemoryPackageSource {
        MemoryPackageSource::new()
            .with_permission("CAMERA", ProtectionLevel::Dangerous)
            .with_app(AppManifest::new("com.example.a").grant("CAMERA"))
            .with_app(AppManifest::new("com.example.b"))
    }

    #[test]
    fn test_lists_in_insertion_order() {
        let ids: Vec<_> = source()
            .list_installed()
            .unwrap()
            .into_iter()
            .map(|p| p.package_id)
            .collect();
        assert_eq!(ids, vec!["com.example.a", "com.example.b"]);
    }

    #[test]
    fn test_unknown_permission() {
        let result = source().protection_level("NOPE");
        assert!(matches!(result, Err(SourceError::UnknownPermission(p)) if p == "NOPE"));
    }

    #[test]
    fn test_vanishing_package_is_listed_but_not_found() {
        let source = source();
        source.mark_vanishing("com.example.a");

        assert_eq!(source.list_installed().unwrap().len(), 2);
        let err = source.granted_permissions("com.example.a").unwrap_err();
        assert!(err.is_vanished());
        assert!(source.icon("com.example.a").unwrap_err().is_vanished());
    }

    #[test]
    fn test_insert_replaces_existing() {
        let source = source();
        source.insert_app(AppManifest::new("com.example.a").grant("MIC"));
        assert_eq!(source.len(), 2);
        assert_eq!(source.granted_permissions("com.example.a").unwrap(), vec!["MIC"]);

        assert!(source.remove_app("com.example.a"));
        assert!(!source.remove_app("com.example.a"));
        assert_eq!(source.len(), 1);
    }
}
