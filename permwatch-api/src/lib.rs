//! permwatch-api: Shared types for the permwatch registry
//!
//! This crate defines the data exchanged between the registry engine, the
//! package inventory it scans and the front ends that render its results.
//! Inventory files on disk use JSON serialization of the manifest types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Format version written into inventory manifests
pub const MANIFEST_VERSION: u32 = 1;

/// Identifier namespace reserved for OS vendor components
pub const RESERVED_VENDOR_PREFIX: &str = "com.android.";

/// Permission identifier (e.g., "android.permission.CAMERA")
pub type PermissionId = String;

/// Protection level reported by the platform for a permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLevel {
    /// Low-risk permission granted at install time
    Normal,
    /// Permission that guards private data or device features
    Dangerous,
    /// Granted only to apps signed with the declaring certificate
    Signature,
    /// Reserved for platform-internal use
    Internal,
}

impl ProtectionLevel {
    /// Whether this level counts as dangerous
    pub fn is_dangerous(self) -> bool {
        matches!(self, Self::Dangerous)
    }
}

/// One entry of the installed-package listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    /// Stable package identifier
    pub package_id: String,

    /// Human readable label, if the platform has one
    #[serde(default)]
    pub label: Option<String>,

    /// Whether the package is currently enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether the package is flagged as a system component
    #[serde(default)]
    pub system: bool,
}

impl InstalledPackage {
    /// Create an enabled, non-system package entry
    pub fn new(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            label: None,
            enabled: true,
            system: false,
        }
    }

    /// Set the label
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Mark the package as disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Mark the package as a system component
    pub fn system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Label to show for this package, falling back to its identifier
    pub fn display_name(&self) -> &str {
        match self.label.as_deref() {
            Some(label) if !label.trim().is_empty() => label,
            _ => &self.package_id,
        }
    }
}

/// A classified installed application
///
/// Identity is the `package_id` alone: two values with the same package id
/// compare equal and hash the same regardless of their other fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    /// Stable package identifier
    pub package_id: String,

    /// Display name
    pub display_name: String,

    /// Opaque icon bytes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icon: Vec<u8>,

    /// Granted, dangerous and not suppressed by any ignore rule
    #[serde(default)]
    pub warnable_permissions: Vec<PermissionId>,

    /// Granted but either not dangerous or suppressed
    #[serde(default)]
    pub nonwarnable_permissions: Vec<PermissionId>,

    /// Whether the whole app is on the temporary ignore list
    #[serde(default)]
    pub temporarily_ignored: bool,

    /// Per-app threshold value carried for front ends
    #[serde(default = "default_threshold")]
    pub dangerous_threshold: u32,
}

impl Application {
    /// Create an application with no permissions
    pub fn new(package_id: impl Into<String>) -> Self {
        let package_id = package_id.into();
        Self {
            display_name: package_id.clone(),
            package_id,
            icon: Vec::new(),
            warnable_permissions: Vec::new(),
            nonwarnable_permissions: Vec::new(),
            temporarily_ignored: false,
            dangerous_threshold: default_threshold(),
        }
    }

    /// Set the display name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set the icon bytes
    pub fn with_icon(mut self, icon: Vec<u8>) -> Self {
        self.icon = icon;
        self
    }

    /// Set the warnable permissions
    pub fn with_warnable_permissions(mut self, permissions: Vec<PermissionId>) -> Self {
        self.warnable_permissions = permissions;
        self
    }

    /// Set the non-warnable permissions
    pub fn with_nonwarnable_permissions(mut self, permissions: Vec<PermissionId>) -> Self {
        self.nonwarnable_permissions = permissions;
        self
    }

    /// Set the temporary ignore flag
    pub fn with_temporarily_ignored(mut self, ignored: bool) -> Self {
        self.temporarily_ignored = ignored;
        self
    }

    /// Set the dangerous threshold
    pub fn with_dangerous_threshold(mut self, threshold: u32) -> Self {
        self.dangerous_threshold = threshold;
        self
    }

    /// Number of permissions the user should be warned about
    pub fn warning_count(&self) -> usize {
        self.warnable_permissions.len()
    }

    /// Whether any permission is currently warnable
    pub fn has_warnings(&self) -> bool {
        !self.warnable_permissions.is_empty()
    }

    /// Whether `permission` is currently warnable
    pub fn is_warnable(&self, permission: &str) -> bool {
        self.warnable_permissions.iter().any(|p| p == permission)
    }

    /// Whether `permission` was granted to this app at all
    pub fn is_granted(&self, permission: &str) -> bool {
        self.is_warnable(permission) || self.nonwarnable_permissions.iter().any(|p| p == permission)
    }

    /// Move a permission from the warnable to the non-warnable partition.
    ///
    /// Returns false (and changes nothing) if it was not warnable.
    pub fn suppress(&mut self, permission: &str) -> bool {
        match self.warnable_permissions.iter().position(|p| p == permission) {
            Some(index) => {
                let permission = self.warnable_permissions.remove(index);
                self.nonwarnable_permissions.push(permission);
                true
            }
            None => false,
        }
    }

    /// Move a permission back into the warnable partition.
    ///
    /// Returns false if it was already warnable. A permission that was not in
    /// the non-warnable partition either is still added as warnable.
    pub fn restore(&mut self, permission: &str) -> bool {
        if self.is_warnable(permission) {
            return false;
        }
        self.nonwarnable_permissions.retain(|p| p != permission);
        self.warnable_permissions.push(permission.to_string());
        true
    }
}

impl PartialEq for Application {
    fn eq(&self, other: &Self) -> bool {
        self.package_id == other.package_id
    }
}

impl Eq for Application {}

impl Hash for Application {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.package_id.hash(state);
    }
}

/// Sort applications by descending warnable-permission count.
///
/// The sort is stable, so apps with equal counts keep their relative order.
pub fn sort_by_warning_count(applications: &mut [Application]) {
    applications.sort_by(|a, b| b.warning_count().cmp(&a.warning_count()));
}

/// Per-package manifest stored in an inventory directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppManifest {
    /// Stable package identifier
    pub package_id: String,

    /// Human readable label
    #[serde(default)]
    pub label: Option<String>,

    /// Whether the package is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether the package is a system component
    #[serde(default)]
    pub system: bool,

    /// Permissions currently granted to the package
    #[serde(default)]
    pub granted_permissions: Vec<PermissionId>,

    /// Icon bytes
    #[serde(default)]
    pub icon: Option<Vec<u8>>,
}

impl AppManifest {
    /// Create a manifest for an enabled, non-system package
    pub fn new(package_id: impl Into<String>) -> Self {
        Self {
            package_id: package_id.into(),
            label: None,
            enabled: true,
            system: false,
            granted_permissions: Vec::new(),
            icon: None,
        }
    }

    /// Add a granted permission
    pub fn grant(mut self, permission: impl Into<PermissionId>) -> Self {
        self.granted_permissions.push(permission.into());
        self
    }

    /// The listing entry for this manifest
    pub fn to_installed(&self) -> InstalledPackage {
        InstalledPackage {
            package_id: self.package_id.clone(),
            label: self.label.clone(),
            enabled: self.enabled,
            system: self.system,
        }
    }
}

/// Catalog of permission protection levels
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionCatalog {
    /// Format version
    #[serde(default = "default_version")]
    pub version: u32,

    /// Protection level per permission id
    #[serde(default)]
    pub permissions: BTreeMap<PermissionId, ProtectionLevel>,
}

impl PermissionCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            version: MANIFEST_VERSION,
            permissions: BTreeMap::new(),
        }
    }

    /// Declare a permission
    pub fn declare(mut self, permission: impl Into<PermissionId>, level: ProtectionLevel) -> Self {
        self.permissions.insert(permission.into(), level);
        self
    }

    /// Look up a protection level
    pub fn level(&self, permission: &str) -> Option<ProtectionLevel> {
        self.permissions.get(permission).copied()
    }
}

impl Default for PermissionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> u32 {
    1
}

fn default_version() -> u32 {
    MANIFEST_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_package_id() {
        let a = Application::new("com.example.a").with_name("A");
        let b = Application::new("com.example.a")
            .with_name("Other")
            .with_temporarily_ignored(true);
        assert_eq!(a, b);
        assert_ne!(a, Application::new("com.example.b"));
    }

    #[test]
    fn test_suppress_and_restore_keep_partitions_disjoint() {
        let mut app = Application::new("com.example.a")
            .with_warnable_permissions(vec!["CAMERA".into()])
            .with_nonwarnable_permissions(vec!["INTERNET".into()]);

        assert!(app.suppress("CAMERA"));
        assert!(!app.has_warnings());
        assert_eq!(app.nonwarnable_permissions, vec!["INTERNET", "CAMERA"]);
        assert!(!app.suppress("CAMERA"));

        assert!(app.restore("CAMERA"));
        assert_eq!(app.warnable_permissions, vec!["CAMERA"]);
        assert_eq!(app.nonwarnable_permissions, vec!["INTERNET"]);
        assert!(!app.restore("CAMERA"));
    }

    #[test]
    fn test_sort_by_warning_count() {
        let mut apps = vec![
            Application::new("one").with_warnable_permissions(vec!["A".into()]),
            Application::new("three")
                .with_warnable_permissions(vec!["A".into(), "B".into(), "C".into()]),
            Application::new("also-one").with_warnable_permissions(vec!["B".into()]),
        ];
        sort_by_warning_count(&mut apps);
        let ids: Vec<_> = apps.iter().map(|a| a.package_id.as_str()).collect();
        assert_eq!(ids, vec!["three", "one", "also-one"]);
    }

    #[test]
    fn test_display_name_falls_back_to_package_id() {
        assert_eq!(InstalledPackage::new("com.x").display_name(), "com.x");
        assert_eq!(InstalledPackage::new("com.x").label("  ").display_name(), "com.x");
        assert_eq!(InstalledPackage::new("com.x").label("X").display_name(), "X");
    }

    #[test]
    fn test_manifest_defaults() {
        let manifest: AppManifest =
            serde_json::from_str(r#"{"package_id": "com.example.a"}"#).unwrap();
        assert!(manifest.enabled);
        assert!(!manifest.system);
        assert!(manifest.granted_permissions.is_empty());
    }

    #[test]
    fn test_catalog_serialization() {
        let catalog = PermissionCatalog::new()
            .declare("CAMERA", ProtectionLevel::Dangerous)
            .declare("INTERNET", ProtectionLevel::Normal);

        let json = serde_json::to_string(&catalog).unwrap();
        assert!(json.contains("\"dangerous\""));

        let decoded: PermissionCatalog = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.level("CAMERA"), Some(ProtectionLevel::Dangerous));
        assert_eq!(decoded.level("MISSING"), None);
    }
}
