//! Inventory directory package source
//!
//! Reads installed packages from a directory of JSON manifests:
//!
//! ```text
//! <root>/permissions.json      PermissionCatalog
//! <root>/apps/<package>.json   AppManifest, one per package
//! ```
//!
//! Files are re-read on every query so that edits (for example from a device
//! sync job) show up on the next scan.

use crate::source::{PackageSource, SourceError};
use permwatch_api::{AppManifest, InstalledPackage, PermissionCatalog, PermissionId, ProtectionLevel};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::SystemTime;

/// Catalog file name inside an inventory root
pub const CATALOG_FILE: &str = "permissions.json";

/// Manifest directory name inside an inventory root
pub const APPS_DIR: &str = "apps";

/// Result of reading every manifest in an inventory
#[derive(Debug, Default)]
pub struct ManifestListing {
    /// Manifests that parsed successfully
    pub manifests: Vec<AppManifest>,

    /// Manifests that failed to load (with errors)
    pub failures: Vec<(PathBuf, SourceError)>,
}

impl ManifestListing {
    /// Returns true if every manifest loaded
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Total number of manifest files found
    pub fn total_found(&self) -> usize {
        self.manifests.len() + self.failures.len()
    }
}

struct CachedCatalog {
    modified: Option<SystemTime>,
    catalog: PermissionCatalog,
}

/// Package source backed by an inventory directory
pub struct ManifestPackageSource {
    root: PathBuf,
    catalog: RwLock<Option<CachedCatalog>>,
}

impl ManifestPackageSource {
    /// Open an inventory rooted at `root`
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            catalog: RwLock::new(None),
        }
    }

    /// Inventory root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding per-package manifests
    pub fn apps_dir(&self) -> PathBuf {
        self.root.join(APPS_DIR)
    }

    /// Manifest path for a package
    pub fn manifest_path(&self, package_id: &str) -> PathBuf {
        self.apps_dir().join(format!("{}.json", package_id))
    }

    /// Read every manifest, collecting per-file failures
    pub fn read_manifests(&self) -> Result<ManifestListing, SourceError> {
        let dir = self.apps_dir();
        if !dir.is_dir() {
            return Err(SourceError::Unavailable(format!(
                "inventory directory not found: {}",
                dir.display()
            )));
        }

        let entries = fs::read_dir(&dir).map_err(|e| {
            SourceError::Unavailable(format!("failed to read {}: {}", dir.display(), e))
        })?;

        let mut listing = ManifestListing::default();
        let mut paths = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => paths.push(entry.path()),
                Err(e) => listing.failures.push((
                    dir.clone(),
                    SourceError::Manifest {
                        path: dir.clone(),
                        reason: e.to_string(),
                    },
                )),
            }
        }
        // read_dir order is platform dependent
        paths.sort();

        for path in paths {
            if !is_manifest_file(&path) {
                continue;
            }
            match read_manifest(&path) {
                Ok(manifest) if file_stem(&path) == Some(manifest.package_id.as_str()) => {
                    listing.manifests.push(manifest)
                }
                Ok(manifest) => {
                    let reason = format!(
                        "package id '{}' does not match file name",
                        manifest.package_id
                    );
                    listing
                        .failures
                        .push((path.clone(), SourceError::Manifest { path, reason }));
                }
                Err(e) => listing.failures.push((path, e)),
            }
        }

        Ok(listing)
    }

    /// Write (or overwrite) a package manifest
    pub fn write_manifest(&self, manifest: &AppManifest) -> Result<(), SourceError> {
        let path = self.manifest_path(&manifest.package_id);
        write_json(&path, manifest)
    }

    /// Delete a package manifest, as if the package was uninstalled
    pub fn remove_manifest(&self, package_id: &str) -> Result<bool, SourceError> {
        let path = self.manifest_path(package_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SourceError::Manifest {
                path,
                reason: e.to_string(),
            }),
        }
    }

    /// Write the permission catalog
    pub fn write_catalog(&self, catalog: &PermissionCatalog) -> Result<(), SourceError> {
        write_json(&self.root.join(CATALOG_FILE), catalog)
    }

    fn manifest(&self, package_id: &str) -> Result<AppManifest, SourceError> {
        let path = self.manifest_path(package_id);
        if !path.is_file() {
            return Err(SourceError::PackageNotFound(package_id.to_string()));
        }
        read_manifest(&path)
    }

    fn load_catalog(&self) -> Result<PermissionCatalog, SourceError> {
        let path = self.root.join(CATALOG_FILE);
        let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();

        {
            let cached = self.catalog.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = cached.as_ref() {
                if cached.modified.is_some() && cached.modified == modified {
                    return Ok(cached.catalog.clone());
                }
            }
        }

        let catalog = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|e| SourceError::Manifest {
                path: path.clone(),
                reason: e.to_string(),
            })?;
            serde_json::from_str(&content).map_err(|e| SourceError::Manifest {
                path: path.clone(),
                reason: e.to_string(),
            })?
        } else {
            tracing::debug!(path = %path.display(), "No permission catalog, all permissions unknown");
            PermissionCatalog::new()
        };

        let mut cached = self.catalog.write().unwrap_or_else(PoisonError::into_inner);
        *cached = Some(CachedCatalog {
            modified,
            catalog: catalog.clone(),
        });
        Ok(catalog)
    }
}

impl PackageSource for ManifestPackageSource {
    fn list_installed(&self) -> Result<Vec<InstalledPackage>, SourceError> {
        let listing = self.read_manifests()?;
        for (path, error) in &listing.failures {
            tracing::warn!(path = %path.display(), error = %error, "Skipping unreadable manifest");
        }
        Ok(listing.manifests.iter().map(AppManifest::to_installed).collect())
    }

    fn granted_permissions(&self, package_id: &str) -> Result<Vec<PermissionId>, SourceError> {
        Ok(self.manifest(package_id)?.granted_permissions)
    }

    fn protection_level(&self, permission: &str) -> Result<ProtectionLevel, SourceError> {
        self.load_catalog()?
            .level(permission)
            .ok_or_else(|| SourceError::UnknownPermission(permission.to_string()))
    }

    fn icon(&self, package_id: &str) -> Result<Vec<u8>, SourceError> {
        Ok(self.manifest(package_id)?.icon.unwrap_or_default())
    }
}

impl std::fmt::Debug for ManifestPackageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestPackageSource")
            .field("root", &self.root)
            .finish()
    }
}

/// Default inventory directory for an application
pub fn default_inventory_dir(app_name: &str) -> PathBuf {
    match dirs::data_local_dir() {
        Some(data_dir) => data_dir.join(app_name).join("inventory"),
        None => PathBuf::from("inventory"),
    }
}

/// Whether a path looks like a manifest file
pub fn is_manifest_file(path: &Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

fn file_stem(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

fn read_manifest(path: &Path) -> Result<AppManifest, SourceError> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            // Deleted between the existence check and the read
            SourceError::PackageNotFound(file_stem(path).unwrap_or_default().to_string())
        } else {
            SourceError::Manifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    })?;
    serde_json::from_str(&content).map_err(|e| SourceError::Manifest {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn write_json(path: &Path, value: &impl serde::Serialize) -> Result<(), SourceError> {
    let to_error = |reason: String| SourceError::Manifest {
        path: path.to_path_buf(),
        reason,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| to_error(e.to_string()))?;
    }
    let json = serde_json::to_string_pretty(value).map_err(|e| to_error(e.to_string()))?;
    fs::write(path, json).map_err(|e| to_error(e.to_string()))
}
