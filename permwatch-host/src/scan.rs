//! Full inventory scan and classification
//!
//! Enumerates installed packages, drops the ones that are permanently out of
//! scope, and partitions each remaining package's granted permissions into
//! warnable and non-warnable using the classifier and the ignore rules.

use crate::classifier::PermissionClassifier;
use crate::ignore::IgnoreRules;
use crate::source::{PackageSource, SourceError};
use crate::store::StoreError;
use permwatch_api::{Application, InstalledPackage, PermissionId, RESERVED_VENDOR_PREFIX};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that abort a whole scan
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Failed to read ignore rules: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to list installed packages: {0}")]
    Source(#[from] SourceError),
}

/// Scan policy knobs
#[derive(Debug, Clone)]
pub struct ScanPolicy {
    /// Package id prefixes that are never scanned
    pub reserved_prefixes: Vec<String>,
    /// Threshold value stamped on every scanned application
    pub default_dangerous_threshold: u32,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            reserved_prefixes: vec![RESERVED_VENDOR_PREFIX.to_string()],
            default_dangerous_threshold: 1,
        }
    }
}

impl ScanPolicy {
    /// Why a listed package is out of scope, if it is
    pub fn exclusion(&self, package: &InstalledPackage) -> Option<Exclusion> {
        if !package.enabled {
            Some(Exclusion::Disabled)
        } else if package.system {
            Some(Exclusion::System)
        } else if self
            .reserved_prefixes
            .iter()
            .any(|prefix| package.package_id.starts_with(prefix.as_str()))
        {
            Some(Exclusion::ReservedNamespace)
        } else {
            None
        }
    }
}

/// Reason a package never enters the application list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    Disabled,
    System,
    ReservedNamespace,
}

/// Result of one scan
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Applications with at least one warnable permission
    pub applications: Vec<Application>,

    /// Packages returned by the listing
    pub listed: usize,

    /// Packages excluded as disabled, system or reserved
    pub excluded: usize,

    /// Packages dropped because nothing was warnable
    pub quiet: usize,

    /// Packages that vanished mid-scan (with errors)
    pub vanished: Vec<(String, SourceError)>,

    /// Granted permissions the source had no metadata for
    pub unknown_permissions: BTreeSet<PermissionId>,

    /// Wall time of the scan
    pub elapsed: Duration,
}

impl ScanReport {
    /// Wall time in milliseconds, saturating at `u64::MAX`
    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Builds the authoritative application list
pub struct ScanEngine {
    source: Arc<dyn PackageSource>,
    rules: Arc<IgnoreRules>,
    policy: ScanPolicy,
}

impl ScanEngine {
    pub fn new(source: Arc<dyn PackageSource>, rules: Arc<IgnoreRules>, policy: ScanPolicy) -> Self {
        Self {
            source,
            rules,
            policy,
        }
    }

    /// The active policy
    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Run one full scan.
    ///
    /// Blocks on the package source and the store; run it off the async
    /// executor.
    pub fn scan(&self) -> Result<ScanReport, ScanError> {
        let started = Instant::now();

        // One consistent view of the shared rule sets for the whole pass
        let temporary = self.rules.temporary_ignores()?;
        let global = self.rules.global_ignores()?;

        let packages = self.source.list_installed()?;
        let classifier = PermissionClassifier::new(self.source.as_ref());

        let mut report = ScanReport {
            listed: packages.len(),
            ..ScanReport::default()
        };

        for package in packages {
            if let Some(reason) = self.policy.exclusion(&package) {
                tracing::trace!(package = %package.package_id, ?reason, "Skipping package");
                report.excluded += 1;
                continue;
            }

            let application = match self.classify(&classifier, &package, &global, &temporary, &mut report) {
                Ok(application) => application,
                Err(ClassifyError::Store(e)) => return Err(e.into()),
                Err(ClassifyError::Source(e)) => {
                    tracing::warn!(package = %package.package_id, error = %e, "Package vanished during scan, skipping");
                    report.vanished.push((package.package_id, e));
                    continue;
                }
            };

            if !application.has_warnings() {
                tracing::debug!(package = %application.package_id, "No warnable permissions");
                report.quiet += 1;
                continue;
            }
            report.applications.push(application);
        }

        report.elapsed = started.elapsed();
        tracing::info!(
            listed = report.listed,
            applications = report.applications.len(),
            excluded = report.excluded,
            quiet = report.quiet,
            vanished = report.vanished.len(),
            elapsed_ms = report.elapsed_ms(),
            "Scan complete"
        );
        Ok(report)
    }

    fn classify(
        &self,
        classifier: &PermissionClassifier<'_>,
        package: &InstalledPackage,
        global: &BTreeSet<PermissionId>,
        temporary: &BTreeSet<String>,
        report: &mut ScanReport,
    ) -> Result<Application, ClassifyError> {
        let package_id = package.package_id.as_str();
        let granted = self.source.granted_permissions(package_id)?;
        let app_ignores = self.rules.app_ignores(package_id)?;

        let mut seen = BTreeSet::new();
        let mut warnable = Vec::new();
        let mut nonwarnable = Vec::new();

        for permission in granted {
            if !seen.insert(permission.clone()) {
                continue;
            }
            let dangerous = match classifier.is_dangerous(&permission) {
                Ok(dangerous) => dangerous,
                Err(SourceError::PackageNotFound(id)) => {
                    return Err(SourceError::PackageNotFound(id).into())
                }
                Err(e) => {
                    tracing::debug!(package = package_id, permission = %permission, error = %e, "Cannot classify permission, not warning on it");
                    report.unknown_permissions.insert(permission.clone());
                    false
                }
            };

            if dangerous && !global.contains(&permission) && !app_ignores.contains(&permission) {
                warnable.push(permission);
            } else {
                nonwarnable.push(permission);
            }
        }

        let icon = self.source.icon(package_id)?;

        Ok(Application::new(package_id)
            .with_name(package.display_name())
            .with_icon(icon)
            .with_warnable_permissions(warnable)
            .with_nonwarnable_permissions(nonwarnable)
            .with_temporarily_ignored(temporary.contains(package_id))
            .with_dangerous_threshold(self.policy.default_dangerous_threshold))
    }
}

impl std::fmt::Debug for ScanEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

enum ClassifyError {
    Store(StoreError),
    Source(SourceError),
}

impl From<StoreError> for ClassifyError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<SourceError> for ClassifyError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryPackageSource;
    use crate::store::MemoryKeyValueStore;
    use permwatch_api::{AppManifest, ProtectionLevel};

    fn catalog() -> MemoryPackageSource {
        MemoryPackageSource::new()
            .with_permission("CAMERA", ProtectionLevel::Dangerous)
            .with_permission("LOCATION", ProtectionLevel::Dangerous)
            .with_permission("INTERNET", ProtectionLevel::Normal)
    }

    fn engine(source: MemoryPackageSource) -> (Arc<IgnoreRules>, ScanEngine) {
        let rules = Arc::new(IgnoreRules::new(Arc::new(MemoryKeyValueStore::new())));
        let engine = ScanEngine::new(Arc::new(source), rules.clone(), ScanPolicy::default());
        (rules, engine)
    }

    fn ids(report: &ScanReport) -> Vec<&str> {
        report
            .applications
            .iter()
            .map(|a| a.package_id.as_str())
            .collect()
    }

    #[test]
    fn test_partitions_granted_permissions() {
        let (_, engine) = engine(
            catalog().with_app(AppManifest::new("com.example.a").grant("CAMERA").grant("INTERNET")),
        );

        let report = engine.scan().unwrap();
        assert_eq!(report.applications.len(), 1);
        let app = &report.applications[0];
        assert_eq!(app.warnable_permissions, vec!["CAMERA"]);
        assert_eq!(app.nonwarnable_permissions, vec!["INTERNET"]);
        assert!(!app.temporarily_ignored);
        assert_eq!(app.display_name, "com.example.a");
    }

    #[test]
    fn test_excludes_out_of_scope_packages() {
        let mut disabled = AppManifest::new("com.example.disabled").grant("CAMERA");
        disabled.enabled = false;
        let mut system = AppManifest::new("com.example.system").grant("CAMERA");
        system.system = true;

        let (_, engine) = engine(
            catalog()
                .with_app(disabled)
                .with_app(system)
                .with_app(AppManifest::new("com.android.settings").grant("CAMERA"))
                .with_app(AppManifest::new("com.example.user").grant("CAMERA")),
        );

        let report = engine.scan().unwrap();
        assert_eq!(ids(&report), vec!["com.example.user"]);
        assert_eq!(report.listed, 4);
        assert_eq!(report.excluded, 3);
    }

    #[test]
    fn test_drops_apps_without_warnings_even_if_temporarily_ignored() {
        let (rules, engine) = engine(
            catalog()
                .with_app(AppManifest::new("com.example.quiet").grant("INTERNET"))
                .with_app(AppManifest::new("com.example.loud").grant("LOCATION")),
        );
        rules.add_temporary_ignore("com.example.quiet").unwrap();
        rules.add_temporary_ignore("com.example.loud").unwrap();

        let report = engine.scan().unwrap();
        assert_eq!(ids(&report), vec!["com.example.loud"]);
        assert!(report.applications[0].temporarily_ignored);
        assert_eq!(report.quiet, 1);
    }

    #[test]
    fn test_applies_global_and_app_ignores() {
        let (rules, engine) = engine(
            catalog()
                .with_app(AppManifest::new("com.example.a").grant("CAMERA").grant("LOCATION"))
                .with_app(AppManifest::new("com.example.b").grant("CAMERA").grant("LOCATION")),
        );
        rules.add_global_ignore("LOCATION").unwrap();
        rules.add_app_ignore("com.example.b", "CAMERA").unwrap();

        let report = engine.scan().unwrap();
        assert_eq!(ids(&report), vec!["com.example.a"]);
        let app = &report.applications[0];
        assert_eq!(app.warnable_permissions, vec!["CAMERA"]);
        assert_eq!(app.nonwarnable_permissions, vec!["LOCATION"]);
    }

    #[test]
    fn test_unknown_permissions_are_not_warned_on() {
        let (_, engine) = engine(
            catalog().with_app(AppManifest::new("com.example.a").grant("CAMERA").grant("VENDOR_X")),
        );

        let report = engine.scan().unwrap();
        let app = &report.applications[0];
        assert_eq!(app.warnable_permissions, vec!["CAMERA"]);
        assert_eq!(app.nonwarnable_permissions, vec!["VENDOR_X"]);
        assert!(report.unknown_permissions.contains("VENDOR_X"));
    }

    #[test]
    fn test_vanished_package_is_skipped() {
        let source = catalog()
            .with_app(AppManifest::new("com.example.gone").grant("CAMERA"))
            .with_app(AppManifest::new("com.example.here").grant("CAMERA"));
        source.mark_vanishing("com.example.gone");
        let (_, engine) = engine(source);

        let report = engine.scan().unwrap();
        assert_eq!(ids(&report), vec!["com.example.here"]);
        assert_eq!(report.vanished.len(), 1);
        assert_eq!(report.vanished[0].0, "com.example.gone");
    }

    #[test]
    fn test_duplicate_grants_are_counted_once() {
        let (_, engine) = engine(
            catalog().with_app(AppManifest::new("com.example.a").grant("CAMERA").grant("CAMERA")),
        );
        let report = engine.scan().unwrap();
        assert_eq!(report.applications[0].warnable_permissions, vec!["CAMERA"]);
        assert!(report.applications[0].nonwarnable_permissions.is_empty());
    }

    #[test]
    fn test_policy_threshold_and_prefixes() {
        let rules = Arc::new(IgnoreRules::new(Arc::new(MemoryKeyValueStore::new())));
        let source = catalog()
            .with_app(AppManifest::new("org.vendor.tool").grant("CAMERA"))
            .with_app(AppManifest::new("com.android.camera").grant("CAMERA"));
        let policy = ScanPolicy {
            reserved_prefixes: vec!["org.vendor.".into()],
            default_dangerous_threshold: 3,
        };
        let engine = ScanEngine::new(Arc::new(source), rules, policy);

        let report = engine.scan().unwrap();
        assert_eq!(ids(&report), vec!["com.android.camera"]);
        assert_eq!(report.applications[0].dangerous_threshold, 3);
    }

    #[test]
    fn test_elapsed_ms_saturates() {
        let mut report = ScanReport {
            elapsed: Duration::from_millis(1500),
            ..ScanReport::default()
        };
        assert_eq!(report.elapsed_ms(), 1500);

        report.elapsed = Duration::MAX;
        assert_eq!(report.elapsed_ms(), u64::MAX);
    }
}
