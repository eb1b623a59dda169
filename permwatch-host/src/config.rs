//! Registry configuration and ready-made setups

use std::path::Path;
use std::sync::Arc;

use crate::audit::{AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
use crate::inventory::ManifestPackageSource;
use crate::scan::ScanPolicy;
use crate::source::PackageSource;
use crate::store::{default_store_path, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};

/// Collaborators and policy for one registry
pub struct RegistryConfig {
    /// Installed-package inventory
    pub source: Arc<dyn PackageSource>,
    /// Durable storage for ignore rules
    pub store: Arc<dyn KeyValueStore>,
    /// Audit sink
    pub audit: Arc<dyn AuditSink>,
    /// Scan policy
    pub policy: ScanPolicy,
}

impl std::fmt::Debug for RegistryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RegistryConfig {
    /// Create a configuration with custom components
    pub fn new(
        source: impl PackageSource + 'static,
        store: impl KeyValueStore + 'static,
        audit: impl AuditSink + 'static,
    ) -> Self {
        Self {
            source: Arc::new(source),
            store: Arc::new(store),
            audit: Arc::new(audit),
            policy: ScanPolicy::default(),
        }
    }
}

/// Builder for registry configurations
#[derive(Default)]
pub struct RegistryConfigBuilder {
    source: Option<Arc<dyn PackageSource>>,
    store: Option<Arc<dyn KeyValueStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    policy: ScanPolicy,
    app_name: Option<String>,
}

impl RegistryConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name (used for default paths)
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Set the package source
    pub fn source(mut self, source: impl PackageSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Set a shared package source
    pub fn shared_source(mut self, source: Arc<dyn PackageSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the key/value store
    pub fn store(mut self, store: impl KeyValueStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set a shared key/value store
    pub fn shared_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the audit sink
    pub fn audit(mut self, audit: impl AuditSink + 'static) -> Self {
        self.audit = Some(Arc::new(audit));
        self
    }

    /// Set a shared audit sink
    pub fn shared_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Set the scan policy
    pub fn policy(mut self, policy: ScanPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Add a reserved package id prefix to the policy
    pub fn reserve_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.policy.reserved_prefixes.push(prefix.into());
        self
    }

    /// Build the configuration
    ///
    /// Without an explicit store, ignore rules go to the default file for
    /// the app name. Without an audit sink, events are discarded.
    pub fn build(self) -> Result<RegistryConfig, PresetError> {
        let source = self.source.ok_or(PresetError::MissingSource)?;
        let app_name = self.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME);

        let store: Arc<dyn KeyValueStore> = match self.store {
            Some(s) => s,
            None => {
                let store = FileKeyValueStore::default_for_app(app_name)
                    .map_err(|e| PresetError::StoreInit(e.to_string()))?;
                Arc::new(store)
            }
        };

        Ok(RegistryConfig {
            source,
            store,
            audit: self.audit.unwrap_or_else(|| Arc::new(NullAuditSink)),
            policy: self.policy,
        })
    }
}

/// Application name used when none is configured
pub const DEFAULT_APP_NAME: &str = "permwatch";

/// Error type for configuration setup
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error("No package source configured")]
    MissingSource,

    #[error("Failed to initialize store: {0}")]
    StoreInit(String),

    #[error("Failed to initialize audit: {0}")]
    AuditInit(String),
}

// ============================================================================
// Preset Configurations
// ============================================================================

/// Preset configurations for common use cases
pub struct RegistryPresets;

impl RegistryPresets {
    /// Persistent desktop setup
    ///
    /// - Inventory directory package source
    /// - Ignore rules in `<config>/<app>/ignores.json`
    /// - JSONL audit log in `<config>/<app>/audit.jsonl`
    pub fn persistent(app_name: &str, inventory_dir: impl AsRef<Path>) -> Result<RegistryConfig, PresetError> {
        let store_path = default_store_path(app_name);
        let audit_path = store_path.with_file_name("audit.jsonl");
        Self::persistent_at(inventory_dir, store_path, audit_path)
    }

    /// Persistent setup with explicit file locations
    pub fn persistent_at(
        inventory_dir: impl AsRef<Path>,
        store_path: impl AsRef<Path>,
        audit_path: impl AsRef<Path>,
    ) -> Result<RegistryConfig, PresetError> {
        let store = FileKeyValueStore::new(store_path)
            .map_err(|e| PresetError::StoreInit(e.to_string()))?;
        let audit =
            FileAuditSink::new(audit_path).map_err(|e| PresetError::AuditInit(e.to_string()))?;

        Ok(RegistryConfig::new(
            ManifestPackageSource::new(inventory_dir),
            store,
            audit,
        ))
    }

    /// Testing setup
    ///
    /// - Given package source
    /// - In-memory ignore rules
    /// - In-memory audit log
    pub fn testing(source: Arc<dyn PackageSource>) -> RegistryConfig {
        RegistryConfig {
            source,
            store: Arc::new(MemoryKeyValueStore::new()),
            audit: Arc::new(MemoryAuditSink::new()),
            policy: ScanPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemoryPackageSource;

    #[test]
    fn test_builder_requires_source() {
        let result = RegistryConfigBuilder::new()
            .store(MemoryKeyValueStore::new())
            .build();
        assert!(matches!(result, Err(PresetError::MissingSource)));
    }

    #[test]
    fn test_builder_with_components() {
        let config = RegistryConfigBuilder::new()
            .source(MemoryPackageSource::new())
            .store(MemoryKeyValueStore::new())
            .reserve_prefix("com.vendor.")
            .build()
            .unwrap();

        assert_eq!(
            config.policy.reserved_prefixes,
            vec!["com.android.".to_string(), "com.vendor.".to_string()]
        );
    }

    #[test]
    fn test_persistent_at() {
        let dir = tempfile::tempdir().unwrap();
        let config = RegistryPresets::persistent_at(
            dir.path().join("inventory"),
            dir.path().join("state").join("ignores.json"),
            dir.path().join("state").join("audit.jsonl"),
        )
        .unwrap();

        assert!(dir.path().join("state").join("audit.jsonl").exists());
        assert!(config.store.keys().unwrap().is_empty());
    }
}
