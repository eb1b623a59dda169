//! permwatch-host: dangerous-permission registry runtime
//!
//! This crate scans an installed-package inventory, classifies each app's
//! granted permissions, overlays user ignore rules and notifies observers
//! when the resulting application list changes.

pub mod audit;
pub mod classifier;
pub mod config;
pub mod ignore;
pub mod inventory;
pub mod observer;
pub mod registry;
pub mod scan;
pub mod source;
pub mod store;
pub mod view;
pub mod watcher;

pub use audit::{
    AuditError, AuditEvent, AuditEventType, AuditSink, FileAuditSink, MemoryAuditSink,
    NullAuditSink, ScanSummary,
};
pub use classifier::PermissionClassifier;
pub use config::{PresetError, RegistryConfig, RegistryConfigBuilder, RegistryPresets};
pub use ignore::{IgnoreRuleSet, IgnoreRules};
pub use inventory::{default_inventory_dir, ManifestListing, ManifestPackageSource};
pub use observer::{ChannelObserver, ObserverId, RegistryEvent, RegistryObserver};
pub use registry::{Registry, RegistryError, DEFAULT_STALE_AFTER};
pub use scan::{Exclusion, ScanEngine, ScanError, ScanPolicy, ScanReport};
pub use source::{MemoryPackageSource, PackageSource, SourceError};
pub use store::{
    FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, ReadOnlyKeyValueStore, StoreError,
};
pub use view::ApplicationView;
pub use watcher::{InventoryWatcher, WatcherConfig, WatcherError, DEFAULT_RESCAN_INTERVAL};

pub use permwatch_api::{
    sort_by_warning_count, AppManifest, Application, InstalledPackage, PermissionCatalog,
    PermissionId, ProtectionLevel,
};
