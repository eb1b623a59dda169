//! Application registry with ignore overlay and change notification
//!
//! Provides a thread-safe store of classified applications. Full rescans
//! replace the list wholesale; targeted ignore operations persist the rule
//! first, then patch the affected application in place. Observers are
//! notified after every lock has been released.
//!
//! Lock order is always `scan_lock` before `applications`. Targeted
//! mutations hold both, so a scan can never publish a result computed from
//! rules older than a mutation that committed while it ran.

use crate::audit::{AuditEvent, AuditEventType, AuditSink, ScanSummary};
use crate::config::RegistryConfig;
use crate::ignore::IgnoreRules;
use crate::observer::{ObserverId, ObserverList, RegistryEvent, RegistryObserver};
use crate::scan::{ScanEngine, ScanError};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use permwatch_api::Application;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Scan results older than this are considered stale
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// A thread-safe registry of applications holding dangerous permissions
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Authoritative list; every read-then-write section holds this lock
    applications: Mutex<Vec<Application>>,
    /// Serialises full scans against each other and against targeted
    /// mutations
    scan_lock: Mutex<()>,
    engine: Arc<ScanEngine>,
    rules: Arc<IgnoreRules>,
    audit: Arc<dyn AuditSink>,
    observers: ObserverList,
    status: ScanStatus,
}

struct ScanStatus {
    first_scan_done: AtomicBool,
    pending: AtomicUsize,
    last_scan_at: RwLock<Option<DateTime<Utc>>>,
    /// Number of finished scan attempts
    finished: watch::Sender<u64>,
}

/// Marks a scan as pending for as long as it lives
struct PendingScan<'a>(&'a ScanStatus);

impl<'a> PendingScan<'a> {
    fn begin(status: &'a ScanStatus) -> Self {
        status.pending.fetch_add(1, Ordering::SeqCst);
        Self(status)
    }
}

impl Drop for PendingScan<'_> {
    fn drop(&mut self) {
        self.0.first_scan_done.store(true, Ordering::SeqCst);
        self.0.pending.fetch_sub(1, Ordering::SeqCst);
        self.0.finished.send_modify(|n| *n += 1);
    }
}

impl Registry {
    /// Create a registry; no scan runs until [`Registry::start`] or
    /// [`Registry::rescan`] is called.
    pub fn new(config: RegistryConfig) -> Self {
        let rules = Arc::new(IgnoreRules::new(config.store));
        let engine = Arc::new(ScanEngine::new(config.source, rules.clone(), config.policy));
        let (finished, _) = watch::channel(0);

        Self {
            inner: Arc::new(RegistryInner {
                applications: Mutex::new(Vec::new()),
                scan_lock: Mutex::new(()),
                engine,
                rules,
                audit: config.audit,
                observers: ObserverList::new(),
                status: ScanStatus {
                    first_scan_done: AtomicBool::new(false),
                    pending: AtomicUsize::new(0),
                    last_scan_at: RwLock::new(None),
                    finished,
                },
            }),
        }
    }

    /// Spawn the initial scan in the background
    pub fn start(&self) -> JoinHandle<Result<Vec<Application>, RegistryError>> {
        let registry = self.clone();
        tokio::spawn(async move { registry.rescan().await })
    }

    /// Wait until the first scan attempt has finished
    pub async fn wait_until_ready(&self) {
        let mut finished = self.inner.status.finished.subscribe();
        // The sender lives in `self`, so the channel cannot close here
        let _ = finished.wait_for(|n| *n > 0).await;
    }

    /// True from construction until the first scan attempt ends, and while
    /// any later scan is queued or running.
    ///
    /// A first scan that fails or panics also ends the "in progress" state;
    /// the list then stays empty until a later scan succeeds.
    pub fn is_scan_in_progress(&self) -> bool {
        let status = &self.inner.status;
        !status.first_scan_done.load(Ordering::SeqCst) || status.pending.load(Ordering::SeqCst) > 0
    }

    /// Completion time of the last successful scan
    pub fn last_scan_at(&self) -> Option<DateTime<Utc>> {
        *self
            .inner
            .status
            .last_scan_at
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the last successful scan is older than `max_age` (or never ran)
    pub fn is_scan_stale(&self, max_age: Duration) -> bool {
        match (self.last_scan_at(), chrono::Duration::from_std(max_age)) {
            (None, _) => true,
            (Some(at), Ok(max_age)) => Utc::now() - at > max_age,
            (Some(_), Err(_)) => false,
        }
    }

    /// Copy of the current application list
    pub async fn snapshot(&self) -> Vec<Application> {
        self.inner.applications.lock().await.clone()
    }

    /// Look up an application by package id
    pub async fn by_package_id(&self, package_id: &str) -> Option<Application> {
        if package_id.is_empty() {
            return None;
        }
        let applications = self.inner.applications.lock().await;
        applications
            .iter()
            .find(|a| a.package_id == package_id)
            .cloned()
    }

    /// The persisted ignore rules
    pub fn ignore_rules(&self) -> &IgnoreRules {
        &self.inner.rules
    }

    /// Register an observer
    pub fn subscribe(&self, observer: Arc<dyn RegistryObserver>) -> ObserverId {
        self.inner.observers.subscribe(observer)
    }

    /// Remove an observer; returns false if it was not registered
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Run a full scan and replace the application list.
    ///
    /// Overlapping calls queue behind each other; each one runs to
    /// completion. On success every observer receives
    /// [`RegistryEvent::DatabaseUpdated`].
    pub async fn rescan(&self) -> Result<Vec<Application>, RegistryError> {
        let result = {
            let _pending = PendingScan::begin(&self.inner.status);
            let _serial = self.inner.scan_lock.lock().await;
            self.run_scan().await
        };

        match result {
            Ok(snapshot) => {
                self.inner
                    .observers
                    .notify(RegistryEvent::DatabaseUpdated(snapshot.clone()));
                Ok(snapshot)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Scan failed, keeping previous results");
                Err(e)
            }
        }
    }

    async fn run_scan(&self) -> Result<Vec<Application>, RegistryError> {
        let engine = self.inner.engine.clone();
        let report = tokio::task::spawn_blocking(move || engine.scan())
            .await
            .map_err(|e| RegistryError::ScanTask(e.to_string()))??;

        let summary = ScanSummary {
            applications: report.applications.len(),
            listed: report.listed,
            vanished: report.vanished.len(),
            elapsed_ms: report.elapsed_ms(),
        };

        let snapshot = {
            let mut applications = self.inner.applications.lock().await;
            *applications = report.applications;
            applications.clone()
        };

        *self
            .inner
            .status
            .last_scan_at
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        self.audit(AuditEvent::new(AuditEventType::ScanCompleted).with_scan(summary));

        Ok(snapshot)
    }

    /// Ignore a permission for every app, then rescan
    pub async fn ignore_global_permission(
        &self,
        permission: &str,
    ) -> Result<Vec<Application>, RegistryError> {
        let owned = permission.to_string();
        self.persist(move |rules| rules.add_global_ignore(&owned)).await?;
        tracing::info!(permission = %permission, "Permission ignored for all apps");
        self.audit(AuditEvent::new(AuditEventType::GlobalIgnoreAdded).with_permission(permission));
        self.rescan().await
    }

    /// Stop ignoring a permission for every app, then rescan
    pub async fn unignore_global_permission(
        &self,
        permission: &str,
    ) -> Result<Vec<Application>, RegistryError> {
        let owned = permission.to_string();
        self.persist(move |rules| rules.remove_global_ignore(&owned)).await?;
        tracing::info!(permission = %permission, "Permission no longer ignored for all apps");
        self.audit(AuditEvent::new(AuditEventType::GlobalIgnoreRemoved).with_permission(permission));
        self.rescan().await
    }

    /// Ignore one permission for one app.
    ///
    /// Returns `Ok(None)` without writing or notifying if the app is not in
    /// the list or the permission is not currently warnable for it.
    pub async fn ignore_app_permission(
        &self,
        package_id: &str,
        permission: &str,
    ) -> Result<Option<Application>, RegistryError> {
        let updated = {
            let _serial = self.inner.scan_lock.lock().await;
            let mut applications = self.inner.applications.lock().await;
            let Some(index) = applications.iter().position(|a| a.package_id == package_id) else {
                tracing::debug!(package = %package_id, "Ignore for unknown app, nothing to do");
                return Ok(None);
            };
            if !applications[index].is_warnable(permission) {
                tracing::debug!(package = %package_id, permission = %permission, "Permission not warnable, nothing to do");
                return Ok(None);
            }

            let (package, perm) = (package_id.to_string(), permission.to_string());
            self.persist(move |rules| rules.add_app_ignore(&package, &perm))
                .await?;
            let application = &mut applications[index];
            application.suppress(permission);
            application.clone()
        };

        tracing::info!(package = %package_id, permission = %permission, "Permission ignored for app");
        self.audit(
            AuditEvent::new(AuditEventType::AppIgnoreAdded)
                .with_package(package_id)
                .with_permission(permission),
        );
        self.inner
            .observers
            .notify(RegistryEvent::AppPermissionsUpdated(updated.clone()));
        Ok(Some(updated))
    }

    /// Stop ignoring one permission for one app.
    ///
    /// Returns `Ok(None)` without writing or notifying if the app is not in
    /// the list, the permission is already warnable, or the app was never
    /// granted it.
    pub async fn unignore_app_permission(
        &self,
        package_id: &str,
        permission: &str,
    ) -> Result<Option<Application>, RegistryError> {
        let updated = {
            let _serial = self.inner.scan_lock.lock().await;
            let mut applications = self.inner.applications.lock().await;
            let Some(index) = applications.iter().position(|a| a.package_id == package_id) else {
                tracing::debug!(package = %package_id, "Unignore for unknown app, nothing to do");
                return Ok(None);
            };
            let current = &applications[index];
            if current.is_warnable(permission) || !current.is_granted(permission) {
                tracing::debug!(package = %package_id, permission = %permission, "Permission not suppressed, nothing to do");
                return Ok(None);
            }

            let (package, perm) = (package_id.to_string(), permission.to_string());
            self.persist(move |rules| rules.remove_app_ignore(&package, &perm))
                .await?;
            let application = &mut applications[index];
            application.restore(permission);
            application.clone()
        };

        tracing::info!(package = %package_id, permission = %permission, "Permission warnings restored for app");
        self.audit(
            AuditEvent::new(AuditEventType::AppIgnoreRemoved)
                .with_package(package_id)
                .with_permission(permission),
        );
        self.inner
            .observers
            .notify(RegistryEvent::AppPermissionsUpdated(updated.clone()));
        Ok(Some(updated))
    }

    /// Put an app on the temporary ignore list.
    ///
    /// Returns `Ok(None)` without writing or notifying if the app is not in
    /// the current list.
    pub async fn add_to_ignore_list(
        &self,
        application: &Application,
    ) -> Result<Option<Application>, RegistryError> {
        let updated = self.set_temporarily_ignored(application, true).await?;
        if let Some(updated) = &updated {
            tracing::info!(package = %updated.package_id, "App added to ignore list");
            self.audit(
                AuditEvent::new(AuditEventType::AppTemporarilyIgnored)
                    .with_package(&updated.package_id),
            );
            self.inner
                .observers
                .notify(RegistryEvent::AppAddedToIgnoreList(updated.clone()));
        }
        Ok(updated)
    }

    /// Take an app off the temporary ignore list.
    ///
    /// Returns `Ok(None)` without writing or notifying if the app is not in
    /// the current list.
    pub async fn remove_from_ignore_list(
        &self,
        application: &Application,
    ) -> Result<Option<Application>, RegistryError> {
        let updated = self.set_temporarily_ignored(application, false).await?;
        if let Some(updated) = &updated {
            tracing::info!(package = %updated.package_id, "App removed from ignore list");
            self.audit(
                AuditEvent::new(AuditEventType::AppTemporaryIgnoreLifted)
                    .with_package(&updated.package_id),
            );
            self.inner
                .observers
                .notify(RegistryEvent::AppRemovedFromIgnoreList(updated.clone()));
        }
        Ok(updated)
    }

    async fn set_temporarily_ignored(
        &self,
        application: &Application,
        ignored: bool,
    ) -> Result<Option<Application>, RegistryError> {
        let _serial = self.inner.scan_lock.lock().await;
        let mut applications = self.inner.applications.lock().await;
        let Some(index) = applications.iter().position(|a| a == application) else {
            tracing::debug!(package = %application.package_id, "App not in registry, nothing to do");
            return Ok(None);
        };

        let package_id = application.package_id.clone();
        self.persist(move |rules| {
            if ignored {
                rules.add_temporary_ignore(&package_id)
            } else {
                rules.remove_temporary_ignore(&package_id)
            }
        })
        .await?;

        let updated = applications[index].clone().with_temporarily_ignored(ignored);
        applications[index] = updated.clone();
        Ok(Some(updated))
    }

    /// Run one rule write on the blocking pool; stores may fsync
    async fn persist<F>(&self, write: F) -> Result<bool, RegistryError>
    where
        F: FnOnce(&IgnoreRules) -> Result<bool, StoreError> + Send + 'static,
    {
        let rules = self.inner.rules.clone();
        let changed = tokio::task::spawn_blocking(move || write(&rules))
            .await
            .map_err(|e| RegistryError::StoreTask(e.to_string()))??;
        Ok(changed)
    }

    fn audit(&self, event: AuditEvent) {
        if let Err(e) = self.inner.audit.record(event) {
            tracing::warn!(error = %e, "Failed to record audit event");
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("scan_in_progress", &self.is_scan_in_progress())
            .field("observers", &self.inner.observers)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Ignore rule store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Scan task failed: {0}")]
    ScanTask(String),

    #[error("Store task failed: {0}")]
    StoreTask(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryPresets;
    use crate::audit::NullAuditSink;
    use crate::source::MemoryPackageSource;
    use crate::store::{KeyValueStore, MemoryKeyValueStore};
    use permwatch_api::{AppManifest, ProtectionLevel};
    use std::collections::BTreeSet;
    use std::time::Instant;

    /// Store whose writes take a while, like a disk flush
    struct SlowStore(MemoryKeyValueStore);

    impl KeyValueStore for SlowStore {
        fn get_string_set(&self, key: &str) -> Result<BTreeSet<String>, StoreError> {
            self.0.get_string_set(key)
        }

        fn put_string_set(&self, key: &str, values: &BTreeSet<String>) -> Result<(), StoreError> {
            std::thread::sleep(Duration::from_millis(300));
            self.0.put_string_set(key, values)
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            self.0.keys()
        }
    }

    fn registry() -> Registry {
        let source = MemoryPackageSource::new()
            .with_permission("CAMERA", ProtectionLevel::Dangerous)
            .with_permission("INTERNET", ProtectionLevel::Normal)
            .with_app(AppManifest::new("com.example.a").grant("CAMERA").grant("INTERNET"));
        Registry::new(RegistryPresets::testing(Arc::new(source)))
    }

    #[tokio::test]
    async fn test_in_progress_until_first_scan() {
        let registry = registry();
        assert!(registry.is_scan_in_progress());
        assert!(registry.snapshot().await.is_empty());
        assert!(registry.is_scan_stale(DEFAULT_STALE_AFTER));

        let apps = registry.start().await.unwrap().unwrap();
        assert_eq!(apps.len(), 1);
        assert!(!registry.is_scan_in_progress());
        assert!(registry.last_scan_at().is_some());
        assert!(!registry.is_scan_stale(DEFAULT_STALE_AFTER));
        assert!(registry.is_scan_stale(Duration::ZERO));
    }

    /// Store that cannot be read
    struct UnavailableStore;

    impl KeyValueStore for UnavailableStore {
        fn get_string_set(&self, _key: &str) -> Result<BTreeSet<String>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }

        fn put_string_set(&self, _key: &str, _values: &BTreeSet<String>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_first_scan_ends_in_progress() {
        let source = MemoryPackageSource::new()
            .with_permission("CAMERA", ProtectionLevel::Dangerous)
            .with_app(AppManifest::new("com.example.a").grant("CAMERA"));
        let registry = Registry::new(RegistryConfig::new(source, UnavailableStore, NullAuditSink));
        assert!(registry.is_scan_in_progress());

        let handle = registry.start();
        registry.wait_until_ready().await;
        assert!(matches!(handle.await.unwrap(), Err(RegistryError::Scan(_))));

        assert!(!registry.is_scan_in_progress());
        assert!(registry.snapshot().await.is_empty());
        assert!(registry.last_scan_at().is_none());
    }

    #[tokio::test]
    async fn test_wait_until_ready() {
        let registry = registry();
        let _handle = registry.start();
        registry.wait_until_ready().await;
        assert!(!registry.is_scan_in_progress());
        assert_eq!(registry.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_by_package_id() {
        let registry = registry();
        registry.rescan().await.unwrap();

        assert!(registry.by_package_id("com.example.a").await.is_some());
        assert!(registry.by_package_id("com.example.zzz").await.is_none());
        assert!(registry.by_package_id("").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_a_copy() {
        let registry = registry();
        registry.rescan().await.unwrap();

        let mut snapshot = registry.snapshot().await;
        snapshot[0].warnable_permissions.clear();
        assert_eq!(
            registry.snapshot().await[0].warnable_permissions,
            vec!["CAMERA"]
        );
    }

    #[tokio::test]
    async fn test_unignore_requires_granted_permission() {
        let registry = registry();
        registry.rescan().await.unwrap();

        let result = registry
            .unignore_app_permission("com.example.a", "LOCATION")
            .await
            .unwrap();
        assert!(result.is_none());
        assert!(!registry
            .by_package_id("com.example.a")
            .await
            .unwrap()
            .is_granted("LOCATION"));
    }

    #[tokio::test]
    async fn test_rule_writes_do_not_stall_the_runtime() {
        let source = MemoryPackageSource::new()
            .with_permission("CAMERA", ProtectionLevel::Dangerous)
            .with_app(AppManifest::new("com.example.a").grant("CAMERA"));
        let registry = Registry::new(RegistryConfig::new(
            source,
            SlowStore(MemoryKeyValueStore::new()),
            NullAuditSink,
        ));
        registry.rescan().await.unwrap();

        let ticker = tokio::spawn(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Instant::now()
        });
        let updated = registry
            .ignore_app_permission("com.example.a", "CAMERA")
            .await
            .unwrap()
            .unwrap();
        let done = Instant::now();

        assert!(!updated.is_warnable("CAMERA"));
        assert!(ticker.await.unwrap() < done);
    }
}
