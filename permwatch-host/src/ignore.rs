//! Persisted ignore rules
//!
//! Three independent suppression rule sets live in the key/value store:
//!
//! - global: permissions suppressed for every app
//! - per-app: permissions suppressed for one package
//! - temporary: packages whose warnings are suppressed wholesale
//!
//! Every mutation is a read-modify-write of the full stored set. Writes to
//! each rule set are serialised by their own lock so concurrent callers
//! never lose an update.

use crate::store::{KeyValueStore, StoreError};
use permwatch_api::PermissionId;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, PoisonError};

/// Store key of the global permission ignore set
pub const GLOBAL_IGNORES_KEY: &str = "ignored_permissions";

/// Store key of the temporary app ignore set
pub const TEMPORARY_IGNORES_KEY: &str = "ignored_apps";

/// Store key prefix of per-app permission ignore sets
pub const APP_IGNORES_KEY_PREFIX: &str = "app_ignores:";

/// Store key for one package's ignore set
pub fn app_ignores_key(package_id: &str) -> String {
    format!("{}{}", APP_IGNORES_KEY_PREFIX, package_id)
}

/// All persisted rules at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IgnoreRuleSet {
    pub global_permission_ignores: BTreeSet<PermissionId>,
    pub per_app_permission_ignores: BTreeMap<String, BTreeSet<PermissionId>>,
    pub temporary_app_ignores: BTreeSet<String>,
}

impl IgnoreRuleSet {
    /// Whether no rule is set
    pub fn is_empty(&self) -> bool {
        self.global_permission_ignores.is_empty()
            && self.per_app_permission_ignores.is_empty()
            && self.temporary_app_ignores.is_empty()
    }
}

/// Read/write access to the persisted ignore rules
pub struct IgnoreRules {
    store: Arc<dyn KeyValueStore>,
    global_lock: Mutex<()>,
    app_lock: Mutex<()>,
    temporary_lock: Mutex<()>,
}

impl IgnoreRules {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            global_lock: Mutex::new(()),
            app_lock: Mutex::new(()),
            temporary_lock: Mutex::new(()),
        }
    }

    /// Permissions ignored for every app
    pub fn global_ignores(&self) -> Result<BTreeSet<PermissionId>, StoreError> {
        self.store.get_string_set(GLOBAL_IGNORES_KEY)
    }

    /// Permissions ignored for one app
    pub fn app_ignores(&self, package_id: &str) -> Result<BTreeSet<PermissionId>, StoreError> {
        self.store.get_string_set(&app_ignores_key(package_id))
    }

    /// Packages ignored wholesale
    pub fn temporary_ignores(&self) -> Result<BTreeSet<String>, StoreError> {
        self.store.get_string_set(TEMPORARY_IGNORES_KEY)
    }

    pub fn add_global_ignore(&self, permission: &str) -> Result<bool, StoreError> {
        let _guard = lock(&self.global_lock);
        self.update(GLOBAL_IGNORES_KEY, |set| set.insert(permission.to_string()))
    }

    pub fn remove_global_ignore(&self, permission: &str) -> Result<bool, StoreError> {
        let _guard = lock(&self.global_lock);
        self.update(GLOBAL_IGNORES_KEY, |set| set.remove(permission))
    }

    pub fn add_app_ignore(&self, package_id: &str, permission: &str) -> Result<bool, StoreError> {
        let _guard = lock(&self.app_lock);
        self.update(&app_ignores_key(package_id), |set| {
            set.insert(permission.to_string())
        })
    }

    pub fn remove_app_ignore(&self, package_id: &str, permission: &str) -> Result<bool, StoreError> {
        let _guard = lock(&self.app_lock);
        self.update(&app_ignores_key(package_id), |set| set.remove(permission))
    }

    pub fn add_temporary_ignore(&self, package_id: &str) -> Result<bool, StoreError> {
        let _guard = lock(&self.temporary_lock);
        self.update(TEMPORARY_IGNORES_KEY, |set| set.insert(package_id.to_string()))
    }

    pub fn remove_temporary_ignore(&self, package_id: &str) -> Result<bool, StoreError> {
        let _guard = lock(&self.temporary_lock);
        self.update(TEMPORARY_IGNORES_KEY, |set| set.remove(package_id))
    }

    /// Read every persisted rule
    pub fn rule_set(&self) -> Result<IgnoreRuleSet, StoreError> {
        let mut per_app = BTreeMap::new();
        for key in self.store.keys()? {
            if let Some(package_id) = key.strip_prefix(APP_IGNORES_KEY_PREFIX) {
                let set = self.store.get_string_set(&key)?;
                if !set.is_empty() {
                    per_app.insert(package_id.to_string(), set);
                }
            }
        }

        Ok(IgnoreRuleSet {
            global_permission_ignores: self.global_ignores()?,
            per_app_permission_ignores: per_app,
            temporary_app_ignores: self.temporary_ignores()?,
        })
    }

    /// Read-modify-write one set; writes only when `apply` reports a change.
    fn update(
        &self,
        key: &str,
        apply: impl FnOnce(&mut BTreeSet<String>) -> bool,
    ) -> Result<bool, StoreError> {
        let mut set = self.store.get_string_set(key)?;
        if !apply(&mut set) {
            return Ok(false);
        }
        self.store.put_string_set(key, &set)?;
        Ok(true)
    }
}

impl std::fmt::Debug for IgnoreRules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IgnoreRules").finish_non_exhaustive()
    }
}

fn lock(mutex: &Mutex<()>) -> std::sync::MutexGuard<'_, ()> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryKeyValueStore, ReadOnlyKeyValueStore};
    use std::thread;

    fn rules() -> (Arc<MemoryKeyValueStore>, IgnoreRules) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let rules = IgnoreRules::new(store.clone());
        (store, rules)
    }

    #[test]
    fn test_empty_by_default() {
        let (_, rules) = rules();
        assert!(rules.global_ignores().unwrap().is_empty());
        assert!(rules.app_ignores("com.example.a").unwrap().is_empty());
        assert!(rules.temporary_ignores().unwrap().is_empty());
        assert!(rules.rule_set().unwrap().is_empty());
    }

    #[test]
    fn test_rule_sets_are_independent() {
        let (store, rules) = rules();
        assert!(rules.add_global_ignore("CAMERA").unwrap());
        assert!(rules.add_app_ignore("com.example.a", "MIC").unwrap());
        assert!(rules.add_temporary_ignore("com.example.b").unwrap());

        assert_eq!(
            store.get_string_set(GLOBAL_IGNORES_KEY).unwrap(),
            BTreeSet::from(["CAMERA".to_string()])
        );
        assert_eq!(
            store.get_string_set("app_ignores:com.example.a").unwrap(),
            BTreeSet::from(["MIC".to_string()])
        );
        assert!(rules.app_ignores("com.example.b").unwrap().is_empty());

        let set = rules.rule_set().unwrap();
        assert_eq!(set.per_app_permission_ignores.len(), 1);
        assert!(set.temporary_app_ignores.contains("com.example.b"));
    }

    #[test]
    fn test_add_and_remove_report_changes() {
        let (_, rules) = rules();
        assert!(rules.add_global_ignore("CAMERA").unwrap());
        assert!(!rules.add_global_ignore("CAMERA").unwrap());
        assert!(rules.remove_global_ignore("CAMERA").unwrap());
        assert!(!rules.remove_global_ignore("CAMERA").unwrap());

        assert!(rules.add_temporary_ignore("com.example.a").unwrap());
        assert!(rules.remove_temporary_ignore("com.example.a").unwrap());
        assert!(!rules.remove_app_ignore("com.example.a", "MIC").unwrap());
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_updates() {
        let (_, rules) = rules();
        let rules = Arc::new(rules);

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rules = rules.clone();
                thread::spawn(move || {
                    for j in 0..25 {
                        rules.add_global_ignore(&format!("P{}-{}", i, j)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(rules.global_ignores().unwrap().len(), 200);
    }

    #[test]
    fn test_store_failure_propagates() {
        let rules = IgnoreRules::new(Arc::new(ReadOnlyKeyValueStore::new(
            MemoryKeyValueStore::new(),
        )));
        assert!(matches!(
            rules.add_app_ignore("com.example.a", "CAMERA"),
            Err(StoreError::ReadOnly)
        ));
        // Nothing to remove, so nothing is written
        assert!(!rules.remove_app_ignore("com.example.a", "CAMERA").unwrap());
    }
}
