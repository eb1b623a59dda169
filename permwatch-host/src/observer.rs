//! Registry change notification
//!
//! Observers receive one call per triggering mutation. Calls happen on
//! whatever thread or task performed the mutation, after the registry has
//! released its locks, so an observer may call back into the registry.
//! Observers that need a particular execution context must hand the event
//! off themselves, for example through [`ChannelObserver`].

use permwatch_api::Application;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;

/// Events emitted by the registry
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    /// A full rescan replaced the application list
    DatabaseUpdated(Vec<Application>),
    /// A per-app permission was ignored or unignored
    AppPermissionsUpdated(Application),
    /// An app was added to the temporary ignore list
    AppAddedToIgnoreList(Application),
    /// An app was removed from the temporary ignore list
    AppRemovedFromIgnoreList(Application),
}

impl RegistryEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseUpdated(_) => "database_updated",
            Self::AppPermissionsUpdated(_) => "app_permissions_updated",
            Self::AppAddedToIgnoreList(_) => "app_added_to_ignore_list",
            Self::AppRemovedFromIgnoreList(_) => "app_removed_from_ignore_list",
        }
    }

    /// The single application carried by a targeted event
    pub fn application(&self) -> Option<&Application> {
        match self {
            Self::DatabaseUpdated(_) => None,
            Self::AppPermissionsUpdated(app)
            | Self::AppAddedToIgnoreList(app)
            | Self::AppRemovedFromIgnoreList(app) => Some(app),
        }
    }
}

/// Trait for registry observers
///
/// Every method has an empty default, so implementors only override the
/// events they care about. Each call receives its own copy of the payload.
///
/// # Example
///
/// ```rust
/// use permwatch_host::observer::RegistryObserver;
/// use permwatch_api::Application;
///
/// struct BadgeCounter;
///
/// impl RegistryObserver for BadgeCounter {
///     fn database_updated(&self, applications: Vec<Application>) {
///         println!("{} apps need attention", applications.len());
///     }
/// }
/// ```
pub trait RegistryObserver: Send + Sync {
    fn database_updated(&self, applications: Vec<Application>) {
        let _ = applications;
    }

    fn app_permissions_updated(&self, application: Application) {
        let _ = application;
    }

    fn app_added_to_ignore_list(&self, application: Application) {
        let _ = application;
    }

    fn app_removed_from_ignore_list(&self, application: Application) {
        let _ = application;
    }
}

/// Deliver one event to one observer
pub fn deliver(observer: &dyn RegistryObserver, event: RegistryEvent) {
    match event {
        RegistryEvent::DatabaseUpdated(apps) => observer.database_updated(apps),
        RegistryEvent::AppPermissionsUpdated(app) => observer.app_permissions_updated(app),
        RegistryEvent::AppAddedToIgnoreList(app) => observer.app_added_to_ignore_list(app),
        RegistryEvent::AppRemovedFromIgnoreList(app) => observer.app_removed_from_ignore_list(app),
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Set of subscribed observers
#[derive(Default)]
pub struct ObserverList {
    next_id: AtomicU64,
    observers: RwLock<Vec<(ObserverId, Arc<dyn RegistryObserver>)>>,
}

impl ObserverList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, observer: Arc<dyn RegistryObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every observer subscribed at the time of the call.
    ///
    /// The list lock is released before any observer runs.
    pub fn notify(&self, event: RegistryEvent) {
        let observers: Vec<Arc<dyn RegistryObserver>> = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        tracing::trace!(event = event.kind(), observers = observers.len(), "Dispatching event");

        for observer in observers {
            deliver(observer.as_ref(), event.clone());
        }
    }
}

impl std::fmt::Debug for ObserverList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverList")
            .field("count", &self.len())
            .finish()
    }
}

/// Observer that forwards events into a tokio channel
///
/// Lets a consumer process events on its own task instead of the mutating
/// caller's.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: mpsc::UnboundedSender<RegistryEvent>,
}

impl ChannelObserver {
    /// Create an observer and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RegistryEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn forward(&self, event: RegistryEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }
}

impl RegistryObserver for ChannelObserver {
    fn database_updated(&self, applications: Vec<Application>) {
        self.forward(RegistryEvent::DatabaseUpdated(applications));
    }

    fn app_permissions_updated(&self, application: Application) {
        self.forward(RegistryEvent::AppPermissionsUpdated(application));
    }

    fn app_added_to_ignore_list(&self, application: Application) {
        self.forward(RegistryEvent::AppAddedToIgnoreList(application));
    }

    fn app_removed_from_ignore_list(&self, application: Application) {
        self.forward(RegistryEvent::AppRemovedFromIgnoreList(application));
    }
}
