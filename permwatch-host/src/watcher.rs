//! Inventory watcher
//!
//! Watches an inventory directory for manifest changes and rescans the
//! registry once things settle. An optional interval rescans periodically
//! even when nothing on disk changed.

use crate::inventory::is_manifest_file;
use crate::registry::{Registry, RegistryError};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Suggested period for interval rescans
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Configuration for the inventory watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period after the last file event before rescanning
    pub debounce: Duration,
    /// Periodic rescan, independent of file events
    pub rescan_interval: Option<Duration>,
    /// Whether to scan once before watching
    pub scan_on_start: bool,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            rescan_interval: None,
            scan_on_start: true,
        }
    }
}

/// Rescans a registry when its inventory directory changes
pub struct InventoryWatcher {
    registry: Registry,
    root: PathBuf,
    _watcher: RecommendedWatcher,
    shutdown_tx: mpsc::Sender<()>,
}

impl InventoryWatcher {
    /// Start watching `root` on behalf of `registry`
    pub async fn new(
        registry: Registry,
        root: impl AsRef<Path>,
        config: WatcherConfig,
    ) -> Result<Self, WatcherError> {
        let root = root.as_ref().to_path_buf();

        if config.scan_on_start {
            registry.rescan().await?;
        }

        let (event_tx, mut event_rx) = mpsc::channel::<Event>(100);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                // A full channel already means a rescan is pending
                Ok(event) => {
                    let _ = event_tx.try_send(event);
                }
                Err(e) => tracing::warn!(error = %e, "Inventory watch error"),
            }
        })
        .map_err(WatcherError::WatcherInit)?;

        if root.exists() {
            watcher
                .watch(&root, RecursiveMode::Recursive)
                .map_err(WatcherError::WatcherInit)?;
            tracing::info!(dir = %root.display(), "Watching inventory");
        } else {
            tracing::warn!(dir = %root.display(), "Inventory directory does not exist, not watching");
        }

        let task_registry = registry.clone();
        let debounce = config.debounce;
        let mut ticker = config.rescan_interval.map(|period| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });

        tokio::spawn(async move {
            let mut debounce_timer: Option<Instant> = None;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Inventory watcher shutting down");
                        break;
                    }

                    Some(event) = event_rx.recv() => {
                        if event.paths.iter().any(|p| is_manifest_file(p)) {
                            debounce_timer = Some(Instant::now() + debounce);
                        }
                    }

                    _ = async {
                        match debounce_timer {
                            Some(deadline) => tokio::time::sleep_until(deadline).await,
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        if task_registry.is_scan_in_progress() {
                            tracing::debug!("Scan already running, deferring inventory rescan");
                            debounce_timer = Some(Instant::now() + debounce);
                        } else {
                            debounce_timer = None;
                            Self::rescan(&task_registry, "inventory changed").await;
                        }
                    }

                    _ = async {
                        match ticker.as_mut() {
                            Some(ticker) => { ticker.tick().await; }
                            None => std::future::pending::<()>().await,
                        }
                    } => {
                        if task_registry.is_scan_in_progress() {
                            tracing::debug!("Scan already running, skipping interval rescan");
                        } else {
                            Self::rescan(&task_registry, "interval").await;
                        }
                    }
                }
            }
        });

        Ok(Self {
            registry,
            root,
            _watcher: watcher,
            shutdown_tx,
        })
    }

    async fn rescan(registry: &Registry, reason: &'static str) {
        match registry.rescan().await {
            Ok(apps) => tracing::info!(reason, applications = apps.len(), "Registry rescanned"),
            Err(e) => tracing::warn!(reason, error = %e, "Rescan failed"),
        }
    }

    /// Get a reference to the watched registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The watched inventory directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shutdown the watcher
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// Errors that can occur during watching
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Failed to initialize watcher: {0}")]
    WatcherInit(#[source] notify::Error),

    #[error("Initial scan failed: {0}")]
    Registry(#[from] RegistryError),
}
