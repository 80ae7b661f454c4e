//! Service facade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (converter,
//! delivery channel, filesystem watch) and the state store into a running
//! pipeline. Desktop hosts typically enable the `desktop-shims` feature
//! (which depends on `bridge-desktop`) and call [`bootstrap_desktop`].

pub mod error;

pub use error::{Result, ServiceError};

use std::path::Path;
use std::sync::Arc;

use bridge_traits::{convert::DocumentConverter, delivery::DeliveryClient, watch::WatchProvider};
use core_runtime::events::{CoreEvent, EventBus, Receiver};
use core_runtime::logging::redact_if_sensitive;
use core_runtime::SyncConfig;
use core_store::db::{create_pool, DatabaseConfig};
use core_store::{now_millis, CleanupReport, Priority, SqliteStateStore, StateStore};
use core_sync::{
    ChangeDetector, EnqueueOutcome, HealthSnapshot, HealthStatus, PathFilter, Scheduler,
    SchedulerDeps, StatsReporter,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[cfg(feature = "desktop-shims")]
use bridge_desktop::{CommandConverter, NotifyWatchProvider, SpoolDelivery};
#[cfg(feature = "desktop-shims")]
use core_runtime::logging::{init_logging, LoggingConfig};

/// Aggregated handle to the bridge dependencies the pipeline requires.
pub struct SyncDependencies {
    pub converter: Arc<dyn DocumentConverter>,
    pub delivery: Arc<dyn DeliveryClient>,
    pub watcher: Arc<dyn WatchProvider>,
    /// Opened from `SyncConfig::database_path` when not supplied
    pub store: Option<Arc<dyn StateStore>>,
}

impl SyncDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        converter: Arc<dyn DocumentConverter>,
        delivery: Arc<dyn DeliveryClient>,
        watcher: Arc<dyn WatchProvider>,
    ) -> Self {
        Self {
            converter,
            delivery,
            watcher,
            store: None,
        }
    }

    /// Use an already opened store instead of the configured database file.
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Desktop defaults: pandoc, the platform outbox and a native watch.
    ///
    /// # Errors
    ///
    /// Fails when the platform has no data directory for the outbox.
    #[cfg(feature = "desktop-shims")]
    pub fn desktop(config: &SyncConfig) -> Result<Self> {
        let delivery = SpoolDelivery::default_location()
            .map_err(|e| ServiceError::Initialization(e.to_string()))?;
        Ok(Self::new(
            Arc::new(CommandConverter::pandoc(config.artifact_dir.clone())),
            Arc::new(delivery),
            Arc::new(NotifyWatchProvider::new()),
        ))
    }
}

/// Health snapshot plus the live state only the running service knows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub health: HealthSnapshot,
    /// Paths currently owned by workers
    pub active: Vec<String>,
    /// Whether the change detector is still watching the vault
    pub watching: bool,
}

/// Primary façade exposed to host applications.
pub struct SyncService {
    config: SyncConfig,
    store: Arc<dyn StateStore>,
    scheduler: Arc<Scheduler>,
    reporter: StatsReporter,
    events: EventBus,
    detector_shutdown: CancellationToken,
    detector: Mutex<Option<JoinHandle<core_sync::Result<()>>>>,
}

impl SyncService {
    /// Open the store, start the workers and begin watching the vault.
    ///
    /// Files already in the vault are submitted once watching has begun;
    /// unchanged ones are skipped by fingerprint.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Config`] if the configuration is invalid
    /// - [`ServiceError::Store`] if the database cannot be opened
    /// - [`ServiceError::Sync`] if recovery or the initial scan fails
    pub async fn start(config: SyncConfig, deps: SyncDependencies) -> Result<Self> {
        config.validate()?;

        let store = match deps.store {
            Some(store) => store,
            None => open_store(&config.database_path).await?,
        };

        let events = EventBus::default();
        let scheduler = Arc::new(Scheduler::new(
            config.clone(),
            SchedulerDeps {
                store: store.clone(),
                converter: deps.converter,
                delivery: deps.delivery,
                events: events.clone(),
            },
        ));
        scheduler.start().await?;

        let detector = Arc::new(ChangeDetector::new(
            deps.watcher,
            scheduler.clone(),
            PathFilter::from_config(&config),
            config.debounce,
            events.clone(),
        ));

        let detector_shutdown = CancellationToken::new();
        let handle = {
            let detector = detector.clone();
            let token = detector_shutdown.clone();
            tokio::spawn(async move {
                let result = detector.run(token).await;
                if let Err(e) = &result {
                    error!(error = %e, "Change detector stopped with an error");
                }
                result
            })
        };

        let service = Self {
            reporter: StatsReporter::new(store.clone(), config.stats_window),
            config,
            store,
            scheduler,
            events,
            detector_shutdown,
            detector: Mutex::new(Some(handle)),
        };

        if let Err(e) = detector.scan_existing().await {
            service.shutdown().await;
            return Err(e.into());
        }

        info!(
            vault = %service.config.vault_root.display(),
            recipient = %redact_if_sensitive("recipient", &service.config.recipient),
            workers = service.config.workers,
            "Vault sync service started"
        );
        Ok(service)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn StateStore> {
        Arc::clone(&self.store)
    }

    /// Subscribe to pipeline events. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.events.subscribe()
    }

    /// Queue a path by hand, bypassing the debounce window
    ///
    /// # Errors
    ///
    /// See [`Scheduler::enqueue`].
    pub async fn enqueue(&self, path: impl AsRef<Path>) -> Result<EnqueueOutcome> {
        Ok(self.scheduler.enqueue(path).await?)
    }

    /// Queue a path ahead of normal traffic
    ///
    /// # Errors
    ///
    /// See [`Scheduler::enqueue`].
    pub async fn enqueue_urgent(&self, path: impl AsRef<Path>) -> Result<EnqueueOutcome> {
        Ok(self
            .scheduler
            .enqueue_with_priority(path, Priority::High)
            .await?)
    }

    /// Wait until nothing is pending or in flight
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await
    }

    pub async fn is_watching(&self) -> bool {
        self.detector
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Statistics and health; a dead change detector makes the service unhealthy
    pub async fn status(&self) -> ServiceStatus {
        let mut health = self.reporter.snapshot().await;
        let watching = self.is_watching().await;
        if !watching {
            health.status = HealthStatus::Unhealthy;
        }

        ServiceStatus {
            health,
            active: self.scheduler.active_paths().await,
            watching,
        }
    }

    /// Delete terminal records and metrics older than the retention age
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Store`] if the sweep fails.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let cutoff = now_millis() - self.config.retention.as_millis() as i64;
        let report = self.store.cleanup_older_than(cutoff).await?;
        info!(
            files = report.files_removed,
            metrics = report.metrics_removed,
            "Retention sweep finished"
        );
        Ok(report)
    }

    /// Wait for the change detector to stop and return how it ended
    ///
    /// Hosts typically select on this alongside their own shutdown signal;
    /// an error means the vault is no longer being watched.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Sync`] when the watch failed.
    pub async fn detector_stopped(&self) -> Result<()> {
        let Some(handle) = self.detector.lock().await.take() else {
            return Ok(());
        };
        join_detector(handle).await
    }

    /// Stop watching, then stop the workers
    ///
    /// Pending items stay persisted for the next start. Calling this twice
    /// is harmless.
    pub async fn shutdown(&self) {
        self.detector_shutdown.cancel();
        if let Some(handle) = self.detector.lock().await.take() {
            if let Err(e) = join_detector(handle).await {
                warn!(error = %e, "Change detector had already failed");
            }
        }
        self.scheduler.shutdown().await;
        info!("Vault sync service stopped");
    }
}

async fn join_detector(handle: JoinHandle<core_sync::Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => Ok(result?),
        Err(e) => Err(ServiceError::Initialization(format!(
            "Change detector task failed: {}",
            e
        ))),
    }
}

async fn open_store(database_path: &Path) -> Result<Arc<dyn StateStore>> {
    if let Some(parent) = database_path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            ServiceError::Initialization(format!(
                "Cannot create {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    let pool = create_pool(DatabaseConfig::new(database_path)).await?;
    Ok(Arc::new(SqliteStateStore::new(pool)))
}

/// Convenience bootstrapper for desktop hosts.
///
/// Installs the global tracing subscriber when `logging` is given, then
/// starts the service with the desktop bridge implementations.
///
/// ```ignore
/// use core_service::bootstrap_desktop;
/// use core_runtime::{logging::LoggingConfig, SyncConfig};
///
/// let config = SyncConfig::builder()
///     .vault_root("/home/me/notes")
///     .recipient("me@kindle.com")
///     .build()?;
/// let service = bootstrap_desktop(config, Some(LoggingConfig::default())).await?;
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(
    config: SyncConfig,
    logging: Option<LoggingConfig>,
) -> Result<SyncService> {
    if let Some(logging) = logging {
        init_logging(logging)?;
    }
    let deps = SyncDependencies::desktop(&config)?;
    SyncService::start(config, deps).await
}
