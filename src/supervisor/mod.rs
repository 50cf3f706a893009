//! The Supervisor module manages the per-org Alertmanager instances of the
//! process.
//!
//! It owns one [`Alertmanager`] per configured org and keeps them in sync with
//! the database:
//!
//! - **Sync**: every `sync_interval` each configured org gets an instance if it
//!   has none, and the org's latest saved configuration is applied. Orgs
//!   without a saved configuration get the default one saved and applied.
//!   Instances of orgs that are no longer configured are stopped and their
//!   working directories removed.
//! - **Graceful Shutdown**: on SIGINT or SIGTERM every instance is stopped,
//!   flushing its silences and notification log, within `shutdown_timeout`.

mod builder;

use std::sync::{Arc, RwLock};

pub use builder::SupervisorBuilder;
use dashmap::DashMap;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::{
    config::AppConfig,
    engine::{Alertmanager, AlertmanagerConfigMetrics, AlertmanagerError, AlertmanagerOptions},
    http_client::HttpClientPoolError,
    notification::{Decrypter, EmailSender, IntegrationBuilder, StoreImageProvider, WebhookSender},
    persistence::{
        error::PersistenceError,
        traits::{AlertingStore, ImageStore, KeyValueStore},
    },
};

/// Represents the set of errors that can occur during the supervisor's
/// operation.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A required configuration was not provided to the `SupervisorBuilder`.
    #[error("Missing configuration for Supervisor")]
    MissingConfig,

    /// An alerting store was not provided to the `SupervisorBuilder`.
    #[error("Missing alerting store for Supervisor")]
    MissingAlertingStore,

    /// A key-value store was not provided to the `SupervisorBuilder`.
    #[error("Missing key-value store for Supervisor")]
    MissingKeyValueStore,

    /// An image store was not provided to the `SupervisorBuilder`.
    #[error("Missing image store for Supervisor")]
    MissingImageStore,

    /// The shared HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] HttpClientPoolError),

    /// The configuration metrics could not be registered.
    #[error("Metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),

    /// An error occurred while reading the stored configurations.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    /// An org's Alertmanager failed to start or to apply its configuration.
    #[error("Alertmanager of org {org_id} failed: {source}")]
    Alertmanager {
        /// The org whose Alertmanager failed.
        org_id: i64,
        /// The underlying error.
        #[source]
        source: AlertmanagerError,
    },

    /// At least one org failed to sync; each failure was logged.
    #[error("{0} org(s) failed to sync")]
    SyncFailed(usize),
}

/// The primary runtime manager for the application.
///
/// Once `run` is called it becomes the main process loop.
pub struct Supervisor {
    /// Shared application configuration.
    config: Arc<AppConfig>,

    /// Orgs that should have a running Alertmanager.
    org_ids: RwLock<Vec<i64>>,

    alerting_store: Arc<dyn AlertingStore>,
    kv_store: Arc<dyn KeyValueStore>,
    image_store: Arc<dyn ImageStore>,

    /// Transports shared by every org's integrations.
    webhook_sender: Arc<dyn WebhookSender>,
    email_sender: Arc<dyn EmailSender>,
    decrypter: Arc<dyn Decrypter>,

    metrics: AlertmanagerConfigMetrics,
    registry: prometheus::Registry,

    /// The running Alertmanager of each org.
    alertmanagers: DashMap<i64, Arc<Alertmanager>>,

    /// A token used to signal a graceful shutdown.
    cancellation_token: CancellationToken,
}

impl Supervisor {
    /// Returns a new `SupervisorBuilder` instance.
    ///
    /// This is the public entry point for creating a supervisor.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// The Alertmanager of `org_id`, if one is running.
    pub fn get(&self, org_id: i64) -> Option<Arc<Alertmanager>> {
        self.alertmanagers.get(&org_id).map(|am| Arc::clone(am.value()))
    }

    /// Org ids with a running Alertmanager, sorted.
    pub fn running_orgs(&self) -> Vec<i64> {
        let mut orgs: Vec<i64> = self.alertmanagers.iter().map(|e| *e.key()).collect();
        orgs.sort_unstable();
        orgs
    }

    /// Replaces the set of served orgs. Takes effect on the next sync.
    pub fn set_org_ids(&self, org_ids: Vec<i64>) {
        match self.org_ids.write() {
            Ok(mut guard) => *guard = org_ids,
            Err(poisoned) => *poisoned.into_inner() = org_ids,
        }
    }

    fn configured_orgs(&self) -> Vec<i64> {
        match self.org_ids.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The registry holding the configuration gauges.
    pub fn registry(&self) -> &prometheus::Registry {
        &self.registry
    }

    /// A token that shuts the supervisor down when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Brings the running instances in line with the configured orgs and
    /// applies each org's latest configuration. Failures of single orgs are
    /// logged and do not stop the others.
    #[tracing::instrument(skip(self))]
    pub async fn sync_orgs(&self) -> Result<(), SupervisorError> {
        let orgs = self.configured_orgs();
        let mut failures = 0;

        for &org_id in &orgs {
            if let Err(e) = self.sync_org(org_id).await {
                tracing::error!(org_id, error = %e, "Failed to sync org.");
                failures += 1;
            }
        }

        let stale: Vec<i64> =
            self.running_orgs().into_iter().filter(|org_id| !orgs.contains(org_id)).collect();
        for org_id in stale {
            let Some((_, am)) = self.alertmanagers.remove(&org_id) else {
                continue;
            };
            am.stop_and_wait().await;
            if let Err(e) = am.clean_up().await {
                tracing::error!(org_id, error = %e, "Failed to clean up removed org.");
                failures += 1;
                continue;
            }
            tracing::info!(org_id, "Removed Alertmanager of org no longer served.");
        }

        if failures > 0 {
            return Err(SupervisorError::SyncFailed(failures));
        }
        Ok(())
    }

    async fn sync_org(&self, org_id: i64) -> Result<(), SupervisorError> {
        let am = self.get_or_create(org_id).await?;
        let wrap = |source| SupervisorError::Alertmanager { org_id, source };

        match self.alerting_store.get_latest_configuration(org_id).await {
            Ok(record) => am.apply_config(&record).await.map_err(wrap),
            Err(PersistenceError::NotFound(_)) => {
                tracing::info!(org_id, "No saved configuration, applying the default.");
                am.save_and_apply_default_config().await.map_err(wrap)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_or_create(&self, org_id: i64) -> Result<Arc<Alertmanager>, SupervisorError> {
        if let Some(am) = self.get(org_id) {
            return Ok(am);
        }

        let integration_builder = IntegrationBuilder::new(
            org_id,
            Arc::clone(&self.decrypter),
            Arc::clone(&self.webhook_sender),
            Arc::clone(&self.email_sender),
            Arc::new(StoreImageProvider::new(org_id, Arc::clone(&self.image_store))),
            self.config.app_url.clone(),
        );
        let am = Alertmanager::new(
            AlertmanagerOptions::from_config(org_id, &self.config),
            Arc::clone(&self.alerting_store),
            Arc::clone(&self.kv_store),
            integration_builder,
            self.metrics.clone(),
        )
        .await
        .map_err(|source| SupervisorError::Alertmanager { org_id, source })?;

        tracing::info!(org_id, "Started Alertmanager.");
        self.alertmanagers.insert(org_id, Arc::clone(&am));
        Ok(am)
    }

    /// Runs the sync loop until a shutdown signal arrives or the
    /// cancellation token is cancelled, then stops every instance.
    pub async fn run(self) -> Result<(), SupervisorError> {
        let cancellation_token = self.cancellation_token.clone();
        let signal_task = tokio::spawn(async move {
            let ctrl_c = signal::ctrl_c();
            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to register SIGTERM handler.");
                        std::future::pending::<()>().await;
                    }
                }
            };
            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("SIGINT (Ctrl+C) received, initiating graceful shutdown."),
                _ = terminate => tracing::info!("SIGTERM received, initiating graceful shutdown."),
                _ = cancellation_token.cancelled() => return,
            }
            cancellation_token.cancel();
        });

        let mut ticker = tokio::time::interval(self.config.sync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancellation_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sync_orgs().await {
                        tracing::warn!(error = %e, "Org sync incomplete, retrying on next tick.");
                    }
                }
            }
        }
        signal_task.abort();

        tracing::info!("Stopping every Alertmanager...");
        let shutdown_timeout = self.config.shutdown_timeout;
        if tokio::time::timeout(shutdown_timeout, self.stop_all()).await.is_err() {
            tracing::warn!(
                "Shutdown did not complete within the timeout of {:?}. Continuing shutdown.",
                shutdown_timeout
            );
        } else {
            tracing::info!("All Alertmanagers stopped.");
        }

        tracing::info!("Supervisor shutdown complete.");
        Ok(())
    }

    /// Stops every instance concurrently.
    pub async fn stop_all(&self) {
        let instances: Vec<Arc<Alertmanager>> =
            self.alertmanagers.iter().map(|e| Arc::clone(e.value())).collect();
        futures::future::join_all(instances.iter().map(|am| am.stop_and_wait())).await;
    }
}
