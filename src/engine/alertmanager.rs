//! The Alertmanager of one org: applies configuration, accepts alerts and
//! runs the notification pipeline and its maintenance.

use std::{
    collections::BTreeMap,
    fmt,
    path::PathBuf,
    sync::{
        Arc, RwLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::{
    metrics::{AlertmanagerConfigMetrics, aggregate_matchers_usage},
    pipeline::{self, ActiveConfiguration, AlertStore, DispatchReport, PipelineError},
};
use crate::{
    config::AppConfig,
    loader::{self, ConfigValidationError},
    models::{
        Alert, AlertConfiguration, Fingerprint, MarkConfigurationAsAppliedCmd, PostableAlert,
        PostableUserConfig, SaveAlertmanagerConfigurationCmd,
        configuration::configuration_hash,
        silence::{PostableSilence, Silence},
    },
    notification::{IntegrationBuildError, IntegrationBuilder, TemplateError, TemplateSet},
    persistence::{
        error::PersistenceError,
        traits::{AlertingStore, KeyValueStore},
    },
    state::{
        FileStore, FileStoreError, MaintainedState, MaintenanceOptions, NOTIFICATION_LOG_FILENAME,
        NotificationLog, SILENCES_FILENAME, Silences, StateError, run_maintenance,
    },
};

/// Sub-directory of the working directory holding the template files.
pub const TEMPLATES_DIR: &str = "templates";

/// Errors of the per-org Alertmanager.
#[derive(Debug, Error)]
pub enum AlertmanagerError {
    /// The instance was stopped and accepts no more work.
    #[error("alertmanager is stopped")]
    Stopped,

    /// Clean up was requested before the instance was stopped.
    #[error("alertmanager must be stopped before clean up")]
    StillRunning,

    /// The configuration document is invalid.
    #[error("invalid configuration: {0}")]
    Validation(#[from] ConfigValidationError),

    /// The configuration could not be serialized to its canonical bytes.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The configuration store failed.
    #[error("failed to persist configuration: {0}")]
    Persistence(#[from] PersistenceError),

    /// One or more receivers could not be built.
    #[error("failed to build receivers: {0}")]
    Build(#[from] IntegrationBuildError),

    /// A template file failed to compile.
    #[error("failed to compile templates: {0}")]
    Template(#[from] TemplateError),

    /// The template directory could not be read or written.
    #[error("failed to write templates: {0}")]
    TemplateFiles(#[source] std::io::Error),

    /// The route tree or inhibit rules could not be compiled.
    #[error("failed to compile configuration: {0}")]
    Pipeline(#[from] PipelineError),

    /// A state snapshot could not be read or written.
    #[error("file store error: {0}")]
    FileStore(#[from] FileStoreError),

    /// Silences or the notification log rejected an operation.
    #[error("state error: {0}")]
    State(#[from] StateError),

    /// Some posted alerts were rejected.
    #[error(transparent)]
    InvalidAlerts(#[from] AlertValidationError),
}

/// The alerts rejected by [`Alertmanager::put_alerts`] and why, index by
/// index.
#[derive(Debug, Default, Error)]
pub struct AlertValidationError {
    /// The rejected alerts.
    pub alerts: Vec<PostableAlert>,
    /// Why each alert was rejected, index by index.
    pub errors: Vec<String>,
}

impl AlertValidationError {
    fn push(&mut self, alert: PostableAlert, error: String) {
        self.alerts.push(alert);
        self.errors.push(error);
    }

    /// Whether no alert was rejected.
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

impl fmt::Display for AlertValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.errors.join(";"))
    }
}

/// Per-org settings of an [`Alertmanager`].
#[derive(Debug, Clone)]
pub struct AlertmanagerOptions {
    /// The org this instance serves.
    pub org_id: i64,
    /// `<data_path>/alerting/<org_id>`.
    pub working_dir: PathBuf,
    /// External url linked from notifications.
    pub app_url: String,
    /// Raw document applied when the org has no saved configuration.
    pub default_configuration: String,
    /// How long expired silences and notification log entries are kept.
    pub retention: Duration,
    /// How often silences are garbage collected and persisted.
    pub silence_maintenance_interval: Duration,
    /// How often the notification log is garbage collected and persisted.
    pub notification_log_maintenance_interval: Duration,
    /// Zero disables the background dispatcher.
    pub dispatch_interval: Duration,
    /// End time given to alerts posted without one.
    pub resolve_timeout: Duration,
}

impl AlertmanagerOptions {
    /// Settings of `org_id` derived from the application configuration.
    pub fn from_config(org_id: i64, config: &AppConfig) -> Self {
        Self {
            org_id,
            working_dir: config.data_path.join("alerting").join(org_id.to_string()),
            app_url: config.app_url.clone(),
            default_configuration: config.default_configuration.clone(),
            retention: config.maintenance_retention,
            silence_maintenance_interval: config.silence_maintenance_interval,
            notification_log_maintenance_interval: config.notification_log_maintenance_interval,
            dispatch_interval: config.dispatch_interval,
            resolve_timeout: config.resolve_timeout,
        }
    }
}

/// The Alertmanager of one org.
///
/// Created uninitialized; ready after the first successful apply and terminal
/// after [`Alertmanager::stop_and_wait`].
pub struct Alertmanager {
    options: AlertmanagerOptions,
    store: Arc<dyn AlertingStore>,
    file_store: Arc<FileStore>,
    integration_builder: IntegrationBuilder,
    metrics: AlertmanagerConfigMetrics,

    silences: Arc<Silences>,
    nflog: Arc<NotificationLog>,
    alerts: AlertStore,

    /// Serializes every configuration change.
    config_lock: tokio::sync::Mutex<()>,
    /// Only held to clone or replace the snapshot.
    active: RwLock<Option<Arc<ActiveConfiguration>>>,
    ready: AtomicBool,
    stopped: AtomicBool,

    cancel: CancellationToken,
    tasks: std::sync::Mutex<JoinSet<()>>,
}

impl Alertmanager {
    /// Restores silences and the notification log from the working
    /// directory (or the key-value store) and starts their maintenance and
    /// the dispatcher. The instance is not ready until a configuration is
    /// applied.
    #[tracing::instrument(skip_all, fields(org_id = options.org_id))]
    pub async fn new(
        options: AlertmanagerOptions,
        store: Arc<dyn AlertingStore>,
        kv: Arc<dyn KeyValueStore>,
        integration_builder: IntegrationBuilder,
        metrics: AlertmanagerConfigMetrics,
    ) -> Result<Arc<Self>, AlertmanagerError> {
        let file_store = Arc::new(FileStore::new(options.org_id, kv, options.working_dir.clone()));

        let silences = Arc::new(Silences::new());
        let silences_path = file_store.filepath_for(SILENCES_FILENAME).await?;
        let loaded_silences = silences.load_snapshot(&silences_path).await?;

        let nflog = Arc::new(NotificationLog::new());
        let nflog_path = file_store.filepath_for(NOTIFICATION_LOG_FILENAME).await?;
        let loaded_entries = nflog.load_snapshot(&nflog_path).await?;
        tracing::info!(silences = loaded_silences, notification_log = loaded_entries, "Restored state.");

        let am = Arc::new(Self {
            store,
            integration_builder,
            metrics,
            silences,
            nflog,
            alerts: AlertStore::new(),
            config_lock: tokio::sync::Mutex::new(()),
            active: RwLock::new(None),
            ready: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: std::sync::Mutex::new(JoinSet::new()),
            file_store,
            options,
        });

        am.spawn_maintenance(
            am.silences.clone(),
            silences_path,
            SILENCES_FILENAME,
            am.options.silence_maintenance_interval,
        );
        am.spawn_maintenance(
            am.nflog.clone(),
            nflog_path,
            NOTIFICATION_LOG_FILENAME,
            am.options.notification_log_maintenance_interval,
        );
        if !am.options.dispatch_interval.is_zero() {
            am.spawn_dispatcher();
        }
        Ok(am)
    }

    fn spawn_maintenance(
        &self,
        state: Arc<dyn MaintainedState>,
        filepath: PathBuf,
        name: &'static str,
        frequency: Duration,
    ) {
        let file_store = Arc::clone(&self.file_store);
        let options = MaintenanceOptions {
            filepath,
            retention: self.options.retention,
            maintenance_frequency: frequency,
            maintenance_fn: Arc::new(move |state: Arc<dyn MaintainedState>| {
                let file_store = Arc::clone(&file_store);
                async move { file_store.persist(name, state.as_ref()).await }.boxed()
            }),
        };
        self.spawn(run_maintenance(state, options, self.cancel.child_token()));
    }

    fn spawn_dispatcher(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let cancel = self.cancel.child_token();
        let period = self.options.dispatch_interval;
        self.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(am) = weak.upgrade() else { break };
                        if let Err(e) = am.dispatch_once().await {
                            tracing::debug!(error = %e, "Dispatcher pass skipped.");
                        }
                    }
                }
            }
        });
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        match self.tasks.lock() {
            Ok(mut tasks) => {
                tasks.spawn(task);
            }
            Err(poisoned) => {
                poisoned.into_inner().spawn(task);
            }
        }
    }

    /// The org this instance serves.
    pub fn org_id(&self) -> i64 {
        self.options.org_id
    }

    /// External url linked from notifications.
    pub fn app_url(&self) -> &str {
        &self.options.app_url
    }

    /// True once a configuration has been applied.
    pub fn ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Hash of the active configuration, if any.
    pub fn config_hash(&self) -> Option<String> {
        self.active_snapshot().map(|active| active.hash.clone())
    }

    /// The active configuration snapshot.
    pub fn active_configuration(&self) -> Option<Arc<ActiveConfiguration>> {
        self.active_snapshot()
    }

    fn active_snapshot(&self) -> Option<Arc<ActiveConfiguration>> {
        match self.active.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap_active(&self, next: Arc<ActiveConfiguration>) {
        match self.active.write() {
            Ok(mut guard) => *guard = Some(next),
            Err(poisoned) => *poisoned.into_inner() = Some(next),
        }
    }

    fn ensure_running(&self) -> Result<(), AlertmanagerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(AlertmanagerError::Stopped);
        }
        Ok(())
    }

    /// Saves the default configuration as the org's current one and applies
    /// it. Any failure, including of the apply, is returned.
    #[tracing::instrument(skip(self), fields(org_id = self.options.org_id))]
    pub async fn save_and_apply_default_config(&self) -> Result<(), AlertmanagerError> {
        self.ensure_running()?;
        let raw = self.options.default_configuration.as_bytes();
        let cfg = loader::load(raw)?;
        let _guard = self.config_lock.lock().await;
        self.ensure_running()?;
        self.save_and_apply(cfg, raw, true).await
    }

    /// Validates `cfg`, saves it and applies it. The save is committed only
    /// if the apply succeeds.
    #[tracing::instrument(skip(self, cfg), fields(org_id = self.options.org_id))]
    pub async fn save_and_apply_config(&self, cfg: PostableUserConfig) -> Result<(), AlertmanagerError> {
        self.ensure_running()?;
        loader::validate(&cfg)?;
        let raw = cfg.to_canonical_bytes().map_err(AlertmanagerError::Serialize)?;
        let _guard = self.config_lock.lock().await;
        self.ensure_running()?;
        self.save_and_apply(cfg, &raw, false).await
    }

    async fn save_and_apply(
        &self,
        cfg: PostableUserConfig,
        raw: &[u8],
        is_default: bool,
    ) -> Result<(), AlertmanagerError> {
        let cmd = SaveAlertmanagerConfigurationCmd::new(self.options.org_id, raw, is_default);
        let staged = self.store.stage_configuration(cmd).await?;
        match self.apply_config_inner(cfg, raw).await {
            Ok(changed) => {
                staged.commit().await?;
                tracing::info!(changed, is_default, "Configuration saved and applied.");
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = staged.abort().await {
                    tracing::error!(error = %abort_err, "Failed to abort configuration save.");
                }
                tracing::warn!(error = %e, "Configuration apply failed, save aborted.");
                Err(e)
            }
        }
    }

    /// Applies a stored configuration. It is marked applied in the store
    /// only if the apply changed anything.
    #[tracing::instrument(skip(self, record), fields(org_id = self.options.org_id, id = record.id))]
    pub async fn apply_config(&self, record: &AlertConfiguration) -> Result<(), AlertmanagerError> {
        self.ensure_running()?;
        let raw = record.alertmanager_configuration.as_bytes();
        let cfg = loader::load(raw)?;
        let _guard = self.config_lock.lock().await;
        self.ensure_running()?;
        if self.apply_config_inner(cfg, raw).await? {
            self.store
                .mark_configuration_applied(MarkConfigurationAsAppliedCmd {
                    org_id: self.options.org_id,
                    configuration_hash: record.configuration_hash.clone(),
                })
                .await?;
        }
        Ok(())
    }

    /// Must be called with the configuration lock held. Returns whether the
    /// pipeline was rebuilt. Nothing on disk or in memory changes unless the
    /// whole configuration builds.
    async fn apply_config_inner(
        &self,
        mut cfg: PostableUserConfig,
        raw: &[u8],
    ) -> Result<bool, AlertmanagerError> {
        let hash = configuration_hash(raw);
        loader::inject_default_template(&mut cfg);

        let template_changes = self.template_changes(&cfg.template_files).await?;
        let unchanged_config = self.active_snapshot().is_some_and(|active| active.hash == hash);
        if unchanged_config && template_changes.is_empty() {
            tracing::debug!(hash = %hash, "Configuration unchanged, skipping apply.");
            return Ok(false);
        }

        let templates = Arc::new(TemplateSet::new(&cfg.template_files)?);
        let receivers =
            self.integration_builder.build_all(&cfg.alertmanager_config.receivers, &templates)?;
        let usage = aggregate_matchers_usage(&cfg.alertmanager_config);
        let active = ActiveConfiguration::new(hash.clone(), cfg, receivers, templates)?;

        self.write_templates(&active.config.template_files, template_changes).await?;
        self.swap_active(Arc::new(active));
        self.ready.store(true, Ordering::Release);
        self.metrics.update(self.options.org_id, raw, usage);
        tracing::info!(hash = %hash, "Applied new configuration.");
        Ok(true)
    }

    /// Compares the template files with the templates directory without
    /// touching it.
    async fn template_changes(
        &self,
        files: &BTreeMap<String, String>,
    ) -> Result<TemplateChanges, AlertmanagerError> {
        let dir = self.options.working_dir.join(TEMPLATES_DIR);
        let mut changes = TemplateChanges::default();

        for (name, content) in files {
            match tokio::fs::read(dir.join(name)).await {
                Ok(existing) if existing == content.as_bytes() => {}
                Ok(_) => changes.write.push(name.clone()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => changes.write.push(name.clone()),
                Err(e) => return Err(AlertmanagerError::TemplateFiles(e)),
            }
        }

        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(changes),
            Err(e) => return Err(AlertmanagerError::TemplateFiles(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(AlertmanagerError::TemplateFiles)? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !files.contains_key(&name) {
                changes.remove.push(entry.path());
            }
        }
        Ok(changes)
    }

    async fn write_templates(
        &self,
        files: &BTreeMap<String, String>,
        changes: TemplateChanges,
    ) -> Result<(), AlertmanagerError> {
        if changes.is_empty() {
            return Ok(());
        }
        let dir = self.options.working_dir.join(TEMPLATES_DIR);
        tokio::fs::create_dir_all(&dir).await.map_err(AlertmanagerError::TemplateFiles)?;

        for name in changes.write {
            if let Some(content) = files.get(&name) {
                tokio::fs::write(dir.join(&name), content).await.map_err(AlertmanagerError::TemplateFiles)?;
            }
        }
        for path in changes.remove {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(template = %path.display(), "Removed stale template."),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(AlertmanagerError::TemplateFiles(e)),
            }
        }
        Ok(())
    }

    /// Stores every valid alert. Invalid ones are reported together; the
    /// valid ones are kept either way.
    pub fn put_alerts(&self, alerts: Vec<PostableAlert>) -> Result<(), AlertmanagerError> {
        self.ensure_running()?;
        let now = Utc::now();
        let resolve_timeout =
            chrono::Duration::from_std(self.options.resolve_timeout).unwrap_or(chrono::Duration::zero());
        let mut invalid = AlertValidationError::default();

        for postable in alerts {
            if let Err(e) = postable.validate() {
                invalid.errors.push(format!("{}: {e}", format_labels(&postable)));
                invalid.alerts.push(postable);
                continue;
            }
            let ends_at = postable.ends_at.unwrap_or(now + resolve_timeout);
            let starts_at = postable.starts_at.unwrap_or_else(|| match postable.ends_at {
                Some(ends_at) if ends_at < now => ends_at,
                _ => now,
            });
            if ends_at < starts_at {
                let error = format!("{}: end time must not be before start time", format_labels(&postable));
                invalid.push(postable, error);
                continue;
            }
            self.alerts.put(Alert {
                fingerprint: Fingerprint::from_labels(&postable.labels),
                labels: postable.labels,
                annotations: postable.annotations,
                starts_at,
                ends_at,
                generator_url: postable.generator_url,
                updated_at: now,
            });
        }

        if invalid.is_empty() {
            return Ok(());
        }
        tracing::debug!(org_id = self.options.org_id, rejected = invalid.alerts.len(), "Rejected alerts.");
        Err(invalid.into())
    }

    /// Every stored alert, ordered by fingerprint.
    pub fn get_alerts(&self) -> Vec<Alert> {
        self.alerts.list()
    }

    /// Creates or updates a silence and returns its id.
    pub fn create_silence(&self, silence: PostableSilence) -> Result<String, AlertmanagerError> {
        self.ensure_running()?;
        Ok(self.silences.set(silence, Utc::now())?)
    }

    /// Expires the silence `id` now.
    pub fn expire_silence(&self, id: &str) -> Result<(), AlertmanagerError> {
        self.ensure_running()?;
        Ok(self.silences.expire(id, Utc::now())?)
    }

    /// All silences, expired ones included until they are collected.
    pub fn list_silences(&self) -> Vec<Silence> {
        self.silences.list()
    }

    /// Runs one dispatcher pass against the active configuration.
    pub async fn dispatch_once(&self) -> Result<DispatchReport, AlertmanagerError> {
        self.ensure_running()?;
        let Some(active) = self.active_snapshot() else {
            return Ok(DispatchReport::default());
        };
        let now = Utc::now();
        let report = pipeline::dispatch(&active, &self.alerts, &self.silences, &self.nflog, now).await;
        let removed = self.alerts.gc(now, self.options.resolve_timeout);
        tracing::debug!(org_id = self.options.org_id, ?report, removed, "Dispatcher pass done.");
        Ok(report)
    }

    /// Stops the instance: waits for a configuration apply in flight, rejects
    /// the ones still queued, then stops the dispatcher and the maintenance
    /// tasks and waits for their final snapshot writes. The instance cannot be
    /// restarted.
    #[tracing::instrument(skip(self), fields(org_id = self.options.org_id))]
    pub async fn stop_and_wait(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        // Applies queued on the lock see the stopped flag once they get it;
        // taking it here waits for the one in flight.
        drop(self.config_lock.lock().await);
        self.cancel.cancel();
        let mut tasks = match self.tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Background task failed.");
            }
        }
        tracing::info!("Alertmanager stopped.");
    }

    /// Removes the working directory and the org's metrics. Only allowed
    /// after [`Alertmanager::stop_and_wait`].
    #[tracing::instrument(skip(self), fields(org_id = self.options.org_id))]
    pub async fn clean_up(&self) -> Result<(), AlertmanagerError> {
        if !self.stopped.load(Ordering::Acquire) {
            return Err(AlertmanagerError::StillRunning);
        }
        self.file_store.clean_up().await?;
        self.metrics.remove(self.options.org_id);
        Ok(())
    }
}

/// Template files to write and stale ones to remove.
#[derive(Debug, Default)]
struct TemplateChanges {
    write: Vec<String>,
    remove: Vec<PathBuf>,
}

impl TemplateChanges {
    fn is_empty(&self) -> bool {
        self.write.is_empty() && self.remove.is_empty()
    }
}

fn format_labels(alert: &PostableAlert) -> String {
    let pairs: Vec<String> = alert.labels.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
    format!("{{{}}}", pairs.join(", "))
}
