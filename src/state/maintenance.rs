//! Periodic garbage collection and persistence of a maintained state.

use std::{
    path::PathBuf,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{FileStoreError, MaintainedState};

/// Persists a state. Returns the number of bytes written.
pub type MaintenanceFn = Arc<
    dyn Fn(Arc<dyn MaintainedState>) -> BoxFuture<'static, Result<usize, FileStoreError>>
        + Send
        + Sync,
>;

/// Failure of one maintenance pass.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    /// The snapshot could not be persisted.
    #[error("failed to persist {file}: {source}")]
    Persist {
        /// Snapshot file name.
        file: String,
        /// The underlying error.
        #[source]
        source: FileStoreError,
    },

    /// The persisting task panicked or was cancelled.
    #[error("maintenance task for {file} did not complete: {source}")]
    Join {
        /// Snapshot file name.
        file: String,
        /// The underlying error.
        #[source]
        source: tokio::task::JoinError,
    },
}

/// Settings of one maintained state.
#[derive(Clone)]
pub struct MaintenanceOptions {
    /// Snapshot file the state is persisted to.
    pub filepath: PathBuf,
    /// How long entries are kept after they ended.
    pub retention: Duration,
    /// Interval between maintenance passes.
    pub maintenance_frequency: Duration,
    /// Persists the state after garbage collection.
    pub maintenance_fn: MaintenanceFn,
}

impl MaintenanceOptions {
    fn file_label(&self) -> String {
        self.filepath.display().to_string()
    }
}

/// Runs one maintenance pass: garbage collection, then the maintenance
/// function. The write runs on a detached task and completes even if the
/// caller is cancelled.
pub async fn maintain_once(
    state: &Arc<dyn MaintainedState>,
    options: &MaintenanceOptions,
) -> Result<usize, MaintenanceError> {
    let removed = state.gc(Utc::now(), options.retention);
    let write = (options.maintenance_fn)(Arc::clone(state));
    let written = tokio::spawn(write)
        .await
        .map_err(|source| MaintenanceError::Join { file: options.file_label(), source })?
        .map_err(|source| MaintenanceError::Persist { file: options.file_label(), source })?;
    tracing::debug!(file = %options.file_label(), removed, written, "Maintenance pass done.");
    Ok(written)
}

/// Runs maintenance every `maintenance_frequency` until `cancel` fires, then
/// runs one final pass and returns.
pub async fn run_maintenance(
    state: Arc<dyn MaintainedState>,
    options: MaintenanceOptions,
    cancel: CancellationToken,
) {
    let period = options.maintenance_frequency.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        file = %options.file_label(),
        frequency = ?options.maintenance_frequency,
        retention = ?options.retention,
        "Running maintenance."
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let started = Instant::now();
                match maintain_once(&state, &options).await {
                    Ok(size) => tracing::info!(
                        file = %options.file_label(),
                        size,
                        duration = ?started.elapsed(),
                        "Maintenance done."
                    ),
                    Err(e) => tracing::error!(error = %e, "Maintenance failed, retrying on next tick."),
                }
            }
        }
    }

    tracing::info!(file = %options.file_label(), "Stopping maintenance, running final pass.");
    if let Err(e) = maintain_once(&state, &options).await {
        tracing::error!(error = %e, "Final maintenance failed.");
    }
}
