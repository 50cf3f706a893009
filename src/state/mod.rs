//! On-disk state of the notification pipeline: silences, the notification log,
//! the file store that persists them and the scheduler that maintains them.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod file_store;
pub mod maintenance;
pub mod nflog;
pub mod silences;
mod snapshot;

pub use file_store::{FileStore, FileStoreError};
pub use maintenance::{MaintenanceError, MaintenanceFn, MaintenanceOptions, run_maintenance};
pub use nflog::NotificationLog;
pub use silences::Silences;

/// Snapshot file name of the notification log.
pub const NOTIFICATION_LOG_FILENAME: &str = "notifications";

/// Snapshot file name of the silences.
pub const SILENCES_FILENAME: &str = "silences";

/// A state that is periodically garbage collected and written to disk.
pub trait MaintainedState: Send + Sync {
    /// Drops entries that ended more than `retention` before `now`. Returns the
    /// number of removed entries.
    fn gc(&self, now: DateTime<Utc>, retention: Duration) -> usize;

    /// Serializes the whole state into the versioned snapshot format.
    fn marshal_binary(&self) -> Vec<u8>;
}

/// Errors of the in-memory states.
#[derive(Debug, Error)]
pub enum StateError {
    /// The snapshot starts with an unknown version byte.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),

    /// A snapshot entry failed to decode.
    #[error("failed to decode snapshot: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The snapshot file could not be read.
    #[error("failed to read snapshot: {0}")]
    Io(#[from] std::io::Error),

    /// A silence failed validation.
    #[error("invalid silence: {0}")]
    InvalidSilence(String),

    /// No silence has this id.
    #[error("silence {0} not found")]
    SilenceNotFound(String),

    /// The silence already ended.
    #[error("silence {0} already expired")]
    SilenceExpired(String),
}
