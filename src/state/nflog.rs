//! The notification log records which alerts of a group were last sent to
//! each integration, so the dispatcher can skip duplicate notifications.

use std::{collections::BTreeSet, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{
    MaintainedState, StateError,
    snapshot::{self, NotificationEntry, from_millis, to_millis},
};
use crate::models::Fingerprint;

/// Identifies the integration a log entry belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    /// Key of the alert group.
    pub group_key: String,
    /// Receiver name.
    pub receiver: String,
    /// Position of the integration in its receiver.
    pub integration_index: u32,
}

/// A decoded log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// When the notification was sent.
    pub timestamp: DateTime<Utc>,
    /// Alerts firing at the time.
    pub firing: BTreeSet<Fingerprint>,
    /// Alerts resolved at the time.
    pub resolved: BTreeSet<Fingerprint>,
}

/// In-memory notification log, keyed by group and integration.
#[derive(Default)]
pub struct NotificationLog {
    entries: DashMap<LogKey, NotificationEntry>,
}

impl NotificationLog {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every entry of the snapshot at `path`; a missing file is empty.
    pub async fn load_snapshot(&self, path: &Path) -> Result<usize, StateError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let decoded: Vec<NotificationEntry> = snapshot::decode(&bytes)?;
        let count = decoded.len();
        for entry in decoded {
            self.entries.insert(key_of(&entry), entry);
        }
        Ok(count)
    }

    /// Records a successful notification.
    pub fn log(
        &self,
        key: LogKey,
        firing: &BTreeSet<Fingerprint>,
        resolved: &BTreeSet<Fingerprint>,
        now: DateTime<Utc>,
    ) {
        let entry = NotificationEntry {
            group_key: key.group_key.clone(),
            receiver: key.receiver.clone(),
            integration_index: key.integration_index,
            timestamp_ms: to_millis(now),
            firing_alerts: firing.iter().map(|f| f.0).collect(),
            resolved_alerts: resolved.iter().map(|f| f.0).collect(),
        };
        self.entries.insert(key, entry);
    }

    /// The entry of `key`, if logged.
    pub fn query(&self, key: &LogKey) -> Option<LogEntry> {
        self.entries.get(key).map(|e| LogEntry {
            timestamp: from_millis(e.timestamp_ms),
            firing: e.firing_alerts.iter().copied().map(Fingerprint).collect(),
            resolved: e.resolved_alerts.iter().copied().map(Fingerprint).collect(),
        })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key_of(entry: &NotificationEntry) -> LogKey {
    LogKey {
        group_key: entry.group_key.clone(),
        receiver: entry.receiver.clone(),
        integration_index: entry.integration_index,
    }
}

impl MaintainedState for NotificationLog {
    fn gc(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.entries.len();
        let cutoff = to_millis(now).saturating_sub(retention.as_millis() as i64);
        self.entries.retain(|_, e| e.timestamp_ms > cutoff);
        before - self.entries.len()
    }

    fn marshal_binary(&self) -> Vec<u8> {
        let mut entries: Vec<(LogKey, NotificationEntry)> =
            self.entries.iter().map(|e| (e.key().clone(), e.value().clone())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        snapshot::encode(entries.iter().map(|(_, e)| e))
    }
}
