//! Durable storage of the maintained snapshots.
//!
//! Snapshots live in the org's working directory and are mirrored into the
//! key-value store, so a node that lost its disk recovers them on startup.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use thiserror::Error;

use super::MaintainedState;
use crate::persistence::{error::PersistenceError, traits::KeyValueStore};

/// Key-value namespace holding the snapshot mirrors.
pub const KV_NAMESPACE: &str = "alertmanager";

/// Errors of the file store.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// Reading or writing the working directory failed.
    #[error("file store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A mirrored snapshot is not valid base64.
    #[error("stored snapshot is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    /// The key-value store failed.
    #[error("key-value store failed: {0}")]
    KeyValue(#[from] PersistenceError),
}

/// Snapshot files of one org, mirrored into the key-value store.
pub struct FileStore {
    org_id: i64,
    kv: Arc<dyn KeyValueStore>,
    working_dir: PathBuf,
}

impl FileStore {
    /// Creates a store for `org_id` rooted at `working_dir`.
    pub fn new(org_id: i64, kv: Arc<dyn KeyValueStore>, working_dir: impl Into<PathBuf>) -> Self {
        Self { org_id, kv, working_dir: working_dir.into() }
    }

    /// The org's working directory.
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Returns the path of the named snapshot, restoring it from the
    /// key-value store first when the file is missing.
    #[tracing::instrument(skip(self), fields(org_id = self.org_id), level = "debug")]
    pub async fn filepath_for(&self, name: &str) -> Result<PathBuf, FileStoreError> {
        let path = self.working_dir.join(name);
        if tokio::fs::try_exists(&path).await? {
            return Ok(path);
        }

        let Some(encoded) = self.kv.get(self.org_id, KV_NAMESPACE, name).await? else {
            tracing::debug!(file = name, "No stored snapshot, starting empty.");
            return Ok(path);
        };
        let bytes = BASE64.decode(encoded.as_bytes())?;
        self.write_atomically(name, &bytes).await?;
        tracing::info!(file = name, bytes = bytes.len(), "Restored snapshot from key-value store.");
        Ok(path)
    }

    /// Writes the marshalled state to disk and to the key-value store.
    /// Returns the number of bytes written.
    #[tracing::instrument(skip(self, state), fields(org_id = self.org_id), level = "debug")]
    pub async fn persist(
        &self,
        name: &str,
        state: &dyn MaintainedState,
    ) -> Result<usize, FileStoreError> {
        let bytes = state.marshal_binary();
        self.write_atomically(name, &bytes).await?;
        self.kv.set(self.org_id, KV_NAMESPACE, name, &BASE64.encode(&bytes)).await?;
        Ok(bytes.len())
    }

    /// Removes the working directory and everything in it.
    #[tracing::instrument(skip(self), fields(org_id = self.org_id), level = "debug")]
    pub async fn clean_up(&self) -> Result<(), FileStoreError> {
        match tokio::fs::remove_dir_all(&self.working_dir).await {
            Ok(()) => {
                tracing::info!(dir = %self.working_dir.display(), "Working directory removed.");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_atomically(&self, name: &str, bytes: &[u8]) -> Result<(), FileStoreError> {
        tokio::fs::create_dir_all(&self.working_dir).await?;
        let tmp = self.working_dir.join(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()));
        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, self.working_dir.join(name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{DateTime, Utc};

    use super::*;
    use crate::persistence::traits::MockKeyValueStore;

    struct FixedState(Vec<u8>);

    impl MaintainedState for FixedState {
        fn gc(&self, _now: DateTime<Utc>, _retention: Duration) -> usize {
            0
        }

        fn marshal_binary(&self) -> Vec<u8> {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_filepath_for_existing_file_skips_store() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("silences"), b"x").await.unwrap();

        // No expectations: any key-value access would panic.
        let kv = MockKeyValueStore::new();
        let store = FileStore::new(1, Arc::new(kv), dir.path());
        assert_eq!(store.filepath_for("silences").await.unwrap(), dir.path().join("silences"));
    }

    #[tokio::test]
    async fn test_filepath_for_missing_key_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut kv = MockKeyValueStore::new();
        kv.expect_get().returning(|_, _, _| Ok(None));

        let store = FileStore::new(1, Arc::new(kv), dir.path().join("alerting/1"));
        let path = store.filepath_for("notifications").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_filepath_for_restores_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut kv = MockKeyValueStore::new();
        kv.expect_get()
            .withf(|org, ns, key| *org == 4 && ns == KV_NAMESPACE && key == "silences")
            .returning(|_, _, _| Ok(Some(BASE64.encode([1u8, 2, 3]))));

        let store = FileStore::new(4, Arc::new(kv), dir.path().join("alerting/4"));
        let path = store.filepath_for("silences").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_filepath_for_rejects_corrupt_store_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut kv = MockKeyValueStore::new();
        kv.expect_get().returning(|_, _, _| Ok(Some("%%%".into())));

        let store = FileStore::new(1, Arc::new(kv), dir.path());
        assert!(matches!(store.filepath_for("silences").await, Err(FileStoreError::Decode(_))));
    }

    #[tokio::test]
    async fn test_persist_writes_file_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut kv = MockKeyValueStore::new();
        let expected = BASE64.encode([9u8, 8, 7]);
        kv.expect_set()
            .withf(move |org, ns, key, value| {
                *org == 2 && ns == KV_NAMESPACE && key == "notifications" && value == expected
            })
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let store = FileStore::new(2, Arc::new(kv), dir.path().join("alerting/2"));
        let written = store.persist("notifications", &FixedState(vec![9, 8, 7])).await.unwrap();
        assert_eq!(written, 3);
        assert_eq!(
            tokio::fs::read(dir.path().join("alerting/2/notifications")).await.unwrap(),
            vec![9, 8, 7]
        );

        // Only the target file remains, no temporaries.
        let mut names = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir.path().join("alerting/2")).await.unwrap();
        while let Some(entry) = read_dir.next_entry().await.unwrap() {
            names.push(entry.file_name().into_string().unwrap());
        }
        assert_eq!(names, vec!["notifications".to_string()]);
    }

    #[tokio::test]
    async fn test_clean_up_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let working = dir.path().join("alerting/1");
        tokio::fs::create_dir_all(&working).await.unwrap();
        tokio::fs::write(working.join("silences"), b"x").await.unwrap();

        let store = FileStore::new(1, Arc::new(MockKeyValueStore::new()), &working);
        store.clean_up().await.unwrap();
        assert!(!working.exists());
        store.clean_up().await.unwrap();
    }
}
