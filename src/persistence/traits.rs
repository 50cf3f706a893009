//! Storage contracts used by the Alertmanager instances.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::{
    models::{
        AlertConfiguration, MarkConfigurationAsAppliedCmd, SaveAlertmanagerConfigurationCmd,
        image::Image,
    },
    persistence::error::PersistenceError,
};

/// A configuration insert that has been written inside an open transaction but
/// not yet made durable. Dropping it without `commit` rolls the write back.
#[async_trait]
pub trait StagedConfiguration: Send {
    /// Makes the staged write durable.
    async fn commit(self: Box<Self>) -> Result<(), PersistenceError>;

    /// Discards the staged write.
    async fn abort(self: Box<Self>) -> Result<(), PersistenceError>;
}

/// Persistence of saved Alertmanager configurations.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AlertingStore: Send + Sync {
    /// Writes a new configuration version, marked as the applied one, inside a
    /// transaction the caller must commit or abort.
    async fn stage_configuration(
        &self,
        cmd: SaveAlertmanagerConfigurationCmd,
    ) -> Result<Box<dyn StagedConfiguration>, PersistenceError>;

    /// Marks the most recent version with the given hash as applied.
    async fn mark_configuration_applied(
        &self,
        cmd: MarkConfigurationAsAppliedCmd,
    ) -> Result<(), PersistenceError>;

    /// Returns the most recently saved version of the org.
    async fn get_latest_configuration(
        &self,
        org_id: i64,
    ) -> Result<AlertConfiguration, PersistenceError>;

    /// Returns previously applied versions, newest first.
    async fn get_applied_configurations(
        &self,
        org_id: i64,
        limit: i64,
    ) -> Result<Vec<AlertConfiguration>, PersistenceError>;
}

/// Org-scoped string key-value store.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value of `key`, if set.
    async fn get(
        &self,
        org_id: i64,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, PersistenceError>;

    /// Sets `key` to `value`, replacing any previous value.
    async fn set(
        &self,
        org_id: i64,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), PersistenceError>;

    /// Removes `key`. Missing keys are not an error.
    async fn delete(&self, org_id: i64, namespace: &str, key: &str)
    -> Result<(), PersistenceError>;

    /// Lists the keys of a namespace, sorted.
    async fn keys(&self, org_id: i64, namespace: &str) -> Result<Vec<String>, PersistenceError>;
}

/// Storage of screenshots referenced by alerts.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Returns the image with `token` of `org_id`, if stored.
    async fn get_image(&self, org_id: i64, token: &str) -> Result<Option<Image>, PersistenceError>;

    /// Inserts or replaces `image`.
    async fn save_image(&self, org_id: i64, image: &Image) -> Result<(), PersistenceError>;
}
