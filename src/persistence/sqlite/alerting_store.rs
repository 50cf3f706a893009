//! Implementation of the AlertingStore trait for SqliteStateRepository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Sqlite, Transaction};

use crate::{
    models::{
        AlertConfiguration, MarkConfigurationAsAppliedCmd, SaveAlertmanagerConfigurationCmd,
    },
    persistence::{
        error::PersistenceError,
        sqlite::SqliteStateRepository,
        traits::{AlertingStore, StagedConfiguration},
    },
};

const SELECT_COLUMNS: &str = "SELECT id, org_id, alertmanager_configuration, configuration_hash, \
     configuration_version, is_default, created_at, last_applied, applied FROM alert_configuration";

// Helper struct for mapping from the database row
#[derive(sqlx::FromRow)]
struct AlertConfigurationRow {
    id: i64,
    org_id: i64,
    alertmanager_configuration: String,
    configuration_hash: String,
    configuration_version: String,
    is_default: bool,
    created_at: i64,
    last_applied: Option<i64>,
    applied: bool,
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PersistenceError::SerializationError(format!("invalid timestamp {secs}")))
}

impl TryFrom<AlertConfigurationRow> for AlertConfiguration {
    type Error = PersistenceError;

    fn try_from(row: AlertConfigurationRow) -> Result<Self, Self::Error> {
        Ok(AlertConfiguration {
            id: row.id,
            org_id: row.org_id,
            alertmanager_configuration: row.alertmanager_configuration,
            configuration_hash: row.configuration_hash,
            configuration_version: row.configuration_version,
            is_default: row.is_default,
            created_at: timestamp(row.created_at)?,
            last_applied: row.last_applied.map(timestamp).transpose()?,
            applied: row.applied,
        })
    }
}

/// A configuration row inserted inside an open SQLite transaction.
struct SqliteStagedConfiguration {
    tx: Transaction<'static, Sqlite>,
    org_id: i64,
    configuration_hash: String,
}

#[async_trait]
impl StagedConfiguration for SqliteStagedConfiguration {
    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        let (org_id, hash) = (self.org_id, self.configuration_hash);
        self.tx.commit().await.map_err(|e| {
            tracing::error!(error = %e, org_id, hash = %hash, "Failed to commit staged configuration.");
            PersistenceError::OperationFailed(e.to_string())
        })?;
        tracing::debug!(org_id, hash = %hash, "Staged configuration committed.");
        Ok(())
    }

    async fn abort(self: Box<Self>) -> Result<(), PersistenceError> {
        let (org_id, hash) = (self.org_id, self.configuration_hash);
        self.tx.rollback().await.map_err(|e| {
            tracing::error!(error = %e, org_id, hash = %hash, "Failed to roll back staged configuration.");
            PersistenceError::OperationFailed(e.to_string())
        })?;
        tracing::debug!(org_id, hash = %hash, "Staged configuration rolled back.");
        Ok(())
    }
}

#[async_trait]
impl AlertingStore for SqliteStateRepository {
    // The open transaction holds SQLite's database-wide write lock until the
    // caller commits or aborts, so writes of other orgs wait for this apply.
    #[tracing::instrument(skip(self, cmd), fields(org_id = cmd.org_id, hash = %cmd.configuration_hash), level = "debug")]
    async fn stage_configuration(
        &self,
        cmd: SaveAlertmanagerConfigurationCmd,
    ) -> Result<Box<dyn StagedConfiguration>, PersistenceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PersistenceError::OperationFailed(e.to_string()))?;

        let now = Utc::now().timestamp();

        sqlx::query("UPDATE alert_configuration SET applied = 0 WHERE org_id = ?")
            .bind(cmd.org_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PersistenceError::OperationFailed(e.to_string()))?;

        sqlx::query(
            "INSERT INTO alert_configuration (org_id, alertmanager_configuration, \
             configuration_hash, configuration_version, is_default, created_at, last_applied, \
             applied) VALUES (?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(cmd.org_id)
        .bind(&cmd.alertmanager_configuration)
        .bind(&cmd.configuration_hash)
        .bind(&cmd.configuration_version)
        .bind(cmd.is_default)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| PersistenceError::OperationFailed(e.to_string()))?;

        tracing::debug!("Configuration staged.");
        Ok(Box::new(SqliteStagedConfiguration {
            tx,
            org_id: cmd.org_id,
            configuration_hash: cmd.configuration_hash,
        }))
    }

    #[tracing::instrument(skip(self, cmd), fields(org_id = cmd.org_id, hash = %cmd.configuration_hash), level = "debug")]
    async fn mark_configuration_applied(
        &self,
        cmd: MarkConfigurationAsAppliedCmd,
    ) -> Result<(), PersistenceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PersistenceError::OperationFailed(e.to_string()))?;

        let id: Option<(i64,)> = sqlx::query_as(
            "SELECT id FROM alert_configuration WHERE org_id = ? AND configuration_hash = ? \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(cmd.org_id)
        .bind(&cmd.configuration_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| PersistenceError::OperationFailed(e.to_string()))?;

        let Some((id,)) = id else {
            return Err(PersistenceError::NotFound(format!(
                "configuration with hash {} for org {}",
                cmd.configuration_hash, cmd.org_id
            )));
        };

        sqlx::query("UPDATE alert_configuration SET applied = (id = ?) WHERE org_id = ?")
            .bind(id)
            .bind(cmd.org_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PersistenceError::OperationFailed(e.to_string()))?;

        sqlx::query("UPDATE alert_configuration SET last_applied = ? WHERE id = ?")
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| PersistenceError::OperationFailed(e.to_string()))?;

        tx.commit().await.map_err(|e| PersistenceError::OperationFailed(e.to_string()))?;

        tracing::info!(id, "Configuration marked as applied.");
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn get_latest_configuration(
        &self,
        org_id: i64,
    ) -> Result<AlertConfiguration, PersistenceError> {
        let sql = format!("{SELECT_COLUMNS} WHERE org_id = ? ORDER BY id DESC LIMIT 1");
        let row = self
            .execute_query_with_error_handling(
                "get latest configuration",
                sqlx::query_as::<_, AlertConfigurationRow>(&sql)
                    .bind(org_id)
                    .fetch_optional(&self.pool),
            )
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => {
                tracing::debug!(org_id, "No saved configuration found.");
                Err(PersistenceError::NotFound(format!("configuration for org {org_id}")))
            }
        }
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn get_applied_configurations(
        &self,
        org_id: i64,
        limit: i64,
    ) -> Result<Vec<AlertConfiguration>, PersistenceError> {
        let sql = format!(
            "{SELECT_COLUMNS} WHERE org_id = ? AND last_applied IS NOT NULL \
             ORDER BY last_applied DESC, id DESC LIMIT ?"
        );
        let rows = self
            .execute_query_with_error_handling(
                "get applied configurations",
                sqlx::query_as::<_, AlertConfigurationRow>(&sql)
                    .bind(org_id)
                    .bind(limit)
                    .fetch_all(&self.pool),
            )
            .await?;

        rows.into_iter().map(AlertConfiguration::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqliteStateRepository {
        let repo = SqliteStateRepository::new("sqlite::memory:")
            .await
            .expect("Failed to connect to in-memory db");
        repo.run_migrations().await.expect("Failed to run migrations");
        repo
    }

    #[tokio::test]
    async fn test_stage_and_commit() {
        let repo = setup_test_db().await;
        let cmd = SaveAlertmanagerConfigurationCmd::new(1, b"{\"a\":1}", false);

        let staged = repo.stage_configuration(cmd.clone()).await.unwrap();
        staged.commit().await.unwrap();

        let latest = repo.get_latest_configuration(1).await.unwrap();
        assert_eq!(latest.org_id, 1);
        assert_eq!(latest.alertmanager_configuration, "{\"a\":1}");
        assert_eq!(latest.configuration_hash, cmd.configuration_hash);
        assert_eq!(latest.configuration_version, "v1");
        assert!(latest.applied);
        assert!(latest.last_applied.is_some());
        assert!(!latest.is_default);
    }

    #[tokio::test]
    async fn test_stage_and_abort_leaves_nothing() {
        let repo = setup_test_db().await;
        let staged = repo
            .stage_configuration(SaveAlertmanagerConfigurationCmd::new(1, b"{}", true))
            .await
            .unwrap();
        staged.abort().await.unwrap();

        let result = repo.get_latest_configuration(1).await;
        assert!(matches!(result, Err(PersistenceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_new_version_unmarks_previous() {
        let repo = setup_test_db().await;
        for raw in [&b"{\"v\":1}"[..], &b"{\"v\":2}"[..]] {
            repo.stage_configuration(SaveAlertmanagerConfigurationCmd::new(1, raw, false))
                .await
                .unwrap()
                .commit()
                .await
                .unwrap();
        }

        let history = repo.get_applied_configurations(1, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].alertmanager_configuration, "{\"v\":2}");
        assert!(history[0].applied);
        assert!(!history[1].applied);

        let limited = repo.get_applied_configurations(1, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_orgs_are_isolated() {
        let repo = setup_test_db().await;
        repo.stage_configuration(SaveAlertmanagerConfigurationCmd::new(1, b"{}", false))
            .await
            .unwrap()
            .commit()
            .await
            .unwrap();

        assert!(repo.get_latest_configuration(1).await.is_ok());
        assert!(matches!(
            repo.get_latest_configuration(2).await,
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_configuration_applied() {
        let repo = setup_test_db().await;
        let first = SaveAlertmanagerConfigurationCmd::new(1, b"{\"v\":1}", false);
        let second = SaveAlertmanagerConfigurationCmd::new(1, b"{\"v\":2}", false);
        for cmd in [first.clone(), second] {
            repo.stage_configuration(cmd).await.unwrap().commit().await.unwrap();
        }

        repo.mark_configuration_applied(MarkConfigurationAsAppliedCmd {
            org_id: 1,
            configuration_hash: first.configuration_hash.clone(),
        })
        .await
        .unwrap();

        let history = repo.get_applied_configurations(1, 10).await.unwrap();
        let applied: Vec<_> = history.iter().filter(|c| c.applied).collect();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].configuration_hash, first.configuration_hash);
    }

    #[tokio::test]
    async fn test_mark_unknown_hash_is_not_found() {
        let repo = setup_test_db().await;
        let result = repo
            .mark_configuration_applied(MarkConfigurationAsAppliedCmd {
                org_id: 1,
                configuration_hash: "deadbeef".into(),
            })
            .await;
        assert!(matches!(result, Err(PersistenceError::NotFound(_))));
    }
}
