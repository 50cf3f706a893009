//! Implementation of the KeyValueStore trait for SqliteStateRepository

use async_trait::async_trait;

use crate::persistence::{
    error::PersistenceError, sqlite::SqliteStateRepository, traits::KeyValueStore,
};

#[async_trait]
impl KeyValueStore for SqliteStateRepository {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn get(
        &self,
        org_id: i64,
        namespace: &str,
        key: &str,
    ) -> Result<Option<String>, PersistenceError> {
        let row: Option<(String,)> = self
            .execute_query_with_error_handling(
                "get kv value",
                sqlx::query_as(
                    "SELECT value FROM kv_store WHERE org_id = ? AND namespace = ? AND key = ?",
                )
                .bind(org_id)
                .bind(namespace)
                .bind(key)
                .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(|(value,)| value))
    }

    #[tracing::instrument(skip(self, value), fields(len = value.len()), level = "debug")]
    async fn set(
        &self,
        org_id: i64,
        namespace: &str,
        key: &str,
        value: &str,
    ) -> Result<(), PersistenceError> {
        self.execute_query_with_error_handling(
            "set kv value",
            sqlx::query(
                "INSERT INTO kv_store (org_id, namespace, key, value) VALUES (?, ?, ?, ?) \
                 ON CONFLICT (org_id, namespace, key) \
                 DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
            )
            .bind(org_id)
            .bind(namespace)
            .bind(key)
            .bind(value)
            .execute(&self.pool),
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn delete(
        &self,
        org_id: i64,
        namespace: &str,
        key: &str,
    ) -> Result<(), PersistenceError> {
        let result = self
            .execute_query_with_error_handling(
                "delete kv value",
                sqlx::query("DELETE FROM kv_store WHERE org_id = ? AND namespace = ? AND key = ?")
                    .bind(org_id)
                    .bind(namespace)
                    .bind(key)
                    .execute(&self.pool),
            )
            .await?;

        tracing::debug!(deleted = result.rows_affected(), "Key deleted.");
        Ok(())
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn keys(&self, org_id: i64, namespace: &str) -> Result<Vec<String>, PersistenceError> {
        let rows: Vec<(String,)> = self
            .execute_query_with_error_handling(
                "list kv keys",
                sqlx::query_as(
                    "SELECT key FROM kv_store WHERE org_id = ? AND namespace = ? ORDER BY key",
                )
                .bind(org_id)
                .bind(namespace)
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }
}
