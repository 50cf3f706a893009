//! SQLite implementation of the storage contracts.

use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};

pub mod alerting_store;
pub mod image_store;
pub mod key_value_store;

use crate::persistence::error::PersistenceError;

/// Shared SQLite repository. Every row is keyed by org id.
pub struct SqliteStateRepository {
    /// The SQLite connection pool used for database operations.
    pool: SqlitePool,
}

impl SqliteStateRepository {
    /// Connects to `database_url`, creating the database file if needed.
    ///
    /// In-memory databases are confined to a single long-lived connection so
    /// that every query sees the same database.
    #[tracing::instrument(level = "info")]
    pub async fn new(database_url: &str) -> Result<Self, PersistenceError> {
        tracing::debug!(database_url, "Attempting to connect to SQLite database.");
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| PersistenceError::InvalidInput(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new().max_connections(1).idle_timeout(None).max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
        };

        let pool = pool_options.connect_with(options).await.map_err(|e| {
            PersistenceError::OperationFailed(format!("Failed to connect to database: {e}"))
        })?;
        tracing::info!(database_url, "Successfully connected to SQLite database.");
        Ok(Self { pool })
    }

    /// Runs database migrations.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn run_migrations(&self) -> Result<(), PersistenceError> {
        tracing::debug!("Running database migrations.");
        sqlx::migrate!("./migrations").run(&self.pool).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run database migrations.");
            PersistenceError::MigrationError(e.to_string())
        })?;
        tracing::info!("Database migrations completed successfully.");
        Ok(())
    }

    /// Gets access to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Flushes the WAL and closes the pool.
    #[tracing::instrument(skip(self), level = "info")]
    pub async fn close(&self) {
        if let Err(e) = self.execute_pragma("PRAGMA wal_checkpoint(TRUNCATE)", "checkpoint").await
        {
            tracing::warn!(error = %e, "WAL checkpoint before close failed.");
        }
        self.pool.close().await;
        tracing::info!("SQLite connection pool closed successfully.");
    }

    async fn execute_pragma(&self, pragma: &str, operation: &str) -> Result<(), PersistenceError> {
        sqlx::query(pragma)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, pragma = %pragma, operation = %operation, "Failed to execute PRAGMA command.");
                PersistenceError::OperationFailed(e.to_string())
            })?;
        Ok(())
    }

    /// Helper to execute database queries with consistent error handling
    async fn execute_query_with_error_handling<F, T, E>(
        &self,
        operation: &str,
        query_fn: F,
    ) -> Result<T, PersistenceError>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: std::error::Error,
    {
        query_fn.await.map_err(|e| {
            tracing::error!(error = %e, operation = %operation, "Database operation failed.");
            PersistenceError::OperationFailed(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_in_memory_and_migrate() {
        let repo = SqliteStateRepository::new("sqlite::memory:").await.unwrap();
        repo.run_migrations().await.unwrap();
        // Migrations are idempotent.
        repo.run_migrations().await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM alert_configuration")
            .fetch_one(repo.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 0);
        repo.close().await;
    }
}
