//! Implementation of the ImageStore trait for SqliteStateRepository

use async_trait::async_trait;
use chrono::DateTime;

use crate::{
    models::image::Image,
    persistence::{error::PersistenceError, sqlite::SqliteStateRepository, traits::ImageStore},
};

#[derive(sqlx::FromRow)]
struct ImageRow {
    token: String,
    path: Option<String>,
    url: Option<String>,
    created_at: i64,
    expires_at: i64,
}

#[async_trait]
impl ImageStore for SqliteStateRepository {
    #[tracing::instrument(skip(self), level = "debug")]
    async fn get_image(&self, org_id: i64, token: &str) -> Result<Option<Image>, PersistenceError> {
        let row = self
            .execute_query_with_error_handling(
                "get image",
                sqlx::query_as::<_, ImageRow>(
                    "SELECT token, path, url, created_at, expires_at FROM alert_image \
                     WHERE org_id = ? AND token = ?",
                )
                .bind(org_id)
                .bind(token)
                .fetch_optional(&self.pool),
            )
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let created_at = DateTime::from_timestamp(row.created_at, 0);
        let expires_at = DateTime::from_timestamp(row.expires_at, 0);
        match (created_at, expires_at) {
            (Some(created_at), Some(expires_at)) => Ok(Some(Image {
                token: row.token,
                path: row.path,
                url: row.url,
                created_at,
                expires_at,
            })),
            _ => Err(PersistenceError::SerializationError(format!(
                "image {token} has an invalid timestamp"
            ))),
        }
    }

    #[tracing::instrument(skip(self, image), fields(token = %image.token), level = "debug")]
    async fn save_image(&self, org_id: i64, image: &Image) -> Result<(), PersistenceError> {
        if image.token.is_empty() {
            return Err(PersistenceError::InvalidInput("image token cannot be empty".into()));
        }
        self.execute_query_with_error_handling(
            "save image",
            sqlx::query(
                "INSERT OR REPLACE INTO alert_image (org_id, token, path, url, created_at, \
                 expires_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(org_id)
            .bind(&image.token)
            .bind(&image.path)
            .bind(&image.url)
            .bind(image.created_at.timestamp())
            .bind(image.expires_at.timestamp())
            .execute(&self.pool),
        )
        .await?;
        Ok(())
    }
}
