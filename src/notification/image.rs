//! Resolution of alert screenshots to public URLs.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
#[cfg(test)]
use mockall::automock;

use crate::{
    models::{Alert, alert::IMAGE_TOKEN_ANNOTATION},
    persistence::traits::ImageStore,
};

/// Resolves the image URL attached to an alert.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// URL of the image attached to `alert`, if any.
    async fn image_url(&self, alert: &Alert) -> Option<String>;
}

/// Never resolves an image.
pub struct NoImageProvider;

#[async_trait]
impl ImageProvider for NoImageProvider {
    async fn image_url(&self, _alert: &Alert) -> Option<String> {
        None
    }
}

/// Looks images up in the image store by the token annotation.
pub struct StoreImageProvider {
    org_id: i64,
    store: Arc<dyn ImageStore>,
}

impl StoreImageProvider {
    /// Creates a provider reading `org_id`'s images from `store`.
    pub fn new(org_id: i64, store: Arc<dyn ImageStore>) -> Self {
        Self { org_id, store }
    }
}

#[async_trait]
impl ImageProvider for StoreImageProvider {
    async fn image_url(&self, alert: &Alert) -> Option<String> {
        let token = alert.annotations.get(IMAGE_TOKEN_ANNOTATION).filter(|t| !t.is_empty())?;
        let image = match self.store.get_image(self.org_id, token).await {
            Ok(Some(image)) => image,
            Ok(None) => {
                tracing::debug!(org_id = self.org_id, token, "Image not found.");
                return None;
            }
            Err(e) => {
                tracing::warn!(org_id = self.org_id, token, error = %e, "Failed to load image.");
                return None;
            }
        };
        if image.is_expired_at(Utc::now()) || !image.has_url() {
            return None;
        }
        image.url
    }
}
