//! Screenshots attached to alert notifications.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored image, referenced from alerts by its token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    /// Token referenced by the `__alertImageToken__` annotation.
    pub token: String,
    /// Local path, if the image was written to disk.
    pub path: Option<String>,
    /// Public URL, if the image was uploaded.
    pub url: Option<String>,
    /// When the image was stored.
    pub created_at: DateTime<Utc>,
    /// When the image expires.
    pub expires_at: DateTime<Utc>,
}

impl Image {
    /// Whether the image has a non-empty public URL.
    pub fn has_url(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.is_empty())
    }

    /// Whether the image expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
