//! A shared pool of HTTP clients, one per retry policy.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use reqwest_middleware::ClientWithMiddleware;
use thiserror::Error;

use super::client::{create_base_client, create_retryable_http_client};
use crate::config::HttpRetryConfig;

/// Errors of the client pool.
#[derive(Debug, Error)]
pub enum HttpClientPoolError {
    /// The underlying reqwest client could not be built.
    #[error("Failed to create HTTP client: {0}")]
    HttpClientBuildError(#[from] reqwest::Error),
}

/// Clients keyed by their retry policy, so every transport with the same
/// policy shares one connection pool.
#[derive(Default)]
pub struct HttpClientPool {
    clients: DashMap<HttpRetryConfig, Arc<ClientWithMiddleware>>,
}

impl HttpClientPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the client for `retry_policy`, creating it on first use.
    pub fn get_or_create(
        &self,
        retry_policy: &HttpRetryConfig,
    ) -> Result<Arc<ClientWithMiddleware>, HttpClientPoolError> {
        if let Some(client) = self.clients.get(retry_policy) {
            return Ok(Arc::clone(&client));
        }
        match self.clients.entry(retry_policy.clone()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let client =
                    Arc::new(create_retryable_http_client(retry_policy, create_base_client()?));
                tracing::debug!(policy = ?retry_policy, "Created HTTP client.");
                entry.insert(Arc::clone(&client));
                Ok(client)
            }
        }
    }

    /// Number of distinct clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client was created yet.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
