use std::sync::Arc;

use reqwest::Client;
use reqwest_middleware::ClientWithMiddleware;

use crate::{
    config::HttpRetryConfig,
    http_client::{HttpClientPool, create_retryable_http_client},
};

/// Creates a default HTTP client with retry capabilities for testing purposes.
pub fn create_test_http_client() -> Arc<ClientWithMiddleware> {
    let retryable_client = create_retryable_http_client(&HttpRetryConfig::default(), Client::new());

    Arc::new(retryable_client)
}

/// Creates a test HTTP client from the http client pool that does not retry,
/// so failing endpoints fail fast.
pub fn create_test_http_client_without_retries() -> Arc<ClientWithMiddleware> {
    let pool = HttpClientPool::new();
    let retry_policy = HttpRetryConfig { max_retries: 0, ..Default::default() };
    pool.get_or_create(&retry_policy).unwrap()
}
