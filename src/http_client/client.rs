//! Construction of HTTP clients that retry transient failures.

use std::time::Duration;

use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{Jitter, RetryTransientMiddleware, policies::ExponentialBackoff};

use crate::config::{HttpRetryConfig, JitterSetting};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the base `reqwest` client used by every notification transport.
pub fn create_base_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(10)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("tenant-alertmanager/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Wraps `base_client` with exponential-backoff retries for transient errors.
pub fn create_retryable_http_client(
    config: &HttpRetryConfig,
    base_client: reqwest::Client,
) -> ClientWithMiddleware {
    let jitter = match config.jitter {
        JitterSetting::None => Jitter::None,
        JitterSetting::Full => Jitter::Full,
    };
    let policy = ExponentialBackoff::builder()
        .jitter(jitter)
        .base(config.base_for_backoff)
        .retry_bounds(config.initial_backoff_ms, config.max_backoff_secs)
        .build_with_max_retries(config.max_retries);

    ClientBuilder::new(base_client).with(RetryTransientMiddleware::new_with_policy(policy)).build()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn fast_retries(max_retries: u32) -> HttpRetryConfig {
        HttpRetryConfig {
            max_retries,
            initial_backoff_ms: Duration::from_millis(1),
            max_backoff_secs: Duration::from_millis(5),
            jitter: JitterSetting::None,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let failing = server.mock("POST", "/").with_status(503).expect(3).create_async().await;

        let client = create_retryable_http_client(&fast_retries(2), create_base_client().unwrap());
        let response = client.post(server.url()).send().await.unwrap();

        assert_eq!(response.status(), 503);
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_does_not_retry_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let rejected = server.mock("POST", "/").with_status(400).expect(1).create_async().await;

        let client = create_retryable_http_client(&fast_retries(3), create_base_client().unwrap());
        let response = client.post(server.url()).send().await.unwrap();

        assert_eq!(response.status(), 400);
        rejected.assert_async().await;
    }
}
