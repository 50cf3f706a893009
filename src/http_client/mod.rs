//! HTTP clients for the notification transports.

mod client;
mod pool;

pub use client::{create_base_client, create_retryable_http_client};
pub use pool::{HttpClientPool, HttpClientPoolError};
