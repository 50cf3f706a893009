//! Configuration module for the tenant Alertmanager service.

mod app_config;
mod email_relay;
mod helpers;
mod http_retry;

pub use app_config::{AppConfig, DEFAULT_ALERTMANAGER_CONFIGURATION};
pub use email_relay::EmailRelayConfig;
pub use helpers::{
    deserialize_duration_from_ms, deserialize_duration_from_seconds, parse_model_duration,
    serialize_duration_to_ms, serialize_duration_to_seconds,
};
pub use http_retry::{HttpRetryConfig, JitterSetting};
