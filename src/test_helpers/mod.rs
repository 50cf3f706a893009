//! A set of helpers for testing

mod alert;
mod config;
mod http_client;
mod senders;
mod store;

pub use alert::AlertBuilder;
pub use config::UserConfigBuilder;
pub use http_client::{create_test_http_client, create_test_http_client_without_retries};
pub use senders::{
    RecordingEmailSender, RecordingWebhookSender, create_test_integration_builder,
    test_integration_builder,
};
pub use store::{MemoryKeyValueStore, RecordingStagedConfiguration, StagedOutcome};
