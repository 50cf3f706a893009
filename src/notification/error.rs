//! Error types for building and running receiver integrations.

use thiserror::Error;

use crate::http_client::HttpClientPoolError;

/// Failure to send one notification.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Invalid or missing configuration, detected at send time.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The remote endpoint rejected the notification.
    #[error("Notification failed: {0}")]
    NotifyFailed(String),

    /// An unexpected failure inside an integration.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// The HTTP client could not be created.
    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] HttpClientPoolError),

    /// The request failed after retries.
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest_middleware::Error),

    /// A title or message failed to render.
    #[error("Template rendering error: {0}")]
    TemplateError(#[from] TemplateError),
}

/// Failure to compile or render a notification template.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A template file failed to compile.
    #[error("invalid template {name}: {source}")]
    Invalid {
        /// The template file name.
        name: String,
        /// The template engine error.
        #[source]
        source: minijinja::Error,
    },

    /// A template failed to render.
    #[error("failed to render template: {0}")]
    Render(#[from] minijinja::Error),
}

/// Failure to decrypt a secure setting.
#[derive(Debug, Error)]
#[error("decryption failed: {0}")]
pub struct DecryptError(pub String);

/// Failure to turn a receiver definition into runnable integrations.
#[derive(Debug, Error)]
pub enum IntegrationBuildError {
    /// One integration is misconfigured. Never carries secret values.
    #[error(
        "failed to build integration \"{name}\" (uid \"{uid}\", type \"{integration_type}\") of receiver \"{receiver}\": {reason}"
    )]
    Integration {
        /// Receiver the integration belongs to.
        receiver: String,
        /// Integration name.
        name: String,
        /// Integration uid.
        uid: String,
        /// Integration type, e.g. `webhook`.
        integration_type: String,
        /// Why the settings were rejected.
        reason: String,
    },

    /// Every failure of a configuration, in receiver order.
    #[error("{}", join_failures(.0))]
    Multiple(Vec<IntegrationBuildError>),
}

impl IntegrationBuildError {
    /// The individual integration failures.
    pub fn failures(&self) -> Vec<&IntegrationBuildError> {
        match self {
            IntegrationBuildError::Multiple(all) => all.iter().flat_map(|e| e.failures()).collect(),
            single => vec![single],
        }
    }
}

fn join_failures(failures: &[IntegrationBuildError]) -> String {
    failures.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}
