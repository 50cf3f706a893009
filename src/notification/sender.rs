//! Transports shared by every integration of a tenant.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
#[cfg(test)]
use mockall::automock;
use reqwest::{
    Method,
    header::{HeaderMap, HeaderName, HeaderValue},
};
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use sha2::Sha256;

use super::error::NotificationError;
use crate::config::EmailRelayConfig;

type HmacSha256 = Hmac<Sha256>;

/// A JSON request to a webhook-style endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookMessage {
    /// Endpoint.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Username and password for basic auth.
    pub basic_auth: Option<(String, String)>,
    /// Key for the `X-Signature` HMAC header.
    pub secret: Option<String>,
    /// JSON body.
    pub body: serde_json::Value,
}

impl WebhookMessage {
    /// A `POST` of `body` to `url` without auth or headers.
    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            url: url.into(),
            method: Method::POST,
            headers: BTreeMap::new(),
            basic_auth: None,
            secret: None,
            body,
        }
    }
}

/// A rendered email.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailMessage {
    /// Recipient addresses.
    pub to: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Rendered body.
    pub body: String,
}

/// Transport of webhook-style requests, shared by the integrations of an org.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait WebhookSender: Send + Sync {
    /// Sends `message`; non-success statuses are errors.
    async fn send_webhook(&self, message: &WebhookMessage) -> Result<(), NotificationError>;
}

/// Transport of emails, shared by the integrations of an org.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Sends `message` to every recipient.
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

/// Sends webhooks over a retrying HTTP client.
pub struct HttpWebhookSender {
    client: Arc<ClientWithMiddleware>,
}

impl HttpWebhookSender {
    /// Creates a sender using `client`.
    pub fn new(client: Arc<ClientWithMiddleware>) -> Self {
        Self { client }
    }
}

/// Signs `payload` with HMAC-SHA256 over the serialized JSON followed by the
/// timestamp in milliseconds. Returns the hex signature and the timestamp.
pub fn sign_payload(
    secret: &str,
    payload: &serde_json::Value,
    timestamp_ms: i64,
) -> Result<(String, String), NotificationError> {
    // new_from_slice accepts empty keys.
    if secret.is_empty() {
        return Err(NotificationError::ConfigError("signing secret must not be empty".into()));
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| NotificationError::ConfigError(format!("invalid signing secret: {e}")))?;
    let serialized = serde_json::to_string(payload)
        .map_err(|e| NotificationError::InternalError(format!("failed to serialize payload: {e}")))?;
    mac.update(format!("{serialized}{timestamp_ms}").as_bytes());
    Ok((hex::encode(mac.finalize().into_bytes()), timestamp_ms.to_string()))
}

fn build_headers(message: &WebhookMessage) -> Result<HeaderMap, NotificationError> {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static("application/json"),
    );

    if let Some(secret) = &message.secret {
        let (signature, timestamp) = sign_payload(secret, &message.body, Utc::now().timestamp_millis())?;
        headers.insert(
            HeaderName::from_static("x-signature"),
            HeaderValue::from_str(&signature)
                .map_err(|e| NotificationError::NotifyFailed(format!("Invalid signature value: {e}")))?,
        );
        headers.insert(
            HeaderName::from_static("x-timestamp"),
            HeaderValue::from_str(&timestamp)
                .map_err(|e| NotificationError::NotifyFailed(format!("Invalid timestamp value: {e}")))?,
        );
    }

    for (key, value) in &message.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| NotificationError::NotifyFailed(format!("Invalid header name: {key}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| NotificationError::NotifyFailed(format!("Invalid header value for {key}: {e}")))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    #[tracing::instrument(skip(self, message), fields(method = %message.method), level = "debug")]
    async fn send_webhook(&self, message: &WebhookMessage) -> Result<(), NotificationError> {
        let headers = build_headers(message)?;
        let mut request =
            self.client.request(message.method.clone(), message.url.as_str()).headers(headers);
        if let Some((user, password)) = &message.basic_auth {
            request = request.basic_auth(user, Some(password));
        }

        let response = request.json(&message.body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::NotifyFailed(format!(
                "Webhook request failed with status: {status}"
            )));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct RelayAddress<'a> {
    address: &'a str,
    name: &'a str,
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: RelayAddress<'a>,
    to: &'a [String],
    subject: &'a str,
    body: &'a str,
}

/// Delivers emails by posting them to an HTTP relay.
pub struct HttpEmailRelaySender {
    client: Arc<ClientWithMiddleware>,
    config: EmailRelayConfig,
}

impl HttpEmailRelaySender {
    /// Creates a sender posting to the relay in `config`.
    pub fn new(client: Arc<ClientWithMiddleware>, config: EmailRelayConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl EmailSender for HttpEmailRelaySender {
    #[tracing::instrument(skip(self, message), fields(recipients = message.to.len()), level = "debug")]
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        if message.to.is_empty() {
            return Err(NotificationError::ConfigError("email has no recipients".into()));
        }
        let request = RelayRequest {
            from: RelayAddress { address: &self.config.from_address, name: &self.config.from_name },
            to: &message.to,
            subject: &message.subject,
            body: &message.body,
        };
        let response = self.client.post(self.config.url.clone()).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::NotifyFailed(format!(
                "Email relay rejected message with status: {status}"
            )));
        }
        Ok(())
    }
}

/// Rejects every email; used when no relay is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledEmailSender;

#[async_trait]
impl EmailSender for DisabledEmailSender {
    async fn send_email(&self, _message: &EmailMessage) -> Result<(), NotificationError> {
        Err(NotificationError::ConfigError("no email relay configured".into()))
    }
}
