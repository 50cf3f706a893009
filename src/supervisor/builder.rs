//! This module provides the `SupervisorBuilder` for constructing a `Supervisor`.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use super::{Supervisor, SupervisorError};
use crate::{
    config::AppConfig,
    engine::AlertmanagerConfigMetrics,
    http_client::HttpClientPool,
    notification::{
        Decrypter, DisabledEmailSender, EmailSender, HttpEmailRelaySender, HttpWebhookSender,
        PlaintextDecrypter, WebhookSender,
    },
    persistence::traits::{AlertingStore, ImageStore, KeyValueStore},
};

/// A builder for creating a `Supervisor` instance.
#[derive(Default)]
pub struct SupervisorBuilder {
    config: Option<AppConfig>,
    alerting_store: Option<Arc<dyn AlertingStore>>,
    kv_store: Option<Arc<dyn KeyValueStore>>,
    image_store: Option<Arc<dyn ImageStore>>,
    webhook_sender: Option<Arc<dyn WebhookSender>>,
    email_sender: Option<Arc<dyn EmailSender>>,
    decrypter: Option<Arc<dyn Decrypter>>,
    registry: Option<prometheus::Registry>,
}

impl SupervisorBuilder {
    /// Creates a new, empty `SupervisorBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the application configuration for the `Supervisor`.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the store of saved configurations.
    pub fn alerting_store(mut self, store: Arc<dyn AlertingStore>) -> Self {
        self.alerting_store = Some(store);
        self
    }

    /// Sets the key-value store mirroring the state snapshots.
    pub fn key_value_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.kv_store = Some(store);
        self
    }

    /// Sets the image store used to resolve alert screenshots.
    pub fn image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.image_store = Some(store);
        self
    }

    /// Overrides the webhook transport. Defaults to HTTP through the client
    /// pool.
    pub fn webhook_sender(mut self, sender: Arc<dyn WebhookSender>) -> Self {
        self.webhook_sender = Some(sender);
        self
    }

    /// Overrides the email transport. Defaults to the configured relay, or a
    /// disabled sender without one.
    pub fn email_sender(mut self, sender: Arc<dyn EmailSender>) -> Self {
        self.email_sender = Some(sender);
        self
    }

    /// Overrides the decrypter of secure settings.
    pub fn decrypter(mut self, decrypter: Arc<dyn Decrypter>) -> Self {
        self.decrypter = Some(decrypter);
        self
    }

    /// Sets the registry the configuration gauges are registered in.
    pub fn registry(mut self, registry: prometheus::Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Assembles and validates the components to build a `Supervisor`.
    ///
    /// Transports that were not provided are built here from one shared HTTP
    /// client configured with the application's retry policy.
    pub fn build(self) -> Result<Supervisor, SupervisorError> {
        let config = self.config.ok_or(SupervisorError::MissingConfig)?;
        let alerting_store = self.alerting_store.ok_or(SupervisorError::MissingAlertingStore)?;
        let kv_store = self.kv_store.ok_or(SupervisorError::MissingKeyValueStore)?;
        let image_store = self.image_store.ok_or(SupervisorError::MissingImageStore)?;

        let pool = HttpClientPool::new();
        let webhook_sender = match self.webhook_sender {
            Some(sender) => sender,
            None => {
                let client = pool.get_or_create(&config.http_retry_config)?;
                Arc::new(HttpWebhookSender::new(client)) as Arc<dyn WebhookSender>
            }
        };
        let email_sender = match (self.email_sender, &config.email_relay) {
            (Some(sender), _) => sender,
            (None, Some(relay)) => {
                let client = pool.get_or_create(&config.http_retry_config)?;
                tracing::info!(url = %relay.url, "Emails are sent through the relay.");
                Arc::new(HttpEmailRelaySender::new(client, relay.clone())) as Arc<dyn EmailSender>
            }
            (None, None) => {
                tracing::warn!("No email relay configured, email integrations will fail to send.");
                Arc::new(DisabledEmailSender)
            }
        };
        let decrypter = self.decrypter.unwrap_or_else(|| Arc::new(PlaintextDecrypter));

        let registry = self.registry.unwrap_or_default();
        let metrics = AlertmanagerConfigMetrics::new(&registry)?;

        Ok(Supervisor {
            org_ids: RwLock::new(config.org_ids.clone()),
            config: Arc::new(config),
            alerting_store,
            kv_store,
            image_store,
            webhook_sender,
            email_sender,
            decrypter,
            metrics,
            registry,
            alertmanagers: DashMap::new(),
            cancellation_token: CancellationToken::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EmailRelayConfig,
        persistence::traits::{MockAlertingStore, MockImageStore, MockKeyValueStore},
    };

    fn complete() -> SupervisorBuilder {
        SupervisorBuilder::new()
            .config(AppConfig::default())
            .alerting_store(Arc::new(MockAlertingStore::new()))
            .key_value_store(Arc::new(MockKeyValueStore::new()))
            .image_store(Arc::new(MockImageStore::new()))
    }

    #[test]
    fn build_succeeds_with_all_stores() {
        let supervisor = complete().build().unwrap();
        assert!(supervisor.running_orgs().is_empty());
    }

    #[test]
    fn build_succeeds_with_email_relay() {
        let config = AppConfig::builder()
            .email_relay(EmailRelayConfig {
                url: url::Url::parse("http://relay.local/send").unwrap(),
                from_address: "alerts@example.com".into(),
                from_name: "Alerts".into(),
            })
            .build();
        assert!(complete().config(config).build().is_ok());
    }

    #[test]
    fn build_fails_if_config_is_missing() {
        let builder = SupervisorBuilder::new()
            .alerting_store(Arc::new(MockAlertingStore::new()))
            .key_value_store(Arc::new(MockKeyValueStore::new()))
            .image_store(Arc::new(MockImageStore::new()));
        assert!(matches!(builder.build(), Err(SupervisorError::MissingConfig)));
    }

    #[test]
    fn build_fails_if_alerting_store_is_missing() {
        let builder = SupervisorBuilder::new()
            .config(AppConfig::default())
            .key_value_store(Arc::new(MockKeyValueStore::new()))
            .image_store(Arc::new(MockImageStore::new()));
        assert!(matches!(builder.build(), Err(SupervisorError::MissingAlertingStore)));
    }

    #[test]
    fn build_fails_if_key_value_store_is_missing() {
        let builder = SupervisorBuilder::new()
            .config(AppConfig::default())
            .alerting_store(Arc::new(MockAlertingStore::new()))
            .image_store(Arc::new(MockImageStore::new()));
        assert!(matches!(builder.build(), Err(SupervisorError::MissingKeyValueStore)));
    }

    #[test]
    fn build_fails_if_image_store_is_missing() {
        let builder = SupervisorBuilder::new()
            .config(AppConfig::default())
            .alerting_store(Arc::new(MockAlertingStore::new()))
            .key_value_store(Arc::new(MockKeyValueStore::new()));
        assert!(matches!(builder.build(), Err(SupervisorError::MissingImageStore)));
    }

    #[test]
    fn build_fails_if_metrics_are_already_registered() {
        let registry = prometheus::Registry::new();
        AlertmanagerConfigMetrics::new(&registry).unwrap();
        let result = complete().registry(registry).build();
        assert!(matches!(result, Err(SupervisorError::Metrics(_))));
    }
}
