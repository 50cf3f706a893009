use std::collections::BTreeMap;

use serde_json::Value;

use crate::models::{
    NotifierSettings, PostableApiAlertingConfig, PostableApiReceiver, PostableUserConfig, Route,
};

/// A builder for user configuration documents used in tests.
pub struct UserConfigBuilder {
    route: Route,
    receivers: Vec<PostableApiReceiver>,
    template_files: BTreeMap<String, String>,
}

impl UserConfigBuilder {
    /// Creates a document whose root route sends to `receiver`.
    pub fn new(receiver: &str) -> Self {
        Self {
            route: Route {
                receiver: Some(receiver.to_string()),
                group_by: vec!["alertname".to_string()],
                ..Default::default()
            },
            receivers: Vec::new(),
            template_files: BTreeMap::new(),
        }
    }

    /// Adds a receiver with a single integration.
    pub fn receiver(mut self, name: &str, notifier_type: &str, settings: Value) -> Self {
        self.receivers.push(PostableApiReceiver {
            name: name.to_string(),
            grafana_managed_receiver_configs: vec![NotifierSettings {
                uid: format!("{name}-uid"),
                name: name.to_string(),
                notifier_type: notifier_type.to_string(),
                settings,
                ..Default::default()
            }],
        });
        self
    }

    /// Adds a receiver with a webhook integration posting to `url`.
    pub fn webhook_receiver(self, name: &str, url: &str) -> Self {
        self.receiver(name, "webhook", serde_json::json!({ "url": url }))
    }

    /// Adds a child route under the root.
    pub fn child_route(mut self, route: Route) -> Self {
        self.route.routes.push(route);
        self
    }

    /// Sets the root group wait.
    pub fn group_wait(mut self, wait: &str) -> Self {
        self.route.group_wait = Some(wait.to_string());
        self
    }

    /// Adds a template file.
    pub fn template(mut self, name: &str, content: &str) -> Self {
        self.template_files.insert(name.to_string(), content.to_string());
        self
    }

    /// Returns the built document.
    pub fn build(self) -> PostableUserConfig {
        PostableUserConfig {
            template_files: self.template_files,
            alertmanager_config: PostableApiAlertingConfig {
                route: Some(self.route),
                receivers: self.receivers,
                ..Default::default()
            },
        }
    }
}
