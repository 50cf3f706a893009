use std::{path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use super::{
    EmailRelayConfig, HttpRetryConfig, deserialize_duration_from_seconds,
    serialize_duration_to_seconds,
};

/// The configuration every org starts from until a user saves its own.
pub const DEFAULT_ALERTMANAGER_CONFIGURATION: &str = r#"{
  "alertmanager_config": {
    "route": {
      "receiver": "default-email",
      "group_by": ["grafana_folder", "alertname"]
    },
    "receivers": [
      {
        "name": "default-email",
        "grafana_managed_receiver_configs": [
          {
            "uid": "",
            "name": "email receiver",
            "type": "email",
            "settings": {
              "addresses": "<example@email.com>"
            }
          }
        ]
      }
    ]
  }
}"#;

fn default_app_url() -> String {
    "http://localhost:3000/".to_string()
}

fn default_configuration() -> String {
    DEFAULT_ALERTMANAGER_CONFIGURATION.to_string()
}

fn default_maintenance_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_retention() -> Duration {
    Duration::from_secs(5 * 24 * 60 * 60)
}

fn default_sync_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_dispatch_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_resolve_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Application configuration for the tenant Alertmanager service.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Database URL for the SQLite database.
    pub database_url: String,

    /// Root of the on-disk state. Tenant working directories live under
    /// `<data_path>/alerting/<org_id>/`.
    pub data_path: PathBuf,

    /// External URL linked from notifications.
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Orgs served by this process.
    #[serde(default)]
    pub org_ids: Vec<i64>,

    /// Raw configuration document applied to orgs without a saved one.
    #[serde(default = "default_configuration")]
    pub default_configuration: String,

    /// How often silences are garbage collected and flushed to disk.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default = "default_maintenance_interval"
    )]
    pub silence_maintenance_interval: Duration,

    /// How often the notification log is garbage collected and flushed.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default = "default_maintenance_interval"
    )]
    pub notification_log_maintenance_interval: Duration,

    /// How long expired silences and notification log entries are kept.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default = "default_retention"
    )]
    pub maintenance_retention: Duration,

    /// Interval between database syncs of every org's configuration.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default = "default_sync_interval"
    )]
    pub sync_interval: Duration,

    /// Interval between dispatcher passes over the stored alerts.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default = "default_dispatch_interval"
    )]
    pub dispatch_interval: Duration,

    /// End time given to alerts posted without one.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default = "default_resolve_timeout"
    )]
    pub resolve_timeout: Duration,

    /// The maximum time in seconds to wait for graceful shutdown.
    #[serde(
        deserialize_with = "deserialize_duration_from_seconds",
        serialize_with = "serialize_duration_to_seconds",
        default = "default_shutdown_timeout"
    )]
    pub shutdown_timeout: Duration,

    /// Retry policy of the webhook and email relay transports.
    #[serde(default)]
    pub http_retry_config: HttpRetryConfig,

    /// Optional email relay. Email integrations fail to send without it.
    #[serde(default)]
    pub email_relay: Option<EmailRelayConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite::memory:".to_string(),
            data_path: PathBuf::from("data"),
            app_url: default_app_url(),
            org_ids: Vec::new(),
            default_configuration: default_configuration(),
            silence_maintenance_interval: default_maintenance_interval(),
            notification_log_maintenance_interval: default_maintenance_interval(),
            maintenance_retention: default_retention(),
            sync_interval: default_sync_interval(),
            dispatch_interval: default_dispatch_interval(),
            resolve_timeout: default_resolve_timeout(),
            shutdown_timeout: default_shutdown_timeout(),
            http_retry_config: HttpRetryConfig::default(),
            email_relay: None,
        }
    }
}

impl AppConfig {
    /// Creates a new `AppConfig` by reading `app.yaml` from the configuration
    /// directory, with `TENANT_AM__` prefixed environment overrides.
    pub fn new(config_dir: Option<&str>) -> Result<Self, ConfigError> {
        let config_dir_str = config_dir.unwrap_or("configs");
        let s = Config::builder()
            .add_source(File::with_name(&format!("{config_dir_str}/app.yaml")))
            .add_source(
                Environment::with_prefix("TENANT_AM")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("org_ids")
                    .try_parsing(true),
            )
            .build()?;
        s.try_deserialize()
    }

    /// Creates a new `AppConfigBuilder` for testing purposes.
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }
}

/// A builder for creating `AppConfig` instances in tests.
#[derive(Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Sets the database url.
    pub fn database_url(mut self, url: &str) -> Self {
        self.config.database_url = url.to_string();
        self
    }

    /// Sets the data directory.
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_path = path.into();
        self
    }

    /// Sets the managed org ids.
    pub fn org_ids(mut self, org_ids: Vec<i64>) -> Self {
        self.config.org_ids = org_ids;
        self
    }

    /// Sets the default configuration document.
    pub fn default_configuration(mut self, raw: &str) -> Self {
        self.config.default_configuration = raw.to_string();
        self
    }

    /// Sets the retention of expired state.
    pub fn maintenance_retention(mut self, retention: Duration) -> Self {
        self.config.maintenance_retention = retention;
        self
    }

    /// Sets both maintenance intervals.
    pub fn maintenance_intervals(mut self, interval: Duration) -> Self {
        self.config.silence_maintenance_interval = interval;
        self.config.notification_log_maintenance_interval = interval;
        self
    }

    /// Sets the dispatcher interval. Zero disables it.
    pub fn dispatch_interval(mut self, interval: Duration) -> Self {
        self.config.dispatch_interval = interval;
        self
    }

    /// Enables email through `relay`.
    pub fn email_relay(mut self, relay: EmailRelayConfig) -> Self {
        self.config.email_relay = Some(relay);
        self
    }

    /// Returns the built configuration.
    pub fn build(self) -> AppConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_builder() {
        let config = AppConfig::builder()
            .database_url("sqlite::memory:")
            .data_path("/tmp/am")
            .org_ids(vec![1, 2])
            .maintenance_retention(Duration::from_secs(60))
            .build();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.data_path, PathBuf::from("/tmp/am"));
        assert_eq!(config.org_ids, vec![1, 2]);
        assert_eq!(config.maintenance_retention, Duration::from_secs(60));
        assert_eq!(config.default_configuration, DEFAULT_ALERTMANAGER_CONFIGURATION);
    }

    #[test]
    fn test_app_config_from_file() {
        let config_content = r#"
        database_url: "sqlite::memory:"
        data_path: "/var/lib/am"
        org_ids: [1, 7]
        silence_maintenance_interval: 60
        "#;
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.yaml"), config_content).unwrap();

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.data_path, PathBuf::from("/var/lib/am"));
        assert_eq!(config.org_ids, vec![1, 7]);
        assert_eq!(config.silence_maintenance_interval, Duration::from_secs(60));
        assert_eq!(config.notification_log_maintenance_interval, Duration::from_secs(900));
        assert_eq!(config.maintenance_retention, Duration::from_secs(5 * 24 * 60 * 60));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
        assert_eq!(config.app_url, "http://localhost:3000/");
        assert!(config.email_relay.is_none());
    }

    #[test]
    fn test_app_config_with_email_relay() {
        let config_content = r#"
        database_url: "sqlite::memory:"
        data_path: "data"
        email_relay:
          url: "http://relay.local/send"
          from_address: "alerts@example.com"
        "#;
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(temp_dir.path().join("app.yaml"), config_content).unwrap();

        let config = AppConfig::new(Some(temp_dir.path().to_str().unwrap())).unwrap();
        let relay = config.email_relay.unwrap();
        assert_eq!(relay.url.as_str(), "http://relay.local/send");
        assert_eq!(relay.from_address, "alerts@example.com");
        assert_eq!(relay.from_name, "Alertmanager");
    }

    #[test]
    fn test_default_configuration_is_valid_json() {
        let value: serde_json::Value =
            serde_json::from_str(DEFAULT_ALERTMANAGER_CONFIGURATION).unwrap();
        assert_eq!(value["alertmanager_config"]["route"]["receiver"], "default-email");
    }
}
