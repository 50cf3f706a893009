use serde::Deserialize;
use url::Url;

fn default_from_name() -> String {
    "Alertmanager".to_string()
}

/// Settings for the HTTP relay that delivers rendered notification emails.
///
/// When absent, email integrations still build, but every send fails with a
/// configuration error.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EmailRelayConfig {
    /// Endpoint accepting `POST` requests with the JSON encoded message.
    pub url: Url,

    /// Sender address placed in the `from` field.
    pub from_address: String,

    /// Display name of the sender.
    #[serde(default = "default_from_name")]
    pub from_name: String,
}
