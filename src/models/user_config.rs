//! The user-facing Alertmanager configuration document.
//!
//! Every map is a `BTreeMap` so that serializing a document always yields the
//! same bytes, which is what the configuration hash is computed over.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{route::Route, time_interval::TimeInterval};

/// Name of the template injected into every applied configuration.
pub const DEFAULT_TEMPLATE_NAME: &str = "__default__.tmpl";

/// Root document: template files plus the alerting configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostableUserConfig {
    /// Template files by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub template_files: BTreeMap<String, String>,
    /// The alerting configuration.
    pub alertmanager_config: PostableApiAlertingConfig,
}

impl PostableUserConfig {
    /// Canonical JSON encoding.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Route tree, receivers, inhibit rules and time intervals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostableApiAlertingConfig {
    /// Root of the routing tree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<Route>,
    /// Inhibit rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inhibit_rules: Vec<InhibitRule>,
    /// Template globs of upstream Alertmanager; kept for round-tripping only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<String>,
    /// Receivers referenced by the routes.
    #[serde(default)]
    pub receivers: Vec<PostableApiReceiver>,
    /// Named time intervals.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time_intervals: Vec<TimeInterval>,
}

/// Mutes alerts matching the target side while an alert matching the source
/// side fires with equal values for the `equal` labels.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InhibitRule {
    /// Source side matchers in string form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_matchers: Vec<String>,
    /// Target side matchers in string form.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_matchers: Vec<String>,
    /// Source side equality map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_match: BTreeMap<String, String>,
    /// Target side equality map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target_match: BTreeMap<String, String>,
    /// Source side regex map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub source_match_re: BTreeMap<String, String>,
    /// Target side regex map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub target_match_re: BTreeMap<String, String>,
    /// Labels that must be equal on source and target.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equal: Vec<String>,
}

/// A named receiver holding one or more integrations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostableApiReceiver {
    /// Receiver name.
    pub name: String,
    /// Integrations of the receiver.
    #[serde(default)]
    pub grafana_managed_receiver_configs: Vec<NotifierSettings>,
}

/// Settings of one integration of a receiver.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotifierSettings {
    /// Unique id of the integration.
    #[serde(default)]
    pub uid: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Integration type, e.g. `webhook` or `email`.
    #[serde(rename = "type")]
    pub notifier_type: String,
    /// Whether resolved notifications are suppressed.
    #[serde(rename = "disableResolveMessage", default)]
    pub disable_resolve_message: bool,
    /// Type-specific plain settings.
    #[serde(default)]
    pub settings: serde_json::Value,
    /// Base64 encoded ciphertext per field.
    #[serde(rename = "secureSettings", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub secure_settings: BTreeMap<String, String>,
}
