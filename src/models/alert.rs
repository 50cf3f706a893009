//! Alerts posted by the rule evaluator and stored by the pipeline.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::matcher::is_valid_label_name;

/// Ordered label or annotation set.
pub type LabelSet = BTreeMap<String, String>;

/// Annotation carrying the token of a screenshot stored in the image store.
pub const IMAGE_TOKEN_ANNOTATION: &str = "__alertImageToken__";

/// An alert as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostableAlert {
    /// Identifying labels.
    #[serde(default)]
    pub labels: LabelSet,
    /// Free-form annotations.
    #[serde(default)]
    pub annotations: LabelSet,
    /// Firing start; defaults to the time of receipt.
    #[serde(default, rename = "startsAt", skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    /// Resolve time; defaults to receipt time plus the resolve timeout.
    #[serde(default, rename = "endsAt", skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<DateTime<Utc>>,
    /// Link back to the rule that produced the alert.
    #[serde(default, rename = "generatorURL", skip_serializing_if = "String::is_empty")]
    pub generator_url: String,
}

impl PostableAlert {
    /// Checks the alert for structural problems.
    pub fn validate(&self) -> Result<(), String> {
        if self.labels.is_empty() {
            return Err("at least one label pair required".to_string());
        }
        for name in self.labels.keys() {
            if !is_valid_label_name(name) {
                return Err(format!("invalid label name '{name}'"));
            }
        }
        for name in self.annotations.keys() {
            if !is_valid_label_name(name) {
                return Err(format!("invalid annotation name '{name}'"));
            }
        }
        if let (Some(start), Some(end)) = (self.starts_at, self.ends_at) {
            if end < start {
                return Err("start time must be before end time".to_string());
            }
        }
        Ok(())
    }
}

/// Stable identity of an alert, derived from its label set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Hashes the sorted label pairs.
    pub fn from_labels(labels: &LabelSet) -> Self {
        let mut hasher = Sha256::new();
        for (name, value) in labels {
            hasher.update(name.as_bytes());
            hasher.update([0xff]);
            hasher.update(value.as_bytes());
            hasher.update([0xff]);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        Self(u64::from_be_bytes(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Whether an alert is still active at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// `ends_at` is in the future.
    Firing,
    /// `ends_at` has passed.
    Resolved,
}

/// An accepted alert held by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Hash of the label set.
    pub fingerprint: Fingerprint,
    /// Identifying labels.
    pub labels: LabelSet,
    /// Descriptive annotations.
    pub annotations: LabelSet,
    /// When the alert started firing.
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    /// When the alert resolves.
    #[serde(rename = "endsAt")]
    pub ends_at: DateTime<Utc>,
    /// Link back to the alert's source.
    #[serde(rename = "generatorURL")]
    pub generator_url: String,
    /// When the alert was last received.
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    /// Whether the alert fires or is resolved at `now`.
    pub fn status_at(&self, now: DateTime<Utc>) -> AlertStatus {
        if self.ends_at <= now { AlertStatus::Resolved } else { AlertStatus::Firing }
    }

    /// Whether the alert is resolved at `now`.
    pub fn is_resolved_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == AlertStatus::Resolved
    }

    /// The `alertname` label, or an empty string.
    pub fn name(&self) -> &str {
        self.labels.get("alertname").map(String::as_str).unwrap_or("")
    }
}
