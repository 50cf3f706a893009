use chrono::{DateTime, Utc};

use crate::models::{Alert, Fingerprint, LabelSet, PostableAlert};

/// A builder for alerts used in tests.
#[derive(Default)]
pub struct AlertBuilder {
    labels: LabelSet,
    annotations: LabelSet,
    starts_at: Option<DateTime<Utc>>,
    ends_at: Option<DateTime<Utc>>,
    generator_url: String,
}

impl AlertBuilder {
    /// Creates a builder for an alert with the given `alertname`.
    pub fn new(name: &str) -> Self {
        Self::default().label("alertname", name)
    }

    /// Adds a label.
    pub fn label(mut self, name: &str, value: &str) -> Self {
        self.labels.insert(name.to_string(), value.to_string());
        self
    }

    /// Adds an annotation.
    pub fn annotation(mut self, name: &str, value: &str) -> Self {
        self.annotations.insert(name.to_string(), value.to_string());
        self
    }

    /// Sets the start time.
    pub fn starts_at(mut self, at: DateTime<Utc>) -> Self {
        self.starts_at = Some(at);
        self
    }

    /// Sets the end time.
    pub fn ends_at(mut self, at: DateTime<Utc>) -> Self {
        self.ends_at = Some(at);
        self
    }

    /// Sets the generator url.
    pub fn generator_url(mut self, url: &str) -> Self {
        self.generator_url = url.to_string();
        self
    }

    /// Builds the alert as a client would post it.
    pub fn postable(self) -> PostableAlert {
        PostableAlert {
            labels: self.labels,
            annotations: self.annotations,
            starts_at: self.starts_at,
            ends_at: self.ends_at,
            generator_url: self.generator_url,
        }
    }

    /// Builds an accepted alert. Unset times default to a firing alert
    /// started a minute before `now` and ending an hour after it.
    pub fn build(self, now: DateTime<Utc>) -> Alert {
        Alert {
            fingerprint: Fingerprint::from_labels(&self.labels),
            labels: self.labels,
            annotations: self.annotations,
            starts_at: self.starts_at.unwrap_or(now - chrono::Duration::minutes(1)),
            ends_at: self.ends_at.unwrap_or(now + chrono::Duration::hours(1)),
            generator_url: self.generator_url,
            updated_at: now,
        }
    }
}
