//! Silences mute alerts whose labels match all of their matchers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::matcher::{MatchType, Matcher, MatcherError};

/// Matcher in the silence API shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SilenceMatcher {
    /// Label name.
    pub name: String,
    /// Value or regex to match.
    pub value: String,
    /// Whether `value` is a regex.
    #[serde(rename = "isRegex", default)]
    pub is_regex: bool,
    /// Whether the match is positive.
    #[serde(rename = "isEqual", default = "default_is_equal")]
    pub is_equal: bool,
}

fn default_is_equal() -> bool {
    true
}

impl SilenceMatcher {
    /// The matcher operator.
    pub fn match_type(&self) -> MatchType {
        match (self.is_regex, self.is_equal) {
            (false, true) => MatchType::Equal,
            (false, false) => MatchType::NotEqual,
            (true, true) => MatchType::Regexp,
            (true, false) => MatchType::NotRegexp,
        }
    }

    /// Compiles into a label matcher.
    pub fn compile(&self) -> Result<Matcher, MatcherError> {
        Matcher::new(self.name.clone(), self.match_type(), self.value.clone())
    }
}

/// Lifecycle state of a silence relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SilenceState {
    /// Starts in the future.
    Pending,
    /// Currently mutes matching alerts.
    Active,
    /// Ended or expired.
    Expired,
}

/// A silence as created through the API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostableSilence {
    /// Existing id to update, or none to create.
    #[serde(default)]
    pub id: Option<String>,
    /// Matchers an alert must satisfy to be muted.
    pub matchers: Vec<SilenceMatcher>,
    /// Start of the silence.
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    /// End of the silence.
    #[serde(rename = "endsAt")]
    pub ends_at: DateTime<Utc>,
    /// Author.
    #[serde(rename = "createdBy")]
    pub created_by: String,
    /// Free-form reason.
    #[serde(default)]
    pub comment: String,
}

/// A stored silence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    /// Silence id.
    pub id: String,
    /// Matchers an alert must satisfy to be muted.
    pub matchers: Vec<SilenceMatcher>,
    /// Start of the silence.
    #[serde(rename = "startsAt")]
    pub starts_at: DateTime<Utc>,
    /// End of the silence.
    #[serde(rename = "endsAt")]
    pub ends_at: DateTime<Utc>,
    /// Last update.
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
    /// Author.
    #[serde(rename = "createdBy")]
    pub created_by: String,
    /// Free-form reason.
    pub comment: String,
}

impl Silence {
    /// The lifecycle state at `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> SilenceState {
        if self.ends_at <= now {
            SilenceState::Expired
        } else if self.starts_at > now {
            SilenceState::Pending
        } else {
            SilenceState::Active
        }
    }
}
