//! Label matchers shared by routes, inhibit rules and silences.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::alert::LabelSet;

/// The comparison a [`Matcher`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchType {
    /// `=`
    #[serde(rename = "=")]
    Equal,
    /// `!=`
    #[serde(rename = "!=")]
    NotEqual,
    /// `=~`
    #[serde(rename = "=~")]
    Regexp,
    /// `!~`
    #[serde(rename = "!~")]
    NotRegexp,
}

impl MatchType {
    /// Parses an operator token.
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            "=~" => Some(Self::Regexp),
            "!~" => Some(Self::NotRegexp),
            _ => None,
        }
    }

    /// Returns the operator token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regexp => "=~",
            Self::NotRegexp => "!~",
        }
    }
}

/// Errors produced while building a matcher.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// The label name is not a valid Prometheus label name.
    #[error("invalid label name '{0}'")]
    InvalidLabelName(String),

    /// The operator is not one of `=`, `!=`, `=~`, `!~`.
    #[error("invalid match operator '{0}'")]
    InvalidOperator(String),

    /// The regular expression does not compile.
    #[error("invalid regular expression for label '{name}': {source}")]
    InvalidRegex {
        /// Label the regex applies to.
        name: String,
        /// Compilation error.
        #[source]
        source: regex::Error,
    },

    /// The string form could not be split into name, operator and value.
    #[error("malformed matcher '{0}'")]
    Malformed(String),
}

/// Returns true when `name` matches `^[a-zA-Z_][a-zA-Z0-9_]*$`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A compiled label matcher. Regular expressions are anchored at both ends.
#[derive(Debug, Clone)]
pub struct Matcher {
    /// Label name.
    pub name: String,
    /// Comparison.
    pub match_type: MatchType,
    /// Literal value or regex source.
    pub value: String,
    regex: Option<Regex>,
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.match_type == other.match_type && self.value == other.value
    }
}

impl Matcher {
    /// Builds a matcher, compiling the regex for the regex operators.
    pub fn new(
        name: impl Into<String>,
        match_type: MatchType,
        value: impl Into<String>,
    ) -> Result<Self, MatcherError> {
        let name = name.into();
        let value = value.into();
        if !is_valid_label_name(&name) {
            return Err(MatcherError::InvalidLabelName(name));
        }
        let regex = match match_type {
            MatchType::Regexp | MatchType::NotRegexp => Some(
                Regex::new(&format!("^(?:{value})$"))
                    .map_err(|source| MatcherError::InvalidRegex { name: name.clone(), source })?,
            ),
            MatchType::Equal | MatchType::NotEqual => None,
        };
        Ok(Self { name, match_type, value, regex })
    }

    /// Parses the string form, e.g. `severity=~"crit|warn"` or `team = ops`.
    pub fn parse(input: &str) -> Result<Self, MatcherError> {
        let trimmed = input.trim();
        let pos =
            trimmed.find(['=', '!']).ok_or_else(|| MatcherError::Malformed(input.to_string()))?;
        let (name, rest) = trimmed.split_at(pos);
        let (match_type, value) = if let Some(v) = rest.strip_prefix("=~") {
            (MatchType::Regexp, v)
        } else if let Some(v) = rest.strip_prefix("!=") {
            (MatchType::NotEqual, v)
        } else if let Some(v) = rest.strip_prefix("!~") {
            (MatchType::NotRegexp, v)
        } else if let Some(v) = rest.strip_prefix('=') {
            (MatchType::Equal, v)
        } else {
            let op: String = rest.chars().take(2).collect();
            return Err(MatcherError::InvalidOperator(op));
        };

        let value = value.trim();
        let value = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            &value[1..value.len() - 1]
        } else {
            value
        };
        Self::new(name.trim(), match_type, value)
    }

    /// Matches a single label value.
    pub fn matches(&self, value: &str) -> bool {
        match self.match_type {
            MatchType::Equal => self.value == value,
            MatchType::NotEqual => self.value != value,
            MatchType::Regexp => self.regex.as_ref().is_some_and(|re| re.is_match(value)),
            MatchType::NotRegexp => !self.regex.as_ref().is_some_and(|re| re.is_match(value)),
        }
    }

    /// Matches against a label set; a missing label compares as the empty string.
    pub fn matches_labels(&self, labels: &LabelSet) -> bool {
        self.matches(labels.get(&self.name).map(String::as_str).unwrap_or(""))
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}\"{}\"", self.name, self.match_type.as_str(), self.value)
    }
}

/// Returns true when every matcher matches the label set.
pub fn matches_all(matchers: &[Matcher], labels: &LabelSet) -> bool {
    matchers.iter().all(|m| m.matches_labels(labels))
}
