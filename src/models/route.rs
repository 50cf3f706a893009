//! The notification routing tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::matcher::{MatchType, Matcher, MatcherError};

/// `[name, operator, value]` matcher triple.
pub type ObjectMatcher = [String; 3];

/// A node of the routing tree. Children inherit unset fields from their parent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Receiver of this node; inherited when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,

    /// Labels alerts are grouped by; `...` groups by every label.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,

    /// Combined string form, e.g. `severity=~"crit|warn"`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<String>,

    /// Matchers as `[name, operator, value]` triples.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub object_matchers: Vec<ObjectMatcher>,

    /// Legacy equality map.
    #[serde(default, rename = "match", skip_serializing_if = "BTreeMap::is_empty")]
    pub match_eq: BTreeMap<String, String>,

    /// Legacy regex map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_re: BTreeMap<String, String>,

    /// Whether matching continues with the next sibling.
    #[serde(default, rename = "continue", skip_serializing_if = "std::ops::Not::not")]
    pub continue_matching: bool,

    /// Wait before the first notification of a new group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_wait: Option<String>,

    /// Wait before notifying about changes in a group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_interval: Option<String>,

    /// Wait before repeating an unchanged notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_interval: Option<String>,

    /// Time intervals during which this node is muted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mute_time_intervals: Vec<String>,

    /// Child routes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
}

impl Route {
    /// Returns true if the node declares any matcher in any form.
    pub fn has_matchers(&self) -> bool {
        !self.matchers.is_empty()
            || !self.object_matchers.is_empty()
            || !self.match_eq.is_empty()
            || !self.match_re.is_empty()
    }

    /// Compiles the matchers of all four forms, in declaration order of the forms.
    pub fn compile_matchers(&self) -> Result<Vec<Matcher>, MatcherError> {
        let mut compiled = Vec::new();
        for [name, op, value] in &self.object_matchers {
            let match_type =
                MatchType::parse(op).ok_or_else(|| MatcherError::InvalidOperator(op.clone()))?;
            compiled.push(Matcher::new(name.clone(), match_type, value.clone())?);
        }
        for (name, value) in &self.match_eq {
            compiled.push(Matcher::new(name.clone(), MatchType::Equal, value.clone())?);
        }
        for (name, value) in &self.match_re {
            compiled.push(Matcher::new(name.clone(), MatchType::Regexp, value.clone())?);
        }
        for raw in &self.matchers {
            compiled.push(Matcher::parse(raw)?);
        }
        Ok(compiled)
    }

    /// Visits this node and all descendants, pre-order.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Route)) {
        visit(self);
        for child in &self.routes {
            child.walk(visit);
        }
    }
}
