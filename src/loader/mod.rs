//! Parsing and validation of the user configuration document.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
};

use thiserror::Error;

use crate::{
    config::parse_model_duration,
    models::{
        InhibitRule, MatchType, Matcher, MatcherError, PostableUserConfig, Route,
        matcher::is_valid_label_name, user_config::DEFAULT_TEMPLATE_NAME,
    },
    notification::template::DEFAULT_TEMPLATE,
};

/// Errors that make a configuration document unusable.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    /// The document is not valid JSON for the expected shape.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The file could not be read.
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration has no route.
    #[error("no route provided in config")]
    MissingRoute,

    /// The root route has no receiver.
    #[error("root route must specify a default receiver")]
    RootWithoutReceiver,

    /// The root route declares matchers.
    #[error("root route must not have any matchers")]
    RootWithMatchers,

    /// A receiver has an empty name.
    #[error("receiver name must not be empty")]
    EmptyReceiverName,

    /// Two receivers share a name.
    #[error("notification config name \"{0}\" is not unique")]
    DuplicateReceiver(String),

    /// Two integrations share a uid.
    #[error("integration uid \"{0}\" is not unique")]
    DuplicateIntegrationUid(String),

    /// A route names a receiver that does not exist.
    #[error("undefined receiver \"{receiver}\" used in {location}")]
    UndefinedReceiver {
        /// The receiver name.
        receiver: String,
        /// Where in the document the problem was found.
        location: String,
    },

    /// A route mutes on a time interval that is not declared.
    #[error("undefined time interval \"{interval}\" used in {location}")]
    UndefinedTimeInterval {
        /// The time interval name.
        interval: String,
        /// Where in the document the problem was found.
        location: String,
    },

    /// Two time intervals share a name.
    #[error("time interval \"{0}\" is not unique")]
    DuplicateTimeInterval(String),

    /// A time interval has an invalid window.
    #[error("invalid time interval \"{name}\": {reason}")]
    InvalidTimeInterval {
        /// The time interval name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A matcher failed to parse.
    #[error("invalid matcher in {location}: {source}")]
    InvalidMatcher {
        /// Where in the document the problem was found.
        location: String,
        /// The matcher parse error.
        #[source]
        source: MatcherError,
    },

    /// One label is matched in more than one matcher form.
    #[error("label \"{label}\" is matched in more than one matcher form in {location}")]
    ConflictingMatcherForms {
        /// The label name.
        label: String,
        /// Where in the document the problem was found.
        location: String,
    },

    /// A label name does not match `^[a-zA-Z_][a-zA-Z0-9_]*$`.
    #[error("invalid label name \"{label}\" in {location}")]
    InvalidLabelName {
        /// The label name.
        label: String,
        /// Where in the document the problem was found.
        location: String,
    },

    /// A route duration failed to parse.
    #[error("invalid {field} in {location}: {reason}")]
    InvalidDuration {
        /// Name of the duration field.
        field: &'static str,
        /// Where in the document the problem was found.
        location: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A template file name contains a path separator.
    #[error("invalid template file name \"{0}\"")]
    InvalidTemplateName(String),
}

/// Parses a JSON document, validates it and injects the default template.
pub fn load(raw: &[u8]) -> Result<PostableUserConfig, ConfigValidationError> {
    let mut cfg: PostableUserConfig = serde_json::from_slice(raw)?;
    validate(&cfg)?;
    inject_default_template(&mut cfg);
    Ok(cfg)
}

/// Reads and loads a configuration file.
pub fn load_file(path: &Path) -> Result<PostableUserConfig, ConfigValidationError> {
    let raw = std::fs::read(path)?;
    load(&raw)
}

/// Adds the built-in template under [`DEFAULT_TEMPLATE_NAME`], replacing any
/// user file with that name.
pub fn inject_default_template(cfg: &mut PostableUserConfig) {
    cfg.template_files.insert(DEFAULT_TEMPLATE_NAME.to_string(), DEFAULT_TEMPLATE.to_string());
}

/// Validates a configuration document. Stops at the first violation.
pub fn validate(cfg: &PostableUserConfig) -> Result<(), ConfigValidationError> {
    let am = &cfg.alertmanager_config;
    let root = am.route.as_ref().ok_or(ConfigValidationError::MissingRoute)?;
    if root.receiver.as_deref().is_none_or(str::is_empty) {
        return Err(ConfigValidationError::RootWithoutReceiver);
    }
    if root.has_matchers() {
        return Err(ConfigValidationError::RootWithMatchers);
    }

    let mut receivers = HashSet::new();
    let mut uids = HashSet::new();
    for receiver in &am.receivers {
        if receiver.name.is_empty() {
            return Err(ConfigValidationError::EmptyReceiverName);
        }
        if !receivers.insert(receiver.name.as_str()) {
            return Err(ConfigValidationError::DuplicateReceiver(receiver.name.clone()));
        }
        for integration in &receiver.grafana_managed_receiver_configs {
            if !integration.uid.is_empty() && !uids.insert(integration.uid.as_str()) {
                return Err(ConfigValidationError::DuplicateIntegrationUid(
                    integration.uid.clone(),
                ));
            }
        }
    }

    let mut intervals = HashSet::new();
    for interval in &am.time_intervals {
        if !intervals.insert(interval.name.as_str()) {
            return Err(ConfigValidationError::DuplicateTimeInterval(interval.name.clone()));
        }
        interval.validate().map_err(|reason| ConfigValidationError::InvalidTimeInterval {
            name: interval.name.clone(),
            reason,
        })?;
    }

    validate_route(root, "route", &receivers, &intervals)?;

    for (i, rule) in am.inhibit_rules.iter().enumerate() {
        validate_inhibit_rule(rule, i)?;
    }

    for name in cfg.template_files.keys() {
        if !is_plain_file_name(name) {
            return Err(ConfigValidationError::InvalidTemplateName(name.clone()));
        }
    }

    Ok(())
}

fn validate_route(
    route: &Route,
    location: &str,
    receivers: &HashSet<&str>,
    intervals: &HashSet<&str>,
) -> Result<(), ConfigValidationError> {
    if let Some(receiver) = route.receiver.as_deref() {
        if !receivers.contains(receiver) {
            return Err(ConfigValidationError::UndefinedReceiver {
                receiver: receiver.to_string(),
                location: location.to_string(),
            });
        }
    }

    for interval in &route.mute_time_intervals {
        if !intervals.contains(interval.as_str()) {
            return Err(ConfigValidationError::UndefinedTimeInterval {
                interval: interval.clone(),
                location: location.to_string(),
            });
        }
    }

    route.compile_matchers().map_err(|source| ConfigValidationError::InvalidMatcher {
        location: location.to_string(),
        source,
    })?;
    check_matcher_forms(
        [
            route.object_matchers.iter().map(|[name, _, _]| name.as_str()).collect(),
            route.match_eq.keys().map(String::as_str).collect(),
            route.match_re.keys().map(String::as_str).collect(),
            parsed_names(&route.matchers),
        ],
        location,
    )?;

    for label in &route.group_by {
        if label != "..." && !is_valid_label_name(label) {
            return Err(ConfigValidationError::InvalidLabelName {
                label: label.clone(),
                location: location.to_string(),
            });
        }
    }

    for (field, value) in [
        ("group_wait", &route.group_wait),
        ("group_interval", &route.group_interval),
        ("repeat_interval", &route.repeat_interval),
    ] {
        if let Some(value) = value {
            parse_model_duration(value).map_err(|reason| {
                ConfigValidationError::InvalidDuration {
                    field,
                    location: location.to_string(),
                    reason,
                }
            })?;
        }
    }

    for (i, child) in route.routes.iter().enumerate() {
        validate_route(child, &format!("{location}.routes[{i}]"), receivers, intervals)?;
    }
    Ok(())
}

fn validate_inhibit_rule(rule: &InhibitRule, index: usize) -> Result<(), ConfigValidationError> {
    for (side, matchers, eq, re) in [
        ("source", &rule.source_matchers, &rule.source_match, &rule.source_match_re),
        ("target", &rule.target_matchers, &rule.target_match, &rule.target_match_re),
    ] {
        let location = format!("inhibit_rules[{index}].{side}");
        compile_matcher_group(matchers, eq, re).map_err(|source| {
            ConfigValidationError::InvalidMatcher { location: location.clone(), source }
        })?;
        check_matcher_forms(
            [
                Vec::new(),
                eq.keys().map(String::as_str).collect(),
                re.keys().map(String::as_str).collect(),
                parsed_names(matchers),
            ],
            &location,
        )?;
    }
    for label in &rule.equal {
        if !is_valid_label_name(label) {
            return Err(ConfigValidationError::InvalidLabelName {
                label: label.clone(),
                location: format!("inhibit_rules[{index}].equal"),
            });
        }
    }
    Ok(())
}

/// Compiles the matchers of one side of an inhibit rule.
pub(crate) fn compile_matcher_group(
    matchers: &[String],
    eq: &BTreeMap<String, String>,
    re: &BTreeMap<String, String>,
) -> Result<Vec<Matcher>, MatcherError> {
    let mut compiled = Vec::with_capacity(matchers.len() + eq.len() + re.len());
    for (name, value) in eq {
        compiled.push(Matcher::new(name.clone(), MatchType::Equal, value.clone())?);
    }
    for (name, value) in re {
        compiled.push(Matcher::new(name.clone(), MatchType::Regexp, value.clone())?);
    }
    for raw in matchers {
        compiled.push(Matcher::parse(raw)?);
    }
    Ok(compiled)
}

fn parsed_names(matchers: &[String]) -> Vec<&str> {
    matchers
        .iter()
        .filter_map(|raw| raw.find(['=', '!']).map(|pos| raw[..pos].trim()))
        .collect()
}

/// Each label may be used by only one of the matcher forms of a group.
fn check_matcher_forms(forms: [Vec<&str>; 4], location: &str) -> Result<(), ConfigValidationError> {
    let mut owner: HashMap<&str, usize> = HashMap::new();
    for (form, names) in forms.iter().enumerate() {
        for name in names {
            match owner.get(name) {
                Some(&other) if other != form => {
                    return Err(ConfigValidationError::ConflictingMatcherForms {
                        label: name.to_string(),
                        location: location.to_string(),
                    });
                }
                _ => {
                    owner.insert(name, form);
                }
            }
        }
    }
    Ok(())
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn base() -> serde_json::Value {
        json!({
            "template_files": {"custom.tmpl": "{% macro x() %}x{% endmacro %}"},
            "alertmanager_config": {
                "route": {
                    "receiver": "default",
                    "group_by": ["alertname"],
                    "routes": [
                        {"receiver": "ops", "object_matchers": [["team", "=", "ops"]], "group_wait": "30s"}
                    ]
                },
                "receivers": [
                    {"name": "default", "grafana_managed_receiver_configs": [
                        {"uid": "a", "name": "hook", "type": "webhook", "settings": {"url": "http://x"}}
                    ]},
                    {"name": "ops", "grafana_managed_receiver_configs": [
                        {"uid": "b", "name": "mail", "type": "email", "settings": {"addresses": "a@b.c"}}
                    ]}
                ]
            }
        })
    }

    fn load_value(value: serde_json::Value) -> Result<PostableUserConfig, ConfigValidationError> {
        load(&serde_json::to_vec(&value).unwrap())
    }

    #[test]
    fn test_load_valid_config_injects_default_template() {
        let cfg = load_value(base()).unwrap();
        assert_eq!(cfg.template_files[DEFAULT_TEMPLATE_NAME], DEFAULT_TEMPLATE);
        assert!(cfg.template_files.contains_key("custom.tmpl"));
        assert_eq!(cfg.alertmanager_config.receivers.len(), 2);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(load(b"{not json"), Err(ConfigValidationError::Parse(_))));
    }

    #[test]
    fn test_missing_route() {
        let mut v = base();
        v["alertmanager_config"].as_object_mut().unwrap().remove("route");
        assert!(matches!(load_value(v), Err(ConfigValidationError::MissingRoute)));
    }

    #[test]
    fn test_root_route_rules() {
        let mut v = base();
        v["alertmanager_config"]["route"]["receiver"] = json!("");
        assert!(matches!(load_value(v), Err(ConfigValidationError::RootWithoutReceiver)));

        let mut v = base();
        v["alertmanager_config"]["route"]["match"] = json!({"team": "ops"});
        assert!(matches!(load_value(v), Err(ConfigValidationError::RootWithMatchers)));
    }

    #[test]
    fn test_unknown_receiver_in_nested_route() {
        let mut v = base();
        v["alertmanager_config"]["route"]["routes"][0]["receiver"] = json!("nobody");
        match load_value(v) {
            Err(ConfigValidationError::UndefinedReceiver { receiver, location }) => {
                assert_eq!(receiver, "nobody");
                assert_eq!(location, "route.routes[0]");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_receivers_and_uids() {
        let mut v = base();
        v["alertmanager_config"]["receivers"][1]["name"] = json!("default");
        assert!(matches!(load_value(v), Err(ConfigValidationError::DuplicateReceiver(_))));

        let mut v = base();
        v["alertmanager_config"]["receivers"][1]["grafana_managed_receiver_configs"][0]["uid"] =
            json!("a");
        assert!(matches!(load_value(v), Err(ConfigValidationError::DuplicateIntegrationUid(_))));
    }

    #[test]
    fn test_mute_time_interval_must_be_declared() {
        let mut v = base();
        v["alertmanager_config"]["route"]["routes"][0]["mute_time_intervals"] = json!(["nights"]);
        assert!(matches!(load_value(v), Err(ConfigValidationError::UndefinedTimeInterval { .. })));

        let mut v = base();
        v["alertmanager_config"]["route"]["routes"][0]["mute_time_intervals"] = json!(["nights"]);
        v["alertmanager_config"]["time_intervals"] = json!([
            {"name": "nights", "time_intervals": [{"times": [{"start_time": "00:00", "end_time": "06:00"}]}]}
        ]);
        assert!(load_value(v).is_ok());
    }

    #[test]
    fn test_invalid_matchers() {
        let mut v = base();
        v["alertmanager_config"]["route"]["routes"][0]["object_matchers"] =
            json!([["team", "==", "ops"]]);
        assert!(matches!(load_value(v), Err(ConfigValidationError::InvalidMatcher { .. })));

        let mut v = base();
        v["alertmanager_config"]["route"]["routes"][0]["match_re"] = json!({"service": "(api"});
        assert!(matches!(load_value(v), Err(ConfigValidationError::InvalidMatcher { .. })));
    }

    #[test]
    fn test_conflicting_matcher_forms() {
        let mut v = base();
        v["alertmanager_config"]["route"]["routes"][0]["match"] = json!({"team": "dev"});
        assert!(matches!(
            load_value(v),
            Err(ConfigValidationError::ConflictingMatcherForms { .. })
        ));

        // Two matchers of the same form on one label are fine.
        let mut v = base();
        v["alertmanager_config"]["route"]["routes"][0]["object_matchers"] =
            json!([["team", "=~", "o.*"], ["team", "!=", "oops"]]);
        assert!(load_value(v).is_ok());
    }

    #[test]
    fn test_inhibit_rules_are_validated() {
        let mut v = base();
        v["alertmanager_config"]["inhibit_rules"] = json!([
            {"source_matchers": ["severity=\"critical\""], "target_match": {"severity": "warning"}, "equal": ["alertname"]}
        ]);
        assert!(load_value(v).is_ok());

        let mut v = base();
        v["alertmanager_config"]["inhibit_rules"] = json!([
            {"source_matchers": ["severity=\"critical\""], "source_match": {"severity": "warning"}}
        ]);
        assert!(matches!(
            load_value(v),
            Err(ConfigValidationError::ConflictingMatcherForms { .. })
        ));

        let mut v = base();
        v["alertmanager_config"]["inhibit_rules"] = json!([{"equal": ["bad-label"]}]);
        assert!(matches!(load_value(v), Err(ConfigValidationError::InvalidLabelName { .. })));
    }

    #[test]
    fn test_invalid_duration() {
        let mut v = base();
        v["alertmanager_config"]["route"]["routes"][0]["repeat_interval"] = json!("often");
        match load_value(v) {
            Err(ConfigValidationError::InvalidDuration { field, .. }) => {
                assert_eq!(field, "repeat_interval")
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_template_names_must_be_plain() {
        let mut v = base();
        v["template_files"] = json!({"../escape.tmpl": "x"});
        assert!(matches!(load_value(v), Err(ConfigValidationError::InvalidTemplateName(_))));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("am.json");
        std::fs::write(&path, serde_json::to_vec(&base()).unwrap()).unwrap();
        assert!(load_file(&path).is_ok());
        assert!(matches!(
            load_file(&dir.path().join("missing.json")),
            Err(ConfigValidationError::Io(_))
        ));
    }
}
