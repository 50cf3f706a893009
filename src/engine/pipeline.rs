//! The notification pipeline of one tenant: the compiled configuration
//! snapshot, the alert store, and the dispatcher that routes alerts to
//! integrations.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;

use crate::{
    config::parse_model_duration,
    loader::compile_matcher_group,
    models::{
        Alert, AlertStatus, Fingerprint, LabelSet, Matcher, MatcherError, PostableUserConfig, Route,
        matcher::matches_all, time_interval::TimeInterval, user_config::InhibitRule,
    },
    notification::{Integration, NotificationData, TemplateSet},
    state::{NotificationLog, Silences, nflog::LogKey},
};

const DEFAULT_GROUP_WAIT: Duration = Duration::from_secs(30);
const DEFAULT_GROUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REPEAT_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Errors compiling a configuration into a runnable pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The root route has no receiver.
    #[error("root route must specify a default receiver")]
    MissingRootReceiver,

    /// The configuration has no route.
    #[error("no route provided in config")]
    MissingRoute,

    /// A matcher failed to compile.
    #[error("invalid matcher in {location}: {source}")]
    InvalidMatcher {
        /// Where in the document the problem was found.
        location: String,
        /// The matcher parse error.
        #[source]
        source: MatcherError,
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

    /// A route names a receiver that does not exist.
    #[error("undefined receiver \"{receiver}\" used in {location}")]
    UndefinedReceiver {
        /// The receiver name.
        receiver: String,
        /// Where in the document the problem was found.
        location: String,
    },
}

/// A route with inherited settings resolved and matchers compiled.
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    /// Position in the tree, e.g. `route.routes[1]`.
    pub id: String,
    /// Receiver notified for alerts of this route.
    pub receiver: String,
    /// Labels alerts are grouped by.
    pub group_by: Vec<String>,
    /// `group_by: ["..."]` groups by every label.
    pub group_by_all: bool,
    /// Matchers an alert must satisfy to enter the route.
    pub matchers: Vec<Matcher>,
    /// Whether matching continues with the next sibling.
    pub continue_matching: bool,
    /// Wait before the first notification of a new group.
    pub group_wait: Duration,
    /// Wait before notifying about changes in a group.
    pub group_interval: Duration,
    /// Wait before repeating an unchanged notification.
    pub repeat_interval: Duration,
    /// Time intervals during which the route is muted.
    pub mute_time_intervals: Vec<String>,
    /// Child routes.
    pub routes: Vec<CompiledRoute>,
}

impl CompiledRoute {
    /// Compiles the tree rooted at `root`.
    pub fn compile(root: &Route) -> Result<Self, PipelineError> {
        let receiver = root.receiver.clone().filter(|r| !r.is_empty()).ok_or(PipelineError::MissingRootReceiver)?;
        let defaults = CompiledRoute {
            id: String::new(),
            receiver,
            group_by: Vec::new(),
            group_by_all: false,
            matchers: Vec::new(),
            continue_matching: false,
            group_wait: DEFAULT_GROUP_WAIT,
            group_interval: DEFAULT_GROUP_INTERVAL,
            repeat_interval: DEFAULT_REPEAT_INTERVAL,
            mute_time_intervals: Vec::new(),
            routes: Vec::new(),
        };
        Self::compile_node(root, &defaults, "route".to_string())
    }

    fn compile_node(route: &Route, parent: &CompiledRoute, id: String) -> Result<Self, PipelineError> {
        let duration = |field: &'static str, value: &Option<String>, inherited: Duration| {
            value.as_deref().map_or(Ok(inherited), |v| {
                parse_model_duration(v).map_err(|reason| PipelineError::InvalidDuration {
                    field,
                    location: id.clone(),
                    reason,
                })
            })
        };
        let (group_by, group_by_all) = if route.group_by.is_empty() {
            (parent.group_by.clone(), parent.group_by_all)
        } else if route.group_by.iter().any(|l| l == "...") {
            (Vec::new(), true)
        } else {
            (route.group_by.clone(), false)
        };

        let mut node = CompiledRoute {
            receiver: route.receiver.clone().filter(|r| !r.is_empty()).unwrap_or_else(|| parent.receiver.clone()),
            group_by,
            group_by_all,
            matchers: route.compile_matchers().map_err(|source| PipelineError::InvalidMatcher {
                location: id.clone(),
                source,
            })?,
            continue_matching: route.continue_matching,
            group_wait: duration("group_wait", &route.group_wait, parent.group_wait)?,
            group_interval: duration("group_interval", &route.group_interval, parent.group_interval)?,
            repeat_interval: duration("repeat_interval", &route.repeat_interval, parent.repeat_interval)?,
            mute_time_intervals: route.mute_time_intervals.clone(),
            routes: Vec::with_capacity(route.routes.len()),
            id: id.clone(),
        };
        for (i, child) in route.routes.iter().enumerate() {
            let child = Self::compile_node(child, &node, format!("{id}.routes[{i}]"))?;
            node.routes.push(child);
        }
        Ok(node)
    }

    /// The routes an alert with `labels` is delivered to. Children are tried
    /// in order; the first matching child stops the search unless it sets
    /// `continue`. A matching node without matching children matches itself.
    pub fn match_labels(&self, labels: &LabelSet) -> Vec<&CompiledRoute> {
        if !matches_all(&self.matchers, labels) {
            return Vec::new();
        }
        let mut matched = Vec::new();
        for child in &self.routes {
            let found = child.match_labels(labels);
            let any = !found.is_empty();
            matched.extend(found);
            if any && !child.continue_matching {
                break;
            }
        }
        if matched.is_empty() {
            matched.push(self);
        }
        matched
    }

    /// Labels of `labels` that form the group of this route.
    pub fn group_labels(&self, labels: &LabelSet) -> LabelSet {
        if self.group_by_all {
            return labels.clone();
        }
        self.group_by
            .iter()
            .filter_map(|name| labels.get(name).map(|value| (name.clone(), value.clone())))
            .collect()
    }

    fn visit<'a>(&'a self, visit: &mut dyn FnMut(&'a CompiledRoute)) {
        visit(self);
        for child in &self.routes {
            child.visit(visit);
        }
    }
}

fn format_labels(labels: &LabelSet) -> String {
    let pairs: Vec<String> = labels.iter().map(|(k, v)| format!("{k}={v:?}")).collect();
    format!("{{{}}}", pairs.join(", "))
}

#[derive(Debug, Clone)]
struct CompiledInhibitRule {
    source: Vec<Matcher>,
    target: Vec<Matcher>,
    equal: Vec<String>,
}

/// Suppresses target alerts while a matching source alert fires.
#[derive(Debug, Clone, Default)]
pub struct Inhibitor {
    rules: Vec<CompiledInhibitRule>,
}

impl Inhibitor {
    /// Compiles `rules`.
    pub fn new(rules: &[InhibitRule]) -> Result<Self, PipelineError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for (i, rule) in rules.iter().enumerate() {
            let location = |side: &str| format!("inhibit_rules[{i}].{side}");
            let source =
                compile_matcher_group(&rule.source_matchers, &rule.source_match, &rule.source_match_re)
                    .map_err(|source| PipelineError::InvalidMatcher { location: location("source"), source })?;
            let target =
                compile_matcher_group(&rule.target_matchers, &rule.target_match, &rule.target_match_re)
                    .map_err(|source| PipelineError::InvalidMatcher { location: location("target"), source })?;
            compiled.push(CompiledInhibitRule { source, target, equal: rule.equal.clone() });
        }
        Ok(Self { rules: compiled })
    }

    /// Whether `alert` is inhibited by one of the firing alerts in `alerts`.
    pub fn is_inhibited(&self, alert: &Alert, alerts: &[Alert], now: DateTime<Utc>) -> bool {
        self.rules.iter().any(|rule| {
            matches_all(&rule.target, &alert.labels)
                && alerts.iter().any(|source| {
                    source.fingerprint != alert.fingerprint
                        && source.status_at(now) == AlertStatus::Firing
                        && matches_all(&rule.source, &source.labels)
                        && rule.equal.iter().all(|name| source.labels.get(name) == alert.labels.get(name))
                })
        })
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// The immutable snapshot the pipeline runs against. Replaced as a whole on
/// every configuration change.
pub struct ActiveConfiguration {
    /// MD5 of the raw configuration.
    pub hash: String,
    /// The applied document, default template included.
    pub config: PostableUserConfig,
    /// Compiled root route.
    pub route: CompiledRoute,
    /// Compiled inhibit rules.
    pub inhibitor: Inhibitor,
    /// Built integrations per receiver name.
    pub receivers: BTreeMap<String, Vec<Integration>>,
    /// Time intervals by name.
    pub time_intervals: BTreeMap<String, TimeInterval>,
    /// Compiled templates shared by the integrations.
    pub templates: Arc<TemplateSet>,
}

impl ActiveConfiguration {
    /// Compiles the route tree and inhibit rules of `config` and binds them
    /// to the already built integrations.
    pub fn new(
        hash: String,
        config: PostableUserConfig,
        receivers: BTreeMap<String, Vec<Integration>>,
        templates: Arc<TemplateSet>,
    ) -> Result<Self, PipelineError> {
        let am = &config.alertmanager_config;
        let route = CompiledRoute::compile(am.route.as_ref().ok_or(PipelineError::MissingRoute)?)?;
        let mut missing = None;
        route.visit(&mut |node| {
            if missing.is_none() && !receivers.contains_key(&node.receiver) {
                missing = Some(PipelineError::UndefinedReceiver {
                    receiver: node.receiver.clone(),
                    location: node.id.clone(),
                });
            }
        });
        if let Some(err) = missing {
            return Err(err);
        }
        let inhibitor = Inhibitor::new(&am.inhibit_rules)?;
        let time_intervals =
            am.time_intervals.iter().map(|ti| (ti.name.clone(), ti.clone())).collect();
        Ok(Self { hash, route, inhibitor, receivers, time_intervals, templates, config })
    }

    fn is_muted_by_time(&self, route: &CompiledRoute, now: DateTime<Utc>) -> bool {
        route
            .mute_time_intervals
            .iter()
            .filter_map(|name| self.time_intervals.get(name))
            .any(|interval| interval.contains(now))
    }
}

/// Accepted alerts, keyed by fingerprint.
#[derive(Default)]
pub struct AlertStore {
    alerts: DashMap<Fingerprint, Alert>,
}

impl AlertStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `alert`. An update of a still active alert keeps its start.
    pub fn put(&self, mut alert: Alert) {
        if let Some(existing) = self.alerts.get(&alert.fingerprint) {
            if existing.ends_at >= alert.starts_at && existing.starts_at < alert.starts_at {
                alert.starts_at = existing.starts_at;
            }
        }
        self.alerts.insert(alert.fingerprint, alert);
    }

    /// The alert with `fingerprint`, if stored.
    pub fn get(&self, fingerprint: Fingerprint) -> Option<Alert> {
        self.alerts.get(&fingerprint).map(|a| a.clone())
    }

    /// All alerts, ordered by fingerprint.
    pub fn list(&self) -> Vec<Alert> {
        let mut all: Vec<Alert> = self.alerts.iter().map(|a| a.clone()).collect();
        all.sort_by_key(|a| a.fingerprint);
        all
    }

    /// Drops alerts resolved for longer than `retention`.
    pub fn gc(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.alerts.len();
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        self.alerts.retain(|_, a| a.ends_at.checked_add_signed(retention).is_none_or(|t| t > now));
        before - self.alerts.len()
    }

    /// Number of stored alerts.
    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    /// Whether no alert is stored.
    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}

/// Outcome of one dispatcher pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Alerts dropped by a silence.
    pub silenced: usize,
    /// Alerts dropped by an inhibit rule.
    pub inhibited: usize,
    /// Notifications delivered.
    pub notifications_sent: usize,
    /// Notifications that failed to send.
    pub notifications_failed: usize,
    /// Groups skipped because nothing changed since the last send.
    pub deduplicated: usize,
}

struct AlertGroup<'a> {
    route: &'a CompiledRoute,
    labels: LabelSet,
    alerts: Vec<Alert>,
}

/// Runs one pass: groups the alerts per route, drops silenced and
/// inhibited ones, and notifies every integration whose notification log
/// entry shows new information or a due repeat.
pub async fn dispatch(
    active: &ActiveConfiguration,
    alerts: &AlertStore,
    silences: &Silences,
    nflog: &NotificationLog,
    now: DateTime<Utc>,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    let all = alerts.list();

    let mut groups: BTreeMap<String, AlertGroup<'_>> = BTreeMap::new();
    for alert in &all {
        if !silences.mutes(&alert.labels, now).is_empty() {
            report.silenced += 1;
            continue;
        }
        if active.inhibitor.is_inhibited(alert, &all, now) {
            report.inhibited += 1;
            continue;
        }
        for route in active.route.match_labels(&alert.labels) {
            let labels = route.group_labels(&alert.labels);
            let key = format!("{}:{}", route.id, format_labels(&labels));
            groups
                .entry(key)
                .or_insert_with(|| AlertGroup { route, labels, alerts: Vec::new() })
                .alerts
                .push(alert.clone());
        }
    }

    for (group_key, group) in groups {
        let earliest = group.alerts.iter().map(|a| a.starts_at).min().unwrap_or(now);
        let wait = chrono::Duration::from_std(group.route.group_wait).unwrap_or(chrono::Duration::MAX);
        if earliest.checked_add_signed(wait).is_some_and(|due| due > now) {
            continue;
        }
        if active.is_muted_by_time(group.route, now) {
            tracing::debug!(group = %group_key, "Group muted by time interval.");
            continue;
        }
        let Some(integrations) = active.receivers.get(&group.route.receiver) else {
            continue;
        };

        for integration in integrations {
            let key = LogKey {
                group_key: group_key.clone(),
                receiver: group.route.receiver.clone(),
                integration_index: integration.index(),
            };
            let state = select_alerts(&group.alerts, integration.send_resolved(), now);
            let intervals = (group.route.group_interval, group.route.repeat_interval);
            if !needs_notify(nflog, &key, &state, intervals, now) {
                report.deduplicated += 1;
                continue;
            }
            if state.to_send.is_empty() {
                // Resolved without resolve messages: record it so the group is not re-sent.
                nflog.log(key, &state.firing, &state.resolved, now);
                continue;
            }

            let data = NotificationData {
                receiver: group.route.receiver.clone(),
                group_key: group_key.clone(),
                group_labels: group.labels.clone(),
                alerts: state.to_send,
                now,
            };
            match integration.notify(&data).await {
                Ok(()) => {
                    nflog.log(key, &state.firing, &state.resolved, now);
                    report.notifications_sent += 1;
                }
                Err(e) => {
                    report.notifications_failed += 1;
                    tracing::error!(
                        receiver = %integration.receiver(),
                        integration = %integration.name(),
                        error = %e,
                        "Failed to send notification."
                    );
                }
            }
        }
    }
    report
}

struct NotifyState {
    to_send: Vec<Alert>,
    firing: BTreeSet<Fingerprint>,
    resolved: BTreeSet<Fingerprint>,
    send_resolved: bool,
}

fn select_alerts(alerts: &[Alert], send_resolved: bool, now: DateTime<Utc>) -> NotifyState {
    let mut state = NotifyState {
        to_send: Vec::new(),
        firing: BTreeSet::new(),
        resolved: BTreeSet::new(),
        send_resolved,
    };
    for alert in alerts {
        match alert.status_at(now) {
            AlertStatus::Firing => {
                state.firing.insert(alert.fingerprint);
                state.to_send.push(alert.clone());
            }
            AlertStatus::Resolved if send_resolved => {
                state.resolved.insert(alert.fingerprint);
                state.to_send.push(alert.clone());
            }
            AlertStatus::Resolved => {}
        }
    }
    state
}

/// Decides from the notification log whether a group must be sent again.
/// Changes wait for `group_interval` after the last send; an unchanged group
/// is repeated after `repeat_interval`.
fn needs_notify(
    nflog: &NotificationLog,
    key: &LogKey,
    alerts: &NotifyState,
    intervals: (Duration, Duration),
    now: DateTime<Utc>,
) -> bool {
    let (group_interval, repeat_interval) = intervals;
    let Some(entry) = nflog.query(key) else {
        return !alerts.firing.is_empty();
    };
    let elapsed = |interval: Duration| {
        let interval = chrono::Duration::from_std(interval).unwrap_or(chrono::Duration::MAX);
        entry.timestamp.checked_add_signed(interval).is_none_or(|due| due <= now)
    };
    if alerts.firing.is_empty() {
        // Everything resolved: notify once if anything was firing before.
        return !entry.firing.is_empty() && elapsed(group_interval);
    }
    let changed = !alerts.firing.is_subset(&entry.firing)
        || (alerts.send_resolved && !alerts.resolved.is_subset(&entry.resolved));
    if changed {
        return elapsed(group_interval);
    }
    elapsed(repeat_interval)
}
