//! Configuration metrics: matcher usage and the active configuration hash.

use std::ops::Add;

use prometheus::{Gauge, GaugeVec, IntGaugeVec, Opts, Registry};
use serde::Serialize;

use crate::models::{PostableApiAlertingConfig, Route, user_config::InhibitRule};

/// How many matchers of each form a configuration uses.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AggregateMatchersUsage {
    /// String form (`matchers`, `source_matchers`, `target_matchers`).
    pub matchers: usize,
    /// Regex label matches (`match_re`).
    pub match_re: usize,
    /// Equality label matches (`match`).
    pub matches: usize,
    /// Matchers in object form (`object_matchers`).
    pub object_matchers: usize,
}

impl Add for AggregateMatchersUsage {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            matchers: self.matchers + other.matchers,
            match_re: self.match_re + other.match_re,
            matches: self.matches + other.matches,
            object_matchers: self.object_matchers + other.object_matchers,
        }
    }
}

/// Counts the matchers of the whole route tree and of every inhibit rule.
pub fn aggregate_matchers_usage(config: &PostableApiAlertingConfig) -> AggregateMatchersUsage {
    let routes = config.route.as_ref().map(route_usage).unwrap_or_default();
    config.inhibit_rules.iter().map(inhibit_rule_usage).fold(routes, Add::add)
}

fn route_usage(route: &Route) -> AggregateMatchersUsage {
    let own = AggregateMatchersUsage {
        matchers: route.matchers.len(),
        match_re: route.match_re.len(),
        matches: route.match_eq.len(),
        object_matchers: route.object_matchers.len(),
    };
    route.routes.iter().map(route_usage).fold(own, Add::add)
}

fn inhibit_rule_usage(rule: &InhibitRule) -> AggregateMatchersUsage {
    AggregateMatchersUsage {
        matchers: rule.source_matchers.len() + rule.target_matchers.len(),
        match_re: rule.source_match_re.len() + rule.target_match_re.len(),
        matches: rule.source_match.len() + rule.target_match.len(),
        object_matchers: 0,
    }
}

/// Maps the configuration bytes to a gauge value: the first 6 bytes of their
/// MD5 sum read as a little endian integer. 48 bits fit the float mantissa.
pub fn hash_as_metric_value(raw: &[u8]) -> f64 {
    let sum = md5::compute(raw);
    let mut bytes = [0u8; 8];
    bytes[..6].copy_from_slice(&sum.0[..6]);
    u64::from_le_bytes(bytes) as f64
}

/// Per-org gauges describing the applied configuration.
#[derive(Clone)]
pub struct AlertmanagerConfigMetrics {
    config_hash: GaugeVec,
    matchers: IntGaugeVec,
    match_re: IntGaugeVec,
    matches: IntGaugeVec,
    object_matchers: IntGaugeVec,
}

const NAMESPACE: &str = "tenant_alertmanager";

impl AlertmanagerConfigMetrics {
    /// Creates the gauges and registers them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let gauge = |name: &str, help: &str| {
            IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["org"])
        };
        let metrics = Self {
            config_hash: GaugeVec::new(
                Opts::new("config_hash", "The hash of the Alertmanager configuration.")
                    .namespace(NAMESPACE),
                &["org"],
            )?,
            matchers: gauge("config_matchers", "The total number of matchers.")?,
            match_re: gauge("config_match_re", "The total number of match_re.")?,
            matches: gauge("config_match", "The total number of match.")?,
            object_matchers: gauge("config_object_matchers", "The total number of object_matchers.")?,
        };
        registry.register(Box::new(metrics.config_hash.clone()))?;
        registry.register(Box::new(metrics.matchers.clone()))?;
        registry.register(Box::new(metrics.match_re.clone()))?;
        registry.register(Box::new(metrics.matches.clone()))?;
        registry.register(Box::new(metrics.object_matchers.clone()))?;
        Ok(metrics)
    }

    /// Records the configuration applied for `org_id`.
    pub fn update(&self, org_id: i64, raw: &[u8], usage: AggregateMatchersUsage) {
        let org = org_id.to_string();
        self.config_hash.with_label_values(&[org.as_str()]).set(hash_as_metric_value(raw));
        self.matchers.with_label_values(&[org.as_str()]).set(usage.matchers as i64);
        self.match_re.with_label_values(&[org.as_str()]).set(usage.match_re as i64);
        self.matches.with_label_values(&[org.as_str()]).set(usage.matches as i64);
        self.object_matchers.with_label_values(&[org.as_str()]).set(usage.object_matchers as i64);
    }

    /// Drops every series of `org_id`.
    pub fn remove(&self, org_id: i64) {
        let org = org_id.to_string();
        let _ = self.config_hash.remove_label_values(&[org.as_str()]);
        for gauge in [&self.matchers, &self.match_re, &self.matches, &self.object_matchers] {
            let _ = gauge.remove_label_values(&[org.as_str()]);
        }
    }

    /// The config hash gauge of `org_id`.
    pub fn config_hash_gauge(&self, org_id: i64) -> Gauge {
        self.config_hash.with_label_values(&[org_id.to_string().as_str()])
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn route(object_matchers: usize, matches: usize, match_re: usize, routes: Vec<Route>) -> Route {
        Route {
            object_matchers: (0..object_matchers)
                .map(|i| [format!("l{i}"), "=".to_string(), "v".to_string()])
                .collect(),
            match_eq: (0..matches).map(|i| (format!("m{i}"), "v".to_string())).collect(),
            match_re: (0..match_re).map(|i| (format!("r{i}"), "v.*".to_string())).collect(),
            routes,
            ..Default::default()
        }
    }

    #[test]
    fn test_aggregate_over_route_tree() {
        let config = PostableApiAlertingConfig {
            route: Some(route(2, 0, 0, vec![route(0, 1, 1, vec![])])),
            ..Default::default()
        };
        assert_eq!(
            aggregate_matchers_usage(&config),
            AggregateMatchersUsage { object_matchers: 2, matches: 1, match_re: 1, matchers: 0 }
        );
    }

    #[test]
    fn test_aggregate_includes_inhibit_rules_and_deep_routes() {
        let mut leaf = route(1, 0, 0, vec![]);
        leaf.matchers = vec!["a=\"b\"".into(), "c!=\"d\"".into()];
        let config = PostableApiAlertingConfig {
            route: Some(route(0, 0, 0, vec![route(0, 1, 0, vec![leaf]), route(1, 0, 0, vec![])])),
            inhibit_rules: vec![InhibitRule {
                source_matchers: vec!["severity=\"critical\"".into()],
                target_match: BTreeMap::from([("severity".into(), "warning".into())]),
                target_match_re: BTreeMap::from([("team".into(), "o.*".into())]),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(
            aggregate_matchers_usage(&config),
            AggregateMatchersUsage { matchers: 3, match_re: 1, matches: 2, object_matchers: 2 }
        );
    }

    #[test]
    fn test_aggregate_without_route_is_zero() {
        assert_eq!(
            aggregate_matchers_usage(&PostableApiAlertingConfig::default()),
            AggregateMatchersUsage::default()
        );
    }

    #[test]
    fn test_hash_as_metric_value() {
        let raw = b"{\"route\":{}}";
        let sum = md5::compute(raw).0;
        let expected = sum[..6].iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)) as f64;
        assert_eq!(hash_as_metric_value(raw), expected);
        assert!(hash_as_metric_value(raw) < 2f64.powi(48));
        assert_ne!(hash_as_metric_value(raw), hash_as_metric_value(b"other"));
    }

    #[test]
    fn test_metrics_update_and_remove() {
        let registry = Registry::new();
        let metrics = AlertmanagerConfigMetrics::new(&registry).unwrap();
        let usage = AggregateMatchersUsage { matchers: 1, match_re: 2, matches: 3, object_matchers: 4 };
        metrics.update(7, b"raw", usage);

        assert_eq!(metrics.config_hash_gauge(7).get(), hash_as_metric_value(b"raw"));
        assert_eq!(metrics.object_matchers.with_label_values(&["7"]).get(), 4);

        let families = registry.gather();
        assert_eq!(families.len(), 5);

        metrics.remove(7);
        assert!(registry.gather().iter().all(|f| f.get_metric().is_empty()));
    }

    #[test]
    fn test_metrics_register_twice_fails() {
        let registry = Registry::new();
        AlertmanagerConfigMetrics::new(&registry).unwrap();
        assert!(AlertmanagerConfigMetrics::new(&registry).is_err());
    }
}
