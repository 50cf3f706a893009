//! The per-org Alertmanager: configuration apply, the notification pipeline
//! and the configuration metrics.

pub mod alertmanager;
pub mod metrics;
pub mod pipeline;

pub use alertmanager::{
    AlertValidationError, Alertmanager, AlertmanagerError, AlertmanagerOptions, TEMPLATES_DIR,
};
pub use metrics::{AggregateMatchersUsage, AlertmanagerConfigMetrics, aggregate_matchers_usage};
pub use pipeline::{ActiveConfiguration, AlertStore, DispatchReport, PipelineError};
