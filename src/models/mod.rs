//! This module contains the data models for the tenant Alertmanager.

pub mod alert;
pub mod configuration;
pub mod image;
pub mod matcher;
pub mod route;
pub mod silence;
pub mod time_interval;
pub mod user_config;

pub use alert::{Alert, AlertStatus, Fingerprint, LabelSet, PostableAlert};
pub use configuration::{
    AlertConfiguration, MarkConfigurationAsAppliedCmd, SaveAlertmanagerConfigurationCmd,
};
pub use matcher::{MatchType, Matcher, MatcherError};
pub use route::Route;
pub use user_config::{
    InhibitRule, NotifierSettings, PostableApiAlertingConfig, PostableApiReceiver,
    PostableUserConfig,
};
