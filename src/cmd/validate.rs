//! The `validate` subcommand: checks a configuration document offline and
//! reports what it resolves to.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use clap::Parser;
use serde::Serialize;
use thiserror::Error;

use crate::{
    config::HttpRetryConfig,
    engine::{AggregateMatchersUsage, aggregate_matchers_usage, pipeline::CompiledRoute},
    http_client::{create_base_client, create_retryable_http_client},
    loader::{self, ConfigValidationError},
    models::configuration::configuration_hash,
    notification::{
        DisabledEmailSender, HttpWebhookSender, IntegrationBuildError, IntegrationBuilder,
        NoImageProvider, PlaintextDecrypter, TemplateError, TemplateSet,
    },
};

/// Errors of the `validate` command.
#[derive(Error, Debug)]
pub enum Error {
    /// The document failed to parse or validate.
    #[error("Configuration error: {0}")]
    Validation(#[from] ConfigValidationError),
    /// A template failed to compile.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),
    /// A receiver could not be built.
    #[error("Receiver error: {0}")]
    Build(#[from] IntegrationBuildError),
    /// The route tree could not be compiled.
    #[error("Route error: {0}")]
    Route(#[from] crate::engine::PipelineError),
    /// The HTTP client used by the receivers could not be built.
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),
    /// The report could not be serialized.
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Arguments of the `validate` subcommand.
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the configuration document to check.
    #[arg(short, long)]
    file: PathBuf,
    /// Org id the receivers are built for.
    #[arg(long, default_value_t = 1)]
    org_id: i64,
}

/// What a configuration document resolves to once loaded.
#[derive(Debug, Serialize)]
pub struct ValidationReport {
    /// MD5 of the document bytes.
    pub configuration_hash: String,
    /// Integration types per receiver.
    pub receivers: BTreeMap<String, Vec<String>>,
    /// Template file names, the default template included.
    pub templates: Vec<String>,
    /// Matcher counts of the route tree and inhibit rules.
    pub matchers_usage: AggregateMatchersUsage,
}

/// Loads, validates and builds the document at `args.file` without
/// sending anything.
pub fn check(args: &ValidateArgs) -> Result<ValidationReport, Error> {
    let raw = std::fs::read(&args.file).map_err(ConfigValidationError::from)?;
    let cfg = loader::load(&raw)?;

    if let Some(route) = &cfg.alertmanager_config.route {
        CompiledRoute::compile(route)?;
    }
    let templates = Arc::new(TemplateSet::new(&cfg.template_files)?);
    let builder = IntegrationBuilder::new(
        args.org_id,
        Arc::new(PlaintextDecrypter),
        Arc::new(HttpWebhookSender::new(Arc::new(create_retryable_http_client(
            &HttpRetryConfig::default(),
            create_base_client()?,
        )))),
        Arc::new(DisabledEmailSender),
        Arc::new(NoImageProvider),
        "http://localhost:3000/",
    );
    let receivers = builder
        .build_all(&cfg.alertmanager_config.receivers, &templates)?
        .into_iter()
        .map(|(name, integrations)| {
            (name, integrations.iter().map(|i| i.integration_type().to_string()).collect())
        })
        .collect();

    Ok(ValidationReport {
        configuration_hash: configuration_hash(&raw),
        receivers,
        templates: cfg.template_files.keys().cloned().collect(),
        matchers_usage: aggregate_matchers_usage(&cfg.alertmanager_config),
    })
}

/// Runs the `validate` subcommand and prints the report as JSON.
pub async fn execute(args: ValidateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let report = check(&args)?;
    println!("{}", serde_json::to_string_pretty(&report).map_err(Error::from)?);
    tracing::info!(file = %args.file.display(), hash = %report.configuration_hash, "Configuration is valid.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn args_for(content: &str) -> (tempfile::NamedTempFile, ValidateArgs) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let args = ValidateArgs { file: file.path().to_path_buf(), org_id: 1 };
        (file, args)
    }

    #[test]
    fn test_check_reports_receivers_and_usage() {
        let (_file, args) = args_for(
            r#"{"alertmanager_config": {
                "route": {"receiver": "hook", "routes": [{"receiver": "hook", "match": {"team": "ops"}}]},
                "receivers": [{"name": "hook", "grafana_managed_receiver_configs": [
                    {"uid": "h", "name": "h", "type": "webhook", "settings": {"url": "http://hook"}}
                ]}]
            }}"#,
        );
        let report = check(&args).unwrap();
        assert_eq!(report.receivers["hook"], vec!["webhook".to_string()]);
        assert_eq!(report.matchers_usage.matches, 1);
        assert!(report.templates.contains(&"__default__.tmpl".to_string()));
        assert_eq!(report.configuration_hash.len(), 32);
    }

    #[test]
    fn test_check_rejects_unknown_receiver() {
        let (_file, args) = args_for(
            r#"{"alertmanager_config": {"route": {"receiver": "missing"}, "receivers": []}}"#,
        );
        assert!(matches!(check(&args), Err(Error::Validation(_))));
    }

    #[test]
    fn test_check_rejects_unbuildable_receiver() {
        let (_file, args) = args_for(
            r#"{"alertmanager_config": {
                "route": {"receiver": "hook"},
                "receivers": [{"name": "hook", "grafana_managed_receiver_configs": [
                    {"uid": "h", "name": "h", "type": "webhook", "settings": {}}
                ]}]
            }}"#,
        );
        assert!(matches!(check(&args), Err(Error::Build(_))));
    }
}
