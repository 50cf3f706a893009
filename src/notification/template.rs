//! Notification templates rendered with minijinja.
//!
//! Every template file of a configuration is registered by name. Titles and
//! messages are rendered as inline templates that can import macros from
//! those files; the macros of [`DEFAULT_TEMPLATE`] are imported implicitly.

use std::collections::BTreeMap;

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

use super::error::TemplateError;
use crate::models::user_config::DEFAULT_TEMPLATE_NAME;

/// Built-in template injected into every configuration.
pub const DEFAULT_TEMPLATE: &str = r#"{% macro default_title(status, firing, group_labels) -%}
[{{ status | upper }}{% if status == "firing" %}:{{ firing | length }}{% endif %}]{% for name, value in group_labels | dictsort %} {{ value }}{% endfor %}
{%- endmacro %}

{% macro default_message(alerts, external_url) -%}
{% for alert in alerts -%}
{{ alert.status | upper }}: {{ alert.labels.alertname | default("alert") }}
Labels:
{% for name, value in alert.labels | dictsort %} - {{ name }} = {{ value }}
{% endfor -%}
{% if alert.annotations %}Annotations:
{% for name, value in alert.annotations | dictsort %} - {{ name }} = {{ value }}
{% endfor %}{% endif -%}
{% if alert.generatorURL %}Source: {{ alert.generatorURL }}
{% endif -%}
{% if alert.imageURL %}Image: {{ alert.imageURL }}
{% endif %}
{% endfor -%}
{{ external_url }}
{%- endmacro %}
"#;

/// Title used when an integration does not configure one.
pub const DEFAULT_TITLE: &str = "{{ default_title(status, firing, group_labels) }}";

/// Message used when an integration does not configure one.
pub const DEFAULT_MESSAGE: &str = "{{ default_message(alerts, external_url) }}";

/// The compiled template files of one configuration.
pub struct TemplateSet {
    env: Environment<'static>,
}

impl TemplateSet {
    /// Compiles every file. The default template is added when missing.
    pub fn new(files: &BTreeMap<String, String>) -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Lenient);
        for (name, source) in files {
            env.add_template_owned(name.clone(), source.clone())
                .map_err(|source| TemplateError::Invalid { name: name.clone(), source })?;
        }
        if !files.contains_key(DEFAULT_TEMPLATE_NAME) {
            env.add_template(DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE).map_err(|source| {
                TemplateError::Invalid { name: DEFAULT_TEMPLATE_NAME.to_string(), source }
            })?;
        }
        Ok(Self { env })
    }

    /// Renders an inline template against `context`.
    pub fn render<S: Serialize>(&self, source: &str, context: S) -> Result<String, TemplateError> {
        let source = format!(
            "{{% from \"{DEFAULT_TEMPLATE_NAME}\" import default_title, default_message %}}{source}"
        );
        self.env.render_str(&source, context).map(|s| s.trim().to_string()).map_err(|e| {
            tracing::warn!(error = %e, "Failed to render notification template.");
            TemplateError::Render(e)
        })
    }

    /// Whether a template file named `name` is loaded.
    pub fn has_template(&self, name: &str) -> bool {
        self.env.get_template(name).is_ok()
    }
}
