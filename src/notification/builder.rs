//! Turns receiver definitions into runnable integrations.

use std::{collections::BTreeMap, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use url::Url;

use super::{
    decrypt::Decrypter,
    error::{IntegrationBuildError, NotificationError},
    image::ImageProvider,
    payload_builder::{
        DiscordPayloadBuilder, SlackPayloadBuilder, TelegramPayloadBuilder, WebhookPayloadBuilder,
    },
    sender::{EmailMessage, EmailSender, WebhookMessage, WebhookSender},
    template::{DEFAULT_MESSAGE, DEFAULT_TITLE, TemplateSet},
};
use crate::models::{
    Alert, AlertStatus, LabelSet, NotifierSettings, PostableApiReceiver,
    alert::IMAGE_TOKEN_ANNOTATION,
};

const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// One notification: the alerts of a group, sent to one receiver.
#[derive(Debug, Clone)]
pub struct NotificationData {
    /// Receiver name.
    pub receiver: String,
    /// Key identifying the alert group.
    pub group_key: String,
    /// Labels the group is keyed by.
    pub group_labels: LabelSet,
    /// Alerts of the group.
    pub alerts: Vec<Alert>,
    /// Time the notification is rendered at.
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
struct TemplateAlert {
    status: AlertStatus,
    labels: LabelSet,
    annotations: LabelSet,
    #[serde(rename = "startsAt")]
    starts_at: DateTime<Utc>,
    #[serde(rename = "endsAt")]
    ends_at: DateTime<Utc>,
    #[serde(rename = "generatorURL")]
    generator_url: String,
    fingerprint: String,
    #[serde(rename = "imageURL")]
    image_url: Option<String>,
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    receiver: &'a str,
    status: AlertStatus,
    alerts: &'a [TemplateAlert],
    firing: Vec<&'a TemplateAlert>,
    resolved: Vec<&'a TemplateAlert>,
    group_labels: &'a LabelSet,
    common_labels: LabelSet,
    common_annotations: LabelSet,
    external_url: &'a str,
    group_key: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody<'a> {
    receiver: &'a str,
    status: AlertStatus,
    org_id: i64,
    alerts: &'a [TemplateAlert],
    group_labels: &'a LabelSet,
    common_labels: &'a LabelSet,
    common_annotations: &'a LabelSet,
    #[serde(rename = "externalURL")]
    external_url: &'a str,
    version: &'static str,
    group_key: &'a str,
    truncated_alerts: usize,
    title: &'a str,
    message: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct WebhookSettings {
    url: String,
    #[serde(default, alias = "httpMethod")]
    http_method: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default, alias = "maxAlerts", deserialize_with = "number_or_string")]
    max_alerts: usize,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmailSettings {
    addresses: String,
    #[serde(default, alias = "singleEmail")]
    single_email: bool,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatSettings {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TelegramSettings {
    bottoken: String,
    #[serde(deserialize_with = "string_or_number")]
    chatid: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    disable_web_page_preview: bool,
    #[serde(default)]
    api_url: Option<String>,
}

fn number_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| serde::de::Error::custom("expected a non-negative integer")),
        serde_json::Value::String(s) if s.trim().is_empty() => Ok(0),
        serde_json::Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        serde_json::Value::Null => Ok(0),
        _ => Err(serde::de::Error::custom("expected a number")),
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected a string or a number")),
    }
}

enum Transport {
    Webhook {
        url: String,
        method: Method,
        basic_auth: Option<(String, String)>,
        secret: Option<String>,
        max_alerts: usize,
    },
    Email {
        addresses: Vec<String>,
        single_email: bool,
    },
    Chat {
        url: String,
        payload: Box<dyn WebhookPayloadBuilder>,
    },
}

/// A runnable notification channel of a receiver.
pub struct Integration {
    org_id: i64,
    receiver: String,
    index: u32,
    uid: String,
    name: String,
    integration_type: String,
    send_resolved: bool,
    title: Option<String>,
    message: Option<String>,
    transport: Transport,
    templates: Arc<TemplateSet>,
    images: Arc<dyn ImageProvider>,
    webhook_sender: Arc<dyn WebhookSender>,
    email_sender: Arc<dyn EmailSender>,
    external_url: String,
}

impl Integration {
    /// Receiver the integration belongs to.
    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    /// Position of the integration inside its receiver.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Integration uid.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Integration name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Integration type.
    pub fn integration_type(&self) -> &str {
        &self.integration_type
    }

    /// Whether notifications with only resolved alerts are sent.
    pub fn send_resolved(&self) -> bool {
        self.send_resolved
    }

    /// Renders and sends one notification.
    #[tracing::instrument(
        skip(self, data),
        fields(org_id = self.org_id, receiver = %self.receiver, integration = %self.integration_type),
        level = "debug"
    )]
    pub async fn notify(&self, data: &NotificationData) -> Result<(), NotificationError> {
        let mut alerts = Vec::with_capacity(data.alerts.len());
        for alert in &data.alerts {
            alerts.push(self.template_alert(alert, data.now).await);
        }

        let status = if alerts.iter().any(|a| a.status == AlertStatus::Firing) {
            AlertStatus::Firing
        } else {
            AlertStatus::Resolved
        };
        let context = TemplateContext {
            receiver: &data.receiver,
            status,
            alerts: &alerts,
            firing: alerts.iter().filter(|a| a.status == AlertStatus::Firing).collect(),
            resolved: alerts.iter().filter(|a| a.status == AlertStatus::Resolved).collect(),
            group_labels: &data.group_labels,
            common_labels: common_pairs(alerts.iter().map(|a| &a.labels)),
            common_annotations: common_pairs(alerts.iter().map(|a| &a.annotations)),
            external_url: &self.external_url,
            group_key: &data.group_key,
        };

        let title =
            self.templates.render(self.title.as_deref().unwrap_or(DEFAULT_TITLE), &context)?;
        let message =
            self.templates.render(self.message.as_deref().unwrap_or(DEFAULT_MESSAGE), &context)?;

        match &self.transport {
            Transport::Webhook { url, method, basic_auth, secret, max_alerts } => {
                let shown = if *max_alerts > 0 { alerts.len().min(*max_alerts) } else { alerts.len() };
                let body = WebhookBody {
                    receiver: &data.receiver,
                    status,
                    org_id: self.org_id,
                    alerts: &alerts[..shown],
                    group_labels: &data.group_labels,
                    common_labels: &context.common_labels,
                    common_annotations: &context.common_annotations,
                    external_url: &self.external_url,
                    version: "1",
                    group_key: &data.group_key,
                    truncated_alerts: alerts.len() - shown,
                    title: &title,
                    message: &message,
                };
                let body = serde_json::to_value(&body).map_err(|e| {
                    NotificationError::InternalError(format!("failed to serialize webhook body: {e}"))
                })?;
                let request = WebhookMessage {
                    url: url.clone(),
                    method: method.clone(),
                    headers: BTreeMap::new(),
                    basic_auth: basic_auth.clone(),
                    secret: secret.clone(),
                    body,
                };
                self.webhook_sender.send_webhook(&request).await
            }
            Transport::Email { addresses, single_email } => {
                if *single_email {
                    let email =
                        EmailMessage { to: addresses.clone(), subject: title, body: message };
                    return self.email_sender.send_email(&email).await;
                }
                for address in addresses {
                    let email = EmailMessage {
                        to: vec![address.clone()],
                        subject: title.clone(),
                        body: message.clone(),
                    };
                    self.email_sender.send_email(&email).await?;
                }
                Ok(())
            }
            Transport::Chat { url, payload } => {
                let request = WebhookMessage::post(url.clone(), payload.build_payload(&title, &message));
                self.webhook_sender.send_webhook(&request).await
            }
        }
    }

    async fn template_alert(&self, alert: &Alert, now: DateTime<Utc>) -> TemplateAlert {
        let image_url = self.images.image_url(alert).await;
        let mut annotations = alert.annotations.clone();
        annotations.remove(IMAGE_TOKEN_ANNOTATION);
        TemplateAlert {
            status: alert.status_at(now),
            labels: alert.labels.clone(),
            annotations,
            starts_at: alert.starts_at,
            ends_at: alert.ends_at,
            generator_url: alert.generator_url.clone(),
            fingerprint: alert.fingerprint.to_string(),
            image_url,
        }
    }
}

/// Pairs present with the same value in every set.
fn common_pairs<'a>(mut sets: impl Iterator<Item = &'a LabelSet>) -> LabelSet {
    let Some(first) = sets.next() else {
        return LabelSet::new();
    };
    let mut common = first.clone();
    for set in sets {
        common.retain(|name, value| set.get(name) == Some(value));
    }
    common
}

/// Builds the integrations of a tenant's receivers. The transports are
/// shared by every integration it builds.
pub struct IntegrationBuilder {
    org_id: i64,
    decrypter: Arc<dyn Decrypter>,
    webhook_sender: Arc<dyn WebhookSender>,
    email_sender: Arc<dyn EmailSender>,
    image_provider: Arc<dyn ImageProvider>,
    external_url: String,
}

impl IntegrationBuilder {
    /// Creates a builder for the integrations of `org_id`.
    pub fn new(
        org_id: i64,
        decrypter: Arc<dyn Decrypter>,
        webhook_sender: Arc<dyn WebhookSender>,
        email_sender: Arc<dyn EmailSender>,
        image_provider: Arc<dyn ImageProvider>,
        external_url: impl Into<String>,
    ) -> Self {
        Self {
            org_id,
            decrypter,
            webhook_sender,
            email_sender,
            image_provider,
            external_url: external_url.into(),
        }
    }

    /// Builds every integration of one receiver. All failures are reported.
    pub fn build(
        &self,
        receiver: &PostableApiReceiver,
        templates: &Arc<TemplateSet>,
    ) -> Result<Vec<Integration>, IntegrationBuildError> {
        let mut integrations = Vec::with_capacity(receiver.grafana_managed_receiver_configs.len());
        let mut failures = Vec::new();
        for (index, settings) in receiver.grafana_managed_receiver_configs.iter().enumerate() {
            match self.build_integration(&receiver.name, index as u32, settings, templates) {
                Ok(integration) => integrations.push(integration),
                Err(reason) => failures.push(IntegrationBuildError::Integration {
                    receiver: receiver.name.clone(),
                    name: settings.name.clone(),
                    uid: settings.uid.clone(),
                    integration_type: settings.notifier_type.clone(),
                    reason,
                }),
            }
        }
        collect_failures(failures).map(|()| integrations)
    }

    /// Builds the integrations of every receiver, keyed by receiver name.
    pub fn build_all(
        &self,
        receivers: &[PostableApiReceiver],
        templates: &Arc<TemplateSet>,
    ) -> Result<BTreeMap<String, Vec<Integration>>, IntegrationBuildError> {
        let mut built = BTreeMap::new();
        let mut failures = Vec::new();
        for receiver in receivers {
            match self.build(receiver, templates) {
                Ok(integrations) => {
                    built.insert(receiver.name.clone(), integrations);
                }
                Err(IntegrationBuildError::Multiple(all)) => failures.extend(all),
                Err(e) => failures.push(e),
            }
        }
        collect_failures(failures).map(|()| built)
    }

    fn build_integration(
        &self,
        receiver: &str,
        index: u32,
        settings: &NotifierSettings,
        templates: &Arc<TemplateSet>,
    ) -> Result<Integration, String> {
        let merged = self.merge_secure_settings(settings)?;
        let (transport, title, message) = match settings.notifier_type.as_str() {
            "webhook" => {
                let s: WebhookSettings = parse_settings(merged)?;
                let method = match s.http_method.as_deref().map(str::to_ascii_uppercase).as_deref() {
                    None | Some("") | Some("POST") => Method::POST,
                    Some("PUT") => Method::PUT,
                    Some(other) => return Err(format!("unsupported HTTP method {other}")),
                };
                let basic_auth = s
                    .username
                    .filter(|u| !u.is_empty())
                    .map(|u| (u, s.password.unwrap_or_default()));
                let transport = Transport::Webhook {
                    url: check_url(&s.url)?,
                    method,
                    basic_auth,
                    secret: s.secret.filter(|v| !v.is_empty()),
                    max_alerts: s.max_alerts,
                };
                (transport, s.title, s.message)
            }
            "email" => {
                let s: EmailSettings = parse_settings(merged)?;
                let addresses: Vec<String> = s
                    .addresses
                    .split([';', ',', '\n'])
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .map(String::from)
                    .collect();
                if addresses.is_empty() {
                    return Err("could not find addresses in settings".into());
                }
                (Transport::Email { addresses, single_email: s.single_email }, s.subject, s.message)
            }
            "slack" => {
                let s: ChatSettings = parse_settings(merged)?;
                let transport =
                    Transport::Chat { url: check_url(&s.url)?, payload: Box::new(SlackPayloadBuilder) };
                (transport, s.title, s.message)
            }
            "discord" => {
                let s: ChatSettings = parse_settings(merged)?;
                let transport =
                    Transport::Chat { url: check_url(&s.url)?, payload: Box::new(DiscordPayloadBuilder) };
                (transport, s.title, s.message)
            }
            "telegram" => {
                let s: TelegramSettings = parse_settings(merged)?;
                if s.bottoken.is_empty() {
                    return Err("could not find Bot Token in settings".into());
                }
                if s.chatid.is_empty() {
                    return Err("could not find Chat Id in settings".into());
                }
                let api_url = check_url(s.api_url.as_deref().unwrap_or(DEFAULT_TELEGRAM_API_URL))?;
                let transport = Transport::Chat {
                    url: format!("{}/bot{}/sendMessage", api_url.trim_end_matches('/'), s.bottoken),
                    payload: Box::new(TelegramPayloadBuilder {
                        chat_id: s.chatid,
                        disable_web_preview: s.disable_web_page_preview,
                    }),
                };
                (transport, s.title, s.message)
            }
            other => return Err(format!("unsupported integration type \"{other}\"")),
        };

        Ok(Integration {
            org_id: self.org_id,
            receiver: receiver.to_string(),
            index,
            uid: settings.uid.clone(),
            name: settings.name.clone(),
            integration_type: settings.notifier_type.clone(),
            send_resolved: !settings.disable_resolve_message,
            title: title.filter(|t| !t.is_empty()),
            message: message.filter(|m| !m.is_empty()),
            transport,
            templates: Arc::clone(templates),
            images: Arc::clone(&self.image_provider),
            webhook_sender: Arc::clone(&self.webhook_sender),
            email_sender: Arc::clone(&self.email_sender),
            external_url: self.external_url.clone(),
        })
    }

    /// Plain settings with every decrypted secure setting laid over them.
    fn merge_secure_settings(&self, settings: &NotifierSettings) -> Result<serde_json::Value, String> {
        let mut merged = match &settings.settings {
            serde_json::Value::Null => serde_json::Map::new(),
            serde_json::Value::Object(map) => map.clone(),
            _ => return Err("settings must be a JSON object".into()),
        };
        for (key, encoded) in &settings.secure_settings {
            let ciphertext = BASE64
                .decode(encoded.as_bytes())
                .map_err(|_| format!("failed to decode secure setting \"{key}\""))?;
            let plaintext = self
                .decrypter
                .decrypt(&ciphertext)
                .map_err(|_| format!("failed to decrypt secure setting \"{key}\""))?;
            let value = String::from_utf8(plaintext)
                .map_err(|_| format!("secure setting \"{key}\" is not valid UTF-8"))?;
            merged.insert(key.clone(), serde_json::Value::String(value));
        }
        Ok(serde_json::Value::Object(merged))
    }
}

fn parse_settings<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Result<T, String> {
    serde_json::from_value(value).map_err(|e| format!("invalid settings: {e}"))
}

fn check_url(raw: &str) -> Result<String, String> {
    if raw.is_empty() {
        return Err("could not find url property in settings".into());
    }
    let url = Url::parse(raw).map_err(|e| format!("invalid url: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(raw.to_string()),
        scheme => Err(format!("unsupported url scheme {scheme}")),
    }
}

fn collect_failures(mut failures: Vec<IntegrationBuildError>) -> Result<(), IntegrationBuildError> {
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(IntegrationBuildError::Multiple(failures)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::Duration;
    use serde_json::json;

    use super::*;
    use crate::{
        models::Fingerprint,
        notification::{
            decrypt::{MockDecrypter, PlaintextDecrypter},
            error::DecryptError,
            image::MockImageProvider,
            sender::{MockEmailSender, MockWebhookSender},
        },
    };

    fn no_images() -> Arc<dyn ImageProvider> {
        let mut images = MockImageProvider::new();
        images.expect_image_url().returning(|_| None);
        Arc::new(images)
    }

    fn builder_with(
        webhook: MockWebhookSender,
        email: MockEmailSender,
        decrypter: Arc<dyn Decrypter>,
    ) -> IntegrationBuilder {
        IntegrationBuilder::new(
            1,
            decrypter,
            Arc::new(webhook),
            Arc::new(email),
            no_images(),
            "http://grafana.local/",
        )
    }

    fn templates() -> Arc<TemplateSet> {
        Arc::new(TemplateSet::new(&BTreeMap::new()).unwrap())
    }

    fn integration(uid: &str, kind: &str, settings: serde_json::Value) -> NotifierSettings {
        NotifierSettings {
            uid: uid.into(),
            name: format!("{kind}-{uid}"),
            notifier_type: kind.into(),
            disable_resolve_message: false,
            settings,
            secure_settings: BTreeMap::new(),
        }
    }

    fn receiver(name: &str, integrations: Vec<NotifierSettings>) -> PostableApiReceiver {
        PostableApiReceiver { name: name.into(), grafana_managed_receiver_configs: integrations }
    }

    fn alert(name: &str, instance: &str, now: DateTime<Utc>, firing: bool) -> Alert {
        let labels = LabelSet::from([
            ("alertname".to_string(), name.to_string()),
            ("instance".to_string(), instance.to_string()),
        ]);
        Alert {
            fingerprint: Fingerprint::from_labels(&labels),
            labels,
            annotations: LabelSet::from([("summary".to_string(), "high".to_string())]),
            starts_at: now - Duration::minutes(10),
            ends_at: if firing { now + Duration::minutes(5) } else { now - Duration::minutes(1) },
            generator_url: String::new(),
            updated_at: now,
        }
    }

    fn data(alerts: Vec<Alert>, now: DateTime<Utc>) -> NotificationData {
        NotificationData {
            receiver: "ops".into(),
            group_key: "{}:{alertname=\"Cpu\"}".into(),
            group_labels: LabelSet::from([("alertname".to_string(), "Cpu".to_string())]),
            alerts,
            now,
        }
    }

    #[test]
    fn test_build_all_supported_types() {
        let builder =
            builder_with(MockWebhookSender::new(), MockEmailSender::new(), Arc::new(PlaintextDecrypter));
        let recv = receiver(
            "ops",
            vec![
                integration("a", "webhook", json!({"url": "http://hook.local/a", "httpMethod": "put"})),
                integration("b", "email", json!({"addresses": "a@x.io; b@x.io"})),
                integration("c", "slack", json!({"url": "https://hooks.slack.com/x"})),
                integration("d", "discord", json!({"url": "https://discord.com/api/webhooks/1"})),
                integration("e", "telegram", json!({"bottoken": "t0k", "chatid": -100})),
            ],
        );

        let built = builder.build(&recv, &templates()).unwrap();
        assert_eq!(built.len(), 5);
        assert_eq!(
            built.iter().map(|i| i.integration_type()).collect::<Vec<_>>(),
            vec!["webhook", "email", "slack", "discord", "telegram"]
        );
        assert_eq!(built.iter().map(|i| i.index()).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        assert!(built.iter().all(|i| i.receiver() == "ops" && i.send_resolved()));
    }

    #[test]
    fn test_build_reports_every_failure_without_secrets() {
        let builder =
            builder_with(MockWebhookSender::new(), MockEmailSender::new(), Arc::new(PlaintextDecrypter));
        let mut secret_hook = integration("a", "webhook", json!({}));
        secret_hook.secure_settings.insert("password".into(), BASE64.encode("hunter2"));
        let receivers = vec![
            receiver("one", vec![secret_hook]),
            receiver("two", vec![
                integration("b", "email", json!({"addresses": " ; "})),
                integration("c", "pagerduty", json!({})),
            ]),
            receiver("three", vec![integration("d", "slack", json!({"url": "ftp://x"}))]),
        ];

        let err = builder.build_all(&receivers, &templates()).err().unwrap();
        assert_eq!(err.failures().len(), 4);
        let message = err.to_string();
        for uid in ["\"a\"", "\"b\"", "\"c\"", "\"d\""] {
            assert!(message.contains(uid), "missing {uid} in {message}");
        }
        assert!(!message.contains("hunter2"));
    }

    #[test]
    fn test_secure_settings_are_decrypted_and_override_plain() {
        let mut decrypter = MockDecrypter::new();
        decrypter
            .expect_decrypt()
            .withf(|bytes| bytes == b"cipher")
            .returning(|_| Ok(b"http://secret.local/hook".to_vec()));

        let builder = builder_with(MockWebhookSender::new(), MockEmailSender::new(), Arc::new(decrypter));
        let mut settings = integration("a", "webhook", json!({"url": "http://plain.local"}));
        settings.secure_settings.insert("url".into(), BASE64.encode("cipher"));

        let built = builder.build(&receiver("ops", vec![settings]), &templates()).unwrap();
        match &built[0].transport {
            Transport::Webhook { url, .. } => assert_eq!(url, "http://secret.local/hook"),
            _ => panic!("expected a webhook transport"),
        }
    }

    #[test]
    fn test_decrypt_failure_fails_build() {
        let mut decrypter = MockDecrypter::new();
        decrypter.expect_decrypt().returning(|_| Err(DecryptError("bad key".into())));
        let builder = builder_with(MockWebhookSender::new(), MockEmailSender::new(), Arc::new(decrypter));
        let mut settings = integration("a", "webhook", json!({"url": "http://plain.local"}));
        settings.secure_settings.insert("password".into(), BASE64.encode("cipher"));

        let err = builder.build(&receiver("ops", vec![settings]), &templates()).err().unwrap();
        assert!(err.to_string().contains("failed to decrypt secure setting \"password\""));
    }

    #[tokio::test]
    async fn test_webhook_notify_body() {
        let captured = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&captured);
        let mut webhook = MockWebhookSender::new();
        webhook.expect_send_webhook().times(1).returning(move |message| {
            *sink.lock().unwrap() = Some(message.clone());
            Ok(())
        });

        let builder = builder_with(webhook, MockEmailSender::new(), Arc::new(PlaintextDecrypter));
        let settings = integration(
            "a",
            "webhook",
            json!({"url": "http://hook.local", "maxAlerts": "1", "username": "u", "password": "p", "secret": "s"}),
        );
        let built = builder.build(&receiver("ops", vec![settings]), &templates()).unwrap();

        let now = Utc::now();
        built[0]
            .notify(&data(vec![alert("Cpu", "a", now, true), alert("Cpu", "b", now, false)], now))
            .await
            .unwrap();

        let message = captured.lock().unwrap().clone().unwrap();
        assert_eq!(message.method, Method::POST);
        assert_eq!(message.basic_auth, Some(("u".into(), "p".into())));
        assert_eq!(message.secret.as_deref(), Some("s"));
        let body = message.body;
        assert_eq!(body["status"], "firing");
        assert_eq!(body["orgId"], 1);
        assert_eq!(body["alerts"].as_array().unwrap().len(), 1);
        assert_eq!(body["truncatedAlerts"], 1);
        assert_eq!(body["commonLabels"], json!({"alertname": "Cpu"}));
        assert_eq!(body["commonAnnotations"], json!({"summary": "high"}));
        assert_eq!(body["title"], "[FIRING:1] Cpu");
        assert_eq!(body["externalURL"], "http://grafana.local/");
    }

    #[tokio::test]
    async fn test_email_notify_per_address_and_custom_subject() {
        let subjects = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&subjects);
        let mut email = MockEmailSender::new();
        email.expect_send_email().times(2).returning(move |message| {
            sink.lock().unwrap().push((message.to.clone(), message.subject.clone()));
            Ok(())
        });

        let builder = builder_with(MockWebhookSender::new(), email, Arc::new(PlaintextDecrypter));
        let settings = integration(
            "b",
            "email",
            json!({"addresses": "a@x.io,b@x.io", "subject": "{{ status }} {{ common_labels.alertname }}"}),
        );
        let built = builder.build(&receiver("ops", vec![settings]), &templates()).unwrap();

        let now = Utc::now();
        built[0].notify(&data(vec![alert("Cpu", "a", now, false)], now)).await.unwrap();

        let sent = subjects.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![
                (vec!["a@x.io".to_string()], "resolved Cpu".to_string()),
                (vec!["b@x.io".to_string()], "resolved Cpu".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_telegram_notify_url() {
        let mut webhook = MockWebhookSender::new();
        webhook
            .expect_send_webhook()
            .withf(|m| m.url == "https://api.telegram.org/botT0K/sendMessage" && m.body["chat_id"] == "42")
            .times(1)
            .returning(|_| Ok(()));

        let builder = builder_with(webhook, MockEmailSender::new(), Arc::new(PlaintextDecrypter));
        let settings = integration("e", "telegram", json!({"bottoken": "T0K", "chatid": "42"}));
        let built = builder.build(&receiver("ops", vec![settings]), &templates()).unwrap();

        let now = Utc::now();
        built[0].notify(&data(vec![alert("Cpu", "a", now, true)], now)).await.unwrap();
    }

    #[test]
    fn test_common_pairs() {
        let a = LabelSet::from([("x".to_string(), "1".to_string()), ("y".to_string(), "2".to_string())]);
        let b = LabelSet::from([("x".to_string(), "1".to_string()), ("y".to_string(), "3".to_string())]);
        assert_eq!(common_pairs([&a, &b].into_iter()), LabelSet::from([("x".to_string(), "1".to_string())]));
        assert!(common_pairs(std::iter::empty()).is_empty());
    }
}
