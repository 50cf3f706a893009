//! Integration tests for receiver integrations talking to HTTP endpoints

use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use mockito::Matcher;
use serde_json::{Value, json};
use tenant_alertmanager::{
    config::EmailRelayConfig,
    models::{NotifierSettings, PostableApiReceiver},
    notification::{
        EmailSender, HttpEmailRelaySender, HttpWebhookSender, IntegrationBuilder, NoImageProvider,
        NotificationData, PlaintextDecrypter, TemplateSet, WebhookSender,
    },
    test_helpers::{
        AlertBuilder, RecordingEmailSender, RecordingWebhookSender,
        create_test_http_client_without_retries,
    },
};

fn builder(webhooks: Arc<dyn WebhookSender>, emails: Arc<dyn EmailSender>) -> IntegrationBuilder {
    IntegrationBuilder::new(
        1,
        Arc::new(PlaintextDecrypter),
        webhooks,
        emails,
        Arc::new(NoImageProvider),
        "http://grafana.local/",
    )
}

fn receiver(notifier_type: &str, settings: Value, secure: &[(&str, &str)]) -> PostableApiReceiver {
    PostableApiReceiver {
        name: "team".into(),
        grafana_managed_receiver_configs: vec![NotifierSettings {
            uid: "uid-1".into(),
            name: "integration".into(),
            notifier_type: notifier_type.into(),
            settings,
            secure_settings: secure.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..Default::default()
        }],
    }
}

fn data() -> NotificationData {
    let now = Utc::now();
    NotificationData {
        receiver: "team".into(),
        group_key: "route:{alertname=\"Cpu\"}".into(),
        group_labels: [("alertname".to_string(), "Cpu".to_string())].into(),
        alerts: vec![
            AlertBuilder::new("Cpu").label("instance", "a").annotation("summary", "hot").build(now),
            AlertBuilder::new("Cpu").label("instance", "b").build(now),
        ],
        now,
    }
}

fn templates() -> Arc<TemplateSet> {
    Arc::new(TemplateSet::new(&BTreeMap::new()).unwrap())
}

#[tokio::test]
async fn test_webhook_with_secure_password_uses_basic_auth() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/hook")
        .match_header("authorization", "Basic YWRtaW46czNjcmV0")
        .match_body(Matcher::PartialJson(json!({
            "receiver": "team",
            "status": "firing",
            "orgId": 1,
            "externalURL": "http://grafana.local/",
            "truncatedAlerts": 1,
            "groupLabels": {"alertname": "Cpu"},
            "commonLabels": {"alertname": "Cpu"},
        })))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let webhooks = Arc::new(HttpWebhookSender::new(create_test_http_client_without_retries()));
    let integrations = builder(webhooks, RecordingEmailSender::new())
        .build(
            &receiver(
                "webhook",
                json!({"url": format!("{}/hook", server.url()), "username": "admin", "maxAlerts": "1"}),
                &[("password", "czNjcmV0")],
            ),
            &templates(),
        )
        .unwrap();

    integrations[0].notify(&data()).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_webhook_failure_is_reported() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/hook").with_status(500).expect(1).create_async().await;

    let webhooks = Arc::new(HttpWebhookSender::new(create_test_http_client_without_retries()));
    let integrations = builder(webhooks, RecordingEmailSender::new())
        .build(&receiver("webhook", json!({"url": format!("{}/hook", server.url())}), &[]), &templates())
        .unwrap();

    assert!(integrations[0].notify(&data()).await.is_err());
    mock.assert_async().await;
}

#[tokio::test]
async fn test_telegram_posts_to_bot_api() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/botTOKEN/sendMessage")
        .match_body(Matcher::PartialJson(json!({"chat_id": "42", "parse_mode": "HTML"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let webhooks = Arc::new(HttpWebhookSender::new(create_test_http_client_without_retries()));
    let integrations = builder(webhooks, RecordingEmailSender::new())
        .build(
            &receiver("telegram", json!({"chatid": 42, "api_url": server.url()}), &[("bottoken", "VE9LRU4=")]),
            &templates(),
        )
        .unwrap();

    integrations[0].notify(&data()).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_email_through_relay_one_message_per_address() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/send")
        .match_body(Matcher::PartialJson(json!({
            "from": {"address": "alerts@example.com", "name": "Alerts"},
        })))
        .with_status(202)
        .expect(2)
        .create_async()
        .await;

    let relay = EmailRelayConfig {
        url: url::Url::parse(&format!("{}/send", server.url())).unwrap(),
        from_address: "alerts@example.com".into(),
        from_name: "Alerts".into(),
    };
    let emails = Arc::new(HttpEmailRelaySender::new(create_test_http_client_without_retries(), relay));
    let integrations = builder(RecordingWebhookSender::new(), emails)
        .build(&receiver("email", json!({"addresses": "a@example.com; b@example.com"}), &[]), &templates())
        .unwrap();

    integrations[0].notify(&data()).await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_custom_title_template_is_rendered() {
    let webhooks = RecordingWebhookSender::new();
    let mut files = BTreeMap::new();
    files.insert(
        "custom.tmpl".to_string(),
        "{% macro headline(alerts) %}{{ alerts | length }} alert(s) firing{% endmacro %}".to_string(),
    );
    let templates = Arc::new(TemplateSet::new(&files).unwrap());

    let integrations = builder(webhooks.clone(), RecordingEmailSender::new())
        .build(
            &receiver(
                "slack",
                json!({
                    "url": "http://slack.local/hook",
                    "title": "{% from \"custom.tmpl\" import headline %}{{ headline(alerts) }}",
                }),
                &[],
            ),
            &templates,
        )
        .unwrap();
    integrations[0].notify(&data()).await.unwrap();

    let sent = webhooks.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].body["text"], "2 alert(s) firing");
}
