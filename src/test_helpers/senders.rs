use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;

use crate::notification::{
    EmailMessage, EmailSender, IntegrationBuilder, NoImageProvider, NotificationError,
    PlaintextDecrypter, WebhookMessage, WebhookSender,
};

/// A webhook transport that records every request instead of sending it.
#[derive(Default)]
pub struct RecordingWebhookSender {
    sent: Mutex<Vec<WebhookMessage>>,
    fail: AtomicBool,
}

impl RecordingWebhookSender {
    /// Creates a shared recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every following send fail after recording it.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every recorded request.
    pub fn sent(&self) -> Vec<WebhookMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of recorded requests.
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl WebhookSender for RecordingWebhookSender {
    async fn send_webhook(&self, message: &WebhookMessage) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::NotifyFailed(format!("{} unavailable", message.url)));
        }
        Ok(())
    }
}

/// An email transport that records every message.
#[derive(Default)]
pub struct RecordingEmailSender {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingEmailSender {
    /// Creates a shared recorder.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every recorded email.
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl EmailSender for RecordingEmailSender {
    async fn send_email(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// An integration builder wired to recording transports.
pub fn create_test_integration_builder(
    org_id: i64,
    webhooks: Arc<RecordingWebhookSender>,
    emails: Arc<RecordingEmailSender>,
) -> IntegrationBuilder {
    IntegrationBuilder::new(
        org_id,
        Arc::new(PlaintextDecrypter),
        webhooks,
        emails,
        Arc::new(NoImageProvider),
        "http://localhost:3000/".to_string(),
    )
}

/// An integration builder whose transports are discarded.
pub fn test_integration_builder(org_id: i64) -> IntegrationBuilder {
    create_test_integration_builder(
        org_id,
        RecordingWebhookSender::new(),
        RecordingEmailSender::new(),
    )
}
