//! Receiver integrations: how configured receivers turn into notifications.
//!
//! [`IntegrationBuilder`] turns the receivers of a configuration into
//! [`Integration`]s. Every integration of a tenant renders its title and
//! message through the tenant's [`TemplateSet`] and sends through transports
//! shared by the whole tenant: one [`WebhookSender`] for webhook-style
//! channels (generic webhooks, Slack, Discord, Telegram) and one
//! [`EmailSender`].

pub mod builder;
pub mod decrypt;
pub mod error;
pub mod image;
pub mod payload_builder;
pub mod sender;
pub mod template;

pub use builder::{Integration, IntegrationBuilder, NotificationData};
pub use decrypt::{Decrypter, PlaintextDecrypter};
pub use error::{DecryptError, IntegrationBuildError, NotificationError, TemplateError};
pub use image::{ImageProvider, NoImageProvider, StoreImageProvider};
pub use sender::{
    DisabledEmailSender, EmailMessage, EmailSender, HttpEmailRelaySender, HttpWebhookSender,
    WebhookMessage, WebhookSender,
};
pub use template::TemplateSet;
