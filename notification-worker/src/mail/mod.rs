//! Outbound mail collaborator.
//!
//! The pipeline only sees [`MailSender`]; the production implementation is
//! [`SmtpMailer`], which renders a template from disk and sends it over SMTP.

mod smtp;
mod template;

pub use smtp::SmtpMailer;
pub use template::{RenderedEmail, TemplateStore};

use async_trait::async_trait;

use crate::error::DeliveryError;

/// Rendering context: camelCase keys to JSON scalars.
pub type EmailContext = serde_json::Map<String, serde_json::Value>;

/// Sends one templated email.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        template: &str,
        recipient: &str,
        context: &EmailContext,
    ) -> Result<(), DeliveryError>;
}
