//! SMTP-backed [`MailSender`].

use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{debug, info};

use super::{EmailContext, MailSender, TemplateStore};
use crate::config::Config;
use crate::error::DeliveryError;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    templates: TemplateStore,
}

impl SmtpMailer {
    /// Build a STARTTLS relay transport from configuration.
    pub fn from_config(config: &Config) -> Result<Self, DeliveryError> {
        let from: Mailbox = format!("{} <{}>", config.sender_name, config.sender_email)
            .parse()
            .map_err(|_| DeliveryError::InvalidAddress(config.sender_email.clone()))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
            .map_err(|e| DeliveryError::Transport(e.to_string()))?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.sender_email.clone(),
                config.sender_email_password.clone(),
            ))
            .timeout(Some(Duration::from_millis(config.send_timeout_ms)))
            .build();

        info!(
            smtp_host = %config.smtp_host,
            smtp_port = config.smtp_port,
            templates_dir = %config.templates_dir,
            "smtp_mailer_initialized"
        );

        Ok(Self {
            transport,
            from,
            templates: TemplateStore::new(&config.templates_dir),
        })
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(
        &self,
        template: &str,
        recipient: &str,
        context: &EmailContext,
    ) -> Result<(), DeliveryError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|_| DeliveryError::InvalidAddress(recipient.to_string()))?;

        let rendered = self.templates.render(template, context).await?;

        let builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(rendered.subject);

        let message = match rendered.text {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(text, rendered.html)),
            None => builder.singlepart(SinglePart::html(rendered.html)),
        }
        .map_err(|e| DeliveryError::Render {
            template: template.to_string(),
            reason: e.to_string(),
        })?;

        debug!(template, recipient, "smtp_send_starting");

        self.transport
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        Ok(())
    }
}
