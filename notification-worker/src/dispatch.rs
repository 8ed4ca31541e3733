//! Delivery dispatcher.
//!
//! Hands each template of a decoded request to the [`MailSender`] under a
//! deadline. There is no retry here; failures go back to the caller so the
//! acknowledgment policy can decide what happens next.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;
use tracing::{info, warn};

use crate::error::DeliveryError;
use crate::mail::{EmailContext, MailSender};

/// A multi-part send that stopped early.
#[derive(Debug)]
pub struct DispatchFailure {
    pub error: DeliveryError,
    /// Templates not yet sent, starting with the one that failed
    pub remaining: Vec<String>,
}

#[derive(Clone)]
pub struct Dispatcher {
    mailer: Arc<dyn MailSender>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(mailer: Arc<dyn MailSender>, send_timeout: Duration) -> Self {
        Self {
            mailer,
            send_timeout,
        }
    }

    /// Send one template to one recipient.
    pub async fn dispatch(
        &self,
        template: &str,
        receiver: &str,
        context: &EmailContext,
    ) -> Result<(), DeliveryError> {
        let started = Instant::now();

        match timeout(self.send_timeout, self.mailer.send(template, receiver, context)).await {
            Ok(Ok(())) => {
                info!(
                    template,
                    receiver,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "email_sent"
                );
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(template, receiver, error = %e, "email_send_failed");
                Err(e)
            }
            Err(_) => {
                let timeout_ms = self.send_timeout.as_millis() as u64;
                warn!(template, receiver, timeout_ms, "email_send_timed_out");
                Err(DeliveryError::Timeout(timeout_ms))
            }
        }
    }

    /// Send `templates` in order with the same context, stopping at the first failure.
    pub async fn dispatch_all(
        &self,
        templates: &[String],
        receiver: &str,
        context: &EmailContext,
    ) -> Result<(), DispatchFailure> {
        for (index, template) in templates.iter().enumerate() {
            if let Err(error) = self.dispatch(template, receiver, context).await {
                return Err(DispatchFailure {
                    error,
                    remaining: templates[index..].to_vec(),
                });
            }
        }

        Ok(())
    }
}
